// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The `customizations` section of a blueprint.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::disk::DiskCustomization;
use super::filesystem::FilesystemCustomization;
use super::fsnode::{self, DirectoryCustomization, FileCustomization};
use super::repository::RepositoryCustomization;
use crate::error::{invalid_blueprint, policy_violation};

/// The anaconda module that owns user creation.
pub const ANACONDA_MODULE_USERS: &str = "org.fedoraproject.Anaconda.Modules.Users";

pub const DEFAULT_KERNEL_NAME: &str = "kernel";

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelCustomization {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub append: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshKeyCustomization {
    pub user: String,
    pub key: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCustomization {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub home: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gid: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiredate: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_password_reset: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCustomization {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gid: Option<i64>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimezoneCustomization {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ntpservers: Option<Vec<String>>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocaleCustomization {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub languages: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyboard: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallServicesCustomization {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled: Option<Vec<String>>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallZoneCustomization {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<String>>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallCustomization {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub services: Option<FirewallServicesCustomization>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zones: Option<Vec<FirewallZoneCustomization>>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicesCustomization {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub masked: Option<Vec<String>>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FdoCustomization {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturing_server_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diun_pub_key_insecure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diun_pub_key_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diun_pub_key_root_certs: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub di_mfg_string_type_mac_iface: Option<String>,
}

impl FdoCustomization {
    pub fn validate(&self) -> Result<()> {
        if self.manufacturing_server_url.as_deref().unwrap_or_default().is_empty() {
            return Err(invalid_blueprint(
                "FDO customization requires a manufacturing_server_url",
            ));
        }
        let set = [
            &self.diun_pub_key_insecure,
            &self.diun_pub_key_hash,
            &self.diun_pub_key_root_certs,
        ]
        .iter()
        .filter(|v| v.as_deref().map_or(false, |s| !s.is_empty()))
        .count();
        if set != 1 {
            return Err(invalid_blueprint(
                "FDO customization requires exactly one of diun_pub_key_insecure, diun_pub_key_hash or diun_pub_key_root_certs",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenScapTailoringCustomization {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selected: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unselected: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenScapJsonTailoringCustomization {
    pub profile_id: String,
    pub filepath: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenScapCustomization {
    #[serde(default)]
    pub datastream: String,
    #[serde(default)]
    pub profile_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tailoring: Option<OpenScapTailoringCustomization>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_tailoring: Option<OpenScapJsonTailoringCustomization>,
}

impl OpenScapCustomization {
    pub fn validate(&self) -> Result<()> {
        if self.tailoring.is_some() && self.json_tailoring.is_some() {
            return Err(invalid_blueprint(
                "OpenSCAP tailoring and json_tailoring are mutually exclusive",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedIgnitionCustomization {
    pub config: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirstBootIgnitionCustomization {
    #[serde(rename = "url")]
    pub provisioning_url: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnitionCustomization {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedded: Option<EmbeddedIgnitionCustomization>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firstboot: Option<FirstBootIgnitionCustomization>,
}

impl IgnitionCustomization {
    pub fn validate(&self) -> Result<()> {
        match (&self.embedded, &self.firstboot) {
            (Some(_), Some(_)) => Err(invalid_blueprint(
                "both ignition embedded and firstboot configurations found",
            )),
            (None, None) => Err(invalid_blueprint(
                "ignition customization requires either embedded or firstboot",
            )),
            (None, Some(fb)) if fb.provisioning_url.is_empty() => Err(invalid_blueprint(
                "ignition.firstboot requires a provisioning url",
            )),
            (Some(e), None) if e.config.is_empty() => Err(invalid_blueprint(
                "ignition.embedded requires a config",
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStorageCustomization {
    #[serde(rename = "destination-path")]
    pub destination_path: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KickstartCustomization {
    pub contents: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnacondaModules {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enable: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disable: Vec<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallerCustomization {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unattended: bool,
    #[serde(
        rename = "sudo-nopasswd",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub sudo_nopasswd: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kickstart: Option<KickstartCustomization>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modules: Option<AnacondaModules>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpmImportKeys {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpmCustomization {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub import_keys: Option<RpmImportKeys>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customizations {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel: Option<KernelCustomization>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sshkey: Vec<SshKeyCustomization>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user: Vec<UserCustomization>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group: Vec<GroupCustomization>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<TimezoneCustomization>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<LocaleCustomization>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firewall: Option<FirewallCustomization>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub services: Option<ServicesCustomization>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filesystem: Vec<FilesystemCustomization>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk: Option<DiskCustomization>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installation_device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fdo: Option<FdoCustomization>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openscap: Option<OpenScapCustomization>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignition: Option<IgnitionCustomization>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub directories: Vec<DirectoryCustomization>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileCustomization>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repositories: Vec<RepositoryCustomization>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fips: Option<bool>,
    #[serde(rename = "containers-storage", skip_serializing_if = "Option::is_none")]
    pub containers_storage: Option<ContainerStorageCustomization>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installer: Option<InstallerCustomization>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpm: Option<RpmCustomization>,
}

impl Customizations {
    /// Which customizations are set, by name, in declaration order.
    fn populated(&self) -> [(&'static str, bool); 22] {
        [
            ("Hostname", self.hostname.is_some()),
            ("Kernel", self.kernel.is_some()),
            ("SSHKey", !self.sshkey.is_empty()),
            ("User", !self.user.is_empty()),
            ("Group", !self.group.is_empty()),
            ("Timezone", self.timezone.is_some()),
            ("Locale", self.locale.is_some()),
            ("Firewall", self.firewall.is_some()),
            ("Services", self.services.is_some()),
            ("Filesystem", !self.filesystem.is_empty()),
            ("Disk", self.disk.is_some()),
            (
                "InstallationDevice",
                self.installation_device
                    .as_deref()
                    .map_or(false, |d| !d.is_empty()),
            ),
            ("FDO", self.fdo.is_some()),
            ("OpenSCAP", self.openscap.is_some()),
            ("Ignition", self.ignition.is_some()),
            ("Directories", !self.directories.is_empty()),
            ("Files", !self.files.is_empty()),
            ("Repositories", !self.repositories.is_empty()),
            ("FIPS", self.fips.is_some()),
            ("ContainersStorage", self.containers_storage.is_some()),
            ("Installer", self.installer.is_some()),
            ("RPM", self.rpm.is_some()),
        ]
    }

    /// Fail on the first customization that is set but not named in
    /// `allowed`.
    pub fn check_allowed(&self, allowed: &[&str]) -> Result<()> {
        for (name, set) in self.populated() {
            if set && !allowed.contains(&name) {
                return Err(policy_violation(format!("'{}' is not allowed", name)));
            }
        }
        Ok(())
    }

    pub fn get_hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    /// The primary language and the keyboard layout.
    pub fn get_primary_locale(&self) -> (Option<&str>, Option<&str>) {
        match &self.locale {
            None => (None, None),
            Some(l) => (
                l.languages
                    .as_ref()
                    .and_then(|v| v.first())
                    .map(|s| s.as_str()),
                l.keyboard.as_deref(),
            ),
        }
    }

    pub fn get_timezone_settings(&self) -> (Option<&str>, Option<&[String]>) {
        match &self.timezone {
            None => (None, None),
            Some(tz) => (tz.timezone.as_deref(), tz.ntpservers.as_deref()),
        }
    }

    /// Users to create: one per SSH key, followed by the explicit users.
    /// Home directories lose any trailing slash.
    pub fn get_users(&self) -> Vec<UserCustomization> {
        self.sshkey
            .iter()
            .map(|k| UserCustomization {
                name: k.user.clone(),
                key: Some(k.key.clone()),
                ..Default::default()
            })
            .chain(self.user.iter().cloned())
            .map(|mut u| {
                if let Some(home) = u.home.as_mut() {
                    let trimmed = home.trim_end_matches('/').len();
                    home.truncate(trimmed);
                }
                u
            })
            .collect()
    }

    /// Groups to create, skipping those named like a user since every user
    /// gets a group of its own.
    pub fn get_groups(&self) -> Vec<GroupCustomization> {
        self.group
            .iter()
            .filter(|g| {
                !self.user.iter().any(|u| u.name == g.name)
                    && !self.sshkey.iter().any(|k| k.user == g.name)
            })
            .cloned()
            .collect()
    }

    /// The kernel package name (defaulting to `kernel`) and extra
    /// command-line arguments.
    pub fn get_kernel(&self) -> (String, String) {
        let k = self.kernel.clone().unwrap_or_default();
        let name = k
            .name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| DEFAULT_KERNEL_NAME.to_string());
        (name, k.append.unwrap_or_default())
    }

    pub fn get_filesystems_min_size(&self) -> u64 {
        let agg: u64 = self.filesystem.iter().map(|f| f.minsize.bytes()).sum();
        // round up to whole sectors
        agg.div_ceil(512) * 512
    }

    pub fn get_installation_device(&self) -> Option<&str> {
        self.installation_device.as_deref().filter(|d| !d.is_empty())
    }

    pub fn get_fips(&self) -> bool {
        self.fips.unwrap_or(false)
    }

    pub fn get_enabled_services(&self) -> &[String] {
        self.services
            .as_ref()
            .and_then(|s| s.enabled.as_deref())
            .unwrap_or_default()
    }

    pub fn get_disabled_services(&self) -> &[String] {
        self.services
            .as_ref()
            .and_then(|s| s.disabled.as_deref())
            .unwrap_or_default()
    }

    pub fn get_masked_services(&self) -> &[String] {
        self.services
            .as_ref()
            .and_then(|s| s.masked.as_deref())
            .unwrap_or_default()
    }

    /// Mountpoints from either the legacy `filesystem` list or the `disk`
    /// customization.
    pub fn mountpoints(&self) -> Vec<&str> {
        let mut r: Vec<&str> = self.filesystem.iter().map(|f| f.mountpoint.as_str()).collect();
        if let Some(disk) = &self.disk {
            r.extend(disk.mountpoints());
        }
        r
    }

    pub fn get_rpm_import_keys(&self) -> &[String] {
        self.rpm
            .as_ref()
            .and_then(|r| r.import_keys.as_ref())
            .map(|k| k.files.as_slice())
            .unwrap_or_default()
    }

    pub fn validate_installer(&self) -> Result<()> {
        let Some(installer) = &self.installer else {
            return Ok(());
        };
        let users_disabled = installer
            .modules
            .as_ref()
            .map_or(false, |m| m.disable.iter().any(|m| m == ANACONDA_MODULE_USERS));
        if users_disabled && (!self.user.is_empty() || !self.group.is_empty()) {
            return Err(invalid_blueprint(format!(
                "blueprint contains user or group customizations but disables the required Users Anaconda module ({})",
                ANACONDA_MODULE_USERS
            )));
        }
        let has_kickstart = installer
            .kickstart
            .as_ref()
            .map_or(false, |k| !k.contents.is_empty());
        if has_kickstart && (installer.unattended || !installer.sudo_nopasswd.is_empty()) {
            return Err(invalid_blueprint(
                "installer.unattended and installer.sudo-nopasswd cannot be used together with installer.kickstart",
            ));
        }
        Ok(())
    }

    /// Self-consistency checks that do not depend on the image type.
    pub fn validate(&self) -> Result<()> {
        for u in &self.user {
            if u.name.is_empty() {
                return Err(invalid_blueprint("user name must not be empty"));
            }
            for (what, v) in [("uid", u.uid), ("gid", u.gid)] {
                if v.map_or(false, |v| v < 0) {
                    return Err(invalid_blueprint(format!(
                        "user {}: {} must be non-negative",
                        u.name, what
                    )));
                }
            }
        }
        for g in &self.group {
            if g.gid.map_or(false, |v| v < 0) {
                return Err(invalid_blueprint(format!(
                    "group {}: gid must be non-negative",
                    g.name
                )));
            }
        }
        if !self.filesystem.is_empty() && self.disk.is_some() {
            return Err(invalid_blueprint(
                "customizations cannot contain both filesystem and disk",
            ));
        }
        if let Some(disk) = &self.disk {
            disk.validate()?;
        }
        fsnode::directories_to_fsnodes(&self.directories)?;
        fsnode::files_to_fsnodes(&self.files)?;
        fsnode::validate_dir_file_customizations(&self.directories, &self.files)?;
        for repo in &self.repositories {
            repo.validate()
                .with_context(|| format!("repository {}", repo.id))?;
        }
        if let Some(fdo) = &self.fdo {
            fdo.validate()?;
        }
        if let Some(ign) = &self.ignition {
            ign.validate()?;
        }
        if let Some(osc) = &self.openscap {
            osc.validate()?;
        }
        self.validate_installer()
    }
}
