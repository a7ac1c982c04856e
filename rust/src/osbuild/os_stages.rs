// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Stages that install and configure the operating system tree.

use serde_derive::Serialize;
use std::collections::BTreeSet;

use super::{Input, Stage};
use crate::blueprint::{repository::repos_by_filename, RepositoryCustomization};
use crate::container::{ContainerSpec, CONTAINERS_STORAGE_CONF};
use crate::rpmmd::PackageSpec;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RpmStageOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dbpath: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub gpgkeys: Vec<String>,
    /// Keys to import from files already present in the tree.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub gpgkeys_fromtree: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub disable_dracut: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude: Option<RpmExclude>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ostree_booted: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RpmExclude {
    pub docs: bool,
}

/// Install `packages` in order.
pub fn new_rpm_stage(options: RpmStageOptions, packages: &[PackageSpec]) -> Stage {
    Stage::new("org.osbuild.rpm", options).with_input(
        "packages",
        Input::packages(packages.iter().map(|p| (p.checksum.as_str(), p.check_gpg))),
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocaleStageOptions {
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeymapStageOptions {
    pub keymap: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x11_keymap: Option<X11Keymap>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct X11Keymap {
    pub layouts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostnameStageOptions {
    pub hostname: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimezoneStageOptions {
    pub zone: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChronyStageOptions {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub servers: Vec<ChronyServer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leapsectz: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChronyServer {
    pub hostname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minpoll: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maxpoll: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iburst: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefer: Option<bool>,
}

impl ChronyStageOptions {
    pub fn with_servers<S: AsRef<str>>(servers: &[S]) -> Self {
        Self {
            servers: servers
                .iter()
                .map(|s| ChronyServer {
                    hostname: s.as_ref().to_string(),
                    ..Default::default()
                })
                .collect(),
            leapsectz: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FirewallStageOptions {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub enabled_services: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub disabled_services: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_zone: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub zones: Vec<FirewallZone>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirewallZone {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SystemdStageOptions {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub enabled_services: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub disabled_services: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub masked_services: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_target: Option<String>,
}

impl SystemdStageOptions {
    pub fn is_empty(&self) -> bool {
        self.enabled_services.is_empty()
            && self.disabled_services.is_empty()
            && self.masked_services.is_empty()
            && self.default_target.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SysconfigStageOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel: Option<SysconfigKernel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<SysconfigNetwork>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SysconfigKernel {
    pub update_default: bool,
    pub default_kernel: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SysconfigNetwork {
    pub networking: bool,
    pub no_zero_conf: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RhsmStageOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dnf_plugins: Option<RhsmDnfPlugins>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_manager: Option<RhsmSubscriptionManager>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RhsmDnfPlugins {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<DnfPluginConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_manager: Option<DnfPluginConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnfPluginConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RhsmSubscriptionManager {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rhsm: Option<RhsmConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rhsmcertd: Option<RhsmCertdConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RhsmConfig {
    pub manage_repos: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RhsmCertdConfig {
    pub auto_registration: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RhsmFactsStageOptions {
    pub facts: RhsmFacts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RhsmFacts {
    #[serde(rename = "image-builder.osbuild-composer.api-type")]
    pub api_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SshdConfigStageOptions {
    pub config: SshdConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SshdConfig {
    #[serde(rename = "PasswordAuthentication", skip_serializing_if = "Option::is_none")]
    pub password_authentication: Option<bool>,
    #[serde(rename = "ChallengeResponseAuthentication", skip_serializing_if = "Option::is_none")]
    pub challenge_response_authentication: Option<bool>,
    #[serde(rename = "ClientAliveInterval", skip_serializing_if = "Option::is_none")]
    pub client_alive_interval: Option<u32>,
    #[serde(rename = "PermitRootLogin", skip_serializing_if = "Option::is_none")]
    pub permit_root_login: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModprobeStageOptions {
    pub filename: String,
    pub commands: Vec<ModprobeCommand>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModprobeCommand {
    pub command: String,
    pub modulename: String,
}

impl ModprobeStageOptions {
    /// Blacklist each of `modules` in `/etc/modprobe.d/<filename>`.
    pub fn blacklist<S: AsRef<str>>(filename: &str, modules: &[S]) -> Self {
        Self {
            filename: filename.to_string(),
            commands: modules
                .iter()
                .map(|m| ModprobeCommand {
                    command: "blacklist".to_string(),
                    modulename: m.as_ref().to_string(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DracutConfStageOptions {
    pub filename: String,
    pub config: DracutConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DracutConfig {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub add_dracutmodules: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub omit_dracutmodules: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub add_drivers: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub force_drivers: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub install: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub early_microcode: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reproducible: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DnfConfigStageOptions {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<DnfVariable>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<DnfConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnfVariable {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnfConfig {
    pub main: DnfConfigMain,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnfConfigMain {
    pub ip_resolve: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct YumReposStageOptions {
    pub filename: String,
    pub repos: Vec<YumRepository>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct YumRepository {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub baseurl: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metalink: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirrorlist: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub gpgkey: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpgcheck: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_gpgcheck: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sslverify: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_hotfixes: Option<bool>,
}

impl From<&RepositoryCustomization> for YumRepository {
    fn from(r: &RepositoryCustomization) -> Self {
        let (_, gpgkey) = r.gpg_key_files();
        Self {
            id: r.id.clone(),
            name: r.name.clone(),
            baseurl: r.baseurls.clone(),
            metalink: r.metalink.clone(),
            mirrorlist: r.mirrorlist.clone(),
            gpgkey,
            gpgcheck: r.gpgcheck,
            repo_gpgcheck: r.repo_gpgcheck,
            enabled: r.enabled,
            priority: r.priority,
            sslverify: r.sslverify,
            module_hotfixes: r.module_hotfixes,
        }
    }
}

/// One `org.osbuild.yum.repos` stage per repo file, in filename order.
pub fn gen_yum_repos_stages(repos: &[RepositoryCustomization]) -> Vec<Stage> {
    repos_by_filename(repos)
        .into_iter()
        .map(|(filename, repos)| {
            Stage::new(
                "org.osbuild.yum.repos",
                YumReposStageOptions {
                    filename,
                    repos: repos.into_iter().map(YumRepository::from).collect(),
                },
            )
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelinuxStageOptions {
    pub file_contexts: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_autorelabel: Option<bool>,
}

impl SelinuxStageOptions {
    pub fn new(file_contexts: &str) -> Self {
        Self {
            file_contexts: file_contexts.to_string(),
            force_autorelabel: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SelinuxConfigStageOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub policy_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OscapRemediationStageOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    pub config: OscapConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OscapConfig {
    pub datastream: String,
    pub profile_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tailoring: Option<String>,
}

/// Derives a tailored profile from a datastream profile, written to
/// `filepath` for the remediation to use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OscapAutotailorStageOptions {
    pub filepath: String,
    pub config: OscapAutotailorConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OscapAutotailorConfig {
    /// Rules selected and unselected on top of `profile_id`.
    Override {
        new_profile: String,
        datastream: String,
        profile_id: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        selected: Vec<String>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        unselected: Vec<String>,
    },
    /// A JSON tailoring file already present in the tree.
    Json {
        tailored_profile_id: String,
        datastream: String,
        tailoring_file: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateCryptoPoliciesStageOptions {
    pub policy: String,
}

/// Copies container images into a containers-storage in the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkopeoStageOptions {
    pub destination: SkopeoDestination,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkopeoDestination {
    #[serde(rename = "type")]
    pub dest_type: String,
    #[serde(rename = "storage-path", skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainersStorageConfStageOptions {
    pub filename: String,
    pub config: ContainersStorageConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainersStorageConfig {
    pub storage: ContainersStorageSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainersStorageSection {
    pub options: ContainersStorageOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainersStorageOptions {
    pub additionalimagestores: Vec<String>,
}

/// Stages storing `containers` in the tree, registering `storage_path` as
/// an additional image store when the images do not go to the default
/// storage.
pub fn gen_container_storage_stages(
    storage_path: Option<&str>,
    containers: &[ContainerSpec],
) -> Vec<Stage> {
    let mut stages = Vec::new();
    if let Some(path) = storage_path {
        stages.push(Stage::new(
            "org.osbuild.containers.storage.conf",
            ContainersStorageConfStageOptions {
                filename: CONTAINERS_STORAGE_CONF.to_string(),
                config: ContainersStorageConfig {
                    storage: ContainersStorageSection {
                        options: ContainersStorageOptions {
                            additionalimagestores: vec![path.to_string()],
                        },
                    },
                },
            },
        ));
    }
    for local in [false, true] {
        let images: Vec<(&str, &str)> = containers
            .iter()
            .filter(|c| c.local_storage == local)
            .map(|c| (c.image_id.as_str(), c.local_name()))
            .collect();
        if images.is_empty() {
            continue;
        }
        let opts = SkopeoStageOptions {
            destination: SkopeoDestination {
                dest_type: "containers-storage".to_string(),
                storage_path: storage_path.map(str::to_string),
            },
        };
        stages.push(
            Stage::new("org.osbuild.skopeo", opts).with_input("images", Input::containers(images, local)),
        );
    }
    stages
}

/// `base` followed by the entries of `extra` it does not already have.
pub(crate) fn merge_unique(base: &[String], extra: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    base.iter()
        .chain(extra.iter())
        .filter(|s| seen.insert(s.as_str()))
        .cloned()
        .collect()
}
