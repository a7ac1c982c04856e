// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Default OS configuration for distros and image types.
//!
//! An image type's config is layered on top of its distro's: every field is
//! optional and an unset field takes the value from the parent.

use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::osbuild::{
    ChronyStageOptions, DnfConfigStageOptions, DracutConfStageOptions, FirewallStageOptions,
    KeymapStageOptions, ModprobeStageOptions, RhsmStageOptions, SelinuxConfigStageOptions,
    SshdConfigStageOptions, SysconfigStageOptions,
};

/// Whether the image is registered with a subscription service at build
/// time, which decides the RHSM plugin configuration it gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Subscribed,
    Unsubscribed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImageConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_synchronization: Option<ChronyStageOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyboard: Option<KeymapStageOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled_services: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled_services: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub masked_services: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sysconfig: Option<SysconfigStageOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_kernel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_default_kernel: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rhsm_config: Option<BTreeMap<SubscriptionStatus, RhsmStageOptions>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selinux_force_relabel: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selinux_config: Option<SelinuxConfigStageOptions>,
    /// Keys imported into the rpm database before installing packages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpgkey_files: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_docs: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firewall: Option<FirewallStageOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sshd_config: Option<SshdConfigStageOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modprobe: Option<Vec<ModprobeStageOptions>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dracut_conf: Option<Vec<DracutConfStageOptions>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dnf_config: Option<DnfConfigStageOptions>,
    /// Skip the SELinux labelling stage entirely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_selinux: Option<bool>,
}

/// Fill `dest` from `src` if unset. Only `Option` fields can be inherited.
fn merge_basic_field<T>(dest: &mut Option<T>, src: &mut Option<T>) {
    if dest.is_some() {
        return;
    }
    *dest = src.take()
}

impl ImageConfig {
    /// A new config with the unset fields of `self` taken from `parent`.
    /// Fields are replaced as a whole, so a list set here hides the
    /// parent's list instead of extending it.
    pub fn inherit_from(&self, parent: &ImageConfig) -> ImageConfig {
        let mut dest = self.clone();
        let mut src = parent.clone();
        macro_rules! merge_basics {
            ( $($field:ident),* $(,)? ) => {{
                // Fails to compile if a field is added without being listed.
                let ImageConfig { $( $field: _ ),* } = &dest;
                $( merge_basic_field(&mut dest.$field, &mut src.$field); )*
            }};
        }
        merge_basics!(
            timezone,
            time_synchronization,
            locale,
            keyboard,
            enabled_services,
            disabled_services,
            masked_services,
            default_target,
            sysconfig,
            default_kernel,
            update_default_kernel,
            rhsm_config,
            selinux_force_relabel,
            selinux_config,
            gpgkey_files,
            exclude_docs,
            firewall,
            sshd_config,
            modprobe,
            dracut_conf,
            dnf_config,
            no_selinux,
        );
        dest
    }

    /// Convenience for optional parents.
    pub fn inherit_from_opt(&self, parent: Option<&ImageConfig>) -> ImageConfig {
        match parent {
            Some(p) => self.inherit_from(p),
            None => self.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osbuild::{DnfPluginConfig, RhsmDnfPlugins};
    use maplit::btreemap;

    fn distro_config() -> ImageConfig {
        ImageConfig {
            timezone: Some("America/New_York".into()),
            locale: Some("en_US.UTF-8".into()),
            enabled_services: Some(vec!["sshd".into(), "chronyd".into()]),
            gpgkey_files: Some(vec!["/etc/pki/rpm-gpg/RPM-GPG-KEY-redhat-release".into()]),
            ..Default::default()
        }
    }

    #[test]
    fn test_inherit() {
        let child = ImageConfig {
            timezone: Some("UTC".into()),
            enabled_services: Some(vec!["cloud-init".into()]),
            exclude_docs: Some(true),
            ..Default::default()
        };
        let parent = distro_config();
        let c = child.inherit_from(&parent);
        assert_eq!(c.timezone.as_deref(), Some("UTC"));
        assert_eq!(c.locale.as_deref(), Some("en_US.UTF-8"));
        // lists are not merged
        assert_eq!(c.enabled_services, Some(vec!["cloud-init".to_string()]));
        assert_eq!(c.exclude_docs, Some(true));
        assert_eq!(c.gpgkey_files, parent.gpgkey_files);
        assert!(c.default_target.is_none());
        // inputs are untouched
        assert_eq!(parent, distro_config());
        assert_eq!(child.locale, None);
    }

    #[test]
    fn test_inherit_identity() {
        let parent = distro_config();
        assert_eq!(ImageConfig::default().inherit_from(&parent), parent);
        assert_eq!(parent.inherit_from(&ImageConfig::default()), parent);
        assert_eq!(parent.inherit_from_opt(None), parent);
    }

    #[test]
    fn test_inherit_maps_whole() {
        let rhsm = |enabled| RhsmStageOptions {
            dnf_plugins: Some(RhsmDnfPlugins {
                product_id: Some(DnfPluginConfig { enabled }),
                subscription_manager: None,
            }),
            subscription_manager: None,
        };
        let parent = ImageConfig {
            rhsm_config: Some(btreemap! {
                SubscriptionStatus::Subscribed => rhsm(true),
                SubscriptionStatus::Unsubscribed => rhsm(false),
            }),
            ..Default::default()
        };
        let child = ImageConfig {
            rhsm_config: Some(btreemap! {
                SubscriptionStatus::Subscribed => rhsm(false),
            }),
            ..Default::default()
        };
        let c = child.inherit_from(&parent);
        let m = c.rhsm_config.unwrap();
        assert_eq!(m.len(), 1);
        assert_eq!(m[&SubscriptionStatus::Subscribed], rhsm(false));
    }
}
