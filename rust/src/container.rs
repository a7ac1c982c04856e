// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Container images embedded into an image, as resolved by the caller
//! from the blueprint's `[[containers]]`.

use anyhow::Result;
use serde_derive::{Deserialize, Serialize};

use crate::blueprint::{Container, TRANSPORT_CONTAINERS_STORAGE};
use crate::error::missing_dependency;

/// Storage the images of ostree commits are copied to; `/var` is not
/// part of a commit.
pub const OSTREE_CONTAINER_STORAGE: &str = "/usr/share/containers/storage";
pub const CONTAINERS_STORAGE_CONF: &str = "/etc/containers/storage.conf";

/// One container image pinned to a manifest digest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSpec {
    /// Reference the image was resolved from.
    pub source: String,
    pub digest: String,
    /// Id of the image config, which the executor fetches by.
    pub image_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_verify: Option<bool>,
    /// Copied from the build host's container storage instead of a
    /// registry.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub local_storage: bool,
}

impl ContainerSpec {
    /// Name the image is stored under in the image.
    pub fn local_name(&self) -> &str {
        self.local_name.as_deref().unwrap_or(&self.source)
    }
}

/// Pair every blueprint container with its resolved spec. Settings from
/// the blueprint win over the resolved ones.
pub fn resolve(containers: &[Container], specs: &[ContainerSpec]) -> Result<Vec<ContainerSpec>> {
    containers
        .iter()
        .map(|c| {
            let spec = specs
                .iter()
                .find(|s| {
                    s.source == c.source && c.digest.as_ref().map_or(true, |d| *d == s.digest)
                })
                .ok_or_else(|| {
                    missing_dependency(format!("container {} has not been resolved", c.source))
                })?;
            if spec.image_id.is_empty() {
                return Err(missing_dependency(format!(
                    "container {} has no image id",
                    c.source
                )));
            }
            let mut spec = spec.clone();
            if let Some(name) = &c.name {
                spec.local_name = Some(name.clone());
            }
            if c.tls_verify.is_some() {
                spec.tls_verify = c.tls_verify;
            }
            spec.local_storage |= c.transport.as_deref() == Some(TRANSPORT_CONTAINERS_STORAGE);
            Ok(spec)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ImageError;

    fn container(source: &str) -> Container {
        Container {
            source: source.to_string(),
            name: None,
            digest: None,
            tls_verify: None,
            transport: None,
            local_storage_path: None,
        }
    }

    fn spec(source: &str, digest: &str) -> ContainerSpec {
        ContainerSpec {
            source: source.to_string(),
            digest: digest.to_string(),
            image_id: format!("sha256:{:0>64}", "1"),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve() {
        let specs = vec![
            spec("quay.io/fedora/fedora:39", "sha256:aa"),
            spec("quay.io/fedora/fedora:40", "sha256:bb"),
        ];
        let mut c = container("quay.io/fedora/fedora:40");
        c.name = Some("localhost/fedora".to_string());
        c.tls_verify = Some(false);
        let r = resolve(&[c], &specs).unwrap();
        assert_eq!(r[0].digest, "sha256:bb");
        assert_eq!(r[0].local_name(), "localhost/fedora");
        assert_eq!(r[0].tls_verify, Some(false));
        assert!(!r[0].local_storage);

        let mut pinned = container("quay.io/fedora/fedora:40");
        pinned.digest = Some("sha256:cc".to_string());
        let e = resolve(&[pinned], &specs).unwrap_err();
        assert!(matches!(ImageError::kind_of(&e), Some(ImageError::MissingDependency(_))));
    }

    #[test]
    fn test_resolve_local_storage() {
        let mut c = container("localhost/app");
        c.transport = Some(TRANSPORT_CONTAINERS_STORAGE.to_string());
        let r = resolve(&[c], &[spec("localhost/app", "sha256:aa")]).unwrap();
        assert!(r[0].local_storage);
        assert_eq!(r[0].local_name(), "localhost/app");
    }
}
