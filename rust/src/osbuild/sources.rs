// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Manifest sources: where the executor fetches packages, commits and
//! inline file contents from.

use anyhow::Result;
use base64::Engine;
use serde_derive::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::container::ContainerSpec;
use crate::error::missing_dependency;
use crate::rpmmd::PackageSpec;

pub const RHSM_SECRETS: &str = "org.osbuild.rhsm";
const RHSM_CONSUMER_SECRETS: &str = "org.osbuild.rhsm.consumer";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Sources {
    #[serde(rename = "org.osbuild.curl", skip_serializing_if = "Option::is_none")]
    pub curl: Option<CurlSource>,
    #[serde(rename = "org.osbuild.inline", skip_serializing_if = "Option::is_none")]
    pub inline: Option<InlineSource>,
    #[serde(rename = "org.osbuild.ostree", skip_serializing_if = "Option::is_none")]
    pub ostree: Option<OstreeSource>,
    #[serde(rename = "org.osbuild.skopeo", skip_serializing_if = "Option::is_none")]
    pub skopeo: Option<SkopeoSource>,
    #[serde(
        rename = "org.osbuild.containers-storage",
        skip_serializing_if = "Option::is_none"
    )]
    pub containers_storage: Option<ContainersStorageSource>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CurlSource {
    pub items: BTreeMap<String, CurlSourceItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurlSourceItem {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secrets: Option<SourceSecrets>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub insecure: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceSecrets {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InlineSource {
    pub items: BTreeMap<String, InlineSourceItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineSourceItem {
    pub encoding: String,
    pub data: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OstreeSource {
    pub items: BTreeMap<String, OstreeSourceItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OstreeSourceItem {
    pub remote: OstreeSourceRemote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OstreeSourceRemote {
    pub url: String,
    #[serde(rename = "contenturl", skip_serializing_if = "Option::is_none")]
    pub content_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secrets: Option<SourceSecrets>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SkopeoSource {
    pub items: BTreeMap<String, SkopeoSourceItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkopeoSourceItem {
    pub image: SkopeoSourceImage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkopeoSourceImage {
    pub name: String,
    pub digest: String,
    #[serde(rename = "tls-verify", skip_serializing_if = "Option::is_none")]
    pub tls_verify: Option<bool>,
}

/// Images in the build host's container storage, by image id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContainersStorageSource {
    pub items: BTreeMap<String, BTreeMap<String, String>>,
}

/// Whether a package's `secrets` value asks for subscription certificates.
fn wants_rhsm(secrets: Option<&str>) -> bool {
    matches!(secrets, Some("rhsm") | Some(RHSM_SECRETS))
}

/// The id under which inline `data` is published.
pub fn inline_id(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

impl Sources {
    pub fn is_empty(&self) -> bool {
        self.curl.is_none()
            && self.inline.is_none()
            && self.ostree.is_none()
            && self.skopeo.is_none()
            && self.containers_storage.is_none()
    }

    /// Register the download location of every package.
    pub fn add_packages(&mut self, packages: &[PackageSpec]) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }
        let curl = self.curl.get_or_insert_with(CurlSource::default);
        for pkg in packages {
            if pkg.checksum.is_empty() {
                return Err(missing_dependency(format!(
                    "package {} has no checksum",
                    pkg.name
                )));
            }
            let item = CurlSourceItem {
                url: pkg.remote_location.clone(),
                secrets: wants_rhsm(pkg.secrets.as_deref()).then(|| SourceSecrets {
                    name: RHSM_SECRETS.to_string(),
                }),
                insecure: pkg.ignore_ssl,
            };
            curl.items.insert(pkg.checksum.clone(), item);
        }
        Ok(())
    }

    /// Publish `data` inline and return its id.
    pub fn add_inline(&mut self, data: &[u8]) -> String {
        let id = inline_id(data);
        let inline = self.inline.get_or_insert_with(InlineSource::default);
        inline.items.insert(
            id.clone(),
            InlineSourceItem {
                encoding: "base64".to_string(),
                data: base64::engine::general_purpose::STANDARD.encode(data),
            },
        );
        id
    }

    /// Register container images under their image ids.
    pub fn add_containers(&mut self, containers: &[ContainerSpec]) {
        for c in containers {
            if c.local_storage {
                let storage = self
                    .containers_storage
                    .get_or_insert_with(ContainersStorageSource::default);
                storage.items.insert(c.image_id.clone(), BTreeMap::new());
                continue;
            }
            let skopeo = self.skopeo.get_or_insert_with(SkopeoSource::default);
            skopeo.items.insert(
                c.image_id.clone(),
                SkopeoSourceItem {
                    image: SkopeoSourceImage {
                        name: c.source.clone(),
                        digest: c.digest.clone(),
                        tls_verify: c.tls_verify,
                    },
                },
            );
        }
    }

    pub fn add_ostree_commit(&mut self, checksum: &str, url: &str, content_url: Option<&str>, rhsm: bool) {
        let ostree = self.ostree.get_or_insert_with(OstreeSource::default);
        ostree.items.insert(
            checksum.to_string(),
            OstreeSourceItem {
                remote: OstreeSourceRemote {
                    url: url.to_string(),
                    content_url: content_url.map(|s| s.to_string()),
                    secrets: rhsm.then(|| SourceSecrets {
                        name: RHSM_CONSUMER_SECRETS.to_string(),
                    }),
                },
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pkg(name: &str, checksum: &str, secrets: Option<&str>) -> PackageSpec {
        PackageSpec {
            name: name.into(),
            version: "1".into(),
            release: "1.el9".into(),
            arch: "x86_64".into(),
            remote_location: format!("https://example.com/{}.rpm", name),
            checksum: checksum.into(),
            secrets: secrets.map(|s| s.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_curl() {
        let mut s = Sources::default();
        assert!(s.is_empty());
        s.add_packages(&[
            pkg("bash", "sha256:02", None),
            pkg("kernel", "sha256:01", Some("rhsm")),
        ])
        .unwrap();
        assert_eq!(
            serde_json::to_value(&s).unwrap(),
            json!({
                "org.osbuild.curl": {
                    "items": {
                        "sha256:01": {
                            "url": "https://example.com/kernel.rpm",
                            "secrets": {"name": "org.osbuild.rhsm"}
                        },
                        "sha256:02": {"url": "https://example.com/bash.rpm"}
                    }
                }
            })
        );
        assert!(s.add_packages(&[pkg("vim", "", None)]).is_err());
    }

    #[test]
    fn test_inline() {
        let mut s = Sources::default();
        let id = s.add_inline(b"hello\n");
        assert_eq!(
            id,
            "sha256:5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03"
        );
        let item = &s.inline.as_ref().unwrap().items[&id];
        assert_eq!(item.data, "aGVsbG8K");
        assert_eq!(item.encoding, "base64");
    }

    #[test]
    fn test_ostree() {
        let mut s = Sources::default();
        s.add_ostree_commit("abc", "https://example.com/repo", None, false);
        assert_eq!(
            serde_json::to_value(&s).unwrap(),
            json!({"org.osbuild.ostree": {"items": {"abc": {"remote": {"url": "https://example.com/repo"}}}}})
        );
    }

    #[test]
    fn test_containers() {
        let mut s = Sources::default();
        s.add_containers(&[
            ContainerSpec {
                source: "quay.io/fedora/fedora:40".into(),
                digest: "sha256:aa".into(),
                image_id: "sha256:01".into(),
                tls_verify: Some(false),
                ..Default::default()
            },
            ContainerSpec {
                source: "localhost/app".into(),
                digest: "sha256:bb".into(),
                image_id: "sha256:02".into(),
                local_storage: true,
                ..Default::default()
            },
        ]);
        assert_eq!(
            serde_json::to_value(&s).unwrap(),
            json!({
                "org.osbuild.skopeo": {
                    "items": {
                        "sha256:01": {
                            "image": {
                                "name": "quay.io/fedora/fedora:40",
                                "digest": "sha256:aa",
                                "tls-verify": false
                            }
                        }
                    }
                },
                "org.osbuild.containers-storage": {"items": {"sha256:02": {}}}
            })
        );
    }
}
