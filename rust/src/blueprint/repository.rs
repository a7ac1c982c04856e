// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Custom yum repositories to write into the image.

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::invalid_blueprint;

static FILENAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\w.-]{1,250}\.repo$").unwrap());
static URI_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(/|[A-Za-z][A-Za-z0-9+.-]*:)\S*$").unwrap());

const PGP_BEGIN: &str = "-----BEGIN PGP PUBLIC KEY BLOCK-----";
const PGP_END: &str = "-----END PGP PUBLIC KEY BLOCK-----";

/// Where inline gpg keys are written.
pub const GPG_KEYS_DIR: &str = "/etc/pki/rpm-gpg";

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryCustomization {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub baseurls: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gpgkeys: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metalink: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirrorlist: Option<String>,
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

fn is_gpg_key(key: &str) -> bool {
    key.starts_with(PGP_BEGIN) && key.contains(PGP_END)
}

impl RepositoryCustomization {
    /// The `.repo` file this repository is written to.
    pub fn filename(&self) -> String {
        match self.filename.as_deref() {
            None | Some("") => format!("{}.repo", self.id),
            Some(f) if f.ends_with(".repo") => f.to_string(),
            Some(f) => format!("{}.repo", f),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(invalid_blueprint("Repository ID is required"));
        }
        let filename = self.filename();
        if !FILENAME_RE.is_match(&filename) {
            return Err(invalid_blueprint(format!(
                "Repository filename {:?} is invalid",
                filename
            )));
        }
        if self.baseurls.is_empty() && self.mirrorlist.is_none() && self.metalink.is_none() {
            return Err(invalid_blueprint(
                "Repository base URL, mirrorlist or metalink is required",
            ));
        }
        if self.gpgcheck == Some(true) && self.gpgkeys.is_empty() {
            return Err(invalid_blueprint(
                "Repository gpg check is set to true but no gpg keys are provided",
            ));
        }
        for key in &self.gpgkeys {
            if !is_gpg_key(key) && !URI_RE.is_match(key) {
                return Err(invalid_blueprint(
                    "Repository gpg key is not a valid URL or a valid gpg key",
                ));
            }
        }
        Ok(())
    }

    /// Split the gpg keys into inline key files to write into the image
    /// and the references to use in the repo file.  Inline keys are
    /// referenced through their `file://` path.
    pub fn gpg_key_files(&self) -> (Vec<(String, String)>, Vec<String>) {
        let mut files = Vec::new();
        let mut refs = Vec::new();
        for (i, key) in self.gpgkeys.iter().enumerate() {
            if is_gpg_key(key) {
                let path = format!("{}/RPM-GPG-KEY-{}-{}", GPG_KEYS_DIR, self.id, i);
                refs.push(format!("file://{}", path));
                files.push((path, key.clone()));
            } else {
                refs.push(key.clone());
            }
        }
        (files, refs)
    }
}

/// Group repositories by the file they are written to.
pub fn repos_by_filename(
    repos: &[RepositoryCustomization],
) -> BTreeMap<String, Vec<&RepositoryCustomization>> {
    let mut r: BTreeMap<String, Vec<&RepositoryCustomization>> = BTreeMap::new();
    for repo in repos {
        r.entry(repo.filename()).or_default().push(repo);
    }
    r
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> RepositoryCustomization {
        RepositoryCustomization {
            id: "example".into(),
            baseurls: vec!["https://example.com/repo".into()],
            ..Default::default()
        }
    }

    const KEY: &str = "-----BEGIN PGP PUBLIC KEY BLOCK-----\n\nabc\n-----END PGP PUBLIC KEY BLOCK-----\n";

    #[test]
    fn test_filename() {
        let mut r = repo();
        assert_eq!(r.filename(), "example.repo");
        r.filename = Some("other".into());
        assert_eq!(r.filename(), "other.repo");
        r.filename = Some("third.repo".into());
        assert_eq!(r.filename(), "third.repo");
    }

    #[test]
    fn test_validate() {
        repo().validate().unwrap();
        let cases: Vec<(RepositoryCustomization, &str)> = vec![
            (
                RepositoryCustomization {
                    id: "".into(),
                    ..repo()
                },
                "Repository ID is required",
            ),
            (
                RepositoryCustomization {
                    filename: Some("bad name".into()),
                    ..repo()
                },
                "Repository filename \"bad name.repo\" is invalid",
            ),
            (
                RepositoryCustomization {
                    baseurls: vec![],
                    ..repo()
                },
                "Repository base URL, mirrorlist or metalink is required",
            ),
            (
                RepositoryCustomization {
                    gpgcheck: Some(true),
                    ..repo()
                },
                "Repository gpg check is set to true but no gpg keys are provided",
            ),
            (
                RepositoryCustomization {
                    gpgkeys: vec!["not a key".into()],
                    ..repo()
                },
                "Repository gpg key is not a valid URL or a valid gpg key",
            ),
        ];
        for (r, msg) in cases {
            assert_eq!(r.validate().unwrap_err().to_string(), msg);
        }
        RepositoryCustomization {
            gpgcheck: Some(true),
            gpgkeys: vec![KEY.into(), "https://example.com/key".into()],
            metalink: Some("https://example.com/metalink".into()),
            baseurls: vec![],
            ..repo()
        }
        .validate()
        .unwrap();
    }

    #[test]
    fn test_gpg_key_files() {
        let r = RepositoryCustomization {
            gpgkeys: vec!["https://example.com/key".into(), KEY.into()],
            ..repo()
        };
        let (files, refs) = r.gpg_key_files();
        assert_eq!(
            files,
            vec![(
                "/etc/pki/rpm-gpg/RPM-GPG-KEY-example-1".to_string(),
                KEY.to_string()
            )]
        );
        assert_eq!(
            refs,
            vec![
                "https://example.com/key".to_string(),
                "file:///etc/pki/rpm-gpg/RPM-GPG-KEY-example-1".to_string()
            ]
        );
    }
}
