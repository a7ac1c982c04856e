// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The legacy flat `filesystem` customization.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::datasizes::Size;
use crate::error::policy_violation;
use crate::pathpolicy::{self, PathPolicies};

/// A mountpoint with a minimum size.  In TOML the size may be spelled
/// `size`; JSON uses `minsize`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "FilesystemRepr")]
pub struct FilesystemCustomization {
    pub mountpoint: String,
    pub minsize: Size,
}

#[derive(Deserialize)]
struct FilesystemRepr {
    mountpoint: String,
    minsize: Option<Size>,
    size: Option<Size>,
}

impl TryFrom<FilesystemRepr> for FilesystemCustomization {
    type Error = String;

    fn try_from(r: FilesystemRepr) -> Result<Self, String> {
        let minsize = match (r.minsize, r.size) {
            (Some(_), Some(_)) => {
                return Err(format!(
                    "filesystem {}: only one of minsize or size may be set",
                    r.mountpoint
                ))
            }
            (Some(s), None) | (None, Some(s)) => s,
            (None, None) => return Err(format!("filesystem {}: minsize is required", r.mountpoint)),
        };
        if minsize.bytes() == 0 {
            return Err(format!(
                "filesystem {}: minsize must be greater than zero",
                r.mountpoint
            ));
        }
        Ok(Self {
            mountpoint: r.mountpoint,
            minsize,
        })
    }
}

/// Check all mountpoints against `policies`.  Malformed paths fail on their
/// own; policy rejections are collected into a single error.
pub fn check_mountpoints_policy<'a, I>(mountpoints: I, policies: &PathPolicies) -> Result<()>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut invalid = Vec::new();
    for mp in mountpoints {
        pathpolicy::check_canonical(mp)?;
        if policies.check(mp).is_err() {
            invalid.push(mp);
        }
    }
    if !invalid.is_empty() {
        return Err(policy_violation(format!(
            "The following custom mountpoints are not supported {:?}",
            invalid
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasizes::GIB;
    use crate::error::ImageError;
    use crate::pathpolicy::MOUNTPOINT_POLICIES;
    use crate::utils::{parse_str, InputFormat};

    #[derive(Debug, Deserialize)]
    struct Holder {
        filesystem: Vec<FilesystemCustomization>,
    }

    #[test]
    fn test_decode() {
        let h: Holder = parse_str(
            InputFormat::TOML,
            indoc::indoc! {r#"
                [[filesystem]]
                mountpoint = "/var"
                size = "2 GiB"

                [[filesystem]]
                mountpoint = "/opt"
                minsize = 1073741824
            "#},
        )
        .unwrap();
        assert_eq!(h.filesystem[0].minsize, Size(2 * GIB));
        assert_eq!(h.filesystem[1].minsize, Size(GIB));

        let h: Holder = parse_str(
            InputFormat::JSON,
            r#"{"filesystem": [{"mountpoint": "/var", "minsize": "2 GiB"}]}"#,
        )
        .unwrap();
        assert_eq!(h.filesystem[0].mountpoint, "/var");
    }

    #[test]
    fn test_decode_invalid() {
        for bad in [
            r#"{"filesystem": [{"mountpoint": "/var", "minsize": 1, "size": 1}]}"#,
            r#"{"filesystem": [{"mountpoint": "/var"}]}"#,
            r#"{"filesystem": [{"mountpoint": "/var", "minsize": 0}]}"#,
            r#"{"filesystem": [{"mountpoint": 5, "minsize": 1}]}"#,
        ] {
            assert!(parse_str::<Holder>(InputFormat::JSON, bad).is_err(), "{}", bad);
        }
    }

    #[test]
    fn test_policy() {
        check_mountpoints_policy(["/", "/var/log", "/home"], &MOUNTPOINT_POLICIES).unwrap();
        let e = check_mountpoints_policy(["/", "/etc", "/bin"], &MOUNTPOINT_POLICIES).unwrap_err();
        assert_eq!(
            ImageError::kind_of(&e),
            Some(&ImageError::PolicyViolation(
                "The following custom mountpoints are not supported [\"/etc\", \"/bin\"]".into()
            ))
        );
        let e = check_mountpoints_policy(["/var/"], &MOUNTPOINT_POLICIES).unwrap_err();
        assert!(matches!(
            ImageError::kind_of(&e),
            Some(ImageError::InvalidBlueprint(_))
        ));
    }
}
