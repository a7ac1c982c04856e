// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Package sets handed to the depsolver and the resolved packages that
//! come back.

use anyhow::Result;
use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::missing_dependency;

/// A repository to resolve package sets against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub baseurls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metalink: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirrorlist: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gpgkeys: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_gpg: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_repo_gpg: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_ssl: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_hotfixes: Option<bool>,
    /// Packages from this repository need subscription certificates.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub rhsm: bool,
    /// Pipelines this repository applies to; all of them when empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub package_sets: Vec<String>,
}

/// The repositories that apply to the named pipeline.
pub fn filter_repos(repos: &[RepoConfig], pipeline: &str) -> Vec<RepoConfig> {
    repos
        .iter()
        .filter(|r| r.package_sets.is_empty() || r.package_sets.iter().any(|p| p == pipeline))
        .cloned()
        .collect()
}

/// Packages to include and exclude, resolved together against a list of
/// repositories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSet {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repositories: Vec<RepoConfig>,
}

impl PackageSet {
    pub fn new<S: AsRef<str>>(include: &[S]) -> Self {
        Self {
            include: include.iter().map(|s| s.as_ref().to_string()).collect(),
            ..Default::default()
        }
    }

    /// Concatenate `other` onto this set.
    pub fn append(mut self, other: PackageSet) -> Self {
        self.include.extend(other.include);
        self.exclude.extend(other.exclude);
        self.repositories.extend(other.repositories);
        self
    }

    pub fn with_exclude<S: AsRef<str>>(mut self, exclude: &[S]) -> Self {
        self.exclude
            .extend(exclude.iter().map(|s| s.as_ref().to_string()));
        self
    }

    /// Sort and deduplicate the package names.
    pub fn normalized(mut self) -> Self {
        self.include.sort();
        self.include.dedup();
        self.exclude.sort();
        self.exclude.dedup();
        self
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty()
    }
}

/// Package sets resolved in sequence, each one on top of the previous
/// results, keyed by pipeline name.
pub type PackageSetChains = BTreeMap<String, Vec<PackageSet>>;

/// One package as returned by the depsolver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSpec {
    pub name: String,
    #[serde(default)]
    pub epoch: u32,
    pub version: String,
    pub release: String,
    pub arch: String,
    pub remote_location: String,
    pub checksum: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets: Option<String>,
    #[serde(default)]
    pub check_gpg: bool,
    #[serde(default)]
    pub ignore_ssl: bool,
}

impl PackageSpec {
    pub fn nevra(&self) -> String {
        if self.epoch == 0 {
            format!("{}-{}-{}.{}", self.name, self.version, self.release, self.arch)
        } else {
            format!(
                "{}-{}:{}-{}.{}",
                self.name, self.epoch, self.version, self.release, self.arch
            )
        }
    }
}

/// Resolved packages per pipeline.
pub type ResolvedPackages = BTreeMap<String, Vec<PackageSpec>>;

/// `version-release.arch` of the named package, which is how installed
/// kernels are identified.
pub fn find_version_release_arch(packages: &[PackageSpec], name: &str) -> Result<String> {
    packages
        .iter()
        .find(|p| p.name == name)
        .map(|p| format!("{}-{}.{}", p.version, p.release, p.arch))
        .ok_or_else(|| {
            missing_dependency(format!(
                "package {:?} not found in the resolved package set",
                name
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ImageError;
    use indoc::indoc;

    #[test]
    fn test_filter_repos() {
        let repos = vec![
            RepoConfig {
                name: "baseos".into(),
                ..Default::default()
            },
            RepoConfig {
                name: "extra".into(),
                package_sets: vec!["os".into()],
                ..Default::default()
            },
        ];
        let names = |v: Vec<RepoConfig>| v.into_iter().map(|r| r.name).collect::<Vec<_>>();
        assert_eq!(names(filter_repos(&repos, "os")), vec!["baseos", "extra"]);
        assert_eq!(names(filter_repos(&repos, "build")), vec!["baseos"]);
    }

    #[test]
    fn test_package_set() {
        let a = PackageSet::new(&["bash", "kernel"]).with_exclude(&["dracut-config-rescue"]);
        let b = PackageSet::new(&["bash", "audit"]);
        let c = a.append(b).normalized();
        assert_eq!(c.include, vec!["audit", "bash", "kernel"]);
        assert_eq!(c.exclude, vec!["dracut-config-rescue"]);
    }

    #[test]
    fn test_kernel_version() {
        let specs: Vec<PackageSpec> = serde_json::from_str(indoc! {r#"
            [
              {"name": "bash", "version": "5.1.8", "release": "6.el9", "arch": "x86_64",
               "remote_location": "https://example.com/bash.rpm", "checksum": "sha256:01"},
              {"name": "kernel", "epoch": 0, "version": "5.14.0", "release": "70.el9", "arch": "x86_64",
               "remote_location": "https://example.com/kernel.rpm", "checksum": "sha256:02",
               "check_gpg": true}
            ]
        "#})
        .unwrap();
        assert_eq!(
            find_version_release_arch(&specs, "kernel").unwrap(),
            "5.14.0-70.el9.x86_64"
        );
        assert_eq!(specs[0].nevra(), "bash-5.1.8-6.el9.x86_64");
        let e = find_version_release_arch(&specs, "kernel-rt").unwrap_err();
        assert!(matches!(
            ImageError::kind_of(&e),
            Some(ImageError::MissingDependency(_))
        ));
    }
}
