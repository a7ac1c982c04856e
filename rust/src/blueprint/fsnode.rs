// SPDX-License-Identifier: Apache-2.0 OR MIT

//! `directories` and `files` customizations and their lowering into
//! validated [`crate::fsnode`] values.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{invalid_blueprint, policy_violation};
use crate::fsnode::{self, Owner};
use crate::pathpolicy::PathPolicies;

/// A user or group as written in the blueprint.  Numbers must be
/// non-negative integers, which is checked when converting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OwnerSpec {
    Name(String),
    Id(i64),
    Float(f64),
}

impl OwnerSpec {
    fn to_owner(&self, what: &str) -> Result<Owner> {
        match self {
            OwnerSpec::Name(n) => Ok(Owner::Name(n.clone())),
            OwnerSpec::Id(id) => u64::try_from(*id).map(Owner::Id).map_err(|_| {
                invalid_blueprint(format!("invalid {} {}: must be non-negative", what, id))
            }),
            OwnerSpec::Float(f) => Err(invalid_blueprint(format!(
                "invalid {} {}: must be an integer",
                what, f
            ))),
        }
    }
}

fn owner(what: &str, o: &Option<OwnerSpec>) -> Result<Option<Owner>> {
    o.as_ref().map(|o| o.to_owner(what)).transpose()
}

fn mode(m: &Option<String>) -> Result<Option<u32>> {
    m.as_deref().map(fsnode::parse_mode).transpose()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryCustomization {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<OwnerSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<OwnerSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ensure_parents: bool,
}

impl DirectoryCustomization {
    pub fn to_fsnode(&self) -> Result<fsnode::Directory> {
        fsnode::Directory::new(
            &self.path,
            mode(&self.mode)?,
            owner("user", &self.user)?,
            owner("group", &self.group)?,
            self.ensure_parents,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileCustomization {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<OwnerSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<OwnerSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl FileCustomization {
    pub fn to_fsnode(&self) -> Result<fsnode::File> {
        fsnode::File::new(
            &self.path,
            mode(&self.mode)?,
            owner("user", &self.user)?,
            owner("group", &self.group)?,
            self.data.clone().unwrap_or_default().into_bytes(),
        )
    }
}

pub fn directories_to_fsnodes(dirs: &[DirectoryCustomization]) -> Result<Vec<fsnode::Directory>> {
    dirs.iter().map(|d| d.to_fsnode()).collect()
}

pub fn files_to_fsnodes(files: &[FileCustomization]) -> Result<Vec<fsnode::File>> {
    files.iter().map(|f| f.to_fsnode()).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Directory,
    File,
}

fn parent(p: &str) -> &str {
    match p.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &p[..i],
    }
}

/// Cross-node checks: no path appears twice and no file has children.
pub fn validate_dir_file_customizations(
    dirs: &[DirectoryCustomization],
    files: &[FileCustomization],
) -> Result<()> {
    let mut nodes = BTreeMap::new();
    let mut paths = Vec::with_capacity(dirs.len() + files.len());
    let mut duplicates = Vec::new();
    let all = dirs
        .iter()
        .map(|d| (d.path.as_str(), NodeKind::Directory))
        .chain(files.iter().map(|f| (f.path.as_str(), NodeKind::File)));
    for (path, kind) in all {
        if nodes.insert(path, kind).is_some() {
            duplicates.push(path);
        }
        paths.push(path);
    }
    if !duplicates.is_empty() {
        return Err(invalid_blueprint(format!(
            "duplicate files / directory customization paths: {:?}",
            duplicates
        )));
    }

    // Deepest first, so that every ancestor chain is walked at most once.
    paths.sort_by_key(|p| std::cmp::Reverse(p.matches('/').count()));
    let mut checked = std::collections::BTreeSet::new();
    for path in paths {
        if checked.contains(path) {
            continue;
        }
        let mut ancestor = path;
        loop {
            ancestor = parent(ancestor);
            if ancestor == "/" || checked.contains(ancestor) {
                break;
            }
            if nodes.get(ancestor) == Some(&NodeKind::File) {
                return Err(invalid_blueprint(format!("{} has a file ancestor", path)));
            }
            checked.insert(ancestor);
        }
        checked.insert(path);
    }
    Ok(())
}

pub fn check_directory_customizations_policy(
    dirs: &[DirectoryCustomization],
    policies: &PathPolicies,
) -> Result<()> {
    let invalid: Vec<&str> = dirs
        .iter()
        .map(|d| d.path.as_str())
        .filter(|p| policies.check(p).is_err())
        .collect();
    if !invalid.is_empty() {
        return Err(policy_violation(format!(
            "the following custom directories are not allowed: {:?}",
            invalid
        )));
    }
    Ok(())
}

pub fn check_file_customizations_policy(
    files: &[FileCustomization],
    policies: &PathPolicies,
) -> Result<()> {
    let invalid: Vec<&str> = files
        .iter()
        .map(|f| f.path.as_str())
        .filter(|p| policies.check(p).is_err())
        .collect();
    if !invalid.is_empty() {
        return Err(policy_violation(format!(
            "the following custom files are not allowed: {:?}",
            invalid
        )));
    }
    Ok(())
}
