// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Allow/deny rules for paths that blueprints may touch, such as custom
//! mountpoints and the targets of file and directory customizations.

use anyhow::Result;
use camino::Utf8Path;
use once_cell::sync::Lazy;
use std::collections::BTreeMap;

use crate::error::{invalid_blueprint, policy_violation};

/// The policy attached to one node of the path tree.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PathPolicy {
    /// The path and everything below it is forbidden.
    pub deny: bool,
    /// Only the path itself is allowed, not its children.
    pub exact: bool,
}

impl PathPolicy {
    const fn allow() -> Self {
        Self {
            deny: false,
            exact: false,
        }
    }

    const fn deny() -> Self {
        Self {
            deny: true,
            exact: false,
        }
    }

    const fn exact() -> Self {
        Self {
            deny: false,
            exact: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PathPolicies {
    nodes: BTreeMap<String, PathPolicy>,
}

/// Lexically clean an absolute path: collapse repeated separators and
/// resolve `.` and `..` components.
pub fn clean(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for comp in path.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            c => parts.push(c),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Verify that `path` is absolute and already in canonical form.
pub fn check_canonical(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(invalid_blueprint("path must not be empty"));
    }
    if !path.starts_with('/') {
        return Err(invalid_blueprint(format!(
            "path {:?} must be absolute",
            path
        )));
    }
    let cleaned = clean(path);
    if cleaned != path {
        return Err(invalid_blueprint(format!(
            "path {:?} must be canonical (did you mean {:?}?)",
            path, cleaned
        )));
    }
    Ok(())
}

impl PathPolicies {
    pub fn new<I, S>(policies: I) -> Self
    where
        I: IntoIterator<Item = (S, PathPolicy)>,
        S: Into<String>,
    {
        let mut nodes: BTreeMap<String, PathPolicy> = policies
            .into_iter()
            .map(|(k, v)| (k.into(), v))
            .collect();
        // The root must always resolve to something.
        nodes.entry("/".into()).or_default();
        Self { nodes }
    }

    /// Find the deepest node that is `path` or one of its ancestors.
    fn lookup<'a>(&self, path: &'a str) -> (&'a str, PathPolicy) {
        for ancestor in Utf8Path::new(path).ancestors() {
            if let Some(p) = self.nodes.get(ancestor.as_str()) {
                return (ancestor.as_str(), *p);
            }
        }
        ("/", self.nodes.get("/").copied().unwrap_or_default())
    }

    /// Check whether `path` is allowed by this policy set.
    pub fn check(&self, path: &str) -> Result<()> {
        check_canonical(path)?;
        let (node, policy) = self.lookup(path);
        if policy.deny || (policy.exact && node != path) {
            return Err(policy_violation(format!("path {:?} is not allowed", path)));
        }
        Ok(())
    }
}

/// Where custom mountpoints may go.
pub static MOUNTPOINT_POLICIES: Lazy<PathPolicies> = Lazy::new(|| {
    PathPolicies::new([
        ("/", PathPolicy::exact()),
        ("/boot", PathPolicy::exact()),
        ("/boot/efi", PathPolicy::exact()),
        ("/var", PathPolicy::allow()),
        ("/opt", PathPolicy::allow()),
        ("/srv", PathPolicy::allow()),
        ("/usr", PathPolicy::allow()),
        ("/app", PathPolicy::allow()),
        ("/data", PathPolicy::allow()),
        ("/home", PathPolicy::allow()),
        ("/tmp", PathPolicy::allow()),
        ("/var/run", PathPolicy::deny()),
        ("/var/lock", PathPolicy::deny()),
    ])
});

/// Where directory customizations may create directories.
pub static CUSTOM_DIRECTORIES_POLICIES: Lazy<PathPolicies> = Lazy::new(|| {
    PathPolicies::new([("/", PathPolicy::deny()), ("/etc", PathPolicy::allow())])
});

/// Where file customizations may write files.
pub static CUSTOM_FILES_POLICIES: Lazy<PathPolicies> = Lazy::new(|| {
    PathPolicies::new([
        ("/", PathPolicy::deny()),
        ("/etc", PathPolicy::allow()),
        ("/root", PathPolicy::allow()),
        ("/usr/local/bin", PathPolicy::allow()),
        ("/usr/local/sbin", PathPolicy::allow()),
        ("/etc/fstab", PathPolicy::deny()),
        ("/etc/shadow", PathPolicy::deny()),
        ("/etc/passwd", PathPolicy::deny()),
        ("/etc/group", PathPolicy::deny()),
    ])
});
