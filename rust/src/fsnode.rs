// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Validated descriptions of directories and files to create in the image
//! tree.  Values are immutable once constructed.

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;

use crate::error::invalid_blueprint;
use crate::pathpolicy;

static MODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^0?[0-7]{3}$").unwrap());

/// A user or group reference, by name or numeric ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Owner {
    Name(String),
    Id(u64),
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Name(n) => f.write_str(n),
            Owner::Id(id) => write!(f, "{}", id),
        }
    }
}

/// Parse a permission string such as `"0755"` or `"644"`.
pub fn parse_mode(mode: &str) -> Result<u32> {
    if !MODE_RE.is_match(mode) {
        return Err(invalid_blueprint(format!(
            "invalid mode {}: must be an octal number",
            mode
        )));
    }
    u32::from_str_radix(mode, 8)
        .map_err(|e| invalid_blueprint(format!("invalid mode {}: {}", mode, e)))
}

fn validate_owner(what: &str, owner: &Option<Owner>) -> Result<()> {
    if let Some(Owner::Name(name)) = owner {
        if name.is_empty() {
            return Err(invalid_blueprint(format!("{} name must not be empty", what)));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct BaseNode {
    path: String,
    mode: Option<u32>,
    user: Option<Owner>,
    group: Option<Owner>,
}

impl BaseNode {
    fn new(
        path: &str,
        mode: Option<u32>,
        user: Option<Owner>,
        group: Option<Owner>,
    ) -> Result<Self> {
        pathpolicy::check_canonical(path)?;
        if let Some(m) = mode {
            if m & !0o7777 != 0 {
                return Err(invalid_blueprint(format!(
                    "invalid mode {:o} for {}",
                    m, path
                )));
            }
        }
        validate_owner("user", &user)?;
        validate_owner("group", &group)?;
        Ok(Self {
            path: path.to_string(),
            mode,
            user,
            group,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    base: BaseNode,
    ensure_parents: bool,
}

impl Directory {
    pub fn new(
        path: &str,
        mode: Option<u32>,
        user: Option<Owner>,
        group: Option<Owner>,
        ensure_parents: bool,
    ) -> Result<Self> {
        Ok(Self {
            base: BaseNode::new(path, mode, user, group)?,
            ensure_parents,
        })
    }

    pub fn path(&self) -> &str {
        &self.base.path
    }
    pub fn mode(&self) -> Option<u32> {
        self.base.mode
    }
    pub fn user(&self) -> Option<&Owner> {
        self.base.user.as_ref()
    }
    pub fn group(&self) -> Option<&Owner> {
        self.base.group.as_ref()
    }
    pub fn ensure_parents(&self) -> bool {
        self.ensure_parents
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    base: BaseNode,
    data: Vec<u8>,
}

impl File {
    pub fn new(
        path: &str,
        mode: Option<u32>,
        user: Option<Owner>,
        group: Option<Owner>,
        data: Vec<u8>,
    ) -> Result<Self> {
        Ok(Self {
            base: BaseNode::new(path, mode, user, group)?,
            data,
        })
    }

    pub fn path(&self) -> &str {
        &self.base.path
    }
    pub fn mode(&self) -> Option<u32> {
        self.base.mode
    }
    pub fn user(&self) -> Option<&Owner> {
        self.base.user.as_ref()
    }
    pub fn group(&self) -> Option<&Owner> {
        self.base.group.as_ref()
    }
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}
