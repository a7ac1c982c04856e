// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Users and groups created in the OS tree.

use anyhow::Result;
use rand::Rng;
use serde_derive::Serialize;
use std::collections::BTreeMap;

use crate::blueprint::{GroupCustomization, UserCustomization};
use crate::crypt::{crypt_if_needed, Crypter};

/// Home directories of users in an ostree deployment.
const OSTREE_VAR_HOME: &str = "/var/home";
const OSTREE_ROOT_HOME: &str = "/var/roothome";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupsStageOptions {
    pub groups: BTreeMap<String, GroupsStageGroup>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupsStageGroup {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gid: Option<i64>,
}

impl GroupsStageOptions {
    pub fn new(groups: &[GroupCustomization]) -> Self {
        let groups = groups
            .iter()
            .map(|g| (g.name.clone(), GroupsStageGroup { gid: g.gid }))
            .collect();
        Self { groups }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UsersStageOptions {
    pub users: BTreeMap<String, UsersStageUser>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UsersStageUser {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gid: Option<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub home: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiredate: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_password_reset: Option<bool>,
}

impl UsersStageOptions {
    /// Plain-text passwords are hashed with salts drawn from `rng`, in
    /// the order the users are given. With `omit_key` the SSH keys are
    /// left out, to be written on first boot instead.
    pub fn new<R: Rng + ?Sized>(
        users: &[UserCustomization],
        omit_key: bool,
        crypter: &dyn Crypter,
        rng: &mut R,
    ) -> Result<Self> {
        let mut out = BTreeMap::new();
        for u in users {
            let password = u
                .password
                .as_deref()
                .map(|p| crypt_if_needed(crypter, p, rng))
                .transpose()?;
            out.insert(
                u.name.clone(),
                UsersStageUser {
                    uid: u.uid,
                    gid: u.gid,
                    groups: u.groups.clone(),
                    description: u.description.clone(),
                    home: u.home.clone(),
                    shell: u.shell.clone(),
                    password,
                    key: if omit_key { None } else { u.key.clone() },
                    expiredate: u.expiredate,
                    force_password_reset: u.force_password_reset,
                },
            );
        }
        Ok(Self { users: out })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirstBootStageOptions {
    pub commands: Vec<String>,
    pub wait_for_network: bool,
}

impl FirstBootStageOptions {
    /// Commands installing the SSH keys of `users` into their home
    /// directories on first boot, for trees where `/var` is not part of
    /// the committed content.
    pub fn authorized_keys(users: &UsersStageOptions) -> Self {
        let mut commands = Vec::new();
        for (name, user) in &users.users {
            let Some(key) = user.key.as_deref() else {
                continue;
            };
            let home = if name == "root" {
                OSTREE_ROOT_HOME.to_string()
            } else {
                format!("{}/{}", OSTREE_VAR_HOME, name)
            };
            let sshdir = format!("{}/.ssh", home);
            commands.push(format!("mkdir -p {}", sshdir));
            commands.push(format!(
                "sh -c 'echo {:?} >> {:?}'",
                key,
                format!("{}/authorized_keys", sshdir)
            ));
            commands.push(format!("chown {}:{} -Rc {}", name, name, sshdir));
        }
        commands.push(format!("restorecon -rvF {}", OSTREE_VAR_HOME));
        commands.push(format!("restorecon -rvF {}", OSTREE_ROOT_HOME));
        Self {
            commands,
            wait_for_network: false,
        }
    }
}
