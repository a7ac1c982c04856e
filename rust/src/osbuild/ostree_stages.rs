// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Stages that turn a tree into an ostree commit, deploy a commit into a
//! sysroot, and package commits as archives or containers.

use serde_derive::Serialize;

use super::{Input, Mount, OstreeDeployment, Stage};

/// Sets up `/etc/passwd` and `/etc/group` from the parent commit so that
/// IDs stay stable across updates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OstreePasswdStageOptions {}

pub fn new_ostree_passwd_stage(checksum: &str, reference: &str) -> Stage {
    Stage::new("org.osbuild.ostree.passwd", OstreePasswdStageOptions {})
        .with_input("commits", Input::ostree_commit(checksum, reference))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OstreePrepTreeStageOptions {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub etc_group_members: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub initramfs_args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OstreeInitStageOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    pub path: String,
}

impl OstreeInitStageOptions {
    pub fn archive(path: &str) -> Self {
        Self {
            mode: Some("archive".to_string()),
            path: path.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OstreeCommitStageOptions {
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

/// Commit the tree produced by `tree_pipeline`.
pub fn new_ostree_commit_stage(options: OstreeCommitStageOptions, tree_pipeline: &str) -> Stage {
    Stage::new("org.osbuild.ostree.commit", options).with_input("tree", Input::tree(tree_pipeline))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OstreePullStageOptions {
    pub repo: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
}

pub fn new_ostree_pull_stage(options: OstreePullStageOptions, commits: Input) -> Stage {
    Stage::new("org.osbuild.ostree.pull", options).with_input("commits", commits)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OstreeOsInitStageOptions {
    pub osname: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OstreeConfigStageOptions {
    pub repo: String,
    pub config: OstreeConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OstreeConfig {
    pub sysroot: OstreeSysrootConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OstreeSysrootConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readonly: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bootloader: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OstreeDeployStageOptions {
    pub osname: String,
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<String>,
    pub rootfs: OstreeRootfs,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub kernel_opts: Vec<String>,
}

/// How the deployment finds its root filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OstreeRootfs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OstreeFillvarStageOptions {
    pub deployment: OstreeDeployment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OstreeRemotesStageOptions {
    pub repo: String,
    pub remotes: Vec<OstreeRemote>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OstreeRemote {
    pub name: String,
    pub url: String,
    #[serde(rename = "contenturl", skip_serializing_if = "Option::is_none")]
    pub content_url: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub gpgkeys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OstreeSelinuxStageOptions {
    pub deployment: OstreeDeployment,
}

impl Stage {
    /// Run this stage against the deployment of `reference` in the tree.
    pub fn mount_ostree(mut self, osname: &str, reference: &str) -> Self {
        self.mounts.push(Mount::ostree_deployment(osname, reference));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TarStageOptions {
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_node: Option<String>,
}

/// Archive the tree produced by `tree_pipeline` into `filename`.
pub fn new_tar_stage(filename: &str, tree_pipeline: &str) -> Stage {
    Stage::new(
        "org.osbuild.tar",
        TarStageOptions {
            filename: filename.to_string(),
            format: None,
            root_node: None,
        },
    )
    .with_input("tree", Input::tree(tree_pipeline))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct XzStageOptions {
    pub filename: String,
}

/// Compress `file` from `pipeline` into `filename`.
pub fn new_xz_stage(filename: &str, pipeline: &str, file: &str) -> Stage {
    Stage::new(
        "org.osbuild.xz",
        XzStageOptions {
            filename: filename.to_string(),
        },
    )
    .with_input("file", Input::pipeline_file(pipeline, file))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NginxConfigStageOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub config: NginxConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NginxConfig {
    pub listen: String,
    pub root: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OciArchiveStageOptions {
    pub architecture: String,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<OciArchiveConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OciArchiveConfig {
    #[serde(rename = "Cmd", skip_serializing_if = "Vec::is_empty")]
    pub cmd: Vec<String>,
    #[serde(rename = "ExposedPorts", skip_serializing_if = "Vec::is_empty")]
    pub exposed_ports: Vec<String>,
}

/// Build a single-layer OCI archive from the tree of `base_pipeline`.
pub fn new_oci_archive_stage(options: OciArchiveStageOptions, base_pipeline: &str) -> Stage {
    Stage::new("org.osbuild.oci-archive", options).with_input("base", Input::tree(base_pipeline))
}
