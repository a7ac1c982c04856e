// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The osbuild manifest format (version 2): pipelines of typed stages plus
//! the sources they fetch from.
//!
//! Everything here serializes with a stable key order: struct fields in
//! declaration order and maps as `BTreeMap`s, so identical inputs produce
//! byte-identical JSON.

use serde_derive::Serialize;
use std::collections::BTreeMap;

mod bootloader;
mod devices;
mod fsnode_stages;
mod image_stages;
mod inputs;
mod iso_stages;
mod os_stages;
mod ostree_stages;
mod sources;
mod users;

pub use bootloader::*;
pub use devices::*;
pub use fsnode_stages::*;
pub use image_stages::*;
pub use inputs::*;
pub use iso_stages::*;
pub use os_stages::*;
pub use ostree_stages::*;
pub use sources::*;
pub use users::*;

pub use crate::kickstart::KickstartStageOptions;

pub const MANIFEST_VERSION: &str = "2";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Manifest {
    pub version: String,
    pub pipelines: Vec<Pipeline>,
    pub sources: Sources,
}

impl Manifest {
    pub fn new(pipelines: Vec<Pipeline>, sources: Sources) -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            pipelines,
            sources,
        }
    }

    pub fn pipeline(&self, name: &str) -> Option<&Pipeline> {
        self.pipelines.iter().find(|p| p.name == name)
    }

    pub fn pipeline_names(&self) -> Vec<&str> {
        self.pipelines.iter().map(|p| p.name.as_str()).collect()
    }

    /// Pretty-printed JSON with a trailing newline.
    pub fn to_json(&self) -> anyhow::Result<String> {
        let mut s = serde_json::to_string_pretty(self)?;
        s.push('\n');
        Ok(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pipeline {
    pub name: String,
    /// Reference to the pipeline providing the build root, `name:<pipeline>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runner: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<Stage>,
}

impl Pipeline {
    /// A pipeline built inside the tree produced by `build`.
    pub fn new(name: &str, build: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            build: build.map(|b| format!("name:{}", b)),
            runner: None,
            stages: Vec::new(),
        }
    }

    /// A pipeline run on the host with the given runner.
    pub fn new_build(name: &str, runner: &str) -> Self {
        Self {
            name: name.to_string(),
            build: None,
            runner: Some(runner.to_string()),
            stages: Vec::new(),
        }
    }

    pub fn add_stage(&mut self, stage: Stage) {
        self.stages.push(stage);
    }

    pub fn add_stages(&mut self, stages: impl IntoIterator<Item = Stage>) {
        self.stages.extend(stages);
    }

    pub fn stage_types(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.stage_type.as_str()).collect()
    }

    /// The first stage of the given type.
    pub fn stage(&self, stage_type: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.stage_type == stage_type)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stage {
    #[serde(rename = "type")]
    pub stage_type: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, Input>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<StageOptions>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub devices: BTreeMap<String, Device>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<Mount>,
}

impl Stage {
    pub fn new(stage_type: &str, options: impl Into<StageOptions>) -> Self {
        Self {
            stage_type: stage_type.to_string(),
            inputs: BTreeMap::new(),
            options: Some(options.into()),
            devices: BTreeMap::new(),
            mounts: Vec::new(),
        }
    }

    /// A stage that takes no options.
    pub fn bare(stage_type: &str) -> Self {
        Self {
            stage_type: stage_type.to_string(),
            inputs: BTreeMap::new(),
            options: None,
            devices: BTreeMap::new(),
            mounts: Vec::new(),
        }
    }

    pub fn with_input(mut self, name: &str, input: Input) -> Self {
        self.inputs.insert(name.to_string(), input);
        self
    }

    pub fn with_devices(mut self, devices: BTreeMap<String, Device>) -> Self {
        self.devices = devices;
        self
    }

    pub fn with_mounts(mut self, mounts: Vec<Mount>) -> Self {
        self.mounts = mounts;
        self
    }
}

/// Generates the closed set of stage option types, with a `From` impl for
/// each so that constructors can take any of them.
macro_rules! stage_options {
    ( $( $variant:ident ),* $(,)? ) => {
        #[derive(Debug, Clone, PartialEq, Serialize)]
        #[serde(untagged)]
        pub enum StageOptions {
            $( $variant($variant), )*
        }

        $(
            impl From<$variant> for StageOptions {
                fn from(o: $variant) -> Self {
                    StageOptions::$variant(o)
                }
            }
        )*
    };
}

stage_options!(
    // os
    RpmStageOptions,
    LocaleStageOptions,
    KeymapStageOptions,
    HostnameStageOptions,
    TimezoneStageOptions,
    ChronyStageOptions,
    GroupsStageOptions,
    UsersStageOptions,
    FirstBootStageOptions,
    FirewallStageOptions,
    SystemdStageOptions,
    SysconfigStageOptions,
    RhsmStageOptions,
    RhsmFactsStageOptions,
    SshdConfigStageOptions,
    ModprobeStageOptions,
    DracutConfStageOptions,
    DnfConfigStageOptions,
    YumReposStageOptions,
    SelinuxStageOptions,
    SelinuxConfigStageOptions,
    OscapRemediationStageOptions,
    OscapAutotailorStageOptions,
    UpdateCryptoPoliciesStageOptions,
    SkopeoStageOptions,
    ContainersStorageConfStageOptions,
    // file nodes
    MkdirStageOptions,
    CopyStageOptions,
    ChownStageOptions,
    ChmodStageOptions,
    // disk images
    FstabStageOptions,
    TruncateStageOptions,
    SfdiskStageOptions,
    Lvm2CreateStageOptions,
    Lvm2MetadataStageOptions,
    MkfsStageOptions,
    MkfsFatStageOptions,
    BtrfsSubvolStageOptions,
    QemuStageOptions,
    // bootloaders
    KernelCmdlineStageOptions,
    FixBlsStageOptions,
    Grub2StageOptions,
    Grub2InstStageOptions,
    ZiplStageOptions,
    ZiplInstStageOptions,
    // ostree
    OstreePasswdStageOptions,
    OstreePrepTreeStageOptions,
    OstreeInitStageOptions,
    OstreeCommitStageOptions,
    OstreePullStageOptions,
    OstreeOsInitStageOptions,
    OstreeConfigStageOptions,
    OstreeDeployStageOptions,
    OstreeFillvarStageOptions,
    OstreeRemotesStageOptions,
    OstreeSelinuxStageOptions,
    TarStageOptions,
    XzStageOptions,
    NginxConfigStageOptions,
    OciArchiveStageOptions,
    // installers
    BuildstampStageOptions,
    AnacondaStageOptions,
    LoraxScriptStageOptions,
    DracutStageOptions,
    FdoStageOptions,
    KickstartStageOptions,
    SquashfsStageOptions,
    IsolinuxStageOptions,
    Grub2IsoStageOptions,
    DiscinfoStageOptions,
    XorrisofsStageOptions,
    ImplantIsomd5StageOptions,
);
