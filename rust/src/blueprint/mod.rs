// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Blueprints: the declarative description of an image's contents.

use anyhow::Result;
use camino::Utf8Path;
use fn_error_context::context;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::io;

use crate::error::invalid_blueprint;
use crate::utils::{self, InputFormat};

pub mod customizations;
pub mod disk;
pub mod filesystem;
pub mod fsnode;
pub mod repository;

pub use customizations::*;
pub use disk::{
    BtrfsSubvolumeCustomization, BtrfsVolumeCustomization, DiskCustomization, FilesystemTypedCustomization,
    FsType, LvCustomization, PartitionCustomization, PartitionPayload, VgCustomization,
};
pub use filesystem::FilesystemCustomization;
pub use fsnode::{DirectoryCustomization, FileCustomization, OwnerSpec};
pub use repository::RepositoryCustomization;

static EMPTY_CUSTOMIZATIONS: Lazy<Customizations> = Lazy::new(Customizations::default);

pub const TRANSPORT_DOCKER: &str = "docker";
pub const TRANSPORT_CONTAINERS_STORAGE: &str = "containers-storage";

/// A package or module, optionally pinned to a version glob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Package {
    /// The dnf package spec: bare name when any version will do.
    pub fn to_name_version(&self) -> String {
        match self.version.as_deref() {
            None | Some("") | Some("*") => self.name.clone(),
            Some(v) => format!("{}-{}", self.name, v),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageGroup {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(
        rename = "tls-verify",
        alias = "tls_verify",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub tls_verify: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_storage_path: Option<String>,
}

impl Container {
    pub fn validate(&self) -> Result<()> {
        if self.source.is_empty() {
            return Err(invalid_blueprint("container source must not be empty"));
        }
        match self.transport.as_deref() {
            None | Some(TRANSPORT_DOCKER) | Some(TRANSPORT_CONTAINERS_STORAGE) => {}
            Some(o) => {
                return Err(invalid_blueprint(format!(
                    "container {}: invalid transport {:?}, must be one of {:?} or {:?}",
                    self.source, o, TRANSPORT_DOCKER, TRANSPORT_CONTAINERS_STORAGE
                )))
            }
        }
        if self.local_storage_path.is_some()
            && self.transport.as_deref() != Some(TRANSPORT_CONTAINERS_STORAGE)
        {
            return Err(invalid_blueprint(format!(
                "container {}: local_storage_path requires transport {:?}",
                self.source, TRANSPORT_CONTAINERS_STORAGE
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distro: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub minimal: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<Package>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modules: Vec<Package>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<PackageGroup>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<Container>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customizations: Option<Customizations>,
}

impl Blueprint {
    /// Parse a blueprint from a TOML or JSON stream.
    #[context("Parsing blueprint")]
    pub fn parse<R: io::Read>(fmt: InputFormat, input: &mut R) -> Result<Self> {
        let bp: Blueprint = utils::parse_stream(fmt, input)?;
        tracing::debug!(name = bp.name.as_str(), "parsed blueprint");
        Ok(bp)
    }

    pub fn parse_str(fmt: InputFormat, s: &str) -> Result<Self> {
        Self::parse(fmt, &mut s.as_bytes())
    }

    /// Load a blueprint, picking the format from the file extension.
    #[context("Loading blueprint {}", path)]
    pub fn from_path(path: &Utf8Path) -> Result<Self> {
        let fmt = InputFormat::detect_from_filename(path)?;
        let mut f = io::BufReader::new(std::fs::File::open(path)?);
        Self::parse(fmt, &mut f)
    }

    /// The customizations, or an empty set.
    pub fn customizations(&self) -> &Customizations {
        self.customizations.as_ref().unwrap_or(&EMPTY_CUSTOMIZATIONS)
    }

    /// Check the blueprint for internal consistency.
    #[context("Validating blueprint")]
    pub fn validate(&self) -> Result<()> {
        for pkg in self.packages.iter().chain(self.modules.iter()) {
            if pkg.name.is_empty() {
                return Err(invalid_blueprint("package name must not be empty"));
            }
        }
        for c in &self.containers {
            c.validate()?;
        }
        self.customizations().validate()
    }

    /// Package specs requested by the blueprint: packages, then modules,
    /// then `@group`s, and for bootable images the kernel.
    pub fn get_packages(&self, bootable: bool) -> Vec<String> {
        let mut r: Vec<String> = self
            .packages
            .iter()
            .chain(self.modules.iter())
            .map(|p| p.to_name_version())
            .chain(self.groups.iter().map(|g| format!("@{}", g.name)))
            .collect();
        if bootable {
            r.push(self.customizations().get_kernel().0);
        }
        r
    }
}
