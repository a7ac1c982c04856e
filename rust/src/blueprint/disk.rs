// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The `disk` customization: explicit partitions, LVM volume groups and
//! btrfs volumes.
//!
//! A partition is tagged by its `type` field (`plain`, `lvm` or `btrfs`,
//! defaulting to `plain`).  The tag is read first and the body is then
//! decoded strictly, so fields that belong to another variant are rejected.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::datasizes::Size;
use crate::disk::PartitionTableType;
use crate::error::{invalid_blueprint, layout_error};
use crate::pathpolicy;

static DOS_PART_TYPE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-fA-F]{2}$").unwrap());

/// Mountpoints that must live directly on a partition.
const PLAIN_ONLY_MOUNTPOINTS: &[&str] = &["/boot", "/boot/efi"];

const GPT_LABEL_MAX_UTF16: usize = 36;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FsType {
    Ext4,
    Xfs,
    Vfat,
    Swap,
    /// A partition that carries no filesystem.
    #[serde(rename = "none")]
    Unformatted,
}

impl FsType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FsType::Ext4 => "ext4",
            FsType::Xfs => "xfs",
            FsType::Vfat => "vfat",
            FsType::Swap => "swap",
            FsType::Unformatted => "none",
        }
    }

    /// Whether this type is mounted somewhere.
    fn is_mountable(&self) -> bool {
        !matches!(self, FsType::Swap | FsType::Unformatted)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemTypedCustomization {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mountpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fs_type: Option<FsType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LvCustomization {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub minsize: Size,
    #[serde(flatten)]
    pub fs: FilesystemTypedCustomization,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VgCustomization {
    pub name: Option<String>,
    pub logical_volumes: Vec<LvCustomization>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtrfsSubvolumeCustomization {
    pub name: String,
    pub mountpoint: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BtrfsVolumeCustomization {
    pub subvolumes: Vec<BtrfsSubvolumeCustomization>,
}

/// What a partition holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionPayload {
    Plain(FilesystemTypedCustomization),
    Lvm(VgCustomization),
    Btrfs(BtrfsVolumeCustomization),
}

impl PartitionPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            PartitionPayload::Plain(_) => "plain",
            PartitionPayload::Lvm(_) => "lvm",
            PartitionPayload::Btrfs(_) => "btrfs",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionCustomization {
    pub minsize: Size,
    /// A GPT partition type GUID, or a two hex digit DOS type.
    pub part_type: Option<String>,
    pub part_label: Option<String>,
    pub part_uuid: Option<String>,
    pub payload: PartitionPayload,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskCustomization {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub pt_type: Option<PartitionTableType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minsize: Option<Size>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_offset: Option<Size>,
    #[serde(default)]
    pub partitions: Vec<PartitionCustomization>,
}

macro_rules! partition_repr {
    ($name:ident { $($field:ident : $ty:ty),* $(,)? }) => {
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct $name {
            #[serde(rename = "type")]
            #[allow(dead_code)]
            kind: Option<String>,
            minsize: Option<Size>,
            part_type: Option<String>,
            part_label: Option<String>,
            part_uuid: Option<String>,
            $( #[serde(default)] $field: $ty, )*
        }
    };
}

partition_repr!(PlainRepr {
    mountpoint: Option<String>,
    label: Option<String>,
    fs_type: Option<FsType>,
});
partition_repr!(LvmRepr {
    name: Option<String>,
    logical_volumes: Vec<LvCustomization>,
});
partition_repr!(BtrfsRepr {
    subvolumes: Vec<BtrfsSubvolumeCustomization>,
});

fn decode_partition(value: serde_json::Value) -> Result<PartitionCustomization, String> {
    let kind = match value.get("type") {
        None | Some(serde_json::Value::Null) => "plain".to_string(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(o) => return Err(format!("type must be a string, got {}", o)),
    };
    macro_rules! decode {
        ($repr:ty, $kind:expr) => {
            serde_json::from_value::<$repr>(value).map_err(|e| {
                format!("error decoding partition with type \"{}\": {}", $kind, e)
            })?
        };
    }
    let (minsize, part_type, part_label, part_uuid, payload) = match kind.as_str() {
        "plain" => {
            let r = decode!(PlainRepr, "plain");
            let fs = FilesystemTypedCustomization {
                mountpoint: r.mountpoint,
                label: r.label,
                fs_type: r.fs_type,
            };
            (r.minsize, r.part_type, r.part_label, r.part_uuid, PartitionPayload::Plain(fs))
        }
        "lvm" => {
            let r = decode!(LvmRepr, "lvm");
            let vg = VgCustomization {
                name: r.name,
                logical_volumes: r.logical_volumes,
            };
            (r.minsize, r.part_type, r.part_label, r.part_uuid, PartitionPayload::Lvm(vg))
        }
        "btrfs" => {
            let r = decode!(BtrfsRepr, "btrfs");
            let vol = BtrfsVolumeCustomization {
                subvolumes: r.subvolumes,
            };
            (r.minsize, r.part_type, r.part_label, r.part_uuid, PartitionPayload::Btrfs(vol))
        }
        o => return Err(format!("unknown partition type: {}", o)),
    };
    let minsize = minsize.ok_or_else(|| "minsize is required".to_string())?;
    Ok(PartitionCustomization {
        minsize,
        part_type,
        part_label,
        part_uuid,
        payload,
    })
}

impl<'de> Deserialize<'de> for PartitionCustomization {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        if !value.is_object() {
            return Err(de::Error::custom("partition customization is not an object"));
        }
        decode_partition(value).map_err(de::Error::custom)
    }
}

impl Serialize for PartitionCustomization {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("type", self.payload.kind())?;
        map.serialize_entry("minsize", &self.minsize)?;
        macro_rules! opt {
            ($key:expr, $v:expr) => {
                if let Some(v) = $v {
                    map.serialize_entry($key, v)?;
                }
            };
        }
        opt!("part_type", &self.part_type);
        opt!("part_label", &self.part_label);
        opt!("part_uuid", &self.part_uuid);
        match &self.payload {
            PartitionPayload::Plain(fs) => {
                opt!("mountpoint", &fs.mountpoint);
                opt!("label", &fs.label);
                opt!("fs_type", &fs.fs_type);
            }
            PartitionPayload::Lvm(vg) => {
                opt!("name", &vg.name);
                map.serialize_entry("logical_volumes", &vg.logical_volumes)?;
            }
            PartitionPayload::Btrfs(vol) => {
                map.serialize_entry("subvolumes", &vol.subvolumes)?;
            }
        }
        map.end()
    }
}

fn validate_mountpoint(path: Option<&str>) -> Result<&str> {
    let path = path.unwrap_or_default();
    if path.is_empty() {
        return Err(invalid_blueprint("mountpoint is empty"));
    }
    if !path.starts_with('/') {
        return Err(invalid_blueprint(format!(
            "mountpoint {:?} is not an absolute path",
            path
        )));
    }
    let cleaned = pathpolicy::clean(path);
    if cleaned != path {
        return Err(invalid_blueprint(format!(
            "mountpoint {:?} is not a canonical path (did you mean {:?}?)",
            path, cleaned
        )));
    }
    Ok(path)
}

fn claim_mountpoint(mountpoints: &mut BTreeSet<String>, mp: &str) -> Result<()> {
    if !mountpoints.insert(mp.to_string()) {
        return Err(layout_error(format!(
            "duplicate mountpoint {:?} in partitioning customizations",
            mp
        )));
    }
    Ok(())
}

/// Filesystem restrictions imposed by boot mountpoints.
fn check_boot_fs(mp: &str, fs_type: FsType) -> Result<()> {
    match (mp, fs_type) {
        ("/boot", FsType::Ext4 | FsType::Xfs) => Ok(()),
        ("/boot", o) => Err(layout_error(format!(
            "/boot must use ext4 or xfs, not {}",
            o.as_str()
        ))),
        ("/boot/efi", FsType::Vfat) => Ok(()),
        ("/boot/efi", o) => Err(layout_error(format!(
            "/boot/efi must use vfat, not {}",
            o.as_str()
        ))),
        _ => Ok(()),
    }
}

/// Validate a filesystem on a partition or logical volume, returning its
/// mountpoint if it has one.
fn validate_fs<'a>(
    fs: &'a FilesystemTypedCustomization,
    mountpoints: &mut BTreeSet<String>,
    container: Option<&str>,
) -> Result<Option<&'a str>> {
    let mp = fs.mountpoint.as_deref().filter(|m| !m.is_empty());
    match fs.fs_type {
        Some(t) if !t.is_mountable() => {
            if let Some(mp) = mp {
                return Err(invalid_blueprint(format!(
                    "mountpoint for {} partition must be empty (got {:?})",
                    t.as_str(),
                    mp
                )));
            }
            return Ok(None);
        }
        _ => {}
    }
    let mp = validate_mountpoint(mp)?;
    if let Some(container) = container {
        if PLAIN_ONLY_MOUNTPOINTS.contains(&mp) {
            return Err(layout_error(format!("{} may not live on {}", mp, container)));
        }
    }
    claim_mountpoint(mountpoints, mp)?;
    let fs_type = fs.fs_type.ok_or_else(|| {
        invalid_blueprint(format!(
            "unknown or invalid filesystem type (fs_type) for mountpoint {:?}",
            mp
        ))
    })?;
    if container.is_some() && fs_type == FsType::Vfat {
        return Err(invalid_blueprint(format!(
            "unknown or invalid filesystem type (fs_type) for logical volume with mountpoint {:?}: vfat",
            mp
        )));
    }
    check_boot_fs(mp, fs_type)?;
    Ok(Some(mp))
}

impl PartitionCustomization {
    /// Check the partition identifiers against the table they end up in.
    pub(crate) fn validate_for_table(&self, pt: PartitionTableType) -> Result<()> {
        self.validate_part_type(pt)?;
        self.validate_part_uuid(pt)?;
        self.validate_part_label(pt)
    }

    fn validate_part_type(&self, pt: PartitionTableType) -> Result<()> {
        let Some(part_type) = self.part_type.as_deref() else {
            return Ok(());
        };
        match pt {
            PartitionTableType::Gpt => {
                uuid::Uuid::parse_str(part_type).map_err(|_| {
                    invalid_blueprint(format!(
                        "invalid partition part_type {:?} for partition table type \"gpt\": must be a valid UUID",
                        part_type
                    ))
                })?;
            }
            PartitionTableType::Dos => {
                if !DOS_PART_TYPE_RE.is_match(part_type) {
                    return Err(invalid_blueprint(format!(
                        "invalid partition part_type {:?} for partition table type \"dos\": must be a two-digit hex number",
                        part_type
                    )));
                }
            }
        }
        Ok(())
    }

    fn validate_part_uuid(&self, pt: PartitionTableType) -> Result<()> {
        let Some(id) = self.part_uuid.as_deref() else {
            return Ok(());
        };
        match pt {
            PartitionTableType::Gpt => {
                uuid::Uuid::parse_str(id).map_err(|_| {
                    invalid_blueprint(format!("invalid partition part_uuid {:?}: must be a valid UUID", id))
                })?;
            }
            PartitionTableType::Dos => {
                return Err(invalid_blueprint(
                    "part_uuid is not supported for partition table type \"dos\"",
                ))
            }
        }
        Ok(())
    }

    fn validate_part_label(&self, pt: PartitionTableType) -> Result<()> {
        let Some(label) = self.part_label.as_deref() else {
            return Ok(());
        };
        match pt {
            PartitionTableType::Gpt => {
                let units = label.encode_utf16().count();
                if units > GPT_LABEL_MAX_UTF16 {
                    return Err(invalid_blueprint(format!(
                        "part_label {:?} is too long: {} UTF-16 code units, at most {} are allowed",
                        label, units, GPT_LABEL_MAX_UTF16
                    )));
                }
            }
            PartitionTableType::Dos => {
                return Err(invalid_blueprint(
                    "part_label is not supported for partition table type \"dos\"",
                ))
            }
        }
        Ok(())
    }
}

impl DiskCustomization {
    pub fn table_type(&self) -> PartitionTableType {
        self.pt_type.unwrap_or(PartitionTableType::Gpt)
    }

    /// Self-consistency checks; returns the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.validate_inner()
            .context("invalid partitioning customizations")
    }

    fn validate_inner(&self) -> Result<()> {
        let pt = self.table_type();
        if pt == PartitionTableType::Dos && self.partitions.len() > 4 {
            return Err(layout_error(format!(
                "\"dos\" partition table type only supports up to 4 partitions: got {}",
                self.partitions.len()
            )));
        }
        let mut mountpoints = BTreeSet::new();
        let mut vgnames = BTreeSet::new();
        for part in &self.partitions {
            part.validate_for_table(pt)?;
            match &part.payload {
                PartitionPayload::Plain(fs) => {
                    validate_fs(fs, &mut mountpoints, None)?;
                }
                PartitionPayload::Lvm(vg) => {
                    if let Some(name) = vg.name.as_deref().filter(|n| !n.is_empty()) {
                        if !vgnames.insert(name.to_string()) {
                            return Err(layout_error(format!(
                                "duplicate LVM volume group name {:?} in partitioning customizations",
                                name
                            )));
                        }
                    }
                    let mut lvnames = BTreeSet::new();
                    for lv in &vg.logical_volumes {
                        if let Some(name) = lv.name.as_deref().filter(|n| !n.is_empty()) {
                            if !lvnames.insert(name) {
                                return Err(layout_error(format!(
                                    "duplicate LVM logical volume name {:?} in volume group {:?}",
                                    name,
                                    vg.name.as_deref().unwrap_or_default()
                                )));
                            }
                        }
                        validate_fs(&lv.fs, &mut mountpoints, Some("LVM"))?;
                    }
                }
                PartitionPayload::Btrfs(vol) => {
                    if vol.subvolumes.is_empty() {
                        return Err(invalid_blueprint(
                            "btrfs volume requires at least one subvolume",
                        ));
                    }
                    let mut names = BTreeSet::new();
                    for sv in &vol.subvolumes {
                        if sv.name.is_empty() {
                            return Err(invalid_blueprint(format!(
                                "btrfs subvolume with mountpoint {:?} has no name",
                                sv.mountpoint
                            )));
                        }
                        if !names.insert(sv.name.as_str()) {
                            return Err(layout_error(format!(
                                "duplicate btrfs subvolume name {:?} in partitioning customizations",
                                sv.name
                            )));
                        }
                        let mp = validate_mountpoint(Some(&sv.mountpoint))?;
                        if PLAIN_ONLY_MOUNTPOINTS.contains(&mp) {
                            return Err(layout_error(format!("{} may not live on btrfs", mp)));
                        }
                        claim_mountpoint(&mut mountpoints, mp)?;
                    }
                }
            }
        }
        self.validate_layout_constraints()
    }

    /// At most one LVM volume group or one btrfs volume, never both.
    pub fn validate_layout_constraints(&self) -> Result<()> {
        let mut vgs = 0;
        let mut btrfs = 0;
        for part in &self.partitions {
            match part.payload {
                PartitionPayload::Lvm(_) => vgs += 1,
                PartitionPayload::Btrfs(_) => btrfs += 1,
                PartitionPayload::Plain(_) => {}
            }
            if vgs > 0 && btrfs > 0 {
                return Err(layout_error("btrfs and lvm partitioning cannot be combined"));
            }
        }
        if btrfs > 1 {
            return Err(layout_error("multiple btrfs volumes are not yet supported"));
        }
        if vgs > 1 {
            return Err(layout_error(
                "multiple LVM volume groups are not yet supported",
            ));
        }
        Ok(())
    }

    /// Every mountpoint named anywhere in the customization, in declaration
    /// order.
    pub fn mountpoints(&self) -> Vec<&str> {
        let mut r = Vec::new();
        for part in &self.partitions {
            match &part.payload {
                PartitionPayload::Plain(fs) => r.extend(fs.mountpoint.as_deref()),
                PartitionPayload::Lvm(vg) => r.extend(
                    vg.logical_volumes
                        .iter()
                        .filter_map(|lv| lv.fs.mountpoint.as_deref()),
                ),
                PartitionPayload::Btrfs(vol) => {
                    r.extend(vol.subvolumes.iter().map(|sv| sv.mountpoint.as_str()))
                }
            }
        }
        r.retain(|m| !m.is_empty());
        r
    }
}
