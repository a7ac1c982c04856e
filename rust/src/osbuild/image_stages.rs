// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Stages that create a disk image file from a partition table: allocate,
//! partition, format, fill and convert.

use anyhow::Result;
use serde_derive::Serialize;
use std::collections::BTreeMap;

use super::{
    gen_mounts_devices, get_stage_devices, CopyStageOptions, CopyStagePath, Device, Input, Mount,
    Stage,
};
use crate::disk::{EntityPath, LvPayload, Mountable, PartitionTable, Payload};
use crate::error::internal;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TruncateStageOptions {
    pub filename: String,
    pub size: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SfdiskStageOptions {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    pub partitions: Vec<SfdiskPartition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SfdiskPartition {
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub bootable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// In sectors.
    pub size: u64,
    /// In sectors.
    pub start: u64,
    #[serde(rename = "type")]
    pub part_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lvm2CreateStageOptions {
    pub volumes: Vec<Lvm2Volume>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lvm2Volume {
    pub name: String,
    /// With a `B` suffix, lvcreate defaults to megabytes.
    pub size: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lvm2MetadataStageOptions {
    pub vg_name: String,
}

/// Options of `mkfs.xfs`, `mkfs.ext4`, `mkfs.btrfs` and `mkswap`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MkfsStageOptions {
    pub uuid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MkfsFatStageOptions {
    pub volid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fat_size: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BtrfsSubvolStageOptions {
    pub subvolumes: Vec<BtrfsSubvolName>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BtrfsSubvolName {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FstabStageOptions {
    pub filesystems: Vec<FstabEntryOptions>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FstabEntryOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub vfs_type: String,
    pub path: String,
    pub options: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub freq: u64,
    #[serde(skip_serializing_if = "is_zero")]
    pub passno: u64,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

/// Output formats of the final image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Raw,
    Qcow2,
    Vmdk,
    Vpc,
    Tar,
    Iso,
}

impl ImageFormat {
    /// Formats that need a conversion pipeline after the raw image.
    pub fn needs_conversion(self) -> bool {
        matches!(self, ImageFormat::Qcow2 | ImageFormat::Vmdk | ImageFormat::Vpc)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ImageFormat::Raw => "raw",
            ImageFormat::Qcow2 => "qcow2",
            ImageFormat::Vmdk => "vmdk",
            ImageFormat::Vpc => "vpc",
            ImageFormat::Tar => "tar",
            ImageFormat::Iso => "iso",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QemuStageOptions {
    pub filename: String,
    pub format: QemuFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QemuFormat {
    #[serde(rename = "type")]
    pub format_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compat: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subformat: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_size: Option<bool>,
}

impl QemuFormat {
    pub fn new(format: ImageFormat) -> Self {
        let mut r = Self {
            format_type: format.as_str().to_string(),
            compat: None,
            subformat: None,
            force_size: None,
        };
        match format {
            ImageFormat::Qcow2 => r.compat = Some("1.1".to_string()),
            ImageFormat::Vmdk => r.subformat = Some("streamOptimized".to_string()),
            ImageFormat::Vpc => {
                r.subformat = Some("fixed".to_string());
                r.force_size = Some(true);
            }
            _ => {}
        }
        r
    }
}

/// Convert the file `input_file` from pipeline `input_pipeline` into
/// `filename`.
pub fn new_qemu_stage(
    filename: &str,
    format: ImageFormat,
    input_pipeline: &str,
    input_file: &str,
) -> Stage {
    Stage::new(
        "org.osbuild.qemu",
        QemuStageOptions {
            filename: filename.to_string(),
            format: QemuFormat::new(format),
        },
    )
    .with_input("image", Input::pipeline_file(input_pipeline, input_file))
}

pub fn new_fstab_stage(pt: &PartitionTable) -> Stage {
    let filesystems = pt
        .fstab_entries()
        .into_iter()
        .map(|e| FstabEntryOptions {
            label: if e.uuid.is_none() { e.label } else { None },
            uuid: e.uuid,
            vfs_type: e.vfs_type,
            path: e.path,
            options: e.options,
            freq: e.freq,
            passno: e.passno,
        })
        .collect();
    Stage::new("org.osbuild.fstab", FstabStageOptions { filesystems })
}

fn sfdisk_options(pt: &PartitionTable) -> SfdiskStageOptions {
    SfdiskStageOptions {
        label: pt.pt_type.as_str().to_string(),
        uuid: pt.uuid.clone(),
        partitions: pt
            .partitions
            .iter()
            .map(|p| SfdiskPartition {
                bootable: p.bootable,
                name: p.label.clone(),
                size: pt.bytes_to_sectors(p.size),
                start: pt.bytes_to_sectors(p.start),
                part_type: p.part_type.clone(),
                uuid: p.uuid.clone(),
            })
            .collect(),
    }
}

fn require_uuid(uuid: Option<&str>, what: &str) -> Result<String> {
    uuid.map(|u| u.to_string())
        .ok_or_else(|| internal(format!("{} has no uuid", what)))
}

/// One formatting stage per filesystem, swap area and btrfs volume.
fn gen_fs_stages(pt: &PartitionTable, filename: &str) -> Result<Vec<Stage>> {
    let mut stages = Vec::new();
    for (i, part) in pt.partitions.iter().enumerate() {
        let path = EntityPath::Partition(i);
        match &part.payload {
            Some(Payload::Filesystem(fs)) => {
                let devices = get_stage_devices(pt, path, filename)?;
                let stage = mkfs_stage(&fs.fs_type, fs.uuid.as_deref(), fs.label.clone())?;
                stages.push(stage.with_devices(devices));
            }
            Some(Payload::Swap(s)) => {
                let devices = get_stage_devices(pt, path, filename)?;
                let stage = mkfs_stage("swap", s.uuid.as_deref(), s.label.clone())?;
                stages.push(stage.with_devices(devices));
            }
            Some(Payload::Lvm(vg)) => {
                for (j, lv) in vg.logical_volumes.iter().enumerate() {
                    let devices = get_stage_devices(pt, EntityPath::LogicalVolume(i, j), filename)?;
                    let stage = match &lv.payload {
                        LvPayload::Filesystem(fs) => {
                            mkfs_stage(&fs.fs_type, fs.uuid.as_deref(), fs.label.clone())?
                        }
                        LvPayload::Swap(s) => mkfs_stage("swap", s.uuid.as_deref(), s.label.clone())?,
                    };
                    stages.push(stage.with_devices(devices));
                }
            }
            Some(Payload::Btrfs(b)) => {
                let devices = get_stage_devices(pt, path, filename)?;
                let stage = mkfs_stage("btrfs", b.uuid.as_deref(), b.label.clone())?;
                stages.push(stage.with_devices(devices.clone()));
                // Subvolumes are created through a mount of the volume's root.
                let subvolumes = b
                    .subvolumes
                    .iter()
                    .map(|sv| BtrfsSubvolName {
                        name: format!("/{}", sv.name.trim_start_matches('/')),
                    })
                    .collect();
                let volume = Mount {
                    name: "volume".to_string(),
                    mount_type: "org.osbuild.btrfs".to_string(),
                    source: "device".to_string(),
                    target: "/".to_string(),
                    options: None,
                };
                stages.push(
                    Stage::new("org.osbuild.btrfs.subvol", BtrfsSubvolStageOptions { subvolumes })
                        .with_devices(devices)
                        .with_mounts(vec![volume]),
                );
            }
            None => {}
        }
    }
    Ok(stages)
}

fn mkfs_stage(fs_type: &str, uuid: Option<&str>, label: Option<String>) -> Result<Stage> {
    let what = format!("{} filesystem", fs_type);
    Ok(match fs_type {
        "vfat" => Stage::new(
            "org.osbuild.mkfs.fat",
            MkfsFatStageOptions {
                volid: require_uuid(uuid, &what)?.replace('-', ""),
                label,
                fat_size: None,
            },
        ),
        "xfs" | "ext4" | "btrfs" => Stage::new(
            &format!("org.osbuild.mkfs.{}", fs_type),
            MkfsStageOptions {
                uuid: require_uuid(uuid, &what)?,
                label,
            },
        ),
        "swap" => Stage::new(
            "org.osbuild.mkswap",
            MkfsStageOptions {
                uuid: require_uuid(uuid, &what)?,
                label,
            },
        ),
        o => return Err(internal(format!("unknown filesystem type {:?}", o))),
    })
}

/// Allocate the image file, write the partition table, create the volume
/// groups and format everything.
pub fn gen_image_prepare_stages(pt: &PartitionTable, filename: &str) -> Result<Vec<Stage>> {
    let mut stages = vec![Stage::new(
        "org.osbuild.truncate",
        TruncateStageOptions {
            filename: filename.to_string(),
            size: pt.size.to_string(),
        },
    )];

    let mut whole_disk = BTreeMap::new();
    whole_disk.insert("device".to_string(), Device::loopback(filename, 0, 0, true));
    stages.push(Stage::new("org.osbuild.sfdisk", sfdisk_options(pt)).with_devices(whole_disk));

    for (i, part) in pt.partitions.iter().enumerate() {
        if let Some(Payload::Lvm(vg)) = &part.payload {
            let devices = get_stage_devices(pt, EntityPath::Partition(i), filename)?;
            let volumes = vg
                .logical_volumes
                .iter()
                .map(|lv| Lvm2Volume {
                    name: lv.name.clone(),
                    size: format!("{}B", lv.size),
                })
                .collect();
            stages.push(
                Stage::new("org.osbuild.lvm2.create", Lvm2CreateStageOptions { volumes })
                    .with_devices(devices),
            );
        }
    }

    stages.extend(gen_fs_stages(pt, filename)?);
    Ok(stages)
}

/// Rename volume groups to their final names once the image is complete.
pub fn gen_image_finish_stages(pt: &PartitionTable, filename: &str) -> Result<Vec<Stage>> {
    let mut stages = Vec::new();
    for (i, part) in pt.partitions.iter().enumerate() {
        if let Some(Payload::Lvm(vg)) = &part.payload {
            let devices = get_stage_devices(pt, EntityPath::Partition(i), filename)?;
            stages.push(
                Stage::new(
                    "org.osbuild.lvm2.metadata",
                    Lvm2MetadataStageOptions {
                        vg_name: vg.name.clone(),
                    },
                )
                .with_devices(devices),
            );
        }
    }
    Ok(stages)
}

/// Copy the tree of pipeline `tree_pipeline` onto the mounted filesystems.
pub fn new_copy_tree_stage(pt: &PartitionTable, filename: &str, tree_pipeline: &str) -> Result<Stage> {
    let (root, mounts, devices) = gen_mounts_devices(filename, pt)?;
    Ok(Stage::new(
        "org.osbuild.copy",
        CopyStageOptions {
            paths: vec![CopyStagePath {
                from: "input://root-tree/".to_string(),
                to: format!("mount://{}/", root),
                remove_destination: false,
            }],
        },
    )
    .with_input("root-tree", Input::tree(tree_pipeline))
    .with_devices(devices)
    .with_mounts(mounts))
}

/// The mountable holding `/boot`, falling back to `/`.
pub(crate) fn boot_mountable(pt: &PartitionTable) -> Option<(EntityPath, Mountable<'_>)> {
    pt.find("/boot")
        .or_else(|| pt.find("/"))
        .and_then(|p| pt.mountable(p).map(|m| (p, m)))
}
