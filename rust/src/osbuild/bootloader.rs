// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Bootloader configuration inside the tree and installation into the
//! disk image.

use anyhow::Result;
use serde_derive::Serialize;

use super::image_stages::boot_mountable;
use super::{gen_mounts_devices, Stage};
use crate::disk::{PartitionTable, PartitionTableType, BIOS_BOOT_PARTITION_DOS_ID, BIOS_BOOT_PARTITION_GUID};
use crate::error::internal;

/// Entries written by kernel-install are named after this machine id.
const SAVED_ENTRY_MACHINE_ID: &str = "ffffffffffffffffffffffffffffffff";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KernelCmdlineStageOptions {
    pub root_fs_uuid: String,
    pub kernel_opts: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FixBlsStageOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Grub2StageOptions {
    pub root_fs_uuid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_fs_uuid: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub kernel_opts: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uefi: Option<Grub2Uefi>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_entry: Option<String>,
    pub write_cmdline: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Grub2Config>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Grub2Uefi {
    pub vendor: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub install: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub unified: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Grub2Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_output: Option<Vec<String>>,
}

impl Grub2StageOptions {
    /// Options for a tree booting `kernel_ver` from the filesystems in
    /// `pt`. Either `legacy` or `uefi_vendor` must be set.
    pub fn new(
        pt: &PartitionTable,
        kernel_opts: &str,
        kernel_ver: Option<&str>,
        legacy: Option<&str>,
        uefi_vendor: Option<&str>,
        install_uefi: bool,
    ) -> Result<Self> {
        let root_fs_uuid = pt
            .root_fs_uuid()
            .ok_or_else(|| internal("root filesystem must be defined for grub2 stage"))?
            .to_string();
        let boot_fs_uuid = pt
            .find("/boot")
            .and_then(|p| pt.mountable(p))
            .and_then(|m| m.uuid())
            .map(|u| u.to_string());
        Ok(Self {
            root_fs_uuid,
            boot_fs_uuid,
            kernel_opts: kernel_opts.to_string(),
            legacy: legacy.map(|l| l.to_string()),
            uefi: uefi_vendor.map(|v| Grub2Uefi {
                vendor: v.to_string(),
                install: install_uefi,
                unified: true,
            }),
            saved_entry: kernel_ver.map(|k| format!("{}-{}", SAVED_ENTRY_MACHINE_ID, k)),
            write_cmdline: false,
            config: None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Grub2InstStageOptions {
    pub filename: String,
    pub platform: String,
    /// Sector where the core image is written.
    pub location: u64,
    pub core: Grub2InstCore,
    pub prefix: Grub2InstPrefix,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Grub2InstCore {
    #[serde(rename = "type")]
    pub core_type: String,
    pub partlabel: String,
    pub filesystem: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Grub2InstPrefix {
    #[serde(rename = "type")]
    pub prefix_type: String,
    pub partlabel: String,
    pub number: usize,
    pub path: String,
}

/// Install the legacy BIOS core image into the BIOS boot partition.
pub fn new_grub2_inst_stage(pt: &PartitionTable, filename: &str, platform: &str) -> Result<Stage> {
    let bios_id = match pt.pt_type {
        PartitionTableType::Gpt => BIOS_BOOT_PARTITION_GUID,
        PartitionTableType::Dos => BIOS_BOOT_PARTITION_DOS_ID,
    };
    let core_part = pt
        .partitions
        .iter()
        .find(|p| p.part_type.eq_ignore_ascii_case(bios_id))
        .ok_or_else(|| internal("no BIOS boot partition for grub2 core image"))?;
    let (path, boot) = boot_mountable(pt)
        .ok_or_else(|| internal("no filesystem holding /boot for grub2 prefix"))?;
    let prefix_path = if boot.mountpoint() == "/boot" {
        "/grub2"
    } else {
        "/boot/grub2"
    };
    let label = pt.pt_type.as_str().to_string();
    Ok(Stage::new(
        "org.osbuild.grub2.inst",
        Grub2InstStageOptions {
            filename: filename.to_string(),
            platform: platform.to_string(),
            location: pt.bytes_to_sectors(core_part.start),
            core: Grub2InstCore {
                core_type: "mkimage".to_string(),
                partlabel: label.clone(),
                filesystem: boot.fs_type().to_string(),
            },
            prefix: Grub2InstPrefix {
                prefix_type: "partition".to_string(),
                partlabel: label,
                number: path.partition(),
                path: prefix_path.to_string(),
            },
        },
    ))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ZiplStageOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZiplInstStageOptions {
    pub kernel: String,
    /// Start of the partition holding `/boot`, in sectors.
    pub location: u64,
}

/// Write the s390x IPL record for `kernel_ver` into the image.
pub fn new_zipl_inst_stage(pt: &PartitionTable, filename: &str, kernel_ver: &str) -> Result<Stage> {
    let (path, _) = boot_mountable(pt).ok_or_else(|| internal("no filesystem holding /boot for zipl"))?;
    let part = &pt.partitions[path.partition()];
    let (_, mounts, devices) = gen_mounts_devices(filename, pt)?;
    Ok(Stage::new(
        "org.osbuild.zipl.inst",
        ZiplInstStageOptions {
            kernel: kernel_ver.to_string(),
            location: pt.bytes_to_sectors(part.start),
        },
    )
    .with_devices(devices)
    .with_mounts(mounts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasizes::{GIB, MIB};
    use crate::disk::{Filesystem, Partition, Payload};
    use serde_json::json;

    fn table(separate_boot: bool) -> PartitionTable {
        let mut parts = vec![Partition {
            start: MIB,
            size: MIB,
            part_type: BIOS_BOOT_PARTITION_GUID.into(),
            bootable: true,
            ..Default::default()
        }];
        let mut start = 2 * MIB;
        if separate_boot {
            let mut boot = Filesystem::new("ext4", "/boot");
            boot.uuid = Some("boot-uuid".into());
            parts.push(Partition {
                start,
                size: GIB,
                payload: Some(Payload::Filesystem(boot)),
                ..Default::default()
            });
            start += GIB;
        }
        let mut root = Filesystem::new("xfs", "/");
        root.uuid = Some("root-uuid".into());
        parts.push(Partition {
            start,
            size: 4 * GIB,
            payload: Some(Payload::Filesystem(root)),
            ..Default::default()
        });
        PartitionTable {
            size: 6 * GIB,
            partitions: parts,
            ..Default::default()
        }
    }

    #[test]
    fn test_grub2_options() {
        let pt = table(false);
        let o = Grub2StageOptions::new(
            &pt,
            "ro console=ttyS0",
            Some("5.14.0-70.el9.x86_64"),
            Some("i386-pc"),
            Some("redhat"),
            false,
        )
        .unwrap();
        assert_eq!(
            serde_json::to_value(&o).unwrap(),
            json!({
                "root_fs_uuid": "root-uuid",
                "kernel_opts": "ro console=ttyS0",
                "legacy": "i386-pc",
                "uefi": {"vendor": "redhat", "unified": true},
                "saved_entry": "ffffffffffffffffffffffffffffffff-5.14.0-70.el9.x86_64",
                "write_cmdline": false
            })
        );
        let o = Grub2StageOptions::new(&table(true), "", None, None, Some("redhat"), true).unwrap();
        assert_eq!(o.boot_fs_uuid.as_deref(), Some("boot-uuid"));
    }

    #[test]
    fn test_grub2_inst() {
        let v = serde_json::to_value(new_grub2_inst_stage(&table(false), "disk.raw", "i386-pc").unwrap()).unwrap();
        assert_eq!(
            v["options"],
            json!({
                "filename": "disk.raw",
                "platform": "i386-pc",
                "location": 2048,
                "core": {"type": "mkimage", "partlabel": "gpt", "filesystem": "xfs"},
                "prefix": {"type": "partition", "partlabel": "gpt", "number": 1, "path": "/boot/grub2"}
            })
        );
        let v = serde_json::to_value(new_grub2_inst_stage(&table(true), "disk.raw", "i386-pc").unwrap()).unwrap();
        assert_eq!(v["options"]["prefix"]["path"], json!("/grub2"));
        assert_eq!(v["options"]["core"]["filesystem"], json!("ext4"));
    }
}
