// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Base partition tables. The planner grows and extends copies of these to
//! fit the requested image size and mountpoints.

use std::collections::BTreeMap;

use crate::datasizes::{GIB, MIB};
use crate::disk::{
    Filesystem, Partition, PartitionTable, PartitionTableType, Payload, BIOS_BOOT_PARTITION_GUID,
    BIOS_BOOT_PARTITION_UUID, DATA_PARTITION_UUID, EFI_FILESYSTEM_UUID, EFI_SYSTEM_PARTITION_GUID,
    EFI_SYSTEM_PARTITION_UUID, ESP_FSTAB_OPTIONS, FILESYSTEM_DATA_GUID, FILESYSTEM_LINUX_DOS_ID,
    PREP_PARTITION_DOS_ID, ROOT_PARTITION_UUID, XBOOTLDR_PARTITION_GUID,
};
use crate::platform::Arch;

const GPT_DISK_UUID: &str = "d209c89e-ea5e-4fbd-b161-b461cce297e0";
const DOS_DISK_ID: &str = "0x14fc63d2";

fn bios_boot() -> Partition {
    Partition {
        size: MIB,
        bootable: true,
        part_type: BIOS_BOOT_PARTITION_GUID.to_string(),
        uuid: Some(BIOS_BOOT_PARTITION_UUID.to_string()),
        ..Default::default()
    }
}

fn esp(size: u64) -> Partition {
    let mut fs = Filesystem::new("vfat", "/boot/efi");
    fs.uuid = Some(EFI_FILESYSTEM_UUID.to_string());
    fs.label = Some("EFI-SYSTEM".to_string());
    fs.fstab_options = ESP_FSTAB_OPTIONS.to_string();
    fs.fstab_passno = 2;
    Partition {
        size,
        part_type: EFI_SYSTEM_PARTITION_GUID.to_string(),
        uuid: Some(EFI_SYSTEM_PARTITION_UUID.to_string()),
        payload: Some(Payload::Filesystem(fs)),
        ..Default::default()
    }
}

/// An xfs filesystem checked at boot.
fn xfs(size: u64, mountpoint: &str, label: &str, part_type: &str, uuid: Option<&str>) -> Partition {
    let mut fs = Filesystem::new("xfs", mountpoint);
    fs.label = Some(label.to_string());
    fs.fstab_freq = if mountpoint == "/" { 0 } else { 1 };
    fs.fstab_passno = if mountpoint == "/" { 0 } else { 1 };
    Partition {
        size,
        part_type: part_type.to_string(),
        uuid: uuid.map(str::to_string),
        payload: Some(Payload::Filesystem(fs)),
        ..Default::default()
    }
}

fn gpt(partitions: Vec<Partition>) -> PartitionTable {
    PartitionTable {
        uuid: Some(GPT_DISK_UUID.to_string()),
        pt_type: PartitionTableType::Gpt,
        partitions,
        ..Default::default()
    }
}

fn dos(partitions: Vec<Partition>) -> PartitionTable {
    PartitionTable {
        uuid: Some(DOS_DISK_ID.to_string()),
        pt_type: PartitionTableType::Dos,
        partitions,
        ..Default::default()
    }
}

/// Tables for the disk image types: separate `/boot` and a root
/// filesystem, plus whatever the firmware needs.
pub(crate) fn default_base_partition_tables() -> BTreeMap<Arch, PartitionTable> {
    let boot = || {
        xfs(
            GIB,
            "/boot",
            "boot",
            FILESYSTEM_DATA_GUID,
            Some(DATA_PARTITION_UUID),
        )
    };
    let root = || xfs(2 * GIB, "/", "root", FILESYSTEM_DATA_GUID, Some(ROOT_PARTITION_UUID));
    let prep = Partition {
        size: 4 * MIB,
        bootable: true,
        part_type: PREP_PARTITION_DOS_ID.to_string(),
        ..Default::default()
    };
    let mut s390x_boot = xfs(GIB, "/boot", "boot", FILESYSTEM_LINUX_DOS_ID, None);
    s390x_boot.bootable = true;

    BTreeMap::from([
        (Arch::X86_64, gpt(vec![bios_boot(), esp(200 * MIB), boot(), root()])),
        (Arch::Aarch64, gpt(vec![esp(200 * MIB), boot(), root()])),
        (
            Arch::Ppc64le,
            dos(vec![
                prep,
                xfs(GIB, "/boot", "boot", FILESYSTEM_LINUX_DOS_ID, None),
                xfs(2 * GIB, "/", "root", FILESYSTEM_LINUX_DOS_ID, None),
            ]),
        ),
        (
            Arch::S390x,
            dos(vec![
                s390x_boot,
                xfs(2 * GIB, "/", "root", FILESYSTEM_LINUX_DOS_ID, None),
            ]),
        ),
    ])
}

/// Tables for edge raw images. The root filesystem is found by its label
/// when the deployment boots.
pub(crate) fn edge_base_partition_tables() -> BTreeMap<Arch, PartitionTable> {
    let boot = || xfs(384 * MIB, "/boot", "boot", XBOOTLDR_PARTITION_GUID, Some(DATA_PARTITION_UUID));
    let root = || xfs(2569 * MIB, "/", "root", FILESYSTEM_DATA_GUID, Some(ROOT_PARTITION_UUID));
    BTreeMap::from([
        (Arch::X86_64, gpt(vec![bios_boot(), esp(127 * MIB), boot(), root()])),
        (Arch::Aarch64, gpt(vec![esp(127 * MIB), boot(), root()])),
    ])
}
