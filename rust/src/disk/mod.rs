// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Disk layout model: partition tables, filesystems, LVM and btrfs, and the
//! planner that turns a base table plus customizations into a concrete
//! layout.

use anyhow::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::datasizes::{GIB, MIB};
use crate::error::layout_error;
use crate::platform::Arch;

mod btrfs;
mod lvm;
mod partition_table;

pub use btrfs::*;
pub use lvm::*;
pub use partition_table::*;

pub const DEFAULT_SECTOR_SIZE: u64 = 512;
/// Partitions start and end on this boundary.
pub const DEFAULT_GRAIN_BYTES: u64 = MIB;
/// Size of an automatically created `/boot`.
pub const DEFAULT_BOOT_PARTITION_SIZE: u64 = GIB;
pub const DEFAULT_BTRFS_COMPRESSION: &str = "zstd:1";

pub const BIOS_BOOT_PARTITION_GUID: &str = "21686148-6449-6E6F-744E-656564454649";
pub const FILESYSTEM_DATA_GUID: &str = "0FC63DAF-8483-4772-8E79-3D69D8477DE4";
pub const EFI_SYSTEM_PARTITION_GUID: &str = "C12A7328-F81F-11D2-BA4B-00A0C93EC93B";
pub const LVM_PARTITION_GUID: &str = "E6D6D379-F507-44C2-A23C-238F2A3DF928";
pub const PREP_PARTITION_GUID: &str = "9E1A2D38-C612-4316-AA26-8B49521E5A8B";
pub const SWAP_PARTITION_GUID: &str = "0657FD6D-A4AB-43C4-84E5-0933C84B4F4F";
pub const XBOOTLDR_PARTITION_GUID: &str = "BC13C2FF-59E6-4262-A352-B275FD6F7172";

pub const ROOT_PARTITION_X86_64_GUID: &str = "4F68BCE3-E8CD-4DB1-96E7-FBCAF984B709";
pub const ROOT_PARTITION_AARCH64_GUID: &str = "B921B045-1DF0-41C3-AF44-4C6F280D3FAE";
pub const ROOT_PARTITION_PPC64LE_GUID: &str = "C31C45E6-3F39-412E-80FB-4809C4980599";
pub const ROOT_PARTITION_S390X_GUID: &str = "5EEAD9A9-FE09-4A1E-A1D7-520D00531306";

pub const USR_PARTITION_X86_64_GUID: &str = "8484680C-9521-48C6-9C11-B0720656F69E";
pub const USR_PARTITION_AARCH64_GUID: &str = "B0E01050-EE5F-4390-949A-9101B17104E9";
pub const USR_PARTITION_PPC64LE_GUID: &str = "15BB03AF-77E7-4D4A-B12B-C0D084F7491C";
pub const USR_PARTITION_S390X_GUID: &str = "8A4F5770-50AA-4ED3-874A-99B710DB6FEA";

pub const BIOS_BOOT_PARTITION_DOS_ID: &str = "00";
pub const FILESYSTEM_LINUX_DOS_ID: &str = "83";
pub const EFI_SYSTEM_PARTITION_DOS_ID: &str = "ef";
pub const LVM_PARTITION_DOS_ID: &str = "8e";
pub const SWAP_PARTITION_DOS_ID: &str = "82";
pub const PREP_PARTITION_DOS_ID: &str = "41";

// Well-known partition and filesystem identifiers used by the stock tables.
pub const BIOS_BOOT_PARTITION_UUID: &str = "fac7f1fb-3e8d-4137-a512-961de09a5549";
pub const ROOT_PARTITION_UUID: &str = "6264d520-3fb9-423f-8ab8-7a0a8e3d3562";
pub const DATA_PARTITION_UUID: &str = "cb07c243-bc44-4717-853e-28852021225b";
pub const EFI_SYSTEM_PARTITION_UUID: &str = "68b2905b-df3e-4fb3-80fa-49d1e773aa33";
pub const EFI_FILESYSTEM_UUID: &str = "7B77-95E7";

pub const ESP_FSTAB_OPTIONS: &str = "defaults,uid=0,gid=0,umask=077,shortname=winnt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionTableType {
    #[default]
    Gpt,
    Dos,
}

impl PartitionTableType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionTableType::Gpt => "gpt",
            PartitionTableType::Dos => "dos",
        }
    }

    /// How many partitions the table format can address.
    pub fn max_partitions(&self) -> usize {
        match self {
            PartitionTableType::Gpt => 128,
            PartitionTableType::Dos => 4,
        }
    }
}

impl fmt::Display for PartitionTableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the planner may restructure a base table to fit new mountpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartitioningMode {
    /// Never convert; new mountpoints become plain partitions.
    Raw,
    /// Always move `/` onto an LVM logical volume.
    Lvm,
    /// Move `/` onto LVM only when new mountpoints are added.
    #[default]
    AutoLvm,
    /// Move `/` onto a btrfs subvolume.
    Btrfs,
}

impl fmt::Display for PartitioningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PartitioningMode::Raw => "raw",
            PartitioningMode::Lvm => "lvm",
            PartitioningMode::AutoLvm => "auto-lvm",
            PartitioningMode::Btrfs => "btrfs",
        })
    }
}

/// The role a partition plays, used to pick its type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PartRole {
    Bios,
    Boot,
    Data,
    Esp,
    Lvm,
    PpcPrep,
    Swap,
    Root,
    Usr,
}

pub(crate) fn part_type_id(
    pt: PartitionTableType,
    role: PartRole,
    arch: Option<Arch>,
) -> Result<&'static str> {
    let id = match pt {
        PartitionTableType::Dos => match role {
            PartRole::Bios => BIOS_BOOT_PARTITION_DOS_ID,
            PartRole::Data | PartRole::Boot | PartRole::Root | PartRole::Usr => {
                FILESYSTEM_LINUX_DOS_ID
            }
            PartRole::Esp => EFI_SYSTEM_PARTITION_DOS_ID,
            PartRole::Lvm => LVM_PARTITION_DOS_ID,
            PartRole::PpcPrep => PREP_PARTITION_DOS_ID,
            PartRole::Swap => SWAP_PARTITION_DOS_ID,
        },
        PartitionTableType::Gpt => match role {
            PartRole::Bios => BIOS_BOOT_PARTITION_GUID,
            PartRole::Boot => XBOOTLDR_PARTITION_GUID,
            PartRole::Data => FILESYSTEM_DATA_GUID,
            PartRole::Esp => EFI_SYSTEM_PARTITION_GUID,
            PartRole::Lvm => LVM_PARTITION_GUID,
            PartRole::PpcPrep => PREP_PARTITION_GUID,
            PartRole::Swap => SWAP_PARTITION_GUID,
            PartRole::Root | PartRole::Usr => {
                let arch = arch.ok_or_else(|| {
                    layout_error(format!(
                        "architecture must be specified for selecting GUID for {:?} partition",
                        if role == PartRole::Root { "root" } else { "usr" }
                    ))
                })?;
                match (role, arch) {
                    (PartRole::Root, Arch::X86_64) => ROOT_PARTITION_X86_64_GUID,
                    (PartRole::Root, Arch::Aarch64) => ROOT_PARTITION_AARCH64_GUID,
                    (PartRole::Root, Arch::Ppc64le) => ROOT_PARTITION_PPC64LE_GUID,
                    (PartRole::Root, Arch::S390x) => ROOT_PARTITION_S390X_GUID,
                    (_, Arch::X86_64) => USR_PARTITION_X86_64_GUID,
                    (_, Arch::Aarch64) => USR_PARTITION_AARCH64_GUID,
                    (_, Arch::Ppc64le) => USR_PARTITION_PPC64LE_GUID,
                    (_, Arch::S390x) => USR_PARTITION_S390X_GUID,
                }
            }
        },
    };
    Ok(id)
}

/// A formatted filesystem.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filesystem {
    pub fs_type: String,
    pub uuid: Option<String>,
    pub label: Option<String>,
    /// Empty when the filesystem is not mounted.
    pub mountpoint: String,
    pub fstab_options: String,
    pub fstab_freq: u64,
    pub fstab_passno: u64,
}

impl Filesystem {
    pub fn new(fs_type: &str, mountpoint: &str) -> Self {
        Self {
            fs_type: fs_type.to_string(),
            mountpoint: mountpoint.to_string(),
            fstab_options: "defaults".to_string(),
            ..Default::default()
        }
    }

    pub(crate) fn gen_uuid<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        if self.uuid.is_some() {
            return;
        }
        self.uuid = Some(if self.fs_type == "vfat" {
            new_vol_id(rng)
        } else {
            new_uuid(rng)
        });
    }

    pub fn fstab_entry(&self) -> Option<FsTabEntry> {
        if self.mountpoint.is_empty() {
            return None;
        }
        Some(FsTabEntry {
            uuid: self.uuid.clone(),
            label: self.label.clone(),
            vfs_type: self.fs_type.clone(),
            path: self.mountpoint.clone(),
            options: self.fstab_options.clone(),
            freq: self.fstab_freq,
            passno: self.fstab_passno,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Swap {
    pub uuid: Option<String>,
    pub label: Option<String>,
    pub fstab_options: String,
}

impl Swap {
    pub fn new(label: Option<String>) -> Self {
        Self {
            uuid: None,
            label,
            fstab_options: "defaults".to_string(),
        }
    }

    pub(crate) fn gen_uuid<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        if self.uuid.is_none() {
            self.uuid = Some(new_uuid(rng));
        }
    }

    pub fn fstab_entry(&self) -> FsTabEntry {
        FsTabEntry {
            uuid: self.uuid.clone(),
            label: self.label.clone(),
            vfs_type: "swap".to_string(),
            path: "none".to_string(),
            options: self.fstab_options.clone(),
            freq: 0,
            passno: 0,
        }
    }
}

/// One line of `/etc/fstab`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsTabEntry {
    pub uuid: Option<String>,
    pub label: Option<String>,
    pub vfs_type: String,
    pub path: String,
    pub options: String,
    pub freq: u64,
    pub passno: u64,
}

/// A random (version 4) UUID drawn from `rng`.
pub(crate) fn new_uuid<R: Rng + ?Sized>(rng: &mut R) -> String {
    let mut bytes = [0u8; 16];
    rng.fill_bytes(&mut bytes);
    uuid::Builder::from_random_bytes(bytes)
        .into_uuid()
        .hyphenated()
        .to_string()
}

/// A FAT volume id, `XXXX-XXXX` in upper-case hex.
pub(crate) fn new_vol_id<R: Rng + ?Sized>(rng: &mut R) -> String {
    let mut bytes = [0u8; 4];
    rng.fill_bytes(&mut bytes);
    let h = hex::encode_upper(bytes);
    format!("{}-{}", &h[..4], &h[4..])
}

/// `base` if unused, otherwise `base` with the first free two-digit suffix.
pub(crate) fn gen_unique_string(base: &str, existing: &BTreeSet<String>) -> Result<String> {
    if !existing.contains(base) {
        return Ok(base.to_string());
    }
    (0..100)
        .map(|i| format!("{}{:02}", base, i))
        .find(|s| !existing.contains(s))
        .ok_or_else(|| {
            layout_error(format!(
                "name collision: could not generate unique version of {:?}",
                base
            ))
        })
}

pub(crate) fn default_label(mountpoint: &str) -> Option<&'static str> {
    match mountpoint {
        "/" => Some("root"),
        "/boot" => Some("boot"),
        "/boot/efi" => Some("EFI-SYSTEM"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_part_type_id() {
        use PartitionTableType::*;
        assert_eq!(part_type_id(Dos, PartRole::Lvm, None).unwrap(), "8e");
        assert_eq!(
            part_type_id(Gpt, PartRole::Root, Some(Arch::Aarch64)).unwrap(),
            ROOT_PARTITION_AARCH64_GUID
        );
        assert_eq!(
            part_type_id(Gpt, PartRole::Usr, Some(Arch::S390x)).unwrap(),
            USR_PARTITION_S390X_GUID
        );
        assert!(part_type_id(Gpt, PartRole::Root, None).is_err());
        assert_eq!(part_type_id(Dos, PartRole::Root, None).unwrap(), "83");
    }

    #[test]
    fn test_ids() {
        let mut rng = StdRng::seed_from_u64(0);
        let u = new_uuid(&mut rng);
        let parsed = uuid::Uuid::parse_str(&u).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
        assert_eq!(u, u.to_lowercase());
        let v = new_vol_id(&mut rng);
        assert_eq!(v.len(), 9);
        assert_eq!(&v[4..5], "-");
        assert_eq!(v, v.to_uppercase());

        let mut a = StdRng::seed_from_u64(7);
        let mut b = StdRng::seed_from_u64(7);
        assert_eq!(new_uuid(&mut a), new_uuid(&mut b));
    }

    #[test]
    fn test_gen_unique_string() {
        let mut existing = BTreeSet::new();
        assert_eq!(gen_unique_string("root", &existing).unwrap(), "root");
        existing.insert("root".to_string());
        assert_eq!(gen_unique_string("root", &existing).unwrap(), "root00");
        existing.insert("root00".to_string());
        assert_eq!(gen_unique_string("root", &existing).unwrap(), "root01");
    }

    #[test]
    fn test_fstab_entries() {
        let mut fs = Filesystem::new("xfs", "/");
        assert_eq!(fs.fstab_entry().unwrap().options, "defaults");
        fs.mountpoint.clear();
        assert!(fs.fstab_entry().is_none());
        let swap = Swap::new(None).fstab_entry();
        assert_eq!((swap.path.as_str(), swap.vfs_type.as_str()), ("none", "swap"));
    }
}
