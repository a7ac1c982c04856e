// SPDX-License-Identifier: Apache-2.0 OR MIT

use anyhow::Result;
use rand::Rng;
use std::collections::BTreeSet;

use super::{gen_unique_string, Filesystem, FsTabEntry, Swap};
use crate::datasizes::MIB;
use crate::error::layout_error;

/// Logical volumes are aligned to the physical extent size.
pub const LVM_DEFAULT_EXTENT_SIZE: u64 = 4 * MIB;
/// Space reserved at the start of each physical volume.
pub const LVM_METADATA_SIZE: u64 = MIB;

const VG_DESCRIPTION: &str = "created via lvm2 and osbuild";

pub(crate) fn align_up(size: u64) -> u64 {
    match size % LVM_DEFAULT_EXTENT_SIZE {
        0 => size,
        r => size + LVM_DEFAULT_EXTENT_SIZE - r,
    }
}

/// The logical volume name derived from a mountpoint.
pub fn lv_name(path: &str) -> String {
    if path == "/" {
        return "rootlv".to_string();
    }
    format!("{}lv", path.trim_start_matches('/').replace('/', "_"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LvPayload {
    Filesystem(Filesystem),
    Swap(Swap),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalVolume {
    pub name: String,
    pub size: u64,
    pub payload: LvPayload,
}

impl LogicalVolume {
    pub fn mountpoint(&self) -> Option<&str> {
        match &self.payload {
            LvPayload::Filesystem(fs) if !fs.mountpoint.is_empty() => Some(&fs.mountpoint),
            _ => None,
        }
    }

    pub fn filesystem(&self) -> Option<&Filesystem> {
        match &self.payload {
            LvPayload::Filesystem(fs) => Some(fs),
            LvPayload::Swap(_) => None,
        }
    }

    pub(crate) fn ensure_size(&mut self, s: u64) -> bool {
        if s > self.size {
            self.size = align_up(s);
            return true;
        }
        false
    }

    pub(crate) fn gen_uuid<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        match &mut self.payload {
            LvPayload::Filesystem(fs) => fs.gen_uuid(rng),
            LvPayload::Swap(s) => s.gen_uuid(rng),
        }
    }

    pub fn fstab_entry(&self) -> Option<FsTabEntry> {
        match &self.payload {
            LvPayload::Filesystem(fs) => fs.fstab_entry(),
            LvPayload::Swap(s) => Some(s.fstab_entry()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeGroup {
    pub name: String,
    pub description: String,
    pub logical_volumes: Vec<LogicalVolume>,
}

impl VolumeGroup {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: VG_DESCRIPTION.to_string(),
            logical_volumes: Vec::new(),
        }
    }

    /// Add a logical volume carrying a new filesystem for `mountpoint`,
    /// returning its index.
    pub(crate) fn create_mountpoint(
        &mut self,
        mountpoint: &str,
        default_fs: &str,
        size: u64,
    ) -> Result<usize> {
        if default_fs == "btrfs" {
            return Err(layout_error("btrfs under lvm is not supported"));
        }
        let fs = Filesystem::new(default_fs, mountpoint);
        self.create_logical_volume(None, size, LvPayload::Filesystem(fs))
    }

    fn gen_lv_name(&self, base: &str) -> Result<String> {
        let names: BTreeSet<String> = self
            .logical_volumes
            .iter()
            .map(|lv| lv.name.clone())
            .collect();
        gen_unique_string(&lv_name(base), &names)
    }

    /// Without a name, one is derived from the payload's mountpoint.
    pub fn create_logical_volume(
        &mut self,
        name: Option<&str>,
        size: u64,
        payload: LvPayload,
    ) -> Result<usize> {
        let name = match name {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => {
                let base = match &payload {
                    LvPayload::Filesystem(fs) if !fs.mountpoint.is_empty() => fs.mountpoint.as_str(),
                    LvPayload::Swap(_) => "swap",
                    LvPayload::Filesystem(_) => {
                        return Err(layout_error(
                            "could not create logical volume: no name provided and payload is not mounted",
                        ))
                    }
                };
                self.gen_lv_name(base)?
            }
        };
        self.logical_volumes.push(LogicalVolume {
            name,
            size: align_up(size),
            payload,
        });
        Ok(self.logical_volumes.len() - 1)
    }

    pub fn metadata_size(&self) -> u64 {
        LVM_METADATA_SIZE
    }

    pub(crate) fn lv_sum(&self) -> u64 {
        self.logical_volumes.iter().map(|lv| lv.size).sum()
    }

    /// The smallest size that fits all logical volumes and the metadata,
    /// but at least `size`.
    pub fn min_size(&self, size: u64) -> u64 {
        align_up(size.max(self.lv_sum() + self.metadata_size()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasizes::GIB;

    #[test]
    fn test_lv_name() {
        assert_eq!(lv_name("/"), "rootlv");
        assert_eq!(lv_name("/var/log"), "var_loglv");
        assert_eq!(lv_name("swap"), "swaplv");
    }

    #[test]
    fn test_create() {
        let mut vg = VolumeGroup::new("rootvg");
        let i = vg.create_mountpoint("/home", "xfs", 1).unwrap();
        assert_eq!(vg.logical_volumes[i].name, "homelv");
        assert_eq!(vg.logical_volumes[i].size, LVM_DEFAULT_EXTENT_SIZE);
        vg.create_logical_volume(Some("home_testlv"), GIB, LvPayload::Swap(Swap::new(None)))
            .unwrap();
        let j = vg.create_mountpoint("/home/test", "ext4", GIB).unwrap();
        assert_eq!(vg.logical_volumes[j].name, "home_testlv00");
        assert!(vg.create_mountpoint("/srv", "btrfs", GIB).is_err());
    }

    #[test]
    fn test_min_size() {
        let mut vg = VolumeGroup::new("vg");
        assert_eq!(vg.min_size(0), LVM_DEFAULT_EXTENT_SIZE);
        vg.create_mountpoint("/", "xfs", 2 * GIB).unwrap();
        assert_eq!(vg.min_size(0), 2 * GIB + LVM_DEFAULT_EXTENT_SIZE);
        assert_eq!(vg.min_size(5 * GIB), 5 * GIB);
    }

    #[test]
    fn test_ensure_size() {
        let mut vg = VolumeGroup::new("vg");
        let i = vg.create_mountpoint("/", "xfs", GIB).unwrap();
        let lv = &mut vg.logical_volumes[i];
        assert!(!lv.ensure_size(GIB));
        assert!(lv.ensure_size(GIB + 1));
        assert_eq!(lv.size, GIB + LVM_DEFAULT_EXTENT_SIZE);
    }
}
