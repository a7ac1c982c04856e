// SPDX-License-Identifier: Apache-2.0 OR MIT

use anyhow::Result;
use rand::Rng;

use super::{new_uuid, FsTabEntry, DEFAULT_BTRFS_COMPRESSION};
use crate::error::layout_error;

/// A btrfs volume; its subvolumes share the volume's UUID.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Btrfs {
    pub uuid: Option<String>,
    pub label: Option<String>,
    pub subvolumes: Vec<BtrfsSubvolume>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BtrfsSubvolume {
    pub name: String,
    pub size: u64,
    pub mountpoint: String,
    pub compress: Option<String>,
    pub read_only: bool,
}

impl BtrfsSubvolume {
    pub(crate) fn ensure_size(&mut self, s: u64) -> bool {
        if s > self.size {
            self.size = s;
            return true;
        }
        false
    }

    pub fn fstab_options(&self) -> String {
        let mut ops = format!("subvol={}", self.name);
        if let Some(c) = self.compress.as_deref() {
            ops.push_str(",compress=");
            ops.push_str(c);
        }
        if self.read_only {
            ops.push_str(",ro");
        }
        ops
    }
}

impl Btrfs {
    pub(crate) fn create_mountpoint(
        &mut self,
        mountpoint: &str,
        default_fs: &str,
        size: u64,
    ) -> Result<usize> {
        if default_fs != "btrfs" {
            return Err(layout_error(format!(
                "only btrfs mountpoints are supported with btrfs subvolumes not {:?}",
                default_fs
            )));
        }
        let name = if mountpoint == "/" { "root" } else { mountpoint };
        self.subvolumes.push(BtrfsSubvolume {
            name: name.to_string(),
            size,
            mountpoint: mountpoint.to_string(),
            compress: Some(DEFAULT_BTRFS_COMPRESSION.to_string()),
            read_only: false,
        });
        Ok(self.subvolumes.len() - 1)
    }

    pub(crate) fn gen_uuid<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        if self.uuid.is_none() {
            self.uuid = Some(new_uuid(rng));
        }
    }

    pub(crate) fn subvolume_sum(&self) -> u64 {
        self.subvolumes.iter().map(|s| s.size).sum()
    }

    pub fn min_size(&self, size: u64) -> u64 {
        size.max(self.subvolume_sum())
    }

    pub fn fstab_entry(&self, subvol: &BtrfsSubvolume) -> Option<FsTabEntry> {
        if subvol.mountpoint.is_empty() {
            return None;
        }
        Some(FsTabEntry {
            uuid: self.uuid.clone(),
            label: None,
            vfs_type: "btrfs".to_string(),
            path: subvol.mountpoint.clone(),
            options: subvol.fstab_options(),
            freq: 0,
            passno: 0,
        })
    }
}
