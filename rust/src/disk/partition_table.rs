// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Partition tables and the planner that fits customizations onto them.
//!
//! Two entry points exist. [`new_partition_table`] starts from a base table
//! shipped with the image type and grows or extends it to host the requested
//! mountpoints, optionally moving `/` onto LVM or btrfs. [`new_custom_partition_table`]
//! builds a table from scratch following the structure of a `disk`
//! customization.
//!
//! In both cases the final steps are the same: apply directory size
//! requirements, lay the partitions out on the disk, assign default labels
//! and draw identifiers from the caller's PRNG, so that a given seed always
//! yields the same table.

use anyhow::Result;
use camino::Utf8Path;
use fn_error_context::context;
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet};

use super::{
    default_label, gen_unique_string, new_uuid, part_type_id, Btrfs, BtrfsSubvolume, Filesystem,
    FsTabEntry, LvPayload, PartRole, PartitionTableType, PartitioningMode, Swap, VolumeGroup,
    BIOS_BOOT_PARTITION_UUID, DEFAULT_BOOT_PARTITION_SIZE, DEFAULT_BTRFS_COMPRESSION,
    DEFAULT_GRAIN_BYTES, DEFAULT_SECTOR_SIZE, EFI_FILESYSTEM_UUID, EFI_SYSTEM_PARTITION_UUID,
    ESP_FSTAB_OPTIONS,
};
use crate::blueprint::{
    DiskCustomization, FilesystemCustomization, FilesystemTypedCustomization, FsType,
    PartitionCustomization, PartitionPayload, VgCustomization, BtrfsVolumeCustomization,
};
use crate::datasizes::{GIB, MIB};
use crate::disk::lvm;
use crate::error::{internal, layout_error};
use crate::platform::{Arch, BootMode};

/// `/boot` may not be made smaller than this.
const MIN_BOOT_SIZE: u64 = 500 * MIB;
/// Any other mountpoint may not be made smaller than this.
const MIN_FS_SIZE: u64 = GIB;
const ESP_SIZE: u64 = 200 * MIB;
const BIOS_BOOT_SIZE: u64 = MIB;
const PREP_SIZE: u64 = 4 * MIB;

fn align_up(size: u64, grain: u64) -> u64 {
    match size % grain {
        0 => size,
        r => size + grain - r,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Filesystem(Filesystem),
    Swap(Swap),
    Lvm(VolumeGroup),
    Btrfs(Btrfs),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    /// Offset from the start of the disk, in bytes.
    pub start: u64,
    pub size: u64,
    /// GPT type GUID or DOS type id.
    pub part_type: String,
    pub bootable: bool,
    pub uuid: Option<String>,
    pub label: Option<String>,
    /// `None` for partitions without content, e.g. BIOS boot.
    pub payload: Option<Payload>,
}

impl Partition {
    pub(crate) fn ensure_size(&mut self, s: u64) -> bool {
        if s > self.size {
            self.size = s;
            return true;
        }
        false
    }

    /// Grow the partition so that it holds at least `size` and all of its
    /// contents.
    fn fit_to(&mut self, size: u64) {
        let need = match &self.payload {
            Some(Payload::Lvm(vg)) => vg.min_size(size),
            Some(Payload::Btrfs(b)) => b.min_size(size),
            _ => size,
        };
        self.ensure_size(need);
    }

    fn volume_group_mut(&mut self) -> Result<&mut VolumeGroup> {
        match &mut self.payload {
            Some(Payload::Lvm(vg)) => Ok(vg),
            _ => Err(internal("partition does not hold a volume group")),
        }
    }

    fn btrfs_mut(&mut self) -> Result<&mut Btrfs> {
        match &mut self.payload {
            Some(Payload::Btrfs(b)) => Ok(b),
            _ => Err(internal("partition does not hold a btrfs volume")),
        }
    }
}

/// Locates a mountable entity inside a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityPath {
    /// A filesystem directly on partition `i`.
    Partition(usize),
    /// Logical volume `j` of the volume group on partition `i`.
    LogicalVolume(usize, usize),
    /// Subvolume `j` of the btrfs volume on partition `i`.
    Subvolume(usize, usize),
}

impl EntityPath {
    pub fn partition(&self) -> usize {
        match *self {
            EntityPath::Partition(i)
            | EntityPath::LogicalVolume(i, _)
            | EntityPath::Subvolume(i, _) => i,
        }
    }
}

/// Something that has a mountpoint.
#[derive(Debug, Clone, Copy)]
pub enum Mountable<'a> {
    Filesystem(&'a Filesystem),
    Subvolume(&'a Btrfs, &'a BtrfsSubvolume),
}

impl<'a> Mountable<'a> {
    pub fn mountpoint(&self) -> &'a str {
        match self {
            Mountable::Filesystem(fs) => &fs.mountpoint,
            Mountable::Subvolume(_, sv) => &sv.mountpoint,
        }
    }

    pub fn fs_type(&self) -> &'a str {
        match self {
            Mountable::Filesystem(fs) => &fs.fs_type,
            Mountable::Subvolume(..) => "btrfs",
        }
    }

    /// Subvolumes report the UUID of their volume.
    pub fn uuid(&self) -> Option<&'a str> {
        match self {
            Mountable::Filesystem(fs) => fs.uuid.as_deref(),
            Mountable::Subvolume(b, _) => b.uuid.as_deref(),
        }
    }

    pub fn label(&self) -> Option<&'a str> {
        match self {
            Mountable::Filesystem(fs) => fs.label.as_deref(),
            Mountable::Subvolume(_, sv) => Some(sv.name.as_str()),
        }
    }

    pub fn fstab_entry(&self) -> Option<FsTabEntry> {
        match self {
            Mountable::Filesystem(fs) => fs.fstab_entry(),
            Mountable::Subvolume(b, sv) => b.fstab_entry(sv),
        }
    }
}

/// Which filesystems and volume managers a table uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartitionTableFeatures {
    pub xfs: bool,
    pub ext4: bool,
    pub fat: bool,
    pub swap: bool,
    pub lvm: bool,
    pub btrfs: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionTable {
    /// Disk identifier; GPT tables get a UUID, DOS tables a `0x` id.
    pub uuid: Option<String>,
    pub pt_type: PartitionTableType,
    /// Total size of the disk image, in bytes.
    pub size: u64,
    /// Zero means [`DEFAULT_SECTOR_SIZE`].
    pub sector_size: u64,
    /// Extra space kept free at the end of the disk.
    pub extra_padding: u64,
    /// Space kept free before the first partition.
    pub start_offset: u64,
    pub partitions: Vec<Partition>,
}

impl PartitionTable {
    pub fn sector_size(&self) -> u64 {
        match self.sector_size {
            0 => DEFAULT_SECTOR_SIZE,
            s => s,
        }
    }

    pub fn bytes_to_sectors(&self, bytes: u64) -> u64 {
        bytes / self.sector_size()
    }

    /// Every mounted filesystem or subvolume, in partition order.
    pub fn mountables(&self) -> Vec<(EntityPath, Mountable<'_>)> {
        let mut r = Vec::new();
        for (i, part) in self.partitions.iter().enumerate() {
            match &part.payload {
                Some(Payload::Filesystem(fs)) if !fs.mountpoint.is_empty() => {
                    r.push((EntityPath::Partition(i), Mountable::Filesystem(fs)))
                }
                Some(Payload::Lvm(vg)) => {
                    for (j, lv) in vg.logical_volumes.iter().enumerate() {
                        if let LvPayload::Filesystem(fs) = &lv.payload {
                            if !fs.mountpoint.is_empty() {
                                r.push((EntityPath::LogicalVolume(i, j), Mountable::Filesystem(fs)));
                            }
                        }
                    }
                }
                Some(Payload::Btrfs(b)) => {
                    for (j, sv) in b.subvolumes.iter().enumerate() {
                        if !sv.mountpoint.is_empty() {
                            r.push((EntityPath::Subvolume(i, j), Mountable::Subvolume(b, sv)));
                        }
                    }
                }
                _ => {}
            }
        }
        r
    }

    pub fn find(&self, mountpoint: &str) -> Option<EntityPath> {
        self.mountables()
            .into_iter()
            .find(|(_, m)| m.mountpoint() == mountpoint)
            .map(|(p, _)| p)
    }

    pub fn mountable(&self, path: EntityPath) -> Option<Mountable<'_>> {
        self.mountables()
            .into_iter()
            .find(|(p, _)| *p == path)
            .map(|(_, m)| m)
    }

    pub fn contains_mountpoint(&self, mountpoint: &str) -> bool {
        self.find(mountpoint).is_some()
    }

    /// Index of the partition that holds `/`, directly or in a container.
    pub fn root_partition_index(&self) -> Option<usize> {
        self.find("/").map(|p| p.partition())
    }

    /// UUID of the filesystem mounted at `/`.
    pub fn root_fs_uuid(&self) -> Option<&str> {
        self.find("/")
            .and_then(|p| self.mountable(p))
            .and_then(|m| m.uuid())
    }

    /// UUID of the filesystem holding `/boot`: the root filesystem when
    /// there is no separate `/boot`.
    pub fn boot_fs_uuid(&self) -> Option<&str> {
        self.find("/boot")
            .and_then(|p| self.mountable(p))
            .and_then(|m| m.uuid())
            .or_else(|| self.root_fs_uuid())
    }

    pub fn features(&self) -> PartitionTableFeatures {
        fn fs_type(t: &str, f: &mut PartitionTableFeatures) {
            match t {
                "xfs" => f.xfs = true,
                "ext4" => f.ext4 = true,
                "vfat" => f.fat = true,
                _ => {}
            }
        }
        let mut f = PartitionTableFeatures::default();
        for part in &self.partitions {
            match &part.payload {
                Some(Payload::Filesystem(fs)) => fs_type(&fs.fs_type, &mut f),
                Some(Payload::Swap(_)) => f.swap = true,
                Some(Payload::Lvm(vg)) => {
                    f.lvm = true;
                    for lv in &vg.logical_volumes {
                        match &lv.payload {
                            LvPayload::Filesystem(fs) => fs_type(&fs.fs_type, &mut f),
                            LvPayload::Swap(_) => f.swap = true,
                        }
                    }
                }
                Some(Payload::Btrfs(_)) => f.btrfs = true,
                None => {}
            }
        }
        f
    }

    /// Packages the build root needs to create this table.
    pub fn build_packages(&self) -> Vec<&'static str> {
        let f = self.features();
        let mut r = Vec::new();
        if f.lvm {
            r.push("lvm2");
        }
        if f.btrfs {
            r.push("btrfs-progs");
        }
        if f.xfs {
            r.push("xfsprogs");
        }
        if f.fat {
            r.push("dosfstools");
        }
        if f.ext4 {
            r.push("e2fsprogs");
        }
        r
    }

    /// Kernel arguments needed to find the root filesystem.
    pub fn kernel_options(&self) -> Vec<String> {
        match self.find("/").and_then(|p| self.mountable(p)) {
            Some(Mountable::Subvolume(_, sv)) => vec![format!("rootflags=subvol={}", sv.name)],
            _ => Vec::new(),
        }
    }

    /// fstab entries, ordered by pass number.
    pub fn fstab_entries(&self) -> Vec<FsTabEntry> {
        let mut r = Vec::new();
        for part in &self.partitions {
            match &part.payload {
                Some(Payload::Filesystem(fs)) => r.extend(fs.fstab_entry()),
                Some(Payload::Swap(s)) => r.push(s.fstab_entry()),
                Some(Payload::Lvm(vg)) => {
                    r.extend(vg.logical_volumes.iter().filter_map(|lv| lv.fstab_entry()))
                }
                Some(Payload::Btrfs(b)) => {
                    r.extend(b.subvolumes.iter().filter_map(|sv| b.fstab_entry(sv)))
                }
                None => {}
            }
        }
        r.sort_by_key(|e| e.passno);
        r
    }

    fn size_of(&self, path: EntityPath) -> u64 {
        let part = &self.partitions[path.partition()];
        match (path, &part.payload) {
            (EntityPath::LogicalVolume(_, j), Some(Payload::Lvm(vg))) => vg.logical_volumes[j].size,
            (EntityPath::Subvolume(_, j), Some(Payload::Btrfs(b))) => b.subvolumes[j].size,
            _ => part.size,
        }
    }

    fn align_up(&self, size: u64) -> u64 {
        align_up(size, DEFAULT_GRAIN_BYTES)
    }

    /// Round `size` up to what every container on the way to `path`
    /// allocates in.
    fn align_branch(&self, path: EntityPath, size: u64) -> u64 {
        let size = match path {
            EntityPath::LogicalVolume(..) => lvm::align_up(size),
            _ => size,
        };
        self.align_up(size)
    }

    /// Make the entity at `path` at least `size` bytes, growing its
    /// containers to match.
    fn resize_branch(&mut self, path: EntityPath, size: u64) {
        let part = &mut self.partitions[path.partition()];
        let need = match (path, &mut part.payload) {
            (EntityPath::Partition(_), _) => size,
            (EntityPath::LogicalVolume(_, j), Some(Payload::Lvm(vg))) => {
                if !vg.logical_volumes[j].ensure_size(size) {
                    return;
                }
                size.max(vg.lv_sum() + vg.metadata_size())
            }
            (EntityPath::Subvolume(_, j), Some(Payload::Btrfs(b))) => {
                if !b.subvolumes[j].ensure_size(size) {
                    return;
                }
                size.max(b.subvolume_sum())
            }
            _ => return,
        };
        part.ensure_size(need);
    }

    /// Add a new partition holding a `fs_type` filesystem at `mountpoint`.
    fn create_partition_mountpoint(
        &mut self,
        mountpoint: &str,
        size: u64,
        fs_type: &str,
    ) -> Result<EntityPath> {
        let max = self.pt_type.max_partitions();
        if self.partitions.len() >= max {
            return Err(layout_error(format!(
                "maximum number of partitions reached ({})",
                max
            )));
        }
        let role = if mountpoint == "/boot" {
            PartRole::Boot
        } else {
            PartRole::Data
        };
        let mut fs = Filesystem::new(fs_type, mountpoint);
        fs.label = default_label(mountpoint).map(str::to_string);
        self.partitions.push(Partition {
            size,
            part_type: part_type_id(self.pt_type, role, None)?.to_string(),
            payload: Some(Payload::Filesystem(fs)),
            ..Default::default()
        });
        Ok(EntityPath::Partition(self.partitions.len() - 1))
    }

    /// Create `mountpoint` in whatever holds `/`: its volume group, its btrfs
    /// volume, or the table itself.
    fn create_filesystem(&mut self, mountpoint: &str, size: u64, default_fs: &str) -> Result<EntityPath> {
        let root = self
            .find("/")
            .ok_or_else(|| internal("no root mountpoint in partition table"))?;
        match root {
            EntityPath::LogicalVolume(i, _) => {
                let vg = self.partitions[i].volume_group_mut()?;
                let j = vg.create_mountpoint(mountpoint, default_fs, size)?;
                Ok(EntityPath::LogicalVolume(i, j))
            }
            EntityPath::Subvolume(i, _) => {
                let b = self.partitions[i].btrfs_mut()?;
                let j = b.create_mountpoint(mountpoint, default_fs, size)?;
                Ok(EntityPath::Subvolume(i, j))
            }
            EntityPath::Partition(_) => self.create_partition_mountpoint(mountpoint, size, default_fs),
        }
    }

    /// Grow existing mountpoints to the requested sizes.  New mountpoints
    /// are created when `create` is set and returned otherwise.
    fn apply_customization(
        &mut self,
        mountpoints: &[FilesystemCustomization],
        default_fs: &str,
        create: bool,
    ) -> Result<Vec<FilesystemCustomization>> {
        let mut new_mountpoints = Vec::new();
        for mnt in mountpoints {
            let size = clamp_fs_size(&mnt.mountpoint, mnt.minsize.bytes());
            let path = match self.find(&mnt.mountpoint) {
                Some(p) => p,
                None if !create => {
                    new_mountpoints.push(mnt.clone());
                    continue;
                }
                None => self.create_filesystem(&mnt.mountpoint, size, default_fs)?,
            };
            let size = self.align_branch(path, size);
            self.resize_branch(path, size);
        }
        Ok(new_mountpoints)
    }

    /// Move `/` onto a logical volume, adding a `/boot` partition first if
    /// there is none.
    fn ensure_lvm(&mut self, default_fs: &str) -> Result<()> {
        if !self.contains_mountpoint("/boot") {
            self.create_partition_mountpoint("/boot", DEFAULT_BOOT_PARTITION_SIZE, default_fs)?;
        }
        let root = self
            .find("/")
            .ok_or_else(|| internal("no root mountpoint in partition table"))?;
        let i = match root {
            EntityPath::LogicalVolume(..) => return Ok(()),
            EntityPath::Partition(i) => i,
            EntityPath::Subvolume(..) => return Err(layout_error("unsupported parent for LVM")),
        };
        let pt_type = self.pt_type;
        let part = &mut self.partitions[i];
        let Some(Payload::Filesystem(fs)) = part.payload.take() else {
            return Err(internal("root partition does not hold a filesystem"));
        };
        let mut vg = VolumeGroup::new("rootvg");
        vg.create_logical_volume(Some("rootlv"), part.size, LvPayload::Filesystem(fs))?;
        part.payload = Some(Payload::Lvm(vg));
        part.size = 0;
        part.part_type = part_type_id(pt_type, PartRole::Lvm, None)?.to_string();
        tracing::debug!("moved root filesystem onto LVM");
        Ok(())
    }

    /// Move `/` onto a btrfs subvolume, adding an xfs `/boot` partition
    /// first if there is none.
    fn ensure_btrfs(&mut self, arch: Arch) -> Result<()> {
        if !self.contains_mountpoint("/boot") {
            self.create_partition_mountpoint("/boot", DEFAULT_BOOT_PARTITION_SIZE, "xfs")?;
        }
        let root = self
            .find("/")
            .ok_or_else(|| internal("no root mountpoint in partition table"))?;
        let i = match root {
            EntityPath::Subvolume(..) => return Ok(()),
            EntityPath::Partition(i) => i,
            EntityPath::LogicalVolume(..) => {
                return Err(layout_error("unsupported parent for btrfs"))
            }
        };
        let pt_type = self.pt_type;
        let part = &mut self.partitions[i];
        let btrfs = Btrfs {
            uuid: None,
            label: Some("root".to_string()),
            subvolumes: vec![BtrfsSubvolume {
                name: "root".to_string(),
                size: part.size,
                mountpoint: "/".to_string(),
                compress: Some(DEFAULT_BTRFS_COMPRESSION.to_string()),
                read_only: false,
            }],
        };
        part.payload = Some(Payload::Btrfs(btrfs));
        part.size = 0;
        part.part_type = part_type_id(pt_type, PartRole::Root, Some(arch))?.to_string();
        tracing::debug!("moved root filesystem onto btrfs");
        Ok(())
    }

    /// Grow mountpoints so that each directory in `sizes` has at least the
    /// given space; directories without their own mountpoint count against
    /// the closest mounted parent.
    pub(crate) fn ensure_directory_sizes(&mut self, sizes: &BTreeMap<String, u64>) -> Result<()> {
        let mountpoints: BTreeSet<String> = self
            .mountables()
            .iter()
            .map(|(_, m)| m.mountpoint().to_string())
            .collect();
        let mut per_mount: BTreeMap<String, u64> = BTreeMap::new();
        for (dir, size) in sizes {
            let mut d = Utf8Path::new(dir);
            while !mountpoints.contains(d.as_str()) {
                d = d
                    .parent()
                    .ok_or_else(|| internal(format!("no mountpoint found for directory {:?}", dir)))?;
            }
            *per_mount.entry(d.to_string()).or_default() += size;
        }
        for (mp, size) in per_mount {
            let path = self
                .find(&mp)
                .ok_or_else(|| internal(format!("mountpoint {} disappeared", mp)))?;
            if self.size_of(path) < size {
                self.resize_branch(path, size);
            }
        }
        Ok(())
    }

    /// Assign partition offsets and sizes.  Partitions are laid out in order
    /// with the root partition last, grown to fill the disk; the disk grows
    /// if `size` is too small.  Returns the start of the first partition.
    pub(crate) fn relayout(&mut self, size: u64) -> Result<u64> {
        let mut header = self.sector_size();
        let mut footer = 0;
        if self.pt_type == PartitionTableType::Gpt {
            // the partition entry array holds at least 128 entries
            let parts = self.partitions.len().max(128) as u64;
            header += parts * 128;
            footer = header;
        }
        let first = self.align_up(header + self.start_offset);
        let size = self.align_up(size);
        let root_idx = self
            .root_partition_index()
            .ok_or_else(|| internal("no root filesystem found"))?;

        let mut start = first;
        for (i, part) in self.partitions.iter_mut().enumerate() {
            if i == root_idx {
                continue;
            }
            part.start = start;
            part.fit_to(part.size);
            part.size = align_up(part.size, DEFAULT_GRAIN_BYTES);
            start += part.size;
        }

        footer += self.extra_padding;
        let root = &mut self.partitions[root_idx];
        root.start = start;
        root.fit_to(root.size);
        let end = align_up(root.start + footer + root.size, DEFAULT_GRAIN_BYTES);
        let size = size.max(end);
        if size > self.size {
            self.size = size;
        }
        root.size = self.size - root.start - footer;

        self.partitions.sort_by_key(|p| p.start);
        Ok(first)
    }

    fn check_partition_limit(&self) -> Result<()> {
        let max = self.pt_type.max_partitions();
        if self.partitions.len() > max {
            return Err(layout_error(format!(
                "{:?} partition table type only supports up to {} partitions: got {}",
                self.pt_type.as_str(),
                max,
                self.partitions.len()
            )));
        }
        Ok(())
    }

    fn filesystems_mut(&mut self) -> Vec<&mut Filesystem> {
        let mut r = Vec::new();
        for part in &mut self.partitions {
            match &mut part.payload {
                Some(Payload::Filesystem(fs)) => r.push(fs),
                Some(Payload::Lvm(vg)) => {
                    r.extend(vg.logical_volumes.iter_mut().filter_map(|lv| match &mut lv.payload {
                        LvPayload::Filesystem(fs) => Some(fs),
                        LvPayload::Swap(_) => None,
                    }))
                }
                _ => {}
            }
        }
        r
    }

    /// Give unlabelled well-known filesystems their conventional label
    /// unless something else already carries it.
    pub(crate) fn assign_default_labels(&mut self) {
        let mut used: BTreeSet<String> = self
            .filesystems_mut()
            .into_iter()
            .filter_map(|fs| fs.label.clone())
            .collect();
        for fs in self.filesystems_mut() {
            if fs.label.is_some() {
                continue;
            }
            if let Some(l) = default_label(&fs.mountpoint) {
                if used.insert(l.to_string()) {
                    fs.label = Some(l.to_string());
                }
            }
        }
    }

    /// Fill in missing identifiers: the disk (GPT), every filesystem, swap
    /// area and btrfs volume, then every GPT partition.
    pub(crate) fn generate_uuids<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let gpt = self.pt_type == PartitionTableType::Gpt;
        if gpt && self.uuid.is_none() {
            self.uuid = Some(new_uuid(rng));
        }
        for part in &mut self.partitions {
            match &mut part.payload {
                Some(Payload::Filesystem(fs)) => fs.gen_uuid(rng),
                Some(Payload::Swap(s)) => s.gen_uuid(rng),
                Some(Payload::Lvm(vg)) => {
                    for lv in &mut vg.logical_volumes {
                        lv.gen_uuid(rng);
                    }
                }
                Some(Payload::Btrfs(b)) => b.gen_uuid(rng),
                None => {}
            }
        }
        if gpt {
            for part in &mut self.partitions {
                if part.uuid.is_none() {
                    part.uuid = Some(new_uuid(rng));
                }
            }
        }
    }
}

fn clamp_fs_size(mountpoint: &str, size: u64) -> u64 {
    let min = if mountpoint == "/boot" {
        MIN_BOOT_SIZE
    } else {
        MIN_FS_SIZE
    };
    size.max(min)
}

/// Space reserved for directories that usually share the root filesystem.
pub fn default_required_sizes() -> BTreeMap<String, u64> {
    BTreeMap::from([("/".to_string(), GIB), ("/usr".to_string(), 2 * GIB)])
}

/// Options for planning from a base table.
#[derive(Debug, Clone)]
pub struct PlanOptions {
    pub mode: PartitioningMode,
    pub arch: Arch,
    /// Minimum space per directory; defaults to [`default_required_sizes`].
    pub required_sizes: Option<BTreeMap<String, u64>>,
    /// Filesystem for new mountpoints; defaults to xfs.
    pub default_fs: Option<String>,
}

impl PlanOptions {
    pub fn new(mode: PartitioningMode, arch: Arch) -> Self {
        Self {
            mode,
            arch,
            required_sizes: None,
            default_fs: None,
        }
    }
}

/// Fit `mountpoints` onto a copy of `base` and lay it out on a disk of at
/// least `image_size` bytes.
#[context("Creating partition table")]
pub fn new_partition_table<R: Rng + ?Sized>(
    base: &PartitionTable,
    mountpoints: &[FilesystemCustomization],
    image_size: u64,
    opts: &PlanOptions,
    rng: &mut R,
) -> Result<PartitionTable> {
    let mut pt = base.clone();
    if pt.features().lvm && matches!(opts.mode, PartitioningMode::Raw | PartitioningMode::Btrfs) {
        return Err(layout_error(format!(
            "{} partitioning mode set for a base partition table with LVM, this is unsupported",
            opts.mode
        )));
    }
    let mut default_fs = opts.default_fs.as_deref().unwrap_or("xfs");

    // Existing mountpoints grow first; what is left needs a new home.
    let new_mountpoints = pt.apply_customization(mountpoints, default_fs, false)?;
    match opts.mode {
        PartitioningMode::Lvm => pt.ensure_lvm(default_fs)?,
        PartitioningMode::AutoLvm if !new_mountpoints.is_empty() => pt.ensure_lvm(default_fs)?,
        PartitioningMode::Btrfs => {
            pt.ensure_btrfs(opts.arch)?;
            default_fs = "btrfs";
        }
        _ => {}
    }
    pt.apply_customization(&new_mountpoints, default_fs, true)?;

    let defaults;
    let required = match &opts.required_sizes {
        Some(r) => r,
        None => {
            defaults = default_required_sizes();
            &defaults
        }
    };
    pt.ensure_directory_sizes(required)?;
    pt.relayout(image_size)?;
    pt.check_partition_limit()?;
    pt.assign_default_labels();
    pt.generate_uuids(rng);
    tracing::debug!(
        partitions = pt.partitions.len(),
        size = pt.size,
        mode = %opts.mode,
        "planned partition table"
    );
    Ok(pt)
}

/// Options for building a table from a `disk` customization.
#[derive(Debug, Clone, Default)]
pub struct CustomPartitionTableOptions {
    /// Used when the customization does not pick a table type.
    pub pt_type: Option<PartitionTableType>,
    pub boot_mode: BootMode,
    /// Used for filesystems without an explicit type and for the
    /// automatically created root filesystem.
    pub default_fs_type: Option<FsType>,
    pub required_min_sizes: BTreeMap<String, u64>,
    pub arch: Option<Arch>,
}

impl CustomPartitionTableOptions {
    fn fs_type_for(&self, fs: &FilesystemTypedCustomization) -> Result<FsType> {
        fs.fs_type
            .or(self.default_fs_type)
            .ok_or_else(|| layout_error("no filesystem type defined and no default set"))
    }
}

fn esp_partition(pt_type: PartitionTableType) -> Result<Partition> {
    let mut fs = Filesystem::new("vfat", "/boot/efi");
    fs.uuid = Some(EFI_FILESYSTEM_UUID.to_string());
    fs.label = Some("ESP".to_string());
    fs.fstab_options = ESP_FSTAB_OPTIONS.to_string();
    fs.fstab_passno = 2;
    Ok(Partition {
        size: ESP_SIZE,
        part_type: part_type_id(pt_type, PartRole::Esp, None)?.to_string(),
        uuid: (pt_type == PartitionTableType::Gpt).then(|| EFI_SYSTEM_PARTITION_UUID.to_string()),
        payload: Some(Payload::Filesystem(fs)),
        ..Default::default()
    })
}

/// Firmware partitions: PReP on ppc64le, BIOS boot for legacy boot and an
/// ESP for UEFI unless the customization provides its own.
fn add_boot_mode_partitions(
    pt: &mut PartitionTable,
    disk: &DiskCustomization,
    options: &CustomPartitionTableOptions,
) -> Result<()> {
    if options.arch == Some(Arch::Ppc64le) {
        pt.partitions.push(Partition {
            size: PREP_SIZE,
            bootable: true,
            part_type: part_type_id(pt.pt_type, PartRole::PpcPrep, None)?.to_string(),
            ..Default::default()
        });
    }
    if options.boot_mode.has_legacy() {
        pt.partitions.push(Partition {
            size: BIOS_BOOT_SIZE,
            bootable: true,
            part_type: part_type_id(pt.pt_type, PartRole::Bios, None)?.to_string(),
            uuid: (pt.pt_type == PartitionTableType::Gpt)
                .then(|| BIOS_BOOT_PARTITION_UUID.to_string()),
            ..Default::default()
        });
    }
    if options.boot_mode.has_uefi() && !disk.mountpoints().contains(&"/boot/efi") {
        pt.partitions.push(esp_partition(pt.pt_type)?);
    }
    Ok(())
}

/// A separate `/boot` is needed when `/` lives on LVM or btrfs and none was
/// requested.
fn needs_boot(disk: &DiskCustomization) -> bool {
    let mut found = false;
    for part in &disk.partitions {
        match &part.payload {
            PartitionPayload::Plain(fs) if fs.mountpoint.as_deref() == Some("/boot") => {
                return false
            }
            PartitionPayload::Plain(_) => {}
            PartitionPayload::Lvm(_) | PartitionPayload::Btrfs(_) => found = true,
        }
    }
    found
}

fn disk_labels(disk: &DiskCustomization) -> BTreeSet<String> {
    let mut r = BTreeSet::new();
    for part in &disk.partitions {
        match &part.payload {
            PartitionPayload::Plain(fs) => r.extend(fs.label.clone()),
            PartitionPayload::Lvm(vg) => {
                r.extend(vg.logical_volumes.iter().filter_map(|lv| lv.fs.label.clone()))
            }
            PartitionPayload::Btrfs(_) => {}
        }
    }
    r
}

fn add_boot_partition(
    pt: &mut PartitionTable,
    disk: &DiskCustomization,
    options: &CustomPartitionTableOptions,
) -> Result<()> {
    if !needs_boot(disk) {
        return Ok(());
    }
    let fs_type = match options.default_fs_type {
        Some(FsType::Ext4) => "ext4",
        _ => "xfs",
    };
    let mut fs = Filesystem::new(fs_type, "/boot");
    fs.label = Some(gen_unique_string("boot", &disk_labels(disk))?);
    pt.partitions.push(Partition {
        size: DEFAULT_BOOT_PARTITION_SIZE,
        part_type: part_type_id(pt.pt_type, PartRole::Boot, options.arch)?.to_string(),
        payload: Some(Payload::Filesystem(fs)),
        ..Default::default()
    });
    Ok(())
}

fn new_partition(
    pt: &PartitionTable,
    part: &PartitionCustomization,
    role: PartRole,
    arch: Option<Arch>,
    payload: Option<Payload>,
) -> Result<Partition> {
    let part_type = match part.part_type.as_deref() {
        Some(t) => t.to_string(),
        None => part_type_id(pt.pt_type, role, arch)?.to_string(),
    };
    Ok(Partition {
        size: part.minsize.bytes(),
        part_type,
        uuid: part.part_uuid.clone(),
        label: part.part_label.clone(),
        payload,
        ..Default::default()
    })
}

fn add_plain_partition(
    pt: &mut PartitionTable,
    part: &PartitionCustomization,
    fs: &FilesystemTypedCustomization,
    options: &CustomPartitionTableOptions,
) -> Result<()> {
    let fs_type = options.fs_type_for(fs)?;
    let mountpoint = fs.mountpoint.as_deref().unwrap_or_default();
    let role = match (mountpoint, fs_type) {
        ("/", _) => PartRole::Root,
        ("/usr", _) => PartRole::Usr,
        ("/boot", _) => PartRole::Boot,
        ("/boot/efi", _) => PartRole::Esp,
        (_, FsType::Swap) => PartRole::Swap,
        _ => PartRole::Data,
    };
    let payload = match fs_type {
        FsType::Unformatted => None,
        FsType::Swap => Some(Payload::Swap(Swap::new(fs.label.clone()))),
        t => {
            let mut f = Filesystem::new(t.as_str(), mountpoint);
            f.label = fs.label.clone();
            if mountpoint == "/boot/efi" {
                f.fstab_options = ESP_FSTAB_OPTIONS.to_string();
                f.fstab_passno = 2;
            }
            Some(Payload::Filesystem(f))
        }
    };
    let p = new_partition(pt, part, role, options.arch, payload)?;
    pt.partitions.push(p);
    Ok(())
}

fn add_lvm_partition(
    pt: &mut PartitionTable,
    part: &PartitionCustomization,
    vgc: &VgCustomization,
    options: &CustomPartitionTableOptions,
) -> Result<()> {
    let name = match vgc.name.as_deref().filter(|n| !n.is_empty()) {
        Some(n) => n.to_string(),
        None => {
            let mut existing: BTreeSet<String> = pt
                .partitions
                .iter()
                .filter_map(|p| match &p.payload {
                    Some(Payload::Lvm(vg)) => Some(vg.name.clone()),
                    _ => None,
                })
                .collect();
            // generated names always carry a suffix
            existing.insert("vg".to_string());
            gen_unique_string("vg", &existing)?
        }
    };
    let mut vg = VolumeGroup::new(&name);
    for lv in &vgc.logical_volumes {
        let payload = match options.fs_type_for(&lv.fs)? {
            FsType::Swap => LvPayload::Swap(Swap::new(lv.fs.label.clone())),
            FsType::Unformatted => {
                return Err(layout_error(format!(
                    "logical volume {:?} must carry a filesystem or swap",
                    lv.name.as_deref().unwrap_or_default()
                )))
            }
            t => {
                let mut f = Filesystem::new(t.as_str(), lv.fs.mountpoint.as_deref().unwrap_or_default());
                f.label = lv.fs.label.clone();
                LvPayload::Filesystem(f)
            }
        };
        vg.create_logical_volume(lv.name.as_deref(), lv.minsize.bytes(), payload)?;
    }
    let p = new_partition(pt, part, PartRole::Lvm, None, Some(Payload::Lvm(vg)))?;
    pt.partitions.push(p);
    Ok(())
}

fn add_btrfs_partition(
    pt: &mut PartitionTable,
    part: &PartitionCustomization,
    vol: &BtrfsVolumeCustomization,
) -> Result<()> {
    let subvolumes = vol
        .subvolumes
        .iter()
        .map(|sv| BtrfsSubvolume {
            name: sv.name.clone(),
            mountpoint: sv.mountpoint.clone(),
            ..Default::default()
        })
        .collect();
    let btrfs = Btrfs {
        subvolumes,
        ..Default::default()
    };
    let p = new_partition(pt, part, PartRole::Data, None, Some(Payload::Btrfs(btrfs)))?;
    pt.partitions.push(p);
    Ok(())
}

/// Create `/` if the customization did not: as a logical volume in the
/// first volume group, a subvolume of the first btrfs volume, or a new
/// partition at the end of the table.
fn ensure_root_filesystem(pt: &mut PartitionTable, options: &CustomPartitionTableOptions) -> Result<()> {
    if pt.contains_mountpoint("/") {
        return Ok(());
    }
    let mut labels = BTreeSet::new();
    let mut subvol_names = BTreeSet::new();
    for (_, m) in pt.mountables() {
        labels.extend(m.label().map(str::to_string));
        if let Mountable::Subvolume(_, sv) = m {
            subvol_names.insert(sv.name.clone());
        }
    }

    for part in &mut pt.partitions {
        match &mut part.payload {
            Some(Payload::Lvm(vg)) => {
                let fs_type = options.default_fs_type.ok_or_else(|| {
                    layout_error("error creating root logical volume: no default filesystem type")
                })?;
                let mut fs = Filesystem::new(fs_type.as_str(), "/");
                fs.label = Some(gen_unique_string("root", &labels)?);
                // sized by the directory requirements and the relayout
                vg.create_logical_volume(None, 0, LvPayload::Filesystem(fs))?;
                return Ok(());
            }
            Some(Payload::Btrfs(b)) => {
                b.subvolumes.push(BtrfsSubvolume {
                    name: gen_unique_string("root", &subvol_names)?,
                    mountpoint: "/".to_string(),
                    ..Default::default()
                });
                return Ok(());
            }
            _ => {}
        }
    }

    let fs_type = options
        .default_fs_type
        .ok_or_else(|| layout_error("error creating root partition: no default filesystem type"))?;
    let mut fs = Filesystem::new(fs_type.as_str(), "/");
    fs.label = Some(gen_unique_string("root", &labels)?);
    pt.partitions.push(Partition {
        part_type: part_type_id(pt.pt_type, PartRole::Root, options.arch)?.to_string(),
        payload: Some(Payload::Filesystem(fs)),
        ..Default::default()
    });
    Ok(())
}

/// Build a partition table with the structure described by `disk`.
#[context("Generating partition table")]
pub fn new_custom_partition_table<R: Rng + ?Sized>(
    disk: &DiskCustomization,
    options: &CustomPartitionTableOptions,
    rng: &mut R,
) -> Result<PartitionTable> {
    disk.validate()?;
    let pt_type = disk.pt_type.or(options.pt_type).unwrap_or_default();
    let mut pt = PartitionTable {
        pt_type,
        ..Default::default()
    };

    add_boot_mode_partitions(&mut pt, disk, options)?;
    add_boot_partition(&mut pt, disk, options)?;
    for part in &disk.partitions {
        part.validate_for_table(pt_type)?;
        match &part.payload {
            PartitionPayload::Plain(fs) => add_plain_partition(&mut pt, part, fs, options)?,
            PartitionPayload::Lvm(vg) => add_lvm_partition(&mut pt, part, vg, options)?,
            PartitionPayload::Btrfs(vol) => add_btrfs_partition(&mut pt, part, vol)?,
        }
    }
    ensure_root_filesystem(&mut pt, options)?;
    pt.ensure_directory_sizes(&options.required_min_sizes)?;

    pt.start_offset = disk.start_offset.map(|s| s.bytes()).unwrap_or(0);
    pt.relayout(disk.minsize.map(|s| s.bytes()).unwrap_or(0))?;

    // The table type may only be known now, so the DOS limit is checked
    // against the complete table.
    if pt_type == PartitionTableType::Dos && pt.partitions.len() > pt_type.max_partitions() {
        return Err(layout_error(format!(
            "invalid partition table: \"dos\" partition table type only supports up to 4 partitions: got {} after creating the partition table with all necessary partitions",
            pt.partitions.len()
        )));
    }
    pt.check_partition_limit()?;
    pt.assign_default_labels();
    pt.generate_uuids(rng);
    tracing::debug!(partitions = pt.partitions.len(), size = pt.size, "generated custom partition table");
    Ok(pt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::LvCustomization;
    use crate::datasizes::Size;
    use crate::disk::{
        BIOS_BOOT_PARTITION_GUID, FILESYSTEM_DATA_GUID, LVM_PARTITION_GUID, ROOT_PARTITION_X86_64_GUID,
        XBOOTLDR_PARTITION_GUID,
    };
    use crate::error::ImageError;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn fs_partition(part_type: &str, size: u64, fs_type: &str, mountpoint: &str) -> Partition {
        let mut fs = Filesystem::new(fs_type, mountpoint);
        fs.label = default_label(mountpoint).map(str::to_string);
        Partition {
            size,
            part_type: part_type.to_string(),
            payload: Some(Payload::Filesystem(fs)),
            ..Default::default()
        }
    }

    fn base_gpt() -> PartitionTable {
        PartitionTable {
            uuid: Some("d209c89e-ea5e-4fbd-b161-b461cce297e0".into()),
            pt_type: PartitionTableType::Gpt,
            partitions: vec![
                Partition {
                    size: MIB,
                    bootable: true,
                    part_type: BIOS_BOOT_PARTITION_GUID.into(),
                    uuid: Some(BIOS_BOOT_PARTITION_UUID.into()),
                    ..Default::default()
                },
                esp_partition(PartitionTableType::Gpt).unwrap(),
                fs_partition(XBOOTLDR_PARTITION_GUID, 600 * MIB, "xfs", "/boot"),
                fs_partition(FILESYSTEM_DATA_GUID, 2 * GIB, "xfs", "/"),
            ],
            ..Default::default()
        }
    }

    fn base_dos() -> PartitionTable {
        PartitionTable {
            uuid: Some("0x14fc63d2".into()),
            pt_type: PartitionTableType::Dos,
            partitions: vec![
                fs_partition("83", 600 * MIB, "xfs", "/boot"),
                fs_partition("83", 2 * GIB, "xfs", "/"),
            ],
            ..Default::default()
        }
    }

    fn mps(v: &[(&str, u64)]) -> Vec<FilesystemCustomization> {
        v.iter()
            .map(|(m, s)| FilesystemCustomization {
                mountpoint: m.to_string(),
                minsize: Size(*s),
            })
            .collect()
    }

    /// Partitions fit the disk, start on MiB boundaries and every mounted
    /// filesystem has an identifier.
    fn check_layout(pt: &PartitionTable) {
        let sum: u64 = pt.partitions.iter().map(|p| p.size).sum();
        assert!(sum <= pt.size, "{} > {}", sum, pt.size);
        for p in &pt.partitions {
            assert_eq!(p.start % MIB, 0);
            assert!(p.start + p.size <= pt.size);
        }
        for (_, m) in pt.mountables() {
            assert!(m.uuid().is_some(), "{} has no uuid", m.mountpoint());
        }
    }

    fn plan(
        base: &PartitionTable,
        m: &[(&str, u64)],
        size: u64,
        mode: PartitioningMode,
        seed: u64,
    ) -> Result<PartitionTable> {
        let mut rng = StdRng::seed_from_u64(seed);
        new_partition_table(
            base,
            &mps(m),
            size,
            &PlanOptions::new(mode, Arch::X86_64),
            &mut rng,
        )
    }

    #[test]
    fn test_plain_grows_root() -> Result<()> {
        let pt = plan(&base_gpt(), &[], 10 * GIB, PartitioningMode::AutoLvm, 0)?;
        check_layout(&pt);
        assert_eq!(pt.size, 10 * GIB);
        assert_eq!(pt.partitions.len(), 4);
        assert_eq!(pt.partitions[0].start, MIB);
        let root = pt.partitions.last().unwrap();
        assert_eq!(pt.root_partition_index(), Some(3));
        assert!(matches!(root.payload, Some(Payload::Filesystem(_))));
        assert!(root.size > 9 * GIB);
        // fixed identifiers are kept
        assert_eq!(pt.partitions[0].uuid.as_deref(), Some(BIOS_BOOT_PARTITION_UUID));
        assert_eq!(pt.uuid.as_deref(), Some("d209c89e-ea5e-4fbd-b161-b461cce297e0"));
        assert!(pt.features().xfs && pt.features().fat && !pt.features().lvm);
        assert_eq!(pt.build_packages(), vec!["xfsprogs", "dosfstools"]);
        Ok(())
    }

    #[test]
    fn test_image_smaller_than_contents() -> Result<()> {
        let pt = plan(&base_gpt(), &[("/", 20 * GIB)], GIB, PartitioningMode::Raw, 0)?;
        check_layout(&pt);
        assert!(pt.size >= 20 * GIB);
        Ok(())
    }

    #[test]
    fn test_auto_lvm() -> Result<()> {
        let pt = plan(&base_gpt(), &[("/var", 3 * GIB)], 10 * GIB, PartitioningMode::AutoLvm, 0)?;
        check_layout(&pt);
        assert_eq!(pt.partitions.len(), 4);
        let root = &pt.partitions[3];
        assert_eq!(root.part_type, LVM_PARTITION_GUID);
        let Some(Payload::Lvm(vg)) = &root.payload else {
            panic!("root is not on LVM");
        };
        assert_eq!(vg.name, "rootvg");
        let names: Vec<_> = vg.logical_volumes.iter().map(|lv| lv.name.as_str()).collect();
        assert_eq!(names, vec!["rootlv", "varlv"]);
        // "/" and "/usr" requirements both land on the root volume
        assert_eq!(vg.logical_volumes[0].size, 3 * GIB);
        assert_eq!(vg.logical_volumes[1].size, 3 * GIB);
        assert!(root.size >= vg.min_size(0));
        assert!(pt.features().lvm);
        assert_eq!(pt.build_packages()[0], "lvm2");
        Ok(())
    }

    #[test]
    fn test_auto_lvm_without_new_mountpoints() -> Result<()> {
        let pt = plan(&base_gpt(), &[("/boot", 100 * MIB)], 0, PartitioningMode::AutoLvm, 0)?;
        assert!(!pt.features().lvm);
        // clamped to the /boot minimum, but the base is already bigger
        assert_eq!(pt.partitions[2].size, 600 * MIB);
        Ok(())
    }

    #[test]
    fn test_lvm_adds_boot() -> Result<()> {
        let mut base = base_gpt();
        base.partitions.remove(2);
        let pt = plan(&base, &[], 0, PartitioningMode::Lvm, 0)?;
        check_layout(&pt);
        let boot = pt.find("/boot").unwrap();
        assert_eq!(pt.partitions[boot.partition()].size, GIB);
        assert_eq!(pt.mountable(boot).unwrap().label(), Some("boot"));
        assert!(matches!(pt.find("/"), Some(EntityPath::LogicalVolume(_, 0))));
        assert_eq!(pt.root_partition_index(), Some(pt.partitions.len() - 1));
        Ok(())
    }

    #[test]
    fn test_raw() -> Result<()> {
        let pt = plan(&base_gpt(), &[("/var", 2 * GIB)], 10 * GIB, PartitioningMode::Raw, 0)?;
        check_layout(&pt);
        assert_eq!(pt.partitions.len(), 5);
        let var = pt.find("/var").unwrap();
        assert!(matches!(var, EntityPath::Partition(3)));
        assert_eq!(pt.partitions[3].part_type, FILESYSTEM_DATA_GUID);
        assert_eq!(pt.partitions[3].size, 2 * GIB);
        assert_eq!(pt.root_partition_index(), Some(4));
        Ok(())
    }

    #[test]
    fn test_btrfs() -> Result<()> {
        let pt = plan(&base_gpt(), &[("/home", 2 * GIB)], 10 * GIB, PartitioningMode::Btrfs, 0)?;
        check_layout(&pt);
        let root = &pt.partitions[pt.root_partition_index().unwrap()];
        assert_eq!(root.part_type, ROOT_PARTITION_X86_64_GUID);
        let Some(Payload::Btrfs(b)) = &root.payload else {
            panic!("root is not on btrfs");
        };
        let names: Vec<_> = b.subvolumes.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["root", "/home"]);
        assert_eq!(pt.kernel_options(), vec!["rootflags=subvol=root"]);
        assert_eq!(pt.root_fs_uuid(), b.uuid.as_deref());
        let home = pt.fstab_entries().into_iter().find(|e| e.path == "/home").unwrap();
        assert_eq!(home.options, "subvol=/home,compress=zstd:1");
        assert_eq!(pt.build_packages(), vec!["btrfs-progs", "xfsprogs", "dosfstools"]);
        Ok(())
    }

    #[test]
    fn test_lvm_base_rejected() -> Result<()> {
        let base = plan(&base_gpt(), &[], 0, PartitioningMode::Lvm, 0)?;
        for mode in [PartitioningMode::Raw, PartitioningMode::Btrfs] {
            let e = plan(&base, &[], 0, mode, 0).unwrap_err();
            assert!(matches!(ImageError::kind_of(&e), Some(ImageError::LayoutError(_))));
        }
        plan(&base, &[("/var", GIB)], 0, PartitioningMode::AutoLvm, 0)?;
        Ok(())
    }

    #[test]
    fn test_dos_partition_limit() -> Result<()> {
        let pt = plan(&base_dos(), &[("/var", GIB), ("/home", GIB)], 0, PartitioningMode::Raw, 0)?;
        check_layout(&pt);
        assert_eq!(pt.partitions.len(), 4);
        // no identifiers for DOS partitions
        assert!(pt.partitions.iter().all(|p| p.uuid.is_none()));
        assert_eq!(pt.uuid.as_deref(), Some("0x14fc63d2"));

        let e = plan(
            &base_dos(),
            &[("/var", GIB), ("/home", GIB), ("/srv", GIB)],
            0,
            PartitioningMode::Raw,
            0,
        )
        .unwrap_err();
        assert_eq!(
            ImageError::kind_of(&e),
            Some(&ImageError::LayoutError(
                "maximum number of partitions reached (4)".into()
            ))
        );
        Ok(())
    }

    #[test]
    fn test_deterministic() -> Result<()> {
        let m = [("/var", GIB), ("/home", GIB)];
        let a = plan(&base_gpt(), &m, 0, PartitioningMode::AutoLvm, 42)?;
        let b = plan(&base_gpt(), &m, 0, PartitioningMode::AutoLvm, 42)?;
        similar_asserts::assert_eq!(a, b);
        let c = plan(&base_gpt(), &m, 0, PartitioningMode::AutoLvm, 43)?;
        assert_ne!(a.root_fs_uuid(), c.root_fs_uuid());
        Ok(())
    }

    fn plain(mountpoint: &str, fs_type: FsType, minsize: u64) -> PartitionCustomization {
        PartitionCustomization {
            minsize: Size(minsize),
            part_type: None,
            part_label: None,
            part_uuid: None,
            payload: PartitionPayload::Plain(FilesystemTypedCustomization {
                mountpoint: Some(mountpoint.into()),
                label: None,
                fs_type: Some(fs_type),
            }),
        }
    }

    fn lvm(name: Option<&str>, lvs: Vec<(&str, &str, u64)>) -> PartitionCustomization {
        PartitionCustomization {
            minsize: Size(0),
            part_type: None,
            part_label: None,
            part_uuid: None,
            payload: PartitionPayload::Lvm(VgCustomization {
                name: name.map(str::to_string),
                logical_volumes: lvs
                    .into_iter()
                    .map(|(name, mp, size)| LvCustomization {
                        name: Some(name.to_string()),
                        minsize: Size(size),
                        fs: FilesystemTypedCustomization {
                            mountpoint: Some(mp.into()),
                            label: None,
                            fs_type: Some(FsType::Xfs),
                        },
                    })
                    .collect(),
            }),
        }
    }

    fn custom_options(boot_mode: BootMode) -> CustomPartitionTableOptions {
        CustomPartitionTableOptions {
            boot_mode,
            default_fs_type: Some(FsType::Xfs),
            arch: Some(Arch::X86_64),
            ..Default::default()
        }
    }

    #[test]
    fn test_custom_boot_and_lvm_root() -> Result<()> {
        let disk = DiskCustomization {
            partitions: vec![
                plain("/boot", FsType::Xfs, 500 * MIB),
                lvm(Some("vg"), vec![("rootlv", "/", 5 * GIB)]),
            ],
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(0);
        let pt = new_custom_partition_table(&disk, &custom_options(BootMode::None), &mut rng)?;
        check_layout(&pt);
        assert_eq!(pt.partitions.len(), 2);
        assert!(pt.size >= 5 * GIB + 500 * MIB);
        let root = pt.find("/").unwrap();
        assert!(matches!(root, EntityPath::LogicalVolume(1, 0)));
        assert_eq!(pt.mountable(root).unwrap().label(), Some("root"));
        let paths: Vec<_> = pt.fstab_entries().into_iter().map(|e| e.path).collect();
        assert_eq!(paths, vec!["/boot", "/"]);
        assert_eq!(pt.partitions[0].part_type, XBOOTLDR_PARTITION_GUID);
        assert_eq!(pt.partitions[1].part_type, LVM_PARTITION_GUID);

        let bad = DiskCustomization {
            partitions: vec![lvm(None, vec![("rootlv", "/", GIB), ("bootlv", "/boot", GIB)])],
            ..Default::default()
        };
        let e = new_custom_partition_table(&bad, &custom_options(BootMode::None), &mut rng)
            .unwrap_err();
        assert_eq!(
            ImageError::kind_of(&e),
            Some(&ImageError::LayoutError("/boot may not live on LVM".into()))
        );
        Ok(())
    }

    #[test]
    fn test_custom_generated_root_and_boot() -> Result<()> {
        let disk = DiskCustomization {
            partitions: vec![lvm(None, vec![("homelv", "/home", 2 * GIB)])],
            ..Default::default()
        };
        let mut options = custom_options(BootMode::Hybrid);
        options.required_min_sizes = default_required_sizes();
        let mut rng = StdRng::seed_from_u64(1);
        let pt = new_custom_partition_table(&disk, &options, &mut rng)?;
        check_layout(&pt);
        // BIOS boot, ESP, /boot, volume group
        assert_eq!(pt.partitions.len(), 4);
        assert_eq!(pt.partitions[0].uuid.as_deref(), Some(BIOS_BOOT_PARTITION_UUID));
        let esp = pt.find("/boot/efi").unwrap();
        assert_eq!(pt.mountable(esp).unwrap().uuid(), Some(EFI_FILESYSTEM_UUID));
        assert_eq!(pt.partitions[2].size, GIB);
        let Some(Payload::Lvm(vg)) = &pt.partitions[3].payload else {
            panic!("expected a volume group");
        };
        assert_eq!(vg.name, "vg00");
        let root = &vg.logical_volumes[1];
        assert_eq!(root.name, "rootlv");
        assert_eq!(root.size, 3 * GIB);
        assert_eq!(root.filesystem().unwrap().label.as_deref(), Some("root"));
        Ok(())
    }

    #[test]
    fn test_custom_plain_root_created() -> Result<()> {
        let disk = DiskCustomization {
            partitions: vec![plain("/data", FsType::Ext4, GIB)],
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(0);
        let pt = new_custom_partition_table(&disk, &custom_options(BootMode::Uefi), &mut rng)?;
        check_layout(&pt);
        let root = pt.find("/").unwrap();
        assert_eq!(root, EntityPath::Partition(2));
        assert_eq!(pt.partitions[2].part_type, ROOT_PARTITION_X86_64_GUID);
        assert_eq!(pt.mountable(root).unwrap().fs_type(), "xfs");
        assert!(pt.features().ext4);

        let e = new_custom_partition_table(
            &disk,
            &CustomPartitionTableOptions::default(),
            &mut rng,
        )
        .unwrap_err();
        assert!(format!("{:#}", e).contains("no default filesystem type"));
        Ok(())
    }

    #[test]
    fn test_custom_dos_limit() {
        let disk = DiskCustomization {
            pt_type: Some(PartitionTableType::Dos),
            partitions: vec![
                plain("/", FsType::Xfs, GIB),
                plain("/home", FsType::Xfs, GIB),
                plain("/srv", FsType::Xfs, GIB),
                plain("/var", FsType::Xfs, GIB),
            ],
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(0);
        let pt = new_custom_partition_table(&disk, &custom_options(BootMode::None), &mut rng)
            .unwrap();
        assert_eq!(pt.partitions.len(), 4);
        assert!(pt.uuid.is_none());
        let e = new_custom_partition_table(&disk, &custom_options(BootMode::Legacy), &mut rng)
            .unwrap_err();
        let Some(ImageError::LayoutError(msg)) = ImageError::kind_of(&e) else {
            panic!("unexpected error {:#}", e);
        };
        assert!(msg.contains("got 5 after creating the partition table"));
    }

    #[test]
    fn test_directory_sizes_walk_parents() -> Result<()> {
        let mut pt = base_gpt();
        pt.ensure_directory_sizes(&BTreeMap::from([
            ("/boot/loader".to_string(), GIB),
            ("/var/lib".to_string(), 3 * GIB),
        ]))?;
        assert_eq!(pt.partitions[2].size, GIB);
        assert_eq!(pt.partitions[3].size, 3 * GIB);
        assert!(pt
            .ensure_directory_sizes(&BTreeMap::from([("relative".to_string(), GIB)]))
            .is_err());
        Ok(())
    }
}
