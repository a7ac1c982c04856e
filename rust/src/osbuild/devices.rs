// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Devices and mounts that give stages access to the partitions, volumes and
//! filesystems inside a disk image file.

use anyhow::Result;
use serde_derive::Serialize;
use std::collections::BTreeMap;

use crate::disk::{EntityPath, LvPayload, Mountable, PartitionTable, Payload};
use crate::error::{internal, layout_error};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    #[serde(rename = "type")]
    pub device_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub options: DeviceOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DeviceOptions {
    Loopback(LoopbackDeviceOptions),
    Lvm2Lv(Lvm2LvDeviceOptions),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoopbackDeviceOptions {
    pub filename: String,
    /// Offset in sectors.
    #[serde(skip_serializing_if = "is_zero")]
    pub start: u64,
    /// Size in sectors.
    #[serde(skip_serializing_if = "is_zero")]
    pub size: u64,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub lock: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lvm2LvDeviceOptions {
    pub volume: String,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

impl Device {
    pub fn loopback(filename: &str, start: u64, size: u64, lock: bool) -> Self {
        Self {
            device_type: "org.osbuild.loopback".to_string(),
            parent: None,
            options: DeviceOptions::Loopback(LoopbackDeviceOptions {
                filename: filename.to_string(),
                start,
                size,
                lock,
            }),
        }
    }

    pub fn lvm2_lv(parent: &str, volume: &str) -> Self {
        Self {
            device_type: "org.osbuild.lvm2.lv".to_string(),
            parent: Some(parent.to_string()),
            options: DeviceOptions::Lvm2Lv(Lvm2LvDeviceOptions {
                volume: volume.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mount {
    pub name: String,
    #[serde(rename = "type")]
    pub mount_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<MountOptions>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MountOptions {
    Btrfs(BtrfsMountOptions),
    OstreeDeployment(OstreeDeploymentMountOptions),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BtrfsMountOptions {
    pub subvol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compress: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OstreeDeploymentMountOptions {
    pub deployment: OstreeDeployment,
}

/// Identifies a deployment in an ostree sysroot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OstreeDeployment {
    pub osname: String,
    #[serde(rename = "ref")]
    pub reference: String,
}

impl OstreeDeployment {
    pub fn new(osname: &str, reference: &str) -> Self {
        Self {
            osname: osname.to_string(),
            reference: reference.to_string(),
        }
    }
}

impl Mount {
    /// Run a stage inside the deployment of `reference` rather than the
    /// bare sysroot.
    pub fn ostree_deployment(osname: &str, reference: &str) -> Self {
        Self {
            name: "ostree.deployment".to_string(),
            mount_type: "org.osbuild.ostree.deployment".to_string(),
            source: String::new(),
            target: String::new(),
            options: Some(MountOptions::OstreeDeployment(OstreeDeploymentMountOptions {
                deployment: OstreeDeployment::new(osname, reference),
            })),
        }
    }
}

/// Escape a mountpoint the way `systemd-escape --path` does.
pub fn path_escape(path: &str) -> String {
    if path.is_empty() || path == "/" {
        return "-".to_string();
    }
    path.trim_matches('/')
        .replace('\\', "\\x5c")
        .replace('-', "\\x2d")
        .replace('/', "-")
}

fn mount_for(source: &str, m: &Mountable<'_>) -> Result<Mount> {
    let target = m.mountpoint();
    let (mount_type, options) = match (m.fs_type(), m) {
        ("xfs", _) => ("org.osbuild.xfs", None),
        ("ext4", _) => ("org.osbuild.ext4", None),
        ("vfat", _) => ("org.osbuild.fat", None),
        ("btrfs", Mountable::Subvolume(_, sv)) => (
            "org.osbuild.btrfs",
            Some(MountOptions::Btrfs(BtrfsMountOptions {
                subvol: sv.name.clone(),
                compress: sv.compress.clone(),
            })),
        ),
        ("btrfs", _) => {
            return Err(layout_error(format!(
                "mounting bare btrfs partition is unsupported: {}",
                target
            )))
        }
        (t, _) => return Err(layout_error(format!("unknown fs type {}", t))),
    };
    Ok(Mount {
        name: path_escape(target),
        mount_type: mount_type.to_string(),
        source: source.to_string(),
        target: target.to_string(),
        options,
    })
}

/// The name of the device exposing a partition's payload.
fn payload_device_name(payload: Option<&Payload>) -> Result<String> {
    Ok(match payload {
        Some(Payload::Filesystem(fs)) => path_escape(&fs.mountpoint),
        Some(Payload::Swap(_)) => "swap".to_string(),
        Some(Payload::Lvm(vg)) => vg.name.clone(),
        Some(Payload::Btrfs(b)) => {
            let uuid = b
                .uuid
                .as_deref()
                .ok_or_else(|| internal("btrfs volume without uuid"))?;
            format!("btrfs-{}", &uuid[..4.min(uuid.len())])
        }
        None => return Err(internal("partition without payload has no device")),
    })
}

/// The devices needed to reach the entity at `path`, and the name of the
/// innermost one.
pub fn get_devices(
    pt: &PartitionTable,
    path: EntityPath,
    filename: &str,
    lock: bool,
) -> Result<(BTreeMap<String, Device>, String)> {
    let part = pt
        .partitions
        .get(path.partition())
        .ok_or_else(|| internal("entity path outside of partition table"))?;
    let mut devices = BTreeMap::new();
    let mut name = payload_device_name(part.payload.as_ref())?;
    devices.insert(
        name.clone(),
        Device::loopback(
            filename,
            pt.bytes_to_sectors(part.start),
            pt.bytes_to_sectors(part.size),
            lock,
        ),
    );
    if let EntityPath::LogicalVolume(_, j) = path {
        let Some(Payload::Lvm(vg)) = &part.payload else {
            return Err(internal("logical volume path into a non-LVM partition"));
        };
        let lv = vg
            .logical_volumes
            .get(j)
            .ok_or_else(|| internal("logical volume index out of range"))?;
        let lv_name = match &lv.payload {
            LvPayload::Filesystem(fs) => path_escape(&fs.mountpoint),
            LvPayload::Swap(_) => lv.name.clone(),
        };
        devices.insert(lv_name.clone(), Device::lvm2_lv(&name, &lv.name));
        name = lv_name;
    }
    Ok((devices, name))
}

/// Like [`get_devices`], with the innermost device renamed to `device` as
/// the formatting stages expect.
pub(crate) fn get_stage_devices(
    pt: &PartitionTable,
    path: EntityPath,
    filename: &str,
) -> Result<BTreeMap<String, Device>> {
    let (mut devices, last) = get_devices(pt, path, filename, true)?;
    if let Some(dev) = devices.remove(&last) {
        devices.insert("device".to_string(), dev);
    }
    Ok(devices)
}

/// Mounts for every mountable in the table, sorted so parents come before
/// their children, plus the devices they need.
pub fn gen_mounts_devices(
    filename: &str,
    pt: &PartitionTable,
) -> Result<(String, Vec<Mount>, BTreeMap<String, Device>)> {
    let mut devices: BTreeMap<String, Device> = BTreeMap::new();
    let mut mounts = Vec::new();
    let mut root = None;
    for (path, m) in pt.mountables() {
        let (stage_devices, leaf) = get_devices(pt, path, filename, false)?;
        let mount = mount_for(&leaf, &m)?;
        if m.mountpoint() == "/" {
            root = Some(mount.name.clone());
        }
        mounts.push(mount);
        for (name, dev) in stage_devices {
            if let Some(existing) = devices.get(&name) {
                if *existing != dev {
                    return Err(internal(format!(
                        "the device name {:?} has been generated for two different devices",
                        name
                    )));
                }
            }
            devices.insert(name, dev);
        }
    }
    mounts.sort_by(|a, b| a.target.cmp(&b.target));
    let root = root.ok_or_else(|| internal("no mount found for the filesystem root"))?;
    Ok((root, mounts, devices))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasizes::{GIB, MIB};
    use crate::disk::{Filesystem, LvPayload, Partition, VolumeGroup};
    use serde_json::json;

    #[test]
    fn test_path_escape() {
        assert_eq!(path_escape("/"), "-");
        assert_eq!(path_escape(""), "-");
        assert_eq!(path_escape("/boot/efi"), "boot-efi");
        assert_eq!(path_escape("/var/my-data/"), "var-my\\x2ddata");
    }

    fn table() -> PartitionTable {
        let mut boot = Filesystem::new("xfs", "/boot");
        boot.uuid = Some("b".into());
        let mut vg = VolumeGroup::new("rootvg");
        let mut root = Filesystem::new("xfs", "/");
        root.uuid = Some("r".into());
        vg.create_logical_volume(Some("rootlv"), 2 * GIB, LvPayload::Filesystem(root))
            .unwrap();
        PartitionTable {
            size: 4 * GIB,
            partitions: vec![
                Partition {
                    start: MIB,
                    size: GIB,
                    payload: Some(Payload::Filesystem(boot)),
                    ..Default::default()
                },
                Partition {
                    start: GIB + MIB,
                    size: 2 * GIB,
                    payload: Some(Payload::Lvm(vg)),
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_lvm_devices() {
        let pt = table();
        let (devs, last) = get_devices(&pt, EntityPath::LogicalVolume(1, 0), "disk.raw", false).unwrap();
        assert_eq!(last, "-");
        assert_eq!(
            serde_json::to_value(&devs).unwrap(),
            json!({
                "-": {"type": "org.osbuild.lvm2.lv", "parent": "rootvg", "options": {"volume": "rootlv"}},
                "rootvg": {"type": "org.osbuild.loopback", "options": {"filename": "disk.raw", "start": 2099200, "size": 4194304}}
            })
        );
        let devs = get_stage_devices(&pt, EntityPath::Partition(0), "disk.raw").unwrap();
        assert_eq!(devs.keys().collect::<Vec<_>>(), vec!["device"]);
    }

    #[test]
    fn test_mounts() {
        let pt = table();
        let (root, mounts, devices) = gen_mounts_devices("disk.raw", &pt).unwrap();
        assert_eq!(root, "-");
        let targets: Vec<&str> = mounts.iter().map(|m| m.target.as_str()).collect();
        assert_eq!(targets, vec!["/", "/boot"]);
        assert_eq!(mounts[1].source, "boot");
        assert_eq!(devices.len(), 3);
    }

    #[test]
    fn test_ostree_deployment_mount() {
        let m = Mount::ostree_deployment("redhat", "rhel/9/x86_64/edge");
        assert_eq!(
            serde_json::to_value(&m).unwrap(),
            json!({
                "name": "ostree.deployment",
                "type": "org.osbuild.ostree.deployment",
                "options": {"deployment": {"osname": "redhat", "ref": "rhel/9/x86_64/edge"}}
            })
        );
    }
}
