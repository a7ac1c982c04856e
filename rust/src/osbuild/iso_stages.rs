// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Stages for the installer runtime tree and the bootable ISO built from
//! it.

use serde_derive::Serialize;
use std::collections::BTreeMap;

use super::{
    CopyStageOptions, CopyStagePath, Device, Input, MkfsFatStageOptions, Mount, Stage,
    TruncateStageOptions,
};
use crate::datasizes::MIB;

/// Path of the EFI boot image inside the ISO tree.
pub const EFIBOOT_IMAGE: &str = "images/efiboot.img";
const EFIBOOT_SIZE: u64 = 20 * MIB;
const EFIBOOT_VOLID: &str = "7B7795E7";

/// Where kernel and initrd live in the ISO tree.
pub const PXEBOOT_DIR: &str = "/images/pxeboot";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildstampStageOptions {
    pub arch: String,
    pub product: String,
    pub version: String,
    #[serde(rename = "final")]
    pub is_final: bool,
    pub variant: String,
    pub bugurl: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnacondaStageOptions {
    #[serde(rename = "activatable-modules")]
    pub activatable_modules: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoraxScriptStageOptions {
    pub path: String,
    pub basearch: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DracutStageOptions {
    pub kernel: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub modules: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub add_modules: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub install: Vec<String>,
}

/// Writes the FDO device-initialization root certificates into the
/// installer initrd.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FdoStageOptions {
    /// Name of the input holding the certificates.
    pub rootcerts: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SquashfsStageOptions {
    pub filename: String,
    pub compression: SquashfsCompression,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SquashfsCompression {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<SquashfsCompressionOptions>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SquashfsCompressionOptions {
    pub bcj: String,
}

/// Compress the tree of `pipeline` into `filename`; x86 builds get the
/// matching branch filter.
pub fn new_squashfs_stage(filename: &str, pipeline: &str, bcj: Option<&str>) -> Stage {
    Stage::new(
        "org.osbuild.squashfs",
        SquashfsStageOptions {
            filename: filename.to_string(),
            compression: SquashfsCompression {
                method: "xz".to_string(),
                options: bcj.map(|b| SquashfsCompressionOptions { bcj: b.to_string() }),
            },
        },
    )
    .with_input("tree", Input::tree(pipeline))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IsoProduct {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IsoKernel {
    pub dir: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub opts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IsolinuxStageOptions {
    pub product: IsoProduct,
    pub kernel: IsoKernel,
}

/// Legacy BIOS boot menu, with syslinux files taken from `pipeline`.
pub fn new_isolinux_stage(options: IsolinuxStageOptions, pipeline: &str) -> Stage {
    Stage::new("org.osbuild.isolinux", options).with_input("data", Input::tree(pipeline))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Grub2IsoStageOptions {
    pub product: IsoProduct,
    pub kernel: IsoKernel,
    pub isolabel: String,
    pub architectures: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscinfoStageOptions {
    pub basearch: String,
    pub release: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct XorrisofsStageOptions {
    pub filename: String,
    pub volid: String,
    pub sysid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot: Option<XorrisofsBoot>,
    pub efi: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isohybridmbr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isolevel: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct XorrisofsBoot {
    pub image: String,
    pub catalog: String,
}

impl XorrisofsStageOptions {
    pub fn new(filename: &str, volid: &str, legacy: bool) -> Self {
        Self {
            filename: filename.to_string(),
            volid: volid.to_string(),
            sysid: "LINUX".to_string(),
            boot: legacy.then(|| XorrisofsBoot {
                image: "isolinux/isolinux.bin".to_string(),
                catalog: "isolinux/boot.cat".to_string(),
            }),
            efi: EFIBOOT_IMAGE.to_string(),
            isohybridmbr: legacy.then(|| "/usr/share/syslinux/isohdpfx.bin".to_string()),
            isolevel: Some(3),
        }
    }
}

/// Master the ISO from the tree of `pipeline`.
pub fn new_xorrisofs_stage(options: XorrisofsStageOptions, pipeline: &str) -> Stage {
    Stage::new("org.osbuild.xorrisofs", options).with_input("tree", Input::tree(pipeline))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImplantIsomd5StageOptions {
    pub filename: String,
}

/// EFI directory of an installed tree.
pub const TREE_EFI_DIR: &str = "boot/efi/EFI";

/// Create the FAT image holding the EFI bootloader, filled from the
/// `efi_dir` directory of `pipeline`, and copy the same directory into
/// the root of the ISO tree.
pub fn gen_efiboot_stages(pipeline: &str, efi_dir: &str) -> Vec<Stage> {
    let mut devices = BTreeMap::new();
    devices.insert(
        "device".to_string(),
        Device::loopback(EFIBOOT_IMAGE, 0, 0, false),
    );
    let mkfs = Stage::new(
        "org.osbuild.mkfs.fat",
        MkfsFatStageOptions {
            volid: EFIBOOT_VOLID.to_string(),
            label: None,
            fat_size: None,
        },
    )
    .with_devices(devices);

    let mut devices = BTreeMap::new();
    devices.insert("-".to_string(), Device::loopback(EFIBOOT_IMAGE, 0, 0, false));
    let mount = Mount {
        name: "-".to_string(),
        mount_type: "org.osbuild.fat".to_string(),
        source: "-".to_string(),
        target: "/".to_string(),
        options: None,
    };
    let efi_dir = format!("input://root-tree/{}", efi_dir.trim_start_matches('/'));
    let fill = Stage::new(
        "org.osbuild.copy",
        CopyStageOptions {
            paths: vec![CopyStagePath {
                from: efi_dir.clone(),
                to: "mount://-/".to_string(),
                remove_destination: false,
            }],
        },
    )
    .with_input("root-tree", Input::tree(pipeline))
    .with_devices(devices)
    .with_mounts(vec![mount]);

    let tree_copy = Stage::new(
        "org.osbuild.copy",
        CopyStageOptions {
            paths: vec![CopyStagePath {
                from: efi_dir,
                to: "tree:///".to_string(),
                remove_destination: false,
            }],
        },
    )
    .with_input("root-tree", Input::tree(pipeline));

    vec![
        Stage::new(
            "org.osbuild.truncate",
            TruncateStageOptions {
                filename: EFIBOOT_IMAGE.to_string(),
                size: EFIBOOT_SIZE.to_string(),
            },
        ),
        mkfs,
        fill,
        tree_copy,
    ]
}

/// Copy the installer kernel and initrd of `pipeline` into the pxeboot
/// directory.
pub fn new_pxeboot_copy_stage(pipeline: &str, kernel_ver: &str) -> Stage {
    Stage::new(
        "org.osbuild.copy",
        CopyStageOptions {
            paths: vec![
                CopyStagePath {
                    from: format!("input://tree/boot/vmlinuz-{}", kernel_ver),
                    to: format!("tree://{}/vmlinuz", PXEBOOT_DIR),
                    remove_destination: false,
                },
                CopyStagePath {
                    from: format!("input://tree/boot/initramfs-{}.img", kernel_ver),
                    to: format!("tree://{}/initrd.img", PXEBOOT_DIR),
                    remove_destination: false,
                },
            ],
        },
    )
    .with_input("tree", Input::tree(pipeline))
}
