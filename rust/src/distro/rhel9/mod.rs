// SPDX-License-Identifier: Apache-2.0 OR MIT

//! RHEL 9 and CentOS Stream 9.

use anyhow::Result;
use maplit::btreemap;
use std::collections::BTreeMap;

use crate::datasizes::GIB;
use crate::imageconfig::{ImageConfig, SubscriptionStatus};
use crate::manifest::templates;
use crate::osbuild::{
    ChronyStageOptions, DnfPluginConfig, ImageFormat, RhsmConfig, RhsmDnfPlugins,
    RhsmStageOptions, RhsmSubscriptionManager, SshdConfig, SshdConfigStageOptions,
    SysconfigKernel, SysconfigNetwork, SysconfigStageOptions,
};
use crate::platform::{Arch, BootMode};
use crate::registry::{Architecture, Distro, ImageType, PackageSetFn};

mod package_sets;
mod partition_tables;

use package_sets as ps;

const CLOUD_KERNEL_OPTIONS: &str =
    "console=tty0 console=ttyS0,115200n8 no_timer_check net.ifnames=0 crashkernel=auto";
const EC2_KERNEL_OPTIONS: &str =
    "console=ttyS0,115200n8 console=tty0 net.ifnames=0 rd.blacklist=nouveau nvme_core.io_timeout=4294967295 crashkernel=auto";
const VHD_KERNEL_OPTIONS: &str =
    "ro crashkernel=auto console=tty1 console=ttyS0 earlyprintk=ttyS0 rootdelay=300";

const EDGE_SERVICES: &[&str] = &[
    "NetworkManager.service",
    "firewalld.service",
    "sshd.service",
    "fdo-client-linuxapp.service",
];

const OSCAP_PROFILES: &[&str] = &[
    "xccdf_org.ssgproject.content_profile_anssi_bp28_enhanced",
    "xccdf_org.ssgproject.content_profile_anssi_bp28_high",
    "xccdf_org.ssgproject.content_profile_anssi_bp28_intermediary",
    "xccdf_org.ssgproject.content_profile_anssi_bp28_minimal",
    "xccdf_org.ssgproject.content_profile_cis",
    "xccdf_org.ssgproject.content_profile_cis_server_l1",
    "xccdf_org.ssgproject.content_profile_cis_workstation_l1",
    "xccdf_org.ssgproject.content_profile_cis_workstation_l2",
    "xccdf_org.ssgproject.content_profile_cui",
    "xccdf_org.ssgproject.content_profile_e8",
    "xccdf_org.ssgproject.content_profile_hipaa",
    "xccdf_org.ssgproject.content_profile_ism_o",
    "xccdf_org.ssgproject.content_profile_ospp",
    "xccdf_org.ssgproject.content_profile_pci-dss",
    "xccdf_org.ssgproject.content_profile_stig",
    "xccdf_org.ssgproject.content_profile_stig_gui",
];

/// Release-specific values of one member of the family.
struct Release {
    name: &'static str,
    product: &'static str,
    os_version: &'static str,
    vendor: &'static str,
    ostree_ref: &'static str,
    isolabel: &'static str,
    runner: &'static str,
}

const RHEL_9: Release = Release {
    name: "rhel-9",
    product: "Red Hat Enterprise Linux",
    os_version: "9.4",
    vendor: "redhat",
    ostree_ref: "rhel/9/{arch}/edge",
    isolabel: "RHEL-9-4-0-BaseOS-{arch}",
    runner: "org.osbuild.rhel94",
};

const CENTOS_9: Release = Release {
    name: "centos-9",
    product: "CentOS Stream",
    os_version: "9-stream",
    vendor: "centos",
    ostree_ref: "centos/9/{arch}/edge",
    isolabel: "CentOS-Stream-9-BaseOS-{arch}",
    runner: "org.osbuild.centos9",
};

pub fn new_rhel9() -> Result<Distro> {
    new_distro(&RHEL_9)
}

pub fn new_centos9() -> Result<Distro> {
    new_distro(&CENTOS_9)
}

fn default_distro_config() -> ImageConfig {
    ImageConfig {
        timezone: Some("America/New_York".to_string()),
        locale: Some("C.UTF-8".to_string()),
        sysconfig: Some(SysconfigStageOptions {
            kernel: Some(SysconfigKernel {
                update_default: true,
                default_kernel: "kernel".to_string(),
            }),
            network: Some(SysconfigNetwork {
                networking: true,
                no_zero_conf: true,
            }),
        }),
        ..Default::default()
    }
}

fn rhsm(enabled: bool) -> RhsmStageOptions {
    RhsmStageOptions {
        dnf_plugins: Some(RhsmDnfPlugins {
            product_id: Some(DnfPluginConfig { enabled }),
            subscription_manager: Some(DnfPluginConfig { enabled }),
        }),
        subscription_manager: Some(RhsmSubscriptionManager {
            rhsm: Some(RhsmConfig {
                manage_repos: enabled,
            }),
            rhsmcertd: None,
        }),
    }
}

/// Plugins stay off until the image is registered.
fn cloud_config() -> ImageConfig {
    ImageConfig {
        rhsm_config: Some(btreemap! {
            SubscriptionStatus::Subscribed => rhsm(true),
            SubscriptionStatus::Unsubscribed => rhsm(false),
        }),
        ..Default::default()
    }
}

fn ec2_config() -> ImageConfig {
    ImageConfig {
        timezone: Some("UTC".to_string()),
        time_synchronization: Some(ChronyStageOptions::with_servers(&["169.254.169.123"])),
        sshd_config: Some(SshdConfigStageOptions {
            config: SshdConfig {
                password_authentication: Some(false),
                ..Default::default()
            },
        }),
        default_target: Some("multi-user.target".to_string()),
        ..cloud_config()
    }
}

fn edge_config() -> ImageConfig {
    ImageConfig {
        enabled_services: Some(EDGE_SERVICES.iter().map(|s| s.to_string()).collect()),
        ..Default::default()
    }
}

fn sets(entries: &[(&'static str, PackageSetFn)]) -> BTreeMap<&'static str, PackageSetFn> {
    entries.iter().copied().collect()
}

fn pipelines(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn disk_type(
    name: &str,
    filename: &str,
    mime: &str,
    format: ImageFormat,
    kernel_options: &str,
) -> ImageType {
    let mut t = ImageType::new(name, filename, mime, templates::disk_image);
    t.image_format = format;
    t.kernel_options = kernel_options.to_string();
    t.default_size = 10 * GIB;
    t.bootable = true;
    t.base_partition_tables = partition_tables::default_base_partition_tables();
    let mut payload = vec!["os", "image"];
    if format.needs_conversion() {
        payload.push(format.as_str());
    }
    t.payload_pipelines = pipelines(&payload);
    t.exports = vec![payload[payload.len() - 1].to_string()];
    t
}

fn qcow2() -> ImageType {
    let mut t = disk_type(
        "qcow2",
        "disk.qcow2",
        "application/x-qemu-disk",
        ImageFormat::Qcow2,
        CLOUD_KERNEL_OPTIONS,
    );
    t.package_sets = sets(&[("build", ps::build), ("os", ps::qcow2)]);
    t.default_image_config = Some(cloud_config());
    t
}

fn oci() -> ImageType {
    let mut t = qcow2();
    t.name = "oci".to_string();
    t
}

fn openstack() -> ImageType {
    let mut t = disk_type(
        "openstack",
        "disk.qcow2",
        "application/x-qemu-disk",
        ImageFormat::Qcow2,
        "ro net.ifnames=0",
    );
    t.default_size = 4 * GIB;
    t.package_sets = sets(&[("build", ps::build), ("os", ps::openstack)]);
    t
}

fn vhd() -> ImageType {
    let mut t = disk_type(
        "vhd",
        "disk.vhd",
        "application/x-vhd",
        ImageFormat::Vpc,
        VHD_KERNEL_OPTIONS,
    );
    t.default_size = 4 * GIB;
    t.package_sets = sets(&[("build", ps::build), ("os", ps::vhd)]);
    t.default_image_config = Some(ImageConfig {
        sshd_config: Some(SshdConfigStageOptions {
            config: SshdConfig {
                client_alive_interval: Some(180),
                ..Default::default()
            },
        }),
        ..cloud_config()
    });
    t
}

fn vmdk() -> ImageType {
    let mut t = disk_type(
        "vmdk",
        "disk.vmdk",
        "application/x-vmdk",
        ImageFormat::Vmdk,
        "ro net.ifnames=0",
    );
    t.default_size = 4 * GIB;
    t.package_sets = sets(&[("build", ps::build), ("os", ps::vmdk)]);
    t
}

fn ami(arch: Arch) -> ImageType {
    let mut t = disk_type(
        "ami",
        "image.raw",
        "application/octet-stream",
        ImageFormat::Raw,
        EC2_KERNEL_OPTIONS,
    );
    // EC2 boots x86_64 instances through BIOS, aarch64 only through UEFI.
    t.boot_type_override = (arch == Arch::X86_64).then_some(BootMode::Legacy);
    t.package_sets = sets(&[("build", ps::ec2_build), ("os", ps::ec2)]);
    t.default_image_config = Some(ec2_config());
    t
}

fn tar() -> ImageType {
    let mut t = ImageType::new("tar", "root.tar.xz", "application/x-tar", templates::tar_image);
    t.payload_pipelines = pipelines(&["os", "archive"]);
    t.exports = pipelines(&["archive"]);
    t.package_sets = sets(&[("build", ps::build), ("os", ps::tar)]);
    t
}

fn image_installer() -> ImageType {
    let mut t = ImageType::new(
        "image-installer",
        "installer.iso",
        "application/x-iso9660-image",
        templates::image_installer,
    );
    t.image_format = ImageFormat::Iso;
    t.bootable = true;
    t.boot_iso = true;
    t.payload_pipelines = pipelines(&["os", "anaconda-tree", "bootiso-tree", "bootiso"]);
    t.exports = pipelines(&["bootiso"]);
    t.package_sets = sets(&[
        ("build", ps::anaconda_build),
        ("os", ps::bare_metal),
        ("anaconda-tree", ps::anaconda),
    ]);
    t
}

fn edge_commit() -> ImageType {
    let mut t = ImageType::new("edge-commit", "commit.tar", "application/x-tar", templates::edge_commit);
    t.aliases = vec!["rhel-edge-commit".to_string()];
    t.rpm_ostree = true;
    t.image_format = ImageFormat::Tar;
    t.payload_pipelines = pipelines(&["ostree-tree", "ostree-commit", "commit-archive"]);
    t.exports = pipelines(&["commit-archive"]);
    t.package_sets = sets(&[("build", ps::edge_build), ("ostree-tree", ps::edge_commit)]);
    t.default_image_config = Some(edge_config());
    t
}

fn edge_container() -> ImageType {
    let mut t = ImageType::new(
        "edge-container",
        "container.tar",
        "application/x-tar",
        templates::edge_container,
    );
    t.aliases = vec!["rhel-edge-container".to_string()];
    t.rpm_ostree = true;
    t.image_format = ImageFormat::Tar;
    t.payload_pipelines = pipelines(&[
        "ostree-tree",
        "ostree-commit",
        "container-tree",
        "container",
    ]);
    t.exports = pipelines(&["container"]);
    t.package_sets = sets(&[
        ("build", ps::edge_build),
        ("ostree-tree", ps::edge_commit),
        ("container-tree", ps::edge_container),
    ]);
    t.default_image_config = Some(edge_config());
    t
}

fn edge_installer() -> ImageType {
    let mut t = ImageType::new(
        "edge-installer",
        "installer.iso",
        "application/x-iso9660-image",
        templates::edge_installer,
    );
    t.aliases = vec!["rhel-edge-installer".to_string()];
    t.rpm_ostree = true;
    t.boot_iso = true;
    t.image_format = ImageFormat::Iso;
    t.payload_pipelines = pipelines(&["anaconda-tree", "bootiso-tree", "bootiso"]);
    t.exports = pipelines(&["bootiso"]);
    t.package_sets = sets(&[
        ("build", ps::edge_installer_build),
        ("anaconda-tree", ps::anaconda),
    ]);
    t
}

fn edge_raw_image() -> ImageType {
    let mut t = ImageType::new(
        "edge-raw-image",
        "image.raw.xz",
        "application/xz",
        templates::edge_raw_image,
    );
    t.aliases = vec!["rhel-edge-raw-image".to_string()];
    t.rpm_ostree = true;
    t.bootable = true;
    t.default_size = 10 * GIB;
    t.kernel_options = "modprobe.blacklist=vc4".to_string();
    t.payload_pipelines = pipelines(&["image-tree", "image", "archive"]);
    t.exports = pipelines(&["archive"]);
    t.package_sets = sets(&[("build", ps::edge_raw_image_build)]);
    t.base_partition_tables = partition_tables::edge_base_partition_tables();
    t
}

fn edge_simplified_installer() -> ImageType {
    let mut t = ImageType::new(
        "edge-simplified-installer",
        "simplified-installer.iso",
        "application/x-iso9660-image",
        templates::edge_simplified_installer,
    );
    t.aliases = vec!["rhel-edge-simplified-installer".to_string()];
    t.rpm_ostree = true;
    t.bootable = true;
    t.boot_iso = true;
    t.image_format = ImageFormat::Iso;
    t.default_size = 10 * GIB;
    t.kernel_options = "modprobe.blacklist=vc4 coreos.no_persist_ip".to_string();
    t.payload_pipelines = pipelines(&[
        "image-tree",
        "image",
        "xz",
        "coi-tree",
        "efiboot-tree",
        "bootiso-tree",
        "bootiso",
    ]);
    t.exports = pipelines(&["bootiso"]);
    t.package_sets = sets(&[
        ("build", ps::edge_simplified_installer_build),
        ("coi-tree", ps::coreos_installer),
    ]);
    t.base_partition_tables = partition_tables::edge_base_partition_tables();
    t
}

fn new_distro(r: &Release) -> Result<Distro> {
    let mut d = Distro {
        name: r.name.to_string(),
        product: r.product.to_string(),
        os_version: r.os_version.to_string(),
        release_version: "9".to_string(),
        module_platform_id: "platform:el9".to_string(),
        vendor: r.vendor.to_string(),
        ostree_ref_template: r.ostree_ref.to_string(),
        isolabel_template: r.isolabel.to_string(),
        runner: r.runner.to_string(),
        default_image_config: default_distro_config(),
        oscap_profiles: OSCAP_PROFILES,
        arches: BTreeMap::new(),
    };

    let mut x86_64 = Architecture::new(Arch::X86_64, BootMode::Hybrid);
    x86_64.legacy_platform = Some("i386-pc".to_string());
    x86_64.uefi_vendor = Some(r.vendor.to_string());
    x86_64.build_packages = vec!["grub2-pc".to_string()];
    x86_64.add_image_types([
        qcow2(),
        oci(),
        openstack(),
        vhd(),
        vmdk(),
        ami(Arch::X86_64),
        tar(),
        image_installer(),
        edge_commit(),
        edge_container(),
        edge_installer(),
        edge_raw_image(),
        edge_simplified_installer(),
    ])?;

    let mut aarch64 = Architecture::new(Arch::Aarch64, BootMode::Uefi);
    aarch64.uefi_vendor = Some(r.vendor.to_string());
    aarch64.add_image_types([
        qcow2(),
        oci(),
        openstack(),
        ami(Arch::Aarch64),
        tar(),
        image_installer(),
        edge_commit(),
        edge_container(),
        edge_installer(),
        edge_raw_image(),
        edge_simplified_installer(),
    ])?;

    let mut ppc64le = Architecture::new(Arch::Ppc64le, BootMode::Legacy);
    ppc64le.legacy_platform = Some("powerpc-ieee1275".to_string());
    ppc64le.build_packages = vec!["grub2-ppc64le".to_string(), "grub2-ppc64le-modules".to_string()];
    ppc64le.add_image_types([qcow2(), tar()])?;

    let mut s390x = Architecture::new(Arch::S390x, BootMode::Legacy);
    s390x.add_image_types([qcow2(), tar()])?;

    for arch in [x86_64, aarch64, ppc64le, s390x] {
        d.add_arch(arch)?;
    }
    Ok(d)
}
