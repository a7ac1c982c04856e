// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Package sets for the RHEL 9 family, keyed by the pipeline that installs
//! them. Each function has the [`PackageSetFn`](crate::registry::PackageSetFn)
//! shape so image types can store them directly.

use crate::platform::Arch;
use crate::registry::ImageTypeHandle;
use crate::rpmmd::PackageSet;

/// Build root for every image type.
pub(crate) fn build(t: &ImageTypeHandle<'_>) -> PackageSet {
    let ps = PackageSet::new(&[
        "dnf",
        "dosfstools",
        "e2fsprogs",
        "glibc",
        "lorax-templates-generic",
        "lorax-templates-rhel",
        "lvm2",
        "policycoreutils",
        "python3-iniparse",
        "qemu-img",
        "selinux-policy-targeted",
        "systemd",
        "tar",
        "xfsprogs",
        "xz",
    ]);
    ps.append(PackageSet::new(&t.arch.build_packages))
}

pub(crate) fn edge_build(t: &ImageTypeHandle<'_>) -> PackageSet {
    build(t).append(PackageSet::new(&["rpm-ostree"]))
}

pub(crate) fn edge_raw_image_build(t: &ImageTypeHandle<'_>) -> PackageSet {
    edge_build(t).append(boot(t))
}

pub(crate) fn installer_build(t: &ImageTypeHandle<'_>) -> PackageSet {
    build(t).append(PackageSet::new(&["isomd5sum", "xorriso"]))
}

pub(crate) fn anaconda_build(t: &ImageTypeHandle<'_>) -> PackageSet {
    PackageSet::new(&["squashfs-tools"])
        .append(installer_build(t))
        .append(anaconda_boot(t))
}

pub(crate) fn edge_installer_build(t: &ImageTypeHandle<'_>) -> PackageSet {
    anaconda_build(t).append(PackageSet::new(&["rpm-ostree"]))
}

pub(crate) fn edge_simplified_installer_build(t: &ImageTypeHandle<'_>) -> PackageSet {
    edge_raw_image_build(t)
        .append(installer_build(t))
        .append(anaconda_boot(t))
}

/// Bootloaders needed to master a hybrid ISO.
fn anaconda_boot(t: &ImageTypeHandle<'_>) -> PackageSet {
    let grub_common = [
        "grub2-tools",
        "grub2-tools-extra",
        "grub2-tools-minimal",
    ];
    let efi_common = ["efibootmgr"];
    match t.arch.arch {
        Arch::X86_64 => PackageSet::new(&grub_common)
            .append(PackageSet::new(&efi_common))
            .append(PackageSet::new(&[
                "grub2-efi-x64",
                "grub2-efi-x64-cdboot",
                "grub2-pc",
                "grub2-pc-modules",
                "shim-x64",
                "syslinux",
                "syslinux-nonlinux",
            ])),
        Arch::Aarch64 => PackageSet::new(&grub_common)
            .append(PackageSet::new(&efi_common))
            .append(PackageSet::new(&[
                "grub2-efi-aa64-cdboot",
                "grub2-efi-aa64",
                "shim-aa64",
            ])),
        Arch::Ppc64le | Arch::S390x => PackageSet::default(),
    }
}

/// Kernel support and bootloaders for the image's boot mode. Empty for
/// images that are not booted.
pub(crate) fn boot(t: &ImageTypeHandle<'_>) -> PackageSet {
    if !t.image_type.bootable {
        return PackageSet::default();
    }
    let mut ps = PackageSet::new(&["dracut-config-generic"]);
    let mode = t.boot_mode();
    match t.arch.arch {
        Arch::X86_64 => {
            if mode.has_legacy() {
                ps = ps.append(PackageSet::new(&["grub2-pc"]));
            }
            if mode.has_uefi() {
                ps = ps.append(PackageSet::new(&["efibootmgr", "grub2-efi-x64", "shim-x64"]));
            }
        }
        Arch::Aarch64 => {
            ps = ps.append(PackageSet::new(&[
                "efibootmgr",
                "grub2-efi-aa64",
                "grub2-tools",
                "shim-aa64",
            ]));
        }
        Arch::Ppc64le => {
            ps = ps.append(PackageSet::new(&[
                "powerpc-utils",
                "grub2-ppc64le",
                "grub2-ppc64le-modules",
            ]));
        }
        Arch::S390x => {
            ps = ps.append(PackageSet::new(&["s390utils-base"]));
        }
    }
    ps.append(PackageSet::new(&t.arch.bootloader_packages))
}

/// The shared base of every installed RHEL-like OS.
pub(crate) fn core_os_common(t: &ImageTypeHandle<'_>) -> PackageSet {
    let mut ps = PackageSet::new(&[
        "@core",
        "audit",
        "basesystem",
        "bash",
        "coreutils",
        "cronie",
        "crypto-policies",
        "crypto-policies-scripts",
        "curl",
        "dnf",
        "yum",
        "e2fsprogs",
        "filesystem",
        "glibc",
        "grubby",
        "hostname",
        "iproute",
        "iproute-tc",
        "iputils",
        "kbd",
        "kexec-tools",
        "less",
        "logrotate",
        "man-db",
        "ncurses",
        "openssh-clients",
        "openssh-server",
        "p11-kit",
        "parted",
        "passwd",
        "policycoreutils",
        "procps-ng",
        "rootfiles",
        "rpm",
        "rpm-plugin-audit",
        "rsyslog",
        "selinux-policy-targeted",
        "setup",
        "shadow-utils",
        "sssd-common",
        "sssd-kcm",
        "sudo",
        "systemd",
        "tuned",
        "util-linux",
        "vim-minimal",
        "xfsprogs",
        "authselect",
        "prefixdevname",
        "dnf-plugins-core",
        "NetworkManager",
        "NetworkManager-team",
        "NetworkManager-tui",
        "libsysfs",
        "linux-firmware",
        "lshw",
        "lsscsi",
        "kernel-tools",
        "sg3_utils",
        "sg3_utils-libs",
        "python3-libselinux",
    ]);
    if t.distro.is_rhel() {
        ps = ps.append(PackageSet::new(&["subscription-manager"]));
    }
    let per_arch: &[&str] = match t.arch.arch {
        Arch::X86_64 => &["irqbalance", "microcode_ctl"],
        Arch::Aarch64 => &["irqbalance"],
        Arch::Ppc64le => &[
            "irqbalance",
            "opal-prd",
            "ppc64-diag-rtas",
            "powerpc-utils-core",
            "lsvpd",
        ],
        Arch::S390x => &["s390utils-core"],
    };
    ps.append(PackageSet::new(per_arch))
}

fn distro_specific(t: &ImageTypeHandle<'_>) -> PackageSet {
    if t.distro.is_rhel() {
        PackageSet::new(&["insights-client"])
    } else {
        PackageSet::default()
    }
}

fn release(t: &ImageTypeHandle<'_>) -> PackageSet {
    if t.distro.is_rhel() {
        PackageSet::new(&["redhat-release", "redhat-release-eula"])
    } else {
        PackageSet::new(&["centos-stream-release"])
    }
}

/// Cloud images: the common OS, cloud-init and trimmed firmware.
fn cloud_common(t: &ImageTypeHandle<'_>) -> PackageSet {
    PackageSet::new(&[
        "chrony",
        "cloud-init",
        "cloud-utils-growpart",
        "dhcp-client",
        "dracut-config-generic",
        "gdisk",
        "langpacks-en",
        "rsync",
        "tar",
        "yum-utils",
    ])
    .with_exclude(&[
        "aic94xx-firmware",
        "alsa-firmware",
        "alsa-tools-firmware",
        "biosdevname",
        "dracut-config-rescue",
        "iprutils",
        "ivtv-firmware",
        "libertas-sd8787-firmware",
        "plymouth",
    ])
    .append(release(t))
    .append(boot(t))
    .append(core_os_common(t))
    .append(distro_specific(t))
}

pub(crate) fn qcow2(t: &ImageTypeHandle<'_>) -> PackageSet {
    cloud_common(t).append(PackageSet::new(&["qemu-guest-agent"]))
}

pub(crate) fn openstack(t: &ImageTypeHandle<'_>) -> PackageSet {
    cloud_common(t).append(PackageSet::new(&["qemu-guest-agent", "spice-vdagent"]))
}

pub(crate) fn vhd(t: &ImageTypeHandle<'_>) -> PackageSet {
    cloud_common(t)
        .append(PackageSet::new(&["WALinuxAgent", "hyperv-daemons", "nvme-cli"]))
        .with_exclude(&["NetworkManager-config-server"])
}

pub(crate) fn vmdk(t: &ImageTypeHandle<'_>) -> PackageSet {
    PackageSet::new(&["chrony", "cloud-init", "firewalld", "langpacks-en", "open-vm-tools"])
        .with_exclude(&["rng-tools"])
        .append(release(t))
        .append(boot(t))
        .append(core_os_common(t))
}

pub(crate) fn ec2_build(t: &ImageTypeHandle<'_>) -> PackageSet {
    build(t).append(PackageSet::new(&["python3-pyyaml"]))
}

pub(crate) fn ec2(t: &ImageTypeHandle<'_>) -> PackageSet {
    let mut ps = PackageSet::new(&[
        "authselect-compat",
        "grub2",
        "NetworkManager-cloud-setup",
    ])
    .with_exclude(&["qemu-guest-agent"])
    .append(cloud_common(t));
    if t.distro.is_rhel() {
        ps = ps.append(PackageSet::new(&["redhat-cloud-client-configuration"]));
    }
    ps
}

pub(crate) fn tar(_: &ImageTypeHandle<'_>) -> PackageSet {
    PackageSet::new(&["policycoreutils", "selinux-policy-targeted"])
        .with_exclude(&["rng-tools"])
}

/// The system an installer ISO lays down.
pub(crate) fn bare_metal(t: &ImageTypeHandle<'_>) -> PackageSet {
    PackageSet::new(&[
        "authselect-compat",
        "chrony",
        "cockpit-system",
        "cockpit-ws",
        "dhcp-client",
        "dnf-utils",
        "dosfstools",
        "firewalld",
        "iwl1000-firmware",
        "iwl100-firmware",
        "iwl105-firmware",
        "iwl135-firmware",
        "iwl2000-firmware",
        "iwl2030-firmware",
        "iwl3160-firmware",
        "iwl5000-firmware",
        "iwl5150-firmware",
        "iwl6000g2a-firmware",
        "iwl6000g2b-firmware",
        "iwl6050-firmware",
        "iwl7260-firmware",
        "lvm2",
        "net-tools",
        "nfs-utils",
        "oddjob",
        "oddjob-mkhomedir",
        "policycoreutils",
        "psmisc",
        "python3-jsonschema",
        "qemu-guest-agent",
        "rsync",
        "selinux-policy-targeted",
        "tar",
        "tcpdump",
    ])
    .append(release(t))
    .append(boot(t))
    .append(core_os_common(t))
    .append(distro_specific(t))
}

/// Packages every installer runtime needs.
fn installer(_: &ImageTypeHandle<'_>) -> PackageSet {
    PackageSet::new(&[
        "anaconda-dracut",
        "curl",
        "dracut-config-generic",
        "dracut-network",
        "hostname",
        "iwl100-firmware",
        "iwl1000-firmware",
        "iwl105-firmware",
        "iwl135-firmware",
        "iwl2000-firmware",
        "iwl2030-firmware",
        "iwl3160-firmware",
        "iwl5000-firmware",
        "iwl5150-firmware",
        "iwl6050-firmware",
        "iwl7260-firmware",
        "kernel",
        "less",
        "nfs-utils",
        "openssh-clients",
        "ostree",
        "plymouth",
        "prefixdevname",
        "rng-tools",
        "rpcbind",
        "selinux-policy-targeted",
        "systemd",
        "tar",
        "xfsprogs",
        "xz",
    ])
}

/// The Anaconda runtime of installer ISOs.
pub(crate) fn anaconda(t: &ImageTypeHandle<'_>) -> PackageSet {
    let ps = installer(t)
        .append(PackageSet::new(&[
            "aajohan-comfortaa-fonts",
            "abattis-cantarell-fonts",
            "alsa-firmware",
            "alsa-tools-firmware",
            "anaconda",
            "anaconda-dracut",
            "anaconda-install-env-deps",
            "anaconda-widgets",
            "audit",
            "bind-utils",
            "bzip2",
            "cryptsetup",
            "curl",
            "dbus-x11",
            "dejavu-sans-fonts",
            "dejavu-sans-mono-fonts",
            "device-mapper-persistent-data",
            "dmidecode",
            "dnf",
            "dracut-config-generic",
            "dracut-network",
            "efibootmgr",
            "ethtool",
            "fcoe-utils",
            "ftp",
            "gdb-gdbserver",
            "glibc-all-langpacks",
            "gnome-kiosk",
            "google-noto-sans-cjk-ttc-fonts",
            "grub2-tools",
            "grub2-tools-extra",
            "grub2-tools-minimal",
            "grubby",
            "gsettings-desktop-schemas",
            "hdparm",
            "hexedit",
            "hostname",
            "initscripts",
            "ipmitool",
            "jomolhari-fonts",
            "kbd",
            "kbd-misc",
            "kdump-anaconda-addon",
            "kernel",
            "less",
            "libblockdev-lvm-dbus",
            "libibverbs",
            "librsvg2",
            "linux-firmware",
            "lldpad",
            "lsof",
            "madan-fonts",
            "mt-st",
            "mtr",
            "net-tools",
            "nfs-utils",
            "nm-connection-editor",
            "nmap-ncat",
            "nss-tools",
            "openssh-clients",
            "openssh-server",
            "ostree",
            "pciutils",
            "perl-interpreter",
            "pigz",
            "plymouth",
            "python3-pyatspi",
            "rdma-core",
            "redhat-release-eula",
            "rng-tools",
            "rpcbind",
            "rpm-ostree",
            "rsync",
            "rsyslog",
            "selinux-policy-targeted",
            "sg3_utils",
            "smartmontools",
            "spice-vdagent",
            "strace",
            "systemd",
            "tar",
            "tigervnc-server-minimal",
            "tigervnc-server-module",
            "udisks2",
            "udisks2-iscsi",
            "usbutils",
            "vim-minimal",
            "volume_key",
            "wget",
            "xfsdump",
            "xfsprogs",
            "xorg-x11-drivers",
            "xorg-x11-fonts-misc",
            "xorg-x11-server-Xorg",
            "xorg-x11-xauth",
            "xz",
        ]))
        .append(anaconda_boot(t));
    match t.arch.arch {
        Arch::X86_64 => ps.append(PackageSet::new(&["biosdevname", "dmidecode", "memtest86+"])),
        Arch::Aarch64 => ps.append(PackageSet::new(&["dmidecode"])),
        Arch::Ppc64le | Arch::S390x => ps,
    }
}

fn edge_commit_firmware(t: &ImageTypeHandle<'_>) -> PackageSet {
    match t.arch.arch {
        Arch::X86_64 => PackageSet::new(&[
            "grub2",
            "grub2-efi-x64",
            "efibootmgr",
            "shim-x64",
            "microcode_ctl",
            "iwl1000-firmware",
            "iwl100-firmware",
            "iwl105-firmware",
            "iwl135-firmware",
            "iwl2000-firmware",
            "iwl2030-firmware",
            "iwl3160-firmware",
            "iwl5000-firmware",
            "iwl5150-firmware",
            "iwl6050-firmware",
            "iwl7260-firmware",
        ]),
        Arch::Aarch64 => PackageSet::new(&[
            "grub2-efi-aa64",
            "efibootmgr",
            "shim-aa64",
            "iwl7260-firmware",
        ]),
        Arch::Ppc64le | Arch::S390x => PackageSet::default(),
    }
}

/// The OS tree committed to OSTree by the edge types.
pub(crate) fn edge_commit(t: &ImageTypeHandle<'_>) -> PackageSet {
    PackageSet::new(&[
        "glibc",
        "glibc-minimal-langpack",
        "nss-altfiles",
        "dracut-config-generic",
        "dracut-network",
        "basesystem",
        "bash",
        "platform-python",
        "shadow-utils",
        "chrony",
        "setup",
        "sudo",
        "systemd",
        "coreutils",
        "util-linux",
        "curl",
        "vim-minimal",
        "rpm",
        "rpm-ostree",
        "polkit",
        "lvm2",
        "cryptsetup",
        "pinentry",
        "e2fsprogs",
        "dosfstools",
        "keyutils",
        "gnupg2",
        "attr",
        "xz",
        "gzip",
        "firewalld",
        "iptables",
        "NetworkManager",
        "NetworkManager-wifi",
        "NetworkManager-wwan",
        "wpa_supplicant",
        "dnsmasq",
        "traceroute",
        "hostname",
        "iproute",
        "iputils",
        "openssh-clients",
        "procps-ng",
        "rootfiles",
        "openssh-server",
        "passwd",
        "policycoreutils",
        "policycoreutils-python-utils",
        "selinux-policy-targeted",
        "setools-console",
        "less",
        "tar",
        "rsync",
        "usbguard",
        "bash-completion",
        "tmux",
        "ima-evm-utils",
        "audit",
        "podman",
        "containernetworking-plugins",
        "container-selinux",
        "skopeo",
        "criu",
        "slirp4netns",
        "fuse-overlayfs",
        "clevis",
        "clevis-dracut",
        "clevis-luks",
        "greenboot",
        "greenboot-default-health-checks",
        "fdo-client",
        "fdo-owner-cli",
    ])
    .with_exclude(&["rng-tools"])
    .append(release(t))
    .append(boot(t))
    .append(edge_commit_firmware(t))
}

/// The coreos-installer runtime of the simplified installer, which
/// writes the raw image to disk and onboards the device.
pub(crate) fn coreos_installer(t: &ImageTypeHandle<'_>) -> PackageSet {
    installer(t)
        .append(PackageSet::new(&[
            "attr",
            "basesystem",
            "binutils",
            "bsdtar",
            "clevis-dracut",
            "clevis-luks",
            "cloud-utils-growpart",
            "coreos-installer",
            "coreos-installer-dracut",
            "coreutils",
            "device-mapper-multipath",
            "dnsmasq",
            "dosfstools",
            "dracut-live",
            "e2fsprogs",
            "fcoe-utils",
            "fdo-init",
            "gzip",
            "ima-evm-utils",
            "iproute",
            "iptables",
            "iputils",
            "iscsi-initiator-utils",
            "keyutils",
            "lldpad",
            "lvm2",
            "passwd",
            "policycoreutils",
            "policycoreutils-python-utils",
            "procps-ng",
            "redhat-logos",
            "rootfiles",
            "setools-console",
            "sudo",
            "traceroute",
            "util-linux",
        ]))
        .append(edge_commit_firmware(t))
}

/// The web server wrapping an OSTree repo in the edge container.
pub(crate) fn edge_container(_: &ImageTypeHandle<'_>) -> PackageSet {
    PackageSet::new(&["nginx"])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::BootMode;
    use crate::registry::default_registry;

    fn includes(ps: &PackageSet, name: &str) -> bool {
        ps.include.iter().any(|p| p == name)
    }

    #[test]
    fn test_boot_sets() {
        let r = default_registry().unwrap();
        let qcow2 = r.get_image_type("rhel-9/x86_64/qcow2").unwrap();
        let ps = boot(&qcow2);
        assert!(includes(&ps, "grub2-pc"));
        assert!(includes(&ps, "shim-x64"));

        let ami = r.get_image_type("rhel-9/x86_64/ami").unwrap();
        assert_eq!(ami.boot_mode(), BootMode::Legacy);
        let ps = boot(&ami);
        assert!(includes(&ps, "grub2-pc"));
        assert!(!includes(&ps, "shim-x64"));

        let s390x = r.get_image_type("rhel-9/s390x/qcow2").unwrap();
        assert!(includes(&boot(&s390x), "s390utils-base"));

        let tar = r.get_image_type("rhel-9/x86_64/tar").unwrap();
        assert!(boot(&tar).is_empty());
    }

    #[test]
    fn test_build_sets() {
        let r = default_registry().unwrap();
        let x86 = r.get_image_type("rhel-9/x86_64/qcow2").unwrap();
        assert!(includes(&build(&x86), "grub2-pc"));
        let ppc = r.get_image_type("rhel-9/ppc64le/qcow2").unwrap();
        assert!(includes(&build(&ppc), "grub2-ppc64le-modules"));
        let iso = r.get_image_type("rhel-9/x86_64/image-installer").unwrap();
        let ps = anaconda_build(&iso);
        assert!(includes(&ps, "xorriso"));
        assert!(includes(&ps, "squashfs-tools"));
        assert!(includes(&ps, "syslinux-nonlinux"));
    }

    #[test]
    fn test_coreos_installer_set() {
        let r = default_registry().unwrap();
        let t = r.get_image_type("rhel-9/aarch64/edge-simplified-installer").unwrap();
        let ps = coreos_installer(&t);
        assert!(includes(&ps, "coreos-installer-dracut"));
        assert!(includes(&ps, "fdo-init"));
        assert!(includes(&ps, "shim-aa64"));
        assert!(includes(&edge_simplified_installer_build(&t), "xorriso"));
    }

    #[test]
    fn test_distro_differences() {
        let r = default_registry().unwrap();
        let rhel = r.get_image_type("rhel-9/aarch64/qcow2").unwrap();
        let centos = r.get_image_type("centos-9/aarch64/qcow2").unwrap();
        assert!(includes(&qcow2(&rhel), "subscription-manager"));
        assert!(includes(&qcow2(&rhel), "insights-client"));
        assert!(!includes(&qcow2(&centos), "insights-client"));
        assert!(includes(&qcow2(&centos), "centos-stream-release"));
    }

    #[test]
    fn test_edge_commit() {
        let r = default_registry().unwrap();
        let t = r.get_image_type("rhel-9/x86_64/edge-commit").unwrap();
        let ps = edge_commit(&t);
        assert!(includes(&ps, "rpm-ostree"));
        assert!(includes(&ps, "iwl7260-firmware"));
        assert_eq!(ps.exclude, vec!["rng-tools".to_string()]);
    }
}
