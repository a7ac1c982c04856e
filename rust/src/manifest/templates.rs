// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Image templates. Each turns a [`ManifestContext`] into the pipelines
//! of one family of image types, in manifest order.

use anyhow::Result;
use std::collections::BTreeMap;

use super::os::kernel_options;
use super::{build_pipeline, os_pipeline, ManifestContext, OsPipelineOptions, OstreeCommit};
use crate::blueprint::ANACONDA_MODULE_USERS;
use crate::disk::PartitionTable;
use crate::error::internal;
use crate::fsnode::File;
use crate::kickstart::{sudo_nopasswd_post, validate_user_kickstart, KICKSTART_PATH};
use crate::osbuild::{
    gen_efiboot_stages, gen_file_stages, gen_image_finish_stages, gen_image_prepare_stages,
    merge_unique, new_copy_tree_stage, new_fstab_stage, new_grub2_inst_stage,
    new_isolinux_stage, new_oci_archive_stage, new_ostree_commit_stage, new_ostree_pull_stage,
    new_pxeboot_copy_stage, new_qemu_stage, new_rpm_stage, new_squashfs_stage, new_tar_stage,
    new_xorrisofs_stage, new_xz_stage, new_zipl_inst_stage, AnacondaStageOptions,
    BuildstampStageOptions, CopyStageOptions, CopyStagePath, DiscinfoStageOptions,
    DracutStageOptions, FdoStageOptions, Grub2Config,
    Grub2IsoStageOptions, Grub2StageOptions, GroupsStageOptions, ImplantIsomd5StageOptions,
    Input, IsoKernel, IsoProduct, IsolinuxStageOptions, KickstartStageOptions,
    LocaleStageOptions, LoraxScriptStageOptions, MkdirStageOptions, MkdirStagePath,
    NginxConfig, NginxConfigStageOptions, OciArchiveConfig, OciArchiveStageOptions,
    OstreeCommitStageOptions, OstreeConfig, OstreeConfigStageOptions, OstreeDeployStageOptions,
    OstreeDeployment, OstreeFillvarStageOptions, OstreeInitStageOptions,
    OstreeOsInitStageOptions, OstreePullStageOptions, OstreeRemote, OstreeRemotesStageOptions,
    OstreeRootfs, OstreeSelinuxStageOptions, OstreeSysrootConfig, Pipeline, RpmStageOptions,
    SelinuxConfigStageOptions, Stage, UsersStageOptions, UsersStageUser, XorrisofsStageOptions,
    PXEBOOT_DIR, TREE_EFI_DIR,
};
use crate::platform::Arch;
use crate::rpmmd::find_version_release_arch;

/// Intermediate raw image written before conversion or compression.
const RAW_DISK: &str = "disk.raw";
const RAW_EDGE_IMAGE: &str = "image.raw";
const COMPRESSED_EDGE_IMAGE: &str = "image.raw.xz";

const OSTREE_OSNAME: &str = "rhel";
const OSTREE_REMOTE: &str = "rhel-edge";
const OSTREE_REPO: &str = "/ostree/repo";
const COMMIT_REPO: &str = "/repo";

const NGINX_ROOT: &str = "/usr/share/nginx/html";
const NGINX_CONFIG: &str = "/etc/nginx.conf";
const NGINX_PORT: &str = "8080";

const INSTALLER_LOCALE: &str = "en_US.UTF-8";
const INSTALLER_REPO_OSTREE: &str = "file:///run/install/repo/ostree/repo";
const LIVEIMG_FILE: &str = "liveimg.tar.gz";
const INSTALLER_REPO_LIVEIMG: &str = "file:///run/install/repo/liveimg.tar.gz";

const ANACONDA_MODULES: &[&str] = &[
    "org.fedoraproject.Anaconda.Modules.Network",
    "org.fedoraproject.Anaconda.Modules.Payloads",
    "org.fedoraproject.Anaconda.Modules.Storage",
    ANACONDA_MODULE_USERS,
];

const INSTALLER_DRACUT_MODULES: &[&str] = &[
    "anaconda",
    "rdma",
    "rngd",
    "multipath",
    "fcoe",
    "fcoe-uefi",
    "iscsi",
    "lunmask",
    "nfs",
];

const COI_LOCALE: &str = "C.UTF-8";
const COI_DRACUT_MODULES: &[&str] = &[
    "systemd",
    "systemd-initrd",
    "fips",
    "modsign",
    "rescue",
    "i18n",
    "kernel-modules",
    "kernel-modules-extra",
    "network-manager",
    "network",
    "drm",
    "coreos-installer",
    "fdo",
    "lvm",
    "terminfo",
    "fs-lib",
    "dracut-systemd",
    "debug",
    "shutdown",
];
/// Where the FDO root certificates land in the installer initrd.
const FDO_ROOT_CERTS: &str = "/fdo_diun_pub_key_root_certs.pem";
/// coreos-installer reads an embedded ignition config from here.
const COI_IGNITION_CONFIG: &str = "/ignition_config";

/// Write the partition table and the filesystems of `pt` into
/// `filename`, fill them from `tree` and install the bootloader.
fn image_pipeline(
    ctx: &ManifestContext<'_>,
    pt: &PartitionTable,
    filename: &str,
    tree: &str,
) -> Result<Pipeline> {
    let arch = ctx.handle.arch;
    let mut p = Pipeline::new("image", Some("build"));
    p.add_stages(gen_image_prepare_stages(pt, filename)?);
    p.add_stage(new_copy_tree_stage(pt, filename, tree)?);
    match arch.arch {
        Arch::X86_64 if ctx.handle.boot_mode().has_legacy() => {
            if let Some(platform) = arch.legacy_platform.as_deref() {
                p.add_stage(new_grub2_inst_stage(pt, filename, platform)?);
            }
        }
        Arch::S390x => {
            let kernel_ver = ctx.kernel_version(tree)?;
            p.add_stage(new_zipl_inst_stage(pt, filename, &kernel_ver)?);
        }
        _ => {}
    }
    p.add_stages(gen_image_finish_stages(pt, filename)?);
    Ok(p)
}

/// `build → os → image`, plus a conversion pipeline for formats other
/// than raw.
pub(crate) fn disk_image(ctx: &mut ManifestContext<'_>) -> Result<Vec<Pipeline>> {
    let t = ctx.handle.image_type;
    let pt = ctx.partition_table()?;
    let build = build_pipeline(ctx)?;
    let os = os_pipeline(
        ctx,
        OsPipelineOptions {
            name: "os",
            pt: Some(&pt),
            ..Default::default()
        },
    )?;
    let format = t.image_format;
    let raw = if format.needs_conversion() {
        RAW_DISK
    } else {
        t.filename.as_str()
    };
    let image = image_pipeline(ctx, &pt, raw, "os")?;
    let mut pipelines = vec![build, os, image];
    if format.needs_conversion() {
        let mut convert = Pipeline::new(format.as_str(), Some("build"));
        convert.add_stage(new_qemu_stage(&t.filename, format, "image", raw));
        pipelines.push(convert);
    }
    Ok(pipelines)
}

/// The OS tree as a tarball.
pub(crate) fn tar_image(ctx: &mut ManifestContext<'_>) -> Result<Vec<Pipeline>> {
    let build = build_pipeline(ctx)?;
    let os = os_pipeline(
        ctx,
        OsPipelineOptions {
            name: "os",
            ..Default::default()
        },
    )?;
    let mut archive = Pipeline::new("archive", Some("build"));
    archive.add_stage(new_tar_stage(&ctx.handle.image_type.filename, "os"));
    Ok(vec![build, os, archive])
}

/// `build → ostree-tree → ostree-commit`, shared by the commit and the
/// container images.
fn ostree_commit_pipelines(ctx: &mut ManifestContext<'_>) -> Result<Vec<Pipeline>> {
    let parent = ctx.ostree_commit(true)?;
    let reference = ctx.ostree_ref()?;
    let build = build_pipeline(ctx)?;
    let tree = os_pipeline(
        ctx,
        OsPipelineOptions {
            name: "ostree-tree",
            ostree: true,
            parent: parent.as_ref(),
            ..Default::default()
        },
    )?;
    let mut commit = Pipeline::new("ostree-commit", Some("build"));
    commit.add_stage(Stage::new(
        "org.osbuild.ostree.init",
        OstreeInitStageOptions::archive(COMMIT_REPO),
    ));
    commit.add_stage(new_ostree_commit_stage(
        OstreeCommitStageOptions {
            reference,
            os_version: Some(ctx.handle.distro.os_version.clone()),
            parent: parent.map(|c| c.checksum),
        },
        "ostree-tree",
    ));
    Ok(vec![build, tree, commit])
}

/// An ostree commit repository as a tarball.
pub(crate) fn edge_commit(ctx: &mut ManifestContext<'_>) -> Result<Vec<Pipeline>> {
    let mut pipelines = ostree_commit_pipelines(ctx)?;
    let mut archive = Pipeline::new("commit-archive", Some("build"));
    archive.add_stage(new_tar_stage(&ctx.handle.image_type.filename, "ostree-commit"));
    pipelines.push(archive);
    Ok(pipelines)
}

/// A container serving the commit repository over HTTP.
pub(crate) fn edge_container(ctx: &mut ManifestContext<'_>) -> Result<Vec<Pipeline>> {
    let mut pipelines = ostree_commit_pipelines(ctx)?;
    let reference = ctx.ostree_ref()?;
    let repo = format!("{}/repo", NGINX_ROOT);

    let packages = ctx.packages_for("container-tree")?;
    let mut tree = Pipeline::new("container-tree", Some("build"));
    tree.add_stage(new_rpm_stage(
        RpmStageOptions {
            gpgkeys: ctx.repo_gpgkeys("container-tree"),
            ..Default::default()
        },
        packages,
    ));
    tree.add_stage(Stage::new(
        "org.osbuild.locale",
        LocaleStageOptions {
            language: "en_US".to_string(),
        },
    ));
    tree.add_stage(Stage::new("org.osbuild.ostree.init", OstreeInitStageOptions::archive(&repo)));
    tree.add_stage(new_ostree_pull_stage(
        OstreePullStageOptions {
            repo: repo.clone(),
            remote: None,
        },
        Input::ostree_pipeline("ostree-commit", &reference),
    ));
    tree.add_stage(Stage::new(
        "org.osbuild.nginx.conf",
        NginxConfigStageOptions {
            path: Some(NGINX_CONFIG.to_string()),
            config: NginxConfig {
                listen: NGINX_PORT.to_string(),
                root: NGINX_ROOT.to_string(),
            },
        },
    ));

    let mut container = Pipeline::new("container", Some("build"));
    container.add_stage(new_oci_archive_stage(
        OciArchiveStageOptions {
            architecture: ctx.handle.arch.arch.as_str().to_string(),
            filename: ctx.handle.image_type.filename.clone(),
            config: Some(OciArchiveConfig {
                cmd: vec!["nginx".into(), "-c".into(), NGINX_CONFIG.into()],
                exposed_ports: vec![NGINX_PORT.to_string()],
            }),
        },
        "container-tree",
    ));
    pipelines.extend([tree, container]);
    Ok(pipelines)
}

/// The installer runtime; also returns the version of its kernel.
fn anaconda_tree(ctx: &mut ManifestContext<'_>, variant: &str) -> Result<(Pipeline, String)> {
    const NAME: &str = "anaconda-tree";
    let packages = ctx.packages_for(NAME)?;
    let kernel_ver = find_version_release_arch(packages, "kernel")?;
    let distro = ctx.handle.distro;
    let arch = ctx.handle.arch.arch.as_str();

    let mut p = Pipeline::new(NAME, Some("build"));
    p.add_stage(new_rpm_stage(
        RpmStageOptions {
            gpgkeys: ctx.repo_gpgkeys(NAME),
            ..Default::default()
        },
        packages,
    ));
    p.add_stage(Stage::new(
        "org.osbuild.buildstamp",
        BuildstampStageOptions {
            arch: arch.to_string(),
            product: distro.product.clone(),
            version: distro.os_version.clone(),
            is_final: true,
            variant: variant.to_string(),
            bugurl: String::new(),
        },
    ));
    p.add_stage(Stage::new(
        "org.osbuild.locale",
        LocaleStageOptions {
            language: INSTALLER_LOCALE.to_string(),
        },
    ));
    // root gets an empty password, install drops straight into anaconda
    let users = BTreeMap::from([
        (
            "install".to_string(),
            UsersStageUser {
                uid: Some(0),
                gid: Some(0),
                home: Some("/root".to_string()),
                shell: Some("/usr/libexec/anaconda/run-anaconda".to_string()),
                password: Some(String::new()),
                ..Default::default()
            },
        ),
        (
            "root".to_string(),
            UsersStageUser {
                password: Some(String::new()),
                ..Default::default()
            },
        ),
    ]);
    p.add_stage(Stage::new("org.osbuild.users", UsersStageOptions { users }));

    let defaults: Vec<String> = ANACONDA_MODULES.iter().map(|m| m.to_string()).collect();
    let mut modules = defaults.clone();
    let configured = ctx
        .bp
        .customizations()
        .installer
        .as_ref()
        .and_then(|i| i.modules.as_ref());
    if let Some(m) = configured {
        modules = merge_unique(&defaults, &m.enable);
        modules.retain(|name| !m.disable.contains(name));
    }
    p.add_stage(Stage::new(
        "org.osbuild.anaconda",
        AnacondaStageOptions {
            activatable_modules: modules,
        },
    ));
    p.add_stage(Stage::new(
        "org.osbuild.lorax-script",
        LoraxScriptStageOptions {
            path: "99-generic/runtime-postinstall.tmpl".to_string(),
            basearch: arch.to_string(),
        },
    ));
    p.add_stage(Stage::new(
        "org.osbuild.dracut",
        DracutStageOptions {
            kernel: vec![kernel_ver.clone()],
            modules: INSTALLER_DRACUT_MODULES.iter().map(|m| m.to_string()).collect(),
            install: vec!["/.buildstamp".to_string()],
            ..Default::default()
        },
    ));
    p.add_stage(Stage::new(
        "org.osbuild.selinux.config",
        SelinuxConfigStageOptions {
            state: Some("permissive".to_string()),
            policy_type: None,
        },
    ));
    Ok((p, kernel_ver))
}

/// What the installer puts on the target disk.
enum IsoPayload<'c> {
    Ostree(&'c OstreeCommit),
    /// A tarball of the `os` pipeline.
    Liveimg,
}

fn efi_arch(arch: Arch) -> Result<&'static str> {
    match arch {
        Arch::X86_64 => Ok("X64"),
        Arch::Aarch64 => Ok("AA64"),
        other => Err(internal(format!("no EFI boot support for {}", other))),
    }
}

/// The kickstart driving the installation, plus any files it includes.
fn kickstart(
    ctx: &mut ManifestContext<'_>,
    payload: &IsoPayload<'_>,
) -> Result<(KickstartStageOptions, Vec<File>)> {
    let bp = ctx.bp;
    let c = bp.customizations();
    let users = UsersStageOptions::new(&c.get_users(), false, ctx.crypter, &mut ctx.rng)?.users;
    let groups = GroupsStageOptions::new(&c.get_groups()).groups;
    let mut ks = match payload {
        IsoPayload::Ostree(commit) => KickstartStageOptions::with_ostree_commit(
            KICKSTART_PATH,
            users,
            groups,
            INSTALLER_REPO_OSTREE,
            &commit.reference,
            OSTREE_OSNAME,
        ),
        IsoPayload::Liveimg => {
            KickstartStageOptions::with_liveimg(KICKSTART_PATH, users, groups, INSTALLER_REPO_LIVEIMG)
        }
    };
    let (language, keyboard) = c.get_primary_locale();
    ks.lang = language.map(str::to_string);
    ks.keyboard = keyboard.map(str::to_string);
    ks.timezone = c.get_timezone_settings().0.map(str::to_string);

    let mut files = Vec::new();
    if let Some(installer) = &c.installer {
        if installer.unattended {
            ks.make_unattended();
        }
        let mut raw = String::new();
        if !installer.sudo_nopasswd.is_empty() {
            raw.push_str(&sudo_nopasswd_post(&installer.sudo_nopasswd));
        }
        if let Some(user_ks) = installer.kickstart.as_ref().filter(|k| !k.contents.is_empty()) {
            validate_user_kickstart(&user_ks.contents)?;
            raw.push_str(&user_ks.contents);
        }
        if !raw.is_empty() {
            files.push(ks.include_raw(&raw)?);
        }
    }
    Ok((ks, files))
}

/// The ISO file tree: boot menus, the squashed installer runtime, the
/// payload and the kickstart.
fn bootiso_tree(
    ctx: &mut ManifestContext<'_>,
    kernel_ver: &str,
    payload: IsoPayload<'_>,
) -> Result<Pipeline> {
    let handle = ctx.handle;
    let isolabel = handle
        .isolabel()
        .ok_or_else(|| internal(format!("image type {} has no ISO label", handle.name())))?;
    let arch = handle.arch.arch;
    let legacy = arch == Arch::X86_64 && handle.boot_mode().has_legacy();
    let product = IsoProduct {
        name: handle.distro.product.clone(),
        version: handle.distro.os_version.clone(),
    };
    let kernel = IsoKernel {
        dir: PXEBOOT_DIR.to_string(),
        opts: vec![format!("inst.ks=hd:LABEL={}:{}", isolabel, KICKSTART_PATH)],
    };

    let mut p = Pipeline::new("bootiso-tree", Some("build"));
    p.add_stage(new_pxeboot_copy_stage("anaconda-tree", kernel_ver));
    let bcj = match arch {
        Arch::X86_64 => Some("x86"),
        Arch::Aarch64 => Some("arm"),
        _ => None,
    };
    p.add_stage(new_squashfs_stage("images/install.img", "anaconda-tree", bcj));
    if legacy {
        p.add_stage(new_isolinux_stage(
            IsolinuxStageOptions {
                product: product.clone(),
                kernel: kernel.clone(),
            },
            "anaconda-tree",
        ));
    }
    p.add_stage(Stage::new(
        "org.osbuild.grub2.iso",
        Grub2IsoStageOptions {
            product: product.clone(),
            kernel,
            isolabel,
            architectures: vec![efi_arch(arch)?.to_string()],
            vendor: handle.arch.uefi_vendor.clone(),
        },
    ));
    p.add_stages(gen_efiboot_stages("anaconda-tree", TREE_EFI_DIR));
    p.add_stage(Stage::new(
        "org.osbuild.discinfo",
        DiscinfoStageOptions {
            basearch: arch.as_str().to_string(),
            release: format!("{} {}", product.name, product.version),
        },
    ));

    match &payload {
        IsoPayload::Ostree(commit) => {
            p.add_stage(Stage::new(
                "org.osbuild.ostree.init",
                OstreeInitStageOptions::archive(OSTREE_REPO),
            ));
            p.add_stage(new_ostree_pull_stage(
                OstreePullStageOptions {
                    repo: OSTREE_REPO.to_string(),
                    remote: None,
                },
                Input::ostree_commit(&commit.checksum, &commit.reference),
            ));
        }
        IsoPayload::Liveimg => p.add_stage(new_tar_stage(LIVEIMG_FILE, "os")),
    }

    let (ks, files) = kickstart(ctx, &payload)?;
    p.add_stage(Stage::new("org.osbuild.kickstart", ks));
    p.add_stages(gen_file_stages(&files, &mut ctx.sources));
    Ok(p)
}

fn bootiso(ctx: &ManifestContext<'_>) -> Result<Pipeline> {
    let handle = ctx.handle;
    let filename = &handle.image_type.filename;
    let isolabel = handle
        .isolabel()
        .ok_or_else(|| internal(format!("image type {} has no ISO label", handle.name())))?;
    let legacy = handle.arch.arch == Arch::X86_64 && handle.boot_mode().has_legacy();
    let mut p = Pipeline::new("bootiso", Some("build"));
    p.add_stage(new_xorrisofs_stage(
        XorrisofsStageOptions::new(filename, &isolabel, legacy),
        "bootiso-tree",
    ));
    p.add_stage(Stage::new(
        "org.osbuild.implantisomd5",
        ImplantIsomd5StageOptions {
            filename: filename.clone(),
        },
    ));
    Ok(p)
}

/// Installer ISO deploying an ostree commit.
pub(crate) fn edge_installer(ctx: &mut ManifestContext<'_>) -> Result<Vec<Pipeline>> {
    let commit = ctx.required_ostree_commit()?;
    let build = build_pipeline(ctx)?;
    let (anaconda, kernel_ver) = anaconda_tree(ctx, "edge")?;
    let tree = bootiso_tree(ctx, &kernel_ver, IsoPayload::Ostree(&commit))?;
    let iso = bootiso(ctx)?;
    Ok(vec![build, anaconda, tree, iso])
}

/// Installer ISO writing a tarball of the OS tree.
pub(crate) fn image_installer(ctx: &mut ManifestContext<'_>) -> Result<Vec<Pipeline>> {
    let build = build_pipeline(ctx)?;
    let os = os_pipeline(
        ctx,
        OsPipelineOptions {
            name: "os",
            ..Default::default()
        },
    )?;
    let (anaconda, kernel_ver) = anaconda_tree(ctx, "")?;
    let tree = bootiso_tree(ctx, &kernel_ver, IsoPayload::Liveimg)?;
    let iso = bootiso(ctx)?;
    Ok(vec![build, os, anaconda, tree, iso])
}

/// A sysroot with the commit deployed, ready to be copied onto a disk.
/// `embed_ignition` writes an embedded ignition config into `/boot`;
/// otherwise the installer supplies it.
fn raw_image_tree(
    ctx: &mut ManifestContext<'_>,
    pt: &PartitionTable,
    commit: &OstreeCommit,
    embed_ignition: bool,
) -> Result<Pipeline> {
    let bp = ctx.bp;
    let c = bp.customizations();
    let reference = commit.reference.as_str();
    let deployment = OstreeDeployment::new(OSTREE_OSNAME, reference);

    let mut p = Pipeline::new("image-tree", Some("build"));
    p.add_stage(Stage::bare("org.osbuild.ostree.init-fs"));
    p.add_stage(new_ostree_pull_stage(
        OstreePullStageOptions {
            repo: OSTREE_REPO.to_string(),
            remote: Some(OSTREE_REMOTE.to_string()),
        },
        Input::ostree_commit(&commit.checksum, reference),
    ));
    p.add_stage(Stage::new(
        "org.osbuild.ostree.os-init",
        OstreeOsInitStageOptions {
            osname: OSTREE_OSNAME.to_string(),
        },
    ));
    p.add_stage(Stage::new(
        "org.osbuild.mkdir",
        MkdirStageOptions {
            paths: vec![MkdirStagePath {
                path: "/boot/efi".to_string(),
                mode: Some(0o700),
                parents: false,
                exist_ok: false,
            }],
        },
    ));

    let mut kernel_opts = vec!["rw".to_string()];
    kernel_opts.extend(kernel_options(ctx, Some(pt)).split_whitespace().map(str::to_string));
    let ignition = c.ignition.as_ref();
    if let Some(fb) = ignition.and_then(|i| i.firstboot.as_ref()) {
        kernel_opts.push(format!("ignition.config.url={}", fb.provisioning_url));
    }
    p.add_stage(Stage::new(
        "org.osbuild.ostree.deploy",
        OstreeDeployStageOptions {
            osname: OSTREE_OSNAME.to_string(),
            reference: reference.to_string(),
            remote: Some(OSTREE_REMOTE.to_string()),
            mounts: vec!["/boot".to_string(), "/boot/efi".to_string()],
            rootfs: OstreeRootfs {
                label: Some("root".to_string()),
                uuid: None,
            },
            kernel_opts,
        },
    ));
    p.add_stage(Stage::new(
        "org.osbuild.ostree.remotes",
        OstreeRemotesStageOptions {
            repo: OSTREE_REPO.to_string(),
            remotes: vec![OstreeRemote {
                name: OSTREE_REMOTE.to_string(),
                url: commit.url.clone(),
                content_url: commit.content_url.clone(),
                gpgkeys: Vec::new(),
            }],
        },
    ));
    p.add_stage(Stage::new(
        "org.osbuild.ostree.fillvar",
        OstreeFillvarStageOptions {
            deployment: deployment.clone(),
        },
    ));
    p.add_stage(Stage::new(
        "org.osbuild.ostree.config",
        OstreeConfigStageOptions {
            repo: OSTREE_REPO.to_string(),
            config: OstreeConfig {
                sysroot: OstreeSysrootConfig {
                    readonly: Some(true),
                    bootloader: Some("none".to_string()),
                },
            },
        },
    ));
    p.add_stage(new_fstab_stage(pt).mount_ostree(OSTREE_OSNAME, reference));

    let groups = c.get_groups();
    if !groups.is_empty() {
        p.add_stage(
            Stage::new("org.osbuild.groups", GroupsStageOptions::new(&groups))
                .mount_ostree(OSTREE_OSNAME, reference),
        );
    }
    let users = c.get_users();
    if !users.is_empty() {
        let users = UsersStageOptions::new(&users, false, ctx.crypter, &mut ctx.rng)?;
        p.add_stage(Stage::new("org.osbuild.users", users).mount_ostree(OSTREE_OSNAME, reference));
    }
    if let Some(embedded) = ignition.and_then(|i| i.embedded.as_ref()).filter(|_| embed_ignition) {
        let config = File::new(
            "/boot/ignition/config.ign",
            None,
            None,
            None,
            embedded.config.clone().into_bytes(),
        )?;
        p.add_stages(gen_file_stages(&[config], &mut ctx.sources));
    }

    let arch = ctx.handle.arch;
    let boot_mode = ctx.handle.boot_mode();
    let mut grub2 = Grub2StageOptions::new(
        pt,
        "",
        None,
        arch.legacy_platform.as_deref().filter(|_| boot_mode.has_legacy()),
        arch.uefi_vendor.as_deref().filter(|_| boot_mode.has_uefi()),
        false,
    )?;
    grub2.config = Some(Grub2Config {
        default: Some("saved".to_string()),
        timeout: Some(1),
        terminal_output: Some(vec!["console".to_string()]),
    });
    p.add_stage(Stage::new("org.osbuild.grub2", grub2));
    p.add_stage(Stage::new("org.osbuild.ostree.selinux", OstreeSelinuxStageOptions { deployment }));
    Ok(p)
}

/// A compressed raw disk with the commit deployed.
pub(crate) fn edge_raw_image(ctx: &mut ManifestContext<'_>) -> Result<Vec<Pipeline>> {
    let commit = ctx.required_ostree_commit()?;
    let pt = ctx.partition_table()?;
    let build = build_pipeline(ctx)?;
    let tree = raw_image_tree(ctx, &pt, &commit, true)?;
    let image = image_pipeline(ctx, &pt, RAW_EDGE_IMAGE, "image-tree")?;
    let mut archive = Pipeline::new("archive", Some("build"));
    archive.add_stage(new_xz_stage(&ctx.handle.image_type.filename, "image", RAW_EDGE_IMAGE));
    Ok(vec![build, tree, image, archive])
}

/// The coreos-installer runtime; also returns the version of its kernel.
fn coi_tree(ctx: &mut ManifestContext<'_>) -> Result<(Pipeline, String)> {
    const NAME: &str = "coi-tree";
    let packages = ctx.packages_for(NAME)?;
    let kernel_ver = find_version_release_arch(packages, "kernel")?;
    let distro = ctx.handle.distro;
    let arch = ctx.handle.arch.arch;
    let bp = ctx.bp;

    let mut p = Pipeline::new(NAME, Some("build"));
    p.add_stage(new_rpm_stage(
        RpmStageOptions {
            gpgkeys: ctx.repo_gpgkeys(NAME),
            ..Default::default()
        },
        packages,
    ));
    p.add_stage(Stage::new(
        "org.osbuild.buildstamp",
        BuildstampStageOptions {
            arch: arch.as_str().to_string(),
            product: distro.product.clone(),
            version: distro.os_version.clone(),
            is_final: true,
            variant: "edge".to_string(),
            bugurl: String::new(),
        },
    ));
    p.add_stage(Stage::new(
        "org.osbuild.locale",
        LocaleStageOptions {
            language: COI_LOCALE.to_string(),
        },
    ));

    let mut modules: Vec<String> = COI_DRACUT_MODULES.iter().map(|m| m.to_string()).collect();
    if arch == Arch::X86_64 {
        modules.push("biosdevname".to_string());
    }
    let mut install = vec!["/.buildstamp".to_string()];
    let root_certs = bp
        .customizations()
        .fdo
        .as_ref()
        .and_then(|f| f.diun_pub_key_root_certs.as_deref())
        .filter(|c| !c.is_empty());
    if let Some(certs) = root_certs {
        let id = ctx.sources.add_inline(certs.as_bytes());
        p.add_stage(
            Stage::new(
                "org.osbuild.fdo",
                FdoStageOptions {
                    rootcerts: "rootcerts".to_string(),
                },
            )
            .with_input("rootcerts", Input::source_files(vec![id])),
        );
        install = vec![FDO_ROOT_CERTS.to_string()];
    }
    p.add_stage(Stage::new(
        "org.osbuild.dracut",
        DracutStageOptions {
            kernel: vec![kernel_ver.clone()],
            modules,
            install,
            ..Default::default()
        },
    ));
    Ok((p, kernel_ver))
}

/// Kernel command line of the installer: where to install the image
/// from and to, and how to onboard the device.
fn coreos_installer_kernel_opts(ctx: &ManifestContext<'_>, isolabel: &str) -> Result<Vec<String>> {
    let c = ctx.bp.customizations();
    let device = c.get_installation_device().ok_or_else(|| {
        internal(format!("image type {} has no installation device", ctx.handle.name()))
    })?;
    let mut opts = vec![
        "rd.neednet=1".to_string(),
        "coreos.inst.crypt_root=1".to_string(),
        format!("coreos.inst.isoroot={}", isolabel),
        format!("coreos.inst.install_dev={}", device),
        format!("coreos.inst.image_file=/run/media/iso/{}", COMPRESSED_EDGE_IMAGE),
        "coreos.inst.insecure".to_string(),
    ];
    if let Some(fdo) = &c.fdo {
        let set = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());
        if let Some(url) = set(&fdo.manufacturing_server_url) {
            opts.push(format!("fdo.manufacturing_server_url={}", url));
        }
        if let Some(v) = set(&fdo.diun_pub_key_insecure) {
            opts.push(format!("fdo.diun_pub_key_insecure={}", v));
        }
        if let Some(v) = set(&fdo.diun_pub_key_hash) {
            opts.push(format!("fdo.diun_pub_key_hash={}", v));
        }
        if set(&fdo.diun_pub_key_root_certs).is_some() {
            opts.push(format!("fdo.diun_pub_key_root_certs={}", FDO_ROOT_CERTS));
        }
        if let Some(v) = set(&fdo.di_mfg_string_type_mac_iface) {
            opts.push(format!("fdo.di_mfg_string_type_mac_iface={}", v));
        }
    }
    Ok(opts)
}

/// ISO tree of the simplified installer: the compressed raw image, the
/// coreos-installer kernel and initrd, and the boot menus.
fn coi_iso_tree(
    ctx: &mut ManifestContext<'_>,
    kernel_ver: &str,
    product: &IsoProduct,
    kernel_opts: &[String],
) -> Result<Pipeline> {
    let bp = ctx.bp;
    let mut p = Pipeline::new("bootiso-tree", Some("build"));
    p.add_stage(
        Stage::new(
            "org.osbuild.copy",
            CopyStageOptions {
                paths: vec![CopyStagePath {
                    from: format!("input://file/{}", COMPRESSED_EDGE_IMAGE),
                    to: format!("tree:///{}", COMPRESSED_EDGE_IMAGE),
                    remove_destination: false,
                }],
            },
        )
        .with_input("file", Input::pipeline_file("xz", COMPRESSED_EDGE_IMAGE)),
    );
    let embedded = bp
        .customizations()
        .ignition
        .as_ref()
        .and_then(|i| i.embedded.as_ref());
    if let Some(embedded) = embedded {
        let config = File::new(
            COI_IGNITION_CONFIG,
            None,
            None,
            None,
            embedded.config.clone().into_bytes(),
        )?;
        p.add_stages(gen_file_stages(&[config], &mut ctx.sources));
    }
    p.add_stage(Stage::new(
        "org.osbuild.mkdir",
        MkdirStageOptions {
            paths: ["/images", PXEBOOT_DIR]
                .iter()
                .map(|path| MkdirStagePath {
                    path: path.to_string(),
                    mode: None,
                    parents: false,
                    exist_ok: false,
                })
                .collect(),
        },
    ));
    p.add_stages(gen_efiboot_stages("efiboot-tree", "EFI"));
    p.add_stage(new_pxeboot_copy_stage("coi-tree", kernel_ver));
    if ctx.handle.arch.arch == Arch::X86_64 && ctx.handle.boot_mode().has_legacy() {
        p.add_stage(new_isolinux_stage(
            IsolinuxStageOptions {
                product: product.clone(),
                kernel: IsoKernel {
                    dir: PXEBOOT_DIR.to_string(),
                    opts: kernel_opts.to_vec(),
                },
            },
            "coi-tree",
        ));
    }
    Ok(p)
}

/// ISO that writes a raw image of the commit onto a fixed device with
/// coreos-installer, then onboards it through FDO or ignition.
pub(crate) fn edge_simplified_installer(ctx: &mut ManifestContext<'_>) -> Result<Vec<Pipeline>> {
    let handle = ctx.handle;
    let commit = ctx.required_ostree_commit()?;
    let pt = ctx.partition_table()?;
    let isolabel = handle
        .isolabel()
        .ok_or_else(|| internal(format!("image type {} has no ISO label", handle.name())))?;
    let product = IsoProduct {
        name: handle.distro.product.clone(),
        version: handle.distro.os_version.clone(),
    };
    let kernel_opts = coreos_installer_kernel_opts(ctx, &isolabel)?;

    let build = build_pipeline(ctx)?;
    let tree = raw_image_tree(ctx, &pt, &commit, false)?;
    let image = image_pipeline(ctx, &pt, RAW_EDGE_IMAGE, "image-tree")?;
    let mut xz = Pipeline::new("xz", Some("build"));
    xz.add_stage(new_xz_stage(COMPRESSED_EDGE_IMAGE, "image", RAW_EDGE_IMAGE));
    let (coi, kernel_ver) = coi_tree(ctx)?;

    let mut efiboot = Pipeline::new("efiboot-tree", Some("build"));
    efiboot.add_stage(Stage::new(
        "org.osbuild.grub2.iso",
        Grub2IsoStageOptions {
            product: product.clone(),
            kernel: IsoKernel {
                dir: PXEBOOT_DIR.to_string(),
                opts: kernel_opts.clone(),
            },
            isolabel,
            architectures: vec![efi_arch(handle.arch.arch)?.to_string()],
            vendor: handle.arch.uefi_vendor.clone(),
        },
    ));

    let iso_tree = coi_iso_tree(ctx, &kernel_ver, &product, &kernel_opts)?;
    let iso = bootiso(ctx)?;
    Ok(vec![build, tree, image, xz, coi, efiboot, iso_tree, iso])
}
