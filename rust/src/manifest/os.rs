// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The build root and the operating system tree shared by all templates.

use anyhow::{Context, Result};

use super::{ManifestContext, OstreeCommit, SubscriptionOptions};
use crate::blueprint::customizations::OpenScapCustomization;
use crate::blueprint::fsnode::{directories_to_fsnodes, files_to_fsnodes};
use crate::container::{self, OSTREE_CONTAINER_STORAGE};
use crate::disk::PartitionTable;
use crate::error::internal;
use crate::fsnode::File;
use crate::imageconfig::SubscriptionStatus;
use crate::osbuild::{
    gen_container_storage_stages, gen_directory_stages, gen_file_stages, gen_yum_repos_stages,
    merge_unique, new_fstab_stage, new_ostree_passwd_stage, new_rpm_stage, ChronyStageOptions,
    DracutStageOptions, FirewallStageOptions, FirewallZone, FirstBootStageOptions,
    FixBlsStageOptions, Grub2StageOptions, GroupsStageOptions, HostnameStageOptions,
    KernelCmdlineStageOptions, KeymapStageOptions, LocaleStageOptions,
    OscapAutotailorConfig, OscapAutotailorStageOptions, OscapConfig,
    OscapRemediationStageOptions, OstreePrepTreeStageOptions, Pipeline, RhsmFacts,
    RhsmFactsStageOptions, RpmExclude, RpmStageOptions, SelinuxStageOptions, Stage,
    SystemdStageOptions, TimezoneStageOptions, UpdateCryptoPoliciesStageOptions,
    UsersStageOptions, ZiplStageOptions,
};
use crate::platform::Arch;

pub(crate) const FILE_CONTEXTS: &str = "etc/selinux/targeted/contexts/files/file_contexts";

/// rpm database location inside ostree commits.
const OSTREE_RPM_DBPATH: &str = "/usr/share/rpm";
const OSCAP_DATA_DIR: &str = "/oscap_data";
const OSCAP_TAILORING_FILE: &str = "/oscap_data/tailoring.xml";

const FIPS_MARKER: &str = "/etc/system-fips";
const FIPS_MARKER_CONTENT: &str = "# FIPS module installation complete\n";

/// The host build root every other pipeline runs in.
pub(crate) fn build_pipeline(ctx: &mut ManifestContext<'_>) -> Result<Pipeline> {
    let packages = ctx.packages_for("build")?;
    let mut p = Pipeline::new_build("build", &ctx.handle.distro.runner);
    let opts = RpmStageOptions {
        gpgkeys: ctx.repo_gpgkeys("build"),
        ..Default::default()
    };
    p.add_stage(new_rpm_stage(opts, packages));
    p.add_stage(Stage::new("org.osbuild.selinux", SelinuxStageOptions::new(FILE_CONTEXTS)));
    Ok(p)
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct OsPipelineOptions<'p> {
    /// Pipeline name, which is also the key of its resolved packages.
    pub name: &'p str,
    /// Layout of the disk the tree boots from, if any.
    pub pt: Option<&'p PartitionTable>,
    /// Whether the tree becomes an ostree commit.
    pub ostree: bool,
    /// Commit whose users and groups the tree inherits.
    pub parent: Option<&'p OstreeCommit>,
}

/// Kernel command line: image type options, then what the partition
/// table needs, then the blueprint's additions.
pub(crate) fn kernel_options(ctx: &ManifestContext<'_>, pt: Option<&PartitionTable>) -> String {
    let c = ctx.bp.customizations();
    let mut opts: Vec<String> = vec![ctx.handle.image_type.kernel_options.clone()];
    if let Some(pt) = pt {
        opts.extend(pt.kernel_options());
    }
    if c.get_fips() {
        opts.push("fips=1".to_string());
        let boot_uuid = pt
            .and_then(|pt| pt.find("/boot").and_then(|p| pt.mountable(p)))
            .and_then(|m| m.uuid());
        if let Some(uuid) = boot_uuid {
            opts.push(format!("boot=UUID={}", uuid));
        }
    }
    opts.push(c.get_kernel().1);
    opts.retain(|o| !o.is_empty());
    opts.join(" ")
}

fn quote(s: &str) -> Result<String> {
    shlex::try_quote(s)
        .map(|q| q.into_owned())
        .with_context(|| format!("Quoting {:?}", s))
}

/// First-boot commands registering the machine.
fn subscription_commands(sub: &SubscriptionOptions) -> Result<Vec<String>> {
    let mut cmds = vec![format!(
        "/usr/sbin/subscription-manager register --org={} --activationkey={} --serverurl {} --baseurl {}",
        quote(&sub.organization)?,
        quote(&sub.activation_key)?,
        quote(&sub.server_url)?,
        quote(&sub.base_url)?
    )];
    if sub.insights {
        cmds.push("/usr/bin/insights-client --register".to_string());
    }
    Ok(cmds)
}

fn firewall_options(ctx: &ManifestContext<'_>) -> Option<FirewallStageOptions> {
    let c = ctx.bp.customizations();
    let Some(fw) = &c.firewall else {
        return ctx.config.firewall.clone();
    };
    let mut opts = ctx.config.firewall.clone().unwrap_or_default();
    opts.ports = merge_unique(&opts.ports, fw.ports.as_deref().unwrap_or_default());
    if let Some(services) = &fw.services {
        opts.enabled_services = merge_unique(
            &opts.enabled_services,
            services.enabled.as_deref().unwrap_or_default(),
        );
        opts.disabled_services = merge_unique(
            &opts.disabled_services,
            services.disabled.as_deref().unwrap_or_default(),
        );
    }
    for z in fw.zones.iter().flatten() {
        let Some(name) = &z.name else { continue };
        opts.zones.push(FirewallZone {
            name: name.clone(),
            sources: z.sources.clone().unwrap_or_default(),
        });
    }
    Some(opts)
}

/// Inline gpg keys of custom repositories, as files under the key
/// directory.
fn repo_gpg_key_files(ctx: &ManifestContext<'_>) -> Result<Vec<File>> {
    let mut files = Vec::new();
    for repo in &ctx.bp.customizations().repositories {
        let (keys, _) = repo.gpg_key_files();
        for (path, contents) in keys {
            files.push(File::new(&path, None, None, None, contents.into_bytes())?);
        }
    }
    Ok(files)
}

/// Remediation against the blueprint's profile, tailored first when the
/// blueprint asks for it.
fn oscap_stages(oscap: &OpenScapCustomization) -> Vec<Stage> {
    let mut stages = Vec::new();
    let autotailor = match (&oscap.tailoring, &oscap.json_tailoring) {
        (Some(t), _) => Some(OscapAutotailorConfig::Override {
            new_profile: format!("{}_osbuild_tailoring", oscap.profile_id),
            datastream: oscap.datastream.clone(),
            profile_id: oscap.profile_id.clone(),
            selected: t.selected.clone(),
            unselected: t.unselected.clone(),
        }),
        (None, Some(j)) => Some(OscapAutotailorConfig::Json {
            tailored_profile_id: j.profile_id.clone(),
            datastream: oscap.datastream.clone(),
            tailoring_file: j.filepath.clone(),
        }),
        (None, None) => None,
    };
    let mut config = OscapConfig {
        datastream: oscap.datastream.clone(),
        profile_id: oscap.profile_id.clone(),
        tailoring: None,
    };
    if let Some(autotailor) = autotailor {
        config.profile_id = match &autotailor {
            OscapAutotailorConfig::Override { new_profile, .. } => new_profile.clone(),
            OscapAutotailorConfig::Json {
                tailored_profile_id, ..
            } => tailored_profile_id.clone(),
        };
        config.tailoring = Some(OSCAP_TAILORING_FILE.to_string());
        stages.push(Stage::new(
            "org.osbuild.oscap.autotailor",
            OscapAutotailorStageOptions {
                filepath: OSCAP_TAILORING_FILE.to_string(),
                config: autotailor,
            },
        ));
    }
    stages.push(Stage::new(
        "org.osbuild.oscap.remediation",
        OscapRemediationStageOptions {
            data_dir: Some(OSCAP_DATA_DIR.to_string()),
            config,
        },
    ));
    stages
}

fn bootloader_stage(
    ctx: &ManifestContext<'_>,
    pt: &PartitionTable,
    kernel_opts: &str,
    kernel_ver: &str,
) -> Result<Option<Stage>> {
    let arch = ctx.handle.arch;
    if arch.arch == Arch::S390x {
        return Ok(Some(Stage::new("org.osbuild.zipl", ZiplStageOptions::default())));
    }
    let boot_mode = ctx.handle.boot_mode();
    let legacy = arch.legacy_platform.as_deref().filter(|_| boot_mode.has_legacy());
    let uefi = arch.uefi_vendor.as_deref().filter(|_| boot_mode.has_uefi());
    if legacy.is_none() && uefi.is_none() {
        return Ok(None);
    }
    let opts = Grub2StageOptions::new(pt, kernel_opts, Some(kernel_ver), legacy, uefi, false)?;
    Ok(Some(Stage::new("org.osbuild.grub2", opts)))
}

/// The operating system tree: packages, then configuration from the
/// image config and the blueprint, then the bootloader.
#[tracing::instrument(skip_all, fields(pipeline = opts.name))]
pub(crate) fn os_pipeline(ctx: &mut ManifestContext<'_>, opts: OsPipelineOptions<'_>) -> Result<Pipeline> {
    let bp = ctx.bp;
    let c = bp.customizations();
    let t = ctx.handle.image_type;
    let packages = ctx.packages_for(opts.name)?;
    let mut p = Pipeline::new(opts.name, Some("build"));

    if let Some(parent) = opts.parent {
        p.add_stage(new_ostree_passwd_stage(&parent.checksum, &parent.reference));
    }

    let kernel_opts = kernel_options(ctx, opts.pt);
    let boot = match opts.pt {
        Some(pt) if t.bootable => Some((pt, ctx.kernel_version(opts.name)?)),
        _ => None,
    };
    if let Some((pt, _)) = &boot {
        let root_fs_uuid = pt
            .root_fs_uuid()
            .ok_or_else(|| internal("partition table has no root filesystem with a UUID"))?;
        p.add_stage(Stage::new(
            "org.osbuild.kernel-cmdline",
            KernelCmdlineStageOptions {
                root_fs_uuid: root_fs_uuid.to_string(),
                kernel_opts: kernel_opts.clone(),
            },
        ));
    }

    let rpm_opts = RpmStageOptions {
        dbpath: opts.ostree.then(|| OSTREE_RPM_DBPATH.to_string()),
        gpgkeys: ctx.repo_gpgkeys(opts.name),
        gpgkeys_fromtree: merge_unique(
            ctx.config.gpgkey_files.as_deref().unwrap_or_default(),
            c.get_rpm_import_keys(),
        ),
        exclude: ctx
            .config
            .exclude_docs
            .filter(|&d| d)
            .map(|docs| RpmExclude { docs }),
        ostree_booted: opts.ostree.then_some(true),
        ..Default::default()
    };
    p.add_stage(new_rpm_stage(rpm_opts, packages));

    let separate_boot = opts.pt.map_or(false, |pt| pt.contains_mountpoint("/boot"));
    p.add_stage(Stage::new(
        "org.osbuild.fix-bls",
        FixBlsStageOptions {
            prefix: separate_boot.then(String::new),
        },
    ));

    if !bp.containers.is_empty() {
        let containers = container::resolve(&bp.containers, &ctx.options.containers)?;
        ctx.sources.add_containers(&containers);
        let storage_path = match &c.containers_storage {
            Some(s) => Some(s.destination_path.as_str()),
            None => opts.ostree.then_some(OSTREE_CONTAINER_STORAGE),
        };
        p.add_stages(gen_container_storage_stages(storage_path, &containers));
    }

    let (language, keyboard) = c.get_primary_locale();
    if let Some(language) = language.map(str::to_string).or_else(|| ctx.config.locale.clone()) {
        p.add_stage(Stage::new("org.osbuild.locale", LocaleStageOptions { language }));
    }
    let keymap = match keyboard {
        Some(k) => Some(KeymapStageOptions {
            keymap: k.to_string(),
            x11_keymap: None,
        }),
        None => ctx.config.keyboard.clone(),
    };
    if let Some(keymap) = keymap {
        p.add_stage(Stage::new("org.osbuild.keymap", keymap));
    }
    if let Some(hostname) = c.get_hostname() {
        p.add_stage(Stage::new(
            "org.osbuild.hostname",
            HostnameStageOptions {
                hostname: hostname.to_string(),
            },
        ));
    }
    let (timezone, ntpservers) = c.get_timezone_settings();
    if let Some(zone) = timezone.map(str::to_string).or_else(|| ctx.config.timezone.clone()) {
        p.add_stage(Stage::new("org.osbuild.timezone", TimezoneStageOptions { zone }));
    }
    let chrony = match ntpservers {
        Some(servers) if !servers.is_empty() => Some(ChronyStageOptions::with_servers(servers)),
        _ => ctx.config.time_synchronization.clone(),
    };
    if let Some(chrony) = chrony {
        p.add_stage(Stage::new("org.osbuild.chrony", chrony));
    }

    let groups = c.get_groups();
    if !groups.is_empty() {
        p.add_stage(Stage::new("org.osbuild.groups", GroupsStageOptions::new(&groups)));
    }

    let mut first_boot: Option<FirstBootStageOptions> = None;
    let users = c.get_users();
    if !users.is_empty() {
        let users = UsersStageOptions::new(&users, false, ctx.crypter, &mut ctx.rng)?;
        if opts.ostree {
            // keys live under /var, which commits do not carry
            let mut stripped = users.clone();
            for u in stripped.users.values_mut() {
                u.key = None;
            }
            p.add_stage(Stage::new("org.osbuild.users", stripped));
            first_boot = Some(FirstBootStageOptions::authorized_keys(&users));
        } else {
            p.add_stage(Stage::new("org.osbuild.users", users));
        }
    }
    if let Some(sub) = &ctx.options.subscription {
        let fb = first_boot.get_or_insert_with(|| FirstBootStageOptions {
            commands: Vec::new(),
            wait_for_network: false,
        });
        fb.commands.extend(subscription_commands(sub)?);
        fb.wait_for_network = true;
    }
    if let Some(fb) = first_boot {
        p.add_stage(Stage::new("org.osbuild.first-boot", fb));
    }

    if let Some(fw) = firewall_options(ctx) {
        p.add_stage(Stage::new("org.osbuild.firewall", fw));
    }

    let systemd = SystemdStageOptions {
        enabled_services: merge_unique(
            ctx.config.enabled_services.as_deref().unwrap_or_default(),
            c.get_enabled_services(),
        ),
        disabled_services: merge_unique(
            ctx.config.disabled_services.as_deref().unwrap_or_default(),
            c.get_disabled_services(),
        ),
        masked_services: merge_unique(
            ctx.config.masked_services.as_deref().unwrap_or_default(),
            c.get_masked_services(),
        ),
        default_target: ctx.config.default_target.clone(),
    };
    if !systemd.is_empty() {
        p.add_stage(Stage::new("org.osbuild.systemd", systemd));
    }

    if let Some(sysconfig) = ctx.config.sysconfig.clone() {
        p.add_stage(Stage::new("org.osbuild.sysconfig", sysconfig));
    }
    let status = if ctx.options.subscription.is_some() {
        SubscriptionStatus::Subscribed
    } else {
        SubscriptionStatus::Unsubscribed
    };
    if let Some(rhsm) = ctx.config.rhsm_config.as_ref().and_then(|m| m.get(&status)) {
        p.add_stage(Stage::new("org.osbuild.rhsm", rhsm.clone()));
    }
    if let Some(facts) = ctx.options.facts.as_ref().filter(|_| ctx.handle.distro.is_rhel()) {
        p.add_stage(Stage::new(
            "org.osbuild.rhsm.facts",
            RhsmFactsStageOptions {
                facts: RhsmFacts {
                    api_type: facts.api_type.clone(),
                },
            },
        ));
    }
    if let Some(sshd) = ctx.config.sshd_config.clone() {
        p.add_stage(Stage::new("org.osbuild.sshd.config", sshd));
    }
    for m in ctx.config.modprobe.iter().flatten() {
        p.add_stage(Stage::new("org.osbuild.modprobe", m.clone()));
    }
    for d in ctx.config.dracut_conf.iter().flatten() {
        p.add_stage(Stage::new("org.osbuild.dracut.conf", d.clone()));
    }
    if let Some(selinux) = ctx.config.selinux_config.clone() {
        p.add_stage(Stage::new("org.osbuild.selinux.config", selinux));
    }
    if let Some(dnf) = ctx.config.dnf_config.clone() {
        p.add_stage(Stage::new("org.osbuild.dnf.config", dnf));
    }

    p.add_stages(gen_yum_repos_stages(&c.repositories));
    let dirs = directories_to_fsnodes(&c.directories)?;
    let mut files = files_to_fsnodes(&c.files)?;
    files.extend(repo_gpg_key_files(ctx)?);
    p.add_stages(gen_directory_stages(&dirs));
    p.add_stages(gen_file_stages(&files, &mut ctx.sources));

    if c.get_fips() {
        if let Some((_, kernel_ver)) = &boot {
            p.add_stage(Stage::new(
                "org.osbuild.dracut",
                DracutStageOptions {
                    kernel: vec![kernel_ver.clone()],
                    add_modules: vec!["fips".to_string()],
                    ..Default::default()
                },
            ));
        }
    }

    if let Some(pt) = opts.pt {
        p.add_stage(new_fstab_stage(pt));
    }

    if c.get_fips() {
        p.add_stage(Stage::new(
            "org.osbuild.update-crypto-policies",
            UpdateCryptoPoliciesStageOptions {
                policy: "FIPS".to_string(),
            },
        ));
        let marker = File::new(FIPS_MARKER, None, None, None, FIPS_MARKER_CONTENT.as_bytes().to_vec())?;
        p.add_stages(gen_file_stages(&[marker], &mut ctx.sources));
    }

    // remediation may change permissions, so it runs right before relabeling
    if let Some(oscap) = &c.openscap {
        p.add_stages(oscap_stages(oscap));
    }

    if ctx.config.no_selinux != Some(true) {
        let mut selinux = SelinuxStageOptions::new(FILE_CONTEXTS);
        selinux.force_autorelabel = ctx.config.selinux_force_relabel;
        p.add_stage(Stage::new("org.osbuild.selinux", selinux));
    }

    if let Some((pt, kernel_ver)) = &boot {
        if let Some(stage) = bootloader_stage(ctx, pt, &kernel_opts, kernel_ver)? {
            p.add_stage(stage);
        }
    }

    if opts.ostree {
        p.add_stage(Stage::new(
            "org.osbuild.ostree.preptree",
            OstreePrepTreeStageOptions {
                etc_group_members: vec!["wheel".to_string(), "docker".to_string()],
                ..Default::default()
            },
        ));
    }

    tracing::debug!(stages = p.stages.len(), "assembled os pipeline");
    Ok(p)
}
