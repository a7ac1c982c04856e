// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Assembles the manifest of one image: checks a blueprint against the
//! image type, computes the package sets to resolve, and lowers the
//! blueprint plus the resolved packages into pipelines.
//!
//! Every image type carries an [`ImageFn`] template. Templates receive a
//! [`ManifestContext`] holding the inputs, the layered image config, the
//! accumulated sources and the seeded random number generator which all
//! UUIDs and password salts are drawn from.

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_derive::Deserialize;

use crate::blueprint::disk::FsType;
use crate::blueprint::filesystem::check_mountpoints_policy;
use crate::blueprint::fsnode::{check_directory_customizations_policy, check_file_customizations_policy};
use crate::blueprint::Blueprint;
use crate::container::ContainerSpec;
use crate::crypt::Crypter;
use crate::datasizes::Size;
use crate::disk::{
    default_required_sizes, new_custom_partition_table, new_partition_table,
    CustomPartitionTableOptions, PartitionTable, PartitioningMode, PlanOptions,
};
use crate::error::{internal, missing_dependency, unsupported};
use crate::imageconfig::ImageConfig;
use crate::osbuild::{Manifest, Pipeline, Sources};
use crate::pathpolicy::{CUSTOM_DIRECTORIES_POLICIES, CUSTOM_FILES_POLICIES, MOUNTPOINT_POLICIES};
use crate::registry::ImageTypeHandle;
use crate::rpmmd::{
    filter_repos, find_version_release_arch, PackageSet, PackageSetChains, PackageSpec, RepoConfig,
    ResolvedPackages,
};

mod os;
pub(crate) mod templates;

pub(crate) use os::{build_pipeline, os_pipeline, OsPipelineOptions};

/// Lowers an image type into its pipelines, in manifest order.
pub type ImageFn = fn(&mut ManifestContext<'_>) -> Result<Vec<Pipeline>>;

/// Image types installing these cannot be built without a commit to pull.
const EDGE_RAW_IMAGE: &str = "edge-raw-image";
const EDGE_INSTALLER: &str = "edge-installer";
const EDGE_SIMPLIFIED_INSTALLER: &str = "edge-simplified-installer";

/// Placeholder commit used to compute package sets before the real commit
/// is known.
const FAKE_CHECKSUM: &str = "ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff";

/// Per-request options that are not part of the blueprint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImageOptions {
    /// Requested image size; zero picks the image type's default.
    pub size: Size,
    pub subscription: Option<SubscriptionOptions>,
    pub ostree: Option<OstreeImageOptions>,
    pub facts: Option<FactsOptions>,
    pub partitioning_mode: Option<PartitioningMode>,
    /// The blueprint's containers, resolved by the caller.
    pub containers: Vec<ContainerSpec>,
}

/// Registration of the image with a subscription service on first boot.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SubscriptionOptions {
    pub organization: String,
    pub activation_key: String,
    pub server_url: String,
    pub base_url: String,
    pub insights: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OstreeImageOptions {
    /// Repository the commit (or the parent commit) is pulled from.
    pub url: Option<String>,
    pub content_url: Option<String>,
    #[serde(rename = "ref")]
    pub reference: Option<String>,
    /// Ref of the parent commit, when it differs from `ref`.
    pub parent: Option<String>,
    /// Checksum of the commit to pull, resolved from `url` by the caller.
    pub fetch_checksum: Option<String>,
    /// Whether pulling the commit needs subscription secrets.
    pub rhsm: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FactsOptions {
    pub api_type: String,
}

/// A commit pulled into the build and registered as a source.
#[derive(Debug, Clone)]
pub(crate) struct OstreeCommit {
    pub checksum: String,
    pub reference: String,
    pub url: String,
    pub content_url: Option<String>,
}

/// Everything a template needs while assembling one manifest.
pub struct ManifestContext<'a> {
    pub handle: ImageTypeHandle<'a>,
    pub bp: &'a Blueprint,
    pub options: &'a ImageOptions,
    pub repos: &'a [RepoConfig],
    packages: &'a ResolvedPackages,
    /// Image type config layered on the distro's.
    pub config: ImageConfig,
    pub crypter: &'a dyn Crypter,
    pub rng: StdRng,
    pub sources: Sources,
}

impl<'a> ManifestContext<'a> {
    pub fn new(
        handle: ImageTypeHandle<'a>,
        bp: &'a Blueprint,
        options: &'a ImageOptions,
        repos: &'a [RepoConfig],
        packages: &'a ResolvedPackages,
        seed: u64,
        crypter: &'a dyn Crypter,
    ) -> Self {
        Self {
            handle,
            bp,
            options,
            repos,
            packages,
            config: handle.default_image_config(),
            crypter,
            rng: StdRng::seed_from_u64(seed),
            sources: Sources::default(),
        }
    }

    /// The resolved packages of `pipeline`, registered as sources.
    pub fn packages_for(&mut self, pipeline: &str) -> Result<&'a [PackageSpec]> {
        let packages: &'a ResolvedPackages = self.packages;
        let pkgs = packages.get(pipeline).ok_or_else(|| {
            missing_dependency(format!("no resolved packages for pipeline {}", pipeline))
        })?;
        self.sources.add_packages(pkgs)?;
        Ok(pkgs)
    }

    /// `version-release.arch` of the blueprint's kernel in `pipeline`.
    pub fn kernel_version(&self, pipeline: &str) -> Result<String> {
        let (kernel, _) = self.bp.customizations().get_kernel();
        let pkgs = self.packages.get(pipeline).map(|p| p.as_slice()).unwrap_or_default();
        find_version_release_arch(pkgs, &kernel)
            .with_context(|| format!("Finding kernel version for pipeline {}", pipeline))
    }

    /// GPG keys of the repositories feeding `pipeline`.
    pub fn repo_gpgkeys(&self, pipeline: &str) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        for repo in filter_repos(self.repos, pipeline) {
            if !repo.check_gpg.unwrap_or(false) {
                continue;
            }
            for k in repo.gpgkeys {
                if !keys.contains(&k) {
                    keys.push(k);
                }
            }
        }
        keys
    }

    /// Plan the disk layout: from the blueprint's disk customization when
    /// present, otherwise by growing the base table of the architecture.
    pub fn partition_table(&mut self) -> Result<PartitionTable> {
        let t = self.handle.image_type;
        let arch = self.handle.arch.arch;
        let size = self.handle.size(self.options.size.bytes());
        let c = self.bp.customizations();
        let base = t.base_partition_tables.get(&arch);
        if let Some(disk) = &c.disk {
            let opts = CustomPartitionTableOptions {
                pt_type: base.map(|b| b.pt_type),
                boot_mode: self.handle.boot_mode(),
                default_fs_type: Some(FsType::Xfs),
                required_min_sizes: default_required_sizes(),
                arch: Some(arch),
            };
            let mut pt = new_custom_partition_table(disk, &opts, &mut self.rng)?;
            if pt.size < size {
                pt.relayout(size)?;
            }
            return Ok(pt);
        }
        let base = base.ok_or_else(|| {
            unsupported(format!(
                "no partition table defined for architecture {} of image type {}",
                arch, t.name
            ))
        })?;
        let mode = self.options.partitioning_mode.unwrap_or(if t.rpm_ostree {
            PartitioningMode::Raw
        } else {
            PartitioningMode::AutoLvm
        });
        new_partition_table(base, &c.filesystem, size, &PlanOptions::new(mode, arch), &mut self.rng)
    }

    /// The ref commits are made on or pulled from.
    pub fn ostree_ref(&self) -> Result<String> {
        self.options
            .ostree
            .as_ref()
            .and_then(|o| o.reference.clone())
            .or_else(|| self.handle.ostree_ref())
            .ok_or_else(|| internal(format!("image type {} has no ostree ref", self.handle.name())))
    }

    /// The commit named by `fetch_checksum`, registered as a source, or
    /// `None` when no commit was given. `parent` selects the ref of a
    /// parent commit over the image's own ref.
    pub(crate) fn ostree_commit(&mut self, parent: bool) -> Result<Option<OstreeCommit>> {
        let Some(o) = self.options.ostree.as_ref() else {
            return Ok(None);
        };
        let Some(checksum) = o.fetch_checksum.clone() else {
            return Ok(None);
        };
        let url = o.url.clone().ok_or_else(|| {
            unsupported(format!(
                "image type {} requires a URL to pull ostree commit {} from",
                self.handle.name(),
                checksum
            ))
        })?;
        let reference = match (&o.parent, parent) {
            (Some(p), true) => p.clone(),
            _ => self.ostree_ref()?,
        };
        self.sources
            .add_ostree_commit(&checksum, &url, o.content_url.as_deref(), o.rhsm);
        Ok(Some(OstreeCommit {
            checksum,
            reference,
            url,
            content_url: o.content_url.clone(),
        }))
    }

    /// The commit an installer or raw image deploys.
    pub(crate) fn required_ostree_commit(&mut self) -> Result<OstreeCommit> {
        self.ostree_commit(false)?.ok_or_else(|| {
            unsupported(format!(
                "image type {} requires specifying a URL from which to retrieve the OSTree commit",
                self.handle.name()
            ))
        })
    }
}

fn has_fetch_checksum(options: &ImageOptions) -> bool {
    options
        .ostree
        .as_ref()
        .map_or(false, |o| o.fetch_checksum.as_deref().map_or(false, |c| !c.is_empty()))
}

/// Reject blueprint and option combinations the image type cannot build.
fn check_options(handle: ImageTypeHandle<'_>, bp: &Blueprint, options: &ImageOptions) -> Result<()> {
    let t = handle.image_type;
    let c = bp.customizations();

    if t.rpm_ostree
        && !bp.containers.is_empty()
        && !matches!(t.name.as_str(), "edge-commit" | "edge-container")
    {
        return Err(unsupported(format!(
            "embedding containers is not supported for {} on {}",
            t.name, handle.distro.name
        )));
    }

    if t.boot_iso && t.rpm_ostree {
        if !has_fetch_checksum(options) {
            return Err(unsupported(format!(
                "boot ISO image type {:?} requires specifying a URL from which to retrieve the OSTree commit",
                t.name
            )));
        }
        let allowed: &[&str] = match t.name.as_str() {
            EDGE_INSTALLER => &["User", "Group"],
            EDGE_SIMPLIFIED_INSTALLER => &["InstallationDevice", "FDO", "Ignition", "Kernel", "User", "Group"],
            _ => &[],
        };
        if !allowed.is_empty() {
            c.check_allowed(allowed).map_err(|_| {
                unsupported(format!(
                    "unsupported blueprint customizations found for boot ISO image type {:?}: (allowed: {})",
                    t.name,
                    allowed.join(", ")
                ))
            })?;
        }
    }

    if t.name == EDGE_SIMPLIFIED_INSTALLER {
        if c.get_installation_device().is_none() {
            return Err(unsupported(format!(
                "boot ISO image type {:?} requires specifying an installation device to install to",
                t.name
            )));
        }
    } else {
        if c.get_installation_device().is_some() {
            return Err(unsupported(format!(
                "installation device customization is not supported for image type {:?}",
                t.name
            )));
        }
        if c.fdo.is_some() {
            return Err(unsupported(format!(
                "FDO customization is not supported for image type {:?}",
                t.name
            )));
        }
    }

    if t.name == EDGE_RAW_IMAGE {
        if !has_fetch_checksum(options) {
            return Err(unsupported(
                "edge raw images require specifying a URL from which to retrieve the OSTree commit",
            ));
        }
        let allowed = ["User", "Group", "Kernel", "Ignition"];
        c.check_allowed(&allowed).map_err(|_| {
            unsupported(format!(
                "unsupported blueprint customizations found for image type {:?}: (allowed: {})",
                t.name,
                allowed.join(", ")
            ))
        })?;
    }

    if t.rpm_ostree && !matches!(t.name.as_str(), EDGE_RAW_IMAGE | EDGE_SIMPLIFIED_INSTALLER) {
        let (_, append) = c.get_kernel();
        if !append.is_empty() {
            return Err(unsupported(
                "kernel boot parameter customizations are not supported for ostree types",
            ));
        }
    }

    if t.rpm_ostree {
        if !c.filesystem.is_empty() {
            return Err(unsupported("Custom mountpoints are not supported for ostree types"));
        }
        if c.disk.is_some() {
            return Err(unsupported("Custom partitioning is not supported for ostree types"));
        }
    }
    check_mountpoints_policy(c.mountpoints(), &MOUNTPOINT_POLICIES)?;

    if let Some(oscap) = &c.openscap {
        if t.rpm_ostree {
            return Err(unsupported("OpenSCAP customizations are not supported for ostree types"));
        }
        if oscap.datastream.is_empty() {
            return Err(unsupported("OpenSCAP datastream cannot be empty"));
        }
        if oscap.profile_id.is_empty() {
            return Err(unsupported("OpenSCAP profile cannot be empty"));
        }
        if !handle.distro.is_oscap_profile_allowed(&oscap.profile_id) {
            return Err(unsupported(format!(
                "OpenSCAP unsupported profile: {}",
                oscap.profile_id
            )));
        }
    }

    check_directory_customizations_policy(&c.directories, &CUSTOM_DIRECTORIES_POLICIES)?;
    check_file_customizations_policy(&c.files, &CUSTOM_FILES_POLICIES)?;

    if t.boot_iso {
        c.validate_installer()?;
    }
    Ok(())
}

/// Image types that need a commit can still have their package sets
/// computed before the commit is resolved.
fn with_fake_commit(handle: ImageTypeHandle<'_>, options: &ImageOptions) -> Option<ImageOptions> {
    let t = handle.image_type;
    let needs_commit = t.rpm_ostree && (t.boot_iso || t.name == EDGE_RAW_IMAGE);
    if !needs_commit || has_fetch_checksum(options) {
        return None;
    }
    tracing::warn!(
        image_type = t.name.as_str(),
        "no ostree commit given, using a placeholder to compute package sets"
    );
    let mut o = options.clone();
    let ostree = o.ostree.get_or_insert_with(OstreeImageOptions::default);
    ostree.fetch_checksum = Some(FAKE_CHECKSUM.to_string());
    Some(o)
}

/// Package sets to resolve for each pipeline, with the repositories each
/// may use.
#[tracing::instrument(skip_all, fields(image_type = %handle.full_name()))]
pub(crate) fn package_sets(
    handle: ImageTypeHandle<'_>,
    bp: &Blueprint,
    options: &ImageOptions,
    repos: &[RepoConfig],
) -> Result<PackageSetChains> {
    bp.validate()?;
    let faked = with_fake_commit(handle, options);
    check_options(handle, bp, faked.as_ref().unwrap_or(options))?;

    let t = handle.image_type;
    let c = bp.customizations();
    let mut chains = PackageSetChains::new();
    for (&pipeline, f) in &t.package_sets {
        let mut base = f(&handle).normalized();
        base.repositories = filter_repos(repos, pipeline);
        let mut chain = vec![base];
        if pipeline == "build" {
            let mut extra: Vec<&str> = Vec::new();
            if !bp.containers.is_empty() {
                extra.push("skopeo");
                if c.containers_storage.is_some() {
                    extra.push("python3-toml");
                }
            }
            let tailored = c
                .openscap
                .as_ref()
                .map_or(false, |o| o.tailoring.is_some() || o.json_tailoring.is_some());
            if tailored {
                extra.push("openscap-utils");
            }
            if !extra.is_empty() {
                let mut tools = PackageSet::new(&extra).normalized();
                tools.repositories = filter_repos(repos, pipeline);
                chain.push(tools);
            }
        }
        if matches!(pipeline, "os" | "ostree-tree") {
            let mut extra = bp.get_packages(t.bootable || t.rpm_ostree);
            if c.get_timezone_settings().1.map_or(false, |s| !s.is_empty()) {
                extra.push("chrony".to_string());
            }
            if c.openscap.is_some() {
                extra.extend(["openscap-scanner", "scap-security-guide"].map(String::from));
            }
            let mut user = PackageSet::new(&extra).normalized();
            if !user.is_empty() {
                user.repositories = filter_repos(repos, pipeline);
                chain.push(user);
            }
        }
        chains.insert(pipeline.to_string(), chain);
    }
    tracing::debug!(sets = chains.len(), "computed package sets");
    Ok(chains)
}

/// Check the request and lower it into a manifest.
#[tracing::instrument(skip_all, fields(image_type = %handle.full_name(), seed = seed))]
pub(crate) fn generate(
    handle: ImageTypeHandle<'_>,
    bp: &Blueprint,
    options: &ImageOptions,
    repos: &[RepoConfig],
    packages: &ResolvedPackages,
    seed: u64,
    crypter: &dyn Crypter,
) -> Result<Manifest> {
    bp.validate()?;
    check_options(handle, bp, options)?;

    let t = handle.image_type;
    let mut ctx = ManifestContext::new(handle, bp, options, repos, packages, seed, crypter);
    let pipelines = (t.image_fn)(&mut ctx)?;
    let names = pipelines.iter().map(|p| p.name.as_str());
    if !names.eq(t.pipelines()) {
        return Err(internal(format!(
            "image type {} produced pipelines {:?}, expected {:?}",
            t.name,
            pipelines.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            t.pipelines().collect::<Vec<_>>()
        )));
    }
    tracing::debug!(pipelines = pipelines.len(), "assembled manifest");
    Ok(Manifest::new(pipelines, ctx.sources))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypt::Sha512Crypt;
    use crate::error::ImageError;
    use crate::registry::default_registry;
    use crate::utils::InputFormat;
    use indoc::indoc;
    use serde_json::{json, Value};

    const MINIMAL: &str = indoc! {r#"
        name = "minimal"
        version = "0.0.1"
    "#};

    const WITH_USER: &str = indoc! {r#"
        name = "user"
        version = "0.0.1"

        [[customizations.user]]
        name = "alice"
        password = "hunter2"
        groups = ["wheel"]
    "#};

    const SIMPLIFIED: &str = indoc! {r#"
        name = "simplified"

        [customizations]
        installation_device = "/dev/vda"

        [customizations.fdo]
        manufacturing_server_url = "http://10.0.0.2:8080"
        diun_pub_key_root_certs = "-----BEGIN CERTIFICATE-----"

        [customizations.ignition.embedded]
        config = "eyJpZ25pdGlvbiI6e319"
    "#};

    const WITH_CONTAINER: &str = indoc! {r#"
        name = "containers"

        [[containers]]
        source = "quay.io/fedora/fedora:40"
        name = "localhost/fedora"
    "#};

    fn bp(s: &str) -> Blueprint {
        Blueprint::parse_str(InputFormat::TOML, s).unwrap()
    }

    fn spec(name: &str, arch: &str) -> PackageSpec {
        PackageSpec {
            name: name.to_string(),
            version: "5.14.0".to_string(),
            release: "427.el9".to_string(),
            arch: arch.to_string(),
            remote_location: format!("https://example.com/{}.rpm", name),
            checksum: format!("sha256:{:0>64}", name),
            ..Default::default()
        }
    }

    /// A kernel and a shell for every pipeline that installs packages.
    fn fake_packages(h: &ImageTypeHandle<'_>) -> ResolvedPackages {
        let arch = h.arch.arch.as_str();
        h.image_type
            .package_sets
            .keys()
            .map(|p| (p.to_string(), vec![spec("kernel", arch), spec("bash", arch)]))
            .collect()
    }

    fn edge_options() -> ImageOptions {
        ImageOptions {
            ostree: Some(OstreeImageOptions {
                url: Some("https://example.com/repo".to_string()),
                fetch_checksum: Some("a".repeat(64)),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn container_options() -> ImageOptions {
        ImageOptions {
            containers: vec![ContainerSpec {
                source: "quay.io/fedora/fedora:40".to_string(),
                digest: format!("sha256:{}", "b".repeat(64)),
                image_id: format!("sha256:{}", "c".repeat(64)),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    /// Paths the copy stages of `pipeline` write to.
    fn copied_to(m: &Manifest, pipeline: &str) -> Vec<String> {
        let p = serde_json::to_value(m.pipeline(pipeline).unwrap()).unwrap();
        p["stages"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|s| s["type"] == "org.osbuild.copy")
            .flat_map(|s| s["options"]["paths"].as_array().unwrap().clone())
            .map(|p| p["to"].as_str().unwrap().to_string())
            .collect()
    }

    fn generate(handle: &str, bp: &Blueprint, options: &ImageOptions, seed: u64) -> Result<Manifest> {
        let h = default_registry()?.get_image_type(handle)?;
        let packages = fake_packages(&h);
        h.manifest(bp, options, &[], &packages, seed, &Sha512Crypt)
    }

    fn stage_options(m: &Manifest, pipeline: &str, stage: &str) -> Value {
        let p = m.pipeline(pipeline).unwrap();
        let s = p
            .stage(stage)
            .unwrap_or_else(|| panic!("no {} in {}: {:?}", stage, pipeline, p.stage_types()));
        serde_json::to_value(s).unwrap()["options"].clone()
    }

    fn unsupported_msg(e: &anyhow::Error) -> &str {
        match ImageError::kind_of(e) {
            Some(ImageError::UnsupportedForImageType(m)) => m.as_str(),
            o => panic!("unexpected error {:#}: {:?}", e, o),
        }
    }

    #[test]
    fn test_qcow2() -> Result<()> {
        let m = generate("rhel-9/x86_64/qcow2", &bp(MINIMAL), &ImageOptions::default(), 0)?;
        assert_eq!(m.pipeline_names(), vec!["build", "os", "image", "qcow2"]);

        let sfdisk = stage_options(&m, "image", "org.osbuild.sfdisk");
        assert_eq!(sfdisk["label"], "gpt");
        assert_eq!(sfdisk["partitions"][0]["start"], 2048);

        let fstab = stage_options(&m, "os", "org.osbuild.fstab");
        let roots: Vec<&Value> = fstab["filesystems"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|f| f["path"] == "/")
            .collect();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0]["vfs_type"], "xfs");

        let grub2 = stage_options(&m, "os", "org.osbuild.grub2");
        assert_eq!(grub2["root_fs_uuid"], roots[0]["uuid"]);
        assert_eq!(grub2["legacy"], "i386-pc");

        let os = m.pipeline("os").unwrap();
        assert!(os.stage("org.osbuild.users").is_none());
        let image = m.pipeline("image").unwrap();
        assert!(image.stage("org.osbuild.grub2.inst").is_some());
        let qemu = stage_options(&m, "qcow2", "org.osbuild.qemu");
        assert_eq!(qemu["filename"], "disk.qcow2");
        assert!(m.sources.curl.is_some());
        Ok(())
    }

    #[test]
    fn test_ami_is_not_converted() -> Result<()> {
        let m = generate("rhel-9/x86_64/ami", &bp(MINIMAL), &ImageOptions::default(), 0)?;
        assert_eq!(m.pipeline_names(), vec!["build", "os", "image"]);
        let image = m.pipeline("image").unwrap();
        assert!(!image.stage_types().contains(&"org.osbuild.qemu"));
        let grub2 = stage_options(&m, "os", "org.osbuild.grub2");
        assert!(grub2.get("uefi").is_none());
        Ok(())
    }

    #[test]
    fn test_ami_aarch64_boots_uefi() -> Result<()> {
        let m = generate("rhel-9/aarch64/ami", &bp(MINIMAL), &ImageOptions::default(), 0)?;
        let grub2 = stage_options(&m, "os", "org.osbuild.grub2");
        assert_eq!(grub2["uefi"]["vendor"], "redhat");
        assert!(grub2.get("legacy").is_none());
        let sfdisk = stage_options(&m, "image", "org.osbuild.sfdisk");
        assert_eq!(sfdisk["label"], "gpt");
        Ok(())
    }

    #[test]
    fn test_user_password() -> Result<()> {
        let bp = bp(WITH_USER);
        let password = |seed| -> Result<String> {
            let m = generate("rhel-9/x86_64/qcow2", &bp, &ImageOptions::default(), seed)?;
            let users = stage_options(&m, "os", "org.osbuild.users");
            Ok(users["users"]["alice"]["password"].as_str().unwrap().to_string())
        };
        let first = password(7)?;
        let parts: Vec<&str> = first.split('$').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[1], "6");
        assert_eq!(parts[2].len(), 16);
        assert_eq!(first, password(7)?);
        assert_ne!(first, password(8)?);
        Ok(())
    }

    #[test]
    fn test_deterministic() -> Result<()> {
        let bp = bp(WITH_USER);
        for handle in ["rhel-9/x86_64/qcow2", "rhel-9/aarch64/image-installer"] {
            let a = generate(handle, &bp, &ImageOptions::default(), 42)?.to_json()?;
            let b = generate(handle, &bp, &ImageOptions::default(), 42)?.to_json()?;
            similar_asserts::assert_eq!(a, b);
            let c = generate(handle, &bp, &ImageOptions::default(), 43)?.to_json()?;
            assert_ne!(a, c);
        }
        Ok(())
    }

    #[test]
    fn test_ostree_kernel_append() {
        let bp = bp(indoc! {r#"
            name = "edge"

            [customizations.kernel]
            append = "nosmt"
        "#});
        let e = generate("rhel-9/x86_64/edge-commit", &bp, &ImageOptions::default(), 0).unwrap_err();
        assert_eq!(
            unsupported_msg(&e),
            "kernel boot parameter customizations are not supported for ostree types"
        );
        // raw images deploy with the appended options
        let m = generate("rhel-9/x86_64/edge-raw-image", &bp, &edge_options(), 0).unwrap();
        let deploy = stage_options(&m, "image-tree", "org.osbuild.ostree.deploy");
        let opts = deploy["kernel_opts"].as_array().unwrap();
        assert_eq!(opts[0], "rw");
        assert_eq!(*opts.last().unwrap(), "nosmt");
    }

    #[test]
    fn test_edge_commit() -> Result<()> {
        let m = generate("rhel-9/x86_64/rhel-edge-commit", &bp(MINIMAL), &ImageOptions::default(), 0)?;
        assert_eq!(
            m.pipeline_names(),
            vec!["build", "ostree-tree", "ostree-commit", "commit-archive"]
        );
        let commit = stage_options(&m, "ostree-commit", "org.osbuild.ostree.commit");
        assert_eq!(commit["ref"], "rhel/9/x86_64/edge");
        assert!(commit.get("parent").map_or(true, Value::is_null));
        assert!(m.sources.ostree.is_none());
        let tree = m.pipeline("ostree-tree").unwrap();
        assert!(tree.stage("org.osbuild.ostree.passwd").is_none());
        assert!(tree.stage("org.osbuild.ostree.preptree").is_some());

        let m = generate("rhel-9/x86_64/edge-commit", &bp(MINIMAL), &edge_options(), 0)?;
        let commit = stage_options(&m, "ostree-commit", "org.osbuild.ostree.commit");
        assert_eq!(commit["parent"], "a".repeat(64));
        assert_eq!(
            m.pipeline("ostree-tree").unwrap().stages[0].stage_type,
            "org.osbuild.ostree.passwd"
        );
        assert!(m.sources.ostree.is_some());
        Ok(())
    }

    #[test]
    fn test_edge_container() -> Result<()> {
        let m = generate("rhel-9/aarch64/edge-container", &bp(MINIMAL), &ImageOptions::default(), 0)?;
        assert_eq!(
            m.pipeline_names(),
            vec!["build", "ostree-tree", "ostree-commit", "container-tree", "container"]
        );
        let oci = stage_options(&m, "container", "org.osbuild.oci-archive");
        assert_eq!(oci["architecture"], "aarch64");
        assert_eq!(oci["config"]["ExposedPorts"], serde_json::json!(["8080"]));
        Ok(())
    }

    #[test]
    fn test_edge_installer() -> Result<()> {
        let e = generate("rhel-9/x86_64/edge-installer", &bp(MINIMAL), &ImageOptions::default(), 0)
            .unwrap_err();
        assert_eq!(
            unsupported_msg(&e),
            "boot ISO image type \"edge-installer\" requires specifying a URL from which to retrieve the OSTree commit"
        );

        let hostname = bp(indoc! {r#"
            name = "edge"

            [customizations]
            hostname = "box"
        "#});
        let e = generate("rhel-9/x86_64/edge-installer", &hostname, &edge_options(), 0).unwrap_err();
        assert_eq!(
            unsupported_msg(&e),
            "unsupported blueprint customizations found for boot ISO image type \"edge-installer\": (allowed: User, Group)"
        );

        let m = generate("rhel-9/x86_64/edge-installer", &bp(WITH_USER), &edge_options(), 0)?;
        assert_eq!(
            m.pipeline_names(),
            vec!["build", "anaconda-tree", "bootiso-tree", "bootiso"]
        );
        let ks = stage_options(&m, "bootiso-tree", "org.osbuild.kickstart");
        assert_eq!(ks["ostree"]["ref"], "rhel/9/x86_64/edge");
        assert!(ks["users"]["alice"]["password"].as_str().unwrap().starts_with("$6$"));
        let tree = m.pipeline("bootiso-tree").unwrap();
        assert!(tree.stage("org.osbuild.isolinux").is_some());
        let xorriso = stage_options(&m, "bootiso", "org.osbuild.xorrisofs");
        assert_eq!(xorriso["volid"], "RHEL-9-4-0-BaseOS-x86_64");
        Ok(())
    }

    #[test]
    fn test_image_installer_kickstart() -> Result<()> {
        let bp = bp(indoc! {r#"
            name = "installer"

            [customizations.installer]
            unattended = true
            sudo-nopasswd = ["alice"]
        "#});
        let m = generate("rhel-9/x86_64/image-installer", &bp, &ImageOptions::default(), 0)?;
        assert_eq!(
            m.pipeline_names(),
            vec!["build", "os", "anaconda-tree", "bootiso-tree", "bootiso"]
        );
        let ks = stage_options(&m, "bootiso-tree", "org.osbuild.kickstart");
        assert_eq!(ks["liveimg"]["url"], "file:///run/install/repo/liveimg.tar.gz");
        assert_eq!(ks["zerombr"], true);
        // the stage writes a base kickstart which the included file pulls in
        assert_ne!(ks["path"], crate::kickstart::KICKSTART_PATH);
        assert!(m.sources.inline.is_some());
        Ok(())
    }

    #[test]
    fn test_all_image_types() -> Result<()> {
        let r = default_registry()?;
        let minimal = bp(MINIMAL);
        let simplified = bp(SIMPLIFIED);
        for d in r.list_distros() {
            let distro = r.get_distro(d)?;
            for a in distro.list_arches() {
                for t in distro.get_arch(a)?.list_image_types() {
                    let handle = format!("{}/{}/{}", d, a, t);
                    let h = r.get_image_type(&handle)?;
                    let options = if h.image_type.rpm_ostree {
                        edge_options()
                    } else {
                        ImageOptions::default()
                    };
                    let bp = if t == EDGE_SIMPLIFIED_INSTALLER {
                        &simplified
                    } else {
                        &minimal
                    };
                    let m = generate(&handle, bp, &options, 0)
                        .unwrap_or_else(|e| panic!("{}: {:#}", handle, e));
                    let expected: Vec<&str> = h.image_type.pipelines().collect();
                    assert_eq!(m.pipeline_names(), expected, "{}", handle);
                    assert_eq!(m.version, "2");
                }
            }
        }
        Ok(())
    }

    #[test]
    fn test_missing_packages() {
        let r = default_registry().unwrap();
        let h = r.get_image_type("rhel-9/x86_64/tar").unwrap();
        let e = h
            .manifest(&bp(MINIMAL), &ImageOptions::default(), &[], &ResolvedPackages::new(), 0, &Sha512Crypt)
            .unwrap_err();
        assert!(matches!(ImageError::kind_of(&e), Some(ImageError::MissingDependency(_))));
    }

    #[test]
    fn test_package_sets() -> Result<()> {
        let r = default_registry()?;
        let repos = vec![
            RepoConfig {
                name: "baseos".to_string(),
                baseurls: vec!["https://example.com/baseos".to_string()],
                ..Default::default()
            },
            RepoConfig {
                name: "extras".to_string(),
                baseurls: vec!["https://example.com/extras".to_string()],
                package_sets: vec!["os".to_string()],
                ..Default::default()
            },
        ];
        let bp = bp(indoc! {r#"
            name = "sets"

            [[packages]]
            name = "tmux"

            [customizations.timezone]
            ntpservers = ["0.pool.ntp.org"]
        "#});
        let h = r.get_image_type("rhel-9/x86_64/qcow2")?;
        let sets = h.package_sets(&bp, &ImageOptions::default(), &repos)?;
        assert_eq!(sets.keys().collect::<Vec<_>>(), vec!["build", "os"]);
        assert_eq!(sets["build"].len(), 1);
        assert_eq!(sets["build"][0].repositories.len(), 1);
        let os = &sets["os"];
        assert_eq!(os.len(), 2);
        assert_eq!(os[1].include, vec!["chrony", "kernel", "tmux"]);
        assert_eq!(os[1].repositories.len(), 2);
        let base = &os[0].include;
        let mut sorted = base.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(base, &sorted);

        // placeholder commit until the real one is known
        let iso = r.get_image_type("rhel-9/x86_64/edge-installer")?;
        let sets = iso.package_sets(&self::bp(MINIMAL), &ImageOptions::default(), &[])?;
        assert_eq!(sets.keys().collect::<Vec<_>>(), vec!["anaconda-tree", "build"]);
        Ok(())
    }

    #[test]
    fn test_ostree_rejects_custom_layout() {
        let fs = bp(indoc! {r#"
            name = "fs"

            [[customizations.filesystem]]
            mountpoint = "/var"
            minsize = 1073741824
        "#});
        let e = generate("rhel-9/x86_64/edge-commit", &fs, &ImageOptions::default(), 0).unwrap_err();
        assert_eq!(unsupported_msg(&e), "Custom mountpoints are not supported for ostree types");

        let m = generate("rhel-9/x86_64/qcow2", &fs, &ImageOptions::default(), 0).unwrap();
        let fstab = stage_options(&m, "os", "org.osbuild.fstab");
        assert!(fstab["filesystems"].as_array().unwrap().iter().any(|f| f["path"] == "/var"));

        let etc = bp(indoc! {r#"
            name = "etc"

            [[customizations.filesystem]]
            mountpoint = "/etc"
            minsize = 1073741824
        "#});
        let e = generate("rhel-9/x86_64/qcow2", &etc, &ImageOptions::default(), 0).unwrap_err();
        assert!(matches!(ImageError::kind_of(&e), Some(ImageError::PolicyViolation(_))));
    }

    #[test]
    fn test_edge_raw_image_customizations() {
        let bp = bp(indoc! {r#"
            name = "raw"

            [customizations]
            hostname = "box"
        "#});
        let e = generate("rhel-9/x86_64/edge-raw-image", &bp, &edge_options(), 0).unwrap_err();
        assert_eq!(
            unsupported_msg(&e),
            "unsupported blueprint customizations found for image type \"edge-raw-image\": (allowed: User, Group, Kernel, Ignition)"
        );
        let e = generate("rhel-9/x86_64/edge-raw-image", &bp, &ImageOptions::default(), 0).unwrap_err();
        assert_eq!(
            unsupported_msg(&e),
            "edge raw images require specifying a URL from which to retrieve the OSTree commit"
        );
    }

    #[test]
    fn test_fips() -> Result<()> {
        let bp = bp(indoc! {r#"
            name = "fips"

            [customizations]
            fips = true
        "#});
        let m = generate("rhel-9/x86_64/qcow2", &bp, &ImageOptions::default(), 0)?;
        let fstab = stage_options(&m, "os", "org.osbuild.fstab");
        let boot = fstab["filesystems"]
            .as_array()
            .unwrap()
            .iter()
            .find(|f| f["path"] == "/boot")
            .unwrap()
            .clone();
        let cmdline = stage_options(&m, "os", "org.osbuild.kernel-cmdline");
        let opts: Vec<&str> = cmdline["kernel_opts"].as_str().unwrap().split(' ').collect();
        assert!(opts.contains(&"fips=1"));
        let boot_opt = format!("boot=UUID={}", boot["uuid"].as_str().unwrap());
        assert!(opts.contains(&boot_opt.as_str()));
        let grub2 = stage_options(&m, "os", "org.osbuild.grub2");
        assert!(grub2["kernel_opts"].as_str().unwrap().contains(&boot_opt));

        let dracut = stage_options(&m, "os", "org.osbuild.dracut");
        assert_eq!(dracut["add_modules"], json!(["fips"]));
        assert_eq!(dracut["kernel"].as_array().unwrap().len(), 1);
        let policy = stage_options(&m, "os", "org.osbuild.update-crypto-policies");
        assert_eq!(policy, json!({"policy": "FIPS"}));
        assert!(copied_to(&m, "os").contains(&"tree:///etc/system-fips".to_string()));
        let marker = crate::osbuild::inline_id(b"# FIPS module installation complete\n");
        assert!(m.sources.inline.as_ref().unwrap().items.contains_key(&marker));

        // no disk, so the initrd is left alone
        let m = generate("rhel-9/x86_64/tar", &bp, &ImageOptions::default(), 0)?;
        let os = m.pipeline("os").unwrap();
        assert!(os.stage("org.osbuild.dracut").is_none());
        assert!(os.stage("org.osbuild.update-crypto-policies").is_some());
        Ok(())
    }

    #[test]
    fn test_openscap_tailoring() -> Result<()> {
        let bp = bp(indoc! {r#"
            name = "oscap"

            [customizations.openscap]
            datastream = "/usr/share/xml/scap/ssg/content/ssg-rhel9-ds.xml"
            profile_id = "xccdf_org.ssgproject.content_profile_cis"

            [customizations.openscap.tailoring]
            selected = ["xccdf_org.ssgproject.content_rule_grub2_password"]
            unselected = ["xccdf_org.ssgproject.content_rule_sshd_disable_root_login"]
        "#});
        let m = generate("rhel-9/x86_64/qcow2", &bp, &ImageOptions::default(), 0)?;
        let types = m.pipeline("os").unwrap().stage_types();
        let tailor = types.iter().position(|t| *t == "org.osbuild.oscap.autotailor").unwrap();
        assert_eq!(types[tailor + 1], "org.osbuild.oscap.remediation");
        assert_eq!(types[tailor + 2], "org.osbuild.selinux");

        let tailored = "xccdf_org.ssgproject.content_profile_cis_osbuild_tailoring";
        let autotailor = stage_options(&m, "os", "org.osbuild.oscap.autotailor");
        assert_eq!(autotailor["filepath"], "/oscap_data/tailoring.xml");
        assert_eq!(autotailor["config"]["new_profile"], tailored);
        assert_eq!(autotailor["config"]["profile_id"], "xccdf_org.ssgproject.content_profile_cis");
        assert_eq!(
            autotailor["config"]["selected"],
            json!(["xccdf_org.ssgproject.content_rule_grub2_password"])
        );
        let remediation = stage_options(&m, "os", "org.osbuild.oscap.remediation");
        assert_eq!(remediation["config"]["profile_id"], tailored);
        assert_eq!(remediation["config"]["tailoring"], "/oscap_data/tailoring.xml");

        let h = default_registry()?.get_image_type("rhel-9/x86_64/qcow2")?;
        let sets = h.package_sets(&bp, &ImageOptions::default(), &[])?;
        assert_eq!(sets["build"][1].include, vec!["openscap-utils"]);
        Ok(())
    }

    #[test]
    fn test_openscap_json_tailoring() -> Result<()> {
        let bp = bp(indoc! {r#"
            name = "oscap"

            [customizations.openscap]
            datastream = "/usr/share/xml/scap/ssg/content/ssg-rhel9-ds.xml"
            profile_id = "cis"

            [customizations.openscap.json_tailoring]
            profile_id = "cis_custom"
            filepath = "/etc/oscap/tailoring.json"
        "#});
        let m = generate("rhel-9/x86_64/qcow2", &bp, &ImageOptions::default(), 0)?;
        let autotailor = stage_options(&m, "os", "org.osbuild.oscap.autotailor");
        assert_eq!(
            autotailor["config"],
            json!({
                "tailored_profile_id": "cis_custom",
                "datastream": "/usr/share/xml/scap/ssg/content/ssg-rhel9-ds.xml",
                "tailoring_file": "/etc/oscap/tailoring.json"
            })
        );
        let remediation = stage_options(&m, "os", "org.osbuild.oscap.remediation");
        assert_eq!(remediation["config"]["profile_id"], "cis_custom");
        Ok(())
    }

    #[test]
    fn test_openscap_profile_allowed() {
        let bp = bp(indoc! {r#"
            name = "oscap"

            [customizations.openscap]
            datastream = "/usr/share/xml/scap/ssg/content/ssg-rhel9-ds.xml"
            profile_id = "xccdf_org.ssgproject.content_profile_nonexistent"
        "#});
        let e = generate("rhel-9/x86_64/qcow2", &bp, &ImageOptions::default(), 0).unwrap_err();
        assert_eq!(
            unsupported_msg(&e),
            "OpenSCAP unsupported profile: xccdf_org.ssgproject.content_profile_nonexistent"
        );
    }

    #[test]
    fn test_containers() -> Result<()> {
        let bp = bp(WITH_CONTAINER);
        let m = generate("rhel-9/x86_64/qcow2", &bp, &container_options(), 0)?;
        let image_id = format!("sha256:{}", "c".repeat(64));
        let skopeo = m.pipeline("os").unwrap().stage("org.osbuild.skopeo").unwrap();
        let v = serde_json::to_value(skopeo)?;
        assert_eq!(v["options"], json!({"destination": {"type": "containers-storage"}}));
        assert_eq!(v["inputs"]["images"]["type"], "org.osbuild.containers");
        assert_eq!(
            v["inputs"]["images"]["references"][&image_id],
            json!({"name": "localhost/fedora"})
        );
        let item = &m.sources.skopeo.as_ref().unwrap().items[&image_id];
        assert_eq!(item.image.name, "quay.io/fedora/fedora:40");
        assert_eq!(item.image.digest, format!("sha256:{}", "b".repeat(64)));
        assert!(m.pipeline("os").unwrap().stage("org.osbuild.containers.storage.conf").is_none());

        let h = default_registry()?.get_image_type("rhel-9/x86_64/qcow2")?;
        let sets = h.package_sets(&bp, &ImageOptions::default(), &[])?;
        assert_eq!(sets["build"][1].include, vec!["skopeo"]);

        let e = generate("rhel-9/x86_64/qcow2", &bp, &ImageOptions::default(), 0).unwrap_err();
        assert!(matches!(ImageError::kind_of(&e), Some(ImageError::MissingDependency(_))));
        Ok(())
    }

    #[test]
    fn test_containers_storage() -> Result<()> {
        let m = generate("rhel-9/x86_64/edge-commit", &bp(WITH_CONTAINER), &container_options(), 0)?;
        let conf = stage_options(&m, "ostree-tree", "org.osbuild.containers.storage.conf");
        assert_eq!(
            conf["config"]["storage"]["options"]["additionalimagestores"],
            json!(["/usr/share/containers/storage"])
        );
        let skopeo = stage_options(&m, "ostree-tree", "org.osbuild.skopeo");
        assert_eq!(skopeo["destination"]["storage-path"], "/usr/share/containers/storage");

        let custom = bp(indoc! {r#"
            name = "containers"

            [[containers]]
            source = "quay.io/fedora/fedora:40"

            [customizations.containers-storage]
            destination-path = "/srv/containers"
        "#});
        let m = generate("rhel-9/x86_64/tar", &custom, &container_options(), 0)?;
        let skopeo = stage_options(&m, "os", "org.osbuild.skopeo");
        assert_eq!(skopeo["destination"]["storage-path"], "/srv/containers");

        for handle in [
            "rhel-9/x86_64/edge-installer",
            "rhel-9/x86_64/edge-raw-image",
            "rhel-9/x86_64/edge-simplified-installer",
        ] {
            let e = generate(handle, &bp(WITH_CONTAINER), &edge_options(), 0).unwrap_err();
            assert!(
                unsupported_msg(&e).starts_with("embedding containers is not supported"),
                "{}",
                handle
            );
        }
        Ok(())
    }

    #[test]
    fn test_edge_simplified_installer() -> Result<()> {
        let handle = "rhel-9/x86_64/edge-simplified-installer";
        let m = generate(handle, &bp(SIMPLIFIED), &edge_options(), 0)?;
        assert_eq!(
            m.pipeline_names(),
            vec![
                "build",
                "image-tree",
                "image",
                "xz",
                "coi-tree",
                "efiboot-tree",
                "bootiso-tree",
                "bootiso"
            ]
        );

        let deploy = stage_options(&m, "image-tree", "org.osbuild.ostree.deploy");
        assert!(deploy["kernel_opts"].as_array().unwrap().contains(&json!("coreos.no_persist_ip")));
        assert!(!copied_to(&m, "image-tree").contains(&"tree:///boot/ignition/config.ign".to_string()));
        let xz = stage_options(&m, "xz", "org.osbuild.xz");
        assert_eq!(xz["filename"], "image.raw.xz");

        let fdo = m.pipeline("coi-tree").unwrap().stage("org.osbuild.fdo").unwrap();
        let fdo = serde_json::to_value(fdo)?;
        assert_eq!(fdo["options"], json!({"rootcerts": "rootcerts"}));
        let certs = crate::osbuild::inline_id(b"-----BEGIN CERTIFICATE-----");
        assert_eq!(fdo["inputs"]["rootcerts"]["references"], json!([certs]));
        let dracut = stage_options(&m, "coi-tree", "org.osbuild.dracut");
        assert_eq!(dracut["install"], json!(["/fdo_diun_pub_key_root_certs.pem"]));
        let modules = dracut["modules"].as_array().unwrap();
        assert!(modules.contains(&json!("coreos-installer")));
        assert!(modules.contains(&json!("biosdevname")));

        let grub2 = stage_options(&m, "efiboot-tree", "org.osbuild.grub2.iso");
        let opts = grub2["kernel"]["opts"].as_array().unwrap();
        for o in [
            "coreos.inst.isoroot=RHEL-9-4-0-BaseOS-x86_64",
            "coreos.inst.install_dev=/dev/vda",
            "coreos.inst.image_file=/run/media/iso/image.raw.xz",
            "fdo.manufacturing_server_url=http://10.0.0.2:8080",
            "fdo.diun_pub_key_root_certs=/fdo_diun_pub_key_root_certs.pem",
        ] {
            assert!(opts.contains(&json!(o)), "{}", o);
        }
        let isolinux = stage_options(&m, "bootiso-tree", "org.osbuild.isolinux");
        assert_eq!(isolinux["kernel"]["opts"], grub2["kernel"]["opts"]);

        let copies = copied_to(&m, "bootiso-tree");
        assert_eq!(copies[0], "tree:///image.raw.xz");
        assert!(copies.contains(&"tree:///ignition_config".to_string()));
        let xorriso = stage_options(&m, "bootiso", "org.osbuild.xorrisofs");
        assert_eq!(xorriso["filename"], "simplified-installer.iso");

        let m = generate("rhel-9/aarch64/edge-simplified-installer", &bp(SIMPLIFIED), &edge_options(), 0)?;
        assert!(m.pipeline("bootiso-tree").unwrap().stage("org.osbuild.isolinux").is_none());
        let dracut = stage_options(&m, "coi-tree", "org.osbuild.dracut");
        assert!(!dracut["modules"].as_array().unwrap().contains(&json!("biosdevname")));
        Ok(())
    }

    #[test]
    fn test_edge_simplified_installer_customizations() {
        let handle = "rhel-9/x86_64/edge-simplified-installer";
        let e = generate(handle, &bp(MINIMAL), &edge_options(), 0).unwrap_err();
        assert_eq!(
            unsupported_msg(&e),
            "boot ISO image type \"edge-simplified-installer\" requires specifying an installation device to install to"
        );
        let hostname = bp(indoc! {r#"
            name = "simplified"

            [customizations]
            hostname = "box"
            installation_device = "/dev/vda"
        "#});
        let e = generate(handle, &hostname, &edge_options(), 0).unwrap_err();
        assert_eq!(
            unsupported_msg(&e),
            "unsupported blueprint customizations found for boot ISO image type \"edge-simplified-installer\": (allowed: InstallationDevice, FDO, Ignition, Kernel, User, Group)"
        );
        let e = generate(handle, &bp(SIMPLIFIED), &ImageOptions::default(), 0).unwrap_err();
        assert!(unsupported_msg(&e).contains("requires specifying a URL"));

        // only the simplified installer consumes these
        let e = generate("rhel-9/x86_64/qcow2", &hostname, &ImageOptions::default(), 0).unwrap_err();
        assert_eq!(
            unsupported_msg(&e),
            "installation device customization is not supported for image type \"qcow2\""
        );
        let fdo = bp(indoc! {r#"
            name = "fdo"

            [customizations.fdo]
            manufacturing_server_url = "http://10.0.0.2:8080"
            diun_pub_key_insecure = "true"
        "#});
        let e = generate("rhel-9/x86_64/edge-commit", &fdo, &ImageOptions::default(), 0).unwrap_err();
        assert_eq!(
            unsupported_msg(&e),
            "FDO customization is not supported for image type \"edge-commit\""
        );
    }
}
