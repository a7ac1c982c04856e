// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The catalogue of buildable images: distros, their architectures, and the
//! image types each architecture offers.
//!
//! Everything is owned top-down in ordered maps. An architecture only names
//! its distro; the link is resolved by lookup when an image type is fetched,
//! which yields an [`ImageTypeHandle`] bundling all three levels.

use anyhow::Result;
use fn_error_context::context;
use once_cell::sync::Lazy;
use std::collections::BTreeMap;

use crate::blueprint::Blueprint;
use crate::crypt::Crypter;
use crate::datasizes::MIB;
use crate::disk::PartitionTable;
use crate::error::{internal, unknown_entity, ImageError};
use crate::imageconfig::ImageConfig;
use crate::manifest::{self, ImageFn, ImageOptions};
use crate::osbuild::{ImageFormat, Manifest};
use crate::platform::{Arch, BootMode};
use crate::rpmmd::{PackageSet, PackageSetChains, RepoConfig, ResolvedPackages};

/// Computes one package set of an image type.
pub type PackageSetFn = fn(&ImageTypeHandle<'_>) -> PackageSet;

/// Placeholder replaced by the architecture name in distro templates.
const ARCH_PLACEHOLDER: &str = "{arch}";

#[derive(Debug, Default)]
pub struct Registry {
    distros: BTreeMap<String, Distro>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, distro: Distro) -> Result<()> {
        if self.distros.contains_key(&distro.name) {
            return Err(ImageError::DuplicateDistro(distro.name).into());
        }
        tracing::debug!(distro = distro.name.as_str(), "registered distro");
        self.distros.insert(distro.name.clone(), distro);
        Ok(())
    }

    pub fn get_distro(&self, name: &str) -> Result<&Distro> {
        self.distros
            .get(name)
            .ok_or_else(|| unknown_entity(format!("unknown distro: {}", name)))
    }

    /// Distro names, sorted.
    pub fn list_distros(&self) -> Vec<&str> {
        self.distros.keys().map(|k| k.as_str()).collect()
    }

    /// Resolve a `distro/arch/image-type` handle; the image type may be
    /// given by one of its aliases.
    pub fn get_image_type(&self, handle: &str) -> Result<ImageTypeHandle<'_>> {
        let parts: Vec<&str> = handle.split('/').collect();
        let [distro, arch, image_type] = parts[..] else {
            return Err(unknown_entity(format!(
                "invalid image type handle {:?}, expected <distro>/<arch>/<image-type>",
                handle
            )));
        };
        let distro = self.get_distro(distro)?;
        let arch = distro.get_arch(arch)?;
        let image_type = arch.get_image_type(image_type)?;
        Ok(ImageTypeHandle {
            distro,
            arch,
            image_type,
        })
    }
}

static DEFAULT_REGISTRY: Lazy<Result<Registry>> = Lazy::new(crate::distro::new_registry);

/// The process-wide registry of built-in distros, built on first use.
pub fn default_registry() -> Result<&'static Registry> {
    DEFAULT_REGISTRY
        .as_ref()
        .map_err(|e| internal(format!("initializing distro registry: {:#}", e)))
}

const OSCAP_PROFILE_PREFIX: &str = "xccdf_org.ssgproject.content_profile_";

#[derive(Debug)]
pub struct Distro {
    pub name: String,
    pub product: String,
    pub os_version: String,
    pub release_version: String,
    pub module_platform_id: String,
    pub vendor: String,
    /// OSTree ref of edge commits, with `{arch}` substituted.
    pub ostree_ref_template: String,
    /// Volume ID of installer ISOs, with `{arch}` substituted.
    pub isolabel_template: String,
    /// Build root runner for this distro's build pipelines.
    pub runner: String,
    pub default_image_config: ImageConfig,
    /// OpenSCAP profiles images may be remediated against, as full XCCDF
    /// ids.
    pub oscap_profiles: &'static [&'static str],
    pub(crate) arches: BTreeMap<String, Architecture>,
}

impl Distro {
    pub fn add_arch(&mut self, mut arch: Architecture) -> Result<()> {
        let name = arch.arch.as_str().to_string();
        if self.arches.contains_key(&name) {
            return Err(internal(format!(
                "duplicate architecture {} in distro {}",
                name, self.name
            )));
        }
        arch.distro = self.name.clone();
        self.arches.insert(name, arch);
        Ok(())
    }

    /// Architecture names, sorted.
    pub fn list_arches(&self) -> Vec<&str> {
        self.arches.keys().map(|k| k.as_str()).collect()
    }

    pub fn get_arch(&self, name: &str) -> Result<&Architecture> {
        self.arches.get(name).ok_or_else(|| {
            unknown_entity(format!(
                "invalid architecture {} for distro {}",
                name, self.name
            ))
        })
    }

    pub fn is_rhel(&self) -> bool {
        self.vendor == "redhat"
    }

    /// Whether `profile_id`, either a full id or its short name, is an
    /// allowed OpenSCAP profile.
    pub fn is_oscap_profile_allowed(&self, profile_id: &str) -> bool {
        self.oscap_profiles.iter().any(|&p| {
            p == profile_id || p.strip_prefix(OSCAP_PROFILE_PREFIX) == Some(profile_id)
        })
    }
}

#[derive(Debug)]
pub struct Architecture {
    pub arch: Arch,
    /// Name of the owning distro, filled in by [`Distro::add_arch`].
    pub distro: String,
    /// Bootloader packages installed whatever the boot mode.
    pub bootloader_packages: Vec<String>,
    /// Extra packages for the build root.
    pub build_packages: Vec<String>,
    /// GRUB2 platform for legacy BIOS boot.
    pub legacy_platform: Option<String>,
    /// Vendor directory under `/boot/efi/EFI`.
    pub uefi_vendor: Option<String>,
    pub boot_type: BootMode,
    pub(crate) image_types: BTreeMap<String, ImageType>,
    /// Alias -> primary image type name.
    pub(crate) aliases: BTreeMap<String, String>,
}

impl Architecture {
    pub fn new(arch: Arch, boot_type: BootMode) -> Self {
        Self {
            arch,
            distro: String::new(),
            bootloader_packages: Vec::new(),
            build_packages: Vec::new(),
            legacy_platform: None,
            uefi_vendor: None,
            boot_type,
            image_types: BTreeMap::new(),
            aliases: BTreeMap::new(),
        }
    }

    /// Names and aliases share one namespace per architecture.
    pub fn add_image_types(&mut self, types: impl IntoIterator<Item = ImageType>) -> Result<()> {
        for t in types {
            for name in std::iter::once(&t.name).chain(t.aliases.iter()) {
                if self.image_types.contains_key(name) || self.aliases.contains_key(name) {
                    return Err(internal(format!(
                        "image type name {} defined twice for {}",
                        name, self.arch
                    )));
                }
            }
            for alias in &t.aliases {
                if *alias == t.name {
                    return Err(internal(format!("image type {} aliases itself", t.name)));
                }
                self.aliases.insert(alias.clone(), t.name.clone());
            }
            self.image_types.insert(t.name.clone(), t);
        }
        Ok(())
    }

    /// Look up an image type by name, then by alias.
    pub fn get_image_type(&self, name: &str) -> Result<&ImageType> {
        self.image_types
            .get(name)
            .or_else(|| {
                self.aliases
                    .get(name)
                    .and_then(|primary| self.image_types.get(primary))
            })
            .ok_or_else(|| unknown_entity(format!("invalid image type: {}", name)))
    }

    /// Primary image type names, sorted.
    pub fn list_image_types(&self) -> Vec<&str> {
        self.image_types.keys().map(|k| k.as_str()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct ImageType {
    pub name: String,
    pub aliases: Vec<String>,
    pub filename: String,
    pub mime_type: String,
    /// Kernel command line shared by every image of this type.
    pub kernel_options: String,
    pub default_size: u64,
    pub bootable: bool,
    pub rpm_ostree: bool,
    pub boot_iso: bool,
    pub boot_type_override: Option<BootMode>,
    pub image_format: ImageFormat,
    pub build_pipelines: Vec<String>,
    pub payload_pipelines: Vec<String>,
    pub exports: Vec<String>,
    /// Package set per pipeline name.
    pub package_sets: BTreeMap<&'static str, PackageSetFn>,
    pub default_image_config: Option<ImageConfig>,
    pub base_partition_tables: BTreeMap<Arch, PartitionTable>,
    pub image_fn: ImageFn,
}

impl ImageType {
    pub fn new(name: &str, filename: &str, mime_type: &str, image_fn: ImageFn) -> Self {
        Self {
            name: name.to_string(),
            aliases: Vec::new(),
            filename: filename.to_string(),
            mime_type: mime_type.to_string(),
            kernel_options: String::new(),
            default_size: 0,
            bootable: false,
            rpm_ostree: false,
            boot_iso: false,
            boot_type_override: None,
            image_format: ImageFormat::Raw,
            build_pipelines: vec!["build".to_string()],
            payload_pipelines: Vec::new(),
            exports: Vec::new(),
            package_sets: BTreeMap::new(),
            default_image_config: None,
            base_partition_tables: BTreeMap::new(),
            image_fn,
        }
    }

    /// The image size for a request of `size` bytes: zero picks the
    /// default, and VHD images are rounded up to a whole MiB.
    pub fn size(&self, size: u64) -> u64 {
        let size = if size == 0 { self.default_size } else { size };
        if self.image_format == ImageFormat::Vpc {
            size.div_ceil(MIB) * MIB
        } else {
            size
        }
    }

    /// Pipelines in manifest order.
    pub fn pipelines(&self) -> impl Iterator<Item = &str> {
        self.build_pipelines
            .iter()
            .chain(self.payload_pipelines.iter())
            .map(|s| s.as_str())
    }
}

/// An image type together with the architecture and distro it belongs to.
#[derive(Debug, Clone, Copy)]
pub struct ImageTypeHandle<'a> {
    pub distro: &'a Distro,
    pub arch: &'a Architecture,
    pub image_type: &'a ImageType,
}

impl<'a> ImageTypeHandle<'a> {
    pub fn name(&self) -> &'a str {
        &self.image_type.name
    }

    /// `distro/arch/image-type`, using the primary name.
    pub fn full_name(&self) -> String {
        format!(
            "{}/{}/{}",
            self.distro.name,
            self.arch.arch,
            self.image_type.name
        )
    }

    pub fn size(&self, size: u64) -> u64 {
        self.image_type.size(size)
    }

    fn expand(&self, template: &str) -> String {
        template.replace(ARCH_PLACEHOLDER, self.arch.arch.as_str())
    }

    /// Default OSTree ref, for rpm-ostree types.
    pub fn ostree_ref(&self) -> Option<String> {
        self.image_type
            .rpm_ostree
            .then(|| self.expand(&self.distro.ostree_ref_template))
    }

    /// ISO volume ID, for installer types.
    pub fn isolabel(&self) -> Option<String> {
        self.image_type
            .boot_iso
            .then(|| self.expand(&self.distro.isolabel_template))
    }

    pub fn boot_mode(&self) -> BootMode {
        self.image_type
            .boot_type_override
            .unwrap_or(self.arch.boot_type)
    }

    /// The image type's config layered on the distro's.
    pub fn default_image_config(&self) -> ImageConfig {
        match &self.image_type.default_image_config {
            Some(c) => c.inherit_from(&self.distro.default_image_config),
            None => self.distro.default_image_config.clone(),
        }
    }

    /// The package sets to resolve, keyed by pipeline.
    pub fn package_sets(
        &self,
        bp: &Blueprint,
        options: &ImageOptions,
        repos: &[RepoConfig],
    ) -> Result<PackageSetChains> {
        manifest::package_sets(*self, bp, options, repos)
    }

    /// Assemble the manifest from the resolved `packages`. All randomness
    /// comes from `seed`.
    #[context("Generating manifest for {}", self.full_name())]
    pub fn manifest(
        &self,
        bp: &Blueprint,
        options: &ImageOptions,
        repos: &[RepoConfig],
        packages: &ResolvedPackages,
        seed: u64,
        crypter: &dyn Crypter,
    ) -> Result<Manifest> {
        manifest::generate(*self, bp, options, repos, packages, seed, crypter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestContext;
    use crate::osbuild::Pipeline;

    fn no_pipelines(_: &mut ManifestContext<'_>) -> Result<Vec<Pipeline>> {
        Ok(Vec::new())
    }

    fn distro(name: &str) -> Distro {
        Distro {
            name: name.to_string(),
            product: "Test Linux".into(),
            os_version: "1.0".into(),
            release_version: "1".into(),
            module_platform_id: "platform:t1".into(),
            vendor: "test".into(),
            ostree_ref_template: "test/1/{arch}/edge".into(),
            isolabel_template: "Test-1-{arch}".into(),
            runner: "org.osbuild.test1".into(),
            default_image_config: ImageConfig {
                timezone: Some("UTC".into()),
                locale: Some("C.UTF-8".into()),
                ..Default::default()
            },
            oscap_profiles: &["xccdf_org.ssgproject.content_profile_cis"],
            arches: BTreeMap::new(),
        }
    }

    fn registry() -> Registry {
        let mut d = distro("test-1");
        for arch in [Arch::S390x, Arch::X86_64, Arch::Aarch64] {
            let mut a = Architecture::new(arch, BootMode::Uefi);
            let mut commit = ImageType::new("edge-commit", "commit.tar", "application/x-tar", no_pipelines);
            commit.aliases = vec!["test-edge-commit".into()];
            commit.rpm_ostree = true;
            let mut vhd = ImageType::new("vhd", "disk.vhd", "application/x-vhd", no_pipelines);
            vhd.image_format = ImageFormat::Vpc;
            vhd.default_size = 4 * crate::datasizes::GIB;
            vhd.default_image_config = Some(ImageConfig {
                locale: Some("en_US.UTF-8".into()),
                ..Default::default()
            });
            a.add_image_types([vhd, commit]).unwrap();
            d.add_arch(a).unwrap();
        }
        let mut r = Registry::new();
        r.register(d).unwrap();
        r
    }

    #[test]
    fn test_lookup() {
        let r = registry();
        assert_eq!(r.list_distros(), vec!["test-1"]);
        let d = r.get_distro("test-1").unwrap();
        assert_eq!(d.list_arches(), vec!["aarch64", "s390x", "x86_64"]);
        let a = d.get_arch("x86_64").unwrap();
        assert_eq!(a.distro, "test-1");
        assert_eq!(a.list_image_types(), vec!["edge-commit", "vhd"]);

        let h = r.get_image_type("test-1/x86_64/test-edge-commit").unwrap();
        assert_eq!(h.name(), "edge-commit");
        assert!(std::ptr::eq(h.image_type, a.get_image_type("edge-commit").unwrap()));
        assert_eq!(h.full_name(), "test-1/x86_64/edge-commit");
        assert_eq!(h.ostree_ref().as_deref(), Some("test/1/x86_64/edge"));
        assert_eq!(h.isolabel(), None);
    }

    #[test]
    fn test_unknown() {
        let r = registry();
        for (handle, msg) in [
            ("nope/x86_64/vhd", "unknown distro: nope"),
            ("test-1/ppc64le/vhd", "invalid architecture ppc64le for distro test-1"),
            ("test-1/x86_64/qcow2", "invalid image type: qcow2"),
        ] {
            let e = r.get_image_type(handle).unwrap_err();
            assert_eq!(ImageError::kind_of(&e), Some(&ImageError::UnknownEntity(msg.into())));
        }
        let e = r.get_image_type("test-1/x86_64").unwrap_err();
        assert!(matches!(ImageError::kind_of(&e), Some(ImageError::UnknownEntity(_))));
    }

    #[test]
    fn test_duplicates() {
        let mut r = registry();
        let e = r.register(distro("test-1")).unwrap_err();
        assert_eq!(
            ImageError::kind_of(&e),
            Some(&ImageError::DuplicateDistro("test-1".into()))
        );
        assert_eq!(e.to_string(), "duplicate distro: test-1");

        let mut a = Architecture::new(Arch::X86_64, BootMode::Hybrid);
        let mut t = ImageType::new("tar", "root.tar.xz", "application/x-tar", no_pipelines);
        t.aliases = vec!["vhd".into()];
        let vhd = ImageType::new("vhd", "disk.vhd", "application/x-vhd", no_pipelines);
        assert!(a.add_image_types([vhd, t]).is_err());
    }

    #[test]
    fn test_oscap_profiles() {
        let d = distro("test-1");
        assert!(d.is_oscap_profile_allowed("xccdf_org.ssgproject.content_profile_cis"));
        assert!(d.is_oscap_profile_allowed("cis"));
        assert!(!d.is_oscap_profile_allowed("is"));
        assert!(!d.is_oscap_profile_allowed("xccdf_org.ssgproject.content_profile_stig"));
    }

    #[test]
    fn test_size_and_config() {
        let r = registry();
        let h = r.get_image_type("test-1/aarch64/vhd").unwrap();
        assert_eq!(h.size(0), 4 * crate::datasizes::GIB);
        assert_eq!(h.size(MIB + 1), 2 * MIB);
        assert_eq!(h.size(3 * MIB), 3 * MIB);
        let c = r.get_image_type("test-1/aarch64/edge-commit").unwrap();
        assert_eq!(c.size(MIB + 1), MIB + 1);

        let cfg = h.default_image_config();
        assert_eq!(cfg.locale.as_deref(), Some("en_US.UTF-8"));
        assert_eq!(cfg.timezone.as_deref(), Some("UTC"));
        assert_eq!(c.default_image_config().locale.as_deref(), Some("C.UTF-8"));
        assert_eq!(h.boot_mode(), BootMode::Uefi);
    }

    #[test]
    fn test_default_registry_alias() {
        let r = default_registry().unwrap();
        let h = r.get_image_type("rhel-9/x86_64/rhel-edge-commit").unwrap();
        let direct = r.get_image_type("rhel-9/x86_64/edge-commit").unwrap();
        assert!(std::ptr::eq(h.image_type, direct.image_type));
        assert_eq!(h.name(), "edge-commit");
        assert_eq!(h.ostree_ref().as_deref(), Some("rhel/9/x86_64/edge"));
        let iso = r.get_image_type("rhel-9/x86_64/edge-installer").unwrap();
        assert_eq!(iso.isolabel().as_deref(), Some("RHEL-9-4-0-BaseOS-x86_64"));
        assert!(r.list_distros().contains(&"centos-9"));
    }
}
