// SPDX-License-Identifier: Apache-2.0 OR MIT

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use fn_error_context::context;
use serde::de::DeserializeOwned;
use std::io::Write;

use crate::blueprint::Blueprint;
use crate::crypt::Sha512Crypt;
use crate::manifest::ImageOptions;
use crate::registry::default_registry;
use crate::rpmmd::{RepoConfig, ResolvedPackages};
use crate::utils::{self, InputFormat};

#[derive(Debug, Parser)]
#[clap(name = "image-manifest", rename_all = "kebab-case", version)]
/// Compile OS image manifests from blueprints
struct Opt {
    #[clap(subcommand)]
    cmd: Cmd,
}

/// What to build: an image type, a blueprint, and request options.
#[derive(Debug, clap::Args)]
#[clap(rename_all = "kebab-case")]
struct RequestOpts {
    /// Image type handle, `distro/arch/image-type`
    #[clap(long)]
    image_type: String,

    /// Image options (size, ostree, subscription), TOML or JSON
    #[clap(long)]
    options: Option<Utf8PathBuf>,

    /// Repositories to resolve against, TOML or JSON
    #[clap(long)]
    repos: Option<Utf8PathBuf>,

    /// Blueprint, TOML or JSON
    blueprint: Utf8PathBuf,
}

#[derive(Debug, clap::Subcommand)]
#[clap(rename_all = "kebab-case")]
enum Cmd {
    /// List the image types, as `distro/arch/image-type`
    List {
        /// Only list the types of this distro
        #[clap(long)]
        distro: Option<String>,
    },
    /// Check a blueprint for errors
    Validate { blueprint: Utf8PathBuf },
    /// Print the package sets to resolve, keyed by pipeline
    PackageSets {
        #[clap(flatten)]
        req: RequestOpts,
    },
    /// Print the manifest for resolved packages
    Manifest {
        #[clap(flatten)]
        req: RequestOpts,

        /// Resolved packages keyed by pipeline, TOML or JSON
        #[clap(long)]
        packages: Option<Utf8PathBuf>,

        /// Seed for salts and generated identifiers
        #[clap(long, default_value_t = 0)]
        seed: u64,
    },
}

/// Parse a TOML or JSON file, picking the format from the extension.
#[context("Loading {}", path)]
fn load<T: DeserializeOwned>(path: &Utf8Path) -> Result<T> {
    let fmt = InputFormat::detect_from_filename(path)?;
    let mut f = std::io::BufReader::new(std::fs::File::open(path)?);
    utils::parse_stream(fmt, &mut f)
}

fn load_or_default<T: DeserializeOwned + Default>(path: Option<&Utf8Path>) -> Result<T> {
    path.map(load).transpose().map(Option::unwrap_or_default)
}

/// Repository files hold a `repos` list.
#[derive(Debug, Default, serde_derive::Deserialize)]
struct RepoFile {
    #[serde(default)]
    repos: Vec<RepoConfig>,
}

struct Request {
    bp: Blueprint,
    options: ImageOptions,
    repos: Vec<RepoConfig>,
}

impl RequestOpts {
    fn load(&self) -> Result<Request> {
        let bp = Blueprint::from_path(&self.blueprint)?;
        let options = load_or_default(self.options.as_deref())?;
        let repos = load_or_default::<RepoFile>(self.repos.as_deref())?.repos;
        Ok(Request { bp, options, repos })
    }
}

impl Cmd {
    fn run(self, out: &mut dyn Write) -> Result<()> {
        let registry = default_registry()?;
        match self {
            Cmd::List { distro } => {
                let distros = match distro.as_deref() {
                    Some(d) => vec![registry.get_distro(d)?],
                    None => registry
                        .list_distros()
                        .into_iter()
                        .map(|d| registry.get_distro(d))
                        .collect::<Result<_>>()?,
                };
                for d in distros {
                    for arch in d.list_arches() {
                        for t in d.get_arch(arch)?.list_image_types() {
                            writeln!(out, "{}/{}/{}", d.name, arch, t)?;
                        }
                    }
                }
            }
            Cmd::Validate { blueprint } => {
                let bp = Blueprint::from_path(&blueprint)?;
                bp.validate()?;
                writeln!(out, "{}: ok", blueprint)?;
            }
            Cmd::PackageSets { req } => {
                let handle = registry.get_image_type(&req.image_type)?;
                let r = req.load()?;
                let sets = handle.package_sets(&r.bp, &r.options, &r.repos)?;
                serde_json::to_writer_pretty(&mut *out, &sets)?;
                writeln!(out)?;
            }
            Cmd::Manifest {
                req,
                packages,
                seed,
            } => {
                let handle = registry.get_image_type(&req.image_type)?;
                let r = req.load()?;
                let packages: ResolvedPackages = load_or_default(packages.as_deref())?;
                let m = handle.manifest(&r.bp, &r.options, &r.repos, &packages, seed, &Sha512Crypt)?;
                out.write_all(m.to_json()?.as_bytes())?;
            }
        }
        Ok(())
    }
}

/// Entrypoint for the command line; `argv` includes the program name.
pub fn main(argv: &[&str]) -> Result<i32> {
    let opt = Opt::parse_from(argv);
    let stdout = std::io::stdout();
    let mut out = std::io::BufWriter::new(stdout.lock());
    opt.cmd.run(&mut out)?;
    out.flush()?;
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ImageError;
    use crate::rpmmd::PackageSpec;
    use indoc::indoc;

    const BLUEPRINT: &str = indoc! {r#"
        name = "base"
        version = "0.0.1"

        [[packages]]
        name = "tmux"

        [customizations]
        hostname = "box"
    "#};

    fn run(args: &[&str]) -> Result<String> {
        let opt = Opt::try_parse_from(args)?;
        let mut out = Vec::new();
        opt.cmd.run(&mut out)?;
        Ok(String::from_utf8(out)?)
    }

    fn write(dir: &tempfile::TempDir, name: &str, contents: &str) -> String {
        let p = dir.path().join(name);
        std::fs::write(&p, contents).unwrap();
        p.to_str().unwrap().to_string()
    }

    #[test]
    fn test_parse() {
        let opt = Opt::try_parse_from([
            "image-manifest",
            "manifest",
            "--image-type",
            "rhel-9/x86_64/qcow2",
            "--seed",
            "42",
            "bp.toml",
        ])
        .unwrap();
        match opt.cmd {
            Cmd::Manifest {
                req,
                packages,
                seed,
            } => {
                assert_eq!(req.image_type, "rhel-9/x86_64/qcow2");
                assert_eq!(req.blueprint, "bp.toml");
                assert_eq!(packages, None);
                assert_eq!(seed, 42);
            }
            o => panic!("unexpected {:?}", o),
        }
        assert!(Opt::try_parse_from(["image-manifest", "package-sets", "bp.toml"]).is_err());
        assert!(Opt::try_parse_from(["image-manifest", "frobnicate"]).is_err());
    }

    #[test]
    fn test_list() -> Result<()> {
        let all = run(&["image-manifest", "list"])?;
        assert!(all.lines().any(|l| l == "centos-9/aarch64/qcow2"));
        let rhel = run(&["image-manifest", "list", "--distro", "rhel-9"])?;
        assert!(rhel.lines().all(|l| l.starts_with("rhel-9/")));
        assert!(rhel.lines().any(|l| l == "rhel-9/x86_64/edge-commit"));
        // aliases are not listed
        assert!(!rhel.contains("rhel-edge-commit"));

        let e = run(&["image-manifest", "list", "--distro", "nope"]).unwrap_err();
        assert!(matches!(ImageError::kind_of(&e), Some(ImageError::UnknownEntity(_))));
        Ok(())
    }

    #[test]
    fn test_validate() -> Result<()> {
        let td = tempfile::tempdir()?;
        let bp = write(&td, "bp.toml", BLUEPRINT);
        assert!(run(&["image-manifest", "validate", &bp])?.ends_with(": ok\n"));

        let bad = write(&td, "bad.toml", "name = \"x\"\n[[packages]]\nversion = \"1\"\n");
        assert!(run(&["image-manifest", "validate", &bad]).is_err());
        Ok(())
    }

    #[test]
    fn test_package_sets() -> Result<()> {
        let td = tempfile::tempdir()?;
        let bp = write(&td, "bp.toml", BLUEPRINT);
        let repos = write(
            &td,
            "repos.json",
            r#"{"repos": [{"name": "baseos", "baseurls": ["https://example.com/baseos"]}]}"#,
        );
        let out = run(&[
            "image-manifest",
            "package-sets",
            "--image-type",
            "rhel-9/x86_64/qcow2",
            "--repos",
            &repos,
            &bp,
        ])?;
        let sets: serde_json::Value = serde_json::from_str(&out)?;
        let os = sets["os"].as_array().unwrap();
        assert_eq!(os.len(), 2);
        assert_eq!(os[1]["include"], serde_json::json!(["kernel", "tmux"]));
        assert_eq!(os[0]["repositories"][0]["name"], "baseos");
        Ok(())
    }

    #[test]
    fn test_manifest() -> Result<()> {
        let td = tempfile::tempdir()?;
        let bp = write(&td, "bp.toml", BLUEPRINT);
        let spec = |name: &str| PackageSpec {
            name: name.to_string(),
            version: "5.14.0".to_string(),
            release: "1.el9".to_string(),
            arch: "x86_64".to_string(),
            remote_location: format!("https://example.com/{}.rpm", name),
            checksum: format!("sha256:{}", "a".repeat(64)),
            ..Default::default()
        };
        let packages: ResolvedPackages = ["build", "os"]
            .into_iter()
            .map(|p| (p.to_string(), vec![spec("kernel"), spec("bash")]))
            .collect();
        let packages = write(&td, "packages.json", &serde_json::to_string(&packages)?);
        let args = [
            "image-manifest",
            "manifest",
            "--image-type",
            "rhel-9/x86_64/qcow2",
            "--packages",
            &packages,
            &bp,
        ];
        let first = run(&args)?;
        assert_eq!(first, run(&args)?);
        let m: serde_json::Value = serde_json::from_str(&first)?;
        assert_eq!(m["version"], "2");
        assert_eq!(m["pipelines"].as_array().unwrap().len(), 4);

        // nothing resolved for the build root
        let e = run(&["image-manifest", "manifest", "--image-type", "rhel-9/x86_64/qcow2", &bp]).unwrap_err();
        assert!(matches!(ImageError::kind_of(&e), Some(ImageError::MissingDependency(_))));
        Ok(())
    }
}
