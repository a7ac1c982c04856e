// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Kickstart files for installer images: the options of the
//! `org.osbuild.kickstart` stage, raw additions appended through
//! `%include`, and a small parser for the subset of the format we need to
//! check user-supplied kickstarts.

use anyhow::Result;
use clap::Parser;
use serde_derive::Serialize;
use std::collections::BTreeMap;

use crate::error::{internal, invalid_blueprint};
use crate::fsnode::File;
use crate::osbuild::{GroupsStageGroup, UsersStageUser};

/// Where the generated kickstart lives on installer media.
pub const KICKSTART_PATH: &str = "/osbuild.ks";
/// Name given to the stage-generated part when raw content is appended.
const BASE_KICKSTART_NAME: &str = "osbuild-base.ks";

const INCLUDE: &str = "%include";
const PACKAGES: &str = "%packages";
const END: &str = "%end";
/// Sections whose bodies are scripts or data rather than commands.
const SCRIPT_SECTIONS: &[&str] = &[
    "%pre",
    "%pre-install",
    "%post",
    "%onerror",
    "%traceback",
    "%addon",
    "%anaconda",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KickstartStageOptions {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ostree: Option<KickstartOstree>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub liveimg: Option<KickstartLiveimg>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub users: BTreeMap<String, UsersStageUser>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub groups: BTreeMap<String, GroupsStageGroup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyboard: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reboot: Option<KickstartReboot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rootpw: Option<KickstartRootpw>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub zerombr: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clearpart: Option<KickstartClearpart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autopart: Option<KickstartAutopart>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub network: Vec<KickstartNetwork>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KickstartOstree {
    pub osname: String,
    pub url: String,
    #[serde(rename = "ref")]
    pub reference: String,
    pub gpg: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KickstartLiveimg {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KickstartReboot {
    pub eject: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KickstartRootpw {
    pub lock: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KickstartClearpart {
    pub all: bool,
    pub initlabel: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KickstartAutopart {
    #[serde(rename = "type")]
    pub part_type: String,
    pub fstype: String,
    pub nohome: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KickstartNetwork {
    pub bootproto: String,
    pub device: String,
    pub onboot: String,
    pub activate: bool,
}

impl KickstartStageOptions {
    /// Install the ostree commit `reference` from the repository at `url`.
    pub fn with_ostree_commit(
        path: &str,
        users: BTreeMap<String, UsersStageUser>,
        groups: BTreeMap<String, GroupsStageGroup>,
        url: &str,
        reference: &str,
        osname: &str,
    ) -> Self {
        Self {
            path: path.to_string(),
            ostree: Some(KickstartOstree {
                osname: osname.to_string(),
                url: url.to_string(),
                reference: reference.to_string(),
                gpg: false,
            }),
            users,
            groups,
            ..Default::default()
        }
    }

    /// Install the tarball image found at `url`.
    pub fn with_liveimg(
        path: &str,
        users: BTreeMap<String, UsersStageUser>,
        groups: BTreeMap<String, GroupsStageGroup>,
        url: &str,
    ) -> Self {
        Self {
            path: path.to_string(),
            liveimg: Some(KickstartLiveimg {
                url: url.to_string(),
            }),
            users,
            groups,
            ..Default::default()
        }
    }

    /// Answer every question anaconda would otherwise ask, wiping the
    /// target disk. Values already set are kept.
    pub fn make_unattended(&mut self) {
        self.display_mode = Some("text".to_string());
        self.lang.get_or_insert_with(|| "en_US.UTF-8".to_string());
        self.keyboard.get_or_insert_with(|| "us".to_string());
        self.timezone.get_or_insert_with(|| "UTC".to_string());
        self.reboot = Some(KickstartReboot { eject: true });
        self.rootpw = Some(KickstartRootpw { lock: true });
        self.zerombr = true;
        self.clearpart = Some(KickstartClearpart {
            all: true,
            initlabel: true,
        });
        self.autopart = Some(KickstartAutopart {
            part_type: "plain".to_string(),
            fstype: "xfs".to_string(),
            nohome: true,
        });
        self.network = vec![KickstartNetwork {
            bootproto: "dhcp".to_string(),
            device: "link".to_string(),
            onboot: "on".to_string(),
            activate: true,
        }];
    }

    /// Move the stage output next to its original location and return a
    /// file for the original path that includes it, followed by `raw`.
    pub fn include_raw(&mut self, raw: &str) -> Result<File> {
        let (dir, _) = self
            .path
            .rsplit_once('/')
            .ok_or_else(|| internal(format!("kickstart path {:?} is not absolute", self.path)))?;
        let base = format!("{}/{}", dir, BASE_KICKSTART_NAME);
        let contents = format!("{} {}\n{}", INCLUDE, base, raw);
        let file = File::new(&self.path, None, None, None, contents.into_bytes())?;
        self.path = base;
        Ok(file)
    }
}

/// A `%post` section letting each of `names` (users, or groups with a
/// leading `%`) use sudo without a password.
pub fn sudo_nopasswd_post<S: AsRef<str>>(names: &[S]) -> String {
    if names.is_empty() {
        return String::new();
    }
    let mut s = String::from("%post\n");
    for name in names {
        let name = name.as_ref();
        s.push_str(&format!(
            "echo -e \"{name}\\tALL=(ALL)\\tNOPASSWD: ALL\" > \"/etc/sudoers.d/{name}\"\n"
        ));
        s.push_str(&format!("chmod 0440 /etc/sudoers.d/{name}\n"));
    }
    s.push_str("restorecon -rvF /etc/sudoers.d\n");
    s.push_str(END);
    s.push('\n');
    s
}

#[derive(clap::Parser, Debug)]
pub(crate) struct PackageArgs {
    /// Do not include weak dependencies
    #[clap(long)]
    pub(crate) exclude_weakdeps: bool,
    #[clap(long)]
    pub(crate) excludedocs: bool,
    #[clap(long)]
    pub(crate) nocore: bool,
    #[clap(long)]
    pub(crate) ignoremissing: bool,
}

#[derive(Debug)]
pub(crate) struct Packages {
    pub(crate) args: PackageArgs,
    pub(crate) install: Vec<String>,
    pub(crate) excludes: Vec<String>,
}

/// The structure of a kickstart file, as far as we look at it.
#[derive(Debug, Default)]
pub(crate) struct Kickstart {
    /// Command names, in order.
    pub(crate) commands: Vec<String>,
    pub(crate) includes: Vec<String>,
    pub(crate) packages: Vec<Packages>,
    /// Script and data sections by name, e.g. `%post`.
    pub(crate) sections: Vec<String>,
}

fn filtermap_line(line: &str) -> Option<&str> {
    // Ignore comments
    if line.starts_with('#') {
        return None;
    }
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(line)
}

impl Packages {
    fn parse<'a, 'b>(
        args: impl Iterator<Item = &'b str>,
        lines: impl Iterator<Item = &'a str>,
    ) -> Result<Self> {
        // Ensure there's an argv0
        let args = [PACKAGES].into_iter().chain(args);
        let args = PackageArgs::try_parse_from(args)?;
        let mut install = Vec::new();
        let mut excludes = Vec::new();
        for line in lines {
            let line = line.trim();
            if line == END {
                return Ok(Self {
                    args,
                    install,
                    excludes,
                });
            }
            if let Some(rest) = line.strip_prefix('-') {
                excludes.push(rest.to_owned());
            } else {
                install.push(line.to_owned());
            }
        }
        anyhow::bail!("Missing {END} for {PACKAGES}")
    }
}

/// Skip the body of a script section up to its `%end`.
fn skip_section<'a>(name: &str, lines: impl Iterator<Item = &'a str>) -> Result<()> {
    for line in lines {
        if line.trim() == END {
            return Ok(());
        }
    }
    anyhow::bail!("Missing {END} for {name}")
}

impl Kickstart {
    pub(crate) fn parse(s: &str) -> Result<Self> {
        let mut ks = Kickstart::default();
        let mut lines = s.lines().filter_map(filtermap_line);
        while let Some(line) = lines.next() {
            let line =
                shlex::split(line).ok_or_else(|| anyhow::anyhow!("Invalid syntax: {line}"))?;
            let mut line = line.iter();
            let Some(verb) = line.next() else { continue };
            let mut line = line.map(|s| s.as_str());
            match verb.as_str() {
                PACKAGES => {
                    ks.packages.push(Packages::parse(line, &mut lines)?);
                }
                INCLUDE => {
                    let include = line
                        .next()
                        .ok_or_else(|| anyhow::anyhow!("Missing path for {INCLUDE}"))?;
                    if line.next().is_some() {
                        anyhow::bail!("Too many arguments for {INCLUDE}");
                    }
                    ks.includes.push(include.to_owned());
                }
                END => anyhow::bail!("Unexpected {END}"),
                o if SCRIPT_SECTIONS.contains(&o) => {
                    skip_section(o, &mut lines)?;
                    ks.sections.push(o.to_owned());
                }
                o if o.starts_with('%') => anyhow::bail!("Unhandled section: {o}"),
                o => ks.commands.push(o.to_owned()),
            }
        }
        Ok(ks)
    }
}

/// Check that user-supplied kickstart contents are well formed.
pub fn validate_user_kickstart(contents: &str) -> Result<()> {
    Kickstart::parse(contents)
        .map(|_| ())
        .map_err(|e| invalid_blueprint(format!("invalid kickstart contents: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ImageError;
    use maplit::btreemap;
    use serde_json::json;

    #[test]
    fn test_filtermap_line() {
        let nones = ["", "   ", "# foo"];
        for v in nones.iter() {
            assert_eq!(filtermap_line(v), None);
        }
        let idem = ["foo bar baz"];
        for &v in idem.iter() {
            assert_eq!(filtermap_line(v), Some(v));
        }
    }

    #[test]
    fn test_basic() {
        let ks = Kickstart::parse(indoc::indoc! { r#"
            # This is a comment
            %include foo.ks
            text
            lang en_US.UTF-8
            # Include this
            %include "/run/install/repo/bar.ks"
            # Blank line below

            %packages --exclude-weakdeps
            foo
            -bar
            baz
            %end
            %post --log=/root/ks-post.log
            echo "hi" > /etc/motd
            %end
        "# })
        .unwrap();
        assert_eq!(ks.includes.len(), 2);
        assert_eq!(ks.includes[1].as_str(), "/run/install/repo/bar.ks");
        assert_eq!(ks.commands, vec!["text", "lang"]);
        assert_eq!(ks.sections, vec!["%post"]);
        assert_eq!(ks.packages.len(), 1);
        let pkgs = ks.packages.first().unwrap();
        assert!(pkgs.args.exclude_weakdeps);
        assert_eq!(pkgs.install.len(), 2);
        assert_eq!(pkgs.excludes, vec!["bar"]);
    }

    #[test]
    fn test_parse_err() {
        let errs = [
            "%packages\n",
            "%packages --foo\n%end\n",
            "%post\necho hi\n",
            "%end\n",
            "%include\n",
            "%frobnicate\n%end\n",
            "network --hostname='unterminated\n",
        ];
        for err in errs {
            assert!(Kickstart::parse(err).is_err(), "{err}");
        }
        let e = validate_user_kickstart("%post\n").unwrap_err();
        assert!(matches!(
            ImageError::kind_of(&e),
            Some(ImageError::InvalidBlueprint(_))
        ));
    }

    #[test]
    fn test_ostree_unattended() {
        let users = btreemap! {
            "admin".to_string() => UsersStageUser {
                groups: vec!["wheel".into()],
                ..Default::default()
            },
        };
        let mut o = KickstartStageOptions::with_ostree_commit(
            KICKSTART_PATH,
            users,
            BTreeMap::new(),
            "file:///run/install/repo/ostree/repo",
            "rhel/9/x86_64/edge",
            "rhel",
        );
        o.keyboard = Some("de".into());
        o.make_unattended();
        similar_asserts::assert_eq!(
            serde_json::to_value(&o).unwrap(),
            json!({
                "path": "/osbuild.ks",
                "ostree": {
                    "osname": "rhel",
                    "url": "file:///run/install/repo/ostree/repo",
                    "ref": "rhel/9/x86_64/edge",
                    "gpg": false
                },
                "users": {"admin": {"groups": ["wheel"]}},
                "lang": "en_US.UTF-8",
                "keyboard": "de",
                "timezone": "UTC",
                "display_mode": "text",
                "reboot": {"eject": true},
                "rootpw": {"lock": true},
                "zerombr": true,
                "clearpart": {"all": true, "initlabel": true},
                "autopart": {"type": "plain", "fstype": "xfs", "nohome": true},
                "network": [{"bootproto": "dhcp", "device": "link", "onboot": "on", "activate": true}]
            })
        );
    }

    #[test]
    fn test_include_raw() {
        let mut o = KickstartStageOptions::with_liveimg(
            KICKSTART_PATH,
            BTreeMap::new(),
            BTreeMap::new(),
            "file:///run/install/repo/liveimg.tar.gz",
        );
        let post = sudo_nopasswd_post(&["%wheel", "admin"]);
        let f = o.include_raw(&post).unwrap();
        assert_eq!(o.path, "/osbuild-base.ks");
        assert_eq!(f.path(), "/osbuild.ks");
        let contents = std::str::from_utf8(f.data()).unwrap();
        similar_asserts::assert_eq!(
            contents,
            indoc::indoc! {r#"
                %include /osbuild-base.ks
                %post
                echo -e "%wheel\tALL=(ALL)\tNOPASSWD: ALL" > "/etc/sudoers.d/%wheel"
                chmod 0440 /etc/sudoers.d/%wheel
                echo -e "admin\tALL=(ALL)\tNOPASSWD: ALL" > "/etc/sudoers.d/admin"
                chmod 0440 /etc/sudoers.d/admin
                restorecon -rvF /etc/sudoers.d
                %end
            "#}
        );
        let ks = Kickstart::parse(contents).unwrap();
        assert_eq!(ks.includes, vec!["/osbuild-base.ks"]);
        assert_eq!(ks.sections, vec!["%post"]);
        assert_eq!(sudo_nopasswd_post::<&str>(&[]), "");
    }
}
