// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Stages that create the custom directories and files of a tree and fix
//! up their ownership and permissions.

use serde_derive::Serialize;
use std::collections::BTreeMap;

use super::{Input, Sources, Stage};
use crate::fsnode::{Directory, File, Owner};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MkdirStageOptions {
    pub paths: Vec<MkdirStagePath>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MkdirStagePath {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub parents: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub exist_ok: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopyStageOptions {
    pub paths: Vec<CopyStagePath>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopyStagePath {
    pub from: String,
    pub to: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub remove_destination: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChownStageOptions {
    pub items: BTreeMap<String, ChownItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChownItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<Owner>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<Owner>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub recursive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChmodStageOptions {
    pub items: BTreeMap<String, ChmodItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChmodItem {
    /// Octal string with a leading zero, e.g. `0755`.
    pub mode: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub recursive: bool,
}

fn octal(mode: u32) -> String {
    if mode == 0 {
        "0".to_string()
    } else {
        format!("0{:o}", mode)
    }
}

/// Chown and chmod stages for the nodes that ask for them.
fn gen_ownership_stages<'a>(
    nodes: impl Iterator<Item = (&'a str, Option<u32>, Option<&'a Owner>, Option<&'a Owner>)>,
) -> Vec<Stage> {
    let mut chown = BTreeMap::new();
    let mut chmod = BTreeMap::new();
    for (path, mode, user, group) in nodes {
        if user.is_some() || group.is_some() {
            chown.insert(
                path.to_string(),
                ChownItem {
                    user: user.cloned(),
                    group: group.cloned(),
                    recursive: false,
                },
            );
        }
        if let Some(m) = mode {
            chmod.insert(
                path.to_string(),
                ChmodItem {
                    mode: octal(m),
                    recursive: false,
                },
            );
        }
    }
    let mut stages = Vec::new();
    if !chown.is_empty() {
        stages.push(Stage::new(
            "org.osbuild.chown",
            ChownStageOptions { items: chown },
        ));
    }
    if !chmod.is_empty() {
        stages.push(Stage::new(
            "org.osbuild.chmod",
            ChmodStageOptions { items: chmod },
        ));
    }
    stages
}

/// Create `dirs`; existing directories are accepted as they are.
pub fn gen_directory_stages(dirs: &[Directory]) -> Vec<Stage> {
    if dirs.is_empty() {
        return Vec::new();
    }
    let paths = dirs
        .iter()
        .map(|d| MkdirStagePath {
            path: d.path().to_string(),
            mode: d.mode(),
            parents: d.ensure_parents(),
            exist_ok: true,
        })
        .collect();
    let mut stages = vec![Stage::new("org.osbuild.mkdir", MkdirStageOptions { paths })];
    stages.extend(gen_ownership_stages(
        dirs.iter().map(|d| (d.path(), d.mode(), d.user(), d.group())),
    ));
    stages
}

/// Copy `files` into the tree. The contents are registered as inline
/// sources so the stage can refer to them by checksum.
pub fn gen_file_stages(files: &[File], sources: &mut Sources) -> Vec<Stage> {
    if files.is_empty() {
        return Vec::new();
    }
    let mut copy = Stage::new("org.osbuild.copy", CopyStageOptions { paths: Vec::new() });
    let mut paths = Vec::new();
    for f in files {
        let id = sources.add_inline(f.data());
        let digest = id.trim_start_matches("sha256:");
        let input_name = format!("file-{}", digest);
        paths.push(CopyStagePath {
            from: format!("input://{}/{}", input_name, id),
            to: format!("tree://{}", f.path()),
            remove_destination: true,
        });
        copy = copy.with_input(&input_name, Input::source_files(vec![id.clone()]));
    }
    copy.options = Some(CopyStageOptions { paths }.into());
    let mut stages = vec![copy];
    stages.extend(gen_ownership_stages(
        files.iter().map(|f| (f.path(), f.mode(), f.user(), f.group())),
    ));
    stages
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_directories() {
        let dirs = vec![
            Directory::new("/etc/foo", Some(0o750), Some(Owner::Name("root".into())), None, true).unwrap(),
            Directory::new("/srv/data", None, None, None, false).unwrap(),
        ];
        let stages = gen_directory_stages(&dirs);
        let v = serde_json::to_value(&stages).unwrap();
        assert_eq!(
            v,
            json!([
                {"type": "org.osbuild.mkdir", "options": {"paths": [
                    {"path": "/etc/foo", "mode": 488, "parents": true, "exist_ok": true},
                    {"path": "/srv/data", "exist_ok": true}
                ]}},
                {"type": "org.osbuild.chown", "options": {"items": {"/etc/foo": {"user": "root"}}}},
                {"type": "org.osbuild.chmod", "options": {"items": {"/etc/foo": {"mode": "0750"}}}}
            ])
        );
        assert!(gen_directory_stages(&[]).is_empty());
    }

    #[test]
    fn test_files() {
        let files = vec![File::new(
            "/etc/motd",
            None,
            None,
            Some(Owner::Id(10)),
            b"hello\n".to_vec(),
        )
        .unwrap()];
        let mut sources = Sources::default();
        let stages = gen_file_stages(&files, &mut sources);
        assert_eq!(stages.len(), 2);
        let sum = "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03";
        let v = serde_json::to_value(&stages[0]).unwrap();
        assert_eq!(
            v["options"]["paths"][0],
            json!({
                "from": format!("input://file-{sum}/sha256:{sum}"),
                "to": "tree:///etc/motd",
                "remove_destination": true
            })
        );
        assert_eq!(
            v["inputs"][format!("file-{sum}")]["references"],
            json!([format!("sha256:{sum}")])
        );
        assert_eq!(
            serde_json::to_value(&stages[1]).unwrap()["options"],
            json!({"items": {"/etc/motd": {"group": 10}}})
        );
        assert!(!sources.is_empty());
    }

    #[test]
    fn test_octal() {
        assert_eq!(octal(0o644), "0644");
        assert_eq!(octal(0), "0");
    }
}
