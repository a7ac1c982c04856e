// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Stage inputs: trees and files produced by other pipelines, and content
//! fetched through sources.

use serde_derive::Serialize;
use std::collections::BTreeMap;

pub const INPUT_ORIGIN_PIPELINE: &str = "org.osbuild.pipeline";
pub const INPUT_ORIGIN_SOURCE: &str = "org.osbuild.source";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Input {
    #[serde(rename = "type")]
    pub input_type: String,
    pub origin: String,
    pub references: References,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum References {
    /// Plain list: pipeline names (`name:<pipeline>`) or source ids.
    Plain(Vec<String>),
    /// Source files with per-file options, in install order.
    Files(Vec<FileReference>),
    /// A single file produced by a pipeline, keyed by `name:<pipeline>`.
    PipelineFiles(BTreeMap<String, PipelineFileReference>),
    /// Commits keyed by checksum.
    Ostree(BTreeMap<String, OstreeReference>),
    /// Container images keyed by image id.
    Containers(BTreeMap<String, ContainerReference>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileReference {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<FileReferenceOptions>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileReferenceOptions {
    pub metadata: FileMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileMetadata {
    #[serde(rename = "rpm.check_gpg")]
    pub check_gpg: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineFileReference {
    pub file: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OstreeReference {
    #[serde(rename = "ref")]
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerReference {
    pub name: String,
}

impl Input {
    /// The filesystem tree produced by `pipeline`.
    pub fn tree(pipeline: &str) -> Self {
        Self {
            input_type: "org.osbuild.tree".to_string(),
            origin: INPUT_ORIGIN_PIPELINE.to_string(),
            references: References::Plain(vec![format!("name:{}", pipeline)]),
        }
    }

    /// One file from the output of `pipeline`.
    pub fn pipeline_file(pipeline: &str, file: &str) -> Self {
        let mut refs = BTreeMap::new();
        refs.insert(
            format!("name:{}", pipeline),
            PipelineFileReference {
                file: file.to_string(),
            },
        );
        Self {
            input_type: "org.osbuild.files".to_string(),
            origin: INPUT_ORIGIN_PIPELINE.to_string(),
            references: References::PipelineFiles(refs),
        }
    }

    /// Packages by checksum, marking the ones whose signature rpm should
    /// verify.
    pub fn packages<'a, I>(packages: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, bool)>,
    {
        let refs = packages
            .into_iter()
            .map(|(checksum, check_gpg)| FileReference {
                id: checksum.to_string(),
                options: check_gpg.then_some(FileReferenceOptions {
                    metadata: FileMetadata { check_gpg },
                }),
            })
            .collect();
        Self {
            input_type: "org.osbuild.files".to_string(),
            origin: INPUT_ORIGIN_SOURCE.to_string(),
            references: References::Files(refs),
        }
    }

    /// Files from the inline source, by id.
    pub fn source_files(ids: Vec<String>) -> Self {
        Self {
            input_type: "org.osbuild.files".to_string(),
            origin: INPUT_ORIGIN_SOURCE.to_string(),
            references: References::Plain(ids),
        }
    }

    pub fn ostree_commit(checksum: &str, reference: &str) -> Self {
        let mut refs = BTreeMap::new();
        refs.insert(
            checksum.to_string(),
            OstreeReference {
                reference: reference.to_string(),
            },
        );
        Self {
            input_type: "org.osbuild.ostree".to_string(),
            origin: INPUT_ORIGIN_SOURCE.to_string(),
            references: References::Ostree(refs),
        }
    }

    /// Container images by image id, each stored under its local name.
    /// `local` images come from the build host's container storage.
    pub fn containers<'a, I>(images: I, local: bool) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let refs = images
            .into_iter()
            .map(|(id, name)| (id.to_string(), ContainerReference { name: name.to_string() }))
            .collect();
        let input_type = if local {
            "org.osbuild.containers-storage"
        } else {
            "org.osbuild.containers"
        };
        Self {
            input_type: input_type.to_string(),
            origin: INPUT_ORIGIN_SOURCE.to_string(),
            references: References::Containers(refs),
        }
    }

    /// The commit for `reference` in the repository built by `pipeline`.
    pub fn ostree_pipeline(pipeline: &str, reference: &str) -> Self {
        let mut refs = BTreeMap::new();
        refs.insert(
            format!("name:{}", pipeline),
            OstreeReference {
                reference: reference.to_string(),
            },
        );
        Self {
            input_type: "org.osbuild.ostree".to_string(),
            origin: INPUT_ORIGIN_PIPELINE.to_string(),
            references: References::Ostree(refs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_packages() {
        let i = Input::packages([("sha256:aa", true), ("sha256:bb", false)]);
        assert_eq!(
            serde_json::to_value(&i).unwrap(),
            json!({
                "type": "org.osbuild.files",
                "origin": "org.osbuild.source",
                "references": [
                    {"id": "sha256:aa", "options": {"metadata": {"rpm.check_gpg": true}}},
                    {"id": "sha256:bb"}
                ]
            })
        );
    }

    #[test]
    fn test_pipeline_refs() {
        assert_eq!(
            serde_json::to_value(Input::tree("os")).unwrap(),
            json!({"type": "org.osbuild.tree", "origin": "org.osbuild.pipeline", "references": ["name:os"]})
        );
        assert_eq!(
            serde_json::to_value(Input::pipeline_file("image", "disk.raw")).unwrap()["references"],
            json!({"name:image": {"file": "disk.raw"}})
        );
        assert_eq!(
            serde_json::to_value(Input::ostree_commit("abc", "rhel/9/x86_64/edge")).unwrap()
                ["references"],
            json!({"abc": {"ref": "rhel/9/x86_64/edge"}})
        );
    }
}
