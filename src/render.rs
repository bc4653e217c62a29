// Copyright 2025 The Multicluster Observability Operator Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Renders on-disk template sets into API objects.

use kube::api::DynamicObject;
use serde::Deserialize;
use snafu::{ResultExt, Snafu};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Replaced with the target namespace before parsing.
pub const NAMESPACE_PLACEHOLDER: &str = "__NAMESPACE__";

const CLUSTER_SCOPED_KINDS: [&str; 4] = [
    "Namespace",
    "ClusterRole",
    "ClusterRoleBinding",
    "CustomResourceDefinition",
];

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("template set '{}' not found under {}", set, path.display()))]
    UnknownSet { set: String, path: PathBuf },

    #[snafu(display("failed to read {}: {}", path.display(), source))]
    Read { path: PathBuf, source: std::io::Error },

    #[snafu(display("invalid YAML in {}: {}", source_name, source))]
    Yaml {
        source_name: String,
        source: serde_yaml_ng::Error,
    },

    #[snafu(display("document {} of {} is not an API object: {}", index, source_name, message))]
    InvalidObject {
        source_name: String,
        index: usize,
        message: String,
    },
}

pub trait Renderer: Send + Sync {
    /// Renders every object of `set` into `namespace`, carrying `labels`.
    fn render(
        &self,
        set: &str,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>, Error>;
}

pub fn is_cluster_scoped(kind: &str) -> bool {
    CLUSTER_SCOPED_KINDS.contains(&kind)
}

/// Reads `<root>/<set>/*.yaml` in file name order.
#[derive(Debug, Clone)]
pub struct DirRenderer {
    root: PathBuf,
}

impl DirRenderer {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

impl Renderer for DirRenderer {
    fn render(
        &self,
        set: &str,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>, Error> {
        let dir = self.root.join(set);
        if !dir.is_dir() {
            return UnknownSetSnafu { set, path: dir }.fail();
        }

        let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)
            .context(ReadSnafu { path: dir.clone() })?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .is_some_and(|ext| ext == "yaml" || ext == "yml")
            })
            .collect();
        files.sort();

        let mut objects = Vec::new();
        for path in files {
            let text = std::fs::read_to_string(&path).context(ReadSnafu { path: path.clone() })?;
            let source_name = path.display().to_string();
            objects.extend(render_documents(&source_name, &text, namespace, labels)?);
        }
        Ok(objects)
    }
}

/// Parses a multi-document YAML text, skipping empty documents.
pub fn render_documents(
    source_name: &str,
    text: &str,
    namespace: &str,
    labels: &BTreeMap<String, String>,
) -> Result<Vec<DynamicObject>, Error> {
    let text = text.replace(NAMESPACE_PLACEHOLDER, namespace);

    let mut objects = Vec::new();
    for (index, document) in serde_yaml_ng::Deserializer::from_str(&text).enumerate() {
        let value = serde_json::Value::deserialize(document).context(YamlSnafu { source_name })?;
        if value.is_null() {
            continue;
        }

        let mut object: DynamicObject =
            serde_json::from_value(value).map_err(|e| Error::InvalidObject {
                source_name: source_name.to_string(),
                index,
                message: e.to_string(),
            })?;
        let Some(types) = object.types.as_ref() else {
            return InvalidObjectSnafu {
                source_name,
                index,
                message: "missing apiVersion or kind",
            }
            .fail();
        };

        if is_cluster_scoped(&types.kind) {
            object.metadata.namespace = None;
        } else {
            object.metadata.namespace = Some(namespace.to_string());
        }
        if !labels.is_empty() {
            object
                .metadata
                .labels
                .get_or_insert_with(BTreeMap::new)
                .extend(labels.clone());
        }
        objects.push(object);
    }
    Ok(objects)
}

/// Serves template sets from memory.
#[derive(Debug, Clone, Default)]
pub struct StaticRenderer {
    sets: BTreeMap<String, String>,
}

impl StaticRenderer {
    pub fn with_set(mut self, set: &str, text: &str) -> Self {
        self.sets.insert(set.to_string(), text.to_string());
        self
    }
}

impl Renderer for StaticRenderer {
    fn render(
        &self,
        set: &str,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>, Error> {
        match self.sets.get(set) {
            Some(text) => render_documents(set, text, namespace, labels),
            None => UnknownSetSnafu {
                set,
                path: PathBuf::from(set),
            }
            .fail(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::templates;
    use crate::sync::registry::KindRegistry;
    use crate::sync::kind_of;

    const TWO_DOCS: &str = r#"
apiVersion: v1
kind: ServiceAccount
metadata:
  name: endpoint-observability-operator-sa
  labels:
    app: endpoint
---
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRoleBinding
metadata:
  name: endpoint-observability-operator-rb
subjects:
- kind: ServiceAccount
  name: endpoint-observability-operator-sa
  namespace: __NAMESPACE__
"#;

    fn owned() -> BTreeMap<String, String> {
        BTreeMap::from([("owner".to_string(), "obs".to_string())])
    }

    #[test]
    fn test_render_documents_stamps_namespace_and_labels() {
        let objects = render_documents("inline", TWO_DOCS, "spoke", &owned()).unwrap();
        assert_eq!(objects.len(), 2);

        let sa = &objects[0];
        assert_eq!(sa.metadata.namespace.as_deref(), Some("spoke"));
        let labels = sa.metadata.labels.as_ref().unwrap();
        assert_eq!(labels["app"], "endpoint");
        assert_eq!(labels["owner"], "obs");

        let binding = &objects[1];
        assert!(binding.metadata.namespace.is_none());
        assert_eq!(binding.data["subjects"][0]["namespace"], "spoke");
    }

    #[test]
    fn test_render_documents_rejects_objects_without_kind() {
        let err = render_documents("inline", "metadata:\n  name: x\n", "ns", &owned()).unwrap_err();
        assert!(matches!(err, Error::InvalidObject { .. }));
    }

    #[test]
    fn test_static_renderer_unknown_set() {
        let renderer = StaticRenderer::default().with_set("a", TWO_DOCS);
        assert_eq!(renderer.render("a", "ns", &owned()).unwrap().len(), 2);
        assert!(matches!(
            renderer.render("b", "ns", &owned()),
            Err(Error::UnknownSet { .. })
        ));
    }

    #[test]
    fn test_shipped_templates_only_use_registered_kinds() {
        let renderer = DirRenderer::new(concat!(env!("CARGO_MANIFEST_DIR"), "/manifests"));
        let registry = KindRegistry::standard();

        for set in [
            templates::HUB,
            templates::ENDPOINT_OPERATOR,
            templates::ENDPOINT_RESOURCES,
        ] {
            let objects = renderer.render(set, "ns", &owned()).unwrap();
            assert!(!objects.is_empty(), "{set} rendered nothing");
            let missing = registry.missing(objects.iter().map(kind_of));
            assert!(missing.is_empty(), "{set} uses unregistered kinds {missing:?}");
        }
    }
}
