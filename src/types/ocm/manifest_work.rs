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

use crate::constants::{labels, OPERATOR_NAME};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A bundle of manifests applied as one unit on a managed cluster.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[kube(
    group = "work.open-cluster-management.io",
    version = "v1",
    kind = "ManifestWork",
    namespaced,
    plural = "manifestworks",
    derive = "PartialEq",
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct ManifestWorkSpec {
    #[serde(default)]
    pub workload: ManifestsTemplate,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_option: Option<DeleteOption>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestsTemplate {
    #[serde(default)]
    pub manifests: Vec<serde_json::Value>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOption {
    pub propagation_policy: String,
}

impl ManifestWork {
    /// A bundle owned by this operator for the given cluster namespace.
    pub fn new_bundle(name: &str, cluster_namespace: &str, manifests: Vec<serde_json::Value>) -> Self {
        let mut work = ManifestWork::new(
            name,
            ManifestWorkSpec {
                workload: ManifestsTemplate { manifests },
                delete_option: None,
            },
        );
        work.metadata.namespace = Some(cluster_namespace.to_string());
        work.metadata.labels = Some(BTreeMap::from([
            (labels::MANAGED_BY.to_string(), OPERATOR_NAME.to_string()),
            (labels::CLUSTER.to_string(), cluster_namespace.to_string()),
        ]));
        work
    }

    pub fn manifests(&self) -> &[serde_json::Value] {
        &self.spec.workload.manifests
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}
