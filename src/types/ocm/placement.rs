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

//! Placement decisions are produced by an external placement engine and only read here,
//! so they are handled as dynamic objects rather than a derived resource.

use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use serde::{Deserialize, Serialize};

pub const GROUP: &str = "cluster.open-cluster-management.io";
pub const VERSION: &str = "v1beta1";
pub const KIND: &str = "PlacementDecision";
pub const PLURAL: &str = "placementdecisions";

pub fn api_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(&GroupVersionKind::gvk(GROUP, VERSION, KIND), PLURAL)
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlacementDecisionStatus {
    #[serde(default)]
    pub decisions: Vec<ClusterDecision>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDecision {
    pub cluster_name: String,

    #[serde(default)]
    pub reason: String,
}

/// A managed cluster selected by placement, with the hub namespace that represents it.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClusterRef {
    pub cluster_name: String,
    pub cluster_namespace: String,
}

impl ClusterRef {
    pub fn new(cluster_name: &str) -> Self {
        Self {
            cluster_name: cluster_name.to_string(),
            cluster_namespace: cluster_name.to_string(),
        }
    }
}

/// Extracts the decisions carried by one placement decision object.
///
/// Objects without a status, or with a malformed one, contribute no decisions.
pub fn decisions_of(obj: &DynamicObject) -> Vec<ClusterRef> {
    obj.data
        .get("status")
        .cloned()
        .and_then(|status| serde_json::from_value::<PlacementDecisionStatus>(status).ok())
        .map(|status| {
            status
                .decisions
                .iter()
                .filter(|d| !d.cluster_name.is_empty())
                .map(|d| ClusterRef::new(&d.cluster_name))
                .collect()
        })
        .unwrap_or_default()
}
