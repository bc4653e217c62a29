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

use crate::constants::{labels, spoke, OPERATOR_NAME};
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use kube::{CustomResource, KubeSchema};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_INTERVAL_SECONDS: i32 = 300;
pub const MIN_INTERVAL_SECONDS: i32 = 15;
pub const MAX_INTERVAL_SECONDS: i32 = 3600;

fn default_enable_metrics() -> bool {
    true
}

fn default_interval() -> i32 {
    DEFAULT_INTERVAL_SECONDS
}

/// The per-cluster marker. Its existence in a cluster namespace means the cluster is in the fleet.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, KubeSchema, PartialEq, Eq)]
#[kube(
    group = "observability.open-cluster-management.io",
    version = "v1beta1",
    kind = "ObservabilityAddon",
    namespaced,
    status = "crate::types::v1beta2::status::Status",
    shortname = "oba",
    plural = "observabilityaddons",
    singular = "observabilityaddon",
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct ObservabilityAddonSpec {
    /// Push metrics from the managed cluster to the hub.
    #[serde(default = "default_enable_metrics")]
    pub enable_metrics: bool,

    /// Push interval in seconds.
    #[serde(default = "default_interval")]
    #[x_kube(validation = Rule::new("self >= 15 && self <= 3600").message("interval must be between 15 and 3600 seconds"))]
    pub interval: i32,
}

impl Default for ObservabilityAddonSpec {
    fn default() -> Self {
        Self {
            enable_metrics: default_enable_metrics(),
            interval: default_interval(),
        }
    }
}

impl ObservabilityAddonSpec {
    pub fn interval_in_range(&self) -> bool {
        (MIN_INTERVAL_SECONDS..=MAX_INTERVAL_SECONDS).contains(&self.interval)
    }
}

impl ObservabilityAddon {
    /// The hub-side marker placed in a managed cluster's namespace.
    pub fn new_marker(cluster_namespace: &str, spec: ObservabilityAddonSpec) -> Self {
        let mut addon = ObservabilityAddon::new(spoke::ADDON_NAME, spec);
        addon.metadata.namespace = Some(cluster_namespace.to_string());
        addon.metadata.labels = Some(BTreeMap::from([
            (labels::MANAGED_BY.to_string(), OPERATOR_NAME.to_string()),
            (labels::CLUSTER.to_string(), cluster_namespace.to_string()),
        ]));
        addon.metadata.finalizers = Some(vec![
            crate::constants::finalizers::ADDON_CLEANUP.to_string(),
        ]);
        addon
    }

    /// The copy shipped to the managed cluster inside the resource bundle.
    pub fn new_spoke_copy(spoke_namespace: &str, spec: ObservabilityAddonSpec) -> Self {
        ObservabilityAddon {
            metadata: metav1::ObjectMeta {
                name: Some(spoke::ADDON_NAME.to_string()),
                namespace: Some(spoke_namespace.to_string()),
                ..Default::default()
            },
            spec,
            status: None,
        }
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::ResourceExt;

    #[test]
    fn test_spec_defaults_when_fields_missing() {
        let spec: ObservabilityAddonSpec = serde_json::from_str("{}").unwrap();
        assert!(spec.enable_metrics);
        assert_eq!(spec.interval, DEFAULT_INTERVAL_SECONDS);
        assert!(spec.interval_in_range());
    }

    #[test]
    fn test_interval_bounds() {
        let too_fast = ObservabilityAddonSpec {
            interval: 14,
            ..Default::default()
        };
        let too_slow = ObservabilityAddonSpec {
            interval: 3601,
            ..Default::default()
        };
        assert!(!too_fast.interval_in_range());
        assert!(!too_slow.interval_in_range());
    }

    #[test]
    fn test_new_marker_is_labelled_and_guarded() {
        let addon = ObservabilityAddon::new_marker("cluster-a", ObservabilityAddonSpec::default());

        assert_eq!(addon.name_any(), spoke::ADDON_NAME);
        assert_eq!(addon.namespace().as_deref(), Some("cluster-a"));
        assert_eq!(
            addon.labels().get(labels::CLUSTER).map(String::as_str),
            Some("cluster-a")
        );
        assert_eq!(
            addon.finalizers(),
            &[crate::constants::finalizers::ADDON_CLEANUP.to_string()]
        );
    }
}
