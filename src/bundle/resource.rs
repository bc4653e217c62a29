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

//! The resource bundle: the spoke-side marker, its CRD and the rendered endpoint resources.

use super::{HubInputs, Result};
use crate::types::ocm::placement::ClusterRef;
use crate::types::v1beta1::addon::ObservabilityAddon;
use serde_json::Value;

pub fn manifests(
    cluster: &ClusterRef,
    inputs: &HubInputs,
    marker: Option<&ObservabilityAddon>,
) -> Result<Vec<Value>> {
    let mut manifests = Vec::with_capacity(inputs.resource_templates.len() + 2);

    if let Some(marker) = marker.filter(|m| !m.is_deleting()) {
        let copy = ObservabilityAddon::new_spoke_copy(&inputs.spoke_namespace, marker.spec.clone());
        manifests.push(serde_json::to_value(copy)?);
    }

    // the local cluster shares the hub's CRD
    if cluster.cluster_name != inputs.local_cluster_name {
        manifests.push(inputs.addon_crd.clone());
    }

    manifests.extend(inputs.resource_templates.iter().cloned());
    Ok(manifests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::tests::inputs;
    use crate::constants::spoke;
    use crate::types::v1beta1::addon::ObservabilityAddonSpec;

    fn kinds(manifests: &[Value]) -> Vec<&str> {
        manifests.iter().map(|m| m["kind"].as_str().unwrap()).collect()
    }

    #[test]
    fn test_marker_copy_is_prepended() {
        let spec = ObservabilityAddonSpec {
            enable_metrics: false,
            interval: 60,
        };
        let marker = ObservabilityAddon::new_marker("cluster-a", spec);
        let manifests = manifests(&ClusterRef::new("cluster-a"), &inputs(), Some(&marker)).unwrap();

        assert_eq!(kinds(&manifests)[..2], ["ObservabilityAddon", "CustomResourceDefinition"]);
        assert_eq!(manifests[0]["metadata"]["name"], spoke::ADDON_NAME);
        assert_eq!(manifests[0]["metadata"]["namespace"], "spoke-ns");
        assert_eq!(manifests[0]["spec"]["interval"], 60);
        assert!(manifests[0]["metadata"].get("finalizers").is_none());
    }

    #[test]
    fn test_deleting_marker_is_not_shipped() {
        let mut marker = ObservabilityAddon::new_marker("cluster-a", Default::default());
        marker.metadata.deletion_timestamp =
            Some(serde_json::from_value(serde_json::json!("2025-01-01T00:00:00Z")).unwrap());

        let manifests = manifests(&ClusterRef::new("cluster-a"), &inputs(), Some(&marker)).unwrap();
        assert!(!kinds(&manifests).contains(&"ObservabilityAddon"));
    }

    #[test]
    fn test_local_cluster_omits_crd() {
        let inputs = inputs();
        let local = manifests(&ClusterRef::new(&inputs.local_cluster_name), &inputs, None).unwrap();
        let remote = manifests(&ClusterRef::new("cluster-a"), &inputs, None).unwrap();

        assert!(!kinds(&local).contains(&"CustomResourceDefinition"));
        assert!(kinds(&remote).contains(&"CustomResourceDefinition"));
        assert_eq!(remote.len(), local.len() + 1);
    }
}
