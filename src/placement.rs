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

//! Turns placement decisions into the set of clusters that should be in the fleet.

use crate::constants::{labels, spoke, work};
use crate::context::{self, Context, KubeSnafu};
use crate::types::ocm::manifest_work::ManifestWork;
use crate::types::ocm::placement::{self, ClusterRef};
use crate::types::v1beta1::addon::ObservabilityAddon;
use kube::ResourceExt;
use kube::api::ListParams;
use snafu::futures::TryFutureExt;
use std::collections::BTreeSet;

/// What a fleet pass has to do.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Every cluster that should be in the fleet, sorted.
    pub desired: Vec<ClusterRef>,
    /// Desired clusters without a marker yet.
    pub to_add: Vec<ClusterRef>,
    /// Cluster namespaces holding a marker or an owned bundle but no longer desired.
    pub to_remove: Vec<String>,
    /// Owned bundles whose name matches neither bundle name of their namespace.
    pub invalid_bundles: Vec<(String, String)>,
}

/// Diffs placement decisions against the namespaces that currently hold a marker.
pub fn resolve(decisions: &[ClusterRef], current_markers: &[String]) -> (Vec<ClusterRef>, Vec<String>) {
    let wanted: BTreeSet<&str> = decisions
        .iter()
        .map(|c| c.cluster_namespace.as_str())
        .collect();
    let present: BTreeSet<&str> = current_markers.iter().map(String::as_str).collect();

    let mut to_add: Vec<ClusterRef> = decisions
        .iter()
        .filter(|c| !present.contains(c.cluster_namespace.as_str()))
        .cloned()
        .collect();
    to_add.sort();
    to_add.dedup();

    let to_remove = present
        .difference(&wanted)
        .map(|ns| ns.to_string())
        .collect();
    (to_add, to_remove)
}

pub fn is_expected_bundle(namespace: &str, name: &str) -> bool {
    name == work::operator_bundle_name(namespace) || name == work::resource_bundle_name(namespace)
}

/// Full plan for one pass. With no root resource every decision is ignored, which
/// tears the whole fleet down.
pub fn plan(
    decisions: &[ClusterRef],
    current_markers: &[String],
    bundles: &[ManifestWork],
    root_present: bool,
) -> Resolution {
    let mut desired: Vec<ClusterRef> = if root_present {
        decisions.to_vec()
    } else {
        Vec::new()
    };
    desired.sort();
    desired.dedup();

    let (to_add, mut to_remove) = resolve(&desired, current_markers);

    let mut invalid_bundles = Vec::new();
    for bundle in bundles {
        let (Some(namespace), name) = (bundle.namespace(), bundle.name_any()) else {
            continue;
        };
        if !is_expected_bundle(&namespace, &name) {
            invalid_bundles.push((namespace.clone(), name));
        }
        let orphaned = !desired.iter().any(|c| c.cluster_namespace == namespace);
        if orphaned && !to_remove.contains(&namespace) {
            to_remove.push(namespace);
        }
    }
    to_remove.sort();
    invalid_bundles.sort();

    Resolution {
        desired,
        to_add,
        to_remove,
        invalid_bundles,
    }
}

/// Clusters selected by the observability placement, sorted and de-duplicated.
pub async fn desired_clusters(ctx: &Context) -> Result<Vec<ClusterRef>, context::Error> {
    let api = ctx.dynamic_api(&placement::api_resource(), Some(&ctx.config.namespace));
    let selector = format!("{}={}", labels::PLACEMENT, labels::PLACEMENT_NAME);
    let decisions = api
        .list(&ListParams::default().labels(&selector))
        .context(KubeSnafu)
        .await?;

    let mut clusters: Vec<ClusterRef> = decisions
        .items
        .iter()
        .flat_map(placement::decisions_of)
        .collect();
    clusters.sort();
    clusters.dedup();
    Ok(clusters)
}

/// Namespaces holding an operator-owned marker.
pub async fn current_markers(ctx: &Context) -> Result<Vec<String>, context::Error> {
    let selector = labels::managed_selector();
    let markers: Vec<ObservabilityAddon> = ctx.list_all(Some(&selector)).await?;

    let mut namespaces: Vec<String> = markers
        .iter()
        .filter(|m| m.name_any() == spoke::ADDON_NAME)
        .filter_map(|m| m.namespace())
        .collect();
    namespaces.sort();
    namespaces.dedup();
    Ok(namespaces)
}

pub async fn owned_bundles(ctx: &Context) -> Result<Vec<ManifestWork>, context::Error> {
    ctx.list_all(Some(&labels::managed_selector())).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clusters(names: &[&str]) -> Vec<ClusterRef> {
        names.iter().map(|n| ClusterRef::new(n)).collect()
    }

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_resolve_adds_and_removes() {
        let (to_add, to_remove) = resolve(&clusters(&["a", "b"]), &strings(&["b", "c"]));
        assert_eq!(to_add, clusters(&["a"]));
        assert_eq!(to_remove, strings(&["c"]));
    }

    #[test]
    fn test_resolve_steady_state_is_empty() {
        let (to_add, to_remove) = resolve(&clusters(&["a", "b"]), &strings(&["a", "b"]));
        assert!(to_add.is_empty());
        assert!(to_remove.is_empty());
    }

    #[test]
    fn test_plan_without_root_removes_everything() {
        let resolution = plan(&clusters(&["a", "b"]), &strings(&["a", "b"]), &[], false);
        assert!(resolution.desired.is_empty());
        assert!(resolution.to_add.is_empty());
        assert_eq!(resolution.to_remove, strings(&["a", "b"]));
    }

    #[test]
    fn test_plan_flags_invalid_and_orphaned_bundles() {
        let bundles = vec![
            ManifestWork::new_bundle(&work::operator_bundle_name("a"), "a", vec![]),
            ManifestWork::new_bundle("a-legacy-bundle", "a", vec![]),
            ManifestWork::new_bundle(&work::resource_bundle_name("z"), "z", vec![]),
        ];
        let resolution = plan(&clusters(&["a"]), &strings(&["a"]), &bundles, true);

        assert_eq!(
            resolution.invalid_bundles,
            vec![("a".to_string(), "a-legacy-bundle".to_string())]
        );
        assert_eq!(resolution.to_remove, strings(&["z"]));
        assert!(resolution.to_add.is_empty());
    }

    #[test]
    fn test_expected_bundle_names() {
        assert!(is_expected_bundle("a", "a-observability-operator"));
        assert!(is_expected_bundle("a", "a-observability-operator-res"));
        assert!(!is_expected_bundle("a", "b-observability-operator"));
    }
}
