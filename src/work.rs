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

//! Applies work bundles as single units, writing only when their manifests diverge.

use crate::constants::{annotations, labels};
use crate::context::{self, Context, KubeSnafu};
use crate::sync::SyncOutcome;
use crate::sync::registry::KindRegistry;
use crate::types::ocm::manifest_work::ManifestWork;
use kube::api::{Api, PostParams};
use kube::ResourceExt;
use serde_json::Value;
use sha2::{Digest, Sha256};
use snafu::futures::TryFutureExt;
use snafu::{OptionExt, Snafu};
use std::fmt::Write;
use tracing::{debug, info};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("work bundle {}/{} is being deleted", namespace, name))]
    Terminating { namespace: String, name: String },

    #[snafu(display("work bundle {} has no namespace", name))]
    MissingNamespace { name: String },

    #[snafu(display("work bundle carries a manifest of unregistered kind '{}'", kind))]
    UnsupportedKind { kind: String },

    #[snafu(transparent)]
    Context { source: context::Error },

    #[snafu(transparent)]
    Serde { source: serde_json::Error },
}

impl Error {
    /// Retrying later is expected to succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Terminating { .. } => true,
            Error::Context { source } => source.is_conflict(),
            _ => false,
        }
    }
}

/// Hex sha256 of the canonical JSON encoding of `manifests`.
pub fn content_hash(manifests: &[Value]) -> Result<String, Error> {
    let digest = Sha256::digest(serde_json::to_vec(manifests)?);
    let mut hex = String::with_capacity(64);
    for byte in digest.iter() {
        let _ = write!(hex, "{byte:02x}");
    }
    Ok(hex)
}

fn identity(manifest: &Value) -> (&Value, &Value, &Value, &Value) {
    (
        &manifest["apiVersion"],
        &manifest["kind"],
        &manifest["metadata"]["name"],
        &manifest["metadata"]["namespace"],
    )
}

/// Element-wise comparison of two manifest lists with the per-kind comparators.
///
/// A manifest of an unregistered kind is an error, never a silent match.
pub fn manifests_match(registry: &KindRegistry, desired: &[Value], live: &[Value]) -> Result<bool, Error> {
    if desired.len() != live.len() {
        return Ok(false);
    }

    for (d, l) in desired.iter().zip(live) {
        let kind = d["kind"].as_str().unwrap_or_default();
        let strategy = registry.get(kind).context(UnsupportedKindSnafu { kind })?;
        if identity(d) != identity(l) || !strategy.matches(d, l) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Creates the bundle, or updates it when its manifests differ from the live bundle.
pub async fn apply(ctx: &Context, bundle: &ManifestWork) -> Result<SyncOutcome, Error> {
    let name = bundle.name_any();
    let namespace = bundle
        .namespace()
        .context(MissingNamespaceSnafu { name: name.clone() })?;
    let api: Api<ManifestWork> = Api::namespaced(ctx.client.clone(), &namespace);

    let mut desired = bundle.clone();
    desired
        .annotations_mut()
        .insert(annotations::CONTENT_HASH.to_string(), content_hash(bundle.manifests())?);

    let live = match api.get_opt(&name).context(KubeSnafu).await? {
        Some(live) => live,
        None => match api.create(&PostParams::default(), &desired).context(KubeSnafu).await {
            Ok(_) => {
                info!("created work bundle {}/{}", namespace, name);
                return Ok(SyncOutcome::Created);
            }
            Err(e) if e.is_already_exists() => api.get(&name).context(KubeSnafu).await?,
            Err(e) => return Err(e.into()),
        },
    };

    if live.is_deleting() {
        return TerminatingSnafu { namespace, name }.fail();
    }

    let labels_present = desired
        .labels()
        .iter()
        .all(|(k, v)| live.labels().get(k) == Some(v));
    if labels_present && manifests_match(&ctx.registry, desired.manifests(), live.manifests())? {
        debug!("work bundle {}/{} is up to date, skip update", namespace, name);
        return Ok(SyncOutcome::Unchanged);
    }

    let mut updated = live;
    updated.spec = desired.spec.clone();
    updated.labels_mut().extend(desired.labels().clone());
    updated.annotations_mut().extend(desired.annotations().clone());
    api.replace(&name, &PostParams::default(), &updated)
        .context(KubeSnafu)
        .await?;
    info!("updated work bundle {}/{}", namespace, name);
    Ok(SyncOutcome::Updated)
}

pub async fn delete_bundle(ctx: &Context, namespace: &str, name: &str) -> Result<bool, Error> {
    let deleted = ctx.delete::<ManifestWork>(name, namespace).await?;
    if deleted {
        info!("deleted work bundle {}/{}", namespace, name);
    }
    Ok(deleted)
}

/// Deletes every operator-owned bundle in a cluster namespace, whatever its name.
pub async fn delete_cluster_bundles(ctx: &Context, cluster_namespace: &str) -> Result<usize, Error> {
    let selector = labels::managed_selector();
    let bundles: Vec<ManifestWork> = ctx.list(cluster_namespace, Some(&selector)).await?;

    let mut deleted = 0;
    for bundle in bundles {
        if delete_bundle(ctx, cluster_namespace, &bundle.name_any()).await? {
            deleted += 1;
        }
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{test_context, MockApi};
    use serde_json::json;

    const WORK: &str = "work.open-cluster-management.io/v1";

    fn config_map(value: &str) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "settings", "namespace": "spoke"},
            "data": {"key": value},
        })
    }

    fn bundle(manifests: Vec<Value>) -> ManifestWork {
        ManifestWork::new_bundle("cluster-a-observability-operator", "cluster-a", manifests)
    }

    #[tokio::test]
    async fn test_apply_is_idempotent() {
        let api = MockApi::new();
        let ctx = test_context(&api);
        let work = bundle(vec![config_map("1")]);

        assert_eq!(apply(&ctx, &work).await.unwrap(), SyncOutcome::Created);
        let writes = api.write_count();

        assert_eq!(apply(&ctx, &work).await.unwrap(), SyncOutcome::Unchanged);
        assert_eq!(api.write_count(), writes);

        let live = api
            .get(WORK, "manifestworks", Some("cluster-a"), "cluster-a-observability-operator")
            .unwrap();
        let hash = content_hash(work.manifests()).unwrap();
        assert_eq!(live["metadata"]["annotations"][annotations::CONTENT_HASH], hash);
        assert_eq!(hash.len(), 64);
    }

    #[tokio::test]
    async fn test_apply_updates_changed_manifests_and_keeps_live_metadata() {
        let api = MockApi::new();
        let ctx = test_context(&api);
        apply(&ctx, &bundle(vec![config_map("1")])).await.unwrap();

        let mut live = api
            .get(WORK, "manifestworks", Some("cluster-a"), "cluster-a-observability-operator")
            .unwrap();
        live["metadata"]["finalizers"] = json!(["cluster.open-cluster-management.io/manifest-work-cleanup"]);
        api.insert(live);

        let outcome = apply(&ctx, &bundle(vec![config_map("2")])).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Updated);

        let live = api
            .get(WORK, "manifestworks", Some("cluster-a"), "cluster-a-observability-operator")
            .unwrap();
        assert_eq!(live["spec"]["workload"]["manifests"][0]["data"]["key"], "2");
        assert_eq!(live["metadata"]["finalizers"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_apply_fails_fast_on_terminating_bundle() {
        let api = MockApi::new();
        let ctx = test_context(&api);
        let mut live = serde_json::to_value(bundle(vec![config_map("1")])).unwrap();
        live["metadata"]["deletionTimestamp"] = json!("2025-01-01T00:00:00Z");
        live["metadata"]["finalizers"] = json!(["cluster.open-cluster-management.io/manifest-work-cleanup"]);
        api.insert(live);

        let err = apply(&ctx, &bundle(vec![config_map("2")])).await.unwrap_err();
        assert!(matches!(err, Error::Terminating { .. }));
        assert!(err.is_retryable());
        assert_eq!(api.write_count(), 0);
    }

    #[test]
    fn test_manifests_match_rules() {
        let registry = KindRegistry::standard();
        let a = vec![config_map("1")];

        assert!(manifests_match(&registry, &a, &a).unwrap());
        assert!(!manifests_match(&registry, &a, &[config_map("2")]).unwrap());
        assert!(!manifests_match(&registry, &a, &[]).unwrap());

        let mut renamed = config_map("1");
        renamed["metadata"]["name"] = json!("other");
        assert!(!manifests_match(&registry, &a, &[renamed]).unwrap());

        let unknown = vec![json!({"apiVersion": "example.com/v1", "kind": "Widget", "metadata": {"name": "w"}})];
        assert!(matches!(
            manifests_match(&registry, &unknown, &unknown),
            Err(Error::UnsupportedKind { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_cluster_bundles_uses_ownership_label() {
        let api = MockApi::new();
        let ctx = test_context(&api);
        apply(&ctx, &bundle(vec![config_map("1")])).await.unwrap();
        apply(
            &ctx,
            &ManifestWork::new_bundle("renamed-in-an-older-release", "cluster-a", vec![]),
        )
        .await
        .unwrap();
        api.insert(json!({
            "apiVersion": WORK,
            "kind": "ManifestWork",
            "metadata": {"name": "someone-elses", "namespace": "cluster-a"},
            "spec": {"workload": {"manifests": []}},
        }));

        assert_eq!(delete_cluster_bundles(&ctx, "cluster-a").await.unwrap(), 2);
        let left: Vec<_> = api.list(WORK, "manifestworks");
        assert_eq!(left.len(), 1);
        assert_eq!(left[0]["metadata"]["name"], "someone-elses");
    }
}
