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

//! Hub workload controller: PKI, the rendered hub stack and the root's status.

use crate::constants::{finalizers, hub, labels, templates};
use crate::context::{Context, KubeSnafu};
use crate::pki::CertOutcome;
use crate::status::{Failure, FailureReason, StatusOutcome};
use crate::types::v1beta2::observability::MultiClusterObservability;
use crate::{bundle, context, pki, render, status, sync, types, work};
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use snafu::Snafu;
use snafu::futures::TryFutureExt;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

pub mod fleet;
pub mod hashring;
pub mod storage;

/// Requeue delay after a status write lost to a concurrent writer twice.
const CONFLICT_REQUEUE: Duration = Duration::from_secs(2);

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("{} cluster(s) failed to reconcile: {}", failures.len(), failures.join("; ")))]
    Fleet { failures: Vec<String> },

    #[snafu(transparent)]
    Context { source: context::Error },

    #[snafu(transparent)]
    Pki { source: pki::Error },

    #[snafu(transparent)]
    Sync { source: sync::Error },

    #[snafu(transparent)]
    Render { source: render::Error },

    #[snafu(transparent)]
    Bundle { source: bundle::Error },

    #[snafu(transparent)]
    Work { source: work::Error },

    #[snafu(transparent)]
    Status { source: status::Error },

    #[snafu(transparent)]
    Types { source: types::error::Error },

    #[snafu(transparent)]
    Serde { source: serde_json::Error },
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Context { source } => source.is_not_found(),
            Error::Sync {
                source: sync::Error::Context { source },
            } => source.is_not_found(),
            _ => false,
        }
    }
}

pub(crate) fn has_finalizer<K: Resource>(object: &K, finalizer: &str) -> bool {
    object
        .meta()
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|name| name == finalizer))
}

async fn patch_finalizers<K>(
    api: &Api<K>,
    object: &K,
    finalizers: Vec<String>,
) -> Result<K, context::Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let patch = serde_json::json!({
        "metadata": {
            "resourceVersion": object.resource_version(),
            "finalizers": finalizers,
        }
    });
    api.patch(&object.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .context(KubeSnafu)
        .await
}

/// Adds `finalizer` unless present. Returns the object as stored.
pub(crate) async fn add_finalizer<K>(api: &Api<K>, object: K, finalizer: &str) -> Result<K, context::Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    if has_finalizer(&object, finalizer) {
        return Ok(object);
    }
    let mut finalizers = object.finalizers().to_vec();
    finalizers.push(finalizer.to_string());
    debug!("adding finalizer {} to {}", finalizer, object.name_any());
    patch_finalizers(api, &object, finalizers).await
}

pub(crate) async fn remove_finalizer<K>(api: &Api<K>, object: &K, finalizer: &str) -> Result<(), context::Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    if !has_finalizer(object, finalizer) {
        return Ok(());
    }
    let finalizers = object
        .finalizers()
        .iter()
        .filter(|name| *name != finalizer)
        .cloned()
        .collect();
    debug!("removing finalizer {} from {}", finalizer, object.name_any());
    match patch_finalizers(api, object, finalizers).await {
        Err(e) if e.is_not_found() => Ok(()),
        other => other.map(|_| ()),
    }
}

/// Publishes an event, logging instead of failing when the event cannot be written.
pub(crate) async fn publish<K>(ctx: &Context, resource: &K, reason: &str, message: &str)
where
    K: Resource<DynamicType = ()>,
{
    if let Err(error) = ctx
        .record(resource, EventType::Normal, reason, message)
        .await
    {
        warn!("failed to publish {} event: {}", reason, error);
    }
}

/// Deletes every labelled hub object: namespaced ones in the hub and client CA namespaces,
/// and the labelled cluster-scoped ones.
pub async fn cleanup_hub(ctx: &Context) -> Result<usize, Error> {
    let selector = labels::managed_selector();
    let namespace = ctx.config.namespace.as_str();
    let mut deleted = sync::prune_labelled(ctx, namespace, &selector).await?;

    let client_ns = ctx.config.client_ca_namespace();
    if client_ns != namespace {
        deleted += sync::prune_labelled(ctx, client_ns, &selector).await?;
    }
    info!("deleted {} hub object(s)", deleted);
    Ok(deleted)
}

/// Renders the hub template set and syncs every object, adjusting the ones that must
/// follow live state.
pub async fn apply_hub_stack(ctx: &Context, mco: &MultiClusterObservability) -> Result<usize, Error> {
    let namespace = ctx.config.namespace.as_str();
    let objects = ctx
        .renderer
        .render(templates::HUB, namespace, &pki::managed_labels())?;

    let mut written = 0;
    for mut object in objects {
        let kind = sync::kind_of(&object).to_string();
        match kind.as_str() {
            "StatefulSet" => storage::prepare_statefulset(ctx, mco, &mut object).await?,
            "Observatorium" => {
                hashring::preserve_live_tenants(ctx, &mut object).await?;
            }
            _ => {}
        }
        if sync::sync_object(ctx, &object).await? != sync::SyncOutcome::Unchanged {
            written += 1;
        }
    }
    Ok(written)
}

async fn ensure_pki(ctx: &Context, mco: &MultiClusterObservability) -> Result<(), Error> {
    let hub_host = bundle::external_host(
        ctx,
        ctx.config.hub_endpoint.as_deref(),
        hub::OBSERVATORIUM_INGRESS,
    )
    .await?;

    for (secret, outcome) in pki::ensure_hub_pki(ctx, hub_host.as_deref()).await? {
        if outcome == CertOutcome::Renewed {
            publish(ctx, mco, "CertificateRenewed", &format!("{secret} was renewed")).await;
        }
    }
    Ok(())
}

#[instrument(skip_all, fields(name = %mco.name()))]
pub async fn reconcile_hub(mco: Arc<MultiClusterObservability>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = mco.name();
    let api: Api<MultiClusterObservability> = Api::all(ctx.client.clone());

    let Some(latest) = ctx.get_cluster_opt::<MultiClusterObservability>(&name).await? else {
        debug!("{} no longer exists", name);
        ctx.last_observed.clear();
        return Ok(Action::await_change());
    };

    if latest.is_deleting() {
        info!("{} is being deleted, cleaning up the hub", name);
        cleanup_hub(&ctx).await?;
        remove_finalizer(&api, &latest, finalizers::HUB_CLEANUP).await?;
        ctx.last_observed.clear();
        return Ok(Action::await_change());
    }

    ctx.last_observed.record(&name);
    let latest = add_finalizer(&api, latest, finalizers::HUB_CLEANUP).await?;
    latest.validate()?;

    // 1. Resolve the storage class before any claim template is rendered
    let latest = storage::default_storage_class(&ctx, latest).await?;

    // 2. Server trust domain, then client trust domain
    match ensure_pki(&ctx, &latest).await {
        Err(Error::Pki { source }) if source.is_invalid_material() => {
            let message = source.to_string();
            warn!("{}", message);
            let failure = Failure::new(FailureReason::CertificateInvalid, message.clone());
            status::record_failure(&ctx, &latest, failure).await?;
            publish(&ctx, &latest, "CertificateInvalid", &message).await;
            return Err(source.into());
        }
        other => other?,
    }

    // 3. Hub workloads
    apply_hub_stack(&ctx, &latest).await?;
    storage::grow_volume_claims(&ctx, &latest, &hub::STATEFULSETS).await?;
    pki::restart_dependents(&ctx, &ctx.config.namespace).await?;

    // 4. Status
    match status::update(&ctx, &latest).await? {
        StatusOutcome::Conflict => {
            publish(&ctx, &latest, "StatusConflict", "status update conflicted, requeued").await;
            Ok(Action::requeue(CONFLICT_REQUEUE))
        }
        outcome => {
            debug!("{} reconciled: {:?}", name, outcome);
            Ok(Action::requeue(ctx.config.resync_interval()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::certs;
    use crate::tests::{
        insert_mco, insert_ready_deployments, insert_ready_statefulsets, storage_secret, test_context,
        test_mco, MockApi,
    };
    use crate::types::v1beta2::status::{ConditionStatus, Status};
    use serde_json::json;

    const MCO: &str = "observability.open-cluster-management.io/v1beta2";
    const MCO_PLURAL: &str = "multiclusterobservabilities";

    fn stored_mco(api: &MockApi) -> Option<serde_json::Value> {
        api.get(MCO, MCO_PLURAL, None, "observability")
    }

    fn stored_status(api: &MockApi) -> Status {
        stored_mco(api)
            .and_then(|mco| serde_json::from_value(mco["status"].clone()).ok())
            .unwrap_or_default()
    }

    #[test]
    fn test_has_finalizer() {
        let mut mco = test_mco();
        assert!(!has_finalizer(&mco, finalizers::HUB_CLEANUP));
        mco.metadata.finalizers = Some(vec![finalizers::HUB_CLEANUP.to_string()]);
        assert!(has_finalizer(&mco, finalizers::HUB_CLEANUP));
        assert!(!has_finalizer(&mco, finalizers::FLEET_CLEANUP));
    }

    #[tokio::test]
    async fn test_reconcile_installs_hub() {
        let api = MockApi::new();
        let ctx = Arc::new(test_context(&api));
        let ns = ctx.config.namespace.clone();
        let mco = insert_mco(&api, &test_mco());

        let action = reconcile_hub(Arc::new(mco), ctx.clone()).await.unwrap();
        assert_eq!(action, Action::requeue(ctx.config.resync_interval()));
        assert_eq!(ctx.last_observed.get().as_deref(), Some("observability"));

        let stored = stored_mco(&api).unwrap();
        assert_eq!(stored["metadata"]["finalizers"], json!([finalizers::HUB_CLEANUP]));

        let secrets = crate::tests::secret_names(&api, &ns);
        for name in [certs::SERVER_CA, certs::SERVER_CERT, certs::CLIENT_CA, certs::GRAFANA_CERT] {
            assert!(secrets.contains(&name.to_string()), "missing {name}");
        }
        for name in hub::DEPLOYMENTS {
            assert!(api.get("apps/v1", "deployments", Some(&ns), name).is_some(), "missing {name}");
        }
        for name in hub::STATEFULSETS {
            assert!(api.get("apps/v1", "statefulsets", Some(&ns), name).is_some(), "missing {name}");
        }

        let status = stored_status(&api);
        assert_eq!(
            status.condition(status::FAILED).map(|c| c.reason.as_str()),
            Some("ObjectStorageSecretNotFound")
        );
        assert!(status.condition(status::INSTALLING).is_some());
    }

    #[tokio::test]
    async fn test_second_reconcile_writes_nothing_new() {
        let api = MockApi::new();
        let ctx = Arc::new(test_context(&api));
        let ns = ctx.config.namespace.clone();
        api.insert(storage_secret(&ns));
        let mco = insert_mco(&api, &test_mco());

        reconcile_hub(Arc::new(mco.clone()), ctx.clone()).await.unwrap();
        let writes = api.write_count();
        reconcile_hub(Arc::new(mco), ctx.clone()).await.unwrap();

        let new_writes: Vec<String> = api.writes().into_iter().skip(writes).collect();
        assert!(new_writes.is_empty(), "unexpected writes: {new_writes:?}");
    }

    #[tokio::test]
    async fn test_reconcile_stamps_claim_templates() {
        let api = MockApi::new();
        let ctx = Arc::new(test_context(&api));
        let ns = ctx.config.namespace.clone();
        let mut mco = test_mco();
        mco.spec.storage_config.storage_class = "gp3".to_string();
        mco.spec.storage_config.receive_storage_size = "250Gi".to_string();
        let mco = insert_mco(&api, &mco);

        reconcile_hub(Arc::new(mco), ctx).await.unwrap();

        let receive = api
            .get("apps/v1", "statefulsets", Some(&ns), "observability-thanos-receive-default")
            .unwrap();
        let template = &receive["spec"]["volumeClaimTemplates"][0]["spec"];
        assert_eq!(template["resources"]["requests"]["storage"], "250Gi");
        assert_eq!(template["storageClassName"], "gp3");
    }

    #[tokio::test]
    async fn test_reconcile_keeps_hashring_tenants() {
        let api = MockApi::new();
        let ctx = Arc::new(test_context(&api));
        let ns = ctx.config.namespace.clone();
        api.insert(json!({
            "apiVersion": "core.observatorium.io/v1alpha1",
            "kind": "Observatorium",
            "metadata": {
                "name": "observability",
                "namespace": ns,
                "labels": {labels::MANAGED_BY: crate::constants::OPERATOR_NAME},
            },
            "spec": {"hashrings": [{"hashring": "default", "tenants": ["tenant-a"]}]},
        }));
        let mco = insert_mco(&api, &test_mco());

        reconcile_hub(Arc::new(mco), ctx).await.unwrap();

        let live = api
            .get("core.observatorium.io/v1alpha1", "observatoria", Some(&ns), "observability")
            .unwrap();
        assert_eq!(live["spec"]["hashrings"][0]["tenants"], json!(["tenant-a"]));
    }

    #[tokio::test]
    async fn test_reconcile_reports_ready_hub() {
        let api = MockApi::new();
        let ctx = Arc::new(test_context(&api));
        let ns = ctx.config.namespace.clone();
        api.insert(storage_secret(&ns));
        let mco = insert_mco(&api, &test_mco());
        reconcile_hub(Arc::new(mco.clone()), ctx.clone()).await.unwrap();

        // stand-ins for the controllers that would roll the workloads out
        insert_ready_deployments(&api, &ns);
        insert_ready_statefulsets(&api, &ns);
        reconcile_hub(Arc::new(mco), ctx).await.unwrap();

        let status = stored_status(&api);
        assert!(status.condition(status::FAILED).is_none());
        assert_eq!(
            status.condition(status::READY).map(|c| c.status.clone()),
            Some(ConditionStatus::True)
        );
    }

    #[tokio::test]
    async fn test_deletion_cleans_up_and_releases_finalizer() {
        let api = MockApi::new();
        let ctx = Arc::new(test_context(&api));
        let ns = ctx.config.namespace.clone();
        let mco = insert_mco(&api, &test_mco());
        reconcile_hub(Arc::new(mco.clone()), ctx.clone()).await.unwrap();
        assert!(!crate::tests::secret_names(&api, &ns).is_empty());

        // deletion with a finalizer present only marks the object
        let client = api.client();
        let mcos: Api<MultiClusterObservability> = Api::all(client);
        mcos.delete("observability", &Default::default()).await.unwrap();
        assert!(stored_mco(&api).is_some());

        let action = reconcile_hub(Arc::new(mco), ctx.clone()).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert!(stored_mco(&api).is_none());
        assert!(crate::tests::secret_names(&api, &ns).is_empty());
        assert!(api.get("apps/v1", "deployments", Some(&ns), hub::OBSERVATORIUM_API).is_none());
        assert_eq!(ctx.last_observed.get(), None);
    }

    #[tokio::test]
    async fn test_malformed_certificate_is_reported_as_failed() {
        let api = MockApi::new();
        let ctx = Arc::new(test_context(&api));
        let ns = ctx.config.namespace.clone();
        let garbage = crate::tests::to_base64("garbage");
        api.insert(json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {"name": certs::SERVER_CA, "namespace": ns},
            "data": {certs::CA_CRT: garbage, certs::TLS_CRT: garbage, certs::TLS_KEY: garbage},
        }));
        let mco = insert_mco(&api, &test_mco());

        let error = reconcile_hub(Arc::new(mco), ctx.clone()).await.unwrap_err();
        assert!(matches!(&error, Error::Pki { source } if source.is_invalid_material()));
        assert!(!error.is_not_found());

        let status = stored_status(&api);
        let failed = status.condition(status::FAILED).unwrap();
        assert_eq!(failed.reason, "CertificateInvalid");
        assert!(failed.message.contains(certs::SERVER_CA));

        // the broken secret is reported, never overwritten
        let secret = api.get("v1", "secrets", Some(&ns), certs::SERVER_CA).unwrap();
        assert_eq!(secret["data"][certs::TLS_CRT], json!(garbage));
        assert_eq!(secret["data"][certs::TLS_KEY], json!(garbage));
    }

    #[tokio::test]
    async fn test_missing_root_is_not_an_error() {
        let api = MockApi::new();
        let ctx = Arc::new(test_context(&api));
        let action = reconcile_hub(Arc::new(test_mco()), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert_eq!(api.write_count(), 0);
    }
}
