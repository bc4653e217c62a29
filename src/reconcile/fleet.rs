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

//! Fleet controller: a marker, a client certificate, a RoleBinding and two work bundles
//! for every placed cluster, and their removal once the cluster leaves.

use super::{Error, FleetSnafu, add_finalizer, publish, remove_finalizer};
use crate::bundle::{self, HubInputs};
use crate::constants::{GROUP, certs, finalizers, hub, labels, spoke};
use crate::context::Context;
use crate::placement::{self, Resolution};
use crate::status;
use crate::types::ocm::manifest_work::ManifestWork;
use crate::types::ocm::placement::ClusterRef;
use crate::types::v1beta1::addon::{ObservabilityAddon, ObservabilityAddonSpec};
use crate::types::v1beta2::observability::MultiClusterObservability;
use crate::{pki, sync, work};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::rbac::v1::{ClusterRole, PolicyRule, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::Api;
use kube::runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const RBAC_GROUP: &str = "rbac.authorization.k8s.io";

/// Requeue delay while cluster bundles are still terminating during root deletion.
const TEARDOWN_REQUEUE: Duration = Duration::from_secs(5);

/// The hub-side role the spoke agents use to report on their marker.
pub fn res_cluster_role() -> ClusterRole {
    let verbs = ["get", "list", "watch", "update", "patch"];
    ClusterRole {
        metadata: ObjectMeta {
            name: Some(hub::RES_CLUSTER_ROLE.to_string()),
            labels: Some(pki::managed_labels()),
            ..Default::default()
        },
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec![GROUP.to_string()]),
            resources: Some(vec![
                "observabilityaddons".to_string(),
                "observabilityaddons/status".to_string(),
            ]),
            verbs: verbs.iter().map(|v| v.to_string()).collect(),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

/// Grants the cluster's addon agent group the hub-side role within its own namespace.
pub fn res_role_binding(cluster: &ClusterRef) -> RoleBinding {
    let mut labels = pki::managed_labels();
    labels.insert(labels::CLUSTER.to_string(), cluster.cluster_name.clone());

    RoleBinding {
        metadata: ObjectMeta {
            name: Some(hub::RES_ROLE_BINDING.to_string()),
            namespace: Some(cluster.cluster_namespace.clone()),
            labels: Some(labels),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: RBAC_GROUP.to_string(),
            kind: "ClusterRole".to_string(),
            name: hub::RES_CLUSTER_ROLE.to_string(),
        },
        subjects: Some(vec![Subject {
            api_group: Some(RBAC_GROUP.to_string()),
            kind: "Group".to_string(),
            name: format!(
                "system:open-cluster-management:cluster:{}:addon:observability-controller",
                cluster.cluster_name
            ),
            namespace: None,
        }]),
    }
}

/// Keeps the marker's spec in line with the root. A marker already being deleted is
/// left alone and returned as is.
async fn sync_marker(
    ctx: &Context,
    cluster: &ClusterRef,
    spec: &ObservabilityAddonSpec,
) -> Result<Option<ObservabilityAddon>, Error> {
    let namespace = cluster.cluster_namespace.as_str();
    let live = ctx
        .get_opt::<ObservabilityAddon>(spoke::ADDON_NAME, namespace)
        .await?;
    if let Some(live) = live.filter(ObservabilityAddon::is_deleting) {
        debug!("marker in {} is being deleted, skip sync", namespace);
        return Ok(Some(live));
    }

    let desired = ObservabilityAddon::new_marker(namespace, spec.clone());
    sync::sync_object(ctx, &sync::to_dynamic(&desired)?).await?;
    Ok(ctx
        .get_opt::<ObservabilityAddon>(spoke::ADDON_NAME, namespace)
        .await?)
}

/// Brings one cluster to its desired state.
async fn provision(ctx: &Context, cluster: &ClusterRef, inputs: &HubInputs) -> Result<(), Error> {
    let namespace = cluster.cluster_namespace.as_str();

    pki::ensure_cluster_cert(ctx, cluster).await?;
    let secret = ctx
        .get::<Secret>(certs::CLUSTER_CLIENT_CERT, namespace)
        .await?;
    let client_cert = pki::key_material(&secret)?;

    sync::sync_object(ctx, &sync::to_dynamic(&res_role_binding(cluster))?).await?;
    let marker = sync_marker(ctx, cluster, &inputs.addon_spec).await?;

    let bundles = bundle::synthesize(cluster, inputs, &client_cert, marker.as_ref())?;
    work::apply(ctx, &bundles.operator).await?;
    work::apply(ctx, &bundles.resource).await?;
    Ok(())
}

/// Removes everything a cluster namespace holds for the fleet.
///
/// The marker's finalizer is normally released by the spoke agent. Once the cluster's
/// bundles are gone nothing on the spoke side will do that, so it is released here.
async fn deprovision(ctx: &Context, namespace: &str) -> Result<(), Error> {
    ctx.delete::<ObservabilityAddon>(spoke::ADDON_NAME, namespace)
        .await?;
    work::delete_cluster_bundles(ctx, namespace).await?;

    let selector = labels::managed_selector();
    let remaining: Vec<ManifestWork> = ctx.list(namespace, Some(&selector)).await?;
    if let Some(marker) = ctx
        .get_opt::<ObservabilityAddon>(spoke::ADDON_NAME, namespace)
        .await?
    {
        if remaining.is_empty() {
            let api: Api<ObservabilityAddon> = Api::namespaced(ctx.client.clone(), namespace);
            remove_finalizer(&api, &marker, finalizers::ADDON_CLEANUP).await?;
        } else {
            debug!(
                "{} bundle(s) in {} still terminating, keeping the marker finalizer",
                remaining.len(),
                namespace
            );
        }
    }

    ctx.delete::<Secret>(certs::CLUSTER_CLIENT_CERT, namespace)
        .await?;
    sync::delete_object(ctx, "RoleBinding", hub::RES_ROLE_BINDING, Some(namespace)).await?;
    Ok(())
}

/// The global role plus everything read from the hub for synthesis. An unusable
/// allow-list also refreshes the root's status, where it shows as a failed condition.
async fn hub_inputs(ctx: &Context, root: &MultiClusterObservability) -> Result<HubInputs, Error> {
    sync::sync_object(ctx, &sync::to_dynamic(&res_cluster_role())?).await?;
    match HubInputs::collect(ctx, root).await {
        Ok(inputs) => Ok(inputs),
        Err(error @ bundle::Error::Allowlist { .. }) => {
            if let Err(status_error) = status::update(ctx, root).await {
                warn!("failed to refresh status: {}", status_error);
            }
            Err(error.into())
        }
        Err(error) => Err(error.into()),
    }
}

async fn provision_all(
    ctx: &Context,
    root: &MultiClusterObservability,
    plan: &Resolution,
    inputs: &HubInputs,
    failures: &mut Vec<String>,
) {
    for cluster in &plan.desired {
        if let Err(error) = provision(ctx, cluster, inputs).await {
            warn!(cluster = %cluster.cluster_name, "failed to provision: {}", error);
            failures.push(format!("{}: {}", cluster.cluster_name, error));
            continue;
        }
        if plan.to_add.contains(cluster) {
            info!("cluster {} joined the fleet", cluster.cluster_name);
            let message = format!("cluster {} joined the fleet", cluster.cluster_name);
            publish(ctx, root, "ClusterJoined", &message).await;
        }
    }
}

/// Whether anything the fleet created for a cluster still exists.
async fn teardown_pending(ctx: &Context) -> Result<bool, Error> {
    Ok(!placement::owned_bundles(ctx).await?.is_empty()
        || !placement::current_markers(ctx).await?.is_empty())
}

/// One fleet pass. Without a root every cluster is torn down, and the global role goes
/// once no bundle is left anywhere.
///
/// A failing cluster does not stop the others; the failures are returned together.
pub async fn run_fleet(
    ctx: &Context,
    root: Option<&MultiClusterObservability>,
) -> Result<Resolution, Error> {
    let decisions = placement::desired_clusters(ctx).await?;
    let markers = placement::current_markers(ctx).await?;
    let bundles = placement::owned_bundles(ctx).await?;
    let plan = placement::plan(&decisions, &markers, &bundles, root.is_some());
    debug!(
        "fleet plan: {} desired, {} to add, {} to remove, {} invalid bundle(s)",
        plan.desired.len(),
        plan.to_add.len(),
        plan.to_remove.len(),
        plan.invalid_bundles.len()
    );

    let mut failures = Vec::new();

    for (namespace, name) in &plan.invalid_bundles {
        info!("deleting unexpected work bundle {}/{}", namespace, name);
        if let Err(error) = work::delete_bundle(ctx, namespace, name).await {
            warn!(cluster = %namespace, "failed to delete bundle {}: {}", name, error);
            failures.push(format!("{namespace}: {error}"));
        }
    }

    if let Some(root) = root.filter(|_| !plan.desired.is_empty()) {
        match hub_inputs(ctx, root).await {
            Ok(inputs) => provision_all(ctx, root, &plan, &inputs, &mut failures).await,
            Err(error) => {
                warn!("cannot provision clusters: {}", error);
                failures.push(format!("hub: {error}"));
            }
        }
    }

    for namespace in &plan.to_remove {
        if let Err(error) = deprovision(ctx, namespace).await {
            warn!(cluster = %namespace, "failed to remove: {}", error);
            failures.push(format!("{namespace}: {error}"));
            continue;
        }
        info!("cluster {} left the fleet", namespace);
        if let Some(root) = root {
            let message = format!("cluster {namespace} left the fleet");
            publish(ctx, root, "ClusterLeft", &message).await;
        }
    }

    if root.is_none() && placement::owned_bundles(ctx).await?.is_empty() {
        sync::delete_object(ctx, "ClusterRole", hub::RES_CLUSTER_ROLE, None).await?;
    }

    if failures.is_empty() {
        Ok(plan)
    } else {
        FleetSnafu { failures }.fail()
    }
}

#[instrument(skip_all, fields(name = %mco.name()))]
pub async fn reconcile_fleet(mco: Arc<MultiClusterObservability>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = mco.name();
    let api: Api<MultiClusterObservability> = Api::all(ctx.client.clone());

    match ctx.get_cluster_opt::<MultiClusterObservability>(&name).await? {
        None => {
            run_fleet(&ctx, None).await?;
            Ok(Action::await_change())
        }
        Some(latest) if latest.is_deleting() => {
            info!("{} is being deleted, tearing the fleet down", name);
            run_fleet(&ctx, None).await?;
            if teardown_pending(&ctx).await? {
                info!("cluster bundles still terminating, keeping {}", finalizers::FLEET_CLEANUP);
                return Ok(Action::requeue(TEARDOWN_REQUEUE));
            }
            remove_finalizer(&api, &latest, finalizers::FLEET_CLEANUP).await?;
            Ok(Action::await_change())
        }
        Some(latest) => {
            let latest = add_finalizer(&api, latest, finalizers::FLEET_CLEANUP).await?;
            run_fleet(&ctx, Some(&latest)).await?;
            Ok(Action::requeue(ctx.config.resync_interval()))
        }
    }
}

/// Tears down what a previous run left behind when no root exists at startup.
pub async fn sweep_orphans(ctx: &Context) -> Result<(), Error> {
    let roots = ctx.list_all::<MultiClusterObservability>(None).await?;
    if !roots.is_empty() {
        return Ok(());
    }
    let plan = run_fleet(ctx, None).await?;
    if !plan.to_remove.is_empty() {
        info!("removed {} orphaned cluster(s)", plan.to_remove.len());
    }
    Ok(())
}
