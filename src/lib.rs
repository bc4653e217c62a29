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

#![allow(clippy::single_match)]

use crate::constants::{certs, hub, labels, templates, OPERATOR_NAME};
use crate::context::Context;
use crate::error_policy::error_policy;
use crate::predicates::{LastObservedName, WatchFilter};
use crate::probe::Readiness;
use crate::reconcile::fleet::{reconcile_fleet, sweep_orphans};
use crate::reconcile::reconcile_hub;
use crate::render::DirRenderer;
use crate::types::ocm::manifest_work::ManifestWork;
use crate::types::ocm::placement as ocm_placement;
use crate::types::v1beta1::addon::ObservabilityAddon;
use crate::types::v1beta2::observability::MultiClusterObservability;
use futures::StreamExt;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::{Controller, watcher};
use kube::{Api, Client, CustomResourceExt, Resource};
use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub mod bundle;
pub mod config;
pub mod constants;
mod context;
pub mod error_policy;
pub mod pki;
pub mod placement;
pub mod predicates;
pub mod probe;
pub mod reconcile;
pub mod render;
pub mod status;
pub mod sync;
pub mod types;
pub mod utils;
pub mod work;

#[cfg(test)]
mod tests;

shadow_rs::shadow!(build);

pub use config::OperatorConfig;

/// Kinds the bundle synthesizer adds on top of the rendered template sets.
const SYNTHESIZED_KINDS: [&str; 5] = [
    "Namespace",
    "Secret",
    "ConfigMap",
    "ObservabilityAddon",
    "CustomResourceDefinition",
];

/// Fails unless every kind the operator can write has a sync strategy.
fn check_registry(ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let config = &ctx.config;
    let mut kinds: Vec<String> = SYNTHESIZED_KINDS.iter().map(|k| k.to_string()).collect();
    for (set, namespace) in [
        (templates::HUB, &config.namespace),
        (templates::ENDPOINT_OPERATOR, &config.spoke_namespace),
        (templates::ENDPOINT_RESOURCES, &config.spoke_namespace),
    ] {
        for object in ctx.renderer.render(set, namespace, &BTreeMap::new())? {
            kinds.push(sync::kind_of(&object).to_string());
        }
    }
    sync::ensure_registered(&ctx.registry, kinds.iter().map(String::as_str))?;
    Ok(())
}

/// Routes a watched object to the root last seen by the hub controller.
fn to_root<K: Resource + 'static>(
    observed: LastObservedName,
    filter: WatchFilter,
) -> impl Fn(K) -> Option<ObjectRef<MultiClusterObservability>> + Send + Sync + 'static {
    move |object| observed.root_ref_for(&filter, &object)
}

pub async fn run(config: OperatorConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_level(true)
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .init();

    info!(
        "starting {} {} ({})",
        OPERATOR_NAME,
        build::PKG_VERSION,
        build::SHORT_COMMIT
    );

    let client = Client::try_default().await?;
    let renderer = Arc::new(DirRenderer::new(&config.template_dir));
    let ctx = Arc::new(Context::new(client.clone(), config.clone(), renderer));
    check_registry(&ctx)?;

    if let Err(error) = sweep_orphans(&ctx).await {
        warn!("orphan sweep failed: {}", error);
    }

    let readiness = Readiness::default();
    let probe = tokio::spawn(probe::run(config.probe_port, readiness.clone()));

    let ns = config.namespace.as_str();
    let mcos = Api::<MultiClusterObservability>::all(client.clone());
    let observed = ctx.last_observed.clone();

    let managed = WatchFilter::in_namespace(ns).labelled(labels::MANAGED_BY, OPERATOR_NAME);
    let hub_secrets = WatchFilter::in_namespace(ns).named([
        certs::SERVER_CA,
        certs::SERVER_CERT,
        certs::CLIENT_CA,
        certs::GRAFANA_CERT,
    ]);
    let storage_secrets = WatchFilter::in_namespace(ns);
    let allowlists = WatchFilter::in_namespace(ns).named([hub::ALLOWLIST, hub::CUSTOM_ALLOWLIST]);

    let hub_controller = Controller::new(mcos.clone(), watcher::Config::default())
        .watches(
            Api::<appsv1::Deployment>::namespaced(client.clone(), ns),
            managed.watcher_config(),
            to_root(observed.clone(), managed.clone()),
        )
        .watches(
            Api::<appsv1::StatefulSet>::namespaced(client.clone(), ns),
            managed.watcher_config(),
            to_root(observed.clone(), managed.clone()),
        )
        .watches(
            Api::<corev1::Secret>::namespaced(client.clone(), ns),
            storage_secrets.watcher_config(),
            to_root(observed.clone(), storage_secrets),
        )
        .watches(
            Api::<corev1::ConfigMap>::namespaced(client.clone(), ns),
            allowlists.watcher_config(),
            to_root(observed.clone(), allowlists.clone()),
        )
        .shutdown_on_signal()
        .run(reconcile_hub, error_policy, ctx.clone())
        .for_each(|res| async move {
            match res {
                Ok((mco, _)) => info!("hub reconciled, object {:?}", mco.name),
                Err(e) => warn!("hub reconcile failed: {}", e),
            }
        });

    let owned = WatchFilter::default().labelled(labels::MANAGED_BY, OPERATOR_NAME);
    let decisions = WatchFilter::in_namespace(ns).labelled(labels::PLACEMENT, labels::PLACEMENT_NAME);

    let fleet_controller = Controller::new(mcos, watcher::Config::default())
        .watches_with(
            ctx.dynamic_api(&ocm_placement::api_resource(), Some(ns)),
            ocm_placement::api_resource(),
            decisions.watcher_config(),
            to_root(observed.clone(), decisions),
        )
        .watches(
            Api::<ObservabilityAddon>::all(client.clone()),
            owned.watcher_config(),
            to_root(observed.clone(), owned.clone()),
        )
        .watches(
            Api::<ManifestWork>::all(client.clone()),
            owned.watcher_config(),
            to_root(observed.clone(), owned),
        )
        .watches(
            Api::<corev1::Secret>::namespaced(client.clone(), ns),
            hub_secrets.watcher_config(),
            to_root(observed.clone(), hub_secrets),
        )
        .watches(
            Api::<corev1::ConfigMap>::namespaced(client.clone(), ns),
            allowlists.watcher_config(),
            to_root(observed, allowlists),
        )
        .shutdown_on_signal()
        .run(reconcile_fleet, error_policy, ctx.clone())
        .for_each(|res| async move {
            match res {
                Ok((mco, _)) => info!("fleet reconciled, object {:?}", mco.name),
                Err(e) => warn!("fleet reconcile failed: {}", e),
            }
        });

    readiness.set_ready();
    futures::future::join(hub_controller, fleet_controller).await;
    probe.abort();

    Ok(())
}

pub async fn crd(file: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer: Pin<Box<dyn AsyncWrite + Send>> = if let Some(file) = file {
        Box::pin(
            tokio::fs::OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(file)
                .await?,
        )
    } else {
        Box::pin(tokio::io::stdout())
    };

    let documents = [
        serde_yaml_ng::to_string(&MultiClusterObservability::crd())?,
        serde_yaml_ng::to_string(&ObservabilityAddon::crd())?,
    ];
    writer
        .write_all(documents.join("---\n").as_bytes())
        .await?;
    writer.flush().await?;

    Ok(())
}
