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

//! Synthesizes the two work bundles shipped to every managed cluster.
//!
//! Hub-side inputs are read once per fleet pass into [`HubInputs`]; everything after that
//! is a pure function of those inputs, so unchanged inputs produce identical bundles.

use crate::constants::{certs, hub, labels, templates, work, OPERATOR_NAME};
use crate::context::{self, Context};
use crate::pki::authority::KeyMaterial;
use crate::render;
use crate::types::ocm::manifest_work::ManifestWork;
use crate::types::ocm::placement::ClusterRef;
use crate::types::v1beta1::addon::{ObservabilityAddon, ObservabilityAddonSpec};
use crate::types::v1beta2::k8s::ImagePullPolicy;
use crate::types::v1beta2::observability::MultiClusterObservability;
use allowlist::MetricsAllowlist;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::api::networking::v1::Ingress;
use kube::CustomResourceExt;
use serde_json::Value;
use snafu::{OptionExt, Snafu};
use std::collections::BTreeMap;
use tracing::debug;

pub mod allowlist;
pub mod hub_info;
pub mod operator;
pub mod resource;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("no externally reachable host for the metrics endpoint in {}", namespace))]
    HubEndpointUnavailable { namespace: String },

    #[snafu(display("server CA {}/{} is not available yet", namespace, certs::SERVER_CA))]
    ServerCaMissing { namespace: String },

    #[snafu(display("default allow-list {}/{} is not available yet", namespace, hub::ALLOWLIST))]
    DefaultAllowlistMissing { namespace: String },

    #[snafu(display("failed to encode hub info: {}", source))]
    HubInfo { source: serde_yaml_ng::Error },

    #[snafu(transparent)]
    Allowlist { source: allowlist::Error },

    #[snafu(transparent)]
    Render { source: render::Error },

    #[snafu(transparent)]
    Context { source: context::Error },

    #[snafu(transparent)]
    Serde { source: serde_json::Error },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything read from the hub that goes into a cluster's bundles.
#[derive(Clone, Debug, PartialEq)]
pub struct HubInputs {
    pub hub_namespace: String,
    pub spoke_namespace: String,
    pub local_cluster_name: String,
    pub endpoint_host: String,
    pub alertmanager_host: String,
    pub router_ca: String,
    pub server_ca: String,
    pub pull_secret: Option<Secret>,
    pub image: String,
    pub image_pull_policy: ImagePullPolicy,
    pub addon_spec: ObservabilityAddonSpec,
    pub allowlist: MetricsAllowlist,
    pub operator_templates: Vec<Value>,
    pub resource_templates: Vec<Value>,
    pub addon_crd: Value,
}

/// Both bundles of one cluster.
#[derive(Clone, Debug, PartialEq)]
pub struct Bundles {
    pub operator: ManifestWork,
    pub resource: ManifestWork,
}

pub(crate) fn secret_string(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .and_then(|bytes| String::from_utf8(bytes.0.clone()).ok())
        .filter(|s| !s.is_empty())
}

fn ingress_host(ingress: &Ingress) -> Option<String> {
    let from_rules = ingress
        .spec
        .as_ref()
        .and_then(|spec| spec.rules.as_ref())
        .and_then(|rules| rules.iter().find_map(|rule| rule.host.clone()));

    from_rules.filter(|h| !h.is_empty()).or_else(|| {
        ingress
            .status
            .as_ref()
            .and_then(|s| s.load_balancer.as_ref())
            .and_then(|lb| lb.ingress.as_ref())
            .and_then(|entries| entries.first())
            .and_then(|entry| entry.hostname.clone().or_else(|| entry.ip.clone()))
    })
}

pub(crate) async fn external_host(
    ctx: &Context,
    configured: Option<&str>,
    ingress_name: &str,
) -> Result<Option<String>> {
    if let Some(host) = configured.filter(|h| !h.is_empty()) {
        return Ok(Some(host.to_string()));
    }
    let ingress = ctx
        .get_opt::<Ingress>(ingress_name, &ctx.config.namespace)
        .await?;
    Ok(ingress.as_ref().and_then(ingress_host))
}

pub(crate) async fn read_allowlist(ctx: &Context, namespace: &str) -> Result<MetricsAllowlist> {
    let text_of = |cm: &ConfigMap| {
        cm.data
            .as_ref()
            .and_then(|data| data.get(hub::ALLOWLIST_KEY))
            .cloned()
            .unwrap_or_default()
    };

    let default = ctx
        .get_opt::<ConfigMap>(hub::ALLOWLIST, namespace)
        .await?
        .context(DefaultAllowlistMissingSnafu { namespace })?;
    let default = MetricsAllowlist::parse(hub::ALLOWLIST, &text_of(&default))?;

    match ctx
        .get_opt::<ConfigMap>(hub::CUSTOM_ALLOWLIST, namespace)
        .await?
    {
        Some(custom) => {
            let custom = MetricsAllowlist::parse(hub::CUSTOM_ALLOWLIST, &text_of(&custom))?;
            Ok(default.merge(&custom))
        }
        None => Ok(default),
    }
}

pub(crate) fn spoke_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(labels::MANAGED_BY.to_string(), OPERATOR_NAME.to_string())])
}

impl HubInputs {
    pub async fn collect(ctx: &Context, mco: &MultiClusterObservability) -> Result<Self> {
        let config = &ctx.config;
        let namespace = config.namespace.as_str();

        let endpoint_host = external_host(ctx, config.hub_endpoint.as_deref(), hub::OBSERVATORIUM_INGRESS)
            .await?
            .context(HubEndpointUnavailableSnafu { namespace })?;
        let alertmanager_host = external_host(
            ctx,
            config.alertmanager_endpoint.as_deref(),
            hub::ALERTMANAGER_INGRESS,
        )
        .await?
        .unwrap_or_default();

        let server_ca = ctx
            .get_opt::<Secret>(certs::SERVER_CA, namespace)
            .await?
            .as_ref()
            .and_then(|s| secret_string(s, certs::CA_CRT))
            .context(ServerCaMissingSnafu { namespace })?;

        let router_ca = match ctx
            .get_opt::<Secret>(&config.router_ca_secret, &config.router_ca_namespace)
            .await?
            .as_ref()
            .and_then(|s| secret_string(s, certs::TLS_CRT))
        {
            Some(ca) => ca,
            None => {
                debug!("router CA not found, falling back to the server CA");
                server_ca.clone()
            }
        };

        let pull_secret = ctx
            .get_opt::<Secret>(mco.image_pull_secret(), namespace)
            .await?;

        let labels = spoke_labels();
        let to_values = |objects: Vec<kube::api::DynamicObject>| -> Result<Vec<Value>> {
            objects
                .iter()
                .map(|o| serde_json::to_value(o).map_err(Error::from))
                .collect()
        };
        let operator_templates = to_values(ctx.renderer.render(
            templates::ENDPOINT_OPERATOR,
            &config.spoke_namespace,
            &labels,
        )?)?;
        let resource_templates = to_values(ctx.renderer.render(
            templates::ENDPOINT_RESOURCES,
            &config.spoke_namespace,
            &labels,
        )?)?;

        Ok(Self {
            hub_namespace: namespace.to_string(),
            spoke_namespace: config.spoke_namespace.clone(),
            local_cluster_name: config.local_cluster_name.clone(),
            endpoint_host,
            alertmanager_host,
            router_ca,
            server_ca,
            pull_secret,
            image: config.endpoint_operator_image.clone(),
            image_pull_policy: mco.image_pull_policy(),
            addon_spec: mco.spec.observability_addon_spec.clone(),
            allowlist: read_allowlist(ctx, namespace).await?,
            operator_templates,
            resource_templates,
            addon_crd: serde_json::to_value(ObservabilityAddon::crd())?,
        })
    }
}

/// Builds both bundles of `cluster`. `marker` is the hub-side marker, if it still exists.
pub fn synthesize(
    cluster: &ClusterRef,
    inputs: &HubInputs,
    client_cert: &KeyMaterial,
    marker: Option<&ObservabilityAddon>,
) -> Result<Bundles> {
    let namespace = cluster.cluster_namespace.as_str();
    Ok(Bundles {
        operator: ManifestWork::new_bundle(
            &work::operator_bundle_name(namespace),
            namespace,
            operator::manifests(cluster, inputs, client_cert)?,
        ),
        resource: ManifestWork::new_bundle(
            &work::resource_bundle_name(namespace),
            namespace,
            resource::manifests(cluster, inputs, marker)?,
        ),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::render::{DirRenderer, Renderer};
    use crate::tests::{allowlist_config_map, test_context, test_mco, MockApi, HUB_HOST};
    use kube::ResourceExt;

    pub(crate) fn client_cert() -> KeyMaterial {
        KeyMaterial {
            ca_crt: "CLIENT-CA".to_string(),
            tls_crt: "CLIENT-CRT".to_string(),
            tls_key: "CLIENT-KEY".to_string(),
        }
    }

    pub(crate) fn inputs() -> HubInputs {
        let renderer = DirRenderer::new(concat!(env!("CARGO_MANIFEST_DIR"), "/manifests"));
        let render = |set: &str| -> Vec<Value> {
            renderer
                .render(set, "spoke-ns", &spoke_labels())
                .unwrap()
                .iter()
                .map(|o| serde_json::to_value(o).unwrap())
                .collect()
        };
        HubInputs {
            hub_namespace: "hub-ns".to_string(),
            spoke_namespace: "spoke-ns".to_string(),
            local_cluster_name: "local-cluster".to_string(),
            endpoint_host: HUB_HOST.to_string(),
            alertmanager_host: String::new(),
            router_ca: "ROUTER-CA".to_string(),
            server_ca: "SERVER-CA".to_string(),
            pull_secret: None,
            image: "quay.io/stolostron/endpoint-monitoring-operator:test".to_string(),
            image_pull_policy: ImagePullPolicy::Always,
            addon_spec: ObservabilityAddonSpec::default(),
            allowlist: MetricsAllowlist::parse("default", "names: [up]").unwrap(),
            operator_templates: render(templates::ENDPOINT_OPERATOR),
            resource_templates: render(templates::ENDPOINT_RESOURCES),
            addon_crd: serde_json::to_value(ObservabilityAddon::crd()).unwrap(),
        }
    }

    #[test]
    fn test_synthesize_is_deterministic() {
        let inputs = inputs();
        let cluster = ClusterRef::new("cluster-a");
        let marker = ObservabilityAddon::new_marker("cluster-a", inputs.addon_spec.clone());

        let first = synthesize(&cluster, &inputs, &client_cert(), Some(&marker)).unwrap();
        let second = synthesize(&cluster, &inputs, &client_cert(), Some(&marker)).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(first.operator.manifests()).unwrap(),
            serde_json::to_vec(second.operator.manifests()).unwrap()
        );
    }

    #[test]
    fn test_synthesize_names_and_labels_bundles() {
        let bundles = synthesize(&ClusterRef::new("cluster-a"), &inputs(), &client_cert(), None).unwrap();

        assert_eq!(bundles.operator.name_any(), "cluster-a-observability-operator");
        assert_eq!(bundles.resource.name_any(), "cluster-a-observability-operator-res");
        assert_eq!(bundles.operator.namespace().as_deref(), Some("cluster-a"));
        assert_eq!(
            bundles.resource.labels().get(labels::MANAGED_BY).map(String::as_str),
            Some(OPERATOR_NAME)
        );
        assert_eq!(
            bundles.resource.labels().get(labels::CLUSTER).map(String::as_str),
            Some("cluster-a")
        );
    }

    #[tokio::test]
    async fn test_collect_reads_hub_state() {
        let api = MockApi::new();
        let ctx = test_context(&api);
        let ns = ctx.config.namespace.clone();
        api.insert(allowlist_config_map(hub::ALLOWLIST, &ns, "names: [a, b]\n"));
        api.insert(allowlist_config_map(hub::CUSTOM_ALLOWLIST, &ns, "names: [c, -b]\n"));

        let mco = test_mco();
        assert!(matches!(
            HubInputs::collect(&ctx, &mco).await,
            Err(Error::ServerCaMissing { .. })
        ));

        crate::pki::ensure_hub_pki(&ctx, Some(HUB_HOST)).await.unwrap();
        let inputs = HubInputs::collect(&ctx, &mco).await.unwrap();

        assert_eq!(inputs.endpoint_host, HUB_HOST);
        assert_eq!(inputs.allowlist.names, vec!["a".to_string(), "c".to_string()]);
        assert!(inputs.server_ca.starts_with("-----BEGIN CERTIFICATE-----"));
        assert_eq!(inputs.router_ca, inputs.server_ca);
        assert!(inputs.pull_secret.is_none());
        assert!(!inputs.operator_templates.is_empty());
    }

    #[tokio::test]
    async fn test_collect_reads_endpoint_from_ingress() {
        let api = MockApi::new();
        let mut ctx = test_context(&api);
        ctx.config.hub_endpoint = None;
        let ns = ctx.config.namespace.clone();
        api.insert(serde_json::json!({
            "apiVersion": "networking.k8s.io/v1",
            "kind": "Ingress",
            "metadata": {"name": hub::OBSERVATORIUM_INGRESS, "namespace": ns},
            "spec": {"rules": [{"host": "api.hub.example.com"}]},
        }));
        api.insert(allowlist_config_map(hub::ALLOWLIST, &ns, "names: [a]\n"));
        crate::pki::ensure_hub_pki(&ctx, None).await.unwrap();

        let inputs = HubInputs::collect(&ctx, &test_mco()).await.unwrap();
        assert_eq!(inputs.endpoint_host, "api.hub.example.com");
    }

    #[tokio::test]
    async fn test_collect_fails_without_endpoint() {
        let api = MockApi::new();
        let mut ctx = test_context(&api);
        ctx.config.hub_endpoint = None;

        assert!(matches!(
            HubInputs::collect(&ctx, &test_mco()).await,
            Err(Error::HubEndpointUnavailable { .. })
        ));
    }
}
