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

//! The operator bundle: everything the endpoint operator needs to start on a managed cluster.

use super::hub_info::HubInfo;
use super::{HubInfoSnafu, HubInputs, Result};
use crate::constants::{certs, hub, spoke};
use crate::pki::authority::KeyMaterial;
use crate::types::ocm::placement::ClusterRef;
use k8s_openapi::ByteString;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, EnvVar, LocalObjectReference, Namespace, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::Value;
use snafu::ResultExt;
use std::collections::BTreeMap;

fn meta(name: &str, namespace: Option<&str>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        ..Default::default()
    }
}

fn secret(name: &str, namespace: &str, type_: Option<&str>, data: &[(&str, &str)]) -> Secret {
    Secret {
        metadata: meta(name, Some(namespace)),
        type_: type_.map(str::to_string),
        data: Some(
            data.iter()
                .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                .collect(),
        ),
        ..Default::default()
    }
}

/// The hub pull secret, stripped of server fields and moved to `namespace`.
fn pull_secret_copy(source: &Secret, namespace: &str) -> Secret {
    Secret {
        metadata: meta(
            source.metadata.name.as_deref().unwrap_or(hub::DEFAULT_PULL_SECRET),
            Some(namespace),
        ),
        type_: source.type_.clone(),
        data: source.data.clone(),
        ..Default::default()
    }
}

/// Points the endpoint operator Deployment at the configured image, pull settings and
/// the cluster's hub namespace.
fn customize_operator(object: &Value, cluster_namespace: &str, inputs: &HubInputs) -> Result<Value> {
    let mut deployment: Deployment = serde_json::from_value(object.clone())?;

    if let Some(pod) = deployment
        .spec
        .as_mut()
        .and_then(|spec| spec.template.spec.as_mut())
    {
        if let Some(name) = inputs
            .pull_secret
            .as_ref()
            .and_then(|s| s.metadata.name.clone())
        {
            pod.image_pull_secrets = Some(vec![LocalObjectReference { name }]);
        }

        for container in pod
            .containers
            .iter_mut()
            .filter(|c| c.name == spoke::OPERATOR_DEPLOYMENT)
        {
            container.image = Some(inputs.image.clone());
            container.image_pull_policy = Some(inputs.image_pull_policy.to_string());

            let env = container.env.get_or_insert_with(Vec::new);
            env.retain(|e| e.name != spoke::HUB_NAMESPACE_ENV);
            env.push(EnvVar {
                name: spoke::HUB_NAMESPACE_ENV.to_string(),
                value: Some(cluster_namespace.to_string()),
                ..Default::default()
            });
        }
    }

    Ok(serde_json::to_value(deployment)?)
}

fn is_operator_deployment(object: &Value) -> bool {
    object["kind"] == "Deployment" && object["metadata"]["name"] == spoke::OPERATOR_DEPLOYMENT
}

pub fn manifests(
    cluster: &ClusterRef,
    inputs: &HubInputs,
    client_cert: &KeyMaterial,
) -> Result<Vec<Value>> {
    let ns = inputs.spoke_namespace.as_str();
    let mut manifests = vec![serde_json::to_value(Namespace {
        metadata: meta(ns, None),
        ..Default::default()
    })?];

    if let Some(source) = &inputs.pull_secret {
        manifests.push(serde_json::to_value(pull_secret_copy(source, ns))?);
    }

    manifests.push(serde_json::to_value(secret(
        spoke::TRUST_BUNDLE,
        ns,
        None,
        &[(certs::CA_CRT, inputs.server_ca.as_str())],
    ))?);
    manifests.push(serde_json::to_value(secret(
        spoke::CLIENT_CERT,
        ns,
        Some("kubernetes.io/tls"),
        &[
            (certs::CA_CRT, client_cert.ca_crt.as_str()),
            (certs::TLS_CRT, client_cert.tls_crt.as_str()),
            (certs::TLS_KEY, client_cert.tls_key.as_str()),
        ],
    ))?);

    manifests.push(serde_json::to_value(ConfigMap {
        metadata: meta(hub::ALLOWLIST, Some(ns)),
        data: Some(BTreeMap::from([(
            hub::ALLOWLIST_KEY.to_string(),
            inputs.allowlist.to_yaml()?,
        )])),
        ..Default::default()
    })?);

    let hub_info = HubInfo::new(
        &cluster.cluster_name,
        &inputs.endpoint_host,
        &inputs.alertmanager_host,
        &inputs.router_ca,
    )
    .to_yaml()
    .context(HubInfoSnafu)?;
    manifests.push(serde_json::to_value(secret(
        spoke::HUB_INFO,
        ns,
        None,
        &[(spoke::HUB_INFO_KEY, hub_info.as_str())],
    ))?);

    for object in &inputs.operator_templates {
        if is_operator_deployment(object) {
            manifests.push(customize_operator(object, &cluster.cluster_namespace, inputs)?);
        } else {
            manifests.push(object.clone());
        }
    }

    Ok(manifests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::tests::{client_cert, inputs};

    fn find<'a>(manifests: &'a [Value], kind: &str, name: &str) -> &'a Value {
        manifests
            .iter()
            .find(|m| m["kind"] == kind && m["metadata"]["name"] == name)
            .unwrap_or_else(|| panic!("{kind} {name} missing"))
    }

    fn decoded(secret: &Value, key: &str) -> String {
        let secret: Secret = serde_json::from_value(secret.clone()).unwrap();
        String::from_utf8(secret.data.unwrap()[key].0.clone()).unwrap()
    }

    #[test]
    fn test_operator_bundle_order_and_contents() {
        let manifests = manifests(&ClusterRef::new("cluster-a"), &inputs(), &client_cert()).unwrap();

        assert_eq!(manifests[0]["kind"], "Namespace");
        assert_eq!(manifests[0]["metadata"]["name"], "spoke-ns");

        let trust = find(&manifests, "Secret", spoke::TRUST_BUNDLE);
        assert_eq!(decoded(trust, certs::CA_CRT), "SERVER-CA");
        assert_eq!(trust["data"].as_object().unwrap().len(), 1);

        let client = find(&manifests, "Secret", spoke::CLIENT_CERT);
        assert_eq!(decoded(client, certs::TLS_CRT), "CLIENT-CRT");
        assert_eq!(client["type"], "kubernetes.io/tls");

        let info: HubInfo =
            serde_yaml_ng::from_str(&decoded(find(&manifests, "Secret", spoke::HUB_INFO), spoke::HUB_INFO_KEY))
                .unwrap();
        assert_eq!(info.cluster_name, "cluster-a");
        assert!(info.endpoint.ends_with(hub::RECEIVE_PATH));
        assert_eq!(info.hub_router_ca, "ROUTER-CA");

        let allowlist = find(&manifests, "ConfigMap", hub::ALLOWLIST);
        assert!(allowlist["data"][hub::ALLOWLIST_KEY].as_str().unwrap().contains("up"));
    }

    #[test]
    fn test_operator_deployment_is_customized() {
        let mut inputs = inputs();
        inputs.pull_secret = Some(secret(
            "multiclusterhub-operator-pull-secret",
            "hub-ns",
            Some("kubernetes.io/dockerconfigjson"),
            &[(".dockerconfigjson", "{}")],
        ));
        let manifests = manifests(&ClusterRef::new("cluster-a"), &inputs, &client_cert()).unwrap();

        let pull = find(&manifests, "Secret", "multiclusterhub-operator-pull-secret");
        assert_eq!(pull["metadata"]["namespace"], "spoke-ns");

        let deployment: Deployment =
            serde_json::from_value(find(&manifests, "Deployment", spoke::OPERATOR_DEPLOYMENT).clone())
                .unwrap();
        let pod = deployment.spec.unwrap().template.spec.unwrap();
        assert_eq!(
            pod.image_pull_secrets.unwrap()[0].name,
            "multiclusterhub-operator-pull-secret"
        );

        let container = &pod.containers[0];
        assert_eq!(container.image.as_deref(), Some(inputs.image.as_str()));
        assert_eq!(container.image_pull_policy.as_deref(), Some("Always"));
        let hub_ns: Vec<_> = container
            .env
            .as_ref()
            .unwrap()
            .iter()
            .filter(|e| e.name == spoke::HUB_NAMESPACE_ENV)
            .collect();
        assert_eq!(hub_ns.len(), 1);
        assert_eq!(hub_ns[0].value.as_deref(), Some("cluster-a"));
    }
}
