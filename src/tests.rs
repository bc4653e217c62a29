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


pub use mock_api::MockApi;

use crate::config::OperatorConfig;
use crate::constants::{certs, hub, labels, OPERATOR_NAME};
use crate::context::Context;
use crate::render::DirRenderer;
use crate::types::v1beta2::observability::{
    MultiClusterObservability, MultiClusterObservabilitySpec, PreConfiguredStorage,
};
use serde_json::{Value, json};
use std::sync::Arc;

pub const HUB_HOST: &str = "observatorium-api.apps.hub.example.com";
pub const STORAGE_SECRET: &str = "thanos-object-storage";
pub const STORAGE_KEY: &str = "thanos.yaml";

pub fn test_config() -> OperatorConfig {
    OperatorConfig {
        template_dir: concat!(env!("CARGO_MANIFEST_DIR"), "/manifests").to_string(),
        hub_endpoint: Some(HUB_HOST.to_string()),
        ..Default::default()
    }
}

pub fn test_context(api: &MockApi) -> Context {
    let config = test_config();
    let renderer = Arc::new(DirRenderer::new(&config.template_dir));
    Context::new(api.client(), config, renderer)
}

pub fn test_mco() -> MultiClusterObservability {
    let mut spec = MultiClusterObservabilitySpec::default();
    spec.storage_config.metric_object_storage = Some(PreConfiguredStorage {
        name: STORAGE_SECRET.to_string(),
        key: STORAGE_KEY.to_string(),
    });
    let mut mco = MultiClusterObservability::new("observability", spec);
    mco.metadata.generation = Some(1);
    mco
}

/// Stores `mco` in the mock API and returns the stored form.
pub fn insert_mco(api: &MockApi, mco: &MultiClusterObservability) -> MultiClusterObservability {
    api.insert(serde_json::to_value(mco).unwrap());
    let stored = api
        .get(
            "observability.open-cluster-management.io/v1beta2",
            "multiclusterobservabilities",
            None,
            &mco.metadata.name.clone().unwrap(),
        )
        .unwrap();
    serde_json::from_value(stored).unwrap()
}

pub fn storage_secret(namespace: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": {"name": STORAGE_SECRET, "namespace": namespace},
        "data": {
            STORAGE_KEY: to_base64(
                "type: S3\nconfig:\n  bucket: thanos\n  endpoint: s3.example.com\n"
            ),
        },
    })
}

pub fn ready_workload(kind: &str, name: &str, namespace: &str) -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": kind,
        "metadata": {"name": name, "namespace": namespace},
        "spec": {"template": {"metadata": {}, "spec": {"containers": []}}},
        "status": {"replicas": 1, "readyReplicas": 1},
    })
}

pub fn insert_ready_deployments(api: &MockApi, namespace: &str) {
    for name in hub::DEPLOYMENTS {
        api.insert(ready_workload("Deployment", name, namespace));
    }
}

pub fn insert_ready_statefulsets(api: &MockApi, namespace: &str) {
    for name in hub::STATEFULSETS {
        api.insert(ready_workload("StatefulSet", name, namespace));
    }
}

pub fn placement_decision(namespace: &str, clusters: &[&str]) -> Value {
    let decisions: Vec<Value> = clusters
        .iter()
        .map(|c| json!({"clusterName": c, "reason": ""}))
        .collect();
    json!({
        "apiVersion": "cluster.open-cluster-management.io/v1beta1",
        "kind": "PlacementDecision",
        "metadata": {
            "name": "observability-decision-1",
            "namespace": namespace,
            "labels": {labels::PLACEMENT: labels::PLACEMENT_NAME},
        },
        "status": {"decisions": decisions},
    })
}

pub fn allowlist_config_map(name: &str, namespace: &str, content: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": {labels::MANAGED_BY: OPERATOR_NAME},
        },
        "data": {hub::ALLOWLIST_KEY: content},
    })
}

/// Secret data values are base64 on the wire.
pub fn to_base64(text: &str) -> String {
    let bytes = k8s_openapi::ByteString(text.as_bytes().to_vec());
    serde_json::to_value(bytes).unwrap().as_str().unwrap().to_string()
}

pub fn secret_names(api: &MockApi, namespace: &str) -> Vec<String> {
    let mut names: Vec<String> = api
        .list("v1", "secrets")
        .into_iter()
        .filter(|s| s["metadata"]["namespace"] == namespace)
        .map(|s| s["metadata"]["name"].as_str().unwrap().to_string())
        .collect();
    names.sort();
    names
}
