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

//! Per-kind comparison and update rules for the object sync primitive.

use crate::types::v1beta1::addon::ObservabilityAddon;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::api::networking::v1 as networkingv1;
use k8s_openapi::api::rbac::v1 as rbacv1;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{ApiResource, GroupVersionKind};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Returns true when `live` already satisfies `desired`.
pub type Comparator = fn(desired: &Value, live: &Value) -> bool;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdatePolicy {
    /// Desired fields are merged over the live ones, keeping server-populated values.
    Overlay,
    /// Desired fields replace the live ones wholesale.
    Replace,
}

#[derive(Clone, Debug)]
pub struct KindStrategy {
    pub resource: ApiResource,
    pub namespaced: bool,
    /// Top-level fields owned by the operator.
    pub fields: &'static [&'static str],
    pub compare: Comparator,
    pub policy: UpdatePolicy,
}

const SPEC: &[&str] = &["spec"];
const DATA: &[&str] = &["data", "binaryData", "type"];
const RULES: &[&str] = &["rules"];
const BINDING: &[&str] = &["subjects", "roleRef"];
const NONE: &[&str] = &[];

impl KindStrategy {
    fn typed<K>(
        namespaced: bool,
        fields: &'static [&'static str],
        compare: Comparator,
        policy: UpdatePolicy,
    ) -> Self
    where
        K: kube::Resource<DynamicType = ()>,
    {
        Self {
            resource: ApiResource::erase::<K>(&()),
            namespaced,
            fields,
            compare,
            policy,
        }
    }

    fn spec<K: kube::Resource<DynamicType = ()>>(namespaced: bool) -> Self {
        Self::typed::<K>(namespaced, SPEC, spec_subset, UpdatePolicy::Overlay)
    }

    fn data<K: kube::Resource<DynamicType = ()>>() -> Self {
        Self::typed::<K>(true, DATA, data_exact, UpdatePolicy::Replace)
    }

    fn rules<K: kube::Resource<DynamicType = ()>>(namespaced: bool) -> Self {
        Self::typed::<K>(namespaced, RULES, rules_exact, UpdatePolicy::Replace)
    }

    fn binding<K: kube::Resource<DynamicType = ()>>(namespaced: bool) -> Self {
        Self::typed::<K>(namespaced, BINDING, binding_exact, UpdatePolicy::Replace)
    }

    fn existence<K: kube::Resource<DynamicType = ()>>(namespaced: bool) -> Self {
        Self::typed::<K>(namespaced, NONE, always_equal, UpdatePolicy::Overlay)
    }

    /// True when the live object needs no write: owned fields compare equal and every
    /// desired label and annotation is present.
    pub fn matches(&self, desired: &Value, live: &Value) -> bool {
        (self.compare)(desired, live)
            && map_subset(desired, live, "labels")
            && map_subset(desired, live, "annotations")
    }

    /// Applies the owned fields and metadata of `desired` onto `live`, keeping the
    /// live resourceVersion.
    pub fn merge_into(&self, desired: &Value, mut live: Value) -> Value {
        let Some(target) = live.as_object_mut() else {
            return desired.clone();
        };

        for field in self.fields {
            match (self.policy, desired.get(*field)) {
                (UpdatePolicy::Overlay, Some(value)) => {
                    let slot = target.entry(field.to_string()).or_insert(Value::Null);
                    overlay(slot, value);
                }
                (UpdatePolicy::Replace, Some(value)) => {
                    target.insert(field.to_string(), value.clone());
                }
                // a Secret's type is immutable once set
                (UpdatePolicy::Replace, None) if *field != "type" => {
                    target.remove(*field);
                }
                _ => {}
            }
        }

        let metadata = target
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        for key in ["labels", "annotations"] {
            if let Some(value) = desired.pointer(&format!("/metadata/{key}")) {
                if let Some(meta) = metadata.as_object_mut() {
                    let slot = meta.entry(key).or_insert(Value::Null);
                    overlay(slot, value);
                }
            }
        }

        live
    }
}

/// Maps a kind tag to its strategy. Every kind the operator writes must be registered.
#[derive(Clone, Debug, Default)]
pub struct KindRegistry {
    strategies: BTreeMap<String, KindStrategy>,
}

impl KindRegistry {
    pub fn standard() -> Self {
        let mut registry = Self::default();

        registry.register("Namespace", KindStrategy::existence::<corev1::Namespace>(false));
        registry.register("ServiceAccount", KindStrategy::existence::<corev1::ServiceAccount>(true));
        registry.register("Secret", KindStrategy::data::<corev1::Secret>());
        registry.register("ConfigMap", KindStrategy::data::<corev1::ConfigMap>());
        registry.register("Service", KindStrategy::spec::<corev1::Service>(true));
        registry.register(
            "PersistentVolumeClaim",
            KindStrategy::spec::<corev1::PersistentVolumeClaim>(true),
        );
        registry.register("Deployment", KindStrategy::spec::<appsv1::Deployment>(true));
        registry.register("StatefulSet", KindStrategy::spec::<appsv1::StatefulSet>(true));
        registry.register("Ingress", KindStrategy::spec::<networkingv1::Ingress>(true));
        registry.register("Role", KindStrategy::rules::<rbacv1::Role>(true));
        registry.register("ClusterRole", KindStrategy::rules::<rbacv1::ClusterRole>(false));
        registry.register("RoleBinding", KindStrategy::binding::<rbacv1::RoleBinding>(true));
        registry.register(
            "ClusterRoleBinding",
            KindStrategy::binding::<rbacv1::ClusterRoleBinding>(false),
        );
        registry.register(
            "CustomResourceDefinition",
            KindStrategy::spec::<CustomResourceDefinition>(false),
        );
        registry.register("ObservabilityAddon", KindStrategy::spec::<ObservabilityAddon>(true));
        registry.register(
            "Observatorium",
            KindStrategy {
                resource: observatorium_resource(),
                namespaced: true,
                fields: SPEC,
                compare: spec_subset,
                policy: UpdatePolicy::Overlay,
            },
        );

        registry
    }

    pub fn register(&mut self, kind: &str, strategy: KindStrategy) {
        self.strategies.insert(kind.to_string(), strategy);
    }

    pub fn get(&self, kind: &str) -> Option<&KindStrategy> {
        self.strategies.get(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = (&str, &KindStrategy)> {
        self.strategies.iter().map(|(k, s)| (k.as_str(), s))
    }

    /// Kinds from `kinds` that have no registered strategy, sorted and de-duplicated.
    pub fn missing<'a>(&self, kinds: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let mut missing: Vec<String> = kinds
            .into_iter()
            .filter(|kind| !self.strategies.contains_key(*kind))
            .map(str::to_string)
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }
}

pub fn observatorium_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("core.observatorium.io", "v1alpha1", "Observatorium"),
        "observatoria",
    )
}

/// Recursively merges `value` into `slot`. Objects merge key by key, anything else is overwritten.
fn overlay(slot: &mut Value, value: &Value) {
    match (slot, value) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, item) in source {
                overlay(target.entry(key.clone()).or_insert(Value::Null), item);
            }
        }
        (slot, value) => *slot = value.clone(),
    }
}

/// True when every value set in `desired` is present and equal in `live`.
pub fn is_subset(desired: &Value, live: &Value) -> bool {
    match (desired, live) {
        (Value::Null, _) => true,
        (Value::Object(d), Value::Object(l)) => d
            .iter()
            .all(|(key, value)| is_subset(value, l.get(key).unwrap_or(&Value::Null))),
        (Value::Object(d), Value::Null) => d.values().all(|v| is_subset(v, &Value::Null)),
        (Value::Array(d), Value::Array(l)) => {
            d.len() == l.len() && d.iter().zip(l).all(|(d, l)| is_subset(d, l))
        }
        (Value::Array(d), Value::Null) => d.is_empty(),
        (d, l) => d == l,
    }
}

/// Null, `{}` and `[]` all mean "unset".
fn normalized(value: Option<&Value>) -> Option<&Value> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::Object(m)) if m.is_empty() => None,
        Some(Value::Array(a)) if a.is_empty() => None,
        Some(v) => Some(v),
    }
}

fn field_equal(desired: &Value, live: &Value, field: &str) -> bool {
    normalized(desired.get(field)) == normalized(live.get(field))
}

fn map_subset(desired: &Value, live: &Value, key: &str) -> bool {
    let pointer = format!("/metadata/{key}");
    match desired.pointer(&pointer) {
        Some(wanted) => is_subset(wanted, live.pointer(&pointer).unwrap_or(&Value::Null)),
        None => true,
    }
}

pub fn spec_subset(desired: &Value, live: &Value) -> bool {
    is_subset(
        desired.get("spec").unwrap_or(&Value::Null),
        live.get("spec").unwrap_or(&Value::Null),
    )
}

pub fn data_exact(desired: &Value, live: &Value) -> bool {
    field_equal(desired, live, "data")
        && field_equal(desired, live, "binaryData")
        && (desired.get("type").is_none() || field_equal(desired, live, "type"))
}

pub fn rules_exact(desired: &Value, live: &Value) -> bool {
    field_equal(desired, live, "rules")
}

pub fn binding_exact(desired: &Value, live: &Value) -> bool {
    field_equal(desired, live, "subjects") && field_equal(desired, live, "roleRef")
}

pub fn always_equal(_desired: &Value, _live: &Value) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_spec_subset_ignores_server_defaults() {
        let desired = json!({"spec": {"ports": [{"port": 8080}], "selector": {"app": "api"}}});
        let live = json!({"spec": {
            "ports": [{"port": 8080, "protocol": "TCP", "targetPort": 8080}],
            "selector": {"app": "api"},
            "clusterIP": "10.0.0.1"
        }});
        assert!(spec_subset(&desired, &live));

        let changed = json!({"spec": {"ports": [{"port": 9090}]}});
        assert!(!spec_subset(&changed, &live));

        let extra_port = json!({"spec": {"ports": [{"port": 8080}, {"port": 9090}]}});
        assert!(!spec_subset(&extra_port, &live));
    }

    #[test]
    fn test_data_exact_detects_removed_keys() {
        let desired = json!({"data": {"a": "MQ=="}});
        let live = json!({"data": {"a": "MQ==", "b": "Mg=="}, "type": "Opaque"});
        assert!(!data_exact(&desired, &live));
        assert!(data_exact(&json!({"data": {"a": "MQ==", "b": "Mg=="}}), &live));
        assert!(data_exact(&json!({"data": {}}), &json!({})));
    }

    #[test]
    fn test_rbac_comparators() {
        let rules = json!({"rules": [{"apiGroups": [""], "resources": ["secrets"], "verbs": ["get"]}]});
        assert!(rules_exact(&rules, &rules));
        assert!(!rules_exact(&rules, &json!({"rules": []})));
        assert!(rules_exact(&json!({"rules": []}), &json!({})));

        let binding = json!({
            "subjects": [{"kind": "Group", "name": "cluster-a"}],
            "roleRef": {"apiGroup": "rbac.authorization.k8s.io", "kind": "ClusterRole", "name": "r"}
        });
        assert!(binding_exact(&binding, &binding));
        assert!(!binding_exact(&binding, &json!({"roleRef": binding["roleRef"]})));
    }

    #[test]
    fn test_matches_requires_desired_labels() {
        let registry = KindRegistry::standard();
        let strategy = registry.get("Namespace").unwrap();
        let desired = json!({"metadata": {"name": "ns", "labels": {"owner": "me"}}});
        assert!(!strategy.matches(&desired, &json!({"metadata": {"name": "ns"}})));
        assert!(strategy.matches(
            &desired,
            &json!({"metadata": {"name": "ns", "labels": {"owner": "me", "extra": "x"}}})
        ));
    }

    #[test]
    fn test_overlay_merge_keeps_live_fields_and_version() {
        let registry = KindRegistry::standard();
        let strategy = registry.get("Deployment").unwrap();
        let desired = json!({
            "metadata": {"name": "api", "labels": {"owner": "me"}},
            "spec": {"replicas": 2}
        });
        let live = json!({
            "metadata": {"name": "api", "resourceVersion": "7", "labels": {"app": "api"}},
            "spec": {"replicas": 1, "revisionHistoryLimit": 10},
            "status": {"readyReplicas": 1}
        });

        let merged = strategy.merge_into(&desired, live);
        assert_eq!(merged["spec"]["replicas"], 2);
        assert_eq!(merged["spec"]["revisionHistoryLimit"], 10);
        assert_eq!(merged["metadata"]["resourceVersion"], "7");
        assert_eq!(merged["metadata"]["labels"]["app"], "api");
        assert_eq!(merged["metadata"]["labels"]["owner"], "me");
        assert!(strategy.matches(&desired, &merged));
    }

    #[test]
    fn test_replace_merge_drops_stale_data_but_keeps_type() {
        let registry = KindRegistry::standard();
        let strategy = registry.get("Secret").unwrap();
        let desired = json!({"metadata": {"name": "s"}, "data": {"a": "MQ=="}});
        let live = json!({
            "metadata": {"name": "s", "resourceVersion": "3"},
            "data": {"old": "MA=="},
            "binaryData": {"x": "eA=="},
            "type": "kubernetes.io/tls"
        });

        let merged = strategy.merge_into(&desired, live);
        assert_eq!(merged["data"], json!({"a": "MQ=="}));
        assert!(merged.get("binaryData").is_none());
        assert_eq!(merged["type"], "kubernetes.io/tls");
        assert!(strategy.matches(&desired, &merged));
    }

    #[test]
    fn test_missing_kinds_are_reported_once() {
        let registry = KindRegistry::standard();
        assert!(registry.missing(["Secret", "Deployment"]).is_empty());
        assert_eq!(
            registry.missing(["Widget", "Secret", "Widget"]),
            vec!["Widget".to_string()]
        );
    }
}
