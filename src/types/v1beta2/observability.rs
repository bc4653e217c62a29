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

use crate::constants::hub;
use crate::types;
use crate::types::error::OutOfRangeSnafu;
use crate::types::v1beta1::addon::ObservabilityAddonSpec;
use crate::types::v1beta2::k8s;
use kube::{CustomResource, KubeSchema, ResourceExt};
use serde::{Deserialize, Serialize};

fn default_alertmanager_size() -> String {
    "1Gi".to_string()
}

fn default_rule_size() -> String {
    "1Gi".to_string()
}

fn default_compact_size() -> String {
    "100Gi".to_string()
}

fn default_receive_size() -> String {
    "100Gi".to_string()
}

fn default_store_size() -> String {
    "10Gi".to_string()
}

/// The fleet-wide observability declaration. There is at most one per hub.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, KubeSchema, Default)]
#[kube(
    group = "observability.open-cluster-management.io",
    version = "v1beta2",
    kind = "MultiClusterObservability",
    status = "crate::types::v1beta2::status::Status",
    shortname = "mco",
    plural = "multiclusterobservabilities",
    singular = "multiclusterobservability",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct MultiClusterObservabilitySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_downsampling: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<k8s::ImagePullPolicy>,

    /// Pull secret in the hub namespace, copied to every managed cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_secret: Option<String>,

    #[serde(default)]
    pub observability_addon_spec: ObservabilityAddonSpec,

    #[serde(default)]
    pub storage_config: StorageConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_config: Option<RetentionConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_object_storage: Option<PreConfiguredStorage>,

    /// Resolved to the cluster's default StorageClass when empty.
    #[serde(default)]
    pub storage_class: String,

    #[serde(default = "default_alertmanager_size")]
    pub alertmanager_storage_size: String,

    #[serde(default = "default_rule_size")]
    pub rule_storage_size: String,

    #[serde(default = "default_compact_size")]
    pub compact_storage_size: String,

    #[serde(default = "default_receive_size")]
    pub receive_storage_size: String,

    #[serde(default = "default_store_size")]
    pub store_storage_size: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            metric_object_storage: None,
            storage_class: String::new(),
            alertmanager_storage_size: default_alertmanager_size(),
            rule_storage_size: default_rule_size(),
            compact_storage_size: default_compact_size(),
            receive_storage_size: default_receive_size(),
            store_storage_size: default_store_size(),
        }
    }
}

/// Reference to the secret key holding the object storage configuration.
#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PreConfiguredStorage {
    pub name: String,
    pub key: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RetentionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_resolution_raw: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_resolution5m: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_resolution1h: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_in_local: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_duration: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_delay: Option<String>,
}

impl MultiClusterObservability {
    pub fn name(&self) -> String {
        ResourceExt::name_any(self)
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn image_pull_secret(&self) -> &str {
        self.spec
            .image_pull_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(hub::DEFAULT_PULL_SECRET)
    }

    pub fn image_pull_policy(&self) -> k8s::ImagePullPolicy {
        self.spec.image_pull_policy.clone().unwrap_or_default()
    }

    /// Storage size requested for the given StatefulSet, if it carries persistent data.
    pub fn storage_size_for(&self, statefulset: &str) -> Option<&str> {
        let storage = &self.spec.storage_config;
        let size = match statefulset {
            "observability-alertmanager" => &storage.alertmanager_storage_size,
            "observability-thanos-compact" => &storage.compact_storage_size,
            "observability-thanos-rule" => &storage.rule_storage_size,
            s if s.starts_with("observability-thanos-receive") => &storage.receive_storage_size,
            s if s.starts_with("observability-thanos-store") => &storage.store_storage_size,
            _ => return None,
        };
        Some(size.as_str())
    }

    /// Rejects specs the CRD schema would reject, for objects written before validation existed.
    pub fn validate(&self) -> Result<(), types::error::Error> {
        if !self.spec.observability_addon_spec.interval_in_range() {
            return OutOfRangeSnafu {
                name: self.name(),
                field: "spec.observabilityAddonSpec.interval",
                message: format!(
                    "{} is outside 15-3600 seconds",
                    self.spec.observability_addon_spec.interval
                ),
            }
            .fail();
        }
        Ok(())
    }
}
