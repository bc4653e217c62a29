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

use clap::Args;
use std::time::Duration;

pub const DEFAULT_NAMESPACE: &str = "open-cluster-management-observability";
pub const DEFAULT_SPOKE_NAMESPACE: &str = "open-cluster-management-addon-observability";
pub const DEFAULT_TEMPLATE_DIR: &str = "/usr/local/manifests";
pub const DEFAULT_ENDPOINT_OPERATOR_IMAGE: &str =
    "quay.io/stolostron/endpoint-monitoring-operator:latest";
pub const DEFAULT_ROUTER_CA_SECRET: &str = "router-certs-default";
pub const DEFAULT_ROUTER_CA_NAMESPACE: &str = "openshift-ingress";
pub const DEFAULT_LOCAL_CLUSTER: &str = "local-cluster";

/// Runtime settings of the controllers. Every flag can also be set from the environment.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Hub namespace holding the observability stack, PKI secrets and allow-lists
    #[arg(long, env = "MCO_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Namespace for the client trust domain CA, defaults to the hub namespace
    #[arg(long, env = "MCO_CLIENT_CA_NAMESPACE")]
    pub client_ca_namespace: Option<String>,

    /// Namespace the endpoint operator runs in on managed clusters
    #[arg(long, env = "SPOKE_NAMESPACE", default_value = DEFAULT_SPOKE_NAMESPACE)]
    pub spoke_namespace: String,

    /// Root directory of the on-disk template sets
    #[arg(long, env = "TEMPLATE_DIR", default_value = DEFAULT_TEMPLATE_DIR)]
    pub template_dir: String,

    /// Image of the endpoint operator deployed to managed clusters
    #[arg(long, env = "ENDPOINT_OPERATOR_IMAGE", default_value = DEFAULT_ENDPOINT_OPERATOR_IMAGE)]
    pub endpoint_operator_image: String,

    /// Externally reachable metrics ingestion host, overrides the observatorium-api ingress
    #[arg(long, env = "HUB_ENDPOINT")]
    pub hub_endpoint: Option<String>,

    /// Externally reachable alertmanager host, overrides the alertmanager ingress
    #[arg(long, env = "ALERTMANAGER_ENDPOINT")]
    pub alertmanager_endpoint: Option<String>,

    /// Secret holding the hub router CA under `tls.crt`
    #[arg(long, env = "ROUTER_CA_SECRET", default_value = DEFAULT_ROUTER_CA_SECRET)]
    pub router_ca_secret: String,

    #[arg(long, env = "ROUTER_CA_NAMESPACE", default_value = DEFAULT_ROUTER_CA_NAMESPACE)]
    pub router_ca_namespace: String,

    /// Name of the managed cluster co-located with the hub
    #[arg(long, env = "LOCAL_CLUSTER_NAME", default_value = DEFAULT_LOCAL_CLUSTER)]
    pub local_cluster_name: String,

    /// Periodic resync interval in seconds
    #[arg(long, env = "RESYNC_SECONDS", default_value_t = 300)]
    pub resync_seconds: u64,

    /// Port of the health probe server
    #[arg(long, env = "PROBE_PORT", default_value_t = 8081)]
    pub probe_port: u16,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            client_ca_namespace: None,
            spoke_namespace: DEFAULT_SPOKE_NAMESPACE.to_string(),
            template_dir: DEFAULT_TEMPLATE_DIR.to_string(),
            endpoint_operator_image: DEFAULT_ENDPOINT_OPERATOR_IMAGE.to_string(),
            hub_endpoint: None,
            alertmanager_endpoint: None,
            router_ca_secret: DEFAULT_ROUTER_CA_SECRET.to_string(),
            router_ca_namespace: DEFAULT_ROUTER_CA_NAMESPACE.to_string(),
            local_cluster_name: DEFAULT_LOCAL_CLUSTER.to_string(),
            resync_seconds: 300,
            probe_port: 8081,
        }
    }
}

impl OperatorConfig {
    pub fn client_ca_namespace(&self) -> &str {
        self.client_ca_namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(&self.namespace)
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_seconds.max(1))
    }

    pub fn is_local_cluster(&self, cluster_name: &str) -> bool {
        cluster_name == self.local_cluster_name
    }
}
