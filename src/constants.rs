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

//! Well-known names shared by the hub workload and fleet controllers.

/// API group of the operator's own custom resources.
pub const GROUP: &str = "observability.open-cluster-management.io";

/// Name used as event reporter and field manager.
pub const OPERATOR_NAME: &str = "multicluster-observability-operator";

pub mod labels {
    use super::GROUP;

    /// Marks every object created by this operator.
    pub const MANAGED_BY: &str = const_str::concat!(GROUP, "/managed-by");

    /// Marks objects that belong to a single managed cluster.
    pub const CLUSTER: &str = const_str::concat!(GROUP, "/cluster");

    /// Selects the placement decisions of the observability placement.
    pub const PLACEMENT: &str = "cluster.open-cluster-management.io/placement";
    pub const PLACEMENT_NAME: &str = "observability";

    /// Pod template label bumped when a mounted certificate is renewed.
    pub const CERT_RESTARTED: &str = "cert/time-restarted";

    pub const DEFAULT_STORAGE_CLASS: &str = "storageclass.kubernetes.io/is-default-class";

    /// `key=value` selector for everything this operator owns.
    pub fn managed_selector() -> String {
        format!("{MANAGED_BY}={}", super::OPERATOR_NAME)
    }
}

pub mod annotations {
    use super::GROUP;

    /// sha256 of a work bundle's canonical manifest list.
    pub const CONTENT_HASH: &str = const_str::concat!(GROUP, "/content-hash");
}

pub mod finalizers {
    use super::GROUP;

    pub const HUB_CLEANUP: &str = const_str::concat!(GROUP, "/res-cleanup");
    pub const FLEET_CLEANUP: &str = const_str::concat!(GROUP, "/fleet-cleanup");
    pub const ADDON_CLEANUP: &str = const_str::concat!(GROUP, "/addon-cleanup");
}

pub mod certs {
    pub const SERVER_CA: &str = "observability-server-ca-certs";
    pub const CLIENT_CA: &str = "observability-client-ca-certs";
    pub const SERVER_CERT: &str = "observability-server-certs";
    pub const GRAFANA_CERT: &str = "observability-grafana-certs";
    pub const CLUSTER_CLIENT_CERT: &str = "observability-cluster-client-certs";

    pub const SERVER_CA_CN: &str = "observability-server-ca-certificate";
    pub const CLIENT_CA_CN: &str = "observability-client-ca-certificate";
    pub const SERVER_CN: &str = "observability-server-certificate";
    pub const GRAFANA_CN: &str = "grafana";

    /// Organizational unit carried by every per-cluster client certificate.
    pub const FLEET_OU: &str = "acm-observability-fleet";
    pub const ORGANIZATION: &str = "Red Hat, Inc.";

    pub const CA_CRT: &str = "ca.crt";
    pub const TLS_CRT: &str = "tls.crt";
    pub const TLS_KEY: &str = "tls.key";
}

pub mod hub {
    pub const OBSERVATORIUM_API: &str = "observability-observatorium-api";
    pub const RBAC_QUERY_PROXY: &str = "observability-rbac-query-proxy";
    pub const OBSERVATORIUM_INGRESS: &str = "observatorium-api";
    pub const ALERTMANAGER_INGRESS: &str = "alertmanager";

    pub const DEFAULT_PULL_SECRET: &str = "multiclusterhub-operator-pull-secret";

    pub const ALLOWLIST: &str = "observability-metrics-allowlist";
    pub const CUSTOM_ALLOWLIST: &str = "observability-metrics-custom-allowlist";
    pub const ALLOWLIST_KEY: &str = "metrics_list.yaml";

    /// Ingestion path appended to the hub endpoint host.
    pub const RECEIVE_PATH: &str = "/api/metrics/v1/default/api/v1/receive";

    pub const RES_CLUSTER_ROLE: &str = "endpoint-observability-res-role";
    pub const RES_ROLE_BINDING: &str = "endpoint-observability-res-rolebinding";

    pub const DEPLOYMENTS: [&str; 5] = [
        OBSERVATORIUM_API,
        "observability-thanos-query",
        "observability-thanos-query-frontend",
        RBAC_QUERY_PROXY,
        "observability-grafana",
    ];

    pub const STATEFULSETS: [&str; 5] = [
        "observability-alertmanager",
        "observability-thanos-compact",
        "observability-thanos-receive-default",
        "observability-thanos-rule",
        "observability-thanos-store-shard-0",
    ];
}

pub mod spoke {
    pub const TRUST_BUNDLE: &str = "observability-managed-cluster-certs";
    pub const CLIENT_CERT: &str = "observability-signer-client-cert";
    pub const HUB_INFO: &str = "hub-info-secret";
    pub const HUB_INFO_KEY: &str = "hub-info.yaml";
    pub const ADDON_NAME: &str = "observability-addon";
    pub const OPERATOR_DEPLOYMENT: &str = "endpoint-observability-operator";
    pub const HUB_NAMESPACE_ENV: &str = "HUB_NAMESPACE";
}

pub mod work {
    pub const OPERATOR_SUFFIX: &str = "-observability-operator";
    pub const RESOURCE_SUFFIX: &str = "-observability-operator-res";

    pub fn operator_bundle_name(cluster_namespace: &str) -> String {
        format!("{cluster_namespace}{OPERATOR_SUFFIX}")
    }

    pub fn resource_bundle_name(cluster_namespace: &str) -> String {
        format!("{cluster_namespace}{RESOURCE_SUFFIX}")
    }
}

pub mod templates {
    pub const HUB: &str = "hub";
    pub const ENDPOINT_OPERATOR: &str = "endpoint-operator";
    pub const ENDPOINT_RESOURCES: &str = "endpoint-resources";
}
