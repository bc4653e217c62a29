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

use crate::constants::hub::RECEIVE_PATH;
use serde::{Deserialize, Serialize};

/// Connection details a managed cluster needs to reach the hub.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct HubInfo {
    pub cluster_name: String,
    pub endpoint: String,
    pub hub_alertmanager_endpoint: String,
    pub hub_router_ca: String,
}

fn with_scheme(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

/// The metrics ingestion URL for an externally reachable hub host.
pub fn endpoint_url(host: &str) -> String {
    format!("{}{}", with_scheme(host), RECEIVE_PATH)
}

pub fn alertmanager_url(host: &str) -> String {
    if host.trim().is_empty() {
        String::new()
    } else {
        with_scheme(host)
    }
}

impl HubInfo {
    pub fn new(cluster_name: &str, endpoint_host: &str, alertmanager_host: &str, router_ca: &str) -> Self {
        Self {
            cluster_name: cluster_name.to_string(),
            endpoint: endpoint_url(endpoint_host),
            hub_alertmanager_endpoint: alertmanager_url(alertmanager_host),
            hub_router_ca: router_ca.to_string(),
        }
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml_ng::Error> {
        serde_yaml_ng::to_string(self)
    }
}
