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

//! Common Kubernetes value types used by the observability spec

use k8s_openapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::Display;

/// Image pull policy for the workloads shipped to the fleet.
/// - Always: Always pull the image
/// - Never: Never pull the image
/// - IfNotPresent: Pull the image if not present locally (default)
///
/// https://kubernetes.io/docs/concepts/containers/images/#image-pull-policy
#[derive(Default, Deserialize, Serialize, Clone, Debug, JsonSchema, Display, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
#[schemars(rename_all = "PascalCase")]
pub enum ImagePullPolicy {
    #[strum(to_string = "Always")]
    Always,

    #[strum(to_string = "Never")]
    Never,

    #[strum(to_string = "IfNotPresent")]
    #[default]
    IfNotPresent,
}

/// Parses a storage quantity such as `10Gi`, `500M` or `1073741824` into bytes.
///
/// Only the suffixes used for volume sizes are understood; anything else yields `None`.
pub fn storage_bytes(quantity: &str) -> Option<u128> {
    let quantity = quantity.trim();
    let split = quantity
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(quantity.len());
    let (digits, suffix) = quantity.split_at(split);
    let value: u128 = digits.parse().ok()?;

    let multiplier: u128 = match suffix {
        "" => 1,
        "Ki" => 1 << 10,
        "Mi" => 1 << 20,
        "Gi" => 1 << 30,
        "Ti" => 1 << 40,
        "Pi" => 1 << 50,
        "k" => 1_000,
        "M" => 1_000_000,
        "G" => 1_000_000_000,
        "T" => 1_000_000_000_000,
        "P" => 1_000_000_000_000_000,
        _ => return None,
    };

    value.checked_mul(multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_bytes_binary_and_decimal() {
        assert_eq!(storage_bytes("1Gi"), Some(1 << 30));
        assert_eq!(storage_bytes("100Gi"), Some(100 << 30));
        assert_eq!(storage_bytes("2G"), Some(2_000_000_000));
        assert_eq!(storage_bytes("512"), Some(512));
    }

    #[test]
    fn test_storage_bytes_rejects_unknown_suffix() {
        assert_eq!(storage_bytes("1Zi"), None);
        assert_eq!(storage_bytes("Gi"), None);
        assert_eq!(storage_bytes("1.5Gi"), None);
    }

    #[test]
    fn test_image_pull_policy_display() {
        assert_eq!(ImagePullPolicy::default().to_string(), "IfNotPresent");
        assert_eq!(ImagePullPolicy::Always.to_string(), "Always");
    }
}
