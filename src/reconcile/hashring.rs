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

//! Tenants are added to the receive hashrings by other components after the stack is
//! installed. The rendered Observatorium declares none, so the live ones are carried over.

use crate::context::{Context, KubeSnafu};
use kube::api::DynamicObject;
use kube::ResourceExt;
use serde_json::Value;
use snafu::futures::TryFutureExt;
use tracing::debug;

fn declared_tenants(hashring: &Value) -> Option<&Value> {
    hashring
        .get("tenants")
        .filter(|tenants| tenants.as_array().is_some_and(|t| !t.is_empty()))
}

/// Copies the tenants of live hashring `j` onto desired hashring `j` when the desired one
/// declares none. Returns how many hashrings were filled in.
pub fn preserve_tenants(desired: &mut Value, live: &Value) -> usize {
    let Some(live_rings) = live.pointer("/spec/hashrings").and_then(Value::as_array) else {
        return 0;
    };
    let Some(rings) = desired
        .pointer_mut("/spec/hashrings")
        .and_then(Value::as_array_mut)
    else {
        return 0;
    };

    let mut filled = 0;
    for (j, ring) in rings.iter_mut().enumerate() {
        if declared_tenants(ring).is_some() {
            continue;
        }
        let Some(tenants) = live_rings.get(j).and_then(declared_tenants) else {
            continue;
        };
        if let Some(ring) = ring.as_object_mut() {
            ring.insert("tenants".to_string(), tenants.clone());
            filled += 1;
        }
    }
    filled
}

/// Fills `desired` in from the live Observatorium of the same name, if there is one.
pub async fn preserve_live_tenants(
    ctx: &Context,
    desired: &mut DynamicObject,
) -> Result<usize, crate::context::Error> {
    let Some(strategy) = ctx.registry.get("Observatorium") else {
        return Ok(0);
    };
    let api = ctx.dynamic_api(&strategy.resource, desired.metadata.namespace.as_deref());
    let Some(live) = api.get_opt(&desired.name_any()).context(KubeSnafu).await? else {
        return Ok(0);
    };

    let filled = preserve_tenants(&mut desired.data, &live.data);
    if filled > 0 {
        debug!("kept live tenants of {} hashring(s) in {}", filled, desired.name_any());
    }
    Ok(filled)
}
