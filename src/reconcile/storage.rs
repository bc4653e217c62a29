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

//! Persistent storage of the hub StatefulSets.

use crate::constants::labels;
use crate::context::{self, Context, KubeSnafu};
use crate::types::v1beta2::k8s::storage_bytes;
use crate::types::v1beta2::observability::MultiClusterObservability;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::DynamicObject;
use kube::ResourceExt;
use serde_json::{Map, Value};
use snafu::futures::TryFutureExt;
use tracing::{debug, info, warn};

/// Name of the volume claim template every hub StatefulSet declares.
pub const CLAIM_TEMPLATE: &str = "data";

/// The StorageClass annotated as the cluster default, if any.
pub fn default_class(classes: &[StorageClass]) -> Option<String> {
    classes
        .iter()
        .find(|class| {
            class
                .annotations()
                .get(labels::DEFAULT_STORAGE_CLASS)
                .is_some_and(|v| v == "true")
        })
        .map(|class| class.name_any())
}

/// Writes the cluster's default StorageClass into a root that names none.
pub async fn default_storage_class(
    ctx: &Context,
    mco: MultiClusterObservability,
) -> Result<MultiClusterObservability, context::Error> {
    if !mco.spec.storage_config.storage_class.is_empty() {
        return Ok(mco);
    }

    let classes = ctx.list_all::<StorageClass>(None).await?;
    let Some(class) = default_class(&classes) else {
        debug!("no default storage class found, leaving {} unset", mco.name());
        return Ok(mco);
    };

    info!("defaulting storage class of {} to {}", mco.name(), class);
    let mut updated = mco;
    updated.spec.storage_config.storage_class = class;
    ctx.replace_cluster(&updated).await
}

fn object_mut<'a>(value: &'a mut Value, key: &str) -> Option<&'a mut Map<String, Value>> {
    let map = value.as_object_mut()?;
    map.entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
}

/// Sets size and class on the claim templates of a rendered StatefulSet.
///
/// Claim templates cannot change once the StatefulSet exists, so when the live object
/// declares any they are copied over unchanged and growth is left to `grow_volume_claims`.
pub fn stamp_volume_claims(
    desired: &mut DynamicObject,
    live: Option<&DynamicObject>,
    size: Option<&str>,
    storage_class: &str,
) {
    let live_templates = live
        .and_then(|sts| sts.data.pointer("/spec/volumeClaimTemplates"))
        .filter(|templates| templates.as_array().is_some_and(|t| !t.is_empty()));

    if let Some(templates) = live_templates {
        if let Some(spec) = object_mut(&mut desired.data, "spec") {
            spec.insert("volumeClaimTemplates".to_string(), templates.clone());
        }
        return;
    }

    let Some(templates) = desired
        .data
        .pointer_mut("/spec/volumeClaimTemplates")
        .and_then(Value::as_array_mut)
    else {
        return;
    };

    for template in templates {
        let Some(spec) = object_mut(template, "spec") else {
            continue;
        };
        if !storage_class.is_empty() {
            spec.insert("storageClassName".to_string(), storage_class.into());
        }
        let Some(size) = size else {
            continue;
        };
        let resources = spec
            .entry("resources".to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(requests) = object_mut(resources, "requests") {
            requests.insert("storage".to_string(), size.into());
        }
    }
}

/// Stamps a rendered StatefulSet against its live counterpart.
pub async fn prepare_statefulset(
    ctx: &Context,
    mco: &MultiClusterObservability,
    desired: &mut DynamicObject,
) -> Result<(), context::Error> {
    let name = desired.name_any();
    let live = match ctx.registry.get("StatefulSet") {
        Some(strategy) => {
            let api = ctx.dynamic_api(&strategy.resource, desired.metadata.namespace.as_deref());
            api.get_opt(&name).context(KubeSnafu).await?
        }
        None => None,
    };

    stamp_volume_claims(
        desired,
        live.as_ref(),
        mco.storage_size_for(&name),
        &mco.spec.storage_config.storage_class,
    );
    Ok(())
}

fn requested_storage(claim: &PersistentVolumeClaim) -> Option<&str> {
    claim
        .spec
        .as_ref()
        .and_then(|spec| spec.resources.as_ref())
        .and_then(|resources| resources.requests.as_ref())
        .and_then(|requests| requests.get("storage"))
        .map(|quantity| quantity.0.as_str())
}

/// Raises the request of every claim of `statefulsets` that is smaller than the configured
/// size. Claims are never shrunk. Returns the names of the claims that were resized.
pub async fn grow_volume_claims(
    ctx: &Context,
    mco: &MultiClusterObservability,
    statefulsets: &[&str],
) -> Result<Vec<String>, context::Error> {
    let namespace = ctx.config.namespace.as_str();
    let claims = ctx.list::<PersistentVolumeClaim>(namespace, None).await?;
    let mut resized = Vec::new();

    for statefulset in statefulsets {
        let Some(size) = mco.storage_size_for(statefulset) else {
            continue;
        };
        let Some(wanted) = storage_bytes(size) else {
            warn!("cannot parse storage size {} of {}", size, statefulset);
            continue;
        };

        let prefix = format!("{CLAIM_TEMPLATE}-{statefulset}-");
        for claim in claims.iter().filter(|c| c.name_any().starts_with(&prefix)) {
            match requested_storage(claim).and_then(storage_bytes) {
                Some(current) if current < wanted => {}
                _ => continue,
            }

            let mut claim = claim.clone();
            if let Some(requests) = claim
                .spec
                .as_mut()
                .and_then(|spec| spec.resources.as_mut())
                .and_then(|resources| resources.requests.as_mut())
            {
                requests.insert("storage".to_string(), Quantity(size.to_string()));
            }

            info!("growing {} to {}", claim.name_any(), size);
            ctx.replace(&claim, namespace).await?;
            resized.push(claim.name_any());
        }
    }

    Ok(resized)
}
