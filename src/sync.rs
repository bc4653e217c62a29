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

//! Get-or-create-or-update for single objects, writing only on divergence.

use crate::context::{self, Context, KubeSnafu};
use crate::types;
use kube::api::{DeleteParams, DynamicObject, ListParams, PostParams};
use snafu::futures::TryFutureExt;
use snafu::{OptionExt, Snafu};
use strum::Display;
use tracing::{debug, info};

pub mod registry;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("no sync strategy registered for kind '{}'", kind))]
    UnsupportedKind { kind: String },

    #[snafu(display("kinds without a sync strategy: {}", kinds.join(", ")))]
    IncompleteRegistry { kinds: Vec<String> },

    #[snafu(display("{} object has no name", kind))]
    MissingName { kind: String },

    #[snafu(transparent)]
    Context { source: context::Error },

    #[snafu(transparent)]
    Types { source: types::error::Error },

    #[snafu(transparent)]
    Serde { source: serde_json::Error },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SyncOutcome {
    Created,
    Updated,
    Unchanged,
}

pub fn kind_of(object: &DynamicObject) -> &str {
    object.types.as_ref().map(|t| t.kind.as_str()).unwrap_or_default()
}

/// Converts any serializable API object into its untyped form.
pub fn to_dynamic<T: serde::Serialize>(object: &T) -> Result<DynamicObject, Error> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

/// Makes the live object match `desired` for the fields its kind owns.
///
/// A create that loses a race against another writer re-reads the winner and
/// compares against it. Updates carry the live resourceVersion, so a concurrent
/// write surfaces as a conflict instead of being overwritten.
pub async fn sync_object(ctx: &Context, desired: &DynamicObject) -> Result<SyncOutcome, Error> {
    let kind = kind_of(desired);
    let strategy = ctx
        .registry
        .get(kind)
        .context(UnsupportedKindSnafu { kind })?;
    let name = desired
        .metadata
        .name
        .as_deref()
        .context(MissingNameSnafu { kind })?;

    let namespace = match (strategy.namespaced, desired.metadata.namespace.as_deref()) {
        (true, Some(ns)) => Some(ns),
        (true, None) => return Err(types::error::Error::NoNamespace.into()),
        (false, _) => None,
    };
    let api = ctx.dynamic_api(&strategy.resource, namespace);

    let live = match api.get_opt(name).context(KubeSnafu).await? {
        Some(live) => live,
        None => match api.create(&PostParams::default(), desired).context(KubeSnafu).await {
            Ok(_) => {
                info!("created {} {}/{}", kind, namespace.unwrap_or_default(), name);
                return Ok(SyncOutcome::Created);
            }
            Err(e) if e.is_already_exists() => {
                debug!("{} {} was created concurrently, comparing", kind, name);
                api.get(name).context(KubeSnafu).await?
            }
            Err(e) => return Err(e.into()),
        },
    };

    let desired_value = serde_json::to_value(desired)?;
    let live_value = serde_json::to_value(&live)?;
    if strategy.matches(&desired_value, &live_value) {
        debug!("{} {} is up to date, skip update", kind, name);
        return Ok(SyncOutcome::Unchanged);
    }

    let updated: DynamicObject =
        serde_json::from_value(strategy.merge_into(&desired_value, live_value))?;
    api.replace(name, &PostParams::default(), &updated)
        .context(KubeSnafu)
        .await?;
    info!("updated {} {}/{}", kind, namespace.unwrap_or_default(), name);
    Ok(SyncOutcome::Updated)
}

/// Deletes one object of a registered kind. Returns false when it was already gone.
pub async fn delete_object(
    ctx: &Context,
    kind: &str,
    name: &str,
    namespace: Option<&str>,
) -> Result<bool, Error> {
    let strategy = ctx
        .registry
        .get(kind)
        .context(UnsupportedKindSnafu { kind })?;
    let namespace = if strategy.namespaced { namespace } else { None };
    let api = ctx.dynamic_api(&strategy.resource, namespace);

    let deleted = context::ignore_not_found(
        api.delete(name, &DeleteParams::default())
            .context(KubeSnafu)
            .await,
    )?;
    if deleted {
        info!("deleted {} {}/{}", kind, namespace.unwrap_or_default(), name);
    }
    Ok(deleted)
}

/// Deletes every object of the registered kinds matching `selector`: namespaced kinds
/// within `namespace`, cluster-scoped kinds cluster-wide.
pub async fn prune_labelled(ctx: &Context, namespace: &str, selector: &str) -> Result<usize, Error> {
    let mut deleted = 0;
    for (kind, strategy) in ctx.registry.kinds() {
        let scope = strategy.namespaced.then_some(namespace);
        let api = ctx.dynamic_api(&strategy.resource, scope);
        let objects = api
            .list(&ListParams::default().labels(selector))
            .context(KubeSnafu)
            .await?;

        for object in objects.items {
            let Some(name) = object.metadata.name.as_deref() else {
                continue;
            };
            if delete_object(ctx, kind, name, scope).await? {
                deleted += 1;
            }
        }
    }
    Ok(deleted)
}

/// Fails when any of `kinds` lacks a strategy, so unknown kinds are caught at startup.
pub fn ensure_registered<'a>(
    registry: &registry::KindRegistry,
    kinds: impl IntoIterator<Item = &'a str>,
) -> Result<(), Error> {
    let kinds = registry.missing(kinds);
    if kinds.is_empty() {
        Ok(())
    } else {
        IncompleteRegistrySnafu { kinds }.fail()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{test_context, MockApi};
    use serde_json::json;

    fn config_map(data: serde_json::Value) -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "settings", "namespace": "obs", "labels": {"app": "obs"}},
            "data": data,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_sync_object_creates_then_skips_then_updates() {
        let api = MockApi::new();
        let ctx = test_context(&api);

        let desired = config_map(json!({"a": "1"}));
        assert_eq!(sync_object(&ctx, &desired).await.unwrap(), SyncOutcome::Created);

        let writes = api.write_count();
        assert_eq!(sync_object(&ctx, &desired).await.unwrap(), SyncOutcome::Unchanged);
        assert_eq!(api.write_count(), writes);

        let changed = config_map(json!({"a": "2"}));
        assert_eq!(sync_object(&ctx, &changed).await.unwrap(), SyncOutcome::Updated);
        let live = api.get("v1", "configmaps", Some("obs"), "settings").unwrap();
        assert_eq!(live["data"], json!({"a": "2"}));
        assert_eq!(live["metadata"]["labels"]["app"], "obs");
    }

    #[tokio::test]
    async fn test_sync_object_treats_concurrent_create_as_existing() {
        let api = MockApi::new();
        api.insert(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "settings", "namespace": "obs", "labels": {"app": "obs"}},
            "data": {"a": "1"},
        }));
        api.hide_next_get();
        let ctx = test_context(&api);

        let outcome = sync_object(&ctx, &config_map(json!({"a": "1"}))).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_sync_object_rejects_unregistered_kind() {
        let api = MockApi::new();
        let ctx = test_context(&api);
        let widget: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "example.com/v1",
            "kind": "Widget",
            "metadata": {"name": "w", "namespace": "obs"},
        }))
        .unwrap();

        assert!(matches!(
            sync_object(&ctx, &widget).await,
            Err(Error::UnsupportedKind { .. })
        ));
        assert_eq!(api.write_count(), 0);
    }

    #[tokio::test]
    async fn test_prune_labelled_only_removes_matching_objects() {
        let api = MockApi::new();
        let ctx = test_context(&api);
        let owned = config_map(json!({"a": "1"}));
        sync_object(&ctx, &owned).await.unwrap();
        api.insert(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "foreign", "namespace": "obs"},
        }));

        let deleted = prune_labelled(&ctx, "obs", "app=obs").await.unwrap();
        assert_eq!(deleted, 1);
        assert!(api.get("v1", "configmaps", Some("obs"), "settings").is_none());
        assert!(api.get("v1", "configmaps", Some("obs"), "foreign").is_some());
    }

    #[test]
    fn test_ensure_registered_lists_missing_kinds() {
        let registry = registry::KindRegistry::standard();
        assert!(ensure_registered(&registry, ["Secret"]).is_ok());
        let err = ensure_registered(&registry, ["Secret", "Widget"]).unwrap_err();
        assert!(err.to_string().contains("Widget"));
    }
}
