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

//! Folds hub health checks into the root resource's conditions.

use crate::bundle;
use crate::constants::hub;
use crate::context::{self, Context};
use crate::types::v1beta2::observability::MultiClusterObservability;
use crate::types::v1beta2::status::{Condition, ConditionStatus, Status};
use crate::utils;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Secret;
use serde_json::Value;
use snafu::Snafu;
use strum::{AsRefStr, Display};
use tracing::{info, warn};

pub const INSTALLING: &str = "Installing";
pub const READY: &str = "Ready";
pub const FAILED: &str = "Failed";
pub const METRICS_DISABLED: &str = "MetricsDisabled";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(transparent)]
    Context { source: context::Error },

    #[snafu(transparent)]
    Bundle { source: bundle::Error },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, AsRefStr)]
pub enum FailureReason {
    ObjectStorageSecretNotFound,
    ObjectStorageConfInvalid,
    CertificateInvalid,
    AllowlistInvalid,
    DeploymentNotFound,
    DeploymentNotReady,
    StatefulSetNotFound,
    StatefulSetNotReady,
}

/// The first check that did not pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Failure {
    pub reason: FailureReason,
    pub message: String,
}

impl Failure {
    pub fn new(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatusOutcome {
    Ready,
    Failed(FailureReason),
    /// The write lost to a concurrent writer twice; retry shortly.
    Conflict,
}

/// Checks an object storage configuration: `type` plus the fields that type needs.
pub fn validate_object_storage(text: &str) -> Result<(), String> {
    let conf: Value = serde_yaml_ng::from_str(text).map_err(|e| format!("invalid YAML: {e}"))?;
    let kind = conf
        .get("type")
        .and_then(Value::as_str)
        .ok_or("missing 'type'")?
        .to_lowercase();
    let config = conf
        .get("config")
        .filter(|c| c.is_object())
        .ok_or("missing 'config'")?;

    let required: &[&str] = match kind.as_str() {
        "s3" => &["bucket", "endpoint"],
        "gcs" => &["bucket", "service_account"],
        "azure" => &["storage_account", "storage_account_key", "container"],
        other => return Err(format!("unsupported type '{other}'")),
    };

    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|field| {
            config
                .get(*field)
                .and_then(Value::as_str)
                .is_none_or(|v| v.trim().is_empty())
        })
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(format!("{kind} config is missing {}", missing.join(", ")))
    }
}

fn ready_replicas(status: Option<i32>) -> bool {
    status.unwrap_or_default() >= 1
}

async fn check_object_storage(ctx: &Context, mco: &MultiClusterObservability) -> Result<Option<Failure>, Error> {
    use FailureReason::*;

    let Some(reference) = mco.spec.storage_config.metric_object_storage.as_ref() else {
        return Ok(Some(Failure::new(
            ObjectStorageSecretNotFound,
            "spec.storageConfig.metricObjectStorage is not set",
        )));
    };

    let namespace = &ctx.config.namespace;
    let Some(secret) = ctx.get_opt::<Secret>(&reference.name, namespace).await? else {
        return Ok(Some(Failure::new(
            ObjectStorageSecretNotFound,
            format!("secret {namespace}/{} not found", reference.name),
        )));
    };

    let Some(text) = crate::bundle::secret_string(&secret, &reference.key) else {
        return Ok(Some(Failure::new(
            ObjectStorageConfInvalid,
            format!("secret {} has no key '{}'", reference.name, reference.key),
        )));
    };

    Ok(validate_object_storage(&text)
        .err()
        .map(|message| Failure::new(ObjectStorageConfInvalid, message)))
}

async fn check_allowlist(ctx: &Context) -> Result<Option<Failure>, Error> {
    match bundle::read_allowlist(ctx, &ctx.config.namespace).await {
        Ok(_) => Ok(None),
        // rendered with the hub stack; its absence is not a user error
        Err(bundle::Error::DefaultAllowlistMissing { .. }) => Ok(None),
        Err(bundle::Error::Allowlist { source }) => Ok(Some(Failure::new(
            FailureReason::AllowlistInvalid,
            source.to_string(),
        ))),
        Err(e) => Err(e.into()),
    }
}

async fn check_deployments(ctx: &Context) -> Result<Option<Failure>, Error> {
    for name in hub::DEPLOYMENTS {
        match ctx.get_opt::<Deployment>(name, &ctx.config.namespace).await? {
            None => {
                return Ok(Some(Failure::new(
                    FailureReason::DeploymentNotFound,
                    format!("deployment {name} not found"),
                )));
            }
            Some(d) if !ready_replicas(d.status.as_ref().and_then(|s| s.ready_replicas)) => {
                return Ok(Some(Failure::new(
                    FailureReason::DeploymentNotReady,
                    format!("deployment {name} has no ready replica"),
                )));
            }
            Some(_) => {}
        }
    }
    Ok(None)
}

async fn check_statefulsets(ctx: &Context) -> Result<Option<Failure>, Error> {
    for name in hub::STATEFULSETS {
        match ctx.get_opt::<StatefulSet>(name, &ctx.config.namespace).await? {
            None => {
                return Ok(Some(Failure::new(
                    FailureReason::StatefulSetNotFound,
                    format!("statefulset {name} not found"),
                )));
            }
            Some(s) if !ready_replicas(s.status.as_ref().and_then(|s| s.ready_replicas)) => {
                return Ok(Some(Failure::new(
                    FailureReason::StatefulSetNotReady,
                    format!("statefulset {name} has no ready replica"),
                )));
            }
            Some(_) => {}
        }
    }
    Ok(None)
}

/// Runs the checks in priority order and stops at the first failure.
pub async fn evaluate(ctx: &Context, mco: &MultiClusterObservability) -> Result<Option<Failure>, Error> {
    if let Some(failure) = check_object_storage(ctx, mco).await? {
        return Ok(Some(failure));
    }
    if let Some(failure) = check_allowlist(ctx).await? {
        return Ok(Some(failure));
    }
    if let Some(failure) = check_deployments(ctx).await? {
        return Ok(Some(failure));
    }
    check_statefulsets(ctx).await
}

fn condition(type_: &str, reason: &str, message: &str, generation: Option<i64>, now: &str) -> Condition {
    Condition {
        type_: type_.to_string(),
        status: ConditionStatus::True,
        reason: reason.to_string(),
        message: message.to_string(),
        observed_generation: generation,
        last_transition_time: now.to_string(),
    }
}

/// Applies one evaluation to a status. Replayable onto a freshly read status.
pub fn apply_conditions(
    status: &mut Status,
    failure: Option<&Failure>,
    metrics_enabled: bool,
    generation: Option<i64>,
    now: &str,
) {
    status.set_condition(condition(
        INSTALLING,
        INSTALLING,
        "Installation is in progress",
        generation,
        now,
    ));

    if metrics_enabled {
        status.remove_condition(METRICS_DISABLED);
    } else {
        status.set_condition(condition(
            METRICS_DISABLED,
            METRICS_DISABLED,
            "Metrics collection is disabled for managed clusters",
            generation,
            now,
        ));
    }

    match failure {
        Some(failure) => {
            status.set_condition(condition(
                FAILED,
                failure.reason.as_ref(),
                &failure.message,
                generation,
                now,
            ));
            status.remove_condition(READY);
        }
        None => {
            status.set_condition(condition(
                READY,
                READY,
                "Observability components are deployed and running",
                generation,
                now,
            ));
            status.remove_condition(FAILED);
        }
    }
}

/// Evaluates the hub and writes the resulting conditions.
pub async fn update(ctx: &Context, mco: &MultiClusterObservability) -> Result<StatusOutcome, Error> {
    let failure = evaluate(ctx, mco).await?;
    write(ctx, mco, failure).await
}

/// Records a failure found outside the health checks, such as unusable certificate
/// material, without evaluating the rest of the hub.
pub async fn record_failure(
    ctx: &Context,
    mco: &MultiClusterObservability,
    failure: Failure,
) -> Result<StatusOutcome, Error> {
    write(ctx, mco, Some(failure)).await
}

async fn write(
    ctx: &Context,
    mco: &MultiClusterObservability,
    failure: Option<Failure>,
) -> Result<StatusOutcome, Error> {
    let metrics_enabled = mco.spec.observability_addon_spec.enable_metrics;
    let generation = mco.metadata.generation;
    let now = utils::now_rfc3339();

    let written = ctx
        .update_status(mco, |status| {
            apply_conditions(status, failure.as_ref(), metrics_enabled, generation, &now)
        })
        .await;

    match written {
        Ok(_) => {}
        Err(e) if e.is_conflict() => {
            warn!("status of {} still conflicts after retry, requeue", mco.name());
            return Ok(StatusOutcome::Conflict);
        }
        Err(e) => return Err(e.into()),
    }

    Ok(match failure {
        Some(failure) => {
            info!("{} is not ready: {}: {}", mco.name(), failure.reason, failure.message);
            StatusOutcome::Failed(failure.reason)
        }
        None => StatusOutcome::Ready,
    })
}
