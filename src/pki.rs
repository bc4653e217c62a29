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

//! The two trust domains: creation, renewal and restart of dependent workloads.
//!
//! Server domain: `observability-server-ca-certs` issues the hub ingestion endpoint's
//! certificate. Client domain: `observability-client-ca-certs` issues the hub's own
//! client certificate and one certificate per managed cluster.

use crate::constants::{certs, hub, labels, OPERATOR_NAME};
use crate::context::{self, Context};
use crate::types::ocm::placement::ClusterRef;
use crate::utils::{self, tls};
use authority::{CertRequest, KeyMaterial, Usage, Validity};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::runtime::events::EventType;
use snafu::{OptionExt, ResultExt, Snafu};
use std::collections::BTreeMap;
use strum::Display;
use tracing::{debug, info, warn};

pub mod authority;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("certificate secret {}/{} has no '{}'", namespace, name, key))]
    MissingKey {
        name: String,
        namespace: String,
        key: String,
    },

    #[snafu(display("certificate secret {}/{} is malformed: {}", namespace, name, source))]
    Malformed {
        name: String,
        namespace: String,
        source: authority::Error,
    },

    #[snafu(display("certificate secret {}/{} holds a mismatched key pair: {}", namespace, name, source))]
    KeyMismatch {
        name: String,
        namespace: String,
        source: tls::Error,
    },

    #[snafu(display("issuer secret {}/{} not found", namespace, name))]
    IssuerNotFound { name: String, namespace: String },

    #[snafu(transparent)]
    Authority { source: authority::Error },

    #[snafu(transparent)]
    Context { source: context::Error },
}

impl Error {
    /// The stored certificate material itself is unusable, as opposed to the API failing.
    pub fn is_invalid_material(&self) -> bool {
        matches!(
            self,
            Error::MissingKey { .. } | Error::Malformed { .. } | Error::KeyMismatch { .. }
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum CertOutcome {
    Created,
    Renewed,
    Unchanged,
}

/// A certificate issued by one of the CAs.
#[derive(Clone, Debug)]
pub struct LeafSpec<'a> {
    pub name: &'a str,
    pub namespace: &'a str,
    pub issuer_name: &'a str,
    pub issuer_namespace: &'a str,
    pub request: CertRequest,
    pub labels: BTreeMap<String, String>,
}

/// Deployments restarted when the certificate they mount is renewed.
pub const RESTART_DEPENDENCIES: [(&str, &str); 2] = [
    (certs::SERVER_CERT, hub::OBSERVATORIUM_API),
    (certs::GRAFANA_CERT, hub::RBAC_QUERY_PROXY),
];

pub(crate) fn managed_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(labels::MANAGED_BY.to_string(), OPERATOR_NAME.to_string())])
}

fn read_key(secret: &Secret, key: &str) -> Result<String> {
    let missing = || MissingKeySnafu {
        name: secret.metadata.name.clone().unwrap_or_default(),
        namespace: secret.metadata.namespace.clone().unwrap_or_default(),
        key,
    };
    let bytes = secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .with_context(missing)?;
    String::from_utf8(bytes.0.clone())
        .ok()
        .filter(|s| !s.is_empty())
        .with_context(missing)
}

/// Reads and validates the PEM material of a certificate secret.
pub fn key_material(secret: &Secret) -> Result<KeyMaterial> {
    let material = KeyMaterial {
        ca_crt: read_key(secret, certs::CA_CRT)?,
        tls_crt: read_key(secret, certs::TLS_CRT)?,
        tls_key: read_key(secret, certs::TLS_KEY)?,
    };

    let name = secret.metadata.name.clone().unwrap_or_default();
    let namespace = secret.metadata.namespace.clone().unwrap_or_default();
    Validity::of(&material.tls_crt).context(MalformedSnafu {
        name: name.clone(),
        namespace: namespace.clone(),
    })?;
    tls::x509_key_pair(&material.tls_crt, &material.tls_key)
        .context(KeyMismatchSnafu { name, namespace })?;

    Ok(material)
}

pub fn needs_renewal_at(secret: &Secret, now: i64) -> Result<bool> {
    let cert = read_key(secret, certs::TLS_CRT)?;
    let validity = Validity::of(&cert).context(MalformedSnafu {
        name: secret.metadata.name.clone().unwrap_or_default(),
        namespace: secret.metadata.namespace.clone().unwrap_or_default(),
    })?;
    Ok(validity.renewal_due(now))
}

/// True when the certificate in `secret` is within the last fifth of its validity.
pub fn needs_renewal(secret: &Secret) -> Result<bool> {
    needs_renewal_at(secret, chrono::Utc::now().timestamp())
}

pub fn new_secret(
    name: &str,
    namespace: &str,
    material: &KeyMaterial,
    labels: BTreeMap<String, String>,
) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        type_: Some("kubernetes.io/tls".to_string()),
        data: Some(BTreeMap::from([
            (
                certs::CA_CRT.to_string(),
                ByteString(material.ca_crt.clone().into_bytes()),
            ),
            (
                certs::TLS_CRT.to_string(),
                ByteString(material.tls_crt.clone().into_bytes()),
            ),
            (
                certs::TLS_KEY.to_string(),
                ByteString(material.tls_key.clone().into_bytes()),
            ),
        ])),
        ..Default::default()
    }
}

/// Recreates the secret so that its creation time marks the renewal.
async fn recreate(ctx: &Context, secret: &Secret, namespace: &str) -> Result<()> {
    let name = secret.metadata.name.clone().unwrap_or_default();
    ctx.delete::<Secret>(&name, namespace).await?;
    ctx.create(secret, namespace).await?;
    Ok(())
}

async fn store(ctx: &Context, secret: &Secret, namespace: &str) -> Result<CertOutcome> {
    match ctx.create(secret, namespace).await {
        Ok(_) => Ok(CertOutcome::Created),
        // another reconciler created it first, use theirs
        Err(e) if e.is_already_exists() => Ok(CertOutcome::Unchanged),
        Err(e) => Err(e.into()),
    }
}

pub async fn ensure_namespace(ctx: &Context, namespace: &str) -> Result<()> {
    if ctx.get_cluster_opt::<Namespace>(namespace).await?.is_some() {
        debug!("namespace {} already exists", namespace);
        return Ok(());
    }

    info!("creating namespace {}", namespace);
    let ns = Namespace {
        metadata: ObjectMeta {
            name: Some(namespace.to_string()),
            labels: Some(managed_labels()),
            ..Default::default()
        },
        ..Default::default()
    };
    match ctx.create_cluster(&ns).await {
        Err(e) if !e.is_already_exists() => Err(e.into()),
        _ => Ok(()),
    }
}

/// Creates the self-signed root CA `name` if absent, and renews it once due.
pub async fn ensure_ca(
    ctx: &Context,
    name: &str,
    namespace: &str,
    common_name: &str,
) -> Result<CertOutcome> {
    let live = ctx.get_opt::<Secret>(name, namespace).await?;

    let Some(live) = live else {
        info!("creating CA {}/{}", namespace, name);
        let material = authority::new_root_ca(common_name)?;
        let secret = new_secret(name, namespace, &material, managed_labels());
        return store(ctx, &secret, namespace).await;
    };

    key_material(&live)?;
    if !needs_renewal(&live)? {
        return Ok(CertOutcome::Unchanged);
    }

    info!("renewing CA {}/{}", namespace, name);
    let material = authority::new_root_ca(common_name)?;
    let secret = new_secret(name, namespace, &material, managed_labels());
    recreate(ctx, &secret, namespace).await?;
    Ok(CertOutcome::Renewed)
}

/// Issues the certificate described by `spec` if absent, and re-issues it when it is due
/// for renewal, was signed by a previous CA, or does not cover every requested host.
pub async fn ensure_leaf_cert(ctx: &Context, spec: &LeafSpec<'_>) -> Result<CertOutcome> {
    let issuer_secret = ctx
        .get_opt::<Secret>(spec.issuer_name, spec.issuer_namespace)
        .await?
        .context(IssuerNotFoundSnafu {
            name: spec.issuer_name,
            namespace: spec.issuer_namespace,
        })?;
    let issuer = key_material(&issuer_secret)?;

    let live = ctx.get_opt::<Secret>(spec.name, spec.namespace).await?;
    let Some(live) = live else {
        info!("issuing certificate {}/{}", spec.namespace, spec.name);
        let material = authority::issue(&issuer, &spec.request)?;
        let secret = new_secret(spec.name, spec.namespace, &material, spec.labels.clone());
        return store(ctx, &secret, spec.namespace).await;
    };

    let current = key_material(&live)?;
    let reason = if current.ca_crt != issuer.tls_crt {
        Some("issuer changed")
    } else if needs_renewal(&live)? {
        Some("expiring")
    } else if !spec.request.is_ca && !covers_hosts(&current, &spec.request)? {
        Some("hosts changed")
    } else {
        None
    };

    let Some(reason) = reason else {
        return Ok(CertOutcome::Unchanged);
    };

    info!("re-issuing certificate {}/{}: {}", spec.namespace, spec.name, reason);
    let material = authority::issue(&issuer, &spec.request)?;
    let secret = new_secret(spec.name, spec.namespace, &material, spec.labels.clone());
    recreate(ctx, &secret, spec.namespace).await?;
    Ok(CertOutcome::Renewed)
}

fn covers_hosts(material: &KeyMaterial, request: &CertRequest) -> Result<bool> {
    let sans = authority::subject_alt_names_of(&material.tls_crt)?;
    Ok(request
        .hosts
        .iter()
        .filter(|host| !host.is_empty())
        .all(|host| sans.contains(host)))
}

pub fn server_cert_hosts(namespace: &str, hub_host: Option<&str>) -> Vec<String> {
    let mut hosts = vec![
        hub::OBSERVATORIUM_API.to_string(),
        format!("{}.{}.svc", hub::OBSERVATORIUM_API, namespace),
    ];
    if let Some(host) = hub_host.filter(|h| !h.is_empty()) {
        hosts.push(host.to_string());
    }
    hosts
}

/// Builds both trust domains in order: server CA, server certificate, then the client
/// namespace, client CA and the hub's client certificate.
pub async fn ensure_hub_pki(
    ctx: &Context,
    hub_host: Option<&str>,
) -> Result<Vec<(String, CertOutcome)>> {
    let namespace = ctx.config.namespace.as_str();
    let client_ns = ctx.config.client_ca_namespace();
    let mut outcomes = Vec::new();

    let outcome = ensure_ca(ctx, certs::SERVER_CA, namespace, certs::SERVER_CA_CN).await?;
    outcomes.push((certs::SERVER_CA.to_string(), outcome));

    let server = LeafSpec {
        name: certs::SERVER_CERT,
        namespace,
        issuer_name: certs::SERVER_CA,
        issuer_namespace: namespace,
        request: CertRequest {
            common_name: certs::SERVER_CN.to_string(),
            organization: Some(certs::ORGANIZATION.to_string()),
            hosts: server_cert_hosts(namespace, hub_host),
            usage: Some(Usage::ServerAuth),
            ..Default::default()
        },
        labels: managed_labels(),
    };
    let outcome = ensure_leaf_cert(ctx, &server).await?;
    outcomes.push((certs::SERVER_CERT.to_string(), outcome));

    ensure_namespace(ctx, client_ns).await?;
    let outcome = ensure_ca(ctx, certs::CLIENT_CA, client_ns, certs::CLIENT_CA_CN).await?;
    outcomes.push((certs::CLIENT_CA.to_string(), outcome));

    let grafana = LeafSpec {
        name: certs::GRAFANA_CERT,
        namespace,
        issuer_name: certs::CLIENT_CA,
        issuer_namespace: client_ns,
        request: CertRequest {
            common_name: certs::GRAFANA_CN.to_string(),
            organization: Some(certs::ORGANIZATION.to_string()),
            usage: Some(Usage::ClientAuth),
            ..Default::default()
        },
        labels: managed_labels(),
    };
    let outcome = ensure_leaf_cert(ctx, &grafana).await?;
    outcomes.push((certs::GRAFANA_CERT.to_string(), outcome));

    Ok(outcomes)
}

/// The client certificate a managed cluster presents to the hub, kept in its namespace.
pub async fn ensure_cluster_cert(ctx: &Context, cluster: &ClusterRef) -> Result<CertOutcome> {
    let mut labels = managed_labels();
    labels.insert(labels::CLUSTER.to_string(), cluster.cluster_name.clone());

    let spec = LeafSpec {
        name: certs::CLUSTER_CLIENT_CERT,
        namespace: &cluster.cluster_namespace,
        issuer_name: certs::CLIENT_CA,
        issuer_namespace: ctx.config.client_ca_namespace(),
        request: CertRequest {
            common_name: cluster.cluster_name.clone(),
            organization: Some(certs::ORGANIZATION.to_string()),
            organizational_unit: Some(certs::FLEET_OU.to_string()),
            usage: Some(Usage::ClientAuth),
            ..Default::default()
        },
        labels,
    };
    ensure_leaf_cert(ctx, &spec).await
}

/// Deployment restart stamp in effect: the label value, else the deployment's creation time.
fn restart_mark(deployment: &Deployment) -> Option<i64> {
    deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.template.metadata.as_ref())
        .and_then(|meta| meta.labels.as_ref())
        .and_then(|labels| labels.get(labels::CERT_RESTARTED))
        .and_then(|stamp| stamp.parse().ok())
        .or_else(|| {
            deployment
                .metadata
                .creation_timestamp
                .as_ref()
                .and_then(utils::unix_seconds)
        })
}

/// Stamps the pod template of each dependent Deployment whose certificate secret is newer
/// than its last restart. Returns the restarted Deployments.
pub async fn restart_dependents(ctx: &Context, namespace: &str) -> Result<Vec<String>> {
    let mut restarted = Vec::new();

    for (secret_name, deployment_name) in RESTART_DEPENDENCIES {
        let Some(secret) = ctx.get_opt::<Secret>(secret_name, namespace).await? else {
            continue;
        };
        let Some(mut deployment) = ctx.get_opt::<Deployment>(deployment_name, namespace).await?
        else {
            continue;
        };

        let issued = secret
            .metadata
            .creation_timestamp
            .as_ref()
            .and_then(utils::unix_seconds);
        let (Some(issued), Some(mark)) = (issued, restart_mark(&deployment)) else {
            continue;
        };
        if issued <= mark {
            continue;
        }

        let now = chrono::Utc::now().timestamp().max(issued);
        if let Some(spec) = deployment.spec.as_mut() {
            spec.template
                .metadata
                .get_or_insert_with(Default::default)
                .labels
                .get_or_insert_with(Default::default)
                .insert(labels::CERT_RESTARTED.to_string(), now.to_string());
        }

        info!("restarting {} after renewal of {}", deployment_name, secret_name);
        let deployment = ctx.replace(&deployment, namespace).await?;
        if let Err(error) = ctx
            .record(
                &deployment,
                EventType::Normal,
                "CertificateRenewed",
                &format!("restarted after {} was renewed", secret_name),
            )
            .await
        {
            warn!("failed to publish event: {}", error);
        }
        restarted.push(deployment_name.to_string());
    }

    Ok(restarted)
}
