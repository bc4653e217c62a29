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

use crate::config::OperatorConfig;
use crate::constants::OPERATOR_NAME;
use crate::predicates::LastObservedName;
use crate::render::Renderer;
use crate::sync::registry::KindRegistry;
use crate::types;
use crate::types::v1beta2::observability::MultiClusterObservability;
use crate::types::v1beta2::status::Status;
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::api::{ApiResource, DeleteParams, DynamicObject, ListParams, PostParams};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Resource, ResourceExt, api::Api};
use serde::Serialize;
use serde::de::DeserializeOwned;
use snafu::Snafu;
use snafu::futures::TryFutureExt;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Kubernetes API error: {}", source))]
    Kube { source: kube::Error },

    #[snafu(display("record event error: {}", source))]
    Record { source: kube::Error },

    #[snafu(transparent)]
    Types { source: types::error::Error },

    #[snafu(transparent)]
    Serde { source: serde_json::Error },
}

impl Error {
    fn api_status(&self) -> Option<(u16, &str)> {
        match self {
            Error::Kube {
                source: kube::Error::Api(ae),
            } => Some((ae.code, ae.reason.as_str())),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.api_status(), Some((404, _)))
    }

    /// An optimistic-concurrency failure, as opposed to a create racing another creator.
    pub fn is_conflict(&self) -> bool {
        matches!(self.api_status(), Some((409, reason)) if reason != "AlreadyExists")
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self.api_status(), Some((409, "AlreadyExists")))
    }
}

pub struct Context {
    pub(crate) client: kube::Client,
    pub(crate) recorder: Recorder,
    pub(crate) config: OperatorConfig,
    pub(crate) registry: KindRegistry,
    pub(crate) renderer: Arc<dyn Renderer>,
    pub(crate) last_observed: LastObservedName,
}

impl Context {
    pub fn new(client: kube::Client, config: OperatorConfig, renderer: Arc<dyn Renderer>) -> Self {
        let reporter = Reporter {
            controller: OPERATOR_NAME.into(),
            instance: std::env::var("HOSTNAME").ok(),
        };

        let recorder = Recorder::new(client.clone(), reporter);
        Self {
            client,
            recorder,
            config,
            registry: KindRegistry::standard(),
            renderer,
            last_observed: LastObservedName::default(),
        }
    }

    /// send event
    #[inline]
    pub async fn record<K>(
        &self,
        resource: &K,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) -> Result<(), Error>
    where
        K: Resource<DynamicType = ()>,
    {
        self.recorder
            .publish(
                &Event {
                    type_: event_type,
                    reason: reason.to_owned(),
                    note: Some(message.into()),
                    action: "Reconcile".into(),
                    secondary: None,
                },
                &resource.object_ref(&()),
            )
            .context(RecordSnafu)
            .await
    }

    /// Replaces the root's status with `mutate` applied to it.
    ///
    /// On a write conflict the latest object is fetched and `mutate` is applied again, once.
    /// Nothing is written when the mutated status equals the live one.
    pub async fn update_status<F>(
        &self,
        resource: &MultiClusterObservability,
        mutate: F,
    ) -> Result<MultiClusterObservability, Error>
    where
        F: Fn(&mut Status),
    {
        let api: Api<MultiClusterObservability> = Api::all(self.client.clone());
        let name = resource.name_any();

        let update_func = async |mco: &MultiClusterObservability| {
            let mut status = mco.status.clone().unwrap_or_default();
            mutate(&mut status);
            if mco.status.as_ref() == Some(&status) {
                debug!("status of {} unchanged, skip update", name);
                return Ok(mco.clone());
            }

            let mut body = mco.clone();
            body.status = Some(status);
            api.replace_status(&name, &PostParams::default(), &body)
                .context(KubeSnafu)
                .await
        };

        match update_func(resource).await {
            Err(e) if e.is_conflict() => {}
            other => return other,
        }

        info!("status update failed due to conflict, retrieve the latest resource and retry.");

        let new_one = api.get(&name).context(KubeSnafu).await?;
        update_func(&new_one).await
    }

    pub async fn delete<T>(&self, name: &str, namespace: &str) -> Result<bool, Error>
    where
        T: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);
        ignore_not_found(
            api.delete(name, &DeleteParams::default())
                .context(KubeSnafu)
                .await,
        )
    }

    pub async fn get<T>(&self, name: &str, namespace: &str) -> Result<T, Error>
    where
        T: Clone + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);
        api.get(name).context(KubeSnafu).await
    }

    pub async fn get_opt<T>(&self, name: &str, namespace: &str) -> Result<Option<T>, Error>
    where
        T: Clone + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).context(KubeSnafu).await
    }

    pub async fn create<T>(&self, resource: &T, namespace: &str) -> Result<T, Error>
    where
        T: Clone + Serialize + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), resource)
            .context(KubeSnafu)
            .await
    }

    /// Writes `resource` over the live object. `resource` must carry the live resourceVersion.
    pub async fn replace<T>(&self, resource: &T, namespace: &str) -> Result<T, Error>
    where
        T: Clone + Serialize + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);
        api.replace(&resource.name_any(), &PostParams::default(), resource)
            .context(KubeSnafu)
            .await
    }

    pub async fn list<T>(&self, namespace: &str, selector: Option<&str>) -> Result<Vec<T>, Error>
    where
        T: Clone + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);
        let params = match selector {
            Some(selector) => ListParams::default().labels(selector),
            None => ListParams::default(),
        };
        Ok(api.list(&params).context(KubeSnafu).await?.items)
    }

    /// Lists across every namespace.
    pub async fn list_all<T>(&self, selector: Option<&str>) -> Result<Vec<T>, Error>
    where
        T: Clone + DeserializeOwned + Debug + Resource,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::all(self.client.clone());
        let params = match selector {
            Some(selector) => ListParams::default().labels(selector),
            None => ListParams::default(),
        };
        Ok(api.list(&params).context(KubeSnafu).await?.items)
    }

    pub async fn get_cluster_opt<T>(&self, name: &str) -> Result<Option<T>, Error>
    where
        T: Clone + DeserializeOwned + Debug + Resource<Scope = ClusterResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::all(self.client.clone());
        api.get_opt(name).context(KubeSnafu).await
    }

    pub async fn create_cluster<T>(&self, resource: &T) -> Result<T, Error>
    where
        T: Clone + Serialize + DeserializeOwned + Debug + Resource<Scope = ClusterResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::all(self.client.clone());
        api.create(&PostParams::default(), resource)
            .context(KubeSnafu)
            .await
    }

    pub async fn replace_cluster<T>(&self, resource: &T) -> Result<T, Error>
    where
        T: Clone + Serialize + DeserializeOwned + Debug + Resource<Scope = ClusterResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::all(self.client.clone());
        api.replace(&resource.name_any(), &PostParams::default(), resource)
            .context(KubeSnafu)
            .await
    }

    /// Untyped access for kinds resolved at runtime.
    pub fn dynamic_api(&self, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, resource),
            None => Api::all_with(self.client.clone(), resource),
        }
    }
}

/// Maps a NotFound delete to `Ok(false)`.
pub(crate) fn ignore_not_found<T>(result: Result<T, Error>) -> Result<bool, Error> {
    match result {
        Ok(_) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}
