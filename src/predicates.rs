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

//! Declarative filters attached to watch streams.

use crate::types::v1beta2::observability::MultiClusterObservability;
use kube::Resource;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use std::sync::{Arc, PoisonError, RwLock};

/// Accepts objects by namespace, name and label. Empty fields accept everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WatchFilter {
    pub namespace: Option<String>,
    pub names: Vec<String>,
    pub label: Option<(String, String)>,
}

impl WatchFilter {
    pub fn in_namespace(namespace: &str) -> Self {
        Self {
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }
    }

    pub fn named<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn labelled(mut self, key: &str, value: &str) -> Self {
        self.label = Some((key.to_string(), value.to_string()));
        self
    }

    pub fn accepts<K: Resource>(&self, object: &K) -> bool {
        let meta = object.meta();
        if self
            .namespace
            .as_ref()
            .is_some_and(|ns| meta.namespace.as_ref() != Some(ns))
        {
            return false;
        }
        if !self.names.is_empty()
            && !meta
                .name
                .as_ref()
                .is_some_and(|name| self.names.contains(name))
        {
            return false;
        }
        match &self.label {
            Some((key, value)) => meta
                .labels
                .as_ref()
                .and_then(|labels| labels.get(key))
                .is_some_and(|v| v == value),
            None => true,
        }
    }

    /// Server-side part of the filter. Names and namespace are checked client-side by `accepts`.
    pub fn watcher_config(&self) -> watcher::Config {
        match &self.label {
            Some((key, value)) => watcher::Config::default().labels(&format!("{key}={value}")),
            None => watcher::Config::default(),
        }
    }
}

/// Name of the root resource most recently seen by the hub controller.
///
/// Only the hub reconcile writes it; watch mappers read it to route secondary events.
#[derive(Clone, Debug, Default)]
pub struct LastObservedName(Arc<RwLock<Option<String>>>);

impl LastObservedName {
    pub fn record(&self, name: &str) {
        let mut guard = self.0.write().unwrap_or_else(PoisonError::into_inner);
        if guard.as_deref() != Some(name) {
            *guard = Some(name.to_string());
        }
    }

    pub fn clear(&self) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn get(&self) -> Option<String> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Maps an accepted secondary object to the root key, if a root has been seen.
    pub fn root_ref_for<K: Resource>(
        &self,
        filter: &WatchFilter,
        object: &K,
    ) -> Option<ObjectRef<MultiClusterObservability>> {
        if !filter.accepts(object) {
            return None;
        }
        self.get().map(|name| ObjectRef::new(&name))
    }
}
