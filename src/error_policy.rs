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

use crate::context::Context;
use crate::reconcile::Error;
use crate::types::v1beta2::observability::MultiClusterObservability;
use kube::runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

pub const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Shared by both controllers: a vanished object waits for the next change, anything
/// else is retried.
pub fn error_policy(object: Arc<MultiClusterObservability>, error: &Error, _ctx: Arc<Context>) -> Action {
    if error.is_not_found() {
        debug!("{} not found, waiting for changes", object.name());
        Action::await_change()
    } else {
        error!("reconcile of {} failed: {}", object.name(), error);
        Action::requeue(RETRY_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{test_context, test_mco, MockApi};

    fn not_found() -> crate::context::Error {
        crate::context::Error::Kube {
            source: kube::Error::Api(
                serde_json::from_value(serde_json::json!({
                    "status": "Failure",
                    "message": "not found",
                    "reason": "NotFound",
                    "code": 404,
                }))
                .unwrap(),
            ),
        }
    }

    #[tokio::test]
    async fn test_not_found_awaits_change() {
        let ctx = Arc::new(test_context(&MockApi::new()));
        let error = Error::from(not_found());
        assert_eq!(error_policy(Arc::new(test_mco()), &error, ctx), Action::await_change());
    }

    #[tokio::test]
    async fn test_other_errors_requeue() {
        let ctx = Arc::new(test_context(&MockApi::new()));
        let error = Error::Fleet {
            failures: vec!["cluster-a: boom".to_string()],
        };
        assert_eq!(
            error_policy(Arc::new(test_mco()), &error, ctx),
            Action::requeue(RETRY_DELAY)
        );
    }
}
