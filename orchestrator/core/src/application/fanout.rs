// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Best-effort notification of several nodes at once.
//!
//! Every target gets its own task so that one slow or unreachable node never
//! holds up the others. Failures are logged and dropped, there is no retry.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::cluster::NodeAddress;
use crate::domain::transport::TransportError;

/// Start one independent call per target.
pub fn notify_each<F, Fut>(targets: Vec<NodeAddress>, operation: &'static str, call: F) -> Vec<JoinHandle<()>>
where
    F: Fn(NodeAddress) -> Fut,
    Fut: Future<Output = Result<(), TransportError>> + Send + 'static,
{
    targets
        .into_iter()
        .map(|node| {
            let pending = call(node.clone());
            tokio::spawn(async move {
                match pending.await {
                    Ok(()) => debug!(node = %node, operation, "Notified node"),
                    Err(e) => warn!(node = %node, operation, error = %e, "Node notification failed"),
                }
            })
        })
        .collect()
}

/// Wait for `handles`, giving up on stragglers after `limit`. Abandoned calls
/// keep running to completion in the background.
pub async fn await_all(handles: Vec<JoinHandle<()>>, limit: Duration, operation: &'static str) {
    let total = handles.len();
    if total == 0 {
        return;
    }
    if tokio::time::timeout(limit, futures::future::join_all(handles)).await.is_err() {
        warn!(operation, total, ?limit, "Gave up waiting for node notifications");
    }
}
