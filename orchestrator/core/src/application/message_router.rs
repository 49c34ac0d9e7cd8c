// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Message Router
//!
//! Background worker draining the node's outgoing message queue.
//!
//! Unicast messages go to the local agent or are relayed unchanged to the
//! node hosting the destination. Broadcasts fan out from the sender's node
//! only: a broadcast whose sender is hosted here is relayed once to every
//! other active node and delivered to every other local agent; a broadcast
//! relayed in from elsewhere is delivered locally and goes no further.
//!
//! A failed delivery or relay is reflected to the sender as a
//! `DeliveryFailure` message, unless the failed message was one already.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use crate::application::membership::ClusterMembershipRegistry;
use crate::application::portfolio_store::{Route, SessionPortfolioStore};
use crate::application::work_queue::WorkQueue;
use crate::domain::message::Message;
use crate::domain::transport::{AgentClient, ClusterClient, TransportError};

pub struct MessageRouter {
    queue: WorkQueue<Message>,
    portfolios: Arc<SessionPortfolioStore>,
    membership: Arc<ClusterMembershipRegistry>,
    cluster: Arc<dyn ClusterClient>,
    agents: Arc<dyn AgentClient>,
}

impl MessageRouter {
    pub fn new(
        portfolios: Arc<SessionPortfolioStore>,
        membership: Arc<ClusterMembershipRegistry>,
        cluster: Arc<dyn ClusterClient>,
        agents: Arc<dyn AgentClient>,
    ) -> Self {
        Self {
            queue: WorkQueue::new(),
            portfolios,
            membership,
            cluster,
            agents,
        }
    }

    pub fn enqueue(&self, message: Message) -> bool {
        self.queue.push(message)
    }

    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let router = self.clone();
        tokio::spawn(async move { router.run().await })
    }

    pub fn stop(&self) {
        self.queue.close();
    }

    /// Messages waiting to be routed.
    pub fn backlog(&self) -> usize {
        self.queue.len()
    }

    async fn run(self: Arc<Self>) {
        debug!("Message router started");
        while let Some(message) = self.queue.pop().await {
            let session_id = message.session_id;
            if AssertUnwindSafe(self.route(message)).catch_unwind().await.is_err() {
                error!(session_id = %session_id, "Message routing panicked");
            }
        }
        debug!("Message router stopped");
    }

    pub async fn route(&self, message: Message) {
        if message.is_broadcast() {
            self.broadcast(message).await;
        } else {
            self.unicast(message).await;
        }
    }

    async fn unicast(&self, message: Message) {
        let outcome = match self.portfolios.route(message.session_id, message.to_id) {
            None => {
                trace!(
                    session_id = %message.session_id,
                    to_id = message.to_id,
                    "No route for message, dropped"
                );
                return;
            }
            Some(Route::Local(agent)) => self.agents.send(&agent, &message).await,
            Some(Route::Remote(node)) => self.cluster.relay_message(&node, &message).await,
        };
        match outcome {
            Ok(()) => metrics::counter!("visor_messages_routed_total").increment(1),
            Err(e) => self.reflect(&message, e),
        }
    }

    async fn broadcast(&self, message: Message) {
        let Some(scope) = self.portfolios.broadcast_scope(message.session_id, message.from_id) else {
            trace!(session_id = %message.session_id, "Broadcast for unknown session, dropped");
            return;
        };

        let mut deliveries: Vec<BoxFuture<'_, Result<(), TransportError>>> = Vec::new();
        if scope.sender_is_local {
            for node in self.membership.active_peers().await {
                let message = &message;
                deliveries.push(async move { self.cluster.relay_message(&node, message).await }.boxed());
            }
        }
        for agent in scope.local_targets {
            let message = &message;
            deliveries.push(async move { self.agents.send(&agent, message).await }.boxed());
        }

        for outcome in futures::future::join_all(deliveries).await {
            match outcome {
                Ok(()) => metrics::counter!("visor_messages_routed_total").increment(1),
                Err(e) => self.reflect(&message, e),
            }
        }
    }

    fn reflect(&self, message: &Message, error: TransportError) {
        metrics::counter!("visor_delivery_failures_total").increment(1);
        if message.is_delivery_failure() {
            warn!(
                session_id = %message.session_id,
                to_id = message.to_id,
                error = %error,
                "Delivery failure notice could not be delivered, dropped"
            );
            return;
        }
        warn!(
            session_id = %message.session_id,
            from_id = message.from_id,
            to_id = message.to_id,
            error = %error,
            "Message delivery failed, notifying sender"
        );
        self.queue.push(Message::delivery_failure(message));
    }
}
