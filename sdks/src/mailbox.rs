// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Mailbox
//!
//! FIFO of delivered [`Message`]s with blocking, predicate-based retrieval.
//! The oldest matching message wins. A receive that runs out of time, is
//! abandoned by the abort visitor, or finds the mailbox closed returns a
//! [`Message::null_message`] instead of failing.
//!
//! While blocked, a receive wakes every abort poll interval and asks the
//! abort visitor (if any) whether to give up, passing the number of polls
//! so far.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info};

use visor_core::domain::message::Message;
use visor_core::domain::session::{AgentId, SessionId};

pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(3600);
pub const DEFAULT_FILTERED_RECEIVE_TIMEOUT: Duration = Duration::from_secs(90);
pub const DEFAULT_ABORT_POLL_INTERVAL: Duration = Duration::from_millis(1000);
pub const MIN_ABORT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const MAX_ABORT_POLL_INTERVAL: Duration = Duration::from_millis(3_600_000);

/// Called with the poll count; `true` abandons the receive.
pub type AbortVisitor = Arc<dyn Fn(u32) -> bool + Send + Sync>;

pub struct AgentMailbox {
    session_id: SessionId,
    agent_id: AgentId,
    queue: Mutex<VecDeque<Message>>,
    arrived: Notify,
    accepting: AtomicBool,
    abort_visitor: RwLock<Option<AbortVisitor>>,
    abort_poll_ms: AtomicU64,
}

impl std::fmt::Debug for AgentMailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentMailbox")
            .field("session_id", &self.session_id)
            .field("agent_id", &self.agent_id)
            .field("queued", &self.len())
            .field("accepting", &self.is_accepting())
            .finish()
    }
}

impl AgentMailbox {
    pub fn new(session_id: SessionId, agent_id: AgentId) -> Self {
        Self {
            session_id,
            agent_id,
            queue: Mutex::new(VecDeque::new()),
            arrived: Notify::new(),
            accepting: AtomicBool::new(true),
            abort_visitor: RwLock::new(None),
            abort_poll_ms: AtomicU64::new(DEFAULT_ABORT_POLL_INTERVAL.as_millis() as u64),
        }
    }

    pub fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    /// Queue a delivered message. Log shuttle lines go to the local logger
    /// instead. Returns `false` when the mailbox no longer accepts messages.
    pub fn enqueue(&self, message: Message) -> bool {
        if !self.is_accepting() {
            debug!(agent_id = self.agent_id, message_type = message.message_type, "Mailbox closed, message ignored");
            return false;
        }
        if message.is_log_shuttle() {
            let line = match &message.content {
                serde_json::Value::String(line) => line.clone(),
                other => other.to_string(),
            };
            info!(target: "visor::shuttle", from_id = message.from_id, "{}", line);
            return true;
        }
        self.queue.lock().push_back(message);
        self.arrived.notify_waiters();
        true
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Stop or resume accepting messages. Closing wakes blocked receivers,
    /// which then return a null message.
    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::Release);
        if !accepting {
            self.arrived.notify_waiters();
        }
    }

    pub fn set_abort_visitor(&self, visitor: impl Fn(u32) -> bool + Send + Sync + 'static) {
        *self.abort_visitor.write() = Some(Arc::new(visitor));
    }

    pub fn clear_abort_visitor(&self) {
        *self.abort_visitor.write() = None;
    }

    /// Clamped to 100 ms ..= 1 hour.
    pub fn set_abort_poll_interval(&self, interval: Duration) {
        let clamped = interval.clamp(MIN_ABORT_POLL_INTERVAL, MAX_ABORT_POLL_INTERVAL);
        self.abort_poll_ms.store(clamped.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn abort_poll_interval(&self) -> Duration {
        Duration::from_millis(self.abort_poll_ms.load(Ordering::Relaxed))
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub async fn receive_any(&self, timeout: Duration) -> Message {
        self.receive_matching(timeout, |_| true).await
    }

    pub async fn receive_from(&self, from_id: AgentId, timeout: Duration) -> Message {
        self.receive_matching(timeout, |m| m.from_id == from_id).await
    }

    pub async fn receive_of_type(&self, message_type: i32, timeout: Duration) -> Message {
        self.receive_matching(timeout, |m| m.message_type == message_type).await
    }

    /// First message with a non-negative (application) type.
    pub async fn receive_application(&self, timeout: Duration) -> Message {
        self.receive_matching(timeout, Message::is_application).await
    }

    /// Remove and return the oldest message satisfying `predicate`, waiting
    /// up to `timeout` for one to arrive.
    pub async fn receive_matching<P>(&self, timeout: Duration, predicate: P) -> Message
    where
        P: Fn(&Message) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut polls: u32 = 0;

        while self.is_accepting() {
            let arrived = self.arrived.notified();
            tokio::pin!(arrived);
            // Register before scanning so an enqueue in between is not missed.
            arrived.as_mut().enable();

            if let Some(message) = self.take_first(&predicate) {
                return message;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let wait = self.abort_poll_interval().min(deadline - now);
            if tokio::time::timeout(wait, arrived).await.is_err() {
                polls = polls.saturating_add(1);
                if self.should_abandon(polls) {
                    debug!(agent_id = self.agent_id, polls, "Receive abandoned by abort visitor");
                    break;
                }
            }
        }
        Message::null_message(self.session_id, self.agent_id)
    }

    fn take_first<P: Fn(&Message) -> bool>(&self, predicate: &P) -> Option<Message> {
        let mut queue = self.queue.lock();
        let index = queue.iter().position(predicate)?;
        queue.remove(index)
    }

    fn should_abandon(&self, polls: u32) -> bool {
        let Some(visitor) = self.abort_visitor.read().clone() else {
            return false;
        };
        // A panicking visitor means "keep waiting".
        catch_unwind(AssertUnwindSafe(|| visitor(polls))).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;
    use visor_core::domain::message::system_types;

    fn mailbox() -> Arc<AgentMailbox> {
        Arc::new(AgentMailbox::new(SessionId::new(), 0))
    }

    fn msg(mb: &AgentMailbox, from: AgentId, message_type: i32) -> Message {
        Message::new(mb.session_id, from, 0, message_type, json!(from))
    }

    #[tokio::test]
    async fn test_receive_any_is_fifo() {
        let mb = mailbox();
        mb.enqueue(msg(&mb, 1, 10));
        mb.enqueue(msg(&mb, 2, 10));
        assert_eq!(mb.receive_any(Duration::from_secs(1)).await.from_id, 1);
        assert_eq!(mb.receive_any(Duration::from_secs(1)).await.from_id, 2);
        assert!(mb.is_empty());
    }

    #[tokio::test]
    async fn test_filtered_receive_takes_oldest_match_only() {
        let mb = mailbox();
        mb.enqueue(msg(&mb, 1, 10));
        mb.enqueue(msg(&mb, 7, system_types::STARTED));
        mb.enqueue(msg(&mb, 7, 20));
        mb.enqueue(msg(&mb, 3, 30));

        let from_seven = mb.receive_from(7, Duration::from_secs(1)).await;
        assert_eq!(from_seven.message_type, system_types::STARTED);
        let typed = mb.receive_of_type(30, Duration::from_secs(1)).await;
        assert_eq!(typed.from_id, 3);
        let app = mb.receive_application(Duration::from_secs(1)).await;
        assert_eq!((app.from_id, app.message_type), (1, 10));
        assert_eq!(mb.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_from_times_out_with_null_message() {
        let mb = mailbox();
        mb.enqueue(msg(&mb, 2, 10));
        let started = Instant::now();
        let result = mb.receive_from(7, Duration::from_secs(1)).await;
        assert!(result.is_null());
        assert_eq!((result.from_id, result.to_id), (0, 0));
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(mb.len(), 1);
    }

    #[tokio::test]
    async fn test_blocked_receive_wakes_on_arrival() {
        let mb = mailbox();
        let waiter = {
            let mb = mb.clone();
            tokio::spawn(async move { mb.receive_of_type(5, Duration::from_secs(30)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        mb.enqueue(msg(&mb, 1, 4));
        mb.enqueue(msg(&mb, 2, 5));
        let received = waiter.await.unwrap();
        assert_eq!(received.from_id, 2);
        assert_eq!(mb.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_visitor_ends_wait() {
        let mb = mailbox();
        let seen = Arc::new(AtomicU32::new(0));
        let counter = seen.clone();
        mb.set_abort_poll_interval(Duration::from_millis(100));
        mb.set_abort_visitor(move |polls| {
            counter.store(polls, Ordering::SeqCst);
            polls >= 3
        });
        let started = Instant::now();
        let result = mb.receive_any(Duration::from_secs(60)).await;
        assert!(result.is_null());
        assert_eq!(seen.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_visitor_keeps_waiting() {
        let mb = mailbox();
        mb.set_abort_poll_interval(Duration::from_millis(100));
        mb.set_abort_visitor(|_| panic!("visitor failure"));
        let started = Instant::now();
        let result = mb.receive_any(Duration::from_millis(550)).await;
        assert!(result.is_null());
        assert!(started.elapsed() >= Duration::from_millis(550));
    }

    #[test]
    fn test_abort_poll_interval_is_clamped() {
        let mb = mailbox();
        assert_eq!(mb.abort_poll_interval(), DEFAULT_ABORT_POLL_INTERVAL);
        mb.set_abort_poll_interval(Duration::from_millis(5));
        assert_eq!(mb.abort_poll_interval(), MIN_ABORT_POLL_INTERVAL);
        mb.set_abort_poll_interval(Duration::from_secs(10_000));
        assert_eq!(mb.abort_poll_interval(), MAX_ABORT_POLL_INTERVAL);
    }

    #[tokio::test]
    async fn test_log_shuttle_never_queued() {
        let mb = mailbox();
        assert!(mb.enqueue(msg(&mb, 3, system_types::LOG_SHUTTLE)));
        assert!(mb.is_empty());
    }

    #[tokio::test]
    async fn test_closed_mailbox() {
        let mb = mailbox();
        let waiter = {
            let mb = mb.clone();
            tokio::spawn(async move { mb.receive_any(Duration::from_secs(30)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        mb.set_accepting(false);
        assert!(waiter.await.unwrap().is_null());

        assert!(!mb.enqueue(msg(&mb, 1, 1)));
        assert!(mb.is_empty());
        assert!(mb.receive_any(Duration::from_secs(30)).await.is_null());
    }
}
