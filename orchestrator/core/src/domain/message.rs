// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Inter-Agent Messages
//!
//! [`Message`] is the only payload exchanged between agents. Message types
//! `>= 0` are application defined; negative types are reserved for the system
//! (see [`system_types`]).

use crate::domain::session::{AgentId, SessionId, BROADCAST_AGENT_ID};
use serde::{Deserialize, Serialize};

/// Reserved (negative) message types.
pub mod system_types {
    /// Worker reports it has started; sent to the master.
    pub const STARTED: i32 = -1;
    /// Worker reports it has stopped; sent to the master.
    pub const STOPPED: i32 = -2;
    /// In-process worker ended with an error; content carries the error text.
    pub const ABORTED: i32 = -3;
    pub const ERROR: i32 = -4;
    pub const SHUTDOWN: i32 = -5;
    /// A routed message could not be delivered; content carries the original message.
    pub const DELIVERY_FAILURE: i32 = -7;
    /// Synthetic timeout result of a mailbox receive.
    pub const NULL_MESSAGE: i32 = -987_654;
    /// Log line shuttled from a worker to the master's logger.
    pub const LOG_SHUTTLE: i32 = -999_999;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub session_id: SessionId,
    pub from_id: AgentId,
    /// Destination agent, or [`BROADCAST_AGENT_ID`] for every other agent.
    pub to_id: AgentId,
    pub message_type: i32,
    #[serde(default)]
    pub content: serde_json::Value,
}

impl Message {
    pub fn new(
        session_id: SessionId,
        from_id: AgentId,
        to_id: AgentId,
        message_type: i32,
        content: serde_json::Value,
    ) -> Self {
        Self {
            session_id,
            from_id,
            to_id,
            message_type,
            content,
        }
    }

    pub fn broadcast(session_id: SessionId, from_id: AgentId, message_type: i32, content: serde_json::Value) -> Self {
        Self::new(session_id, from_id, BROADCAST_AGENT_ID, message_type, content)
    }

    /// Self-addressed placeholder returned when a receive times out or is abandoned.
    pub fn null_message(session_id: SessionId, agent_id: AgentId) -> Self {
        Self::new(
            session_id,
            agent_id,
            agent_id,
            system_types::NULL_MESSAGE,
            serde_json::Value::Null,
        )
    }

    /// Failure notice travelling back to the sender of `original`.
    pub fn delivery_failure(original: &Message) -> Self {
        Self::new(
            original.session_id,
            original.to_id,
            original.from_id,
            system_types::DELIVERY_FAILURE,
            serde_json::to_value(original).unwrap_or_default(),
        )
    }

    pub fn is_broadcast(&self) -> bool {
        self.to_id == BROADCAST_AGENT_ID
    }

    pub fn is_application(&self) -> bool {
        self.message_type >= 0
    }

    pub fn is_null(&self) -> bool {
        self.message_type == system_types::NULL_MESSAGE
    }

    pub fn is_delivery_failure(&self) -> bool {
        self.message_type == system_types::DELIVERY_FAILURE
    }

    pub fn is_log_shuttle(&self) -> bool {
        self.message_type == system_types::LOG_SHUTTLE
    }
}
