// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Test doubles for agent-side unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;

use visor_core::domain::message::Message;
use visor_core::domain::session::{AgentId, SessionId, SessionInfo};
use visor_core::infrastructure::http::wire::SpawnBody;

use crate::client::NodeConnection;
use crate::error::Result;

/// Node connection that records every call and accepts everything.
#[derive(Default)]
pub struct RecordingNode {
    sent: Mutex<Vec<Message>>,
    broadcasts: Mutex<Vec<Message>>,
    spawns: Mutex<Vec<SpawnBody>>,
    masters: Mutex<Vec<SessionId>>,
    attached: Mutex<Vec<(AgentId, String)>>,
    unregistered: Mutex<Vec<AgentId>>,
    killed: Mutex<Vec<SessionId>>,
}

impl RecordingNode {
    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }

    pub fn broadcasts(&self) -> Vec<Message> {
        self.broadcasts.lock().clone()
    }

    pub fn spawns(&self) -> Vec<SpawnBody> {
        self.spawns.lock().clone()
    }

    pub fn masters(&self) -> Vec<SessionId> {
        self.masters.lock().clone()
    }

    pub fn attached(&self) -> Vec<(AgentId, String)> {
        self.attached.lock().clone()
    }

    pub fn unregistered(&self) -> Vec<AgentId> {
        self.unregistered.lock().clone()
    }

    pub fn killed(&self) -> Vec<SessionId> {
        self.killed.lock().clone()
    }
}

#[async_trait]
impl NodeConnection for RecordingNode {
    async fn ping(&self, echo: i32) -> Result<i32> {
        Ok(echo)
    }

    async fn spawn(&self, request: SpawnBody) -> Result<bool> {
        self.spawns.lock().push(request);
        Ok(true)
    }

    async fn send(&self, message: &Message) -> Result<bool> {
        self.sent.lock().push(message.clone());
        Ok(true)
    }

    async fn broadcast(&self, message: &Message) -> Result<bool> {
        self.broadcasts.lock().push(message.clone());
        Ok(true)
    }

    async fn register_master_agent(&self, session: &SessionInfo) -> Result<()> {
        self.masters.lock().push(session.session_id);
        Ok(())
    }

    async fn attach_agent(&self, _session_id: SessionId, agent_id: AgentId, url: &str) -> Result<()> {
        self.attached.lock().push((agent_id, url.to_string()));
        Ok(())
    }

    async fn unregister_agent(&self, _session_id: SessionId, agent_id: AgentId) -> Result<()> {
        self.unregistered.lock().push(agent_id);
        Ok(())
    }

    async fn running_agents(&self, _session_id: SessionId) -> Result<Vec<AgentId>> {
        Ok(Vec::new())
    }

    async fn kill_session(&self, session_id: SessionId) -> Result<()> {
        self.killed.lock().push(session_id);
        Ok(())
    }
}
