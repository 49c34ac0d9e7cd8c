// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-memory capture of an agent process's log lines.
//!
//! [`LogBuffer`] is a `tracing_subscriber` layer keeping the most recent
//! formatted events so the node can read them back. When a shuttle channel is
//! set, INFO and more severe lines are also forwarded so a worker can ship
//! them to its master.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

pub const DEFAULT_LOG_CAPACITY: usize = 1000;

/// Target of lines received from other agents; never shuttled again.
pub const SHUTTLE_TARGET: &str = "visor::shuttle";

#[derive(Clone)]
pub struct LogBuffer {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
    shuttle: Arc<Mutex<Option<UnboundedSender<String>>>>,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_LOG_CAPACITY)))),
            capacity: capacity.max(1),
            shuttle: Arc::new(Mutex::new(None)),
        }
    }

    pub fn push(&self, line: String) {
        let mut lines = self.lines.lock();
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }

    pub fn set_shuttle(&self, sender: UnboundedSender<String>) {
        *self.shuttle.lock() = Some(sender);
    }

    pub fn clear_shuttle(&self) {
        *self.shuttle.lock() = None;
    }

    fn forward(&self, line: &str) {
        let mut shuttle = self.shuttle.lock();
        if let Some(sender) = shuttle.as_ref() {
            if sender.send(line.to_string()).is_err() {
                *shuttle = None;
            }
        }
    }
}

impl<S: Subscriber> Layer<S> for LogBuffer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        let line = format!(
            "{} {:>5} {}: {}",
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            metadata.level(),
            metadata.target(),
            visitor.finish()
        );
        if *metadata.level() <= Level::INFO && metadata.target() != SHUTTLE_TARGET {
            self.forward(&line);
        }
        self.push(line);
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl LineVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

/// Install the process-wide subscriber for an agent: `RUST_LOG` (or
/// `default_level`) filtering, console output and `buffer`. Returns `false`
/// when a subscriber was already installed.
pub fn init_agent_logging(default_level: &str, buffer: LogBuffer) -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .with(buffer)
        .try_init()
        .is_ok()
}
