// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Block-on-empty FIFO feeding one background worker.
//!
//! Producers never block. The consumer parks on a [`Notify`] while the queue is
//! empty and gets `None` back once the queue has been closed and drained.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Backlog above which spare capacity is released after a pop.
const TRIM_THRESHOLD: usize = 1000;

struct QueueState<T> {
    items: VecDeque<T>,
    open: bool,
}

pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    signal: Notify,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                open: true,
            }),
            signal: Notify::new(),
        }
    }

    /// Append an item. Returns false (dropping the item) once closed.
    pub fn push(&self, item: T) -> bool {
        {
            let mut state = self.state.lock();
            if !state.open {
                return false;
            }
            state.items.push_back(item);
        }
        self.signal.notify_one();
        true
    }

    /// Wait for the next item. `None` means closed; items still queued at
    /// close time are discarded.
    pub async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.signal.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.state.lock();
                if !state.open {
                    return None;
                }
                if let Some(item) = state.items.pop_front() {
                    if state.items.capacity() > TRIM_THRESHOLD && state.items.len() < TRIM_THRESHOLD {
                        state.items.shrink_to_fit();
                    }
                    return Some(item);
                }
            }
            notified.await;
        }
    }

    /// Stop accepting items and release the waiting consumer.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            state.open = false;
            state.items.clear();
        }
        self.signal.notify_waiters();
        self.signal.notify_one();
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
