// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Mailbox
//!
//! Per-agent bounded FIFO of pending [`Message`]s.
//!
//! When the mailbox is full, pushing a new message evicts the **oldest**
//! unread one. Pushes never block and never fail: a slow consumer loses its
//! backlog instead of stalling the bus. Every eviction is counted and handed
//! back to the caller so it can be reported.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::domain::message::Message;

/// Default capacity used by [`Mailbox::default`].
pub const DEFAULT_MAILBOX_CAPACITY: usize = 1000;

#[derive(Debug)]
pub struct Mailbox {
    capacity: usize,
    queue: Mutex<VecDeque<Message>>,
    notify: Notify,
    dropped: AtomicU64,
}

impl Mailbox {
    /// Create a mailbox holding at most `capacity` messages (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Append a message, returning the evicted oldest message if the mailbox
    /// was already full.
    pub fn push(&self, message: Message) -> Option<Message> {
        let evicted = {
            let mut queue = self.queue.lock();
            let evicted = if queue.len() >= self.capacity {
                queue.pop_front()
            } else {
                None
            };
            queue.push_back(message);
            evicted
        };

        if evicted.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        evicted
    }

    pub fn pop(&self) -> Option<Message> {
        self.queue.lock().pop_front()
    }

    /// Pop up to `limit` messages from the front.
    pub fn pop_many(&self, limit: usize) -> Vec<Message> {
        let mut queue = self.queue.lock();
        let count = limit.min(queue.len());
        queue.drain(..count).collect()
    }

    /// Copy up to `limit` messages from the front without removing them.
    pub fn peek(&self, limit: usize) -> Vec<Message> {
        self.queue.lock().iter().take(limit).cloned().collect()
    }

    /// Remove a specific message by id, wherever it sits in the queue.
    pub fn remove(&self, message_id: &str) -> Option<Message> {
        let mut queue = self.queue.lock();
        let position = queue.iter().position(|m| m.id() == message_id)?;
        queue.remove(position)
    }

    /// Wait until a message is available and pop it.
    ///
    /// Intended for the single consumer that owns the mailbox; callers that
    /// need to observe shutdown wrap this in a timeout.
    pub async fn recv(&self) -> Message {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.pop() {
                return message;
            }
            notified.await;
        }
    }

    pub fn clear(&self) -> usize {
        let mut queue = self.queue.lock();
        let count = queue.len();
        queue.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total number of messages evicted because the mailbox was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new(DEFAULT_MAILBOX_CAPACITY)
    }
}
