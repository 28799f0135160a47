// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Message Bus Implementation - Point-to-point and Broadcast Routing
//
// Routes message envelopes between in-process agents:
// - Point-to-point sends land in the recipient's bounded mailbox, then an
//   optional inline handler runs
// - Broadcasts fan out one copy per subscriber of the message kind
// - Keeps delivery counters and a time-windowed message history
//
// In-memory only: queues and history are lost on restart.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::domain::agent::AgentPort;
use crate::domain::mailbox::Mailbox;
use crate::domain::message::{Message, MessageKind, Payload, BROADCAST};
use crate::domain::node_config::{BusConfig, InlineDeliveryPolicy};

/// Handler the bus invokes directly on delivery, in addition to the mailbox
/// push. Failures are logged and never fail the send.
#[async_trait]
pub trait InlineHandler: Send + Sync {
    async fn handle(&self, message: Message) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> InlineHandler for F
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, message: Message) -> anyhow::Result<()> {
        (self)(message).await
    }
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageCounters {
    pub messages_sent: u64,
    pub messages_delivered: u64,
    pub messages_failed: u64,
    pub messages_dropped: u64,
}

/// Point-in-time view of the bus returned by [`MessageBus::get_stats`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusStats {
    pub registered_agents: usize,
    pub total_subscribers: usize,
    pub queue_sizes: BTreeMap<String, usize>,
    pub message_stats: MessageCounters,
    pub message_history_size: usize,
    pub subscription_breakdown: BTreeMap<String, usize>,
}

/// Summary of one sent message, as returned by
/// [`MessageBus::get_message_history`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub message_id: String,
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: String,
    pub payload_keys: Vec<String>,
}

impl From<&Message> for HistoryEntry {
    fn from(message: &Message) -> Self {
        Self {
            message_id: message.id().to_string(),
            source: message.source().to_string(),
            target: message.target().unwrap_or(BROADCAST).to_string(),
            kind: message.kind().to_string(),
            timestamp: message.timestamp(),
            correlation_id: message.correlation_id().to_string(),
            payload_keys: message.payload().keys().cloned().collect(),
        }
    }
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> MessageCounters {
        MessageCounters {
            messages_sent: self.sent.load(Ordering::Relaxed),
            messages_delivered: self.delivered.load(Ordering::Relaxed),
            messages_failed: self.failed.load(Ordering::Relaxed),
            messages_dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

struct Endpoint {
    // Held so the registered participant outlives its registration.
    _port: Arc<dyn AgentPort>,
    mailbox: Arc<Mailbox>,
}

type HandlerTable = HashMap<MessageKind, Arc<dyn InlineHandler>>;

#[derive(Default)]
struct BusState {
    endpoints: HashMap<String, Endpoint>,
    subscribers: HashMap<MessageKind, Vec<String>>,
    inline_handlers: HashMap<String, HandlerTable>,
    history: VecDeque<Message>,
}

/// In-process message router shared by every agent of a node.
///
/// All bookkeeping happens in short synchronous critical sections; no lock
/// is held while an inline handler runs.
pub struct MessageBus {
    config: BusConfig,
    state: RwLock<BusState>,
    counters: Counters,
    running: AtomicBool,
}

impl MessageBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            state: RwLock::new(BusState::default()),
            counters: Counters::default(),
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Register a participant under its own id. Re-registering an id
    /// replaces the previous endpoint.
    pub fn register_agent(&self, agent: Arc<dyn AgentPort>) {
        let agent_id = agent.agent_id().to_string();
        let mailbox = agent.mailbox();
        let replaced = self
            .state
            .write()
            .endpoints
            .insert(agent_id.clone(), Endpoint { _port: agent, mailbox })
            .is_some();

        if replaced {
            warn!(agent_id = %agent_id, "Replaced existing bus registration");
        } else {
            info!(agent_id = %agent_id, "Registered agent on message bus");
        }
    }

    /// Remove a participant together with its mailbox, subscriptions and
    /// inline handlers. Returns false if the id was unknown.
    pub fn unregister_agent(&self, agent_id: &str) -> bool {
        let mut state = self.state.write();
        let Some(endpoint) = state.endpoints.remove(agent_id) else {
            return false;
        };
        for subscribers in state.subscribers.values_mut() {
            subscribers.retain(|id| id != agent_id);
        }
        state.subscribers.retain(|_, subscribers| !subscribers.is_empty());
        state.inline_handlers.remove(agent_id);
        drop(state);

        let discarded = endpoint.mailbox.clear();
        if discarded > 0 {
            self.counters.dropped.fetch_add(discarded as u64, Ordering::Relaxed);
            metrics::counter!("nexus_bus_messages_dropped_total").increment(discarded as u64);
        }

        info!(agent_id = %agent_id, discarded, "Unregistered agent from message bus");
        true
    }

    pub fn is_registered(&self, agent_id: &str) -> bool {
        self.state.read().endpoints.contains_key(agent_id)
    }

    /// Subscribe `agent_id` to broadcasts of `kind`. The subscriber list
    /// never holds duplicates; a given handler replaces any previous inline
    /// handler for the same kind.
    pub fn subscribe(
        &self,
        agent_id: &str,
        kind: MessageKind,
        handler: Option<Arc<dyn InlineHandler>>,
    ) {
        let mut state = self.state.write();
        let subscribers = state.subscribers.entry(kind.clone()).or_default();
        if !subscribers.iter().any(|id| id == agent_id) {
            subscribers.push(agent_id.to_string());
        }
        if let Some(handler) = handler {
            state
                .inline_handlers
                .entry(agent_id.to_string())
                .or_default()
                .insert(kind.clone(), handler);
        }
        drop(state);

        debug!(agent_id = %agent_id, kind = %kind, "Agent subscribed");
    }

    pub fn unsubscribe(&self, agent_id: &str, kind: &MessageKind) {
        let mut state = self.state.write();
        if let Some(subscribers) = state.subscribers.get_mut(kind) {
            subscribers.retain(|id| id != agent_id);
            if subscribers.is_empty() {
                state.subscribers.remove(kind);
            }
        }
        if let Some(handlers) = state.inline_handlers.get_mut(agent_id) {
            handlers.remove(kind);
            if handlers.is_empty() {
                state.inline_handlers.remove(agent_id);
            }
        }
        drop(state);

        debug!(agent_id = %agent_id, kind = %kind, "Agent unsubscribed");
    }

    /// Current subscribers of `kind`, in subscription order.
    pub fn subscribers(&self, kind: &MessageKind) -> Vec<String> {
        self.state
            .read()
            .subscribers
            .get(kind)
            .cloned()
            .unwrap_or_default()
    }

    /// Send a message to its target, or to every subscriber of its kind when
    /// the target is unset, `"broadcast"` or `"*"`.
    ///
    /// Returns true when every resulting delivery reached a mailbox.
    pub async fn send_message(&self, message: Message) -> bool {
        self.counters.sent.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("nexus_bus_messages_sent_total").increment(1);
        self.record_history(&message);

        if message.is_broadcast() {
            self.broadcast_message(message).await
        } else {
            self.send_to_recipient(message).await
        }
    }

    async fn broadcast_message(&self, message: Message) -> bool {
        let subscribers = self.subscribers(message.kind());
        if subscribers.is_empty() {
            debug!(
                kind = %message.kind(),
                message_id = %message.id(),
                "No subscribers for broadcast"
            );
            return true;
        }

        // Copies go out one by one; an earlier success is not rolled back
        // when a later copy fails.
        let mut delivered = 0;
        for agent_id in &subscribers {
            if self.send_to_recipient(message.copy_for(agent_id.as_str())).await {
                delivered += 1;
            }
        }
        delivered == subscribers.len()
    }

    async fn send_to_recipient(&self, message: Message) -> bool {
        let recipient = message.target().unwrap_or_default().to_string();

        let route = {
            let state = self.state.read();
            state.endpoints.get(&recipient).map(|endpoint| {
                let handler = state
                    .inline_handlers
                    .get(&recipient)
                    .and_then(|handlers| handlers.get(message.kind()))
                    .cloned();
                (endpoint.mailbox.clone(), handler)
            })
        };

        let Some((mailbox, handler)) = route else {
            warn!(
                recipient = %recipient,
                kind = %message.kind(),
                message_id = %message.id(),
                "Recipient not found"
            );
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("nexus_bus_messages_failed_total").increment(1);
            return false;
        };

        let message_id = message.id().to_string();
        let inline_copy = handler.as_ref().map(|_| message.clone());

        if mailbox.push(message).is_some() {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("nexus_bus_messages_dropped_total").increment(1);
            debug!(recipient = %recipient, "Mailbox full, evicted oldest message");
        }
        debug!(recipient = %recipient, message_id = %message_id, "Message queued");

        if let (Some(handler), Some(copy)) = (handler, inline_copy) {
            match handler.handle(copy).await {
                Ok(()) => {
                    if self.config.inline_delivery == InlineDeliveryPolicy::ConsumeOnSuccess {
                        mailbox.remove(&message_id);
                    }
                }
                Err(e) => {
                    error!(
                        recipient = %recipient,
                        message_id = %message_id,
                        error = %e,
                        "Inline message handler failed"
                    );
                }
            }
        }

        self.counters.delivered.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("nexus_bus_messages_delivered_total").increment(1);
        true
    }

    /// Pop up to `limit` pending messages for `agent_id`, oldest first.
    pub fn get_messages(&self, agent_id: &str, limit: usize) -> Vec<Message> {
        self.mailbox_of(agent_id)
            .map(|mailbox| mailbox.pop_many(limit))
            .unwrap_or_default()
    }

    /// Non-destructive variant of [`MessageBus::get_messages`].
    pub fn peek_messages(&self, agent_id: &str, limit: usize) -> Vec<Message> {
        self.mailbox_of(agent_id)
            .map(|mailbox| mailbox.peek(limit))
            .unwrap_or_default()
    }

    pub fn get_queue_size(&self, agent_id: &str) -> usize {
        self.mailbox_of(agent_id)
            .map(|mailbox| mailbox.len())
            .unwrap_or(0)
    }

    fn mailbox_of(&self, agent_id: &str) -> Option<Arc<Mailbox>> {
        self.state
            .read()
            .endpoints
            .get(agent_id)
            .map(|endpoint| endpoint.mailbox.clone())
    }

    /// Broadcast an event of `kind` on behalf of `source`.
    pub async fn publish_event(
        &self,
        kind: impl Into<MessageKind>,
        source: &str,
        data: Payload,
    ) -> bool {
        self.send_message(Message::new(kind, data, source).broadcast())
            .await
    }

    pub fn get_stats(&self) -> BusStats {
        let state = self.state.read();
        BusStats {
            registered_agents: state.endpoints.len(),
            total_subscribers: state.subscribers.values().map(Vec::len).sum(),
            queue_sizes: state
                .endpoints
                .iter()
                .map(|(id, endpoint)| (id.clone(), endpoint.mailbox.len()))
                .collect(),
            message_stats: self.counters.snapshot(),
            message_history_size: state.history.len(),
            subscription_breakdown: state
                .subscribers
                .iter()
                .map(|(kind, subscribers)| (kind.to_string(), subscribers.len()))
                .collect(),
        }
    }

    /// The most recent `limit` history entries (optionally only of `kind`),
    /// oldest first.
    pub fn get_message_history(&self, limit: usize, kind: Option<&MessageKind>) -> Vec<HistoryEntry> {
        let state = self.state.read();
        let matching: Vec<&Message> = state
            .history
            .iter()
            .filter(|message| kind.is_none_or(|k| message.kind() == k))
            .collect();
        let skip = matching.len().saturating_sub(limit);
        matching.into_iter().skip(skip).map(HistoryEntry::from).collect()
    }

    fn record_history(&self, message: &Message) {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(self.config.history_ttl())
                .unwrap_or_else(|_| ChronoDuration::minutes(60));

        let mut state = self.state.write();
        state.history.push_back(message.clone());
        state.history.retain(|entry| entry.timestamp() > cutoff);
        while state.history.len() > self.config.history_limit {
            state.history.pop_front();
        }
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        info!("Message bus started");
    }

    /// Stop the bus, discarding every pending message and the history.
    /// Registrations and subscriptions are kept.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let mut state = self.state.write();
        let discarded: usize = state
            .endpoints
            .values()
            .map(|endpoint| endpoint.mailbox.clear())
            .sum();
        state.history.clear();
        drop(state);

        info!(discarded, "Message bus stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::into_payload;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    struct TestEndpoint {
        id: String,
        mailbox: Arc<Mailbox>,
    }

    impl TestEndpoint {
        fn new(id: &str, capacity: usize) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                mailbox: Arc::new(Mailbox::new(capacity)),
            })
        }
    }

    impl AgentPort for TestEndpoint {
        fn agent_id(&self) -> &str {
            &self.id
        }

        fn mailbox(&self) -> Arc<Mailbox> {
            self.mailbox.clone()
        }
    }

    fn bus_with(ids: &[&str]) -> MessageBus {
        let bus = MessageBus::default();
        for id in ids {
            bus.register_agent(TestEndpoint::new(id, 100));
        }
        bus
    }

    fn message(kind: MessageKind, data: serde_json::Value) -> Message {
        Message::new(kind, into_payload(data), "sender")
    }

    #[tokio::test]
    async fn test_point_to_point_delivery() {
        let bus = bus_with(&["a"]);

        let sent = message(MessageKind::Ping, json!({"n": 1})).to("a");
        assert!(bus.send_message(sent.clone()).await);

        let received = bus.get_messages("a", 10);
        assert_eq!(received, vec![sent]);

        let stats = bus.get_stats().message_stats;
        assert_eq!(stats.messages_sent, 1);
        assert_eq!(stats.messages_delivered, 1);
        assert_eq!(stats.messages_failed, 0);
    }

    #[tokio::test]
    async fn test_unknown_recipient_only_touches_sent_and_failed() {
        let bus = bus_with(&["a"]);

        assert!(!bus.send_message(message(MessageKind::Ping, json!({})).to("ghost")).await);

        let stats = bus.get_stats();
        assert_eq!(stats.message_stats.messages_sent, 1);
        assert_eq!(stats.message_stats.messages_failed, 1);
        assert_eq!(stats.message_stats.messages_delivered, 0);
        assert_eq!(stats.queue_sizes.get("a"), Some(&0));
    }

    #[tokio::test]
    async fn test_broadcast_fan_out() {
        let bus = bus_with(&["a", "b", "c"]);
        bus.subscribe("a", MessageKind::IncidentDetected, None);
        bus.subscribe("b", MessageKind::IncidentDetected, None);
        bus.subscribe("b", MessageKind::IncidentDetected, None);

        let original = message(MessageKind::IncidentDetected, json!({"id": "inc-1"})).broadcast();
        assert!(bus.send_message(original.clone()).await);

        let a = bus.get_messages("a", 10);
        let b = bus.get_messages("b", 10);
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert!(bus.get_messages("c", 10).is_empty());

        assert_ne!(a[0].id(), b[0].id());
        assert_ne!(a[0].id(), original.id());
        assert_eq!(a[0].payload(), original.payload());
        assert_eq!(a[0].correlation_id(), original.correlation_id());
        assert_eq!(a[0].target(), Some("a"));
        assert_eq!(bus.get_stats().message_stats.messages_delivered, 2);
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_succeeds() {
        let bus = bus_with(&["a"]);
        assert!(bus.publish_event(MessageKind::AgentStatus, "registry", Payload::new()).await);
        assert_eq!(bus.get_queue_size("a"), 0);
    }

    #[tokio::test]
    async fn test_broadcast_partial_failure() {
        let bus = bus_with(&["a"]);
        bus.subscribe("a", MessageKind::LogAnalysis, None);
        bus.subscribe("gone", MessageKind::LogAnalysis, None);

        let ok = bus
            .send_message(message(MessageKind::LogAnalysis, json!({})).to("*"))
            .await;
        assert!(!ok);
        // The successful copy is kept
        assert_eq!(bus.get_queue_size("a"), 1);
    }

    #[tokio::test]
    async fn test_inline_handler_runs_and_copy_is_retained() {
        let bus = bus_with(&["a"]);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler: Arc<dyn InlineHandler> = Arc::new(move |_message: Message| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        bus.subscribe("a", MessageKind::Ping, Some(handler));

        assert!(bus.send_message(message(MessageKind::Ping, json!({})).to("a")).await);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.get_queue_size("a"), 1);
    }

    #[tokio::test]
    async fn test_inline_handler_consume_on_success() {
        let bus = MessageBus::new(BusConfig {
            inline_delivery: InlineDeliveryPolicy::ConsumeOnSuccess,
            ..BusConfig::default()
        });
        bus.register_agent(TestEndpoint::new("a", 10));
        let ok: Arc<dyn InlineHandler> = Arc::new(|_m: Message| async { Ok(()) });
        let failing: Arc<dyn InlineHandler> =
            Arc::new(|_m: Message| async { Err(anyhow::anyhow!("boom")) });
        bus.subscribe("a", MessageKind::Ping, Some(ok));
        bus.subscribe("a", MessageKind::StatusRequest, Some(failing));

        assert!(bus.send_message(message(MessageKind::Ping, json!({})).to("a")).await);
        assert_eq!(bus.get_queue_size("a"), 0);

        // A failed inline handler neither fails the send nor consumes the copy
        assert!(bus.send_message(message(MessageKind::StatusRequest, json!({})).to("a")).await);
        assert_eq!(bus.get_queue_size("a"), 1);
        assert_eq!(bus.get_stats().message_stats.messages_delivered, 2);
    }

    #[tokio::test]
    async fn test_mailbox_overflow_counts_dropped() {
        let bus = MessageBus::default();
        bus.register_agent(TestEndpoint::new("a", 2));

        for n in 0..5 {
            bus.send_message(message(MessageKind::Ping, json!({ "n": n })).to("a")).await;
        }

        let kept: Vec<i64> = bus
            .peek_messages("a", 10)
            .iter()
            .filter_map(|m| m.get("n").and_then(|v| v.as_i64()))
            .collect();
        assert_eq!(kept, vec![3, 4]);
        assert_eq!(bus.get_stats().message_stats.messages_dropped, 3);
    }

    #[tokio::test]
    async fn test_unregister_removes_subscriptions() {
        let bus = bus_with(&["a", "b"]);
        bus.subscribe("a", MessageKind::LogAnalysis, None);
        bus.subscribe("b", MessageKind::LogAnalysis, None);

        assert!(bus.unregister_agent("a"));
        assert!(!bus.unregister_agent("a"));
        assert_eq!(bus.subscribers(&MessageKind::LogAnalysis), vec!["b".to_string()]);
        assert!(bus.get_messages("a", 10).is_empty());
    }

    #[tokio::test]
    async fn test_unregister_discards_pending_messages() {
        let bus = MessageBus::default();
        let endpoint = TestEndpoint::new("a", 100);
        bus.register_agent(endpoint.clone());
        for _ in 0..2 {
            bus.send_message(message(MessageKind::Ping, json!({})).to("a")).await;
        }

        assert!(bus.unregister_agent("a"));
        assert!(endpoint.mailbox.is_empty());
        assert_eq!(bus.get_stats().message_stats.messages_dropped, 2);

        bus.register_agent(endpoint);
        assert_eq!(bus.get_queue_size("a"), 0);
        assert!(bus.get_messages("a", 10).is_empty());
    }

    #[tokio::test]
    async fn test_history_filter_and_limit() {
        let bus = bus_with(&["a"]);
        for _ in 0..3 {
            bus.send_message(message(MessageKind::Ping, json!({})).to("a")).await;
        }
        bus.send_message(message(MessageKind::Error, json!({"error": "x"})).to("a")).await;

        assert_eq!(bus.get_message_history(100, None).len(), 4);
        assert_eq!(bus.get_message_history(2, Some(&MessageKind::Ping)).len(), 2);

        let errors = bus.get_message_history(10, Some(&MessageKind::Error));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].payload_keys, vec!["error".to_string()]);
        assert_eq!(errors[0].target, "a");
    }

    #[tokio::test]
    async fn test_history_limit_bounds_retention() {
        let bus = MessageBus::new(BusConfig {
            history_limit: 3,
            ..BusConfig::default()
        });
        for _ in 0..10 {
            bus.publish_event(MessageKind::Ping, "x", Payload::new()).await;
        }
        assert_eq!(bus.get_stats().message_history_size, 3);
    }

    #[tokio::test]
    async fn test_stop_clears_queues_and_history() {
        let bus = bus_with(&["a"]);
        bus.start();
        bus.send_message(message(MessageKind::Ping, json!({})).to("a")).await;
        bus.stop();

        assert!(!bus.is_running());
        assert_eq!(bus.get_queue_size("a"), 0);
        assert!(bus.get_message_history(10, None).is_empty());
        assert!(bus.is_registered("a"));
    }
}
