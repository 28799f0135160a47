// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Agent Runtime
//!
//! Runs one agent: a bounded mailbox drained by a message loop that
//! dispatches by [`MessageKind`], a heartbeat loop reporting to the
//! registry, and an optional background task supplied by the role.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Agent lifecycle (start/stop), dispatch and built-in handlers
//!
//! Concrete roles differ only in the handlers they register and in their
//! [`AgentBehavior`]. Handlers receive the shared [`AgentState`] so they can
//! read counters and send messages through the bus.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::context::MessagingContext;
use crate::domain::agent::{AgentDescriptor, AgentError, AgentPort, AgentSnapshot, AgentStatus};
use crate::domain::events::HeartbeatReport;
use crate::domain::mailbox::Mailbox;
use crate::domain::message::{into_payload, Message, MessageKind, Payload};
use crate::infrastructure::registry::RegistryError;

/// Handles one message kind for an agent. A returned message is sent
/// through the bus as the reply.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, agent: Arc<AgentState>, message: Message) -> anyhow::Result<Option<Message>>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Arc<AgentState>, Message) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Option<Message>>> + Send,
{
    async fn handle(&self, agent: Arc<AgentState>, message: Message) -> anyhow::Result<Option<Message>> {
        (self)(agent, message).await
    }
}

/// Role-specific lifecycle hooks.
#[async_trait]
pub trait AgentBehavior: Send + Sync {
    /// Runs once during `start()`, before the agent goes online. An error
    /// aborts startup.
    async fn initialize(&self, _agent: &Arc<AgentState>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs once during `stop()`. Errors are logged only.
    async fn cleanup(&self, _agent: &Arc<AgentState>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Optional background work, spawned alongside the message and heartbeat
    /// loops. Must return once `shutdown` is cancelled.
    async fn run(&self, _agent: Arc<AgentState>, _shutdown: CancellationToken) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Behavior with no hooks, for agents defined purely by their handlers.
pub struct NoopBehavior;

impl AgentBehavior for NoopBehavior {}

/// State shared between an agent, its loops and its handlers.
pub struct AgentState {
    descriptor: AgentDescriptor,
    mailbox: Arc<Mailbox>,
    context: MessagingContext,
    status: RwLock<AgentStatus>,
    last_heartbeat: RwLock<DateTime<Utc>>,
    started_at: RwLock<Option<DateTime<Utc>>>,
    tasks_processed: AtomicU64,
    errors: AtomicU64,
    in_flight: AtomicU64,
}

impl AgentState {
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    pub fn context(&self) -> &MessagingContext {
        &self.context
    }

    pub fn mailbox(&self) -> &Arc<Mailbox> {
        &self.mailbox
    }

    pub fn status(&self) -> AgentStatus {
        *self.status.read()
    }

    fn set_status(&self, status: AgentStatus) {
        *self.status.write() = status;
        debug!(agent_id = %self.id(), status = %status, "Agent status changed");
    }

    pub fn last_heartbeat(&self) -> DateTime<Utc> {
        *self.last_heartbeat.read()
    }

    pub fn tasks_processed(&self) -> u64 {
        self.tasks_processed.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Messages taken from the mailbox whose handling (including the reply
    /// send) has not finished yet.
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            agent_id: self.descriptor.id.clone(),
            agent_type: self.descriptor.agent_type.clone(),
            status: self.status(),
            capabilities: self.descriptor.capabilities.clone(),
            last_heartbeat: self.last_heartbeat(),
            started_at: *self.started_at.read(),
            tasks_processed: self.tasks_processed(),
            errors: self.errors(),
            queue_size: self.mailbox.len(),
            in_flight: self.in_flight(),
        }
    }

    /// Build an unaddressed message from this agent.
    pub fn message(&self, kind: impl Into<MessageKind>, payload: Payload) -> Message {
        Message::new(kind, payload, self.id())
    }

    /// Hand a message to the bus. Does not wait for the recipient to process
    /// it.
    pub async fn send_message(&self, message: Message) -> bool {
        debug!(
            agent_id = %self.id(),
            kind = %message.kind(),
            target = message.target().unwrap_or("broadcast"),
            message_id = %message.id(),
            "Sending message"
        );
        self.context.bus().send_message(message).await
    }

    /// Broadcast `payload` as a `kind` event from this agent.
    pub async fn publish(&self, kind: impl Into<MessageKind>, payload: Payload) -> bool {
        self.send_message(self.message(kind, payload).broadcast()).await
    }
}

type HandlerTable = Arc<RwLock<HashMap<MessageKind, Arc<dyn MessageHandler>>>>;

#[derive(Default)]
struct Lifecycle {
    started: bool,
    shutdown: Option<CancellationToken>,
    tasks: Vec<JoinHandle<()>>,
}

/// A runnable agent.
pub struct Agent {
    state: Arc<AgentState>,
    handlers: HandlerTable,
    behavior: Arc<dyn AgentBehavior>,
    lifecycle: Mutex<Lifecycle>,
}

impl Agent {
    pub fn new(
        descriptor: AgentDescriptor,
        context: MessagingContext,
        behavior: Arc<dyn AgentBehavior>,
    ) -> Arc<Self> {
        let now = Utc::now();
        let mailbox = Arc::new(Mailbox::new(context.bus().config().mailbox_capacity));
        let agent = Arc::new(Self {
            state: Arc::new(AgentState {
                descriptor,
                mailbox,
                context,
                status: RwLock::new(AgentStatus::Starting),
                last_heartbeat: RwLock::new(now),
                started_at: RwLock::new(None),
                tasks_processed: AtomicU64::new(0),
                errors: AtomicU64::new(0),
                in_flight: AtomicU64::new(0),
            }),
            handlers: Arc::new(RwLock::new(HashMap::new())),
            behavior,
            lifecycle: Mutex::new(Lifecycle::default()),
        });

        agent.register_handler(MessageKind::Ping, handle_ping);
        agent.register_handler(MessageKind::HeartbeatRequest, handle_heartbeat_request);
        agent.register_handler(MessageKind::StatusRequest, handle_status_request);
        agent
    }

    pub fn state(&self) -> &Arc<AgentState> {
        &self.state
    }

    pub fn id(&self) -> &str {
        self.state.id()
    }

    pub fn descriptor(&self) -> &AgentDescriptor {
        self.state.descriptor()
    }

    pub fn status(&self) -> AgentStatus {
        self.state.status()
    }

    /// Install the handler for `kind`, replacing any previous one.
    pub fn register_handler(&self, kind: impl Into<MessageKind>, handler: impl MessageHandler + 'static) {
        self.handlers.write().insert(kind.into(), Arc::new(handler));
    }

    pub fn has_handler(&self, kind: &MessageKind) -> bool {
        self.handlers.read().contains_key(kind)
    }

    /// Register this agent with the registry (and thereby the bus).
    pub fn register(self: &Arc<Self>) -> Result<(), RegistryError> {
        let descriptor = self.descriptor();
        self.state.context.registry().register_agent(
            &descriptor.id,
            &descriptor.agent_type,
            &descriptor.capabilities,
            self.clone(),
        )
    }

    pub fn unregister(&self) -> Result<(), RegistryError> {
        self.state.context.registry().unregister_agent(self.id())
    }

    /// Start the message, heartbeat and background loops, then run
    /// `initialize()`. Rejected once the agent has been started.
    pub async fn start(&self) -> Result<(), AgentError> {
        {
            let mut lifecycle = self.lifecycle.lock().await;
            if lifecycle.started {
                return Err(AgentError::AlreadyStarted(self.id().to_string()));
            }
            lifecycle.started = true;

            let now = Utc::now();
            self.state.set_status(AgentStatus::Starting);
            *self.state.started_at.write() = Some(now);
            *self.state.last_heartbeat.write() = now;

            let shutdown = CancellationToken::new();
            let agent_config = self.state.context.agent_config();
            lifecycle.tasks = vec![
                tokio::spawn(message_loop(
                    self.state.clone(),
                    self.handlers.clone(),
                    shutdown.clone(),
                    agent_config.poll_interval(),
                )),
                tokio::spawn(heartbeat_loop(
                    self.state.clone(),
                    shutdown.clone(),
                    agent_config.heartbeat_interval(),
                )),
                tokio::spawn(background_task(
                    self.behavior.clone(),
                    self.state.clone(),
                    shutdown.clone(),
                )),
            ];
            lifecycle.shutdown = Some(shutdown);
        }

        if let Err(source) = self.behavior.initialize(&self.state).await {
            error!(agent_id = %self.id(), error = %source, "Agent initialization failed");
            self.state.set_status(AgentStatus::Error);
            self.halt_loops().await;
            return Err(AgentError::InitializationFailed {
                agent_id: self.id().to_string(),
                source,
            });
        }

        self.state.set_status(AgentStatus::Online);
        info!(
            agent_id = %self.id(),
            agent_type = %self.descriptor().agent_type,
            "Agent started"
        );
        Ok(())
    }

    /// Run `cleanup()` and halt all loops. Loops observe the stop between
    /// messages; a handler in progress finishes unless it outlives the
    /// shutdown grace period.
    pub async fn stop(&self) -> Result<(), AgentError> {
        if self.lifecycle.lock().await.shutdown.is_none() {
            return Err(AgentError::NotRunning(self.id().to_string()));
        }

        self.state.set_status(AgentStatus::Stopping);
        if let Err(e) = self.behavior.cleanup(&self.state).await {
            warn!(agent_id = %self.id(), error = %e, "Agent cleanup failed");
        }
        self.halt_loops().await;
        self.state.set_status(AgentStatus::Offline);

        info!(agent_id = %self.id(), "Agent stopped");
        Ok(())
    }

    async fn halt_loops(&self) {
        let (shutdown, tasks) = {
            let mut lifecycle = self.lifecycle.lock().await;
            (lifecycle.shutdown.take(), std::mem::take(&mut lifecycle.tasks))
        };
        let Some(shutdown) = shutdown else {
            return;
        };
        shutdown.cancel();

        let grace = self.state.context.agent_config().shutdown_grace();
        for mut task in tasks {
            if tokio::time::timeout(grace, &mut task).await.is_err() {
                warn!(
                    agent_id = %self.id(),
                    grace_secs = grace.as_secs(),
                    "Agent task did not stop within grace period, aborting"
                );
                task.abort();
            }
        }
    }

    /// Enqueue a message directly into this agent's mailbox. Never blocks;
    /// returns the evicted oldest message if the mailbox was full.
    pub fn receive_message(&self, message: Message) -> Option<Message> {
        let evicted = self.state.mailbox.push(message);
        if evicted.is_some() {
            debug!(agent_id = %self.id(), "Mailbox full, evicted oldest message");
        }
        evicted
    }

    pub async fn send_message(&self, message: Message) -> bool {
        self.state.send_message(message).await
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        self.state.snapshot()
    }
}

impl AgentPort for Agent {
    fn agent_id(&self) -> &str {
        self.id()
    }

    fn mailbox(&self) -> Arc<Mailbox> {
        self.state.mailbox.clone()
    }

    fn snapshot(&self) -> Option<AgentSnapshot> {
        Some(self.state.snapshot())
    }
}

async fn message_loop(
    state: Arc<AgentState>,
    handlers: HandlerTable,
    shutdown: CancellationToken,
    poll_interval: Duration,
) {
    debug!(agent_id = %state.id(), "Message loop started");
    loop {
        let message = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            received = tokio::time::timeout(poll_interval, state.mailbox.recv()) => match received {
                Ok(message) => message,
                Err(_) => continue,
            },
        };
        let _in_flight = InFlight::enter(&state);
        dispatch(&state, &handlers, message).await;
    }
    debug!(agent_id = %state.id(), "Message loop stopped");
}

/// Counts one message as in flight until dropped, so an aborted or
/// panicking handler still releases it.
struct InFlight<'a>(&'a AgentState);

impl<'a> InFlight<'a> {
    fn enter(state: &'a AgentState) -> Self {
        state.in_flight.fetch_add(1, Ordering::SeqCst);
        Self(state)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn dispatch(state: &Arc<AgentState>, handlers: &HandlerTable, message: Message) {
    let handler = handlers.read().get(message.kind()).cloned();
    let Some(handler) = handler else {
        debug!(
            agent_id = %state.id(),
            kind = %message.kind(),
            message_id = %message.id(),
            "No handler for message kind, dropping"
        );
        return;
    };

    let result = handler.handle(state.clone(), message.clone()).await;
    state.tasks_processed.fetch_add(1, Ordering::Relaxed);
    metrics::counter!("nexus_agent_tasks_processed_total", "agent_id" => state.id().to_string())
        .increment(1);

    match result {
        Ok(Some(reply)) => {
            if !state.send_message(reply).await {
                warn!(
                    agent_id = %state.id(),
                    correlation_id = %message.correlation_id(),
                    "Reply could not be delivered"
                );
            }
        }
        Ok(None) => {}
        Err(e) => {
            state.errors.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("nexus_agent_errors_total", "agent_id" => state.id().to_string())
                .increment(1);
            error!(
                agent_id = %state.id(),
                kind = %message.kind(),
                message_id = %message.id(),
                correlation_id = %message.correlation_id(),
                error = %e,
                "Message handler failed"
            );

            let payload = into_payload(json!({
                "error": e.to_string(),
                "original_message": message.to_record_value(),
            }));
            state
                .send_message(message.reply(MessageKind::Error, payload, state.id()))
                .await;
        }
    }
}

async fn heartbeat_loop(state: Arc<AgentState>, shutdown: CancellationToken, every: Duration) {
    let mut tick = tokio::time::interval(every);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = tick.tick() => send_heartbeat(&state).await,
        }
    }
}

async fn send_heartbeat(state: &AgentState) {
    let now = Utc::now();
    *state.last_heartbeat.write() = now;

    let report = HeartbeatReport {
        agent_id: state.id().to_string(),
        status: state.status(),
        timestamp: now,
        tasks_processed: state.tasks_processed(),
        errors: state.errors(),
    };
    if !state.send_message(report.into_message()).await {
        warn!(agent_id = %state.id(), "Heartbeat was not delivered");
    }
}

async fn background_task(
    behavior: Arc<dyn AgentBehavior>,
    state: Arc<AgentState>,
    shutdown: CancellationToken,
) {
    if let Err(e) = behavior.run(state.clone(), shutdown).await {
        error!(agent_id = %state.id(), error = %e, "Agent background task failed");
    }
}

async fn handle_ping(agent: Arc<AgentState>, message: Message) -> anyhow::Result<Option<Message>> {
    let payload = into_payload(json!({ "timestamp": Utc::now().to_rfc3339() }));
    Ok(Some(message.reply(MessageKind::Pong, payload, agent.id())))
}

async fn handle_heartbeat_request(
    agent: Arc<AgentState>,
    message: Message,
) -> anyhow::Result<Option<Message>> {
    let payload = into_payload(json!({
        "agent_id": agent.id(),
        "status": agent.status(),
        "last_heartbeat": agent.last_heartbeat().to_rfc3339(),
        "capabilities": agent.descriptor().capabilities,
        "tasks_processed": agent.tasks_processed(),
        "errors": agent.errors(),
    }));
    Ok(Some(message.reply(MessageKind::HeartbeatResponse, payload, agent.id())))
}

async fn handle_status_request(
    agent: Arc<AgentState>,
    message: Message,
) -> anyhow::Result<Option<Message>> {
    let snapshot = agent.snapshot();
    let payload = into_payload(json!({
        "agent_id": snapshot.agent_id,
        "agent_type": snapshot.agent_type,
        "status": snapshot.status,
        "capabilities": snapshot.capabilities,
        "uptime": snapshot.uptime_seconds(Utc::now()),
        "performance": {
            "tasks_processed": snapshot.tasks_processed,
            "errors": snapshot.errors,
            "error_rate": snapshot.error_rate(),
        },
    }));
    Ok(Some(message.reply(MessageKind::StatusResponse, payload, agent.id())))
}
