// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Inbound fan-out and outbound dispatch between channels and agent queues.
//!
//! Inbound: each channel is polled from its persisted cursor; every event is
//! routed to one agent inbox and the cursor advances only after the enqueue
//! succeeded. Outbound: every agent outbox is scanned, each reply goes to the
//! adapter named by its `source`, and it is archived only after the adapter
//! confirms delivery.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use postbox_config::PostboxConfig;
use postbox_config::model::ChannelKind;
use postbox_core::{
    ChannelAdapter, ChatId, InboundMessage, Message, OutboundMessage, PostboxError,
    error::UNAVAILABLE_TEXT,
};
use postbox_queue::{DeliveryManager, IdempotencyTracker};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::breaker::CircuitBreaker;
use crate::cursor::CursorStore;
use crate::routes::RouteTable;
use crate::spool::SpoolChannel;

/// Shared handle to a connected channel adapter.
pub type SharedChannel = Arc<dyn ChannelAdapter + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InboundReport {
    pub enqueued: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutboundReport {
    pub sent: usize,
    pub deferred: usize,
}

#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub failure_threshold: u32,
    pub cooldown: Duration,
    pub poll_interval: Duration,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
            poll_interval: Duration::from_secs(5),
        }
    }
}

impl RouterSettings {
    pub fn from_config(config: &PostboxConfig) -> Self {
        Self {
            failure_threshold: config.router.channel_failure_threshold,
            cooldown: Duration::from_secs(config.router.channel_cooldown_secs),
            poll_interval: Duration::from_secs(config.router.poll_interval_secs),
        }
    }
}

/// Generic reply sent back to a user when their message could not be queued.
pub fn unavailable_reply(channel: &str, event: &InboundMessage) -> Option<OutboundMessage> {
    let chat_id = event.chat_id.clone()?;
    Some(OutboundMessage {
        id: postbox_queue::next_id(),
        channel: channel.to_string(),
        chat_id,
        topic: event.topic.clone(),
        text: UNAVAILABLE_TEXT.to_string(),
        agent: String::new(),
    })
}

fn to_message(channel: &str, event: InboundMessage) -> Message {
    let mut msg = Message::text(channel, event.text).with_kind(event.kind);
    msg.chat_id = event.chat_id;
    msg.user_id = event.user_id;
    msg.username = event.username;
    msg.user_name = event.user_name;
    msg.topic = event.topic;
    msg.image_file = event.image_file;
    msg.callback_data = event.callback_data;
    msg.external_id = Some(event.external_id);
    msg
}

pub struct Router {
    manager: Arc<DeliveryManager>,
    routes: RouteTable,
    cursors: CursorStore,
    channels: Vec<(String, SharedChannel)>,
    settings: RouterSettings,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
    seen: Mutex<IdempotencyTracker>,
}

impl Router {
    pub fn new(
        manager: Arc<DeliveryManager>,
        routes: RouteTable,
        cursors: CursorStore,
        settings: RouterSettings,
    ) -> Self {
        Self {
            manager,
            routes,
            cursors,
            channels: Vec::new(),
            settings,
            breakers: Mutex::new(HashMap::new()),
            seen: Mutex::new(IdempotencyTracker::default()),
        }
    }

    /// Build a router over the configured channels, connecting each adapter.
    pub async fn from_config(
        config: &PostboxConfig,
        manager: Arc<DeliveryManager>,
    ) -> Result<Self, PostboxError> {
        let mut router = Self::new(
            manager,
            RouteTable::from_config(config),
            CursorStore::in_state_dir(&config.state_dir()),
            RouterSettings::from_config(config),
        );
        for channel in &config.router.channels {
            match channel.kind {
                ChannelKind::Spool => {
                    let mut adapter = SpoolChannel::from_config(channel);
                    adapter.connect().await?;
                    router.add_channel(&channel.name, Arc::new(adapter));
                }
            }
        }
        Ok(router)
    }

    /// Register a connected adapter under `name`, the value messages carry in `source`.
    pub fn add_channel(&mut self, name: &str, channel: SharedChannel) {
        self.channels.push((name.to_string(), channel));
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|(n, _)| n.as_str()).collect()
    }

    fn channel(&self, name: &str) -> Option<&SharedChannel> {
        self.channels
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
    }

    /// Poll every channel once and enqueue what arrived.
    pub async fn poll_inbound(&self) -> InboundReport {
        let mut total = InboundReport::default();
        for (name, channel) in &self.channels {
            match self.poll_channel(name, channel).await {
                Ok(report) => {
                    total.enqueued += report.enqueued;
                    total.skipped += report.skipped;
                    total.failed += report.failed;
                }
                Err(e) => {
                    warn!(channel = %name, error = %e, "inbound poll failed");
                    total.failed += 1;
                }
            }
        }
        total
    }

    async fn poll_channel(
        &self,
        name: &str,
        channel: &SharedChannel,
    ) -> Result<InboundReport, PostboxError> {
        let cursor = self.cursors.get(name)?;
        let events = channel.poll(cursor.as_deref()).await?;
        let mut report = InboundReport::default();

        for event in events {
            let event_cursor = event.cursor.clone();
            let key = format!("{name}:{}", event.external_id);

            if event.is_bot {
                debug!(channel = %name, cursor = %event_cursor, "skipping bot message");
                report.skipped += 1;
                self.cursors.advance(name, &event_cursor)?;
                continue;
            }
            if self.seen.lock().await.contains(&key) {
                report.skipped += 1;
                self.cursors.advance(name, &event_cursor)?;
                continue;
            }

            let agent = self.routes.resolve(name, event.topic.as_deref()).to_string();
            let reply = unavailable_reply(name, &event);
            match self.manager.enqueue(&agent, to_message(name, event)) {
                Ok(id) => {
                    info!(channel = %name, agent = %agent, %id, "inbound routed");
                    self.seen.lock().await.check_and_record(&key);
                    self.cursors.advance(name, &event_cursor)?;
                    report.enqueued += 1;
                }
                Err(e) => {
                    // Leave the cursor where it is so the next pass re-polls this event.
                    error!(channel = %name, agent = %agent, error = %e, "enqueue failed");
                    report.failed += 1;
                    if let Some(reply) = reply
                        && let Err(send_err) = channel.send(reply).await
                    {
                        warn!(channel = %name, error = %send_err, "could not send unavailable notice");
                    }
                    break;
                }
            }
        }
        Ok(report)
    }

    /// Deliver every pending reply in every agent outbox.
    pub async fn dispatch_outbound(&self) -> OutboundReport {
        let mut report = OutboundReport::default();
        let agents = self.agents();
        for agent in &agents {
            let pending = match self.manager.pending_outbound(agent) {
                Ok(pending) => pending,
                Err(e) => {
                    warn!(agent = %agent, error = %e, "cannot read outbox");
                    continue;
                }
            };
            for msg in pending {
                match self.deliver(agent, msg).await {
                    Ok(()) => report.sent += 1,
                    Err(e) => {
                        debug!(agent = %agent, error = %e, "reply deferred");
                        report.deferred += 1;
                    }
                }
            }
        }
        report
    }

    fn agents(&self) -> Vec<String> {
        let known = self.manager.agents();
        if known.is_empty() {
            vec![self.routes.default_agent().to_string()]
        } else {
            known.to_vec()
        }
    }

    async fn deliver(&self, agent: &str, msg: Message) -> Result<(), PostboxError> {
        let channel_name = msg.source.clone();
        let channel = self.channel(&channel_name).ok_or_else(|| {
            PostboxError::ChannelUnreachable {
                channel: channel_name.clone(),
                message: "no adapter configured".into(),
            }
        })?;
        let chat_id: ChatId = msg.chat_id.clone().ok_or_else(|| {
            PostboxError::InvalidInput(format!("reply {} has no chat_id", msg.id))
        })?;

        if !self.breaker_allows(&channel_name).await {
            return Err(PostboxError::ChannelUnreachable {
                channel: channel_name,
                message: "circuit open".into(),
            });
        }

        let outbound = OutboundMessage {
            id: msg.id.clone(),
            channel: channel_name.clone(),
            chat_id,
            topic: msg.topic.clone(),
            text: msg.text.clone(),
            agent: agent.to_string(),
        };
        match channel.send(outbound).await {
            Ok(receipt) => {
                self.breaker_result(&channel_name, true).await;
                self.manager.mark_sent(agent, &msg.id)?;
                info!(agent, channel = %channel_name, id = %msg.id, %receipt, "reply delivered");
                Ok(())
            }
            Err(e) => {
                self.breaker_result(&channel_name, false).await;
                warn!(agent, channel = %channel_name, id = %msg.id, error = %e, "reply delivery failed, kept in outbox");
                Err(e)
            }
        }
    }

    async fn breaker_allows(&self, channel: &str) -> bool {
        let mut breakers = self.breakers.lock().await;
        breakers
            .entry(channel.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.settings.failure_threshold, self.settings.cooldown))
            .allow()
    }

    async fn breaker_result(&self, channel: &str, ok: bool) {
        let mut breakers = self.breakers.lock().await;
        let breaker = breakers
            .entry(channel.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.settings.failure_threshold, self.settings.cooldown));
        if ok {
            breaker.record_success();
        } else {
            breaker.record_failure();
        }
    }

    /// One inbound pass followed by one outbound pass.
    pub async fn run_once(&self) -> (InboundReport, OutboundReport) {
        let inbound = self.poll_inbound().await;
        let outbound = self.dispatch_outbound().await;
        (inbound, outbound)
    }

    /// Route until cancelled.
    pub async fn run(&self, cancel: &CancellationToken) {
        info!(channels = self.channels.len(), "router started");
        postbox_queue::run_every(self.settings.poll_interval, cancel, || async move {
            let (inbound, outbound) = self.run_once().await;
            if inbound.enqueued + outbound.sent > 0 {
                debug!(?inbound, ?outbound, "router pass");
            }
        })
        .await;
        for (name, channel) in &self.channels {
            if let Err(e) = channel.shutdown().await {
                warn!(channel = %name, error = %e, "channel shutdown error");
            }
        }
        info!("router stopped");
    }
}
