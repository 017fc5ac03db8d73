// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Blocking wait on an agent inbox.
//!
//! The wait never mutates the queue. It returns the current pending batch as
//! soon as the inbox is non-empty, or an empty batch when the timeout
//! elapses. Exactly one waiter per queue is supported.
//!
//! A waiter blocked on an idle inbox is still a healthy worker, so a
//! keepalive can be attached that fires on entry, at most every `every`
//! while blocked, and on return.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use postbox_config::PostboxConfig;
use postbox_core::{Message, PostboxError, QueueState};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::atomic::ensure_dir;
use crate::delivery::DeliveryManager;
use crate::scheduler::{try_watch, wait_for_event_or_timeout, Wake};

const MIN_POLL: Duration = Duration::from_millis(100);
const MAX_POLL: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone)]
pub struct WaitOptions {
    pub poll_interval: Duration,
    pub use_watcher: bool,
    pub batch_limit: usize,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1500),
            use_watcher: true,
            batch_limit: 10,
        }
    }
}

impl WaitOptions {
    pub fn from_config(config: &PostboxConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.wait.poll_interval_ms),
            use_watcher: config.wait.use_watcher,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitState {
    Idle,
    /// A wait is outstanding on `agent`'s inbox.
    Armed { agent: String },
}

/// Result of one wait call.
#[derive(Debug, Clone, Serialize)]
pub struct WaitOutcome {
    pub messages: Vec<Message>,
    pub wake: Wake,
}

type Beat<'a> = Box<dyn Fn() -> Result<(), PostboxError> + Send + Sync + 'a>;

struct Keepalive<'a> {
    every: Duration,
    beat: Beat<'a>,
    last: Mutex<Option<Instant>>,
}

impl Keepalive<'_> {
    fn tick(&self, force: bool) {
        let Ok(mut last) = self.last.lock() else {
            return;
        };
        let due = force || last.is_none_or(|at| at.elapsed() >= self.every);
        if !due {
            return;
        }
        if let Err(e) = (self.beat)() {
            warn!(error = %e, "keepalive failed");
        }
        *last = Some(Instant::now());
    }
}

pub struct BlockingWait<'a> {
    manager: &'a DeliveryManager,
    options: WaitOptions,
    state: WaitState,
    keepalive: Option<Keepalive<'a>>,
}

impl<'a> BlockingWait<'a> {
    pub fn new(manager: &'a DeliveryManager, options: WaitOptions) -> Self {
        let poll_interval = options.poll_interval.clamp(MIN_POLL, MAX_POLL);
        Self {
            manager,
            options: WaitOptions {
                poll_interval,
                ..options
            },
            state: WaitState::Idle,
            keepalive: None,
        }
    }

    /// Call `beat` on entry, at most every `every` while blocked, and on return.
    pub fn with_keepalive(
        mut self,
        every: Duration,
        beat: impl Fn() -> Result<(), PostboxError> + Send + Sync + 'a,
    ) -> Self {
        self.keepalive = Some(Keepalive {
            every,
            beat: Box::new(beat),
            last: Mutex::new(None),
        });
        self
    }

    pub fn state(&self) -> &WaitState {
        &self.state
    }

    /// Wait until `agent`'s inbox has work, `timeout` elapses, or `cancel` fires.
    pub async fn wait(
        &mut self,
        agent: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<WaitOutcome, PostboxError> {
        let limit = self.options.batch_limit;
        let peek = || self.manager.peek(agent, QueueState::Inbox, limit);
        let keepalive = self.keepalive.as_ref();
        let beat = |force: bool| {
            if let Some(k) = keepalive {
                k.tick(force);
            }
        };

        beat(true);
        // Hot path: work is already pending.
        let batch = peek()?;
        if !batch.is_empty() {
            return Ok(WaitOutcome {
                messages: batch,
                wake: Wake::Ready,
            });
        }

        let inbox = self.manager.store().layout().dir(agent, QueueState::Inbox);
        ensure_dir(&inbox)?;
        let mut events = if self.options.use_watcher {
            try_watch(&inbox)
        } else {
            None
        };

        self.state = WaitState::Armed {
            agent: agent.to_string(),
        };
        debug!(agent, timeout_secs = timeout.as_secs(), "waiting for inbox");
        let result = wait_for_event_or_timeout(
            || {
                beat(false);
                Ok(!peek()?.is_empty())
            },
            timeout,
            self.options.poll_interval,
            events.as_mut(),
            cancel,
        )
        .await;
        self.state = WaitState::Idle;
        beat(true);

        let wake = result?;
        Ok(WaitOutcome {
            messages: peek()?,
            wake,
        })
    }
}
