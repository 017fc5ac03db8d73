// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cooperative scheduling primitives shared by every loop in postbox.
//!
//! Two building blocks: [`wait_for_event_or_timeout`] backs the blocking
//! inbox wait, [`run_every`] backs the supervisor, injector and router
//! passes. Both stop promptly when their cancellation token fires.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use postbox_core::PostboxError;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Why a wait returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Wake {
    /// The probe reported work.
    Ready,
    Timeout,
    Cancelled,
}

/// Filesystem create/rename notifications for one directory.
pub struct DirEvents {
    _watcher: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<()>,
}

impl DirEvents {
    /// Start watching `dir` (non-recursive). The directory must exist.
    pub fn watch(dir: &Path) -> Result<Self, PostboxError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) => {
                    let _ = tx.send(());
                }
                Ok(_) => {}
                Err(e) => debug!(error = %e, "watch event error"),
            }
        })
        .map_err(|e| PostboxError::Internal(format!("file watcher: {e}")))?;
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| PostboxError::Internal(format!("watch {}: {e}", dir.display())))?;
        Ok(Self {
            _watcher: watcher,
            rx,
        })
    }

    /// Resolve on the next notification, coalescing any burst already queued.
    pub async fn changed(&mut self) {
        if self.rx.recv().await.is_none() {
            // Watcher gone; fall back to the poll interval.
            std::future::pending::<()>().await;
        }
        while self.rx.try_recv().is_ok() {}
    }
}

/// Block until `probe` reports work, `timeout` elapses, or `cancel` fires.
///
/// `probe` runs first so a hot queue returns without waiting. Between probes
/// the wait sleeps for at most `poll_interval`, waking early on a directory
/// event when `events` is given. The poll is kept even with a watcher so a
/// missed notification costs at most one interval.
pub async fn wait_for_event_or_timeout<F>(
    mut probe: F,
    timeout: Duration,
    poll_interval: Duration,
    mut events: Option<&mut DirEvents>,
    cancel: &CancellationToken,
) -> Result<Wake, PostboxError>
where
    F: FnMut() -> Result<bool, PostboxError>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if probe()? {
            return Ok(Wake::Ready);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(Wake::Timeout);
        }
        let nap = poll_interval.min(deadline - now);

        match events.as_deref_mut() {
            Some(events) => {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(Wake::Cancelled),
                    _ = events.changed() => {}
                    _ = tokio::time::sleep(nap) => {}
                }
            }
            None => {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(Wake::Cancelled),
                    _ = tokio::time::sleep(nap) => {}
                }
            }
        }
    }
}

/// Run `tick` immediately and then every `period` until `cancel` fires.
///
/// A slow tick delays the next one instead of bursting to catch up.
pub async fn run_every<F, Fut>(period: Duration, cancel: &CancellationToken, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("periodic loop cancelled");
                break;
            }
            _ = ticker.tick() => tick().await,
        }
    }
}

/// Watch `dir` if possible; a watcher failure degrades to polling.
pub fn try_watch(dir: &Path) -> Option<DirEvents> {
    match DirEvents::watch(dir) {
        Ok(events) => Some(events),
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "file watcher unavailable, polling");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn hot_probe_returns_immediately() {
        let cancel = CancellationToken::new();
        let wake = wait_for_event_or_timeout(
            || Ok(true),
            Duration::from_secs(60),
            Duration::from_secs(1),
            None,
            &cancel,
        )
        .await
        .unwrap();
        assert_eq!(wake, Wake::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_nothing_arrives() {
        let cancel = CancellationToken::new();
        let probes = AtomicUsize::new(0);
        let started = Instant::now();
        let wake = wait_for_event_or_timeout(
            || {
                probes.fetch_add(1, Ordering::SeqCst);
                Ok(false)
            },
            Duration::from_secs(5),
            Duration::from_secs(2),
            None,
            &cancel,
        )
        .await
        .unwrap();
        assert_eq!(wake, Wake::Timeout);
        assert!(started.elapsed() >= Duration::from_secs(5));
        // t=0, 2, 4, 5
        assert_eq!(probes.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_turning_true_wakes_on_next_poll() {
        let cancel = CancellationToken::new();
        let probes = AtomicUsize::new(0);
        let wake = wait_for_event_or_timeout(
            || Ok(probes.fetch_add(1, Ordering::SeqCst) >= 2),
            Duration::from_secs(60),
            Duration::from_secs(1),
            None,
            &cancel,
        )
        .await
        .unwrap();
        assert_eq!(wake, Wake::Ready);
        assert_eq!(probes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_interrupts_wait() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let wake = wait_for_event_or_timeout(
            || Ok(false),
            Duration::from_secs(60),
            Duration::from_secs(30),
            None,
            &cancel,
        )
        .await
        .unwrap();
        assert_eq!(wake, Wake::Cancelled);
    }

    #[tokio::test]
    async fn probe_error_propagates() {
        let cancel = CancellationToken::new();
        let result = wait_for_event_or_timeout(
            || Err(PostboxError::Internal("boom".into())),
            Duration::from_secs(1),
            Duration::from_millis(100),
            None,
            &cancel,
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn run_every_ticks_until_cancelled() {
        let cancel = CancellationToken::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let handle = {
            let cancel = cancel.clone();
            let ticks = ticks.clone();
            tokio::spawn(async move {
                run_every(Duration::from_secs(10), &cancel, || {
                    let ticks = ticks.clone();
                    async move {
                        ticks.fetch_add(1, Ordering::SeqCst);
                    }
                })
                .await;
            })
        };

        tokio::time::sleep(Duration::from_secs(25)).await;
        cancel.cancel();
        handle.await.unwrap();
        // t=0, 10, 20
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn watcher_wakes_before_poll_interval() {
        let dir = tempfile::tempdir().unwrap();
        let Some(mut events) = try_watch(dir.path()) else {
            return;
        };
        let target = dir.path().join("1.json");
        let cancel = CancellationToken::new();

        let writer = {
            let target = target.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                std::fs::write(target, "{}").unwrap();
            })
        };

        let started = std::time::Instant::now();
        let wake = wait_for_event_or_timeout(
            || Ok(target.exists()),
            Duration::from_secs(20),
            Duration::from_secs(10),
            Some(&mut events),
            &cancel,
        )
        .await
        .unwrap();
        writer.await.unwrap();
        assert_eq!(wake, Wake::Ready);
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
