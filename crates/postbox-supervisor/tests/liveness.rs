// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Supervisor and injector scenarios against a recording process control.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::Utc;
use postbox_config::model::AgentConfig;
use postbox_core::{Message, MessageKind, PostboxError, QueueState};
use postbox_queue::store::has_kind_suffix;
use postbox_supervisor::{
    HandleStore, HeartbeatStore, InjectOutcome, LivenessSupervisor, OpLock, ProcessControl,
    ProcessHandle, RateLimitStore, SelfCheckInjector, SupervisorAction, collect_status,
};
use postbox_test_utils::TestQueue;

/// Records every process operation instead of performing it.
#[derive(Default)]
struct FakeControl {
    alive: Mutex<HashSet<u32>>,
    launches: Mutex<Vec<String>>,
    stops: Mutex<Vec<u32>>,
    killed_groups: Mutex<Vec<u32>>,
    next_pid: AtomicU32,
}

impl FakeControl {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            next_pid: AtomicU32::new(1000),
            ..Default::default()
        })
    }

    fn launches(&self) -> usize {
        self.launches.lock().unwrap().len()
    }
}

#[async_trait]
impl ProcessControl for FakeControl {
    fn is_alive(&self, handle: &ProcessHandle) -> bool {
        self.alive.lock().unwrap().contains(&handle.pid)
    }

    async fn launch(&self, agent: &AgentConfig, _log: &Path) -> Result<ProcessHandle, PostboxError> {
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.alive.lock().unwrap().insert(pid);
        self.launches.lock().unwrap().push(agent.name.clone());
        Ok(ProcessHandle {
            pid,
            pgid: pid,
            start_time: 1,
            command: agent.start_command.clone(),
            started_at: Utc::now(),
        })
    }

    async fn stop(&self, handle: &ProcessHandle, _grace: Duration) -> Result<(), PostboxError> {
        self.alive.lock().unwrap().remove(&handle.pid);
        self.stops.lock().unwrap().push(handle.pid);
        Ok(())
    }

    fn kill_group(&self, pgid: u32) -> Result<(), PostboxError> {
        self.killed_groups.lock().unwrap().push(pgid);
        Ok(())
    }
}

fn fixture() -> (TestQueue, Arc<FakeControl>) {
    let queue = TestQueue::builder().with_agent("worker").build().unwrap();
    (queue, FakeControl::new())
}

fn heartbeat(queue: &TestQueue) -> HeartbeatStore {
    let agent = queue.config.agent("worker").unwrap();
    HeartbeatStore::new(queue.config.heartbeat_path(agent))
}

/// Pretend `worker` is running as `pid`.
fn seed_running(queue: &TestQueue, control: &FakeControl, pid: u32) {
    HandleStore::for_agent(&queue.state_dir(), "worker")
        .save(&ProcessHandle {
            pid,
            pgid: pid,
            start_time: 1,
            command: vec!["true".into()],
            started_at: Utc::now(),
        })
        .unwrap();
    control.alive.lock().unwrap().insert(pid);
}

// ---- Liveness supervisor ----

#[tokio::test]
async fn stale_heartbeat_restarts_exactly_once() {
    let (queue, control) = fixture();
    seed_running(&queue, &control, 77);
    let now = SystemTime::now();
    heartbeat(&queue).touch_at(now - Duration::from_secs(700)).unwrap();

    let supervisor = LivenessSupervisor::from_config(&queue.config, control.clone());
    let checks = supervisor.run_pass(now).await.unwrap();
    assert_eq!(checks.len(), 1);
    assert!(matches!(
        checks[0].action,
        SupervisorAction::Restarted { age_secs: 700, .. }
    ));
    assert_eq!(*control.stops.lock().unwrap(), vec![77]);
    assert_eq!(*control.killed_groups.lock().unwrap(), vec![77]);
    assert_eq!(control.launches(), 1);
    assert!(heartbeat(&queue).age(now).unwrap().unwrap() < Duration::from_secs(1));

    let handle = HandleStore::for_agent(&queue.state_dir(), "worker")
        .load()
        .unwrap()
        .unwrap();
    assert_eq!(handle.pid, 1000);

    // Immediately after: the heartbeat is fresh, nothing happens.
    let again = supervisor
        .run_pass(now + Duration::from_secs(1))
        .await
        .unwrap();
    assert!(matches!(again[0].action, SupervisorAction::Healthy { .. }));
    assert_eq!(control.launches(), 1);
    assert_eq!(control.stops.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn missing_heartbeat_starts_worker() {
    let (queue, control) = fixture();
    let supervisor = LivenessSupervisor::from_config(&queue.config, control.clone());
    let now = SystemTime::now();

    let checks = supervisor.run_pass(now).await.unwrap();
    assert!(matches!(checks[0].action, SupervisorAction::Started { pid: 1000 }));
    assert_eq!(control.launches(), 1);
    assert!(heartbeat(&queue).last_beat().unwrap().is_some());

    supervisor.run_pass(now).await.unwrap();
    assert_eq!(control.launches(), 1);
}

#[tokio::test]
async fn live_worker_without_heartbeat_is_not_started_twice() {
    let (queue, control) = fixture();
    seed_running(&queue, &control, 55);
    let supervisor = LivenessSupervisor::from_config(&queue.config, control.clone());

    let checks = supervisor.run_pass(SystemTime::now()).await.unwrap();
    assert_eq!(checks[0].action, SupervisorAction::Adopted { pid: 55 });
    assert_eq!(control.launches(), 0);
}

#[tokio::test]
async fn fresh_heartbeat_is_a_no_op() {
    let (queue, control) = fixture();
    seed_running(&queue, &control, 55);
    let now = SystemTime::now();
    heartbeat(&queue).touch_at(now - Duration::from_secs(30)).unwrap();

    let supervisor = LivenessSupervisor::from_config(&queue.config, control.clone());
    let checks = supervisor.run_pass(now).await.unwrap();
    assert_eq!(checks[0].action, SupervisorAction::Healthy { age_secs: 30 });
    assert_eq!(control.launches(), 0);
    assert!(control.stops.lock().unwrap().is_empty());
}

#[tokio::test]
async fn plain_touch_after_recorded_beat_keeps_worker_healthy() {
    let (queue, control) = fixture();
    seed_running(&queue, &control, 55);
    let now = SystemTime::now();
    let hb = heartbeat(&queue);
    hb.touch_at(now - Duration::from_secs(700)).unwrap();
    std::fs::File::options()
        .write(true)
        .open(hb.path())
        .unwrap()
        .set_modified(now)
        .unwrap();

    let supervisor = LivenessSupervisor::from_config(&queue.config, control.clone());
    let checks = supervisor.run_pass(now).await.unwrap();
    assert_eq!(checks[0].action, SupervisorAction::Healthy { age_secs: 0 });
    assert_eq!(control.launches(), 0);
}

#[tokio::test]
async fn dead_worker_group_is_not_swept() {
    let (queue, control) = fixture();
    seed_running(&queue, &control, 4242);
    control.alive.lock().unwrap().remove(&4242);
    let now = SystemTime::now();
    heartbeat(&queue).touch_at(now - Duration::from_secs(700)).unwrap();

    let supervisor = LivenessSupervisor::from_config(&queue.config, control.clone());
    let checks = supervisor.run_pass(now).await.unwrap();
    assert!(matches!(checks[0].action, SupervisorAction::Restarted { .. }));
    assert!(control.stops.lock().unwrap().is_empty());
    assert!(control.killed_groups.lock().unwrap().is_empty());
    assert_eq!(control.launches(), 1);
}

#[tokio::test]
async fn overlapping_pass_reports_lock_contention() {
    let (queue, control) = fixture();
    let supervisor = LivenessSupervisor::from_config(&queue.config, control.clone());
    let _held = OpLock::acquire(&queue.state_dir(), "supervisor").unwrap();

    let err = supervisor.run_pass(SystemTime::now()).await.unwrap_err();
    assert!(matches!(err, PostboxError::LockContention { .. }));
    assert_eq!(control.launches(), 0);
}

// ---- Self-check injector ----

fn self_checks_in_inbox(queue: &TestQueue) -> usize {
    queue
        .manager
        .store()
        .list("worker", QueueState::Inbox)
        .unwrap()
        .iter()
        .filter(|p| has_kind_suffix(p, MessageKind::SelfCheck))
        .count()
}

fn rate_limit(queue: &TestQueue) -> RateLimitStore {
    RateLimitStore::new(queue.state_dir().join("worker.self_check"))
}

#[tokio::test]
async fn injects_when_last_nudge_is_old_enough() {
    let (queue, control) = fixture();
    seed_running(&queue, &control, 10);
    let now = SystemTime::now();
    rate_limit(&queue).record(now - Duration::from_secs(200)).unwrap();

    let injector = SelfCheckInjector::from_config(&queue.config, queue.manager.clone(), control);
    let outcome = injector.inject("worker", now);
    assert!(matches!(outcome, InjectOutcome::Injected { .. }));
    assert_eq!(self_checks_in_inbox(&queue), 1);

    let msgs = queue.manager.dequeue_batch("worker", 10).unwrap();
    assert_eq!(msgs[0].kind, MessageKind::SelfCheck);
    assert_eq!(msgs[0].source, "system");
    assert!(rate_limit(&queue).elapsed(now).unwrap() <= Duration::from_secs(2));
}

#[tokio::test]
async fn recent_nudge_is_rate_limited() {
    let (queue, control) = fixture();
    seed_running(&queue, &control, 10);
    let now = SystemTime::now();
    rate_limit(&queue).record(now - Duration::from_secs(30)).unwrap();

    let injector = SelfCheckInjector::from_config(&queue.config, queue.manager.clone(), control);
    assert!(matches!(
        injector.inject("worker", now),
        InjectOutcome::SkippedRateLimited { .. }
    ));
    assert_eq!(self_checks_in_inbox(&queue), 0);
}

#[tokio::test]
async fn unread_nudge_blocks_another() {
    let (queue, control) = fixture();
    seed_running(&queue, &control, 10);
    queue
        .manager
        .enqueue(
            "worker",
            Message::text("system", "earlier nudge").with_kind(MessageKind::SelfCheck),
        )
        .unwrap();
    assert_eq!(self_checks_in_inbox(&queue), 1);

    let injector = SelfCheckInjector::from_config(&queue.config, queue.manager.clone(), control);
    // No rate-limit record at all: only the pending file holds it back.
    assert_eq!(injector.inject("worker", SystemTime::now()), InjectOutcome::SkippedPending);
    assert_eq!(self_checks_in_inbox(&queue), 1);
}

#[tokio::test]
async fn stopped_worker_gets_no_nudge() {
    let (queue, control) = fixture();
    let injector = SelfCheckInjector::from_config(&queue.config, queue.manager.clone(), control);
    assert_eq!(
        injector.inject("worker", SystemTime::now()),
        InjectOutcome::SkippedNotRunning
    );
    assert_eq!(self_checks_in_inbox(&queue), 0);
}

#[tokio::test]
async fn pass_covers_declared_agents() {
    let (queue, control) = fixture();
    seed_running(&queue, &control, 10);
    let injector =
        SelfCheckInjector::from_config(&queue.config, queue.manager.clone(), control.clone());
    let outcomes = injector.run_pass(SystemTime::now()).unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].0, "worker");

    let status = collect_status(&queue.config, &queue.manager, control.as_ref(), SystemTime::now())
        .unwrap();
    let worker = status.iter().find(|s| s.agent == "worker").unwrap();
    assert!(worker.alive);
    assert_eq!(worker.pid, Some(10));
    assert_eq!(worker.queue.count(QueueState::Inbox), 1);
    assert!(status.iter().any(|s| s.agent == "main" && !s.alive));
}
