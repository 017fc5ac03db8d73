// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Router integration tests over a temporary queue and mock channels.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use postbox_core::{ChatId, QueueState, error::UNAVAILABLE_TEXT};
use postbox_queue::ReplyRequest;
use postbox_router::{CursorStore, RouteTable, Router, RouterSettings, SpoolChannel};
use postbox_test_utils::{MockChannel, TestQueue};

fn router(queue: &TestQueue) -> Router {
    Router::new(
        queue.manager.clone(),
        RouteTable::from_config(&queue.config),
        CursorStore::in_state_dir(&queue.state_dir()),
        RouterSettings {
            failure_threshold: 2,
            cooldown: Duration::from_secs(3600),
            poll_interval: Duration::from_millis(50),
        },
    )
}

// ---- Fan-out ----

#[tokio::test]
async fn mapped_topic_reaches_only_its_agent_and_reply_uses_origin_channel() {
    let queue = TestQueue::builder()
        .with_agent("ops")
        .with_route("telegram", Some("ops-room"), "ops")
        .build()
        .unwrap();
    let telegram = Arc::new(MockChannel::new("telegram"));
    let slack = Arc::new(MockChannel::new("slack"));
    let mut router = router(&queue);
    router.add_channel("telegram", telegram.clone());
    router.add_channel("slack", slack.clone());

    telegram
        .inject(telegram.event(99, Some("ops-room"), "deploy failed"))
        .await;
    let inbound = router.poll_inbound().await;
    assert_eq!(inbound.enqueued, 1);

    let ops = queue.manager.dequeue_batch("ops", 10).unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].source, "telegram");
    assert!(queue.manager.dequeue_batch("main", 10).unwrap().is_empty());

    queue
        .manager
        .send_reply("ops", ReplyRequest::new("telegram", 99i64, "rolling back"))
        .unwrap();
    let outbound = router.dispatch_outbound().await;
    assert_eq!(outbound.sent, 1);

    let sent = telegram.sent_messages().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].chat_id, ChatId::Int(99));
    assert_eq!(sent[0].agent, "ops");
    assert_eq!(slack.sent_count().await, 0);
    assert_eq!(queue.manager.stats("ops").unwrap().count(QueueState::Sent), 1);
}

#[tokio::test]
async fn unmapped_topic_goes_to_default_agent() {
    let queue = TestQueue::builder()
        .with_agent("ops")
        .with_route("telegram", Some("ops-room"), "ops")
        .build()
        .unwrap();
    let telegram = Arc::new(MockChannel::new("telegram"));
    let mut router = router(&queue);
    router.add_channel("telegram", telegram.clone());

    telegram.inject(telegram.event(1, Some("random"), "hi")).await;
    router.poll_inbound().await;

    assert_eq!(queue.manager.dequeue_batch("main", 10).unwrap().len(), 1);
    assert!(queue.manager.dequeue_batch("ops", 10).unwrap().is_empty());
}

// ---- Cursors ----

#[tokio::test]
async fn restart_resumes_from_persisted_cursor() {
    let queue = TestQueue::builder().build().unwrap();
    let telegram = Arc::new(MockChannel::new("telegram"));
    telegram.inject(telegram.event(1, None, "first")).await;
    telegram.inject(telegram.event(1, None, "second")).await;

    {
        let mut router = router(&queue);
        router.add_channel("telegram", telegram.clone());
        assert_eq!(router.poll_inbound().await.enqueued, 2);
    }

    // A fresh router has no in-memory dedupe state; only the cursor protects us.
    let mut restarted = router(&queue);
    restarted.add_channel("telegram", telegram.clone());
    telegram.inject(telegram.event(1, None, "third")).await;
    assert_eq!(restarted.poll_inbound().await.enqueued, 1);

    let texts: Vec<String> = queue
        .manager
        .dequeue_batch("main", 10)
        .unwrap()
        .into_iter()
        .map(|m| m.text)
        .collect();
    assert_eq!(texts, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn bot_messages_are_skipped_but_advance_cursor() {
    let queue = TestQueue::builder().build().unwrap();
    let telegram = Arc::new(MockChannel::new("telegram"));
    let mut own = telegram.event(1, None, "echo of our reply");
    own.is_bot = true;
    let own_cursor = own.cursor.clone();
    telegram.inject(own).await;

    let mut router = router(&queue);
    router.add_channel("telegram", telegram.clone());
    let report = router.poll_inbound().await;
    assert_eq!(report.enqueued, 0);
    assert_eq!(report.skipped, 1);
    assert!(queue.manager.dequeue_batch("main", 10).unwrap().is_empty());

    let cursors = CursorStore::in_state_dir(&queue.state_dir());
    assert_eq!(cursors.get("telegram").unwrap(), Some(own_cursor));
}

#[tokio::test]
async fn enqueue_failure_keeps_cursor_and_notifies_user() {
    let queue = TestQueue::builder()
        .with_route("telegram", None, "ghost")
        .build()
        .unwrap();
    let telegram = Arc::new(MockChannel::new("telegram"));
    telegram.inject(telegram.event(5, None, "hello?")).await;

    let mut router = router(&queue);
    router.add_channel("telegram", telegram.clone());
    let report = router.poll_inbound().await;
    assert_eq!(report.failed, 1);

    let sent = telegram.sent_messages().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].text, UNAVAILABLE_TEXT);
    let cursors = CursorStore::in_state_dir(&queue.state_dir());
    assert_eq!(cursors.get("telegram").unwrap(), None);
}

// ---- Outbound failures ----

#[tokio::test]
async fn failed_send_keeps_reply_and_breaker_opens() {
    let queue = TestQueue::builder().build().unwrap();
    let slack = Arc::new(MockChannel::new("slack"));
    slack.set_failing(true);
    let mut router = router(&queue);
    router.add_channel("slack", slack.clone());

    queue
        .manager
        .send_reply("main", ReplyRequest::new("slack", "C42", "hello"))
        .unwrap();

    for _ in 0..2 {
        let report = router.dispatch_outbound().await;
        assert_eq!(report.sent, 0);
        assert_eq!(report.deferred, 1);
    }
    assert_eq!(queue.manager.outbox_len("main").unwrap(), 1);

    // Circuit is open now: even a healthy channel is not tried until cooldown.
    slack.set_failing(false);
    assert_eq!(router.dispatch_outbound().await.sent, 0);
    assert_eq!(slack.sent_count().await, 0);
    assert_eq!(queue.manager.outbox_len("main").unwrap(), 1);
}

#[tokio::test]
async fn reply_for_unknown_channel_stays_in_outbox() {
    let queue = TestQueue::builder().build().unwrap();
    let router = router(&queue);
    queue
        .manager
        .send_reply("main", ReplyRequest::new("sms", 15551234i64, "hi"))
        .unwrap();
    assert_eq!(router.dispatch_outbound().await.deferred, 1);
    assert_eq!(queue.manager.outbox_len("main").unwrap(), 1);
}

// ---- Spool channel ----

#[tokio::test]
async fn half_written_spool_event_is_not_skipped_by_the_cursor() {
    let queue = TestQueue::builder().build().unwrap();
    let inbound = queue.root().join("spool-in");
    let outbound = queue.root().join("spool-out");
    std::fs::create_dir_all(&inbound).unwrap();
    std::fs::create_dir_all(&outbound).unwrap();
    let spool = Arc::new(SpoolChannel::new("bridge", &inbound, &outbound));
    let mut router = router(&queue);
    router.add_channel("bridge", spool);

    std::fs::write(inbound.join("1.json"), r#"{"text": "first"}"#).unwrap();
    std::fs::write(inbound.join("2.json"), r#"{"text": "sec"#).unwrap();
    std::fs::write(inbound.join("3.json"), r#"{"text": "third"}"#).unwrap();

    let first = router.poll_inbound().await;
    assert_eq!(first.enqueued, 1);

    // The bridge finishes writing; the next pass picks it up in order.
    std::fs::write(inbound.join("2.json"), r#"{"text": "second"}"#).unwrap();
    let second = router.poll_inbound().await;
    assert_eq!(second.enqueued, 2);

    let texts: Vec<String> = queue
        .manager
        .dequeue_batch("main", 10)
        .unwrap()
        .into_iter()
        .map(|m| m.text)
        .collect();
    assert_eq!(texts, ["first", "second", "third"]);
}

#[tokio::test]
async fn abandoned_spool_event_is_rejected_and_later_events_flow() {
    let queue = TestQueue::builder().build().unwrap();
    let inbound = queue.root().join("spool-in");
    let outbound = queue.root().join("spool-out");
    std::fs::create_dir_all(&inbound).unwrap();
    std::fs::create_dir_all(&outbound).unwrap();
    let spool = Arc::new(SpoolChannel::new("bridge", &inbound, &outbound));
    let rejected = spool.rejected_dir();
    let mut router = router(&queue);
    router.add_channel("bridge", spool);

    std::fs::write(inbound.join("1.json"), "{broken").unwrap();
    std::fs::File::options()
        .write(true)
        .open(inbound.join("1.json"))
        .unwrap()
        .set_modified(SystemTime::now() - Duration::from_secs(300))
        .unwrap();
    std::fs::write(inbound.join("2.json"), r#"{"text": "after"}"#).unwrap();

    let report = router.poll_inbound().await;
    assert_eq!(report.enqueued, 1);
    assert!(rejected.join("1.json").exists());
    assert_eq!(queue.manager.dequeue_batch("main", 10).unwrap()[0].text, "after");
}
