// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message lifecycle state machine.
//!
//! The persisted representation of a message's state is the directory that
//! holds its file. This module makes the legal moves between those
//! directories explicit so that, for example, a dead-lettered message can
//! only re-enter the inbox through [`Trigger::Requeue`].

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::error::PostboxError;

/// A directory a message file can live in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum QueueState {
    /// Pending work awaiting consumption.
    Inbox,
    /// Claimed by the consumer, not yet acknowledged.
    Processing,
    /// Acknowledged inbound message (archive).
    Processed,
    /// Waiting out a retry backoff.
    Failed,
    /// Terminal storage after the retry budget is spent.
    DeadLetter,
    /// Outbound reply awaiting channel delivery.
    Outbox,
    /// Outbound reply confirmed by the channel adapter (archive).
    Sent,
}

/// Coarse status reported to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Processing,
    Processed,
    Sent,
    DeadLettered,
}

/// An event that moves a message between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Consumer claims a pending message.
    Claim,
    /// Consumer acknowledges successful handling.
    Ack,
    /// Handling failed; wait out a backoff before retrying.
    Defer,
    /// Retry budget spent.
    Exhaust,
    /// File could not be parsed.
    Quarantine,
    /// A claim went stale and is handed back to the inbox.
    Release,
    /// Backoff elapsed.
    Retry,
    /// Operator-initiated redelivery of a dead-lettered message.
    Requeue,
    /// Channel adapter confirmed an outbound reply.
    Deliver,
}

const TRANSITIONS: &[(QueueState, Trigger, QueueState)] = &[
    (QueueState::Inbox, Trigger::Claim, QueueState::Processing),
    (QueueState::Inbox, Trigger::Ack, QueueState::Processed),
    (QueueState::Processing, Trigger::Ack, QueueState::Processed),
    (QueueState::Inbox, Trigger::Defer, QueueState::Failed),
    (QueueState::Processing, Trigger::Defer, QueueState::Failed),
    (QueueState::Inbox, Trigger::Exhaust, QueueState::DeadLetter),
    (QueueState::Processing, Trigger::Exhaust, QueueState::DeadLetter),
    (QueueState::Failed, Trigger::Exhaust, QueueState::DeadLetter),
    (QueueState::Inbox, Trigger::Quarantine, QueueState::DeadLetter),
    (QueueState::Processing, Trigger::Quarantine, QueueState::DeadLetter),
    (QueueState::Failed, Trigger::Quarantine, QueueState::DeadLetter),
    (QueueState::Outbox, Trigger::Quarantine, QueueState::DeadLetter),
    (QueueState::Processing, Trigger::Release, QueueState::Inbox),
    (QueueState::Failed, Trigger::Retry, QueueState::Inbox),
    (QueueState::DeadLetter, Trigger::Requeue, QueueState::Inbox),
    (QueueState::Outbox, Trigger::Deliver, QueueState::Sent),
];

impl QueueState {
    /// Directory name for the default agent. Other agents prefix it with `{agent}-`.
    pub fn dir_name(self) -> &'static str {
        match self {
            QueueState::Inbox => "inbox",
            QueueState::Processing => "processing",
            QueueState::Processed => "processed",
            QueueState::Failed => "failed",
            QueueState::DeadLetter => "dead-letter",
            QueueState::Outbox => "outbox",
            QueueState::Sent => "sent",
        }
    }

    /// Resolve the state reached by applying `trigger`, or reject the move.
    pub fn apply(self, trigger: Trigger) -> Result<QueueState, PostboxError> {
        TRANSITIONS
            .iter()
            .find(|(from, t, _)| *from == self && *t == trigger)
            .map(|(_, _, to)| *to)
            .ok_or(PostboxError::IllegalTransition {
                from: self,
                trigger,
            })
    }

    /// States from which `trigger` is legal.
    pub fn sources_of(trigger: Trigger) -> Vec<QueueState> {
        TRANSITIONS
            .iter()
            .filter(|(_, t, _)| *t == trigger)
            .map(|(from, _, _)| *from)
            .collect()
    }

    pub fn status(self) -> MessageStatus {
        match self {
            QueueState::Inbox | QueueState::Failed | QueueState::Outbox => MessageStatus::Pending,
            QueueState::Processing => MessageStatus::Processing,
            QueueState::Processed => MessageStatus::Processed,
            QueueState::Sent => MessageStatus::Sent,
            QueueState::DeadLetter => MessageStatus::DeadLettered,
        }
    }

    /// Archive and dead-letter states never move on their own.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            QueueState::Processed | QueueState::Sent | QueueState::DeadLetter
        )
    }
}
