// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Time-sortable message ids.
//!
//! Format: `{epoch_millis:013}_{8 hex}`. The fixed-width millisecond prefix
//! makes lexicographic order match creation order; the random suffix keeps
//! ids from concurrent producers distinct within the same millisecond.
//! Within one process the millisecond part never goes backwards.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use postbox_core::MessageId;

static LAST_MILLIS: AtomicU64 = AtomicU64::new(0);

fn next_millis() -> u64 {
    let now = Utc::now().timestamp_millis().max(0) as u64;
    let mut last = LAST_MILLIS.load(Ordering::Relaxed);
    loop {
        let candidate = now.max(last + 1);
        match LAST_MILLIS.compare_exchange_weak(last, candidate, Ordering::Relaxed, Ordering::Relaxed)
        {
            Ok(_) => return candidate,
            Err(actual) => last = actual,
        }
    }
}

fn disambiguator() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Generate a fresh id.
pub fn next_id() -> MessageId {
    MessageId(format!("{:013}_{}", next_millis(), disambiguator()))
}

/// Generate an id for a message sent by another agent.
pub fn ipc_id(from_agent: &str) -> MessageId {
    MessageId(format!(
        "{:013}_{}_ipc-{}",
        next_millis(),
        disambiguator(),
        from_agent
    ))
}

/// Milliseconds since the epoch encoded in an id, if it has the standard prefix.
pub fn millis_of(id: &MessageId) -> Option<u64> {
    id.as_str().split('_').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_strictly_increasing() {
        let ids: Vec<MessageId> = (0..500).map(|_| next_id()).collect();
        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1], "{} !< {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn ipc_ids_sort_with_regular_ids() {
        let a = next_id();
        let b = ipc_id("ops");
        let c = next_id();
        assert!(a < b && b < c);
        assert!(b.as_str().ends_with("_ipc-ops"));
    }

    #[test]
    fn millis_prefix_parses() {
        let id = next_id();
        let millis = millis_of(&id).unwrap();
        let now = Utc::now().timestamp_millis() as u64;
        assert!(now + 5_000 > millis);
        assert_eq!(millis_of(&MessageId("custom".into())), None);
    }
}
