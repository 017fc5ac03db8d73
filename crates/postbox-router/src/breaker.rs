// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-channel circuit breaker for outbound sends.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    /// Sends are rejected until the cooldown passes.
    Open,
    /// One probe send is allowed; its result closes or re-opens the circuit.
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    failures: u32,
    opened_at: Option<Instant>,
    probing: bool,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            failures: 0,
            opened_at: None,
            probing: false,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state_at(Instant::now())
    }

    fn state_at(&self, now: Instant) -> CircuitState {
        match self.opened_at {
            None => CircuitState::Closed,
            Some(at) if now.saturating_duration_since(at) >= self.cooldown => CircuitState::HalfOpen,
            Some(_) => CircuitState::Open,
        }
    }

    /// Whether a send may be attempted now.
    pub fn allow(&mut self) -> bool {
        self.allow_at(Instant::now())
    }

    fn allow_at(&mut self, now: Instant) -> bool {
        match self.state_at(now) {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen if self.probing => false,
            CircuitState::HalfOpen => {
                self.probing = true;
                true
            }
        }
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
        self.opened_at = None;
        self.probing = false;
    }

    pub fn record_failure(&mut self) {
        self.record_failure_at(Instant::now());
    }

    fn record_failure_at(&mut self, now: Instant) {
        self.failures += 1;
        if self.probing || self.failures >= self.threshold {
            self.opened_at = Some(now);
        }
        self.probing = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_and_probes_after_cooldown() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        let t0 = Instant::now();
        for _ in 0..2 {
            assert!(breaker.allow_at(t0));
            breaker.record_failure_at(t0);
        }
        assert_eq!(breaker.state_at(t0), CircuitState::Closed);
        breaker.record_failure_at(t0);
        assert_eq!(breaker.state_at(t0), CircuitState::Open);
        assert!(!breaker.allow_at(t0 + Duration::from_secs(30)));

        let later = t0 + Duration::from_secs(61);
        assert_eq!(breaker.state_at(later), CircuitState::HalfOpen);
        assert!(breaker.allow_at(later));
        // Only one probe at a time.
        assert!(!breaker.allow_at(later));

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn failed_probe_reopens() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_secs(10));
        let t0 = Instant::now();
        breaker.record_failure_at(t0);
        let probe = t0 + Duration::from_secs(11);
        assert!(breaker.allow_at(probe));
        breaker.record_failure_at(probe);
        assert_eq!(breaker.state_at(probe + Duration::from_secs(1)), CircuitState::Open);
    }
}
