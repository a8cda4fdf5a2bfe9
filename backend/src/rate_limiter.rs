// SPDX-FileCopyrightText: 2026 Haven Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-connection inbound rate limiting.
//!
//! Each connection owns one limiter; the reader task consults it before
//! dispatching an envelope. Every envelope type draws from its own quota,
//! so a burst of messages cannot starve heartbeats.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use havencommon::protocol::EnvelopeType;

/// How many envelopes of one type a connection may submit per window.
#[derive(Debug, Clone, Copy)]
struct Quota {
    burst: u64,
    window: Duration,
}

/// Usage bookkeeping for one envelope type. The window rolls forward
/// lazily: it is only re-opened when a draw happens after it elapsed, so an
/// idle connection costs nothing.
#[derive(Debug)]
struct Window {
    opened: Instant,
    used: u64,
}

impl Window {
    fn open(now: Instant) -> Self {
        Self { opened: now, used: 0 }
    }

    fn draw(&mut self, quota: Quota, now: Instant) -> bool {
        if now.duration_since(self.opened) >= quota.window {
            // The previous window elapsed; whatever was used in it no
            // longer counts.
            self.opened = now;
            self.used = 0;
        }
        if self.used >= quota.burst {
            return false;
        }
        self.used += 1;
        true
    }
}

/// Windowed quotas per envelope type for a single connection.
pub struct ConnectionRateLimiter {
    quotas: HashMap<EnvelopeType, Quota>,
    baseline: Quota,
    windows: HashMap<EnvelopeType, Window>,
}

impl ConnectionRateLimiter {
    /// `baseline_per_sec` applies to every type without an explicit quota.
    pub fn new(baseline_per_sec: u64) -> Self {
        let quotas = HashMap::from([
            // 10/s with a burst of 20.
            (
                EnvelopeType::MessageSend,
                Quota {
                    burst: 20,
                    window: Duration::from_secs(2),
                },
            ),
            // 2/s with a burst of 5.
            (
                EnvelopeType::Commit,
                Quota {
                    burst: 5,
                    window: Duration::from_millis(2500),
                },
            ),
            // 1/s with a burst of 3.
            (
                EnvelopeType::KeyPackageUpload,
                Quota {
                    burst: 3,
                    window: Duration::from_secs(3),
                },
            ),
            // 1/s with a burst of 2.
            (
                EnvelopeType::Ping,
                Quota {
                    burst: 2,
                    window: Duration::from_secs(2),
                },
            ),
        ]);
        let baseline = Quota {
            burst: baseline_per_sec.max(1),
            window: Duration::from_secs(1),
        };
        Self::with_quotas(baseline, quotas)
    }

    fn with_quotas(baseline: Quota, quotas: HashMap<EnvelopeType, Quota>) -> Self {
        Self {
            quotas,
            baseline,
            windows: HashMap::new(),
        }
    }

    /// Draws one submission of `envelope_type` from its quota. Returns
    /// false when the current window is exhausted; the caller drops the
    /// envelope and reports the rejection.
    pub fn admit(&mut self, envelope_type: EnvelopeType) -> bool {
        let quota = self
            .quotas
            .get(&envelope_type)
            .copied()
            .unwrap_or(self.baseline);
        let now = Instant::now();
        self.windows
            .entry(envelope_type)
            .or_insert_with(|| Window::open(now))
            .draw(quota, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_type_draws_from_its_own_quota() {
        let mut limiter = ConnectionRateLimiter::new(10);

        // Draining the message budget must not touch the ping budget, and
        // vice versa.
        for _ in 0..20 {
            assert!(limiter.admit(EnvelopeType::MessageSend));
        }
        assert!(!limiter.admit(EnvelopeType::MessageSend));
        assert!(limiter.admit(EnvelopeType::Ping));
        assert!(limiter.admit(EnvelopeType::Ping));
        assert!(!limiter.admit(EnvelopeType::Ping));

        // A type with no explicit quota falls back to the baseline.
        for _ in 0..10 {
            assert!(limiter.admit(EnvelopeType::GroupCreate));
        }
        assert!(!limiter.admit(EnvelopeType::GroupCreate));
        // ... and that fallback is also per type.
        assert!(limiter.admit(EnvelopeType::GroupLeave));
    }

    #[test]
    fn a_rejected_type_recovers_when_its_window_rolls() {
        let quota = Quota {
            burst: 3,
            window: Duration::from_millis(20),
        };
        let mut limiter = ConnectionRateLimiter::with_quotas(
            quota,
            HashMap::from([(EnvelopeType::MessageAck, quota)]),
        );

        for _ in 0..3 {
            assert!(limiter.admit(EnvelopeType::MessageAck));
        }
        assert!(!limiter.admit(EnvelopeType::MessageAck));

        // Once the window has fully elapsed, the next draw re-opens it
        // with the full burst available.
        std::thread::sleep(quota.window + Duration::from_millis(5));
        for _ in 0..3 {
            assert!(limiter.admit(EnvelopeType::MessageAck));
        }
        assert!(!limiter.admit(EnvelopeType::MessageAck));
    }

    #[test]
    fn a_zero_baseline_still_admits_one_request_per_window() {
        // A misconfigured baseline of zero would otherwise reject every
        // unlisted type forever.
        let mut limiter = ConnectionRateLimiter::new(0);
        assert!(limiter.admit(EnvelopeType::PresenceQuery));
        assert!(!limiter.admit(EnvelopeType::PresenceQuery));
    }
}
