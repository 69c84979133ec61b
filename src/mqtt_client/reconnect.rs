// SPDX-License-Identifier: MPL-2.0

//! Reconnect scheduling with bounded exponential backoff and jitter.

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::opts::{JitterMode, MqttClientOptions};

/// Tracks consecutive connection failures and produces the deadline of the next attempt.
///
/// The policy never sleeps: the processing context asks for `next_attempt_at()` and calls
/// `take_due()` once that instant has passed.
#[derive(Debug)]
pub struct ReconnectPolicy {
    min_delay: Duration,
    max_delay: Duration,
    min_connected_time_to_reset: Duration,
    jitter: JitterMode,

    consecutive_failures: u32,
    /// Backoff before jitter for the most recently scheduled attempt, always in `[min, max]`.
    current_delay: Duration,
    connected_at: Option<Instant>,
    next_attempt_at: Option<Instant>,
    rng: StdRng,
}

impl ReconnectPolicy {
    pub fn new(options: &MqttClientOptions) -> Self {
        Self::with_rng(options, StdRng::from_entropy())
    }

    /// Same as `new` with a deterministic jitter source.
    pub fn with_seed(options: &MqttClientOptions, seed: u64) -> Self {
        Self::with_rng(options, StdRng::seed_from_u64(seed))
    }

    fn with_rng(options: &MqttClientOptions, rng: StdRng) -> Self {
        let min_delay = Duration::from_millis(options.min_reconnect_delay_ms);
        Self {
            min_delay,
            max_delay: Duration::from_millis(options.max_reconnect_delay_ms),
            min_connected_time_to_reset: Duration::from_millis(
                options.min_connected_time_to_reset_reconnect_delay_ms,
            ),
            jitter: options.retry_jitter_mode,
            consecutive_failures: 0,
            current_delay: min_delay,
            connected_at: None,
            next_attempt_at: None,
            rng,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    pub fn next_attempt_at(&self) -> Option<Instant> {
        self.next_attempt_at
    }

    /// Backoff for the next attempt before jitter: `min(max, min * 2^failures)`.
    pub fn backoff_delay(&self) -> Duration {
        // the shift is capped so the product stays within u128
        let exponent = self.consecutive_failures.min(63);
        let delay_ms = self
            .min_delay
            .as_millis()
            .saturating_mul(1u128 << exponent)
            .min(self.max_delay.as_millis());
        Duration::from_millis(delay_ms as u64)
    }

    /// Schedule the next attempt after a failed or lost connection.
    ///
    /// Returns the delay actually applied (after jitter).
    pub fn schedule(&mut self, now: Instant) -> Duration {
        let backoff = self.backoff_delay();
        let delay = match self.jitter {
            JitterMode::None => backoff,
            JitterMode::Full => {
                let ms = backoff.as_millis() as u64;
                Duration::from_millis(self.rng.gen_range(0..=ms))
            }
        };

        self.current_delay = backoff;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.next_attempt_at = Some(now + delay);

        debug!(
            attempt = self.consecutive_failures,
            backoff_ms = backoff.as_millis() as u64,
            delay_ms = delay.as_millis() as u64,
            "reconnect scheduled"
        );
        delay
    }

    /// Returns true, once, when the scheduled attempt is due.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.next_attempt_at {
            Some(at) if now >= at => {
                self.next_attempt_at = None;
                true
            }
            _ => false,
        }
    }

    /// Forget the scheduled attempt. The failure count is left alone.
    pub fn cancel(&mut self) {
        self.next_attempt_at = None;
    }

    pub fn on_connected(&mut self, now: Instant) {
        self.connected_at = Some(now);
        self.next_attempt_at = None;
    }

    /// When the current connection counts as stable, if there is a backoff left to reset.
    pub fn reset_at(&self) -> Option<Instant> {
        if self.consecutive_failures == 0 {
            return None;
        }
        self.connected_at
            .map(|connected_at| connected_at + self.min_connected_time_to_reset)
    }

    /// Reset the backoff to the minimum delay once the current connection has stayed up for
    /// `min_connected_time_to_reset`.
    pub fn check_stable(&mut self, now: Instant) {
        if self.reset_at().is_some_and(|at| now >= at) {
            debug!(
                failures = self.consecutive_failures,
                "connection is stable, resetting reconnect backoff"
            );
            self.consecutive_failures = 0;
            self.current_delay = self.min_delay;
        }
    }

    /// The current connection ended, by failure or by `stop()`.
    pub fn on_connection_ended(&mut self, now: Instant) {
        self.check_stable(now);
        self.connected_at = None;
    }
}
