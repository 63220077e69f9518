//! Broker connection lifecycle
//!
//! ## State Machine
//!
//! ```text
//! Disconnected ──Connect──────────▶ Connecting
//! Connecting   ──ConnAck(ok)──────▶ Connected
//! Connecting   ──ConnAck(refused)─▶ Disconnected
//! Connected    ──SubAck(granted)──▶ SubscriptionActive
//! Connected    ──SubAck(refused)──▶ Disconnected
//! (any)        ──Error────────────▶ Disconnected
//! ```
//!
//! After an error the subscriber waits for [`Backoff::next_delay`] before
//! issuing the next `Connect`.

use std::fmt;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    SubscriptionActive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A connection attempt was started
    Connect,
    /// The broker answered the handshake
    ConnAck { accepted: bool },
    /// The broker answered the subscribe request
    SubAck { granted: bool },
    /// Any transport, protocol or authentication failure
    Error,
}

impl ConnectionState {
    /// Apply `event`, returning the next state.
    ///
    /// Events that make no sense in the current state leave it unchanged.
    pub fn on(self, event: ConnectionEvent) -> ConnectionState {
        use ConnectionEvent as E;
        use ConnectionState as S;

        match (self, event) {
            (_, E::Error) => S::Disconnected,
            (S::Disconnected, E::Connect) => S::Connecting,
            (S::Connecting, E::ConnAck { accepted: true }) => S::Connected,
            (S::Connecting, E::ConnAck { accepted: false }) => S::Disconnected,
            (S::Connected, E::SubAck { granted: true }) => S::SubscriptionActive,
            (S::Connected, E::SubAck { granted: false }) => S::Disconnected,
            (state, _) => state,
        }
    }

    pub fn is_receiving(&self) -> bool {
        matches!(self, ConnectionState::SubscriptionActive)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::SubscriptionActive => "subscription active",
        };
        f.write_str(name)
    }
}

/// Reconnect policy: exponential backoff with full jitter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Randomize each delay in `[0, delay]`
    #[serde(default = "default_jitter")]
    pub jitter: bool,

    /// Give up after this many consecutive failed attempts (None = never)
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
            max_attempts: None,
        }
    }
}

/// Tracks consecutive failures and hands out the next reconnect delay
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Consecutive failures since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether another attempt is allowed
    pub fn exhausted(&self) -> bool {
        self.policy
            .max_attempts
            .is_some_and(|max| self.attempt >= max)
    }

    /// Upper bound of the delay for the current attempt, before jitter
    pub fn ceiling(&self) -> Duration {
        let exponent = self.attempt.saturating_sub(1).min(63) as i32;
        let millis = self.policy.initial_delay_ms as f64 * self.policy.multiplier.powi(exponent);
        let capped = millis.min(self.policy.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Record a failure and return how long to wait before reconnecting
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let ceiling = self.ceiling();

        if self.policy.jitter && !ceiling.is_zero() {
            let millis = rand::thread_rng().gen_range(0..=ceiling.as_millis() as u64);
            Duration::from_millis(millis)
        } else {
            ceiling
        }
    }

    /// Forget past failures, e.g. once the subscription is active again
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
