//! Per-turn streaming telemetry: time to first token and tokens per second.

use serde::Serialize;
use std::time::{Duration, Instant};

/// Latency between sending a request and receiving its first token.
pub fn time_to_first_token(sent_at: Instant, first_token_at: Instant) -> Duration {
    first_token_at.saturating_duration_since(sent_at)
}

/// Throughput of a turn so far. `None` while no time has elapsed.
pub fn tokens_per_second(token_count: u64, elapsed: Duration) -> Option<f64> {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        Some(token_count as f64 / secs)
    } else {
        None
    }
}

/// Timing state for the current turn of one session.
#[derive(Debug, Clone, Default)]
pub struct TurnMetrics {
    sent_at: Option<Instant>,
    token_count: u64,
    ttft: Option<Duration>,
    tps: Option<f64>,
}

impl TurnMetrics {
    /// Start a new turn. Clears the previous turn's figures.
    pub fn start(&mut self, sent_at: Instant) {
        *self = Self {
            sent_at: Some(sent_at),
            ..Self::default()
        };
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Record one token arrival and recompute the derived figures.
    pub fn record_token(&mut self, now: Instant) {
        self.token_count += 1;
        let Some(sent_at) = self.sent_at else {
            return;
        };
        if self.token_count == 1 {
            self.ttft = Some(time_to_first_token(sent_at, now));
        }
        self.tps = tokens_per_second(self.token_count, now.saturating_duration_since(sent_at));
    }

    pub fn token_count(&self) -> u64 {
        self.token_count
    }

    pub fn ttft(&self) -> Option<Duration> {
        self.ttft
    }

    pub fn tps(&self) -> Option<f64> {
        self.tps
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            token_count: self.token_count,
            ttft_secs: self.ttft.map(|d| d.as_secs_f64()),
            tokens_per_sec: self.tps,
        }
    }
}

/// Serializable view of [`TurnMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub token_count: u64,
    pub ttft_secs: Option<f64>,
    pub tokens_per_sec: Option<f64>,
}

impl MetricsSnapshot {
    /// `0.42s to first token, 31.20 tokens/s`; parts that are unset are omitted.
    pub fn summary(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(ttft) = self.ttft_secs {
            parts.push(format!("{ttft:.2}s to first token"));
        }
        if let Some(tps) = self.tokens_per_sec {
            parts.push(format!("{tps:.2} tokens/s"));
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }
}
