//! Sensor feed health tracking
//!
//! Reconciliation never fails on feed errors, so the failure streak is kept
//! here and surfaced in log lines instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How much of the feed is currently usable
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DegradationLevel {
    /// Last queries succeeded
    Full,
    /// Recent failures, still answering intermittently
    Partial,
    /// Three or more consecutive failed queries
    Unavailable,
}

impl std::fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Partial => write!(f, "partial"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Rolling health of the feed, counted per reconciled query (not per attempt).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedHealth {
    pub level: DegradationLevel,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub total_queries: u64,
    pub total_failures: u64,
    pub last_error: Option<String>,
    /// When `level` last changed
    pub last_change: DateTime<Utc>,
}

impl Default for FeedHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedHealth {
    pub fn new() -> Self {
        Self {
            level: DegradationLevel::Full,
            consecutive_successes: 0,
            consecutive_failures: 0,
            total_queries: 0,
            total_failures: 0,
            last_error: None,
            last_change: Utc::now(),
        }
    }

    pub fn record_success(&mut self) {
        self.total_queries += 1;
        self.consecutive_successes += 1;
        self.consecutive_failures = 0;

        // Recover after 3 consecutive successes
        if self.level != DegradationLevel::Full && self.consecutive_successes >= 3 {
            self.level = DegradationLevel::Full;
            self.last_change = Utc::now();
            self.last_error = None;
        }
    }

    pub fn record_failure(&mut self, error: &str) {
        self.total_queries += 1;
        self.total_failures += 1;
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
        self.last_error = Some(error.to_string());

        let level = if self.consecutive_failures >= 3 {
            DegradationLevel::Unavailable
        } else {
            DegradationLevel::Partial
        };
        if level != self.level {
            self.level = level;
            self.last_change = Utc::now();
        }
    }

    pub fn failure_rate(&self) -> f64 {
        if self.total_queries == 0 {
            0.0
        } else {
            self.total_failures as f64 / self.total_queries as f64
        }
    }
}
