//! Liveness classification from last-seen timestamps.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Derived health of a connected agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Seen within the active window.
    Active,
    /// Seen within the idle window.
    Idle,
    /// Not seen for longer than the idle window.
    Stale,
}

impl AgentStatus {
    /// Sort rank: active first, stale last.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Active => 0,
            Self::Idle => 1,
            Self::Stale => 2,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Idle => "idle",
            Self::Stale => "stale",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "idle" => Ok(Self::Idle),
            "stale" => Ok(Self::Stale),
            other => Err(format!("unknown agent status: {other}")),
        }
    }
}

/// Elapsed-time windows for status classification.
///
/// Both bounds are exclusive: an agent last seen exactly `active_secs` ago is idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusThresholds {
    pub active_secs: i64,
    pub idle_secs: i64,
}

impl Default for StatusThresholds {
    fn default() -> Self {
        Self {
            active_secs: 60,
            idle_secs: 300,
        }
    }
}

impl StatusThresholds {
    /// Classify an elapsed duration in whole seconds.
    #[must_use]
    pub const fn classify_elapsed(&self, elapsed_secs: i64) -> AgentStatus {
        if elapsed_secs < self.active_secs {
            AgentStatus::Active
        } else if elapsed_secs < self.idle_secs {
            AgentStatus::Idle
        } else {
            AgentStatus::Stale
        }
    }

    /// Classify a last-seen timestamp against `now`.
    #[must_use]
    pub fn classify(&self, last_seen: DateTime<Utc>, now: DateTime<Utc>) -> AgentStatus {
        self.classify_elapsed(elapsed_secs(last_seen, now))
    }
}

/// Whole seconds between `last_seen` and `now`, clamped at zero.
#[must_use]
pub fn elapsed_secs(last_seen: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - last_seen).num_seconds().max(0)
}
