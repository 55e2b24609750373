use std::time::Duration;

use tokio::time::Instant;

use crate::config::PipelineConfig;

use super::CacheEntry;

/// How usable a cached entry is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Freshness {
    /// Younger than the TTL, served as is.
    Fresh,
    /// Past the TTL but within the SWR window, served while being refreshed.
    Stale,
    /// Past the SWR window or not cached at all, needs to be fetched.
    Expired,
}

impl Freshness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Stale => "stale",
            Self::Expired => "expired",
        }
    }
}

/// Classifies entries by age using a TTL and a longer SWR window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FreshnessPolicy {
    ttl: Duration,
    swr_window: Duration,
}

/// A TTL that does not end before the SWR window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error(
    "ttl ({}) must be shorter than the swr window ({})",
    humantime::format_duration(*.ttl),
    humantime::format_duration(*.swr_window)
)]
pub struct InvalidFreshnessPolicy {
    pub ttl: Duration,
    pub swr_window: Duration,
}

impl FreshnessPolicy {
    /// Creates a policy, `ttl` must be shorter than `swr_window`.
    pub fn new(ttl: Duration, swr_window: Duration) -> Result<Self, InvalidFreshnessPolicy> {
        if ttl >= swr_window {
            return Err(InvalidFreshnessPolicy { ttl, swr_window });
        }
        Ok(Self { ttl, swr_window })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, InvalidFreshnessPolicy> {
        Self::new(config.ttl, config.swr_window)
    }

    /// Classifies an entry of the given age.
    pub fn classify_age(&self, age: Duration) -> Freshness {
        if age < self.ttl {
            Freshness::Fresh
        } else if age < self.swr_window {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }

    /// Classifies an entry written at `timestamp`.
    ///
    /// Timestamps in the future count as age zero.
    pub fn classify(&self, now: Instant, timestamp: Instant) -> Freshness {
        self.classify_age(now.saturating_duration_since(timestamp))
    }

    /// Classifies an optional entry, a missing entry is [`Freshness::Expired`].
    pub fn classify_entry(&self, now: Instant, entry: Option<&CacheEntry>) -> Freshness {
        match entry {
            Some(entry) => self.classify(now, entry.timestamp),
            None => Freshness::Expired,
        }
    }
}
