//! Watch requests and their rate configuration.

use std::path::{Path, PathBuf};

use crate::error::{WatchError, WatchResult};

/// Provider-assigned identifier for an active watch.
///
/// Negative (or zero, from providers that reserve it) denotes failure.
/// The managed layer never reuses an id once its watch is stopped.
pub type WatchId = i64;

/// Default events polling interval in milliseconds.
pub const DEFAULT_EVENTS_MS: u64 = 50;

/// How often a watch wants its buffered data pulled.
///
/// An interval of `0` disables that category for the request: the request
/// contributes nothing to rate negotiation and its watch is never polled
/// for it. New requests default to 50 ms events and disabled statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rates {
    events_ms: u64,
    statistics_ms: u64,
}

impl Rates {
    pub fn new(events_ms: u64, statistics_ms: u64) -> Self {
        Self {
            events_ms,
            statistics_ms,
        }
    }

    pub fn events_ms(&self) -> u64 {
        self.events_ms
    }

    pub fn statistics_ms(&self) -> u64 {
        self.statistics_ms
    }
}

impl Default for Rates {
    fn default() -> Self {
        Self::new(DEFAULT_EVENTS_MS, 0)
    }
}

/// One immutable monitoring intent: a path, a recursive flag and the
/// polling rates the caller is willing to sustain.
#[derive(Debug, Clone)]
pub struct WatchRequest {
    path: PathBuf,
    recursive: bool,
    rates: Rates,
}

impl WatchRequest {
    /// Create a request with default rates.
    pub fn new(path: impl Into<PathBuf>, recursive: bool) -> WatchResult<Self> {
        Self::with_rates(path, recursive, Rates::default())
    }

    /// Create a request with explicit rates.
    pub fn with_rates(path: impl Into<PathBuf>, recursive: bool, rates: Rates) -> WatchResult<Self> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(WatchError::Rejected {
                reason: "watch path must not be empty".to_string(),
            });
        }
        Ok(Self {
            path,
            recursive,
            rates,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn recursive(&self) -> bool {
        self.recursive
    }

    pub fn rates(&self) -> Rates {
        self.rates
    }
}
