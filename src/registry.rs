//! Pending/active request bookkeeping and rate negotiation.
//!
//! One mutex guards the pending list and the active map. It is held only
//! for list/map mutation, never across a provider call, so reentrant
//! caller code (a subscriber stopping the watcher from inside a callback)
//! cannot invert locks with the provider.
//!
//! Negotiated delays are published through atomics so the pumps read them
//! without touching the registry lock; a recomputation affects the next
//! sleep, not one already in progress.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::provider::WatchProvider;
use crate::request::{WatchId, WatchRequest};
use crate::{debug_event, log_event};

/// Which of the two polling categories a rate belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RateCategory {
    Events,
    Statistics,
}

struct Inner {
    pending: Vec<Arc<WatchRequest>>,
    active: HashMap<WatchId, Arc<WatchRequest>>,
    started: bool,
}

pub(crate) struct RequestRegistry {
    provider: Arc<dyn WatchProvider>,
    inner: Mutex<Inner>,
    events_delay_ms: AtomicU64,
    statistics_delay_ms: AtomicU64,
    default_poll_ms: u64,
}

impl RequestRegistry {
    pub(crate) fn new(provider: Arc<dyn WatchProvider>, default_poll_ms: u64) -> Self {
        Self {
            provider,
            inner: Mutex::new(Inner {
                pending: Vec::new(),
                active: HashMap::new(),
                started: false,
            }),
            events_delay_ms: AtomicU64::new(default_poll_ms),
            statistics_delay_ms: AtomicU64::new(default_poll_ms),
            default_poll_ms,
        }
    }

    /// Queue a request, or start it immediately when the watcher has
    /// already been started.
    pub(crate) fn add(&self, request: WatchRequest) -> bool {
        let request = Arc::new(request);
        {
            let mut inner = self.inner.lock();
            if !inner.started {
                inner.pending.push(request);
                return true;
            }
        }
        self.start_one(request) >= 0
    }

    /// Start a single request now, then drain whatever else is pending.
    ///
    /// Draining on a single explicit start matches the historical
    /// behavior callers rely on: one `start_request` promotes every
    /// queued request too.
    pub(crate) fn start_one(&self, request: Arc<WatchRequest>) -> WatchId {
        let id = self.provider.start(&request);
        if id >= 0 {
            self.inner.lock().active.insert(id, request);
            self.recompute_delays();
            log_event!("registry", "activated", "{id}");
        }
        self.start_all();
        id
    }

    /// Start every pending request. Failures stay pending for a later
    /// attempt. Returns whether at least one request activated.
    ///
    /// Marks the registry started even when there was nothing to do, so
    /// a caller who starts before adding anything gets immediate starts
    /// from then on.
    pub(crate) fn start_all(&self) -> bool {
        // take the batch out under the lock; a request can only ever be
        // handed to the provider once, even with concurrent callers
        let batch: Vec<Arc<WatchRequest>> = {
            let mut inner = self.inner.lock();
            inner.started = true;
            std::mem::take(&mut inner.pending)
        };
        if batch.is_empty() {
            return false;
        }

        let mut activated = false;
        for request in batch {
            let id = self.provider.start(&request);
            let mut inner = self.inner.lock();
            if id >= 0 {
                inner.active.insert(id, request);
                activated = true;
            } else {
                // refused; leave it pending for a later start
                inner.pending.push(request);
            }
        }
        if activated {
            self.recompute_delays();
        }
        activated
    }

    /// Stop one active watch. Removes local state only when the id is
    /// known here and the provider acknowledged the stop.
    pub(crate) fn stop_one(&self, id: WatchId) -> bool {
        if !self.inner.lock().active.contains_key(&id) {
            debug_event!("registry", "stop for unknown id", "{id}");
            return false;
        }
        if !self.provider.stop(id) {
            return false;
        }
        self.inner.lock().active.remove(&id);
        self.recompute_delays();
        log_event!("registry", "stopped", "{id}");
        true
    }

    /// Stop every active watch. Snapshots the ids first so mutation
    /// during iteration cannot corrupt the map.
    pub(crate) fn stop_all(&self) -> bool {
        let ids: Vec<WatchId> = self.inner.lock().active.keys().copied().collect();
        if ids.is_empty() {
            return false;
        }
        for id in ids {
            self.stop_one(id);
        }
        true
    }

    pub(crate) fn is_started(&self) -> bool {
        self.inner.lock().started
    }

    pub(crate) fn has_active(&self) -> bool {
        !self.inner.lock().active.is_empty()
    }

    pub(crate) fn active_ids(&self) -> Vec<WatchId> {
        self.inner.lock().active.keys().copied().collect()
    }

    /// Ids whose request names a positive rate for the category.
    pub(crate) fn pollable_ids(&self, category: RateCategory) -> Vec<WatchId> {
        self.inner
            .lock()
            .active
            .iter()
            .filter(|(_, req)| rate_for(req, category) > 0)
            .map(|(id, _)| *id)
            .collect()
    }

    pub(crate) fn events_delay(&self) -> Duration {
        Duration::from_millis(self.events_delay_ms.load(Ordering::Relaxed))
    }

    pub(crate) fn statistics_delay(&self) -> Duration {
        Duration::from_millis(self.statistics_delay_ms.load(Ordering::Relaxed))
    }

    /// Negotiated delay per category: the minimum positive rate across
    /// active requests, or the configured default when no active request
    /// names one.
    fn recompute_delays(&self) {
        let (events, statistics) = {
            let inner = self.inner.lock();
            (
                negotiate(inner.active.values(), RateCategory::Events, self.default_poll_ms),
                negotiate(
                    inner.active.values(),
                    RateCategory::Statistics,
                    self.default_poll_ms,
                ),
            )
        };
        self.events_delay_ms.store(events, Ordering::Relaxed);
        self.statistics_delay_ms.store(statistics, Ordering::Relaxed);
        debug_event!("registry", "delays", "events={events}ms statistics={statistics}ms");
    }
}

fn rate_for(request: &WatchRequest, category: RateCategory) -> u64 {
    match category {
        RateCategory::Events => request.rates().events_ms(),
        RateCategory::Statistics => request.rates().statistics_ms(),
    }
}

fn negotiate<'a>(
    requests: impl Iterator<Item = &'a Arc<WatchRequest>>,
    category: RateCategory,
    default_ms: u64,
) -> u64 {
    requests
        .map(|r| rate_for(r, category))
        .filter(|&ms| ms > 0)
        .min()
        .unwrap_or(default_ms)
}
