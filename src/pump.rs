//! The cooperative polling loop behind event and statistics delivery.
//!
//! Two pumps run per watcher, one per category, each cycling
//! `Idle -> Polling -> Dispatching -> Sleeping` until the outer dispose
//! token fires. A pump that is not active (no `start()` yet, or a
//! `stop()` just ran) skips straight to its sleep. Dispatch units are
//! spawned, never awaited inline, so a slow subscriber can never stall
//! the loop; the pump only waits for them once, while draining during
//! shutdown.
//!
//! Provider faults observed while polling are converted into error
//! events rather than ending the loop. Only the dispose token ends it.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::dispatch::Dispatcher;
use crate::event::{EventError, Statistics};
use crate::provider::WatchProvider;
use crate::registry::{RateCategory, RequestRegistry};
use crate::{debug_event, log_event};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PumpKind {
    Events,
    Statistics,
}

impl PumpKind {
    fn name(self) -> &'static str {
        match self {
            Self::Events => "events-pump",
            Self::Statistics => "statistics-pump",
        }
    }

    fn category(self) -> RateCategory {
        match self {
            Self::Events => RateCategory::Events,
            Self::Statistics => RateCategory::Statistics,
        }
    }
}

pub(crate) struct Pump {
    kind: PumpKind,
    provider: Arc<dyn WatchProvider>,
    registry: Arc<RequestRegistry>,
    dispatcher: Arc<Dispatcher>,
    /// Raised by `start()`, lowered by `stop()`. Resettable, unlike the
    /// dispose token layered above it.
    active: watch::Receiver<bool>,
    dispose: CancellationToken,
    high_water: usize,
}

impl Pump {
    pub(crate) fn new(
        kind: PumpKind,
        provider: Arc<dyn WatchProvider>,
        registry: Arc<RequestRegistry>,
        dispatcher: Arc<Dispatcher>,
        active: watch::Receiver<bool>,
        dispose: CancellationToken,
        high_water: usize,
    ) -> Self {
        Self {
            kind,
            provider,
            registry,
            dispatcher,
            active,
            dispose,
            high_water,
        }
    }

    pub(crate) async fn run(self) {
        log_event!(self.kind.name(), "started");
        let mut outstanding: Vec<JoinHandle<()>> = Vec::new();

        while !self.dispose.is_cancelled() {
            if *self.active.borrow() {
                let spawned = self.poll_once();
                outstanding.extend(spawned);

                // bookkeeping only: completed handles are forgotten,
                // nothing is cancelled
                if outstanding.len() > self.high_water {
                    outstanding.retain(|h| !h.is_finished());
                }
            }

            if self.sleep().await {
                break;
            }
        }

        // drain: handler code for already-pulled data must finish before
        // shutdown returns
        debug_event!(self.kind.name(), "draining", "{} units", outstanding.len());
        for handle in outstanding {
            let _ = handle.await;
        }
        log_event!(self.kind.name(), "stopped");
    }

    /// One Polling + Dispatching step across all pollable ids.
    fn poll_once(&self) -> Vec<JoinHandle<()>> {
        let ids = self.registry.pollable_ids(self.kind.category());
        let mut spawned = Vec::new();

        for id in ids {
            match self.kind {
                PumpKind::Events => match self.provider.poll_events(id) {
                    Ok(records) => {
                        for record in records {
                            spawned.extend(self.dispatcher.dispatch_record(record));
                        }
                    }
                    Err(code) => {
                        // self-healing: the fault becomes an event, the
                        // loop carries on
                        debug_event!(self.kind.name(), "poll fault", "{id}: {}", code.message());
                        spawned.extend(
                            self.dispatcher
                                .dispatch_error(EventError::new(code, Utc::now())),
                        );
                    }
                },
                PumpKind::Statistics => match self.provider.poll_statistics(id) {
                    Ok(Some(raw)) => {
                        spawned.extend(self.dispatcher.dispatch_statistics(Statistics {
                            id,
                            elapsed: raw.elapsed,
                            event_count: raw.event_count,
                        }));
                    }
                    // id no longer recognized by the provider; a stop
                    // raced this poll
                    Ok(None) => {}
                    Err(code) => {
                        debug_event!(self.kind.name(), "poll fault", "{id}: {}", code.message());
                        spawned.extend(
                            self.dispatcher
                                .dispatch_error(EventError::new(code, Utc::now())),
                        );
                    }
                },
            }
        }
        spawned
    }

    /// Sleep for the currently negotiated delay. Returns true when the
    /// dispose token fired during the sleep.
    async fn sleep(&self) -> bool {
        let delay = match self.kind {
            PumpKind::Events => self.registry.events_delay(),
            PumpKind::Statistics => self.registry.statistics_delay(),
        };
        tokio::select! {
            _ = self.dispose.cancelled() => true,
            _ = tokio::time::sleep(delay) => false,
        }
    }
}
