//! The watcher façade: lifecycle state machine over registry, pumps and
//! dispatcher.
//!
//! Lifecycle is `Created -> Started <-> (interleaved add/start/stop) ->
//! Disposed`, with Disposed terminal. Every public operation first checks
//! the disposed flag and fails with [`WatchError::Disposed`] afterwards.
//!
//! `stop()` is deliberately cheap and synchronous: it lowers the pumps'
//! activity signal and stops provider watches, nothing more, so it is
//! safe to call from inside a subscriber callback. The full join and
//! drain happen only in [`Watcher::shutdown`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::dispatch::{Dispatcher, Handler, Subscription};
use crate::error::{WatchError, WatchResult};
use crate::event::{
    EventAction, EventError, FileSystemEvent, LoggerEvent, RawRecord, RenamedFileSystemEvent,
    Statistics,
};
use crate::provider::{WatchProvider, default_provider};
use crate::pump::{Pump, PumpKind};
use crate::registry::RequestRegistry;
use crate::request::{WatchId, WatchRequest};
use crate::{debug_event, log_event};

/// Managed directory change watcher.
///
/// Owns its provider, a request registry and two polling pumps. Must be
/// created inside a tokio runtime; the pumps are spawned on it.
pub struct Watcher {
    provider: Arc<dyn WatchProvider>,
    registry: Arc<RequestRegistry>,
    dispatcher: Arc<Dispatcher>,
    activity: watch::Sender<bool>,
    dispose: CancellationToken,
    pumps: Mutex<Vec<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl Watcher {
    /// Create a watcher with configuration from `dirpulse.toml` / `DP_`
    /// environment variables and the configured default provider.
    ///
    /// Also installs the configured tracing subscriber (first call in
    /// the process wins; a subscriber set elsewhere is left alone).
    pub fn new() -> Self {
        let settings = Settings::load().unwrap_or_else(|e| {
            tracing::warn!("[watcher] failed to load settings, using defaults: {e}");
            Settings::default()
        });
        crate::logging::init_with_config(&settings.logging);
        Self::with_settings(settings)
    }

    /// Create a watcher with explicit settings and the configured
    /// default provider. Does not touch logging; embedders call
    /// [`logging::init_with_config`](crate::logging::init_with_config)
    /// themselves if they want the `[logging]` section honored.
    pub fn with_settings(settings: Settings) -> Self {
        let provider = default_provider(&settings);
        Self::with_provider(provider, settings)
    }

    /// Create a watcher over an already-constructed provider.
    pub fn with_provider(provider: Arc<dyn WatchProvider>, settings: Settings) -> Self {
        let registry = Arc::new(RequestRegistry::new(
            Arc::clone(&provider),
            settings.watcher.default_poll_ms,
        ));
        let dispatcher = Arc::new(Dispatcher::new(Handle::current()));

        // the provider logger channel is fire-and-forget into the
        // dispatcher; its units are not drain-tracked
        let logger_dispatcher = Arc::clone(&dispatcher);
        provider.set_logger(Arc::new(move |event: LoggerEvent| {
            let _ = logger_dispatcher.dispatch_logger(event);
        }));

        let (activity, active_rx) = watch::channel(false);
        let dispose = CancellationToken::new();

        let pumps = [PumpKind::Events, PumpKind::Statistics]
            .into_iter()
            .map(|kind| {
                tokio::spawn(
                    Pump::new(
                        kind,
                        Arc::clone(&provider),
                        Arc::clone(&registry),
                        Arc::clone(&dispatcher),
                        active_rx.clone(),
                        dispose.clone(),
                        settings.watcher.dispatch_high_water,
                    )
                    .run(),
                )
            })
            .collect();

        Self {
            provider,
            registry,
            dispatcher,
            activity,
            dispose,
            pumps: Mutex::new(pumps),
            disposed: AtomicBool::new(false),
        }
    }

    fn ensure_live(&self) -> WatchResult<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(WatchError::Disposed);
        }
        Ok(())
    }

    /// Submit a request: queued while not yet started, started
    /// immediately otherwise.
    pub fn add(&self, request: WatchRequest) -> WatchResult<bool> {
        self.ensure_live()?;
        let accepted = self.registry.add(request);
        // an immediate start must wake the pumps too; a previous stop()
        // lowered the signal and only this add knows to raise it again
        if accepted && self.registry.is_started() {
            let _ = self.activity.send(true);
        }
        Ok(accepted)
    }

    /// Start every pending request and raise the pumps' activity signal.
    /// Returns whether at least one new request activated.
    pub fn start(&self) -> WatchResult<bool> {
        self.ensure_live()?;
        let activated = self.registry.start_all();
        let _ = self.activity.send(true);
        Ok(activated)
    }

    /// Start one request now (its id is returned, negative on provider
    /// refusal) and drain the pending queue alongside it.
    pub fn start_request(&self, request: WatchRequest) -> WatchResult<WatchId> {
        self.ensure_live()?;
        let id = self.registry.start_one(Arc::new(request));
        let _ = self.activity.send(true);
        Ok(id)
    }

    /// Stop all active watches and lower the activity signal. Safe to
    /// call from inside a subscriber callback; never blocks on dispatch.
    pub fn stop(&self) -> WatchResult<bool> {
        self.ensure_live()?;
        let _ = self.activity.send(false);
        Ok(self.registry.stop_all())
    }

    /// Stop a single watch. Other watches keep running.
    pub fn stop_id(&self, id: WatchId) -> WatchResult<bool> {
        self.ensure_live()?;
        Ok(self.registry.stop_one(id))
    }

    /// A started watcher with nothing to watch is trivially ready;
    /// otherwise readiness is the provider's call.
    pub fn ready(&self) -> WatchResult<bool> {
        self.ensure_live()?;
        Ok((self.registry.is_started() && !self.registry.has_active()) || self.provider.ready())
    }

    /// Drain buffered events across all active watches.
    ///
    /// This is the pull-style alternative to subscriptions; data taken
    /// here will not also be delivered through callbacks. Records the
    /// provider could not classify and error records are dropped: errors
    /// travel the error subscription channel only.
    pub fn events(&self) -> WatchResult<Vec<FileSystemEvent>> {
        self.ensure_live()?;
        let mut all = Vec::new();
        for id in self.registry.active_ids() {
            // ignore ids the provider no longer recognizes
            if let Ok(records) = self.provider.poll_events(id) {
                all.extend(records.iter().filter_map(convert_pulled));
            }
        }
        Ok(all)
    }

    /// Drain buffered events for one watch.
    pub fn events_for(&self, id: WatchId) -> WatchResult<Vec<FileSystemEvent>> {
        self.ensure_live()?;
        let records = self
            .provider
            .poll_events(id)
            .map_err(|code| WatchError::ProviderFault {
                operation: "poll_events",
                id,
                code,
            })?;
        Ok(records.iter().filter_map(convert_pulled).collect())
    }

    /// Consume statistics counters across all active watches.
    pub fn statistics(&self) -> WatchResult<Vec<Statistics>> {
        self.ensure_live()?;
        let mut all = Vec::new();
        for id in self.registry.active_ids() {
            if let Ok(Some(raw)) = self.provider.poll_statistics(id) {
                all.push(Statistics {
                    id,
                    elapsed: raw.elapsed,
                    event_count: raw.event_count,
                });
            }
        }
        Ok(all)
    }

    /// Consume statistics counters for one watch.
    pub fn statistics_for(&self, id: WatchId) -> WatchResult<Option<Statistics>> {
        self.ensure_live()?;
        let raw = self
            .provider
            .poll_statistics(id)
            .map_err(|code| WatchError::ProviderFault {
                operation: "poll_statistics",
                id,
                code,
            })?;
        Ok(raw.map(|raw| Statistics {
            id,
            elapsed: raw.elapsed,
            event_count: raw.event_count,
        }))
    }

    /// Subscribe to Added events.
    pub fn on_added(&self, handler: Handler<FileSystemEvent>) -> WatchResult<Subscription> {
        self.ensure_live()?;
        Ok(self.dispatcher.on_added(handler))
    }

    /// Subscribe to Removed events.
    pub fn on_removed(&self, handler: Handler<FileSystemEvent>) -> WatchResult<Subscription> {
        self.ensure_live()?;
        Ok(self.dispatcher.on_removed(handler))
    }

    /// Subscribe to Touched events.
    pub fn on_touched(&self, handler: Handler<FileSystemEvent>) -> WatchResult<Subscription> {
        self.ensure_live()?;
        Ok(self.dispatcher.on_touched(handler))
    }

    /// Subscribe to Renamed events.
    pub fn on_renamed(&self, handler: Handler<RenamedFileSystemEvent>) -> WatchResult<Subscription> {
        self.ensure_live()?;
        Ok(self.dispatcher.on_renamed(handler))
    }

    /// Subscribe to asynchronous error events. Without at least one
    /// error subscriber, provider and dispatch faults are dropped.
    pub fn on_error(&self, handler: Handler<EventError>) -> WatchResult<Subscription> {
        self.ensure_live()?;
        Ok(self.dispatcher.on_error(handler))
    }

    /// Subscribe to per-watch statistics.
    pub fn on_statistics(&self, handler: Handler<Statistics>) -> WatchResult<Subscription> {
        self.ensure_live()?;
        Ok(self.dispatcher.on_statistics(handler))
    }

    /// Subscribe to the provider's diagnostic channel.
    pub fn on_logger(&self, handler: Handler<LoggerEvent>) -> WatchResult<Subscription> {
        self.ensure_live()?;
        Ok(self.dispatcher.on_logger(handler))
    }

    /// Detach a subscriber. In-flight callbacks still complete; nothing
    /// fires for events dispatched afterwards.
    pub fn unsubscribe(&self, subscription: Subscription) -> WatchResult<bool> {
        self.ensure_live()?;
        Ok(self.dispatcher.unsubscribe(subscription))
    }

    /// Dispose the watcher: stop everything, cancel both pumps and join
    /// them, draining outstanding dispatch units. Idempotent.
    ///
    /// Must not be called from inside a subscriber callback; the drain
    /// would wait on the calling callback itself. Use [`Watcher::stop`]
    /// there instead.
    pub async fn shutdown(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            debug_event!("watcher", "shutdown on disposed watcher ignored");
            return;
        }
        log_event!("watcher", "shutting down");

        let _ = self.activity.send(false);
        self.registry.stop_all();
        self.dispose.cancel();

        let pumps: Vec<JoinHandle<()>> = self.pumps.lock().drain(..).collect();
        for pump in pumps {
            let _ = pump.await;
        }
        log_event!("watcher", "shut down");
    }
}

impl Default for Watcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        // best-effort path only: mark disposed and cancel, never block
        // or join here; the explicit shutdown is the deterministic one
        if !self.disposed.swap(true, Ordering::AcqRel) {
            let _ = self.activity.send(false);
            self.dispose.cancel();
        }
    }
}

fn convert_pulled(raw: &RawRecord) -> Option<FileSystemEvent> {
    if raw.error_code != crate::event::ErrorCode::None.code() {
        return None;
    }
    let action = EventAction::from_code(raw.action_code)?;
    Some(FileSystemEvent::from_raw(raw, action))
}
