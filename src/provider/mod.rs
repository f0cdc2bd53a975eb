//! The native watch provider contract and its pluggable factory.
//!
//! The core orchestrates watches; it never watches anything itself. All
//! OS-level work sits behind [`WatchProvider`], and the concrete
//! implementation is chosen once by the factory from deployment
//! configuration. The core never branches on which strategy is active,
//! and every [`Watcher`](crate::watcher::Watcher) owns its provider
//! instance outright: there is no process-wide singleton.

mod notify;

use std::sync::Arc;

use crate::config::Settings;
use crate::event::{ErrorCode, LoggerEvent, RawRecord, RawStatistics};
use crate::request::{WatchId, WatchRequest};

pub use notify::NotifyProvider;

/// Fire-and-forget sink for provider log notifications.
pub type LoggerSink = Arc<dyn Fn(LoggerEvent) + Send + Sync>;

/// The engine that actually watches the file system.
///
/// Buffered data is cleared on read: a record or counter handed out by a
/// `poll_*` call is gone from the provider. Polling an id the provider no
/// longer recognizes is not an error; it yields empty data so the managed
/// layer can race stop against poll without coordination.
pub trait WatchProvider: Send + Sync {
    /// Begin watching. Returns the assigned id, negative on refusal
    /// (invalid path, permission denied).
    fn start(&self, request: &WatchRequest) -> WatchId;

    /// Stop the given watch. False when the id is unknown or the stop
    /// failed.
    fn stop(&self, id: WatchId) -> bool;

    /// Whether the provider is delivering events for its watches.
    fn ready(&self) -> bool;

    /// Drain buffered change records for one watch, in delivery order.
    fn poll_events(&self, id: WatchId) -> Result<Vec<RawRecord>, ErrorCode>;

    /// Drain the per-watch counters. `None` when the id is unknown.
    fn poll_statistics(&self, id: WatchId) -> Result<Option<RawStatistics>, ErrorCode>;

    /// Install the sink for the provider's logger notification channel.
    /// Providers without diagnostics may ignore it.
    fn set_logger(&self, _sink: LoggerSink) {}
}

/// Builds the provider a watcher will own.
pub trait ProviderFactory: Send + Sync {
    fn create(&self, settings: &Settings) -> Arc<dyn WatchProvider>;
}

/// Factory for the default, `notify`-backed provider.
pub struct NotifyFactory;

impl ProviderFactory for NotifyFactory {
    fn create(&self, _settings: &Settings) -> Arc<dyn WatchProvider> {
        Arc::new(NotifyProvider::new())
    }
}

/// Build the provider named by the deployment configuration.
///
/// Unknown kinds fall back to the notify provider with a warning rather
/// than failing construction.
pub fn default_provider(settings: &Settings) -> Arc<dyn WatchProvider> {
    match settings.provider.kind.as_str() {
        "notify" => NotifyFactory.create(settings),
        other => {
            tracing::warn!("[provider] unknown provider kind '{other}', using notify");
            NotifyFactory.create(settings)
        }
    }
}
