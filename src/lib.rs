//! dirpulse: managed directory change notification.
//!
//! The OS-level watching is delegated to a [`WatchProvider`]; this crate
//! is the orchestration layer on top: a request lifecycle state machine,
//! two cooperative polling pumps, asynchronous fan-out dispatch to
//! subscriber callbacks, rate negotiation across concurrently active
//! watches, and a reentrancy-safe start/stop/shutdown protocol.
//!
//! ```no_run
//! use dirpulse::{Watcher, WatchRequest, handler, FileSystemEvent};
//!
//! # async fn demo() -> dirpulse::WatchResult<()> {
//! let watcher = Watcher::new();
//! watcher.on_added(handler(|e: FileSystemEvent| async move {
//!     println!("added {}", e.path.display());
//! }))?;
//! watcher.add(WatchRequest::new("/tmp/inbox", true)?)?;
//! watcher.start()?;
//! // ...
//! watcher.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod logging;
pub mod provider;
mod pump;
mod registry;
pub mod request;
pub mod watcher;

pub use config::Settings;
pub use dispatch::{Handler, Subscription, handler};
pub use error::{WatchError, WatchResult};
pub use event::{
    ErrorCode, EventAction, EventError, FileSystemEvent, LogLevel, LoggerEvent, RawRecord,
    RawStatistics, RenamedFileSystemEvent, Statistics,
};
pub use provider::{
    LoggerSink, NotifyFactory, NotifyProvider, ProviderFactory, WatchProvider, default_provider,
};
pub use request::{Rates, WatchId, WatchRequest};
pub use watcher::Watcher;
