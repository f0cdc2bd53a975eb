//! Error taxonomy for the watcher core.
//!
//! Only rejection and usage faults surface synchronously through these
//! variants; a provider fault also surfaces here when a pull call hits
//! it directly. Faults encountered inside a pump or a dispatch unit —
//! including a panicking subscriber callback — are recovered locally and
//! re-emitted as asynchronous [`EventError`]s to error subscribers; they
//! never unwind a pump loop and have no synchronous variant.
//!
//! [`EventError`]: crate::event::EventError

use thiserror::Error;

use crate::event::ErrorCode;
use crate::request::WatchId;

/// Errors from watcher operations.
#[derive(Error, Debug)]
pub enum WatchError {
    /// A request was refused before it reached the provider.
    #[error("watch request rejected: {reason}")]
    Rejected { reason: String },

    /// The provider failed while polling or stopping an active watch.
    #[error("provider fault during {operation} for watch {id}: {}", code.message())]
    ProviderFault {
        operation: &'static str,
        id: WatchId,
        code: ErrorCode,
    },

    /// The watcher was used after disposal.
    #[error("watcher has been disposed")]
    Disposed,
}

pub type WatchResult<T> = Result<T, WatchError>;
