//! Typed event model shared between providers, pumps and subscribers.
//!
//! Providers hand the core untyped [`RawRecord`]s; the dispatcher converts
//! them into the typed events below before fan-out. The raw action and
//! error code spaces are stable numeric contracts with the provider, so
//! they keep explicit values rather than derived discriminants.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::request::WatchId;

/// What happened to a watched path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventAction {
    Added,
    Removed,
    Touched,
    Renamed,
}

impl EventAction {
    /// Raw code a provider sends for an action it could not classify.
    pub const UNKNOWN_CODE: i32 = 1000;

    /// Decode a provider action code. Unknown codes return `None` and are
    /// contained at single-record granularity by the dispatcher.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1001 => Some(Self::Added),
            1002 => Some(Self::Removed),
            1003 => Some(Self::Touched),
            1004 => Some(Self::Renamed),
            _ => None,
        }
    }

    /// The provider wire code for this action.
    pub fn code(self) -> i32 {
        match self {
            Self::Added => 1001,
            Self::Removed => 1002,
            Self::Touched => 1003,
            Self::Renamed => 1004,
        }
    }
}

/// Provider-level error codes carried on records and error events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ErrorCode {
    #[default]
    None,
    General,
    Memory,
    Overflow,
    Aborted,
    CannotStart,
    Access,
    NoFileData,
    CannotStop,
}

impl ErrorCode {
    /// Decode a provider error code. Codes outside the known range
    /// collapse to [`ErrorCode::General`].
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::None,
            1 => Self::General,
            2 => Self::Memory,
            3 => Self::Overflow,
            4 => Self::Aborted,
            5 => Self::CannotStart,
            6 => Self::Access,
            7 => Self::NoFileData,
            8 => Self::CannotStop,
            _ => Self::General,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::None => 0,
            Self::General => 1,
            Self::Memory => 2,
            Self::Overflow => 3,
            Self::Aborted => 4,
            Self::CannotStart => 5,
            Self::Access => 6,
            Self::NoFileData => 7,
            Self::CannotStop => 8,
        }
    }

    /// Human-readable description, resolved on demand.
    pub fn message(self) -> &'static str {
        match self {
            Self::None => "No error",
            Self::General => "General error",
            Self::Memory => "Guarded risk of memory corruption",
            Self::Overflow => "Guarded risk of memory overflow",
            Self::Aborted => "Monitoring was aborted",
            Self::CannotStart => "Unable to start monitoring",
            Self::Access => "Unable to access the given file/folder",
            Self::NoFileData => "The raised event did not have any valid file name",
            Self::CannotStop => "There was an issue trying to stop the watcher(s)",
        }
    }
}

/// A typed file system change delivered to subscribers.
#[derive(Debug, Clone)]
pub struct FileSystemEvent {
    /// Whether the path refers to a file (as opposed to a directory).
    pub is_file: bool,
    /// The path the change happened on.
    pub path: PathBuf,
    /// Previous path, present on renames only.
    pub previous_path: Option<PathBuf>,
    /// The kind of change.
    pub action: EventAction,
    /// Error carried on the record, `ErrorCode::None` for ordinary events.
    pub error: ErrorCode,
    /// When the provider observed the change.
    pub timestamp_utc: DateTime<Utc>,
}

impl FileSystemEvent {
    pub(crate) fn from_raw(raw: &RawRecord, action: EventAction) -> Self {
        Self {
            is_file: raw.is_file,
            path: raw.path.clone(),
            previous_path: raw.previous_path.clone(),
            action,
            error: ErrorCode::from_code(raw.error_code),
            timestamp_utc: raw.timestamp_utc,
        }
    }
}

/// Rename view: the event plus a guaranteed previous path.
#[derive(Debug, Clone)]
pub struct RenamedFileSystemEvent {
    pub event: FileSystemEvent,
    pub previous_path: PathBuf,
}

/// An asynchronous error surfaced to error subscribers.
#[derive(Debug, Clone, Copy)]
pub struct EventError {
    pub code: ErrorCode,
    pub timestamp_utc: DateTime<Utc>,
}

impl EventError {
    pub fn new(code: ErrorCode, timestamp_utc: DateTime<Utc>) -> Self {
        Self {
            code,
            timestamp_utc,
        }
    }

    pub(crate) fn general_now() -> Self {
        Self::new(ErrorCode::General, Utc::now())
    }

    /// Resolve the message for this error's code.
    pub fn message(&self) -> &'static str {
        self.code.message()
    }
}

/// Per-watch counters consumed (cleared) on every statistics poll.
#[derive(Debug, Clone, Copy)]
pub struct Statistics {
    /// The watch the counters belong to.
    pub id: WatchId,
    /// Time elapsed since the previous poll.
    pub elapsed: Duration,
    /// Events observed since the previous poll.
    pub event_count: u64,
}

/// Severity of a provider log notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
    Unknown,
    Information,
    Warning,
    Error,
    Panic,
    Debug,
}

impl LogLevel {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Information,
            2 => Self::Warning,
            3 => Self::Error,
            4 => Self::Panic,
            100 => Self::Debug,
            _ => Self::Unknown,
        }
    }
}

/// Diagnostic message from the provider, independent of file events.
#[derive(Debug, Clone)]
pub struct LoggerEvent {
    /// Watch the message relates to, or a negative id for provider-wide
    /// notifications.
    pub id: WatchId,
    pub level: LogLevel,
    pub message: String,
}

/// Raw change record as produced by a provider.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub is_file: bool,
    pub path: PathBuf,
    pub previous_path: Option<PathBuf>,
    pub action_code: i32,
    pub error_code: i32,
    pub timestamp_utc: DateTime<Utc>,
}

impl RawRecord {
    /// Convenience constructor for ordinary (non-error) records.
    pub fn action(is_file: bool, path: impl Into<PathBuf>, action: EventAction) -> Self {
        Self {
            is_file,
            path: path.into(),
            previous_path: None,
            action_code: action.code(),
            error_code: ErrorCode::None.code(),
            timestamp_utc: Utc::now(),
        }
    }

    /// Convenience constructor for error records.
    pub fn error(code: ErrorCode) -> Self {
        Self {
            is_file: false,
            path: PathBuf::new(),
            previous_path: None,
            action_code: EventAction::UNKNOWN_CODE,
            error_code: code.code(),
            timestamp_utc: Utc::now(),
        }
    }
}

/// Raw per-watch counters as produced by a provider.
#[derive(Debug, Clone, Copy)]
pub struct RawStatistics {
    pub elapsed: Duration,
    pub event_count: u64,
}
