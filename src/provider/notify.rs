//! Default provider backed by the `notify` crate.
//!
//! Each started watch owns its own `notify::RecommendedWatcher`; the
//! notify callback translates raw OS events into [`RawRecord`]s and
//! buffers them until the managed layer polls. Buffers are bounded: past
//! the cap a single overflow error record replaces dropped changes.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

use chrono::Utc;
use dashmap::DashMap;
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher as _};
use parking_lot::Mutex;

use crate::debug_event;
use crate::event::{ErrorCode, EventAction, LogLevel, LoggerEvent, RawRecord, RawStatistics};
use crate::request::{WatchId, WatchRequest};

use super::{LoggerSink, WatchProvider};

const MAX_BUFFERED_RECORDS: usize = 16 * 1024;

struct WatchEntry {
    // held only so the watch dies with the entry
    _watcher: Mutex<notify::RecommendedWatcher>,
    buffer: Arc<Mutex<Vec<RawRecord>>>,
    stats: Arc<WatchStats>,
}

struct WatchStats {
    event_count: AtomicU64,
    last_poll: Mutex<Instant>,
}

/// Cross-platform watch provider over `notify::RecommendedWatcher`.
pub struct NotifyProvider {
    entries: DashMap<WatchId, WatchEntry>,
    next_id: AtomicI64,
    logger: Mutex<Option<LoggerSink>>,
}

impl NotifyProvider {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next_id: AtomicI64::new(1),
            logger: Mutex::new(None),
        }
    }

    fn log(&self, id: WatchId, level: LogLevel, message: String) {
        let sink = self.logger.lock().clone();
        if let Some(sink) = sink {
            sink(LoggerEvent { id, level, message });
        }
    }
}

impl Default for NotifyProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchProvider for NotifyProvider {
    fn start(&self, request: &WatchRequest) -> WatchId {
        let path = request.path().to_path_buf();
        if !path.exists() {
            self.log(
                -1,
                LogLevel::Warning,
                format!("cannot watch missing path {}", path.display()),
            );
            return -1;
        }

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let stats = Arc::new(WatchStats {
            event_count: AtomicU64::new(0),
            last_poll: Mutex::new(Instant::now()),
        });

        let cb_buffer = Arc::clone(&buffer);
        let cb_stats = Arc::clone(&stats);
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let records = match res {
                Ok(event) => translate(&event),
                Err(e) => vec![RawRecord::error(map_notify_error(&e))],
            };
            if records.is_empty() {
                return;
            }
            cb_stats
                .event_count
                .fetch_add(records.len() as u64, Ordering::Relaxed);
            let mut buf = cb_buffer.lock();
            for record in records {
                push_bounded(&mut buf, record);
            }
        });

        let mut watcher = match watcher {
            Ok(w) => w,
            Err(e) => {
                self.log(-1, LogLevel::Error, format!("watcher init failed: {e}"));
                return -1;
            }
        };

        let mode = if request.recursive() {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        if let Err(e) = watcher.watch(&path, mode) {
            self.log(
                -1,
                LogLevel::Warning,
                format!("cannot watch {}: {e}", path.display()),
            );
            return -1;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(
            id,
            WatchEntry {
                _watcher: Mutex::new(watcher),
                buffer,
                stats,
            },
        );
        self.log(
            id,
            LogLevel::Information,
            format!("watching {} (id {id})", path.display()),
        );
        id
    }

    fn stop(&self, id: WatchId) -> bool {
        match self.entries.remove(&id) {
            Some(_) => {
                self.log(id, LogLevel::Information, format!("stopped watch {id}"));
                true
            }
            None => {
                debug_event!("notify-provider", "stop for unknown id", "{id}");
                false
            }
        }
    }

    fn ready(&self) -> bool {
        // notify delivers from the moment a watch is registered
        true
    }

    fn poll_events(&self, id: WatchId) -> Result<Vec<RawRecord>, ErrorCode> {
        match self.entries.get(&id) {
            Some(entry) => Ok(std::mem::take(&mut *entry.buffer.lock())),
            None => Ok(Vec::new()),
        }
    }

    fn poll_statistics(&self, id: WatchId) -> Result<Option<RawStatistics>, ErrorCode> {
        match self.entries.get(&id) {
            Some(entry) => {
                let elapsed = {
                    let mut last = entry.stats.last_poll.lock();
                    let elapsed = last.elapsed();
                    *last = Instant::now();
                    elapsed
                };
                let event_count = entry.stats.event_count.swap(0, Ordering::Relaxed);
                Ok(Some(RawStatistics {
                    elapsed,
                    event_count,
                }))
            }
            None => Ok(None),
        }
    }

    fn set_logger(&self, sink: LoggerSink) {
        *self.logger.lock() = Some(sink);
    }
}

fn push_bounded(buf: &mut Vec<RawRecord>, record: RawRecord) {
    if buf.len() >= MAX_BUFFERED_RECORDS {
        let already_flagged = buf
            .last()
            .is_some_and(|r| r.error_code == ErrorCode::Overflow.code());
        if !already_flagged {
            buf.push(RawRecord::error(ErrorCode::Overflow));
        }
        return;
    }
    buf.push(record);
}

/// Translate one notify event into zero or more raw records.
fn translate(event: &Event) -> Vec<RawRecord> {
    let timestamp_utc = Utc::now();
    match event.kind {
        EventKind::Create(kind) => event
            .paths
            .iter()
            .map(|p| record(is_file_created(kind, p), p.clone(), EventAction::Added))
            .collect(),
        EventKind::Remove(kind) => event
            .paths
            .iter()
            .map(|p| record(matches!(kind, RemoveKind::File), p.clone(), EventAction::Removed))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            match (event.paths.first(), event.paths.get(1)) {
                (Some(from), Some(to)) => vec![RawRecord {
                    is_file: to.is_file(),
                    path: to.clone(),
                    previous_path: Some(from.clone()),
                    action_code: EventAction::Renamed.code(),
                    error_code: ErrorCode::None.code(),
                    timestamp_utc,
                }],
                // a rename pair without both sides has no usable file data
                _ => vec![RawRecord::error(ErrorCode::NoFileData)],
            }
        }
        // unpaired rename halves degrade to remove/add
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => event
            .paths
            .iter()
            .map(|p| record(false, p.clone(), EventAction::Removed))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event
            .paths
            .iter()
            .map(|p| record(p.is_file(), p.clone(), EventAction::Added))
            .collect(),
        EventKind::Modify(_) => event
            .paths
            .iter()
            .map(|p| record(p.is_file(), p.clone(), EventAction::Touched))
            .collect(),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

fn record(is_file: bool, path: PathBuf, action: EventAction) -> RawRecord {
    RawRecord::action(is_file, path, action)
}

fn is_file_created(kind: CreateKind, path: &std::path::Path) -> bool {
    match kind {
        CreateKind::File => true,
        CreateKind::Folder => false,
        _ => path.is_file(),
    }
}

fn map_notify_error(e: &notify::Error) -> ErrorCode {
    use notify::ErrorKind;
    match e.kind {
        ErrorKind::PathNotFound => ErrorCode::Access,
        ErrorKind::MaxFilesWatch => ErrorCode::Overflow,
        ErrorKind::WatchNotFound => ErrorCode::CannotStop,
        ErrorKind::InvalidConfig(_) => ErrorCode::CannotStart,
        ErrorKind::Io(_) | ErrorKind::Generic(_) => ErrorCode::General,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: EventKind, paths: Vec<PathBuf>) -> Event {
        let mut e = Event::new(kind);
        e.paths = paths;
        e
    }

    #[test]
    fn test_create_translates_to_added() {
        let e = event(
            EventKind::Create(CreateKind::File),
            vec![PathBuf::from("/w/a.txt")],
        );
        let records = translate(&e);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action_code, EventAction::Added.code());
        assert!(records[0].is_file);
    }

    #[test]
    fn test_rename_both_carries_previous_path() {
        let e = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            vec![PathBuf::from("/w/old.txt"), PathBuf::from("/w/new.txt")],
        );
        let records = translate(&e);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action_code, EventAction::Renamed.code());
        assert_eq!(records[0].path, PathBuf::from("/w/new.txt"));
        assert_eq!(records[0].previous_path, Some(PathBuf::from("/w/old.txt")));
    }

    #[test]
    fn test_rename_with_missing_side_is_no_file_data() {
        let e = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            vec![PathBuf::from("/w/only-one.txt")],
        );
        let records = translate(&e);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].error_code, ErrorCode::NoFileData.code());
    }

    #[test]
    fn test_access_events_are_dropped() {
        let e = event(
            EventKind::Access(notify::event::AccessKind::Read),
            vec![PathBuf::from("/w/a.txt")],
        );
        assert!(translate(&e).is_empty());
    }

    #[test]
    fn test_buffer_overflow_flags_once() {
        let mut buf: Vec<RawRecord> = (0..MAX_BUFFERED_RECORDS)
            .map(|_| RawRecord::action(true, "/w/x", EventAction::Touched))
            .collect();
        push_bounded(&mut buf, RawRecord::action(true, "/w/y", EventAction::Added));
        push_bounded(&mut buf, RawRecord::action(true, "/w/z", EventAction::Added));
        assert_eq!(buf.len(), MAX_BUFFERED_RECORDS + 1);
        assert_eq!(
            buf.last().unwrap().error_code,
            ErrorCode::Overflow.code()
        );
    }

    #[test]
    fn test_start_missing_path_refused() {
        let provider = NotifyProvider::new();
        let req = WatchRequest::new("/definitely/not/here", false).unwrap();
        assert!(provider.start(&req) < 0);
    }

    #[test]
    fn test_poll_unknown_id_is_empty_not_error() {
        let provider = NotifyProvider::new();
        assert!(provider.poll_events(99).unwrap().is_empty());
        assert!(provider.poll_statistics(99).unwrap().is_none());
        assert!(!provider.stop(99));
    }

    #[test]
    fn test_start_and_poll_real_directory() {
        let dir = tempfile::tempdir().unwrap();
        let provider = NotifyProvider::new();
        let req = WatchRequest::new(dir.path(), false).unwrap();

        let id = provider.start(&req);
        assert!(id > 0);

        std::fs::write(dir.path().join("hello.txt"), b"hi").unwrap();

        // give the notify backend a moment to deliver
        let mut seen = Vec::new();
        for _ in 0..50 {
            seen.extend(provider.poll_events(id).unwrap());
            if !seen.is_empty() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        assert!(
            seen.iter()
                .any(|r| r.action_code == EventAction::Added.code()),
            "expected an Added record, got {seen:?}"
        );

        let stats = provider.poll_statistics(id).unwrap().unwrap();
        assert!(stats.event_count >= 1);
        assert!(provider.stop(id));
        assert!(!provider.stop(id));
    }
}
