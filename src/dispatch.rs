//! Subscriber registry and asynchronous fan-out dispatch.
//!
//! One raw record becomes at most one dispatch unit per attached
//! subscriber: an independently spawned task that runs the callback.
//! Records with an error code short-circuit to error subscribers;
//! unknown action codes are contained to the single record and reported
//! as a general error. A record whose kind has no subscribers costs
//! nothing: no conversion, no allocation, no spawn.
//!
//! Callbacks run concurrently with no ordering guarantee across records
//! or subscribers. A panicking callback is caught inside its own task,
//! re-surfaced as a general error event, and never affects any other
//! callback.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::event::{
    EventAction, EventError, FileSystemEvent, LoggerEvent, RawRecord, RenamedFileSystemEvent,
    Statistics,
};

/// An asynchronous subscriber callback.
pub type Handler<T> = Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure into a [`Handler`].
///
/// ```ignore
/// let sub = watcher.on_added(handler(|e: FileSystemEvent| async move {
///     println!("added {}", e.path.display());
/// }))?;
/// ```
pub fn handler<T, F, Fut>(f: F) -> Handler<T>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |event| f(event).boxed())
}

/// The event kinds subscribers can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SubscriberKind {
    Added,
    Removed,
    Touched,
    Renamed,
    Error,
    Statistics,
    Logger,
}

/// Opaque handle identifying one attached subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    kind: SubscriberKind,
    id: u64,
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    added: Vec<(u64, Handler<FileSystemEvent>)>,
    removed: Vec<(u64, Handler<FileSystemEvent>)>,
    touched: Vec<(u64, Handler<FileSystemEvent>)>,
    renamed: Vec<(u64, Handler<RenamedFileSystemEvent>)>,
    error: Vec<(u64, Handler<EventError>)>,
    statistics: Vec<(u64, Handler<Statistics>)>,
    logger: Vec<(u64, Handler<LoggerEvent>)>,
}

pub(crate) struct Dispatcher {
    subscribers: Mutex<Subscribers>,
    /// Spawn through an explicit handle so fan-out also works from
    /// provider callback threads outside the runtime.
    runtime: Handle,
}

impl Dispatcher {
    pub(crate) fn new(runtime: Handle) -> Self {
        Self {
            subscribers: Mutex::new(Subscribers::default()),
            runtime,
        }
    }

    fn attach<T>(
        &self,
        kind: SubscriberKind,
        pick: impl FnOnce(&mut Subscribers) -> &mut Vec<(u64, Handler<T>)>,
        handler: Handler<T>,
    ) -> Subscription {
        let mut subs = self.subscribers.lock();
        subs.next_id += 1;
        let id = subs.next_id;
        pick(&mut subs).push((id, handler));
        Subscription { kind, id }
    }

    pub(crate) fn on_added(&self, h: Handler<FileSystemEvent>) -> Subscription {
        self.attach(SubscriberKind::Added, |s| &mut s.added, h)
    }

    pub(crate) fn on_removed(&self, h: Handler<FileSystemEvent>) -> Subscription {
        self.attach(SubscriberKind::Removed, |s| &mut s.removed, h)
    }

    pub(crate) fn on_touched(&self, h: Handler<FileSystemEvent>) -> Subscription {
        self.attach(SubscriberKind::Touched, |s| &mut s.touched, h)
    }

    pub(crate) fn on_renamed(&self, h: Handler<RenamedFileSystemEvent>) -> Subscription {
        self.attach(SubscriberKind::Renamed, |s| &mut s.renamed, h)
    }

    pub(crate) fn on_error(&self, h: Handler<EventError>) -> Subscription {
        self.attach(SubscriberKind::Error, |s| &mut s.error, h)
    }

    pub(crate) fn on_statistics(&self, h: Handler<Statistics>) -> Subscription {
        self.attach(SubscriberKind::Statistics, |s| &mut s.statistics, h)
    }

    pub(crate) fn on_logger(&self, h: Handler<LoggerEvent>) -> Subscription {
        self.attach(SubscriberKind::Logger, |s| &mut s.logger, h)
    }

    /// Detach by identity. Callbacks already in flight still complete;
    /// no callback fires for events dispatched after removal.
    pub(crate) fn unsubscribe(&self, subscription: Subscription) -> bool {
        fn remove<T>(list: &mut Vec<(u64, Handler<T>)>, id: u64) -> bool {
            let before = list.len();
            list.retain(|(sid, _)| *sid != id);
            list.len() != before
        }

        let mut subs = self.subscribers.lock();
        let id = subscription.id;
        match subscription.kind {
            SubscriberKind::Added => remove(&mut subs.added, id),
            SubscriberKind::Removed => remove(&mut subs.removed, id),
            SubscriberKind::Touched => remove(&mut subs.touched, id),
            SubscriberKind::Renamed => remove(&mut subs.renamed, id),
            SubscriberKind::Error => remove(&mut subs.error, id),
            SubscriberKind::Statistics => remove(&mut subs.statistics, id),
            SubscriberKind::Logger => remove(&mut subs.logger, id),
        }
    }

    /// Route one raw record, spawning one dispatch unit per attached
    /// subscriber. Returns the spawned handles for drain bookkeeping.
    pub(crate) fn dispatch_record(&self, raw: RawRecord) -> Vec<JoinHandle<()>> {
        let error = crate::event::ErrorCode::from_code(raw.error_code);
        if error != crate::event::ErrorCode::None {
            // errors short-circuit action-based routing
            return self.dispatch_error(EventError::new(error, raw.timestamp_utc));
        }

        match EventAction::from_code(raw.action_code) {
            Some(EventAction::Added) => {
                let snapshot = snapshot(&self.subscribers.lock().added);
                self.fan_out(snapshot, move || FileSystemEvent::from_raw(&raw, EventAction::Added))
            }
            Some(EventAction::Removed) => {
                let snapshot = snapshot(&self.subscribers.lock().removed);
                self.fan_out(snapshot, move || {
                    FileSystemEvent::from_raw(&raw, EventAction::Removed)
                })
            }
            Some(EventAction::Touched) => {
                let snapshot = snapshot(&self.subscribers.lock().touched);
                self.fan_out(snapshot, move || {
                    FileSystemEvent::from_raw(&raw, EventAction::Touched)
                })
            }
            Some(EventAction::Renamed) => match raw.previous_path.clone() {
                Some(previous_path) => {
                    let snapshot = snapshot(&self.subscribers.lock().renamed);
                    self.fan_out(snapshot, move || RenamedFileSystemEvent {
                        event: FileSystemEvent::from_raw(&raw, EventAction::Renamed),
                        previous_path: previous_path.clone(),
                    })
                }
                // a rename without its previous path carries no usable data
                None => self.dispatch_error(EventError::new(
                    crate::event::ErrorCode::NoFileData,
                    raw.timestamp_utc,
                )),
            },
            // unknown codes are contained to this one record
            None => {
                crate::debug_event!("dispatch", "unknown action code", "{}", raw.action_code);
                self.dispatch_error(EventError::general_now())
            }
        }
    }

    pub(crate) fn dispatch_error(&self, error: EventError) -> Vec<JoinHandle<()>> {
        let snapshot = snapshot(&self.subscribers.lock().error);
        self.fan_out(snapshot, move || error)
    }

    pub(crate) fn dispatch_statistics(&self, statistics: Statistics) -> Vec<JoinHandle<()>> {
        let snapshot = snapshot(&self.subscribers.lock().statistics);
        self.fan_out(snapshot, move || statistics)
    }

    pub(crate) fn dispatch_logger(&self, event: LoggerEvent) -> Vec<JoinHandle<()>> {
        let snapshot = snapshot(&self.subscribers.lock().logger);
        self.fan_out(snapshot, move || event.clone())
    }

    /// Spawn one dispatch unit per subscriber in the snapshot. The event
    /// is only built when at least one subscriber is attached.
    fn fan_out<T>(&self, snapshot: Vec<Handler<T>>, make: impl Fn() -> T) -> Vec<JoinHandle<()>>
    where
        T: Send + 'static,
    {
        if snapshot.is_empty() {
            return Vec::new();
        }

        let error_handlers = snapshot_errors(&self.subscribers.lock().error);
        snapshot
            .into_iter()
            .map(|h| {
                let event = make();
                let error_handlers = error_handlers.clone();
                self.runtime.spawn(async move {
                    let outcome = AssertUnwindSafe(h(event)).catch_unwind().await;
                    if outcome.is_err() {
                        tracing::warn!("[dispatch] subscriber callback panicked");
                        let error = EventError::general_now();
                        for eh in error_handlers.iter() {
                            // a panicking error handler is simply dropped
                            let _ = AssertUnwindSafe(eh(error)).catch_unwind().await;
                        }
                    }
                })
            })
            .collect()
    }
}

fn snapshot<T>(list: &[(u64, Handler<T>)]) -> Vec<Handler<T>> {
    list.iter().map(|(_, h)| Arc::clone(h)).collect()
}

fn snapshot_errors(list: &[(u64, Handler<EventError>)]) -> Arc<[Handler<EventError>]> {
    list.iter().map(|(_, h)| Arc::clone(h)).collect()
}
