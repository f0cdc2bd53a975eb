//! End-to-end tests over the notify-backed default provider and a real
//! temporary directory.
//!
//! Timings are deliberately generous; the assertions are about counts
//! and shapes, never about how fast the OS delivers.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use dirpulse::{
    FileSystemEvent, Rates, Settings, WatchRequest, Watcher, handler,
};

async fn wait_for(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

/// `Watcher::new()` wires settings, logging and the default provider in
/// one call. Two constructions must not fight over the global tracing
/// subscriber, and the watcher must actually deliver events.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_new_initializes_logging_and_delivers() {
    let dir = tempfile::tempdir().unwrap();
    let first = Watcher::new();
    let second = Watcher::new();
    second.shutdown().await;

    let added = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&added);
    first
        .on_added(handler(move |_e: FileSystemEvent| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }))
        .unwrap();

    let request = WatchRequest::with_rates(dir.path(), false, Rates::new(50, 0)).unwrap();
    first.start_request(request).unwrap();
    assert!(wait_for(|| first.ready().unwrap(), Duration::from_secs(5)).await);

    std::fs::write(dir.path().join("hello.txt"), b"").unwrap();
    assert!(
        wait_for(|| added.load(Ordering::SeqCst) >= 1, Duration::from_secs(5)).await,
        "default-constructed watcher never delivered an event"
    );

    first.shutdown().await;
}

/// The canonical scenario: watch an empty directory at a 50 ms events
/// rate, wait for readiness, create five files, expect exactly five
/// Added callbacks with `is_file` set, within five seconds.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_five_created_files_yield_five_added_callbacks() {
    let dir = tempfile::tempdir().unwrap();
    let watcher = Watcher::with_settings(Settings::default());

    let added_paths = Arc::new(Mutex::new(Vec::new()));
    let collected = Arc::clone(&added_paths);
    watcher
        .on_added(handler(move |e: FileSystemEvent| {
            let collected = Arc::clone(&collected);
            async move {
                collected.lock().push((e.path.clone(), e.is_file));
            }
        }))
        .unwrap();

    let request = WatchRequest::with_rates(dir.path(), false, Rates::new(50, 0)).unwrap();
    watcher.add(request).unwrap();
    watcher.start().unwrap();
    assert!(
        wait_for(|| watcher.ready().unwrap(), Duration::from_secs(5)).await,
        "watcher never became ready"
    );

    for i in 0..5 {
        std::fs::write(dir.path().join(format!("file-{i}.txt")), b"").unwrap();
    }

    assert!(
        wait_for(|| added_paths.lock().len() >= 5, Duration::from_secs(5)).await,
        "expected 5 Added callbacks, got {}",
        added_paths.lock().len()
    );
    tokio::time::sleep(Duration::from_millis(200)).await;

    let seen = added_paths.lock();
    assert_eq!(seen.len(), 5);
    assert!(seen.iter().all(|(_, is_file)| *is_file));

    drop(seen);
    watcher.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_recursive_flag_does_not_change_toplevel_delivery() {
    let dir = tempfile::tempdir().unwrap();
    let watcher = Watcher::with_settings(Settings::default());

    let added = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&added);
    watcher
        .on_added(handler(move |_e: FileSystemEvent| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }))
        .unwrap();

    let request = WatchRequest::with_rates(dir.path(), true, Rates::new(50, 0)).unwrap();
    watcher.start_request(request).unwrap();
    assert!(wait_for(|| watcher.ready().unwrap(), Duration::from_secs(5)).await);

    for i in 0..5 {
        std::fs::write(dir.path().join(format!("deep-{i}.txt")), b"").unwrap();
    }

    assert!(
        wait_for(|| added.load(Ordering::SeqCst) >= 5, Duration::from_secs(5)).await,
        "recursive watch missed top-level creations"
    );

    watcher.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_removed_callback_fires_on_deletion() {
    let dir = tempfile::tempdir().unwrap();
    let victim = dir.path().join("victim.txt");
    std::fs::write(&victim, b"soon gone").unwrap();

    let watcher = Watcher::with_settings(Settings::default());
    let removed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&removed);
    watcher
        .on_removed(handler(move |_e: FileSystemEvent| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }))
        .unwrap();

    let request = WatchRequest::with_rates(dir.path(), false, Rates::new(50, 0)).unwrap();
    watcher.start_request(request).unwrap();
    assert!(wait_for(|| watcher.ready().unwrap(), Duration::from_secs(5)).await);

    std::fs::remove_file(&victim).unwrap();

    assert!(
        wait_for(|| removed.load(Ordering::SeqCst) >= 1, Duration::from_secs(5)).await,
        "deletion never surfaced as a Removed callback"
    );

    watcher.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_statistics_report_observed_event_counts() {
    let dir = tempfile::tempdir().unwrap();
    let watcher = Watcher::with_settings(Settings::default());

    let counted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&counted);
    watcher
        .on_statistics(handler(move |stats: dirpulse::Statistics| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(stats.event_count as usize, Ordering::SeqCst);
            }
        }))
        .unwrap();

    let request = WatchRequest::with_rates(dir.path(), false, Rates::new(50, 50)).unwrap();
    watcher.start_request(request).unwrap();
    assert!(wait_for(|| watcher.ready().unwrap(), Duration::from_secs(5)).await);

    for i in 0..3 {
        std::fs::write(dir.path().join(format!("s-{i}.txt")), b"").unwrap();
    }

    assert!(
        wait_for(|| counted.load(Ordering::SeqCst) >= 3, Duration::from_secs(5)).await,
        "statistics never accounted for the created files"
    );

    watcher.shutdown().await;
}
