//! End-to-end logging scenarios
//!
//! Each test resolves a real configuration, prepares shared zones in a
//! temp directory and drives one or more workers against SQLite files.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;
use sqlitelog_buffer::SharedZone;
use sqlitelog_config::Config;
use sqlitelog_pipeline::{
    LogOutcome, ResolvedConfig, Worker, prepare_zones, release_dead_worker, resolve,
};
use sqlitelog_store::RequestRecord;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn setup(dir: &TempDir, targets: &str) -> (Arc<ResolvedConfig>, Vec<SharedZone>) {
    let toml = format!(
        r#"
[global]
shm_dir = "{shm}"

[formats.hits]
columns = ["$uri", "$status"]

[formats.notes]
columns = ["$uri", "$note"]

{targets}
"#,
        shm = dir.path().join("shm").display()
    );
    let mut config = Config::from_str(&toml).unwrap();
    config.base_dir = Some(dir.path().to_path_buf());

    let resolved = Arc::new(resolve(&config).unwrap());
    let zones = prepare_zones(&resolved).unwrap();
    (resolved, zones)
}

fn request(uri: &str) -> RequestRecord {
    RequestRecord {
        status: 200,
        ..Default::default()
    }
    .with_variable("uri", uri)
    .stamped()
}

fn uris_in(path: &Path) -> Vec<String> {
    let conn = Connection::open(path).unwrap();
    let mut stmt = conn.prepare("SELECT uri FROM hits ORDER BY rowid").unwrap();
    stmt.query_map([], |r| r.get(0))
        .unwrap()
        .collect::<rusqlite::Result<Vec<String>>>()
        .unwrap()
}

// ============================================================================
// Unbuffered
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unbuffered_insert_per_request() {
    let dir = TempDir::new().unwrap();
    let (resolved, _zones) = setup(&dir, "[[targets]]\npath = \"a.db\"\nformat = \"hits\"\n");

    let worker = Worker::start(resolved).unwrap();
    let handle = worker.handle();

    assert_eq!(handle.log(&request("/one")), [LogOutcome::Inserted]);
    assert_eq!(handle.log(&request("/two")), [LogOutcome::Inserted]);
    assert_eq!(uris_in(&dir.path().join("a.db")), ["/one", "/two"]);

    let summaries = worker.run(cancelled()).await;
    assert_eq!(summaries[0].metrics.rows_inserted, 2);
    assert_eq!(summaries[0].metrics.requests, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_condition_skips_requests() {
    let dir = TempDir::new().unwrap();
    let (resolved, _zones) = setup(
        &dir,
        "[[targets]]\npath = \"a.db\"\nformat = \"hits\"\nif = \"$loggable\"\n",
    );

    let worker = Worker::start(resolved).unwrap();
    let handle = worker.handle();

    assert_eq!(handle.log(&request("/quiet")), [LogOutcome::Skipped]);
    assert_eq!(
        handle.log(&request("/zero").with_variable("loggable", "0")),
        [LogOutcome::Skipped]
    );
    assert_eq!(
        handle.log(&request("/loud").with_variable("loggable", "1")),
        [LogOutcome::Inserted]
    );
    assert_eq!(uris_in(&dir.path().join("a.db")), ["/loud"]);

    let summaries = worker.run(cancelled()).await;
    assert_eq!(summaries[0].metrics.skipped, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_long_value_truncated_and_missing_value_null() {
    let dir = TempDir::new().unwrap();
    let (resolved, _zones) = setup(
        &dir,
        concat!(
            "[[targets]]\npath = \"a.db\"\nformat = \"notes\"\n\n",
            "[[targets]]\npath = \"b.db\"\nformat = \"notes\"\nbuffer = \"64k\"\n",
        ),
    );

    let worker = Worker::start(resolved).unwrap();
    let long = format!("/{}", "x".repeat(4999));
    assert_eq!(
        worker.handle().log(&request(&long)),
        [LogOutcome::Inserted, LogOutcome::Buffered]
    );
    worker.run(cancelled()).await;

    for db in ["a.db", "b.db"] {
        let conn = Connection::open(dir.path().join(db)).unwrap();
        let (len, prefix, note_is_null): (i64, String, bool) = conn
            .query_row(
                "SELECT length(uri), substr(uri, 1, 2), note IS NULL FROM notes",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(len, 4096, "{db}");
        assert_eq!(prefix, "/x", "{db}");
        assert!(note_is_null, "{db}");
    }
}

// ============================================================================
// Shared buffer
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_buffer_flushes_when_full() {
    let dir = TempDir::new().unwrap();
    let (resolved, _zones) = setup(
        &dir,
        "[[targets]]\npath = \"a.db\"\nformat = \"hits\"\nbuffer = \"64k\"\nmax = 3\n",
    );

    let worker = Worker::start(resolved).unwrap();
    let handle = worker.handle();
    let db = dir.path().join("a.db");

    assert_eq!(handle.log(&request("/1")), [LogOutcome::Buffered]);
    assert_eq!(handle.log(&request("/2")), [LogOutcome::Buffered]);
    assert!(uris_in(&db).is_empty());

    assert_eq!(handle.log(&request("/3")), [LogOutcome::Flushed]);
    assert_eq!(uris_in(&db), ["/1", "/2", "/3"]);
    assert_eq!(handle.target("a.db").unwrap().buffered_rows(), Some(0));

    let summaries = worker.run(cancelled()).await;
    let m = summaries[0].metrics;
    assert_eq!(m.rows_inserted, 3);
    assert_eq!(m.rows_buffered, 3);
    assert_eq!(m.flushes, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_workers_share_one_buffer() {
    let dir = TempDir::new().unwrap();
    let (resolved, _zones) = setup(
        &dir,
        "[[targets]]\npath = \"a.db\"\nformat = \"hits\"\nbuffer = \"64k\"\nmax = 4\n",
    );

    let first = Worker::start(Arc::clone(&resolved)).unwrap();
    let second = Worker::start(resolved).unwrap();
    let (h1, h2) = (first.handle(), second.handle());

    assert_eq!(h1.log(&request("/w1-a")), [LogOutcome::Buffered]);
    assert_eq!(h2.log(&request("/w2-a")), [LogOutcome::Buffered]);
    assert_eq!(h1.log(&request("/w1-b")), [LogOutcome::Buffered]);
    assert_eq!(h2.target("a.db").unwrap().buffered_rows(), Some(3));
    assert_eq!(h2.log(&request("/w2-b")), [LogOutcome::Flushed]);

    assert_eq!(
        uris_in(&dir.path().join("a.db")),
        ["/w1-a", "/w2-a", "/w1-b", "/w2-b"]
    );

    first.run(cancelled()).await;
    second.run(cancelled()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timer_flushes_partial_buffer() {
    let dir = TempDir::new().unwrap();
    let (resolved, _zones) = setup(
        &dir,
        "[[targets]]\npath = \"a.db\"\nformat = \"hits\"\nbuffer = \"64k\"\nmax = 100\nflush = \"1s\"\n",
    );

    let worker = Worker::start(resolved).unwrap();
    let handle = worker.handle();
    let shutdown = CancellationToken::new();
    let running = tokio::spawn(worker.run(shutdown.clone()));

    handle.log(&request("/a"));
    handle.log(&request("/b"));
    assert!(uris_in(&dir.path().join("a.db")).is_empty());

    let mut waited = Duration::ZERO;
    while uris_in(&dir.path().join("a.db")).len() < 2 {
        assert!(waited < Duration::from_secs(5), "timer flush never happened");
        tokio::time::sleep(Duration::from_millis(50)).await;
        waited += Duration::from_millis(50);
    }
    assert_eq!(uris_in(&dir.path().join("a.db")), ["/a", "/b"]);

    shutdown.cancel();
    let summaries = running.await.unwrap();
    assert!(summaries[0].metrics.flushes >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_overflow_keeps_every_row_in_order() {
    let dir = TempDir::new().unwrap();
    let (resolved, _zones) = setup(
        &dir,
        "[[targets]]\npath = \"a.db\"\nformat = \"hits\"\nbuffer = \"32k\"\n",
    );

    let worker = Worker::start(resolved).unwrap();
    let handle = worker.handle();

    let padding = "p".repeat(3000);
    let expected: Vec<String> = (0..40).map(|i| format!("/{i:02}/{padding}")).collect();
    let mut flushed = 0;
    for uri in &expected {
        if handle.log(&request(uri)) == [LogOutcome::Flushed] {
            flushed += 1;
        }
    }
    assert!(flushed >= 1, "a 32k zone cannot hold 40 rows of 3k");

    let summaries = worker.run(cancelled()).await;
    assert_eq!(summaries[0].metrics.rows_dropped, 0);
    assert_eq!(uris_in(&dir.path().join("a.db")), expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_stores_buffered_rows() {
    let dir = TempDir::new().unwrap();
    let (resolved, _zones) = setup(
        &dir,
        "[[targets]]\npath = \"a.db\"\nformat = \"hits\"\nbuffer = \"64k\"\n",
    );

    let worker = Worker::start(resolved).unwrap();
    let handle = worker.handle();
    for i in 0..5 {
        assert_eq!(handle.log(&request(&format!("/{i}"))), [LogOutcome::Buffered]);
    }
    assert!(uris_in(&dir.path().join("a.db")).is_empty());

    let summaries = worker.run(cancelled()).await;
    assert_eq!(summaries[0].metrics.rows_inserted, 5);
    assert_eq!(uris_in(&dir.path().join("a.db")), ["/0", "/1", "/2", "/3", "/4"]);

    // closed targets ignore further requests
    assert_eq!(handle.log(&request("/late")), [LogOutcome::Disabled]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_buffered_rows_survive_restart() {
    let dir = TempDir::new().unwrap();
    let targets = "[[targets]]\npath = \"a.db\"\nformat = \"hits\"\nbuffer = \"64k\"\n";
    let (resolved, _zones) = setup(&dir, targets);

    let worker = Worker::start(resolved).unwrap();
    worker.handle().log(&request("/kept"));
    // worker dropped without running its exit path
    drop(worker);

    let (resolved, _zones) = setup(&dir, targets);
    let worker = Worker::start(resolved).unwrap();
    worker.run(cancelled()).await;
    assert_eq!(uris_in(&dir.path().join("a.db")), ["/kept"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dead_worker_lock_is_released() {
    let dir = TempDir::new().unwrap();
    let (resolved, zones) = setup(
        &dir,
        "[[targets]]\npath = \"a.db\"\nformat = \"hits\"\nbuffer = \"64k\"\n",
    );

    // a worker that died holding the lock
    std::mem::forget(zones[0].lock());
    assert_eq!(zones[0].lock_owner(), Some(std::process::id().max(1)));

    assert_eq!(release_dead_worker(&zones, std::process::id().max(1)), 1);
    assert_eq!(zones[0].lock_owner(), None);

    let worker = Worker::start(resolved).unwrap();
    assert_eq!(worker.handle().log(&request("/after")), [LogOutcome::Buffered]);
    worker.run(cancelled()).await;
    assert_eq!(uris_in(&dir.path().join("a.db")), ["/after"]);
}

// ============================================================================
// Async
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_inserts_complete_before_exit() {
    let dir = TempDir::new().unwrap();
    let (resolved, _zones) = setup(
        &dir,
        "[[targets]]\npath = \"a.db\"\nformat = \"hits\"\nasync = true\n",
    );

    let worker = Worker::start(resolved).unwrap();
    let handle = worker.handle();
    for i in 0..5 {
        assert_eq!(handle.log(&request(&format!("/{i}"))), [LogOutcome::Submitted]);
    }

    let summaries = worker.run(cancelled()).await;
    assert_eq!(summaries[0].metrics.rows_inserted, 5);
    assert_eq!(uris_in(&dir.path().join("a.db")).len(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_buffered_flush() {
    let dir = TempDir::new().unwrap();
    let (resolved, _zones) = setup(
        &dir,
        r#"
[thread_pools.io]
threads = 1
max_queue = 16

[[targets]]
path = "a.db"
format = "hits"
buffer = "64k"
max = 2
async = "io"
"#,
    );

    let worker = Worker::start(resolved).unwrap();
    let handle = worker.handle();
    assert_eq!(handle.log(&request("/a")), [LogOutcome::Buffered]);
    assert_eq!(handle.log(&request("/b")), [LogOutcome::Submitted]);
    assert_eq!(handle.log(&request("/c")), [LogOutcome::Buffered]);

    let summaries = worker.run(cancelled()).await;
    assert_eq!(summaries[0].metrics.rows_inserted, 3);
    assert_eq!(uris_in(&dir.path().join("a.db")), ["/a", "/b", "/c"]);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_insert_failure_disables_only_that_target() {
    let dir = TempDir::new().unwrap();
    let (resolved, _zones) = setup(
        &dir,
        "[[targets]]\npath = \"a.db\"\nformat = \"hits\"\n\n[[targets]]\npath = \"b.db\"\nformat = \"hits\"\n",
    );

    let worker = Worker::start(resolved).unwrap();
    let handle = worker.handle();
    assert_eq!(
        handle.log(&request("/ok")),
        [LogOutcome::Inserted, LogOutcome::Inserted]
    );

    Connection::open(dir.path().join("a.db"))
        .unwrap()
        .execute_batch("DROP TABLE hits")
        .unwrap();

    assert_eq!(
        handle.log(&request("/broken")),
        [LogOutcome::Disabled, LogOutcome::Inserted]
    );
    assert!(!handle.target("a.db").unwrap().is_enabled());
    assert_eq!(
        handle.log(&request("/after")),
        [LogOutcome::Disabled, LogOutcome::Inserted]
    );
    assert_eq!(uris_in(&dir.path().join("b.db")), ["/ok", "/broken", "/after"]);

    let summaries = worker.run(cancelled()).await;
    assert_eq!(summaries[0].metrics.insert_errors, 1);
    assert_eq!(summaries[1].metrics.rows_inserted, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_open_failure_disables_target_at_start() {
    let dir = TempDir::new().unwrap();
    let (resolved, _zones) = setup(
        &dir,
        "[[targets]]\npath = \"missing/a.db\"\nformat = \"hits\"\n\n[[targets]]\npath = \"b.db\"\nformat = \"hits\"\n",
    );

    let worker = Worker::start(resolved).unwrap();
    let handle = worker.handle();
    assert!(!handle.target("missing/a.db").unwrap().is_enabled());
    assert_eq!(
        handle.log(&request("/x")),
        [LogOutcome::Disabled, LogOutcome::Inserted]
    );
    worker.run(cancelled()).await;
}

#[test]
fn test_start_outside_runtime() {
    let dir = TempDir::new().unwrap();
    let (resolved, _zones) = setup(&dir, "[[targets]]\npath = \"a.db\"\nformat = \"hits\"\n");
    assert!(Worker::start(resolved).is_err());
}

fn cancelled() -> CancellationToken {
    let token = CancellationToken::new();
    token.cancel();
    token
}
