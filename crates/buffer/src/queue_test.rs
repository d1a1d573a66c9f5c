//! Shared queue tests

use std::sync::Arc;

use tempfile::TempDir;

use super::*;
use crate::zone::MIN_ZONE_SIZE;

fn buffer(dir: &TempDir, max: Option<usize>) -> SharedBuffer {
    let zone = SharedZone::create(dir.path().join("queue"), MIN_ZONE_SIZE).unwrap();
    SharedBuffer::new(zone, max)
}

fn row(values: &[&str]) -> Row {
    Row::from_texts(values)
}

fn drain(buf: &SharedBuffer) -> Vec<Row> {
    let mut out = Vec::new();
    buf.drain_to_list(&mut out).unwrap();
    out
}

// ============================================================================
// Push / Drain
// ============================================================================

#[test]
fn test_drain_preserves_push_order() {
    let dir = TempDir::new().unwrap();
    let buf = buffer(&dir, None);

    let rows: Vec<Row> = (0..10)
        .map(|i| row(&[&format!("r{i}"), &i.to_string(), "x"]))
        .collect();
    for r in &rows {
        assert_eq!(buf.push(r).unwrap(), PushStatus::Accepted);
    }
    assert_eq!(buf.len(), 10);

    assert_eq!(drain(&buf), rows);
    assert_eq!(buf.len(), 0);
    assert!(buf.is_empty());
}

#[test]
fn test_push_reports_full_at_max() {
    let dir = TempDir::new().unwrap();
    let buf = buffer(&dir, Some(2));

    assert_eq!(buf.push(&row(&["a", "1", "x"])).unwrap(), PushStatus::Accepted);
    assert_eq!(buf.push(&row(&["b", "2", "y"])).unwrap(), PushStatus::Full);

    let rows = drain(&buf);
    assert_eq!(rows, vec![row(&["a", "1", "x"]), row(&["b", "2", "y"])]);
    assert_eq!(buf.len(), 0);
}

#[test]
fn test_push_past_max_still_queues() {
    let dir = TempDir::new().unwrap();
    let buf = buffer(&dir, Some(1));

    assert_eq!(buf.push(&row(&["a"])).unwrap(), PushStatus::Full);
    assert_eq!(buf.push(&row(&["b"])).unwrap(), PushStatus::Full);
    assert_eq!(buf.len(), 2);
}

#[test]
fn test_null_and_empty_values_survive() {
    let dir = TempDir::new().unwrap();
    let buf = buffer(&dir, None);

    let r = Row::new(vec![
        None,
        Some(Bytes::new()),
        Some(Bytes::from_static(&[0, 1, 2, 0xff])),
        None,
    ]);
    buf.push(&r).unwrap();

    assert_eq!(drain(&buf), vec![r]);
}

#[test]
fn test_drain_empty_queue() {
    let dir = TempDir::new().unwrap();
    let buf = buffer(&dir, None);

    let mut out = vec![row(&["kept"])];
    assert_eq!(buf.drain_to_list(&mut out).unwrap(), 0);
    assert_eq!(out, vec![row(&["kept"])]);
}

#[test]
fn test_drain_returns_memory() {
    let dir = TempDir::new().unwrap();
    let buf = buffer(&dir, None);

    for i in 0..50 {
        buf.push(&row(&[&"v".repeat(100), &i.to_string()])).unwrap();
    }
    assert!(buf.lock().stats().unwrap().used > 0);

    drain(&buf);
    let stats = buf.lock().stats().unwrap();
    assert_eq!(stats.used, 0);
    assert_eq!(stats.allocations, 0);
}

// ============================================================================
// Exhaustion / Unshift
// ============================================================================

/// Push until the arena refuses a row; returns what was queued and the
/// row that did not fit
fn fill(buf: &SharedBuffer) -> (Vec<Row>, Row) {
    let mut queued = Vec::new();
    for i in 0.. {
        let r = row(&[&format!("{i:05}"), &"p".repeat(1000)]);
        match buf.push(&r) {
            Ok(_) => queued.push(r),
            Err(e) => {
                assert!(e.is_exhausted(), "unexpected error: {e}");
                return (queued, r);
            }
        }
    }
    unreachable!()
}

#[test]
fn test_exhausted_push_changes_nothing() {
    let dir = TempDir::new().unwrap();
    let buf = buffer(&dir, None);

    let (queued, _) = fill(&buf);
    let before = buf.lock().stats().unwrap();
    let len = buf.len();

    let err = buf.push(&row(&["x", &"p".repeat(1000)])).unwrap_err();
    assert!(matches!(err, BufferError::Exhausted { needed } if needed > 1000));

    assert_eq!(buf.len(), len);
    assert_eq!(buf.lock().stats().unwrap(), before);
    assert_eq!(drain(&buf), queued);
}

#[test]
fn test_row_larger_than_zone() {
    let dir = TempDir::new().unwrap();
    let buf = buffer(&dir, None);

    let big = row(&[&"z".repeat(MIN_ZONE_SIZE)]);
    assert!(buf.push(&big).unwrap_err().is_exhausted());
    assert!(buf.is_empty());
}

#[test]
fn test_unshift_after_overflow_keeps_order() {
    let dir = TempDir::new().unwrap();
    let buf = buffer(&dir, None);

    let (queued, overflow) = fill(&buf);
    assert_eq!(drain(&buf), queued);

    buf.unshift(&overflow).unwrap();
    let next = row(&["next", "p"]);
    buf.push(&next).unwrap();

    assert_eq!(drain(&buf), vec![overflow, next]);
}

#[test]
fn test_unshift_goes_to_front() {
    let dir = TempDir::new().unwrap();
    let buf = buffer(&dir, None);

    buf.push(&row(&["b"])).unwrap();
    buf.push(&row(&["c"])).unwrap();
    buf.unshift(&row(&["a"])).unwrap();

    assert_eq!(buf.len(), 3);
    assert_eq!(drain(&buf), vec![row(&["a"]), row(&["b"]), row(&["c"])]);
}

#[test]
fn test_push_then_drain_under_one_lock() {
    let dir = TempDir::new().unwrap();
    let buf = buffer(&dir, Some(2));
    buf.push(&row(&["a"])).unwrap();

    let mut out = Vec::new();
    {
        let mut locked = buf.lock();
        assert_eq!(locked.push(&row(&["b"])).unwrap(), PushStatus::Full);
        assert_eq!(locked.drain_into(&mut out).unwrap(), 2);
        assert!(locked.is_empty());
    }
    assert_eq!(out, vec![row(&["a"]), row(&["b"])]);
}

// ============================================================================
// Corruption
// ============================================================================

#[test]
fn test_corrupted_queue_is_reset() {
    let dir = TempDir::new().unwrap();
    let buf = buffer(&dir, None);
    buf.push(&row(&["a"])).unwrap();
    buf.push(&row(&["b"])).unwrap();

    {
        let mut locked = buf.lock();
        locked.guard.write_u64(OFF_QUEUE_LEN, 7).unwrap();
    }

    let mut out = Vec::new();
    let err = buf.drain_to_list(&mut out).unwrap_err();
    assert!(matches!(err, BufferError::Corrupted(_)));
    assert!(out.is_empty());

    assert!(buf.is_empty());
    assert_eq!(buf.lock().stats().unwrap().allocations, 0);
    buf.push(&row(&["c"])).unwrap();
    assert_eq!(drain(&buf), vec![row(&["c"])]);
}

// ============================================================================
// Cross-mapping concurrency
// ============================================================================

#[test]
fn test_concurrent_push_and_drain_across_mappings() {
    const PRODUCERS: usize = 3;
    const ROWS: usize = 300;

    let dir = TempDir::new().unwrap();
    let master = buffer(&dir, None);
    let path = master.zone().path().to_path_buf();

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let zone = SharedZone::attach(&path).unwrap();
            std::thread::spawn(move || {
                let buf = SharedBuffer::new(zone, None);
                for i in 0..ROWS {
                    let r = row(&[&p.to_string(), &i.to_string()]);
                    // the drainer keeps up, so the arena never fills for long
                    while buf.push(&r).is_err() {
                        std::thread::yield_now();
                    }
                }
            })
        })
        .collect();

    let drainer_zone = SharedZone::attach(&path).unwrap();
    let done = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let drainer_done = Arc::clone(&done);
    let drainer = std::thread::spawn(move || {
        let buf = SharedBuffer::new(drainer_zone, None);
        let mut all = Vec::new();
        loop {
            let finished = drainer_done.load(std::sync::atomic::Ordering::SeqCst);
            let mut batch = Vec::new();
            let n = buf.drain_to_list(&mut batch).unwrap();
            assert_eq!(n, batch.len());
            all.extend(batch);
            if finished {
                break;
            }
            std::thread::yield_now();
        }
        all
    });

    for p in producers {
        p.join().unwrap();
    }
    done.store(true, std::sync::atomic::Ordering::SeqCst);
    let mut all = drainer.join().unwrap();
    drain(&master).into_iter().for_each(|r| all.push(r));

    assert_eq!(all.len(), PRODUCERS * ROWS);
    assert!(master.is_empty());

    // every producer's rows come out in the order it pushed them
    for p in 0..PRODUCERS {
        let seq: Vec<usize> = all
            .iter()
            .filter(|r| r.get(0) == Some(p.to_string().as_bytes()))
            .map(|r| std::str::from_utf8(r.get(1).unwrap()).unwrap().parse().unwrap())
            .collect();
        assert_eq!(seq, (0..ROWS).collect::<Vec<_>>());
    }
}
