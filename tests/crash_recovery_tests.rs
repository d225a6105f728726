// Crash Recovery Tests for SwayKV
// These tests verify data consistency after simulated crashes and damaged
// logs, under both recovery modes.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use swaykv::{FunctionOutput, Options, RecoveryMode, DB};
use tempfile::TempDir;

/// Drops the handle without closing it. The background threads keep the
/// leaked state alive, so the files are left exactly as a crash would.
fn simulate_crash(db: DB) {
    std::mem::forget(db);
}

fn newest_log(path: &Path) -> std::path::PathBuf {
    let mut logs: Vec<_> = fs::read_dir(path.join("log"))
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "log"))
        .collect();
    logs.sort();
    logs.pop().expect("no log file")
}

fn log_count(path: &Path) -> usize {
    fs::read_dir(path.join("log")).unwrap().count()
}

/// Test recovery after crash during write operations
#[test]
fn test_recovery_after_write_crash() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let path = dir.path().to_path_buf();

    {
        let db = DB::open(&path, Options::default()).unwrap();
        for i in 0..100 {
            let key = format!("key_{}", i);
            let value = format!("value_{}", i);
            db.put(key.as_bytes(), value.as_bytes()).unwrap();
        }
        simulate_crash(db);
    }

    {
        let db = DB::open(&path, Options::default()).unwrap();
        for i in 0..100 {
            let key = format!("key_{}", i);
            let expected = format!("value_{}", i);
            assert_eq!(
                db.get(key.as_bytes()).unwrap().as_deref(),
                Some(expected.as_bytes()),
                "Key {} should be recovered after crash",
                key
            );
        }
    }
}

/// Flushed data comes from segments, unflushed data from the log.
#[test]
fn test_recovery_partial_writes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().to_path_buf();

    {
        let db = DB::open(&path, Options::default()).unwrap();
        for i in 0..50 {
            db.put(format!("stable_key_{}", i).as_bytes(), b"stable_value").unwrap();
        }
        db.flush().unwrap();

        for i in 0..50 {
            db.put(format!("partial_key_{}", i).as_bytes(), b"partial_value").unwrap();
        }
        db.remove(b"stable_key_0").unwrap();
        simulate_crash(db);
    }

    let db = DB::open(&path, Options::default()).unwrap();
    assert!(db.size_of_segments() > 0);
    assert_eq!(db.get(b"stable_key_0").unwrap(), None);
    assert_eq!(db.get(b"stable_key_1").unwrap().as_deref(), Some(&b"stable_value"[..]));
    assert_eq!(db.get(b"partial_key_49").unwrap().as_deref(), Some(&b"partial_value"[..]));
    assert_eq!(db.size().unwrap(), 99);
}

/// Batches are replayed whole.
#[test]
fn test_recovery_keeps_batches_whole() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().to_path_buf();

    {
        let db = DB::open(&path, Options::default()).unwrap();
        let mut batch = swaykv::WriteBatch::new();
        for i in 0..20 {
            batch.put(format!("batch_{:02}", i).as_bytes(), b"v");
        }
        db.commit(batch).unwrap();
        simulate_crash(db);
    }

    let db = DB::open(&path, Options::default()).unwrap();
    assert_eq!(db.size().unwrap(), 20);
}

/// A clean close leaves no log to replay.
#[test]
fn test_clean_close_reclaims_logs() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().to_path_buf();

    {
        let db = DB::open(&path, Options::default()).unwrap();
        for i in 0..10 {
            db.put(format!("key{}", i).as_bytes(), b"v").unwrap();
        }
        db.close().unwrap();
    }
    assert_eq!(log_count(&path), 0);

    let db = DB::open(&path, Options::default()).unwrap();
    assert_eq!(db.size().unwrap(), 10);
}

/// Multiple crash-reopen cycles accumulate every write.
#[test]
fn test_repeated_crashes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().to_path_buf();

    for cycle in 0..4 {
        let db = DB::open(&path, Options::default()).unwrap();
        assert_eq!(db.size().unwrap(), cycle * 10);
        for i in 0..10 {
            db.put(format!("cycle{}_key{}", cycle, i).as_bytes(), b"v").unwrap();
        }
        if cycle % 2 == 0 {
            db.flush().unwrap();
        }
        simulate_crash(db);
    }

    let db = DB::open(&path, Options::default()).unwrap();
    assert_eq!(db.size().unwrap(), 40);
}

/// A torn record at the end of the log fails the open by default.
#[test]
fn test_torn_tail_reports_failure() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().to_path_buf();

    {
        let db = DB::open(&path, Options::default()).unwrap();
        db.put(b"a", b"1").unwrap();
        simulate_crash(db);
    }
    let mut log = OpenOptions::new().append(true).open(newest_log(&path)).unwrap();
    log.write_all(&[0xAB, 0xCD, 0xEF]).unwrap();
    drop(log);

    match DB::open(&path, Options::default()) {
        Err(e) => assert!(e.is_corruption(), "unexpected error: {}", e),
        Ok(_) => panic!("open should fail on a torn log"),
    }
}

/// The same torn tail is dropped under DropCorruptedTailEntries.
#[test]
fn test_torn_tail_dropped() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().to_path_buf();

    {
        let db = DB::open(&path, Options::default()).unwrap();
        db.put(b"a", b"1").unwrap();
        db.put(b"b", b"2").unwrap();
        simulate_crash(db);
    }
    let mut log = OpenOptions::new().append(true).open(newest_log(&path)).unwrap();
    log.write_all(&[0xAB, 0xCD, 0xEF]).unwrap();
    drop(log);

    let options = Options::default().recovery_mode(RecoveryMode::DropCorruptedTailEntries);
    let db = DB::open(&path, options).unwrap();
    assert_eq!(db.get(b"a").unwrap().as_deref(), Some(&b"1"[..]));
    assert_eq!(db.get(b"b").unwrap().as_deref(), Some(&b"2"[..]));
}

/// A flipped byte inside a record is a checksum failure; dropping it keeps
/// the records around it.
#[test]
fn test_corrupt_record_in_the_middle() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().to_path_buf();

    {
        let db = DB::open(&path, Options::default()).unwrap();
        db.put(b"first", &[1u8; 64]).unwrap();
        db.put(b"second", &[2u8; 64]).unwrap();
        db.put(b"third", &[3u8; 64]).unwrap();
        simulate_crash(db);
    }

    let log_path = newest_log(&path);
    let mut bytes = fs::read(&log_path).unwrap();
    let middle = bytes.len() / 2;
    bytes[middle] ^= 0xFF;
    fs::write(&log_path, &bytes).unwrap();

    assert!(DB::open(&path, Options::default()).is_err());

    let options = Options::default().recovery_mode(RecoveryMode::DropCorruptedTailEntries);
    let db = DB::open(&path, options).unwrap();
    assert_eq!(db.get(b"first").unwrap().as_deref(), Some(&[1u8; 64][..]));
    assert_eq!(db.get(b"second").unwrap(), None);
    assert_eq!(db.get(b"third").unwrap().as_deref(), Some(&[3u8; 64][..]));
}

/// A segment the appendix lists but the disk lost is reported as corruption.
#[test]
fn test_missing_segment_is_corruption() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().to_path_buf();

    {
        let db = DB::open(&path, Options::default()).unwrap();
        db.put(b"a", b"1").unwrap();
        db.close().unwrap();
    }
    for entry in fs::read_dir(path.join("segments")).unwrap() {
        fs::remove_file(entry.unwrap().path()).unwrap();
    }

    match DB::open(&path, Options::default()) {
        Err(e) => assert!(e.is_corruption(), "unexpected error: {}", e),
        Ok(_) => panic!("open should fail without its segments"),
    }
}

/// Segment files the appendix does not know are deleted on open.
#[test]
fn test_orphan_segments_removed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().to_path_buf();

    {
        let db = DB::open(&path, Options::default()).unwrap();
        db.put(b"a", b"1").unwrap();
        db.close().unwrap();
    }
    let orphan = path.join("segments").join("999999.seg");
    fs::write(&orphan, b"half written").unwrap();

    let db = DB::open(&path, Options::default()).unwrap();
    assert!(!orphan.exists());
    assert_eq!(db.get(b"a").unwrap().as_deref(), Some(&b"1"[..]));
}

/// Functions are not persisted; pending applications resolve once the
/// function is registered again.
#[test]
fn test_functions_registered_again_after_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().to_path_buf();
    let append = |value: &[u8]| FunctionOutput::Update([value, &b"!"[..]].concat());

    {
        let db = DB::open(&path, Options::default()).unwrap();
        db.register_function(b"bang", append);
        db.put(b"greeting", b"hello").unwrap();
        db.apply_function(b"greeting", b"bang").unwrap();
        simulate_crash(db);
    }

    let db = DB::open(&path, Options::default()).unwrap();
    assert!(db.get(b"greeting").is_err());

    db.register_function(b"bang", append);
    assert_eq!(db.get(b"greeting").unwrap().as_deref(), Some(&b"hello!"[..]));

    db.flush().unwrap();
    assert_eq!(db.get(b"greeting").unwrap().as_deref(), Some(&b"hello!"[..]));
}

/// Recovery with memory mapping disabled reads the same data.
#[test]
fn test_recovery_without_mmap() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().to_path_buf();
    let options = || Options::default().mmap(swaykv::MmapOptions::disabled());

    {
        let db = DB::open(&path, options()).unwrap();
        db.put_all((0..50).map(|i| (format!("k{:02}", i), format!("v{}", i)))).unwrap();
        db.flush().unwrap();
        db.put(b"tail", b"unflushed").unwrap();
        simulate_crash(db);
    }

    let db = DB::open(&path, options()).unwrap();
    assert_eq!(db.size().unwrap(), 51);
    assert_eq!(db.get(b"k07").unwrap().as_deref(), Some(&b"v7"[..]));
}

fn wait_for(flag: &AtomicBool, limit: Duration) -> bool {
    let started = Instant::now();
    while !flag.load(Ordering::SeqCst) {
        if started.elapsed() > limit {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
    true
}

/// Close returns within its timeout while a slow flush is still running,
/// and nothing is lost.
#[test]
fn test_close_timeout_with_slow_flush() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let path = dir.path().to_path_buf();
    let options = || Options::default().map_size(4 * 1024).close_timeout(Duration::from_millis(100));

    let entered = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));
    {
        let db = DB::open(&path, options()).unwrap();
        let (entered_fn, finished_fn) = (Arc::clone(&entered), Arc::clone(&finished));
        db.register_function(b"slow", move |value: &[u8]| {
            entered_fn.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_secs(2));
            finished_fn.store(true, Ordering::SeqCst);
            FunctionOutput::Update([value, b"+"].concat())
        });

        db.put(b"a", b"1").unwrap();
        db.flush().unwrap();
        db.apply_function(b"a", b"slow").unwrap();
        // Fill the memtable so a background flush folds the function.
        for i in 0..200 {
            db.put(format!("key{:04}", i).as_bytes(), &[b'x'; 64]).unwrap();
        }
        assert!(wait_for(&entered, Duration::from_secs(5)), "background flush never started");

        let started = Instant::now();
        db.close().unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed < Duration::from_millis(1500), "close took {:?}", elapsed);
        assert!(!finished.load(Ordering::SeqCst));
    }

    // Let the detached job finish before reopening.
    assert!(wait_for(&finished, Duration::from_secs(5)));
    thread::sleep(Duration::from_millis(500));

    let db = DB::open(&path, options()).unwrap();
    db.register_function(b"slow", |value: &[u8]| FunctionOutput::Update([value, b"+"].concat()));
    assert_eq!(db.get(b"a").unwrap().as_deref(), Some(&b"1+"[..]));
    for i in 0..200 {
        assert!(db.get(format!("key{:04}", i).as_bytes()).unwrap().is_some(), "key{:04} lost", i);
    }
}
