//! Integration tests for compaction functionality

use std::fs;
use std::path::Path;
use std::time::Duration;
use swaykv::{CompressionType, GroupingStrategy, Options, DB};
use tempfile::TempDir;

fn small_levels() -> Options {
    Options::default()
        .map_size(2 * 1024)
        .segment_size(4 * 1024)
        .block_size(512)
        .level_one_size(8 * 1024)
        .max_levels(4)
        .sync_wal(false)
}

fn segment_files(dir: &Path) -> usize {
    fs::read_dir(dir.join("segments"))
        .map(|entries| entries.filter(|e| e.as_ref().is_ok_and(|e| e.path().extension().is_some_and(|x| x == "seg"))).count())
        .unwrap_or(0)
}

#[test]
fn test_compaction_pushes_data_down() {
    env_logger::try_init().ok();

    let temp_dir = TempDir::new().unwrap();
    let db = DB::open(temp_dir.path(), small_levels()).unwrap();

    for batch in 0..5 {
        for i in 0..50 {
            let key = format!("batch{:02}_key{:04}", batch, i);
            db.put(key.as_bytes(), &[b'x'; 100]).unwrap();
        }
        db.flush().unwrap();
    }
    db.compact().unwrap();

    let level_one = db.level_meter(1).unwrap();
    assert!(level_one.level_size <= level_one.budget, "level 1 should be within budget");
    let below: usize = (2..=4).map(|n| db.level_meter(n).unwrap().segments_count).sum();
    assert!(below > 0, "compaction should push segments below level 1");

    for batch in 0..5 {
        for i in 0..50 {
            let key = format!("batch{:02}_key{:04}", batch, i);
            assert!(db.get(key.as_bytes()).unwrap().is_some(), "Key {} should exist", key);
        }
    }
}

#[test]
fn test_compaction_removes_duplicates() {
    env_logger::try_init().ok();

    let db = DB::open_in_memory(small_levels()).unwrap();

    for version in 0..10 {
        let value = format!("version_{}", version);
        db.put(b"duplicate_key", value.as_bytes()).unwrap();
        if version % 2 == 1 {
            db.flush().unwrap();
        }
    }
    db.compact().unwrap();

    assert_eq!(db.get(b"duplicate_key").unwrap().as_deref(), Some(&b"version_9"[..]));
    let segments: usize = (1..=4).map(|n| db.level_meter(n).unwrap().segments_count).sum();
    assert_eq!(segments, 1, "one key should fit in one segment");
}

#[test]
fn test_tombstones_shadow_lower_levels() {
    let temp_dir = TempDir::new().unwrap();
    let db = DB::open(temp_dir.path(), small_levels()).unwrap();

    for i in 0..200 {
        db.put(format!("key{:04}", i).as_bytes(), &[b'v'; 64]).unwrap();
    }
    db.compact().unwrap();

    for i in (0..200).step_by(2) {
        db.remove(format!("key{:04}", i).as_bytes()).unwrap();
    }
    db.flush().unwrap();
    assert_eq!(db.size().unwrap(), 100);

    db.compact().unwrap();
    assert_eq!(db.size().unwrap(), 100);
    assert_eq!(db.get(b"key0000").unwrap(), None);
    assert!(db.get(b"key0001").unwrap().is_some());
}

#[test]
fn test_removed_data_is_reclaimed() {
    let temp_dir = TempDir::new().unwrap();
    let db = DB::open(temp_dir.path(), small_levels().level_one_size(1024 * 1024)).unwrap();

    for i in 0..300 {
        db.put(format!("key{:04}", i).as_bytes(), &[b'v'; 64]).unwrap();
    }
    db.flush().unwrap();
    let full = db.size_of_segments();

    db.remove_range(b"key0000", b"key0299").unwrap();
    db.flush().unwrap();

    assert!(db.size_of_segments() < full / 4);
    assert!(db.is_empty().unwrap());
}

#[test]
fn test_replaced_segment_files_are_deleted() {
    let temp_dir = TempDir::new().unwrap();
    let db = DB::open(temp_dir.path(), small_levels()).unwrap();

    for round in 0..6 {
        for i in 0..100 {
            db.put(format!("key{:04}", i).as_bytes(), format!("round{}", round).as_bytes()).unwrap();
        }
        db.flush().unwrap();
    }
    db.compact().unwrap();

    let live: usize = (1..=4).map(|n| db.level_meter(n).unwrap().segments_count).sum();
    assert_eq!(segment_files(temp_dir.path()), live);
}

#[test]
fn test_delete_segments_eventually() {
    let temp_dir = TempDir::new().unwrap();
    let options = small_levels()
        .delete_segments_eventually(true)
        .segments_open_check_delay(Duration::from_millis(20));
    let db = DB::open(temp_dir.path(), options).unwrap();

    for round in 0..4 {
        for i in 0..100 {
            db.put(format!("key{:04}", i).as_bytes(), format!("round{}", round).as_bytes()).unwrap();
        }
        db.flush().unwrap();
    }

    // The sweeper reclaims superseded segments once nobody reads them.
    let live: usize = (1..=4).map(|n| db.level_meter(n).unwrap().segments_count).sum();
    let mut files = segment_files(temp_dir.path());
    for _ in 0..100 {
        if files == live {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
        files = segment_files(temp_dir.path());
    }
    assert_eq!(files, live);
    assert_eq!(db.get(b"key0042").unwrap().as_deref(), Some(&b"round3"[..]));
}

#[test]
fn test_other_dirs_spread_segments() {
    let root = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    let options = small_levels().other_dir(second.path());

    {
        let db = DB::open(root.path(), options.clone()).unwrap();
        for round in 0..4 {
            for i in 0..100 {
                db.put(format!("r{}_key{:04}", round, i).as_bytes(), &[b'z'; 48]).unwrap();
            }
            db.flush().unwrap();
        }
        db.close().unwrap();
    }

    assert!(segment_files(root.path()) > 0);
    assert!(segment_files(second.path()) > 0);

    let db = DB::open(root.path(), options).unwrap();
    assert_eq!(db.size().unwrap(), 400);
    assert_eq!(db.get(b"r3_key0099").unwrap().as_deref(), Some(&[b'z'; 48][..]));
}

#[test]
fn test_last_level_grouping() {
    let db = DB::open_in_memory(
        small_levels()
            .max_levels(2)
            .level_one_size(4 * 1024)
            .last_level_grouping(GroupingStrategy { block_size: 2048, compression: CompressionType::None }),
    )
    .unwrap();

    for i in 0..400 {
        db.put(format!("key{:04}", i).as_bytes(), &[b'g'; 32]).unwrap();
    }
    db.compact().unwrap();

    assert!(db.level_meter(2).unwrap().segments_count > 0);
    assert_eq!(db.size().unwrap(), 400);
    assert_eq!(db.stream().from(b"key0200").head().unwrap().unwrap().0.as_ref(), b"key0200");
}

#[test]
fn test_compaction_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().to_path_buf();

    {
        let db = DB::open(&path, small_levels()).unwrap();
        for i in 0..500 {
            db.put(format!("key{:04}", i).as_bytes(), format!("value{}", i).as_bytes()).unwrap();
        }
        db.compact().unwrap();
        db.close().unwrap();
    }

    let db = DB::open(&path, small_levels()).unwrap();
    assert_eq!(db.size().unwrap(), 500);
    assert_eq!(db.get(b"key0321").unwrap().as_deref(), Some(&b"value321"[..]));
}

#[test]
fn test_appendix_checkpoint() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().to_path_buf();
    let options = small_levels().appendix_flush_checkpoint_size(1024);

    {
        let db = DB::open(&path, options.clone()).unwrap();
        for round in 0..10 {
            for i in 0..60 {
                db.put(format!("key{:04}", i).as_bytes(), format!("{}", round).as_bytes()).unwrap();
            }
            db.flush().unwrap();
        }
        db.close().unwrap();
    }

    let manifest = fs::metadata(path.join("appendix").join("MANIFEST")).unwrap();
    assert!(manifest.len() < 8 * 1024);

    let db = DB::open(&path, options).unwrap();
    assert_eq!(db.get(b"key0059").unwrap().as_deref(), Some(&b"9"[..]));
}

#[test]
fn test_manual_flush_wakes_compactor() {
    env_logger::try_init().ok();

    let temp_dir = TempDir::new().unwrap();
    // Large memtables and a long idle check: only the flush can start compaction.
    let options = small_levels().map_size(1 << 20).compaction_check_delay(Duration::from_secs(600));
    let db = DB::open(temp_dir.path(), options).unwrap();

    for batch in 0..4 {
        for i in 0..50 {
            db.put(format!("batch{:02}_key{:04}", batch, i).as_bytes(), &[b'x'; 100]).unwrap();
        }
        db.flush().unwrap();
    }

    let mut within_budget = false;
    for _ in 0..100 {
        let level_one = db.level_meter(1).unwrap();
        if level_one.level_size <= level_one.budget {
            within_budget = true;
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    assert!(within_budget, "background compaction should bring level 1 within budget");
    assert_eq!(db.size().unwrap(), 200);
}

#[test]
fn test_sweeper_limits_open_segments() {
    env_logger::try_init().ok();

    let temp_dir = TempDir::new().unwrap();
    let options = small_levels()
        .max_open_segments(2)
        .segments_open_check_delay(Duration::from_millis(50));
    let db = DB::open(temp_dir.path(), options).unwrap();

    for i in 0..500 {
        db.put(format!("key{:04}", i).as_bytes(), &[b'v'; 100]).unwrap();
    }
    db.compact().unwrap();

    let meters: Vec<_> = (1..=4).map(|n| db.level_meter(n).unwrap()).collect();
    let segments: usize = meters.iter().map(|m| m.segments_count).sum();
    assert!(segments > 2, "expected more segments than the handle limit, got {}", segments);

    let open_segments = || (1..=4).map(|n| db.level_meter(n).unwrap().open_segments).sum::<usize>();

    for i in 0..500 {
        assert!(db.get(format!("key{:04}", i).as_bytes()).unwrap().is_some());
    }

    let mut trimmed = false;
    for _ in 0..100 {
        if open_segments() <= 2 {
            trimmed = true;
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(trimmed, "sweeper should close handles beyond the limit, {} open", open_segments());

    // Closed handles reopen on demand.
    for i in 0..500 {
        let key = format!("key{:04}", i);
        assert_eq!(db.get(key.as_bytes()).unwrap().as_deref(), Some(&[b'v'; 100][..]), "Key {}", key);
    }
    assert_eq!(db.stream().count().unwrap(), 500);
}
