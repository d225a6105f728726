// Boundary Condition Tests for SwayKV
// Edge cases around keys, values, options and key orders.

use std::time::Duration;
use swaykv::{Deadline, Error, KeyOrder, Options, WriteBatch, DB};
use tempfile::TempDir;

/// Empty keys are rejected
#[test]
fn test_empty_key_rejected() {
    let db = DB::open_in_memory(Options::default()).unwrap();

    assert!(matches!(db.put(b"", b"value"), Err(Error::InvalidArgument(_))));
    assert!(matches!(db.remove(b""), Err(Error::InvalidArgument(_))));
    assert!(matches!(db.apply_function(b"k", b""), Err(Error::InvalidArgument(_))));
    assert!(db.is_empty().unwrap());
}

/// Empty values are allowed and distinct from absence
#[test]
fn test_empty_value() {
    let db = DB::open_in_memory(Options::default()).unwrap();
    db.put(b"key", b"").unwrap();
    assert_eq!(db.get(b"key").unwrap().as_deref(), Some(&b""[..]));
    assert!(db.contains_key(b"key").unwrap());
}

/// Large values that span many blocks and log fragments
#[test]
fn test_large_values() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().to_path_buf();
    let big: Vec<u8> = (0..512 * 1024).map(|i| (i % 251) as u8).collect();

    {
        let db = DB::open(&path, Options::default()).unwrap();
        db.put(b"big", &big).unwrap();
        db.put(b"small", b"s").unwrap();
        std::mem::forget(db);
    }

    let db = DB::open(&path, Options::default()).unwrap();
    assert_eq!(db.get(b"big").unwrap().as_deref(), Some(&big[..]));
    db.flush().unwrap();
    assert_eq!(db.get(b"big").unwrap().as_deref(), Some(&big[..]));
    assert_eq!(db.get(b"small").unwrap().as_deref(), Some(&b"s"[..]));
}

/// Binary keys including zero and 0xFF bytes
#[test]
fn test_binary_keys() {
    let db = DB::open_in_memory(Options::default()).unwrap();
    let keys: Vec<Vec<u8>> = vec![vec![0], vec![0, 0], vec![0, 255], vec![1], vec![255], vec![255, 255]];
    for key in &keys {
        db.put(key, key).unwrap();
    }
    db.flush().unwrap();

    let stored: Vec<Vec<u8>> = db.keys().unwrap().iter().map(|k| k.to_vec()).collect();
    assert_eq!(stored, keys);
}

/// Invalid options are rejected at open
#[test]
fn test_invalid_options() {
    assert!(matches!(DB::open_in_memory(Options::default().map_size(0)), Err(Error::InvalidArgument(_))));
    assert!(matches!(DB::open_in_memory(Options::default().max_levels(0)), Err(Error::InvalidArgument(_))));
    assert!(matches!(
        DB::open_in_memory(Options::default().bloom_filter_fp_rate(1.5)),
        Err(Error::InvalidArgument(_))
    ));
}

/// A single level still flushes, compacts and reads back
#[test]
fn test_single_level() {
    let db = DB::open_in_memory(Options::default().max_levels(1).map_size(1024)).unwrap();
    for i in 0..300 {
        db.put(format!("key{:04}", i).as_bytes(), b"v").unwrap();
    }
    for i in 0..150 {
        db.remove(format!("key{:04}", i).as_bytes()).unwrap();
    }
    db.compact().unwrap();

    assert_eq!(db.size().unwrap(), 150);
    assert!(db.level_meter(2).is_none());
}

/// Reverse key order drives iteration and levels
#[test]
fn test_reverse_key_order() {
    let db = DB::open_in_memory(Options::default().key_order(KeyOrder::reverse_lexicographic()).map_size(1024)).unwrap();
    for i in 0..200 {
        db.put(format!("key{:04}", i).as_bytes(), b"v").unwrap();
    }
    db.compact().unwrap();

    assert_eq!(db.keys_head().unwrap().as_deref(), Some(&b"key0199"[..]));
    assert_eq!(db.keys_last().unwrap().as_deref(), Some(&b"key0000"[..]));

    let first_three: Vec<_> = db.stream().take(3).materialize().unwrap().into_iter().map(|(k, _)| k).collect();
    assert_eq!(first_three, vec!["key0199", "key0198", "key0197"]);

    // Bounds follow the key order too.
    db.remove_range(b"key0150", b"key0100").unwrap();
    assert_eq!(db.size().unwrap(), 149);
    assert!(db.remove_range(b"key0100", b"key0150").is_err());
}

/// A custom order: numeric suffix comparison
#[test]
fn test_custom_key_order() {
    let numeric = KeyOrder::custom(|a: &[u8], b: &[u8]| {
        let n = |k: &[u8]| std::str::from_utf8(k).ok().and_then(|s| s.parse::<u64>().ok()).unwrap_or(0);
        n(a).cmp(&n(b)).then_with(|| a.cmp(b))
    });
    let db = DB::open_in_memory(Options::default().key_order(numeric)).unwrap();
    for i in [100u64, 2, 30, 7, 1000] {
        db.put(i.to_string().as_bytes(), b"v").unwrap();
    }
    db.flush().unwrap();

    let keys: Vec<_> = db.keys().unwrap();
    assert_eq!(keys, vec!["2", "7", "30", "100", "1000"]);
    assert_eq!(db.stream().from_or_after(b"8").head().unwrap().unwrap().0, "30");
}

/// A batch over the memtable threshold still commits atomically
#[test]
fn test_batch_larger_than_map_size() {
    let db = DB::open_in_memory(Options::default().map_size(1024)).unwrap();
    let mut batch = WriteBatch::new();
    for i in 0..500 {
        batch.put(format!("key{:04}", i).as_bytes(), &[1u8; 16]);
    }
    db.commit(batch).unwrap();

    assert_eq!(db.size().unwrap(), 500);
    assert!(db.level_zero_meter().maps_count >= 1);
}

/// Empty batches are accepted and change nothing
#[test]
fn test_empty_batch() {
    let db = DB::open_in_memory(Options::default()).unwrap();
    db.commit(WriteBatch::new()).unwrap();
    assert!(db.is_empty().unwrap());
}

/// Deadlines at the edges
#[test]
fn test_deadline_edges() {
    let db = DB::open_in_memory(Options::default()).unwrap();

    db.put_with_deadline(b"past", b"v", Deadline::from_nanos(0)).unwrap();
    assert_eq!(db.get(b"past").unwrap(), None);

    let far = Deadline::after(Duration::from_secs(100 * 365 * 24 * 3600));
    db.put_with_deadline(b"far", b"v", far).unwrap();
    assert_eq!(db.expiration(b"far").unwrap(), Some(far));

    db.put(b"plain", b"v").unwrap();
    assert_eq!(db.expiration(b"plain").unwrap(), None);
    assert_eq!(db.time_left(b"plain").unwrap(), None);
    assert_eq!(db.time_left(b"absent").unwrap(), None);
}
