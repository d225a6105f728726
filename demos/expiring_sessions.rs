//! Session store with per-entry expiry and a value function
//!
//! This example shows how to:
//! - Store entries that expire on their own
//! - Extend a deadline without rewriting the value
//! - Count hits lazily with a registered function
//! - Bound write speed with an acceleration policy

use std::thread;
use std::time::Duration;
use swaykv::{AccelerationPolicy, Deadline, FunctionOutput, Options, DB};

fn main() -> Result<(), swaykv::Error> {
    env_logger::init();

    let options = Options::default()
        .map_size(256 * 1024)
        .acceleration(AccelerationPolicy::brake_after(4, Duration::from_millis(1), Duration::from_millis(50)));
    let db = DB::open_in_memory(options)?;

    println!("=== Creating Sessions ===");
    for i in 0..5 {
        let key = format!("session:{}", i);
        let ttl = Duration::from_millis(200 * (i + 1));
        db.put_with_deadline(key.as_bytes(), b"0", Deadline::after(ttl))?;
        println!("{} expires in {:?}", key, ttl);
    }

    // Keep session 0 alive much longer.
    db.expire(b"session:0", Deadline::after(Duration::from_secs(60)))?;

    println!("\n=== Counting Hits ===");
    let hit = db.register_function(b"hit", |value: &[u8]| {
        let hits = std::str::from_utf8(value).ok().and_then(|s| s.parse::<u64>().ok()).unwrap_or(0);
        FunctionOutput::Update((hits + 1).to_string().into_bytes())
    });
    for _ in 0..3 {
        db.apply_function(b"session:0", &hit)?;
    }
    if let Some(hits) = db.get(b"session:0")? {
        println!("session:0 hits: {}", String::from_utf8_lossy(&hits));
    }

    thread::sleep(Duration::from_millis(500));

    println!("\n=== After 500ms ===");
    for (key, _) in db.stream().materialize()? {
        let left = db.time_left(&key)?.unwrap_or_default();
        println!("{} alive, {:?} left", String::from_utf8_lossy(&key), left);
    }
    println!("Live sessions: {}", db.size()?);
    println!("Level 0: {:?}", db.level_zero_meter());

    db.close()?;
    Ok(())
}
