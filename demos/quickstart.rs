//! Quickstart for SwayKV
//!
//! This example demonstrates the fundamental operations:
//! - Opening a database
//! - Writing single keys and atomic batches
//! - Reading values and streaming ranges
//! - Removing keys and ranges
//! - Using a FIFO queue with expiring elements

use std::time::Duration;
use swaykv::{Options, Queue, WriteBatch, DB};

fn main() -> Result<(), swaykv::Error> {
    // Initialize logger
    env_logger::init();

    let options = Options::default().map_size(4 * 1024 * 1024).sync_wal(true);

    // Created if it doesn't exist
    let db = DB::open("./quickstart_data", options)?;
    println!("Database opened successfully");

    println!("\n=== Writing Data ===");
    for i in 0..10 {
        let key = format!("user:{:02}", i);
        let value = format!("{{\"name\":\"User {}\",\"age\":{}}}", i, 20 + i);
        db.put(key.as_bytes(), value.as_bytes())?;
    }

    // All or nothing
    let mut batch = WriteBatch::new();
    batch.put(b"account:alice", b"90");
    batch.put(b"account:bob", b"110");
    batch.remove(b"user:00");
    db.commit(batch)?;

    println!("\n=== Reading Data ===");
    if let Some(value) = db.get(b"user:05")? {
        println!("user:05 => {}", String::from_utf8_lossy(&value));
    }
    println!("user:00 present: {}", db.contains_key(b"user:00")?);

    println!("\n=== Streaming ===");
    db.stream().from_or_after(b"user:03").take(3).foreach(|key, value| {
        println!("{} => {}", String::from_utf8_lossy(key), String::from_utf8_lossy(value));
    })?;
    let last = db.stream().reverse().head()?;
    if let Some((key, _)) = last {
        println!("Last key: {}", String::from_utf8_lossy(&key));
    }

    println!("\n=== Removing a Range ===");
    db.remove_range(b"user:01", b"user:04")?;
    println!("Entries left: {}", db.size()?);

    db.close()?;
    println!("Database closed");

    println!("\n=== Queue ===");
    let queue = Queue::open_in_memory(Options::default())?;
    queue.push(b"1")?;
    queue.push_after(b"2", Duration::ZERO)?;
    queue.push(b"3")?;
    while let Some(value) = queue.pop()? {
        println!("popped {}", String::from_utf8_lossy(&value));
    }
    queue.close()?;

    Ok(())
}
