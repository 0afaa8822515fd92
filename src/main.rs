use std::sync::Arc;

use strata::buffer::BufferPoolManager;
use strata::common::{PageId, RecordId, SlotId, DEFAULT_LRUK_K};
use strata::index::BPlusTree;
use strata::storage::disk::DiskManager;

fn main() {
    tracing_subscriber::fmt::init();

    println!("Strata - a disk-oriented storage kernel");
    println!("=======================================\n");

    let db_path = "demo.db";
    let disk_manager = Arc::new(DiskManager::new(db_path).expect("failed to open database file"));
    println!("Opened database file: {}", db_path);

    let bpm = Arc::new(BufferPoolManager::new(64, DEFAULT_LRUK_K, disk_manager));
    println!("Created buffer pool with 64 frames\n");

    let mut index = BPlusTree::new("demo_index", Arc::clone(&bpm), 4, 4);

    for key in 1..=50u32 {
        let rid = RecordId::new(PageId::new(key), SlotId::new(0));
        index.insert(key, rid).expect("insert failed");
    }
    println!("Inserted keys 1..=50, root page: {}", index.root_page_id());

    let probe = 37;
    match index.get(probe).expect("lookup failed") {
        Some(rid) => println!("get({}) -> {:?}", probe, rid),
        None => println!("get({}) -> not found", probe),
    }

    print!("Scan from 45: ");
    let iter = index.begin_at(45).expect("scan failed");
    for entry in iter {
        let (key, _) = entry.expect("scan failed");
        print!("{} ", key);
    }
    println!();

    for key in (1..=50u32).step_by(2) {
        index.remove(key).expect("remove failed");
    }
    println!("Removed every odd key");

    let remaining: usize = index
        .begin()
        .expect("scan failed")
        .map(|entry| entry.expect("scan failed"))
        .count();
    println!("{} keys remain", remaining);

    bpm.flush_all().expect("flush failed");
    println!("Flushed all pages");

    std::fs::remove_file(db_path).ok();
    println!("\nDemo completed successfully!");
}
