//! Integration tests for the B+Tree index

use std::sync::Arc;

use strata::buffer::BufferPoolManager;
use strata::common::{PageId, RecordId, SlotId};
use strata::index::BPlusTree;
use strata::storage::disk::DiskManager;

use tempfile::NamedTempFile;

fn create_bpm(pool_size: usize) -> (Arc<BufferPoolManager>, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let disk_manager = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    let bpm = Arc::new(BufferPoolManager::new(pool_size, 2, disk_manager));
    (bpm, temp_file)
}

fn rid(n: u32) -> RecordId {
    RecordId::new(PageId::new(n), SlotId::new(0))
}

fn collect_keys(tree: &BPlusTree) -> Vec<u32> {
    tree.begin()
        .unwrap()
        .map(|entry| entry.unwrap().0)
        .collect()
}

#[test]
fn test_empty_tree() {
    let (bpm, _temp) = create_bpm(10);
    let tree = BPlusTree::new("empty", bpm, 3, 3);

    assert!(tree.is_empty());
    assert_eq!(tree.get(1).unwrap(), None);
    assert!(tree.begin().unwrap().is_end());
}

#[test]
fn test_insert_and_get() {
    let (bpm, _temp) = create_bpm(10);
    let mut tree = BPlusTree::new("basic", bpm, 3, 3);

    assert!(tree.insert(10, rid(10)).unwrap());
    assert!(tree.insert(20, rid(20)).unwrap());
    assert!(tree.insert(30, rid(30)).unwrap());
    assert!(!tree.is_empty());

    assert_eq!(tree.get(10).unwrap(), Some(rid(10)));
    assert_eq!(tree.get(20).unwrap(), Some(rid(20)));
    assert_eq!(tree.get(30).unwrap(), Some(rid(30)));
    assert_eq!(tree.get(40).unwrap(), None);
}

#[test]
fn test_duplicate_insert_leaves_tree_unchanged() {
    let (bpm, _temp) = create_bpm(10);
    let mut tree = BPlusTree::new("dup", bpm, 3, 3);

    assert!(tree.insert(10, rid(1)).unwrap());
    assert!(!tree.insert(10, rid(2)).unwrap());

    assert_eq!(tree.get(10).unwrap(), Some(rid(1)));
    assert_eq!(collect_keys(&tree), vec![10]);
}

#[test]
fn test_leaf_split_grows_root() {
    // leaf_max_size = 3: the fourth insert splits the root leaf into
    // {1, 2} / {3, 4} under a fresh internal root keyed at 3.
    let (bpm, _temp) = create_bpm(10);
    let mut tree = BPlusTree::new("split", bpm, 3, 3);

    for key in 1..=3u32 {
        tree.insert(key, rid(key)).unwrap();
    }
    let old_root = tree.root_page_id();
    tree.insert(4, rid(4)).unwrap();

    assert_ne!(tree.root_page_id(), old_root);
    assert_eq!(collect_keys(&tree), vec![1, 2, 3, 4]);
    for key in 1..=4u32 {
        assert_eq!(tree.get(key).unwrap(), Some(rid(key)));
    }
}

#[test]
fn test_remove_redistributes_from_right_sibling() {
    // From {1,2} | {3,4}: removing 1 underflows the left leaf; the right
    // sibling lends its 3 and the separator becomes 4.
    let (bpm, _temp) = create_bpm(10);
    let mut tree = BPlusTree::new("redis", bpm, 3, 3);

    for key in 1..=4u32 {
        tree.insert(key, rid(key)).unwrap();
    }
    tree.remove(1).unwrap();

    assert_eq!(tree.get(1).unwrap(), None);
    assert_eq!(collect_keys(&tree), vec![2, 3, 4]);

    // The scan from 4 starts in the right leaf, now {4}.
    let from_right: Vec<u32> = tree
        .begin_at(4)
        .unwrap()
        .map(|entry| entry.unwrap().0)
        .collect();
    assert_eq!(from_right, vec![4]);
}

#[test]
fn test_remove_merges_and_collapses_root() {
    // Continuing: removing 2 leaves {3} | {4}; neither can spare, so they
    // merge and the single-child root collapses to the surviving leaf.
    let (bpm, _temp) = create_bpm(10);
    let mut tree = BPlusTree::new("merge", bpm, 3, 3);

    for key in 1..=4u32 {
        tree.insert(key, rid(key)).unwrap();
    }
    tree.remove(1).unwrap();
    tree.remove(2).unwrap();

    assert_eq!(collect_keys(&tree), vec![3, 4]);

    // The root is a leaf again: inserting up to its max does not split.
    let root = tree.root_page_id();
    tree.insert(5, rid(5)).unwrap();
    assert_eq!(tree.root_page_id(), root);
    assert_eq!(collect_keys(&tree), vec![3, 4, 5]);
}

#[test]
fn test_iterator_yields_sorted_keys() {
    let (bpm, _temp) = create_bpm(50);
    let mut tree = BPlusTree::new("sorted", bpm, 3, 3);

    for key in [17u32, 3, 25, 1, 9, 21, 13, 5, 29, 7] {
        tree.insert(key, rid(key)).unwrap();
    }

    let keys = collect_keys(&tree);
    assert_eq!(keys, vec![1, 3, 5, 7, 9, 13, 17, 21, 25, 29]);
    assert!(keys.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_begin_at_positions_at_lower_bound() {
    let (bpm, _temp) = create_bpm(50);
    let mut tree = BPlusTree::new("seek", bpm, 3, 3);

    for key in (10..=100u32).step_by(10) {
        tree.insert(key, rid(key)).unwrap();
    }

    let from_35: Vec<u32> = tree
        .begin_at(35)
        .unwrap()
        .map(|entry| entry.unwrap().0)
        .collect();
    assert_eq!(from_35, vec![40, 50, 60, 70, 80, 90, 100]);

    let from_40: Vec<u32> = tree
        .begin_at(40)
        .unwrap()
        .map(|entry| entry.unwrap().0)
        .collect();
    assert_eq!(from_40, vec![40, 50, 60, 70, 80, 90, 100]);

    assert!(tree.begin_at(500).unwrap().next().is_none());
}

#[test]
fn test_iterator_releases_pins() {
    let (bpm, _temp) = create_bpm(20);
    let mut tree = BPlusTree::new("pins", Arc::clone(&bpm), 3, 3);

    for key in 1..=20u32 {
        tree.insert(key, rid(key)).unwrap();
    }

    {
        let mut iter = tree.begin().unwrap();
        // Stop mid-leaf: dropping the iterator must release its pin.
        iter.next();
        iter.next();
    }

    let mut iter = tree.begin().unwrap();
    while iter.next().is_some() {}

    // Everything unpinned: the whole tree can be paged out.
    for key in 1..=20u32 {
        let Some(rid_found) = tree.get(key).unwrap() else {
            panic!("key {} lost", key);
        };
        assert_eq!(rid_found, rid(key));
        assert_eq!(bpm.get_pin_count(tree.root_page_id()), Some(0));
    }
}

#[test]
fn test_insert_many_ascending() {
    let (bpm, _temp) = create_bpm(50);
    let mut tree = BPlusTree::new("many", bpm, 4, 4);

    for key in 0..500u32 {
        assert!(tree.insert(key, rid(key)).unwrap());
    }
    for key in 0..500u32 {
        assert_eq!(tree.get(key).unwrap(), Some(rid(key)), "lost key {}", key);
    }
    assert_eq!(collect_keys(&tree), (0..500).collect::<Vec<u32>>());
}

#[test]
fn test_insert_many_descending() {
    let (bpm, _temp) = create_bpm(50);
    let mut tree = BPlusTree::new("desc", bpm, 4, 4);

    for key in (0..300u32).rev() {
        tree.insert(key, rid(key)).unwrap();
    }
    assert_eq!(collect_keys(&tree), (0..300).collect::<Vec<u32>>());
}

#[test]
fn test_insert_shuffled_then_remove_half() {
    use rand::seq::SliceRandom;
    use rand::thread_rng;

    let (bpm, _temp) = create_bpm(100);
    let mut tree = BPlusTree::new("shuffled", bpm, 3, 3);

    let mut keys: Vec<u32> = (0..400).collect();
    keys.shuffle(&mut thread_rng());
    for &key in &keys {
        tree.insert(key, rid(key)).unwrap();
    }

    let mut to_remove = keys.clone();
    to_remove.truncate(200);
    to_remove.shuffle(&mut thread_rng());
    for &key in &to_remove {
        tree.remove(key).unwrap();
    }

    for &key in &keys {
        let expected = if to_remove.contains(&key) {
            None
        } else {
            Some(rid(key))
        };
        assert_eq!(tree.get(key).unwrap(), expected, "wrong result for {}", key);
    }

    let survivors = collect_keys(&tree);
    assert!(survivors.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(survivors.len(), 200);
}

#[test]
fn test_remove_all_keys() {
    let (bpm, _temp) = create_bpm(50);
    let mut tree = BPlusTree::new("drain", bpm, 3, 3);

    for key in 0..100u32 {
        tree.insert(key, rid(key)).unwrap();
    }
    for key in 0..100u32 {
        tree.remove(key).unwrap();
    }

    assert_eq!(collect_keys(&tree), Vec::<u32>::new());
    for key in 0..100u32 {
        assert_eq!(tree.get(key).unwrap(), None);
    }

    // The drained tree keeps working.
    for key in 0..50u32 {
        assert!(tree.insert(key, rid(key)).unwrap());
    }
    assert_eq!(collect_keys(&tree), (0..50).collect::<Vec<u32>>());
}

#[test]
fn test_remove_absent_key_is_noop() {
    let (bpm, _temp) = create_bpm(10);
    let mut tree = BPlusTree::new("noop", bpm, 3, 3);

    tree.remove(1).unwrap();

    tree.insert(1, rid(1)).unwrap();
    tree.insert(2, rid(2)).unwrap();
    tree.remove(99).unwrap();
    assert_eq!(collect_keys(&tree), vec![1, 2]);
}

#[test]
fn test_deep_tree_removal_cascades() {
    // Small fanout forces several internal levels; removing in ascending
    // order exercises internal merges and root collapses on the way down.
    let (bpm, _temp) = create_bpm(100);
    let mut tree = BPlusTree::new("deep", bpm, 3, 3);

    for key in 0..200u32 {
        tree.insert(key, rid(key)).unwrap();
    }
    for key in 0..150u32 {
        tree.remove(key).unwrap();
    }

    assert_eq!(collect_keys(&tree), (150..200).collect::<Vec<u32>>());
    for key in 150..200u32 {
        assert_eq!(tree.get(key).unwrap(), Some(rid(key)));
    }
}

#[test]
fn test_persistence_through_header_page() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    {
        let disk_manager = Arc::new(DiskManager::new(&path).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(20, 2, disk_manager));
        let mut tree = BPlusTree::new("orders_pk", Arc::clone(&bpm), 4, 4);

        for key in 0..100u32 {
            tree.insert(key, rid(key)).unwrap();
        }
        bpm.flush_all().unwrap();
    }

    let disk_manager = Arc::new(DiskManager::new(&path).unwrap());
    let bpm = Arc::new(BufferPoolManager::new(20, 2, disk_manager));
    let tree = BPlusTree::open("orders_pk", bpm, 4, 4).unwrap();

    assert!(!tree.is_empty());
    for key in 0..100u32 {
        assert_eq!(
            tree.get(key).unwrap(),
            Some(rid(key)),
            "key {} lost after reopen",
            key
        );
    }
    assert_eq!(collect_keys(&tree), (0..100).collect::<Vec<u32>>());
}

#[test]
fn test_open_unknown_index_is_empty() {
    let (bpm, _temp) = create_bpm(10);
    let tree = BPlusTree::open("nothing_here", bpm, 4, 4).unwrap();
    assert!(tree.is_empty());
}

#[test]
fn test_two_indexes_share_header_page() {
    let (bpm, _temp) = create_bpm(30);

    let mut first = BPlusTree::new("first", Arc::clone(&bpm), 4, 4);
    let mut second = BPlusTree::new("second", Arc::clone(&bpm), 4, 4);

    for key in 0..50u32 {
        first.insert(key, rid(key)).unwrap();
        second.insert(key, rid(key + 1000)).unwrap();
    }

    let first_reopened = BPlusTree::open("first", Arc::clone(&bpm), 4, 4).unwrap();
    let second_reopened = BPlusTree::open("second", Arc::clone(&bpm), 4, 4).unwrap();
    assert_eq!(first_reopened.root_page_id(), first.root_page_id());
    assert_eq!(second_reopened.root_page_id(), second.root_page_id());

    assert_eq!(first.get(25).unwrap(), Some(rid(25)));
    assert_eq!(second.get(25).unwrap(), Some(rid(1025)));
}
