//! Integration tests for the index layer

use std::path::Path;
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use crate::btree::{AttrType, KeyValue};
use crate::file::{BufferManager, PagedFileManager};
use crate::index::{IndexError, IndexManager};
use crate::record::{RecordId, RecordManager};

fn shared_buffer() -> Arc<Mutex<BufferManager>> {
    Arc::new(Mutex::new(BufferManager::new(PagedFileManager::new())))
}

#[test]
fn test_index_manager_basic() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().to_str().unwrap();
    let mut manager = IndexManager::new(shared_buffer());

    manager
        .create_index(db_path, "students", &["id"], vec![AttrType::Int])
        .unwrap();
    assert!(manager.is_open("students", &["id"]));

    for i in 0..5 {
        assert!(manager
            .insert("students", &["id"], &[KeyValue::Int(i)], RecordId::new(1, i as usize), true)
            .unwrap());
    }

    assert_eq!(
        manager.search_all("students", &["id"], &[KeyValue::Int(3)]).unwrap(),
        vec![RecordId::new(1, 3)]
    );
    assert!(manager
        .search_all("students", &["id"], &[KeyValue::Int(9)])
        .unwrap()
        .is_empty());

    manager.drop_index(db_path, "students", &["id"]).unwrap();
    assert!(!Path::new(&format!("{}/students_id.idx", db_path)).exists());
    assert!(matches!(
        manager.search_all("students", &["id"], &[KeyValue::Int(3)]),
        Err(IndexError::IndexNotOpen(_))
    ));
}

#[test]
fn test_persistence() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().to_str().unwrap();

    // First session: create and insert enough to split
    {
        let mut manager = IndexManager::new(shared_buffer());
        manager
            .create_index(db_path, "events", &["ts"], vec![AttrType::Int])
            .unwrap();
        for i in 0..2000 {
            manager
                .insert("events", &["ts"], &[KeyValue::Int(i)], RecordId::new(i as usize / 100 + 1, i as usize % 100), false)
                .unwrap();
        }
        manager.close_all().unwrap();
    }

    // Second session: reopen and read back
    let mut manager = IndexManager::new(shared_buffer());
    manager.open_index(db_path, "events", &["ts"]).unwrap();

    assert_eq!(
        manager.search_all("events", &["ts"], &[KeyValue::Int(1234)]).unwrap(),
        vec![RecordId::new(13, 34)]
    );
    let hits = manager
        .range_search("events", &["ts"], &[KeyValue::Int(10)], &[KeyValue::Int(14)])
        .unwrap();
    let keys: Vec<_> = hits.into_iter().map(|(values, _)| values).collect();
    assert_eq!(
        keys,
        (10..=14).map(|v| vec![KeyValue::Int(v)]).collect::<Vec<_>>()
    );
}

#[test]
fn test_unique_constraint_and_probe() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().to_str().unwrap();
    let mut manager = IndexManager::new(shared_buffer());
    let cols = ["email"];

    manager
        .create_index(db_path, "users", &cols, vec![AttrType::Char(32)])
        .unwrap();
    let alice = [KeyValue::Str("alice@example.com".into())];

    assert!(manager.check_unique("users", &cols, &alice).unwrap());
    assert!(manager.insert("users", &cols, &alice, RecordId::new(1, 0), true).unwrap());
    assert!(!manager.check_unique("users", &cols, &alice).unwrap());
    assert!(!manager.insert("users", &cols, &alice, RecordId::new(1, 1), true).unwrap());

    // Removing the entry frees the key again
    assert!(manager.delete("users", &cols, &alice, RecordId::new(1, 0)).unwrap());
    assert!(manager.check_unique("users", &cols, &alice).unwrap());
}

#[test]
fn test_composite_key_scan_order() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().to_str().unwrap();
    let mut manager = IndexManager::new(shared_buffer());
    let cols = ["a", "b"];

    manager
        .create_index(db_path, "pairs", &cols, vec![AttrType::Int, AttrType::Int])
        .unwrap();
    assert!(Path::new(&format!("{}/pairs_a_b.idx", db_path)).exists());

    manager
        .insert("pairs", &cols, &[KeyValue::Int(1), KeyValue::Int(5)], RecordId::new(1, 0), false)
        .unwrap();
    manager
        .insert("pairs", &cols, &[KeyValue::Int(1), KeyValue::Int(3)], RecordId::new(1, 1), false)
        .unwrap();
    manager
        .insert("pairs", &cols, &[KeyValue::Int(2), KeyValue::Int(0)], RecordId::new(1, 2), false)
        .unwrap();

    assert!(manager
        .scan_from("pairs", &cols, &[KeyValue::Int(1), KeyValue::Int(i32::MIN)], true)
        .unwrap());
    assert_eq!(manager.next("pairs", &cols).unwrap(), Some(RecordId::new(1, 1)));
    assert_eq!(manager.next("pairs", &cols).unwrap(), Some(RecordId::new(1, 0)));
    assert_eq!(manager.next("pairs", &cols).unwrap(), Some(RecordId::new(1, 2)));
    assert_eq!(manager.next("pairs", &cols).unwrap(), None);

    assert!(manager
        .scan_from("pairs", &cols, &[KeyValue::Int(2), KeyValue::Int(0)], true)
        .unwrap());
    assert_eq!(manager.prev("pairs", &cols).unwrap(), Some(RecordId::new(1, 2)));
    assert_eq!(manager.prev("pairs", &cols).unwrap(), Some(RecordId::new(1, 0)));
}

#[test]
fn test_rejects_mismatched_values() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().to_str().unwrap();
    let mut manager = IndexManager::new(shared_buffer());

    manager
        .create_index(db_path, "t", &["x"], vec![AttrType::Float])
        .unwrap();
    assert!(matches!(
        manager.insert("t", &["x"], &[KeyValue::Int(1)], RecordId::new(1, 0), false),
        Err(IndexError::BPlusTreeError(_))
    ));
    assert!(matches!(
        manager.create_index(db_path, "t", &["x"], vec![AttrType::Float]),
        Err(IndexError::IndexAlreadyExists(_))
    ));
}

/// Heap and index kept in step by the caller, sharing one buffer pool
#[test]
fn test_heap_with_secondary_index() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().to_str().unwrap();
    let heap_path = format!("{}/people.heap", db_path);
    let buffer = shared_buffer();
    let mut records = RecordManager::new(Arc::clone(&buffer));
    let mut indexes = IndexManager::new(buffer);

    // Payload: 4-byte age followed by 12 bytes of name
    let row = |age: i32, name: &str| {
        let mut payload = age.to_le_bytes().to_vec();
        let mut padded = name.as_bytes().to_vec();
        padded.resize(12, 0);
        payload.extend(padded);
        payload
    };

    records.create_file(&heap_path, 16).unwrap();
    indexes
        .create_index(db_path, "people", &["age"], vec![AttrType::Int])
        .unwrap();

    let people = [(30, "ann"), (25, "ben"), (30, "cat"), (41, "dan")];
    let mut rids = Vec::new();
    for (age, name) in people {
        let rid = records.insert(&heap_path, &row(age, name)).unwrap();
        indexes
            .insert("people", &["age"], &[KeyValue::Int(age)], rid, false)
            .unwrap();
        rids.push(rid);
    }

    let thirty = indexes
        .search_all("people", &["age"], &[KeyValue::Int(30)])
        .unwrap();
    assert_eq!(thirty, vec![rids[0], rids[2]]);
    assert_eq!(records.get(&heap_path, thirty[1]).unwrap(), row(30, "cat"));

    // Delete ann from both structures
    records.delete(&heap_path, rids[0]).unwrap();
    assert!(indexes
        .delete("people", &["age"], &[KeyValue::Int(30)], rids[0])
        .unwrap());
    assert_eq!(
        indexes
            .search_all("people", &["age"], &[KeyValue::Int(30)])
            .unwrap(),
        vec![rids[2]]
    );

    // The freed slot is handed out again and indexed under the new key
    let rid = records.insert(&heap_path, &row(19, "eve")).unwrap();
    assert_eq!(rid, rids[0]);
    indexes
        .insert("people", &["age"], &[KeyValue::Int(19)], rid, false)
        .unwrap();
    let young = indexes
        .range_search("people", &["age"], &[KeyValue::Int(0)], &[KeyValue::Int(29)])
        .unwrap();
    assert_eq!(young.len(), 2);
    assert_eq!(young[0], (vec![KeyValue::Int(19)], rid));

    records.close_all().unwrap();
    indexes.close_all().unwrap();
}
