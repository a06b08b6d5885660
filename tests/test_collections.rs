use std::collections::BTreeSet;
use std::fs;

use keytree::{codec, Db, Error};
use tempfile::TempDir;

fn setup_test_db() -> (TempDir, Db) {
    let temp_dir = TempDir::new().unwrap();
    let db = Db::new(temp_dir.path());
    (temp_dir, db)
}

#[test]
fn test_find_max_empty_collections() {
    let (_dir, db) = setup_test_db();

    assert_eq!(db.find_max("articles").unwrap(), None);
    assert_eq!(db.next_index("articles").unwrap(), 0);

    db.put("articles/index.html", b"not numeric").unwrap();
    assert_eq!(db.find_max("articles").unwrap(), None);
}

#[test]
fn test_find_max_is_monotonic_across_shard_boundaries() {
    let (_dir, db) = setup_test_db();

    for n in 0..=120u64 {
        db.put(&codec::index_key("replies", n), b"r").unwrap();
        assert_eq!(db.find_max("replies").unwrap(), Some(n));
    }
    assert_eq!(db.next_index("replies").unwrap(), 121);
}

#[test]
fn test_find_max_large_indices() {
    let (_dir, db) = setup_test_db();

    db.put("big/_99", b"x").unwrap();
    db.put("big/_9999", b"x").unwrap();
    assert_eq!(db.find_max("big").unwrap(), Some(9999));

    db.put("big/_10000", b"x").unwrap();
    assert_eq!(db.find_max("big").unwrap(), Some(10000));

    db.put("big/_4294967296/body", b"x").unwrap();
    assert_eq!(db.find_max("big").unwrap(), Some(4_294_967_296));
}

#[test]
fn test_find_max_after_delete_keeps_holes() {
    let (_dir, db) = setup_test_db();

    for n in [0u64, 1, 2, 5, 150] {
        db.put(&format!("diary/_{}/entry.xml", n), b"e").unwrap();
    }
    assert_eq!(db.find_max("diary").unwrap(), Some(150));

    // Removing the top entry exposes the highest remaining one
    db.delete("diary/_150/entry.xml").unwrap();
    assert_eq!(db.find_max("diary").unwrap(), Some(5));

    // Holes below the top are not renumbered
    db.delete("diary/_2/entry.xml").unwrap();
    assert_eq!(db.find_max("diary").unwrap(), Some(5));
    assert_eq!(db.next_index("diary").unwrap(), 6);
    assert!(db.get("diary/_2/entry.xml").unwrap_err().is_not_found());
}

#[test]
fn test_find_max_reports_broken_shards() {
    let (dir, db) = setup_test_db();

    fs::create_dir_all(dir.path().join("broken/_a/07")).unwrap();
    assert!(matches!(db.find_max("broken"), Err(Error::BrokenShard(_))));
}

#[test]
fn test_cursor_lists_children() {
    let (_dir, db) = setup_test_db();

    db.put("acct/alice/profile.xml", b"a").unwrap();
    db.put("acct/bob/profile.xml", b"b").unwrap();
    db.put("acct/carol", b"c").unwrap();
    let _lock = db.lock_key("acct/.lock", keytree::LockMode::Shared).unwrap();

    let cursor = db.open_dir("acct").unwrap();
    assert_eq!(cursor.key(), "acct");
    let names: BTreeSet<String> = cursor.map(|n| n.unwrap()).collect();
    let expected: BTreeSet<String> = ["alice", "bob", "carol"].iter().map(|s| s.to_string()).collect();
    assert_eq!(names, expected);
}

#[test]
fn test_cursor_child_keys() {
    let (_dir, db) = setup_test_db();

    db.put("acct/alice/profile.xml", b"a").unwrap();
    let mut cursor = db.open_dir("acct/").unwrap();
    let name = cursor.next().unwrap().unwrap();
    let full = cursor.child_key(&name);
    assert_eq!(full, "acct/alice");
    assert!(cursor.next().is_none());
    cursor.close();

    assert_eq!(db.get(&format!("{}/profile.xml", full)).unwrap(), b"a");

    let root = db.open_dir("").unwrap();
    assert_eq!(root.child_key("acct"), "acct");
    assert_eq!(root.path(), db.base());
}

#[test]
fn test_cursor_shows_on_disk_names_for_numeric_children() {
    let (_dir, db) = setup_test_db();

    db.put("list/_3", b"x").unwrap();
    db.put("list/_300", b"x").unwrap();

    let names: BTreeSet<String> = db.open_dir("list").unwrap().map(|n| n.unwrap()).collect();
    let expected: BTreeSet<String> = ["_03", "_a"].iter().map(|s| s.to_string()).collect();
    assert_eq!(names, expected);
}

#[test]
fn test_open_dir_errors() {
    let (_dir, db) = setup_test_db();

    assert!(db.open_dir("missing").unwrap_err().is_not_found());

    db.put("leaf", b"x").unwrap();
    assert!(db.open_dir("leaf").unwrap_err().is_not_found());
}

#[test]
fn test_multiple_cursors_open_at_once() {
    let (_dir, db) = setup_test_db();

    db.put("x/_1", b"1").unwrap();
    db.put("y/_2", b"2").unwrap();

    let a = db.open_dir("x").unwrap();
    let b = db.open_dir("y").unwrap();
    let a_names: Vec<String> = a.map(|n| n.unwrap()).collect();
    let b_names: Vec<String> = b.map(|n| n.unwrap()).collect();
    assert_eq!(a_names, vec!["_01".to_string()]);
    assert_eq!(b_names, vec!["_02".to_string()]);
}
