//! Integration tests for persistence and lifecycle: save/reopen
//! recovery, snapshot corruption handling, and close semantics.

use annex::{Annex, Config};
use tempfile::tempdir;

const DIM: usize = 4;

fn make_vector(seed: u64) -> Vec<f32> {
    (0..DIM)
        .map(|i| (seed as f32 * 0.1 + i as f32 * 0.01).sin())
        .collect()
}

fn disk_config(dir: &std::path::Path) -> Config {
    Config::on_disk(dir, DIM)
}

// ============================================================================
// Persistence round-trip (spec scenario 5, property P6)
// ============================================================================

#[test]
fn test_save_and_reopen_recovers_records() {
    let dir = tempdir().unwrap();

    let agent = Annex::open(disk_config(dir.path())).unwrap();
    agent.insert("a", make_vector(1)).unwrap();
    agent.insert("b", make_vector(2)).unwrap();
    agent.insert("c", make_vector(3)).unwrap();
    agent.create_and_save_index(8).unwrap();

    let pre_kill = agent.search(&make_vector(1), 3, None, None).unwrap();
    drop(agent); // no close: simulate a kill after the save

    let reopened = Annex::open(disk_config(dir.path())).unwrap();
    assert_eq!(reopened.len(), 3);

    let mut uuids = reopened.uuids();
    uuids.sort();
    assert_eq!(uuids, vec!["a", "b", "c"]);

    assert_eq!(reopened.get_object("a").unwrap(), make_vector(1));
    assert_eq!(reopened.get_object("b").unwrap(), make_vector(2));
    assert_eq!(reopened.get_object("c").unwrap(), make_vector(3));

    // Same query, same results as the pre-kill instance.
    let post = reopened.search(&make_vector(1), 3, None, None).unwrap();
    assert_eq!(
        pre_kill.iter().map(|h| &h.uuid).collect::<Vec<_>>(),
        post.iter().map(|h| &h.uuid).collect::<Vec<_>>()
    );
}

#[test]
fn test_unsaved_mutations_do_not_survive_a_kill() {
    let dir = tempdir().unwrap();

    let agent = Annex::open(disk_config(dir.path())).unwrap();
    agent.insert("saved", make_vector(1)).unwrap();
    agent.create_and_save_index(0).unwrap();

    agent.insert("unsaved", make_vector(2)).unwrap();
    agent.create_index(0).unwrap(); // drained but never saved
    drop(agent);

    let reopened = Annex::open(disk_config(dir.path())).unwrap();
    assert!(reopened.exists("saved"));
    assert!(!reopened.exists("unsaved"));
    assert_eq!(reopened.len(), 1);
}

#[test]
fn test_close_drains_and_saves() {
    let dir = tempdir().unwrap();

    let agent = Annex::open(disk_config(dir.path())).unwrap();
    agent.insert("a", make_vector(1)).unwrap();
    agent.insert("b", make_vector(2)).unwrap();
    // Never drained explicitly: close must flush and persist.
    agent.close().unwrap();

    let reopened = Annex::open(disk_config(dir.path())).unwrap();
    assert_eq!(reopened.len(), 2);
    assert_eq!(reopened.get_object("a").unwrap(), make_vector(1));
    let hits = reopened.search(&make_vector(2), 1, None, None).unwrap();
    assert_eq!(hits[0].uuid, "b");
}

#[test]
fn test_deletes_survive_save_and_reopen() {
    let dir = tempdir().unwrap();

    let agent = Annex::open(disk_config(dir.path())).unwrap();
    agent.insert("keep", make_vector(1)).unwrap();
    agent.insert("drop", make_vector(2)).unwrap();
    agent.create_index(0).unwrap();
    agent.delete("drop").unwrap();
    agent.close().unwrap();

    let reopened = Annex::open(disk_config(dir.path())).unwrap();
    assert!(reopened.exists("keep"));
    assert!(!reopened.exists("drop"));
    assert_eq!(reopened.len(), 1);
}

#[test]
fn test_reopen_and_continue_inserting() {
    let dir = tempdir().unwrap();

    let agent = Annex::open(disk_config(dir.path())).unwrap();
    for seed in 0..5u64 {
        agent.insert(&format!("u{}", seed), make_vector(seed)).unwrap();
    }
    agent.close().unwrap();

    let agent = Annex::open(disk_config(dir.path())).unwrap();
    for seed in 5..10u64 {
        agent.insert(&format!("u{}", seed), make_vector(seed)).unwrap();
    }
    agent.create_index(0).unwrap();
    assert_eq!(agent.len(), 10);

    // Every record is individually retrievable with its own vector.
    for seed in 0..10u64 {
        assert_eq!(
            agent.get_object(&format!("u{}", seed)).unwrap(),
            make_vector(seed)
        );
    }
    agent.close().unwrap();
}

// ============================================================================
// Snapshot corruption and crash artifacts
// ============================================================================

#[test]
fn test_corrupt_snapshot_surfaces_corrupt_error() {
    let dir = tempdir().unwrap();

    let agent = Annex::open(disk_config(dir.path())).unwrap();
    agent.insert("a", make_vector(1)).unwrap();
    agent.close().unwrap();

    // Flip a byte in the snapshot payload.
    let snap = dir.path().join("kvs.snap");
    let mut bytes = std::fs::read(&snap).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0xff;
    std::fs::write(&snap, bytes).unwrap();

    let err = Annex::open(disk_config(dir.path())).unwrap_err();
    assert!(err.is_corrupt());
}

#[test]
fn test_stale_tmp_snapshot_is_ignored() {
    let dir = tempdir().unwrap();

    let agent = Annex::open(disk_config(dir.path())).unwrap();
    agent.insert("a", make_vector(1)).unwrap();
    agent.close().unwrap();

    // A crash between tmp write and rename leaves this behind.
    std::fs::write(dir.path().join("kvs.snap.tmp"), b"half-written junk").unwrap();

    let reopened = Annex::open(disk_config(dir.path())).unwrap();
    assert_eq!(reopened.len(), 1);
    assert!(reopened.exists("a"));
}

#[test]
fn test_missing_snapshot_with_fresh_directory() {
    let dir = tempdir().unwrap();
    let agent = Annex::open(disk_config(dir.path())).unwrap();
    assert_eq!(agent.len(), 0);
    agent.close().unwrap();
}

#[test]
fn test_reopen_with_mismatched_dimension_fails() {
    let dir = tempdir().unwrap();
    let agent = Annex::open(disk_config(dir.path())).unwrap();
    agent.close().unwrap();

    let err = Annex::open(Config::on_disk(dir.path(), DIM + 1)).unwrap_err();
    assert!(err.is_invalid_argument());
}

// ============================================================================
// In-memory mode
// ============================================================================

#[test]
fn test_in_memory_mode_writes_no_files() {
    let dir = tempdir().unwrap();
    let config = Config {
        path: Some(dir.path().to_path_buf()),
        ..Config::in_memory(DIM)
    };

    let agent = Annex::open(config).unwrap();
    agent.insert("a", make_vector(1)).unwrap();
    agent.create_index(0).unwrap();
    agent.save_index().unwrap(); // no-op in memory mode
    agent.close().unwrap();

    let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert!(leftovers.is_empty(), "in-memory agent created files");
}

#[test]
fn test_in_memory_full_cycle() {
    let agent = Annex::open(Config::in_memory(DIM)).unwrap();
    for seed in 0..10u64 {
        agent.insert(&format!("u{}", seed), make_vector(seed)).unwrap();
    }
    agent.create_index(4).unwrap();

    let hits = agent.search(&make_vector(3), 3, None, None).unwrap();
    assert_eq!(hits[0].uuid, "u3");
    agent.close().unwrap();
}
