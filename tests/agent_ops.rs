//! Integration tests for agent operations: the insert/update/delete
//! contract, timestamp semantics, read rules, and input boundaries.

use annex::{AnnexError, Annex, Config};

/// Helper: in-memory agent with the given dimension.
fn agent(dimension: usize) -> Annex {
    Annex::open(Config::in_memory(dimension)).unwrap()
}

/// Generates a deterministic vector from a seed.
///
/// Vectors with close seeds produce similar components (correlated via
/// sin), enabling predictable nearest-neighbor ordering in tests.
fn make_vector(seed: u64, dim: usize) -> Vec<f32> {
    (0..dim)
        .map(|i| (seed as f32 * 0.1 + i as f32 * 0.01).sin())
        .collect()
}

// ============================================================================
// Insert / search (spec scenario 1)
// ============================================================================

#[test]
fn test_insert_then_search_returns_nearest_first() {
    let agent = agent(4);

    agent
        .insert_with_time("a", vec![1.0, 0.0, 0.0, 0.0], 1)
        .unwrap();
    agent
        .insert_with_time("b", vec![0.0, 1.0, 0.0, 0.0], 2)
        .unwrap();
    agent
        .insert_with_time("c", vec![0.0, 0.0, 1.0, 0.0], 3)
        .unwrap();

    agent.create_index(8).unwrap();

    let hits = agent
        .search(&[1.0, 0.0, 0.0, 0.0], 2, Some(0.1), Some(-1.0))
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].uuid, "a");
}

#[test]
fn test_queued_inserts_not_searchable_before_drain() {
    let agent = agent(2);
    agent.insert("a", vec![1.0, 0.0]).unwrap();

    // Visible to point reads, not to searches.
    assert!(agent.exists("a"));
    assert_eq!(agent.get_object("a").unwrap(), vec![1.0, 0.0]);
    let hits = agent.search(&[1.0, 0.0], 10, None, None).unwrap();
    assert!(hits.is_empty());

    agent.create_index(0).unwrap();
    let hits = agent.search(&[1.0, 0.0], 10, None, None).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].uuid, "a");
}

#[test]
fn test_search_by_id_uses_queued_vector() {
    let agent = agent(2);
    agent.insert("a", vec![1.0, 0.0]).unwrap();
    agent.insert("b", vec![0.0, 1.0]).unwrap();
    agent.create_index(0).unwrap();

    // Update "a" but do not drain: search-by-id must use the queued
    // vector as the query.
    agent.update("a", vec![0.0, 0.9]).unwrap();
    let (vector, hits) = agent.search_by_id("a", 1, None, None).unwrap();
    assert_eq!(vector, vec![0.0, 0.9]);
    assert_eq!(hits[0].uuid, "b");
}

#[test]
fn test_search_by_id_unknown_uuid() {
    let agent = agent(2);
    let err = agent.search_by_id("ghost", 5, None, None).unwrap_err();
    assert!(err.is_not_found());
}

// ============================================================================
// Update semantics (spec scenario 2)
// ============================================================================

#[test]
fn test_newer_update_wins_over_older_timestamp() {
    let agent = agent(2);

    agent.insert_with_time("x", vec![1.0, 0.0], 10).unwrap();
    agent.update_with_time("x", vec![0.0, 1.0], 20).unwrap();
    // Older timestamp: dropped by the queue, not an error.
    agent.update_with_time("x", vec![2.0, 2.0], 15).unwrap();

    agent.create_index(0).unwrap();
    assert_eq!(agent.get_object("x").unwrap(), vec![0.0, 1.0]);
}

#[test]
fn test_update_unknown_uuid_is_not_found() {
    let agent = agent(2);
    let err = agent.update("ghost", vec![1.0, 0.0]).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_update_same_vector_rejected() {
    let agent = agent(2);
    agent.insert("a", vec![1.0, 0.0]).unwrap();
    agent.create_index(0).unwrap();

    let err = agent.update("a", vec![1.0, 0.0]).unwrap_err();
    assert!(matches!(err, AnnexError::SameVector { .. }));

    // Same rule against a queued (uncommitted) vector.
    agent.insert("b", vec![0.5, 0.5]).unwrap();
    let err = agent.update("b", vec![0.5, 0.5]).unwrap_err();
    assert!(matches!(err, AnnexError::SameVector { .. }));
}

#[test]
fn test_update_after_drain_changes_committed_vector() {
    let agent = agent(2);
    agent.insert("a", vec![1.0, 0.0]).unwrap();
    agent.create_index(0).unwrap();

    agent.update("a", vec![0.0, 1.0]).unwrap();
    agent.create_index(0).unwrap();

    assert_eq!(agent.get_object("a").unwrap(), vec![0.0, 1.0]);
    assert_eq!(agent.len(), 1);
}

#[test]
fn test_upsert_never_rejects_on_presence() {
    let agent = agent(2);

    // Unknown: behaves as insert.
    agent.upsert("a", vec![1.0, 0.0]).unwrap();
    // Known (queued): behaves as update.
    agent.upsert("a", vec![0.0, 1.0]).unwrap();

    agent.create_index(0).unwrap();
    assert_eq!(agent.get_object("a").unwrap(), vec![0.0, 1.0]);

    // Known (committed): still fine.
    agent.upsert("a", vec![0.5, 0.5]).unwrap();
    agent.create_index(0).unwrap();
    assert_eq!(agent.get_object("a").unwrap(), vec![0.5, 0.5]);
}

// ============================================================================
// Delete semantics (spec scenario 3 + open-question pin)
// ============================================================================

#[test]
fn test_delete_masks_pending_insert() {
    let agent = agent(2);
    let before = agent.len();

    agent.insert_with_time("y", vec![1.0, 1.0], 100).unwrap();
    agent.delete_with_time("y", 101).unwrap();

    assert!(!agent.exists("y"));
    assert!(agent.get_object("y").unwrap_err().is_not_found());

    agent.create_index(0).unwrap();
    assert_eq!(agent.len(), before);
}

#[test]
fn test_delete_committed_record() {
    let agent = agent(2);
    agent.insert("a", vec![1.0, 0.0]).unwrap();
    agent.create_index(0).unwrap();
    assert_eq!(agent.len(), 1);

    agent.delete("a").unwrap();
    // Masked immediately, removed at the next drain.
    assert!(!agent.exists("a"));
    let hits = agent.search(&[1.0, 0.0], 10, None, None).unwrap();
    assert!(hits.is_empty());

    agent.create_index(0).unwrap();
    assert_eq!(agent.len(), 0);
}

#[test]
fn test_delete_unknown_uuid_is_not_found() {
    let agent = agent(2);
    let err = agent.delete("ghost").unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_delete_older_than_queued_insert_is_not_found() {
    // Open-question pin: a delete whose timestamp precedes the only
    // queued insert for that UUID is rejected, not silently dropped.
    let agent = agent(2);
    agent.insert_with_time("z", vec![1.0, 0.0], 200).unwrap();

    let err = agent.delete_with_time("z", 150).unwrap_err();
    assert!(err.is_not_found());

    // The insert is untouched.
    assert!(agent.exists("z"));
}

#[test]
fn test_reinsert_after_delete() {
    let agent = agent(2);
    agent.insert("a", vec![1.0, 0.0]).unwrap();
    agent.create_index(0).unwrap();

    agent.delete("a").unwrap();
    // The UUID is free again while its delete is pending.
    agent.insert("a", vec![0.0, 1.0]).unwrap();

    agent.create_index(0).unwrap();
    assert_eq!(agent.get_object("a").unwrap(), vec![0.0, 1.0]);
    assert_eq!(agent.len(), 1);
}

// ============================================================================
// AlreadyExists rules
// ============================================================================

#[test]
fn test_insert_duplicate_queued_rejected() {
    let agent = agent(2);
    agent.insert("a", vec![1.0, 0.0]).unwrap();
    let err = agent.insert("a", vec![0.0, 1.0]).unwrap_err();
    assert!(err.is_already_exists());
}

#[test]
fn test_insert_duplicate_committed_rejected() {
    let agent = agent(2);
    agent.insert("a", vec![1.0, 0.0]).unwrap();
    agent.create_index(0).unwrap();
    let err = agent.insert("a", vec![0.0, 1.0]).unwrap_err();
    assert!(err.is_already_exists());
}

// ============================================================================
// Multi operations (spec scenario 4)
// ============================================================================

#[test]
fn test_multi_insert_collects_per_item_errors() {
    let agent = agent(4);

    let err = agent
        .insert_multiple(vec![
            ("p".to_string(), vec![1.0, 0.0, 0.0, 0.0]),
            ("q".to_string(), vec![1.0, 0.0, 0.0]), // wrong dimension
        ])
        .unwrap_err();

    let AnnexError::Batch(items) = err else {
        panic!("expected Batch error");
    };
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].0, "q");
    assert!(items[0].1.is_invalid_argument());

    agent.create_index(0).unwrap();
    assert!(agent.exists("p"));
    assert!(!agent.exists("q"));
}

#[test]
fn test_multi_insert_all_ok() {
    let agent = agent(2);
    agent
        .insert_multiple(vec![
            ("a".to_string(), vec![1.0, 0.0]),
            ("b".to_string(), vec![0.0, 1.0]),
        ])
        .unwrap();
    assert_eq!(agent.insert_vqueue_len(), 2);
}

#[test]
fn test_multi_delete_collects_errors() {
    let agent = agent(2);
    agent.insert("a", vec![1.0, 0.0]).unwrap();

    let err = agent
        .delete_multiple(vec!["a".to_string(), "ghost".to_string()])
        .unwrap_err();
    let AnnexError::Batch(items) = err else {
        panic!("expected Batch error");
    };
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].0, "ghost");
    assert!(items[0].1.is_not_found());
    assert!(!agent.exists("a"));
}

#[test]
fn test_multi_upsert_mixed_known_unknown() {
    let agent = agent(2);
    agent.insert("a", vec![1.0, 0.0]).unwrap();
    agent.create_index(0).unwrap();

    agent
        .upsert_multiple(vec![
            ("a".to_string(), vec![0.0, 1.0]),
            ("b".to_string(), vec![0.5, 0.5]),
        ])
        .unwrap();
    agent.create_index(0).unwrap();

    assert_eq!(agent.get_object("a").unwrap(), vec![0.0, 1.0]);
    assert_eq!(agent.get_object("b").unwrap(), vec![0.5, 0.5]);
}

// ============================================================================
// Counters and idempotence (property P5 pin)
// ============================================================================

#[test]
fn test_create_index_on_empty_queue_is_noop() {
    let agent = agent(2);
    agent.insert("a", vec![1.0, 0.0]).unwrap();
    agent.create_index(0).unwrap();
    assert_eq!(agent.create_index_count(), 1);

    // Empty queue: short-circuit, no execution counted.
    agent.create_index(0).unwrap();
    agent.create_index(0).unwrap();
    assert_eq!(agent.create_index_count(), 1);
    assert_eq!(agent.len(), 1);
}

// ============================================================================
// Boundaries
// ============================================================================

#[test]
fn test_dimension_one_works() {
    let agent = agent(1);
    agent.insert("a", vec![0.5]).unwrap();
    agent.create_index(0).unwrap();
    let hits = agent.search(&[0.5], 1, None, None).unwrap();
    assert_eq!(hits[0].uuid, "a");
}

#[test]
fn test_dimension_4096_works() {
    let agent = agent(4096);
    agent.insert("a", make_vector(1, 4096)).unwrap();
    agent.create_index(0).unwrap();
    let hits = agent.search(&make_vector(1, 4096), 1, None, None).unwrap();
    assert_eq!(hits[0].uuid, "a");
}

#[test]
fn test_non_finite_vectors_rejected() {
    let agent = agent(2);
    assert!(agent.insert("a", vec![f32::NAN, 0.0]).unwrap_err().is_invalid_argument());
    assert!(agent
        .insert("a", vec![f32::INFINITY, 0.0])
        .unwrap_err()
        .is_invalid_argument());
    assert!(agent
        .insert("a", vec![f32::NEG_INFINITY, 0.0])
        .unwrap_err()
        .is_invalid_argument());
    assert!(!agent.exists("a"));
}

#[test]
fn test_uuid_length_boundaries() {
    let agent = agent(2);

    agent.insert("x", vec![1.0, 0.0]).unwrap();
    agent.insert(&"u".repeat(2048), vec![0.0, 1.0]).unwrap();

    assert!(agent.insert("", vec![1.0, 0.0]).unwrap_err().is_invalid_argument());
    assert!(agent
        .insert(&"u".repeat(2049), vec![1.0, 0.0])
        .unwrap_err()
        .is_invalid_argument());
}

#[test]
fn test_search_k_zero_is_empty() {
    let agent = agent(2);
    agent.insert("a", vec![1.0, 0.0]).unwrap();
    agent.create_index(0).unwrap();
    assert!(agent.search(&[1.0, 0.0], 0, None, None).unwrap().is_empty());
}

#[test]
fn test_search_wrong_dimension_rejected() {
    let agent = agent(4);
    let err = agent.search(&[1.0, 0.0], 1, None, None).unwrap_err();
    assert!(err.is_invalid_argument());
}

#[test]
fn test_search_radius_filters_results() {
    let agent = agent(2);
    agent.insert("near", vec![0.1, 0.0]).unwrap();
    agent.insert("far", vec![10.0, 0.0]).unwrap();
    agent.create_index(0).unwrap();

    let hits = agent.search(&[0.0, 0.0], 10, None, Some(1.0)).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].uuid, "near");
}

// ============================================================================
// Presence (property P2)
// ============================================================================

#[test]
fn test_exists_tracks_queue_and_commit_states() {
    let agent = agent(2);

    assert!(!agent.exists("a"));
    agent.insert("a", vec![1.0, 0.0]).unwrap();
    assert!(agent.exists("a")); // queued
    agent.create_index(0).unwrap();
    assert!(agent.exists("a")); // committed
    agent.delete("a").unwrap();
    assert!(!agent.exists("a")); // masked by pending delete
    agent.create_index(0).unwrap();
    assert!(!agent.exists("a")); // gone
}

// ============================================================================
// uuids() / len consistency (property P1)
// ============================================================================

#[test]
fn test_len_matches_uuids_at_quiescence() {
    let agent = agent(2);
    for seed in 0..20u64 {
        agent.insert(&format!("u{}", seed), make_vector(seed, 2)).unwrap();
    }
    agent.delete("u3").unwrap();
    agent.delete("u7").unwrap();
    agent.create_index(0).unwrap();

    assert_eq!(agent.insert_vqueue_len(), 0);
    assert_eq!(agent.delete_vqueue_len(), 0);
    assert_eq!(agent.len(), 18);
    assert_eq!(agent.uuids().len(), 18);
}
