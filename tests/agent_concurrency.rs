//! Integration tests for concurrent use: parallel writers racing the
//! background controller, reads during drains, and quiescent-state
//! invariants (spec scenario 6 at CI scale).

use std::sync::Arc;
use std::time::{Duration, Instant};

use annex::{Annex, Config};

const DIM: usize = 8;

fn make_vector(seed: u64) -> Vec<f32> {
    (0..DIM)
        .map(|i| (seed as f32 * 0.1 + i as f32 * 0.01).sin())
        .collect()
}

/// In-memory config with an aggressive controller cadence.
fn fast_controller_config() -> Config {
    Config {
        auto_index_length: 64,
        auto_index_duration: Duration::from_millis(50),
        auto_index_check_duration: Duration::from_millis(10),
        init_index_delay: Duration::ZERO,
        ..Config::in_memory(DIM)
    }
}

#[test]
fn test_concurrent_writers_with_controller_drains() {
    const WRITERS: u64 = 8;
    const PER_WRITER: u64 = 250;

    let agent = Arc::new(Annex::open(fast_controller_config()).unwrap());
    let errors = agent.start().unwrap();

    let mut handles = Vec::new();
    for w in 0..WRITERS {
        let agent = Arc::clone(&agent);
        handles.push(std::thread::spawn(move || {
            for i in 0..PER_WRITER {
                let uuid = format!("w{}-{}", w, i);
                agent.insert(&uuid, make_vector(w * PER_WRITER + i)).unwrap();
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    // Let the controller absorb the tail, then force quiescence.
    let deadline = Instant::now() + Duration::from_secs(10);
    while agent.insert_vqueue_len() > 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    agent.create_index(0).unwrap();

    assert_eq!(agent.insert_vqueue_len(), 0);
    assert_eq!(agent.delete_vqueue_len(), 0);
    assert_eq!(agent.len(), WRITERS * PER_WRITER);
    assert!(errors.try_recv().is_err(), "controller reported errors");

    let agent = Arc::into_inner(agent).expect("writers still hold the agent");
    agent.close().unwrap();
}

#[test]
fn test_reads_during_concurrent_drains() {
    let agent = Arc::new(Annex::open(Config::in_memory(DIM)).unwrap());

    for seed in 0..100u64 {
        agent.insert(&format!("base-{}", seed), make_vector(seed)).unwrap();
    }
    agent.create_index(0).unwrap();

    // One thread keeps mutating + draining; readers hammer searches.
    let writer = {
        let agent = Arc::clone(&agent);
        std::thread::spawn(move || {
            for seed in 100..200u64 {
                agent.insert(&format!("new-{}", seed), make_vector(seed)).unwrap();
                if seed % 10 == 0 {
                    agent.create_index(0).unwrap();
                }
            }
            agent.create_index(0).unwrap();
        })
    };

    let mut readers = Vec::new();
    for r in 0..4u64 {
        let agent = Arc::clone(&agent);
        readers.push(std::thread::spawn(move || {
            for seed in 0..200u64 {
                let hits = agent
                    .search(&make_vector((seed + r) % 100), 5, None, None)
                    .unwrap();
                // Committed baseline is never empty.
                assert!(!hits.is_empty());
                assert!(agent.exists(&format!("base-{}", (seed + r) % 100)));
            }
        }));
    }

    writer.join().unwrap();
    for h in readers {
        h.join().unwrap();
    }

    assert_eq!(agent.len(), 200);
}

#[test]
fn test_concurrent_create_index_callers_serialize() {
    let agent = Arc::new(Annex::open(Config::in_memory(DIM)).unwrap());
    for seed in 0..64u64 {
        agent.insert(&format!("u{}", seed), make_vector(seed)).unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let agent = Arc::clone(&agent);
        handles.push(std::thread::spawn(move || agent.create_index(2)));
    }
    for h in handles {
        h.join().unwrap().unwrap();
    }

    // Whatever the interleaving, every record landed exactly once and
    // late callers saw the empty-queue short-circuit.
    assert_eq!(agent.len(), 64);
    assert_eq!(agent.insert_vqueue_len(), 0);
    assert!(agent.create_index_count() >= 1);
}

#[test]
fn test_mutations_accepted_during_drain_land_later() {
    let agent = Arc::new(Annex::open(Config::in_memory(DIM)).unwrap());
    for seed in 0..500u64 {
        agent.insert(&format!("u{}", seed), make_vector(seed)).unwrap();
    }

    let drainer = {
        let agent = Arc::clone(&agent);
        std::thread::spawn(move || agent.create_index(2).unwrap())
    };
    // Race a mutation against the drain; whichever side of the cutoff
    // it lands on, it must not be lost.
    agent.insert("racer", make_vector(9999)).unwrap();
    drainer.join().unwrap();

    agent.create_index(0).unwrap();
    assert!(agent.exists("racer"));
    assert_eq!(agent.len(), 501);
}

#[test]
fn test_controller_save_cadence_persists_in_background() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        auto_index_length: 4,
        auto_index_duration: Duration::from_millis(30),
        auto_save_index_duration: Duration::from_millis(50),
        auto_index_check_duration: Duration::from_millis(10),
        ..Config::on_disk(dir.path(), DIM)
    };

    let agent = Annex::open(config.clone()).unwrap();
    let _errors = agent.start().unwrap();
    for seed in 0..16u64 {
        agent.insert(&format!("u{}", seed), make_vector(seed)).unwrap();
    }

    // Wait for the controller to drain and save on its own.
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if dir.path().join("kvs.snap").exists() && agent.insert_vqueue_len() == 0 {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(dir.path().join("kvs.snap").exists(), "controller never saved");
    agent.close().unwrap();

    let reopened = Annex::open(config).unwrap();
    assert_eq!(reopened.len(), 16);
    reopened.close().unwrap();
}

#[test]
fn test_proactive_gc_counts_executions() {
    let agent = Annex::open(Config {
        enable_proactive_gc: true,
        proactive_gc_stride: 1,
        auto_index_length: 1,
        auto_index_check_duration: Duration::from_millis(10),
        ..Config::in_memory(DIM)
    })
    .unwrap();
    let _errors = agent.start().unwrap();

    agent.insert("a", make_vector(1)).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while agent.proactive_gc_count() == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(agent.create_index_count() >= 1);
    assert!(agent.proactive_gc_count() >= 1);
    agent.close().unwrap();
}
