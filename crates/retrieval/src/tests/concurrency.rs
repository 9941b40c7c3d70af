//! Readers racing writers on a shared engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use tempfile::TempDir;

use super::{exhaustive_config, record};
use crate::engine::RetrievalEngine;
use crate::filter::TenantFilter;
use crate::types::{ROLL_NO_KEY, UNIVERSITY_KEY};

const BATCHES: usize = 40;
const BATCH_SIZE: usize = 4;

#[test]
fn test_concurrent_search_and_insert() {
    let temp = TempDir::new().unwrap();
    let engine = RetrievalEngine::open(exhaustive_config(temp.path(), 3)).unwrap();
    let done = AtomicBool::new(false);

    thread::scope(|scope| {
        scope.spawn(|| {
            for b in 0..BATCHES {
                let batch = (0..BATCH_SIZE)
                    .map(|i| {
                        let roll_no = if i % 2 == 0 { "001" } else { "002" };
                        record(
                            &format!("b{}-{}", b, i),
                            vec![1.0, b as f32, i as f32],
                            "chunk",
                            "SCA",
                            roll_no,
                        )
                    })
                    .collect();
                engine.insert(batch).unwrap();
            }
            done.store(true, Ordering::SeqCst);
        });

        for roll_no in ["001", "002"] {
            let engine = &engine;
            let done = &done;
            scope.spawn(move || {
                let filter = TenantFilter::new("SCA", roll_no).unwrap();
                let mut last_size = 0;
                loop {
                    let finished = done.load(Ordering::SeqCst);

                    let size = engine.size().unwrap();
                    assert_eq!(size % BATCH_SIZE, 0, "observed a partial batch");
                    assert!(size >= last_size);
                    last_size = size;

                    let hits = engine.search(&[1.0, 0.5, 0.5], 50, &filter, None).unwrap();
                    for hit in &hits {
                        assert_eq!(hit.metadata[UNIVERSITY_KEY].as_str(), Some("SCA"));
                        assert_eq!(hit.metadata[ROLL_NO_KEY].as_str(), Some(roll_no));
                    }

                    if finished {
                        break;
                    }
                }
            });
        }
    });

    assert_eq!(engine.size().unwrap(), BATCHES * BATCH_SIZE);

    let filter = TenantFilter::new("SCA", "001").unwrap();
    assert_eq!(engine.tenant_stats(&filter).unwrap().docs, BATCHES * BATCH_SIZE / 2);
}

#[test]
fn test_reset_during_reads_is_all_or_nothing() {
    let temp = TempDir::new().unwrap();
    let engine = RetrievalEngine::open(exhaustive_config(temp.path(), 2)).unwrap();
    let batch = (0..20)
        .map(|i| record(&format!("c{}", i), vec![1.0, i as f32], "chunk", "SCA", "001"))
        .collect();
    engine.insert(batch).unwrap();

    thread::scope(|scope| {
        scope.spawn(|| {
            let filter = TenantFilter::new("SCA", "001").unwrap();
            for _ in 0..200 {
                let hits = engine.search(&[1.0, 1.0], 100, &filter, None).unwrap();
                assert!(hits.len() == 20 || hits.is_empty(), "saw {} hits", hits.len());
            }
        });
        scope.spawn(|| engine.reset().unwrap());
    });

    assert_eq!(engine.size().unwrap(), 0);
}
