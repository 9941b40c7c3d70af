//! Snapshot recovery with the usearch backend compiled in.

use std::fs;

use tempfile::TempDir;

use super::{exhaustive_config, record};
use crate::config::RetrievalConfig;
use crate::engine::RetrievalEngine;
use crate::filter::TenantFilter;
use crate::persistence::{Recovery, SnapshotPaths};
use crate::vector_index::BackendKind;

fn usearch_config(temp: &TempDir) -> RetrievalConfig {
    RetrievalConfig {
        backend: BackendKind::Usearch,
        ..exhaustive_config(temp.path(), 3)
    }
}

fn owner() -> TenantFilter {
    TenantFilter::new("SCA", "001").unwrap()
}

fn seed(config: &RetrievalConfig) {
    let engine = RetrievalEngine::open(config.clone()).unwrap();
    engine
        .insert(vec![
            record("a", vec![1.0, 0.0, 0.0], "alpha", "SCA", "001"),
            record("b", vec![0.0, 1.0, 0.0], "beta", "SCA", "001"),
        ])
        .unwrap();
}

fn top_id(engine: &RetrievalEngine, query: &[f32]) -> String {
    let hits = engine.search(query, 1, &owner(), None).unwrap();
    assert_eq!(hits.len(), 1);
    hits[0].id.clone()
}

#[test]
fn test_blob_roundtrip() {
    let temp = TempDir::new().unwrap();
    let config = usearch_config(&temp);
    seed(&config);
    assert!(SnapshotPaths::in_dir(&config.store_dir).index.exists());

    let engine = RetrievalEngine::open(config).unwrap();
    assert!(engine.recoveries().unwrap().is_empty());
    assert_eq!(engine.stats().unwrap().backend, BackendKind::Usearch);
    assert_eq!(engine.size().unwrap(), 2);
    assert_eq!(top_id(&engine, &[1.0, 0.1, 0.0]), "a");
    assert_eq!(top_id(&engine, &[0.1, 1.0, 0.0]), "b");
}

#[test]
fn test_corrupt_blob_is_rebuilt_from_matrix() {
    let temp = TempDir::new().unwrap();
    let config = usearch_config(&temp);
    seed(&config);

    let paths = SnapshotPaths::in_dir(&config.store_dir);
    fs::write(&paths.index, b"not a usearch index").unwrap();

    let engine = RetrievalEngine::open(config.clone()).unwrap();
    assert!(matches!(
        engine.recoveries().unwrap().as_slice(),
        [Recovery::IndexUnreadable(_)]
    ));
    assert_eq!(engine.stats().unwrap().backend, BackendKind::Usearch);
    assert_eq!(top_id(&engine, &[0.0, 1.0, 0.1]), "b");

    // The next save replaces the damaged blob
    engine
        .insert(vec![record("c", vec![0.0, 0.0, 1.0], "gamma", "SCA", "001")])
        .unwrap();
    drop(engine);
    let engine = RetrievalEngine::open(config).unwrap();
    assert!(engine.recoveries().unwrap().is_empty());
    assert_eq!(top_id(&engine, &[0.0, 0.1, 1.0]), "c");
}

#[test]
fn test_blob_with_wrong_count_is_rebuilt() {
    let temp = TempDir::new().unwrap();
    let config = usearch_config(&temp);
    let paths = SnapshotPaths::in_dir(&config.store_dir);

    let stale = {
        let engine = RetrievalEngine::open(config.clone()).unwrap();
        engine
            .insert(vec![record("a", vec![1.0, 0.0, 0.0], "alpha", "SCA", "001")])
            .unwrap();
        let stale = fs::read(&paths.index).unwrap();
        engine
            .insert(vec![record("b", vec![0.0, 1.0, 0.0], "beta", "SCA", "001")])
            .unwrap();
        stale
    };
    fs::write(&paths.index, stale).unwrap();

    let engine = RetrievalEngine::open(config).unwrap();
    assert_eq!(
        engine.recoveries().unwrap(),
        vec![Recovery::IndexCountMismatch { index: 1, records: 2 }]
    );
    assert_eq!(engine.stats().unwrap().backend, BackendKind::Usearch);
    assert_eq!(top_id(&engine, &[0.0, 1.0, 0.0]), "b");
}

#[test]
fn test_reset_then_insert() {
    let temp = TempDir::new().unwrap();
    let config = usearch_config(&temp);
    seed(&config);

    let engine = RetrievalEngine::open(config.clone()).unwrap();
    engine.reset().unwrap();
    assert_eq!(engine.size().unwrap(), 0);
    assert!(engine.search(&[1.0, 0.0, 0.0], 5, &owner(), None).unwrap().is_empty());

    engine
        .insert(vec![record("c", vec![0.0, 0.0, 1.0], "gamma", "SCA", "001")])
        .unwrap();
    assert_eq!(engine.stats().unwrap().backend, BackendKind::Usearch);
    assert_eq!(top_id(&engine, &[1.0, 0.0, 0.2]), "c");
    drop(engine);

    let engine = RetrievalEngine::open(config).unwrap();
    assert!(engine.recoveries().unwrap().is_empty());
    assert_eq!(engine.size().unwrap(), 1);
}

#[test]
fn test_failed_save_then_insert() {
    let temp = TempDir::new().unwrap();
    let config = usearch_config(&temp);
    let engine = RetrievalEngine::open(config.clone()).unwrap();
    engine
        .insert(vec![record("a", vec![1.0, 0.0, 0.0], "alpha", "SCA", "001")])
        .unwrap();

    fs::remove_dir_all(&config.store_dir).unwrap();
    assert!(engine
        .insert(vec![record("b", vec![0.0, 1.0, 0.0], "beta", "SCA", "001")])
        .is_err());
    assert_eq!(engine.size().unwrap(), 1);
    assert_eq!(top_id(&engine, &[0.0, 1.0, 0.0]), "a");

    fs::create_dir_all(&config.store_dir).unwrap();
    engine
        .insert(vec![record("c", vec![0.0, 0.0, 1.0], "gamma", "SCA", "001")])
        .unwrap();
    assert_eq!(engine.size().unwrap(), 2);
    assert_eq!(engine.stats().unwrap().backend, BackendKind::Usearch);
    assert_eq!(top_id(&engine, &[0.0, 0.0, 1.0]), "c");
    drop(engine);

    let engine = RetrievalEngine::open(config).unwrap();
    assert!(engine.recoveries().unwrap().is_empty());
    assert_eq!(top_id(&engine, &[0.0, 0.0, 1.0]), "c");
}

#[test]
fn test_lost_matrix_is_restored_from_blob() {
    let temp = TempDir::new().unwrap();
    let config = usearch_config(&temp);
    seed(&config);

    let paths = SnapshotPaths::in_dir(&config.store_dir);
    fs::remove_file(&paths.matrix).unwrap();

    let engine = RetrievalEngine::open(config.clone()).unwrap();
    assert_eq!(
        engine.recoveries().unwrap(),
        vec![
            Recovery::MatrixMissing { rows: 2 },
            Recovery::MatrixRestoredFromIndex { rows: 2, missing: 0 },
        ]
    );

    // The rebuilt matrix is what the next save persists
    engine
        .insert(vec![record("c", vec![0.0, 0.0, 1.0], "gamma", "SCA", "001")])
        .unwrap();
    drop(engine);
    fs::remove_file(&paths.index).unwrap();

    let engine = RetrievalEngine::open(config).unwrap();
    assert!(engine.recoveries().unwrap().is_empty());
    let hits = engine.search(&[1.0, 0.0, 0.0], 3, &owner(), None).unwrap();
    assert_eq!(hits[0].id, "a");
    assert!((hits[0].score - 1.0).abs() < 1e-4);
}
