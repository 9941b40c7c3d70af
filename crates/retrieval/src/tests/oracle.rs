//! Brute-force oracle comparison for the exhaustive strategy.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

use super::{exhaustive_config, record};
use crate::engine::RetrievalEngine;
use crate::exhaustive::ExhaustiveIndex;
use crate::filter::TenantFilter;
use crate::types::VectorRecord;
use crate::vector_index::{dot, normalize};

const DIMENSION: usize = 16;
const ROLLS: &[&str] = &["001", "002", "003", "004"];
const SOURCES: &[&str] = &["a.pdf", "b.pdf", "c.docx"];

fn corpus(rng: &mut StdRng, n: usize) -> Vec<VectorRecord> {
    (0..n)
        .map(|i| {
            let vector: Vec<f32> = (0..DIMENSION).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let roll_no = ROLLS[rng.gen_range(0..ROLLS.len())];
            let source = SOURCES[rng.gen_range(0..SOURCES.len())];
            record(&format!("r{}", i), vector, &format!("text {}", i), "SCA", roll_no)
                .with_meta("source", source)
        })
        .collect()
}

/// Ids of the true top-k among records passing the filter.
fn brute_force(
    corpus: &[VectorRecord],
    query: &[f32],
    k: usize,
    filter: &TenantFilter,
    allowed_sources: Option<&[String]>,
) -> Vec<String> {
    let query = normalize(query);
    let mut scored: Vec<(usize, f32)> = corpus
        .iter()
        .enumerate()
        .filter(|(_, r)| crate::filter::apply(&r.metadata, filter, allowed_sources))
        .map(|(i, r)| (i, dot(&normalize(&r.vector), &query)))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    scored
        .into_iter()
        .take(k)
        .map(|(i, _)| corpus[i].id.clone())
        .collect()
}

fn check_against_oracle(engine: &RetrievalEngine, corpus: &[VectorRecord], rng: &mut StdRng) {
    let sources = vec!["a.pdf".to_string(), "c.docx".to_string()];

    for _ in 0..10 {
        let query: Vec<f32> = (0..DIMENSION).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let roll_no = ROLLS[rng.gen_range(0..ROLLS.len())];
        let filter = TenantFilter::new("SCA", roll_no).unwrap();

        for k in [1, 5, 10] {
            for allowed in [None, Some(sources.as_slice())] {
                let expected = brute_force(corpus, &query, k, &filter, allowed);
                let actual: Vec<String> = engine
                    .search(&query, k, &filter, allowed)
                    .unwrap()
                    .into_iter()
                    .map(|hit| hit.id)
                    .collect();
                assert_eq!(actual, expected, "k={} roll_no={}", k, roll_no);
            }
        }
    }
}

#[test]
fn test_exhaustive_matches_oracle() {
    for (seed, n) in [(1u64, 0usize), (2, 1), (3, 50), (4, 5000)] {
        let temp = TempDir::new().unwrap();
        let engine = RetrievalEngine::open(exhaustive_config(temp.path(), DIMENSION)).unwrap();
        let mut rng = StdRng::seed_from_u64(seed);

        let corpus = corpus(&mut rng, n);
        assert_eq!(engine.insert(corpus.clone()).unwrap(), n);
        assert_eq!(engine.size().unwrap(), n);

        check_against_oracle(&engine, &corpus, &mut rng);
    }
}

#[test]
fn test_exact_accelerator_matches_oracle() {
    for (seed, n) in [(5u64, 50usize), (6, 5000)] {
        let temp = TempDir::new().unwrap();
        let engine = RetrievalEngine::with_backend(
            exhaustive_config(temp.path(), DIMENSION),
            Box::new(ExhaustiveIndex::new(DIMENSION)),
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(seed);

        let corpus = corpus(&mut rng, n);
        engine.insert(corpus.clone()).unwrap();

        check_against_oracle(&engine, &corpus, &mut rng);
    }
}
