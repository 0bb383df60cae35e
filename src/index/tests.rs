//! End-to-end: journal -> preindex -> finalized index -> reader

use super::*;
use crate::config::{BufferPoolConfig, ConstructionConfig, IndexPaths};
use crate::storage::journal::JournalWriter;
use crate::StorageError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Stand-in for the keyword hash the loader uses
fn term(keyword: &str) -> u64 {
    keyword
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325u64, |h, b| (h ^ b as u64).wrapping_mul(0x100_0000_01b3))
}

fn doc(n: u64) -> u64 {
    DocumentId::encode(0, n)
}

fn read_all(source: &mut dyn EntrySource) -> Vec<u64> {
    let mut buffer = LongQueryBuffer::new();
    let mut out = Vec::new();
    while source.has_more() {
        source.read(&mut buffer).unwrap();
        out.extend_from_slice(buffer.data());
    }
    out
}

fn write_journal(dir: &Path, name: &str, postings: &[(&str, &[u64])]) -> PathBuf {
    let mut writer = JournalWriter::create(dir.join(name)).unwrap();
    for (keyword, docs) in postings {
        for &d in *docs {
            writer.put(term(keyword), doc(d), d * 100).unwrap();
        }
    }
    writer.finish().unwrap()
}

/// a: doc1, doc3, doc5; b: doc2, doc4
fn scenario_index(temp: &TempDir) -> ReverseIndexReader {
    let journal = write_journal(
        temp.path(),
        "batch.journal",
        &[("a", &[1, 3, 5]), ("b", &[2, 4])],
    );
    let preindex = Preindex::construct(&journal, &IdentityRewriter, &temp.path().join("work"))
        .unwrap();
    let paths = IndexPaths::in_dir(temp.path());
    preindex.finalize(&paths).unwrap();
    preindex.delete().unwrap();
    ReverseIndexReader::open(&paths, &BufferPoolConfig::for_testing()).unwrap()
}

#[test]
fn test_scenario_counts_and_enumeration() {
    let temp = TempDir::new().unwrap();
    let reader = scenario_index(&temp);

    assert!(!reader.is_empty_index());
    assert_eq!(reader.num_terms(), 2);
    assert_eq!(reader.num_documents(term("a")).unwrap(), 3);
    assert_eq!(reader.num_documents(term("b")).unwrap(), 2);

    let mut a = reader.documents(term("a")).unwrap();
    assert_eq!(read_all(a.as_mut()), vec![doc(1), doc(3), doc(5)]);
}

#[test]
fn test_scenario_also_and_not() {
    let temp = TempDir::new().unwrap();
    let reader = scenario_index(&temp);
    let corpus: Vec<u64> = (1..=5).map(doc).collect();

    // a AND b: no shared documents
    let mut buffer = LongQueryBuffer::from_sorted(corpus.clone());
    reader.also(term("a")).unwrap().apply(&mut buffer).unwrap();
    reader.also(term("b")).unwrap().apply(&mut buffer).unwrap();
    assert!(buffer.is_empty());

    // NOT a
    let mut buffer = LongQueryBuffer::from_sorted(corpus);
    reader.not(term("a")).unwrap().apply(&mut buffer).unwrap();
    assert_eq!(buffer.data(), &[doc(2), doc(4)]);
}

#[test]
fn test_absent_term() {
    let temp = TempDir::new().unwrap();
    let reader = scenario_index(&temp);
    let z = term("z");

    assert_eq!(reader.num_documents(z).unwrap(), 0);
    let mut source = reader.documents(z).unwrap();
    assert!(read_all(source.as_mut()).is_empty());

    let corpus: Vec<u64> = (1..=5).map(doc).collect();
    let mut buffer = LongQueryBuffer::from_sorted(corpus.clone());
    reader.not(z).unwrap().apply(&mut buffer).unwrap();
    assert_eq!(buffer.data(), corpus.as_slice());
    reader.also(z).unwrap().apply(&mut buffer).unwrap();
    assert!(buffer.is_empty());
}

#[test]
fn test_missing_files_serve_empty_index() {
    let temp = TempDir::new().unwrap();
    let paths = IndexPaths::in_dir(temp.path().join("not-built-yet"));
    let reader = ReverseIndexReader::open(&paths, &BufferPoolConfig::for_testing()).unwrap();

    assert!(reader.is_empty_index());
    assert_eq!(reader.num_documents(term("a")).unwrap(), 0);
    assert!(read_all(reader.documents(term("a")).unwrap().as_mut()).is_empty());
    assert!(reader.pool_stats().is_none());

    let metadata = reader
        .get_term_metadata(&[term("a")], &[doc(1)], &SearchBudget::unlimited())
        .unwrap();
    assert_eq!(metadata[0].values, vec![None]);
}

#[test]
fn test_term_metadata_in_caller_order() {
    let temp = TempDir::new().unwrap();
    let reader = scenario_index(&temp);

    let metadata = reader
        .get_term_metadata(
            &[term("b"), term("z"), term("a")],
            &[doc(5), doc(2), doc(1)],
            &SearchBudget::unlimited(),
        )
        .unwrap();
    assert_eq!(metadata.len(), 3);
    assert_eq!(metadata[0].term_id, term("b"));
    assert_eq!(metadata[0].values, vec![None, Some(200), None]);
    assert_eq!(metadata[1].values, vec![None, None, None]);
    assert_eq!(metadata[2].values, vec![Some(500), None, Some(100)]);
}

#[test]
fn test_term_metadata_timeout_is_distinct() {
    let temp = TempDir::new().unwrap();
    let reader = scenario_index(&temp);

    let err = reader
        .get_term_metadata(&[term("a")], &[doc(1)], &SearchBudget::new(Duration::ZERO))
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(matches!(err, StorageError::Timeout(_)));
}

#[test]
fn test_constructed_from_batches_matches_single_batch() {
    let temp = TempDir::new().unwrap();
    let journals = vec![
        write_journal(temp.path(), "b0.journal", &[("a", &[1, 3]), ("b", &[2])]),
        write_journal(temp.path(), "b1.journal", &[("a", &[5, 3]), ("c", &[7])]),
        write_journal(temp.path(), "b2.journal", &[("b", &[4]), ("c", &[6, 8])]),
    ];
    let paths = IndexPaths::in_dir(temp.path().join("index"));
    let constructor = IndexConstructor::new(ConstructionConfig::with_work_dir(temp.path().join("work")));
    let report = constructor.build(&journals, &IdentityRewriter, &paths).unwrap();
    assert_eq!(report.num_terms, 3);
    assert_eq!(report.num_postings, 8); // doc3 under "a" appears twice

    let reader = ReverseIndexReader::open(&paths, &BufferPoolConfig::for_testing()).unwrap();
    let mut a = reader.documents(term("a")).unwrap();
    assert_eq!(read_all(a.as_mut()), vec![doc(1), doc(3), doc(5)]);
    let mut c = reader.documents(term("c")).unwrap();
    assert_eq!(read_all(c.as_mut()), vec![doc(6), doc(7), doc(8)]);

    let report = verify_index(&paths, &BufferPoolConfig::for_testing()).unwrap();
    assert!(report.is_ok());
    assert_eq!(report.postings_checked, 8);
}

#[test]
fn test_large_term_through_small_pool() {
    let temp = TempDir::new().unwrap();
    let journal = temp.path().join("big.journal");
    let mut writer = JournalWriter::create(&journal).unwrap();
    for d in (0..40_000u64).rev() {
        writer.put(term("common"), doc(d), d).unwrap();
        if d % 3 == 0 {
            writer.put(term("third"), doc(d), d).unwrap();
        }
    }
    writer.finish().unwrap();

    let paths = IndexPaths::in_dir(temp.path().join("index"));
    IndexConstructor::new(ConstructionConfig::with_work_dir(temp.path().join("work")))
        .build(&[journal], &IdentityRewriter, &paths)
        .unwrap();

    let mut config = BufferPoolConfig::for_testing();
    config.num_pages = 4;
    let reader = ReverseIndexReader::open(&paths, &config).unwrap();
    assert_eq!(reader.num_documents(term("common")).unwrap(), 40_000);

    let all = read_all(reader.documents(term("common")).unwrap().as_mut());
    assert_eq!(all.len(), 40_000);
    assert!(all.windows(2).all(|w| w[0] < w[1]));

    let mut buffer = LongQueryBuffer::from_sorted(all);
    reader.also(term("third")).unwrap().apply(&mut buffer).unwrap();
    assert_eq!(buffer.len(), 13_334);
    reader.not(term("third")).unwrap().apply(&mut buffer).unwrap();
    assert!(buffer.is_empty());

    let stats = reader.pool_stats().unwrap();
    assert!(stats.misses > 0);
    assert!(stats.evictions > 0);
}
