//! Binary preindex merge
//!
//! The output's term list is the union of both inputs' term lists and is fixed
//! before any postings are copied. Terms present on one side are block-copied;
//! terms present on both sides are merged with duplicates collapsed. The
//! output documents file is preallocated for the worst case and truncated to
//! what was actually written.

use super::segments::WordSegment;
use super::{new_preindex_name, Preindex, PreindexDocuments, PreindexFiles, PreindexWordSegments};
use crate::error::ResultExt;
use crate::storage::LongArray;
use crate::{Result, StorageError};
use std::path::Path;

/// Merge `left` and `right` into a new preindex in `work_dir`
pub fn merge(left: &Preindex, right: &Preindex, work_dir: &Path) -> Result<Preindex> {
    let name = new_preindex_name();
    let files = PreindexFiles::new(work_dir, &name);
    log::info!(
        "merging {} ({} postings) and {} ({} postings) into {}",
        left.name(),
        left.num_postings(),
        right.name(),
        right.num_postings(),
        name
    );

    match merge_into(left, right, &files) {
        Ok((segments, documents)) => {
            let mut sources = left.sources().to_vec();
            sources.extend_from_slice(right.sources());
            let merged = Preindex::from_parts(name, work_dir, segments, documents, sources);
            log::info!(
                "merged {}: {} terms, {} postings",
                merged.name(),
                merged.num_terms(),
                merged.num_postings()
            );
            Ok(merged)
        }
        Err(e) => {
            let _ = files.remove();
            Err(e).with_phase("merge", &files.documents)
        }
    }
}

fn merge_into(
    left: &Preindex,
    right: &Preindex,
    files: &PreindexFiles,
) -> Result<(PreindexWordSegments, PreindexDocuments)> {
    let union = union_sorted(left.segments().word_ids(), right.segments().word_ids());
    let mut segments = PreindexWordSegments::create(&files.word_ids, &files.counts, &union)?;

    let capacity = 2 * (left.num_postings() + right.num_postings());
    let mut output = LongArray::create(&files.documents, capacity)?;

    let mut counts = vec![0u64; union.len()];
    let mut written = 0usize;
    {
        let dst = output.as_mut_slice()?;
        let mut left_segments = left.segments().iter().peekable();
        let mut right_segments = right.segments().iter().peekable();

        for (idx, &term_id) in union.iter().enumerate() {
            let l = left_segments.next_if(|s| s.term_id == term_id);
            let r = right_segments.next_if(|s| s.term_id == term_id);
            let words = match (l, r) {
                (Some(l), None) => copy_segment(left.documents(), &l, &mut dst[written..]),
                (None, Some(r)) => copy_segment(right.documents(), &r, &mut dst[written..]),
                (Some(l), Some(r)) => merge_postings(
                    left.documents().records(&l),
                    right.documents().records(&r),
                    &mut dst[written..],
                ),
                (None, None) => {
                    return Err(StorageError::Invariant(format!(
                        "term {} in merged word list but in neither input",
                        term_id
                    )))
                }
            };
            counts[idx] = (words / 2) as u64;
            written += words;
        }
    }

    segments.set_counts(&counts)?;
    if written < capacity {
        output.truncate(written)?;
    }
    segments.flush()?;
    output.flush()?;
    Ok((segments, PreindexDocuments::from_array(output)))
}

fn copy_segment(documents: &PreindexDocuments, segment: &WordSegment, dst: &mut [u64]) -> usize {
    let src = documents.records(segment);
    dst[..src.len()].copy_from_slice(src);
    src.len()
}

/// Sorted union of two ascending, duplicate-free id lists
pub fn union_sorted(a: &[u64], b: &[u64]) -> Vec<u64> {
    let mut out = Vec::with_capacity(a.len().max(b.len()));
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i] < b[j] {
            out.push(a[i]);
            i += 1;
        } else if b[j] < a[i] {
            out.push(b[j]);
            j += 1;
        } else {
            out.push(a[i]);
            i += 1;
            j += 1;
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}

/// Two-pointer merge of interleaved `(document_id, metadata)` runs.
///
/// A document on both sides is written once with the larger metadata.
/// Returns the number of words written to `dst`.
pub fn merge_postings(left: &[u64], right: &[u64], dst: &mut [u64]) -> usize {
    let (mut i, mut j, mut w) = (0, 0, 0);
    while i < left.len() && j < right.len() {
        let (ld, rd) = (left[i], right[j]);
        if ld < rd {
            dst[w..w + 2].copy_from_slice(&left[i..i + 2]);
            i += 2;
        } else if rd < ld {
            dst[w..w + 2].copy_from_slice(&right[j..j + 2]);
            j += 2;
        } else {
            dst[w] = ld;
            dst[w + 1] = left[i + 1].max(right[j + 1]);
            i += 2;
            j += 2;
        }
        w += 2;
    }
    let rest_left = &left[i..];
    dst[w..w + rest_left.len()].copy_from_slice(rest_left);
    w += rest_left.len();
    let rest_right = &right[j..];
    dst[w..w + rest_right.len()].copy_from_slice(rest_right);
    w + rest_right.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::doc_id::IdentityRewriter;
    use crate::storage::journal::JournalWriter;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::{BTreeMap, BTreeSet};
    use tempfile::TempDir;

    type Postings = BTreeMap<u64, BTreeMap<u64, u64>>;

    fn build(dir: &Path, name: &str, entries: &[(u64, u64, u64)]) -> Preindex {
        let journal = dir.join(format!("{}.journal", name));
        let mut writer = JournalWriter::create(&journal).unwrap();
        for &(term, doc, meta) in entries {
            writer.put(term, doc, meta).unwrap();
        }
        writer.finish().unwrap();
        Preindex::construct(&journal, &IdentityRewriter, dir).unwrap()
    }

    fn contents(preindex: &Preindex) -> Postings {
        let mut out = Postings::new();
        for segment in preindex.segments().iter() {
            let records = preindex.documents().records(&segment);
            let docs: Vec<u64> = records.chunks(2).map(|r| r[0]).collect();
            assert!(docs.windows(2).all(|w| w[0] < w[1]), "term {} unsorted", segment.term_id);
            let entry = out.entry(segment.term_id).or_default();
            for r in records.chunks(2) {
                entry.insert(r[0], r[1]);
            }
        }
        out
    }

    fn random_entries(rng: &mut StdRng, n: usize, docs: std::ops::Range<u64>) -> Vec<(u64, u64, u64)> {
        (0..n)
            .map(|_| (rng.gen_range(0..40), rng.gen_range(docs.clone()), rng.gen_range(0..1000)))
            .collect()
    }

    /// Expected union with max metadata on shared documents
    fn expected(a: &[(u64, u64, u64)], b: &[(u64, u64, u64)]) -> Postings {
        let mut out = Postings::new();
        for &(term, doc, meta) in a.iter().chain(b) {
            let m = out.entry(term).or_default().entry(doc).or_insert(meta);
            *m = (*m).max(meta);
        }
        out
    }

    #[test]
    fn test_merge_overlapping() {
        let temp = TempDir::new().unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let a_entries = random_entries(&mut rng, 3000, 0..500);
        let b_entries = random_entries(&mut rng, 2000, 250..800);

        let a = build(temp.path(), "a", &a_entries);
        let b = build(temp.path(), "b", &b_entries);
        let merged = merge(&a, &b, temp.path()).unwrap();

        assert_eq!(contents(&merged), expected(&a_entries, &b_entries));
        assert_eq!(merged.sources().len(), 2);
        // duplicates shrink the output below the preallocated size
        assert!(merged.num_postings() < a.num_postings() + b.num_postings());
        assert_eq!(
            std::fs::metadata(merged.files().documents).unwrap().len(),
            16 * merged.num_postings() as u64
        );
    }

    #[test]
    fn test_merge_disjoint_documents() {
        let temp = TempDir::new().unwrap();
        let a = build(temp.path(), "a", &[(1, 1, 0), (1, 3, 0), (2, 5, 0)]);
        let b = build(temp.path(), "b", &[(1, 2, 0), (3, 4, 0)]);
        let merged = merge(&a, &b, temp.path()).unwrap();

        assert_eq!(merged.segments().word_ids(), &[1, 2, 3]);
        assert_eq!(merged.postings(1).unwrap(), &[1, 0, 2, 0, 3, 0]);
        assert_eq!(merged.postings(2).unwrap(), &[5, 0]);
        assert_eq!(merged.postings(3).unwrap(), &[4, 0]);
    }

    #[test]
    fn test_merge_with_empty_is_identity() {
        let temp = TempDir::new().unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let a = build(temp.path(), "a", &random_entries(&mut rng, 1000, 0..300));
        let empty = build(temp.path(), "empty", &[]);

        let left = merge(&a, &empty, temp.path()).unwrap();
        let right = merge(&empty, &a, temp.path()).unwrap();
        assert_eq!(contents(&left), contents(&a));
        assert_eq!(contents(&right), contents(&a));
        assert_eq!(left.documents().words(), a.documents().words());
    }

    #[test]
    fn test_merge_commutes() {
        let temp = TempDir::new().unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let a = build(temp.path(), "a", &random_entries(&mut rng, 1500, 0..400));
        let b = build(temp.path(), "b", &random_entries(&mut rng, 1500, 200..600));

        let ab = contents(&merge(&a, &b, temp.path()).unwrap());
        let ba = contents(&merge(&b, &a, temp.path()).unwrap());
        let doc_sets = |p: &Postings| -> BTreeMap<u64, BTreeSet<u64>> {
            p.iter().map(|(t, docs)| (*t, docs.keys().copied().collect())).collect()
        };
        assert_eq!(doc_sets(&ab), doc_sets(&ba));
        // max-metadata makes the full contents symmetric too
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_merge_postings_equal_docs() {
        let left = [1, 10, 4, 40, 6, 60];
        let right = [1, 15, 5, 50, 6, 5];
        let mut dst = [0u64; 12];
        let n = merge_postings(&left, &right, &mut dst);
        assert_eq!(&dst[..n], &[1, 15, 4, 40, 5, 50, 6, 60]);
    }

    #[test]
    fn test_union_sorted() {
        assert_eq!(union_sorted(&[1, 3, 5], &[2, 3, 6, 7]), vec![1, 2, 3, 5, 6, 7]);
        assert_eq!(union_sorted(&[], &[4]), vec![4]);
    }
}
