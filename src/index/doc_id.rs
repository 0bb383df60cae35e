//! Document identifiers
//!
//! ```text
//! bit 63..58   rank      domain rank (0 = best)
//! bit 57..0    ordinal   opaque document ordinal
//! ```
//!
//! Sorting ids ascending therefore sorts by rank first.

/// Rank bits at the top of a document id
pub const RANK_BITS: u32 = 6;

/// Ordinal bits below the rank
pub const ORDINAL_BITS: u32 = 64 - RANK_BITS;

pub const MAX_RANK: u64 = (1 << RANK_BITS) - 1;

pub const ORDINAL_MASK: u64 = (1 << ORDINAL_BITS) - 1;

/// Helpers for the composite id layout
pub struct DocumentId;

impl DocumentId {
    /// Compose an id; out-of-range rank saturates, ordinal high bits are dropped
    #[inline]
    pub fn encode(rank: u64, ordinal: u64) -> u64 {
        (rank.min(MAX_RANK) << ORDINAL_BITS) | (ordinal & ORDINAL_MASK)
    }

    #[inline]
    pub fn rank(id: u64) -> u64 {
        id >> ORDINAL_BITS
    }

    #[inline]
    pub fn ordinal(id: u64) -> u64 {
        id & ORDINAL_MASK
    }

    #[inline]
    pub fn with_rank(id: u64, rank: u64) -> u64 {
        Self::encode(rank, Self::ordinal(id))
    }
}

/// Applied to every document id once, while a preindex is constructed
pub trait DocIdRewriter: Send + Sync {
    fn rewrite(&self, document_id: u64) -> u64;
}

impl<F> DocIdRewriter for F
where
    F: Fn(u64) -> u64 + Send + Sync,
{
    fn rewrite(&self, document_id: u64) -> u64 {
        self(document_id)
    }
}

/// Leaves ids unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityRewriter;

impl DocIdRewriter for IdentityRewriter {
    fn rewrite(&self, document_id: u64) -> u64 {
        document_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let id = DocumentId::encode(5, 123_456);
        assert_eq!(DocumentId::rank(id), 5);
        assert_eq!(DocumentId::ordinal(id), 123_456);

        let moved = DocumentId::with_rank(id, 2);
        assert_eq!(DocumentId::rank(moved), 2);
        assert_eq!(DocumentId::ordinal(moved), 123_456);
        assert_eq!(DocumentId::rank(DocumentId::encode(999, 1)), MAX_RANK);
    }

    #[test]
    fn test_rank_dominates_order() {
        let better = DocumentId::encode(1, ORDINAL_MASK);
        let worse = DocumentId::encode(2, 0);
        assert!(better < worse);
    }

    #[test]
    fn test_rewriters() {
        let fold_rank = |id: u64| DocumentId::with_rank(id, 3);
        assert_eq!(DocumentId::rank(fold_rank.rewrite(77)), 3);
        assert_eq!(IdentityRewriter.rewrite(77), 77);
    }
}
