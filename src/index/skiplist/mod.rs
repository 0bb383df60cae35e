//! Skip-list postings format
//!
//! A postings file is a sequence of segments, one per term. Each segment stores
//! the term's `(document_id, metadata)` records sorted by document id, split
//! into fixed-size blocks chained by forward pointers so a reader can skip
//! whole blocks while intersecting with a candidate list.

pub mod constants;
pub mod reader;
pub mod writer;

pub use constants::{BLOCK_SIZE, MIN_TRUNCATED_BLOCK_SIZE};
pub use reader::SkipListReader;
pub use writer::{estimate_size, SegmentLayout, SkipListWriter};
