//! Reverse index
//!
//! Provides the on-disk postings format, the word directory, the construction
//! pipeline (journal -> preindex -> merge -> finalize) and the query-time reader.

pub mod btree;
pub mod constructor;
pub mod doc_id;
pub mod preindex;
pub mod query;
pub mod reader;
pub mod skiplist;

pub use btree::{WordDirectory, WordDirectoryWriter};
pub use constructor::{ConstructionReport, IndexConstructor};
pub use doc_id::{DocIdRewriter, DocumentId, IdentityRewriter};
pub use preindex::{FinalizeReport, Preindex, PreindexReference};
pub use query::{
    EmptyEntrySource, EntrySource, LongQueryBuffer, QueryFilterLetThrough, QueryFilterNoPass,
    QueryFilterStep, RejectFilter, RetainFilter, SearchBudget,
};
pub use reader::{ReverseIndexReader, TermMetadata};
pub use self_test::{verify_index, SelfTestReport, Violation};

#[cfg(test)]
mod tests;
