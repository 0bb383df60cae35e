//! Page cache for query serving

pub mod buffer_pool;
pub mod page;
mod read_ahead;

pub use buffer_pool::{BufferPool, BufferPoolStats};
pub use page::{PageGuard, PinState};
