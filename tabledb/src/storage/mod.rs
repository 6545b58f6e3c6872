//! In-memory column storage and secondary indexes.

mod index;
mod pull;

pub use index::PullIndex;
pub use pull::{normalize_block_size, Pull, DEFAULT_BLOCK_SIZE};
