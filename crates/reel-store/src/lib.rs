//! Persistence boundary for clip and export job records.
//!
//! The pipeline only needs simple get and upsert calls: clip results are
//! written after every terminal generation transition, export jobs after
//! every status change. [`MemoryStore`] backs the CLI and the tests.

pub mod error;
pub mod memory;
pub mod record;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use record::{ClipResultUpdate, RecordStore};
