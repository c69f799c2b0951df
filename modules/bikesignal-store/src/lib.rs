//! Storage seam for the signal engine: the report-candidate pool, bike group
//! records and operator dedupe groups.

pub mod memory;
pub mod postgres;
pub mod traits;

pub use memory::MemorySignalStore;
pub use postgres::PgSignalStore;
pub use traits::{CandidateQuery, MergeOutcome, SignalStore, StatusChange};
