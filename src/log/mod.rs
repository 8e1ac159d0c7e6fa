//! Log Module
//!
//! Append-only version log, one file per table.
//!
//! ## Responsibilities
//! - Append serialized record versions under an exclusive file lock
//! - Read one version back by byte offset under a shared lock
//! - Lazy forward scans over a stable snapshot length
//! - Compaction: rewrite keeping the latest live version per id
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ offset 0    {"_deleted":false,"id":1,...}\n             │
//! │ offset 41   {"_deleted":false,"id":2,...}\n             │
//! │ offset 83   {"_deleted":true,"id":1,...}\n   ← superseded│
//! │ offset 124  {"_deleted":false,"id":1,...}\n  ← current  │
//! │ ... appended forever, never rewritten in place ...      │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Compaction Sequence
//! ```text
//! lock data ─► scan ─► write data.tmp ─► copy data.bak.<ts>
//!           ─► rename data.tmp → data ─► remove backup ─► unlock
//!                         │
//!                         └─ on failure: restore from backup,
//!                            DataLoss if that fails too
//! ```

mod compaction;
mod scanner;
mod store;

pub use compaction::{CompactedEntry, CompactionOutcome};
pub use scanner::LogScanner;
pub use store::LogStore;
