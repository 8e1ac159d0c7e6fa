//! Index Module
//!
//! Primary and secondary indexes for one table.
//!
//! ## Responsibilities
//! - Primary index: record id → byte offset of its current live version
//! - Durable, never-reused id allocation
//! - Secondary indexes: field value → ids of live records holding it
//! - Quarantine of unparsable index documents
//!
//! ## Documents
//! ```text
//! T_index            {"last_id":42,"offsets":{"1":0,"3":118},"indexes":["status"]}
//! T_index_status     {"active":[1,3],"draft":[7]}
//! T_index.lock       (empty; flock target, never replaced)
//! ```
//!
//! Every mutation takes the document's lock, reloads it from disk, applies
//! the change and rewrites it via temp-file-then-rename. Mutations made by
//! other processes are therefore never overwritten, and readers always see
//! a whole document.

mod file;
mod primary;
mod secondary;
mod store;

pub use store::IndexStore;
