//! Query Module
//!
//! Fluent builder over a [`Database`](crate::Database).
//!
//! ## Flow
//! ```text
//! db.query()
//!   .table("users")            ← resets builder state
//!   .where_("age", ">", 30)    ← AND-ed predicates
//!   .order_by("name", Asc)     ┐
//!   .limit(10).offset(20)      ┘ applied in memory after the engine
//!   .find()                    ← terminal: runs, then resets state
//! ```
//!
//! `update`/`delete` resolve matching ids with an unlimited find, then use
//! the single-record operation for one match and the bulk operation for
//! several.

mod builder;
mod order;

pub use builder::QueryHandler;
pub use order::{compare_by_field, SortDirection};
