//! Script intake validation, storage and subprocess supervision.
//!
//! All subprocess management is pure (no DB access). The store is reached
//! only through the [`sink::CommandSink`] trait, which the API crate
//! implements over PostgreSQL.

pub mod shebang;
pub mod sink;
pub mod storage;
pub mod supervisor;
