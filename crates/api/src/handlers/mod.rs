//! Request handlers.
//!
//! Handlers delegate persistence to repositories in `cmdexec_db` and run
//! control to the engine, mapping errors via [`AppError`](crate::error::AppError).

pub mod commands;
