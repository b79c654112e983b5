//! Domain logic for the cmdexec script execution service.
//!
//! Everything here is free of database access: command lifecycle types,
//! shebang validation, the on-disk script store, and the subprocess
//! supervisor that drives a single run against a [`CommandSink`].
//!
//! [`CommandSink`]: scripting::sink::CommandSink

pub mod command;
pub mod error;
pub mod scripting;
pub mod types;
