//! Command execution engine.
//!
//! Intake hands committed command ids to the [`Dispatcher`]; the
//! [`Executor`] consumes them, starts one supervised run per id and keeps
//! a cancellation handle for each in the [`RunRegistry`].

pub mod executor;
pub mod queue;
pub mod recovery;
pub mod registry;
pub mod store;

pub use executor::Executor;
pub use queue::{dispatch_queue, DispatchError, DispatchReceiver, Dispatcher};
pub use registry::RunRegistry;
pub use store::PgCommandSink;

/// Executor backed by PostgreSQL, as wired up in `main`.
pub type CommandExecutor = Executor<PgCommandSink>;
