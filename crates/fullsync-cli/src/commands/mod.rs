//! Subcommand implementations.

pub mod cancel;
pub mod reindexing;
pub mod status;
pub mod sync;
