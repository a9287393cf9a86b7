//! # fullsync Core Library
//!
//! This crate provides a resumable, checkpointed orchestrator that fully
//! reindexes content collections ("indexables") into a search backend,
//! across one or many tenants. All backend, content and tenant specifics are
//! abstracted behind traits.
//!
//! ## Architecture
//!
//! - **Types** (`types`): Run state, work items, tenants
//! - **Collaborators** (`backend`): Indexable, registry and tenant traits
//! - **Checkpoint** (`checkpoint`): Durable storage of the run state
//! - **Hooks** (`hooks`): Observer and override points per phase
//! - **Progress** (`progress`): Progress events and sinks
//! - **Sync** (`sync`): The run-state machine
//! - **Config** (`config`): Configuration management
//!
//! ## Example
//!
//! ```rust,ignore
//! use fullsync_core::{LoggingProgress, SyncArgs, SyncManager, Tick};
//!
//! let mut manager = SyncManager::new(registry, tenants, store, &config.sync);
//! manager.begin(SyncArgs::default().with_put_mapping(true))?;
//!
//! // One tick per request; the run resumes from its checkpoint each time
//! while manager.tick(&LoggingProgress)? != Tick::Finished {}
//! ```

pub mod backend;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod hooks;
pub mod progress;
pub mod report;
pub mod sync;
pub mod types;

// Re-export commonly used types
pub use backend::{
    BulkItem, BulkItemError, BulkResponse, ContentObject, Indexable, IndexableRegistry, Labels,
    QueryArgs, QueryResult, SingleTenant, StaticRegistry, TenantDirectory, TenantScope,
};
pub use checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use config::Config;
pub use error::{Result, SyncError};
pub use hooks::{NoopHooks, SyncHooks};
pub use progress::{ChannelProgress, LoggingProgress, ProgressEvent, ProgressSink, ProgressStatus};
pub use sync::{SharedSyncManager, SyncManager, Tick};
pub use types::{RunState, SyncArgs, SyncReport, SyncTotals, Tenant, TenantId, TenantRef, WorkItem};
