//! Application state management.

use crate::local::LocalConfig;
use fullsync_core::{
    Config, FileCheckpointStore, ProgressEvent, ProgressSink, SharedSyncManager, SyncManager,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state.
pub struct App {
    /// Configuration
    pub config: Config,

    /// Local backend configuration
    pub local: LocalConfig,

    /// Checkpoint directory
    pub state_dir: PathBuf,

    /// The sync orchestrator
    pub manager: SharedSyncManager,
}

impl App {
    /// Create a new application instance.
    pub fn new(config: Config, local: LocalConfig) -> anyhow::Result<Self> {
        let state_dir = config.state_dir()?;
        let store = Arc::new(FileCheckpointStore::new(&state_dir));
        let (tenants, registry) = local.build();

        let manager =
            SyncManager::new(Arc::new(registry), tenants, store, &config.sync).into_shared();

        info!(
            state_dir = %state_dir.display(),
            content_dir = %local.content_dir.display(),
            index_dir = %local.index_dir.display(),
            multi_tenant = local.multi_tenant,
            "Application initialized"
        );

        Ok(App {
            config,
            local,
            state_dir,
            manager,
        })
    }
}

/// Prints progress events to the terminal and mirrors them to the log.
pub struct ConsoleProgress {
    quiet: bool,
}

impl ConsoleProgress {
    pub fn new(quiet: bool) -> Self {
        ConsoleProgress { quiet }
    }
}

impl ProgressSink for ConsoleProgress {
    fn report(&self, event: &ProgressEvent) {
        if event.is_error() {
            warn!(message = %event.message, "Sync error");
            eprintln!("✗ {}", event.message);
        } else if !self.quiet {
            println!("✓ {}", event.message);
        }
    }
}
