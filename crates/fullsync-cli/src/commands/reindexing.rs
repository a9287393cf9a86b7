//! Reindexing command - ask whether an index is being rebuilt.

use crate::app::App;
use fullsync_core::TenantId;

/// Run the reindexing command.
///
/// Prints `true` or `false` so the answer can be used from scripts.
pub fn run(app: &App, indexable: &str, tenant: Option<u64>) -> anyhow::Result<()> {
    let mut manager = app.manager.lock();
    manager.resume()?;

    let reindexing = manager.is_full_reindexing(indexable, tenant.map(TenantId::new));
    println!("{}", reindexing);

    Ok(())
}
