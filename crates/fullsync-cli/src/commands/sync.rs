//! Sync command - start or resume a full sync.

use crate::app::{App, ConsoleProgress};
use fullsync_core::{SyncArgs, Tick};
use serde_json::Value;
use std::time::Instant;

/// Run the sync command.
pub fn run(
    app: &App,
    put_mapping: bool,
    indexables: Vec<String>,
    steps: Option<usize>,
    options: Vec<(String, String)>,
    quiet: bool,
) -> anyhow::Result<()> {
    let mut args = SyncArgs::default().with_put_mapping(put_mapping);
    if !indexables.is_empty() {
        args = args.with_indexables(indexables);
    }
    for (key, value) in options {
        args = args.with_extra(key, Value::String(value));
    }

    let sink = ConsoleProgress::new(quiet);
    let mut manager = app.manager.lock();

    if manager.begin(args)? {
        println!("Resuming interrupted sync...");
    } else if put_mapping {
        println!("Starting full sync (indexes will be recreated)...");
    } else {
        println!("Starting full sync...");
    }

    let start = Instant::now();
    let mut taken = 0;
    let finished = loop {
        if steps.is_some_and(|limit| taken >= limit) {
            break false;
        }
        match manager.tick(&sink)? {
            Tick::Step | Tick::Alias => taken += 1,
            Tick::Finished | Tick::Idle => break true,
        }
    };
    let elapsed = start.elapsed();

    println!();
    if !finished {
        println!("Paused after {} steps. Run 'fullsync sync' to continue.", taken);
        return Ok(());
    }

    let Some(report) = manager.last_sync_report()? else {
        return Ok(());
    };

    println!("Sync complete!");
    println!("  Synced:  {}", report.totals.synced);
    println!("  Skipped: {}", report.totals.skipped);
    println!("  Failed:  {}", report.totals.failed);
    println!("  Errors:  {}", report.totals.errors);
    println!("  Steps:   {}", taken);
    println!("  Time:    {:.2}s", elapsed.as_secs_f64());

    Ok(())
}
