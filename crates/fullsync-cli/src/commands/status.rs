//! Status command - show the run in progress and the last report.

use crate::app::App;
use crate::OutputFormat;
use serde_json::json;

/// Run the status command.
pub fn run(app: &App, output: OutputFormat) -> anyhow::Result<()> {
    let mut manager = app.manager.lock();
    manager.resume()?;

    let last_sync = manager.last_sync_time()?;
    let last_report = manager.last_sync_report()?;

    if let OutputFormat::Json = output {
        let status = json!({
            "running": manager.is_running(),
            "state": manager.state(),
            "last_sync": last_sync,
            "last_report": last_report,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("fullsync Status");
    println!("===============");
    println!();

    match manager.state() {
        Some(state) => {
            println!("Run in progress:");
            println!(
                "  Started:     {}",
                state.started_at.format("%Y-%m-%d %H:%M:%S")
            );
            println!("  Recreate:    {}", state.args.put_mapping);
            match &state.current {
                Some(item) => println!(
                    "  Current:     {} ({}/{})",
                    item, state.offset, state.found_items
                ),
                None => println!("  Current:     -"),
            }
            println!("  Queued:      {} items", state.queue.len());
            for item in &state.queue {
                println!("    - {}", item);
            }
            if !state.alias_backlog.is_empty() {
                println!("  Aliases:     {}", state.alias_backlog.join(", "));
            }
            println!(
                "  So far:      {} synced, {} skipped, {} failed, {} errors",
                state.totals.synced, state.totals.skipped, state.totals.failed, state.totals.errors
            );
        }
        None => println!("No sync in progress. Run 'fullsync sync' to start one."),
    }

    println!();
    match last_sync {
        Some(at) => println!("Last sync started: {}", at.format("%Y-%m-%d %H:%M:%S")),
        None => println!("Never synced."),
    }

    if let Some(report) = last_report {
        println!("Last completed run:");
        println!(
            "  Finished:    {}",
            report.finished_at.format("%Y-%m-%d %H:%M:%S")
        );
        println!("  Duration:    {}s", report.duration().num_seconds());
        println!(
            "  Totals:      {} synced, {} skipped, {} failed, {} errors",
            report.totals.synced, report.totals.skipped, report.totals.failed, report.totals.errors
        );
    }

    println!();
    println!("Page size:       {}", app.config.sync.per_page);
    println!("Index directory: {}", app.local.index_dir.display());
    println!("State directory: {}", app.state_dir.display());

    Ok(())
}
