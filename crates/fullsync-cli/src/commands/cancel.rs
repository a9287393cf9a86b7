//! Cancel command - abandon the run in progress.

use crate::app::App;
use std::io::{self, Write};

/// Run the cancel command.
pub fn run(app: &App, skip_confirm: bool) -> anyhow::Result<()> {
    let mut manager = app.manager.lock();

    if !manager.resume()? {
        println!("No sync in progress. Nothing to cancel.");
        return Ok(());
    }

    if !skip_confirm {
        print!("This will abandon the sync in progress. Are you sure? [y/N] ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    manager.cancel()?;
    println!("Sync abandoned. Partially rebuilt indexes are left as they are.");

    Ok(())
}
