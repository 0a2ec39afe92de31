//! Handler for the `log` command.

use crate::cli::{output, LogArgs};
use crate::config::Config;
use crate::error::Result;
use crate::pipeline::runlog;

/// Execute the log command.
pub fn execute(args: &LogArgs) -> Result<()> {
    let config = Config::load(&args.config)?;
    let path = config.data.folder_path.join("script_running_log.csv");

    let rows = runlog::tail(&path, args.rows)?;
    if rows.is_empty() {
        output::note(&format!("No run log at {}", path.display()));
        return Ok(());
    }

    output::section(&format!("Run log: {}", path.display()));
    for row in rows {
        println!(
            "{}  {:<34} {:>8.2} min  {}",
            row.datetime_completed, row.script, row.duration_mins, row.task
        );
    }
    println!();
    Ok(())
}
