//! Handler for the `status` command.

use diesel::pg::PgConnection;

use crate::cli::{output, ConfigPathArg};
use crate::config::Config;
use crate::db;
use crate::error::{Error, Result};
use crate::pipeline::script_label;
use crate::steps;

/// Execute the status command: report which step output tables exist.
pub fn execute(args: &ConfigPathArg) -> Result<()> {
    let config = Config::load(&args.config)?;
    let pool = db::create_pool(&config.database_url()?, 1)?;
    let mut conn = pool.get().map_err(Error::from)?;

    output::section(&format!(
        "{} @ {}:{}",
        config.postgresql.database, config.postgresql.host, config.postgresql.port
    ));

    for step in steps::registry() {
        let outputs = step.outputs();
        if outputs.is_empty() {
            continue;
        }
        output::note(&script_label(step.as_ref()));
        for table in outputs {
            match locate(&mut conn, &config, &table)? {
                Some((qualified, rows)) => {
                    output::table('✓', &qualified, format!("{rows} rows"));
                }
                None => {
                    output::table('○', &table, "not created");
                }
            }
        }
    }
    println!();
    Ok(())
}

/// Find a step output table in the public schema or the index schema.
fn locate(
    conn: &mut PgConnection,
    config: &Config,
    table: &str,
) -> Result<Option<(String, i64)>> {
    let candidates = [
        table.to_string(),
        format!("{}.{table}", config.workspace.uli_schema),
    ];
    for qualified in candidates {
        if db::table_exists(conn, &qualified)? {
            let rows = db::table_count(conn, &qualified)?;
            return Ok(Some((qualified, rows)));
        }
    }
    Ok(None)
}
