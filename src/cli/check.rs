//! Handlers for the `check` diagnostic subcommands.

use std::path::Path;

use diesel::pg::PgConnection;

use crate::cli::output;
use crate::config::Config;
use crate::db;
use crate::error::{Error, Result};

/// Validate the configuration file without touching the database.
pub fn execute_config<P: AsRef<Path>>(config_path: P) -> Result<()> {
    let path = config_path.as_ref();
    output::note(&format!("Checking configuration: {}", path.display()));

    let config = Config::load(path)?;
    output::ok("Configuration file is valid");

    output::section("Summary");
    output::key_value("Database", &config.postgresql.database);
    output::key_value(
        "Host",
        format!("{}:{}", config.postgresql.host, config.postgresql.port),
    );
    output::key_value("Study region", &config.data.study_region);
    output::key_value("SRID", config.workspace.srid);
    output::key_value(
        "Catchment",
        format!("{} m walkable network distance", config.network.distance),
    );
    output::key_value("Destinations", config.destinations.classes.len());
    output::key_value("Workers", config.network.workers);
    println!();

    if config.postgresql.password.is_some() {
        output::ok("Database password set in config");
    } else if std::env::var("PGPASSWORD").is_ok() {
        output::ok("Database password found in PGPASSWORD");
    } else {
        output::warn("No database password configured");
        output::note("  Set postgresql.password or the PGPASSWORD environment variable");
    }

    if !config.data.folder_path.is_dir() {
        output::warn(&format!(
            "Data folder does not exist: {}",
            config.data.folder_path.display()
        ));
    }

    println!();
    output::note("Configuration is ready to use.");
    Ok(())
}

/// Test the database connection and the spatial extensions.
pub fn execute_database<P: AsRef<Path>>(config_path: P) -> Result<()> {
    let config = Config::load(config_path)?;

    output::progress(&format!("Connecting to {}", config.postgresql.database));
    let pool = db::create_pool(&config.database_url()?, 1)?;
    let mut conn = match pool.get() {
        Ok(conn) => {
            output::progress_done(true);
            conn
        }
        Err(e) => {
            output::progress_done(false);
            output::note("  Run 'liveability run --only create-database' to create it");
            return Err(Error::from(e));
        }
    };

    for extension in ["postgis", "pgrouting"] {
        let installed = db::scalar_count(
            &mut conn,
            &format!(
                "SELECT COUNT(*) AS count FROM pg_extension WHERE extname = {}",
                db::quote_literal(extension)
            ),
        )? > 0;
        if installed {
            output::ok(&format!("Extension {extension} installed"));
        } else {
            output::warn(&format!("Extension {extension} missing"));
        }
    }
    Ok(())
}

/// Verify the routable network, parcel and hex grid source tables.
pub fn execute_network<P: AsRef<Path>>(config_path: P) -> Result<()> {
    let config = Config::load(config_path)?;
    let pool = db::create_pool(&config.database_url()?, 1)?;
    let mut conn = pool.get().map_err(Error::from)?;

    let tables = [
        ("network edges", config.roads.network_edges.clone()),
        ("network nodes", config.roads.network_nodes.clone()),
        ("road lines", config.roads.road_lines.clone()),
        ("parcels", config.parcels.parcel_dwellings.clone()),
        ("hex grid", config.workspace.hex_grid.clone()),
        ("destinations", config.destinations.study_destinations.clone()),
        ("open space", config.pos.areas.clone()),
        ("meshblocks", config.data.meshblocks.clone()),
    ];
    let mut missing = 0;
    for (label, table) in tables {
        if report_table(&mut conn, label, &table)? {
            missing += 1;
        }
    }

    if missing == 0 {
        println!();
        output::note("All source tables are present.");
    }
    Ok(())
}

fn report_table(conn: &mut PgConnection, label: &str, table: &str) -> Result<bool> {
    if db::table_exists(conn, table)? {
        let rows = db::table_count(conn, table)?;
        if rows > 0 {
            output::ok(&format!("{label}: {table} ({rows} rows)"));
            return Ok(false);
        }
        output::warn(&format!("{label}: {table} is empty"));
    } else {
        output::warn(&format!("{label}: {table} not found"));
    }
    Ok(true)
}
