//! Handler for the `run` command.

use std::sync::Arc;

use tokio::signal;
use tracing::{error, info};

use crate::cli::RunArgs;
use crate::config::Config;
use crate::db;
use crate::error::Result;
use crate::gis::postgis::PostgisEngine;
use crate::pipeline::runner::{self, Selection};
use crate::pipeline::StepContext;
use crate::steps;

/// Execute the run command.
pub async fn execute(args: &RunArgs) -> Result<()> {
    let mut config = Config::load(&args.config)?;

    // Apply CLI overrides
    if let Some(workers) = args.workers {
        config.network.workers = workers;
    }
    if let Some(ref level) = args.log_level {
        config.logging.level = level.clone();
    }
    if args.json_logs {
        config.logging.format = "json".to_string();
    }

    config.init_logging();

    let pool = db::create_pool(&config.database_url()?, config.postgresql.pool_size)?;
    let engine = Arc::new(PostgisEngine::from_config(&config));
    let ctx = StepContext::new(config, pool, engine);

    let registry = steps::registry();
    let selection = Selection {
        from: args.from.clone(),
        to: args.to.clone(),
        only: args.only.clone(),
    };
    let selected = runner::select(&registry, &selection)?;
    info!(
        database = %ctx.config.postgresql.database,
        steps = selected.len(),
        "liveability pipeline starting"
    );

    tokio::select! {
        result = runner::run(&ctx, &selected) => {
            if let Err(e) = result {
                error!(error = %e, "pipeline aborted");
                return Err(e);
            }
        }
        _ = signal::ctrl_c() => {
            info!("shutdown signal received; steps resume from their progress tables");
        }
    }

    info!("liveability pipeline stopped");
    Ok(())
}
