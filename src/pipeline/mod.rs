//! Pipeline core: the step abstraction, shared context, run-log and
//! progress helpers.

pub mod progress;
pub mod runlog;
pub mod runner;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::db::{DbConn, DbPool};
use crate::error::Result;
use crate::gis::NetworkEngine;

/// Shared context handed to every step.
///
/// Cheap to clone: workers of the parallel steps each take a clone and check
/// their own connection out of the pool.
#[derive(Clone)]
pub struct StepContext {
    pub config: Config,
    pub pool: DbPool,
    pub engine: Arc<dyn NetworkEngine>,
    /// Path of the shared `script_running_log.csv`.
    pub run_log: PathBuf,
}

impl StepContext {
    pub fn new(config: Config, pool: DbPool, engine: Arc<dyn NetworkEngine>) -> Self {
        let run_log = config.data.folder_path.join("script_running_log.csv");
        Self {
            config,
            pool,
            engine,
            run_log,
        }
    }

    /// Check a connection out of the pool.
    pub fn conn(&self) -> Result<DbConn> {
        self.pool.get().map_err(Into::into)
    }
}

/// One stage of the pipeline.
///
/// Steps are ordered by sequence number and are idempotent per run: each
/// either drops and recreates its output tables, or resumes by skipping keys
/// already present.
#[async_trait]
pub trait Step: Send + Sync {
    /// Position in the pipeline; ordering is load-bearing.
    fn seq(&self) -> u16;

    /// Stable kebab-case identifier, usable from the CLI.
    fn slug(&self) -> &'static str;

    /// Human description recorded in the run log.
    fn task(&self) -> &'static str;

    /// Output tables this step owns, for `status` reporting.
    fn outputs(&self) -> Vec<String> {
        Vec::new()
    }

    async fn run(&self, ctx: &StepContext) -> Result<()>;
}

/// `NN_slug` label used in logs and the run-log script column.
pub fn script_label(step: &dyn Step) -> String {
    format!("{:02}_{}", step.seq(), step.slug().replace('-', "_"))
}
