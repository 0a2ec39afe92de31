//! Step 8: count of each destination class reachable within its cutoff
//! distance of every parcel.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use indicatif::ProgressBar;
use tracing::{info, warn};

use crate::config::DestinationClass;
use crate::db::batch::{BatchInsert, OnConflict, SqlValue};
use crate::db::{self, DbConn};
use crate::error::Result;
use crate::pipeline::progress::{OdProgress, STATUS_COMPLETED, STATUS_ERROR};
use crate::pipeline::{Step, StepContext};
use crate::steps::od_closest::active_classes;
use crate::steps::{for_each_hex, hex_list};

const TABLE: &str = "parcel_dest_counts";
const LOG_TABLE: &str = "log_parcel_dest_counts";

pub struct OdDestinationCounts;

#[async_trait]
impl Step for OdDestinationCounts {
    fn seq(&self) -> u16 {
        8
    }

    fn slug(&self) -> &'static str {
        "od-destination-counts"
    }

    fn task(&self) -> &'static str {
        "Count destinations of each class within cutoff distance of each parcel"
    }

    fn outputs(&self) -> Vec<String> {
        vec![TABLE.into()]
    }

    async fn run(&self, ctx: &StepContext) -> Result<()> {
        let pid = ctx.config.parcels.id_column();
        let mut conn = ctx.conn()?;

        db::execute(
            &mut conn,
            &format!(
                "CREATE TABLE IF NOT EXISTS {TABLE}
                   ({pid} varchar NOT NULL,
                    dest smallint NOT NULL,
                    count integer,
                    PRIMARY KEY ({pid}, dest));"
            ),
        )?;
        let progress = OdProgress::new(LOG_TABLE);
        progress.ensure(&mut conn)?;

        let classes = Arc::new(active_classes(ctx, &mut conn)?);
        let done = progress.completed(&mut conn, classes.len())?;
        let hexes: Vec<i32> = hex_list(ctx)?
            .into_iter()
            .filter(|hex| !done.contains(hex))
            .collect();
        info!(
            classes = classes.len(),
            pending = hexes.len(),
            completed = done.len(),
            "counting destinations within cutoffs"
        );

        let bar = ProgressBar::new(hexes.len() as u64);
        let worker_bar = bar.clone();
        let worker_classes = Arc::clone(&classes);
        let failed = for_each_hex(ctx, hexes, move |ctx, hex| {
            let result = count_hex(ctx, hex, &worker_classes);
            worker_bar.inc(1);
            result
        })
        .await?;
        bar.finish_and_clear();
        if failed > 0 {
            warn!(failed, "hexes left incomplete; re-run this step to retry");
        }

        db::execute(&mut conn, &format!("ANALYZE {TABLE};"))?;
        info!(
            rows = db::table_count(&mut conn, TABLE)?,
            "destination counts complete"
        );
        Ok(())
    }
}

fn count_hex(ctx: &StepContext, hex: i32, classes: &[DestinationClass]) -> Result<()> {
    let pid = ctx.config.parcels.id_column();
    let mut conn = ctx.conn()?;
    let progress = OdProgress::new(LOG_TABLE);

    for class in classes {
        let started = Instant::now();
        let outcome = count_class(ctx, &mut conn, hex, class, &pid);
        let mins = started.elapsed().as_secs_f64() / 60.0;
        match outcome {
            Ok(rows) => {
                progress.record(&mut conn, hex, &class.name, rows, STATUS_COMPLETED, mins)?;
            }
            Err(e) => {
                let _ = progress.record(&mut conn, hex, &class.name, 0, STATUS_ERROR, mins);
                return Err(e);
            }
        }
    }
    Ok(())
}

fn count_class(
    ctx: &StepContext,
    conn: &mut DbConn,
    hex: i32,
    class: &DestinationClass,
    pid: &str,
) -> Result<usize> {
    let rows = ctx.engine.destination_counts(conn, hex, class)?;
    let mut batch = BatchInsert::new(
        TABLE,
        &[pid, "dest", "count"],
        OnConflict::DoNothing {
            target: format!("{pid},dest"),
        },
        ctx.config.network.sql_chunkify,
    );
    let count = rows.len();
    for row in rows {
        batch.push(
            conn,
            &[
                SqlValue::Text(row.point_id),
                SqlValue::Int(i64::from(class.code)),
                SqlValue::Int(i64::from(row.count)),
            ],
        )?;
    }
    batch.flush(conn)?;
    Ok(count)
}
