//! Step 7: origin-destination matrix of network distance from every parcel
//! to the closest destination of each class.
//!
//! Output rows are keyed (parcel, destination class); progress is logged per
//! (hex, class) so an interrupted run resumes with only the missing solves.

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
use crate::steps::{for_each_hex, hex_list};

const TABLE: &str = "dist_cl_od_parcel_dest";
const LOG_TABLE: &str = "log_dist_cl_od_parcel_dest";

pub struct OdClosestDestinations;

#[async_trait]
impl Step for OdClosestDestinations {
    fn seq(&self) -> u16 {
        7
    }

    fn slug(&self) -> &'static str {
        "od-closest-destinations"
    }

    fn task(&self) -> &'static str {
        "Create OD matrix of distance from parcels to closest destination of each class"
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
                    oid bigint,
                    distance integer,
                    PRIMARY KEY ({pid}, dest));"
            ),
        )?;
        let progress = OdProgress::new(LOG_TABLE);
        progress.ensure(&mut conn)?;

        // Classes with no features in the study region have nothing to
        // solve; recording them would block hex completion forever.
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
            "solving closest-destination OD matrix"
        );

        let bar = ProgressBar::new(hexes.len() as u64);
        let worker_bar = bar.clone();
        let worker_classes = Arc::clone(&classes);
        let failed = for_each_hex(ctx, hexes, move |ctx, hex| {
            let result = solve_hex(ctx, hex, &worker_classes);
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
            "closest-destination OD matrix complete"
        );
        Ok(())
    }
}

/// Destination classes with at least one feature in the study region.
pub(crate) fn active_classes(
    ctx: &StepContext,
    conn: &mut DbConn,
) -> Result<Vec<DestinationClass>> {
    let mut active = Vec::new();
    for class in &ctx.config.destinations.classes {
        let count = db::scalar_count(
            conn,
            &format!(
                "SELECT COUNT(*) AS count FROM {dests} WHERE dest_class = {code}",
                dests = ctx.config.destinations.study_destinations,
                code = class.code
            ),
        )?;
        if count > 0 {
            active.push(class.clone());
        } else {
            warn!(class = %class.name, "destination class has no features; skipping");
        }
    }
    Ok(active)
}

fn solve_hex(ctx: &StepContext, hex: i32, classes: &[DestinationClass]) -> Result<()> {
    let pid = ctx.config.parcels.id_column();
    let mut conn = ctx.conn()?;
    let progress = OdProgress::new(LOG_TABLE);

    for class in classes {
        let started = Instant::now();
        let outcome = solve_class(ctx, &mut conn, hex, class, &pid);
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

fn solve_class(
    ctx: &StepContext,
    conn: &mut DbConn,
    hex: i32,
    class: &DestinationClass,
    pid: &str,
) -> Result<usize> {
    let rows = ctx.engine.closest_destinations(conn, hex, class)?;
    let mut batch = BatchInsert::new(
        TABLE,
        &[pid, "dest", "oid", "distance"],
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
                SqlValue::Int(row.dest_oid),
                SqlValue::Int(i64::from(row.distance_m)),
            ],
        )?;
    }
    batch.flush(conn)?;
    Ok(count)
}
