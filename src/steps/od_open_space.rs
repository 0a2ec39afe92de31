//! Step 9: distance from every parcel to its closest public open space,
//! solved twice: any open space, and large open space only.
//!
//! The large-park threshold (1.5 ha, i.e. 15000 m2) feeds the
//! `pos_greq15000m2_*` indicator family.

use std::time::Instant;

use async_trait::async_trait;
use indicatif::ProgressBar;
use tracing::{info, warn};

use crate::db::batch::{BatchInsert, OnConflict, SqlValue};
use crate::db::{self, DbConn};
use crate::error::Result;
use crate::pipeline::progress::{OdProgress, STATUS_COMPLETED, STATUS_ERROR};
use crate::pipeline::{Step, StepContext};
use crate::steps::{for_each_hex, hex_list};

pub const POS_ANY_TABLE: &str = "dist_cl_od_parcel_pos_all";
pub const POS_LARGE_TABLE: &str = "dist_cl_od_parcel_pos_gr15km2";
const LOG_TABLE: &str = "log_dist_cl_od_parcel_pos";

pub struct OdOpenSpace;

#[async_trait]
impl Step for OdOpenSpace {
    fn seq(&self) -> u16 {
        9
    }

    fn slug(&self) -> &'static str {
        "od-open-space"
    }

    fn task(&self) -> &'static str {
        "Create OD matrices of distance from parcels to closest public open space"
    }

    fn outputs(&self) -> Vec<String> {
        vec![POS_ANY_TABLE.into(), POS_LARGE_TABLE.into()]
    }

    async fn run(&self, ctx: &StepContext) -> Result<()> {
        let pid = ctx.config.parcels.id_column();
        let mut conn = ctx.conn()?;

        for table in [POS_ANY_TABLE, POS_LARGE_TABLE] {
            db::execute(
                &mut conn,
                &format!(
                    "CREATE TABLE IF NOT EXISTS {table}
                       ({pid} varchar PRIMARY KEY,
                        oid bigint,
                        distance integer);"
                ),
            )?;
        }
        let progress = OdProgress::new(LOG_TABLE);
        progress.ensure(&mut conn)?;

        // Two solves per hex: "pos_all" and "pos_large".
        let done = progress.completed(&mut conn, 2)?;
        let hexes: Vec<i32> = hex_list(ctx)?
            .into_iter()
            .filter(|hex| !done.contains(hex))
            .collect();
        info!(
            pending = hexes.len(),
            completed = done.len(),
            large_park_ha = ctx.config.pos.large_park_ha,
            "solving open space OD matrices"
        );

        let bar = ProgressBar::new(hexes.len() as u64);
        let worker_bar = bar.clone();
        let failed = for_each_hex(ctx, hexes, move |ctx, hex| {
            let result = solve_hex(ctx, hex);
            worker_bar.inc(1);
            result
        })
        .await?;
        bar.finish_and_clear();
        if failed > 0 {
            warn!(failed, "hexes left incomplete; re-run this step to retry");
        }

        info!(
            any = db::table_count(&mut conn, POS_ANY_TABLE)?,
            large = db::table_count(&mut conn, POS_LARGE_TABLE)?,
            "open space OD matrices complete"
        );
        Ok(())
    }
}

fn solve_hex(ctx: &StepContext, hex: i32) -> Result<()> {
    let pid = ctx.config.parcels.id_column();
    let mut conn = ctx.conn()?;
    let progress = OdProgress::new(LOG_TABLE);
    let variants = [
        ("pos_all", POS_ANY_TABLE, 0.0),
        ("pos_large", POS_LARGE_TABLE, ctx.config.pos.large_park_ha),
    ];

    for (label, table, min_area_ha) in variants {
        let started = Instant::now();
        let outcome = solve_variant(ctx, &mut conn, hex, table, min_area_ha, &pid);
        let mins = started.elapsed().as_secs_f64() / 60.0;
        match outcome {
            Ok(rows) => {
                progress.record(&mut conn, hex, label, rows, STATUS_COMPLETED, mins)?;
            }
            Err(e) => {
                let _ = progress.record(&mut conn, hex, label, 0, STATUS_ERROR, mins);
                return Err(e);
            }
        }
    }
    Ok(())
}

fn solve_variant(
    ctx: &StepContext,
    conn: &mut DbConn,
    hex: i32,
    table: &str,
    min_area_ha: f64,
    pid: &str,
) -> Result<usize> {
    let rows = ctx.engine.closest_open_space(conn, hex, min_area_ha)?;
    let mut batch = BatchInsert::new(
        table,
        &[pid, "oid", "distance"],
        OnConflict::DoNothing {
            target: pid.to_string(),
        },
        ctx.config.network.sql_chunkify,
    );
    let count = rows.len();
    for row in rows {
        batch.push(
            conn,
            &[
                SqlValue::Text(row.point_id),
                SqlValue::Int(row.dest_oid),
                SqlValue::Int(i64::from(row.distance_m)),
            ],
        )?;
    }
    batch.flush(conn)?;
    Ok(count)
}
