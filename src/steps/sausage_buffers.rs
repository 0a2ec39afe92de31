//! Step 6: solve walkable network catchments ("sausage buffers") for every
//! parcel point.
//!
//! The heaviest step of the pipeline. Parcels are processed hex by hex
//! across the worker pool; within a hex, service areas are solved in groups
//! and the dissolved lines buffered into polygons. Completed hexes are
//! recorded in a progress table and skipped on re-run; within a hex, parcels
//! already buffered are diffed out so an interrupted hex resumes mid-way.

use std::time::Instant;

use async_trait::async_trait;
use indicatif::ProgressBar;
use tracing::{info, warn};

use crate::db::batch::{existing_keys, BatchInsert, OnConflict, SqlValue};
use crate::db::{self, quote_literal, DbConn};
use crate::error::Result;
use crate::pipeline::progress::{HexProgress, STATUS_COMPLETED, STATUS_ERROR};
use crate::pipeline::{Step, StepContext};
use crate::steps::{for_each_hex, hex_list};

const LOG_TABLE: &str = "log_hex_sausage_buffer";

pub struct SausageBuffers;

#[async_trait]
impl Step for SausageBuffers {
    fn seq(&self) -> u16 {
        6
    }

    fn slug(&self) -> &'static str {
        "sausage-buffers"
    }

    fn task(&self) -> &'static str {
        "Create sausage buffer walkable catchments for all parcel points"
    }

    fn outputs(&self) -> Vec<String> {
        vec!["sausagebuffer_1600".into(), "nh1600m".into()]
    }

    async fn run(&self, ctx: &StepContext) -> Result<()> {
        let distance = ctx.config.network.distance;
        let table = buffer_table(distance);
        let pid = ctx.config.parcels.id_column();
        let mut conn = ctx.conn()?;

        db::execute(
            &mut conn,
            &format!(
                "CREATE TABLE IF NOT EXISTS {table}
                   ({pid} varchar PRIMARY KEY,
                    geom geometry);"
            ),
        )?;
        let progress = HexProgress::new(LOG_TABLE);
        progress.ensure(&mut conn)?;
        let done = progress.completed(&mut conn)?;

        let hexes: Vec<i32> = hex_list(ctx)?
            .into_iter()
            .filter(|hex| !done.contains(hex))
            .collect();
        info!(
            distance,
            pending = hexes.len(),
            completed = done.len(),
            "solving sausage buffers"
        );

        let bar = ProgressBar::new(hexes.len() as u64);
        let worker_bar = bar.clone();
        let worker_table = table.clone();
        let failed = for_each_hex(ctx, hexes, move |ctx, hex| {
            let result = solve_hex(ctx, hex, &worker_table);
            worker_bar.inc(1);
            result
        })
        .await?;
        bar.finish_and_clear();
        if failed > 0 {
            warn!(failed, "hexes left incomplete; re-run this step to retry");
        }

        let nh = neighbourhood_table(distance);
        db::execute_all(
            &mut conn,
            &[
                format!(
                    "CREATE INDEX IF NOT EXISTS {table}_gix ON {table} USING GIST (geom);"
                ),
                format!("ANALYZE {table};"),
                format!("DROP TABLE IF EXISTS {nh};"),
                format!(
                    "CREATE TABLE {nh} AS
                     SELECT {pid}, ST_Area(geom)/10000.0 AS area_ha FROM {table};"
                ),
                format!("ALTER TABLE {nh} ADD PRIMARY KEY ({pid});"),
            ],
        )?;
        info!(
            buffers = db::table_count(&mut conn, &table)?,
            "sausage buffers complete"
        );
        Ok(())
    }
}

pub(crate) fn buffer_table(distance: i32) -> String {
    format!("sausagebuffer_{distance}")
}

pub(crate) fn neighbourhood_table(distance: i32) -> String {
    format!("nh{distance}m")
}

fn solve_hex(ctx: &StepContext, hex: i32, table: &str) -> Result<()> {
    let started = Instant::now();
    let mut conn = ctx.conn()?;
    let progress = HexProgress::new(LOG_TABLE);
    let outcome = buffer_hex(ctx, &mut conn, hex, table);
    let mins = started.elapsed().as_secs_f64() / 60.0;
    match outcome {
        Ok(count) => progress.record(&mut conn, hex, count, STATUS_COMPLETED, mins),
        Err(e) => {
            // Best effort: the worker error is what matters here.
            let _ = progress.record(&mut conn, hex, 0, STATUS_ERROR, mins);
            Err(e)
        }
    }
}

fn buffer_hex(ctx: &StepContext, conn: &mut DbConn, hex: i32, table: &str) -> Result<usize> {
    let pid = ctx.config.parcels.id_column();
    let parcels = &ctx.config.parcels.parcel_dwellings;

    let all = db::text_column(
        conn,
        &format!("SELECT {pid}::text AS value FROM {parcels} WHERE hex_id = {hex}"),
    )?;
    let done = existing_keys(
        conn,
        table,
        &pid,
        Some(&format!(
            "{pid} IN (SELECT {pid} FROM {parcels} WHERE hex_id = {hex})"
        )),
    )?;
    let pending: Vec<String> = all.into_iter().filter(|id| !done.contains(id)).collect();
    let total = pending.len() + done.len();

    for group in pending.chunks(ctx.config.network.group_by) {
        let lines = ctx
            .engine
            .service_area_lines(conn, group, ctx.config.network.distance)?;
        let mut batch = BatchInsert::new(
            table,
            &[&pid, "geom"],
            OnConflict::DoNothing { target: pid.clone() },
            ctx.config.network.sql_chunkify,
        );
        for line in lines {
            let geom = buffer_expr(
                &line.wkt,
                ctx.config.workspace.srid,
                ctx.config.network.line_buffer,
            );
            batch.push(conn, &[SqlValue::Text(line.point_id), SqlValue::Raw(geom)])?;
        }
        batch.flush(conn)?;
    }
    Ok(total)
}

/// Snap the dissolved service-area line to a 1 mm grid before buffering;
/// unsnapped line merges produce slivers of invalid geometry.
fn buffer_expr(wkt: &str, srid: i32, line_buffer: i32) -> String {
    format!(
        "ST_Buffer(ST_SnapToGrid(ST_GeomFromText({wkt},{srid}),0.001),{line_buffer})",
        wkt = quote_literal(wkt),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_follow_distance() {
        assert_eq!(buffer_table(1600), "sausagebuffer_1600");
        assert_eq!(neighbourhood_table(1600), "nh1600m");
        assert_eq!(buffer_table(800), "sausagebuffer_800");
    }

    #[test]
    fn buffer_expr_snaps_then_buffers() {
        let expr = buffer_expr("MULTILINESTRING((0 0,1 1))", 3111, 50);
        assert_eq!(
            expr,
            "ST_Buffer(ST_SnapToGrid(ST_GeomFromText('MULTILINESTRING((0 0,1 1))',3111),0.001),50)"
        );
    }
}
