//! Step 11: street connectivity, as cleaned intersections per square
//! kilometre of each parcel's walkable neighbourhood.
//!
//! Loads the cleaned (legs >= 3, merged within 12 m) intersection points
//! from CSV, then counts them inside each sausage buffer.

use std::path::Path;

use async_trait::async_trait;
use diesel::PgConnection;
use tracing::info;

use crate::db::batch::{BatchInsert, OnConflict, SqlValue};
use crate::db;
use crate::error::{Error, Result};
use crate::pipeline::{Step, StepContext};
use crate::steps::sausage_buffers::{buffer_table, neighbourhood_table};

const INTERSECTIONS_TABLE: &str = "cleaned_intersections";

pub struct StreetConnectivity;

#[async_trait]
impl Step for StreetConnectivity {
    fn seq(&self) -> u16 {
        11
    }

    fn slug(&self) -> &'static str {
        "street-connectivity"
    }

    fn task(&self) -> &'static str {
        "Load cleaned intersections and create street connectivity table"
    }

    fn outputs(&self) -> Vec<String> {
        vec![INTERSECTIONS_TABLE.into(), "street_connectivity".into()]
    }

    async fn run(&self, ctx: &StepContext) -> Result<()> {
        let mut conn = ctx.conn()?;
        let distance = ctx.config.network.distance;
        let pid = ctx.config.parcels.id_column();
        let srid = ctx.config.workspace.srid;
        let buffers = buffer_table(distance);
        let nh = neighbourhood_table(distance);

        let path = ctx
            .config
            .data
            .folder_path
            .join(&ctx.config.roads.intersections);
        db::execute_all(
            &mut conn,
            &[
                format!("DROP TABLE IF EXISTS {INTERSECTIONS_TABLE};"),
                format!(
                    "CREATE TABLE {INTERSECTIONS_TABLE}
                       (id integer PRIMARY KEY,
                        x double precision NOT NULL,
                        y double precision NOT NULL);"
                ),
            ],
        )?;
        let loaded = load_intersections(&mut conn, &path, ctx.config.network.sql_chunkify)?;
        db::execute_all(
            &mut conn,
            &[
                format!("ALTER TABLE {INTERSECTIONS_TABLE} ADD COLUMN geom geometry;"),
                format!(
                    "UPDATE {INTERSECTIONS_TABLE}
                        SET geom = ST_SetSRID(ST_MakePoint(x, y), {srid});"
                ),
                format!(
                    "CREATE INDEX {INTERSECTIONS_TABLE}_gix
                         ON {INTERSECTIONS_TABLE} USING GIST (geom);"
                ),
                format!("ANALYZE {INTERSECTIONS_TABLE};"),
            ],
        )?;
        info!(intersections = loaded, "cleaned intersections loaded");

        db::execute_all(
            &mut conn,
            &[
                "DROP TABLE IF EXISTS street_connectivity;".to_string(),
                format!(
                    "CREATE TABLE street_connectivity AS
                     SELECT b.{pid},
                            COUNT(i.id) / (nh.area_ha / 100.0) AS sc_nh{distance}m
                       FROM {buffers} b
                       JOIN {nh} nh ON nh.{pid} = b.{pid}
                       LEFT JOIN {INTERSECTIONS_TABLE} i ON ST_Intersects(i.geom, b.geom)
                      GROUP BY b.{pid}, nh.area_ha;"
                ),
                format!("ALTER TABLE street_connectivity ADD PRIMARY KEY ({pid});"),
            ],
        )?;
        info!(
            rows = db::table_count(&mut conn, "street_connectivity")?,
            "street_connectivity created"
        );
        Ok(())
    }
}

/// Load the `id,x,y` intersection CSV.
fn load_intersections(conn: &mut PgConnection, path: &Path, chunk_size: usize) -> Result<usize> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| Error::Parse(format!("{}: {e}", path.display())))?;
    let mut batch = BatchInsert::new(
        INTERSECTIONS_TABLE,
        &["id", "x", "y"],
        OnConflict::DoNothing {
            target: "id".into(),
        },
        chunk_size,
    );
    for record in reader.records() {
        let record = record?;
        let field = |i: usize| -> Result<&str> {
            record
                .get(i)
                .ok_or_else(|| Error::Parse(format!("{}: short row", path.display())))
        };
        let id: i64 = field(0)?
            .trim()
            .parse()
            .map_err(|e| Error::Parse(format!("{}: id: {e}", path.display())))?;
        let x: f64 = field(1)?
            .trim()
            .parse()
            .map_err(|e| Error::Parse(format!("{}: x: {e}", path.display())))?;
        let y: f64 = field(2)?
            .trim()
            .parse()
            .map_err(|e| Error::Parse(format!("{}: y: {e}", path.display())))?;
        batch.push(
            conn,
            &[SqlValue::Int(id), SqlValue::Float(x), SqlValue::Float(y)],
        )?;
    }
    batch.flush(conn)?;
    Ok(batch.inserted())
}
