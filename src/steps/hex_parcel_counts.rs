//! Step 5: summarise parcel counts per hex.
//!
//! The hex grid partitions parcels into units of work for the parallel
//! steps; the count table also records cumulative frequency and percentile
//! so operators can see how skewed the workload is.

use async_trait::async_trait;
use tracing::info;

use crate::db;
use crate::error::Result;
use crate::pipeline::{Step, StepContext};

pub struct HexParcelCounts;

#[async_trait]
impl Step for HexParcelCounts {
    fn seq(&self) -> u16 {
        5
    }

    fn slug(&self) -> &'static str {
        "hex-parcel-counts"
    }

    fn task(&self) -> &'static str {
        "Create table summarising parcel counts and workload share per hex"
    }

    fn outputs(&self) -> Vec<String> {
        vec!["parcel_hex_count".into()]
    }

    async fn run(&self, ctx: &StepContext) -> Result<()> {
        let mut conn = ctx.conn()?;
        let parcels = &ctx.config.parcels.parcel_dwellings;

        db::execute_all(
            &mut conn,
            &[
                "DROP TABLE IF EXISTS parcel_hex_count;".to_string(),
                format!(
                    "CREATE TABLE parcel_hex_count AS
                     WITH counts AS (
                       SELECT hex_id AS hex, COUNT(*)::integer AS parcels
                         FROM {parcels}
                        GROUP BY hex_id
                     )
                     SELECT hex,
                            parcels,
                            SUM(parcels) OVER (ORDER BY parcels DESC, hex) AS cumfreq,
                            round((100 * cume_dist() OVER (ORDER BY parcels DESC, hex))::numeric, 1)
                              AS percentile
                       FROM counts
                      ORDER BY parcels DESC;"
                ),
                "ALTER TABLE parcel_hex_count ADD PRIMARY KEY (hex);".to_string(),
            ],
        )?;
        info!(
            hexes = db::table_count(&mut conn, "parcel_hex_count")?,
            "parcel_hex_count created"
        );
        Ok(())
    }
}
