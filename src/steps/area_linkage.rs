//! Step 3: link parcels to the ABS statistical area hierarchy and to
//! suburb and LGA boundaries.
//!
//! `parcelmb` carries the parcel to meshblock link used by almost every
//! later join; `abs_linkage` restates the meshblock hierarchy for meshblocks
//! that actually contain parcels; `non_abs_linkage` resolves suburb and LGA
//! by point-in-polygon, since those boundaries do not nest in the ABS
//! hierarchy.

use async_trait::async_trait;
use tracing::info;

use crate::db;
use crate::error::Result;
use crate::pipeline::{Step, StepContext};

pub struct AreaLinkage;

#[async_trait]
impl Step for AreaLinkage {
    fn seq(&self) -> u16 {
        3
    }

    fn slug(&self) -> &'static str {
        "area-linkage"
    }

    fn task(&self) -> &'static str {
        "Create parcel to meshblock, ABS hierarchy and suburb/LGA linkage tables"
    }

    fn outputs(&self) -> Vec<String> {
        vec![
            "parcelmb".into(),
            "abs_linkage".into(),
            "non_abs_linkage".into(),
        ]
    }

    async fn run(&self, ctx: &StepContext) -> Result<()> {
        let mut conn = ctx.conn()?;
        let pid = ctx.config.parcels.id_column();
        let mb = &ctx.config.parcels.meshblock_code;
        let parcels = &ctx.config.parcels.parcel_dwellings;
        let data = &ctx.config.data;

        db::execute_all(
            &mut conn,
            &[
                "DROP TABLE IF EXISTS parcelmb;".to_string(),
                format!(
                    "CREATE TABLE parcelmb AS
                     SELECT {pid}, {mb} FROM {parcels};"
                ),
                format!("ALTER TABLE parcelmb ADD PRIMARY KEY ({pid});"),
                format!("CREATE INDEX parcelmb_{mb}_idx ON parcelmb ({mb});"),
            ],
        )?;
        info!(
            rows = db::table_count(&mut conn, "parcelmb")?,
            "parcelmb created"
        );

        db::execute_all(
            &mut conn,
            &[
                "DROP TABLE IF EXISTS abs_linkage;".to_string(),
                format!(
                    "CREATE TABLE abs_linkage AS
                     SELECT {mb},
                            sa1_7dig11,
                            sa2_name11,
                            sa3_name11,
                            ste_name11,
                            dwelling,
                            person,
                            geom
                       FROM {meshblocks}
                      WHERE {mb} IN (SELECT {mb} FROM parcelmb);",
                    meshblocks = data.meshblocks
                ),
                format!("ALTER TABLE abs_linkage ADD PRIMARY KEY ({mb});"),
                "CREATE INDEX abs_linkage_gix ON abs_linkage USING GIST (geom);".to_string(),
            ],
        )?;
        info!(
            rows = db::table_count(&mut conn, "abs_linkage")?,
            "abs_linkage created"
        );

        // DISTINCT ON keeps one suburb/LGA per parcel when a point falls on
        // a shared boundary.
        db::execute_all(
            &mut conn,
            &[
                "DROP TABLE IF EXISTS non_abs_linkage;".to_string(),
                format!(
                    "CREATE TABLE non_abs_linkage AS
                     SELECT DISTINCT ON (p.{pid})
                            p.{pid},
                            ssc.ssc_name,
                            lga.lga_name11
                       FROM {parcels} p
                       LEFT JOIN {suburbs} ssc ON ST_Intersects(p.geom, ssc.geom)
                       LEFT JOIN {lgas} lga ON ST_Intersects(p.geom, lga.geom)
                      ORDER BY p.{pid};",
                    suburbs = data.suburbs,
                    lgas = data.lgas
                ),
                format!("ALTER TABLE non_abs_linkage ADD PRIMARY KEY ({pid});"),
            ],
        )?;
        info!(
            rows = db::table_count(&mut conn, "non_abs_linkage")?,
            "non_abs_linkage created"
        );

        Ok(())
    }
}
