//! Step 4: extract parcel point coordinates into `parcel_xy`.

use async_trait::async_trait;
use tracing::info;

use crate::db;
use crate::error::Result;
use crate::pipeline::{Step, StepContext};

pub struct ParcelCoordinates;

#[async_trait]
impl Step for ParcelCoordinates {
    fn seq(&self) -> u16 {
        4
    }

    fn slug(&self) -> &'static str {
        "parcel-coordinates"
    }

    fn task(&self) -> &'static str {
        "Create parcel_xy table of parcel ids with point coordinates"
    }

    fn outputs(&self) -> Vec<String> {
        vec!["parcel_xy".into()]
    }

    async fn run(&self, ctx: &StepContext) -> Result<()> {
        let mut conn = ctx.conn()?;
        let pid = ctx.config.parcels.id_column();
        let parcels = &ctx.config.parcels.parcel_dwellings;

        db::execute_all(
            &mut conn,
            &[
                "DROP TABLE IF EXISTS parcel_xy;".to_string(),
                format!(
                    "CREATE TABLE parcel_xy AS
                     SELECT {pid},
                            ST_X(geom) AS x,
                            ST_Y(geom) AS y,
                            geom
                       FROM {parcels};"
                ),
                format!("ALTER TABLE parcel_xy ADD PRIMARY KEY ({pid});"),
                "CREATE INDEX parcel_xy_gix ON parcel_xy USING GIST (geom);".to_string(),
            ],
        )?;
        info!(
            rows = db::table_count(&mut conn, "parcel_xy")?,
            "parcel_xy created"
        );
        Ok(())
    }
}
