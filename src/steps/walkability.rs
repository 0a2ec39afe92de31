//! Step 16: the walkability index, a sum of daily living, street
//! connectivity and dwelling density z-scores.

use async_trait::async_trait;
use tracing::info;

use crate::db;
use crate::error::Result;
use crate::pipeline::{Step, StepContext};

pub struct WalkabilityIndex;

#[async_trait]
impl Step for WalkabilityIndex {
    fn seq(&self) -> u16 {
        16
    }

    fn slug(&self) -> &'static str {
        "walkability-index"
    }

    fn task(&self) -> &'static str {
        "Create hard and soft walkability index tables from component z-scores"
    }

    fn outputs(&self) -> Vec<String> {
        vec!["ind_walkability_hard".into(), "ind_walkability_soft".into()]
    }

    async fn run(&self, ctx: &StepContext) -> Result<()> {
        let mut conn = ctx.conn()?;
        let pid = ctx.config.parcels.id_column();
        let d = ctx.config.network.distance;

        for form in ["hard", "soft"] {
            let table = format!("ind_walkability_{form}");
            db::execute_all(
                &mut conn,
                &[
                    format!("DROP TABLE IF EXISTS {table};"),
                    format!(
                        "CREATE TABLE {table} AS
                         SELECT dl.{pid},
                                (dl.daily_living - _dl.mean) / _dl.sd AS z_dl,
                                (sc.sc_nh{d}m - _sc.mean) / _sc.sd AS z_sc,
                                (dd.dd_nh{d}m - _dd.mean) / _dd.sd AS z_dd,
                                (dl.daily_living - _dl.mean) / _dl.sd
                                + (sc.sc_nh{d}m - _sc.mean) / _sc.sd
                                + (dd.dd_nh{d}m - _dd.mean) / _dd.sd AS walkability_index
                           FROM ind_daily_living_{form} dl
                           JOIN street_connectivity sc ON sc.{pid} = dl.{pid}
                           JOIN dwelling_density dd ON dd.{pid} = dl.{pid},
                                (SELECT AVG(daily_living) AS mean,
                                        stddev_pop(daily_living) AS sd
                                   FROM ind_daily_living_{form}) AS _dl,
                                (SELECT AVG(sc_nh{d}m) AS mean,
                                        stddev_pop(sc_nh{d}m) AS sd
                                   FROM street_connectivity) AS _sc,
                                (SELECT AVG(dd_nh{d}m) AS mean,
                                        stddev_pop(dd_nh{d}m) AS sd
                                   FROM dwelling_density) AS _dd;"
                    ),
                    format!("ALTER TABLE {table} ADD PRIMARY KEY ({pid});"),
                ],
            )?;
            info!(
                rows = db::table_count(&mut conn, &table)?,
                form, "walkability index created"
            );
        }
        Ok(())
    }
}
