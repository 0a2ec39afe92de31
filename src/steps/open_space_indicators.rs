//! Step 14: public open space access indicators.

use async_trait::async_trait;
use tracing::info;

use crate::db;
use crate::error::Result;
use crate::pipeline::{Step, StepContext};
use crate::steps::od_open_space::{POS_ANY_TABLE, POS_LARGE_TABLE};

/// Hard cutoff and soft-decay midpoint for open space access, in metres.
const POS_CUTOFF_M: i32 = 400;

pub struct OpenSpaceIndicators;

#[async_trait]
impl Step for OpenSpaceIndicators {
    fn seq(&self) -> u16 {
        14
    }

    fn slug(&self) -> &'static str {
        "open-space-indicators"
    }

    fn task(&self) -> &'static str {
        "Create public open space access indicator table"
    }

    fn outputs(&self) -> Vec<String> {
        vec!["ind_pos".into()]
    }

    async fn run(&self, ctx: &StepContext) -> Result<()> {
        let mut conn = ctx.conn()?;
        let pid = ctx.config.parcels.id_column();
        let c = POS_CUTOFF_M;

        // Soft access to a large park, 0.5 at the cutoff distance.
        let soft = format!(
            "(1 - 1.0/(1 + exp(-5*({POS_LARGE_TABLE}.distance - {c})/{c}::double precision)))"
        );
        db::execute_all(
            &mut conn,
            &[
                "DROP TABLE IF EXISTS ind_pos;".to_string(),
                format!(
                    "CREATE TABLE ind_pos AS
                     SELECT parcelmb.{pid},
                            COALESCE({POS_ANY_TABLE}.distance, 0) AS d_cl_pos_any,
                            CASE WHEN ({POS_ANY_TABLE}.distance <= {c}) THEN 1
                                 ELSE 0 END AS pos_le_eq_{c}m,
                            COALESCE({POS_LARGE_TABLE}.distance, 0) AS d_cl_pos_greq15000m2,
                            CASE WHEN ({POS_LARGE_TABLE}.distance <= 400) THEN 1
                                 ELSE 0 END AS pos_greq15000m2_in_400m_hard,
                            CASE WHEN ({POS_LARGE_TABLE}.distance <= 800) THEN 1
                                 ELSE 0 END AS pos_greq15000m2_in_800m_hard,
                            CASE WHEN ({POS_LARGE_TABLE}.distance <= 1600) THEN 1
                                 ELSE 0 END AS pos_greq15000m2_in_1600m_hard,
                            COALESCE({soft}, 0)::double precision
                              AS pos_greq15000m2_in_{c}m_soft
                       FROM parcelmb
                       LEFT JOIN {POS_ANY_TABLE}
                              ON parcelmb.{pid} = {POS_ANY_TABLE}.{pid}
                       LEFT JOIN {POS_LARGE_TABLE}
                              ON parcelmb.{pid} = {POS_LARGE_TABLE}.{pid};"
                ),
                format!("ALTER TABLE ind_pos ADD PRIMARY KEY ({pid});"),
            ],
        )?;
        info!(
            rows = db::table_count(&mut conn, "ind_pos")?,
            "ind_pos created"
        );
        Ok(())
    }
}
