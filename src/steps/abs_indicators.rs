//! Step 15: census-derived indicators joined to parcels through the ABS
//! hierarchy: affordable housing, live/work locality, car ownership, tenure
//! and method of travel to work proportions.

use async_trait::async_trait;
use tracing::info;

use crate::db;
use crate::error::Result;
use crate::pipeline::{Step, StepContext};

pub struct AbsIndicators;

#[async_trait]
impl Step for AbsIndicators {
    fn seq(&self) -> u16 {
        15
    }

    fn slug(&self) -> &'static str {
        "abs-indicators"
    }

    fn task(&self) -> &'static str {
        "Create table of ABS indicator variables at parcel level"
    }

    fn outputs(&self) -> Vec<String> {
        vec!["ind_abs".into()]
    }

    async fn run(&self, ctx: &StepContext) -> Result<()> {
        let mut conn = ctx.conn()?;
        let pid = ctx.config.parcels.id_column();
        let mb = &ctx.config.parcels.meshblock_code;

        db::execute_all(
            &mut conn,
            &[
                "DROP TABLE IF EXISTS ind_abs;".to_string(),
                format!(
                    "CREATE TABLE ind_abs AS
                     SELECT DISTINCT parcelmb.{pid},
                            t2.sa1_7dig11,
                            t2.sa2_name11,
                            t3.sa2_prop_live_work_sa3,
                            t4.sa1_mean_cars,
                            t5.sa1_prop_rental,
                            t6.sa1_prop_affordablehous_30_40,
                            t7.sa1_prop_mtwp_private,
                            t7.sa1_prop_mtwp_public,
                            t7.sa1_prop_mtwp_active,
                            t7.sa1_prop_mtwp_public + t7.sa1_prop_mtwp_active
                              AS sa1_prop_mtwp_activeorpublic
                       FROM parcelmb
                       LEFT JOIN (SELECT {mb}, sa1_7dig11, sa2_name11 FROM abs_linkage) AS t2
                              ON parcelmb.{mb} = t2.{mb}
                       LEFT JOIN (SELECT sa2_name11,
                                         sa3_prop_live_work AS sa2_prop_live_work_sa3
                                    FROM liveworksamesa3) AS t3
                              ON t2.sa2_name11 = t3.sa2_name11
                       LEFT JOIN (SELECT sa1_7dig11,
                                         CASE WHEN COALESCE(one_mv, 0)
                                                 + COALESCE(two_mv, 0)*2
                                                 + COALESCE(three_mv, 0)*3
                                                 + COALESCE(fourup_mv, 0)*4 = 0
                                              THEN 0::double precision
                                              ELSE (COALESCE(one_mv, 0)
                                                    + COALESCE(two_mv, 0)*2
                                                    + COALESCE(three_mv, 0)*3
                                                    + COALESCE(fourup_mv, 0)*4)
                                                   / (COALESCE(no_mv, 0)
                                                      + COALESCE(one_mv, 0)
                                                      + COALESCE(two_mv, 0)
                                                      + COALESCE(three_mv, 0)
                                                      + COALESCE(fourup_mv, 0))::double precision
                                          END AS sa1_mean_cars
                                    FROM carownership) AS t4
                              ON t2.sa1_7dig11 = t4.sa1_7dig11
                       LEFT JOIN (SELECT sa1_7dig11,
                                         CASE WHEN COALESCE(owner_occupied, 0)
                                                 + COALESCE(rental, 0) = 0
                                              THEN 0::double precision
                                              ELSE COALESCE(rental, 0)
                                                   / (COALESCE(owner_occupied, 0)
                                                      + COALESCE(rental, 0))::double precision
                                          END AS sa1_prop_rental
                                    FROM owneroccupiedtorentalhousing) AS t5
                              ON t2.sa1_7dig11 = t5.sa1_7dig11
                       LEFT JOIN (SELECT sa1_7dig11,
                                         CASE WHEN COALESCE(validtot_1st2nd_hhinc_quint, 0) = 0
                                              THEN 0::double precision
                                              ELSE COALESCE(hous_cost_le30pct_hhinc, 0)
                                                   / COALESCE(validtot_1st2nd_hhinc_quint, 0)
                                                     ::double precision
                                          END AS sa1_prop_affordablehous_30_40
                                    FROM affordablehousing) AS t6
                              ON t2.sa1_7dig11 = t6.sa1_7dig11
                       LEFT JOIN (SELECT sa1_7dig11,
                                         CASE WHEN COALESCE(mtwp_total, 0) = 0
                                              THEN 0::double precision
                                              ELSE COALESCE(mtwp_private, 0)
                                                   / COALESCE(mtwp_total, 0)::double precision
                                          END AS sa1_prop_mtwp_private,
                                         CASE WHEN COALESCE(mtwp_total, 0) = 0
                                              THEN 0::double precision
                                              ELSE COALESCE(mtwp_public, 0)
                                                   / COALESCE(mtwp_total, 0)::double precision
                                          END AS sa1_prop_mtwp_public,
                                         CASE WHEN COALESCE(mtwp_total, 0) = 0
                                              THEN 0::double precision
                                              ELSE COALESCE(mtwp_active, 0)
                                                   / COALESCE(mtwp_total, 0)::double precision
                                          END AS sa1_prop_mtwp_active
                                    FROM methodoftraveltoworkplace) AS t7
                              ON t2.sa1_7dig11 = t7.sa1_7dig11;"
                ),
                format!("ALTER TABLE ind_abs ADD PRIMARY KEY ({pid});"),
            ],
        )?;
        info!(
            rows = db::table_count(&mut conn, "ind_abs")?,
            "ind_abs created"
        );
        Ok(())
    }
}
