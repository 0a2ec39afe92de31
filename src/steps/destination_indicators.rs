//! Step 13: destination access scores and the indicator tables derived
//! from them.
//!
//! The OD matrix is pivoted into wide per-class tables in two forms: hard
//! (binary, within the class cutoff) and soft (logistic decay centred on
//! the cutoff). From those come the public transport, daily living, local
//! living and social infrastructure mix indicators.

use async_trait::async_trait;
use tracing::info;

use crate::config::DestinationClass;
use crate::db;
use crate::error::Result;
use crate::pipeline::{Step, StepContext};

const OD_TABLE: &str = "dist_cl_od_parcel_dest";

/// Slope of the soft access decay; score is 0.5 at the cutoff distance.
const SOFT_SLOPE: f64 = 5.0;

pub struct DestinationIndicators;

#[async_trait]
impl Step for DestinationIndicators {
    fn seq(&self) -> u16 {
        13
    }

    fn slug(&self) -> &'static str {
        "destination-indicators"
    }

    fn task(&self) -> &'static str {
        "Create hard and soft destination access scores and derived indicator tables"
    }

    fn outputs(&self) -> Vec<String> {
        vec![
            "dest_distance".into(),
            "ind_dest_hard".into(),
            "ind_dest_soft".into(),
            "ind_dest_pt_hard".into(),
            "ind_dest_pt_soft".into(),
            "ind_daily_living_hard".into(),
            "ind_daily_living_soft".into(),
            "ind_local_living_hard".into(),
            "ind_local_living_soft".into(),
            "ind_si_mix_hard".into(),
            "ind_si_mix_soft".into(),
        ]
    }

    async fn run(&self, ctx: &StepContext) -> Result<()> {
        let mut conn = ctx.conn()?;
        let pid = ctx.config.parcels.id_column();
        let classes = &ctx.config.destinations.classes;

        db::execute_all(&mut conn, &pivot_statements(&pid, classes))?;
        info!(
            classes = classes.len(),
            parcels = db::table_count(&mut conn, "ind_dest_hard")?,
            "destination access tables created"
        );

        db::execute_all(&mut conn, &derived_statements(&pid))?;
        info!("derived destination indicator tables created");
        Ok(())
    }
}

/// Wide column name for a class: `supermarkets_1000m`.
fn access_column(class: &DestinationClass) -> String {
    format!("{}_{}m", class.name, class.cutoff_m)
}

/// Soft access score, a logistic decay centred on the class cutoff.
fn soft_expr(class: &DestinationClass) -> String {
    let c = class.cutoff_m;
    format!("1.0 - 1.0/(1.0 + exp(-{SOFT_SLOPE}*(distance - {c})/{c}::double precision))")
}

fn pivot_statements(pid: &str, classes: &[DestinationClass]) -> Vec<String> {
    let distance_cols: Vec<String> = classes
        .iter()
        .map(|c| format!("MIN(CASE WHEN dest = {} THEN distance END) AS {}", c.code, c.name))
        .collect();
    let hard_cols: Vec<String> = classes
        .iter()
        .map(|c| {
            format!(
                "MIN(CASE WHEN dest = {} THEN (distance <= {})::integer END) AS {}",
                c.code,
                c.cutoff_m,
                access_column(c)
            )
        })
        .collect();
    let soft_cols: Vec<String> = classes
        .iter()
        .map(|c| {
            format!(
                "MIN(CASE WHEN dest = {} THEN {} END) AS {}",
                c.code,
                soft_expr(c),
                access_column(c)
            )
        })
        .collect();

    let pivot = |table: &str, cols: &[String]| {
        vec![
            format!("DROP TABLE IF EXISTS {table};"),
            format!(
                "CREATE TABLE {table} AS
                 SELECT {pid},
                        {cols}
                   FROM {OD_TABLE}
                  GROUP BY {pid};",
                cols = cols.join(",\n                        ")
            ),
            format!("ALTER TABLE {table} ADD PRIMARY KEY ({pid});"),
        ]
    };

    let mut statements = pivot("dest_distance", &distance_cols);
    statements.extend(pivot("ind_dest_hard", &hard_cols));
    statements.extend(pivot("ind_dest_soft", &soft_cols));
    statements
}

/// The fixed indicator formulas over the study region's destination
/// catalogue. Hard forms collapse substitutable classes with any-of CASEs;
/// soft forms take the greatest of their decayed scores.
fn derived_statements(pid: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut table = |name: &str, select: String| {
        statements.push(format!("DROP TABLE IF EXISTS {name};"));
        statements.push(format!("CREATE TABLE {name} AS\n{select};"));
        statements.push(format!("ALTER TABLE {name} ADD PRIMARY KEY ({pid});"));
    };

    table(
        "ind_dest_pt_hard",
        format!(
            "SELECT {pid},
                    (CASE WHEN COALESCE(busstop2012_400m, 0)
                             + COALESCE(tramstops2012_600m, 0)
                             + COALESCE(trainstations2012_800m, 0) > 0 THEN 1
                          ELSE 0 END) AS dest_pt
               FROM ind_dest_hard"
        ),
    );
    table(
        "ind_dest_pt_soft",
        format!(
            "SELECT {pid},
                    GREATEST(COALESCE(busstop2012_400m, 0),
                             COALESCE(tramstops2012_600m, 0),
                             COALESCE(trainstations2012_800m, 0))::double precision AS dest_pt
               FROM ind_dest_soft"
        ),
    );
    table(
        "ind_daily_living_hard",
        format!(
            "SELECT {pid},
                    (COALESCE(supermarkets_1000m, 0)
                     + (CASE WHEN COALESCE(conveniencestores_1000m, 0)
                                + COALESCE(petrolstations_1000m, 0)
                                + COALESCE(newsagents_1000m, 0) > 0 THEN 1
                             ELSE 0 END)
                     + (CASE WHEN COALESCE(busstop2012_400m, 0)
                                + COALESCE(tramstops2012_600m, 0)
                                + COALESCE(trainstations2012_800m, 0) > 0 THEN 1
                             ELSE 0 END)) AS daily_living
               FROM ind_dest_hard"
        ),
    );
    table(
        "ind_daily_living_soft",
        format!(
            "SELECT {pid},
                    (COALESCE(supermarkets_1000m, 0)
                     + GREATEST(COALESCE(conveniencestores_1000m, 0),
                                COALESCE(petrolstations_1000m, 0),
                                COALESCE(newsagents_1000m, 0))
                     + GREATEST(COALESCE(busstop2012_400m, 0),
                                COALESCE(tramstops2012_600m, 0),
                                COALESCE(trainstations2012_800m, 0)))::double precision
                      AS daily_living
               FROM ind_dest_soft"
        ),
    );
    table(
        "ind_local_living_hard",
        format!(
            "SELECT {pid},
                    (COALESCE(communitycentre_1000m, 0)
                     + COALESCE(libraries_2014_1000m, 0)
                     + (CASE WHEN COALESCE(childcareoutofschool_1600m, 0)
                                + COALESCE(childcare_800m, 0) > 0 THEN 1
                             ELSE 0 END)
                     + COALESCE(dentists_1000m, 0)
                     + COALESCE(gp_clinics_1000m, 0)
                     + COALESCE(supermarkets_1000m, 0)
                     + (CASE WHEN COALESCE(conveniencestores_1000m, 0)
                                + COALESCE(petrolstations_1000m, 0)
                                + COALESCE(newsagents_1000m, 0) > 0 THEN 1
                             ELSE 0 END)
                     + (CASE WHEN COALESCE(fishmeatpoultryshops_1600m, 0)
                                + COALESCE(fruitvegeshops_1600m, 0) > 0 THEN 1
                             ELSE 0 END)
                     + COALESCE(pharmacy_1000m, 0)
                     + COALESCE(postoffice_1600m, 0)
                     + COALESCE(banksfinance_1600m, 0)
                     + (CASE WHEN COALESCE(busstop2012_400m, 0)
                                + COALESCE(tramstops2012_600m, 0)
                                + COALESCE(trainstations2012_800m, 0) > 0 THEN 1
                             ELSE 0 END)) AS local_living
               FROM ind_dest_hard"
        ),
    );
    table(
        "ind_local_living_soft",
        format!(
            "SELECT {pid},
                    (COALESCE(communitycentre_1000m, 0)
                     + COALESCE(libraries_2014_1000m, 0)
                     + GREATEST(COALESCE(childcareoutofschool_1600m, 0),
                                COALESCE(childcare_800m, 0))
                     + COALESCE(dentists_1000m, 0)
                     + COALESCE(gp_clinics_1000m, 0)
                     + COALESCE(supermarkets_1000m, 0)
                     + GREATEST(COALESCE(conveniencestores_1000m, 0),
                                COALESCE(petrolstations_1000m, 0),
                                COALESCE(newsagents_1000m, 0))
                     + GREATEST(COALESCE(fishmeatpoultryshops_1600m, 0),
                                COALESCE(fruitvegeshops_1600m, 0))
                     + COALESCE(pharmacy_1000m, 0)
                     + COALESCE(postoffice_1600m, 0)
                     + COALESCE(banksfinance_1600m, 0)
                     + GREATEST(COALESCE(busstop2012_400m, 0),
                                COALESCE(tramstops2012_600m, 0),
                                COALESCE(trainstations2012_800m, 0))) AS local_living
               FROM ind_dest_soft"
        ),
    );
    for form in ["hard", "soft"] {
        table(
            &format!("ind_si_mix_{form}"),
            format!(
                "SELECT {pid},
                        (COALESCE(communitycentre_1000m, 0)
                         + COALESCE(museumartgallery_3200m, 0)
                         + COALESCE(cinematheatre_3200m, 0)
                         + COALESCE(libraries_2014_1000m, 0)
                         + COALESCE(childcareoutofschool_1600m, 0)
                         + COALESCE(childcare_800m, 0)
                         + COALESCE(statesecondaryschools_1600m, 0)
                         + COALESCE(stateprimaryschools_1600m, 0)
                         + COALESCE(agedcare_2012_1000m, 0)
                         + COALESCE(communityhealthcentres_1000m, 0)
                         + COALESCE(dentists_1000m, 0)
                         + COALESCE(gp_clinics_1000m, 0)
                         + COALESCE(maternalchildhealth_1000m, 0)
                         + COALESCE(swimmingpools_1200m, 0)
                         + COALESCE(sport_1200m, 0)
                         + COALESCE(pharmacy_1000m, 0)) AS si_mix
                   FROM ind_dest_{form}"
            ),
        );
    }
    statements
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::dest;

    #[test]
    fn access_columns_carry_their_cutoff() {
        assert_eq!(access_column(&dest("supermarkets", 1, 1000)), "supermarkets_1000m");
        assert_eq!(access_column(&dest("busstop2012", 2, 400)), "busstop2012_400m");
    }

    #[test]
    fn soft_expr_is_half_at_cutoff() {
        let expr = soft_expr(&dest("supermarkets", 1, 1000));
        assert_eq!(
            expr,
            "1.0 - 1.0/(1.0 + exp(-5*(distance - 1000)/1000::double precision))"
        );
    }

    #[test]
    fn pivot_builds_one_column_per_class() {
        let classes = vec![dest("supermarkets", 1, 1000), dest("busstop2012", 2, 400)];
        let statements = pivot_statements("detail_pid", &classes);
        let hard = statements
            .iter()
            .find(|s| s.contains("CREATE TABLE ind_dest_hard"))
            .unwrap();
        assert!(hard.contains("(distance <= 1000)::integer END) AS supermarkets_1000m"));
        assert!(hard.contains("(distance <= 400)::integer END) AS busstop2012_400m"));
        assert!(hard.contains("GROUP BY detail_pid"));
    }

    #[test]
    fn derived_tables_cover_hard_and_soft_forms() {
        let statements = derived_statements("detail_pid");
        for table in [
            "ind_dest_pt_hard",
            "ind_dest_pt_soft",
            "ind_daily_living_hard",
            "ind_daily_living_soft",
            "ind_local_living_hard",
            "ind_local_living_soft",
            "ind_si_mix_hard",
            "ind_si_mix_soft",
        ] {
            assert!(
                statements.iter().any(|s| s.contains(&format!("CREATE TABLE {table} "))
                    || s.contains(&format!("CREATE TABLE {table} AS"))),
                "missing {table}"
            );
        }
    }
}
