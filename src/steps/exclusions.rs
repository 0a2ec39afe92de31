//! Step 17: flag parcels to exclude from the composite index.
//!
//! A parcel is flagged per indicator when a key derived indicator is null
//! (typically a study-region edge case with poor network connectivity),
//! when any of its closest-destination distances is missing, and entirely
//! when its SA1 has no IRSD ranking. The table accumulates; re-running adds
//! newly null rows without duplicating old ones.

use async_trait::async_trait;
use tracing::info;

use crate::db;
use crate::error::Result;
use crate::pipeline::{Step, StepContext};

pub struct ExcludeParcels;

#[async_trait]
impl Step for ExcludeParcels {
    fn seq(&self) -> u16 {
        17
    }

    fn slug(&self) -> &'static str {
        "exclude-parcels"
    }

    fn task(&self) -> &'static str {
        "Create table of parcels excluded per indicator from index calculation"
    }

    fn outputs(&self) -> Vec<String> {
        vec!["excluded_parcels".into()]
    }

    async fn run(&self, ctx: &StepContext) -> Result<()> {
        let mut conn = ctx.conn()?;
        let pid = ctx.config.parcels.id_column();
        let mb = &ctx.config.parcels.meshblock_code;

        db::execute(
            &mut conn,
            &format!(
                "CREATE TABLE IF NOT EXISTS excluded_parcels
                   ({pid} varchar NOT NULL,
                    indicator varchar NOT NULL,
                    PRIMARY KEY ({pid}, indicator));"
            ),
        )?;
        db::execute_all(&mut conn, &exclusion_statements(&pid, mb))?;

        let excluded = db::scalar_count(
            &mut conn,
            &format!("SELECT COUNT(DISTINCT {pid}) AS count FROM excluded_parcels"),
        )?;
        info!(parcels = excluded, "exclusions recorded");
        Ok(())
    }
}

fn exclusion_statements(pid: &str, mb: &str) -> Vec<String> {
    let null_checks = [
        ("ind_walkability_hard", "walkability_index"),
        ("ind_walkability_soft", "walkability_index"),
        ("ind_si_mix_hard", "si_mix"),
        ("ind_si_mix_soft", "si_mix"),
        ("ind_dest_pt_hard", "dest_pt"),
        ("ind_dest_pt_soft", "dest_pt"),
        ("ind_pos", "pos_greq15000m2_in_400m_soft"),
    ];
    let mut statements: Vec<String> = null_checks
        .iter()
        .map(|(table, column)| {
            format!(
                "INSERT INTO excluded_parcels
                 SELECT p.{pid}, '{table}'
                   FROM parcelmb p
                   LEFT JOIN {table} t ON p.{pid} = t.{pid}
                  WHERE t.{column} IS NULL
                 ON CONFLICT ({pid}, indicator) DO NOTHING;"
            )
        })
        .collect();
    // A whole-row null test: any missing closest-destination distance, or no
    // dest_distance row at all, excludes the parcel.
    statements.push(format!(
        "INSERT INTO excluded_parcels
         SELECT p.{pid}, 'dest_distance'
           FROM parcelmb p
           LEFT JOIN dest_distance t ON p.{pid} = t.{pid}
          WHERE NOT (t IS NOT NULL)
         ON CONFLICT ({pid}, indicator) DO NOTHING;"
    ));
    // Parcels whose SA1 is missing from the IRSD ranking cannot be compared
    // against disadvantage deciles.
    statements.push(format!(
        "INSERT INTO excluded_parcels
         SELECT p.{pid}, 'abs_2011_irsd'
           FROM parcelmb p
           LEFT JOIN abs_linkage a ON p.{mb} = a.{mb}
          WHERE a.sa1_7dig11 IS NULL
             OR a.sa1_7dig11 NOT IN (SELECT sa1_7dig11 FROM abs_2011_irsd)
         ON CONFLICT ({pid}, indicator) DO NOTHING;"
    ));
    statements
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_indicators_checked_in_both_forms() {
        let statements = exclusion_statements("detail_pid", "mb_code11");
        for table in [
            "ind_walkability_hard",
            "ind_walkability_soft",
            "ind_si_mix_hard",
            "ind_si_mix_soft",
            "ind_dest_pt_hard",
            "ind_dest_pt_soft",
            "ind_pos",
        ] {
            assert!(
                statements.iter().any(|s| s.contains(&format!("'{table}'"))),
                "missing null check for {table}"
            );
        }
    }

    #[test]
    fn any_missing_destination_distance_excludes_the_parcel() {
        let statements = exclusion_statements("detail_pid", "mb_code11");
        let dest = statements
            .iter()
            .find(|s| s.contains("'dest_distance'"))
            .unwrap();
        assert!(dest.contains("LEFT JOIN dest_distance t"));
        assert!(dest.contains("WHERE NOT (t IS NOT NULL)"));
    }

    #[test]
    fn unranked_sa1_parcels_are_excluded() {
        let statements = exclusion_statements("detail_pid", "mb_code11");
        let irsd = statements.last().unwrap();
        assert!(irsd.contains("NOT IN (SELECT sa1_7dig11 FROM abs_2011_irsd)"));
        assert!(irsd.contains("a.sa1_7dig11 IS NULL"));
    }
}
