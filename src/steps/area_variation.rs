//! Step 19: area summaries of the index and its ingredients.
//!
//! For each form and each ABS/administrative level (meshblock, SA1, SA2,
//! suburb, LGA) this step averages the raw indicators, the normalised
//! indicators and the composite estimate, records their spread, ranks the
//! areas into deciles and percentiles, and exports the percentile tables
//! to timestamped CSVs under the data folder.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Local;
use diesel::pg::PgConnection;
use tracing::info;

use crate::db;
use crate::error::{Error, Result};
use crate::pipeline::{Step, StepContext};
use crate::steps::uli::indicator_aliases;

pub struct AreaVariation;

#[async_trait]
impl Step for AreaVariation {
    fn seq(&self) -> u16 {
        19
    }

    fn slug(&self) -> &'static str {
        "area-variation"
    }

    fn task(&self) -> &'static str {
        "Summarise index variation by area and export percentile CSVs"
    }

    async fn run(&self, ctx: &StepContext) -> Result<()> {
        let mut conn = ctx.conn()?;
        let schema = ctx.config.workspace.uli_schema.clone();
        let mb = ctx.config.parcels.meshblock_code.clone();
        let areas = [
            mb.as_str(),
            "sa1_7dig11",
            "sa2_name11",
            "ssc_name",
            "lga_name11",
        ];

        for form in ["hard", "soft"] {
            let mut aliases = indicator_aliases(&ctx.config, form);
            aliases.push("li_ci_est".to_string());

            for area in areas {
                db::execute_all(&mut conn, &summary_statements(&schema, form, area, &aliases))?;

                let table = format!("{schema}.clean_li_percentiles_{form}_{area}");
                let path = export_path(ctx, form, area);
                let rows = export_table(&mut conn, &table, area, &aliases, &path)?;
                info!(form, area, rows, path = %path.display(), "area summary exported");
            }
        }
        Ok(())
    }
}

/// The six summary tables of one form at one area level.
fn summary_statements(
    schema: &str,
    form: &str,
    area: &str,
    aliases: &[String],
) -> Vec<String> {
    let raw = format!("{schema}.raw_indicators_{form}");
    let parcel_ci = format!("{schema}.clean_li_parcel_ci_{form}");
    let norm_area = format!("{schema}.clean_li_mpi_norm_{form}_{area}");

    let avg: Vec<String> = aliases
        .iter()
        .map(|a| format!("AVG({a}) AS {a}"))
        .collect();
    let sd: Vec<String> = aliases
        .iter()
        .map(|a| format!("stddev_pop({a}) AS sd_{a}"))
        .collect();
    let rank = |scale: i32| -> String {
        aliases
            .iter()
            .map(|a| {
                format!("round({scale} * cume_dist() OVER (ORDER BY {a})::numeric, 0) AS {a}")
            })
            .collect::<Vec<_>>()
            .join(",\n       ")
    };

    let mut statements = Vec::new();
    let mut grouped = |table: String, source: &str, cols: &[String]| {
        statements.push(format!("DROP TABLE IF EXISTS {table};"));
        statements.push(format!(
            "CREATE TABLE {table} AS
             SELECT {area},
       {cols}
               FROM {source}
              WHERE {area} IS NOT NULL
              GROUP BY {area}
              ORDER BY {area} ASC;",
            cols = cols.join(",\n       ")
        ));
    };

    grouped(format!("{schema}.li_raw_{form}_{area}"), &raw, &avg);
    grouped(format!("{schema}.li_raw_sd_{form}_{area}"), &raw, &sd);
    grouped(norm_area.clone(), &parcel_ci, &avg);
    grouped(format!("{schema}.clean_li_mpi_sd_{form}_{area}"), &parcel_ci, &sd);

    for (family, scale) in [("deciles", 10), ("percentiles", 100)] {
        let table = format!("{schema}.clean_li_{family}_{form}_{area}");
        statements.push(format!("DROP TABLE IF EXISTS {table};"));
        statements.push(format!(
            "CREATE TABLE {table} AS
             SELECT {area},
       {cols}
               FROM {norm_area}
              ORDER BY {area} ASC;",
            cols = rank(scale)
        ));
    }
    statements
}

fn export_path(ctx: &StepContext, form: &str, area: &str) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d-%H%M%S");
    ctx.config.data.folder_path.join(format!(
        "{}_li_percentiles_{form}_{area}_{stamp}.csv",
        ctx.config.data.study_region
    ))
}

/// Write a summary table to CSV, one header row then one row per area.
///
/// Rows come back as JSON objects so numeric and text columns need no
/// per-table row types; values are emitted in declared column order.
fn export_table(
    conn: &mut PgConnection,
    table: &str,
    area: &str,
    aliases: &[String],
    path: &Path,
) -> Result<usize> {
    let rows = db::text_column(
        conn,
        &format!("SELECT to_json(t)::text AS value FROM {table} t ORDER BY {area} ASC"),
    )?;

    let mut writer = csv::Writer::from_path(path)?;
    let mut header = vec![area.to_string()];
    header.extend(aliases.iter().cloned());
    writer.write_record(&header)?;

    for row in &rows {
        let object: serde_json::Value =
            serde_json::from_str(row).map_err(|e| Error::Parse(e.to_string()))?;
        let record: Vec<String> = header
            .iter()
            .map(|column| match object.get(column) {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(serde_json::Value::Null) | None => String::new(),
                Some(value) => value.to_string(),
            })
            .collect();
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_statements_cover_all_six_families() {
        let aliases = vec!["dd_nh1600m".to_string(), "li_ci_est".to_string()];
        let statements = summary_statements("uli_test", "hard", "sa1_7dig11", &aliases);
        // One DROP and one CREATE per table.
        assert_eq!(statements.len(), 12);
        let all = statements.join("\n");
        for family in [
            "li_raw_hard_sa1_7dig11",
            "li_raw_sd_hard_sa1_7dig11",
            "clean_li_mpi_norm_hard_sa1_7dig11",
            "clean_li_mpi_sd_hard_sa1_7dig11",
            "clean_li_deciles_hard_sa1_7dig11",
            "clean_li_percentiles_hard_sa1_7dig11",
        ] {
            assert!(all.contains(&format!("uli_test.{family}")), "{family}");
        }
    }

    #[test]
    fn spread_columns_get_the_sd_prefix() {
        let aliases = vec!["food".to_string()];
        let statements = summary_statements("uli_test", "soft", "lga_name11", &aliases);
        let sd_create = &statements[3];
        assert!(sd_create.contains("stddev_pop(food) AS sd_food"));
    }

    #[test]
    fn percentiles_rank_by_cumulative_distribution() {
        let aliases = vec!["education".to_string()];
        let statements = summary_statements("uli_test", "hard", "ssc_name", &aliases);
        let percentile_create = statements.last().unwrap();
        assert!(percentile_create
            .contains("round(100 * cume_dist() OVER (ORDER BY education)::numeric, 0)"));
        let decile_create = &statements[9];
        assert!(decile_create
            .contains("round(10 * cume_dist() OVER (ORDER BY education)::numeric, 0)"));
    }
}
