//! Step 2: load ABS reference CSVs, the SEIFA IRSD ranking and the
//! meshblock-linked NO2 predictions into typed tables.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use diesel::PgConnection;
use tracing::info;

use crate::db::batch::{BatchInsert, OnConflict, SqlValue};
use crate::db;
use crate::error::{Error, Result};
use crate::pipeline::{Step, StepContext};

pub struct LoadAbsTables;

struct CsvTable {
    table: String,
    ddl: &'static str,
    key: &'static str,
    path: PathBuf,
}

#[async_trait]
impl Step for LoadAbsTables {
    fn seq(&self) -> u16 {
        2
    }

    fn slug(&self) -> &'static str {
        "load-abs-tables"
    }

    fn task(&self) -> &'static str {
        "Create tables in the database from cleaned ABS, IRSD and NO2 csv files"
    }

    fn outputs(&self) -> Vec<String> {
        vec![
            "adult18up_employment".into(),
            "carownership".into(),
            "methodoftraveltoworkplace".into(),
            "liveworksamesa3".into(),
            "affordablehousing".into(),
            "owneroccupiedtorentalhousing".into(),
            "abs_2011_irsd".into(),
            "no2_pred".into(),
        ]
    }

    async fn run(&self, ctx: &StepContext) -> Result<()> {
        let mut conn = ctx.conn()?;
        for spec in table_specs(ctx) {
            db::execute(&mut conn, &format!("DROP TABLE IF EXISTS {};", spec.table))?;
            db::execute(
                &mut conn,
                &format!("CREATE TABLE {} ({});", spec.table, spec.ddl),
            )?;
            let rows = load_csv(
                &mut conn,
                &spec.path,
                &spec.table,
                spec.key,
                ctx.config.network.sql_chunkify,
            )?;
            info!(table = %spec.table, rows, "loaded csv");
        }
        Ok(())
    }
}

fn table_specs(ctx: &StepContext) -> Vec<CsvTable> {
    let abs = &ctx.config.abs;
    let folder = &ctx.config.data.folder_path;
    let join = |p: &Path| folder.join(p);
    vec![
        CsvTable {
            table: "adult18up_employment".into(),
            ddl: "sa1_7dig11 integer PRIMARY KEY, employed integer NOT NULL, \
                  unemployed integer NOT NULL, not_in_the_labour_force integer NOT NULL, \
                  not_stated integer NOT NULL, total integer NOT NULL",
            key: "sa1_7dig11",
            path: join(&abs.employment),
        },
        CsvTable {
            table: "carownership".into(),
            ddl: "sa1_7dig11 integer PRIMARY KEY, no_mv integer NOT NULL, \
                  one_mv integer NOT NULL, two_mv integer NOT NULL, \
                  three_mv integer NOT NULL, fourup_mv integer NOT NULL, \
                  not_stated_mv integer NOT NULL, na_mv integer NOT NULL, \
                  total_mv integer NOT NULL",
            key: "sa1_7dig11",
            path: join(&abs.car_ownership),
        },
        CsvTable {
            table: "methodoftraveltoworkplace".into(),
            ddl: "sa1_7dig11 integer PRIMARY KEY, mtwp_private integer NOT NULL, \
                  mtwp_active integer NOT NULL, mtwp_public integer NOT NULL, \
                  mtwp_total integer NOT NULL",
            key: "sa1_7dig11",
            path: join(&abs.travel_to_work),
        },
        CsvTable {
            table: "liveworksamesa3".into(),
            ddl: "sa2_name11 varchar PRIMARY KEY, sa3_live_and_work integer NOT NULL, \
                  sa3_work integer NOT NULL, sa3_prop_live_work double precision",
            key: "sa2_name11",
            path: join(&abs.live_work_sa3),
        },
        CsvTable {
            table: "affordablehousing".into(),
            ddl: "sa1_7dig11 integer PRIMARY KEY, hous_cost_le30pct_hhinc integer NOT NULL, \
                  hous_cost_gr30pct_hhinc integer NOT NULL, \
                  validtot_1st2nd_hhinc_quint integer NOT NULL",
            key: "sa1_7dig11",
            path: join(&abs.affordable_housing),
        },
        CsvTable {
            table: "owneroccupiedtorentalhousing".into(),
            ddl: "sa1_7dig11 integer PRIMARY KEY, owner_occupied integer NOT NULL, \
                  rental integer NOT NULL",
            key: "sa1_7dig11",
            path: join(&abs.tenure),
        },
        CsvTable {
            table: "abs_2011_irsd".into(),
            ddl: "sa1_7dig11 integer PRIMARY KEY, usual_resident_pop integer, \
                  irsd_score integer, aust_rank integer, aust_decile integer, \
                  aust_pctile integer",
            key: "sa1_7dig11",
            path: join(&abs.irsd),
        },
        CsvTable {
            table: ctx.config.air_pollution.no2_table.clone(),
            ddl: "mb_code11 bigint PRIMARY KEY, pred_no2_2011_col_ppb double precision",
            key: "mb_code11",
            path: join(&ctx.config.air_pollution.no2),
        },
    ]
}

/// Bulk-load a headed CSV whose columns match the table definition order.
/// Values are passed as literals and coerced by the column types; empty
/// fields become NULL.
fn load_csv(
    conn: &mut PgConnection,
    path: &Path,
    table: &str,
    key: &str,
    chunk_size: usize,
) -> Result<usize> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| Error::Parse(format!("{}: {e}", path.display())))?;
    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();
    let header_refs: Vec<&str> = headers.iter().map(String::as_str).collect();

    let mut batch = BatchInsert::new(
        table,
        &header_refs,
        OnConflict::DoNothing { target: key.to_string() },
        chunk_size,
    );
    for record in reader.records() {
        let record = record?;
        let values: Vec<SqlValue> = record
            .iter()
            .map(|field| {
                let field = field.trim();
                if field.is_empty() {
                    SqlValue::Null
                } else {
                    SqlValue::Text(field.to_string())
                }
            })
            .collect();
        batch.push(conn, &values)?;
    }
    batch.flush(conn)?;
    Ok(batch.inserted())
}
