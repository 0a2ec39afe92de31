//! Per-hex progress tables for the long-running parallel steps.
//!
//! Each parallel step keeps a SQL log table keyed by hex (and destination,
//! for the OD steps). Workers upsert a status row when a hex completes or
//! fails; the next run skips hexes already marked COMPLETED. This is a
//! resume convenience, not a transactional checkpoint: a killed worker
//! leaves its hex unlogged and it is simply redone.

use std::collections::HashSet;

use chrono::Local;
use diesel::pg::PgConnection;

use crate::db::{self, quote_literal};
use crate::error::Result;

pub const STATUS_COMPLETED: &str = "COMPLETED";
pub const STATUS_ERROR: &str = "ERROR";

/// Progress log keyed by hex alone (sausage buffers).
pub struct HexProgress {
    table: String,
}

impl HexProgress {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    pub fn ensure(&self, conn: &mut PgConnection) -> Result<()> {
        db::execute(
            conn,
            &format!(
                "CREATE TABLE IF NOT EXISTS {}
                   (hex integer PRIMARY KEY,
                    parcel_count integer NOT NULL,
                    status varchar,
                    moment varchar,
                    mins double precision);",
                self.table
            ),
        )?;
        Ok(())
    }

    pub fn record(
        &self,
        conn: &mut PgConnection,
        hex: i32,
        parcel_count: usize,
        status: &str,
        mins: f64,
    ) -> Result<()> {
        db::execute(
            conn,
            &format!(
                "INSERT INTO {table} VALUES ({hex},{count},{status},{moment},{mins})
                 ON CONFLICT (hex) DO UPDATE SET
                   parcel_count=EXCLUDED.parcel_count,
                   status=EXCLUDED.status,
                   moment=EXCLUDED.moment,
                   mins=EXCLUDED.mins;",
                table = self.table,
                hex = hex,
                count = parcel_count,
                status = quote_literal(status),
                moment = quote_literal(&timestamp()),
                mins = mins,
            ),
        )?;
        Ok(())
    }

    /// Hexes already marked COMPLETED.
    pub fn completed(&self, conn: &mut PgConnection) -> Result<HashSet<i32>> {
        let rows = db::text_column(
            conn,
            &format!(
                "SELECT hex::text AS value FROM {} WHERE status = 'COMPLETED'",
                self.table
            ),
        )?;
        Ok(rows.into_iter().filter_map(|v| v.parse().ok()).collect())
    }
}

/// Progress log keyed by (hex, destination) for the OD matrix steps.
pub struct OdProgress {
    table: String,
}

impl OdProgress {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    pub fn ensure(&self, conn: &mut PgConnection) -> Result<()> {
        db::execute(
            conn,
            &format!(
                "CREATE TABLE IF NOT EXISTS {}
                   (hex integer NOT NULL,
                    parcel_count integer NOT NULL,
                    dest varchar,
                    status varchar,
                    mins double precision,
                    PRIMARY KEY(hex,dest));",
                self.table
            ),
        )?;
        Ok(())
    }

    pub fn record(
        &self,
        conn: &mut PgConnection,
        hex: i32,
        dest: &str,
        parcel_count: usize,
        status: &str,
        mins: f64,
    ) -> Result<()> {
        db::execute(
            conn,
            &format!(
                "INSERT INTO {table} VALUES ({hex},{count},{dest},{status},{mins})
                 ON CONFLICT (hex,dest) DO UPDATE SET
                   parcel_count=EXCLUDED.parcel_count,
                   status=EXCLUDED.status,
                   mins=EXCLUDED.mins;",
                table = self.table,
                hex = hex,
                count = parcel_count,
                dest = quote_literal(dest),
                status = quote_literal(status),
                mins = mins,
            ),
        )?;
        Ok(())
    }

    /// Hexes for which every listed destination is COMPLETED.
    pub fn completed(&self, conn: &mut PgConnection, dest_count: usize) -> Result<HashSet<i32>> {
        let rows = db::text_column(
            conn,
            &format!(
                "SELECT hex::text AS value FROM {}
                  WHERE status = 'COMPLETED'
                  GROUP BY hex
                 HAVING COUNT(DISTINCT dest) >= {}",
                self.table, dest_count
            ),
        )?;
        Ok(rows.into_iter().filter_map(|v| v.parse().ok()).collect())
    }
}

fn timestamp() -> String {
    Local::now().format("%Y%m%d-%H%M%S").to_string()
}
