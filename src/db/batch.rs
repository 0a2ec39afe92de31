//! Chunked bulk-insert utility.
//!
//! Nearly every step pushes rows into PostgreSQL in batches rather than one
//! statement per row; the long-running parallel steps additionally resume by
//! diffing keys already present in the output table. Both patterns live here.

use std::collections::HashSet;

use diesel::pg::PgConnection;

use crate::db::{self, quote_literal};
use crate::error::Result;

/// A value rendered into a multi-row VALUES list.
#[derive(Debug, Clone)]
pub enum SqlValue {
    Text(String),
    Int(i64),
    Float(f64),
    Null,
    /// Pre-rendered SQL expression (e.g. a PostGIS constructor call).
    Raw(String),
}

impl SqlValue {
    fn render(&self) -> String {
        match self {
            SqlValue::Text(s) => quote_literal(s),
            SqlValue::Int(n) => n.to_string(),
            SqlValue::Float(f) => {
                if f.is_finite() {
                    f.to_string()
                } else {
                    "NULL".to_string()
                }
            }
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Raw(expr) => expr.clone(),
        }
    }
}

/// Conflict handling appended to each INSERT chunk.
#[derive(Debug, Clone)]
pub enum OnConflict {
    /// Plain INSERT; duplicate keys abort the statement.
    Error,
    /// `ON CONFLICT (target) DO NOTHING` - the resume-friendly default.
    DoNothing { target: String },
    /// `ON CONFLICT (target) DO UPDATE SET col = EXCLUDED.col, ...`
    DoUpdate { target: String, columns: Vec<String> },
}

impl OnConflict {
    fn render(&self) -> String {
        match self {
            OnConflict::Error => String::new(),
            OnConflict::DoNothing { target } => {
                format!(" ON CONFLICT ({target}) DO NOTHING")
            }
            OnConflict::DoUpdate { target, columns } => {
                let sets: Vec<String> = columns
                    .iter()
                    .map(|c| format!("{c}=EXCLUDED.{c}"))
                    .collect();
                format!(" ON CONFLICT ({target}) DO UPDATE SET {}", sets.join(","))
            }
        }
    }
}

/// Accumulates rows and flushes them as multi-row INSERT statements.
pub struct BatchInsert {
    table: String,
    columns: Vec<String>,
    on_conflict: OnConflict,
    chunk_size: usize,
    rows: Vec<String>,
    inserted: usize,
}

impl BatchInsert {
    pub fn new(
        table: impl Into<String>,
        columns: &[&str],
        on_conflict: OnConflict,
        chunk_size: usize,
    ) -> Self {
        Self {
            table: table.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            on_conflict,
            chunk_size: chunk_size.max(1),
            rows: Vec::new(),
            inserted: 0,
        }
    }

    /// Queue a row, flushing if the chunk is full.
    pub fn push(&mut self, conn: &mut PgConnection, values: &[SqlValue]) -> Result<()> {
        debug_assert_eq!(values.len(), self.columns.len());
        let rendered: Vec<String> = values.iter().map(SqlValue::render).collect();
        self.rows.push(format!("({})", rendered.join(",")));
        if self.rows.len() >= self.chunk_size {
            self.flush(conn)?;
        }
        Ok(())
    }

    /// Write any buffered rows.
    pub fn flush(&mut self, conn: &mut PgConnection) -> Result<()> {
        if self.rows.is_empty() {
            return Ok(());
        }
        let sql = self.render_chunk();
        let count = self.rows.len();
        db::execute(conn, &sql)?;
        self.inserted += count;
        self.rows.clear();
        Ok(())
    }

    /// Rows pushed through completed flushes.
    pub fn inserted(&self) -> usize {
        self.inserted
    }

    fn render_chunk(&self) -> String {
        format!(
            "INSERT INTO {} ({}) VALUES {}{};",
            self.table,
            self.columns.join(","),
            self.rows.join(","),
            self.on_conflict.render()
        )
    }
}

/// Keys already present in an output table, for resume-by-diffing.
pub fn existing_keys(
    conn: &mut PgConnection,
    table: &str,
    key_column: &str,
    filter: Option<&str>,
) -> Result<HashSet<String>> {
    let where_clause = filter.map(|f| format!(" WHERE {f}")).unwrap_or_default();
    let rows = db::text_column(
        conn,
        &format!("SELECT {key_column}::text AS value FROM {table}{where_clause}"),
    )?;
    Ok(rows.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inserter(on_conflict: OnConflict) -> BatchInsert {
        BatchInsert::new("t", &["id", "n"], on_conflict, 500)
    }

    #[test]
    fn renders_multi_row_chunk() {
        let mut batch = inserter(OnConflict::Error);
        batch.rows.push("('a',1)".into());
        batch.rows.push("('b',2)".into());
        assert_eq!(batch.render_chunk(), "INSERT INTO t (id,n) VALUES ('a',1),('b',2);");
    }

    #[test]
    fn renders_do_nothing_suffix() {
        let mut batch = inserter(OnConflict::DoNothing { target: "id".into() });
        batch.rows.push("('a',1)".into());
        assert_eq!(
            batch.render_chunk(),
            "INSERT INTO t (id,n) VALUES ('a',1) ON CONFLICT (id) DO NOTHING;"
        );
    }

    #[test]
    fn renders_do_update_suffix() {
        let mut batch = inserter(OnConflict::DoUpdate {
            target: "id".into(),
            columns: vec!["n".into()],
        });
        batch.rows.push("('a',1)".into());
        assert_eq!(
            batch.render_chunk(),
            "INSERT INTO t (id,n) VALUES ('a',1) ON CONFLICT (id) DO UPDATE SET n=EXCLUDED.n;"
        );
    }

    #[test]
    fn values_render_with_escaping_and_nulls() {
        assert_eq!(SqlValue::Text("it's".into()).render(), "'it''s'");
        assert_eq!(SqlValue::Int(-3).render(), "-3");
        assert_eq!(SqlValue::Null.render(), "NULL");
        assert_eq!(SqlValue::Float(f64::NAN).render(), "NULL");
        assert_eq!(SqlValue::Raw("ST_MakePoint(1,2)".into()).render(), "ST_MakePoint(1,2)");
    }
}
