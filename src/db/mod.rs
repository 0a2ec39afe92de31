//! Database layer: Diesel connection pooling over PostgreSQL and helpers for
//! the raw SQL that the pipeline steps are built from.
//!
//! Tables here are working tables, dropped and recreated by whichever step
//! owns them; there is no migrations framework by design.

pub mod batch;

use diesel::pg::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sql_types::{BigInt, Text};
use diesel::{QueryableByName, RunQueryDsl};

use crate::error::{Error, Result};

/// Database connection pool type alias.
pub type DbPool = Pool<ConnectionManager<PgConnection>>;

/// A checked-out pooled connection.
pub type DbConn = PooledConnection<ConnectionManager<PgConnection>>;

/// Create a connection pool for the given database URL.
///
/// Connections are established lazily: the create-database step runs
/// before the target database exists, so connection failures surface at
/// first checkout rather than here.
pub fn create_pool(database_url: &str, max_size: u32) -> Result<DbPool> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Ok(Pool::builder()
        .max_size(max_size)
        .min_idle(Some(0))
        .build_unchecked(manager))
}

/// Execute a raw SQL statement, returning the affected row count.
pub fn execute(conn: &mut PgConnection, sql: &str) -> Result<usize> {
    diesel::sql_query(sql)
        .execute(conn)
        .map_err(|e| Error::Database(format!("{e} (statement: {})", head(sql))))
}

/// Execute a sequence of raw SQL statements in order.
pub fn execute_all(conn: &mut PgConnection, statements: &[String]) -> Result<()> {
    for sql in statements {
        execute(conn, sql)?;
    }
    Ok(())
}

#[derive(QueryableByName)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    count: i64,
}

#[derive(QueryableByName)]
struct TextRow {
    #[diesel(sql_type = Text)]
    value: String,
}

/// Run a query returning a single bigint column aliased `count`.
pub fn scalar_count(conn: &mut PgConnection, sql: &str) -> Result<i64> {
    let row: CountRow = diesel::sql_query(sql)
        .get_result(conn)
        .map_err(|e| Error::Database(format!("{e} (statement: {})", head(sql))))?;
    Ok(row.count)
}

/// Count the rows of a table.
pub fn table_count(conn: &mut PgConnection, table: &str) -> Result<i64> {
    scalar_count(conn, &format!("SELECT COUNT(*) AS count FROM {table}"))
}

/// Whether a table exists in the current database (any schema).
pub fn table_exists(conn: &mut PgConnection, table: &str) -> Result<bool> {
    let (schema, name) = match table.split_once('.') {
        Some((s, n)) => (s.to_string(), n.to_string()),
        None => ("public".to_string(), table.to_string()),
    };
    let count = scalar_count(
        conn,
        &format!(
            "SELECT COUNT(*) AS count FROM information_schema.tables \
             WHERE table_schema = {} AND table_name = {}",
            quote_literal(&schema),
            quote_literal(&name)
        ),
    )?;
    Ok(count > 0)
}

/// Run a query returning a single text column aliased `value`.
pub fn text_column(conn: &mut PgConnection, sql: &str) -> Result<Vec<String>> {
    let rows: Vec<TextRow> = diesel::sql_query(sql)
        .load(conn)
        .map_err(|e| Error::Database(format!("{e} (statement: {})", head(sql))))?;
    Ok(rows.into_iter().map(|r| r.value).collect())
}

/// Escape and quote a string as a SQL literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// First line of a statement, for error context.
fn head(sql: &str) -> String {
    let line = sql.trim().lines().next().unwrap_or_default().trim();
    if line.len() > 120 {
        format!("{}...", &line[..120])
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_literal_escapes_single_quotes() {
        assert_eq!(quote_literal("O'Brien St"), "'O''Brien St'");
        assert_eq!(quote_literal("plain"), "'plain'");
    }

    #[test]
    fn head_truncates_long_statements() {
        let sql = format!("SELECT {}", "x,".repeat(200));
        assert!(head(&sql).ends_with("..."));
        assert_eq!(head("\n  DROP TABLE t;\n  more"), "DROP TABLE t;");
    }
}
