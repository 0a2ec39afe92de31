//! Step 1: create the project database, spatial extensions and roles.

use async_trait::async_trait;
use diesel::{Connection, PgConnection};
use tracing::info;

use crate::db::{self, quote_literal};
use crate::error::Result;
use crate::pipeline::{Step, StepContext};

const DB_COMMENT: &str = "An SQL database for Urban Liveability Index related data.";

pub struct CreateDatabase;

#[async_trait]
impl Step for CreateDatabase {
    fn seq(&self) -> u16 {
        1
    }

    fn slug(&self) -> &'static str {
        "create-database"
    }

    fn task(&self) -> &'static str {
        "Create liveability database, spatial extensions and analysis role"
    }

    async fn run(&self, ctx: &StepContext) -> Result<()> {
        let pg = &ctx.config.postgresql;

        // CREATE DATABASE cannot run against the target itself; use the
        // maintenance database for this step only.
        let mut admin = PgConnection::establish(&ctx.config.admin_url()?)
            .map_err(|e| crate::error::Error::Connection(e.to_string()))?;

        let exists = db::scalar_count(
            &mut admin,
            &format!(
                "SELECT COUNT(*) AS count FROM pg_database WHERE datname = {}",
                quote_literal(&pg.database)
            ),
        )? > 0;

        if exists {
            info!(database = %pg.database, "database already exists; skipping create");
        } else {
            db::execute(
                &mut admin,
                &format!(
                    "CREATE DATABASE {} WITH OWNER = {} ENCODING = 'UTF8' \
                     TEMPLATE template0 CONNECTION LIMIT = -1;",
                    pg.database, pg.user
                ),
            )?;
            db::execute(
                &mut admin,
                &format!(
                    "COMMENT ON DATABASE {} IS {};",
                    pg.database,
                    quote_literal(DB_COMMENT)
                ),
            )?;
            info!(database = %pg.database, "database created");
        }

        let mut conn = ctx.conn()?;
        db::execute(&mut conn, "CREATE EXTENSION IF NOT EXISTS postgis;")?;
        db::execute(&mut conn, "CREATE EXTENSION IF NOT EXISTS pgrouting;")?;

        if let Some(ref r_user) = pg.r_user {
            let role_exists = db::scalar_count(
                &mut conn,
                &format!(
                    "SELECT COUNT(*) AS count FROM pg_roles WHERE rolname = {}",
                    quote_literal(r_user)
                ),
            )? > 0;
            if !role_exists {
                db::execute(
                    &mut conn,
                    &format!(
                        "CREATE USER {r_user} WITH LOGIN NOSUPERUSER NOCREATEDB \
                         NOCREATEROLE INHERIT NOREPLICATION CONNECTION LIMIT -1;"
                    ),
                )?;
            }
            db::execute(
                &mut conn,
                &format!(
                    "GRANT CONNECT ON DATABASE {} TO {};",
                    pg.database, r_user
                ),
            )?;
            db::execute(
                &mut conn,
                &format!("GRANT SELECT ON ALL TABLES IN SCHEMA public TO {r_user};"),
            )?;
        }

        Ok(())
    }
}
