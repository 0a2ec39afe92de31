//! Step 10: dwellings per hectare over each parcel's walkable neighbourhood.
//!
//! Dwelling counts of every meshblock intersecting the parcel's sausage
//! buffer are summed in full and divided by the buffer area. A buffer that
//! touches no meshblock records zero dwellings, not a missing row.

use async_trait::async_trait;
use tracing::info;

use crate::db;
use crate::error::Result;
use crate::pipeline::{Step, StepContext};
use crate::steps::sausage_buffers::buffer_table;

pub struct DwellingDensity;

#[async_trait]
impl Step for DwellingDensity {
    fn seq(&self) -> u16 {
        10
    }

    fn slug(&self) -> &'static str {
        "dwelling-density"
    }

    fn task(&self) -> &'static str {
        "Create table of dwelling density per hectare within walkable neighbourhoods"
    }

    fn outputs(&self) -> Vec<String> {
        vec!["dwelling_density".into()]
    }

    async fn run(&self, ctx: &StepContext) -> Result<()> {
        let mut conn = ctx.conn()?;
        let pid = ctx.config.parcels.id_column();
        let distance = ctx.config.network.distance;

        db::execute_all(&mut conn, &create_statements(&pid, distance))?;
        info!(
            rows = db::table_count(&mut conn, "dwelling_density")?,
            "dwelling_density created"
        );
        Ok(())
    }
}

fn create_statements(pid: &str, distance: i32) -> Vec<String> {
    let buffers = buffer_table(distance);
    vec![
        "DROP TABLE IF EXISTS dwelling_density;".to_string(),
        format!(
            "CREATE TABLE dwelling_density AS
             SELECT b.{pid},
                    COALESCE(SUM(mb.dwelling), 0) AS dwellings,
                    (ST_Area(b.geom)/10000)::double precision AS area_ha,
                    COALESCE(SUM(mb.dwelling), 0)
                      / (ST_Area(b.geom)/10000)::double precision AS dd_nh{distance}m
               FROM {buffers} b
               LEFT JOIN abs_linkage mb ON ST_Intersects(b.geom, mb.geom)
              GROUP BY b.{pid}, b.geom;"
        ),
        format!("ALTER TABLE dwelling_density ADD PRIMARY KEY ({pid});"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn density_sums_whole_meshblocks_over_buffer_area() {
        let statements = create_statements("detail_pid", 1600);
        let create = &statements[1];
        assert!(create.contains("COALESCE(SUM(mb.dwelling), 0)"));
        assert!(create.contains("(ST_Area(b.geom)/10000)::double precision AS area_ha"));
        assert!(create.contains("AS dd_nh1600m"));
        // whole counts, not apportioned by overlap
        assert!(!create.contains("ST_Intersection"));
    }

    #[test]
    fn buffers_without_meshblocks_keep_their_row() {
        let create = &create_statements("detail_pid", 1600)[1];
        assert!(create.contains("LEFT JOIN abs_linkage mb ON ST_Intersects(b.geom, mb.geom)"));
    }
}
