//! Step 12: local versus heavy road exposure within walkable neighbourhoods.
//!
//! Road centre-lines intersecting each sausage buffer are measured per road
//! class (0-1 highway/freeway, 2-4 heavy, 5 local), then `ind_roads` derives
//! the balance indicators: local-to-heavy ratios, the signed length
//! difference per hectare and the standardised difference.

use async_trait::async_trait;
use tracing::info;

use crate::db;
use crate::error::Result;
use crate::pipeline::{Step, StepContext};
use crate::steps::sausage_buffers::{buffer_table, neighbourhood_table};

pub struct RoadIndicators;

#[async_trait]
impl Step for RoadIndicators {
    fn seq(&self) -> u16 {
        12
    }

    fn slug(&self) -> &'static str {
        "road-indicators"
    }

    fn task(&self) -> &'static str {
        "Create local vs heavy road length and balance indicator tables"
    }

    fn outputs(&self) -> Vec<String> {
        vec!["road_length".into(), "ind_roads".into()]
    }

    async fn run(&self, ctx: &StepContext) -> Result<()> {
        let mut conn = ctx.conn()?;
        let pid = ctx.config.parcels.id_column();
        let distance = ctx.config.network.distance;
        let roads = &ctx.config.roads.road_lines;

        db::execute_all(&mut conn, &length_statements(&pid, roads, distance))?;
        info!(
            rows = db::table_count(&mut conn, "road_length")?,
            "road lengths tallied"
        );

        db::execute_all(&mut conn, &indicator_statements(&pid, distance))?;
        info!(
            rows = db::table_count(&mut conn, "ind_roads")?,
            "ind_roads created"
        );
        Ok(())
    }
}

/// Length of intersecting road per class bucket, in metres, per buffer.
fn length_statements(pid: &str, roads: &str, distance: i32) -> Vec<String> {
    let buffers = buffer_table(distance);
    let class_sum = |classes: &str| {
        format!(
            "COALESCE(SUM(CASE WHEN r.class_code IN ({classes})
                               THEN ST_Length(ST_Intersection(r.geom, b.geom)) END), 0)::integer"
        )
    };
    vec![
        "DROP TABLE IF EXISTS road_length;".to_string(),
        format!(
            "CREATE TABLE road_length AS
             SELECT b.{pid},
                    {hf} AS roads_hfreeways,
                    {heavy} AS roads_heavy,
                    {local} AS roads_local
               FROM {buffers} b
               LEFT JOIN {roads} r ON ST_Intersects(r.geom, b.geom)
              GROUP BY b.{pid};",
            hf = class_sum("0, 1"),
            heavy = class_sum("2, 3, 4"),
            local = class_sum("5"),
        ),
        format!("ALTER TABLE road_length ADD PRIMARY KEY ({pid});"),
    ]
}

/// The ratio and balance formulas; a zero denominator falls back to the
/// opposite length plus one so the ratio stays finite and ordered.
fn indicator_statements(pid: &str, distance: i32) -> Vec<String> {
    let nh = neighbourhood_table(distance);
    vec![
        "DROP TABLE IF EXISTS ind_roads;".to_string(),
        format!(
            "CREATE TABLE ind_roads AS
             SELECT DISTINCT p.{pid},
                    nh.area_ha,
                    roads_heavy,
                    roads_local,
                    CASE WHEN roads_heavy = 0
                              THEN (roads_local + 1)/1::double precision
                         ELSE roads_local/roads_heavy::double precision
                          END AS local_to_heavy_roads,
                    CASE WHEN roads_local = 0
                              THEN (roads_heavy + 1)/1::double precision
                         ELSE roads_heavy/roads_local::double precision
                          END AS heavy_to_local_roads,
                    (roads_local - roads_heavy)/nh.area_ha::double precision
                      AS local_road_balance_density,
                    CASE WHEN roads_local + roads_heavy = 0
                              THEN 0
                         ELSE ((roads_local - roads_heavy)
                               /(0.5*(roads_local + roads_heavy)::double precision))::double precision
                          END AS local_road_diff_std
               FROM parcelmb p
               LEFT JOIN road_length rl ON p.{pid} = rl.{pid}
               LEFT JOIN {nh} nh ON rl.{pid} = nh.{pid};"
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn road_lengths_bucket_by_class_code() {
        let create = &length_statements("detail_pid", "roadsany", 1600)[1];
        assert!(create.contains("CASE WHEN r.class_code IN (0, 1)"));
        assert!(create.contains("CASE WHEN r.class_code IN (2, 3, 4)"));
        assert!(create.contains("CASE WHEN r.class_code IN (5)"));
        assert!(create.contains("LEFT JOIN roadsany r ON ST_Intersects(r.geom, b.geom)"));
        assert!(create.contains("FROM sausagebuffer_1600 b"));
    }

    #[test]
    fn balance_ratios_survive_zero_denominators() {
        let create = &indicator_statements("detail_pid", 1600)[1];
        assert!(create.contains("WHEN roads_heavy = 0"));
        assert!(create.contains("(roads_local + 1)/1::double precision"));
        assert!(create.contains("WHEN roads_local + roads_heavy = 0"));
        assert!(create.contains("LEFT JOIN nh1600m nh"));
    }
}
