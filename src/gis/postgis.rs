//! PostGIS/pgRouting adapter for the network-analysis engine.
//!
//! The routable pedestrian network lives in the project database (edge and
//! node tables built during road network setup), so service areas and OD
//! matrices are solved where the data already is. All geometry and routing
//! algorithms belong to PostGIS/pgRouting; this adapter only assembles SQL.

use diesel::pg::PgConnection;
use diesel::sql_types::{BigInt, Integer, Text};
use diesel::{QueryableByName, RunQueryDsl};

use crate::config::{Config, DestinationClass};
use crate::db::quote_literal;
use crate::error::{Error, Result};
use crate::gis::{NetworkEngine, OdCount, OdDistance, ServiceAreaLine};

/// Engine backed by PostGIS + pgRouting over the configured network tables.
pub struct PostgisEngine {
    parcels: String,
    parcel_id: String,
    destinations: String,
    destination_id: String,
    edges: String,
    nodes: String,
    pos_areas: String,
    tolerance_m: i32,
}

impl PostgisEngine {
    pub fn from_config(config: &Config) -> Self {
        Self {
            parcels: config.parcels.parcel_dwellings.clone(),
            parcel_id: config.parcels.parcel_id.to_lowercase(),
            destinations: config.destinations.study_destinations.clone(),
            destination_id: config.destinations.destination_id.to_lowercase(),
            edges: config.roads.network_edges.clone(),
            nodes: config.roads.network_nodes.clone(),
            pos_areas: config.pos.areas.clone(),
            tolerance_m: config.network.tolerance,
        }
    }

    /// Edge relation in the form pgRouting expects.
    fn edge_sql(&self) -> String {
        quote_literal(&format!(
            "SELECT gid AS id, source, target, length_m AS cost FROM {}",
            self.edges
        ))
    }

    /// CTE snapping the parcels of one hex to their nearest network node
    /// within the search tolerance.
    fn origin_cte(&self, hex: i32) -> String {
        format!(
            "origin AS (
               SELECT p.{pid}::text AS point_id,
                      (SELECT n.id FROM {nodes} n
                        WHERE ST_DWithin(n.geom, p.geom, {tol})
                        ORDER BY n.geom <-> p.geom LIMIT 1) AS node_id
                 FROM {parcels} p
                WHERE p.hex_id = {hex})",
            pid = self.parcel_id,
            nodes = self.nodes,
            tol = self.tolerance_m,
            parcels = self.parcels,
            hex = hex
        )
    }

    fn od_rows(&self, conn: &mut PgConnection, sql: &str) -> Result<Vec<OdDistance>> {
        let rows: Vec<OdDistanceRow> = diesel::sql_query(sql)
            .load(conn)
            .map_err(|e| Error::Gis(e.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|r| OdDistance {
                point_id: r.point_id,
                dest_oid: r.dest_oid,
                distance_m: r.distance_m,
            })
            .collect())
    }
}

#[derive(QueryableByName)]
struct ServiceAreaRow {
    #[diesel(sql_type = Text)]
    point_id: String,
    #[diesel(sql_type = Text)]
    wkt: String,
}

#[derive(QueryableByName)]
struct OdDistanceRow {
    #[diesel(sql_type = Text)]
    point_id: String,
    #[diesel(sql_type = BigInt)]
    dest_oid: i64,
    #[diesel(sql_type = Integer)]
    distance_m: i32,
}

#[derive(QueryableByName)]
struct OdCountRow {
    #[diesel(sql_type = Text)]
    point_id: String,
    #[diesel(sql_type = Integer)]
    count: i32,
}

impl NetworkEngine for PostgisEngine {
    fn service_area_lines(
        &self,
        conn: &mut PgConnection,
        origin_ids: &[String],
        distance_m: i32,
    ) -> Result<Vec<ServiceAreaLine>> {
        if origin_ids.is_empty() {
            return Ok(Vec::new());
        }
        let id_list = origin_ids
            .iter()
            .map(|id| quote_literal(id))
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "WITH origin AS (
               SELECT p.{pid}::text AS point_id,
                      (SELECT n.id FROM {nodes} n
                        WHERE ST_DWithin(n.geom, p.geom, {tol})
                        ORDER BY n.geom <-> p.geom LIMIT 1) AS node_id
                 FROM {parcels} p
                WHERE p.{pid} IN ({ids})),
             reached AS (
               SELECT o.point_id, d.edge
                 FROM origin o
                CROSS JOIN LATERAL pgr_drivingDistance(
                       {edges_sql}, o.node_id, {dist}, directed := false) d
                WHERE o.node_id IS NOT NULL AND d.edge >= 0)
             SELECT r.point_id AS point_id,
                    ST_AsText(ST_LineMerge(ST_Collect(e.geom))) AS wkt
               FROM reached r
               JOIN {edges} e ON e.gid = r.edge
              GROUP BY r.point_id",
            pid = self.parcel_id,
            nodes = self.nodes,
            tol = self.tolerance_m,
            parcels = self.parcels,
            ids = id_list,
            edges_sql = self.edge_sql(),
            dist = distance_m,
            edges = self.edges,
        );
        let rows: Vec<ServiceAreaRow> = diesel::sql_query(sql)
            .load(conn)
            .map_err(|e| Error::Gis(e.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|r| ServiceAreaLine {
                point_id: r.point_id,
                wkt: r.wkt,
            })
            .collect())
    }

    fn closest_destinations(
        &self,
        conn: &mut PgConnection,
        hex: i32,
        dest: &DestinationClass,
    ) -> Result<Vec<OdDistance>> {
        let sql = format!(
            "WITH {origin},
             dest AS (
               SELECT d.{did}::bigint AS dest_oid,
                      (SELECT n.id FROM {nodes} n
                        WHERE ST_DWithin(n.geom, d.geom, {tol})
                        ORDER BY n.geom <-> d.geom LIMIT 1) AS node_id
                 FROM {dests} d
                WHERE d.dest_class = {class}),
             od AS (
               SELECT c.start_vid, c.end_vid, c.agg_cost
                 FROM pgr_dijkstraCost(
                        {edges_sql},
                        (SELECT array_agg(DISTINCT node_id) FROM origin WHERE node_id IS NOT NULL),
                        (SELECT array_agg(DISTINCT node_id) FROM dest WHERE node_id IS NOT NULL),
                        directed := false) c)
             SELECT DISTINCT ON (o.point_id)
                    o.point_id AS point_id,
                    d.dest_oid AS dest_oid,
                    od.agg_cost::integer AS distance_m
               FROM od
               JOIN origin o ON o.node_id = od.start_vid
               JOIN dest d ON d.node_id = od.end_vid
              ORDER BY o.point_id, od.agg_cost",
            origin = self.origin_cte(hex),
            did = self.destination_id,
            nodes = self.nodes,
            tol = self.tolerance_m,
            dests = self.destinations,
            class = dest.code,
            edges_sql = self.edge_sql(),
        );
        self.od_rows(conn, &sql)
    }

    fn destination_counts(
        &self,
        conn: &mut PgConnection,
        hex: i32,
        dest: &DestinationClass,
    ) -> Result<Vec<OdCount>> {
        let sql = format!(
            "WITH {origin},
             dest AS (
               SELECT d.{did}::bigint AS dest_oid,
                      (SELECT n.id FROM {nodes} n
                        WHERE ST_DWithin(n.geom, d.geom, {tol})
                        ORDER BY n.geom <-> d.geom LIMIT 1) AS node_id
                 FROM {dests} d
                WHERE d.dest_class = {class}),
             od AS (
               SELECT c.start_vid, c.end_vid, c.agg_cost
                 FROM pgr_dijkstraCost(
                        {edges_sql},
                        (SELECT array_agg(DISTINCT node_id) FROM origin WHERE node_id IS NOT NULL),
                        (SELECT array_agg(DISTINCT node_id) FROM dest WHERE node_id IS NOT NULL),
                        directed := false) c
                WHERE c.agg_cost <= {cutoff})
             SELECT o.point_id AS point_id,
                    COUNT(DISTINCT d.dest_oid)::integer AS count
               FROM origin o
               LEFT JOIN od ON o.node_id = od.start_vid
               LEFT JOIN dest d ON d.node_id = od.end_vid
              GROUP BY o.point_id",
            origin = self.origin_cte(hex),
            did = self.destination_id,
            nodes = self.nodes,
            tol = self.tolerance_m,
            dests = self.destinations,
            class = dest.code,
            edges_sql = self.edge_sql(),
            cutoff = dest.cutoff_m,
        );
        let rows: Vec<OdCountRow> = diesel::sql_query(sql)
            .load(conn)
            .map_err(|e| Error::Gis(e.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|r| OdCount {
                point_id: r.point_id,
                count: r.count,
            })
            .collect())
    }

    fn closest_open_space(
        &self,
        conn: &mut PgConnection,
        hex: i32,
        min_area_ha: f64,
    ) -> Result<Vec<OdDistance>> {
        // Open spaces are polygons; entry is taken as the nearest network
        // node to the polygon boundary.
        let sql = format!(
            "WITH {origin},
             dest AS (
               SELECT a.gid::bigint AS dest_oid,
                      (SELECT n.id FROM {nodes} n
                        ORDER BY n.geom <-> ST_Boundary(a.geom) LIMIT 1) AS node_id
                 FROM {areas} a
                WHERE ST_Area(a.geom) >= {min_sqm}),
             od AS (
               SELECT c.start_vid, c.end_vid, c.agg_cost
                 FROM pgr_dijkstraCost(
                        {edges_sql},
                        (SELECT array_agg(DISTINCT node_id) FROM origin WHERE node_id IS NOT NULL),
                        (SELECT array_agg(DISTINCT node_id) FROM dest WHERE node_id IS NOT NULL),
                        directed := false) c)
             SELECT DISTINCT ON (o.point_id)
                    o.point_id AS point_id,
                    d.dest_oid AS dest_oid,
                    od.agg_cost::integer AS distance_m
               FROM od
               JOIN origin o ON o.node_id = od.start_vid
               JOIN dest d ON d.node_id = od.end_vid
              ORDER BY o.point_id, od.agg_cost",
            origin = self.origin_cte(hex),
            nodes = self.nodes,
            areas = self.pos_areas,
            min_sqm = min_area_ha * 10_000.0,
            edges_sql = self.edge_sql(),
        );
        self.od_rows(conn, &sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::sample_config;

    #[test]
    fn edge_sql_is_a_quoted_relation() {
        let engine = PostgisEngine::from_config(&sample_config());
        let sql = engine.edge_sql();
        assert!(sql.starts_with('\''));
        assert!(sql.contains("length_m AS cost"));
        assert!(sql.contains("edges_pedestrian"));
    }

    #[test]
    fn origin_cte_filters_by_hex_and_tolerance() {
        let engine = PostgisEngine::from_config(&sample_config());
        let cte = engine.origin_cte(42);
        assert!(cte.contains("p.hex_id = 42"));
        assert!(cte.contains("ST_DWithin(n.geom, p.geom, 500)"));
    }
}
