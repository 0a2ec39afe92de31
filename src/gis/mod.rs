//! Network-analysis engine abstraction.
//!
//! Service-area solves and origin-destination matrices are owned by an
//! external engine; the pipeline only consumes their results. The trait keeps
//! the steps independent of which engine is wired in; production uses the
//! PostGIS/pgRouting adapter.

pub mod postgis;

use diesel::pg::PgConnection;

use crate::config::DestinationClass;
use crate::error::Result;

/// One dissolved service-area line per origin point, as WKT in the
/// workspace SRID.
#[derive(Debug, Clone)]
pub struct ServiceAreaLine {
    pub point_id: String,
    pub wkt: String,
}

/// Network distance from an origin to one destination feature.
#[derive(Debug, Clone)]
pub struct OdDistance {
    pub point_id: String,
    pub dest_oid: i64,
    pub distance_m: i32,
}

/// Count of destination features reachable within a cutoff of an origin.
#[derive(Debug, Clone)]
pub struct OdCount {
    pub point_id: String,
    pub count: i32,
}

/// The network-analysis operations the pipeline depends on.
///
/// Implementations receive the caller's connection so that each pool worker
/// keeps its own; the engine holds no connection state of its own.
pub trait NetworkEngine: Send + Sync {
    /// Solve service areas of `distance_m` along the network for the given
    /// origin points and return the dissolved line geometry per origin.
    fn service_area_lines(
        &self,
        conn: &mut PgConnection,
        origin_ids: &[String],
        distance_m: i32,
    ) -> Result<Vec<ServiceAreaLine>>;

    /// Network distance from every parcel in a hex to its closest
    /// destination of the given class.
    fn closest_destinations(
        &self,
        conn: &mut PgConnection,
        hex: i32,
        dest: &DestinationClass,
    ) -> Result<Vec<OdDistance>>;

    /// Count of destinations of the given class within its cutoff distance
    /// of every parcel in a hex.
    fn destination_counts(
        &self,
        conn: &mut PgConnection,
        hex: i32,
        dest: &DestinationClass,
    ) -> Result<Vec<OdCount>>;

    /// Network distance from every parcel in a hex to the closest public
    /// open space of at least `min_area_ha` hectares.
    fn closest_open_space(
        &self,
        conn: &mut PgConnection,
        hex: i32,
        min_area_ha: f64,
    ) -> Result<Vec<OdDistance>>;
}
