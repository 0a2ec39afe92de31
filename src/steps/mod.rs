//! The pipeline stages, in execution order.
//!
//! Ordering is load-bearing: each step depends on tables created by the
//! steps before it. The registry is the single source of that order.

pub mod abs_indicators;
pub mod area_linkage;
pub mod area_variation;
pub mod create_database;
pub mod destination_indicators;
pub mod dwelling_density;
pub mod exclusions;
pub mod hex_parcel_counts;
pub mod load_abs_tables;
pub mod od_closest;
pub mod od_counts;
pub mod od_open_space;
pub mod open_space_indicators;
pub mod parcel_coordinates;
pub mod road_indicators;
pub mod sausage_buffers;
pub mod street_connectivity;
pub mod uli;
pub mod walkability;

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

use crate::error::{Error, Result, StepError};
use crate::pipeline::{Step, StepContext};

/// All steps, in execution order.
pub fn registry() -> Vec<Box<dyn Step>> {
    vec![
        Box::new(create_database::CreateDatabase),
        Box::new(load_abs_tables::LoadAbsTables),
        Box::new(area_linkage::AreaLinkage),
        Box::new(parcel_coordinates::ParcelCoordinates),
        Box::new(hex_parcel_counts::HexParcelCounts),
        Box::new(sausage_buffers::SausageBuffers),
        Box::new(od_closest::OdClosestDestinations),
        Box::new(od_counts::OdDestinationCounts),
        Box::new(od_open_space::OdOpenSpace),
        Box::new(dwelling_density::DwellingDensity),
        Box::new(street_connectivity::StreetConnectivity),
        Box::new(road_indicators::RoadIndicators),
        Box::new(destination_indicators::DestinationIndicators),
        Box::new(open_space_indicators::OpenSpaceIndicators),
        Box::new(abs_indicators::AbsIndicators),
        Box::new(walkability::WalkabilityIndex),
        Box::new(exclusions::ExcludeParcels),
        Box::new(uli::UrbanLiveabilityIndex),
        Box::new(area_variation::AreaVariation),
    ]
}

/// Hex ids carrying parcels, the unit of work for the parallel steps.
pub(crate) fn hex_list(ctx: &StepContext) -> Result<Vec<i32>> {
    let mut conn = ctx.conn()?;
    let rows = crate::db::text_column(
        &mut conn,
        &format!(
            "SELECT DISTINCT hex_id::text AS value FROM {} ORDER BY value",
            ctx.config.parcels.parcel_dwellings
        ),
    )?;
    Ok(rows.into_iter().filter_map(|v| v.parse().ok()).collect())
}

/// Run a per-hex worker over a fixed-width pool of blocking tasks.
///
/// Each worker takes its own context clone (and thus its own pooled
/// connection); a failed hex is counted and the pool moves on, matching the
/// resume model of the progress tables.
pub(crate) async fn for_each_hex<F>(ctx: &StepContext, hexes: Vec<i32>, worker: F) -> Result<usize>
where
    F: Fn(&StepContext, i32) -> Result<()> + Send + Sync + 'static,
{
    let width = ctx.config.network.workers.min(num_cpus::get().max(1));
    let semaphore = Arc::new(Semaphore::new(width));
    let worker = Arc::new(worker);
    let mut pool = JoinSet::new();

    for hex in hexes {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| Error::Step(StepError::Worker { hex, detail: e.to_string() }))?;
        let ctx = ctx.clone();
        let worker = Arc::clone(&worker);
        pool.spawn_blocking(move || {
            let _permit = permit;
            (hex, worker(&ctx, hex))
        });
    }

    let mut failed = 0;
    while let Some(joined) = pool.join_next().await {
        match joined {
            Ok((_, Ok(()))) => {}
            Ok((hex, Err(e))) => {
                warn!(hex, error = %e, "hex worker failed; continuing");
                failed += 1;
            }
            Err(e) => {
                warn!(error = %e, "hex worker panicked; continuing");
                failed += 1;
            }
        }
    }
    Ok(failed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_dense_and_ordered() {
        let registry = registry();
        assert_eq!(registry.len(), 19);
        for (i, step) in registry.iter().enumerate() {
            assert_eq!(step.seq() as usize, i + 1, "step {} out of order", step.slug());
        }
    }

    #[test]
    fn slugs_are_unique_and_kebab_case() {
        let registry = registry();
        let mut slugs: Vec<&str> = registry.iter().map(|s| s.slug()).collect();
        for slug in &slugs {
            assert!(
                slug.chars().all(|c| c.is_ascii_lowercase() || c == '-'),
                "slug {slug} not kebab-case"
            );
        }
        slugs.sort_unstable();
        slugs.dedup();
        assert_eq!(slugs.len(), registry.len());
    }
}
