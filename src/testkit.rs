//! Shared fixtures for unit and integration tests.

use std::path::PathBuf;

use crate::config::{
    AbsConfig, AirPollutionConfig, Config, DataConfig, DestinationClass, DestinationConfig,
    LoggingConfig, NetworkConfig, ParcelConfig, PosConfig, PostgresConfig, RoadConfig,
    WorkspaceConfig,
};

/// A fully-populated configuration for a small Melbourne-like study region.
pub fn sample_config() -> Config {
    Config {
        postgresql: PostgresConfig {
            host: "localhost".into(),
            port: 5432,
            database: "li_melb_2016".into(),
            user: "li".into(),
            password: Some("li_pass".into()),
            admin_database: "postgres".into(),
            r_user: None,
            pool_size: 2,
        },
        data: DataConfig {
            folder_path: std::env::temp_dir(),
            study_region: "melb".into(),
            meshblocks: "mb_dwellings".into(),
            suburbs: "suburb_ssc_2016".into(),
            lgas: "lga_2016".into(),
        },
        abs: AbsConfig {
            employment: PathBuf::from("abs_employment.csv"),
            car_ownership: PathBuf::from("abs_car_ownership.csv"),
            travel_to_work: PathBuf::from("abs_travel_to_work.csv"),
            live_work_sa3: PathBuf::from("abs_live_work_sa3.csv"),
            affordable_housing: PathBuf::from("abs_affordable_housing.csv"),
            tenure: PathBuf::from("abs_tenure.csv"),
            irsd: PathBuf::from("abs_2011_irsd.csv"),
        },
        parcels: ParcelConfig {
            parcel_dwellings: "parcel_dwellings".into(),
            parcel_id: "detail_pid".into(),
            meshblock_code: "mb_code11".into(),
        },
        destinations: DestinationConfig {
            study_destinations: "study_destinations".into(),
            destination_id: "dest_oid".into(),
            classes: vec![
                dest("supermarkets", 1, 1000),
                dest("busstop2012", 2, 400),
                dest("libraries_2014", 3, 1000),
                dest("swimmingpools", 4, 1200),
            ],
        },
        roads: RoadConfig {
            network_edges: "edges_pedestrian".into(),
            network_nodes: "nodes_pedestrian".into(),
            intersections: PathBuf::from("cleaned_intersections_12m.csv"),
            road_lines: "roadsany".into(),
        },
        pos: PosConfig {
            areas: "open_space_areas".into(),
            large_park_ha: 1.5,
        },
        network: NetworkConfig {
            distance: 1600,
            line_buffer: 50,
            tolerance: 500,
            group_by: 200,
            sql_chunkify: 500,
            workers: 4,
        },
        workspace: WorkspaceConfig {
            srid: 3111,
            hex_grid: "hex_3200m_diag".into(),
            uli_schema: "uli_test".into(),
        },
        air_pollution: AirPollutionConfig {
            no2: PathBuf::from("no2_predictions.csv"),
            no2_table: "no2_pred".into(),
        },
        logging: LoggingConfig::default(),
    }
}

pub fn dest(name: &str, code: i16, cutoff_m: i32) -> DestinationClass {
    DestinationClass {
        name: name.into(),
        code,
        cutoff_m,
    }
}
