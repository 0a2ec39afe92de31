//! Liveability - ETL pipeline for the Urban Liveability Index dataset.
//!
//! This crate rebuilds a research dataset of parcel-level liveability
//! indicators for a metropolitan study region. The work is organised as an
//! ordered registry of pipeline steps, each of which transforms data in a
//! PostgreSQL/PostGIS database: loading ABS reference tables, linking parcels
//! to statistical areas, solving walkable network catchments ("sausage
//! buffers") and origin-destination matrices, and finally assembling the
//! composite Urban Liveability Index.
//!
//! # Modules
//!
//! - [`config`] - Typed configuration loaded from TOML files
//! - [`error`] - Error types for the crate
//! - [`db`] - Connection pooling and the chunked batch-insert utility
//! - [`gis`] - The network-analysis engine port and its PostGIS adapter
//! - [`pipeline`] - Step trait, registry, runner, progress and run-log helpers
//! - [`steps`] - The pipeline stages, in execution order
//! - [`cli`] - Command-line interface
//!
//! # Example
//!
//! ```no_run
//! use liveability::config::Config;
//! use liveability::steps;
//!
//! let config = Config::load("config.toml").unwrap();
//! for step in steps::registry() {
//!     println!("{:02} {}", step.seq(), step.slug());
//! }
//! # let _ = config;
//! ```

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod gis;
pub mod pipeline;
pub mod steps;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
