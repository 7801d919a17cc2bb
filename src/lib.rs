//! Data preparation for the LOONE Lake Okeechobee model.
//!
//! Keeps a workspace of daily CSV datasets current against DBHYDRO,
//! GEOGLOWS, Open-Meteo and NOAA NCAT, and derives the secondary inputs
//! (interpolated water quality, shear stress, viscosity) from them.

pub mod analysis;
pub mod config;
pub mod datasets;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod report;
pub mod retry;
pub mod stations;
pub mod store;
pub mod sync;
pub mod verify;
