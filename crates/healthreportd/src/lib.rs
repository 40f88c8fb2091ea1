//! Health report daemon library
//!
//! Answers `HealthReport:Request` signals with a health report document
//! generated from the active profile's metrics storage.

pub mod bridge;
pub mod config;
pub mod context;
pub mod engine;
pub mod generator;
pub mod pool;
pub mod profile;
pub mod reporter;
pub mod storage;
pub mod transport;
