//! Core service for the persona journal: persisted entries and attribute
//! totals, AI gain estimation, calendar views and JSON export/import.

pub mod calendar;
pub mod cell;
pub mod codec;
pub mod estimator;
pub mod journal;
pub mod model;
pub mod server;
pub mod store;
