//! Database module for StationWatch.
//!
//! Provides SQLite storage with embedded migrations and the repository
//! traits the monitoring engine is written against.

#[cfg(test)]
pub mod memory;
mod models;
mod repo;
mod store;

pub use models::*;
pub use repo::*;
pub use store::*;
