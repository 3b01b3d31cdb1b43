//! Database module for linkwatch.
//!
//! Provides SQLite storage behind the `Storage` trait, with the schema
//! applied from an embedded migration.

mod models;
mod store;

pub use models::*;
pub use store::*;
