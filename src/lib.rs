//! Storage layer for a field-survey and panorama-capture pipeline.
//!
//! Records are created on field kits ("malettes") and merged later, so every
//! table is keyed by `(local_id, malette_id)` and references between tables
//! are two-column foreign keys. See [`db::Database`] for the entry point.

pub mod config;
pub mod db;
pub mod logging;
pub mod malette;
