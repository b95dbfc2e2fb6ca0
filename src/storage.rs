//! Storage subsystem
//!
//! This module provides the SQLite persistence used by the study engine.
//!
//! Components:
//! - `database_storage`: the backend; `sqlx` for transactional session writes,
//!   SeaORM entities for catalog reads and toggles.
//! - `db_entities`: SeaORM entity models for the catalog tables.
//! - `types`: shared data types (categories, scenarios, images, report rows).
//! - `session_filter`: helpers to build session queries.

pub mod database_storage;
pub mod db_entities;
pub mod session_filter;
pub mod types;

pub use database_storage::DatabaseStorage;
