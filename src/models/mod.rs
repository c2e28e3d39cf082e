//! Core data models for the document service.
//!
//! Rows map to SQLite tables via `sqlx::FromRow` and serialize as JSON via
//! `serde`.

pub mod document;
pub mod nomina;
pub mod progress;
