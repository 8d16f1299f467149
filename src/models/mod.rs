//! Core data models for the upload courier.
//!
//! Persistent entities map to SQLite rows via `sqlx::FromRow`; the rest are
//! per-request values that never outlive a single pipeline run.

pub mod account;
pub mod delivery;
pub mod inventory;
pub mod object;
pub mod orphan;
pub mod token;
