//! Activity Sync
//!
//! Offline-first replication of project activities between an embedded
//! local replica and a shared central store.
//!
//! # Modules
//!
//! - `db`: store handles, the activity repository and local schema migration
//! - `sync`: version authority, push, pull and ownership conflict handling
//! - `routes`: local control API
//!
//! The daemon binary is in main.rs.

pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;
pub mod sync;

pub use error::{Result, SyncError};
