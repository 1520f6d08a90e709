//! Sync module for the local replica and the central store
//!
//! Provides:
//! - Globally ordered sync versions
//! - Push of dirty records with an ownership gate
//! - Incremental pull by per-project cursor
//! - Split ownership detection and resolution
//!
//! # Sync Cycle
//!
//! 1. Check the central store is reachable
//! 2. Push dirty records; each gets a fresh `sync_version`
//! 3. On ownership rejections, detect split ownership and either report it
//!    or reassign to the central owner and push again
//! 4. Pull rows newer than each project's cursor, skipping what was just
//!    pushed
//!
//! # Invariants
//!
//! - Central `sync_version` values are unique and strictly increasing
//! - A record only leaves the dirty set once the central store has it
//! - Cursors never move backwards

mod conflict;
pub(crate) mod pull;
pub(crate) mod push;
mod service;
mod store;
mod types;
pub(crate) mod version;

pub use conflict::OwnershipConflictResolver;
pub use pull::PullEngine;
pub use push::PushEngine;
pub use service::SyncService;
pub use store::CursorStore;
pub use types::*;
pub use version::VersionAuthority;
