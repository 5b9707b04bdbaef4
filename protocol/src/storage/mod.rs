//! # Storage Module
//!
//! Durable history for the coordinator. The engine itself is an in-memory
//! state machine; this module persists the ordered command journal and the
//! state after each command so a restarted node resumes exactly where it
//! stopped.
//!
//! Bincode for everything on disk. JSON is for the API; bincode is for
//! storage.

pub mod db;

pub use db::{DbError, DbResult, VaultDb};
