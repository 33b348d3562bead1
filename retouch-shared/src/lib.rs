//! # Retouch Shared Library
//!
//! Photo enhancement lifecycle and credit accounting core, shared by the
//! Retouch API server and the enhancement worker.
//!
//! ## Module Organization
//!
//! - `models`: Typed records and their Postgres operations
//! - `store`: `Store` trait with Postgres and in-memory backends
//! - `db`: Connection pool and migrations
//! - `ledger`: Credit reservations, grants and clawbacks
//! - `quota`: Free-tier and paid authorization of enhancements
//! - `lifecycle`: Photo state machine and job dispatch
//! - `payments`: Payment webhook verification and idempotent top-ups
//! - `storage`: Asset storage trait with memory and filesystem backends
//! - `media`: Image type checks
//! - `context`: `CoreServices` wiring
//! - `config`: Core limits and policies
//! - `error`: Common error types

pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod media;
pub mod models;
pub mod payments;
pub mod quota;
pub mod storage;
pub mod store;

/// Current version of the Retouch shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
