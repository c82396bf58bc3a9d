//! Spurgo: a cache invalidation relay.
//!
//! Producers append invalidation events (comma-separated cache keys) to
//! a Postgres log; Spurgo assigns each event a global sequence number,
//! fans the sequenced stream out to one retry consumer per Redis server,
//! commits per-server delivery offsets, and trims events that every
//! server has processed.

pub mod application;
pub mod config;
pub mod domain;
pub mod engine;
pub mod infra;
