//! Infrastructure adapters: Postgres store, Redis dispatcher, telemetry,
//! and the HTTP control surface.

pub mod db;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod telemetry;
