//! Per-server delivery offsets.

use serde::Serialize;

/// Durable cursor for one cache server: the highest sequence number that
/// has been dispatched to the server and committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OffsetRecord {
    pub server_name: String,
    pub last_seq: i64,
}
