//! Ports describing the engine's external collaborators.
//!
//! The engine only ever talks to the durable log and to the cache servers
//! through these traits; drivers live under `infra`.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::InvalidationEvent;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("persistence error: {0}")]
    Persistence(String),
    /// The conditional sequence update found a row whose `seq` was
    /// already assigned. Expected under contention; the sequencer
    /// retries the pass from a fresh starting point.
    #[error("sequence already assigned for at least one event")]
    SequenceConflict,
    #[error("database timeout")]
    Timeout,
}

impl StoreError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dispatch failed: {0}")]
    Transient(String),
}

impl DispatchError {
    pub fn transient(err: impl std::fmt::Display) -> Self {
        Self::Transient(err.to_string())
    }
}

/// Durable event log plus the per-server offset table.
///
/// All reads of sequenced events exclude rows whose `seq` is still null.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Top `limit` events by `seq` descending, returned in ascending
    /// order. Used once at sequencer start to preload the ring.
    async fn get_last_events(&self, limit: u64) -> Result<Vec<InvalidationEvent>, StoreError>;

    /// The `limit` smallest-`id` rows with a null `seq`, ascending by id.
    async fn get_unprocessed_events(
        &self,
        limit: u64,
    ) -> Result<Vec<InvalidationEvent>, StoreError>;

    /// Sequenced events with `seq >= from_seq`, ascending, at most `limit`.
    async fn get_events_from(
        &self,
        from_seq: i64,
        limit: u64,
    ) -> Result<Vec<InvalidationEvent>, StoreError>;

    /// Bulk-assign the sequence numbers carried by `events`.
    ///
    /// The update is conditional: it only applies where the stored `seq`
    /// is still null. If any row already carries a sequence number the
    /// whole call fails with [`StoreError::SequenceConflict`] and no
    /// assignment from this call survives.
    async fn update_sequences(&self, events: &[InvalidationEvent]) -> Result<(), StoreError>;

    /// Smallest assigned sequence number, or `None` when no sequenced
    /// events exist.
    async fn get_min_sequence(&self) -> Result<Option<i64>, StoreError>;

    /// Delete events with `seq < before_seq`. Safe when none match.
    async fn delete_events_before(&self, before_seq: i64) -> Result<(), StoreError>;

    /// Committed offset for `server_name`, or `None` when the server has
    /// no offset row yet.
    async fn get_last_sequence(&self, server_name: &str) -> Result<Option<i64>, StoreError>;

    /// Upsert the committed offset for `server_name`.
    async fn set_last_sequence(&self, server_name: &str, seq: i64) -> Result<(), StoreError>;
}

/// Outbound side: deletes keys on a named cache server.
///
/// Deletion is idempotent, so re-delivering a batch after a crash is
/// harmless. Partial success is reported as an error and the whole batch
/// is retried.
#[async_trait]
pub trait CacheDispatcher: Send + Sync {
    /// Configured server ids, ascending and stable for the process
    /// lifetime.
    fn server_ids(&self) -> Vec<i64>;

    /// Stable display name for a server, used as the offset key.
    fn server_name(&self, server_id: i64) -> String;

    /// Delete `keys` on the given server. Key order is irrelevant.
    async fn delete_keys(&self, server_id: i64, keys: Vec<String>) -> Result<(), DispatchError>;
}
