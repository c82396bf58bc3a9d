//! Invalidation events as stored in the durable log.

/// One row of the append-only invalidation log.
///
/// Producers insert events with a null `seq`; the sequencer later assigns
/// a global, strictly increasing sequence number. `data` carries a
/// comma-separated list of cache keys to delete, but the engine only
/// interprets it at the dispatch boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationEvent {
    /// Store-assigned identifier, strictly increasing per insert but not
    /// necessarily contiguous.
    pub id: i64,
    /// Global sequence number, `None` until the sequencer assigns it.
    pub seq: Option<i64>,
    /// Opaque payload; the present deployment writes `key1,key2,...`.
    pub data: String,
}

impl InvalidationEvent {
    /// The assigned sequence number, or 0 when still unsequenced.
    pub fn sequence(&self) -> i64 {
        self.seq.unwrap_or(0)
    }

    /// Approximate payload size in bytes, used for byte-budget batching.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Cache keys encoded in the payload. Empty segments are skipped so
    /// that a trailing comma or an empty payload yields no keys.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.data.split(',').filter(|key| !key.is_empty())
    }
}
