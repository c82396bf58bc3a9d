//! In-memory collaborators for driving the whole relay in tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use spurgo::application::ports::{CacheDispatcher, DispatchError, EventStore, StoreError};
use spurgo::domain::InvalidationEvent;

#[derive(Default)]
struct LogState {
    events: Vec<InvalidationEvent>,
    offsets: HashMap<String, i64>,
    next_id: i64,
}

/// Vec-backed event log standing in for Postgres.
#[derive(Default)]
pub struct FakeLog {
    state: Mutex<LogState>,
    fail_offset_writes: AtomicBool,
    scan_count: AtomicUsize,
}

impl FakeLog {
    /// Producer-side insert: a new row with a null sequence number.
    pub fn insert(&self, data: &str) {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        state.events.push(InvalidationEvent {
            id,
            seq: None,
            data: data.to_string(),
        });
    }

    pub fn offset(&self, server_name: &str) -> Option<i64> {
        self.state.lock().unwrap().offsets.get(server_name).copied()
    }

    pub fn event_count(&self) -> usize {
        self.state.lock().unwrap().events.len()
    }

    pub fn min_seq(&self) -> Option<i64> {
        self.sequenced().first().map(InvalidationEvent::sequence)
    }

    /// How many unprocessed-event scans the sequencer has run.
    pub fn scan_count(&self) -> usize {
        self.scan_count.load(Ordering::SeqCst)
    }

    pub fn fail_offset_writes(&self, fail: bool) {
        self.fail_offset_writes.store(fail, Ordering::SeqCst);
    }

    fn sequenced(&self) -> Vec<InvalidationEvent> {
        let state = self.state.lock().unwrap();
        let mut events: Vec<_> = state
            .events
            .iter()
            .filter(|event| event.seq.is_some())
            .cloned()
            .collect();
        events.sort_by_key(InvalidationEvent::sequence);
        events
    }
}

#[async_trait]
impl EventStore for FakeLog {
    async fn get_last_events(&self, limit: u64) -> Result<Vec<InvalidationEvent>, StoreError> {
        let mut events = self.sequenced();
        let keep = events.len().saturating_sub(limit as usize);
        Ok(events.split_off(keep))
    }

    async fn get_unprocessed_events(
        &self,
        limit: u64,
    ) -> Result<Vec<InvalidationEvent>, StoreError> {
        self.scan_count.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        let mut events: Vec<_> = state
            .events
            .iter()
            .filter(|event| event.seq.is_none())
            .cloned()
            .collect();
        events.sort_by_key(|event| event.id);
        events.truncate(limit as usize);
        Ok(events)
    }

    async fn get_events_from(
        &self,
        from_seq: i64,
        limit: u64,
    ) -> Result<Vec<InvalidationEvent>, StoreError> {
        let mut events = self.sequenced();
        events.retain(|event| event.sequence() >= from_seq);
        events.truncate(limit as usize);
        Ok(events)
    }

    async fn update_sequences(&self, events: &[InvalidationEvent]) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        for assigned in events {
            let current = state.events.iter().find(|event| event.id == assigned.id);
            if current.is_none_or(|event| event.seq.is_some()) {
                return Err(StoreError::SequenceConflict);
            }
        }
        for assigned in events {
            if let Some(row) = state
                .events
                .iter_mut()
                .find(|event| event.id == assigned.id)
            {
                row.seq = assigned.seq;
            }
        }
        Ok(())
    }

    async fn get_min_sequence(&self) -> Result<Option<i64>, StoreError> {
        Ok(self.min_seq())
    }

    async fn delete_events_before(&self, before_seq: i64) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let cutoff_id = state
            .events
            .iter()
            .find(|event| event.seq == Some(before_seq))
            .map(|event| event.id);
        if let Some(cutoff_id) = cutoff_id {
            state
                .events
                .retain(|event| event.id >= cutoff_id || event.seq.is_none());
        }
        Ok(())
    }

    async fn get_last_sequence(&self, server_name: &str) -> Result<Option<i64>, StoreError> {
        Ok(self.offset(server_name))
    }

    async fn set_last_sequence(&self, server_name: &str, seq: i64) -> Result<(), StoreError> {
        if self.fail_offset_writes.load(Ordering::SeqCst) {
            return Err(StoreError::from_persistence("injected offset failure"));
        }
        let mut state = self.state.lock().unwrap();
        state.offsets.insert(server_name.to_string(), seq);
        Ok(())
    }
}

struct ClusterState {
    /// Live keys per server, pre-seeded by tests.
    caches: HashMap<i64, HashSet<String>>,
    /// Every dispatch call in order: (server id, keys).
    calls: Vec<(i64, Vec<String>)>,
    failing: HashSet<i64>,
}

/// A pair of fake cache servers standing in for Redis.
pub struct FakeCacheCluster {
    server_ids: Vec<i64>,
    state: Mutex<ClusterState>,
}

impl FakeCacheCluster {
    pub fn new(server_ids: &[i64]) -> Self {
        let caches = server_ids.iter().map(|&id| (id, HashSet::new())).collect();
        Self {
            server_ids: server_ids.to_vec(),
            state: Mutex::new(ClusterState {
                caches,
                calls: Vec::new(),
                failing: HashSet::new(),
            }),
        }
    }

    pub fn seed_key(&self, server_id: i64, key: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(cache) = state.caches.get_mut(&server_id) {
            cache.insert(key.to_string());
        }
    }

    pub fn has_key(&self, server_id: i64, key: &str) -> bool {
        let state = self.state.lock().unwrap();
        state
            .caches
            .get(&server_id)
            .is_some_and(|cache| cache.contains(key))
    }

    pub fn fail_server(&self, server_id: i64, fail: bool) {
        let mut state = self.state.lock().unwrap();
        if fail {
            state.failing.insert(server_id);
        } else {
            state.failing.remove(&server_id);
        }
    }

    pub fn calls_for(&self, server_id: i64) -> Vec<Vec<String>> {
        let state = self.state.lock().unwrap();
        state
            .calls
            .iter()
            .filter(|(id, _)| *id == server_id)
            .map(|(_, keys)| keys.clone())
            .collect()
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }
}

#[async_trait]
impl CacheDispatcher for FakeCacheCluster {
    fn server_ids(&self) -> Vec<i64> {
        self.server_ids.clone()
    }

    fn server_name(&self, server_id: i64) -> String {
        format!("redis:{server_id}")
    }

    async fn delete_keys(&self, server_id: i64, keys: Vec<String>) -> Result<(), DispatchError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push((server_id, keys.clone()));
        if state.failing.contains(&server_id) {
            return Err(DispatchError::transient("injected server failure"));
        }
        if let Some(cache) = state.caches.get_mut(&server_id) {
            for key in &keys {
                cache.remove(key);
            }
        }
        Ok(())
    }
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
