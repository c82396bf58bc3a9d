//! Redis-backed cache dispatcher.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::info;

use crate::application::ports::{CacheDispatcher, DispatchError};
use crate::config::RedisServerSettings;

use super::error::InfraError;

/// One managed connection per configured Redis server.
///
/// The connection manager reconnects on its own, so a flapping server
/// surfaces as transient dispatch errors that the retry consumer rides
/// out.
pub struct RedisDispatcher {
    servers: Vec<(i64, ConnectionManager)>,
}

impl RedisDispatcher {
    pub async fn connect(servers: &[RedisServerSettings]) -> Result<Self, InfraError> {
        let mut connections = Vec::with_capacity(servers.len());
        for server in servers {
            info!(server_id = server.id, addr = %server.addr, "Connecting to Redis");
            let client = redis::Client::open(format!("redis://{}", server.addr))
                .map_err(|err| InfraError::cache_server(err.to_string()))?;
            let manager = ConnectionManager::new(client)
                .await
                .map_err(|err| InfraError::cache_server(err.to_string()))?;
            connections.push((server.id, manager));
        }
        connections.sort_by_key(|(server_id, _)| *server_id);
        Ok(Self {
            servers: connections,
        })
    }
}

#[async_trait]
impl CacheDispatcher for RedisDispatcher {
    fn server_ids(&self) -> Vec<i64> {
        self.servers.iter().map(|(server_id, _)| *server_id).collect()
    }

    fn server_name(&self, server_id: i64) -> String {
        format!("redis:{server_id}")
    }

    async fn delete_keys(&self, server_id: i64, keys: Vec<String>) -> Result<(), DispatchError> {
        if keys.is_empty() {
            return Ok(());
        }
        let Some((_, manager)) = self
            .servers
            .iter()
            .find(|(candidate, _)| *candidate == server_id)
        else {
            return Err(DispatchError::transient(format!(
                "unknown cache server id {server_id}"
            )));
        };

        let mut connection = manager.clone();
        connection
            .del::<_, ()>(keys)
            .await
            .map_err(DispatchError::transient)
    }
}
