//! Relay: owns the engine tasks and the root cancellation token.
//!
//! `start` spawns one sequencer, one retry consumer per configured cache
//! server, and one retention job. `shutdown` cancels the root token;
//! every task observes it at its next suspension point and exits, after
//! which `join` returns.

use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::application::ports::{CacheDispatcher, EventStore};

use super::config::RelayConfig;
use super::consumer::RetryConsumer;
use super::hub::SubscriptionHub;
use super::retention::RetentionJob;
use super::sequencer::Sequencer;

/// Clonable handle for waking the sequencer, handed to the HTTP notify
/// route. Signals are coalesced: many rapid calls cost one extra pass.
#[derive(Clone)]
pub struct RelayNotifier {
    wake: Arc<Notify>,
}

impl RelayNotifier {
    pub fn notify(&self) {
        self.wake.notify_one();
    }
}

pub struct Relay {
    cancel: CancellationToken,
    wake: Arc<Notify>,
    tasks: Vec<JoinHandle<()>>,
}

impl Relay {
    /// Spawn the engine over the given collaborators.
    pub fn start(
        store: Arc<dyn EventStore>,
        dispatcher: Arc<dyn CacheDispatcher>,
        config: RelayConfig,
    ) -> Self {
        let cancel = CancellationToken::new();
        let wake = Arc::new(Notify::new());
        let retention_nudge = Arc::new(Notify::new());
        let hub = SubscriptionHub::new(Arc::clone(&store), config.ring_capacity());

        let server_ids = dispatcher.server_ids();
        let server_names: Vec<String> = server_ids
            .iter()
            .map(|&server_id| dispatcher.server_name(server_id))
            .collect();
        info!(servers = ?server_names, "Starting invalidation relay");

        let mut tasks = Vec::with_capacity(server_ids.len() + 2);

        let sequencer = Sequencer::new(
            Arc::clone(&store),
            Arc::clone(&hub),
            Arc::clone(&wake),
            config.sequencer.clone(),
        );
        tasks.push(tokio::spawn(sequencer.run(cancel.clone())));

        for server_id in server_ids {
            let consumer = RetryConsumer::new(
                Arc::clone(&hub),
                Arc::clone(&store),
                Arc::clone(&dispatcher),
                server_id,
                Arc::clone(&retention_nudge),
                config.consumer.clone(),
            );
            tasks.push(tokio::spawn(consumer.run(cancel.clone())));
        }

        let retention = RetentionJob::new(
            Arc::clone(&store),
            hub,
            server_names,
            retention_nudge,
            config.retention.clone(),
        );
        tasks.push(tokio::spawn(retention.run(cancel.clone())));

        Self {
            cancel,
            wake,
            tasks,
        }
    }

    /// Wake the sequencer: new events may exist.
    pub fn notify(&self) {
        self.wake.notify_one();
    }

    /// Handle for waking the sequencer from elsewhere (HTTP surface).
    pub fn notifier(&self) -> RelayNotifier {
        RelayNotifier {
            wake: Arc::clone(&self.wake),
        }
    }

    /// Cancel the root token. Tasks exit at their next suspension point.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Wait for every task to exit. Call after [`Relay::shutdown`].
    pub async fn join(mut self) {
        for task in std::mem::take(&mut self.tasks) {
            let _ = task.await;
        }
        info!("Invalidation relay stopped");
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.shutdown();
    }
}
