//! The invalidation relay engine.
//!
//! Four cooperating tasks over one durable log: the sequencer numbers
//! freshly inserted events, the hub fans the sequenced stream out, one
//! retry consumer per cache server delivers batches and commits its
//! offset, and the retention job trims events every consumer has
//! crossed. [`Relay`] owns the tasks and the root cancellation token.

mod backoff;
pub mod config;
mod consumer;
pub mod hub;
mod lock;
mod relay;
mod retention;
mod ring;
mod sequencer;

pub use config::{ConsumerConfig, RelayConfig, RetentionConfig, SequencerConfig};
pub use consumer::RetryConsumer;
pub use hub::{FetchError, FetchLimits, Subscription, SubscriptionHub};
pub use relay::{Relay, RelayNotifier};
pub use retention::RetentionJob;
pub use sequencer::Sequencer;
