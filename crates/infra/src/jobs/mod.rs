//! Evaluation job system: enqueue fan-out, queue consumer, dead-lettering.
//!
//! ## Design
//!
//! - One enqueue request resolves a set and writes one message per item
//! - The consumer evaluates messages on a bounded worker pool
//! - Retries come from queue redelivery, bounded by a max delivery count
//! - Poison and exhausted messages go to a dead-letter sink, body verbatim
//!
//! ## Components
//!
//! - `Enqueuer`: resolves a set and writes `PipelineJob` messages
//! - `SetResolver`: maps a set name to its items (in-memory or manifest files)
//! - `QueueConsumer`: runs jobs and records results in the experiment store
//! - `DeadLetterSink`: keeps failed messages for inspection

pub mod consumer;
pub mod dead_letter;
pub mod enqueuer;
pub mod resolver;
pub mod types;

pub use consumer::{ConsumerConfig, ConsumerHandle, ConsumerStats, Outcome, QueueConsumer};
pub use dead_letter::{DeadLetterReason, DeadLetterRecord, DeadLetterSink, InMemoryDeadLetterStore};
pub use enqueuer::{EnqueueError, Enqueuer, EnqueuerConfig};
pub use resolver::{
    InMemorySetCatalog, ManifestSetResolver, ResolutionError, ResolvedSet, SetItem, SetResolver,
};
pub use types::{EnqueueRequest, EnqueueResponse, PipelineJob, ValidatedJob};
