//! Infrastructure layer: queues, experiment stores, pipeline clients, config.

pub mod config;
pub mod jobs;
pub mod pipeline;
pub mod queue;
pub mod store;
