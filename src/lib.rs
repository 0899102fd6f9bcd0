//! # ingestq
//!
//! Deduplicating job orchestrator for document ingestion.
//!
//! Change events pass a dedup filter into a FIFO queue. A dispatcher drains
//! the queue under a concurrency cap, handing each event to a worker (a tokio
//! task or an OS process). Workers append progress records to a per-job
//! status log that a poller merges into the job registry. The registry is
//! exposed through a small control API.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod model;
pub mod progress;
pub mod queue;
pub mod registry;
pub mod telemetry;
pub mod worker;
