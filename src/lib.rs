//! # Capture Coordinator
//!
//! Coordinates archival captures of submitted web pages ("seeds") with an
//! external crawler. Seeds are validated against SSRF targets, stored, and
//! handed to the crawler through a request list on a Valkey/Redis broker.
//! The crawler pushes one result per request onto a result list; a single
//! background listener consumes those results and drives each seed through
//! its capture lifecycle:
//!
//! ```text
//! NotEnqueued --enqueue--> Pending --result--> DoneSuccess | DoneFailure
//! ```
//!
//! Successful captures record where the replay system serves the archived
//! copy and when it was harvested.
//!
//! ## Wire format
//!
//! Requests and results are JSON objects with the crawler's field names:
//!
//! ```text
//! {"SeedURL": "https://example.com", "SeedShadowID": "...", "Status": "NotEnqueued"}
//! {"SeedShadowID": "...", "Done": true, "ErrorMessages": null,
//!  "CaptureMetadata": {"Timestamp": "20240101120000", "CapturedUrl": "https://example.com/"}}
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use capture_coordinator::{CaptureService, Config, Metrics, RedisQueue, RedisSeedStore, SeedService};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let metrics = Arc::new(Metrics::new());
//!     let queue = Arc::new(RedisQueue::connect(&config.broker).await?);
//!     let store = Arc::new(RedisSeedStore::connect(&config.store, &config.broker).await?);
//!     let seeds = Arc::new(SeedService::new(store, metrics.clone(), &config));
//!     let service = Arc::new(CaptureService::new(queue, seeds, metrics, config.listener.clone()));
//!
//!     let shutdown = CancellationToken::new();
//!     let listener = service.listen_for_results(shutdown.clone());
//!
//!     let group = service.seeds().save("example.com\nhttps://example.org/page", true).await?;
//!     service.capture_group(&group).await?;
//!
//!     shutdown.cancel();
//!     listener.await?;
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! capture-coordinator serve
//! capture-coordinator submit example.com https://example.org --wait
//! capture-coordinator validate-url http://10.0.0.1/
//! ```

/// Configuration and settings
pub mod config;

/// Error types and error handling utilities
pub mod error;

/// Capture lifecycle states and result handling rules
pub mod state;

/// Seeds, seed groups and shadow ids
pub mod seed;

/// Capture request and result messages
pub mod capture;

/// SSRF-hardened validation of submitted URLs
pub mod url_validator;

/// Capture timestamps and archival URLs
pub mod metadata;

/// Request/result channel abstraction and the in-process queue
pub mod queue;

/// Valkey/Redis backed queue
pub mod broker;

/// Seed persistence contract
pub mod store;

/// Seed store shared through the broker
pub mod redis_store;

/// Seed submission layer
pub mod seed_service;

/// Capture orchestration
pub mod capture_service;

/// Background result consumer
pub mod listener;

/// Command-line interface implementation
pub mod cli;

/// Performance metrics collection and monitoring
pub mod metrics;

/// Broker and queue health checks
pub mod health;

#[cfg(test)]
mod tests;

pub use broker::*;
pub use capture::*;
pub use capture_service::*;
pub use cli::*;
pub use config::*;
pub use error::*;
pub use health::*;
pub use listener::*;
pub use metadata::*;
pub use queue::*;
pub use redis_store::*;
pub use seed::*;
pub use seed_service::*;
pub use self::metrics::*;
pub use state::*;
pub use store::*;
pub use url_validator::*;
