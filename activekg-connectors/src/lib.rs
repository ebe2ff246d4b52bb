#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]

//! # ActiveKG Connectors
//!
//! Ingestion pipeline for the active knowledge graph:
//!
//! - [`connector`]: the `Connector` trait and provider registry (S3, GCS,
//!   Drive), interface-level reqwest adapters
//! - [`encryption`]: AES-256-GCM secrets at rest with versioned KEKs and
//!   rotation support
//! - [`config_store`]: cached connector configs with pub/sub invalidation
//! - [`webhooks`]: SNS signature verification, topic allowlists, GCS
//!   shared-secret ingress, replay dedup
//! - [`queue`]: per-tenant Redis FIFO queues and dead-letter lists
//! - [`worker`]: the long-running ingestion consumer (fetch, chunk, upsert)
//! - [`rotation`]: batched KEK re-encryption
//! - [`kv_redis`]: the Redis `KvStore` backend
//! - [`fetcher`]: remote payload-ref loader with private-IP confinement

pub mod config_store;
pub mod connector;
pub mod encryption;
pub mod extraction;
pub mod fetcher;
pub mod kv_redis;
pub mod providers;
pub mod queue;
pub mod rotation;
pub mod schemas;
pub mod types;
pub mod webhooks;
pub mod worker;

pub use config_store::{ConfigSubscriber, ConnectorConfigStore, SubscriberHealth, CONFIG_CHANNEL};
pub use connector::{Connector, ConnectorRegistry};
pub use encryption::{SecretEncryption, SECRET_FIELDS};
pub use kv_redis::RedisKv;
pub use types::{ChangeItem, ChangeOperation, ConnectorStats, FetchResult};
pub use worker::IngestionWorker;
