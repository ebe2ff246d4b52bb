#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_docs_in_private_items)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::float_cmp)]

//! # ActiveKG Core
//!
//! Core engine for the active knowledge-graph retrieval system: a multi-tenant
//! graph of embedded document nodes that is kept "live" by a background refresh
//! loop and queried through hybrid (vector + lexical) retrieval.
//!
//! ## Core Concepts
//!
//! - **Nodes**: documents and chunks with classes, JSON props, and an optional
//!   L2-normalized embedding of process-constant dimension
//! - **Edges**: typed relations between nodes; `DERIVED_FROM` carries lineage
//! - **Events**: append-only audit entries (`created`, `updated`, `deleted`,
//!   `refreshed`, `trigger_fired`)
//! - **Patterns**: named reference vectors evaluated by the trigger engine
//! - **Refresh policies**: cron or interval schedules with drift-gated event
//!   emission
//!
//! ## Module Organization
//!
//! ### Primary APIs
//! - [`retrieval`]: hybrid search and the cited question-answering pipeline
//! - [`refresh`]: due-node selection and the re-embedding scheduler
//! - [`triggers`]: similarity-pattern trigger evaluation
//! - [`embeddings`]: embedding provider abstraction and similarity math
//!
//! ### Support Modules
//! - [`types`]: domain types shared across the system
//! - [`storage`]: tenant-scoped storage backend abstraction
//! - [`kv`]: key-value store abstraction (queues, dedup, rate counters)
//! - [`search`]: score fusion, decay reweighting, and reranking
//! - [`chunking`]: bounded-size text chunking with overlap
//! - [`telemetry`]: in-process counters, gauges, and histograms
//! - [`config`]: environment-driven settings

pub mod chunking;
pub mod config;
pub mod constants;
pub mod embeddings;
pub mod error;
pub mod kv;
pub mod refresh;
pub mod retrieval;
pub mod search;
pub mod storage;
pub mod telemetry;
pub mod triggers;
pub mod types;

pub use config::Settings;
pub use error::{Error, Result};
pub use storage::GraphStore;
pub use telemetry::Telemetry;
pub use types::{
    Edge, Event, EventType, Node, NodeVersion, Pattern, RefreshPolicy, RequestContext, ScoreType,
    TriggerSpec,
};
