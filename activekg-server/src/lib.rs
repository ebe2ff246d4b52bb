#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

//! # ActiveKG Server
//!
//! HTTP surface for the active knowledge graph:
//!
//! - [`auth`]: bearer JWT validation (HS256/RS256) and scope checks
//! - [`rate_limit`]: shared fixed-window limiting and concurrency caps
//! - [`routes`]: the full endpoint table, including SSE `/ask/stream` and
//!   webhook ingress
//! - [`lifecycle`]: startup/shutdown orchestration of the scheduler,
//!   subscriber, and ingestion workers
//! - [`error`]: stable `{detail, error_type}` error bodies

pub mod auth;
pub mod error;
pub mod lifecycle;
pub mod rate_limit;
pub mod routes;
pub mod state;

pub use lifecycle::Application;
pub use state::AppState;
