//! Provider adapters.
//!
//! These are interface-level REST adapters: enough surface for stat,
//! text fetch, and incremental listing. Deployment-specific concerns
//! (request signing, service-account token exchange) sit in front of them -
//! the `credentials` config field carries an already-usable bearer token
//! where one is needed.

mod drive;
mod gcs;
mod s3;

pub use drive::DriveConnector;
pub use gcs::GcsConnector;
pub use s3::S3Connector;

use std::time::Duration;

/// Shared HTTP client settings for provider adapters.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(5))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}
