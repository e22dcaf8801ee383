//! # Gateway Client
//!
//! A resilient API gateway client: the single chokepoint through which an
//! administrative front end talks to its REST backend. Gives transparent,
//! correct semantics to arbitrarily many concurrent callers over an
//! unreliable network, using one shared credential and one shared cache.
//!
//! ## Features
//!
//! - **Response Cache**: read-only requests are served from a TTL cache
//!   without touching the network
//! - **Single-Flight Refresh**: concurrent auth failures coalesce onto one
//!   token refresh, then every affected request replays with the new token
//! - **Retry with Backoff**: transient failures (no response, 5xx, 429)
//!   retry with a configurable delay schedule
//! - **Offline Queue**: mutating requests issued while disconnected are
//!   buffered and replayed in order on reconnect
//! - **Pluggable Platform**: durable storage and connectivity monitoring
//!   sit behind small traits with in-memory test doubles
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gateway_client::{Gateway, GatewayConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let gateway = Gateway::new(GatewayConfig::from_env())?;
//!
//!     let outcome = gateway.get("/users/current").send().await?;
//!     if let Some(response) = outcome.into_response() {
//!         println!("status: {}", response.status());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## With Injected Platform Adapters
//!
//! ```rust,no_run
//! use gateway_client::{
//!     FileStorage, Gateway, GatewayConfig, ManualConnectivity, RetryPolicy,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GatewayConfig::builder()
//!         .base_url("https://api.example.com")
//!         .retry(RetryPolicy::linear(3, Duration::from_millis(300)))
//!         .cache_ttl(Duration::from_secs(30))
//!         .build();
//!
//!     let connectivity = Arc::new(ManualConnectivity::new(true));
//!     let gateway = Gateway::builder(config)
//!         .storage(Arc::new(FileStorage::new("gateway-state.json")))
//!         .connectivity(connectivity.clone())
//!         .build()?;
//!
//!     // A mutation while offline is queued and replayed on reconnect.
//!     connectivity.set_online(false);
//!     let outcome = gateway
//!         .put("/projects/42")
//!         .json(&serde_json::json!({"name": "renamed"}))
//!         .send()
//!         .await?;
//!     assert!(outcome.is_queued());
//!     connectivity.set_online(true);
//!
//!     Ok(())
//! }
//! ```

mod auth;
mod cache;
mod config;
mod connectivity;
mod error;
mod gateway;
mod pipeline;
mod queue;
mod request;
mod response;
mod retry;
mod storage;
mod transport;

pub use auth::{AuthCoordinator, AuthEvent, Credential};
pub use cache::{CacheKey, ResponseCache};
pub use config::{BASE_URL_ENV, GatewayConfig, GatewayConfigBuilder};
pub use connectivity::{ConnectivityMonitor, ManualConnectivity, ProbeConnectivity};
pub use error::{GatewayError, Result};
pub use gateway::{Gateway, GatewayBuilder, Outcome};
pub use pipeline::{Stage, StageChain};
pub use queue::{OfflineQueue, QueueEvent, QueuedTicket};
pub use request::{Body, Part, PartValue, RequestBuilder, RequestDescriptor, RequestOptions};
pub use response::Response;
pub use retry::{BackoffStrategy, RetryPolicy};
pub use storage::{CredentialStore, FileStorage, MemoryStorage, Storage};

// Re-export common types
pub use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
pub use url::Url;
pub use bytes::Bytes;

/// Prelude for common imports.
///
/// ```
/// use gateway_client::prelude::*;
/// ```
pub mod prelude {
    pub use crate::auth::{AuthEvent, Credential};
    pub use crate::config::{GatewayConfig, GatewayConfigBuilder};
    pub use crate::connectivity::{ConnectivityMonitor, ManualConnectivity};
    pub use crate::error::{GatewayError, Result};
    pub use crate::gateway::{Gateway, Outcome};
    pub use crate::queue::{QueueEvent, QueuedTicket};
    pub use crate::request::{RequestBuilder, RequestOptions};
    pub use crate::response::Response;
    pub use crate::retry::{BackoffStrategy, RetryPolicy};
    pub use crate::storage::{MemoryStorage, Storage};
    pub use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
}
