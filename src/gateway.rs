//! The gateway object: owns every collaborator and exposes `request()`.

use crate::auth::{AuthCoordinator, AuthEvent, Credential};
use crate::cache::ResponseCache;
use crate::config::GatewayConfig;
use crate::connectivity::{ConnectivityMonitor, ManualConnectivity};
use crate::pipeline::{AuthStage, CacheStage, OfflineStage, RetryStage, StageChain};
use crate::queue::{OfflineQueue, QueueEvent, QueuedTicket};
use crate::request::{RequestBuilder, RequestDescriptor, resolve_url};
use crate::storage::{CredentialStore, MemoryStorage, Storage};
use crate::transport::Transport;
use crate::{GatewayError, Response, Result};
use http::Method;
use serde::Serialize;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Result of a gateway request.
///
/// `Queued` is not a failure: the request was buffered while offline and
/// its ticket resolves with the eventual replay outcome.
#[derive(Debug)]
pub enum Outcome {
    /// A final response.
    Response(Response),
    /// The request was queued for replay once connectivity returns.
    Queued(QueuedTicket),
}

impl Outcome {
    /// The response, if the request completed.
    pub fn into_response(self) -> Option<Response> {
        match self {
            Self::Response(response) => Some(response),
            Self::Queued(_) => None,
        }
    }

    /// The deferred ticket, if the request was queued.
    pub fn into_ticket(self) -> Option<QueuedTicket> {
        match self {
            Self::Response(_) => None,
            Self::Queued(ticket) => Some(ticket),
        }
    }

    /// Check whether the request was queued.
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued(_))
    }
}

struct Inner {
    config: GatewayConfig,
    cache: Arc<ResponseCache>,
    queue: Arc<OfflineQueue>,
    credentials: Arc<CredentialStore>,
    auth: Arc<AuthCoordinator>,
    monitor: Arc<dyn ConnectivityMonitor>,
    chain: StageChain,
    replay_chain: StageChain,
}

/// The API gateway client.
///
/// One instance is shared by every caller (it is cheap to clone); it owns
/// the credential store, response cache, offline queue, and connectivity
/// subscription as injected dependencies. Must be constructed inside a
/// tokio runtime: it spawns the task that drains the offline queue on
/// reconnect.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<Inner>,
}

/// Builder injecting the gateway's platform dependencies.
pub struct GatewayBuilder {
    config: GatewayConfig,
    storage: Option<Arc<dyn Storage>>,
    monitor: Option<Arc<dyn ConnectivityMonitor>>,
}

impl GatewayBuilder {
    /// Override the durable storage adapter. Defaults to in-memory.
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Override the connectivity monitor. Defaults to a manual monitor
    /// that starts online.
    pub fn connectivity(mut self, monitor: Arc<dyn ConnectivityMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Build the gateway and start its connectivity subscription.
    pub fn build(self) -> Result<Gateway> {
        let config = self.config;
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let monitor = self
            .monitor
            .unwrap_or_else(|| Arc::new(ManualConnectivity::new(true)));

        let transport = Arc::new(Transport::new(&config)?);
        let credentials = Arc::new(CredentialStore::new(storage));
        let cache = Arc::new(ResponseCache::new(config.cache_ttl));
        let queue = Arc::new(OfflineQueue::new(config.max_replay_attempts));

        let refresh_url = resolve_url(&config.base_url, &config.refresh_path)?;
        let auth = Arc::new(AuthCoordinator::new(
            credentials.clone(),
            transport.clone(),
            refresh_url,
            config.timeout,
        ));

        let chain = StageChain::new(transport.clone())
            .with_stage(CacheStage::new(cache.clone()))
            .with_stage(OfflineStage::new(queue.clone(), monitor.clone()))
            .with_stage(AuthStage::new(
                auth.clone(),
                config.login_path.clone(),
                config.refresh_path.clone(),
            ))
            .with_stage(RetryStage::new(config.retry.clone()));

        // Replay runs auth and retry only; queued entries are mutations
        // and the drain trigger already confirmed connectivity.
        let replay_chain = StageChain::new(transport)
            .with_stage(AuthStage::new(
                auth.clone(),
                config.login_path.clone(),
                config.refresh_path.clone(),
            ))
            .with_stage(RetryStage::new(config.retry.clone()));

        let inner = Arc::new(Inner {
            config,
            cache,
            queue,
            credentials,
            auth,
            monitor,
            chain,
            replay_chain,
        });
        spawn_drain_trigger(&inner);

        Ok(Gateway { inner })
    }
}

/// On every offline→online transition, trigger exactly one queue drain.
///
/// The monitor suppresses same-state reports, so each change notification
/// is a genuine transition; rapid flips may coalesce into the latest
/// state, which is why the drain keys off the state observed at wake-up
/// rather than a remembered previous value.
fn spawn_drain_trigger(inner: &Arc<Inner>) {
    let weak: Weak<Inner> = Arc::downgrade(inner);
    let mut rx = inner.monitor.subscribe();

    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            if *rx.borrow_and_update() {
                let Some(inner) = weak.upgrade() else { break };
                inner.drain().await;
            }
        }
    });
}

impl Gateway {
    /// Create a gateway with default (in-memory) platform adapters.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Create a builder for dependency injection.
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder {
            config,
            storage: None,
            monitor: None,
        }
    }

    /// The gateway configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    /// Create a GET request builder.
    pub fn get(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::GET, path.into())
    }

    /// Create a POST request builder.
    pub fn post(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::POST, path.into())
    }

    /// Create a PUT request builder.
    pub fn put(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::PUT, path.into())
    }

    /// Create a PATCH request builder.
    pub fn patch(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::PATCH, path.into())
    }

    /// Create a DELETE request builder.
    pub fn delete(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::DELETE, path.into())
    }

    /// Send a fully built descriptor through the pipeline.
    pub async fn request(&self, descriptor: RequestDescriptor) -> Result<Outcome> {
        descriptor.validate()?;
        match self.inner.chain.execute(descriptor).await? {
            Outcome::Response(response) => Ok(Outcome::Response(finalize(response)?)),
            queued => Ok(queued),
        }
    }

    /// POST credentials to the login endpoint. The login request carries no
    /// bearer header and its response is returned unmodified; call
    /// [`Gateway::store_credential`] with the tokens it contains.
    pub async fn login<T: Serialize>(&self, body: &T) -> Result<Response> {
        let outcome = self
            .post(self.inner.config.login_path.clone())
            .json(body)
            .send()
            .await?;
        outcome
            .into_response()
            .ok_or_else(|| GatewayError::Network("login queued while offline".into()))
    }

    /// Store a fresh credential (e.g. from a login response), returning the
    /// auth coordinator to its idle state.
    pub fn store_credential(&self, credential: Credential) {
        info!("storing new credential");
        self.inner.credentials.set(credential);
        self.inner.auth.notify_login();
    }

    /// Clear the credential, the cached profile, and every cached response.
    pub fn logout(&self) {
        info!("logging out");
        self.inner.credentials.clear();
        self.inner.cache.clear();
        self.inner.auth.notify_login();
    }

    /// The credential store.
    pub fn credentials(&self) -> Arc<CredentialStore> {
        self.inner.credentials.clone()
    }

    /// The response cache.
    pub fn cache(&self) -> Arc<ResponseCache> {
        self.inner.cache.clone()
    }

    /// The offline queue.
    pub fn queue(&self) -> Arc<OfflineQueue> {
        self.inner.queue.clone()
    }

    /// Current connectivity state.
    pub fn is_online(&self) -> bool {
        self.inner.monitor.is_online()
    }

    /// Subscribe to session-level auth events (refresh, forced logout).
    pub fn subscribe_auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.auth.subscribe()
    }

    /// Subscribe to offline replay notifications.
    pub fn subscribe_queue_events(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.queue.subscribe()
    }

    /// Drain the offline queue now, outside the connectivity trigger.
    pub async fn drain_offline_queue(&self) {
        self.inner.drain().await;
    }
}

impl Inner {
    /// Replay queued entries strictly in enqueue order, one at a time.
    ///
    /// Processes a snapshot of the queue length: entries re-queued for
    /// transient failures wait for the next drain rather than spinning
    /// inside this one.
    async fn drain(&self) {
        if !self.monitor.is_online() {
            return;
        }
        let pending = self.queue.len();
        if pending == 0 {
            return;
        }
        info!(pending, "draining offline queue");

        for _ in 0..pending {
            let Some(mut entry) = self.queue.pop() else { break };
            let descriptor = entry.descriptor.clone();
            let path = descriptor.url.path().to_string();
            let id = descriptor.id;

            let result = match self.replay_chain.execute(descriptor).await {
                Ok(Outcome::Response(response)) => finalize(response),
                // The replay chain has no offline stage, so this is
                // unreachable; fail safe if it ever is not.
                Ok(Outcome::Queued(_)) => {
                    Err(GatewayError::Network("replay was re-queued".into()))
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(response) => {
                    debug!(%id, status = %response.status(), "replayed queued request");
                    self.cache.invalidate_resource(&path);
                    self.queue.emit(QueueEvent::Replayed {
                        id,
                        status: response.status().as_u16(),
                    });
                    entry.resolve(Ok(response));
                }
                Err(e) if e.is_retryable() => {
                    entry.attempts += 1;
                    if entry.attempts >= self.queue.max_replay_attempts() {
                        self.queue.drop_entry(entry, e);
                    } else {
                        self.queue.requeue(entry);
                    }
                }
                Err(e) => self.queue.drop_entry(entry, e),
            }

            // Connectivity can drop mid-drain; stop and wait for the next
            // transition.
            if !self.monitor.is_online() {
                break;
            }
        }
    }
}

/// Map terminal statuses onto the error taxonomy. Auth failures reaching
/// this point were either exempt (login) or already given their one
/// refresh-and-replay.
fn finalize(response: Response) -> Result<Response> {
    let status = response.status();
    if status == http::StatusCode::UNAUTHORIZED || status == http::StatusCode::FORBIDDEN {
        return Err(GatewayError::Auth(format!(
            "request rejected with status {status}"
        )));
    }
    if status.is_client_error() {
        return Err(GatewayError::Client {
            status: status.as_u16(),
            message: response.text().unwrap_or_default(),
        });
    }
    if status.is_server_error() {
        return Err(GatewayError::Server {
            status: status.as_u16(),
            message: response.text().unwrap_or_default(),
        });
    }
    Ok(response)
}
