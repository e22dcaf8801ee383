//! The request pipeline: an explicit, ordered chain of stages.
//!
//! Stage order and short-circuiting (cache hit, offline queueing) are
//! visible here and testable in isolation. The standard chain is
//! cache → offline → auth → retry, with network dispatch as the terminal.

use crate::auth::AuthCoordinator;
use crate::cache::ResponseCache;
use crate::connectivity::ConnectivityMonitor;
use crate::gateway::Outcome;
use crate::queue::OfflineQueue;
use crate::request::RequestDescriptor;
use crate::retry::RetryPolicy;
use crate::transport::Transport;
use crate::{GatewayError, Result};
use async_trait::async_trait;
use http::StatusCode;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One step of the request pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Process the descriptor and call the rest of the chain, or
    /// short-circuit with an outcome of its own.
    async fn handle(&self, descriptor: RequestDescriptor, next: &StageChain) -> Result<Outcome>;
}

/// Ordered chain of stages ending in network dispatch.
pub struct StageChain {
    stages: Vec<Arc<dyn Stage>>,
    transport: Arc<Transport>,
    index: usize,
}

impl StageChain {
    /// Create an empty chain over the given transport.
    pub(crate) fn new(transport: Arc<Transport>) -> Self {
        Self {
            stages: Vec::new(),
            transport,
            index: 0,
        }
    }

    /// Append a stage to the chain.
    pub(crate) fn with_stage<S: Stage + 'static>(mut self, stage: S) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Run the descriptor through the full chain.
    pub async fn execute(&self, descriptor: RequestDescriptor) -> Result<Outcome> {
        self.execute_at(0, descriptor).await
    }

    /// Continue with the remainder of the chain.
    pub async fn next(&self, descriptor: RequestDescriptor) -> Result<Outcome> {
        self.execute_at(self.index, descriptor).await
    }

    async fn execute_at(&self, index: usize, descriptor: RequestDescriptor) -> Result<Outcome> {
        if index >= self.stages.len() {
            let response = self.transport.dispatch(&descriptor).await?;
            Ok(Outcome::Response(response))
        } else {
            let next = StageChain {
                stages: self.stages.clone(),
                transport: self.transport.clone(),
                index: index + 1,
            };
            self.stages[index].handle(descriptor, &next).await
        }
    }
}

/// Serves cacheable requests from the response cache and stores fresh
/// results; successful mutations invalidate affected cached reads.
pub struct CacheStage {
    cache: Arc<ResponseCache>,
}

impl CacheStage {
    pub(crate) fn new(cache: Arc<ResponseCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Stage for CacheStage {
    async fn handle(&self, descriptor: RequestDescriptor, next: &StageChain) -> Result<Outcome> {
        let cacheable = descriptor.options.cacheable && !descriptor.is_mutating();
        let key = descriptor.cache_key();

        if cacheable {
            if let Some(hit) = self.cache.get(&key) {
                debug!(id = %descriptor.id, key = key.as_str(), "cache hit");
                return Ok(Outcome::Response(hit));
            }
        }

        let mutating = descriptor.is_mutating();
        let path = descriptor.url.path().to_string();
        let ttl = descriptor.options.cache_ttl;
        let outcome = next.next(descriptor).await?;

        if let Outcome::Response(response) = &outcome {
            if response.is_success() {
                if cacheable {
                    self.cache.put(&key, response.clone(), ttl);
                } else if mutating {
                    self.cache.invalidate_resource(&path);
                }
            }
        }
        Ok(outcome)
    }
}

/// Queues mutating requests while offline instead of dispatching them.
pub struct OfflineStage {
    queue: Arc<OfflineQueue>,
    monitor: Arc<dyn ConnectivityMonitor>,
}

impl OfflineStage {
    pub(crate) fn new(queue: Arc<OfflineQueue>, monitor: Arc<dyn ConnectivityMonitor>) -> Self {
        Self { queue, monitor }
    }
}

#[async_trait]
impl Stage for OfflineStage {
    async fn handle(&self, descriptor: RequestDescriptor, next: &StageChain) -> Result<Outcome> {
        if descriptor.is_mutating() && !self.monitor.is_online() {
            info!(
                id = %descriptor.id,
                method = %descriptor.method,
                url = %descriptor.url,
                "offline: queueing mutating request"
            );
            return Ok(Outcome::Queued(self.queue.enqueue(descriptor)));
        }
        next.next(descriptor).await
    }
}

fn is_auth_failure(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

/// Attaches the bearer credential and coordinates single-flight refresh.
///
/// The login and refresh endpoints are exempt: they carry no token and
/// their auth failures surface to the caller unmodified.
pub struct AuthStage {
    auth: Arc<AuthCoordinator>,
    login_path: String,
    refresh_path: String,
}

impl AuthStage {
    pub(crate) fn new(auth: Arc<AuthCoordinator>, login_path: String, refresh_path: String) -> Self {
        Self {
            auth,
            login_path,
            refresh_path,
        }
    }
}

#[async_trait]
impl Stage for AuthStage {
    async fn handle(&self, descriptor: RequestDescriptor, next: &StageChain) -> Result<Outcome> {
        let path = descriptor.url.path();
        let exempt = path == self.login_path || path == self.refresh_path;

        let mut current = descriptor;
        let attached = if exempt {
            None
        } else {
            self.auth.attach(&mut current.headers)
        };

        match next.next(current.clone()).await? {
            Outcome::Response(response) if is_auth_failure(response.status()) && !exempt => {
                debug!(
                    id = %current.id,
                    status = %response.status(),
                    "auth failure, coordinating refresh"
                );
                self.auth.refresh(attached.as_deref()).await?;

                // Replay exactly once with the refreshed credential.
                let mut replay = current;
                replay.headers.remove(http::header::AUTHORIZATION);
                self.auth.attach(&mut replay.headers);
                match next.next(replay).await? {
                    Outcome::Response(retried) if is_auth_failure(retried.status()) => {
                        Err(GatewayError::Auth(format!(
                            "request rejected with status {} after refresh",
                            retried.status()
                        )))
                    }
                    outcome => Ok(outcome),
                }
            }
            outcome => Ok(outcome),
        }
    }
}

/// Bounded retry with backoff for transient failures.
pub struct RetryStage {
    policy: RetryPolicy,
}

impl RetryStage {
    pub(crate) fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Stage for RetryStage {
    async fn handle(&self, descriptor: RequestDescriptor, next: &StageChain) -> Result<Outcome> {
        if !descriptor.options.retryable {
            return next.next(descriptor).await;
        }

        let mut attempt = descriptor.attempt;
        loop {
            let mut current = descriptor.clone();
            current.attempt = attempt;

            let error = match next.next(current).await {
                Ok(Outcome::Response(response)) => {
                    let status = response.status().as_u16();
                    if !self.policy.should_retry_status(status) {
                        return Ok(Outcome::Response(response));
                    }
                    GatewayError::Server {
                        status,
                        message: response.text().unwrap_or_default(),
                    }
                }
                Ok(outcome) => return Ok(outcome),
                Err(e) => e,
            };

            if !self.policy.should_retry(attempt, &error) {
                return Err(error);
            }

            attempt += 1;
            let delay = self.policy.delay_for_attempt(attempt);
            warn!(
                id = %descriptor.id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying request"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Body, RequestOptions};
    use http::{HeaderMap, Method};
    use uuid::Uuid;

    fn descriptor(method: Method, path: &str) -> RequestDescriptor {
        RequestDescriptor {
            id: Uuid::new_v4(),
            method: method.clone(),
            url: url::Url::parse(&format!("http://localhost{path}")).unwrap(),
            headers: HeaderMap::new(),
            body: Body::Empty,
            options: RequestOptions::for_method(&method),
            attempt: 0,
        }
    }

    // A stage that records it was reached, for short-circuit assertions.
    struct Recorder(Arc<std::sync::atomic::AtomicUsize>);

    #[async_trait]
    impl Stage for Recorder {
        async fn handle(
            &self,
            descriptor: RequestDescriptor,
            next: &StageChain,
        ) -> Result<Outcome> {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            next.next(descriptor).await
        }
    }

    fn chain_with_recorder(
        stage: impl Stage + 'static,
    ) -> (StageChain, Arc<std::sync::atomic::AtomicUsize>) {
        let reached = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let transport = Arc::new(
            Transport::new(&crate::GatewayConfig::default()).expect("transport"),
        );
        let chain = StageChain::new(transport)
            .with_stage(stage)
            .with_stage(Recorder(reached.clone()));
        (chain, reached)
    }

    #[tokio::test]
    async fn test_cache_hit_short_circuits_chain() {
        let cache = Arc::new(ResponseCache::new(std::time::Duration::from_secs(60)));
        let d = descriptor(Method::GET, "/users");
        cache.put(&d.cache_key(), crate::Response::fake(200, "[]"), None);

        let (chain, reached) = chain_with_recorder(CacheStage::new(cache));
        let outcome = chain.execute(d).await.unwrap();

        assert!(matches!(outcome, Outcome::Response(r) if r.status().as_u16() == 200));
        assert_eq!(reached.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_offline_stage_queues_without_dispatch() {
        let queue = Arc::new(OfflineQueue::new(3));
        let monitor = Arc::new(crate::ManualConnectivity::new(false));
        let (chain, reached) =
            chain_with_recorder(OfflineStage::new(queue.clone(), monitor));

        let outcome = chain.execute(descriptor(Method::PUT, "/projects/1")).await.unwrap();
        assert!(matches!(outcome, Outcome::Queued(_)));
        assert_eq!(queue.len(), 1);
        assert_eq!(reached.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
