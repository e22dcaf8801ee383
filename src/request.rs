//! Request descriptors and the fluent request builder.

use crate::{Gateway, GatewayError, Outcome, Result, cache::CacheKey};
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

/// Resolve a path against the configured base URL.
///
/// A trailing slash on the base keeps `join` from replacing the final path
/// segment of a prefixed base URL.
pub(crate) fn resolve_url(base_url: &str, path: &str) -> Result<url::Url> {
    let base = url::Url::parse(&format!("{}/", base_url.trim_end_matches('/')))?;
    Ok(base.join(path.trim_start_matches('/'))?)
}

/// Typed per-request options.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Whether a successful response may be cached (read-only methods only).
    pub cacheable: bool,
    /// Whether transient failures may be retried.
    pub retryable: bool,
    /// Per-request timeout.
    pub timeout: Duration,
    /// TTL override for the cached response; `None` uses the cache default.
    pub cache_ttl: Option<Duration>,
}

impl RequestOptions {
    /// Defaults for the given method: GET requests are cacheable, every
    /// request is retryable with a 10 second timeout.
    pub fn for_method(method: &Method) -> Self {
        Self {
            cacheable: *method == Method::GET,
            retryable: true,
            timeout: Duration::from_secs(10),
            cache_ttl: None,
        }
    }
}

/// Request body payload.
#[derive(Debug, Clone)]
pub enum Body {
    /// No body.
    Empty,
    /// JSON payload (the default content type).
    Json(serde_json::Value),
    /// URL-encoded form payload.
    Form(Vec<(String, String)>),
    /// Multipart form payload, used for file-bearing requests.
    Multipart(Vec<Part>),
}

/// One part of a multipart body.
#[derive(Debug, Clone)]
pub struct Part {
    /// Field name.
    pub name: String,
    /// Field payload.
    pub value: PartValue,
}

/// Payload of a multipart part.
#[derive(Debug, Clone)]
pub enum PartValue {
    /// Plain text field.
    Text(String),
    /// Binary field, typically a file.
    File {
        /// Raw content.
        data: Bytes,
        /// Original file name, if any.
        file_name: Option<String>,
        /// MIME type, if known.
        mime: Option<String>,
    },
}

/// A fully resolved outbound request.
///
/// Immutable once built, except for the attempt counter advanced by the
/// retry stage. Destroyed when the call resolves or is abandoned.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    /// Correlation id, stable across retries and offline replay.
    pub id: Uuid,
    /// HTTP method.
    pub method: Method,
    /// Resolved URL including query parameters.
    pub url: url::Url,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body.
    pub body: Body,
    /// Per-request options.
    pub options: RequestOptions,
    /// 0-indexed dispatch attempt.
    pub attempt: u32,
}

impl RequestDescriptor {
    /// Cache key for this request.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(&self.method, &self.url)
    }

    /// Whether the method mutates server state.
    pub fn is_mutating(&self) -> bool {
        self.method != Method::GET && self.method != Method::HEAD
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.options.cacheable && self.is_mutating() {
            return Err(GatewayError::Validation(
                "mutating requests cannot be cacheable".into(),
            ));
        }
        if self.options.timeout.is_zero() {
            return Err(GatewayError::Validation("timeout must be non-zero".into()));
        }
        Ok(())
    }
}

/// Fluent request builder.
pub struct RequestBuilder<'a> {
    gateway: &'a Gateway,
    method: Method,
    path: String,
    headers: HeaderMap,
    query: Vec<(String, String)>,
    body: Body,
    cacheable: Option<bool>,
    retryable: Option<bool>,
    timeout: Option<Duration>,
    cache_ttl: Option<Duration>,
    build_error: Option<GatewayError>,
}

impl<'a> RequestBuilder<'a> {
    pub(crate) fn new(gateway: &'a Gateway, method: Method, path: String) -> Self {
        Self {
            gateway,
            method,
            path,
            headers: HeaderMap::new(),
            query: Vec::new(),
            body: Body::Empty,
            cacheable: None,
            retryable: None,
            timeout: None,
            cache_ttl: None,
            build_error: None,
        }
    }

    /// Add a header.
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        match (
            HeaderName::try_from(name.as_ref()),
            HeaderValue::try_from(value.as_ref()),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => {
                self.build_error = Some(GatewayError::Validation(format!(
                    "invalid header: {}",
                    name.as_ref()
                )));
            }
        }
        self
    }

    /// Add a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Add multiple query parameters.
    pub fn queries<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in params {
            self.query.push((k.into(), v.into()));
        }
        self
    }

    /// Set a JSON body.
    pub fn json<T: Serialize>(mut self, payload: &T) -> Self {
        match serde_json::to_value(payload) {
            Ok(value) => self.body = Body::Json(value),
            Err(e) => self.build_error = Some(GatewayError::Validation(e.to_string())),
        }
        self
    }

    /// Set a URL-encoded form body.
    pub fn form<I, K, V>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.body = Body::Form(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Set a multipart body. Content type switches to multipart form
    /// encoding automatically.
    pub fn multipart(mut self, parts: Vec<Part>) -> Self {
        self.body = Body::Multipart(parts);
        self
    }

    /// Override whether the response may be cached.
    pub fn cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = Some(cacheable);
        self
    }

    /// Disable retry for this request.
    pub fn no_retry(mut self) -> Self {
        self.retryable = Some(false);
        self
    }

    /// Override the per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Override the cache TTL for this response.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Build the descriptor without sending it.
    pub fn build(self) -> Result<RequestDescriptor> {
        if let Some(e) = self.build_error {
            return Err(e);
        }

        let mut url = resolve_url(&self.gateway.config().base_url, &self.path)?;
        if !self.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in &self.query {
                pairs.append_pair(k, v);
            }
        }

        let mut options = RequestOptions::for_method(&self.method);
        if let Some(cacheable) = self.cacheable {
            options.cacheable = cacheable;
        }
        if let Some(retryable) = self.retryable {
            options.retryable = retryable;
        }
        if let Some(timeout) = self.timeout {
            options.timeout = timeout;
        }
        options.cache_ttl = self.cache_ttl.or(options.cache_ttl);

        Ok(RequestDescriptor {
            id: Uuid::new_v4(),
            method: self.method,
            url,
            headers: self.headers,
            body: self.body,
            options,
            attempt: 0,
        })
    }

    /// Send the request through the gateway pipeline.
    pub async fn send(self) -> Result<Outcome> {
        let gateway = self.gateway;
        let descriptor = self.build()?;
        gateway.request(descriptor).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_default_per_method() {
        let get = RequestOptions::for_method(&Method::GET);
        assert!(get.cacheable);
        assert!(get.retryable);
        assert_eq!(get.timeout, Duration::from_secs(10));

        let post = RequestOptions::for_method(&Method::POST);
        assert!(!post.cacheable);
    }

    #[test]
    fn test_mutating_methods() {
        let descriptor = |method: Method| RequestDescriptor {
            id: Uuid::new_v4(),
            method,
            url: url::Url::parse("http://localhost/x").unwrap(),
            headers: HeaderMap::new(),
            body: Body::Empty,
            options: RequestOptions::for_method(&Method::POST),
            attempt: 0,
        };
        assert!(!descriptor(Method::GET).is_mutating());
        assert!(descriptor(Method::POST).is_mutating());
        assert!(descriptor(Method::PUT).is_mutating());
        assert!(descriptor(Method::DELETE).is_mutating());
    }

    #[test]
    fn test_validate_rejects_cacheable_mutation() {
        let mut options = RequestOptions::for_method(&Method::PUT);
        options.cacheable = true;
        let descriptor = RequestDescriptor {
            id: Uuid::new_v4(),
            method: Method::PUT,
            url: url::Url::parse("http://localhost/x").unwrap(),
            headers: HeaderMap::new(),
            body: Body::Empty,
            options,
            attempt: 0,
        };
        assert!(matches!(
            descriptor.validate(),
            Err(GatewayError::Validation(_))
        ));
    }
}
