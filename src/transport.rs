//! Network dispatch over reqwest.

use crate::config::GatewayConfig;
use crate::request::{Body, PartValue, RequestDescriptor};
use crate::{GatewayError, Response, Result};
use tracing::debug;

/// Terminal dispatcher: encodes the body, applies the per-request timeout,
/// and buffers the response. Every dispatched request is logged by method,
/// URL, and outcome; payload contents are never logged.
pub struct Transport {
    client: reqwest::Client,
    default_headers: Vec<(String, String)>,
}

impl Transport {
    pub(crate) fn new(config: &GatewayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .gzip(config.gzip)
            .brotli(config.brotli)
            .build()
            .map_err(|e| GatewayError::Validation(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            default_headers: config.default_headers.clone(),
        })
    }

    /// Dispatch a single attempt. Any received status yields `Ok`; only
    /// transport-level failures (no response) are errors.
    pub(crate) async fn dispatch(&self, descriptor: &RequestDescriptor) -> Result<Response> {
        let mut request = self
            .client
            .request(descriptor.method.clone(), descriptor.url.clone());

        for (name, value) in &self.default_headers {
            request = request.header(name.as_str(), value.as_str());
        }
        for (name, value) in &descriptor.headers {
            request = request.header(name, value);
        }

        request = match &descriptor.body {
            Body::Empty => request,
            Body::Json(value) => request.json(value),
            Body::Form(fields) => request.form(fields),
            Body::Multipart(parts) => {
                let mut form = reqwest::multipart::Form::new();
                for part in parts {
                    form = match &part.value {
                        PartValue::Text(text) => form.text(part.name.clone(), text.clone()),
                        PartValue::File {
                            data,
                            file_name,
                            mime,
                        } => {
                            let mut p = reqwest::multipart::Part::bytes(data.to_vec());
                            if let Some(name) = file_name {
                                p = p.file_name(name.clone());
                            }
                            if let Some(mime) = mime {
                                p = p.mime_str(mime).map_err(|e| {
                                    GatewayError::Validation(format!("invalid MIME type: {e}"))
                                })?;
                            }
                            form.part(part.name.clone(), p)
                        }
                    };
                }
                request.multipart(form)
            }
        };

        request = request.timeout(descriptor.options.timeout);

        debug!(
            id = %descriptor.id,
            method = %descriptor.method,
            url = %descriptor.url,
            attempt = descriptor.attempt,
            "dispatching request"
        );

        let result = request.send().await;
        match result {
            Ok(response) => {
                let response = Response::from_reqwest(response).await?;
                debug!(
                    id = %descriptor.id,
                    status = %response.status(),
                    "response received"
                );
                Ok(response)
            }
            Err(e) => {
                let error = GatewayError::from(e);
                debug!(id = %descriptor.id, error = %error, "dispatch failed");
                Err(error)
            }
        }
    }
}
