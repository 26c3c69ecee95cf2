//! Built-in policies that every client pipeline carries.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue, USER_AGENT};
use url::Url;

use crate::client::sanitize_error_message;
use crate::error::{Error, Result};
use crate::http::{Context, Request, Response};
use crate::pipeline::{Next, Policy};
use crate::retry::RetryAttempt;

/// Header carrying the per-call client request id.
pub const CLIENT_REQUEST_ID_HEADER: &str = "x-ms-client-request-id";

/// Query parameters that are safe to log verbatim.
const LOGGABLE_QUERY_PARAMS: &[&str] = &["api-version"];

/// Sets `x-ms-client-request-id` to a fresh UUID unless the caller already
/// supplied one. Retries reuse the id.
#[derive(Debug, Default, Clone)]
pub struct RequestIdPolicy;

#[async_trait]
impl Policy for RequestIdPolicy {
    async fn send(
        &self,
        ctx: &mut Context,
        request: &mut Request,
        next: Next<'_>,
    ) -> Result<Response> {
        if request.header(CLIENT_REQUEST_ID_HEADER).is_none() {
            request.insert_header(CLIENT_REQUEST_ID_HEADER, &uuid::Uuid::new_v4().to_string())?;
        }
        next.run(ctx, request).await
    }
}

/// Adds `User-Agent` and any fixed headers configured on the client.
#[derive(Debug, Clone)]
pub struct HeadersPolicy {
    user_agent: HeaderValue,
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl HeadersPolicy {
    pub fn new(user_agent: &str) -> Result<Self> {
        let user_agent = HeaderValue::from_str(user_agent)
            .map_err(|_| Error::InvalidArgument(format!("invalid user agent: {user_agent}")))?;
        Ok(Self {
            user_agent,
            headers: Vec::new(),
        })
    }

    /// Add a header sent on every request.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| Error::InvalidArgument(format!("invalid header name: {name}")))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|_| Error::InvalidArgument(format!("invalid value for header {name}")))?;
        self.headers.push((header_name, header_value));
        Ok(self)
    }
}

#[async_trait]
impl Policy for HeadersPolicy {
    async fn send(
        &self,
        ctx: &mut Context,
        request: &mut Request,
        next: Next<'_>,
    ) -> Result<Response> {
        let headers = request.headers_mut();
        headers.insert(USER_AGENT, self.user_agent.clone());
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }
        next.run(ctx, request).await
    }
}

/// Emits one `tracing` event per attempt with the method, redacted URL,
/// attempt number, status and elapsed time.
///
/// Placed after the retry policy so that each attempt is logged.
#[derive(Debug, Default, Clone)]
pub struct LoggingPolicy;

#[async_trait]
impl Policy for LoggingPolicy {
    async fn send(
        &self,
        ctx: &mut Context,
        request: &mut Request,
        next: Next<'_>,
    ) -> Result<Response> {
        let method = request.method().clone();
        let url = redact_url(request.url());
        let request_id = request
            .header(CLIENT_REQUEST_ID_HEADER)
            .unwrap_or_default()
            .to_string();
        let attempt = ctx.get::<RetryAttempt>().map_or(0, |a| a.0);
        let start = Instant::now();

        tracing::debug!(%method, %url, request_id = %request_id, attempt, "sending request");
        let result = next.run(ctx, request).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match &result {
            Ok(response) => tracing::debug!(
                %method,
                %url,
                attempt,
                status = response.status().as_u16(),
                elapsed_ms,
                "received response"
            ),
            Err(e) => tracing::warn!(
                %method,
                %url,
                attempt,
                elapsed_ms,
                error = %sanitize_error_message(&e.to_string()),
                "request failed"
            ),
        }
        result
    }
}

/// Replace every query value except allow-listed ones with `REDACTED`.
pub fn redact_url(url: &Url) -> String {
    if url.query().is_none() {
        return url.to_string();
    }
    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let value = if LOGGABLE_QUERY_PARAMS.contains(&k.as_ref()) {
                v.into_owned()
            } else {
                "REDACTED".to_string()
            };
            (k.into_owned(), value)
        })
        .collect();
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}
