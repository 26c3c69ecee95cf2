//! Service client shared by every generated-style SDK client.
//!
//! [`ServiceClient`] couples a [`Pipeline`] with an endpoint and an
//! `api-version`. Service crates describe their operations as [`Route`]
//! tables and send them through [`ServiceClient::send`] or
//! [`ServiceClient::send_json`].
//!
//! # Example
//!
//! ```rust,no_run
//! use azure_http_core::auth::Credential;
//! use azure_http_core::client::ServiceClient;
//!
//! # fn example() -> azure_http_core::Result<()> {
//! let client = ServiceClient::builder()
//!     .endpoint("https://my-vault.vault.azure.net")
//!     .api_version("7.5")
//!     .credential(Credential::from_env()?)
//!     .scope("https://vault.azure.net/.default")
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use url::Url;

use crate::auth::Credential;
use crate::error::{Error, HttpError, Result};
use crate::http::{Context, Request, Response};
use crate::pipeline::{Pipeline, Policy, Transport};
use crate::policies::{HeadersPolicy, LoggingPolicy, RequestIdPolicy};
use crate::retry::{RetryOptions, RetryPolicy};
use crate::route::Route;
use crate::transport::{ReqwestTransport, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT};

/// Default `User-Agent` sent by clients that do not set their own.
pub const DEFAULT_USER_AGENT: &str = concat!("azsdk-rust-http-core/", env!("CARGO_PKG_VERSION"));

/// Maximum length for error messages to prevent sensitive data leaks.
const MAX_ERROR_MESSAGE_LEN: usize = 1000;

const REDACTED: &str = "[REDACTED]";

/// Assembles the standard policy order around caller-supplied policies.
///
/// The resulting chain is, in order: request id, headers, per-call policies,
/// retry, authentication, per-retry policies, logging, transport.
#[derive(Debug)]
pub struct PipelineBuilder {
    user_agent: String,
    headers: Vec<(String, String)>,
    per_call: Vec<Arc<dyn Policy>>,
    retry: RetryOptions,
    auth: Option<Arc<dyn Policy>>,
    per_retry: Vec<Arc<dyn Policy>>,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            headers: Vec::new(),
            per_call: Vec::new(),
            retry: RetryOptions::default(),
            auth: None,
            per_retry: Vec::new(),
        }
    }
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Add a header sent on every request.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Add a policy that runs once per call, before retries.
    pub fn per_call_policy(mut self, policy: Arc<dyn Policy>) -> Self {
        self.per_call.push(policy);
        self
    }

    /// Add a policy that runs on every attempt, after authentication.
    pub fn per_retry_policy(mut self, policy: Arc<dyn Policy>) -> Self {
        self.per_retry.push(policy);
        self
    }

    pub fn retry_options(mut self, options: RetryOptions) -> Self {
        self.retry = options;
        self
    }

    /// Set the authentication policy.
    pub fn auth_policy(mut self, policy: Arc<dyn Policy>) -> Self {
        self.auth = Some(policy);
        self
    }

    pub fn build(self, transport: Arc<dyn Transport>) -> Result<Pipeline> {
        let mut headers = HeadersPolicy::new(&self.user_agent)?;
        for (name, value) in &self.headers {
            headers = headers.with_header(name, value)?;
        }

        let mut policies: Vec<Arc<dyn Policy>> =
            vec![Arc::new(RequestIdPolicy), Arc::new(headers)];
        policies.extend(self.per_call);
        policies.push(Arc::new(RetryPolicy::new(self.retry)));
        policies.extend(self.auth);
        policies.extend(self.per_retry);
        policies.push(Arc::new(LoggingPolicy));

        Ok(Pipeline::new(policies, transport))
    }
}

/// An endpoint, an `api-version` and the pipeline requests go through.
///
/// The client is cheaply cloneable and can be shared across threads.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    pipeline: Pipeline,
    endpoint: Url,
    api_version: String,
}

/// Builder for constructing a [`ServiceClient`].
///
/// Use [`ServiceClient::builder()`] to create a new builder.
#[derive(Debug, Default)]
pub struct ServiceClientBuilder {
    endpoint: Option<String>,
    api_version: Option<String>,
    credential: Option<Credential>,
    scopes: Vec<String>,
    pipeline: PipelineBuilder,
    transport: Option<Arc<dyn Transport>>,
    http_client: Option<reqwest::Client>,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
}

impl ServiceClient {
    /// Create a new builder for configuring a `ServiceClient`.
    pub fn builder() -> ServiceClientBuilder {
        ServiceClientBuilder::default()
    }

    /// Get the base endpoint URL.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Get the API version being used.
    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Build a request for `route` with its path parameters expanded and
    /// `api-version` appended.
    pub fn request(&self, route: &Route, params: &[(&str, &str)]) -> Result<Request> {
        let mut url = route.url(&self.endpoint, params)?;
        url.query_pairs_mut()
            .append_pair("api-version", &self.api_version);
        Ok(Request::new(route.method.clone(), url))
    }

    /// Send `route` without a body.
    pub async fn send(&self, route: &Route, params: &[(&str, &str)]) -> Result<Response> {
        let request = self.request(route, params)?;
        self.send_request(&mut Context::new(), route, request).await
    }

    /// Send `route` with `body` serialized as JSON.
    pub async fn send_json<B: Serialize + ?Sized>(
        &self,
        route: &Route,
        params: &[(&str, &str)],
        body: &B,
    ) -> Result<Response> {
        let mut request = self.request(route, params)?;
        request.set_json(body)?;
        self.send_request(&mut Context::new(), route, request).await
    }

    /// Send a prepared request and check its status against `route`.
    pub async fn send_request(
        &self,
        ctx: &mut Context,
        route: &Route,
        mut request: Request,
    ) -> Result<Response> {
        tracing::trace!(route = route.name, "dispatching");
        let response = self.pipeline.send(ctx, &mut request).await?;
        check_response(route, response)
    }
}

/// Map a status the route does not expect to [`Error::Http`].
///
/// The message and code come from the standard `{"error": {"code",
/// "message"}}` body when present, otherwise from the raw body.
pub fn check_response(route: &Route, response: Response) -> Result<Response> {
    let status = response.status().as_u16();
    if route.is_expected(status) {
        return Ok(response);
    }

    let body = response.text();
    let mut error = HttpError {
        status,
        kind: route.error_kind(status),
        code: None,
        message: truncate_message(&body),
    };

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(&body) {
        if let Some(err_obj) = value.get("error") {
            error.code = err_obj
                .get("code")
                .and_then(|c| c.as_str())
                .map(str::to_string);
            if let Some(message) = err_obj.get("message").and_then(|m| m.as_str()) {
                error.message = truncate_message(message);
            }
        }
    }

    tracing::debug!(
        route = route.name,
        status,
        kind = %error.kind,
        code = error.code.as_deref().unwrap_or_default(),
        "unexpected status"
    );
    Err(error.into())
}

/// Redact bearer tokens, `sk-` style keys and SAS signatures.
pub(crate) fn sanitize_error_message(msg: &str) -> String {
    let mut result = msg.to_string();
    redact_after(&mut result, "Bearer ");
    redact_after(&mut result, "sig=");
    redact_from(&mut result, "sk-");
    result
}

fn secret_end(s: &str, start: usize) -> usize {
    s[start..]
        .find(|c: char| c.is_whitespace() || matches!(c, '"' | '\'' | ',' | '&'))
        .map(|pos| start + pos)
        .unwrap_or(s.len())
}

/// Replace the value following each occurrence of `marker`.
fn redact_after(result: &mut String, marker: &str) {
    let mut search_start = 0;
    while let Some(relative_pos) = result[search_start..].find(marker) {
        let value_start = search_start + relative_pos + marker.len();
        if result[value_start..].starts_with(REDACTED) {
            search_start = value_start + REDACTED.len();
            continue;
        }
        let value_end = secret_end(result, value_start);
        if value_end > value_start {
            result.replace_range(value_start..value_end, REDACTED);
            search_start = value_start + REDACTED.len();
        } else {
            search_start = value_start;
        }
    }
}

/// Replace each occurrence of `prefix` together with the value it starts.
fn redact_from(result: &mut String, prefix: &str) {
    let mut search_start = 0;
    while let Some(relative_pos) = result[search_start..].find(prefix) {
        let key_start = search_start + relative_pos;
        let key_end = secret_end(result, key_start);
        if key_end > key_start + prefix.len() {
            result.replace_range(key_start..key_end, REDACTED);
            search_start = key_start + REDACTED.len();
        } else {
            search_start = key_start + prefix.len();
        }
    }
}

/// Sanitize, then truncate to a bounded length on a char boundary.
pub(crate) fn truncate_message(msg: &str) -> String {
    let sanitized = sanitize_error_message(msg);
    if sanitized.len() <= MAX_ERROR_MESSAGE_LEN {
        return sanitized;
    }
    let mut cut = MAX_ERROR_MESSAGE_LEN;
    while !sanitized.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}... (truncated)", &sanitized[..cut])
}

impl ServiceClientBuilder {
    /// Set the service endpoint URL.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the `api-version` query parameter sent with every request.
    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    /// Set the credential. Without one, requests are sent unauthenticated.
    pub fn credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Add a token scope requested from a token credential.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scopes.push(scope.into());
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.pipeline = self.pipeline.user_agent(user_agent);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.pipeline = self.pipeline.header(name, value);
        self
    }

    /// Configure retries. Defaults to [`RetryOptions::default`].
    pub fn retry_options(mut self, options: RetryOptions) -> Self {
        self.pipeline = self.pipeline.retry_options(options);
        self
    }

    pub fn per_call_policy(mut self, policy: Arc<dyn Policy>) -> Self {
        self.pipeline = self.pipeline.per_call_policy(policy);
        self
    }

    pub fn per_retry_policy(mut self, policy: Arc<dyn Policy>) -> Self {
        self.pipeline = self.pipeline.per_retry_policy(policy);
        self
    }

    /// Replace the network transport, e.g. with a mock in tests.
    ///
    /// **Note:** timeouts and [`http_client`](Self::http_client) are ignored
    /// when a transport is set.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a preconfigured `reqwest` client.
    ///
    /// **Note:** If you provide a custom HTTP client, any timeout configuration
    /// via [`connect_timeout`](Self::connect_timeout) will be ignored.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Build the `ServiceClient`.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint or api-version is missing, the
    /// endpoint URL is invalid, or the HTTP client cannot be built.
    pub fn build(self) -> Result<ServiceClient> {
        let endpoint_str = self
            .endpoint
            .ok_or_else(|| Error::MissingConfig("endpoint is required".into()))?;
        let endpoint = Url::parse(&endpoint_str)
            .map_err(|e| Error::invalid_endpoint_with_source("invalid endpoint URL", e))?;
        let api_version = self
            .api_version
            .ok_or_else(|| Error::MissingConfig("api-version is required".into()))?;

        let transport: Arc<dyn Transport> = match (self.transport, self.http_client) {
            (Some(transport), _) => transport,
            (None, Some(http)) => Arc::new(ReqwestTransport::new(http)),
            (None, None) => Arc::new(ReqwestTransport::with_timeouts(
                self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
                self.read_timeout.unwrap_or(DEFAULT_READ_TIMEOUT),
            )?),
        };

        let mut pipeline = self.pipeline;
        if let Some(credential) = self.credential {
            pipeline = pipeline.auth_policy(credential.into_policy(self.scopes));
        }

        Ok(ServiceClient {
            pipeline: pipeline.build(transport)?,
            endpoint,
            api_version,
        })
    }
}
