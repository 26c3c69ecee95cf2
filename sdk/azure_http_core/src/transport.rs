//! Default network transport backed by `reqwest`.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::http::{Request, Response};
use crate::pipeline::Transport;

/// Default connection timeout (10 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default read/response timeout (60 seconds).
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// A [`Transport`] that sends requests with a shared `reqwest::Client`.
///
/// Connection-level failures surface as [`crate::Error::Transport`]; every
/// received status, including errors, is returned as a [`Response`].
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    /// Wrap an existing HTTP client.
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Build an HTTP client with the given connect and read timeouts.
    pub fn with_timeouts(connect_timeout: Duration, read_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &Request) -> Result<Response> {
        let mut builder = self
            .http
            .request(request.method().clone(), request.url().clone())
            .headers(request.headers().clone());

        if let Some(body) = request.body() {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        tracing::trace!(status = status.as_u16(), bytes = body.len(), "transport received response");
        Ok(Response::new(status, headers, body, request.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use reqwest::Method;
    use url::Url;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport() -> ReqwestTransport {
        ReqwestTransport::with_timeouts(DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT)
            .expect("should build transport")
    }

    #[tokio::test]
    async fn sends_method_headers_and_body() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/keys/k1/encrypt"))
            .and(header("x-ms-client-request-id", "req-1"))
            .and(body_string("payload"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/keys/k1/encrypt", server.uri())).unwrap();
        let mut request = Request::new(Method::POST, url);
        request.insert_header("x-ms-client-request-id", "req-1").unwrap();
        request.set_body("payload");

        let response = transport().send(&request).await.expect("should succeed");

        assert_eq!(response.status(), 200);
        assert_eq!(response.text(), "ok");
        assert_eq!(response.request().url().path(), "/keys/k1/encrypt");
    }

    #[tokio::test]
    async fn error_statuses_are_responses_not_errors() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let request = Request::new(Method::GET, Url::parse(&server.uri()).unwrap());
        let response = transport().send(&request).await.expect("should return response");

        assert_eq!(response.status(), 503);
        assert_eq!(response.text(), "busy");
    }

    #[tokio::test]
    async fn connection_refused_is_transport_error() {
        // Port 9 (discard) is not expected to accept connections locally.
        let request = Request::new(Method::GET, Url::parse("http://127.0.0.1:9/").unwrap());
        let err = transport().send(&request).await.unwrap_err();

        assert!(matches!(err, Error::Transport { .. }));
    }
}
