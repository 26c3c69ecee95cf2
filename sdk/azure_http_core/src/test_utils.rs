//! Test helpers shared across the SDK crates.
//!
//! Enabled for this crate's own tests and, for sibling crates, through the
//! `test-support` feature.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use url::Url;

use crate::error::{Error, Result};
use crate::http::{Request, Response};
use crate::pipeline::Transport;

/// Endpoint used by test requests and clients.
pub const TEST_ENDPOINT: &str = "https://test-vault.vault.azure.net";

/// A GET request against [`TEST_ENDPOINT`].
pub fn test_request() -> Request {
    Request::new(
        Method::GET,
        Url::parse(TEST_ENDPOINT).expect("test endpoint is a valid URL"),
    )
}

/// One scripted transport outcome.
#[derive(Debug, Clone)]
pub enum MockReply {
    Response {
        status: u16,
        headers: Vec<(String, String)>,
        body: Bytes,
    },
    TransportError(String),
}

/// A transport that replays scripted replies and records every request.
///
/// Replies are consumed in order; the last one repeats once the script is
/// exhausted.
#[derive(Debug, Default)]
pub struct MockTransport {
    replies: Mutex<VecDeque<MockReply>>,
    requests: Mutex<Vec<Request>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(self, reply: MockReply) -> Self {
        self.replies.lock().expect("mock lock").push_back(reply);
        self
    }

    /// Reply with `status` and an empty body.
    pub fn with_status(self, status: u16) -> Self {
        self.with_reply(MockReply::Response {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
        })
    }

    /// Reply with `status` and a JSON body.
    pub fn with_json(self, status: u16, body: serde_json::Value) -> Self {
        self.with_reply(MockReply::Response {
            status,
            headers: vec![("content-type".into(), "application/json".into())],
            body: Bytes::from(body.to_string()),
        })
    }

    /// Reply with `status`, an empty body and the given headers.
    pub fn with_headers(self, status: u16, headers: &[(&str, &str)]) -> Self {
        self.with_reply(MockReply::Response {
            status,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: Bytes::new(),
        })
    }

    /// Fail with a transport error.
    pub fn with_transport_error(self, message: &str) -> Self {
        self.with_reply(MockReply::TransportError(message.into()))
    }

    /// Every request the transport received, in order.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().expect("mock lock").clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().expect("mock lock").len()
    }

    fn next_reply(&self) -> Option<MockReply> {
        let mut replies = self.replies.lock().expect("mock lock");
        if replies.len() > 1 {
            replies.pop_front()
        } else {
            replies.front().cloned()
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &Request) -> Result<Response> {
        self.requests.lock().expect("mock lock").push(request.clone());

        match self.next_reply() {
            Some(MockReply::Response {
                status,
                headers,
                body,
            }) => {
                let status = StatusCode::from_u16(status)
                    .map_err(|e| Error::InvalidArgument(e.to_string()))?;
                let mut map = HeaderMap::new();
                for (name, value) in headers {
                    let name = HeaderName::from_bytes(name.as_bytes())
                        .map_err(|e| Error::InvalidArgument(e.to_string()))?;
                    let value = HeaderValue::from_str(&value)
                        .map_err(|e| Error::InvalidArgument(e.to_string()))?;
                    map.append(name, value);
                }
                Ok(Response::new(status, map, body, request.clone()))
            }
            Some(MockReply::TransportError(message)) => Err(Error::transport(message)),
            None => Err(Error::transport("no mock reply configured")),
        }
    }
}
