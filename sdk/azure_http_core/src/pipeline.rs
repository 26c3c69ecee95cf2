//! The policy chain every service client sends its requests through.
//!
//! A [`Pipeline`] is an ordered list of [`Policy`] values terminated by a
//! [`Transport`]. On the way out, policies run in registration order; on the
//! way back they observe the response in reverse order as each one returns
//! from its continuation.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use azure_http_core::http::{Context, Request, Response};
//! use azure_http_core::pipeline::{Next, Policy};
//! use azure_http_core::error::Result;
//!
//! #[derive(Debug)]
//! struct ApiVersionPolicy;
//!
//! #[async_trait::async_trait]
//! impl Policy for ApiVersionPolicy {
//!     async fn send(
//!         &self,
//!         ctx: &mut Context,
//!         request: &mut Request,
//!         next: Next<'_>,
//!     ) -> Result<Response> {
//!         request.insert_header("x-ms-version", "2024-08-04")?;
//!         next.run(ctx, request).await
//!     }
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::http::{Context, Request, Response};

/// A single request/response interceptor.
///
/// An implementation either calls `next.run(..)` exactly once, optionally
/// mutating the request before and inspecting the response after, or
/// short-circuits by returning its own response or error. [`Next::run`]
/// consumes the continuation; a policy that needs several attempts (retry)
/// must clone it explicitly for each one.
#[async_trait]
pub trait Policy: Send + Sync + fmt::Debug {
    async fn send(
        &self,
        ctx: &mut Context,
        request: &mut Request,
        next: Next<'_>,
    ) -> Result<Response>;
}

/// The network layer at the end of the chain.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    async fn send(&self, request: &Request) -> Result<Response>;
}

/// The remainder of the chain after the current policy.
#[derive(Clone)]
pub struct Next<'a> {
    policies: &'a [Arc<dyn Policy>],
    transport: &'a dyn Transport,
}

impl<'a> Next<'a> {
    /// Run the rest of the chain.
    pub async fn run(self, ctx: &mut Context, request: &mut Request) -> Result<Response> {
        match self.policies.split_first() {
            Some((policy, rest)) => {
                let next = Next {
                    policies: rest,
                    transport: self.transport,
                };
                policy.send(ctx, request, next).await
            }
            None => self.transport.send(request).await,
        }
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("remaining_policies", &self.policies.len())
            .field("transport", &self.transport)
            .finish()
    }
}

/// An immutable, cheaply cloneable chain of policies and a transport.
///
/// The chain is fixed at construction; concurrent calls share it read-only.
#[derive(Debug, Clone)]
pub struct Pipeline {
    policies: Arc<[Arc<dyn Policy>]>,
    transport: Arc<dyn Transport>,
}

impl Pipeline {
    /// Create a pipeline from policies in execution order.
    pub fn new(policies: Vec<Arc<dyn Policy>>, transport: Arc<dyn Transport>) -> Self {
        Self {
            policies: policies.into(),
            transport,
        }
    }

    /// Send a request through every policy and the transport.
    ///
    /// Non-success statuses are returned as `Ok` responses; mapping them to
    /// errors is the caller's concern (see [`crate::client::ServiceClient`]).
    pub async fn send(&self, ctx: &mut Context, request: &mut Request) -> Result<Response> {
        let next = Next {
            policies: &self.policies,
            transport: self.transport.as_ref(),
        };
        next.run(ctx, request).await
    }

    /// Number of policies in the chain, excluding the transport.
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::test_utils::{test_request, MockTransport};
    use std::sync::Mutex;

    #[derive(Debug)]
    struct Recording {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Policy for Recording {
        async fn send(
            &self,
            ctx: &mut Context,
            request: &mut Request,
            next: Next<'_>,
        ) -> Result<Response> {
            self.log.lock().unwrap().push(format!("{}:request", self.name));
            request.insert_header(&format!("x-seen-{}", self.name), "1")?;
            let response = next.run(ctx, request).await;
            self.log.lock().unwrap().push(format!("{}:response", self.name));
            response
        }
    }

    #[derive(Debug)]
    struct ShortCircuit;

    #[async_trait]
    impl Policy for ShortCircuit {
        async fn send(
            &self,
            _ctx: &mut Context,
            _request: &mut Request,
            _next: Next<'_>,
        ) -> Result<Response> {
            Err(Error::InvalidArgument("rejected before transport".into()))
        }
    }

    #[tokio::test]
    async fn policies_run_in_order_and_unwind_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let transport = Arc::new(MockTransport::new().with_status(200));
        let pipeline = Pipeline::new(
            vec![
                Arc::new(Recording { name: "a", log: log.clone() }),
                Arc::new(Recording { name: "b", log: log.clone() }),
            ],
            transport.clone(),
        );

        let mut req = test_request();
        let resp = pipeline.send(&mut Context::new(), &mut req).await.unwrap();

        assert_eq!(resp.status(), 200);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:request", "b:request", "b:response", "a:response"]
        );

        let sent = transport.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].header("x-seen-a"), Some("1"));
        assert_eq!(sent[0].header("x-seen-b"), Some("1"));
    }

    #[tokio::test]
    async fn short_circuit_never_reaches_transport() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let transport = Arc::new(MockTransport::new().with_status(200));
        let pipeline = Pipeline::new(
            vec![
                Arc::new(Recording { name: "a", log: log.clone() }),
                Arc::new(ShortCircuit),
            ],
            transport.clone(),
        );

        let err = pipeline
            .send(&mut Context::new(), &mut test_request())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(transport.call_count(), 0);
        assert_eq!(*log.lock().unwrap(), vec!["a:request", "a:response"]);
    }

    #[tokio::test]
    async fn empty_pipeline_goes_straight_to_transport() {
        let transport = Arc::new(MockTransport::new().with_status(204));
        let pipeline = Pipeline::new(Vec::new(), transport.clone());
        assert!(pipeline.is_empty());

        let resp = pipeline
            .send(&mut Context::new(), &mut test_request())
            .await
            .unwrap();
        assert_eq!(resp.status(), 204);
        assert_eq!(transport.call_count(), 1);
    }
}
