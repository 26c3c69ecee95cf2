//! Fault injection through a local proxy.
//!
//! The proxy listens on `localhost:7777` (plain) and `localhost:7778` (TLS),
//! forwards each request to the host named in `X-Upstream-Base-Uri` and
//! degrades the connection as instructed by
//! `x-ms-faultinjector-response-option`.

use std::fmt;

use async_trait::async_trait;
use azure_http_core::http::{Context, Request, Response};
use azure_http_core::pipeline::{Next, Policy};
use azure_http_core::policies::CLIENT_REQUEST_ID_HEADER;
use azure_http_core::{Error, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// Header carrying the logical destination of a redirected request.
pub const UPSTREAM_URI_HEADER: &str = "x-upstream-base-uri";

/// Header the proxy reads to pick its behaviour.
pub const FAULT_INJECTOR_HEADER: &str = "x-ms-faultinjector-response-option";

/// Proxy port for plain HTTP.
pub const HTTP_PROXY_PORT: u16 = 7777;

/// Proxy port for HTTPS.
pub const HTTPS_PROXY_PORT: u16 = 7778;

const SERVER_REQUEST_ID_HEADER: &str = "x-ms-request-id";
const TRACEPARENT_HEADER: &str = "traceparent";

/// Tolerance for floating point error when summing a probability table.
const SUM_TOLERANCE: f64 = 1e-9;

// ---------------------------------------------------------------------------
// FaultType
// ---------------------------------------------------------------------------

/// Connection behaviour requested from the proxy.
///
/// "Partial" transfers send full headers and half of the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultType {
    /// Full response, no fault.
    None,
    PartialResponseIndefinite,
    PartialResponseClose,
    PartialResponseAbort,
    PartialResponseFinishNormal,
    NoResponseIndefinite,
    NoResponseClose,
    NoResponseAbort,
    PartialRequestIndefinite,
    PartialRequestClose,
    PartialRequestAbort,
    NoRequestIndefinite,
    NoRequestClose,
    NoRequestAbort,
}

impl FaultType {
    /// The code understood by the proxy.
    ///
    /// `Indefinite` faults hang, `Close` ends with a TCP FIN and `Abort` with
    /// a TCP RST.
    pub fn code(self) -> &'static str {
        match self {
            Self::None => "f",
            Self::PartialResponseIndefinite => "p",
            Self::PartialResponseClose => "pc",
            Self::PartialResponseAbort => "pa",
            Self::PartialResponseFinishNormal => "pn",
            Self::NoResponseIndefinite => "n",
            Self::NoResponseClose => "nc",
            Self::NoResponseAbort => "na",
            Self::PartialRequestIndefinite => "pq",
            Self::PartialRequestClose => "pqc",
            Self::PartialRequestAbort => "pqa",
            Self::NoRequestIndefinite => "nq",
            Self::NoRequestClose => "nqc",
            Self::NoRequestAbort => "nqa",
        }
    }

    /// Whether the fault affects the upload rather than the download.
    pub fn is_request_fault(self) -> bool {
        matches!(
            self,
            Self::PartialRequestIndefinite
                | Self::PartialRequestClose
                | Self::PartialRequestAbort
                | Self::NoRequestIndefinite
                | Self::NoRequestClose
                | Self::NoRequestAbort
        )
    }
}

impl fmt::Display for FaultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// ---------------------------------------------------------------------------
// FaultInjectionProbabilities
// ---------------------------------------------------------------------------

/// Weight of each fault, as a probability in `[0, 1]`.
///
/// Only one half of the table is active at a time: the response faults for
/// download scenarios, the request faults when upload faults are enabled.
/// Whatever probability is left over goes to [`FaultType::None`].
///
/// Deserialises from camelCase JSON with every field optional:
///
/// ```rust
/// use azure_storage_stress::FaultInjectionProbabilities;
///
/// let table: FaultInjectionProbabilities =
///     serde_json::from_str(r#"{"noResponseClose": 0.05}"#).unwrap();
/// assert_eq!(table.no_response_close, 0.05);
/// assert_eq!(table.partial_response_abort, 0.0);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FaultInjectionProbabilities {
    pub partial_response_indefinite: f64,
    pub partial_response_close: f64,
    pub partial_response_abort: f64,
    pub partial_response_finish_normal: f64,
    pub no_response_indefinite: f64,
    pub no_response_close: f64,
    pub no_response_abort: f64,
    pub partial_request_indefinite: f64,
    pub partial_request_close: f64,
    pub partial_request_abort: f64,
    pub no_request_indefinite: f64,
    pub no_request_close: f64,
    pub no_request_abort: f64,
}

impl FaultInjectionProbabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the table from `STRESS_FAULT_*` variables.
    ///
    /// Each field maps to its upper-case name, e.g. `no_response_close` is
    /// read from `STRESS_FAULT_NO_RESPONSE_CLOSE`. Unset variables leave the
    /// field at zero.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when a variable is not a number.
    pub fn from_env() -> Result<Self> {
        let mut table = Self::default();
        for (var, field) in table.env_fields() {
            let Ok(raw) = std::env::var(var) else {
                continue;
            };
            *field = raw.trim().parse::<f64>().map_err(|_| {
                Error::InvalidArgument(format!("{var} must be a number, got {raw:?}"))
            })?;
        }
        Ok(table)
    }

    fn env_fields(&mut self) -> [(&'static str, &mut f64); 13] {
        [
            ("STRESS_FAULT_PARTIAL_RESPONSE_INDEFINITE", &mut self.partial_response_indefinite),
            ("STRESS_FAULT_PARTIAL_RESPONSE_CLOSE", &mut self.partial_response_close),
            ("STRESS_FAULT_PARTIAL_RESPONSE_ABORT", &mut self.partial_response_abort),
            ("STRESS_FAULT_PARTIAL_RESPONSE_FINISH_NORMAL", &mut self.partial_response_finish_normal),
            ("STRESS_FAULT_NO_RESPONSE_INDEFINITE", &mut self.no_response_indefinite),
            ("STRESS_FAULT_NO_RESPONSE_CLOSE", &mut self.no_response_close),
            ("STRESS_FAULT_NO_RESPONSE_ABORT", &mut self.no_response_abort),
            ("STRESS_FAULT_PARTIAL_REQUEST_INDEFINITE", &mut self.partial_request_indefinite),
            ("STRESS_FAULT_PARTIAL_REQUEST_CLOSE", &mut self.partial_request_close),
            ("STRESS_FAULT_PARTIAL_REQUEST_ABORT", &mut self.partial_request_abort),
            ("STRESS_FAULT_NO_REQUEST_INDEFINITE", &mut self.no_request_indefinite),
            ("STRESS_FAULT_NO_REQUEST_CLOSE", &mut self.no_request_close),
            ("STRESS_FAULT_NO_REQUEST_ABORT", &mut self.no_request_abort),
        ]
    }

    fn response_faults(&self) -> Vec<(f64, FaultType)> {
        vec![
            (self.partial_response_indefinite, FaultType::PartialResponseIndefinite),
            (self.partial_response_close, FaultType::PartialResponseClose),
            (self.partial_response_abort, FaultType::PartialResponseAbort),
            (self.partial_response_finish_normal, FaultType::PartialResponseFinishNormal),
            (self.no_response_indefinite, FaultType::NoResponseIndefinite),
            (self.no_response_close, FaultType::NoResponseClose),
            (self.no_response_abort, FaultType::NoResponseAbort),
        ]
    }

    fn request_faults(&self) -> Vec<(f64, FaultType)> {
        vec![
            (self.partial_request_indefinite, FaultType::PartialRequestIndefinite),
            (self.partial_request_close, FaultType::PartialRequestClose),
            (self.partial_request_abort, FaultType::PartialRequestAbort),
            (self.no_request_indefinite, FaultType::NoRequestIndefinite),
            (self.no_request_close, FaultType::NoRequestClose),
            (self.no_request_abort, FaultType::NoRequestAbort),
        ]
    }
}

fn validate(table: &[(f64, FaultType)]) -> Result<()> {
    for (weight, fault) in table {
        if !weight.is_finite() || *weight < 0.0 {
            return Err(Error::InvalidArgument(format!(
                "probability for fault '{fault}' must be between 0 and 1, got {weight}"
            )));
        }
    }
    let sum: f64 = table.iter().map(|(weight, _)| weight).sum();
    if sum > 1.0 + SUM_TOLERANCE {
        return Err(Error::InvalidArgument(format!(
            "fault probabilities sum to {sum}, which is more than 1"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// FaultInjectingPolicy
// ---------------------------------------------------------------------------

/// Sends each request through the fault-injecting proxy.
///
/// The response handed back up the pipeline carries the original URL on its
/// request, so callers never observe the proxy address. Status codes pass
/// through unchanged.
#[derive(Debug, Clone)]
pub struct FaultInjectingPolicy {
    https: bool,
    faults: Vec<(f64, FaultType)>,
}

impl FaultInjectingPolicy {
    /// Build a policy drawing from the response faults, or from the request
    /// faults when `upload_faults_enabled` is set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when the active weights are
    /// negative or add up to more than 1.
    pub fn new(
        https: bool,
        probabilities: &FaultInjectionProbabilities,
        upload_faults_enabled: bool,
    ) -> Result<Self> {
        let faults = if upload_faults_enabled {
            probabilities.request_faults()
        } else {
            probabilities.response_faults()
        };
        validate(&faults)?;
        Ok(Self { https, faults })
    }

    /// Map a uniform sample in `[0, 1)` to a fault.
    ///
    /// Weights occupy consecutive slices of the unit interval in table order;
    /// samples past the last slice select [`FaultType::None`].
    pub fn select_fault(&self, sample: f64) -> FaultType {
        let mut sum = 0.0;
        for (weight, fault) in &self.faults {
            if sample < sum + weight {
                return *fault;
            }
            sum += weight;
        }
        FaultType::None
    }

    fn proxy_url(&self, original: &Url) -> Result<Url> {
        let (scheme, port) = if self.https {
            ("https", HTTPS_PROXY_PORT)
        } else {
            ("http", HTTP_PROXY_PORT)
        };
        let unsupported =
            || Error::InvalidArgument(format!("cannot redirect {original} to the fault proxy"));

        let mut url = original.clone();
        url.set_scheme(scheme).map_err(|()| unsupported())?;
        url.set_host(Some("localhost")).map_err(|_| unsupported())?;
        url.set_port(Some(port)).map_err(|()| unsupported())?;
        Ok(url)
    }
}

fn restore(request: &mut Request, original: &Url) {
    request.set_url(original.clone());
    request.headers_mut().remove(UPSTREAM_URI_HEADER);
}

#[async_trait]
impl Policy for FaultInjectingPolicy {
    async fn send(
        &self,
        ctx: &mut Context,
        request: &mut Request,
        next: Next<'_>,
    ) -> Result<Response> {
        let original = request.url().clone();
        let fault = self.select_fault(fastrand::f64());

        request.insert_header(UPSTREAM_URI_HEADER, original.as_str())?;
        request.set_url(self.proxy_url(&original)?);
        request.insert_header(FAULT_INJECTOR_HEADER, fault.code())?;

        let outcome = next.run(ctx, request).await;
        restore(request, &original);

        match outcome {
            Ok(mut response) => {
                restore(response.request_mut(), &original);
                tracing::info!(
                    fault = %fault,
                    client_request_id = request.header(CLIENT_REQUEST_ID_HEADER),
                    server_request_id = response.header(SERVER_REQUEST_ID_HEADER),
                    traceparent = request.header(TRACEPARENT_HEADER),
                    status = response.status().as_u16(),
                    "HTTP response with fault injection"
                );
                Ok(response)
            }
            Err(e) => {
                tracing::info!(
                    fault = %fault,
                    client_request_id = request.header(CLIENT_REQUEST_ID_HEADER),
                    traceparent = request.header(TRACEPARENT_HEADER),
                    error = %e,
                    "HTTP request with fault injection failed"
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use azure_http_core::client::ServiceClient;
    use azure_http_core::http::Method;
    use azure_http_core::pipeline::Pipeline;
    use azure_http_core::route::Route;
    use azure_http_core::test_utils::{test_request, MockTransport, TEST_ENDPOINT};
    use serial_test::serial;
    use std::collections::HashMap;
    use std::sync::Arc;

    const GET_BLOB: Route = Route {
        name: "blobs.get",
        method: Method::GET,
        path: "/container/{blob}",
        expected: &[200],
        errors: &[],
    };

    fn download_table() -> FaultInjectionProbabilities {
        FaultInjectionProbabilities {
            partial_response_close: 0.2,
            no_response_abort: 0.1,
            partial_request_close: 0.5,
            ..FaultInjectionProbabilities::default()
        }
    }

    fn policy_pipeline(policy: FaultInjectingPolicy, transport: Arc<MockTransport>) -> Pipeline {
        Pipeline::new(vec![Arc::new(policy)], transport)
    }

    #[test]
    fn codes_match_the_proxy_protocol() {
        assert_eq!(FaultType::None.code(), "f");
        assert_eq!(FaultType::PartialResponseFinishNormal.code(), "pn");
        assert_eq!(FaultType::NoResponseAbort.to_string(), "na");
        assert_eq!(FaultType::PartialRequestClose.code(), "pqc");
        assert!(FaultType::NoRequestIndefinite.is_request_fault());
        assert!(!FaultType::PartialResponseIndefinite.is_request_fault());
    }

    #[test]
    fn selection_walks_cumulative_weights() {
        let policy = FaultInjectingPolicy::new(false, &download_table(), false).unwrap();

        assert_eq!(policy.select_fault(0.0), FaultType::PartialResponseClose);
        assert_eq!(policy.select_fault(0.19), FaultType::PartialResponseClose);
        assert_eq!(policy.select_fault(0.25), FaultType::NoResponseAbort);
        assert_eq!(policy.select_fault(0.3), FaultType::None);
        assert_eq!(policy.select_fault(0.99), FaultType::None);
    }

    #[test]
    fn upload_mode_only_draws_request_faults() {
        let policy = FaultInjectingPolicy::new(false, &download_table(), true).unwrap();

        assert_eq!(policy.select_fault(0.1), FaultType::PartialRequestClose);
        assert_eq!(policy.select_fault(0.6), FaultType::None);
        for i in 0..100 {
            let fault = policy.select_fault(f64::from(i) / 100.0);
            assert!(fault == FaultType::None || fault.is_request_fault());
        }
    }

    #[test]
    fn all_zero_table_never_faults() {
        let policy =
            FaultInjectingPolicy::new(true, &FaultInjectionProbabilities::new(), false).unwrap();
        assert_eq!(policy.select_fault(0.0), FaultType::None);
        assert_eq!(policy.select_fault(0.5), FaultType::None);
    }

    #[test]
    fn random_selection_converges_to_weights() {
        let policy = FaultInjectingPolicy::new(false, &download_table(), false).unwrap();
        let draws = 20_000;

        let mut counts: HashMap<FaultType, u32> = HashMap::new();
        for _ in 0..draws {
            *counts.entry(policy.select_fault(fastrand::f64())).or_default() += 1;
        }

        let share = |fault: FaultType| f64::from(counts.get(&fault).copied().unwrap_or(0)) / f64::from(draws);
        assert!((share(FaultType::PartialResponseClose) - 0.2).abs() < 0.02);
        assert!((share(FaultType::NoResponseAbort) - 0.1).abs() < 0.02);
        assert!((share(FaultType::None) - 0.7).abs() < 0.02);
    }

    #[test]
    fn rejects_tables_over_one() {
        let table = FaultInjectionProbabilities {
            partial_response_indefinite: 0.6,
            no_response_close: 0.5,
            ..FaultInjectionProbabilities::default()
        };
        let err = FaultInjectingPolicy::new(false, &table, false).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(msg) if msg.contains("more than 1")));
    }

    #[test]
    fn rejects_negative_weights() {
        let table = FaultInjectionProbabilities {
            no_request_abort: -0.1,
            ..FaultInjectionProbabilities::default()
        };
        let err = FaultInjectingPolicy::new(false, &table, true).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(msg) if msg.contains("nqa")));
    }

    #[test]
    fn inactive_half_is_not_validated() {
        let table = FaultInjectionProbabilities {
            partial_request_abort: 3.0,
            ..FaultInjectionProbabilities::default()
        };
        assert!(FaultInjectingPolicy::new(false, &table, false).is_ok());
    }

    #[test]
    fn deserializes_from_camel_case_json() {
        let table: FaultInjectionProbabilities = serde_json::from_value(serde_json::json!({
            "partialResponseFinishNormal": 0.25,
            "noRequestClose": 0.5
        }))
        .unwrap();

        assert_eq!(table.partial_response_finish_normal, 0.25);
        assert_eq!(table.no_request_close, 0.5);
        assert_eq!(table.no_response_abort, 0.0);
    }

    #[test]
    #[serial]
    fn from_env_reads_each_variable() {
        std::env::set_var("STRESS_FAULT_NO_RESPONSE_CLOSE", "0.05");
        std::env::set_var("STRESS_FAULT_PARTIAL_REQUEST_ABORT", " 0.1 ");
        let table = FaultInjectionProbabilities::from_env();
        std::env::remove_var("STRESS_FAULT_NO_RESPONSE_CLOSE");
        std::env::remove_var("STRESS_FAULT_PARTIAL_REQUEST_ABORT");

        let table = table.unwrap();
        assert_eq!(table.no_response_close, 0.05);
        assert_eq!(table.partial_request_abort, 0.1);
        assert_eq!(table.partial_response_close, 0.0);
    }

    #[test]
    #[serial]
    fn from_env_rejects_garbage() {
        std::env::set_var("STRESS_FAULT_NO_RESPONSE_ABORT", "often");
        let result = FaultInjectionProbabilities::from_env();
        std::env::remove_var("STRESS_FAULT_NO_RESPONSE_ABORT");

        let err = result.unwrap_err();
        assert!(
            matches!(err, Error::InvalidArgument(msg) if msg.contains("STRESS_FAULT_NO_RESPONSE_ABORT"))
        );
    }

    #[tokio::test]
    async fn redirects_to_the_plain_proxy() {
        let transport = Arc::new(MockTransport::new().with_status(200));
        let policy =
            FaultInjectingPolicy::new(false, &FaultInjectionProbabilities::new(), false).unwrap();
        let pipeline = policy_pipeline(policy, transport.clone());

        let mut request = test_request();
        request.set_url(Url::parse("https://account.blob.core.windows.net/c/b?comp=list").unwrap());
        pipeline.send(&mut Context::new(), &mut request).await.unwrap();

        let sent = &transport.requests()[0];
        assert_eq!(sent.url().as_str(), "http://localhost:7777/c/b?comp=list");
        assert_eq!(
            sent.header(UPSTREAM_URI_HEADER),
            Some("https://account.blob.core.windows.net/c/b?comp=list")
        );
        assert_eq!(sent.header(FAULT_INJECTOR_HEADER), Some("f"));
    }

    #[tokio::test]
    async fn redirects_to_the_tls_proxy() {
        let transport = Arc::new(MockTransport::new().with_status(200));
        let table = FaultInjectionProbabilities {
            no_response_close: 1.0,
            ..FaultInjectionProbabilities::default()
        };
        let policy = FaultInjectingPolicy::new(true, &table, false).unwrap();
        let pipeline = policy_pipeline(policy, transport.clone());

        pipeline
            .send(&mut Context::new(), &mut test_request())
            .await
            .unwrap();

        let sent = &transport.requests()[0];
        assert_eq!(sent.url().scheme(), "https");
        assert_eq!(sent.url().host_str(), Some("localhost"));
        assert_eq!(sent.url().port(), Some(HTTPS_PROXY_PORT));
        assert_eq!(sent.header(FAULT_INJECTOR_HEADER), Some("nc"));
    }

    #[tokio::test]
    async fn response_reports_the_logical_destination() {
        let transport = Arc::new(MockTransport::new().with_status(503));
        let policy =
            FaultInjectingPolicy::new(false, &FaultInjectionProbabilities::new(), false).unwrap();
        let pipeline = policy_pipeline(policy, transport);

        let mut request = test_request();
        let response = pipeline.send(&mut Context::new(), &mut request).await.unwrap();

        assert_eq!(response.status(), 503);
        assert_eq!(response.request().url().as_str(), format!("{TEST_ENDPOINT}/"));
        assert!(response.request().header(UPSTREAM_URI_HEADER).is_none());
        assert_eq!(request.url().as_str(), format!("{TEST_ENDPOINT}/"));
    }

    #[tokio::test]
    async fn transport_errors_pass_through() {
        let transport = Arc::new(MockTransport::new().with_transport_error("connection reset"));
        let policy =
            FaultInjectingPolicy::new(false, &FaultInjectionProbabilities::new(), false).unwrap();
        let pipeline = policy_pipeline(policy, transport);

        let mut request = test_request();
        let err = pipeline
            .send(&mut Context::new(), &mut request)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Transport { .. }));
        assert_eq!(request.url().host_str(), Some("test-vault.vault.azure.net"));
    }

    #[tokio::test]
    async fn works_as_a_per_retry_client_policy() {
        let transport = Arc::new(MockTransport::new().with_headers(200, &[("x-ms-request-id", "srv-1")]));
        let table = FaultInjectionProbabilities {
            partial_request_indefinite: 1.0,
            ..FaultInjectionProbabilities::default()
        };
        let client = ServiceClient::builder()
            .endpoint(TEST_ENDPOINT)
            .api_version("2021-12-02")
            .transport(transport.clone())
            .per_retry_policy(Arc::new(FaultInjectingPolicy::new(false, &table, true).unwrap()))
            .build()
            .unwrap();

        let response = client.send(&GET_BLOB, &[("blob", "data.bin")]).await.unwrap();

        let sent = &transport.requests()[0];
        assert_eq!(sent.url().port(), Some(HTTP_PROXY_PORT));
        assert_eq!(sent.url().path(), "/container/data.bin");
        assert_eq!(sent.header(FAULT_INJECTOR_HEADER), Some("pq"));
        assert_eq!(
            response.request().url().host_str(),
            Some("test-vault.vault.azure.net")
        );
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn logs_each_decision() {
        let transport = Arc::new(MockTransport::new().with_headers(200, &[("x-ms-request-id", "srv-42")]));
        let table = FaultInjectionProbabilities {
            partial_response_abort: 1.0,
            ..FaultInjectionProbabilities::default()
        };
        let policy = FaultInjectingPolicy::new(false, &table, false).unwrap();
        let pipeline = policy_pipeline(policy, transport);

        let mut request = test_request();
        request.insert_header(CLIENT_REQUEST_ID_HEADER, "client-7").unwrap();
        pipeline.send(&mut Context::new(), &mut request).await.unwrap();

        assert!(logs_contain("HTTP response with fault injection"));
        assert!(logs_contain("fault=pa"));
        assert!(logs_contain("client-7"));
        assert!(logs_contain("srv-42"));
        assert!(logs_contain("status=200"));
    }
}
