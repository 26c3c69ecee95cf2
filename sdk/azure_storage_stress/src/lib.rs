//! # Azure Storage Stress
//!
//! Pipeline support for storage stress tests.
//!
//! [`FaultInjectingPolicy`] redirects every request to a local
//! fault-injecting proxy and asks it, through the
//! `x-ms-faultinjector-response-option` header, to misbehave in one of the
//! ways listed by [`FaultType`]. Add it as a per-retry policy so each attempt
//! draws its own fault:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use azure_http_core::client::ServiceClient;
//! use azure_storage_stress::{FaultInjectingPolicy, FaultInjectionProbabilities};
//!
//! # fn main() -> azure_http_core::Result<()> {
//! let probabilities = FaultInjectionProbabilities::from_env()?;
//! let policy = FaultInjectingPolicy::new(false, &probabilities, false)?;
//!
//! let client = ServiceClient::builder()
//!     .endpoint("https://account.blob.core.windows.net")
//!     .api_version("2021-12-02")
//!     .per_retry_policy(Arc::new(policy))
//!     .build()?;
//! # let _ = client;
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! Every probability defaults to zero and can be set through a
//! `STRESS_FAULT_*` variable, see [`FaultInjectionProbabilities::from_env`].

pub mod fault;

pub use fault::{FaultInjectingPolicy, FaultInjectionProbabilities, FaultType};
