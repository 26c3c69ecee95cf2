//! # Azure HTTP Core
//!
//! Shared HTTP machinery for the Azure Rust SDK crates.
//!
//! Every service client sends its requests through a [`pipeline::Pipeline`]:
//! an ordered chain of [`pipeline::Policy`] values ending in a
//! [`pipeline::Transport`]. The standard chain assembled by
//! [`client::ServiceClientBuilder`] is
//!
//! 1. [`policies::RequestIdPolicy`]
//! 2. [`policies::HeadersPolicy`]
//! 3. per-call policies
//! 4. [`retry::RetryPolicy`]
//! 5. [`auth::BearerTokenPolicy`] or [`auth::KeyCredentialPolicy`]
//! 6. per-retry policies
//! 7. [`policies::LoggingPolicy`]
//! 8. the transport ([`transport::ReqwestTransport`] by default)
//!
//! Long-running operations are driven by [`polling::Poller`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use azure_http_core::auth::Credential;
//! use azure_http_core::client::ServiceClient;
//! use azure_http_core::http::Method;
//! use azure_http_core::route::Route;
//!
//! const GET_SECRET: Route = Route {
//!     name: "secrets.get",
//!     method: Method::GET,
//!     path: "/secrets/{name}",
//!     expected: &[200],
//!     errors: &[],
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ServiceClient::builder()
//!         .endpoint("https://my-vault.vault.azure.net")
//!         .api_version("7.5")
//!         .credential(Credential::from_env()?)
//!         .scope("https://vault.azure.net/.default")
//!         .build()?;
//!
//!     let response = client.send(&GET_SECRET, &[("name", "db-password")]).await?;
//!     println!("status: {}", response.status());
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! | Variable | Used by |
//! |----------|---------|
//! | `AZURE_KEYVAULT_ACCESS_TOKEN` | [`auth::Credential::from_env`] |
//! | `AZURE_REQUEST_RETRY_COUNT` | [`retry::RetryOptions::from_env`] |

pub mod auth;
pub mod client;
pub mod error;
pub mod http;
pub mod pipeline;
pub mod policies;
pub mod polling;
pub mod retry;
pub mod route;
pub mod transport;

#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;

pub use error::{Error, HttpError, HttpErrorKind, Result};
