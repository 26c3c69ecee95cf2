//! Key Vault key management client.
//!
//! # Example
//!
//! ```rust,no_run
//! use azure_security_keyvault_keys::client::KeyClient;
//! use azure_http_core::auth::Credential;
//!
//! # fn example() -> azure_http_core::Result<()> {
//! let client = KeyClient::builder()
//!     .endpoint("https://my-vault.vault.azure.net")
//!     .credential(Credential::from_env()?)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use azure_http_core::auth::Credential;
use azure_http_core::client::ServiceClient;
use azure_http_core::http::{Method, Response};
use azure_http_core::pipeline::{Policy, Transport};
use azure_http_core::polling::{
    LongRunningOperationStatus, PollOperation, PollResponse, Poller, PollingContext,
};
use azure_http_core::retry::{self, RetryOptions};
use azure_http_core::route::Route;
use azure_http_core::{Error, HttpErrorKind, Result};
use serde::de::DeserializeOwned;

use crate::cryptography::CryptographyClient;
use crate::models::{DeletedKey, KeyVaultKey};

/// Default Key Vault REST API version.
pub const DEFAULT_API_VERSION: &str = "7.5";

/// OAuth scope for Key Vault data-plane tokens.
pub const KEYVAULT_SCOPE: &str = "https://vault.azure.net/.default";

/// Environment variable read when no endpoint is configured.
pub const ENDPOINT_ENV: &str = "AZURE_KEYVAULT_URL";

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub(crate) const GET_KEY: Route = Route {
    name: "keys.get",
    method: Method::GET,
    path: "/keys/{name}/{version}",
    expected: &[200],
    errors: &[
        (404, HttpErrorKind::ResourceNotFound),
        (403, HttpErrorKind::ResourceModified),
    ],
};

const GET_KEY_POLL: Route = Route {
    name: "keys.get.poll",
    method: Method::GET,
    path: "/keys/{name}/{version}",
    expected: &[200, 404],
    errors: &[(403, HttpErrorKind::ResourceModified)],
};

const DELETE_KEY: Route = Route {
    name: "keys.delete",
    method: Method::DELETE,
    path: "/keys/{name}",
    expected: &[200],
    errors: &[(404, HttpErrorKind::ResourceNotFound)],
};

const GET_DELETED_KEY: Route = Route {
    name: "deletedkeys.get",
    method: Method::GET,
    path: "/deletedkeys/{name}",
    expected: &[200],
    errors: &[(404, HttpErrorKind::ResourceNotFound)],
};

const GET_DELETED_KEY_POLL: Route = Route {
    name: "deletedkeys.get.poll",
    method: Method::GET,
    path: "/deletedkeys/{name}",
    expected: &[200, 404],
    errors: &[],
};

const PURGE_DELETED_KEY: Route = Route {
    name: "deletedkeys.purge",
    method: Method::DELETE,
    path: "/deletedkeys/{name}",
    expected: &[204],
    errors: &[(404, HttpErrorKind::ResourceNotFound)],
};

const RECOVER_DELETED_KEY: Route = Route {
    name: "deletedkeys.recover",
    method: Method::POST,
    path: "/deletedkeys/{name}/recover",
    expected: &[200],
    errors: &[(404, HttpErrorKind::ResourceNotFound)],
};

const ROTATE_KEY: Route = Route {
    name: "keys.rotate",
    method: Method::POST,
    path: "/keys/{name}/rotate",
    expected: &[200],
    errors: &[(404, HttpErrorKind::ResourceNotFound)],
};

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Client for keys in one vault.
///
/// Cheap to clone; clones share the pipeline.
#[derive(Debug, Clone)]
pub struct KeyClient {
    client: ServiceClient,
    poll_interval: Option<Duration>,
}

impl KeyClient {
    pub fn builder() -> KeyClientBuilder {
        KeyClientBuilder::default()
    }

    /// A client over an existing [`ServiceClient`].
    pub fn from_service_client(client: ServiceClient) -> Self {
        Self {
            client,
            poll_interval: None,
        }
    }

    pub fn vault_url(&self) -> &url::Url {
        self.client.endpoint()
    }

    /// Get a key. `version` of `None` selects the latest version.
    ///
    /// # Tracing
    ///
    /// Emits a span named `keyvault::keys::get` with field `name`.
    #[tracing::instrument(name = "keyvault::keys::get", skip(self, version), fields(name = %name))]
    pub async fn get_key(&self, name: &str, version: Option<&str>) -> Result<KeyVaultKey> {
        tracing::debug!("getting key");
        let response = self
            .client
            .send(&GET_KEY, &[("name", name), ("version", version.unwrap_or_default())])
            .await?;
        response.json()
    }

    /// Get a soft-deleted key.
    #[tracing::instrument(name = "keyvault::keys::get_deleted", skip(self), fields(name = %name))]
    pub async fn get_deleted_key(&self, name: &str) -> Result<DeletedKey> {
        tracing::debug!("getting deleted key");
        let response = self.client.send(&GET_DELETED_KEY, &[("name", name)]).await?;
        response.json()
    }

    /// Permanently delete a soft-deleted key.
    #[tracing::instrument(name = "keyvault::keys::purge", skip(self), fields(name = %name))]
    pub async fn purge_deleted_key(&self, name: &str) -> Result<()> {
        self.client
            .send(&PURGE_DELETED_KEY, &[("name", name)])
            .await?;
        tracing::debug!("deleted key purged");
        Ok(())
    }

    /// Create a new version of a key according to its rotation policy.
    #[tracing::instrument(name = "keyvault::keys::rotate", skip(self), fields(name = %name))]
    pub async fn rotate_key(&self, name: &str) -> Result<KeyVaultKey> {
        let response = self.client.send(&ROTATE_KEY, &[("name", name)]).await?;
        let key: KeyVaultKey = response.json()?;
        tracing::debug!(key_id = ?key.id(), "key rotated");
        Ok(key)
    }

    /// Delete a key.
    ///
    /// The delete request is sent before this returns; the poller then
    /// tracks the key until it shows up as soft-deleted. On vaults without
    /// soft delete, or without permission to read deleted keys, the
    /// operation completes with the value returned by the delete request.
    ///
    /// # Tracing
    ///
    /// Emits a span named `keyvault::keys::begin_delete` with field `name`.
    #[tracing::instrument(name = "keyvault::keys::begin_delete", skip(self), fields(name = %name))]
    pub async fn begin_delete_key(
        &self,
        name: &str,
    ) -> Result<Poller<DeletedKey, DeleteKeyPollOperation>> {
        let activation = async {
            let response = self.client.send(&DELETE_KEY, &[("name", name)]).await?;
            response.json::<DeletedKey>()
        };
        let operation = DeleteKeyPollOperation {
            client: self.client.clone(),
            name: name.to_string(),
        };
        Poller::begin(activation, operation, self.poll_interval).await
    }

    /// Recover a soft-deleted key.
    ///
    /// The poller tracks the key until it is readable again.
    #[tracing::instrument(name = "keyvault::keys::begin_recover", skip(self), fields(name = %name))]
    pub async fn begin_recover_deleted_key(
        &self,
        name: &str,
    ) -> Result<Poller<KeyVaultKey, RecoverKeyPollOperation>> {
        let activation = async {
            let response = self
                .client
                .send(&RECOVER_DELETED_KEY, &[("name", name)])
                .await?;
            response.json::<KeyVaultKey>()
        };
        let operation = RecoverKeyPollOperation {
            client: self.client.clone(),
            name: name.to_string(),
        };
        Poller::begin(activation, operation, self.poll_interval).await
    }

    /// A [`CryptographyClient`] for a key in this vault, sharing this
    /// client's pipeline.
    pub fn cryptography_client(&self, name: &str, version: Option<&str>) -> Result<CryptographyClient> {
        let mut key_id = self.client.endpoint().clone();
        key_id
            .path_segments_mut()
            .map_err(|_| Error::InvalidEndpoint {
                message: format!("vault URL cannot be a base URL: {}", self.client.endpoint()),
                source: None,
            })?
            .pop_if_empty()
            .push("keys")
            .push(name)
            .extend(version);
        CryptographyClient::new(key_id.as_str(), self.client.clone())
    }
}

// ---------------------------------------------------------------------------
// Long-running operations
// ---------------------------------------------------------------------------

/// Map one status check to a poll response.
///
/// 404 means the operation has not become visible yet. A 200 without a body
/// completes with the last known value. Any other HTTP error
/// (soft delete disabled, no permission to read) ends the operation
/// successfully with the last known value, since the activation request
/// already succeeded. Transport and decoding failures are returned.
fn poll_outcome<T>(result: Result<Response>, ctx: &PollingContext<T>) -> Result<PollResponse<T>>
where
    T: DeserializeOwned + Clone,
{
    match result {
        Ok(response) if response.status().as_u16() == 404 => {
            let pending = PollResponse::new(
                LongRunningOperationStatus::InProgress,
                ctx.last_known_value().cloned(),
            );
            Ok(match retry::retry_after(&response) {
                Some(delay) => pending.with_retry_after(delay),
                None => pending,
            })
        }
        Ok(response) if response.body().is_empty() => Ok(PollResponse::new(
            LongRunningOperationStatus::SuccessfullyCompleted,
            ctx.last_known_value().cloned(),
        )),
        Ok(response) => Ok(PollResponse::new(
            LongRunningOperationStatus::SuccessfullyCompleted,
            Some(response.json()?),
        )),
        Err(Error::Http(e)) => {
            tracing::debug!(
                status = e.status,
                "status check rejected; completing with the last known value"
            );
            Ok(PollResponse::new(
                LongRunningOperationStatus::SuccessfullyCompleted,
                ctx.last_known_value().cloned(),
            ))
        }
        Err(e) => Err(e),
    }
}

/// Polls `GET /deletedkeys/{name}` until the deleted key is visible.
#[derive(Debug)]
pub struct DeleteKeyPollOperation {
    client: ServiceClient,
    name: String,
}

#[async_trait]
impl PollOperation<DeletedKey> for DeleteKeyPollOperation {
    async fn poll(&self, ctx: &PollingContext<DeletedKey>) -> Result<PollResponse<DeletedKey>> {
        let result = self
            .client
            .send(&GET_DELETED_KEY_POLL, &[("name", self.name.as_str())])
            .await;
        poll_outcome(result, ctx)
    }
}

/// Polls `GET /keys/{name}` until the recovered key is visible.
#[derive(Debug)]
pub struct RecoverKeyPollOperation {
    client: ServiceClient,
    name: String,
}

#[async_trait]
impl PollOperation<KeyVaultKey> for RecoverKeyPollOperation {
    async fn poll(&self, ctx: &PollingContext<KeyVaultKey>) -> Result<PollResponse<KeyVaultKey>> {
        let result = self
            .client
            .send(&GET_KEY_POLL, &[("name", self.name.as_str()), ("version", "")])
            .await;
        poll_outcome(result, ctx)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for [`KeyClient`].
///
/// | Setting     | Fallback                                             |
/// |-------------|------------------------------------------------------|
/// | endpoint    | `AZURE_KEYVAULT_URL`                                 |
/// | credential  | [`Credential::from_env`] (`AZURE_KEYVAULT_ACCESS_TOKEN`) |
/// | retries     | [`RetryOptions::from_env`] (`AZURE_REQUEST_RETRY_COUNT`) |
/// | api-version | [`DEFAULT_API_VERSION`]                              |
#[derive(Debug, Default)]
pub struct KeyClientBuilder {
    endpoint: Option<String>,
    credential: Option<Credential>,
    api_version: Option<String>,
    retry_options: Option<RetryOptions>,
    transport: Option<Arc<dyn Transport>>,
    per_call_policies: Vec<Arc<dyn Policy>>,
    poll_interval: Option<Duration>,
}

impl KeyClientBuilder {
    /// The vault URL, e.g. `https://my-vault.vault.azure.net`.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = Some(api_version.into());
        self
    }

    pub fn retry_options(mut self, options: RetryOptions) -> Self {
        self.retry_options = Some(options);
        self
    }

    /// Replace the network transport, e.g. with a mock in tests.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn per_call_policy(mut self, policy: Arc<dyn Policy>) -> Self {
        self.per_call_policies.push(policy);
        self
    }

    /// Delay between status checks of long-running operations.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<KeyClient> {
        let endpoint = self
            .endpoint
            .or_else(|| std::env::var(ENDPOINT_ENV).ok())
            .ok_or_else(|| {
                Error::MissingConfig(format!(
                    "vault URL is required. Set it via builder or {ENDPOINT_ENV} env var."
                ))
            })?;
        let credential = self.credential.map(Ok).unwrap_or_else(Credential::from_env)?;

        let mut builder = ServiceClient::builder()
            .endpoint(endpoint)
            .api_version(self.api_version.as_deref().unwrap_or(DEFAULT_API_VERSION))
            .credential(credential)
            .scope(KEYVAULT_SCOPE)
            .retry_options(self.retry_options.unwrap_or_else(RetryOptions::from_env));
        for policy in self.per_call_policies {
            builder = builder.per_call_policy(policy);
        }
        if let Some(transport) = self.transport {
            builder = builder.transport(transport);
        }

        Ok(KeyClient {
            client: builder.build()?,
            poll_interval: self.poll_interval,
        })
    }
}
