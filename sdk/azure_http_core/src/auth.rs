//! Credentials and the policies that attach them to requests.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::http::{Context, Request, Response};
use crate::pipeline::{Next, Policy};

/// Environment variable holding a pre-acquired bearer token.
pub const ACCESS_TOKEN_ENV: &str = "AZURE_KEYVAULT_ACCESS_TOKEN";

/// Tokens are refreshed once they are this close to expiry.
pub const TOKEN_REFRESH_WINDOW: Duration = Duration::from_secs(300);

/// A bearer token and the instant it stops being valid.
#[derive(Clone)]
pub struct AccessToken {
    pub token: SecretString,
    pub expires_on: Instant,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, lifetime: Duration) -> Self {
        Self {
            token: SecretString::from(token.into()),
            expires_on: Instant::now() + lifetime,
        }
    }

    fn needs_refresh(&self) -> bool {
        self.expires_on
            .checked_duration_since(Instant::now())
            .is_none_or(|remaining| remaining <= TOKEN_REFRESH_WINDOW)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"****")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// Source of bearer tokens.
///
/// Failures must be reported as [`Error::Credential`], carrying the identity
/// provider's status code when it exposes one so the retry policy can
/// classify them.
#[async_trait]
pub trait TokenCredential: Send + Sync + fmt::Debug {
    async fn get_token(&self, scopes: &[&str]) -> Result<AccessToken>;
}

/// A credential that always returns the same token.
#[derive(Clone)]
pub struct StaticTokenCredential {
    token: SecretString,
    lifetime: Duration,
}

impl StaticTokenCredential {
    /// Wrap a pre-acquired token assumed valid for one hour.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: SecretString::from(token.into()),
            lifetime: Duration::from_secs(3600),
        }
    }

    /// Read the token from `AZURE_KEYVAULT_ACCESS_TOKEN`.
    pub fn from_env() -> Result<Self> {
        match std::env::var(ACCESS_TOKEN_ENV) {
            Ok(token) if !token.is_empty() => Ok(Self::new(token)),
            _ => Err(Error::MissingConfig(format!(
                "no credential configured. Set one via builder or {ACCESS_TOKEN_ENV} env var."
            ))),
        }
    }
}

impl fmt::Debug for StaticTokenCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StaticTokenCredential(****)")
    }
}

#[async_trait]
impl TokenCredential for StaticTokenCredential {
    async fn get_token(&self, _scopes: &[&str]) -> Result<AccessToken> {
        Ok(AccessToken {
            token: self.token.clone(),
            expires_on: Instant::now() + self.lifetime,
        })
    }
}

/// Credential types accepted by client builders.
#[derive(Clone)]
pub enum Credential {
    /// A static key sent in a named header.
    Key {
        header: HeaderName,
        key: SecretString,
    },

    /// Bearer tokens obtained from a [`TokenCredential`].
    Token(Arc<dyn TokenCredential>),
}

impl Credential {
    /// A key credential sent as `header: <key>`.
    pub fn key(header: &str, key: impl Into<String>) -> Result<Self> {
        let header = HeaderName::from_bytes(header.as_bytes())
            .map_err(|_| Error::InvalidArgument(format!("invalid header name: {header}")))?;
        Ok(Self::Key {
            header,
            key: SecretString::from(key.into()),
        })
    }

    /// Bearer tokens from the given credential.
    pub fn token_credential(credential: impl TokenCredential + 'static) -> Self {
        Self::Token(Arc::new(credential))
    }

    /// A static bearer token read from `AZURE_KEYVAULT_ACCESS_TOKEN`.
    pub fn from_env() -> Result<Self> {
        Ok(Self::token_credential(StaticTokenCredential::from_env()?))
    }

    /// The policy that attaches this credential to requests.
    pub fn into_policy(self, scopes: Vec<String>) -> Arc<dyn Policy> {
        match self {
            Self::Key { header, key } => Arc::new(KeyCredentialPolicy { header, key }),
            Self::Token(credential) => Arc::new(BearerTokenPolicy::new(credential, scopes)),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key { header, .. } => write!(f, "Credential::Key({header}: ****)"),
            Self::Token(c) => write!(f, "Credential::Token({c:?})"),
        }
    }
}

/// Sets a static key header on every request.
pub struct KeyCredentialPolicy {
    header: HeaderName,
    key: SecretString,
}

impl fmt::Debug for KeyCredentialPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyCredentialPolicy({}: ****)", self.header)
    }
}

#[async_trait]
impl Policy for KeyCredentialPolicy {
    async fn send(
        &self,
        ctx: &mut Context,
        request: &mut Request,
        next: Next<'_>,
    ) -> Result<Response> {
        let mut value = HeaderValue::from_str(self.key.expose_secret())
            .map_err(|_| Error::InvalidArgument("key contains invalid header characters".into()))?;
        value.set_sensitive(true);
        request.headers_mut().insert(self.header.clone(), value);
        next.run(ctx, request).await
    }
}

/// Attaches `Authorization: Bearer <token>`, reusing a cached token until it
/// enters the refresh window.
///
/// A 401 response drops the cached token so that the next attempt (driven
/// by the retry policy or the caller) acquires a fresh one.
#[derive(Debug)]
pub struct BearerTokenPolicy {
    credential: Arc<dyn TokenCredential>,
    scopes: Vec<String>,
    cache: RwLock<Option<AccessToken>>,
}

impl BearerTokenPolicy {
    pub fn new(credential: Arc<dyn TokenCredential>, scopes: Vec<String>) -> Self {
        Self {
            credential,
            scopes,
            cache: RwLock::new(None),
        }
    }

    async fn token(&self) -> Result<SecretString> {
        if let Some(cached) = self.cache.read().await.as_ref() {
            if !cached.needs_refresh() {
                return Ok(cached.token.clone());
            }
        }

        let mut cache = self.cache.write().await;
        // Another call may have refreshed while we waited for the lock.
        if let Some(cached) = cache.as_ref() {
            if !cached.needs_refresh() {
                return Ok(cached.token.clone());
            }
        }

        let scopes: Vec<&str> = self.scopes.iter().map(String::as_str).collect();
        let fresh = self.credential.get_token(&scopes).await?;
        tracing::debug!("acquired access token");
        let token = fresh.token.clone();
        *cache = Some(fresh);
        Ok(token)
    }
}

#[async_trait]
impl Policy for BearerTokenPolicy {
    async fn send(
        &self,
        ctx: &mut Context,
        request: &mut Request,
        next: Next<'_>,
    ) -> Result<Response> {
        let token = self.token().await?;
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
            .map_err(|_| Error::credential(None, "token contains invalid header characters"))?;
        value.set_sensitive(true);
        request.headers_mut().insert(AUTHORIZATION, value);

        let response = next.run(ctx, request).await?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            tracing::debug!("401 received, discarding cached token");
            *self.cache.write().await = None;
        }
        Ok(response)
    }
}
