//! Cryptographic operations with a Key Vault key.
//!
//! [`CryptographyClient`] runs an operation in-process when the key material
//! and the algorithm allow it, and sends it to the service otherwise:
//!
//! | Key type        | Local                                       | Service only          |
//! |-----------------|---------------------------------------------|-----------------------|
//! | `oct`           | AES-CBC, AES-CBCPAD, AES-KW                 | AES-GCM               |
//! | `RSA`           | RSA1_5, RSA-OAEP, RSA-OAEP-256              | PS*, RS* signatures   |
//! | `EC`            | ES256, ES384                                | ES512, ES256K         |
//!
//! Operations a key type cannot perform at all (signing with an AES key,
//! encrypting with an EC key) fail with [`Error::UnsupportedOperation`].

use std::fmt;
use std::sync::Arc;

use azure_http_core::client::ServiceClient;
use azure_http_core::{Error, Result};
use tokio::sync::OnceCell;

mod aes_key;
pub mod algorithms;
mod ec_key;
mod jwk;
mod models;
mod rsa_key;
mod service;

pub use algorithms::{
    EncryptionAlgorithm, HashAlgorithm, KeyWrapAlgorithm, SignatureAlgorithm,
};
pub use jwk::{JsonWebKey, KeyCurveName, KeyOperation, KeyType};
pub use models::{
    DecryptParameters, DecryptResult, EncryptParameters, EncryptResult, SignResult,
    UnwrapResult, VerifyResult, WrapResult,
};
pub use service::CryptographyServiceClient;

use crate::models::KeyId;

// ---------------------------------------------------------------------------
// Local execution
// ---------------------------------------------------------------------------

/// Result of attempting an operation in-process.
#[derive(Debug)]
pub(crate) enum LocalOutcome<T> {
    Done(T),
    /// The algorithm or the key half it needs is not available locally.
    Delegate,
}

/// In-process implementation of the key operations for one key type.
///
/// `Err` is a definite failure; [`LocalOutcome::Delegate`] lets the caller
/// fall back to the service.
pub(crate) trait LocalKey: Send + Sync {
    fn encrypt(&self, params: &EncryptParameters) -> Result<LocalOutcome<EncryptResult>>;
    fn decrypt(&self, params: &DecryptParameters) -> Result<LocalOutcome<DecryptResult>>;
    fn sign(&self, algorithm: &SignatureAlgorithm, digest: &[u8]) -> Result<LocalOutcome<SignResult>>;
    fn verify(
        &self,
        algorithm: &SignatureAlgorithm,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<LocalOutcome<VerifyResult>>;
    fn wrap_key(&self, algorithm: &KeyWrapAlgorithm, key: &[u8]) -> Result<LocalOutcome<WrapResult>>;
    fn unwrap_key(
        &self,
        algorithm: &KeyWrapAlgorithm,
        encrypted_key: &[u8],
    ) -> Result<LocalOutcome<UnwrapResult>>;
}

struct LocalCryptography {
    jwk: JsonWebKey,
    key_type: KeyType,
    key: Box<dyn LocalKey>,
}

impl LocalCryptography {
    fn new(jwk: JsonWebKey) -> Result<Self> {
        let key_type = jwk.key_type.clone().ok_or_else(|| {
            Error::UnsupportedOperation("key has no key type (kty)".into())
        })?;

        let key: Box<dyn LocalKey> = match key_type.as_str() {
            "oct" | "oct-HSM" => Box::new(aes_key::AesKey::new(&jwk)),
            "RSA" | "RSA-HSM" => Box::new(rsa_key::RsaKey::new(&jwk)?),
            "EC" | "EC-HSM" => Box::new(ec_key::EcKey::new(&jwk)),
            other => {
                return Err(Error::UnsupportedOperation(format!(
                    "key type {other} is not supported for local cryptography"
                )))
            }
        };

        Ok(Self { jwk, key_type, key })
    }

    fn check_permission(&self, operation: KeyOperation) -> Result<()> {
        if self.jwk.permits(&operation) {
            Ok(())
        } else {
            Err(Error::UnsupportedOperation(format!(
                "key does not permit the {operation} operation"
            )))
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Performs key operations locally where possible, otherwise on the service.
///
/// Created from key material with [`CryptographyClient::from_json_web_key`]
/// (local only) or from a key identifier with [`CryptographyClient::new`],
/// in which case the key is fetched once on first use. If the caller lacks
/// permission to read the key (403), every operation goes to the service.
///
/// Cloning is cheap; clones share the fetched key.
#[derive(Clone)]
pub struct CryptographyClient {
    inner: Arc<Inner>,
}

struct Inner {
    key_id: Option<String>,
    remote: Option<CryptographyServiceClient>,
    local: OnceCell<Option<LocalCryptography>>,
}

impl fmt::Debug for CryptographyClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptographyClient")
            .field("key_id", &self.inner.key_id)
            .field("remote", &self.inner.remote.is_some())
            .field(
                "local",
                &self.inner.local.get().map(|l| l.as_ref().map(|l| &l.key_type)),
            )
            .finish()
    }
}

impl CryptographyClient {
    /// A client for the key at `key_id` (`{vault}/keys/{name}[/{version}]`)
    /// that sends requests through `client`.
    pub fn new(key_id: &str, client: ServiceClient) -> Result<Self> {
        let id = KeyId::parse(key_id)?;
        let remote = CryptographyServiceClient::new(
            client,
            id.name,
            id.version.unwrap_or_default(),
        );
        Ok(Self {
            inner: Arc::new(Inner {
                key_id: Some(key_id.to_string()),
                remote: Some(remote),
                local: OnceCell::new(),
            }),
        })
    }

    /// A local-only client over `jwk`.
    ///
    /// Operations that cannot run locally fail with
    /// [`Error::UnsupportedOperation`].
    pub fn from_json_web_key(jwk: JsonWebKey) -> Result<Self> {
        let key_id = jwk.id.clone();
        let local = LocalCryptography::new(jwk)?;
        Ok(Self {
            inner: Arc::new(Inner {
                key_id,
                remote: None,
                local: OnceCell::new_with(Some(Some(local))),
            }),
        })
    }

    pub fn key_id(&self) -> Option<&str> {
        self.inner.key_id.as_deref()
    }

    async fn local(&self) -> Result<Option<&LocalCryptography>> {
        let local = self
            .inner
            .local
            .get_or_try_init(|| async {
                let Some(remote) = &self.inner.remote else {
                    return Ok(None);
                };
                match remote.get_key().await {
                    Ok(key) => match key.key.map(LocalCryptography::new) {
                        Some(Ok(local)) => {
                            tracing::debug!(kty = %local.key_type, "key material cached for local operations");
                            Ok(Some(local))
                        }
                        Some(Err(e)) => {
                            tracing::debug!(error = %e, "key cannot be used locally");
                            Ok(None)
                        }
                        None => Ok(None),
                    },
                    Err(e) if e.status_code() == Some(403) => {
                        tracing::debug!("no permission to read the key; using the service only");
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            })
            .await?;
        Ok(local.as_ref())
    }

    fn remote(&self, operation: &str, algorithm: &str) -> Result<&CryptographyServiceClient> {
        self.inner.remote.as_ref().ok_or_else(|| {
            Error::UnsupportedOperation(format!(
                "{operation} with {algorithm} cannot be performed locally and no service client is configured"
            ))
        })
    }

    /// Encrypt `params.plaintext`.
    ///
    /// For AES-CBC the returned [`EncryptResult::iv`] holds the IV used,
    /// generated when none was supplied.
    ///
    /// # Tracing
    ///
    /// Emits a span named `keyvault::keys::crypto::encrypt` with field `alg`.
    #[tracing::instrument(
        name = "keyvault::keys::crypto::encrypt",
        skip(self, params),
        fields(alg = %params.algorithm)
    )]
    pub async fn encrypt(&self, params: EncryptParameters) -> Result<EncryptResult> {
        if let Some(local) = self.local().await? {
            local.check_permission(KeyOperation::ENCRYPT)?;
            if let LocalOutcome::Done(result) = local.key.encrypt(&params)? {
                tracing::debug!("encrypted locally");
                return Ok(result);
            }
        }
        self.remote("encrypt", params.algorithm.as_str())?
            .encrypt(&params)
            .await
    }

    /// Decrypt `params.ciphertext`.
    ///
    /// AES-CBC requires [`DecryptParameters::iv`]; without it this fails
    /// before the key is fetched or the service is called.
    #[tracing::instrument(
        name = "keyvault::keys::crypto::decrypt",
        skip(self, params),
        fields(alg = %params.algorithm)
    )]
    pub async fn decrypt(&self, params: DecryptParameters) -> Result<DecryptResult> {
        if params.iv.is_none()
            && matches!(
                algorithms::resolve(params.algorithm.as_str()),
                Some(algorithms::Algorithm::AesCbc { .. })
            )
        {
            return Err(Error::InvalidArgument(format!(
                "an initialization vector is required to decrypt with {}",
                params.algorithm
            )));
        }
        if let Some(local) = self.local().await? {
            local.check_permission(KeyOperation::DECRYPT)?;
            if let LocalOutcome::Done(result) = local.key.decrypt(&params)? {
                tracing::debug!("decrypted locally");
                return Ok(result);
            }
        }
        self.remote("decrypt", params.algorithm.as_str())?
            .decrypt(&params)
            .await
    }

    /// Sign a precomputed `digest`.
    #[tracing::instrument(
        name = "keyvault::keys::crypto::sign",
        skip(self, digest),
        fields(alg = %algorithm)
    )]
    pub async fn sign(&self, algorithm: SignatureAlgorithm, digest: &[u8]) -> Result<SignResult> {
        if let Some(local) = self.local().await? {
            local.check_permission(KeyOperation::SIGN)?;
            if let LocalOutcome::Done(result) = local.key.sign(&algorithm, digest)? {
                tracing::debug!("signed locally");
                return Ok(result);
            }
        }
        self.remote("sign", algorithm.as_str())?
            .sign(&algorithm, digest)
            .await
    }

    /// Verify `signature` over a precomputed `digest`.
    #[tracing::instrument(
        name = "keyvault::keys::crypto::verify",
        skip(self, digest, signature),
        fields(alg = %algorithm)
    )]
    pub async fn verify(
        &self,
        algorithm: SignatureAlgorithm,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<VerifyResult> {
        if let Some(local) = self.local().await? {
            local.check_permission(KeyOperation::VERIFY)?;
            if let LocalOutcome::Done(result) = local.key.verify(&algorithm, digest, signature)? {
                tracing::debug!(is_valid = result.is_valid, "verified locally");
                return Ok(result);
            }
        }
        self.remote("verify", algorithm.as_str())?
            .verify(&algorithm, digest, signature)
            .await
    }

    /// Hash `data` with the digest `algorithm` is defined over, then sign.
    pub async fn sign_data(&self, algorithm: SignatureAlgorithm, data: &[u8]) -> Result<SignResult> {
        let digest = hash_for(&algorithm, data)?;
        self.sign(algorithm, &digest).await
    }

    /// Hash `data` with the digest `algorithm` is defined over, then verify.
    pub async fn verify_data(
        &self,
        algorithm: SignatureAlgorithm,
        data: &[u8],
        signature: &[u8],
    ) -> Result<VerifyResult> {
        let digest = hash_for(&algorithm, data)?;
        self.verify(algorithm, &digest, signature).await
    }

    #[tracing::instrument(
        name = "keyvault::keys::crypto::wrap_key",
        skip(self, key),
        fields(alg = %algorithm)
    )]
    pub async fn wrap_key(&self, algorithm: KeyWrapAlgorithm, key: &[u8]) -> Result<WrapResult> {
        if let Some(local) = self.local().await? {
            local.check_permission(KeyOperation::WRAP_KEY)?;
            if let LocalOutcome::Done(result) = local.key.wrap_key(&algorithm, key)? {
                tracing::debug!("wrapped locally");
                return Ok(result);
            }
        }
        self.remote("wrap key", algorithm.as_str())?
            .wrap_key(&algorithm, key)
            .await
    }

    #[tracing::instrument(
        name = "keyvault::keys::crypto::unwrap_key",
        skip(self, encrypted_key),
        fields(alg = %algorithm)
    )]
    pub async fn unwrap_key(
        &self,
        algorithm: KeyWrapAlgorithm,
        encrypted_key: &[u8],
    ) -> Result<UnwrapResult> {
        if let Some(local) = self.local().await? {
            local.check_permission(KeyOperation::UNWRAP_KEY)?;
            if let LocalOutcome::Done(result) = local.key.unwrap_key(&algorithm, encrypted_key)? {
                tracing::debug!("unwrapped locally");
                return Ok(result);
            }
        }
        self.remote("unwrap key", algorithm.as_str())?
            .unwrap_key(&algorithm, encrypted_key)
            .await
    }
}

fn hash_for(algorithm: &SignatureAlgorithm, data: &[u8]) -> Result<Vec<u8>> {
    let hash = HashAlgorithm::for_signature(algorithm).ok_or_else(|| {
        Error::InvalidArgument(format!("no digest is defined for signature algorithm {algorithm}"))
    })?;
    Ok(hash.digest(data))
}
