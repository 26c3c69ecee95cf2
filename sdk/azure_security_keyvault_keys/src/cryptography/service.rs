//! Remote execution of key operations by the Key Vault service.

use azure_http_core::client::ServiceClient;
use azure_http_core::http::Method;
use azure_http_core::route::Route;
use azure_http_core::Result;
use serde::{Deserialize, Serialize};

use super::algorithms::{KeyWrapAlgorithm, SignatureAlgorithm};
use super::models::{
    DecryptParameters, DecryptResult, EncryptParameters, EncryptResult, SignResult,
    UnwrapResult, VerifyResult, WrapResult,
};
use crate::client::GET_KEY;
use crate::models::KeyVaultKey;

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

const fn key_operation(name: &'static str, path: &'static str) -> Route {
    Route {
        name,
        method: Method::POST,
        path,
        expected: &[200],
        errors: &[],
    }
}

const ENCRYPT: Route = key_operation("keys.encrypt", "/keys/{name}/{version}/encrypt");
const DECRYPT: Route = key_operation("keys.decrypt", "/keys/{name}/{version}/decrypt");
const SIGN: Route = key_operation("keys.sign", "/keys/{name}/{version}/sign");
const VERIFY: Route = key_operation("keys.verify", "/keys/{name}/{version}/verify");
const WRAP_KEY: Route = key_operation("keys.wrap", "/keys/{name}/{version}/wrapkey");
const UNWRAP_KEY: Route = key_operation("keys.unwrap", "/keys/{name}/{version}/unwrapkey");

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct KeyOperationRequest<'a> {
    alg: &'a str,
    #[serde(with = "crate::base64url")]
    value: &'a [u8],
    #[serde(with = "crate::base64url::option", skip_serializing_if = "Option::is_none")]
    iv: Option<Vec<u8>>,
    #[serde(with = "crate::base64url::option", skip_serializing_if = "Option::is_none")]
    aad: Option<Vec<u8>>,
    #[serde(with = "crate::base64url::option", skip_serializing_if = "Option::is_none")]
    tag: Option<Vec<u8>>,
}

impl<'a> KeyOperationRequest<'a> {
    fn new(alg: &'a str, value: &'a [u8]) -> Self {
        Self {
            alg,
            value,
            iv: None,
            aad: None,
            tag: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct KeyOperationResponse {
    kid: Option<String>,
    #[serde(with = "crate::base64url")]
    value: Vec<u8>,
    #[serde(default, with = "crate::base64url::option")]
    iv: Option<Vec<u8>>,
    #[serde(default, with = "crate::base64url::option")]
    tag: Option<Vec<u8>>,
    #[serde(default, with = "crate::base64url::option")]
    aad: Option<Vec<u8>>,
}

#[derive(Debug, Serialize)]
struct VerifyRequest<'a> {
    alg: &'a str,
    #[serde(with = "crate::base64url")]
    digest: &'a [u8],
    #[serde(with = "crate::base64url")]
    value: &'a [u8],
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    value: bool,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Sends key operations for one key (and optional version) to the vault.
#[derive(Debug, Clone)]
pub struct CryptographyServiceClient {
    client: ServiceClient,
    name: String,
    version: String,
}

impl CryptographyServiceClient {
    /// `version` may be empty to address the latest version.
    pub fn new(client: ServiceClient, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
            version: version.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn params(&self) -> [(&str, &str); 2] {
        [("name", self.name.as_str()), ("version", self.version.as_str())]
    }

    async fn key_operation(
        &self,
        route: &Route,
        body: &KeyOperationRequest<'_>,
    ) -> Result<KeyOperationResponse> {
        tracing::debug!(route = route.name, alg = body.alg, "delegating key operation to the service");
        let response = self.client.send_json(route, &self.params(), body).await?;
        response.json()
    }

    /// Fetch the key, including its public material.
    pub async fn get_key(&self) -> Result<KeyVaultKey> {
        let response = self.client.send(&GET_KEY, &self.params()).await?;
        response.json()
    }

    pub async fn encrypt(&self, params: &EncryptParameters) -> Result<EncryptResult> {
        let mut body = KeyOperationRequest::new(params.algorithm.as_str(), &params.plaintext);
        body.iv = params.iv.clone();
        body.aad = params.additional_authenticated_data.clone();

        let result = self.key_operation(&ENCRYPT, &body).await?;
        Ok(EncryptResult {
            ciphertext: result.value,
            algorithm: params.algorithm.clone(),
            key_id: result.kid,
            iv: result.iv.or_else(|| params.iv.clone()),
            authentication_tag: result.tag,
            additional_authenticated_data: result
                .aad
                .or_else(|| params.additional_authenticated_data.clone()),
        })
    }

    pub async fn decrypt(&self, params: &DecryptParameters) -> Result<DecryptResult> {
        let mut body = KeyOperationRequest::new(params.algorithm.as_str(), &params.ciphertext);
        body.iv = params.iv.clone();
        body.aad = params.additional_authenticated_data.clone();
        body.tag = params.authentication_tag.clone();

        let result = self.key_operation(&DECRYPT, &body).await?;
        Ok(DecryptResult {
            plaintext: result.value,
            algorithm: params.algorithm.clone(),
            key_id: result.kid,
        })
    }

    pub async fn sign(&self, algorithm: &SignatureAlgorithm, digest: &[u8]) -> Result<SignResult> {
        let body = KeyOperationRequest::new(algorithm.as_str(), digest);
        let result = self.key_operation(&SIGN, &body).await?;
        Ok(SignResult {
            signature: result.value,
            algorithm: algorithm.clone(),
            key_id: result.kid,
        })
    }

    pub async fn verify(
        &self,
        algorithm: &SignatureAlgorithm,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<VerifyResult> {
        let body = VerifyRequest {
            alg: algorithm.as_str(),
            digest,
            value: signature,
        };
        tracing::debug!(route = VERIFY.name, alg = body.alg, "delegating key operation to the service");
        let response = self.client.send_json(&VERIFY, &self.params(), &body).await?;
        let result: VerifyResponse = response.json()?;
        Ok(VerifyResult {
            is_valid: result.value,
            algorithm: algorithm.clone(),
            key_id: None,
        })
    }

    pub async fn wrap_key(&self, algorithm: &KeyWrapAlgorithm, key: &[u8]) -> Result<WrapResult> {
        let body = KeyOperationRequest::new(algorithm.as_str(), key);
        let result = self.key_operation(&WRAP_KEY, &body).await?;
        Ok(WrapResult {
            encrypted_key: result.value,
            algorithm: algorithm.clone(),
            key_id: result.kid,
        })
    }

    pub async fn unwrap_key(
        &self,
        algorithm: &KeyWrapAlgorithm,
        encrypted_key: &[u8],
    ) -> Result<UnwrapResult> {
        let body = KeyOperationRequest::new(algorithm.as_str(), encrypted_key);
        let result = self.key_operation(&UNWRAP_KEY, &body).await?;
        Ok(UnwrapResult {
            key: result.value,
            algorithm: algorithm.clone(),
            key_id: result.kid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cryptography::algorithms::EncryptionAlgorithm;
    use crate::test_utils::mock_service_client;
    use azure_http_core::test_utils::MockTransport;
    use azure_http_core::{Error, HttpErrorKind};
    use std::sync::Arc;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn wiremock_client(server: &MockServer) -> CryptographyServiceClient {
        let client = ServiceClient::builder()
            .endpoint(server.uri())
            .api_version("7.5")
            .build()
            .unwrap();
        CryptographyServiceClient::new(client, "my-key", "v1")
    }

    #[tokio::test]
    async fn encrypt_posts_base64url_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/keys/my-key/v1/encrypt"))
            .and(query_param("api-version", "7.5"))
            .and(body_json(serde_json::json!({
                "alg": "RSA-OAEP-256",
                "value": "-_8"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "kid": "https://vault/keys/my-key/v1",
                "value": "AQID"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = wiremock_client(&server).await;
        let result = client
            .encrypt(&EncryptParameters::new(
                EncryptionAlgorithm::RSA_OAEP_256,
                vec![0xfb, 0xff],
            ))
            .await
            .unwrap();

        assert_eq!(result.ciphertext, vec![1, 2, 3]);
        assert_eq!(result.key_id.as_deref(), Some("https://vault/keys/my-key/v1"));
    }

    #[tokio::test]
    async fn verify_sends_digest_and_signature() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/keys/my-key/v1/verify"))
            .and(body_json(serde_json::json!({
                "alg": "ES512",
                "digest": "AQ",
                "value": "Ag"
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"value": true})),
            )
            .mount(&server)
            .await;

        let client = wiremock_client(&server).await;
        let result = client
            .verify(&SignatureAlgorithm::ES512, &[1], &[2])
            .await
            .unwrap();

        assert!(result.is_valid);
    }

    #[tokio::test]
    async fn latest_version_drops_the_segment() {
        let transport = Arc::new(MockTransport::new().with_json(
            200,
            serde_json::json!({"kid": "https://vault/keys/k/2", "value": "AA"}),
        ));
        let client = CryptographyServiceClient::new(mock_service_client(transport.clone()), "k", "");

        client
            .wrap_key(&KeyWrapAlgorithm::A256KW, &[0; 32])
            .await
            .unwrap();

        let requests = transport.requests();
        assert_eq!(requests[0].url().path(), "/keys/k/wrapkey");
    }

    #[tokio::test]
    async fn get_key_maps_forbidden() {
        let transport = Arc::new(MockTransport::new().with_json(
            403,
            serde_json::json!({"error": {"code": "Forbidden", "message": "no get permission"}}),
        ));
        let client = CryptographyServiceClient::new(mock_service_client(transport), "k", "1");

        let err = client.get_key().await.unwrap_err();
        match err {
            Error::Http(http) => {
                assert_eq!(http.status, 403);
                assert_eq!(http.kind, HttpErrorKind::ResourceModified);
                assert_eq!(http.code.as_deref(), Some("Forbidden"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
