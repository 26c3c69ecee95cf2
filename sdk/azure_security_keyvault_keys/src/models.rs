//! Key Vault key resources.

use std::collections::HashMap;

use azure_http_core::{Error, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::cryptography::JsonWebKey;

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// Management attributes of a key. Timestamps are Unix seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Not before.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    /// Expiry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<i64>,
    /// e.g. `Recoverable+Purgeable`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recoverable_days: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exportable: Option<bool>,
}

/// A key stored in the vault.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyVaultKey {
    /// Public (and, for exportable keys, private) key material.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<JsonWebKey>,
    #[serde(default)]
    pub attributes: KeyAttributes,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, String>,
    /// True when the key's lifetime is managed by Key Vault.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub managed: Option<bool>,
}

impl KeyVaultKey {
    /// The key identifier (`kid`).
    pub fn id(&self) -> Option<&str> {
        self.key.as_ref().and_then(|k| k.id.as_deref())
    }

    /// Name and version parsed from the identifier.
    pub fn key_id(&self) -> Option<KeyId> {
        self.id().and_then(|id| KeyId::parse(id).ok())
    }
}

/// A soft-deleted key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedKey {
    #[serde(flatten)]
    pub key: KeyVaultKey,
    /// Identifier used to recover the key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_date: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_purge_date: Option<i64>,
}

impl DeletedKey {
    pub fn id(&self) -> Option<&str> {
        self.key.id()
    }
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// A parsed key identifier: `{vault}/keys/{name}[/{version}]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyId {
    pub vault_url: Url,
    pub name: String,
    pub version: Option<String>,
}

impl KeyId {
    pub fn parse(id: &str) -> Result<Self> {
        let url = Url::parse(id)
            .map_err(|e| Error::invalid_endpoint_with_source("invalid key identifier", e))?;

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        let (name, version) = match segments.as_slice() {
            ["keys", name] => (*name, None),
            ["keys", name, version] => (*name, Some(version.to_string())),
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "'{id}' is not a key identifier of the form {{vault}}/keys/{{name}}[/{{version}}]"
                )))
            }
        };

        let mut vault_url = url.clone();
        vault_url.set_path("/");
        vault_url.set_query(None);

        Ok(Self {
            vault_url,
            name: name.to_string(),
            version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_key_bundle() {
        let json = serde_json::json!({
            "key": {
                "kid": "https://myvault.vault.azure.net/keys/k1/v1",
                "kty": "RSA",
                "key_ops": ["encrypt", "decrypt"],
                "n": "AQAB",
                "e": "AQAB"
            },
            "attributes": {
                "enabled": true,
                "created": 1700000000,
                "recoveryLevel": "Recoverable+Purgeable",
                "recoverableDays": 90
            },
            "tags": {"env": "test"}
        });

        let key: KeyVaultKey = serde_json::from_value(json).unwrap();

        assert_eq!(key.id(), Some("https://myvault.vault.azure.net/keys/k1/v1"));
        assert_eq!(key.attributes.recoverable_days, Some(90));
        assert_eq!(key.attributes.recovery_level.as_deref(), Some("Recoverable+Purgeable"));
        assert_eq!(key.tags["env"], "test");
        assert_eq!(key.key_id().unwrap().version.as_deref(), Some("v1"));
    }

    #[test]
    fn deserializes_deleted_key_with_flattened_bundle() {
        let json = serde_json::json!({
            "key": {"kid": "https://myvault.vault.azure.net/keys/k1/v1", "kty": "EC"},
            "attributes": {"enabled": false},
            "recoveryId": "https://myvault.vault.azure.net/deletedkeys/k1",
            "deletedDate": 1700000100,
            "scheduledPurgeDate": 1707776100
        });

        let deleted: DeletedKey = serde_json::from_value(json).unwrap();

        assert_eq!(
            deleted.recovery_id.as_deref(),
            Some("https://myvault.vault.azure.net/deletedkeys/k1")
        );
        assert_eq!(deleted.scheduled_purge_date, Some(1707776100));
        assert_eq!(deleted.id(), Some("https://myvault.vault.azure.net/keys/k1/v1"));
    }

    #[test]
    fn parses_key_id_with_and_without_version() {
        let id = KeyId::parse("https://myvault.vault.azure.net/keys/k1/abc123").unwrap();
        assert_eq!(id.vault_url.as_str(), "https://myvault.vault.azure.net/");
        assert_eq!(id.name, "k1");
        assert_eq!(id.version.as_deref(), Some("abc123"));

        let id = KeyId::parse("https://myvault.vault.azure.net/keys/k1").unwrap();
        assert_eq!(id.version, None);
    }

    #[test]
    fn rejects_non_key_identifier() {
        let err = KeyId::parse("https://myvault.vault.azure.net/secrets/s1").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        let err = KeyId::parse("not a url").unwrap_err();
        assert!(matches!(err, Error::InvalidEndpoint { .. }));
    }
}
