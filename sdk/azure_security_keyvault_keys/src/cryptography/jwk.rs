//! JSON Web Key (RFC 7517) as exchanged with Key Vault.

use std::fmt;

use serde::{Deserialize, Serialize};

string_enum! {
    /// Key type (`kty`).
    KeyType {
        EC = "EC",
        EC_HSM = "EC-HSM",
        RSA = "RSA",
        RSA_HSM = "RSA-HSM",
        OCT = "oct",
        OCT_HSM = "oct-HSM",
    }
}

string_enum! {
    /// Elliptic curve name (`crv`).
    KeyCurveName {
        P256 = "P-256",
        P384 = "P-384",
        P521 = "P-521",
        P256K = "P-256K",
    }
}

string_enum! {
    /// Operations a key permits (`key_ops`).
    KeyOperation {
        ENCRYPT = "encrypt",
        DECRYPT = "decrypt",
        SIGN = "sign",
        VERIFY = "verify",
        WRAP_KEY = "wrapKey",
        UNWRAP_KEY = "unwrapKey",
        IMPORT = "import",
        EXPORT = "export",
    }
}

/// Key material in JSON Web Key form. Binary members are base64url encoded
/// on the wire.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JsonWebKey {
    #[serde(rename = "kid", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "kty", skip_serializing_if = "Option::is_none")]
    pub key_type: Option<KeyType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_ops: Vec<KeyOperation>,
    #[serde(rename = "crv", skip_serializing_if = "Option::is_none")]
    pub curve: Option<KeyCurveName>,

    /// RSA modulus.
    #[serde(default, with = "crate::base64url::option", skip_serializing_if = "Option::is_none")]
    pub n: Option<Vec<u8>>,
    /// RSA public exponent.
    #[serde(default, with = "crate::base64url::option", skip_serializing_if = "Option::is_none")]
    pub e: Option<Vec<u8>>,
    /// RSA private exponent, or EC private key.
    #[serde(default, with = "crate::base64url::option", skip_serializing_if = "Option::is_none")]
    pub d: Option<Vec<u8>>,
    #[serde(default, with = "crate::base64url::option", skip_serializing_if = "Option::is_none")]
    pub dp: Option<Vec<u8>>,
    #[serde(default, with = "crate::base64url::option", skip_serializing_if = "Option::is_none")]
    pub dq: Option<Vec<u8>>,
    #[serde(default, with = "crate::base64url::option", skip_serializing_if = "Option::is_none")]
    pub qi: Option<Vec<u8>>,
    #[serde(default, with = "crate::base64url::option", skip_serializing_if = "Option::is_none")]
    pub p: Option<Vec<u8>>,
    #[serde(default, with = "crate::base64url::option", skip_serializing_if = "Option::is_none")]
    pub q: Option<Vec<u8>>,
    /// Symmetric key.
    #[serde(default, with = "crate::base64url::option", skip_serializing_if = "Option::is_none")]
    pub k: Option<Vec<u8>>,
    /// EC x coordinate.
    #[serde(default, with = "crate::base64url::option", skip_serializing_if = "Option::is_none")]
    pub x: Option<Vec<u8>>,
    /// EC y coordinate.
    #[serde(default, with = "crate::base64url::option", skip_serializing_if = "Option::is_none")]
    pub y: Option<Vec<u8>>,
}

impl JsonWebKey {
    /// Whether `operation` is allowed. An empty `key_ops` allows everything.
    pub fn permits(&self, operation: &KeyOperation) -> bool {
        self.key_ops.is_empty() || self.key_ops.contains(operation)
    }
}

impl fmt::Debug for JsonWebKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted = |v: &Option<Vec<u8>>| v.as_ref().map(|_| "****");
        f.debug_struct("JsonWebKey")
            .field("kid", &self.id)
            .field("kty", &self.key_type)
            .field("key_ops", &self.key_ops)
            .field("crv", &self.curve)
            .field("n", &self.n.as_ref().map(Vec::len))
            .field("e", &self.e)
            .field("x", &self.x)
            .field("y", &self.y)
            .field("d", &redacted(&self.d))
            .field("k", &redacted(&self.k))
            .finish_non_exhaustive()
    }
}
