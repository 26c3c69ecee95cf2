//! Algorithm names and the process-wide table of locally supported
//! algorithms.

use std::collections::HashMap;
use std::sync::LazyLock;

use sha2::Digest;

string_enum! {
    /// Encryption algorithm names accepted by encrypt/decrypt.
    EncryptionAlgorithm {
        RSA1_5 = "RSA1_5",
        RSA_OAEP = "RSA-OAEP",
        RSA_OAEP_256 = "RSA-OAEP-256",
        A128GCM = "A128GCM",
        A192GCM = "A192GCM",
        A256GCM = "A256GCM",
        A128CBC = "A128CBC",
        A192CBC = "A192CBC",
        A256CBC = "A256CBC",
        A128CBCPAD = "A128CBCPAD",
        A192CBCPAD = "A192CBCPAD",
        A256CBCPAD = "A256CBCPAD",
    }
}

string_enum! {
    /// Key wrap algorithm names accepted by wrap/unwrap.
    KeyWrapAlgorithm {
        RSA1_5 = "RSA1_5",
        RSA_OAEP = "RSA-OAEP",
        RSA_OAEP_256 = "RSA-OAEP-256",
        A128KW = "A128KW",
        A192KW = "A192KW",
        A256KW = "A256KW",
    }
}

string_enum! {
    /// Signature algorithm names accepted by sign/verify.
    SignatureAlgorithm {
        PS256 = "PS256",
        PS384 = "PS384",
        PS512 = "PS512",
        RS256 = "RS256",
        RS384 = "RS384",
        RS512 = "RS512",
        ES256 = "ES256",
        ES384 = "ES384",
        ES512 = "ES512",
        /// ECDSA on secp256k1.
        ES256K = "ES256K",
    }
}

impl EncryptionAlgorithm {
    pub(crate) fn is_gcm(&self) -> bool {
        self.as_str().ends_with("GCM")
    }
}

/// RSA encryption padding schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsaPadding {
    Pkcs1v15,
    /// OAEP with SHA-1.
    Oaep,
    OaepSha256,
}

/// Curves with local ECDSA support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcCurve {
    P256,
    P384,
}

/// A locally executable algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// AES-CBC, optionally with PKCS#7 padding. `key_size` in bytes.
    AesCbc { key_size: usize, padded: bool },
    Rsa(RsaPadding),
    Ecdsa(EcCurve),
    /// AES key wrap (RFC 3394). `key_size` in bytes.
    AesKw { key_size: usize },
}

static ALGORITHMS: LazyLock<HashMap<&'static str, Algorithm>> = LazyLock::new(|| {
    HashMap::from([
        ("A128CBC", Algorithm::AesCbc { key_size: 16, padded: false }),
        ("A192CBC", Algorithm::AesCbc { key_size: 24, padded: false }),
        ("A256CBC", Algorithm::AesCbc { key_size: 32, padded: false }),
        ("A128CBCPAD", Algorithm::AesCbc { key_size: 16, padded: true }),
        ("A192CBCPAD", Algorithm::AesCbc { key_size: 24, padded: true }),
        ("A256CBCPAD", Algorithm::AesCbc { key_size: 32, padded: true }),
        ("RSA1_5", Algorithm::Rsa(RsaPadding::Pkcs1v15)),
        ("RSA-OAEP", Algorithm::Rsa(RsaPadding::Oaep)),
        ("RSA-OAEP-256", Algorithm::Rsa(RsaPadding::OaepSha256)),
        ("ES256", Algorithm::Ecdsa(EcCurve::P256)),
        ("ES384", Algorithm::Ecdsa(EcCurve::P384)),
        ("A128KW", Algorithm::AesKw { key_size: 16 }),
        ("A192KW", Algorithm::AesKw { key_size: 24 }),
        ("A256KW", Algorithm::AesKw { key_size: 32 }),
    ])
});

/// Look up an algorithm name in the local table.
///
/// `None` means the algorithm can only be executed by the service.
pub fn resolve(name: &str) -> Option<Algorithm> {
    ALGORITHMS.get(name).copied()
}

/// Digest algorithms used by `sign_data` / `verify_data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    /// The digest each signature algorithm is defined over.
    pub fn for_signature(algorithm: &SignatureAlgorithm) -> Option<Self> {
        match algorithm.as_str() {
            "PS256" | "RS256" | "ES256" | "ES256K" => Some(Self::Sha256),
            "PS384" | "RS384" | "ES384" => Some(Self::Sha384),
            "PS512" | "RS512" | "ES512" => Some(Self::Sha512),
            _ => None,
        }
    }

    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha256 => sha2::Sha256::digest(data).to_vec(),
            Self::Sha384 => sha2::Sha384::digest(data).to_vec(),
            Self::Sha512 => sha2::Sha512::digest(data).to_vec(),
        }
    }
}
