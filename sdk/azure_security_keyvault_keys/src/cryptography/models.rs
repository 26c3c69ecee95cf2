//! Parameters and results of cryptographic operations.

use super::algorithms::{EncryptionAlgorithm, KeyWrapAlgorithm, SignatureAlgorithm};

/// Input to [`super::CryptographyClient::encrypt`].
#[derive(Debug, Clone)]
pub struct EncryptParameters {
    pub algorithm: EncryptionAlgorithm,
    pub plaintext: Vec<u8>,
    /// Initialization vector for AES modes. Generated when absent.
    pub iv: Option<Vec<u8>>,
    /// AES-GCM only.
    pub additional_authenticated_data: Option<Vec<u8>>,
}

impl EncryptParameters {
    pub fn new(algorithm: EncryptionAlgorithm, plaintext: Vec<u8>) -> Self {
        Self {
            algorithm,
            plaintext,
            iv: None,
            additional_authenticated_data: None,
        }
    }

    pub fn with_iv(mut self, iv: Vec<u8>) -> Self {
        self.iv = Some(iv);
        self
    }

    pub fn with_additional_authenticated_data(mut self, aad: Vec<u8>) -> Self {
        self.additional_authenticated_data = Some(aad);
        self
    }
}

/// Input to [`super::CryptographyClient::decrypt`].
#[derive(Debug, Clone)]
pub struct DecryptParameters {
    pub algorithm: EncryptionAlgorithm,
    pub ciphertext: Vec<u8>,
    /// Required for AES modes.
    pub iv: Option<Vec<u8>>,
    pub additional_authenticated_data: Option<Vec<u8>>,
    /// AES-GCM only.
    pub authentication_tag: Option<Vec<u8>>,
}

impl DecryptParameters {
    pub fn new(algorithm: EncryptionAlgorithm, ciphertext: Vec<u8>) -> Self {
        Self {
            algorithm,
            ciphertext,
            iv: None,
            additional_authenticated_data: None,
            authentication_tag: None,
        }
    }

    pub fn with_iv(mut self, iv: Vec<u8>) -> Self {
        self.iv = Some(iv);
        self
    }

    pub fn with_additional_authenticated_data(mut self, aad: Vec<u8>) -> Self {
        self.additional_authenticated_data = Some(aad);
        self
    }

    pub fn with_authentication_tag(mut self, tag: Vec<u8>) -> Self {
        self.authentication_tag = Some(tag);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptResult {
    pub ciphertext: Vec<u8>,
    pub algorithm: EncryptionAlgorithm,
    /// Identifier of the key used, when known.
    pub key_id: Option<String>,
    /// The IV actually used, including a generated one.
    pub iv: Option<Vec<u8>>,
    pub authentication_tag: Option<Vec<u8>>,
    pub additional_authenticated_data: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptResult {
    pub plaintext: Vec<u8>,
    pub algorithm: EncryptionAlgorithm,
    pub key_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignResult {
    pub signature: Vec<u8>,
    pub algorithm: SignatureAlgorithm,
    pub key_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyResult {
    pub is_valid: bool,
    pub algorithm: SignatureAlgorithm,
    pub key_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapResult {
    pub encrypted_key: Vec<u8>,
    pub algorithm: KeyWrapAlgorithm,
    pub key_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnwrapResult {
    pub key: Vec<u8>,
    pub algorithm: KeyWrapAlgorithm,
    pub key_id: Option<String>,
}
