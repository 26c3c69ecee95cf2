//! Local AES: CBC, CBC with PKCS#7 padding, and key wrap.

use aes::cipher::block_padding::{NoPadding, Pkcs7};
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes_kw::{KekAes128, KekAes192, KekAes256};
use azure_http_core::{Error, Result};
use rand_core::{OsRng, RngCore};

use super::algorithms::{self, Algorithm, KeyWrapAlgorithm, SignatureAlgorithm};
use super::models::{
    DecryptParameters, DecryptResult, EncryptParameters, EncryptResult, SignResult,
    UnwrapResult, VerifyResult, WrapResult,
};
use super::{JsonWebKey, LocalKey, LocalOutcome};

const BLOCK_SIZE: usize = 16;

macro_rules! cbc_encrypt {
    ($aes:ty, $key:expr, $iv:expr, $data:expr, $padded:expr) => {{
        let cipher = cbc::Encryptor::<$aes>::new_from_slices($key, $iv)
            .map_err(|e| Error::InvalidArgument(format!("invalid AES key or IV: {e}")))?;
        if $padded {
            cipher.encrypt_padded_vec_mut::<Pkcs7>($data)
        } else {
            cipher.encrypt_padded_vec_mut::<NoPadding>($data)
        }
    }};
}

macro_rules! cbc_decrypt {
    ($aes:ty, $key:expr, $iv:expr, $data:expr, $padded:expr) => {{
        let cipher = cbc::Decryptor::<$aes>::new_from_slices($key, $iv)
            .map_err(|e| Error::InvalidArgument(format!("invalid AES key or IV: {e}")))?;
        let plaintext = if $padded {
            cipher.decrypt_padded_vec_mut::<Pkcs7>($data)
        } else {
            cipher.decrypt_padded_vec_mut::<NoPadding>($data)
        };
        plaintext.map_err(|_| Error::Cryptography("invalid padding".into()))?
    }};
}

/// A symmetric key (`oct` / `oct-HSM`).
pub(crate) struct AesKey {
    key_id: Option<String>,
    key: Option<Vec<u8>>,
}

impl AesKey {
    pub(crate) fn new(jwk: &JsonWebKey) -> Self {
        Self {
            key_id: jwk.id.clone(),
            key: jwk.k.clone(),
        }
    }

    /// The leading `size` bytes of the key.
    fn key_bytes(&self, size: usize) -> Result<Option<&[u8]>> {
        let Some(key) = self.key.as_deref() else {
            return Ok(None);
        };
        if key.len() < size {
            return Err(Error::InvalidArgument(format!(
                "key is {} bytes, algorithm requires {size}",
                key.len()
            )));
        }
        Ok(Some(&key[..size]))
    }

    /// Resolve `name` to a CBC algorithm. Unresolved names (GCM included)
    /// are left to the service.
    fn cbc(name: &str) -> Result<Option<(usize, bool)>> {
        match algorithms::resolve(name) {
            None => Ok(None),
            Some(Algorithm::AesCbc { key_size, padded }) => Ok(Some((key_size, padded))),
            Some(_) => Err(Error::UnsupportedOperation(format!(
                "{name} is not an AES encryption algorithm"
            ))),
        }
    }

    fn kw(algorithm: &KeyWrapAlgorithm) -> Result<Option<usize>> {
        match algorithms::resolve(algorithm.as_str()) {
            None => Ok(None),
            Some(Algorithm::AesKw { key_size }) => Ok(Some(key_size)),
            Some(_) => Err(Error::UnsupportedOperation(format!(
                "{algorithm} is not an AES key wrap algorithm"
            ))),
        }
    }
}

fn check_aligned(data: &[u8], padded: bool) -> Result<()> {
    if !padded && data.len() % BLOCK_SIZE != 0 {
        return Err(Error::InvalidArgument(format!(
            "input length {} is not a multiple of the AES block size; use a CBCPAD algorithm",
            data.len()
        )));
    }
    Ok(())
}

impl LocalKey for AesKey {
    fn encrypt(&self, params: &EncryptParameters) -> Result<LocalOutcome<EncryptResult>> {
        if params.algorithm.is_gcm() {
            return Ok(LocalOutcome::Delegate);
        }
        let Some((key_size, padded)) = Self::cbc(params.algorithm.as_str())? else {
            return Ok(LocalOutcome::Delegate);
        };
        let Some(key) = self.key_bytes(key_size)? else {
            return Ok(LocalOutcome::Delegate);
        };
        check_aligned(&params.plaintext, padded)?;

        let iv = match &params.iv {
            Some(iv) => iv.clone(),
            None => {
                let mut iv = vec![0u8; BLOCK_SIZE];
                OsRng.fill_bytes(&mut iv);
                iv
            }
        };

        let data = params.plaintext.as_slice();
        let ciphertext = match key_size {
            16 => cbc_encrypt!(aes::Aes128, key, &iv, data, padded),
            24 => cbc_encrypt!(aes::Aes192, key, &iv, data, padded),
            _ => cbc_encrypt!(aes::Aes256, key, &iv, data, padded),
        };

        Ok(LocalOutcome::Done(EncryptResult {
            ciphertext,
            algorithm: params.algorithm.clone(),
            key_id: self.key_id.clone(),
            iv: Some(iv),
            authentication_tag: None,
            additional_authenticated_data: params.additional_authenticated_data.clone(),
        }))
    }

    fn decrypt(&self, params: &DecryptParameters) -> Result<LocalOutcome<DecryptResult>> {
        if params.algorithm.is_gcm() {
            return Ok(LocalOutcome::Delegate);
        }
        let Some((key_size, padded)) = Self::cbc(params.algorithm.as_str())? else {
            return Ok(LocalOutcome::Delegate);
        };
        let Some(iv) = params.iv.as_deref() else {
            return Err(Error::InvalidArgument(
                "an initialization vector is required to decrypt with AES-CBC".into(),
            ));
        };
        let Some(key) = self.key_bytes(key_size)? else {
            return Ok(LocalOutcome::Delegate);
        };
        check_aligned(&params.ciphertext, false)?;

        let data = params.ciphertext.as_slice();
        let plaintext = match key_size {
            16 => cbc_decrypt!(aes::Aes128, key, iv, data, padded),
            24 => cbc_decrypt!(aes::Aes192, key, iv, data, padded),
            _ => cbc_decrypt!(aes::Aes256, key, iv, data, padded),
        };

        Ok(LocalOutcome::Done(DecryptResult {
            plaintext,
            algorithm: params.algorithm.clone(),
            key_id: self.key_id.clone(),
        }))
    }

    fn sign(&self, algorithm: &SignatureAlgorithm, _digest: &[u8]) -> Result<LocalOutcome<SignResult>> {
        Err(Error::UnsupportedOperation(format!(
            "sign ({algorithm}) is not supported for symmetric keys"
        )))
    }

    fn verify(
        &self,
        algorithm: &SignatureAlgorithm,
        _digest: &[u8],
        _signature: &[u8],
    ) -> Result<LocalOutcome<VerifyResult>> {
        Err(Error::UnsupportedOperation(format!(
            "verify ({algorithm}) is not supported for symmetric keys"
        )))
    }

    fn wrap_key(&self, algorithm: &KeyWrapAlgorithm, key: &[u8]) -> Result<LocalOutcome<WrapResult>> {
        let Some(key_size) = Self::kw(algorithm)? else {
            return Ok(LocalOutcome::Delegate);
        };
        let Some(kek) = self.key_bytes(key_size)? else {
            return Ok(LocalOutcome::Delegate);
        };

        let wrapped = match key_size {
            16 => KekAes128::from(GenericArray::clone_from_slice(kek)).wrap_vec(key),
            24 => KekAes192::from(GenericArray::clone_from_slice(kek)).wrap_vec(key),
            _ => KekAes256::from(GenericArray::clone_from_slice(kek)).wrap_vec(key),
        }
        .map_err(|e| Error::InvalidArgument(format!("cannot wrap key: {e}")))?;

        Ok(LocalOutcome::Done(WrapResult {
            encrypted_key: wrapped,
            algorithm: algorithm.clone(),
            key_id: self.key_id.clone(),
        }))
    }

    fn unwrap_key(
        &self,
        algorithm: &KeyWrapAlgorithm,
        encrypted_key: &[u8],
    ) -> Result<LocalOutcome<UnwrapResult>> {
        let Some(key_size) = Self::kw(algorithm)? else {
            return Ok(LocalOutcome::Delegate);
        };
        let Some(kek) = self.key_bytes(key_size)? else {
            return Ok(LocalOutcome::Delegate);
        };

        let key = match key_size {
            16 => KekAes128::from(GenericArray::clone_from_slice(kek)).unwrap_vec(encrypted_key),
            24 => KekAes192::from(GenericArray::clone_from_slice(kek)).unwrap_vec(encrypted_key),
            _ => KekAes256::from(GenericArray::clone_from_slice(kek)).unwrap_vec(encrypted_key),
        }
        .map_err(|e| Error::Cryptography(format!("cannot unwrap key: {e}")))?;

        Ok(LocalOutcome::Done(UnwrapResult {
            key,
            algorithm: algorithm.clone(),
            key_id: self.key_id.clone(),
        }))
    }
}
