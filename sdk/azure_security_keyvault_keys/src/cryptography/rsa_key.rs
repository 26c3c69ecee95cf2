//! Local RSA encryption and key wrap. Signing is always left to the service.

use azure_http_core::{Error, Result};
use rand_core::OsRng;
use rsa::{BigUint, Oaep, Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};

use super::algorithms::{self, Algorithm, KeyWrapAlgorithm, RsaPadding, SignatureAlgorithm};
use super::models::{
    DecryptParameters, DecryptResult, EncryptParameters, EncryptResult, SignResult,
    UnwrapResult, VerifyResult, WrapResult,
};
use super::{JsonWebKey, LocalKey, LocalOutcome};

/// An RSA key (`RSA` / `RSA-HSM`). Either half may be absent.
pub(crate) struct RsaKey {
    key_id: Option<String>,
    public: Option<RsaPublicKey>,
    private: Option<RsaPrivateKey>,
}

impl RsaKey {
    pub(crate) fn new(jwk: &JsonWebKey) -> Result<Self> {
        let (Some(n), Some(e)) = (jwk.n.as_deref(), jwk.e.as_deref()) else {
            return Ok(Self {
                key_id: jwk.id.clone(),
                public: None,
                private: None,
            });
        };
        let n = BigUint::from_bytes_be(n);
        let e = BigUint::from_bytes_be(e);

        let private = match (jwk.d.as_deref(), jwk.p.as_deref(), jwk.q.as_deref()) {
            (Some(d), Some(p), Some(q)) => Some(
                RsaPrivateKey::from_components(
                    n.clone(),
                    e.clone(),
                    BigUint::from_bytes_be(d),
                    vec![BigUint::from_bytes_be(p), BigUint::from_bytes_be(q)],
                )
                .map_err(|err| Error::InvalidArgument(format!("invalid RSA private key: {err}")))?,
            ),
            _ => None,
        };

        let public = match &private {
            Some(private) => private.to_public_key(),
            None => RsaPublicKey::new(n, e)
                .map_err(|err| Error::InvalidArgument(format!("invalid RSA public key: {err}")))?,
        };

        Ok(Self {
            key_id: jwk.id.clone(),
            public: Some(public),
            private,
        })
    }

    fn padding(name: &str) -> Result<Option<RsaPadding>> {
        match algorithms::resolve(name) {
            None => Ok(None),
            Some(Algorithm::Rsa(padding)) => Ok(Some(padding)),
            Some(_) => Err(Error::UnsupportedOperation(format!(
                "{name} is not an RSA algorithm"
            ))),
        }
    }

    fn encrypt_with(&self, padding: RsaPadding, data: &[u8]) -> Result<Option<Vec<u8>>> {
        let Some(key) = &self.public else {
            return Ok(None);
        };
        let mut rng = OsRng;
        let encrypted = match padding {
            RsaPadding::Pkcs1v15 => key.encrypt(&mut rng, Pkcs1v15Encrypt, data),
            RsaPadding::Oaep => key.encrypt(&mut rng, Oaep::new::<sha1::Sha1>(), data),
            RsaPadding::OaepSha256 => key.encrypt(&mut rng, Oaep::new::<sha2::Sha256>(), data),
        };
        encrypted
            .map(Some)
            .map_err(|e| Error::InvalidArgument(format!("RSA encryption failed: {e}")))
    }

    fn decrypt_with(&self, padding: RsaPadding, data: &[u8]) -> Result<Option<Vec<u8>>> {
        let Some(key) = &self.private else {
            return Ok(None);
        };
        let decrypted = match padding {
            RsaPadding::Pkcs1v15 => key.decrypt(Pkcs1v15Encrypt, data),
            RsaPadding::Oaep => key.decrypt(Oaep::new::<sha1::Sha1>(), data),
            RsaPadding::OaepSha256 => key.decrypt(Oaep::new::<sha2::Sha256>(), data),
        };
        decrypted
            .map(Some)
            .map_err(|e| Error::Cryptography(format!("RSA decryption failed: {e}")))
    }
}

impl LocalKey for RsaKey {
    fn encrypt(&self, params: &EncryptParameters) -> Result<LocalOutcome<EncryptResult>> {
        let Some(padding) = Self::padding(params.algorithm.as_str())? else {
            return Ok(LocalOutcome::Delegate);
        };
        let Some(ciphertext) = self.encrypt_with(padding, &params.plaintext)? else {
            return Ok(LocalOutcome::Delegate);
        };
        Ok(LocalOutcome::Done(EncryptResult {
            ciphertext,
            algorithm: params.algorithm.clone(),
            key_id: self.key_id.clone(),
            iv: None,
            authentication_tag: None,
            additional_authenticated_data: None,
        }))
    }

    fn decrypt(&self, params: &DecryptParameters) -> Result<LocalOutcome<DecryptResult>> {
        let Some(padding) = Self::padding(params.algorithm.as_str())? else {
            return Ok(LocalOutcome::Delegate);
        };
        let Some(plaintext) = self.decrypt_with(padding, &params.ciphertext)? else {
            return Ok(LocalOutcome::Delegate);
        };
        Ok(LocalOutcome::Done(DecryptResult {
            plaintext,
            algorithm: params.algorithm.clone(),
            key_id: self.key_id.clone(),
        }))
    }

    fn sign(&self, _algorithm: &SignatureAlgorithm, _digest: &[u8]) -> Result<LocalOutcome<SignResult>> {
        Ok(LocalOutcome::Delegate)
    }

    fn verify(
        &self,
        _algorithm: &SignatureAlgorithm,
        _digest: &[u8],
        _signature: &[u8],
    ) -> Result<LocalOutcome<VerifyResult>> {
        Ok(LocalOutcome::Delegate)
    }

    fn wrap_key(&self, algorithm: &KeyWrapAlgorithm, key: &[u8]) -> Result<LocalOutcome<WrapResult>> {
        let Some(padding) = Self::padding(algorithm.as_str())? else {
            return Ok(LocalOutcome::Delegate);
        };
        let Some(encrypted_key) = self.encrypt_with(padding, key)? else {
            return Ok(LocalOutcome::Delegate);
        };
        Ok(LocalOutcome::Done(WrapResult {
            encrypted_key,
            algorithm: algorithm.clone(),
            key_id: self.key_id.clone(),
        }))
    }

    fn unwrap_key(
        &self,
        algorithm: &KeyWrapAlgorithm,
        encrypted_key: &[u8],
    ) -> Result<LocalOutcome<UnwrapResult>> {
        let Some(padding) = Self::padding(algorithm.as_str())? else {
            return Ok(LocalOutcome::Delegate);
        };
        let Some(key) = self.decrypt_with(padding, encrypted_key)? else {
            return Ok(LocalOutcome::Delegate);
        };
        Ok(LocalOutcome::Done(UnwrapResult {
            key,
            algorithm: algorithm.clone(),
            key_id: self.key_id.clone(),
        }))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cryptography::algorithms::EncryptionAlgorithm;
    use crate::cryptography::jwk::KeyType;
    use rsa::traits::{PrivateKeyParts, PublicKeyParts};

    /// A freshly generated RSA key as a JWK, with or without its private half.
    pub(crate) fn rsa_jwk(include_private: bool) -> JsonWebKey {
        let key = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let mut jwk = JsonWebKey {
            id: Some("https://test-vault.vault.azure.net/keys/rsa/1".into()),
            key_type: Some(KeyType::RSA),
            n: Some(key.n().to_bytes_be()),
            e: Some(key.e().to_bytes_be()),
            ..Default::default()
        };
        if include_private {
            jwk.d = Some(key.d().to_bytes_be());
            jwk.p = Some(key.primes()[0].to_bytes_be());
            jwk.q = Some(key.primes()[1].to_bytes_be());
        }
        jwk
    }

    fn done<T>(outcome: LocalOutcome<T>) -> T {
        match outcome {
            LocalOutcome::Done(value) => value,
            LocalOutcome::Delegate => panic!("expected a local result"),
        }
    }

    #[test]
    fn every_padding_round_trips() {
        let rsa = RsaKey::new(&rsa_jwk(true)).unwrap();
        for algorithm in [
            EncryptionAlgorithm::RSA1_5,
            EncryptionAlgorithm::RSA_OAEP,
            EncryptionAlgorithm::RSA_OAEP_256,
        ] {
            let encrypted = done(
                rsa.encrypt(&EncryptParameters::new(algorithm.clone(), b"payload".to_vec()))
                    .unwrap(),
            );
            assert_eq!(encrypted.ciphertext.len(), 256);

            let decrypted = done(
                rsa.decrypt(&DecryptParameters::new(algorithm.clone(), encrypted.ciphertext))
                    .unwrap(),
            );
            assert_eq!(decrypted.plaintext, b"payload", "{algorithm}");
        }
    }

    #[test]
    fn public_only_key_encrypts_and_delegates_decrypt() {
        let rsa = RsaKey::new(&rsa_jwk(false)).unwrap();

        let wrapped = rsa.wrap_key(&KeyWrapAlgorithm::RSA_OAEP_256, &[7; 32]).unwrap();
        assert!(matches!(wrapped, LocalOutcome::Done(_)));

        let outcome = rsa
            .unwrap_key(&KeyWrapAlgorithm::RSA_OAEP_256, &[0; 256])
            .unwrap();
        assert!(matches!(outcome, LocalOutcome::Delegate));
    }

    #[test]
    fn signing_is_delegated() {
        let rsa = RsaKey::new(&rsa_jwk(true)).unwrap();
        let outcome = rsa.sign(&SignatureAlgorithm::RS256, &[0; 32]).unwrap();
        assert!(matches!(outcome, LocalOutcome::Delegate));
    }

    #[test]
    fn aes_algorithm_on_rsa_key_is_unsupported() {
        let rsa = RsaKey::new(&rsa_jwk(false)).unwrap();
        let err = rsa
            .encrypt(&EncryptParameters::new(EncryptionAlgorithm::A128CBC, vec![0; 16]))
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperation(_)));
    }
}
