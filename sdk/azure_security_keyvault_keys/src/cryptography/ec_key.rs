//! Local ECDSA over P-256 and P-384 on precomputed digests.

use azure_http_core::{Error, Result};

use super::algorithms::{self, Algorithm, EcCurve, KeyWrapAlgorithm, SignatureAlgorithm};
use super::jwk::KeyCurveName;
use super::models::{
    DecryptParameters, DecryptResult, EncryptParameters, EncryptResult, SignResult,
    UnwrapResult, VerifyResult, WrapResult,
};
use super::{JsonWebKey, LocalKey, LocalOutcome};

macro_rules! ecdsa_sign {
    ($curve:ident, $d:expr, $digest:expr) => {{
        use $curve::ecdsa::signature::hazmat::PrehashSigner;
        let key = $curve::ecdsa::SigningKey::from_slice($d)
            .map_err(|e| Error::InvalidArgument(format!("invalid EC private key: {e}")))?;
        let signature: $curve::ecdsa::Signature = key
            .sign_prehash($digest)
            .map_err(|e| Error::Cryptography(format!("ECDSA signing failed: {e}")))?;
        signature.to_bytes().to_vec()
    }};
}

macro_rules! ecdsa_verify {
    ($curve:ident, $x:expr, $y:expr, $digest:expr, $signature:expr) => {{
        use $curve::ecdsa::signature::hazmat::PrehashVerifier;
        let point = $curve::EncodedPoint::from_affine_coordinates(
            $curve::FieldBytes::from_slice($x),
            $curve::FieldBytes::from_slice($y),
            false,
        );
        let key = $curve::ecdsa::VerifyingKey::from_encoded_point(&point)
            .map_err(|e| Error::InvalidArgument(format!("invalid EC public key: {e}")))?;
        match $curve::ecdsa::Signature::from_slice($signature) {
            Ok(signature) => key.verify_prehash($digest, &signature).is_ok(),
            Err(_) => false,
        }
    }};
}

/// An elliptic curve key (`EC` / `EC-HSM`).
pub(crate) struct EcKey {
    key_id: Option<String>,
    curve: Option<KeyCurveName>,
    d: Option<Vec<u8>>,
    x: Option<Vec<u8>>,
    y: Option<Vec<u8>>,
}

impl EcKey {
    pub(crate) fn new(jwk: &JsonWebKey) -> Self {
        Self {
            key_id: jwk.id.clone(),
            curve: jwk.curve.clone(),
            d: jwk.d.clone(),
            x: jwk.x.clone(),
            y: jwk.y.clone(),
        }
    }

    /// Resolve the curve for `algorithm`, checking it against the key's.
    fn curve_for(&self, algorithm: &SignatureAlgorithm) -> Result<Option<EcCurve>> {
        let curve = match algorithms::resolve(algorithm.as_str()) {
            None => return Ok(None),
            Some(Algorithm::Ecdsa(curve)) => curve,
            Some(_) => {
                return Err(Error::UnsupportedOperation(format!(
                    "{algorithm} is not an ECDSA algorithm"
                )))
            }
        };

        let expected = match curve {
            EcCurve::P256 => KeyCurveName::P256,
            EcCurve::P384 => KeyCurveName::P384,
        };
        match &self.curve {
            Some(actual) if *actual != expected => Err(Error::InvalidArgument(format!(
                "{algorithm} requires curve {expected}, key uses {actual}"
            ))),
            _ => Ok(Some(curve)),
        }
    }

    fn unsupported<T>(operation: &str) -> Result<LocalOutcome<T>> {
        Err(Error::UnsupportedOperation(format!(
            "{operation} is not supported for elliptic curve keys"
        )))
    }
}

fn coordinate_size(curve: EcCurve) -> usize {
    match curve {
        EcCurve::P256 => 32,
        EcCurve::P384 => 48,
    }
}

impl LocalKey for EcKey {
    fn encrypt(&self, _params: &EncryptParameters) -> Result<LocalOutcome<EncryptResult>> {
        Self::unsupported("encrypt")
    }

    fn decrypt(&self, _params: &DecryptParameters) -> Result<LocalOutcome<DecryptResult>> {
        Self::unsupported("decrypt")
    }

    fn sign(&self, algorithm: &SignatureAlgorithm, digest: &[u8]) -> Result<LocalOutcome<SignResult>> {
        let Some(curve) = self.curve_for(algorithm)? else {
            return Ok(LocalOutcome::Delegate);
        };
        let Some(d) = self.d.as_deref() else {
            return Ok(LocalOutcome::Delegate);
        };

        let signature = match curve {
            EcCurve::P256 => ecdsa_sign!(p256, d, digest),
            EcCurve::P384 => ecdsa_sign!(p384, d, digest),
        };

        Ok(LocalOutcome::Done(SignResult {
            signature,
            algorithm: algorithm.clone(),
            key_id: self.key_id.clone(),
        }))
    }

    fn verify(
        &self,
        algorithm: &SignatureAlgorithm,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<LocalOutcome<VerifyResult>> {
        let Some(curve) = self.curve_for(algorithm)? else {
            return Ok(LocalOutcome::Delegate);
        };
        let (Some(x), Some(y)) = (self.x.as_deref(), self.y.as_deref()) else {
            return Ok(LocalOutcome::Delegate);
        };
        let size = coordinate_size(curve);
        if x.len() != size || y.len() != size {
            return Err(Error::InvalidArgument(format!(
                "EC coordinates must be {size} bytes for {algorithm}"
            )));
        }

        let is_valid = match curve {
            EcCurve::P256 => ecdsa_verify!(p256, x, y, digest, signature),
            EcCurve::P384 => ecdsa_verify!(p384, x, y, digest, signature),
        };

        Ok(LocalOutcome::Done(VerifyResult {
            is_valid,
            algorithm: algorithm.clone(),
            key_id: self.key_id.clone(),
        }))
    }

    fn wrap_key(&self, _algorithm: &KeyWrapAlgorithm, _key: &[u8]) -> Result<LocalOutcome<WrapResult>> {
        Self::unsupported("wrap key")
    }

    fn unwrap_key(
        &self,
        _algorithm: &KeyWrapAlgorithm,
        _encrypted_key: &[u8],
    ) -> Result<LocalOutcome<UnwrapResult>> {
        Self::unsupported("unwrap key")
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cryptography::algorithms::{EncryptionAlgorithm, HashAlgorithm};
    use crate::cryptography::jwk::KeyType;
    use rand_core::OsRng;

    /// A freshly generated P-256 key as a JWK, with or without its private half.
    pub(crate) fn p256_jwk(include_private: bool) -> JsonWebKey {
        let signing = p256::ecdsa::SigningKey::random(&mut OsRng);
        let point = signing.verifying_key().to_encoded_point(false);
        JsonWebKey {
            id: Some("https://test-vault.vault.azure.net/keys/ec/1".into()),
            key_type: Some(KeyType::EC),
            curve: Some(KeyCurveName::P256),
            x: point.x().map(|x| x.to_vec()),
            y: point.y().map(|y| y.to_vec()),
            d: include_private.then(|| signing.to_bytes().to_vec()),
            ..Default::default()
        }
    }

    fn done<T>(outcome: LocalOutcome<T>) -> T {
        match outcome {
            LocalOutcome::Done(value) => value,
            LocalOutcome::Delegate => panic!("expected a local result"),
        }
    }

    #[test]
    fn es256_sign_then_verify() {
        let ec = EcKey::new(&p256_jwk(true));
        let digest = HashAlgorithm::Sha256.digest(b"message");

        let signed = done(ec.sign(&SignatureAlgorithm::ES256, &digest).unwrap());
        assert_eq!(signed.signature.len(), 64);

        let verified = done(
            ec.verify(&SignatureAlgorithm::ES256, &digest, &signed.signature)
                .unwrap(),
        );
        assert!(verified.is_valid);

        let tampered = HashAlgorithm::Sha256.digest(b"other message");
        let verified = done(
            ec.verify(&SignatureAlgorithm::ES256, &tampered, &signed.signature)
                .unwrap(),
        );
        assert!(!verified.is_valid);
    }

    #[test]
    fn es384_on_p384_key() {
        let signing = p384::ecdsa::SigningKey::random(&mut OsRng);
        let point = signing.verifying_key().to_encoded_point(false);
        let ec = EcKey {
            key_id: None,
            curve: Some(KeyCurveName::P384),
            d: Some(signing.to_bytes().to_vec()),
            x: point.x().map(|x| x.to_vec()),
            y: point.y().map(|y| y.to_vec()),
        };
        let digest = HashAlgorithm::Sha384.digest(b"message");

        let signed = done(ec.sign(&SignatureAlgorithm::ES384, &digest).unwrap());
        assert_eq!(signed.signature.len(), 96);
        let verified = done(
            ec.verify(&SignatureAlgorithm::ES384, &digest, &signed.signature)
                .unwrap(),
        );
        assert!(verified.is_valid);
    }

    #[test]
    fn malformed_signature_is_invalid() {
        let ec = EcKey::new(&p256_jwk(false));
        let verified = done(
            ec.verify(&SignatureAlgorithm::ES256, &[1; 32], &[0; 10])
                .unwrap(),
        );
        assert!(!verified.is_valid);
    }

    #[test]
    fn curve_mismatch_is_rejected() {
        let ec = EcKey::new(&p256_jwk(true));
        let err = ec.sign(&SignatureAlgorithm::ES384, &[0; 48]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn unresolved_curves_and_missing_halves_delegate() {
        let ec = EcKey::new(&p256_jwk(false));
        assert!(matches!(
            ec.sign(&SignatureAlgorithm::ES256K, &[0; 32]).unwrap(),
            LocalOutcome::Delegate
        ));
        assert!(matches!(
            ec.sign(&SignatureAlgorithm::ES256, &[0; 32]).unwrap(),
            LocalOutcome::Delegate
        ));
    }

    #[test]
    fn encryption_operations_are_unsupported() {
        let ec = EcKey::new(&p256_jwk(true));
        let params = EncryptParameters::new(EncryptionAlgorithm::RSA_OAEP, vec![1]);
        assert!(matches!(ec.encrypt(&params), Err(Error::UnsupportedOperation(_))));
        assert!(matches!(
            ec.wrap_key(&KeyWrapAlgorithm::A128KW, &[0; 16]),
            Err(Error::UnsupportedOperation(_))
        ));
    }
}
