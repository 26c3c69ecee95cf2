//! # Azure Key Vault Keys
//!
//! Key management and cryptography client for Azure Key Vault, built on
//! [`azure_http_core`].
//!
//! [`client::KeyClient`] covers key retrieval, rotation, purge, and the
//! soft-delete lifecycle, where deletion and recovery are long-running
//! operations driven by [`azure_http_core::polling::Poller`].
//!
//! [`cryptography::CryptographyClient`] performs encrypt, decrypt, sign,
//! verify, wrap and unwrap locally whenever the key material and algorithm
//! allow it, and delegates to the service otherwise.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use azure_security_keyvault_keys::client::KeyClient;
//! use azure_security_keyvault_keys::cryptography::{EncryptParameters, EncryptionAlgorithm};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Reads AZURE_KEYVAULT_URL and AZURE_KEYVAULT_ACCESS_TOKEN.
//!     let client = KeyClient::builder().build()?;
//!
//!     let key = client.get_key("my-rsa-key", None).await?;
//!     println!("key id: {:?}", key.id());
//!
//!     let crypto = client.cryptography_client("my-rsa-key", None)?;
//!     let result = crypto
//!         .encrypt(EncryptParameters::new(EncryptionAlgorithm::RSA_OAEP_256, b"secret".to_vec()))
//!         .await?;
//!     println!("{} bytes of ciphertext", result.ciphertext.len());
//!
//!     let mut poller = client.begin_delete_key("my-rsa-key").await?;
//!     let deleted = poller.final_result().await?;
//!     println!("recovery id: {:?}", deleted.recovery_id);
//!     Ok(())
//! }
//! ```

/// Declares an extensible string enumeration: a newtype over a string with
/// well-known values as associated constants.
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $konst:ident = $value:literal,)* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(std::borrow::Cow<'static, str>);

        impl $name {
            $($(#[$vmeta])* pub const $konst: Self = Self(std::borrow::Cow::Borrowed($value));)*

            /// A value not covered by the well-known constants.
            pub fn from_string(value: impl Into<String>) -> Self {
                Self(std::borrow::Cow::Owned(value.into()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::from_string(value)
            }
        }
    };
}

mod base64url;

pub mod client;
pub mod cryptography;
pub mod models;

pub use client::{KeyClient, KeyClientBuilder};
pub use cryptography::CryptographyClient;
pub use models::{DeletedKey, KeyVaultKey};
