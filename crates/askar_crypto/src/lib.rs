#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(warnings)]
//! Askar key material, AEAD, signatures, key agreement and key derivation.
//!
//! Every key is a [`LocalKey`]: a cheaply clonable handle over
//! reference-counted key material, tagged with a [`KeyAlg`].
//!
//! ```
//! # use askar_crypto::*;
//! let key = LocalKey::generate(KeyAlg::A256Gcm, KeyBackend::Software, false).unwrap();
//! let enc = key.aead_encrypt(b"hello", None, b"").unwrap();
//! let dec = key.aead_decrypt(enc.ciphertext(), enc.nonce(), Some(enc.tag()), b"").unwrap();
//! assert_eq!(b"hello", &dec[..]);
//! ```

pub mod error;
pub use error::*;

mod alg;
pub use alg::*;

mod buffer;
pub use buffer::*;

mod encrypted;
pub use encrypted::*;

pub mod random;

pub mod jwk;
pub use jwk::Jwk;

mod key;
pub use key::*;

pub mod kdf;

pub mod crypto_box;
