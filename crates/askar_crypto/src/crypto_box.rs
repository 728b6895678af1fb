//! X25519 + XSalsa20-Poly1305 boxes, compatible with libsodium
//! `crypto_box_easy` and `crypto_box_seal`.

use crate::*;
use ::crypto_box::aead::{generic_array::GenericArray, Aead, Nonce};

/// Length of the crypto box nonce.
pub const NONCE_BYTES: usize = 24;

fn box_public(key: &LocalKey) -> AskarResult<::crypto_box::PublicKey> {
    if key.algorithm() != KeyAlg::X25519 {
        return Err(err_unsupported("crypto box requires X25519 keys"));
    }
    let bytes: [u8; 32] = key.public_bytes()?[..]
        .try_into()
        .map_err(|_| err_input("invalid X25519 public key"))?;
    Ok(::crypto_box::PublicKey::from(bytes))
}

fn box_secret(key: &LocalKey) -> AskarResult<::crypto_box::SecretKey> {
    if key.algorithm() != KeyAlg::X25519 {
        return Err(err_unsupported("crypto box requires X25519 keys"));
    }
    let secret = key.secret_bytes()?;
    let bytes: [u8; 32] = secret[..]
        .try_into()
        .map_err(|_| err_input("invalid X25519 secret key"))?;
    Ok(::crypto_box::SecretKey::from(bytes))
}

fn box_nonce(nonce: &[u8]) -> AskarResult<Nonce<::crypto_box::SalsaBox>> {
    if nonce.len() != NONCE_BYTES {
        return Err(err_input("invalid crypto box nonce length"));
    }
    Ok(*GenericArray::from_slice(nonce))
}

/// A fresh random nonce.
pub fn crypto_box_random_nonce() -> Vec<u8> {
    random::random_vec(NONCE_BYTES)
}

/// Encrypt `message` from `sender` to `recipient`.
pub fn crypto_box(
    recipient: &LocalKey,
    sender: &LocalKey,
    message: &[u8],
    nonce: &[u8],
) -> AskarResult<Vec<u8>> {
    let b = ::crypto_box::SalsaBox::new(&box_public(recipient)?, &box_secret(sender)?);
    b.encrypt(&box_nonce(nonce)?, message)
        .map_err(|_| err_encryption("crypto box encryption failed"))
}

/// Decrypt a box sent by `sender` to `recipient`.
pub fn crypto_box_open(
    recipient: &LocalKey,
    sender: &LocalKey,
    ciphertext: &[u8],
    nonce: &[u8],
) -> AskarResult<SecretBytes> {
    let b = ::crypto_box::SalsaBox::new(&box_public(sender)?, &box_secret(recipient)?);
    b.decrypt(&box_nonce(nonce)?, ciphertext)
        .map(SecretBytes::new)
        .map_err(|_| err_encryption("crypto box decryption failed"))
}

/// Anonymous sealed box to `recipient`.
pub fn crypto_box_seal(recipient: &LocalKey, message: &[u8]) -> AskarResult<Vec<u8>> {
    box_public(recipient)?
        .seal(&mut rand::rngs::OsRng, message)
        .map_err(|_| err_encryption("crypto box seal failed"))
}

/// Open a sealed box with the recipient secret.
pub fn crypto_box_seal_open(
    recipient: &LocalKey,
    ciphertext: &[u8],
) -> AskarResult<SecretBytes> {
    box_secret(recipient)?
        .unseal(ciphertext)
        .map(SecretBytes::new)
        .map_err(|_| err_encryption("crypto box seal open failed"))
}
