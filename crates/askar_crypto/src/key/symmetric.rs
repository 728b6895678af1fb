use crate::*;
use aes_gcm::aead::generic_array::typenum::Unsigned;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, Payload};
use hmac::{Hmac, Mac};
use subtle::ConstantTimeEq;

/// Default initial value for RFC 3394 key wrapping.
const KW_IV: [u8; 8] = [0xa6; 8];

/// Secret-only key material.
pub(crate) struct SymmetricKey {
    alg: KeyAlg,
    secret: SecretBytes,
}

impl SymmetricKey {
    pub fn generate(alg: KeyAlg) -> Self {
        Self {
            alg,
            secret: random::random_secret(alg.secret_len()),
        }
    }

    pub fn from_secret_bytes(alg: KeyAlg, secret: &[u8]) -> AskarResult<Self> {
        if secret.len() != alg.secret_len() {
            return Err(err_input(format!(
                "invalid secret length for {alg}: {}",
                secret.len()
            )));
        }
        Ok(Self {
            alg,
            secret: secret_bytes_from(secret),
        })
    }

    pub fn from_seed(alg: KeyAlg, seed: &[u8]) -> AskarResult<Self> {
        Ok(Self {
            alg,
            secret: random::expand_seed(
                seed,
                alg.as_str().as_bytes(),
                0,
                alg.secret_len(),
            )?,
        })
    }

    pub fn secret_bytes(&self) -> &[u8] {
        &self.secret
    }

    pub fn jwk_alg(&self) -> &'static str {
        match self.alg {
            KeyAlg::A128Gcm => "A128GCM",
            KeyAlg::A256Gcm => "A256GCM",
            KeyAlg::A128CbcHs256 => "A128CBC-HS256",
            KeyAlg::A256CbcHs512 => "A256CBC-HS512",
            KeyAlg::A128Kw => "A128KW",
            KeyAlg::A256Kw => "A256KW",
            KeyAlg::C20P => "C20P",
            KeyAlg::XC20P => "XC20P",
            // only symmetric algorithms are constructed here
            _ => "",
        }
    }

    pub fn aead_params(&self) -> AeadParams {
        let (nonce_length, tag_length) = match self.alg {
            KeyAlg::A128Gcm | KeyAlg::A256Gcm => (12, 16),
            KeyAlg::A128CbcHs256 => (16, 16),
            KeyAlg::A256CbcHs512 => (16, 32),
            KeyAlg::A128Kw | KeyAlg::A256Kw => (0, 8),
            KeyAlg::C20P => (12, 16),
            KeyAlg::XC20P => (24, 16),
            _ => (0, 0),
        };
        AeadParams {
            nonce_length,
            tag_length,
        }
    }

    /// Returns `ciphertext || tag`.
    pub fn encrypt(
        &self,
        msg: &[u8],
        nonce: &[u8],
        aad: &[u8],
    ) -> AskarResult<Vec<u8>> {
        let key = &self.secret[..];
        match self.alg {
            KeyAlg::A128Gcm => aead_seal::<aes_gcm::Aes128Gcm>(key, nonce, msg, aad),
            KeyAlg::A256Gcm => aead_seal::<aes_gcm::Aes256Gcm>(key, nonce, msg, aad),
            KeyAlg::C20P => aead_seal::<chacha20poly1305::ChaCha20Poly1305>(
                key, nonce, msg, aad,
            ),
            KeyAlg::XC20P => aead_seal::<chacha20poly1305::XChaCha20Poly1305>(
                key, nonce, msg, aad,
            ),
            KeyAlg::A128CbcHs256 | KeyAlg::A256CbcHs512 => {
                cbc_hmac_seal(self.alg, key, nonce, msg, aad)
            }
            KeyAlg::A128Kw => {
                check_kw_params(nonce, aad)?;
                kw_wrap::<aes::Aes128>(key, msg)
            }
            KeyAlg::A256Kw => {
                check_kw_params(nonce, aad)?;
                kw_wrap::<aes::Aes256>(key, msg)
            }
            _ => Err(err_unsupported("AEAD is not supported for this key")),
        }
    }

    /// Decrypt `ciphertext || tag`.
    pub fn decrypt(
        &self,
        ct: &[u8],
        nonce: &[u8],
        aad: &[u8],
    ) -> AskarResult<SecretBytes> {
        let key = &self.secret[..];
        let out = match self.alg {
            KeyAlg::A128Gcm => aead_open::<aes_gcm::Aes128Gcm>(key, nonce, ct, aad),
            KeyAlg::A256Gcm => aead_open::<aes_gcm::Aes256Gcm>(key, nonce, ct, aad),
            KeyAlg::C20P => aead_open::<chacha20poly1305::ChaCha20Poly1305>(
                key, nonce, ct, aad,
            ),
            KeyAlg::XC20P => aead_open::<chacha20poly1305::XChaCha20Poly1305>(
                key, nonce, ct, aad,
            ),
            KeyAlg::A128CbcHs256 | KeyAlg::A256CbcHs512 => {
                cbc_hmac_open(self.alg, key, nonce, ct, aad)
            }
            KeyAlg::A128Kw => {
                check_kw_params(nonce, aad)?;
                kw_unwrap::<aes::Aes128>(key, ct)
            }
            KeyAlg::A256Kw => {
                check_kw_params(nonce, aad)?;
                kw_unwrap::<aes::Aes256>(key, ct)
            }
            _ => Err(err_unsupported("AEAD is not supported for this key")),
        }?;
        Ok(SecretBytes::new(out))
    }
}

fn aead_seal<C: Aead + KeyInit>(
    key: &[u8],
    nonce: &[u8],
    msg: &[u8],
    aad: &[u8],
) -> AskarResult<Vec<u8>> {
    let cipher = C::new_from_slice(key).map_err(|_| err_input("invalid key length"))?;
    if nonce.len() != <C as AeadCore>::NonceSize::USIZE {
        return Err(err_input("invalid nonce length"));
    }
    cipher
        .encrypt(GenericArray::from_slice(nonce), Payload { msg, aad })
        .map_err(|_| err_encryption("AEAD encryption error"))
}

fn aead_open<C: Aead + KeyInit>(
    key: &[u8],
    nonce: &[u8],
    ct: &[u8],
    aad: &[u8],
) -> AskarResult<Vec<u8>> {
    let cipher = C::new_from_slice(key).map_err(|_| err_input("invalid key length"))?;
    if nonce.len() != <C as AeadCore>::NonceSize::USIZE {
        return Err(err_input("invalid nonce length"));
    }
    cipher
        .decrypt(GenericArray::from_slice(nonce), Payload { msg: ct, aad })
        .map_err(|_| err_encryption("AEAD decryption error"))
}

fn hmac_parts<M: Mac + hmac::digest::KeyInit>(
    key: &[u8],
    parts: &[&[u8]],
) -> AskarResult<Vec<u8>> {
    let mut mac = <M as Mac>::new_from_slice(key)
        .map_err(|_| err_input("invalid hmac key length"))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().to_vec())
}

/// JWE AES_CBC_HMAC_SHA2 tag: HMAC(aad || iv || ciphertext || aad bit length),
/// truncated to half the hash output.
fn cbc_hmac_tag(
    alg: KeyAlg,
    mac_key: &[u8],
    nonce: &[u8],
    ct: &[u8],
    aad: &[u8],
) -> AskarResult<Vec<u8>> {
    let al = ((aad.len() as u64) * 8).to_be_bytes();
    let parts: [&[u8]; 4] = [aad, nonce, ct, &al];
    let mut tag = match alg {
        KeyAlg::A128CbcHs256 => hmac_parts::<Hmac<sha2::Sha256>>(mac_key, &parts)?,
        _ => hmac_parts::<Hmac<sha2::Sha512>>(mac_key, &parts)?,
    };
    tag.truncate(tag.len() / 2);
    Ok(tag)
}

fn cbc_hmac_seal(
    alg: KeyAlg,
    key: &[u8],
    nonce: &[u8],
    msg: &[u8],
    aad: &[u8],
) -> AskarResult<Vec<u8>> {
    use aes::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};

    if nonce.len() != 16 {
        return Err(err_input("invalid nonce length"));
    }
    let (mac_key, enc_key) = key.split_at(key.len() / 2);
    let mut out = match alg {
        KeyAlg::A128CbcHs256 => cbc::Encryptor::<aes::Aes128>::new_from_slices(enc_key, nonce)
            .map_err(|_| err_input("invalid key length"))?
            .encrypt_padded_vec_mut::<Pkcs7>(msg),
        _ => cbc::Encryptor::<aes::Aes256>::new_from_slices(enc_key, nonce)
            .map_err(|_| err_input("invalid key length"))?
            .encrypt_padded_vec_mut::<Pkcs7>(msg),
    };
    let tag = cbc_hmac_tag(alg, mac_key, nonce, &out, aad)?;
    out.extend_from_slice(&tag);
    Ok(out)
}

fn cbc_hmac_open(
    alg: KeyAlg,
    key: &[u8],
    nonce: &[u8],
    ct: &[u8],
    aad: &[u8],
) -> AskarResult<Vec<u8>> {
    use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};

    if nonce.len() != 16 {
        return Err(err_input("invalid nonce length"));
    }
    let tag_len = if alg == KeyAlg::A128CbcHs256 { 16 } else { 32 };
    if ct.len() < tag_len {
        return Err(err_encryption("AEAD decryption error"));
    }
    let (ct, tag) = ct.split_at(ct.len() - tag_len);
    let (mac_key, enc_key) = key.split_at(key.len() / 2);
    let expect = cbc_hmac_tag(alg, mac_key, nonce, ct, aad)?;
    if !bool::from(expect.ct_eq(tag)) {
        return Err(err_encryption("AEAD decryption error"));
    }
    let out = match alg {
        KeyAlg::A128CbcHs256 => cbc::Decryptor::<aes::Aes128>::new_from_slices(enc_key, nonce)
            .map_err(|_| err_input("invalid key length"))?
            .decrypt_padded_vec_mut::<Pkcs7>(ct),
        _ => cbc::Decryptor::<aes::Aes256>::new_from_slices(enc_key, nonce)
            .map_err(|_| err_input("invalid key length"))?
            .decrypt_padded_vec_mut::<Pkcs7>(ct),
    };
    out.map_err(|_| err_encryption("AEAD decryption error"))
}

fn check_kw_params(nonce: &[u8], aad: &[u8]) -> AskarResult<()> {
    if !nonce.is_empty() {
        return Err(err_input("AES key wrap does not use a nonce"));
    }
    if !aad.is_empty() {
        return Err(err_input("AES key wrap does not support AAD"));
    }
    Ok(())
}

/// RFC 3394 key wrap.
fn kw_wrap<C>(kek: &[u8], data: &[u8]) -> AskarResult<Vec<u8>>
where
    C: aes::cipher::BlockEncrypt
        + aes::cipher::KeyInit
        + aes::cipher::BlockSizeUser<BlockSize = aes::cipher::consts::U16>,
{
    if data.len() % 8 != 0 || data.len() < 16 {
        return Err(err_input("AES key wrap input must be a multiple of 8 bytes"));
    }
    let cipher = C::new_from_slice(kek).map_err(|_| err_input("invalid key length"))?;
    let n = data.len() / 8;
    let mut a = KW_IV;
    let mut r = data.to_vec();
    let mut block = aes::Block::default();
    for j in 0..6 {
        for i in 0..n {
            block[..8].copy_from_slice(&a);
            block[8..].copy_from_slice(&r[i * 8..i * 8 + 8]);
            cipher.encrypt_block(&mut block);
            let t = ((n * j + i + 1) as u64).to_be_bytes();
            for (k, a_k) in a.iter_mut().enumerate() {
                *a_k = block[k] ^ t[k];
            }
            r[i * 8..i * 8 + 8].copy_from_slice(&block[8..]);
        }
    }
    let mut out = Vec::with_capacity(data.len() + 8);
    out.extend_from_slice(&a);
    out.extend_from_slice(&r);
    Ok(out)
}

/// RFC 3394 key unwrap.
fn kw_unwrap<C>(kek: &[u8], data: &[u8]) -> AskarResult<Vec<u8>>
where
    C: aes::cipher::BlockDecrypt
        + aes::cipher::KeyInit
        + aes::cipher::BlockSizeUser<BlockSize = aes::cipher::consts::U16>,
{
    if data.len() % 8 != 0 || data.len() < 24 {
        return Err(err_encryption("AEAD decryption error"));
    }
    let cipher = C::new_from_slice(kek).map_err(|_| err_input("invalid key length"))?;
    let n = data.len() / 8 - 1;
    let mut a = [0u8; 8];
    a.copy_from_slice(&data[..8]);
    let mut r = data[8..].to_vec();
    let mut block = aes::Block::default();
    for j in (0..6).rev() {
        for i in (0..n).rev() {
            let t = ((n * j + i + 1) as u64).to_be_bytes();
            for k in 0..8 {
                block[k] = a[k] ^ t[k];
            }
            block[8..].copy_from_slice(&r[i * 8..i * 8 + 8]);
            cipher.decrypt_block(&mut block);
            a.copy_from_slice(&block[..8]);
            r[i * 8..i * 8 + 8].copy_from_slice(&block[8..]);
        }
    }
    if !bool::from(a.ct_eq(&KW_IV)) {
        return Err(err_encryption("AEAD decryption error"));
    }
    Ok(r)
}
