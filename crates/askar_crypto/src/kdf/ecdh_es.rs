use super::*;
use crate::*;

/// JOSE ECDH-ES key agreement.
#[derive(Debug, Clone, Copy)]
pub struct EcdhEs<'d> {
    alg_id: &'d [u8],
    apu: &'d [u8],
    apv: &'d [u8],
}

impl<'d> EcdhEs<'d> {
    /// Construct with the JWE agreement context.
    pub fn new(alg_id: &'d [u8], apu: &'d [u8], apv: &'d [u8]) -> Self {
        Self { alg_id, apu, apv }
    }

    /// Derive a key of `enc_alg`. The sender (`receive == false`) holds the
    /// ephemeral secret; the receiver holds the recipient secret.
    pub fn derive_key(
        &self,
        enc_alg: KeyAlg,
        ephemeral: &LocalKey,
        recipient: &LocalKey,
        receive: bool,
    ) -> AskarResult<LocalKey> {
        if !enc_alg.is_symmetric() {
            return Err(err_unsupported("ECDH-ES requires a symmetric output algorithm"));
        }
        let z = if receive {
            recipient.key_exchange_bytes(ephemeral)?
        } else {
            ephemeral.key_exchange_bytes(recipient)?
        };
        let key_len = enc_alg.secret_len();
        let mut out = SecretBytes::new(vec![0; key_len]);
        concat_kdf(
            &z,
            &ConcatKdfParams {
                alg: self.alg_id,
                apu: self.apu,
                apv: self.apv,
                pub_info: &((key_len as u32) * 8).to_be_bytes(),
                prv_info: &[],
            },
            &mut out,
        )?;
        LocalKey::from_secret_bytes(enc_alg, &out)
    }

    /// Derive the content key and encrypt `message` with it.
    pub fn encrypt_direct(
        &self,
        enc_alg: KeyAlg,
        ephemeral: &LocalKey,
        recipient: &LocalKey,
        message: &[u8],
        nonce: Option<&[u8]>,
        aad: &[u8],
    ) -> AskarResult<Encrypted> {
        let cek = self.derive_key(enc_alg, ephemeral, recipient, false)?;
        cek.aead_encrypt(message, nonce, aad)
    }

    /// Derive the content key and decrypt with it.
    #[allow(clippy::too_many_arguments)]
    pub fn decrypt_direct(
        &self,
        enc_alg: KeyAlg,
        ephemeral: &LocalKey,
        recipient: &LocalKey,
        ciphertext: &[u8],
        nonce: &[u8],
        tag: Option<&[u8]>,
        aad: &[u8],
    ) -> AskarResult<SecretBytes> {
        let cek = self.derive_key(enc_alg, ephemeral, recipient, true)?;
        cek.aead_decrypt(ciphertext, nonce, tag, aad)
    }

    /// Derive a key-wrapping key and wrap `cek` with it.
    pub fn sender_wrap_key(
        &self,
        wrap_alg: KeyAlg,
        ephemeral: &LocalKey,
        recipient: &LocalKey,
        cek: &LocalKey,
    ) -> AskarResult<Encrypted> {
        let kek = self.derive_key(wrap_alg, ephemeral, recipient, false)?;
        kek.wrap_key(cek, None)
    }

    /// Derive the key-wrapping key and unwrap a content key of `enc_alg`.
    #[allow(clippy::too_many_arguments)]
    pub fn receiver_unwrap_key(
        &self,
        wrap_alg: KeyAlg,
        enc_alg: KeyAlg,
        ephemeral: &LocalKey,
        recipient: &LocalKey,
        ciphertext: &[u8],
        nonce: &[u8],
        tag: Option<&[u8]>,
    ) -> AskarResult<LocalKey> {
        let kek = self.derive_key(wrap_alg, ephemeral, recipient, true)?;
        kek.unwrap_key(enc_alg, ciphertext, nonce, tag)
    }
}
