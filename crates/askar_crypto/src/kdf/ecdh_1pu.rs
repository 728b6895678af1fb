use super::*;
use crate::*;

/// JOSE ECDH-1PU key agreement (authenticated sender).
#[derive(Debug, Clone, Copy)]
pub struct Ecdh1PU<'d> {
    alg_id: &'d [u8],
    apu: &'d [u8],
    apv: &'d [u8],
}

impl<'d> Ecdh1PU<'d> {
    /// Construct with the JWE agreement context.
    pub fn new(alg_id: &'d [u8], apu: &'d [u8], apv: &'d [u8]) -> Self {
        Self { alg_id, apu, apv }
    }

    /// Derive a key of `enc_alg` from `Ze || Zs`.
    ///
    /// `cc_tag` is the tag of the content ciphertext when wrapping a
    /// content key, and must be empty for direct encryption.
    pub fn derive_key(
        &self,
        enc_alg: KeyAlg,
        ephemeral: &LocalKey,
        sender: &LocalKey,
        recipient: &LocalKey,
        cc_tag: &[u8],
        receive: bool,
    ) -> AskarResult<LocalKey> {
        if !enc_alg.is_symmetric() {
            return Err(err_unsupported("ECDH-1PU requires a symmetric output algorithm"));
        }
        let mut z = if receive {
            recipient.key_exchange_bytes(ephemeral)?
        } else {
            ephemeral.key_exchange_bytes(recipient)?
        };
        let zs = if receive {
            recipient.key_exchange_bytes(sender)?
        } else {
            sender.key_exchange_bytes(recipient)?
        };
        z.extend_from_slice(&zs);

        let key_len = enc_alg.secret_len();
        let mut pub_info = ((key_len as u32) * 8).to_be_bytes().to_vec();
        if !cc_tag.is_empty() {
            pub_info.extend_from_slice(&(cc_tag.len() as u32).to_be_bytes());
            pub_info.extend_from_slice(cc_tag);
        }
        let mut out = SecretBytes::new(vec![0; key_len]);
        concat_kdf(
            &z,
            &ConcatKdfParams {
                alg: self.alg_id,
                apu: self.apu,
                apv: self.apv,
                pub_info: &pub_info,
                prv_info: &[],
            },
            &mut out,
        )?;
        LocalKey::from_secret_bytes(enc_alg, &out)
    }

    /// Derive the content key and encrypt `message` with it.
    #[allow(clippy::too_many_arguments)]
    pub fn encrypt_direct(
        &self,
        enc_alg: KeyAlg,
        ephemeral: &LocalKey,
        sender: &LocalKey,
        recipient: &LocalKey,
        message: &[u8],
        nonce: Option<&[u8]>,
        aad: &[u8],
    ) -> AskarResult<Encrypted> {
        let cek = self.derive_key(enc_alg, ephemeral, sender, recipient, &[], false)?;
        cek.aead_encrypt(message, nonce, aad)
    }

    /// Derive the content key and decrypt with it.
    #[allow(clippy::too_many_arguments)]
    pub fn decrypt_direct(
        &self,
        enc_alg: KeyAlg,
        ephemeral: &LocalKey,
        sender: &LocalKey,
        recipient: &LocalKey,
        ciphertext: &[u8],
        nonce: &[u8],
        tag: Option<&[u8]>,
        aad: &[u8],
    ) -> AskarResult<SecretBytes> {
        let cek = self.derive_key(enc_alg, ephemeral, sender, recipient, &[], true)?;
        cek.aead_decrypt(ciphertext, nonce, tag, aad)
    }

    /// Derive a key-wrapping key bound to `cc_tag` and wrap `cek` with it.
    #[allow(clippy::too_many_arguments)]
    pub fn sender_wrap_key(
        &self,
        wrap_alg: KeyAlg,
        ephemeral: &LocalKey,
        sender: &LocalKey,
        recipient: &LocalKey,
        cek: &LocalKey,
        cc_tag: &[u8],
    ) -> AskarResult<Encrypted> {
        let kek = self.derive_key(wrap_alg, ephemeral, sender, recipient, cc_tag, false)?;
        kek.wrap_key(cek, None)
    }

    /// Derive the key-wrapping key bound to `cc_tag` and unwrap a content
    /// key of `enc_alg`.
    #[allow(clippy::too_many_arguments)]
    pub fn receiver_unwrap_key(
        &self,
        wrap_alg: KeyAlg,
        enc_alg: KeyAlg,
        ephemeral: &LocalKey,
        sender: &LocalKey,
        recipient: &LocalKey,
        ciphertext: &[u8],
        cc_tag: &[u8],
        nonce: &[u8],
        tag: Option<&[u8]>,
    ) -> AskarResult<LocalKey> {
        let kek = self.derive_key(wrap_alg, ephemeral, sender, recipient, cc_tag, true)?;
        kek.unwrap_key(enc_alg, ciphertext, nonce, tag)
    }
}
