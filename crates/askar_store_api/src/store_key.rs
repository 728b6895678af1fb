//! Store key hierarchy.
//!
//! A pass key is turned into a wrap key by the [`StoreKeyMethod`]. Each
//! profile owns a randomly generated [`ProfileKey`], persisted wrapped by
//! the wrap key, so rekeying only rewraps profile keys and never touches
//! entry ciphertext.
//!
//! Categories, names and tags use deterministic (searchable) encryption:
//! the nonce is a truncated HMAC of the plaintext, so equal inputs give
//! equal ciphertext and can be matched by a backend. Values are encrypted
//! with a random nonce under a key derived from the category and name.

use crate::types::*;
use crate::wql::*;
use crate::*;
use askar_crypto::kdf::Argon2Parameters;
use askar_crypto::{random, secret_bytes_from, KeyAlg, LocalKey, SecretBytes};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use hmac::{Hmac, Mac};
use std::sync::Arc;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const SALT_LEN: usize = 16;

/// How the store wrap key is obtained from the pass key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKeyMethod {
    /// Argon2i password derivation, `kdf:argon2i:mod` or `kdf:argon2i:int`.
    DeriveKey(Argon2Parameters),
    /// A base58 encoded 32 byte key, see [`generate_raw_key`].
    RawKey,
    /// Profile keys are stored unwrapped.
    Unprotected,
}

impl Default for StoreKeyMethod {
    fn default() -> Self {
        Self::DeriveKey(Argon2Parameters::Moderate)
    }
}

impl StoreKeyMethod {
    /// The method URI.
    pub fn to_uri(&self) -> &'static str {
        match self {
            Self::DeriveKey(Argon2Parameters::Interactive) => "kdf:argon2i:int",
            Self::DeriveKey(_) => "kdf:argon2i:mod",
            Self::RawKey => "raw",
            Self::Unprotected => "none",
        }
    }
}

impl std::fmt::Display for StoreKeyMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.to_uri())
    }
}

impl std::str::FromStr for StoreKeyMethod {
    type Err = OneErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let method = s.split('?').next().unwrap_or_default().to_ascii_lowercase();
        match method.as_str() {
            "kdf:argon2i" | "kdf:argon2i:mod" => {
                Ok(Self::DeriveKey(Argon2Parameters::Moderate))
            }
            "kdf:argon2i:int" => Ok(Self::DeriveKey(Argon2Parameters::Interactive)),
            "raw" => Ok(Self::RawKey),
            "none" | "" => Ok(Self::Unprotected),
            _ => Err(err_unsupported(format!(
                "Unsupported key derivation method: {s}"
            ))),
        }
    }
}

/// A store pass key.
#[derive(Clone, Default)]
pub struct PassKey(zeroize::Zeroizing<String>);

impl PassKey {
    /// An empty pass key, for unprotected stores.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The pass key text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for PassKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PassKey(<secret>)")
    }
}

impl From<&str> for PassKey {
    fn from(s: &str) -> Self {
        Self(zeroize::Zeroizing::new(s.to_string()))
    }
}

impl From<String> for PassKey {
    fn from(s: String) -> Self {
        Self(zeroize::Zeroizing::new(s))
    }
}

/// Generate a raw store key, deterministically from `seed` if given.
pub fn generate_raw_key(seed: Option<&[u8]>) -> AskarResult<String> {
    use sha2::Digest;
    let key = match seed {
        Some(seed) if !seed.is_empty() => {
            secret_bytes_from(sha2::Sha256::digest(seed).as_slice())
        }
        _ => random::random_secret(KEY_LEN),
    };
    Ok(bs58::encode(&key[..]).into_string())
}

fn decode_raw_key(pass_key: &PassKey) -> AskarResult<SecretBytes> {
    let key = bs58::decode(pass_key.as_str())
        .into_vec()
        .map(SecretBytes::new)
        .map_err(|_| err_input("Invalid raw key: not base58"))?;
    if key.len() != KEY_LEN {
        return Err(err_input("Invalid raw key length"));
    }
    Ok(key)
}

/// Key wrapping profile keys, `None` for unprotected stores.
#[derive(Clone, Debug)]
pub struct WrapKey(Option<LocalKey>);

impl WrapKey {
    /// A wrap key over raw key bytes.
    pub fn from_bytes(key: &[u8]) -> AskarResult<Self> {
        Ok(Self(Some(LocalKey::from_secret_bytes(KeyAlg::C20P, key)?)))
    }

    /// The unprotected wrap key.
    pub fn unprotected() -> Self {
        Self(None)
    }

    /// Whether data passes through unencrypted.
    pub fn is_unprotected(&self) -> bool {
        self.0.is_none()
    }

    /// Wrap to `nonce || ciphertext || tag`.
    pub fn wrap_data(&self, data: &[u8]) -> AskarResult<Vec<u8>> {
        match &self.0 {
            None => Ok(data.to_vec()),
            Some(key) => {
                let enc = key.aead_encrypt(data, None, &[])?;
                let mut out = enc.nonce().to_vec();
                out.extend_from_slice(enc.ciphertext_with_tag());
                Ok(out)
            }
        }
    }

    /// Reverse [`WrapKey::wrap_data`]. Fails with `Encryption` on a wrong key.
    pub fn unwrap_data(&self, data: &[u8]) -> AskarResult<SecretBytes> {
        match &self.0 {
            None => Ok(secret_bytes_from(data)),
            Some(key) => {
                if data.len() < NONCE_LEN + TAG_LEN {
                    return Err(err_encryption("Wrapped data too short"));
                }
                let (nonce, ct) = data.split_at(NONCE_LEN);
                key.aead_decrypt(ct, nonce, None, &[])
                    .map_err(|_| err_encryption("Error decrypting wrapped key"))
            }
        }
    }
}

/// A parsed stored key reference, `<method>[?salt=<hex>]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreKeyReference {
    /// derivation method
    pub method: StoreKeyMethod,
    /// argon2 salt
    pub salt: Option<Vec<u8>>,
}

impl StoreKeyReference {
    /// Parse a stored key reference.
    pub fn parse(reference: &str) -> AskarResult<Self> {
        let method: StoreKeyMethod = reference.parse()?;
        let mut salt = None;
        if let Some((_, query)) = reference.split_once('?') {
            for pair in query.split('&') {
                if let Some(hex_salt) = pair.strip_prefix("salt=") {
                    salt = Some(
                        hex::decode(hex_salt)
                            .map_err(|_| err_backend("Invalid stored key salt"))?,
                    );
                }
            }
        }
        if matches!(method, StoreKeyMethod::DeriveKey(_)) && salt.is_none() {
            return Err(err_backend("Stored key reference is missing its salt"));
        }
        Ok(Self { method, salt })
    }

    /// Encode for storage.
    pub fn to_reference(&self) -> String {
        match &self.salt {
            Some(salt) => format!("{}?salt={}", self.method.to_uri(), hex::encode(salt)),
            None => self.method.to_uri().to_string(),
        }
    }

    /// Derive the wrap key described by this reference.
    pub async fn resolve(&self, pass_key: PassKey) -> AskarResult<WrapKey> {
        match self.method {
            StoreKeyMethod::DeriveKey(params) => {
                let salt = self.salt.clone().unwrap_or_default();
                let password = secret_bytes_from(pass_key.as_str().as_bytes());
                let key = params.derive_password_async(password, salt).await?;
                WrapKey::from_bytes(&key)
            }
            StoreKeyMethod::RawKey => WrapKey::from_bytes(&decode_raw_key(&pass_key)?),
            StoreKeyMethod::Unprotected => Ok(WrapKey::unprotected()),
        }
    }
}

/// Create a fresh wrap key and the reference to persist for it.
pub async fn new_wrap_key(
    method: StoreKeyMethod,
    pass_key: PassKey,
) -> AskarResult<(WrapKey, String)> {
    if let StoreKeyMethod::DeriveKey(Argon2Parameters::Custom(_)) = method {
        return Err(err_unsupported("Custom Argon2 parameters cannot be persisted"));
    }
    let reference = StoreKeyReference {
        method,
        salt: match method {
            StoreKeyMethod::DeriveKey(_) => Some(random::random_vec(SALT_LEN)),
            _ => None,
        },
    };
    let key = reference.resolve(pass_key).await?;
    Ok((key, reference.to_reference()))
}

/// Re-derive the wrap key of an existing store.
pub async fn open_wrap_key(
    stored_reference: &str,
    method: Option<StoreKeyMethod>,
    pass_key: PassKey,
) -> AskarResult<WrapKey> {
    let reference = StoreKeyReference::parse(stored_reference)?;
    if let Some(method) = method {
        if method != reference.method {
            return Err(err_encryption("Store key method mismatch"));
        }
    }
    reference.resolve(pass_key).await
}

#[derive(serde::Serialize, serde::Deserialize)]
struct ProfileKeyRecord {
    #[serde(with = "serde_bytes")]
    category_key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    name_key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    item_hmac_key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    tag_name_key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    tag_value_key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    tags_hmac_key: Vec<u8>,
}

impl Drop for ProfileKeyRecord {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.category_key.zeroize();
        self.name_key.zeroize();
        self.item_hmac_key.zeroize();
        self.tag_name_key.zeroize();
        self.tag_value_key.zeroize();
        self.tags_hmac_key.zeroize();
    }
}

/// Per-profile entry encryption keys.
#[derive(Clone)]
pub struct ProfileKey {
    category_key: SecretBytes,
    name_key: SecretBytes,
    item_hmac_key: SecretBytes,
    tag_name_key: SecretBytes,
    tag_value_key: SecretBytes,
    tags_hmac_key: SecretBytes,
}

impl std::fmt::Debug for ProfileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ProfileKey(<secret>)")
    }
}

fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> AskarResult<[u8; 32]> {
    let mut mac = <Hmac<sha2::Sha256> as Mac>::new_from_slice(key)
        .map_err(|_| err_unexpected("invalid hmac key"))?;
    for part in parts {
        mac.update(part);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

fn cipher(key: &[u8]) -> AskarResult<ChaCha20Poly1305> {
    ChaCha20Poly1305::new_from_slice(key).map_err(|_| err_unexpected("invalid key length"))
}

fn seal(key: &[u8], nonce: &[u8], data: &[u8]) -> AskarResult<Vec<u8>> {
    let ct = cipher(key)?
        .encrypt(Nonce::from_slice(nonce), data)
        .map_err(|_| err_encryption("Encryption failed"))?;
    let mut out = Vec::with_capacity(NONCE_LEN + ct.len());
    out.extend_from_slice(nonce);
    out.extend_from_slice(&ct);
    Ok(out)
}

fn open(key: &[u8], data: &[u8]) -> AskarResult<SecretBytes> {
    if data.len() < NONCE_LEN + TAG_LEN {
        return Err(err_encryption("Encrypted data too short"));
    }
    let (nonce, ct) = data.split_at(NONCE_LEN);
    cipher(key)?
        .decrypt(Nonce::from_slice(nonce), ct)
        .map(SecretBytes::new)
        .map_err(|_| err_encryption("Error decrypting entry"))
}

/// Deterministic encryption: `hmac(data)[..12] || chacha20poly1305(data)`.
pub fn encrypt_searchable(
    enc_key: &[u8],
    hmac_key: &[u8],
    data: &[u8],
) -> AskarResult<Vec<u8>> {
    let mac = hmac_sha256(hmac_key, &[data])?;
    seal(enc_key, &mac[..NONCE_LEN], data)
}

/// Randomized encryption: `nonce || chacha20poly1305(data)`.
pub fn encrypt_random(enc_key: &[u8], data: &[u8]) -> AskarResult<Vec<u8>> {
    seal(enc_key, &random::random_vec(NONCE_LEN), data)
}

/// Decrypt either form.
pub fn decrypt_nonce_prefixed(enc_key: &[u8], data: &[u8]) -> AskarResult<SecretBytes> {
    open(enc_key, data)
}

fn utf8(bytes: SecretBytes) -> AskarResult<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| err_encryption("Decrypted text is not UTF-8"))
}

impl ProfileKey {
    /// Generate random keys.
    pub fn new() -> Self {
        Self {
            category_key: random::random_secret(KEY_LEN),
            name_key: random::random_secret(KEY_LEN),
            item_hmac_key: random::random_secret(KEY_LEN),
            tag_name_key: random::random_secret(KEY_LEN),
            tag_value_key: random::random_secret(KEY_LEN),
            tags_hmac_key: random::random_secret(KEY_LEN),
        }
    }

    /// Assemble from existing key material, in field order.
    pub fn from_parts(
        category_key: &[u8],
        name_key: &[u8],
        item_hmac_key: &[u8],
        tag_name_key: &[u8],
        tag_value_key: &[u8],
        tags_hmac_key: &[u8],
    ) -> AskarResult<Self> {
        let parts = [
            category_key,
            name_key,
            item_hmac_key,
            tag_name_key,
            tag_value_key,
            tags_hmac_key,
        ];
        if parts.iter().any(|p| p.len() != KEY_LEN) {
            return Err(err_input("Invalid profile key length"));
        }
        Ok(Self {
            category_key: secret_bytes_from(category_key),
            name_key: secret_bytes_from(name_key),
            item_hmac_key: secret_bytes_from(item_hmac_key),
            tag_name_key: secret_bytes_from(tag_name_key),
            tag_value_key: secret_bytes_from(tag_value_key),
            tags_hmac_key: secret_bytes_from(tags_hmac_key),
        })
    }

    /// Serialize for wrapping.
    pub fn to_bytes(&self) -> AskarResult<SecretBytes> {
        let record = ProfileKeyRecord {
            category_key: self.category_key.to_vec(),
            name_key: self.name_key.to_vec(),
            item_hmac_key: self.item_hmac_key.to_vec(),
            tag_name_key: self.tag_name_key.to_vec(),
            tag_value_key: self.tag_value_key.to_vec(),
            tags_hmac_key: self.tags_hmac_key.to_vec(),
        };
        rmp_serde::to_vec_named(&record)
            .map(SecretBytes::new)
            .map_err(|e| err_unexpected(format!("profile key encoding: {e}")))
    }

    /// Deserialize an unwrapped profile key.
    pub fn from_bytes(bytes: &[u8]) -> AskarResult<Self> {
        let record: ProfileKeyRecord = rmp_serde::from_slice(bytes)
            .map_err(|_| err_encryption("Invalid profile key"))?;
        Self::from_parts(
            &record.category_key,
            &record.name_key,
            &record.item_hmac_key,
            &record.tag_name_key,
            &record.tag_value_key,
            &record.tags_hmac_key,
        )
    }

    /// Serialize and wrap.
    pub fn wrap(&self, wrap_key: &WrapKey) -> AskarResult<Vec<u8>> {
        wrap_key.wrap_data(&self.to_bytes()?)
    }

    /// Unwrap and deserialize.
    pub fn from_wrapped(wrap_key: &WrapKey, data: &[u8]) -> AskarResult<Self> {
        Self::from_bytes(&wrap_key.unwrap_data(data)?)
    }

    /// Searchable category ciphertext.
    pub fn encrypt_category(&self, category: &str) -> AskarResult<Vec<u8>> {
        encrypt_searchable(&self.category_key, &self.item_hmac_key, category.as_bytes())
    }

    /// Searchable name ciphertext.
    pub fn encrypt_name(&self, name: &str) -> AskarResult<Vec<u8>> {
        encrypt_searchable(&self.name_key, &self.item_hmac_key, name.as_bytes())
    }

    /// Searchable tag name ciphertext.
    pub fn encrypt_tag_name(&self, name: &str) -> AskarResult<Vec<u8>> {
        encrypt_searchable(&self.tag_name_key, &self.tags_hmac_key, name.as_bytes())
    }

    /// Searchable tag value ciphertext.
    pub fn encrypt_tag_value(&self, value: &str) -> AskarResult<Vec<u8>> {
        encrypt_searchable(&self.tag_value_key, &self.tags_hmac_key, value.as_bytes())
    }

    fn value_key(&self, category: &str, name: &str) -> AskarResult<[u8; 32]> {
        hmac_sha256(
            &self.item_hmac_key,
            &[
                &(category.len() as u32).to_be_bytes(),
                category.as_bytes(),
                &(name.len() as u32).to_be_bytes(),
                name.as_bytes(),
            ],
        )
    }

    /// Value ciphertext under the key derived from category and name.
    pub fn encrypt_value(
        &self,
        category: &str,
        name: &str,
        value: &[u8],
    ) -> AskarResult<Vec<u8>> {
        let mut key = self.value_key(category, name)?;
        let out = encrypt_random(&key, value);
        zeroize::Zeroize::zeroize(&mut key);
        out
    }

    /// Decrypt a value.
    pub fn decrypt_value(
        &self,
        category: &str,
        name: &str,
        value: &[u8],
    ) -> AskarResult<SecretBytes> {
        let mut key = self.value_key(category, name)?;
        let out = open(&key, value);
        zeroize::Zeroize::zeroize(&mut key);
        out
    }

    /// Encrypt a full record.
    pub fn encrypt_entry(
        &self,
        category: &str,
        name: &str,
        value: &[u8],
        tags: &[EntryTag],
        expiry_ms: Option<i64>,
    ) -> AskarResult<EncEntry> {
        let tags = tags
            .iter()
            .map(|tag| {
                Ok(EncEntryTag {
                    name: self.encrypt_tag_name(tag.name())?,
                    value: if tag.is_plaintext() {
                        tag.value().as_bytes().to_vec()
                    } else {
                        self.encrypt_tag_value(tag.value())?
                    },
                    plaintext: tag.is_plaintext(),
                })
            })
            .collect::<AskarResult<_>>()?;
        Ok(EncEntry {
            category: self.encrypt_category(category)?,
            name: self.encrypt_name(name)?,
            value: self.encrypt_value(category, name, value)?,
            tags,
            expiry_ms,
        })
    }

    /// Decrypt a full record.
    pub fn decrypt_entry(&self, enc: &EncEntry) -> AskarResult<Entry> {
        let category = utf8(open(&self.category_key, &enc.category)?)?;
        let name = utf8(open(&self.name_key, &enc.name)?)?;
        let value = self.decrypt_value(&category, &name, &enc.value)?;
        let tags = enc
            .tags
            .iter()
            .map(|tag| {
                let tag_name = utf8(open(&self.tag_name_key, &tag.name)?)?;
                Ok(if tag.plaintext {
                    let value = String::from_utf8(tag.value.clone())
                        .map_err(|_| err_encryption("Tag value is not UTF-8"))?;
                    EntryTag::Plaintext(tag_name, value)
                } else {
                    EntryTag::Encrypted(tag_name, utf8(open(&self.tag_value_key, &tag.value)?)?)
                })
            })
            .collect::<AskarResult<_>>()?;
        Ok(Entry {
            category,
            name,
            value,
            tags,
        })
    }

    /// Translate a filter for backend matching. Range and `$like`
    /// comparisons are only possible on plaintext tags.
    pub fn encrypt_tag_query(&self, query: TagQuery) -> AskarResult<EncTagQuery> {
        query.try_map(
            &mut |name: TagName| {
                Ok(EncTagName {
                    name: self.encrypt_tag_name(&name.name)?,
                    plaintext: name.plaintext,
                })
            },
            &mut |op: Option<CompareOp>, name: &EncTagName, value: String| {
                if name.plaintext {
                    Ok(value.into_bytes())
                } else if op.map_or(false, |op| op.requires_plaintext()) {
                    Err(err_unsupported(
                        "Range and LIKE filters require plaintext tags",
                    ))
                } else {
                    self.encrypt_tag_value(&value)
                }
            },
        )
    }
}

/// A shared profile key.
pub type ProfileKeyRef = Arc<ProfileKey>;
