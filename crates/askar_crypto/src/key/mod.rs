use crate::*;
use std::sync::Arc;

mod bls;
mod ec;
mod okp;
mod symmetric;

use bls::{BlsGroup, BlsPair};
use ec::{K256Pair, P256Pair, P384Pair};
use okp::{Ed25519Pair, X25519Pair};
use symmetric::SymmetricKey;

enum KeyMaterial {
    Symmetric(SymmetricKey),
    Ed25519(Ed25519Pair),
    X25519(X25519Pair),
    K256(K256Pair),
    P256(P256Pair),
    P384(P384Pair),
    Bls(BlsPair),
}

/// A handle to key material.
///
/// Clones share the same underlying material, which is zeroed when the
/// last clone is dropped.
#[derive(Clone)]
pub struct LocalKey {
    alg: KeyAlg,
    ephemeral: bool,
    inner: Arc<KeyMaterial>,
}

impl std::fmt::Debug for LocalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKey")
            .field("alg", &self.alg)
            .field("ephemeral", &self.ephemeral)
            .finish()
    }
}

fn bls_group(alg: KeyAlg) -> BlsGroup {
    if alg == KeyAlg::Bls12381G2 {
        BlsGroup::G2
    } else {
        BlsGroup::G1
    }
}

impl LocalKey {
    fn new(alg: KeyAlg, material: KeyMaterial) -> Self {
        Self {
            alg,
            ephemeral: false,
            inner: Arc::new(material),
        }
    }

    /// Generate a new random key.
    pub fn generate(
        alg: KeyAlg,
        backend: KeyBackend,
        ephemeral: bool,
    ) -> AskarResult<Self> {
        if backend != KeyBackend::Software {
            return Err(err_unsupported("Unsupported key backend"));
        }
        let material = match alg {
            KeyAlg::Ed25519 => KeyMaterial::Ed25519(Ed25519Pair::generate()),
            KeyAlg::X25519 => KeyMaterial::X25519(X25519Pair::generate()),
            KeyAlg::K256 => KeyMaterial::K256(K256Pair::generate()),
            KeyAlg::P256 => KeyMaterial::P256(P256Pair::generate()),
            KeyAlg::P384 => KeyMaterial::P384(P384Pair::generate()),
            KeyAlg::Bls12381G1 | KeyAlg::Bls12381G2 => {
                KeyMaterial::Bls(BlsPair::generate(bls_group(alg))?)
            }
            _ => KeyMaterial::Symmetric(SymmetricKey::generate(alg)),
        };
        let mut key = Self::new(alg, material);
        key.ephemeral = ephemeral;
        Ok(key)
    }

    /// Deterministically derive a key from a seed.
    pub fn from_seed(
        alg: KeyAlg,
        seed: &[u8],
        method: KeyMethod,
    ) -> AskarResult<Self> {
        let material = match (alg, method) {
            (KeyAlg::Bls12381G1 | KeyAlg::Bls12381G2, _) => {
                KeyMaterial::Bls(BlsPair::from_seed(bls_group(alg), seed)?)
            }
            (_, KeyMethod::BlsKeyGen) => {
                return Err(err_unsupported(
                    "BLS key generation is only supported for BLS keys",
                ))
            }
            (KeyAlg::Ed25519, _) if seed.len() == 32 => {
                KeyMaterial::Ed25519(Ed25519Pair::from_secret_bytes(seed)?)
            }
            (KeyAlg::X25519, _) if seed.len() == 32 => {
                KeyMaterial::X25519(X25519Pair::from_secret_bytes(seed)?)
            }
            (KeyAlg::Ed25519 | KeyAlg::X25519, _) => {
                let secret = random::expand_seed(seed, alg.as_str().as_bytes(), 0, 32)?;
                return Self::from_secret_bytes(alg, &secret);
            }
            (KeyAlg::K256, _) => KeyMaterial::K256(K256Pair::from_seed(seed)?),
            (KeyAlg::P256, _) => KeyMaterial::P256(P256Pair::from_seed(seed)?),
            (KeyAlg::P384, _) => KeyMaterial::P384(P384Pair::from_seed(seed)?),
            _ => KeyMaterial::Symmetric(SymmetricKey::from_seed(alg, seed)?),
        };
        Ok(Self::new(alg, material))
    }

    /// Import raw secret key material.
    pub fn from_secret_bytes(alg: KeyAlg, secret: &[u8]) -> AskarResult<Self> {
        let material = match alg {
            KeyAlg::Ed25519 => KeyMaterial::Ed25519(Ed25519Pair::from_secret_bytes(secret)?),
            KeyAlg::X25519 => KeyMaterial::X25519(X25519Pair::from_secret_bytes(secret)?),
            KeyAlg::K256 => KeyMaterial::K256(K256Pair::from_secret_bytes(secret)?),
            KeyAlg::P256 => KeyMaterial::P256(P256Pair::from_secret_bytes(secret)?),
            KeyAlg::P384 => KeyMaterial::P384(P384Pair::from_secret_bytes(secret)?),
            KeyAlg::Bls12381G1 | KeyAlg::Bls12381G2 => {
                KeyMaterial::Bls(BlsPair::from_secret_bytes(bls_group(alg), secret)?)
            }
            _ => KeyMaterial::Symmetric(SymmetricKey::from_secret_bytes(alg, secret)?),
        };
        Ok(Self::new(alg, material))
    }

    /// Import a public key.
    pub fn from_public_bytes(alg: KeyAlg, public: &[u8]) -> AskarResult<Self> {
        let material = match alg {
            KeyAlg::Ed25519 => KeyMaterial::Ed25519(Ed25519Pair::from_public_bytes(public)?),
            KeyAlg::X25519 => KeyMaterial::X25519(X25519Pair::from_public_bytes(public)?),
            KeyAlg::K256 => KeyMaterial::K256(K256Pair::from_public_bytes(public)?),
            KeyAlg::P256 => KeyMaterial::P256(P256Pair::from_public_bytes(public)?),
            KeyAlg::P384 => KeyMaterial::P384(P384Pair::from_public_bytes(public)?),
            KeyAlg::Bls12381G1 | KeyAlg::Bls12381G2 => {
                KeyMaterial::Bls(BlsPair::from_public_bytes(bls_group(alg), public)?)
            }
            _ => return Err(err_unsupported("Symmetric keys have no public bytes")),
        };
        Ok(Self::new(alg, material))
    }

    /// Import a JWK, public or secret.
    pub fn from_jwk(jwk: &str) -> AskarResult<Self> {
        Self::from_jwk_parts(&Jwk::from_json(jwk)?)
    }

    /// Import a parsed JWK.
    pub fn from_jwk_parts(jwk: &Jwk) -> AskarResult<Self> {
        let decode = |v: &Option<String>, name: &str| -> AskarResult<Vec<u8>> {
            match v {
                Some(v) => jwk::b64_decode(v),
                None => Err(err_input(format!("JWK missing member '{name}'"))),
            }
        };
        let d = jwk
            .d
            .as_ref()
            .map(|d| jwk::b64_decode(d).map(SecretBytes::new))
            .transpose()?;
        match jwk.kty.as_str() {
            "oct" => {
                let alg: KeyAlg = jwk
                    .alg
                    .as_deref()
                    .ok_or_else(|| err_input("JWK missing member 'alg'"))?
                    .parse()?;
                if !alg.is_symmetric() {
                    return Err(err_unsupported("Unsupported JWK algorithm"));
                }
                let k = SecretBytes::new(decode(&jwk.k, "k")?);
                Self::from_secret_bytes(alg, &k)
            }
            "OKP" => {
                let alg = match jwk.crv.as_deref() {
                    Some("Ed25519") => KeyAlg::Ed25519,
                    Some("X25519") => KeyAlg::X25519,
                    _ => return Err(err_unsupported("Unsupported JWK curve")),
                };
                let x = decode(&jwk.x, "x")?;
                match d {
                    Some(d) => {
                        let key = Self::from_secret_bytes(alg, &d)?;
                        if key.public_bytes()? != x {
                            return Err(err_input("JWK public key mismatch"));
                        }
                        Ok(key)
                    }
                    None => Self::from_public_bytes(alg, &x),
                }
            }
            "EC" => {
                let x = decode(&jwk.x, "x")?;
                let y = decode(&jwk.y, "y")?;
                let d = d.as_ref().map(|d| &d[..]);
                let (alg, material) = match jwk.crv.as_deref() {
                    Some(K256Pair::JWK_CRV) => (
                        KeyAlg::K256,
                        KeyMaterial::K256(K256Pair::from_coordinates(&x, &y, d)?),
                    ),
                    Some(P256Pair::JWK_CRV) => (
                        KeyAlg::P256,
                        KeyMaterial::P256(P256Pair::from_coordinates(&x, &y, d)?),
                    ),
                    Some(P384Pair::JWK_CRV) => (
                        KeyAlg::P384,
                        KeyMaterial::P384(P384Pair::from_coordinates(&x, &y, d)?),
                    ),
                    Some("BLS12381G1") | Some("BLS12381G2") => {
                        let alg = if jwk.crv.as_deref() == Some("BLS12381G2") {
                            KeyAlg::Bls12381G2
                        } else {
                            KeyAlg::Bls12381G1
                        };
                        let key = match d {
                            Some(d) => {
                                let key = Self::from_secret_bytes(alg, d)?;
                                if key.bls()?.coordinates() != (x, y) {
                                    return Err(err_input("JWK public key mismatch"));
                                }
                                key
                            }
                            None => Self::new(
                                alg,
                                KeyMaterial::Bls(BlsPair::from_uncompressed(
                                    bls_group(alg),
                                    &x,
                                    &y,
                                )?),
                            ),
                        };
                        return Ok(key);
                    }
                    _ => return Err(err_unsupported("Unsupported JWK curve")),
                };
                Ok(Self::new(alg, material))
            }
            _ => Err(err_unsupported("Unsupported JWK key type")),
        }
    }

    fn bls(&self) -> AskarResult<&BlsPair> {
        match &*self.inner {
            KeyMaterial::Bls(pair) => Ok(pair),
            _ => Err(err_unsupported("not a BLS key")),
        }
    }

    /// Reinterpret this key under a compatible algorithm.
    pub fn convert_key(&self, alg: KeyAlg) -> AskarResult<Self> {
        match (&*self.inner, alg) {
            (KeyMaterial::Ed25519(pair), KeyAlg::X25519) => {
                let mut key = Self::new(alg, KeyMaterial::X25519(pair.to_x25519()));
                key.ephemeral = self.ephemeral;
                Ok(key)
            }
            _ if alg == self.alg => Ok(self.clone()),
            _ => Err(err_unsupported("Unsupported key conversion")),
        }
    }

    /// Raw Diffie-Hellman shared secret between this secret key and
    /// another public key of the same algorithm.
    pub fn key_exchange_bytes(&self, other: &LocalKey) -> AskarResult<SecretBytes> {
        match (&*self.inner, &*other.inner) {
            (KeyMaterial::X25519(a), KeyMaterial::X25519(b)) => a.key_exchange(b),
            (KeyMaterial::K256(a), KeyMaterial::K256(b)) => a.key_exchange(b),
            (KeyMaterial::P256(a), KeyMaterial::P256(b)) => a.key_exchange(b),
            (KeyMaterial::P384(a), KeyMaterial::P384(b)) => a.key_exchange(b),
            _ => Err(err_unsupported("Unsupported key exchange")),
        }
    }

    /// Wrap a raw key exchange result as a new key of `alg`.
    pub fn from_key_exchange(
        alg: KeyAlg,
        secret: &LocalKey,
        public: &LocalKey,
    ) -> AskarResult<Self> {
        let shared = secret.key_exchange_bytes(public)?;
        Self::from_secret_bytes(alg, &shared)
    }

    /// The key algorithm.
    pub fn algorithm(&self) -> KeyAlg {
        self.alg
    }

    /// Whether this key is marked for single use key agreement.
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    /// Public key bytes.
    pub fn public_bytes(&self) -> AskarResult<Vec<u8>> {
        Ok(match &*self.inner {
            KeyMaterial::Symmetric(_) => {
                return Err(err_unsupported("Symmetric keys have no public bytes"))
            }
            KeyMaterial::Ed25519(k) => k.public_bytes(),
            KeyMaterial::X25519(k) => k.public_bytes(),
            KeyMaterial::K256(k) => k.public_bytes(),
            KeyMaterial::P256(k) => k.public_bytes(),
            KeyMaterial::P384(k) => k.public_bytes(),
            KeyMaterial::Bls(k) => k.public_bytes(),
        })
    }

    /// Secret key bytes.
    pub fn secret_bytes(&self) -> AskarResult<SecretBytes> {
        let secret = match &*self.inner {
            KeyMaterial::Symmetric(k) => Some(secret_bytes_from(k.secret_bytes())),
            KeyMaterial::Ed25519(k) => k.secret_bytes(),
            KeyMaterial::X25519(k) => k.secret_bytes(),
            KeyMaterial::K256(k) => k.secret_bytes(),
            KeyMaterial::P256(k) => k.secret_bytes(),
            KeyMaterial::P384(k) => k.secret_bytes(),
            KeyMaterial::Bls(k) => k.secret_bytes(),
        };
        secret.ok_or_else(|| err_input("key has no secret"))
    }

    /// Whether secret material is present.
    pub fn has_secret(&self) -> bool {
        self.secret_bytes().is_ok()
    }

    fn to_jwk(&self, include_secret: bool) -> AskarResult<Jwk> {
        let b64 = |v: &[u8]| Some(jwk::b64_encode(v));
        let mut out = match &*self.inner {
            KeyMaterial::Symmetric(k) => Jwk {
                kty: "oct".into(),
                alg: Some(k.jwk_alg().into()),
                k: b64(k.secret_bytes()),
                ..Default::default()
            },
            KeyMaterial::Ed25519(k) => Jwk {
                kty: "OKP".into(),
                crv: Some("Ed25519".into()),
                x: b64(&k.public_bytes()),
                ..Default::default()
            },
            KeyMaterial::X25519(k) => Jwk {
                kty: "OKP".into(),
                crv: Some("X25519".into()),
                x: b64(&k.public_bytes()),
                ..Default::default()
            },
            KeyMaterial::K256(k) => ec_jwk(K256Pair::JWK_CRV, k.coordinates()),
            KeyMaterial::P256(k) => ec_jwk(P256Pair::JWK_CRV, k.coordinates()),
            KeyMaterial::P384(k) => ec_jwk(P384Pair::JWK_CRV, k.coordinates()),
            KeyMaterial::Bls(k) => ec_jwk(k.jwk_crv(), k.coordinates()),
        };
        if include_secret {
            // public-only keys export without `d`
            if out.kty != "oct" && self.has_secret() {
                out.d = b64(&self.secret_bytes()?);
            }
        } else if out.kty == "oct" {
            return Err(err_unsupported("Symmetric keys have no public JWK"));
        }
        Ok(out)
    }

    /// Public JWK as JSON.
    pub fn to_jwk_public(&self) -> AskarResult<String> {
        self.to_jwk(false)?.to_json()
    }

    /// Secret JWK as JSON.
    pub fn to_jwk_secret(&self) -> AskarResult<SecretBytes> {
        Ok(SecretBytes::new(self.to_jwk(true)?.to_json()?.into_bytes()))
    }

    /// RFC 7638 thumbprint of the JWK.
    pub fn to_jwk_thumbprint(&self) -> AskarResult<String> {
        let include_secret = self.alg.is_symmetric();
        self.to_jwk(include_secret)?.thumbprint()
    }

    fn symmetric(&self) -> AskarResult<&SymmetricKey> {
        match &*self.inner {
            KeyMaterial::Symmetric(k) => Ok(k),
            _ => Err(err_unsupported("AEAD requires a symmetric key")),
        }
    }

    /// Nonce and tag lengths.
    pub fn aead_params(&self) -> AskarResult<AeadParams> {
        Ok(self.symmetric()?.aead_params())
    }

    /// A random nonce of the correct length.
    pub fn aead_random_nonce(&self) -> AskarResult<Vec<u8>> {
        Ok(random::random_vec(self.aead_params()?.nonce_length))
    }

    /// Authenticated encryption. A random nonce is used if none is given.
    pub fn aead_encrypt(
        &self,
        msg: &[u8],
        nonce: Option<&[u8]>,
        aad: &[u8],
    ) -> AskarResult<Encrypted> {
        let key = self.symmetric()?;
        let params = key.aead_params();
        let nonce = match nonce {
            Some(nonce) => nonce.to_vec(),
            None => random::random_vec(params.nonce_length),
        };
        let ct = key.encrypt(msg, &nonce, aad)?;
        // key wrap output carries its integrity block inline
        let tag_len = match self.alg {
            KeyAlg::A128Kw | KeyAlg::A256Kw => 0,
            _ => params.tag_length,
        };
        Ok(Encrypted::new(ct, tag_len, &nonce))
    }

    /// Authenticated decryption. If `tag` is `None` it is expected at the
    /// end of `ciphertext`.
    pub fn aead_decrypt(
        &self,
        ciphertext: &[u8],
        nonce: &[u8],
        tag: Option<&[u8]>,
        aad: &[u8],
    ) -> AskarResult<SecretBytes> {
        let key = self.symmetric()?;
        match tag {
            Some(tag) if !tag.is_empty() => {
                let mut buf = ciphertext.to_vec();
                buf.extend_from_slice(tag);
                key.decrypt(&buf, nonce, aad)
            }
            _ => key.decrypt(ciphertext, nonce, aad),
        }
    }

    /// Sign a message.
    pub fn sign_message(
        &self,
        msg: &[u8],
        sig_type: Option<SignatureAlg>,
    ) -> AskarResult<Vec<u8>> {
        self.check_sig_type(sig_type)?;
        match &*self.inner {
            KeyMaterial::Ed25519(k) => k.sign(msg),
            KeyMaterial::K256(k) => k.sign(msg),
            KeyMaterial::P256(k) => k.sign(msg),
            KeyMaterial::P384(k) => k.sign(msg),
            _ => Err(err_unsupported("Unsupported signature type")),
        }
    }

    /// Verify a signature. Malformed or mismatched signatures yield `false`.
    pub fn verify_signature(
        &self,
        msg: &[u8],
        signature: &[u8],
        sig_type: Option<SignatureAlg>,
    ) -> AskarResult<bool> {
        self.check_sig_type(sig_type)?;
        Ok(match &*self.inner {
            KeyMaterial::Ed25519(k) => k.verify(msg, signature),
            KeyMaterial::K256(k) => k.verify(msg, signature),
            KeyMaterial::P256(k) => k.verify(msg, signature),
            KeyMaterial::P384(k) => k.verify(msg, signature),
            _ => return Err(err_unsupported("Unsupported signature type")),
        })
    }

    fn check_sig_type(&self, sig_type: Option<SignatureAlg>) -> AskarResult<()> {
        let default = self
            .alg
            .default_signature()
            .ok_or_else(|| err_unsupported("Unsupported signature type"))?;
        match sig_type {
            Some(sig_type) if sig_type != default => {
                Err(err_unsupported("Unsupported signature type"))
            }
            _ => Ok(()),
        }
    }

    /// Encrypt another key's secret material with this key.
    pub fn wrap_key(
        &self,
        other: &LocalKey,
        nonce: Option<&[u8]>,
    ) -> AskarResult<Encrypted> {
        let secret = other.secret_bytes()?;
        self.aead_encrypt(&secret, nonce, &[])
    }

    /// Decrypt a wrapped key.
    pub fn unwrap_key(
        &self,
        alg: KeyAlg,
        ciphertext: &[u8],
        nonce: &[u8],
        tag: Option<&[u8]>,
    ) -> AskarResult<LocalKey> {
        let secret = self.aead_decrypt(ciphertext, nonce, tag, &[])?;
        Self::from_secret_bytes(alg, &secret)
    }
}

fn ec_jwk(crv: &str, (x, y): (Vec<u8>, Vec<u8>)) -> Jwk {
    Jwk {
        kty: "EC".into(),
        crv: Some(crv.into()),
        x: Some(jwk::b64_encode(&x)),
        y: Some(jwk::b64_encode(&y)),
        ..Default::default()
    }
}
