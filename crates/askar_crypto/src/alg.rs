use crate::error::*;

/// Normalize an algorithm identifier: lowercase, alphanumerics only.
fn normalize_alg(alg: &str) -> String {
    alg.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Supported key algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAlg {
    /// AES-128-GCM
    A128Gcm,
    /// AES-256-GCM
    A256Gcm,
    /// AES-128-CBC with HMAC-SHA-256
    A128CbcHs256,
    /// AES-256-CBC with HMAC-SHA-512
    A256CbcHs512,
    /// AES-128 key wrap
    A128Kw,
    /// AES-256 key wrap
    A256Kw,
    /// BLS12-381 G1 public keys
    Bls12381G1,
    /// BLS12-381 G2 public keys
    Bls12381G2,
    /// ChaCha20-Poly1305
    C20P,
    /// XChaCha20-Poly1305
    XC20P,
    /// Ed25519 signing keys
    Ed25519,
    /// X25519 key exchange keys
    X25519,
    /// secp256k1 elliptic curve
    K256,
    /// NIST P-256 elliptic curve
    P256,
    /// NIST P-384 elliptic curve
    P384,
}

impl KeyAlg {
    /// Every supported algorithm.
    pub const ALL: &'static [KeyAlg] = &[
        KeyAlg::A128Gcm,
        KeyAlg::A256Gcm,
        KeyAlg::A128CbcHs256,
        KeyAlg::A256CbcHs512,
        KeyAlg::A128Kw,
        KeyAlg::A256Kw,
        KeyAlg::Bls12381G1,
        KeyAlg::Bls12381G2,
        KeyAlg::C20P,
        KeyAlg::XC20P,
        KeyAlg::Ed25519,
        KeyAlg::X25519,
        KeyAlg::K256,
        KeyAlg::P256,
        KeyAlg::P384,
    ];

    /// Canonical identifier.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::A128Gcm => "a128gcm",
            Self::A256Gcm => "a256gcm",
            Self::A128CbcHs256 => "a128cbchs256",
            Self::A256CbcHs512 => "a256cbchs512",
            Self::A128Kw => "a128kw",
            Self::A256Kw => "a256kw",
            Self::Bls12381G1 => "bls12381g1",
            Self::Bls12381G2 => "bls12381g2",
            Self::C20P => "c20p",
            Self::XC20P => "xc20p",
            Self::Ed25519 => "ed25519",
            Self::X25519 => "x25519",
            Self::K256 => "k256",
            Self::P256 => "p256",
            Self::P384 => "p384",
        }
    }

    /// Symmetric algorithms carry only secret bytes.
    pub const fn is_symmetric(&self) -> bool {
        matches!(
            self,
            Self::A128Gcm
                | Self::A256Gcm
                | Self::A128CbcHs256
                | Self::A256CbcHs512
                | Self::A128Kw
                | Self::A256Kw
                | Self::C20P
                | Self::XC20P
        )
    }

    /// Length of the raw secret key material.
    pub const fn secret_len(&self) -> usize {
        match self {
            Self::A128Gcm | Self::A128Kw => 16,
            Self::A256Gcm | Self::A256Kw => 32,
            Self::A128CbcHs256 => 32,
            Self::A256CbcHs512 => 64,
            Self::C20P | Self::XC20P => 32,
            Self::Bls12381G1 | Self::Bls12381G2 => 32,
            Self::Ed25519 | Self::X25519 | Self::K256 | Self::P256 => 32,
            Self::P384 => 48,
        }
    }

    /// The signature algorithm used when none is requested.
    pub const fn default_signature(&self) -> Option<SignatureAlg> {
        match self {
            Self::Ed25519 => Some(SignatureAlg::EdDSA),
            Self::K256 => Some(SignatureAlg::ES256K),
            Self::P256 => Some(SignatureAlg::ES256),
            Self::P384 => Some(SignatureAlg::ES384),
            _ => None,
        }
    }
}

impl std::str::FromStr for KeyAlg {
    type Err = OneErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = normalize_alg(s);
        let alg = match norm.as_str() {
            "a128gcm" | "aes128gcm" => Self::A128Gcm,
            "a256gcm" | "aes256gcm" => Self::A256Gcm,
            "a128cbchs256" => Self::A128CbcHs256,
            "a256cbchs512" => Self::A256CbcHs512,
            "a128kw" | "aes128kw" => Self::A128Kw,
            "a256kw" | "aes256kw" => Self::A256Kw,
            "bls12381g1" => Self::Bls12381G1,
            "bls12381g2" => Self::Bls12381G2,
            "c20p" | "chacha20poly1305" => Self::C20P,
            "xc20p" | "xchacha20poly1305" => Self::XC20P,
            "ed25519" => Self::Ed25519,
            "x25519" => Self::X25519,
            "k256" | "secp256k1" => Self::K256,
            "p256" | "secp256r1" => Self::P256,
            "p384" | "secp384r1" => Self::P384,
            _ => return Err(err_unsupported("Unknown key algorithm")),
        };
        Ok(alg)
    }
}

impl std::fmt::Display for KeyAlg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl serde::Serialize for KeyAlg {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for KeyAlg {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s: std::borrow::Cow<'de, str> = serde::Deserialize::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Implementation backend for key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyBackend {
    /// In-process software keys.
    #[default]
    Software,

    /// Hardware-backed keys. Not available in this build.
    SecureElement,
}

impl KeyBackend {
    /// Identifier of this backend.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Software => "software",
            Self::SecureElement => "secure_element",
        }
    }
}

impl std::str::FromStr for KeyBackend {
    type Err = OneErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_alg(s).as_str() {
            "" | "software" => Ok(Self::Software),
            "secureelement" => Ok(Self::SecureElement),
            _ => Err(err_unsupported("Unknown key backend")),
        }
    }
}

/// The key backends usable in this build.
pub fn get_supported_backends() -> Vec<&'static str> {
    vec![KeyBackend::Software.as_str()]
}

/// Signature algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlg {
    /// Ed25519
    EdDSA,
    /// ECDSA with P-256 and SHA-256
    ES256,
    /// ECDSA with secp256k1 and SHA-256
    ES256K,
    /// ECDSA with P-384 and SHA-384
    ES384,
}

impl std::str::FromStr for SignatureAlg {
    type Err = OneErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_alg(s).as_str() {
            "eddsa" => Ok(Self::EdDSA),
            "es256" => Ok(Self::ES256),
            "es256k" => Ok(Self::ES256K),
            "es384" => Ok(Self::ES384),
            _ => Err(err_unsupported("Unknown signature algorithm")),
        }
    }
}

/// Method for deriving a key from a seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyMethod {
    /// Algorithm default: the seed is the secret for 32-byte curve keys,
    /// otherwise expanded with HKDF.
    #[default]
    None,

    /// IETF BLS KeyGen.
    BlsKeyGen,
}

impl std::str::FromStr for KeyMethod {
    type Err = OneErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_alg(s).as_str() {
            "" | "none" => Ok(Self::None),
            "blskeygen" => Ok(Self::BlsKeyGen),
            _ => Err(err_unsupported("Unknown key method")),
        }
    }
}

/// Nonce and tag lengths of an AEAD algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AeadParams {
    /// Nonce length in bytes.
    pub nonce_length: usize,

    /// Tag length in bytes.
    pub tag_length: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_alg_variants() {
        assert_eq!(KeyAlg::A256CbcHs512, "A256CBC-HS512".parse().unwrap());
        assert_eq!(KeyAlg::P256, "P-256".parse().unwrap());
        assert_eq!(KeyAlg::K256, "secp256k1".parse().unwrap());
        for alg in KeyAlg::ALL {
            assert_eq!(*alg, alg.as_str().parse().unwrap());
        }
        let err = "nope".parse::<KeyAlg>().unwrap_err();
        assert_eq!(ErrorKind::Unsupported, err.kind());
        assert_eq!(8, err.kind().code());
    }

    #[test]
    fn backends() {
        assert_eq!(vec!["software"], get_supported_backends());
        assert_eq!(
            KeyBackend::SecureElement,
            "secure_element".parse().unwrap()
        );
    }
}
