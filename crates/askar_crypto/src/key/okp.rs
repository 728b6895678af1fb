use crate::*;
use sha2::Digest;

pub(crate) struct Ed25519Pair {
    pub secret: Option<ed25519_dalek::SigningKey>,
    pub public: ed25519_dalek::VerifyingKey,
}

impl Ed25519Pair {
    pub fn generate() -> Self {
        Self::from_signing(ed25519_dalek::SigningKey::generate(
            &mut rand::rngs::OsRng,
        ))
    }

    fn from_signing(secret: ed25519_dalek::SigningKey) -> Self {
        let public = secret.verifying_key();
        Self {
            secret: Some(secret),
            public,
        }
    }

    /// Accepts the 32-byte seed or the 64-byte `seed || public` keypair.
    pub fn from_secret_bytes(secret: &[u8]) -> AskarResult<Self> {
        match secret.len() {
            32 => {
                let mut seed = [0u8; 32];
                seed.copy_from_slice(secret);
                Ok(Self::from_signing(ed25519_dalek::SigningKey::from_bytes(
                    &seed,
                )))
            }
            64 => {
                let mut pair = [0u8; 64];
                pair.copy_from_slice(secret);
                let signing = ed25519_dalek::SigningKey::from_keypair_bytes(&pair)
                    .map_err(|_| err_input("invalid ed25519 keypair"))?;
                Ok(Self::from_signing(signing))
            }
            _ => Err(err_input("invalid ed25519 secret key length")),
        }
    }

    pub fn from_public_bytes(public: &[u8]) -> AskarResult<Self> {
        let public: [u8; 32] = public
            .try_into()
            .map_err(|_| err_input("invalid ed25519 public key length"))?;
        let public = ed25519_dalek::VerifyingKey::from_bytes(&public)
            .map_err(|_| err_input("invalid ed25519 public key"))?;
        Ok(Self {
            secret: None,
            public,
        })
    }

    pub fn public_bytes(&self) -> Vec<u8> {
        self.public.as_bytes().to_vec()
    }

    pub fn secret_bytes(&self) -> Option<SecretBytes> {
        self.secret
            .as_ref()
            .map(|s| SecretBytes::new(s.to_bytes().to_vec()))
    }

    pub fn sign(&self, msg: &[u8]) -> AskarResult<Vec<u8>> {
        use ed25519_dalek::Signer;
        let secret = self
            .secret
            .as_ref()
            .ok_or_else(|| err_input("ed25519 key has no secret"))?;
        Ok(secret.sign(msg).to_bytes().to_vec())
    }

    pub fn verify(&self, msg: &[u8], sig: &[u8]) -> bool {
        use ed25519_dalek::Verifier;
        match ed25519_dalek::Signature::from_slice(sig) {
            Ok(sig) => self.public.verify(msg, &sig).is_ok(),
            Err(_) => false,
        }
    }

    /// Birational map onto the Montgomery curve.
    pub fn to_x25519(&self) -> X25519Pair {
        match &self.secret {
            Some(secret) => {
                // x25519 clamps the hashed scalar itself
                let hash = sha2::Sha512::digest(secret.to_bytes());
                let mut scalar = [0u8; 32];
                scalar.copy_from_slice(&hash[..32]);
                let secret = x25519_dalek::StaticSecret::from(scalar);
                X25519Pair::from_static(secret)
            }
            None => X25519Pair {
                secret: None,
                public: x25519_dalek::PublicKey::from(
                    self.public.to_montgomery().to_bytes(),
                ),
            },
        }
    }
}

pub(crate) struct X25519Pair {
    pub secret: Option<x25519_dalek::StaticSecret>,
    pub public: x25519_dalek::PublicKey,
}

impl X25519Pair {
    pub fn generate() -> Self {
        Self::from_static(x25519_dalek::StaticSecret::random_from_rng(
            rand::rngs::OsRng,
        ))
    }

    fn from_static(secret: x25519_dalek::StaticSecret) -> Self {
        let public = x25519_dalek::PublicKey::from(&secret);
        Self {
            secret: Some(secret),
            public,
        }
    }

    pub fn from_secret_bytes(secret: &[u8]) -> AskarResult<Self> {
        let secret: [u8; 32] = secret
            .try_into()
            .map_err(|_| err_input("invalid x25519 secret key length"))?;
        Ok(Self::from_static(x25519_dalek::StaticSecret::from(secret)))
    }

    pub fn from_public_bytes(public: &[u8]) -> AskarResult<Self> {
        let public: [u8; 32] = public
            .try_into()
            .map_err(|_| err_input("invalid x25519 public key length"))?;
        Ok(Self {
            secret: None,
            public: x25519_dalek::PublicKey::from(public),
        })
    }

    pub fn public_bytes(&self) -> Vec<u8> {
        self.public.as_bytes().to_vec()
    }

    pub fn secret_bytes(&self) -> Option<SecretBytes> {
        self.secret
            .as_ref()
            .map(|s| SecretBytes::new(s.to_bytes().to_vec()))
    }

    pub fn key_exchange(&self, other: &X25519Pair) -> AskarResult<SecretBytes> {
        let secret = self
            .secret
            .as_ref()
            .ok_or_else(|| err_input("x25519 key has no secret"))?;
        let shared = secret.diffie_hellman(&other.public);
        Ok(SecretBytes::new(shared.as_bytes().to_vec()))
    }
}
