use crate::*;
use bls12_381::{G1Affine, G1Projective, G2Affine, G2Projective, Scalar};
use sha2::Digest;

const KEYGEN_SALT: &[u8] = b"BLS-SIG-KEYGEN-SALT-";

/// BLS12-381 keys with public keys in either group.
pub(crate) struct BlsPair {
    pub group: BlsGroup,
    pub secret: Option<Scalar>,
    pub public: BlsPublic,
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlsGroup {
    G1,
    G2,
}

pub(crate) enum BlsPublic {
    G1(G1Affine),
    G2(G2Affine),
}

fn is_zero(s: &Scalar) -> bool {
    s.to_bytes() == [0u8; 32]
}

/// IETF BLS signature draft KeyGen (HKDF-SHA-256, L = 48).
fn keygen(ikm: &[u8]) -> AskarResult<Scalar> {
    if ikm.len() < 32 {
        return Err(err_input("BLS key generation requires a seed of 32 bytes or more"));
    }
    let mut salt = sha2::Sha256::digest(KEYGEN_SALT);
    loop {
        let mut extract = hkdf::HkdfExtract::<sha2::Sha256>::new(Some(salt.as_slice()));
        extract.input_ikm(ikm);
        extract.input_ikm(&[0u8]);
        let (_, hk) = extract.finalize();
        let mut okm = [0u8; 64];
        // big-endian 48 byte output, left padded to 64
        hk.expand(&48u16.to_be_bytes(), &mut okm[16..])
            .map_err(|_| ErrorKind::Unexpected.err("HKDF expand failed"))?;
        okm.reverse();
        let scalar = Scalar::from_bytes_wide(&okm);
        if !is_zero(&scalar) {
            return Ok(scalar);
        }
        salt = sha2::Sha256::digest(salt);
    }
}

impl BlsPair {
    fn from_scalar(group: BlsGroup, secret: Scalar) -> Self {
        let public = match group {
            BlsGroup::G1 => BlsPublic::G1(G1Affine::from(G1Projective::generator() * secret)),
            BlsGroup::G2 => BlsPublic::G2(G2Affine::from(G2Projective::generator() * secret)),
        };
        Self {
            group,
            secret: Some(secret),
            public,
        }
    }

    pub fn generate(group: BlsGroup) -> AskarResult<Self> {
        Self::from_seed(group, &random::random_secret(32))
    }

    pub fn from_seed(group: BlsGroup, seed: &[u8]) -> AskarResult<Self> {
        Ok(Self::from_scalar(group, keygen(seed)?))
    }

    /// Big-endian scalar.
    pub fn from_secret_bytes(group: BlsGroup, secret: &[u8]) -> AskarResult<Self> {
        let mut le: [u8; 32] = secret
            .try_into()
            .map_err(|_| err_input("invalid BLS secret key length"))?;
        le.reverse();
        let scalar: Option<Scalar> = Scalar::from_bytes(&le).into();
        let scalar = scalar.ok_or_else(|| err_input("invalid BLS secret key"))?;
        Ok(Self::from_scalar(group, scalar))
    }

    /// Compressed point encoding.
    pub fn from_public_bytes(group: BlsGroup, public: &[u8]) -> AskarResult<Self> {
        let public = match group {
            BlsGroup::G1 => {
                let bytes: [u8; 48] = public
                    .try_into()
                    .map_err(|_| err_input("invalid BLS G1 public key length"))?;
                let point: Option<G1Affine> = G1Affine::from_compressed(&bytes).into();
                BlsPublic::G1(point.ok_or_else(|| err_input("invalid BLS G1 public key"))?)
            }
            BlsGroup::G2 => {
                let bytes: [u8; 96] = public
                    .try_into()
                    .map_err(|_| err_input("invalid BLS G2 public key length"))?;
                let point: Option<G2Affine> = G2Affine::from_compressed(&bytes).into();
                BlsPublic::G2(point.ok_or_else(|| err_input("invalid BLS G2 public key"))?)
            }
        };
        Ok(Self {
            group,
            secret: None,
            public,
        })
    }

    /// From the uncompressed `x || y` encoding used in JWKs.
    pub fn from_uncompressed(group: BlsGroup, x: &[u8], y: &[u8]) -> AskarResult<Self> {
        let mut full = x.to_vec();
        full.extend_from_slice(y);
        let public = match group {
            BlsGroup::G1 => {
                let bytes: [u8; 96] = full[..]
                    .try_into()
                    .map_err(|_| err_input("invalid BLS G1 JWK coordinates"))?;
                let point: Option<G1Affine> = G1Affine::from_uncompressed(&bytes).into();
                BlsPublic::G1(point.ok_or_else(|| err_input("invalid BLS G1 public key"))?)
            }
            BlsGroup::G2 => {
                let bytes: [u8; 192] = full[..]
                    .try_into()
                    .map_err(|_| err_input("invalid BLS G2 JWK coordinates"))?;
                let point: Option<G2Affine> = G2Affine::from_uncompressed(&bytes).into();
                BlsPublic::G2(point.ok_or_else(|| err_input("invalid BLS G2 public key"))?)
            }
        };
        Ok(Self {
            group,
            secret: None,
            public,
        })
    }

    pub fn public_bytes(&self) -> Vec<u8> {
        match &self.public {
            BlsPublic::G1(p) => p.to_compressed().to_vec(),
            BlsPublic::G2(p) => p.to_compressed().to_vec(),
        }
    }

    /// `(x, y)` halves of the uncompressed encoding.
    pub fn coordinates(&self) -> (Vec<u8>, Vec<u8>) {
        let full = match &self.public {
            BlsPublic::G1(p) => p.to_uncompressed().to_vec(),
            BlsPublic::G2(p) => p.to_uncompressed().to_vec(),
        };
        let (x, y) = full.split_at(full.len() / 2);
        (x.to_vec(), y.to_vec())
    }

    pub fn secret_bytes(&self) -> Option<SecretBytes> {
        self.secret.as_ref().map(|s| {
            let mut be = s.to_bytes();
            be.reverse();
            SecretBytes::new(be.to_vec())
        })
    }

    pub fn jwk_crv(&self) -> &'static str {
        match self.group {
            BlsGroup::G1 => "BLS12381G1",
            BlsGroup::G2 => "BLS12381G2",
        }
    }
}
