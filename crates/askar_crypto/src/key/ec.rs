use crate::*;

/// Short-Weierstrass curve keypairs share one shape across curve crates.
macro_rules! ec_pair {
    ($name:ident, $lib:ident, $crv:literal) => {
        pub(crate) struct $name {
            pub secret: Option<$lib::SecretKey>,
            pub public: $lib::PublicKey,
        }

        impl $name {
            /// JWK curve name.
            pub const JWK_CRV: &'static str = $crv;

            pub fn generate() -> Self {
                Self::from_secret($lib::SecretKey::random(&mut rand::rngs::OsRng))
            }

            fn from_secret(secret: $lib::SecretKey) -> Self {
                let public = secret.public_key();
                Self {
                    secret: Some(secret),
                    public,
                }
            }

            pub fn from_secret_bytes(secret: &[u8]) -> AskarResult<Self> {
                if secret.len() != <$lib::FieldBytes>::default().len() {
                    return Err(err_input(concat!(
                        "invalid ",
                        $crv,
                        " secret key length"
                    )));
                }
                let secret = $lib::SecretKey::from_slice(secret)
                    .map_err(|_| err_input(concat!("invalid ", $crv, " secret key")))?;
                Ok(Self::from_secret(secret))
            }

            /// Derive a scalar from a seed, retrying out-of-range outputs.
            pub fn from_seed(seed: &[u8]) -> AskarResult<Self> {
                let len = <$lib::FieldBytes>::default().len();
                for counter in 0..16 {
                    let bytes =
                        random::expand_seed(seed, $crv.as_bytes(), counter, len)?;
                    if let Ok(secret) = $lib::SecretKey::from_slice(&bytes) {
                        return Ok(Self::from_secret(secret));
                    }
                }
                Err(ErrorKind::Unexpected.err("failed to derive key from seed"))
            }

            /// Any SEC1 encoding.
            pub fn from_public_bytes(public: &[u8]) -> AskarResult<Self> {
                let public = $lib::PublicKey::from_sec1_bytes(public)
                    .map_err(|_| err_input(concat!("invalid ", $crv, " public key")))?;
                Ok(Self {
                    secret: None,
                    public,
                })
            }

            pub fn from_coordinates(
                x: &[u8],
                y: &[u8],
                d: Option<&[u8]>,
            ) -> AskarResult<Self> {
                use $lib::elliptic_curve::sec1::FromEncodedPoint;
                let len = <$lib::FieldBytes>::default().len();
                if x.len() != len || y.len() != len {
                    return Err(err_input("invalid JWK coordinate length"));
                }
                let point = $lib::EncodedPoint::from_affine_coordinates(
                    <$lib::FieldBytes>::from_slice(x),
                    <$lib::FieldBytes>::from_slice(y),
                    false,
                );
                let public: Option<$lib::PublicKey> =
                    $lib::PublicKey::from_encoded_point(&point).into();
                let public = public.ok_or_else(|| err_input("invalid JWK coordinates"))?;
                match d {
                    Some(d) => {
                        let pair = Self::from_secret_bytes(d)?;
                        if pair.public != public {
                            return Err(err_input("JWK public key mismatch"));
                        }
                        Ok(pair)
                    }
                    None => Ok(Self {
                        secret: None,
                        public,
                    }),
                }
            }

            /// SEC1 compressed point.
            pub fn public_bytes(&self) -> Vec<u8> {
                use $lib::elliptic_curve::sec1::ToEncodedPoint;
                self.public.to_encoded_point(true).as_bytes().to_vec()
            }

            /// `(x, y)` affine coordinates.
            pub fn coordinates(&self) -> (Vec<u8>, Vec<u8>) {
                use $lib::elliptic_curve::sec1::ToEncodedPoint;
                let point = self.public.to_encoded_point(false);
                let x = point.x().map(|x| x.to_vec()).unwrap_or_default();
                let y = point.y().map(|y| y.to_vec()).unwrap_or_default();
                (x, y)
            }

            pub fn secret_bytes(&self) -> Option<SecretBytes> {
                self.secret
                    .as_ref()
                    .map(|s| SecretBytes::new(s.to_bytes().to_vec()))
            }

            pub fn sign(&self, msg: &[u8]) -> AskarResult<Vec<u8>> {
                use $lib::ecdsa::signature::Signer;
                let secret = self
                    .secret
                    .as_ref()
                    .ok_or_else(|| err_input(concat!($crv, " key has no secret")))?;
                let signing = $lib::ecdsa::SigningKey::from(secret);
                let sig: $lib::ecdsa::Signature = signing.sign(msg);
                Ok(sig.to_bytes().to_vec())
            }

            pub fn verify(&self, msg: &[u8], sig: &[u8]) -> bool {
                use $lib::ecdsa::signature::Verifier;
                let sig = match $lib::ecdsa::Signature::from_slice(sig) {
                    Ok(sig) => sig,
                    Err(_) => return false,
                };
                let verifying = $lib::ecdsa::VerifyingKey::from(&self.public);
                verifying.verify(msg, &sig).is_ok()
            }

            pub fn key_exchange(&self, other: &Self) -> AskarResult<SecretBytes> {
                let secret = self
                    .secret
                    .as_ref()
                    .ok_or_else(|| err_input(concat!($crv, " key has no secret")))?;
                let shared = $lib::ecdh::diffie_hellman(
                    secret.to_nonzero_scalar(),
                    other.public.as_affine(),
                );
                Ok(SecretBytes::new(shared.raw_secret_bytes().to_vec()))
            }
        }
    };
}

ec_pair!(K256Pair, k256, "secp256k1");
ec_pair!(P256Pair, p256, "P-256");
ec_pair!(P384Pair, p384, "P-384");
