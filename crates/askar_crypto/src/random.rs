//! Random and seed-derived byte generation.

use crate::*;
use rand::RngCore;

/// Fill a buffer with random bytes from the operating system.
pub fn fill_random(buf: &mut [u8]) {
    rand::rngs::OsRng.fill_bytes(buf);
}

/// Generate a vec of random bytes.
pub fn random_vec(len: usize) -> Vec<u8> {
    let mut out = vec![0; len];
    fill_random(&mut out);
    out
}

/// Generate random secret bytes.
pub fn random_secret(len: usize) -> SecretBytes {
    let mut out = SecretBytes::new(vec![0; len]);
    fill_random(&mut out);
    out
}

/// Deterministically expand a seed into `len` bytes of key material.
///
/// `counter` lets callers retry when the output is not a valid key.
pub fn expand_seed(
    seed: &[u8],
    info: &[u8],
    counter: u32,
    len: usize,
) -> AskarResult<SecretBytes> {
    if seed.len() < 16 {
        return Err(err_input("seed must be at least 16 bytes"));
    }
    let hk = hkdf::Hkdf::<sha2::Sha256>::new(Some(b"askar-seed-expand"), seed);
    let mut full_info = info.to_vec();
    full_info.extend_from_slice(&counter.to_be_bytes());
    let mut out = SecretBytes::new(vec![0; len]);
    hk.expand(&full_info, &mut out)
        .map_err(|_| err_input("invalid seed expansion length"))?;
    Ok(out)
}
