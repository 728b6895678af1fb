use crate::*;
use sha2::Digest;

/// Context inputs to the NIST SP 800-56A Concat KDF, as used by JWA.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcatKdfParams<'p> {
    /// AlgorithmID (length prefixed)
    pub alg: &'p [u8],
    /// PartyUInfo (length prefixed)
    pub apu: &'p [u8],
    /// PartyVInfo (length prefixed)
    pub apv: &'p [u8],
    /// SuppPubInfo (raw)
    pub pub_info: &'p [u8],
    /// SuppPrivInfo (raw)
    pub prv_info: &'p [u8],
}

fn push_prefixed(buf: &mut Vec<u8>, data: &[u8]) {
    buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
    buf.extend_from_slice(data);
}

/// Fill `output` with SHA-256 Concat KDF output over shared secret `z`.
pub fn concat_kdf(
    z: &[u8],
    params: &ConcatKdfParams<'_>,
    output: &mut [u8],
) -> AskarResult<()> {
    if output.is_empty() || output.len() > 64 {
        return Err(err_input("unsupported Concat KDF output length"));
    }
    let mut other_info = Vec::new();
    push_prefixed(&mut other_info, params.alg);
    push_prefixed(&mut other_info, params.apu);
    push_prefixed(&mut other_info, params.apv);
    other_info.extend_from_slice(params.pub_info);
    other_info.extend_from_slice(params.prv_info);

    let mut counter = 1u32;
    let mut pos = 0;
    while pos < output.len() {
        let mut hasher = sha2::Sha256::new();
        hasher.update(counter.to_be_bytes());
        hasher.update(z);
        hasher.update(&other_info);
        let round = hasher.finalize();
        let take = (output.len() - pos).min(round.len());
        output[pos..pos + take].copy_from_slice(&round[..take]);
        pos += take;
        counter += 1;
    }
    Ok(())
}
