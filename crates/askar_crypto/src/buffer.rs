use zeroize::Zeroizing;

/// Secret byte buffer, zeroed on drop.
pub type SecretBytes = Zeroizing<Vec<u8>>;

/// Copy a slice into a new [`SecretBytes`].
pub fn secret_bytes_from(data: &[u8]) -> SecretBytes {
    Zeroizing::new(data.to_vec())
}
