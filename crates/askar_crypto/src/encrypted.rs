/// The output of an AEAD encryption: `ciphertext || tag || nonce`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Encrypted {
    buffer: Vec<u8>,
    tag_pos: usize,
    nonce_pos: usize,
}

impl Encrypted {
    pub(crate) fn new(
        mut ciphertext_with_tag: Vec<u8>,
        tag_len: usize,
        nonce: &[u8],
    ) -> Self {
        let nonce_pos = ciphertext_with_tag.len();
        let tag_pos = nonce_pos.saturating_sub(tag_len);
        ciphertext_with_tag.extend_from_slice(nonce);
        Self {
            buffer: ciphertext_with_tag,
            tag_pos,
            nonce_pos,
        }
    }

    /// The ciphertext without the tag.
    pub fn ciphertext(&self) -> &[u8] {
        &self.buffer[..self.tag_pos]
    }

    /// The authentication tag.
    pub fn tag(&self) -> &[u8] {
        &self.buffer[self.tag_pos..self.nonce_pos]
    }

    /// The nonce used for encryption.
    pub fn nonce(&self) -> &[u8] {
        &self.buffer[self.nonce_pos..]
    }

    /// The ciphertext followed by the tag.
    pub fn ciphertext_with_tag(&self) -> &[u8] {
        &self.buffer[..self.nonce_pos]
    }

    /// `(ciphertext, tag, nonce)`
    pub fn parts(&self) -> (&[u8], &[u8], &[u8]) {
        (self.ciphertext(), self.tag(), self.nonce())
    }

    /// Consume into the raw `ciphertext || tag || nonce` buffer.
    pub fn into_vec(self) -> Vec<u8> {
        self.buffer
    }
}
