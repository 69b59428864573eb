//! AES-256-CTR keystream shared by both directions of a Security1 session

use aes::Aes256;
use ctr::Ctr128BE;
use ctr::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 16;

/// Encrypt or decrypt `data` with the keystream starting at byte `offset`
pub fn process(data: &[u8], key: &[u8; KEY_LEN], nonce: &[u8; NONCE_LEN], offset: u64) -> Vec<u8> {
    let mut cipher = Ctr128BE::<Aes256>::new(key.into(), nonce.into());
    cipher.seek(offset);
    let mut out = data.to_vec();
    cipher.apply_keystream(&mut out);
    out
}

/// Live session keystream
///
/// Every message, sent or received, consumes keystream in order. The offset
/// only ever moves forward; a fresh handshake builds a new session.
pub struct CipherSession {
    key: [u8; KEY_LEN],
    nonce: [u8; NONCE_LEN],
    offset: u64,
}

impl CipherSession {
    pub fn new(key: [u8; KEY_LEN], nonce: [u8; NONCE_LEN]) -> Self {
        Self { key, nonce, offset: 0 }
    }

    pub fn apply(&mut self, data: &[u8]) -> Vec<u8> {
        let out = process(data, &self.key, &self.nonce, self.offset);
        self.offset += data.len() as u64;
        tracing::trace!(offset = self.offset, len = data.len(), "keystream advanced");
        out
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl std::fmt::Debug for CipherSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherSession")
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}
