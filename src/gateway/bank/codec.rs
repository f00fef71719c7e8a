//! Legacy wire codec
//!
//! AES-128-CBC with an all-zero IV and no authentication. Plaintext is
//! ISO-8859-1, zero-padded up to the block size (no extra block when already
//! aligned), and travels base64-encoded. Padding is not self-describing, so
//! the caller tells [`LegacyCipher::open`] where the payload ends.

use aes::Aes128;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use thiserror::Error;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

pub const BLOCK_SIZE: usize = 16;
const ZERO_IV: [u8; BLOCK_SIZE] = [0; BLOCK_SIZE];

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid cipher key: {0}")]
    InvalidKey(String),

    #[error("character {0:?} has no ISO-8859-1 encoding")]
    Unencodable(char),

    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("ciphertext of {0} bytes is not block aligned")]
    Misaligned(usize),

    #[error("payload boundary not found: {0}")]
    Unframed(String),
}

/// Where a decrypted payload ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Payload is exactly this many bytes
    Exact(usize),
    /// Markup document: ends at the last `>`
    Document,
}

#[derive(Clone)]
pub struct LegacyCipher {
    key: [u8; BLOCK_SIZE],
}

impl std::fmt::Debug for LegacyCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LegacyCipher(..)")
    }
}

impl LegacyCipher {
    /// Key is the hex concatenation of two configured halves
    pub fn from_halves(key1: &str, key2: &str) -> Result<Self, CodecError> {
        let bytes = hex::decode(format!("{}{}", key1.trim(), key2.trim()))
            .map_err(|e| CodecError::InvalidKey(e.to_string()))?;
        let key: [u8; BLOCK_SIZE] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            CodecError::InvalidKey(format!("expected {} bytes, got {}", BLOCK_SIZE, bytes.len()))
        })?;
        Ok(Self { key })
    }

    /// ISO-8859-1 encode, zero-pad, encrypt, base64
    pub fn seal(&self, text: &str) -> Result<String, CodecError> {
        let mut plain = encode_latin1(text)?;
        let remainder = plain.len() % BLOCK_SIZE;
        if remainder != 0 {
            plain.resize(plain.len() + BLOCK_SIZE - remainder, 0);
        }
        let encrypted = Aes128CbcEnc::new(&self.key.into(), &ZERO_IV.into())
            .encrypt_padded_vec_mut::<NoPadding>(&plain);
        Ok(BASE64.encode(encrypted))
    }

    /// base64, decrypt, cut at the payload boundary, ISO-8859-1 decode
    pub fn open(&self, sealed: &str, framing: Framing) -> Result<String, CodecError> {
        let encrypted = BASE64.decode(sealed.trim())?;
        if encrypted.len() % BLOCK_SIZE != 0 {
            return Err(CodecError::Misaligned(encrypted.len()));
        }
        let plain = Aes128CbcDec::new(&self.key.into(), &ZERO_IV.into())
            .decrypt_padded_vec_mut::<NoPadding>(&encrypted)
            .map_err(|_| CodecError::Misaligned(encrypted.len()))?;

        let payload = match framing {
            Framing::Exact(len) => plain.get(..len).ok_or_else(|| {
                CodecError::Unframed(format!("{} bytes requested, {} decrypted", len, plain.len()))
            })?,
            Framing::Document => {
                let end = plain
                    .iter()
                    .rposition(|&b| b == b'>')
                    .ok_or_else(|| CodecError::Unframed("no closing '>'".to_string()))?;
                &plain[..=end]
            }
        };
        Ok(decode_latin1(payload))
    }
}

pub fn encode_latin1(text: &str) -> Result<Vec<u8>, CodecError> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).map_err(|_| CodecError::Unencodable(c)))
        .collect()
}

pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}
