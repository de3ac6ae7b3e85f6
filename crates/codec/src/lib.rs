//! Payload codec pipeline: compression and symmetric encryption applied to
//! messages on the send path, with the inverse applied on receive.
//!
//! Order is fixed: compress then encrypt on send; decrypt then decompress on
//! receive. Both stages mark their work in the reserved message properties
//! (`Compressed`, `Encrypted`) so the inverse can recover the algorithm.

mod compress;
mod encrypt;
mod stats;

pub use compress::{compress_message, decompress_message};
pub use encrypt::{decrypt_message, encrypt_message};
pub use stats::{CompressionTracker, EncryptionTracker};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CompressionAlgorithm {
    #[default]
    None,
    Gzip,
    Lz4,
    Zstd,
    Snappy,
}

impl CompressionAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "NONE",
            CompressionAlgorithm::Gzip => "GZIP",
            CompressionAlgorithm::Lz4 => "LZ4",
            CompressionAlgorithm::Zstd => "ZSTD",
            CompressionAlgorithm::Snappy => "SNAPPY",
        }
    }

    pub fn from_str_name(name: &str) -> Option<Self> {
        match name {
            "NONE" => Some(CompressionAlgorithm::None),
            "GZIP" => Some(CompressionAlgorithm::Gzip),
            "LZ4" => Some(CompressionAlgorithm::Lz4),
            "ZSTD" => Some(CompressionAlgorithm::Zstd),
            "SNAPPY" => Some(CompressionAlgorithm::Snappy),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EncryptionAlgorithm {
    #[default]
    None,
    Aes256Gcm,
    ChaCha20Poly1305,
    Aes128Cbc,
}

impl EncryptionAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncryptionAlgorithm::None => "NONE",
            EncryptionAlgorithm::Aes256Gcm => "AES_256_GCM",
            EncryptionAlgorithm::ChaCha20Poly1305 => "CHACHA20_POLY1305",
            EncryptionAlgorithm::Aes128Cbc => "AES_128_CBC",
        }
    }

    pub fn from_str_name(name: &str) -> Option<Self> {
        match name {
            "NONE" => Some(EncryptionAlgorithm::None),
            "AES_256_GCM" => Some(EncryptionAlgorithm::Aes256Gcm),
            "CHACHA20_POLY1305" => Some(EncryptionAlgorithm::ChaCha20Poly1305),
            "AES_128_CBC" => Some(EncryptionAlgorithm::Aes128Cbc),
            _ => None,
        }
    }

    pub fn key_len(&self) -> usize {
        match self {
            EncryptionAlgorithm::None => 0,
            EncryptionAlgorithm::Aes256Gcm | EncryptionAlgorithm::ChaCha20Poly1305 => 32,
            EncryptionAlgorithm::Aes128Cbc => 16,
        }
    }

    /// Minimum IV/nonce length; longer values are truncated.
    pub fn iv_len(&self) -> usize {
        match self {
            EncryptionAlgorithm::None => 0,
            EncryptionAlgorithm::Aes256Gcm | EncryptionAlgorithm::ChaCha20Poly1305 => 12,
            EncryptionAlgorithm::Aes128Cbc => 16,
        }
    }
}

fn default_level() -> u32 {
    6
}
fn default_min_size() -> usize {
    1024
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    #[serde(default)]
    pub algorithm: CompressionAlgorithm,
    /// 1-9; higher trades speed for ratio. Gzip and zstd honor it.
    #[serde(default = "default_level")]
    pub level: u32,
    /// Payloads below this size are sent uncompressed.
    #[serde(default = "default_min_size")]
    pub min_size: usize,
    #[serde(default = "default_true")]
    pub enable_auto_compression: bool,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        CompressionConfig {
            algorithm: CompressionAlgorithm::None,
            level: default_level(),
            min_size: default_min_size(),
            enable_auto_compression: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EncryptionConfig {
    #[serde(default)]
    pub algorithm: EncryptionAlgorithm,
    /// Raw key bytes; must be exactly `algorithm.key_len()` long.
    #[serde(default)]
    pub key: String,
    /// IV/nonce; at least `algorithm.iv_len()` bytes, extra bytes ignored.
    #[serde(default)]
    pub iv: String,
    #[serde(default = "default_true")]
    pub enable_auto_encryption: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("unsupported algorithm: {0}")]
    AlgorithmUnsupported(&'static str),
    #[error("corrupted input: {0}")]
    CorruptedInput(String),
    #[error("invalid key: {0}")]
    KeyInvalid(String),
    #[error("invalid IV: {0}")]
    IvInvalid(String),
    #[error("authentication failed during decryption")]
    AuthFailure,
    #[error("output buffer too small")]
    BufferTooSmall,
}
