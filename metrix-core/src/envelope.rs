//! Delivery envelope: the framing a JSON body gets on the wire.
//!
//! The signature is always computed over the uncompressed JSON, so a receiver
//! decompresses first and verifies second.

use crate::error::{MetrixError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::io::{Read, Write};

/// Header carrying the hex HMAC-SHA256 of the JSON body.
pub const HASH_HEADER: &str = "HashSHA256";

type HmacSha256 = Hmac<Sha256>;

fn keyed(key: &str) -> Result<HmacSha256> {
    <HmacSha256 as Mac>::new_from_slice(key.as_bytes())
        .map_err(|_| MetrixError::InvalidConfig { reason: "unusable signing key".to_string() })
}

/// Hex-encoded HMAC-SHA256 of `body` under `key`.
pub fn sign(body: &[u8], key: &str) -> Result<String> {
    let mut mac = keyed(key)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a declared hex signature.
pub fn verify(body: &[u8], key: &str, declared: &str) -> bool {
    let (Ok(declared), Ok(mut mac)) = (hex::decode(declared.trim()), keyed(key)) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&declared).is_ok()
}

pub fn compress(body: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 2), Compression::default());
    let failed = |e: std::io::Error| MetrixError::CompressionFailed { reason: e.to_string() };
    encoder.write_all(body).map_err(failed)?;
    encoder.finish().map_err(failed)
}

/// Largest body [`decompress`] inflates.
pub const MAX_DECODED_BYTES: usize = 16 * 1024 * 1024;

pub fn decompress(body: &[u8]) -> Result<Vec<u8>> {
    decompress_limited(body, MAX_DECODED_BYTES)
}

/// Inflate `body`, failing once the output would grow past `limit` bytes.
pub fn decompress_limited(body: &[u8], limit: usize) -> Result<Vec<u8>> {
    let mut decoded = Vec::new();
    GzDecoder::new(body)
        .take(limit as u64 + 1)
        .read_to_end(&mut decoded)
        .map_err(|e| MetrixError::CompressionFailed { reason: e.to_string() })?;
    if decoded.len() > limit {
        return Err(MetrixError::CompressionFailed {
            reason: format!("decoded body exceeds {} bytes", limit),
        });
    }
    Ok(decoded)
}

/// A sealed request body plus the headers that describe it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub body: Vec<u8>,
    /// Set when `body` is gzip-compressed.
    pub gzip: bool,
    /// Hex HMAC of the JSON before compression.
    pub signature: Option<String>,
}

impl Envelope {
    /// Sign `json` when a key is given, then optionally compress it.
    pub fn seal(json: Vec<u8>, gzip: bool, key: Option<&str>) -> Result<Self> {
        let signature = key.map(|key| sign(&json, key)).transpose()?;
        let body = if gzip { compress(&json)? } else { json };
        Ok(Self { body, gzip, signature })
    }

    /// Undo [`Envelope::seal`]: decompress and check the signature when a key is given.
    ///
    /// Returns the JSON, or `SignatureMismatch` when the signature is missing or wrong.
    pub fn open(self, key: Option<&str>) -> Result<Vec<u8>> {
        let json = if self.gzip { decompress(&self.body)? } else { self.body };
        if let Some(key) = key {
            let declared = self.signature.as_deref().unwrap_or_default();
            if !verify(&json, key, declared) {
                return Err(MetrixError::SignatureMismatch);
            }
        }
        Ok(json)
    }
}
