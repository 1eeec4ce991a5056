//! Gzip codec for the compressed tier.

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("gzip stream error: {0}")]
    Io(#[from] std::io::Error),
    #[error("decompressed body is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

pub fn compress(body: &[u8]) -> Result<Bytes, CodecError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 4), Compression::default());
    encoder.write_all(body)?;
    Ok(Bytes::from(encoder.finish()?))
}

/// Inflate a stored body back into HTML text.
///
/// Truncated or corrupted input is an error, never a partial document.
pub fn decompress(bytes: &[u8]) -> Result<String, CodecError> {
    let mut decoder = GzDecoder::new(bytes);
    let mut raw = Vec::new();
    decoder.read_to_end(&mut raw)?;
    Ok(String::from_utf8(raw)?)
}
