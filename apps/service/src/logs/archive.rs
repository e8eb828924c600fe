//! Encoding of rotated log artifacts: gzip, then base64.

use std::io::{Read, Write};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

pub const ARCHIVE_EXTENSION: &str = ".gz.b64";

pub fn compress(contents: &str) -> std::io::Result<String> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(contents.as_bytes())?;
    let gzipped = encoder.finish()?;
    Ok(STANDARD.encode(gzipped))
}

pub fn decompress(encoded: &str) -> std::io::Result<String> {
    let gzipped = STANDARD
        .decode(encoded.trim())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let mut contents = String::new();
    GzDecoder::new(gzipped.as_slice()).read_to_string(&mut contents)?;
    Ok(contents)
}
