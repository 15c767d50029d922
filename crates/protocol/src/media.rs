//! Image format sniffing and self-describing payloads
//!
//! Scanned bytes arrive with no metadata. The leading magic bytes decide the
//! media type; anything unrecognized is generic binary. Results travel to the
//! UI as `data:{media type};base64,{bytes}` strings.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::fmt;

const JPEG_MAGIC: [u8; 2] = [0xFF, 0xD8];
const PNG_MAGIC: [u8; 4] = [0x89, 0x50, 0x4E, 0x47];

/// Inferred encoding of a scanned buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Jpeg,
    Png,
    OctetStream,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Jpeg => "image/jpeg",
            MediaType::Png => "image/png",
            MediaType::OctetStream => "application/octet-stream",
        }
    }

    /// Conventional file extension, used when writing scans to disk
    pub fn extension(&self) -> &'static str {
        match self {
            MediaType::Jpeg => "jpg",
            MediaType::Png => "png",
            MediaType::OctetStream => "bin",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "image/jpeg" => Some(MediaType::Jpeg),
            "image/png" => Some(MediaType::Png),
            "application/octet-stream" => Some(MediaType::OctetStream),
            _ => None,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a buffer by its magic bytes
///
/// Total and deterministic: short or empty buffers are generic binary.
pub fn sniff(bytes: &[u8]) -> MediaType {
    if bytes.starts_with(&JPEG_MAGIC) {
        MediaType::Jpeg
    } else if bytes.starts_with(&PNG_MAGIC) {
        MediaType::Png
    } else {
        MediaType::OctetStream
    }
}

/// Encode bytes as a `data:` URL
pub fn encode_data_url(media_type: MediaType, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", media_type, STANDARD.encode(bytes))
}

/// Reasons a `data:` URL cannot be decoded
#[derive(Debug, thiserror::Error)]
pub enum DataUrlError {
    #[error("missing data: prefix or ;base64, separator")]
    Malformed,
    #[error("unknown media type: {0}")]
    UnknownMediaType(String),
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Decode a `data:` URL produced by [`encode_data_url`]
pub fn decode_data_url(url: &str) -> Result<(MediaType, Vec<u8>), DataUrlError> {
    let rest = url.strip_prefix("data:").ok_or(DataUrlError::Malformed)?;
    let (media, encoded) = rest.split_once(";base64,").ok_or(DataUrlError::Malformed)?;
    let media_type =
        MediaType::parse(media).ok_or_else(|| DataUrlError::UnknownMediaType(media.to_string()))?;
    Ok((media_type, STANDARD.decode(encoded)?))
}

/// Classified bytes from one completed scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub bytes: Vec<u8>,
    pub media_type: MediaType,
    /// The single bulk read filled its whole buffer, so the image may continue
    /// past what was collected
    pub possibly_truncated: bool,
}

impl ScanResult {
    /// Classify a buffer read with the given chunk ceiling
    pub fn from_chunk(bytes: Vec<u8>, chunk_size: usize) -> Self {
        let media_type = sniff(&bytes);
        let possibly_truncated = bytes.len() >= chunk_size;
        Self {
            bytes,
            media_type,
            possibly_truncated,
        }
    }

    pub fn data_url(&self) -> String {
        encode_data_url(self.media_type, &self.bytes)
    }
}
