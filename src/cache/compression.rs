//! Remote Value Codec
//!
//! Values written to the remote tier are framed with a one-byte tag
//! followed by the payload:
//!
//! ```text
//!   ┌─────┬──────────────────────────────┐
//!   │ tag │ payload                      │
//!   └─────┴──────────────────────────────┘
//!     0x00  raw bytes
//!     0x01  LZ4 block with size prefix
//! ```
//!
//! Small values, and values that do not shrink, are stored raw.

use bytes::{BufMut, Bytes, BytesMut};

use crate::config::CompressionConfig;
use crate::error::{Error, Result};

const TAG_RAW: u8 = 0x00;
const TAG_LZ4: u8 = 0x01;

/// Encoding chosen for one value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Raw,
    Lz4,
}

impl Encoding {
    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Raw => "raw",
            Encoding::Lz4 => "lz4",
        }
    }

    fn tag(&self) -> u8 {
        match self {
            Encoding::Raw => TAG_RAW,
            Encoding::Lz4 => TAG_LZ4,
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Frames values for the remote tier
#[derive(Debug, Clone)]
pub struct ValueCodec {
    enabled: bool,
    min_size_bytes: usize,
    level: i32,
}

impl ValueCodec {
    pub fn new(config: &CompressionConfig) -> Self {
        Self {
            enabled: config.enabled,
            min_size_bytes: config.min_size_bytes,
            level: config.level,
        }
    }

    /// Codec that never compresses
    pub fn raw() -> Self {
        Self {
            enabled: false,
            min_size_bytes: usize::MAX,
            level: 0,
        }
    }

    /// Frame a value, compressing when enabled and worthwhile.
    ///
    /// Compression failures fall back to a raw frame.
    pub fn encode(&self, value: &[u8]) -> Bytes {
        if self.enabled && value.len() >= self.min_size_bytes {
            match self.compress(value) {
                Ok(compressed) if compressed.len() < value.len() => {
                    return frame(Encoding::Lz4, &compressed);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Compression failed, storing raw"),
            }
        }
        frame(Encoding::Raw, value)
    }

    /// Strip the frame and decompress if needed.
    pub fn decode(&self, framed: &[u8]) -> Result<Bytes> {
        let (&tag, payload) = framed.split_first().ok_or_else(|| Error::DecompressionFailed {
            algorithm: "frame".into(),
            reason: "empty value".into(),
        })?;
        match tag {
            TAG_RAW => Ok(Bytes::copy_from_slice(payload)),
            TAG_LZ4 => lz4::block::decompress(payload, None)
                .map(Bytes::from)
                .map_err(|e| Error::DecompressionFailed {
                    algorithm: Encoding::Lz4.name().into(),
                    reason: e.to_string(),
                }),
            other => Err(Error::DecompressionFailed {
                algorithm: "frame".into(),
                reason: format!("unknown tag 0x{other:02x}"),
            }),
        }
    }

    /// Encoding used by a framed value, if recognizable
    pub fn encoding_of(framed: &[u8]) -> Option<Encoding> {
        match framed.first() {
            Some(&TAG_RAW) => Some(Encoding::Raw),
            Some(&TAG_LZ4) => Some(Encoding::Lz4),
            _ => None,
        }
    }

    fn compress(&self, value: &[u8]) -> Result<Vec<u8>> {
        lz4::block::compress(
            value,
            Some(lz4::block::CompressionMode::HIGHCOMPRESSION(self.level)),
            true,
        )
        .map_err(|e| Error::CompressionFailed {
            algorithm: Encoding::Lz4.name().into(),
            reason: e.to_string(),
        })
    }
}

fn frame(encoding: Encoding, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + 1);
    buf.put_u8(encoding.tag());
    buf.put_slice(payload);
    buf.freeze()
}
