//! Content-encoding negotiation and codecs.
//!
//! # Data Flow
//! ```text
//! Accept-Encoding header
//!     → negotiate.rs (parse once per raw header, pick from endpoint preferences)
//!     → transcode.rs (gzip container → raw deflate, no recompression)
//!     → codec.rs (buffered or streaming gzip/deflate via flate2)
//! ```
//!
//! `deflate` always means a raw deflate stream, both for runtime compression
//! and for transcoded gzip resources, so the two paths produce the same
//! wire format.

pub mod codec;
pub mod negotiate;
pub mod transcode;

use std::fmt;

pub use codec::{collect_body, compress, compress_stream, decompress, decompress_stream, ByteStream};
pub use negotiate::{AcceptedEncodings, CompressionPreferences, Negotiator};
pub use transcode::{can_transcode, transcode, TranscodeError};

/// A content coding the engine can produce or consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Encoding {
    Identity,
    Gzip,
    Deflate,
}

impl Encoding {
    /// Token used in `Content-Encoding` / `Accept-Encoding`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Gzip => "gzip",
            Self::Deflate => "deflate",
        }
    }

    /// Parse a normalized (lowercase) header token.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "identity" => Some(Self::Identity),
            "gzip" | "x-gzip" => Some(Self::Gzip),
            "deflate" => Some(Self::Deflate),
            _ => None,
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compression effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Level {
    #[default]
    Fast,
    Default,
    Best,
}

impl From<Level> for flate2::Compression {
    fn from(level: Level) -> Self {
        match level {
            Level::Fast => flate2::Compression::fast(),
            Level::Default => flate2::Compression::default(),
            Level::Best => flate2::Compression::best(),
        }
    }
}

/// Encoder and level selected for one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionChoice {
    pub encoding: Encoding,
    pub level: Level,
}

impl CompressionChoice {
    /// Cached responses are reused many times, so they get the strongest
    /// level regardless of the endpoint default.
    pub fn escalated(self) -> Self {
        Self {
            level: Level::Best,
            ..self
        }
    }
}
