//! Structural transcoding between compressed containers.
//!
//! A gzip member is a small header, a raw deflate stream and an 8 byte
//! trailer (CRC32 + size). Serving a gzip resource as `deflate` only needs
//! the middle part, which is returned as a slice of the original buffer.
//! The reverse direction would need the CRC of the decoded payload and is
//! not structural.

use bytes::Bytes;

use crate::compression::Encoding;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const METHOD_DEFLATE: u8 = 8;
const HEADER_LEN: usize = 10;
const TRAILER_LEN: usize = 8;

const FHCRC: u8 = 0x02;
const FEXTRA: u8 = 0x04;
const FNAME: u8 = 0x08;
const FCOMMENT: u8 = 0x10;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranscodeError {
    #[error("not a gzip stream")]
    NotGzip,

    #[error("unsupported gzip compression method {0}")]
    UnsupportedMethod(u8),

    #[error("truncated gzip stream")]
    Truncated,

    #[error("no structural transcoding from {from} to {to}")]
    Unsupported { from: Encoding, to: Encoding },
}

/// Whether `transcode(from, to, ..)` can succeed without recompression.
pub fn can_transcode(from: Encoding, to: Encoding) -> bool {
    from == to || matches!((from, to), (Encoding::Gzip, Encoding::Deflate))
}

/// Reframe `data` from one container to another.
pub fn transcode(from: Encoding, to: Encoding, data: Bytes) -> Result<Bytes, TranscodeError> {
    match (from, to) {
        (a, b) if a == b => Ok(data),
        (Encoding::Gzip, Encoding::Deflate) => gzip_to_deflate(&data),
        (from, to) => Err(TranscodeError::Unsupported { from, to }),
    }
}

/// Strip the gzip header and trailer, leaving the raw deflate stream.
pub fn gzip_to_deflate(data: &Bytes) -> Result<Bytes, TranscodeError> {
    if data.len() < HEADER_LEN + TRAILER_LEN {
        return Err(TranscodeError::Truncated);
    }
    if data[..2] != GZIP_MAGIC {
        return Err(TranscodeError::NotGzip);
    }
    if data[2] != METHOD_DEFLATE {
        return Err(TranscodeError::UnsupportedMethod(data[2]));
    }

    let flags = data[3];
    let end = data.len() - TRAILER_LEN;
    let mut pos = HEADER_LEN;

    if flags & FEXTRA != 0 {
        let len_bytes = data.get(pos..pos + 2).ok_or(TranscodeError::Truncated)?;
        let extra_len = u16::from_le_bytes([len_bytes[0], len_bytes[1]]) as usize;
        pos += 2 + extra_len;
    }
    if flags & FNAME != 0 {
        pos = skip_zero_terminated(data, pos, end)?;
    }
    if flags & FCOMMENT != 0 {
        pos = skip_zero_terminated(data, pos, end)?;
    }
    if flags & FHCRC != 0 {
        pos += 2;
    }

    if pos > end {
        return Err(TranscodeError::Truncated);
    }
    Ok(data.slice(pos..end))
}

fn skip_zero_terminated(data: &[u8], pos: usize, end: usize) -> Result<usize, TranscodeError> {
    let field = data.get(pos..end).ok_or(TranscodeError::Truncated)?;
    field
        .iter()
        .position(|b| *b == 0)
        .map(|i| pos + i + 1)
        .ok_or(TranscodeError::Truncated)
}
