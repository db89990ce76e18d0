//! gzip / deflate codecs, buffered and streaming.
//!
//! Streaming variants keep a single encoder for the whole body so the
//! dictionary carries across chunks; compressed output is drained from the
//! encoder's inner buffer after every input chunk.

use std::io::{self, Cursor, Read, Write};

use bytes::Bytes;
use flate2::read::{DeflateDecoder, MultiGzDecoder};
use flate2::write::{DeflateEncoder, GzEncoder};
use futures_util::stream::{self, BoxStream, StreamExt};

use crate::compression::{Encoding, Level};

/// Body stream handed between content providers, codecs and the transport.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Output chunk size of streaming decompression.
const DECODE_CHUNK: usize = 16 * 1024;

/// Compress a complete buffer.
pub fn compress(data: &[u8], encoding: Encoding, level: Level) -> io::Result<Bytes> {
    match encoding {
        Encoding::Identity => Ok(Bytes::copy_from_slice(data)),
        Encoding::Gzip => {
            let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), level.into());
            encoder.write_all(data)?;
            Ok(Bytes::from(encoder.finish()?))
        }
        Encoding::Deflate => {
            let mut encoder =
                DeflateEncoder::new(Vec::with_capacity(data.len() / 2), level.into());
            encoder.write_all(data)?;
            Ok(Bytes::from(encoder.finish()?))
        }
    }
}

/// Decompress a complete buffer.
pub fn decompress(data: &[u8], encoding: Encoding) -> io::Result<Bytes> {
    let mut out = Vec::with_capacity(data.len() * 3);
    match encoding {
        Encoding::Identity => return Ok(Bytes::copy_from_slice(data)),
        Encoding::Gzip => MultiGzDecoder::new(data).read_to_end(&mut out)?,
        Encoding::Deflate => DeflateDecoder::new(data).read_to_end(&mut out)?,
    };
    Ok(Bytes::from(out))
}

enum StreamEncoder {
    Gzip(GzEncoder<Vec<u8>>),
    Deflate(DeflateEncoder<Vec<u8>>),
}

impl StreamEncoder {
    fn new(encoding: Encoding, level: Level) -> Option<Self> {
        match encoding {
            Encoding::Identity => None,
            Encoding::Gzip => Some(Self::Gzip(GzEncoder::new(Vec::new(), level.into()))),
            Encoding::Deflate => Some(Self::Deflate(DeflateEncoder::new(Vec::new(), level.into()))),
        }
    }

    fn write(&mut self, chunk: &[u8]) -> io::Result<Bytes> {
        let drained = match self {
            Self::Gzip(encoder) => {
                encoder.write_all(chunk)?;
                std::mem::take(encoder.get_mut())
            }
            Self::Deflate(encoder) => {
                encoder.write_all(chunk)?;
                std::mem::take(encoder.get_mut())
            }
        };
        Ok(Bytes::from(drained))
    }

    fn finish(self) -> io::Result<Bytes> {
        let rest = match self {
            Self::Gzip(encoder) => encoder.finish()?,
            Self::Deflate(encoder) => encoder.finish()?,
        };
        Ok(Bytes::from(rest))
    }
}

/// Compress a body stream on the fly.
pub fn compress_stream(input: ByteStream, encoding: Encoding, level: Level) -> ByteStream {
    let Some(encoder) = StreamEncoder::new(encoding, level) else {
        return input;
    };

    stream::unfold(Some((input, encoder)), |state| async move {
        let (mut input, mut encoder) = state?;
        loop {
            match input.next().await {
                Some(Ok(chunk)) => match encoder.write(&chunk) {
                    Ok(out) if out.is_empty() => continue,
                    Ok(out) => return Some((Ok(out), Some((input, encoder)))),
                    Err(e) => return Some((Err(e), None)),
                },
                Some(Err(e)) => return Some((Err(e), None)),
                None => return Some((encoder.finish(), None)),
            }
        }
    })
    .boxed()
}

/// Decompress a stored buffer chunk by chunk, without materializing the
/// whole decoded body.
pub fn decompress_stream(data: Bytes, encoding: Encoding) -> ByteStream {
    let reader: Box<dyn Read + Send> = match encoding {
        Encoding::Identity => return stream::once(async move { Ok(data) }).boxed(),
        Encoding::Gzip => Box::new(MultiGzDecoder::new(Cursor::new(data))),
        Encoding::Deflate => Box::new(DeflateDecoder::new(Cursor::new(data))),
    };

    stream::unfold(Some(reader), |state| async move {
        let mut reader = state?;
        let mut buf = vec![0u8; DECODE_CHUNK];
        match reader.read(&mut buf) {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(Bytes::from(buf)), Some(reader)))
            }
            Err(e) => Some((Err(e), None)),
        }
    })
    .boxed()
}

/// Collect a body stream into one buffer.
pub async fn collect_body(mut input: ByteStream) -> io::Result<Bytes> {
    let mut out = Vec::new();
    while let Some(chunk) = input.next().await {
        out.extend_from_slice(&chunk?);
    }
    Ok(Bytes::from(out))
}
