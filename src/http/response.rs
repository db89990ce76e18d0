//! Response assembly.
//!
//! # Responsibilities
//! - Build pipeline responses with the right caching and encoding headers
//! - Replay cached responses
//! - Compare entity tags for conditional requests
//!
//! # Design Decisions
//! - HEAD responses carry `Content-Length` but no body
//! - Headers that fail to encode are dropped rather than failing the request
//! - 304 responses never carry `Content-Encoding`

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;

use crate::cache::CachedResponse;
use crate::compression::{ByteStream, Encoding};

/// Quote a raw tag unless it already is an entity tag.
pub fn quote_etag(tag: &str) -> String {
    if tag.starts_with('"') || tag.starts_with("W/\"") {
        tag.to_string()
    } else {
        format!("\"{tag}\"")
    }
}

/// ETag of a localized resource: the language becomes part of the tag.
pub fn localized_etag(tag: &str, language: Option<&str>) -> String {
    let bare = tag.trim_start_matches("W/").trim_matches('"');
    match language {
        Some(lang) => quote_etag(&format!("{bare}-{lang}")),
        None => quote_etag(bare),
    }
}

/// Weak comparison of an `If-None-Match` value against `etag`.
pub fn etag_matches(if_none_match: &str, etag: &str) -> bool {
    let strip = |t: &str| t.trim().trim_start_matches("W/").to_string();
    let wanted = strip(etag);
    if_none_match
        .split(',')
        .any(|candidate| candidate.trim() == "*" || strip(candidate) == wanted)
}

/// `Cache-Control` for a client cache duration.
pub fn cache_control(client_cache: Duration, private: bool) -> String {
    match client_cache.as_secs() {
        0 => "no-cache".to_string(),
        secs if private => format!("private, max-age={secs}"),
        secs => format!("public, max-age={secs}"),
    }
}

pub(crate) fn insert(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => tracing::warn!(header = %name, "Dropping unencodable header value"),
    }
}

/// Body of a response under construction.
pub enum Payload {
    Bytes(Bytes),
    Stream(ByteStream),
}

/// Everything the final write step needs.
pub struct Outgoing<'a> {
    pub status: StatusCode,
    pub payload: Payload,
    pub encoding: Option<Encoding>,
    pub content_type: Option<&'a str>,
    pub etag: Option<&'a str>,
    pub cache_control: &'a str,
    pub content_range: Option<String>,
    /// Response differs by `Accept-Encoding`.
    pub vary_encoding: bool,
}

impl Outgoing<'_> {
    pub fn into_response(self, head: bool) -> Response {
        let mut length = None;
        let body = match self.payload {
            Payload::Bytes(bytes) => {
                length = Some(bytes.len());
                if head {
                    Body::empty()
                } else {
                    Body::from(bytes)
                }
            }
            Payload::Stream(_) if head => Body::empty(),
            Payload::Stream(stream) => Body::from_stream(stream),
        };

        let mut response = Response::new(body);
        *response.status_mut() = self.status;
        let headers = response.headers_mut();

        insert(headers, header::CACHE_CONTROL, self.cache_control);
        if let Some(etag) = self.etag {
            insert(headers, header::ETAG, etag);
        }
        if let Some(content_type) = self.content_type {
            insert(headers, header::CONTENT_TYPE, content_type);
        }
        if let Some(encoding) = self.encoding.filter(|e| *e != Encoding::Identity) {
            insert(headers, header::CONTENT_ENCODING, encoding.as_str());
        }
        if let Some(range) = &self.content_range {
            insert(headers, header::CONTENT_RANGE, range);
        }
        if self.vary_encoding {
            insert(headers, header::VARY, "Accept-Encoding");
        }
        if let Some(length) = length {
            if self.encoding.is_none() {
                insert(headers, header::ACCEPT_RANGES, "bytes");
            }
            if head {
                insert(headers, header::CONTENT_LENGTH, &length.to_string());
            }
        }
        response
    }
}

/// Replay a cache hit.
pub fn from_cache(cached: &CachedResponse, head: bool) -> Response {
    Outgoing {
        status: StatusCode::OK,
        payload: Payload::Bytes(cached.body.clone()),
        encoding: cached.content_encoding,
        content_type: cached.content_type.as_deref(),
        etag: cached.etag.as_deref(),
        cache_control: &cached.cache_control,
        content_range: None,
        vary_encoding: true,
    }
    .into_response(head)
}

pub fn not_modified(etag: &str, cache_control: &str) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NOT_MODIFIED;
    insert(response.headers_mut(), header::ETAG, etag);
    insert(response.headers_mut(), header::CACHE_CONTROL, cache_control);
    response
}

pub fn redirect(location: &str) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::FOUND;
    insert(response.headers_mut(), header::LOCATION, location);
    insert(response.headers_mut(), header::CACHE_CONTROL, "no-store");
    response
}

/// Plain-text response, body omitted for HEAD.
pub fn text(status: StatusCode, message: String, head: bool) -> Response {
    let payload = Payload::Bytes(Bytes::from(message));
    Outgoing {
        status,
        payload,
        encoding: None,
        content_type: Some("text/plain; charset=utf-8"),
        etag: None,
        cache_control: "no-store",
        content_range: None,
        vary_encoding: false,
    }
    .into_response(head)
}
