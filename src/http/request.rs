//! Request identification and the per-request context.
//!
//! # Responsibilities
//! - Assign a UUID v4 request id as early as possible and echo it back
//! - Carry everything modules and providers may look at for one request
//!
//! # Design Decisions
//! - The body is read once, bounded by `server.max_body_bytes`
//! - The cancellation token fires when the transport drops the request

use std::borrow::Cow;
use std::sync::Arc;

use axum::http::{HeaderMap, HeaderName, Method, Uri};
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

use crate::session::Session;

pub const X_REQUEST_ID: &str = "x-request-id";

/// Layer assigning `x-request-id` to requests that lack one.
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID), MakeRequestUuid)
}

/// Layer copying the request id onto the response.
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID))
}

/// One request as seen by modules and content providers.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub session: Arc<Session>,
    /// Negotiated language, when a translator is configured.
    pub language: Option<String>,
    pub cancel: CancellationToken,
}

impl RequestContext {
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// First value of a query parameter, percent-decoded.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.query()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name.as_ref())
            .and_then(|v| v.to_str().ok())
    }

    pub fn request_id(&self) -> Option<&str> {
        self.header(X_REQUEST_ID)
    }

    /// Body as text, lossily decoded.
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    #[cfg(test)]
    pub(crate) fn for_path(path: &str) -> Self {
        use crate::session::SessionOrigin;
        use std::time::{Duration, Instant};

        let session = Session::new(
            "test".to_string(),
            SessionOrigin::default(),
            Instant::now(),
            Duration::from_secs(60),
            Duration::from_secs(60),
            None,
        );
        Self {
            method: Method::GET,
            uri: path.parse().unwrap_or_default(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            session: Arc::new(session),
            language: None,
            cancel: CancellationToken::new(),
        }
    }
}
