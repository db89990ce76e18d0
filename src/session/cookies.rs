//! Session and device-id cookies.

use axum::http::{header, HeaderMap, HeaderValue};

use crate::config::EngineConfig;

const ATTRIBUTES: &str = "Path=/;HttpOnly";
const CROSS_ORIGIN_ATTRIBUTES: &str = "Path=/;HttpOnly;SameSite=None;Secure";

/// Cookie names with the `{server}` placeholder resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieNames {
    pub session: String,
    pub device: String,
    pub cross_origin: bool,
}

impl CookieNames {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            session: config.server.resolve_name(&config.sessions.cookie_name),
            device: config.server.resolve_name(&config.sessions.device_cookie_name),
            cross_origin: config.server.cross_origin_embed,
        }
    }

    pub fn attributes(&self) -> &'static str {
        if self.cross_origin {
            CROSS_ORIGIN_ATTRIBUTES
        } else {
            ATTRIBUTES
        }
    }

    /// `Set-Cookie` value for `name=value`.
    pub fn set_cookie(&self, name: &str, value: &str) -> Option<HeaderValue> {
        HeaderValue::from_str(&format!("{name}={value};{}", self.attributes())).ok()
    }

    /// `Set-Cookie` value that removes the session cookie.
    pub fn clear_session(&self) -> Option<HeaderValue> {
        HeaderValue::from_str(&format!(
            "{}=;{};Max-Age=0",
            self.session,
            self.attributes()
        ))
        .ok()
    }
}

/// Value of cookie `name` across all `Cookie` headers. The first occurrence
/// wins.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_cookie_across_headers() {
        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("a=1; engine_session=abc"));
        headers.append(header::COOKIE, HeaderValue::from_static("engine_device=\"dev\""));

        assert_eq!(read_cookie(&headers, "engine_session").as_deref(), Some("abc"));
        assert_eq!(read_cookie(&headers, "engine_device").as_deref(), Some("dev"));
        assert!(read_cookie(&headers, "missing").is_none());
    }

    #[test]
    fn test_empty_cookie_is_absent() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("engine_session="));
        assert!(read_cookie(&headers, "engine_session").is_none());
    }

    #[test]
    fn test_attributes_follow_cross_origin_flag() {
        let mut config = EngineConfig::default();
        config.server.name = "shop".into();
        let names = CookieNames::from_config(&config);
        assert_eq!(names.session, "shop_session");
        assert_eq!(
            names.set_cookie(&names.session, "t").unwrap(),
            "shop_session=t;Path=/;HttpOnly"
        );

        config.server.cross_origin_embed = true;
        let names = CookieNames::from_config(&config);
        assert_eq!(
            names.set_cookie(&names.device, "d").unwrap(),
            "shop_device=d;Path=/;HttpOnly;SameSite=None;Secure"
        );
    }
}
