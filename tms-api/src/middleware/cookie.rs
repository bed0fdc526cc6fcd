//! Session cookie reading and `Set-Cookie` rendering.

use crate::config::SessionCookieConfig;
use crate::constants::CLEARED_COOKIE_AGE_SECS;
use axum::http::{header, HeaderMap};
use tms_core::unix_now;

/// Value of cookie `name` from the request's `Cookie` headers.
pub fn read_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.trim_matches('"'))
}

fn http_date(unix: i64) -> String {
    chrono::DateTime::from_timestamp(unix, 0)
        .unwrap_or_default()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

fn render(config: &SessionCookieConfig, value: &str, expires_at: i64, max_age: Option<i64>) -> String {
    let mut cookie = format!(
        "{}={}; Path={}; Expires={}",
        config.name,
        value,
        config.path,
        http_date(expires_at)
    );
    if let Some(age) = max_age {
        cookie.push_str(&format!("; Max-Age={age}"));
    }
    if let Some(domain) = &config.domain {
        cookie.push_str(&format!("; Domain={domain}"));
    }
    cookie.push_str("; HttpOnly");
    if config.secure {
        cookie.push_str("; Secure");
    }
    cookie.push_str(&format!("; SameSite={}", config.same_site.as_str()));
    cookie
}

/// Cookie carrying `session_id` until `expires_at`.
pub fn session_cookie(config: &SessionCookieConfig, session_id: &str, expires_at: i64) -> String {
    render(config, session_id, expires_at, None)
}

/// Cookie that makes the browser drop the session: empty value, expired a
/// day ago.
pub fn clear_session_cookie(config: &SessionCookieConfig) -> String {
    render(config, "", unix_now() - CLEARED_COOKIE_AGE_SECS, Some(0))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SameSite;
    use axum::http::HeaderValue;

    #[test]
    fn test_read_cookie_among_many() {
        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("theme=dark; trenova-session-id=sess_1"));
        headers.append(header::COOKIE, HeaderValue::from_static("other=1"));
        assert_eq!(read_cookie(&headers, "trenova-session-id"), Some("sess_1"));
        assert_eq!(read_cookie(&headers, "other"), Some("1"));
        assert_eq!(read_cookie(&headers, "missing"), None);
    }

    #[test]
    fn test_session_cookie_attributes() {
        let config = SessionCookieConfig {
            domain: Some("trenova.app".to_string()),
            same_site: SameSite::Strict,
            ..Default::default()
        };
        let cookie = session_cookie(&config, "sess_1", 0);
        assert_eq!(
            cookie,
            "trenova-session-id=sess_1; Path=/; Expires=Thu, 01 Jan 1970 00:00:00 GMT; \
             Domain=trenova.app; HttpOnly; Secure; SameSite=Strict"
        );
    }

    #[test]
    fn test_clear_cookie_is_expired() {
        let config = SessionCookieConfig {
            secure: false,
            ..Default::default()
        };
        let cookie = clear_session_cookie(&config);
        assert!(cookie.starts_with("trenova-session-id=; Path=/; Expires="));
        assert!(cookie.contains("Max-Age=0"));
        assert!(!cookie.contains("Secure"));
    }
}
