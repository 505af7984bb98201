//! Cookie helpers for the token's cookie copy.

use axum::http::{HeaderMap, header};

/// Cookie name carrying the duplicate copy of the bearer token.
pub const TOKEN_COOKIE_NAME: &str = "token";

/// Cookie lifetime: 7 days.
pub const TOKEN_COOKIE_MAX_AGE_SECS: u64 = 7 * 24 * 60 * 60;

/// Build the Set-Cookie value written alongside the persisted token.
pub fn token_cookie(token: &str) -> String {
    format!(
        "{}={}; Path=/; Max-Age={}; SameSite=Lax",
        TOKEN_COOKIE_NAME, token, TOKEN_COOKIE_MAX_AGE_SECS
    )
}

/// Build the Set-Cookie value that expires the token cookie.
pub fn cleared_token_cookie() -> String {
    format!("{}=; Path=/; Max-Age=0; SameSite=Lax", TOKEN_COOKIE_NAME)
}

/// Find a cookie in a raw `name=value; name2=value2` string.
pub fn find_cookie<'a>(cookies: &'a str, name: &str) -> Option<&'a str> {
    for part in cookies.split(';') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            if key.trim() == name {
                return Some(value.trim());
            }
        }
    }
    None
}

/// Extract a cookie value from the Cookie header.
pub fn get_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    find_cookie(cookie_header, name)
}
