//! Edge Gate: a per-request middleware that runs before any page is served.
//!
//! The edge never sees client-held session state and never decodes the
//! token; it only knows whether a token cookie (or bearer header) is
//! present. To avoid redirect loops during soft, client-side navigations it
//! classifies each request with header heuristics and lets client
//! navigations through untouched, leaving the decision to the route guard.
//! These heuristics are best-effort: headers can be absent or spoofed, and
//! a misclassified request only changes *which* layer redirects.
//!
//! Role restrictions are not enforced here.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::routes::{AccessDecision, Evidence, RouteTable};
use crate::store::{TOKEN_COOKIE_NAME, get_cookie};

/// Headers sent by the client-side router on soft navigations and prefetches.
const ROUTER_HEADERS: &[&str] = &[
    "rsc",
    "next-router-state-tree",
    "next-router-prefetch",
    "x-nextjs-data",
];

const SEC_FETCH_MODE: &str = "sec-fetch-mode";
const SEC_FETCH_SITE: &str = "sec-fetch-site";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationKind {
    /// Hard navigation: address bar, reload, external link.
    Direct,
    /// Soft navigation issued by the in-page router.
    Client,
}

#[derive(Clone)]
pub struct EdgeState {
    pub routes: Arc<RouteTable>,
}

impl EdgeState {
    pub fn new(routes: RouteTable) -> Self {
        Self {
            routes: Arc::new(routes),
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok()
}

/// Whether the `Referer` points at the same host the request was sent to.
fn referer_is_same_origin(headers: &HeaderMap) -> bool {
    let Some(host) = header_str(headers, header::HOST.as_str()) else {
        return false;
    };
    let Some(referer) = header_str(headers, header::REFERER.as_str()) else {
        return false;
    };
    let Ok(referer) = Url::parse(referer) else {
        return false;
    };
    match (referer.host_str(), referer.port()) {
        (Some(h), Some(p)) => host.eq_ignore_ascii_case(&format!("{}:{}", h, p)),
        (Some(h), None) => host.eq_ignore_ascii_case(h),
        _ => false,
    }
}

/// Classify a request as direct or client-side navigation. Heuristic only.
pub fn classify_navigation(headers: &HeaderMap) -> NavigationKind {
    if ROUTER_HEADERS.iter().any(|h| headers.contains_key(*h)) {
        return NavigationKind::Client;
    }

    let mode = header_str(headers, SEC_FETCH_MODE);
    // A document navigation is a hard load even when it comes from our own pages.
    if mode == Some("navigate") {
        return NavigationKind::Direct;
    }

    let same_site = header_str(headers, SEC_FETCH_SITE) == Some("same-origin");
    let fetch_like = matches!(mode, Some("cors" | "same-origin" | "no-cors"));
    if (same_site && fetch_like) || (fetch_like && referer_is_same_origin(headers)) {
        return NavigationKind::Client;
    }

    NavigationKind::Direct
}

/// Token presence only: the cookie copy, or a bearer header.
pub fn has_token(headers: &HeaderMap) -> bool {
    if get_cookie(headers, TOKEN_COOKIE_NAME).is_some_and(|t| !t.is_empty()) {
        return true;
    }
    header_str(headers, header::AUTHORIZATION.as_str())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|t| !t.trim().is_empty())
}

/// Edge middleware. Use with `axum::middleware::from_fn_with_state`.
pub async fn edge_gate(State(state): State<EdgeState>, request: Request, next: Next) -> Response {
    let routes = &state.routes;
    let path = request.uri().path().to_owned();

    if routes.is_passthrough(&path) {
        return next.run(request).await;
    }

    if classify_navigation(request.headers()) == NavigationKind::Client {
        debug!(path = %path, "Client navigation, deferring to route guard");
        return next.run(request).await;
    }

    let has_token = has_token(request.headers());
    match routes.decide(&path, Evidence::token_only(has_token)) {
        AccessDecision::Allow => next.run(request).await,
        AccessDecision::RedirectToLogin => {
            let original = request
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or(&path);
            let location = routes.login_redirect(original);
            info!(path = %path, "Unauthenticated direct navigation, redirecting to login");
            Redirect::temporary(&location).into_response()
        }
        AccessDecision::RedirectHome => {
            debug!("Token present on login page, redirecting home");
            Redirect::temporary(&routes.home_path).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn test_bare_request_is_direct() {
        assert_eq!(classify_navigation(&HeaderMap::new()), NavigationKind::Direct);
    }

    #[test]
    fn test_router_header_is_client() {
        assert_eq!(
            classify_navigation(&headers(&[("rsc", "1")])),
            NavigationKind::Client
        );
    }

    #[test]
    fn test_document_navigation_is_direct_even_from_same_origin() {
        let h = headers(&[
            ("host", "crm.example.com"),
            ("referer", "https://crm.example.com/prospects"),
            ("sec-fetch-mode", "navigate"),
            ("sec-fetch-site", "same-origin"),
        ]);
        assert_eq!(classify_navigation(&h), NavigationKind::Direct);
    }

    #[test]
    fn test_same_origin_fetch_is_client() {
        let h = headers(&[("sec-fetch-mode", "cors"), ("sec-fetch-site", "same-origin")]);
        assert_eq!(classify_navigation(&h), NavigationKind::Client);

        let h = headers(&[
            ("host", "localhost:3000"),
            ("referer", "http://localhost:3000/activities"),
            ("sec-fetch-mode", "cors"),
        ]);
        assert_eq!(classify_navigation(&h), NavigationKind::Client);
    }

    #[test]
    fn test_cross_origin_referer_is_direct() {
        let h = headers(&[
            ("host", "localhost:3000"),
            ("referer", "http://evil.example:3000/"),
            ("sec-fetch-mode", "cors"),
        ]);
        assert_eq!(classify_navigation(&h), NavigationKind::Direct);
    }

    #[test]
    fn test_has_token_from_cookie_or_bearer() {
        assert!(has_token(&headers(&[("cookie", "token=a.b.c")])));
        assert!(has_token(&headers(&[("authorization", "Bearer a.b.c")])));
        assert!(!has_token(&headers(&[("cookie", "token=")])));
        assert!(!has_token(&headers(&[("authorization", "Basic Zm9v")])));
        assert!(!has_token(&HeaderMap::new()));
    }
}
