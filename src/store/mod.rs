//! Token Store: the single shared home of the bearer token.
//!
//! Every token lives in two places: a persistent backend (the key/value
//! copy) and a cookie jar scoped to the API origin (the copy an edge layer
//! can see). Writes go to both on a best-effort basis; there is no
//! atomicity between the two. Only the session resolver writes; everything
//! else reads.

mod backend;
mod cookie;

pub use backend::{FileBackend, MemoryBackend, StorageError, TokenBackend};
pub use cookie::{
    TOKEN_COOKIE_MAX_AGE_SECS, TOKEN_COOKIE_NAME, cleared_token_cookie, find_cookie, get_cookie,
    token_cookie,
};

use reqwest::cookie::{CookieStore, Jar};
use std::sync::Arc;
use tracing::warn;
use url::Url;

pub struct TokenStore {
    backend: Box<dyn TokenBackend>,
    jar: Arc<Jar>,
    origin: Url,
}

impl TokenStore {
    /// Create a store over the given backend. Cookies are scoped to `origin`.
    pub fn new(backend: impl TokenBackend + 'static, origin: Url) -> Self {
        Self {
            backend: Box::new(backend),
            jar: Arc::new(Jar::default()),
            origin,
        }
    }

    /// Create a store whose persisted token is mirrored into the cookie jar.
    ///
    /// A token left in the backend from an earlier run gets its cookie copy
    /// back, the way a browser still holds both after a reload.
    pub fn open(backend: impl TokenBackend + 'static, origin: Url) -> Self {
        let store = Self::new(backend, origin);
        if let Some(token) = store.get() {
            store.jar.add_cookie_str(&token_cookie(&token), &store.origin);
        }
        store
    }

    pub fn in_memory(origin: Url) -> Self {
        Self::new(MemoryBackend::new(), origin)
    }

    /// Cookie jar shared with the HTTP client.
    pub fn jar(&self) -> Arc<Jar> {
        self.jar.clone()
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Read the persisted token. Backend failures read as "no token".
    pub fn get(&self) -> Option<String> {
        match self.backend.load() {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                warn!(error = %e, "Failed to read persisted token");
                None
            }
        }
    }

    /// Whether the cookie copy is currently present in the jar.
    pub fn has_cookie(&self) -> bool {
        self.cookie_token().is_some()
    }

    /// The token value held by the cookie copy.
    pub fn cookie_token(&self) -> Option<String> {
        let header = self.jar.cookies(&self.origin)?;
        let cookies = header.to_str().ok()?;
        find_cookie(cookies, TOKEN_COOKIE_NAME)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    pub(crate) fn set(&self, token: &str) -> Result<(), StorageError> {
        // The cookie is written even when the backend fails so the edge copy
        // never lags a successful login.
        self.jar.add_cookie_str(&token_cookie(token), &self.origin);
        self.backend.save(token)
    }

    pub(crate) fn clear(&self) -> Result<(), StorageError> {
        self.jar.add_cookie_str(&cleared_token_cookie(), &self.origin);
        self.backend.remove()
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("origin", &self.origin.as_str())
            .field("has_cookie", &self.has_cookie())
            .finish_non_exhaustive()
    }
}
