//! Route classification and the shared access decision.
//!
//! The edge gate and the route guard both ask [`RouteTable::decide`] what
//! to do with a path; they differ only in the evidence they can offer.
//! Role restrictions are answered separately by [`RouteTable::permits`] at
//! page level, since neither gate enforces them.

use url::form_urlencoded;

use crate::api::{Role, SessionUser};

/// Static access class of a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    Public,
    Protected,
    RoleRestricted(Vec<Role>),
}

/// What is known about the caller's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    /// No identity available; only token presence is known (edge).
    Unknown,
    /// Identity confirmation ran and produced no user.
    Absent,
    Confirmed { password_change_required: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evidence {
    pub has_token: bool,
    pub identity: Identity,
}

impl Evidence {
    /// Edge evidence: a token cookie may be present, nothing is confirmed.
    pub fn token_only(has_token: bool) -> Self {
        Self {
            has_token,
            identity: Identity::Unknown,
        }
    }

    /// Client evidence from a resolved session.
    pub fn from_user(user: Option<&SessionUser>) -> Self {
        match user {
            Some(user) => Self {
                has_token: true,
                identity: Identity::Confirmed {
                    password_change_required: user.must_change_password(),
                },
            },
            None => Self {
                has_token: false,
                identity: Identity::Absent,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    RedirectToLogin,
    RedirectHome,
}

#[derive(Debug, Clone)]
pub struct RouteTable {
    pub login_path: String,
    pub password_change_path: String,
    pub home_path: String,
    /// Public pages other than login.
    pub public_paths: Vec<String>,
    /// Prefixes the edge never gates (API, framework internals, static files).
    pub passthrough_prefixes: Vec<String>,
    /// Page-level role restrictions, matched by path segment prefix.
    pub restrictions: Vec<(String, Vec<Role>)>,
}

impl Default for RouteTable {
    fn default() -> Self {
        use Role::*;
        Self {
            login_path: "/login".into(),
            password_change_path: "/change-password".into(),
            home_path: "/".into(),
            public_paths: Vec::new(),
            passthrough_prefixes: vec![
                "/api".into(),
                "/_next".into(),
                "/static".into(),
                "/assets".into(),
                "/favicon.ico".into(),
            ],
            restrictions: vec![
                ("/users".into(), vec![Admin, Manager]),
                ("/teams".into(), vec![Admin, Manager]),
                ("/territories".into(), vec![Admin, Manager]),
                ("/partners".into(), vec![Admin, Manager, SalesRep]),
            ],
        }
    }
}

/// `path` equals `prefix` or continues it with a new segment.
fn matches_prefix(path: &str, prefix: &str) -> bool {
    if prefix == "/" {
        return path == "/";
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/'),
        None => false,
    }
}

/// The last segment names a file, e.g. `/assets/index-4f2a.js` or `/logo.svg`.
fn is_static_file(path: &str) -> bool {
    let last = path.rsplit('/').next().unwrap_or_default();
    match last.rsplit_once('.') {
        Some((stem, ext)) => {
            !stem.is_empty()
                && !ext.is_empty()
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        }
        None => false,
    }
}

impl RouteTable {
    pub fn is_login(&self, path: &str) -> bool {
        matches_prefix(path, &self.login_path)
    }

    pub fn is_password_change(&self, path: &str) -> bool {
        matches_prefix(path, &self.password_change_path)
    }

    /// API calls, framework internals and static files are never gated.
    pub fn is_passthrough(&self, path: &str) -> bool {
        is_static_file(path)
            || self
                .passthrough_prefixes
                .iter()
                .any(|p| matches_prefix(path, p))
    }

    pub fn classify(&self, path: &str) -> Access {
        if self.is_login(path) || self.public_paths.iter().any(|p| matches_prefix(path, p)) {
            return Access::Public;
        }
        match self
            .restrictions
            .iter()
            .find(|(prefix, _)| matches_prefix(path, prefix))
        {
            Some((_, roles)) => Access::RoleRestricted(roles.clone()),
            None => Access::Protected,
        }
    }

    /// Coarse gate shared by edge and client.
    ///
    /// With `Identity::Unknown` token presence stands in for authentication.
    /// A confirmed user who must change their password may still see the
    /// login page.
    pub fn decide(&self, path: &str, evidence: Evidence) -> AccessDecision {
        let authenticated = match evidence.identity {
            Identity::Unknown => evidence.has_token,
            Identity::Absent => false,
            Identity::Confirmed { .. } => true,
        };

        if self.is_login(path) {
            let leave_login = match evidence.identity {
                Identity::Confirmed {
                    password_change_required,
                } => !password_change_required,
                _ => authenticated,
            };
            return if leave_login {
                AccessDecision::RedirectHome
            } else {
                AccessDecision::Allow
            };
        }

        match self.classify(path) {
            Access::Public => AccessDecision::Allow,
            Access::Protected | Access::RoleRestricted(_) if authenticated => AccessDecision::Allow,
            Access::Protected | Access::RoleRestricted(_) => AccessDecision::RedirectToLogin,
        }
    }

    /// Page-level role check.
    pub fn permits(&self, path: &str, user: &SessionUser) -> bool {
        match self.classify(path) {
            Access::Public | Access::Protected => true,
            Access::RoleRestricted(roles) => user.has_any_role(&roles),
        }
    }

    /// `/login?redirect=<original>`; the original target is percent-encoded.
    pub fn login_redirect(&self, original: &str) -> String {
        let encoded: String = form_urlencoded::byte_serialize(original.as_bytes()).collect();
        format!("{}?redirect={}", self.login_path, encoded)
    }
}
