//! Route Guard: the client-side gate evaluated on every path change.
//!
//! Rules, in order:
//! 1. The login page always renders, except that a settled session with a
//!    user who need not change their password is sent home.
//! 2. While the session is loading, render a loading state.
//! 3. If loading outlives the timeout, end the session and go to login.
//! 4. Everything else defers to [`RouteTable::decide`]: protected pages,
//!    the password-change page included, need a user. A pending password
//!    change does not block protected pages.
//!
//! Redirects are issued once per target; re-evaluating while the same
//! redirect is pending yields [`GuardDecision::RenderRedirecting`].

use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::routes::{Access, AccessDecision, Evidence, RouteTable};
use crate::session::{AuthBackend, EndReason, SessionResolver, SessionSnapshot};

pub const DEFAULT_LOADING_TIMEOUT: Duration = Duration::from_secs(6);

#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub loading_timeout: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            loading_timeout: DEFAULT_LOADING_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    RenderChildren,
    RenderLoading,
    /// A redirect is already underway; show a placeholder.
    RenderRedirecting,
    Navigate {
        target: String,
        /// The session must be ended before navigating.
        end_session: bool,
    },
}

impl GuardDecision {
    fn navigate(target: &str) -> Self {
        GuardDecision::Navigate {
            target: target.to_string(),
            end_session: false,
        }
    }
}

pub struct RouteGuard {
    routes: RouteTable,
    config: GuardConfig,
    loading_since: Option<Instant>,
    redirecting: Option<String>,
    last_path: Option<String>,
}

impl RouteGuard {
    pub fn new(routes: RouteTable, config: GuardConfig) -> Self {
        Self {
            routes,
            config,
            loading_since: None,
            redirecting: None,
            last_path: None,
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Evaluate `path` against a session snapshot at time `now`.
    pub fn evaluate(
        &mut self,
        path: &str,
        session: &SessionSnapshot,
        now: Instant,
    ) -> GuardDecision {
        if self.last_path.as_deref() != Some(path) {
            self.last_path = Some(path.to_string());
            self.redirecting = None;
        }

        if session.loading {
            self.loading_since.get_or_insert(now);
        } else {
            self.loading_since = None;
        }

        match self.decide(path, session, now) {
            GuardDecision::Navigate {
                target,
                end_session,
            } => {
                if self.redirecting.as_deref() == Some(target.as_str()) {
                    return GuardDecision::RenderRedirecting;
                }
                debug!(from = %path, to = %target, "Route guard redirecting");
                self.redirecting = Some(target.clone());
                GuardDecision::Navigate {
                    target,
                    end_session,
                }
            }
            other => {
                self.redirecting = None;
                other
            }
        }
    }

    /// Evaluate against a live resolver, ending its session when loading timed out.
    pub fn enforce<B: AuthBackend>(
        &mut self,
        path: &str,
        resolver: &SessionResolver<B>,
        now: Instant,
    ) -> GuardDecision {
        let decision = self.evaluate(path, &resolver.snapshot(), now);
        if let GuardDecision::Navigate {
            end_session: true, ..
        } = decision
        {
            resolver.end_session(EndReason::LoadingTimedOut);
        }
        decision
    }

    fn decide(&self, path: &str, session: &SessionSnapshot, now: Instant) -> GuardDecision {
        let routes = &self.routes;

        if routes.is_login(path) {
            if session.loading {
                return GuardDecision::RenderChildren;
            }
            return match routes.decide(path, Evidence::from_user(session.user.as_ref())) {
                AccessDecision::RedirectHome => GuardDecision::navigate(&routes.home_path),
                _ => GuardDecision::RenderChildren,
            };
        }

        if routes.classify(path) == Access::Public {
            return GuardDecision::RenderChildren;
        }

        if session.loading {
            let started = self.loading_since.unwrap_or(now);
            if now.saturating_duration_since(started) < self.config.loading_timeout {
                return GuardDecision::RenderLoading;
            }
            warn!(
                timeout_ms = self.config.loading_timeout.as_millis() as u64,
                "Session check timed out"
            );
            return GuardDecision::Navigate {
                target: routes.login_path.clone(),
                end_session: true,
            };
        }

        match routes.decide(path, Evidence::from_user(session.user.as_ref())) {
            AccessDecision::Allow => GuardDecision::RenderChildren,
            AccessDecision::RedirectToLogin => GuardDecision::navigate(&routes.login_path),
            AccessDecision::RedirectHome => GuardDecision::navigate(&routes.home_path),
        }
    }
}

impl Default for RouteGuard {
    fn default() -> Self {
        Self::new(RouteTable::default(), GuardConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::SessionUser;

    fn user(password_change_required: bool) -> SessionUser {
        serde_json::from_value(serde_json::json!({
            "id": "1",
            "email": "a@b.com",
            "password_change_required": password_change_required
        }))
        .unwrap()
    }

    fn settled(user: Option<SessionUser>) -> SessionSnapshot {
        SessionSnapshot {
            user,
            loading: false,
        }
    }

    fn loading() -> SessionSnapshot {
        SessionSnapshot {
            user: None,
            loading: true,
        }
    }

    fn nav(target: &str) -> GuardDecision {
        GuardDecision::navigate(target)
    }

    #[test]
    fn test_login_renders_while_loading() {
        let mut guard = RouteGuard::default();
        let now = Instant::now();
        assert_eq!(
            guard.evaluate("/login", &loading(), now),
            GuardDecision::RenderChildren
        );
    }

    #[test]
    fn test_login_with_ready_user_goes_home() {
        let mut guard = RouteGuard::default();
        let now = Instant::now();
        assert_eq!(
            guard.evaluate("/login", &settled(Some(user(false))), now),
            nav("/")
        );
    }

    #[test]
    fn test_login_with_pending_password_change_renders() {
        let mut guard = RouteGuard::default();
        let now = Instant::now();
        assert_eq!(
            guard.evaluate("/login", &settled(Some(user(true))), now),
            GuardDecision::RenderChildren
        );
    }

    #[test]
    fn test_protected_paths_without_user_go_to_login() {
        let mut guard = RouteGuard::default();
        let now = Instant::now();
        for path in ["/", "/prospects", "/users/3", "/territories", "/change-password"] {
            assert_eq!(
                guard.evaluate(path, &settled(None), now),
                nav("/login"),
                "path {path}"
            );
        }
    }

    #[test]
    fn test_protected_paths_render_regardless_of_password_change() {
        let mut guard = RouteGuard::default();
        let now = Instant::now();
        assert_eq!(
            guard.evaluate("/prospects", &settled(Some(user(true))), now),
            GuardDecision::RenderChildren
        );
        assert_eq!(
            guard.evaluate("/change-password", &settled(Some(user(true))), now),
            GuardDecision::RenderChildren
        );
    }

    #[test]
    fn test_loading_until_timeout_then_login() {
        let mut guard = RouteGuard::new(
            RouteTable::default(),
            GuardConfig {
                loading_timeout: Duration::from_secs(6),
            },
        );
        let start = Instant::now();
        assert_eq!(
            guard.evaluate("/prospects", &loading(), start),
            GuardDecision::RenderLoading
        );
        assert_eq!(
            guard.evaluate("/prospects", &loading(), start + Duration::from_secs(5)),
            GuardDecision::RenderLoading
        );
        assert_eq!(
            guard.evaluate("/prospects", &loading(), start + Duration::from_secs(6)),
            GuardDecision::Navigate {
                target: "/login".into(),
                end_session: true
            }
        );
    }

    #[test]
    fn test_loading_clock_resets_after_settling() {
        let mut guard = RouteGuard::default();
        let start = Instant::now();
        guard.evaluate("/prospects", &loading(), start);
        let later = start + Duration::from_secs(5);
        guard.evaluate("/prospects", &settled(Some(user(false))), later);
        assert_eq!(
            guard.evaluate("/prospects", &loading(), start + Duration::from_secs(10)),
            GuardDecision::RenderLoading
        );
    }

    #[test]
    fn test_repeated_evaluation_does_not_redirect_twice() {
        let mut guard = RouteGuard::default();
        let now = Instant::now();
        assert_eq!(guard.evaluate("/users", &settled(None), now), nav("/login"));
        assert_eq!(
            guard.evaluate("/users", &settled(None), now),
            GuardDecision::RenderRedirecting
        );
        assert_eq!(
            guard.evaluate("/users", &settled(None), now),
            GuardDecision::RenderRedirecting
        );
    }

    #[test]
    fn test_redirect_flag_resets_on_path_change() {
        let mut guard = RouteGuard::default();
        let now = Instant::now();
        assert_eq!(guard.evaluate("/users", &settled(None), now), nav("/login"));
        assert_eq!(
            guard.evaluate("/login", &settled(None), now),
            GuardDecision::RenderChildren
        );
        assert_eq!(
            guard.evaluate("/prospects", &settled(None), now),
            nav("/login")
        );
    }

    #[test]
    fn test_public_pages_render_while_loading() {
        let routes = RouteTable {
            public_paths: vec!["/forgot-password".into()],
            ..RouteTable::default()
        };
        let mut guard = RouteGuard::new(routes, GuardConfig::default());
        assert_eq!(
            guard.evaluate("/forgot-password", &loading(), Instant::now()),
            GuardDecision::RenderChildren
        );
    }
}
