//! Session states and the snapshot exposed to observers.

use crate::api::SessionUser;

/// Why a session ended up unauthenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    NoToken,
    MalformedToken,
    ExpiredToken,
    /// The server answered 401 or 403.
    Unauthorized,
    Timeout,
    NetworkFailure,
    /// The identity call succeeded without an `id` or `email`.
    Unidentified,
    LoggedOut,
    /// The route guard gave up waiting for the check.
    LoadingTimedOut,
    /// A login attempt failed before any session was resolved.
    LoginFailed,
    /// The check was abandoned before it finished.
    Interrupted,
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EndReason::NoToken => "no token",
            EndReason::MalformedToken => "malformed token",
            EndReason::ExpiredToken => "expired token",
            EndReason::Unauthorized => "unauthorized",
            EndReason::Timeout => "identity check timed out",
            EndReason::NetworkFailure => "network failure",
            EndReason::Unidentified => "identity response had no user",
            EndReason::LoggedOut => "logged out",
            EndReason::LoadingTimedOut => "loading timed out",
            EndReason::LoginFailed => "login failed",
            EndReason::Interrupted => "session check interrupted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Uninitialized,
    /// A check is running. `user` keeps the previously confirmed identity, if any.
    Checking { user: Option<SessionUser> },
    Authenticated(SessionUser),
    Unauthenticated(EndReason),
}

impl SessionState {
    pub fn is_loading(&self) -> bool {
        matches!(
            self,
            SessionState::Uninitialized | SessionState::Checking { .. }
        )
    }

    pub fn user(&self) -> Option<&SessionUser> {
        match self {
            SessionState::Checking { user } => user.as_ref(),
            SessionState::Authenticated(user) => Some(user),
            _ => None,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            user: self.user().cloned(),
            loading: self.is_loading(),
        }
    }
}

/// The `{user, loading}` pair consumed by the route guard.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionSnapshot {
    pub user: Option<SessionUser>,
    pub loading: bool,
}

impl SessionSnapshot {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn password_change_required(&self) -> bool {
        self.user
            .as_ref()
            .is_some_and(SessionUser::must_change_password)
    }
}
