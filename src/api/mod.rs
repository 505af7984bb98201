//! REST client for the CRM backend.
//!
//! All authenticated requests carry `Authorization: Bearer <token>`.
//! 401 comes back as [`ApiError::Unauthorized`] and 403 as
//! [`ApiError::Forbidden`]; clearing the stored token on a 401 is left to
//! the session resolver.

mod client;
mod error;
mod types;

pub use client::{ApiClient, REQUEST_TIMEOUT};
pub use error::ApiError;
pub use types::{Credentials, Envelope, LoginOutcome, Resource, Role, SessionUser};
