//! Wire types for the CRM REST API.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// CRM user role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Manager,
    SalesRep,
    Partner,
    #[serde(other)]
    Unknown,
}

/// Server-confirmed identity.
///
/// Every field is optional and decoded leniently: a field of the wrong type
/// is dropped rather than failing the whole payload, so a user carrying an
/// `id` or `email` is never rejected over an unrelated field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUser {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub full_name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub role: Option<Role>,
    #[serde(default, deserialize_with = "one_or_many_roles")]
    pub roles: Option<Vec<Role>>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub password_change_required: Option<bool>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_active: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    pub territories: Option<Vec<Value>>,
}

impl SessionUser {
    /// A user payload counts only if it carries an `id` or an `email`.
    pub fn is_identified(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        present(&self.id) || present(&self.email)
    }

    pub fn must_change_password(&self) -> bool {
        self.password_change_required.unwrap_or(false)
    }

    /// All roles held, from both the singular and plural fields.
    pub fn all_roles(&self) -> impl Iterator<Item = Role> + '_ {
        self.role
            .iter()
            .copied()
            .chain(self.roles.iter().flatten().copied())
    }

    pub fn has_any_role(&self, allowed: &[Role]) -> bool {
        self.all_roles().any(|r| allowed.contains(&r))
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Decode `T` if the value has the right shape, otherwise drop it.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(Option::<Value>::deserialize(deserializer)?
        .and_then(|v| serde_json::from_value(v).ok()))
}

fn bool_from(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Booleans as `true`/`false`, `0`/`1`, or their string forms.
fn lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?
        .as_ref()
        .and_then(bool_from))
}

fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_bool(deserializer)?.unwrap_or(false))
}

/// A single role name or a list of them. Entries that are not strings are skipped.
fn one_or_many_roles<'de, D>(deserializer: D) -> Result<Option<Vec<Role>>, D::Error>
where
    D: Deserializer<'de>,
{
    let role = |v: Value| serde_json::from_value::<Role>(v).ok();
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(v @ Value::String(_)) => role(v).map(|r| vec![r]),
        Some(Value::Array(items)) => Some(items.into_iter().filter_map(role).collect()),
        _ => None,
    })
}

/// Body of `POST /auth/login`.
#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

/// Login response, validated at the boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum LoginOutcome {
    Accepted { token: String, user: SessionUser },
    /// `success: true` but the token or an identifiable user is missing.
    MissingUserData,
    Rejected { message: String },
}

#[derive(Deserialize)]
pub(crate) struct RawLoginResponse {
    #[serde(default, deserialize_with = "flag")]
    success: bool,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    user: Option<SessionUser>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl From<RawLoginResponse> for LoginOutcome {
    fn from(raw: RawLoginResponse) -> Self {
        if !raw.success {
            return LoginOutcome::Rejected {
                message: raw
                    .message
                    .or(raw.error)
                    .unwrap_or_else(|| "Login failed".to_string()),
            };
        }
        match (raw.token.filter(|t| !t.is_empty()), raw.user) {
            (Some(token), Some(user)) if user.is_identified() => {
                LoginOutcome::Accepted { token, user }
            }
            _ => LoginOutcome::MissingUserData,
        }
    }
}

/// Body of `GET /auth/me`.
#[derive(Deserialize)]
pub(crate) struct RawMeResponse {
    #[serde(default, deserialize_with = "flag")]
    pub success: bool,
    #[serde(default)]
    pub user: Option<SessionUser>,
}

/// Generic CRUD response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl<T> Envelope<T> {
    /// Unwrap `data` from a successful envelope; a failed one becomes `Rejected`.
    pub fn into_data(self) -> Result<Option<T>, super::ApiError> {
        if self.success {
            Ok(self.data)
        } else {
            Err(super::ApiError::Rejected(
                self.message
                    .or(self.error)
                    .unwrap_or_else(|| "Request failed".to_string()),
            ))
        }
    }
}

/// CRUD resources exposed by the API.
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Prospects,
    Activities,
    Territories,
    Partners,
    Users,
}

impl Resource {
    pub fn path(&self) -> &'static str {
        match self {
            Resource::Prospects => "/prospects",
            Resource::Activities => "/activities",
            Resource::Territories => "/territories",
            Resource::Partners => "/partners",
            Resource::Users => "/users",
        }
    }
}
