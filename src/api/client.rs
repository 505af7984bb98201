//! HTTP client for the CRM backend.

use reqwest::{Method, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::error::{ApiError, auth_status};
use super::types::{
    Credentials, Envelope, LoginOutcome, RawLoginResponse, RawMeResponse, Resource, SessionUser,
};
use crate::store::TokenStore;

/// Upper bound for any single request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const LOGIN_PATH: &str = "/auth/login";
const CURRENT_USER_PATH: &str = "/auth/me";

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    store: Arc<TokenStore>,
}

impl ApiClient {
    /// Build a client rooted at `base` (e.g. `http://host/api`).
    /// Shares the store's cookie jar so the token cookie travels with requests.
    pub fn new(base: Url, store: Arc<TokenStore>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .cookie_provider(store.jar())
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(ApiError::Network)?;
        Ok(Self { http, base, store })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        let base = self.base.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{}{}", base, path))?)
    }

    /// `POST /auth/login`. Non-2xx bodies are still parsed for a message.
    pub async fn login(&self, credentials: &Credentials) -> Result<LoginOutcome, ApiError> {
        let response = self
            .http
            .post(self.endpoint(LOGIN_PATH)?)
            .json(credentials)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        match serde_json::from_slice::<RawLoginResponse>(&body) {
            Ok(raw) => Ok(raw.into()),
            Err(_) if !status.is_success() => {
                Err(auth_status(status).unwrap_or_else(|| ApiError::Status {
                    status,
                    message: String::from_utf8_lossy(&body).into_owned(),
                }))
            }
            Err(e) => Err(ApiError::Decode(e.to_string())),
        }
    }

    /// `GET /auth/me` with an explicit token.
    /// Returns `None` when the payload has no identifiable user.
    pub async fn current_user(&self, token: &str) -> Result<Option<SessionUser>, ApiError> {
        let response = self
            .http
            .get(self.endpoint(CURRENT_USER_PATH)?)
            .bearer_auth(token)
            .send()
            .await?;
        let response = check_status(response).await?;
        let RawMeResponse { success, user } = response.json().await?;
        Ok(user.filter(|u| success && u.is_identified()))
    }

    pub async fn list<T: DeserializeOwned>(
        &self,
        resource: Resource,
        query: &[(&str, &str)],
    ) -> Result<Envelope<Vec<T>>, ApiError> {
        let url = self.endpoint(resource.path())?;
        self.send(self.http.get(url).query(query)).await
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        resource: Resource,
        id: &str,
    ) -> Result<Envelope<T>, ApiError> {
        let url = self.endpoint(&format!("{}/{}", resource.path(), id))?;
        self.send(self.http.get(url)).await
    }

    pub async fn create<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        resource: Resource,
        body: &B,
    ) -> Result<Envelope<T>, ApiError> {
        let url = self.endpoint(resource.path())?;
        self.send(self.http.post(url).json(body)).await
    }

    pub async fn update<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        resource: Resource,
        id: &str,
        body: &B,
    ) -> Result<Envelope<T>, ApiError> {
        let url = self.endpoint(&format!("{}/{}", resource.path(), id))?;
        self.send(self.http.request(Method::PUT, url).json(body)).await
    }

    pub async fn delete(
        &self,
        resource: Resource,
        id: &str,
    ) -> Result<Envelope<serde_json::Value>, ApiError> {
        let url = self.endpoint(&format!("{}/{}", resource.path(), id))?;
        self.send(self.http.delete(url)).await
    }

    /// Attach the stored bearer token, send, and decode the envelope.
    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<Envelope<T>, ApiError> {
        let request = match self.store.get() {
            Some(token) => request.bearer_auth(token),
            None => {
                debug!("Sending request without a bearer token");
                request
            }
        };
        let response = check_status(request.send().await?).await?;
        Ok(response.json().await?)
    }
}

/// Turn non-2xx responses into errors, pulling a message from the body if present.
async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if let Some(err) = auth_status(status) {
        warn!(status = %status, url = %response.url().path(), "Request not authorized");
        return Err(err);
    }
    let message = match response.json::<Envelope<serde_json::Value>>().await {
        Ok(env) => env.message.or(env.error),
        Err(_) => None,
    }
    .unwrap_or_else(|| status.canonical_reason().unwrap_or("Request failed").to_string());
    Err(ApiError::Status { status, message })
}
