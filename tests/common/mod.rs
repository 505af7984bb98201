#![allow(dead_code)]

//! A loopback stand-in for the CRM REST API.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use crm_gate::session::{SessionConfig, SessionResolver};
use crm_gate::{api::ApiClient, open_session, store::MemoryBackend, store::get_cookie};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde::Serialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use url::Url;

pub const REP_EMAIL: &str = "rep@crm.test";
pub const NEW_HIRE_EMAIL: &str = "newhire@crm.test";
pub const HALF_BROKEN_EMAIL: &str = "broken@crm.test";
pub const PASSWORD: &str = "correct horse";

const SECRET: &[u8] = b"mock-crm-secret";

#[derive(Serialize)]
struct Claims {
    sub: String,
    exp: u64,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Mint an HS256 token that expires `ttl_secs` from now (negative for the past).
pub fn mint_token(sub: &str, ttl_secs: i64) -> String {
    let exp = now_secs().saturating_add_signed(ttl_secs);
    encode(
        &Header::default(),
        &Claims {
            sub: sub.to_string(),
            exp,
        },
        &EncodingKey::from_secret(SECRET),
    )
    .expect("Failed to mint token")
}

pub fn rep_user() -> Value {
    json!({
        "id": 42,
        "email": REP_EMAIL,
        "full_name": "Riley Rep",
        "role": "sales_rep",
        "password_change_required": false,
        "is_active": true
    })
}

fn new_hire_user() -> Value {
    json!({
        "id": "43",
        "email": NEW_HIRE_EMAIL,
        "full_name": "Nia New",
        "role": "sales_rep",
        "password_change_required": true
    })
}

#[derive(Default)]
pub struct MockCrm {
    /// Token accepted by the protected endpoints.
    pub valid_token: Mutex<Option<String>>,
    /// When set, every protected endpoint answers 401.
    pub revoked: AtomicBool,
    /// Answer `GET /auth/me` with loosely typed optional fields.
    pub loose_user: AtomicBool,
    /// Delay applied to `GET /auth/me`, in milliseconds.
    pub me_delay_ms: AtomicU64,
    pub me_calls: AtomicUsize,
    pub login_calls: AtomicUsize,
    /// `token` cookie seen on the last protected request.
    pub last_cookie: Mutex<Option<String>>,
    pub deleted: Mutex<Vec<String>>,
}

impl MockCrm {
    pub fn accept(&self, token: &str) {
        *self.valid_token.lock().unwrap() = Some(token.to_string());
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<(), Response> {
        *self.last_cookie.lock().unwrap() = get_cookie(headers, "token").map(str::to_string);

        let bearer = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        let valid = self.valid_token.lock().unwrap().clone();
        if self.revoked.load(Ordering::SeqCst) || bearer.is_none() || bearer != valid.as_deref()
        {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(json!({ "success": false, "message": "Not authorized" })),
            )
                .into_response());
        }
        Ok(())
    }
}

type Shared = State<Arc<MockCrm>>;

async fn login(State(crm): Shared, Json(body): Json<Value>) -> Response {
    crm.login_calls.fetch_add(1, Ordering::SeqCst);
    let email = body["email"].as_str().unwrap_or_default();
    let password = body["password"].as_str().unwrap_or_default();

    if password != PASSWORD {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "success": false, "message": "Invalid email or password" })),
        )
            .into_response();
    }

    let token = mint_token(email, 3600);
    crm.accept(&token);
    let body = match email {
        REP_EMAIL => json!({ "success": true, "token": token, "user": rep_user() }),
        NEW_HIRE_EMAIL => json!({ "success": true, "token": token, "user": new_hire_user() }),
        HALF_BROKEN_EMAIL => json!({ "success": true, "token": token }),
        _ => json!({ "success": false, "message": "Account is disabled" }),
    };
    Json(body).into_response()
}

async fn me(State(crm): Shared, headers: HeaderMap) -> Response {
    crm.me_calls.fetch_add(1, Ordering::SeqCst);
    let delay = crm.me_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    if let Err(denied) = crm.authorize(&headers) {
        return denied;
    }
    let user = if crm.loose_user.load(Ordering::SeqCst) {
        json!({
            "id": "42",
            "email": REP_EMAIL,
            "full_name": null,
            "roles": "sales_rep",
            "password_change_required": 0,
            "is_active": 1,
            "territories": "north"
        })
    } else {
        rep_user()
    };
    Json(json!({ "success": true, "user": user })).into_response()
}

async fn list_prospects(State(crm): Shared, headers: HeaderMap) -> Response {
    if let Err(denied) = crm.authorize(&headers) {
        return denied;
    }
    Json(json!({
        "success": true,
        "data": [
            { "id": 1, "company": "Acme", "status": "new" },
            { "id": 2, "company": "Globex", "status": "qualified" }
        ]
    }))
    .into_response()
}

async fn get_prospect(State(crm): Shared, headers: HeaderMap, Path(id): Path<String>) -> Response {
    if let Err(denied) = crm.authorize(&headers) {
        return denied;
    }
    if id != "1" {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "error": "Prospect not found" })),
        )
            .into_response();
    }
    Json(json!({ "success": true, "data": { "id": 1, "company": "Acme" } })).into_response()
}

async fn delete_prospect(
    State(crm): Shared,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(denied) = crm.authorize(&headers) {
        return denied;
    }
    crm.deleted.lock().unwrap().push(id);
    Json(json!({ "success": true, "message": "Prospect deleted" })).into_response()
}

async fn list_users(State(crm): Shared, headers: HeaderMap) -> Response {
    if let Err(denied) = crm.authorize(&headers) {
        return denied;
    }
    (
        StatusCode::FORBIDDEN,
        Json(json!({ "success": false, "message": "Admins only" })),
    )
        .into_response()
}

pub fn mock_router(crm: Arc<MockCrm>) -> Router {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/me", get(me))
        .route("/api/prospects", get(list_prospects))
        .route(
            "/api/prospects/{id}",
            get(get_prospect).delete(delete_prospect),
        )
        .route("/api/users", get(list_users))
        .with_state(crm)
}

pub struct MockServer {
    pub crm: Arc<MockCrm>,
    pub addr: SocketAddr,
    handle: tokio::task::JoinHandle<()>,
}

impl MockServer {
    pub async fn start() -> Self {
        let crm = Arc::new(MockCrm::default());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock server");
        let addr = listener.local_addr().unwrap();
        let app = mock_router(crm.clone());
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { crm, addr, handle }
    }

    pub fn api_url(&self) -> Url {
        Url::parse(&format!("http://{}/api", self.addr)).unwrap()
    }

    /// A resolver over an in-memory store, optionally seeded with a token.
    pub fn session(&self, token: Option<&str>) -> SessionResolver<ApiClient> {
        self.session_with(token, SessionConfig::default())
    }

    pub fn session_with(
        &self,
        token: Option<&str>,
        config: SessionConfig,
    ) -> SessionResolver<ApiClient> {
        let backend = match token {
            Some(token) => MemoryBackend::with_token(token),
            None => MemoryBackend::new(),
        };
        open_session(self.api_url(), backend, config).expect("Failed to open session")
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
