//! Control-plane HTTP API.
//!
//! Implements:
//! - Auth endpoints (POST /auth/register, /auth/login)
//! - Device CRUD (POST/GET /devices, GET/PUT/DELETE /devices/{id})
//! - Mutation triggers (PUT /devices/{id}/status, /devices/{id}/content)
//! - Permission management (PUT /users/{id}/permissions)
//! - Health endpoint (GET /health)
//!
//! Status and content mutations publish a `StatusEvent` after — and only
//! after — the storage write succeeds. Publishing pushes onto per-connection
//! channels and never blocks the response.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::auth::permissions::{authorize, Action, Denied, PermissionSet};
use crate::auth::{bearer_token, password, Identity, Role};
use crate::events::{EventKind, StatusEvent};
use crate::server::GatewayState;
use crate::storage::{Device, NewDevice, UserStoreError};

/// Error responses returned by control-plane handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("not found")]
    NotFound,
    #[error("internal server error")]
    Internal,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<Denied> for ApiError {
    fn from(denied: Denied) -> Self {
        match denied {
            // a malformed permission set is a client-data problem, not a
            // policy refusal; matches the original API's contract
            Denied::NoPermissionSet => ApiError::BadRequest(denied.message().to_string()),
            Denied::PermissionMissing | Denied::NotOwner => {
                ApiError::Forbidden(denied.message().to_string())
            }
        }
    }
}

pub fn create_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/devices", post(create_device).get(list_devices))
        .route(
            "/devices/{id}",
            get(get_device).put(update_device).delete(delete_device),
        )
        .route("/devices/{id}/status", put(update_status))
        .route("/devices/{id}/content", put(update_content))
        .route("/users", get(list_users))
        .route("/users/{id}", get(get_user).delete(delete_user))
        .route("/users/{id}/permissions", put(set_permissions))
        .with_state(state)
}

/// Resolve the request's identity from its bearer token.
fn require_identity(state: &GatewayState, headers: &HeaderMap) -> Result<Identity, ApiError> {
    let header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let token =
        bearer_token(header).ok_or_else(|| ApiError::Unauthorized("token not provided".into()))?;
    let claims = state
        .verifier
        .verify(token)
        .map_err(|_| ApiError::Unauthorized("token invalid or expired".into()))?;
    Ok(claims.into())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    email: String,
    password: String,
    role: Role,
}

async fn register(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<RegisterRequest>,
) -> Result<Response, ApiError> {
    if body.email.is_empty() || body.password.is_empty() {
        return Err(ApiError::BadRequest("all fields are required".into()));
    }
    if !is_valid_email(&body.email) {
        return Err(ApiError::BadRequest("invalid email".into()));
    }

    let hash = password::hash_password(&body.password).map_err(|_| ApiError::Internal)?;
    let user = state
        .users
        .insert(body.email, hash, body.role)
        .map_err(|UserStoreError::DuplicateEmail| {
            ApiError::BadRequest("email already registered".into())
        })?;

    info!(target: "auth", user_id = %user.id, role = user.role.as_str(), "user registered");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "user registered", "id": user.id })),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

async fn login(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<Value>, ApiError> {
    let user = state
        .users
        .find_by_email(&body.email)
        .ok_or(ApiError::NotFound)?;
    if !password::verify_password(&body.password, &user.password_hash) {
        return Err(ApiError::Unauthorized("invalid password".into()));
    }
    let token = state.verifier.issue(&user).map_err(|err| {
        warn!(target: "auth", %err, "token issuance failed");
        ApiError::Internal
    })?;
    Ok(Json(json!({
        "message": "login successful",
        "token": token,
        "id": user.id,
        "role": user.role,
    })))
}

async fn create_device(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(mut body): Json<NewDevice>,
) -> Result<Response, ApiError> {
    let identity = require_identity(&state, &headers)?;
    if body.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name is required".into()));
    }
    authorize(&identity, Action::Manage(body.kind), None)?;
    // only admins may assign another owner
    if identity.role != Role::Admin {
        body.owner_id = None;
    }
    let device = state.devices.create(body, &identity.subject);
    info!(target: "http", device_id = %device.id, kind = device.kind.as_str(), "device created");
    Ok((StatusCode::CREATED, Json(device)).into_response())
}

async fn list_devices(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Device>>, ApiError> {
    let identity = require_identity(&state, &headers)?;
    let devices = state
        .devices
        .find(|d| authorize(&identity, Action::View(d.kind), Some(&d.owner_id)).is_ok());
    Ok(Json(devices))
}

async fn get_device(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Device>, ApiError> {
    let identity = require_identity(&state, &headers)?;
    let device = state.devices.find_by_id(&id).ok_or(ApiError::NotFound)?;
    authorize(&identity, Action::View(device.kind), Some(&device.owner_id))?;
    Ok(Json(device))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceUpdate {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    video_url: Option<String>,
}

impl DeviceUpdate {
    fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.title.is_none()
            && self.description.is_none()
            && self.video_url.is_none()
    }

    fn changed_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        if let Some(name) = &self.name {
            fields.insert("name".into(), Value::String(name.clone()));
        }
        if let Some(title) = &self.title {
            fields.insert("title".into(), Value::String(title.clone()));
        }
        if let Some(description) = &self.description {
            fields.insert("description".into(), Value::String(description.clone()));
        }
        if let Some(video_url) = &self.video_url {
            fields.insert("videoUrl".into(), Value::String(video_url.clone()));
        }
        fields
    }

    fn apply(&self, device: &mut Device) {
        if let Some(name) = &self.name {
            device.name = name.clone();
        }
        if let Some(title) = &self.title {
            device.title = Some(title.clone());
        }
        if let Some(description) = &self.description {
            device.description = Some(description.clone());
        }
        if let Some(video_url) = &self.video_url {
            device.video_url = Some(video_url.clone());
        }
    }
}

/// Load a device and check the identity may manage it.
fn managed_device(
    state: &GatewayState,
    identity: &Identity,
    id: &str,
) -> Result<Device, ApiError> {
    let device = state.devices.find_by_id(id).ok_or(ApiError::NotFound)?;
    authorize(identity, Action::Manage(device.kind), Some(&device.owner_id))?;
    Ok(device)
}

async fn update_device(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<DeviceUpdate>,
) -> Result<Json<Device>, ApiError> {
    let identity = require_identity(&state, &headers)?;
    if body.is_empty() {
        return Err(ApiError::BadRequest("no fields to update".into()));
    }
    managed_device(&state, &identity, &id)?;

    let updated = state
        .devices
        .update(&id, |d| body.apply(d))
        .ok_or(ApiError::NotFound)?;

    let event = StatusEvent::new(EventKind::Update, &id, body.changed_fields());
    state.broadcaster.publish(&event, &updated);
    Ok(Json(updated))
}

#[derive(Debug, Deserialize)]
struct StatusUpdate {
    status: String,
}

async fn update_status(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<StatusUpdate>,
) -> Result<Json<Device>, ApiError> {
    let identity = require_identity(&state, &headers)?;
    if body.status.trim().is_empty() {
        return Err(ApiError::BadRequest("status is required".into()));
    }
    managed_device(&state, &identity, &id)?;

    let updated = state
        .devices
        .update(&id, |d| d.status = body.status.clone())
        .ok_or(ApiError::NotFound)?;

    state
        .broadcaster
        .publish(&StatusEvent::status(&id, &updated.status), &updated);
    Ok(Json(updated))
}

async fn update_content(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<DeviceUpdate>,
) -> Result<Json<Device>, ApiError> {
    let identity = require_identity(&state, &headers)?;
    if body.is_empty() {
        return Err(ApiError::BadRequest(
            "at least one content field is required".into(),
        ));
    }
    managed_device(&state, &identity, &id)?;

    let updated = state
        .devices
        .update(&id, |d| body.apply(d))
        .ok_or(ApiError::NotFound)?;

    let event = StatusEvent::new(EventKind::Content, &id, body.changed_fields());
    state.broadcaster.publish(&event, &updated);
    Ok(Json(updated))
}

async fn delete_device(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let identity = require_identity(&state, &headers)?;
    managed_device(&state, &identity, &id)?;
    if !state.devices.delete(&id) {
        return Err(ApiError::NotFound);
    }
    info!(target: "http", device_id = %id, "device deleted");
    Ok(Json(json!({ "message": "device removed" })))
}

/// User shape returned by the API; never includes the password hash.
fn user_view(user: &crate::storage::User) -> Value {
    json!({
        "id": user.id,
        "email": user.email,
        "role": user.role,
        "permissions": user.permissions,
    })
}

async fn list_users(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Value>>, ApiError> {
    let identity = require_identity(&state, &headers)?;
    if identity.role != Role::Admin {
        return Err(ApiError::Forbidden("admin role required".into()));
    }
    Ok(Json(state.users.list().iter().map(user_view).collect()))
}

async fn get_user(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let identity = require_identity(&state, &headers)?;
    // operators may read their own profile, admins anyone's
    if identity.role != Role::Admin && identity.subject != id {
        return Err(ApiError::Forbidden("admin role required".into()));
    }
    let user = state.users.find_by_id(&id).ok_or(ApiError::NotFound)?;
    Ok(Json(user_view(&user)))
}

async fn delete_user(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let identity = require_identity(&state, &headers)?;
    if identity.role != Role::Admin {
        return Err(ApiError::Forbidden("admin role required".into()));
    }
    if !state.users.delete(&id) {
        return Err(ApiError::NotFound);
    }
    info!(target: "http", user_id = %id, "user deleted");
    Ok(Json(json!({ "message": "user removed" })))
}

async fn set_permissions(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<PermissionSet>,
) -> Result<Json<Value>, ApiError> {
    let identity = require_identity(&state, &headers)?;
    if identity.role != Role::Admin {
        return Err(ApiError::Forbidden("admin role required".into()));
    }
    let user = state
        .users
        .set_permissions(&id, body)
        .ok_or(ApiError::NotFound)?;
    Ok(Json(json!({
        "id": user.id,
        "email": user.email,
        "role": user.role,
        "permissions": user.permissions,
    })))
}

fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}
