use crate::AppState;
use axum::{
    body::Bytes,
    debug_handler,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: u32,
    pub name: String,
    pub email: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUser {
    pub name: String,
    pub email: String,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("User not found")]
    NotFound,

    #[error("Invalid user ID")]
    InvalidId,

    #[error("Invalid JSON format")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Name and email are required")]
    MissingField,

    #[error("Email already registered")]
    DuplicateEmail,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::InvalidId | ApiError::InvalidJson(_) | ApiError::MissingField => {
                StatusCode::BAD_REQUEST
            }
            ApiError::DuplicateEmail => StatusCode::CONFLICT,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}

/// In-memory user table, ordered by id.
#[derive(Default)]
pub struct UserStore {
    inner: RwLock<Table>,
}

#[derive(Default)]
struct Table {
    next_id: u32,
    users: BTreeMap<u32, User>,
}

impl UserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-populated with `count` generated users.
    pub fn seeded(count: usize) -> Self {
        let store = Self::new();
        for n in 1..=count {
            // Generated emails are unique, so this cannot conflict.
            let _ = store.create(CreateUser {
                name: format!("User {n}"),
                email: format!("user{n}@example.com"),
            });
        }
        store
    }

    pub fn all(&self) -> Vec<User> {
        let table = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        table.users.values().cloned().collect()
    }

    pub fn get(&self, id: u32) -> Option<User> {
        let table = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        table.users.get(&id).cloned()
    }

    pub fn create(&self, new_user: CreateUser) -> Result<User, ApiError> {
        let name = new_user.name.trim();
        let email = new_user.email.trim();
        if name.is_empty() || email.is_empty() {
            return Err(ApiError::MissingField);
        }

        let mut table = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if table.users.values().any(|u| u.email.eq_ignore_ascii_case(email)) {
            return Err(ApiError::DuplicateEmail);
        }

        table.next_id += 1;
        let user = User {
            id: table.next_id,
            name: name.to_string(),
            email: email.to_string(),
            created_at: OffsetDateTime::now_utc(),
        };
        table.users.insert(user.id, user.clone());
        Ok(user)
    }

    pub fn delete(&self, id: u32) -> bool {
        let mut table = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        table.users.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        let table = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        table.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Artificial latency added to user reads.
#[derive(Debug, Clone, Copy)]
pub struct Latency {
    pub mean: Duration,
    pub std_dev: Duration,
}

impl Latency {
    async fn wait(self) {
        let sample = match Normal::new(self.mean.as_secs_f64(), self.std_dev.as_secs_f64()) {
            Ok(normal) => normal.sample(&mut rand::thread_rng()).max(0.),
            Err(err) => {
                error!("Invalid latency distribution: {err}");
                self.mean.as_secs_f64()
            }
        };
        tokio::time::sleep(Duration::from_secs_f64(sample)).await;
    }
}

pub async fn health() -> Json<serde_json::Value> {
    info!("Health check requested");
    Json(serde_json::json!({ "status": "healthy", "database": "connected" }))
}

#[debug_handler]
pub async fn list_users(State(state): State<AppState>) -> Json<Vec<User>> {
    if let Some(latency) = state.latency {
        latency.wait().await;
    }

    let users = state.users.all();
    info!("Fetched {} users", users.len());
    Json(users)
}

#[debug_handler]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<User>, ApiError> {
    let id = parse_id(&id)?;
    if let Some(latency) = state.latency {
        latency.wait().await;
    }

    match state.users.get(id) {
        Some(user) => Ok(Json(user)),
        None => {
            warn!("User {id} not found");
            Err(ApiError::NotFound)
        }
    }
}

#[debug_handler]
pub async fn create_user(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let new_user: CreateUser = serde_json::from_slice(&body).map_err(|err| {
        error!("Failed to parse JSON: {err}");
        ApiError::from(err)
    })?;

    let user = state.users.create(new_user)?;
    info!("Created user {}", user.id);
    Ok((StatusCode::CREATED, Json(user)))
}

#[debug_handler]
pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id)?;
    if state.users.delete(id) {
        info!("Deleted user {id}");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound)
    }
}

fn parse_id(raw: &str) -> Result<u32, ApiError> {
    raw.parse().map_err(|_| ApiError::InvalidId)
}
