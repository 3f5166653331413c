use axum::{
    debug_handler,
    error_handling::HandleErrorLayer,
    extract::{DefaultBodyLimit, Path, Request, State},
    http::{Method, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::get,
    BoxError, Json, Router,
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use lazy_static::lazy_static;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::{
    num::NonZeroU32,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, PoisonError, RwLock,
    },
    time::Duration,
};
use tokio::task::JoinHandle;
use tower::{limit::GlobalConcurrencyLimitLayer, timeout::TimeoutLayer, ServiceBuilder};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info};

mod users;

pub use users::{ApiError, CreateUser, Latency, User, UserStore};

/// Largest accepted request body.
pub const BODY_LIMIT: usize = 64 * 1024;
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 100;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Server-wide admission limits.
///
/// At most `concurrency` requests are handled at once and the rest queue for a slot. A request
/// still running `timeout` after it got its slot is answered with `408 Request Timeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub concurrency: usize,
    pub timeout: Duration,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY_LIMIT,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<UserStore>,
    pub stats: Arc<RequestStats>,
    pub latency: Option<Latency>,
    pub limits: Limits,
}

impl AppState {
    pub fn new(users: UserStore) -> Self {
        Self {
            users: Arc::new(users),
            stats: Arc::new(RequestStats::default()),
            latency: None,
            limits: Limits::default(),
        }
    }

    pub fn with_latency(mut self, latency: Latency) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(UserStore::new())
    }
}

/// Requests served and how many of them were server errors.
#[derive(Default)]
pub struct RequestStats {
    requests: AtomicU64,
    errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub error: u64,
}

impl RequestStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            error: self.errors.load(Ordering::Relaxed),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let limits = state.limits;
    debug!(
        "Serving at most {} requests at once, {:?} timeout",
        limits.concurrency, limits.timeout
    );

    Router::new()
        .route("/health", get(users::health))
        .route("/users", get(users::list_users).post(users::create_user))
        .route(
            "/users/:id",
            get(users::get_user).delete(users::delete_user),
        )
        .route("/metrics", get(stats))
        .route("/delay/ms/:delay_ms", get(delay))
        .route("/status/:code", get(status))
        .route(
            "/max/:max_tps/delay/ms/:delay_ms/scenario/:scenario_name",
            get(max),
        )
        // The semaphore is shared by every route.
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(overloaded))
                .layer(TimeoutLayer::new(limits.timeout))
                .layer(GlobalConcurrencyLimitLayer::new(limits.concurrency)),
        )
        .layer(middleware::from_fn_with_state(state.clone(), count_requests))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::DELETE])
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn overloaded(err: BoxError) -> StatusCode {
    if err.is::<tower::timeout::error::Elapsed>() {
        StatusCode::REQUEST_TIMEOUT
    } else {
        tracing::error!("Unhandled middleware error: {err}");
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// Serve until `shutdown` resolves.
pub async fn run(
    addr: SocketAddr,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Mock service listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Bind `addr` (port 0 picks a free port) and serve in the background.
pub async fn spawn(
    addr: SocketAddr,
    state: AppState,
) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local = listener.local_addr()?;
    let app = router(state);
    let handle = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            tracing::error!("Mock service stopped: {err}");
        }
    });
    debug!("Mock service spawned on {local}");
    Ok((local, handle))
}

async fn count_requests(State(state): State<AppState>, req: Request, next: Next) -> Response {
    counter!("mock_service.requests").increment(1);
    state.stats.requests.fetch_add(1, Ordering::Relaxed);

    let res = next.run(req).await;
    if res.status().is_server_error() {
        counter!("mock_service.errors").increment(1);
        state.stats.errors.fetch_add(1, Ordering::Relaxed);
    }
    res
}

async fn stats(State(state): State<AppState>) -> Json<StatsSnapshot> {
    Json(state.stats.snapshot())
}

#[debug_handler]
pub async fn delay(Path(delay_ms): Path<u64>) {
    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
}

/// Respond with the requested status, `400` when it is not a valid status code.
pub async fn status(Path(code): Path<u16>) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
}

lazy_static! {
    static ref MAX_MAP: RwLock<HashMap<String, DefaultDirectRateLimiter>> =
        RwLock::new(HashMap::new());
}

/// Succeeds until the named scenario exceeds `max_tps`, then fails with `500`.
#[debug_handler]
pub async fn max(
    Path((max_tps, delay_ms, scenario_name)): Path<(u32, u64, String)>,
) -> Result<(), StatusCode> {
    tokio::time::sleep(Duration::from_millis(delay_ms)).await;

    {
        let map = MAX_MAP.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(limiter) = map.get(&scenario_name) {
            return match limiter.check() {
                Ok(_) => Ok(()),
                Err(_) => {
                    debug!("{scenario_name} over {max_tps} TPS");
                    Err(StatusCode::INTERNAL_SERVER_ERROR)
                }
            };
        }
    }

    let limiter = rate_limiter(max_tps).ok_or(StatusCode::BAD_REQUEST)?;
    MAX_MAP
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(scenario_name)
        .or_insert(limiter);
    Ok(())
}

pub fn rate_limiter(tps: u32) -> Option<DefaultDirectRateLimiter> {
    NonZeroU32::new(tps).map(|tps| RateLimiter::direct(Quota::per_second(tps)))
}
