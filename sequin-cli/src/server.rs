use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use axum::{
    extract::{Path, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post},
    Json, Router,
};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::CorsLayer;

use sequin_core::client::LocalCoordinator;
use sequin_core::service::Session;
use sequin_core::types::SessionId;
use sequin_core::{DistributedQueue, FairLock, RecipeError};

use crate::handlers::*;

type JsonQueue = DistributedQueue<serde_json::Value, Session>;
type LockKey = (SessionId, String);

/// Everything the routes share. Lock slots hold `None` while a blocking
/// acquire for that session and lock is in flight.
pub struct Registry {
    coordinator: LocalCoordinator,
    /// Session used for queue traffic and holder lookups.
    server_session: Arc<Session>,
    sessions: HashMap<SessionId, Arc<Session>>,
    queues: HashMap<String, Arc<JsonQueue>>,
    locks: HashMap<LockKey, Option<FairLock<Session>>>,
}

impl Registry {
    pub fn new(coordinator: LocalCoordinator) -> Self {
        let server_session = coordinator.connect();
        Self {
            coordinator,
            server_session,
            sessions: HashMap::new(),
            queues: HashMap::new(),
            locks: HashMap::new(),
        }
    }

    fn queue(&mut self, name: &str) -> Result<Arc<JsonQueue>, RecipeError> {
        if let Some(queue) = self.queues.get(name) {
            return Ok(Arc::clone(queue));
        }
        let dir = queue_dir(name).map_err(RecipeError::InvalidConfig)?;
        let queue: Arc<JsonQueue> = Arc::new(
            self.coordinator
                .queue(Arc::clone(&self.server_session), &dir)?,
        );
        self.queues.insert(name.to_string(), Arc::clone(&queue));
        Ok(queue)
    }
}

pub type AppState = Arc<Mutex<Registry>>;

pub async fn run(
    host: &str,
    port: u16,
    storage: &str,
    max_lock_requests: usize,
) -> std::io::Result<()> {
    let coordinator = create_coordinator(storage);
    let state: AppState = Arc::new(Mutex::new(Registry::new(coordinator)));

    // Each in-flight acquire parks a blocking thread.
    let lock_routes = Router::new()
        .route("/locks/{name}/acquire", post(acquire_lock))
        .route("/locks/{name}/release", post(release_lock))
        .route("/locks/{name}/holder", get(lock_holder))
        .layer(ConcurrencyLimitLayer::new(max_lock_requests));

    let app = Router::new()
        // Health is always open (no auth)
        .route("/health", get(health))
        .route("/sessions", post(open_session))
        .route("/sessions/{id}", delete(close_session))
        .route("/queues/{name}/items", post(enqueue))
        .route("/queues/{name}/dequeue", post(dequeue))
        .route("/queues/{name}/head", get(peek))
        .route("/queues/{name}/size", get(queue_size))
        .merge(lock_routes)
        .layer(middleware::from_fn(auth_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{}:{}", host, port);

    if std::env::var("SEQUIN_API_KEY").is_ok() {
        tracing::info!("API key authentication enabled");
    } else {
        tracing::warn!("No SEQUIN_API_KEY set, server is open (dev mode)");
    }

    tracing::info!(max_lock_requests, "sequin server starting on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await
}

// ─── Auth Middleware ────────────────────────────────────────────────────────

async fn auth_middleware(
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    // If no API key is configured, allow all requests (dev mode)
    let expected_key = match std::env::var("SEQUIN_API_KEY") {
        Ok(key) if !key.is_empty() => key,
        _ => return Ok(next.run(request).await),
    };

    if request.uri().path() == "/health" {
        return Ok(next.run(request).await);
    }

    let auth_header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth_header.strip_prefix("Bearer ").unwrap_or("");

    if token == expected_key {
        Ok(next.run(request).await)
    } else {
        tracing::warn!("Unauthorized request to {}", request.uri().path());
        Err(StatusCode::UNAUTHORIZED)
    }
}

fn failure<T: serde::Serialize>(error: &RecipeError) -> (StatusCode, Json<ApiResponse<T>>) {
    (status_for(error), Json(ApiResponse::err(error.to_string())))
}

// ─── Handlers ───────────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> Json<ApiResponse<HealthResponse>> {
    let registry = state.lock().await;
    let coordinator = &registry.coordinator;
    Json(ApiResponse::ok(HealthResponse {
        status: "ok".to_string(),
        available: coordinator.service().is_available(),
        sessions: coordinator.session_count(),
        nodes: coordinator.node_count().unwrap_or(0),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

async fn open_session(
    State(state): State<AppState>,
) -> (StatusCode, Json<ApiResponse<SessionResponse>>) {
    let mut registry = state.lock().await;
    let session = registry.coordinator.connect();
    let session_id = session.id();
    registry.sessions.insert(session_id, session);
    tracing::info!(session = session_id, "Session opened");
    (
        StatusCode::CREATED,
        Json(ApiResponse::ok(SessionResponse { session_id })),
    )
}

async fn close_session(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
) -> (StatusCode, Json<ApiResponse<SessionResponse>>) {
    let mut registry = state.lock().await;
    let Some(session) = registry.sessions.remove(&id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::err(format!("Session {} not found", id))),
        );
    };

    // Idle locks go now; a blocked acquire wakes with SessionLost once the
    // session is closed and is discarded when it returns.
    registry.locks.retain(|(session_id, _), _| *session_id != id);
    session.close();
    tracing::info!(session = id, "Session closed");
    (
        StatusCode::OK,
        Json(ApiResponse::ok(SessionResponse { session_id: id })),
    )
}

async fn enqueue(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(item): Json<serde_json::Value>,
) -> (StatusCode, Json<ApiResponse<EnqueueResponse>>) {
    let queue = match state.lock().await.queue(&name) {
        Ok(queue) => queue,
        Err(e) => return failure(&e),
    };

    match queue.enqueue(&item) {
        Ok(node) => {
            tracing::info!(queue = %name, node = %node, "Item enqueued");
            (
                StatusCode::CREATED,
                Json(ApiResponse::ok(EnqueueResponse { queue: name, node })),
            )
        }
        Err(e) => failure(&e),
    }
}

async fn dequeue(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> (StatusCode, Json<ApiResponse<QueueItemResponse>>) {
    let queue = match state.lock().await.queue(&name) {
        Ok(queue) => queue,
        Err(e) => return failure(&e),
    };
    let item = queue.dequeue();
    (
        StatusCode::OK,
        Json(ApiResponse::ok(QueueItemResponse { queue: name, item })),
    )
}

async fn peek(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> (StatusCode, Json<ApiResponse<QueueItemResponse>>) {
    let queue = match state.lock().await.queue(&name) {
        Ok(queue) => queue,
        Err(e) => return failure(&e),
    };
    let item = queue.peek();
    (
        StatusCode::OK,
        Json(ApiResponse::ok(QueueItemResponse { queue: name, item })),
    )
}

async fn queue_size(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> (StatusCode, Json<ApiResponse<QueueSizeResponse>>) {
    let queue = match state.lock().await.queue(&name) {
        Ok(queue) => queue,
        Err(e) => return failure(&e),
    };
    let size = queue.size();
    (
        StatusCode::OK,
        Json(ApiResponse::ok(QueueSizeResponse { queue: name, size })),
    )
}

async fn acquire_lock(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<AcquireLockRequest>,
) -> (StatusCode, Json<ApiResponse<LockResponse>>) {
    let dir = match lock_dir(&name) {
        Ok(dir) => dir,
        Err(e) => return (StatusCode::BAD_REQUEST, Json(ApiResponse::err(e))),
    };
    let key: LockKey = (req.session_id, name.clone());

    // Take the lock out of its slot so the registry is free while we wait.
    let mut lock = {
        let mut guard = state.lock().await;
        let registry = &mut *guard;
        let Some(session) = registry.sessions.get(&req.session_id).cloned() else {
            return (
                StatusCode::NOT_FOUND,
                Json(ApiResponse::err(format!("Session {} not found", req.session_id))),
            );
        };
        match registry.locks.get_mut(&key) {
            Some(slot) => match slot.take() {
                Some(lock) => lock,
                None => {
                    return (
                        StatusCode::CONFLICT,
                        Json(ApiResponse::err(format!(
                            "Session {} already has an acquire pending on '{}'",
                            req.session_id, name
                        ))),
                    );
                }
            },
            None => match registry.coordinator.fair_lock(session, &dir) {
                Ok(lock) => {
                    registry.locks.insert(key.clone(), None);
                    lock
                }
                Err(e) => return failure(&e),
            },
        }
    };

    let timeout = req.timeout_ms.map(Duration::from_millis);
    let waited = tokio::task::spawn_blocking(move || {
        let outcome = match timeout {
            Some(timeout) => lock.try_acquire_for(timeout),
            None => lock.acquire().map(|_| true),
        };
        (lock, outcome)
    })
    .await;

    let mut registry = state.lock().await;
    let (lock, outcome) = match waited {
        Ok(done) => done,
        Err(e) => {
            registry.locks.remove(&key);
            tracing::error!(lock = %name, error = %e, "Lock wait task failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::err("lock wait task failed")),
            );
        }
    };

    let response = LockResponse {
        lock: name.clone(),
        session_id: req.session_id,
        owner_id: lock.owner_id().to_string(),
        acquired: lock.is_held(),
        hold_count: lock.hold_count(),
        node: lock.node_path().map(str::to_string),
    };

    // The session may have been closed while we waited.
    if registry.sessions.contains_key(&req.session_id) && outcome.is_ok() {
        registry.locks.insert(key, Some(lock));
    } else {
        registry.locks.remove(&key);
    }

    match outcome {
        Ok(true) => {
            tracing::info!(lock = %name, session = req.session_id, "Lock acquired");
            (StatusCode::OK, Json(ApiResponse::ok(response)))
        }
        Ok(false) => {
            tracing::info!(lock = %name, session = req.session_id, "Lock wait timed out");
            (StatusCode::ACCEPTED, Json(ApiResponse::ok(response)))
        }
        Err(e) => {
            tracing::info!(lock = %name, session = req.session_id, error = %e, "Lock acquire failed");
            failure(&e)
        }
    }
}

async fn release_lock(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<ReleaseLockRequest>,
) -> (StatusCode, Json<ApiResponse<ReleaseResponse>>) {
    let key: LockKey = (req.session_id, name.clone());
    let mut registry = state.lock().await;

    let lock = match registry.locks.get_mut(&key) {
        Some(Some(lock)) => lock,
        Some(None) => {
            return (
                StatusCode::CONFLICT,
                Json(ApiResponse::err(format!(
                    "Session {} has an acquire pending on '{}'",
                    req.session_id, name
                ))),
            );
        }
        None => return failure(&RecipeError::NotHeld),
    };

    let was_held = lock.is_held();
    // A queued session that never got the lock just gives up its place.
    let result = if was_held { lock.unlock() } else { lock.withdraw() };
    let hold_count = lock.hold_count();

    if let Err(e) = result {
        if e == RecipeError::SessionLost {
            registry.locks.remove(&key);
        }
        return failure(&e);
    }
    if hold_count == 0 {
        registry.locks.remove(&key);
    }

    tracing::info!(lock = %name, session = req.session_id, was_held, hold_count, "Lock released");
    (
        StatusCode::OK,
        Json(ApiResponse::ok(ReleaseResponse {
            lock: name,
            session_id: req.session_id,
            was_held,
            hold_count,
        })),
    )
}

async fn lock_holder(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> (StatusCode, Json<ApiResponse<HolderResponse>>) {
    let dir = match lock_dir(&name) {
        Ok(dir) => dir,
        Err(e) => return (StatusCode::BAD_REQUEST, Json(ApiResponse::err(e))),
    };
    let registry = state.lock().await;
    let observer = match registry
        .coordinator
        .fair_lock(Arc::clone(&registry.server_session), &dir)
    {
        Ok(lock) => lock,
        Err(e) => return failure(&e),
    };

    match observer.holder() {
        Ok(owner_id) => (
            StatusCode::OK,
            Json(ApiResponse::ok(HolderResponse { lock: name, owner_id })),
        ),
        Err(e) => failure(&e),
    }
}

// ─── Storage Backend Selection ──────────────────────────────────────────────

fn create_coordinator(storage: &str) -> LocalCoordinator {
    if storage == "memory" {
        tracing::info!("Storage backend: in-memory (queue items will not persist)");
        LocalCoordinator::new()
    } else if let Some(path) = storage.strip_prefix("sqlite:") {
        #[cfg(feature = "sqlite")]
        {
            tracing::info!("Storage backend: SQLite ({})", path);
            match LocalCoordinator::with_sqlite(path) {
                Ok(coordinator) => coordinator,
                Err(e) => {
                    tracing::error!("Failed to open SQLite: {}. Falling back to in-memory.", e);
                    LocalCoordinator::new()
                }
            }
        }
        #[cfg(not(feature = "sqlite"))]
        {
            tracing::error!(
                "SQLite storage requested but `sqlite` feature is not enabled. \
                 Rebuild with: cargo build --features sqlite"
            );
            tracing::warn!("Falling back to in-memory storage.");
            let _ = path;
            LocalCoordinator::new()
        }
    } else {
        tracing::error!(
            "Unknown storage backend: '{}'. Use 'memory' or 'sqlite:<path>'", storage
        );
        tracing::warn!("Falling back to in-memory storage.");
        LocalCoordinator::new()
    }
}
