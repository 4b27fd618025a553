use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use sequin_core::types::SessionId;
use sequin_core::RecipeError;

pub const QUEUE_ROOT: &str = "/queues";
pub const LOCK_ROOT: &str = "/locks";

// ─── Validation Helpers ─────────────────────────────────────────────────────

/// Route names become a single path segment under the recipe root.
pub fn validate_name(kind: &str, name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err(format!("{} name is required", kind));
    }
    if name.contains('/') || name == "." || name == ".." {
        return Err(format!("Invalid {} name '{}'", kind, name));
    }
    Ok(())
}

pub fn queue_dir(name: &str) -> Result<String, String> {
    validate_name("queue", name)?;
    Ok(format!("{}/{}", QUEUE_ROOT, name))
}

pub fn lock_dir(name: &str) -> Result<String, String> {
    validate_name("lock", name)?;
    Ok(format!("{}/{}", LOCK_ROOT, name))
}

/// HTTP status for a recipe failure.
pub fn status_for(error: &RecipeError) -> StatusCode {
    match error {
        RecipeError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        RecipeError::SessionLost => StatusCode::GONE,
        RecipeError::Cancelled | RecipeError::NotHeld => StatusCode::CONFLICT,
        RecipeError::Serialization(_) | RecipeError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
        RecipeError::Coordination(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ─── Request Types ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct AcquireLockRequest {
    pub session_id: SessionId,
    /// Absent means wait until granted; zero means a single attempt.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Deserialize)]
pub struct ReleaseLockRequest {
    pub session_id: SessionId,
}

// ─── Response Types ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub available: bool,
    pub sessions: usize,
    pub nodes: usize,
    pub version: String,
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub session_id: SessionId,
}

#[derive(Serialize)]
pub struct EnqueueResponse {
    pub queue: String,
    pub node: String,
}

#[derive(Serialize)]
pub struct QueueItemResponse {
    pub queue: String,
    pub item: Option<serde_json::Value>,
}

#[derive(Serialize)]
pub struct QueueSizeResponse {
    pub queue: String,
    pub size: usize,
}

#[derive(Serialize)]
pub struct LockResponse {
    pub lock: String,
    pub session_id: SessionId,
    pub owner_id: String,
    pub acquired: bool,
    pub hold_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
}

#[derive(Serialize)]
pub struct ReleaseResponse {
    pub lock: String,
    pub session_id: SessionId,
    /// `false` when the session was still queued and only gave up its place.
    pub was_held: bool,
    pub hold_count: u32,
}

#[derive(Serialize)]
pub struct HolderResponse {
    pub lock: String,
    pub owner_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use sequin_core::CoordError;

    #[test]
    fn test_names_map_to_single_segments() {
        assert_eq!(queue_dir("jobs").unwrap(), "/queues/jobs");
        assert_eq!(lock_dir("catalog").unwrap(), "/locks/catalog");
        assert!(queue_dir("").is_err());
        assert!(lock_dir("..").is_err());
        assert!(lock_dir("a/b").is_err());
    }

    #[test]
    fn test_recipe_errors_map_to_statuses() {
        assert_eq!(status_for(&RecipeError::ServiceUnavailable), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for(&RecipeError::SessionLost), StatusCode::GONE);
        assert_eq!(status_for(&RecipeError::NotHeld), StatusCode::CONFLICT);
        assert_eq!(
            status_for(&RecipeError::InvalidConfig("empty prefix".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&RecipeError::Coordination(CoordError::NotEmpty("/locks".to_string()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_acquire_request_timeout_is_optional() {
        let req: AcquireLockRequest = serde_json::from_str(r#"{"session_id": 3}"#).unwrap();
        assert_eq!(req.session_id, 3);
        assert_eq!(req.timeout_ms, None);

        let req: AcquireLockRequest =
            serde_json::from_str(r#"{"session_id": 3, "timeout_ms": 250}"#).unwrap();
        assert_eq!(req.timeout_ms, Some(250));
    }
}
