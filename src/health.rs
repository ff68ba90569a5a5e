use std::path::Path;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::AppState;
use crate::git::Vcs;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub checks: HealthChecks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub cache_dir: CheckResult,
    pub git: CheckResult,
}

#[derive(Debug, Serialize)]
pub struct CheckResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CheckResult {
    fn healthy(detail: Option<String>) -> Self {
        Self { ok: true, detail }
    }

    fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: Some(detail.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Individual checks
// ---------------------------------------------------------------------------

/// File briefly created under the cache root to prove it accepts writes.
const WRITE_CHECK_FILE: &str = ".gitcache-healthz";

async fn check_cache_dir(path: &Path) -> CheckResult {
    match tokio::fs::metadata(path).await {
        Ok(meta) if !meta.is_dir() => {
            return CheckResult::unhealthy("cache dir is not a directory");
        }
        Ok(_) => {}
        Err(e) => return CheckResult::unhealthy(format!("cannot stat cache dir: {e}")),
    }

    let marker = path.join(WRITE_CHECK_FILE);
    if let Err(e) = tokio::fs::write(&marker, b"ok").await {
        return CheckResult::unhealthy(format!("cache dir is not writable: {e}"));
    }
    if let Err(e) = tokio::fs::remove_file(&marker).await {
        return CheckResult::unhealthy(format!("cannot remove write check file: {e}"));
    }
    CheckResult::healthy(None)
}

async fn check_git(vcs: &dyn Vcs) -> CheckResult {
    match vcs.version().await {
        Ok(version) => CheckResult::healthy(Some(version)),
        Err(e) => CheckResult::unhealthy(format!("git unavailable: {e}")),
    }
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Returns 200 when every check passes, 503 otherwise.
pub async fn health_handler(state: &AppState) -> Response {
    let (cache_dir, git) = tokio::join!(
        check_cache_dir(state.mirrors.root()),
        check_git(state.vcs.as_ref()),
    );

    let checks = HealthChecks { cache_dir, git };
    let status = if checks.cache_dir.ok && checks.git.ok {
        HealthStatus::Ok
    } else {
        HealthStatus::Unhealthy
    };

    let http_status = match status {
        HealthStatus::Ok => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (http_status, Json(HealthResponse { status, checks })).into_response()
}
