//! Liveness and readiness probes.
//!
//! - GET /healthz  -> always 200
//! - GET /readyz   -> 200 only when SQLite answers and the storage directory
//!   accepts a write/read/delete cycle

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::BTreeMap, path::Path};
use tokio::fs;
use uuid::Uuid;

/// `GET /healthz`
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// `GET /readyz`
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let sqlite = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*state.db)
        .await
    {
        Ok(1) => CheckStatus::ok(),
        Ok(v) => CheckStatus::failed(format!("unexpected result: {v}")),
        Err(e) => CheckStatus::failed(format!("error: {e}")),
    };
    let disk = probe_disk(&state.storage_dir).await;

    let ready = sqlite.ok && disk.ok;
    let mut checks = BTreeMap::new();
    checks.insert("sqlite", sqlite);
    checks.insert("disk", disk);

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadyResponse {
            status: if ready { "ok" } else { "error" },
            checks,
        }),
    )
}

async fn probe_disk(dir: &Path) -> CheckStatus {
    let probe = dir.join(format!(".readyz-{}", Uuid::new_v4()));
    if let Err(e) = fs::create_dir_all(dir).await {
        return CheckStatus::failed(format!("could not create storage dir: {e}"));
    }
    if let Err(e) = fs::write(&probe, b"readyz").await {
        return CheckStatus::failed(format!("could not write probe file: {e}"));
    }
    let read = fs::read(&probe).await;
    let removed = fs::remove_file(&probe).await;
    match (read, removed) {
        (Ok(bytes), Ok(())) if bytes == b"readyz" => CheckStatus::ok(),
        (Ok(bytes), Err(e)) if bytes == b"readyz" => CheckStatus {
            ok: true,
            error: Some(format!("could not remove probe file: {e}")),
        },
        (Ok(_), _) => CheckStatus::failed("probe file content mismatch"),
        (Err(e), _) => CheckStatus::failed(format!("could not read probe file: {e}")),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}
