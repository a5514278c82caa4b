//! Route table.
//!
//! - **Probes**: `GET /healthz`, `GET /readyz`
//! - **Answer scripts**
//!   - `POST   /scripts/upload` (multipart `answer_scripts`, optional `exam_id`)
//!   - `GET    /scripts`, `GET /scripts/{id}`, `GET /scripts/serve/{id}`
//!   - `PATCH  /scripts/update/{id}`
//!   - `POST   /scripts/reprocess/{id}`
//!   - `DELETE /scripts/delete/{id}`
//! - **Memorandums**
//!   - `POST   /memorandums/upload` (multipart `memorandum` + `exam_id`)
//!   - `GET    /memorandums`, `GET /memorandums/{id}`, `GET /memorandums/serve/{id}`
//!   - `DELETE /memorandums/delete/{id}`

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        memorandum_handlers::{
            delete_memorandum, get_memorandum, list_memorandums, serve_memorandum,
            upload_memorandum,
        },
        script_handlers::{
            delete_script, get_script, list_scripts, reprocess_script, serve_script,
            update_script, upload_scripts,
        },
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, patch, post},
};

/// Upper bound for one multipart request (axum defaults to 2 MB).
const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/scripts", get(list_scripts))
        .route("/scripts/upload", post(upload_scripts))
        .route("/scripts/serve/{id}", get(serve_script))
        .route("/scripts/update/{id}", patch(update_script))
        .route("/scripts/reprocess/{id}", post(reprocess_script))
        .route("/scripts/delete/{id}", delete(delete_script))
        .route("/scripts/{id}", get(get_script))
        .route("/memorandums", get(list_memorandums))
        .route("/memorandums/upload", post(upload_memorandum))
        .route("/memorandums/serve/{id}", get(serve_memorandum))
        .route("/memorandums/delete/{id}", delete(delete_memorandum))
        .route("/memorandums/{id}", get(get_memorandum))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}
