//! Answer-script endpoints. Handlers only translate HTTP; every decision
//! lives in `IngestionService`.

use crate::{
    errors::AppError,
    handlers::{file_response, multipart_error, parse_uuid_field, read_file_field},
    models::{AnswerScript, AnswerScriptUpdate},
    services::ingestion_service::{BatchUploadResult, FailureKind, UploadOptions},
    state::AppState,
};
use axum::{
    Json,
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::info;
use uuid::Uuid;

const FILES_FIELD: &str = "answer_scripts";

/// `POST /scripts/upload`
///
/// Accepts any number of `answer_scripts` file parts plus optional `exam_id`
/// and `subject_id` text parts.
pub async fn upload_scripts(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut files = Vec::new();
    let mut options = UploadOptions::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            FILES_FIELD => {
                let position = files.len() + 1;
                files.push(read_file_field(field, position).await);
            }
            "exam_id" => {
                let text = field.text().await.map_err(multipart_error)?;
                options.exam_id = Some(parse_uuid_field("exam_id", &text)?);
            }
            "subject_id" => {
                let text = field.text().await.map_err(multipart_error)?;
                options.subject_id = Some(parse_uuid_field("subject_id", &text)?);
            }
            _ => {}
        }
    }

    if files.is_empty() {
        return Err(AppError::bad_request("No files uploaded"));
    }

    info!(files = files.len(), "answer script upload received");
    let result = state.scripts.upload_batch(files, options).await;
    Ok((batch_status(&result), Json(result)).into_response())
}

/// 201 when every file committed, 207 on a mix, and 500 (or 400 when only
/// bad input was sent) when nothing committed.
pub fn batch_status(result: &BatchUploadResult) -> StatusCode {
    if result.all_succeeded() {
        StatusCode::CREATED
    } else if result.all_failed() {
        let only_input = result
            .failed_uploads
            .iter()
            .all(|failed| failed.kind == FailureKind::Input);
        if only_input {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    } else {
        StatusCode::MULTI_STATUS
    }
}

/// `GET /scripts`
pub async fn list_scripts(
    State(state): State<AppState>,
) -> Result<Json<Vec<AnswerScript>>, AppError> {
    Ok(Json(state.scripts.list_scripts().await?))
}

/// `GET /scripts/{id}`
pub async fn get_script(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AnswerScript>, AppError> {
    Ok(Json(state.scripts.get_script(id).await?))
}

/// `GET /scripts/serve/{id}`
pub async fn serve_script(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let (record, stream) = state.scripts.open_script_file(id).await?;
    Ok(file_response(stream, &record.file_name))
}

/// `PATCH /scripts/update/{id}`
pub async fn update_script(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(update): Json<AnswerScriptUpdate>,
) -> Result<Json<AnswerScript>, AppError> {
    update.validate().map_err(AppError::bad_request)?;
    Ok(Json(state.scripts.update_script(id, update).await?))
}

/// `POST /scripts/reprocess/{id}`
pub async fn reprocess_script(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AnswerScript>, AppError> {
    Ok(Json(state.scripts.reprocess_script(id).await?))
}

/// `DELETE /scripts/delete/{id}`
pub async fn delete_script(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.scripts.delete_script(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
