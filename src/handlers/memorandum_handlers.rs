use crate::{
    errors::AppError,
    handlers::{file_response, multipart_error, parse_uuid_field, read_file_field},
    models::Memorandum,
    state::AppState,
};
use axum::{
    Json,
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

/// `POST /memorandums/upload`
///
/// Multipart with one `memorandum` file part and a required `exam_id`.
pub async fn upload_memorandum(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut file = None;
    let mut exam_id = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "memorandum" if file.is_none() => file = Some(read_file_field(field, 1).await),
            "exam_id" => {
                let text = field.text().await.map_err(multipart_error)?;
                exam_id = Some(parse_uuid_field("exam_id", &text)?);
            }
            _ => {}
        }
    }

    let file = file.ok_or_else(|| AppError::bad_request("No memorandum file uploaded"))?;
    let exam_id = exam_id.ok_or_else(|| AppError::bad_request("`exam_id` is required"))?;

    let created = state.memorandums.upload(file, exam_id).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// `GET /memorandums`
pub async fn list_memorandums(
    State(state): State<AppState>,
) -> Result<Json<Vec<Memorandum>>, AppError> {
    Ok(Json(state.memorandums.list().await?))
}

/// `GET /memorandums/{id}`
pub async fn get_memorandum(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Memorandum>, AppError> {
    Ok(Json(state.memorandums.get(id).await?))
}

/// `GET /memorandums/serve/{id}`
pub async fn serve_memorandum(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let (record, stream) = state.memorandums.open_file(id).await?;
    Ok(file_response(stream, &record.file_name))
}

/// `DELETE /memorandums/delete/{id}`
pub async fn delete_memorandum(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.memorandums.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
