pub mod health_handlers;
pub mod memorandum_handlers;
pub mod script_handlers;

use crate::{
    errors::AppError, services::content_store::ObjectStream,
    services::ingestion_service::UploadedFile,
};
use axum::{
    body::Body,
    extract::multipart::{Field, MultipartError},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

/// Read one multipart file field. A body that fails mid-read is kept as an
/// unreadable file so the batch can report it.
pub(crate) async fn read_file_field(field: Field<'_>, position: usize) -> UploadedFile {
    let file_name = field
        .file_name()
        .map(str::to_string)
        .unwrap_or_else(|| format!("upload-{position}.pdf"));
    let content_type = field.content_type().map(str::to_string);
    match field.bytes().await {
        Ok(bytes) => UploadedFile::new(file_name, content_type, bytes),
        Err(err) => UploadedFile::unreadable(file_name, err.body_text()),
    }
}

pub(crate) fn multipart_error(err: MultipartError) -> AppError {
    AppError::bad_request(format!("malformed multipart body: {}", err.body_text()))
}

pub(crate) fn parse_uuid_field(name: &str, value: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(value.trim())
        .map_err(|err| AppError::bad_request(format!("`{name}` is not a valid id: {err}")))
}

/// Stream a stored object back to the client.
pub(crate) fn file_response(stream: ObjectStream, file_name: &str) -> Response {
    let content_type = stream
        .content_type
        .clone()
        .unwrap_or_else(|| "application/pdf".to_string());
    let mut response = Response::new(Body::from_stream(ReaderStream::new(stream.reader)));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(stream.size));
    let disposition = format!("inline; filename=\"{}\"", file_name.replace('"', ""));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    response
}
