//! HTTP handler for `POST /`.
//! Streams the uploaded file into the conversion service and returns the
//! converted bytes as an attachment.

use crate::{
    errors::AppError,
    models::conversion::ConvertedFile,
    services::conversion_service::{ConversionError, ConversionService},
};
use axum::{
    body::Body,
    extract::{Multipart, State, multipart::MultipartError},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use futures::StreamExt;
use std::{fmt::Write as _, io};

/// Convert the first file field of a multipart upload.
///
/// Non-file fields are skipped. The response is only built once the
/// converter has finished and its output has been read in full.
pub async fn convert_upload(
    State(service): State<ConversionService>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    while let Some(field) = multipart.next_field().await? {
        let Some(file_name) = field.file_name().map(str::to_owned) else {
            continue;
        };

        let stream = field.map(|chunk| chunk.map_err(io::Error::other));
        let converted = service
            .convert(&file_name, stream)
            .await
            .map_err(upload_error)?;

        return file_response(converted);
    }

    Err(AppError::bad_request("multipart body contains no file field"))
}

/// A read error on the upload itself is the client's problem (truncated or
/// oversized body), everything else goes through the generic mapping.
fn upload_error(err: ConversionError) -> AppError {
    if let ConversionError::Io(io_err) = &err {
        if let Some(multipart_err) = io_err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<MultipartError>())
        {
            return AppError::new(multipart_err.status(), multipart_err.body_text());
        }
    }
    err.into()
}

fn file_response(converted: ConvertedFile) -> Result<Response, AppError> {
    let disposition = HeaderValue::from_str(&content_disposition(&converted.file_name))
        .map_err(|err| AppError::internal(format!("invalid download name: {}", err)))?;

    let mut response = Response::new(Body::from(converted.bytes));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    Ok(response)
}

/// Build an `attachment` disposition for `file_name`.
///
/// The quoted `filename` is restricted to printable ASCII; names outside
/// that range also get an RFC 5987 `filename*` parameter.
fn content_disposition(file_name: &str) -> String {
    let mut ascii = String::with_capacity(file_name.len());
    for c in file_name.chars() {
        match c {
            '"' | '\\' => {
                ascii.push('\\');
                ascii.push(c);
            }
            ' '..='~' => ascii.push(c),
            _ => ascii.push('_'),
        }
    }

    let mut value = format!("attachment; filename=\"{}\"", ascii);
    if !file_name.chars().all(|c| matches!(c, ' '..='~')) {
        value.push_str("; filename*=UTF-8''");
        for byte in file_name.bytes() {
            if byte.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&byte) {
                value.push(byte as char);
            } else {
                let _ = write!(value, "%{:02X}", byte);
            }
        }
    }
    value
}
