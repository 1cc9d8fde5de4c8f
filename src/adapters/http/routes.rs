use std::io::Write;

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tempfile::NamedTempFile;

use crate::adapters::http::state::HttpState;
use crate::application::dto::{
    ConfigResponse, ImageDetectRequest, ImageDetectResponse, OkResponse, StartStreamRequest,
};
use crate::domain::errors::{DomainError, DomainResult};

fn error_response(e: DomainError) -> Response {
    let status = match &e {
        DomainError::NotFound(_) => StatusCode::NOT_FOUND,
        DomainError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        DomainError::OperationFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": e.to_string() }))).into_response()
}

/// The static configuration table: models, source kinds, slider bounds.
pub async fn get_config(State(st): State<HttpState>) -> Response {
    match st.detection.list_models().await {
        Ok(models) => Json(ConfigResponse::new(models)).into_response(),
        Err(e) => error_response(e),
    }
}

/// Image driver: multipart form with `model`, `confidence` (whole percent)
/// and `file`.
pub async fn detect_image(State(st): State<HttpState>, multipart: Multipart) -> Response {
    let req = match parse_image_form(multipart).await {
        Ok(req) => req,
        Err(e) => return error_response(e),
    };
    match st.detection.detect_image(req).await {
        Ok(result) => Json(ImageDetectResponse::from(result)).into_response(),
        Err(e) => error_response(e),
    }
}

/// Video driver: same form shape, but the file is spooled to a temp path
/// (the decoder wants a file, not a buffer) and frames arrive on the
/// WebSocket rather than in the response.
pub async fn detect_video(State(st): State<HttpState>, multipart: Multipart) -> Response {
    let (model, confidence, video) = match parse_video_form(multipart).await {
        Ok(parts) => parts,
        Err(e) => return error_response(e),
    };
    match st.stream.start_video(&model, confidence, video).await {
        Ok(()) => Json(OkResponse { ok: true }).into_response(),
        Err(e) => error_response(e),
    }
}

/// Webcam driver: opens the default camera and streams until stopped.
pub async fn start_webcam(
    State(st): State<HttpState>,
    Json(req): Json<StartStreamRequest>,
) -> Response {
    match st.stream.start_webcam(&req.model, req.confidence).await {
        Ok(()) => Json(OkResponse { ok: true }).into_response(),
        Err(e) => error_response(e),
    }
}

/// Sets the polled stop flag; the stream loop exits within one frame-read
/// cycle.
pub async fn stop_stream(State(st): State<HttpState>) -> Response {
    match st.stream.stop().await {
        Ok(()) => Json(OkResponse { ok: true }).into_response(),
        Err(e) => error_response(e),
    }
}

async fn parse_image_form(mut multipart: Multipart) -> DomainResult<ImageDetectRequest> {
    let mut model = None;
    let mut confidence = None;
    let mut file: Option<(String, Vec<u8>)> = None;

    while let Some(field) = next_field(&mut multipart).await? {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("model") => model = Some(read_text(field).await?),
            Some("confidence") => confidence = Some(parse_confidence(&read_text(field).await?)?),
            Some("file") => {
                let name = field.file_name().unwrap_or("upload").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| DomainError::InvalidInput(format!("bad upload: {e}")))?;
                file = Some((name, data.to_vec()));
            }
            _ => {}
        }
    }

    let (file_name, data) = file.ok_or_else(|| missing("file"))?;
    Ok(ImageDetectRequest {
        model_file: model.ok_or_else(|| missing("model"))?,
        confidence_percent: confidence.ok_or_else(|| missing("confidence"))?,
        file_name,
        data,
    })
}

async fn parse_video_form(mut multipart: Multipart) -> DomainResult<(String, u8, NamedTempFile)> {
    let mut model = None;
    let mut confidence = None;
    let mut video: Option<NamedTempFile> = None;

    while let Some(mut field) = next_field(&mut multipart).await? {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("model") => model = Some(read_text(field).await?),
            Some("confidence") => confidence = Some(parse_confidence(&read_text(field).await?)?),
            Some("file") => {
                // Stream the upload to disk chunk by chunk; videos are large.
                let mut tmp = NamedTempFile::new().map_err(|e| {
                    DomainError::OperationFailed(format!("could not create temp file: {e}"))
                })?;
                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|e| DomainError::InvalidInput(format!("bad upload: {e}")))?
                {
                    tmp.write_all(&chunk).map_err(|e| {
                        DomainError::OperationFailed(format!("could not spool upload: {e}"))
                    })?;
                }
                video = Some(tmp);
            }
            _ => {}
        }
    }

    Ok((
        model.ok_or_else(|| missing("model"))?,
        confidence.ok_or_else(|| missing("confidence"))?,
        video.ok_or_else(|| missing("file"))?,
    ))
}

async fn next_field(
    multipart: &mut Multipart,
) -> DomainResult<Option<axum::extract::multipart::Field<'_>>> {
    multipart
        .next_field()
        .await
        .map_err(|e| DomainError::InvalidInput(format!("bad multipart form: {e}")))
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> DomainResult<String> {
    field
        .text()
        .await
        .map_err(|e| DomainError::InvalidInput(format!("bad form field: {e}")))
}

fn parse_confidence(text: &str) -> DomainResult<u8> {
    text.trim()
        .parse::<u8>()
        .map_err(|_| DomainError::InvalidInput(format!("confidence must be a whole percent, got '{text}'")))
}

fn missing(field: &str) -> DomainError {
    DomainError::InvalidInput(format!("missing form field '{field}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_field_must_be_an_integer() {
        assert_eq!(parse_confidence("50").unwrap(), 50);
        assert_eq!(parse_confidence(" 30 ").unwrap(), 30);
        assert!(parse_confidence("0.5").is_err());
        assert!(parse_confidence("high").is_err());
    }
}
