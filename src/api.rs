use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::batch::{self, BatchError};
use crate::compositor;
use crate::model::ParticipantRecord;
use crate::payload::{self, QrPayload};
use crate::settings::TemplateSettings;
use crate::{archive, util, AppState};

/// Request body ceiling for the router. Must leave room for the largest
/// accepted template after base64 expansion (4/3) plus the participant list
/// and settings around it; axum's 2 MB default would reject valid uploads.
pub const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

#[utoipa::path(get, path = "/health", tag = "qr-batch", responses((status=200, body=HealthResponse)))]
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok".into() })
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SingleQrRequest {
    pub participant: ParticipantRecord,
}

/// Plain single-QR path: no template, no text, deterministic filename.
#[utoipa::path(
    post,
    path = "/qr",
    tag = "qr-batch",
    request_body = SingleQrRequest,
    responses(
        (status = 200, description = "QR PNG", content_type = "image/png"),
        (status = 400, description = "Bad request")
    )
)]
pub async fn single_qr(
    Json(req): Json<SingleQrRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let qr_payload = QrPayload::for_participant(&req.participant);
    let png = compositor::fallback_png(&qr_payload)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let filename = payload::single_qr_filename(&req.participant);
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\"")) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok((headers, png))
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchGenerateRequest {
    /// Background template as a base64 string or data URI.
    pub template: String,
    pub participants: Vec<ParticipantRecord>,
    pub settings: TemplateSettings,
    /// 1..=10 division names; folder order in the archive follows this list.
    pub divisions: Vec<String>,
}

/// Generate one composited image per participant and return them as a ZIP
/// organized by division, with a `summary.json` manifest at the root.
#[utoipa::path(
    post,
    path = "/batch/generate",
    tag = "qr-batch",
    request_body = BatchGenerateRequest,
    responses(
        (status = 200, description = "ZIP archive", content_type = "application/zip"),
        (status = 400, description = "Request rejected before processing"),
        (status = 429, description = "Another batch is already running"),
        (status = 500, description = "Archive assembly failed")
    )
)]
pub async fn batch_generate(
    State(st): State<Arc<AppState>>,
    Json(req): Json<BatchGenerateRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    // One ZIP job at a time: the pipeline is memory-bound by design.
    let Ok(_permit) = st.batch_gate.try_acquire() else {
        return Err((
            StatusCode::TOO_MANY_REQUESTS,
            "another batch generation is already running".to_string(),
        ));
    };

    let template_bytes = util::b64_decode(&req.template).ok_or((
        StatusCode::BAD_REQUEST,
        "template is not valid base64".to_string(),
    ))?;

    let started = Instant::now();
    let result = batch::run(
        &req.participants,
        &template_bytes,
        &req.settings,
        &req.divisions,
        None,
        None,
    )
    .await
    .map_err(|e| match e {
        BatchError::Validation(_) => (StatusCode::BAD_REQUEST, e.to_string()),
        BatchError::Cancelled => (StatusCode::BAD_REQUEST, e.to_string()),
    })?;

    let processing_ms = started.elapsed().as_millis() as u64;
    let zip_bytes = archive::package(&result, &req.settings, processing_ms)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/zip"));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_static("attachment; filename=\"qr_batch.zip\""),
    );
    insert_count(&mut headers, "X-Processed-Count", result.processed_count);
    insert_count(&mut headers, "X-Fallback-Count", result.fallback_count);
    insert_count(&mut headers, "X-Error-Count", result.error_count);
    insert_count(&mut headers, "X-Processing-Ms", processing_ms as usize);

    Ok((headers, zip_bytes))
}

fn insert_count(headers: &mut HeaderMap, name: &'static str, value: usize) {
    if let Ok(v) = HeaderValue::from_str(&value.to_string()) {
        headers.insert(name, v);
    }
}
