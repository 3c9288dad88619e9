use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde_json::Value;
use tracing::{error, instrument, warn};

use crate::{auth::AuthUser, entries::handlers::repo_error, state::AppState};

use super::pipeline::AnalysisError;
use super::services::{scan_label, ScanError, ScanUpload};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/scans", post(create_scan)) // multipart field `file`
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024))
}

/// POST /scans: analyze one label photo. The result is not logged; the
/// client posts it to /entries/food once confirmed.
#[instrument(skip(state, mp))]
pub async fn create_scan(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mut mp: Multipart,
) -> Result<Json<Value>, (StatusCode, String)> {
    let Some(analyzer) = state.analyzer.clone() else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "label analysis is not configured".into(),
        ));
    };

    let mut upload = None;
    while let Some(field) = mp
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?
    {
        if field.name() == Some("file") {
            let content_type = field
                .content_type()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "image/jpeg".into());
            let body = field
                .bytes()
                .await
                .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
            upload = Some(ScanUpload { body, content_type });
            break;
        }
    }
    let upload = upload.ok_or((StatusCode::BAD_REQUEST, "file is required".to_string()))?;

    let record = scan_label(
        state.repo.as_ref(),
        state.storage.as_deref(),
        analyzer.as_ref(),
        user_id,
        upload,
    )
    .await
    .map_err(scan_error)?;
    Ok(Json(record))
}

fn scan_error(e: ScanError) -> (StatusCode, String) {
    match e {
        ScanError::EmptyImage => (StatusCode::BAD_REQUEST, e.to_string()),
        ScanError::UnsupportedImage(_) => (StatusCode::UNSUPPORTED_MEDIA_TYPE, e.to_string()),
        ScanError::Analysis(AnalysisError::RateLimited) => {
            warn!("scan rate limited");
            (StatusCode::TOO_MANY_REQUESTS, e.to_string())
        }
        ScanError::Analysis(_) | ScanError::Storage(_) => {
            error!(error = %e, "scan failed");
            (StatusCode::BAD_GATEWAY, e.to_string())
        }
        ScanError::Repo(e) => repo_error(e),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use uuid::Uuid;

    use crate::app::testing::{bearer, call};
    use crate::entries::memory::MemoryRepository;
    use crate::scans::services::fakes::StubAnalyzer;
    use crate::state::AppState;

    const BOUNDARY: &str = "scanboundary";

    fn multipart(user: Uuid, field: &str) -> Request<Body> {
        upload(user, field, "image/png")
    }

    fn upload(user: Uuid, field: &str, content_type: &str) -> Request<Body> {
        let body = format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"{field}\"; filename=\"label.png\"\r\n\
             Content-Type: {content_type}\r\n\r\n\
             PNGDATA\r\n\
             --{BOUNDARY}--\r\n"
        );
        Request::post("/api/v1/scans")
            .header(header::AUTHORIZATION, bearer(user))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn scan_returns_record_with_image_key() {
        let state = AppState::fake();
        let user = Uuid::new_v4();
        let (status, body) = call(&state, multipart(user, "file")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["productName"], "Masala Oats");
        let key = body["imageUri"].as_str().unwrap();
        assert!(key.starts_with(&format!("scans/{user}/")));
        assert!(key.ends_with(".png"));
    }

    #[tokio::test]
    async fn missing_file_field_is_400() {
        let (status, _) = call(&AppState::fake(), multipart(Uuid::new_v4(), "photo")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn non_image_upload_is_415() {
        let req = upload(Uuid::new_v4(), "file", "text/plain");
        let (status, _) = call(&AppState::fake(), req).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn rate_limit_maps_to_429() {
        let state = AppState::fake_with(
            Arc::new(MemoryRepository::new()),
            Some(Arc::new(StubAnalyzer::rate_limited())),
        );
        let (status, _) = call(&state, multipart(Uuid::new_v4(), "file")).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn unconfigured_analysis_is_503() {
        let state = AppState::fake_with(Arc::new(MemoryRepository::new()), None);
        let (status, _) = call(&state, multipart(Uuid::new_v4(), "file")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
