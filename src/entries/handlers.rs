use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{error, info, instrument, warn};

use crate::{auth::AuthUser, state::AppState};

use super::model::{Collection, NewFoodEntry, NewWaterEntry};
use super::repo::RepoError;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/entries/food", post(log_food))
        .route("/entries/water", post(log_water))
}

#[derive(Debug, Serialize)]
pub struct CreatedEntry {
    pub id: String,
}

#[instrument(skip(state, body))]
pub async fn log_food(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    body: Result<Json<NewFoodEntry>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedEntry>), (StatusCode, String)> {
    let Json(entry) = body.map_err(bad_body)?;
    if entry.product_name.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "productName is required".into()));
    }
    let id = state
        .repo
        .append(user_id, Collection::FoodLogs, entry.into_record(now_ms()))
        .await
        .map_err(repo_error)?;
    info!(%user_id, entry_id = %id, "food logged");
    Ok((StatusCode::CREATED, Json(CreatedEntry { id })))
}

#[instrument(skip(state, body))]
pub async fn log_water(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    body: Result<Json<NewWaterEntry>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedEntry>), (StatusCode, String)> {
    let Json(entry) = body.map_err(bad_body)?;
    if !(entry.amount.is_finite() && entry.amount > 0.0) {
        return Err((
            StatusCode::BAD_REQUEST,
            "amount must be a positive number of liters".into(),
        ));
    }
    let id = state
        .repo
        .append(user_id, Collection::WaterLogs, entry.into_record(now_ms()))
        .await
        .map_err(repo_error)?;
    info!(%user_id, entry_id = %id, "water logged");
    Ok((StatusCode::CREATED, Json(CreatedEntry { id })))
}

pub(crate) fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

fn bad_body(e: JsonRejection) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, e.body_text())
}

/// HTTP status for a repository failure.
pub(crate) fn repo_error(e: RepoError) -> (StatusCode, String) {
    match e {
        RepoError::NotFound { .. } => {
            warn!(error = %e, "record not found");
            (StatusCode::NOT_FOUND, e.to_string())
        }
        RepoError::Unavailable(_) => {
            error!(error = %e, "repository unavailable");
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::StatusCode;
    use serde_json::json;
    use uuid::Uuid;

    use crate::app::testing::{call, json_request};
    use crate::entries::memory::MemoryRepository;
    use crate::entries::model::Collection;
    use crate::entries::repo::EntryRepository;
    use crate::state::AppState;

    #[tokio::test]
    async fn logs_food_with_extra_fields() {
        let repo = Arc::new(MemoryRepository::new());
        let state = AppState::fake_with(repo.clone(), None);
        let user = Uuid::new_v4();

        let (status, body) = call(
            &state,
            json_request(
                "POST",
                "/api/v1/entries/food",
                user,
                json!({
                    "productName": "Poha",
                    "calories": "250",
                    "healthScore": "70",
                    "timestamp": 42,
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let stored = repo.fetch_all(user, Collection::FoodLogs).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, body["id"]);
        assert_eq!(stored[0].record["healthScore"], "70");
        assert_eq!(stored[0].record["timestamp"], 42);
    }

    #[tokio::test]
    async fn food_needs_a_name() {
        let state = AppState::fake();
        let blank = json!({ "productName": "  " });
        let req = json_request("POST", "/api/v1/entries/food", Uuid::new_v4(), blank);
        let (status, _) = call(&state, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn water_amount_must_be_positive_number() {
        let state = AppState::fake();
        let user = Uuid::new_v4();
        for bad in [
            json!({ "amount": 0 }),
            json!({ "amount": -0.25 }),
            json!({ "amount": "lots" }),
        ] {
            let req = json_request("POST", "/api/v1/entries/water", user, bad);
            let (status, _) = call(&state, req).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }
        let (status, _) = call(
            &state,
            json_request("POST", "/api/v1/entries/water", user, json!({ "amount": 0.25 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn unavailable_store_is_503() {
        let repo = Arc::new(MemoryRepository::new());
        repo.set_offline(true);
        let state = AppState::fake_with(repo, None);
        let (status, _) = call(
            &state,
            json_request("POST", "/api/v1/entries/water", Uuid::new_v4(), json!({ "amount": 0.5 })),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
