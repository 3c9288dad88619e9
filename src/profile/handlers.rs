use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tracing::{instrument, warn};

use crate::{auth::AuthUser, entries::handlers::repo_error, state::AppState};

use super::settings::{
    load_settings, resolve_targets, update_profile, ProfileError, ProfileUpdate, SettingsRecord,
};
use super::targets::NutrientTargets;

pub fn routes() -> Router<AppState> {
    Router::new().route("/settings", get(get_settings).put(put_settings))
}

#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    pub settings: Option<SettingsRecord>,
    pub targets: NutrientTargets,
}

#[instrument(skip(state))]
pub async fn get_settings(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<SettingsResponse>, (StatusCode, String)> {
    let settings = load_settings(state.repo.as_ref(), user_id)
        .await
        .map_err(repo_error)?;
    Ok(Json(SettingsResponse {
        targets: resolve_targets(settings.as_ref()),
        settings,
    }))
}

#[instrument(skip(state, body))]
pub async fn put_settings(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    body: Result<Json<ProfileUpdate>, JsonRejection>,
) -> Result<Json<SettingsResponse>, (StatusCode, String)> {
    let Json(update) = body.map_err(|e| (StatusCode::BAD_REQUEST, e.body_text()))?;
    let saved = update_profile(state.repo.as_ref(), user_id, update)
        .await
        .map_err(|e| match e {
            ProfileError::Repo(e) => repo_error(e),
            other => {
                warn!(error = %other, %user_id, "profile update rejected");
                (StatusCode::BAD_REQUEST, other.to_string())
            }
        })?;
    Ok(Json(SettingsResponse {
        targets: saved.targets(),
        settings: Some(saved),
    }))
}
