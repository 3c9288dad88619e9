use std::convert::Infallible;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{delete, get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use time::{macros::format_description, Date, OffsetDateTime, UtcOffset};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    config::offset_from_minutes,
    entries::{handlers::repo_error, model::{Collection, FoodEntry}},
    state::AppState,
};

use super::ledger::DeletedRecord;
use super::services::{load_day, load_history, load_today, watch_day, DayView, TodayView};

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/diary", get(get_day))
        .route("/diary/stream", get(stream_day))
        .route("/today", get(get_today))
        .route("/history", get(get_history))
}

pub fn write_routes() -> Router<AppState> {
    Router::new()
        .route("/diary/entries/:id", delete(delete_food))
        .route("/diary/water/:id", delete(delete_water))
        .route("/diary/undo", post(undo))
}

/// `?date=YYYY-MM-DD&tz_offset_minutes=330`; both optional.
#[derive(Debug, Deserialize)]
pub struct DayQuery {
    pub date: Option<String>,
    pub tz_offset_minutes: Option<i32>,
}

impl DayQuery {
    fn offset(&self, state: &AppState) -> Result<UtcOffset, (StatusCode, String)> {
        let minutes = self
            .tz_offset_minutes
            .unwrap_or(state.config.default_tz_offset_minutes);
        offset_from_minutes(minutes).map_err(|_| {
            (
                StatusCode::BAD_REQUEST,
                format!("tz_offset_minutes {minutes} is out of range"),
            )
        })
    }

    fn resolve(&self, state: &AppState) -> Result<(Date, UtcOffset), (StatusCode, String)> {
        let offset = self.offset(state)?;
        let date = match self.date.as_deref() {
            Some(raw) => Date::parse(raw, format_description!("[year]-[month]-[day]")).map_err(|_| {
                (
                    StatusCode::BAD_REQUEST,
                    format!("date {raw:?} is not YYYY-MM-DD"),
                )
            })?,
            None => OffsetDateTime::now_utc().to_offset(offset).date(),
        };
        Ok((date, offset))
    }
}

#[instrument(skip(state))]
pub async fn get_day(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(q): Query<DayQuery>,
) -> Result<Json<DayView>, (StatusCode, String)> {
    let (date, offset) = q.resolve(&state)?;
    let (view, _) = load_day(
        state.repo.as_ref(),
        user_id,
        date,
        offset,
        OffsetDateTime::now_utc(),
    )
    .await
    .map_err(repo_error)?;
    Ok(Json(view))
}

#[instrument(skip(state))]
pub async fn get_today(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(q): Query<DayQuery>,
) -> Result<Json<TodayView>, (StatusCode, String)> {
    let offset = q.offset(&state)?;
    let view = load_today(state.repo.as_ref(), user_id, offset, OffsetDateTime::now_utc())
        .await
        .map_err(repo_error)?;
    Ok(Json(view))
}

#[instrument(skip(state))]
pub async fn get_history(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<FoodEntry>>, (StatusCode, String)> {
    let entries = load_history(state.repo.as_ref(), user_id)
        .await
        .map_err(repo_error)?;
    Ok(Json(entries))
}

/// Server-sent `day` events carrying a fresh day view after each change.
#[instrument(skip(state))]
pub async fn stream_day(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(q): Query<DayQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, String)> {
    let (date, offset) = q.resolve(&state)?;
    let views = watch_day(state.repo.clone(), user_id, date, offset);
    let events = views.map(move |view| {
        let event = match view {
            Ok(view) => Event::default().event("day").json_data(&view),
            Err(e) => {
                warn!(error = %e, %user_id, "diary stream refresh failed");
                Ok(Event::default().event("error").data(e.to_string()))
            }
        };
        Ok::<_, Infallible>(
            event.unwrap_or_else(|e| Event::default().event("error").data(e.to_string())),
        )
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

#[instrument(skip(state))]
pub async fn delete_food(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<DeletedRecord>, (StatusCode, String)> {
    let deleted = state
        .ledger
        .delete(user_id, Collection::FoodLogs, &id)
        .await
        .map_err(repo_error)?;
    Ok(Json(deleted))
}

#[instrument(skip(state))]
pub async fn delete_water(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<DeletedRecord>, (StatusCode, String)> {
    let deleted = state
        .ledger
        .delete(user_id, Collection::WaterLogs, &id)
        .await
        .map_err(repo_error)?;
    Ok(Json(deleted))
}

#[derive(Debug, Deserialize)]
pub struct UndoRequest {
    pub token: Uuid,
}

#[derive(Debug, Serialize)]
pub struct RestoredEntry {
    pub id: String,
}

#[instrument(skip(state))]
pub async fn undo(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<UndoRequest>,
) -> Result<(StatusCode, Json<RestoredEntry>), (StatusCode, String)> {
    match state
        .ledger
        .restore(user_id, req.token)
        .await
        .map_err(repo_error)?
    {
        Some(id) => Ok((StatusCode::CREATED, Json(RestoredEntry { id }))),
        None => {
            info!(%user_id, "undo requested after window closed");
            Err((StatusCode::GONE, "nothing to undo".into()))
        }
    }
}
