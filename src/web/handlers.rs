//! HTTP request handlers.

use super::AppState;
use crate::db::{
    DbError, EventStore, NotificationRule, NotificationStore, RuleKind, SettingsStore, StationStore,
};
use crate::scheduler::{compute_uptime_percent, MonitorError, StationState, MAX_DOWN_MINUTES};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

/// Header a station authenticates its pings with.
pub const STATION_KEY_HEADER: &str = "x-station-key";

const MAX_UPTIME_HOURS: i64 = 720;

// ============================================================================
// Service health
// ============================================================================

pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "tick_running": state.scheduler.is_running(),
        "last_tick": state.scheduler.last_tick(),
    }))
}

// ============================================================================
// API: Station health pings
// ============================================================================

pub async fn handle_station_ping(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let station = match state.store.get_station(id) {
        Ok(Some(s)) => s,
        Ok(None) => return (StatusCode::NOT_FOUND, "Station not found").into_response(),
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    let key = headers
        .get(STATION_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if key.is_empty() || key != station.api_key {
        return (StatusCode::UNAUTHORIZED, "Invalid station key").into_response();
    }

    match state.store.append_event(id, state.clock.now()) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(DbError::NotFound) => (StatusCode::NOT_FOUND, "Station not found").into_response(),
        Err(e) => {
            tracing::error!(station_id = id, "Failed to record health ping: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

// ============================================================================
// API: Uptime
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct UptimeQuery {
    #[serde(default)]
    pub hours: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct UptimeResponse {
    pub station_id: i64,
    pub window_hours: i64,
    pub uptime_percent: f64,
    pub online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

pub async fn handle_station_uptime(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<UptimeQuery>,
) -> impl IntoResponse {
    let hours = query.hours.unwrap_or(24);
    if !(1..=MAX_UPTIME_HOURS).contains(&hours) {
        return (
            StatusCode::BAD_REQUEST,
            format!("hours must be between 1 and {}", MAX_UPTIME_HOURS),
        )
            .into_response();
    }

    let station = match state.store.get_station(id) {
        Ok(Some(s)) => s,
        Ok(None) => return (StatusCode::NOT_FOUND, "Station not found").into_response(),
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    let station_state = match StationState::resolve(state.store.as_ref(), station) {
        Ok(s) => s,
        Err(MonitorError::Config(msg)) => {
            return (StatusCode::UNPROCESSABLE_ENTITY, msg).into_response()
        }
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    let now = state.clock.now();
    let window_start = now - ChronoDuration::hours(hours);
    let events: Vec<_> = match state.store.events_between(id, window_start, now) {
        Ok(events) => events.into_iter().map(|e| e.timestamp).collect(),
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    Json(UptimeResponse {
        station_id: id,
        window_hours: hours,
        uptime_percent: compute_uptime_percent(&events, station_state.threshold, window_start, now),
        online: station_state.is_online(now),
        last_seen: station_state.last_seen,
    })
    .into_response()
}

// ============================================================================
// API: Notifications
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct NotificationsQuery {
    #[serde(default)]
    pub unread_only: Option<bool>,
}

pub async fn handle_list_notifications(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Query(query): Query<NotificationsQuery>,
) -> impl IntoResponse {
    match state
        .store
        .list_notifications(user_id, query.unread_only.unwrap_or(false))
    {
        Ok(list) => Json(list).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn handle_mark_read(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.store.mark_read(id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(DbError::NotFound) => (StatusCode::NOT_FOUND, "Notification not found").into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ============================================================================
// API: Notification settings
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct UpdateSettingsRequest {
    pub rules: Vec<NotificationRule>,
}

pub async fn handle_get_settings(
    State(state): State<AppState>,
    Path(station_id): Path<i64>,
) -> impl IntoResponse {
    match state.store.settings_for_station(station_id) {
        Ok(Some(settings)) => Json(settings).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "No notification settings").into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn handle_put_settings(
    State(state): State<AppState>,
    Path(station_id): Path<i64>,
    Json(req): Json<UpdateSettingsRequest>,
) -> impl IntoResponse {
    if let Err(e) = validate_rules(&req.rules) {
        return (StatusCode::BAD_REQUEST, e).into_response();
    }

    match state.store.get_station(station_id) {
        Ok(Some(_)) => {}
        Ok(None) => return (StatusCode::NOT_FOUND, "Station not found").into_response(),
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }

    match state.store.replace_rules(station_id, &req.rules) {
        Ok(settings) => Json(settings).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Validate a rule set before it is stored.
pub fn validate_rules(rules: &[NotificationRule]) -> Result<(), String> {
    for rule in rules {
        match rule.kind {
            RuleKind::DownMinutes => match rule.threshold {
                Some(t) if (1..=MAX_DOWN_MINUTES).contains(&t) => {}
                _ => {
                    return Err(format!(
                        "down_minutes threshold must be between 1 and {} minutes",
                        MAX_DOWN_MINUTES
                    ))
                }
            },
            RuleKind::LowUptime => match rule.threshold {
                Some(t) if (1..=100).contains(&t) => {}
                _ => {
                    return Err(
                        "low_uptime threshold must be a percentage between 1 and 100".to_string()
                    )
                }
            },
            RuleKind::BackOnline => {}
        }
    }
    Ok(())
}
