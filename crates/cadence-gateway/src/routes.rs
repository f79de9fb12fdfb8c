//! API route handlers for the gateway.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cadence_core::error::CadenceError;
use cadence_core::types::{AppletId, EventId, UserId};
use cadence_scheduler::{EventRequest, ScheduleQuery, UpcomingWindow};
use chrono::{FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::server::{Actor, AppState};

/// Error response: `{"ok": false, "error": "..."}` with a status per error kind.
#[derive(Debug)]
pub struct ApiError(pub CadenceError);

impl From<CadenceError> for ApiError {
    fn from(e: CadenceError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            CadenceError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CadenceError::NotFound(_) => StatusCode::NOT_FOUND,
            CadenceError::NoPermission(_) => StatusCode::FORBIDDEN,
            CadenceError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("❌ Request failed: {}", self.0);
        } else {
            tracing::debug!("↩️ {status}: {}", self.0);
        }
        let body = serde_json::json!({"ok": false, "error": self.0.to_string()});
        (status, Json(body)).into_response()
    }
}

pub type ApiResult = Result<Response, ApiError>;

fn ok<T: Serialize>(status: StatusCode, result: T) -> ApiResult {
    let result = serde_json::to_value(result).map_err(CadenceError::from)?;
    Ok((status, Json(serde_json::json!({"ok": true, "result": result}))).into_response())
}

fn no_content() -> ApiResult {
    Ok(StatusCode::NO_CONTENT.into_response())
}

// ---- Health ----

/// Liveness plus push queue counters.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let push = state.service.push();
    Json(serde_json::json!({
        "ok": true,
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "push": {
            "enabled": push.is_enabled(),
            "stats": push.stats(),
            "recent": push.history().into_iter().rev().take(10).collect::<Vec<_>>(),
        },
    }))
}

// ---- Applet schedules (managers) ----

pub async fn create_event(
    State(state): State<Arc<AppState>>,
    Extension(Actor(actor)): Extension<Actor>,
    Path(applet_id): Path<AppletId>,
    Json(body): Json<EventRequest>,
) -> ApiResult {
    let event = state.service.create_schedule(actor, applet_id, body)?;
    ok(StatusCode::CREATED, event)
}

pub async fn list_events(
    State(state): State<Arc<AppState>>,
    Extension(Actor(actor)): Extension<Actor>,
    Path(applet_id): Path<AppletId>,
    Query(query): Query<ScheduleQuery>,
) -> ApiResult {
    ok(StatusCode::OK, state.service.get_all_schedules(actor, applet_id, &query)?)
}

pub async fn delete_all_events(
    State(state): State<Arc<AppState>>,
    Extension(Actor(actor)): Extension<Actor>,
    Path(applet_id): Path<AppletId>,
) -> ApiResult {
    state.service.delete_all_schedules(actor, applet_id)?;
    no_content()
}

pub async fn get_event(
    State(state): State<Arc<AppState>>,
    Extension(Actor(actor)): Extension<Actor>,
    Path((applet_id, event_id)): Path<(AppletId, EventId)>,
) -> ApiResult {
    ok(StatusCode::OK, state.service.get_schedule_by_id(actor, applet_id, event_id)?)
}

pub async fn update_event(
    State(state): State<Arc<AppState>>,
    Extension(Actor(actor)): Extension<Actor>,
    Path((applet_id, event_id)): Path<(AppletId, EventId)>,
    Json(body): Json<EventRequest>,
) -> ApiResult {
    ok(StatusCode::OK, state.service.update_schedule(actor, applet_id, event_id, body)?)
}

pub async fn delete_event(
    State(state): State<Arc<AppState>>,
    Extension(Actor(actor)): Extension<Actor>,
    Path((applet_id, event_id)): Path<(AppletId, EventId)>,
) -> ApiResult {
    state.service.delete_schedule_by_id(actor, applet_id, event_id)?;
    no_content()
}

pub async fn count_events(
    State(state): State<Arc<AppState>>,
    Extension(Actor(actor)): Extension<Actor>,
    Path(applet_id): Path<AppletId>,
) -> ApiResult {
    ok(StatusCode::OK, state.service.count_schedules(actor, applet_id)?)
}

pub async fn delete_user_events(
    State(state): State<Arc<AppState>>,
    Extension(Actor(actor)): Extension<Actor>,
    Path((applet_id, respondent_id)): Path<(AppletId, UserId)>,
) -> ApiResult {
    state.service.delete_by_user_id(actor, applet_id, respondent_id)?;
    no_content()
}

pub async fn create_individual_events(
    State(state): State<Arc<AppState>>,
    Extension(Actor(actor)): Extension<Actor>,
    Path((applet_id, respondent_id)): Path<(AppletId, UserId)>,
) -> ApiResult {
    let events = state.service.create_schedule_individual(actor, applet_id, respondent_id)?;
    ok(StatusCode::CREATED, events)
}

pub async fn remove_individual_calendar(
    State(state): State<Arc<AppState>>,
    Extension(Actor(actor)): Extension<Actor>,
    Path((applet_id, respondent_id)): Path<(AppletId, UserId)>,
) -> ApiResult {
    state.service.remove_individual_calendar(actor, applet_id, respondent_id)?;
    no_content()
}

pub async fn import_events(
    State(state): State<Arc<AppState>>,
    Extension(Actor(actor)): Extension<Actor>,
    Path(applet_id): Path<AppletId>,
    Json(body): Json<Vec<EventRequest>>,
) -> ApiResult {
    let events = state.service.import_schedule(actor, applet_id, body)?;
    ok(StatusCode::CREATED, events)
}

// ---- Respondent schedules ----

pub async fn my_events(
    State(state): State<Arc<AppState>>,
    Extension(Actor(actor)): Extension<Actor>,
) -> ApiResult {
    ok(StatusCode::OK, state.service.get_events_by_user(actor)?)
}

pub async fn my_applet_events(
    State(state): State<Arc<AppState>>,
    Extension(Actor(actor)): Extension<Actor>,
    Path(applet_id): Path<AppletId>,
) -> ApiResult {
    ok(StatusCode::OK, state.service.get_events_by_user_and_applet(actor, applet_id)?)
}

/// `?appletIds=1,2&minEndDate=...&maxStartDate=...`; dates default to the
/// configured window around today.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpcomingParams {
    #[serde(default)]
    pub applet_ids: Option<String>,
    #[serde(default)]
    pub min_end_date: Option<NaiveDate>,
    #[serde(default)]
    pub max_start_date: Option<NaiveDate>,
}

fn parse_id_list(raw: &str) -> Result<Vec<AppletId>, CadenceError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().map_err(|_| CadenceError::validation(format!("invalid applet id '{s}'"))))
        .collect()
}

pub async fn my_upcoming_events(
    State(state): State<Arc<AppState>>,
    Extension(Actor(actor)): Extension<Actor>,
    Query(params): Query<UpcomingParams>,
) -> ApiResult {
    let default = state.service.upcoming_window(Utc::now().date_naive());
    let window = UpcomingWindow {
        min_end_date: params.min_end_date.unwrap_or(default.min_end_date),
        max_start_date: params.max_start_date.unwrap_or(default.max_start_date),
    };
    if window.min_end_date > window.max_start_date {
        return Err(CadenceError::validation("minEndDate is after maxStartDate").into());
    }
    let applet_ids = params.applet_ids.as_deref().map(parse_id_list).transpose()?;
    let events = state
        .service
        .get_upcoming_events_by_user(actor, applet_ids.as_deref(), window)?;
    ok(StatusCode::OK, events)
}

/// `?utcOffsetMinutes=120&completed=12:2024-06-01,13:2024-06-03`; `completed`
/// lists the last completion date per event and gates reminders.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerParams {
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default)]
    pub completed: Option<String>,
}

fn parse_completions(raw: &str) -> Result<HashMap<EventId, NaiveDate>, CadenceError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let invalid = || CadenceError::validation(format!("invalid completion '{pair}', expected eventId:YYYY-MM-DD"));
            let (id, date) = pair.split_once(':').ok_or_else(invalid)?;
            let id = id.trim().parse().map_err(|_| invalid())?;
            let date = date.trim().parse().map_err(|_| invalid())?;
            Ok((id, date))
        })
        .collect()
}

pub async fn my_triggers(
    State(state): State<Arc<AppState>>,
    Extension(Actor(actor)): Extension<Actor>,
    Query(params): Query<TriggerParams>,
) -> ApiResult {
    let offset = params
        .utc_offset_minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| CadenceError::validation(format!("utcOffsetMinutes {} out of range", params.utc_offset_minutes)))?;
    let completions = match params.completed.as_deref() {
        Some(raw) => parse_completions(raw)?,
        None => HashMap::new(),
    };
    let today = Utc::now().with_timezone(&offset).date_naive();
    ok(StatusCode::OK, state.service.upcoming_triggers(actor, today, offset, &completions)?)
}

// ---- Public ----

pub async fn public_events(State(state): State<Arc<AppState>>, Path(key): Path<String>) -> ApiResult {
    ok(StatusCode::OK, state.service.get_public_schedule(&key)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::config::{GatewayConfig, ScheduleConfig};
    use cadence_scheduler::{DirectorySeed, PushQueue, ScheduleDb, ScheduleService, SqliteDirectory};

    const OWNER: UserId = 1;
    const RESPONDENT: UserId = 2;
    const STRANGER: UserId = 3;

    fn test_state() -> State<Arc<AppState>> {
        let db = Arc::new(ScheduleDb::open_in_memory().unwrap());
        let directory = SqliteDirectory::new(db.clone());
        let seed: DirectorySeed = serde_json::from_value(serde_json::json!({
            "applets": [{"id": 1, "name": "Mood", "link_key": "mood"}],
            "activities": [{"id": 1, "applet_id": 1, "name": "Check-in"}],
            "flows": [{"id": 1, "applet_id": 1, "name": "Morning"}],
            "roles": [
                {"applet_id": 1, "user_id": OWNER, "role": "owner"},
                {"applet_id": 1, "user_id": RESPONDENT, "role": "respondent"}
            ]
        }))
        .unwrap();
        directory.seed(&seed).unwrap();
        let service = ScheduleService::new(db, Arc::new(directory), PushQueue::disabled(), ScheduleConfig::default());
        State(Arc::new(AppState {
            service: Arc::new(service),
            config: GatewayConfig::default(),
            start_time: std::time::Instant::now(),
        }))
    }

    fn body(activity_id: Option<i64>, flow_id: Option<i64>) -> Json<EventRequest> {
        Json(
            serde_json::from_value(serde_json::json!({
                "start_time": "08:00:00",
                "end_time": "09:00:00",
                "timer_type": "NOT_SET",
                "periodicity": {"type": "ALWAYS"},
                "activity_id": activity_id,
                "flow_id": flow_id
            }))
            .unwrap(),
        )
    }

    async fn json_of(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn create(state: &State<Arc<AppState>>, activity_id: Option<i64>, flow_id: Option<i64>) -> i64 {
        let resp = create_event(state.clone(), Extension(Actor(OWNER)), Path(1), body(activity_id, flow_id))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        json_of(resp).await["result"]["id"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let json = health_check(test_state()).await.0;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["push"]["enabled"], false);
        assert_eq!(json["push"]["recent"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_create_and_get_event() {
        let state = test_state();
        let id = create(&state, Some(1), None).await;
        let resp = get_event(state.clone(), Extension(Actor(OWNER)), Path((1, id))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = json_of(resp).await;
        assert_eq!(json["ok"], true);
        assert_eq!(json["result"]["startTime"], "08:00:00");
        assert_eq!(json["result"]["activityId"], 1);
    }

    #[tokio::test]
    async fn test_create_with_both_targets_is_422() {
        let err = create_event(test_state(), Extension(Actor(OWNER)), Path(1), body(Some(1), Some(1)))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let json = json_of(err.into_response()).await;
        assert_eq!(json["ok"], false);
        assert!(json["error"].as_str().unwrap().contains("not both"));
    }

    #[tokio::test]
    async fn test_stranger_is_forbidden() {
        let err = list_events(test_state(), Extension(Actor(STRANGER)), Path(1), Query(ScheduleQuery::default()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_delete_unknown_is_404() {
        let err = delete_event(test_state(), Extension(Actor(OWNER)), Path((1, 77))).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_count_and_delete_all() {
        let state = test_state();
        create(&state, Some(1), None).await;
        create(&state, None, Some(1)).await;
        let json = json_of(count_events(state.clone(), Extension(Actor(OWNER)), Path(1)).await.unwrap()).await;
        assert_eq!(json["result"]["activityEvents"][0]["count"], 1);
        assert_eq!(json["result"]["flowEvents"][0]["flowName"], "Morning");

        let resp = delete_all_events(state.clone(), Extension(Actor(OWNER)), Path(1)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        let json = json_of(
            list_events(state, Extension(Actor(OWNER)), Path(1), Query(ScheduleQuery::default()))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(json["result"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_individual_calendar_round_trip() {
        let state = test_state();
        create(&state, Some(1), None).await;
        let resp = create_individual_events(state.clone(), Extension(Actor(OWNER)), Path((1, RESPONDENT)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let json = json_of(my_applet_events(state.clone(), Extension(Actor(RESPONDENT)), Path(1)).await.unwrap()).await;
        assert_eq!(json["result"]["events"][0]["respondentId"], RESPONDENT);

        let resp = delete_user_events(state.clone(), Extension(Actor(OWNER)), Path((1, RESPONDENT)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        let err = delete_user_events(state.clone(), Extension(Actor(OWNER)), Path((1, RESPONDENT)))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        let resp = remove_individual_calendar(state, Extension(Actor(OWNER)), Path((1, RESPONDENT)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_upcoming_rejects_bad_params() {
        let state = test_state();
        let params = UpcomingParams {
            applet_ids: Some("1,x".into()),
            ..UpcomingParams::default()
        };
        let err = my_upcoming_events(state.clone(), Extension(Actor(RESPONDENT)), Query(params))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);

        create(&state, Some(1), None).await;
        let params = UpcomingParams { applet_ids: Some("1".into()), ..UpcomingParams::default() };
        let json = json_of(my_upcoming_events(state, Extension(Actor(RESPONDENT)), Query(params)).await.unwrap()).await;
        assert_eq!(json["result"][0]["events"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_public_events() {
        let state = test_state();
        create(&state, Some(1), None).await;
        let json = json_of(public_events(state.clone(), Path("mood".into())).await.unwrap()).await;
        assert_eq!(json["result"]["appletId"], 1);
        let err = public_events(state, Path("missing".into())).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_import_and_triggers() {
        let state = test_state();
        let Json(first) = body(Some(1), None);
        let Json(second) = body(None, Some(1));
        let resp = import_events(state.clone(), Extension(Actor(OWNER)), Path(1), Json(vec![first, second]))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = my_triggers(state.clone(), Extension(Actor(RESPONDENT)), Query(TriggerParams { utc_offset_minutes: 120, completed: None }))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let err = my_triggers(state.clone(), Extension(Actor(RESPONDENT)), Query(TriggerParams { utc_offset_minutes: 100_000, completed: None }))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let err = my_triggers(state.clone(), Extension(Actor(RESPONDENT)), Query(TriggerParams { utc_offset_minutes: i32::MAX, completed: None }))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let params = TriggerParams { utc_offset_minutes: 0, completed: Some("1:2024-06-01, 2:2024-06-03".into()) };
        let resp = my_triggers(state.clone(), Extension(Actor(RESPONDENT)), Query(params)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let params = TriggerParams { utc_offset_minutes: 0, completed: Some("1-2024-06-01".into()) };
        let err = my_triggers(state, Extension(Actor(RESPONDENT)), Query(params)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_router_auth_and_public_routes() {
        use axum::body::Body;
        use axum::http::Request;
        use tower::ServiceExt;

        let State(shared) = test_state();
        let app = crate::server::build_router_from_arc(shared);

        let anonymous = Request::builder().uri("/applets/1/events").body(Body::empty()).unwrap();
        let resp = app.clone().oneshot(anonymous).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let owner = Request::builder()
            .uri("/applets/1/events")
            .header("X-User-Id", "1")
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(owner).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let count = Request::builder()
            .uri("/applets/1/events/count")
            .header("X-User-Id", "1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(app.clone().oneshot(count).await.unwrap().status(), StatusCode::OK);

        let health = Request::builder().uri("/health").body(Body::empty()).unwrap();
        assert_eq!(app.oneshot(health).await.unwrap().status(), StatusCode::OK);
    }
}
