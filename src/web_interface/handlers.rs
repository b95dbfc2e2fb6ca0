//! Request handlers behind the warp filters.
//!
//! Each handler takes already-extracted request parts and returns a status
//! with a JSON body, so the routing layer stays a thin wrapper.

use std::collections::HashMap;

use log::{info, warn};
use serde_json::{json, Map, Value};
use uuid::Uuid;
use warp::http::StatusCode;

use super::normalize::{normalize_draft_images, normalize_draft_value};
use super::types::*;
use crate::configuration::StudyConfig;
use crate::error_handling::types::SessionError;
use crate::session_management::session_manager::{SessionManager, StartRequest};
use crate::session_management::{SessionStatus, Stage};
use crate::storage::session_filter::from_status_param;
use crate::storage::DatabaseStorage;

/// Top-level progress keys folded into the draft patch.
const ANNOTATION_KEYS: [&str; 3] = ["images", "obfuscation_evaluation", "demographics"];
/// Keys that belong to the session itself and should not be sent as progress.
const DISCOURAGED_KEYS: [&str; 3] = ["session_id", "started_at", "context"];

/// Shared dependencies of all handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: SessionManager,
    pub storage: DatabaseStorage,
    pub study: StudyConfig,
    pub admin_token: Option<String>,
}

fn parse_session_id(raw: &str) -> Result<Uuid, ApiReply> {
    Uuid::parse_str(raw).map_err(|_| bad_request("invalid_session_id", "Invalid session id"))
}

macro_rules! try_reply {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(reply) => return reply,
        }
    };
}

macro_rules! try_session {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(err) => return error_reply(&err),
        }
    };
}

/// GET /scenarios
pub async fn list_scenarios(state: AppState) -> ApiReply {
    let scenarios = try_session!(state.storage.list_scenarios().await.map_err(SessionError::from));
    let views: Vec<ScenarioView> = scenarios.iter().map(ScenarioView::from).collect();
    json_reply(StatusCode::OK, &json!({ "scenarios": views }))
}

/// POST /sessions/start
pub async fn start_session(
    state: AppState,
    query: HashMap<String, String>,
    resume_header: Option<String>,
    body: Value,
) -> ApiReply {
    let scenario = body
        .get("context")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string);
    let target_count = state
        .study
        .resolve_image_count(query.get("n").map(String::as_str));
    let resume_from = resume_header.and_then(|raw| Uuid::parse_str(raw.trim()).ok());

    let outcome = try_session!(
        state
            .manager
            .start(StartRequest {
                scenario,
                target_count,
                resume_from,
            })
            .await
    );
    let status = if outcome.resumed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    json_reply(
        status,
        &json!({ "session": SessionView::from(&outcome.assignment) }),
    )
}

/// GET /sessions/:id
pub async fn get_session(
    state: AppState,
    raw_id: String,
    query: HashMap<String, String>,
) -> ApiReply {
    let id = try_reply!(parse_session_id(&raw_id));
    let assignment = try_session!(state.manager.get(id).await);
    let mut view = SessionView::from(&assignment);
    if query.get("includeDraft").map(String::as_str) == Some("1") {
        view.payload_draft = Some(
            normalize_draft_value(assignment.session.draft.clone()).unwrap_or(Value::Null),
        );
    }
    json_reply(StatusCode::OK, &view)
}

/// Builds the draft patch of a progress request.
///
/// Returns the optional stage and the patch, or a 400 reply for malformed input.
fn progress_patch(
    raw_id: &str,
    body: Value,
) -> Result<(Option<Stage>, Map<String, Value>), ApiReply> {
    let Value::Object(mut body) = body else {
        return Err(bad_request("invalid_payload", "Progress payload must be an object"));
    };

    let stage = match body.remove("stage") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(
            s.parse::<Stage>()
                .map_err(|e| bad_request("invalid_payload", e))?,
        ),
        Some(_) => return Err(bad_request("invalid_payload", "stage must be a string")),
    };

    let mut patch = match body.remove("draft") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(draft)) => draft,
        Some(_) => return Err(bad_request("invalid_payload", "draft must be an object")),
    };

    let flagged: Vec<&str> = DISCOURAGED_KEYS
        .iter()
        .copied()
        .filter(|key| body.contains_key(*key) || patch.contains_key(*key))
        .collect();
    if !flagged.is_empty() {
        warn!(
            "Progress patch includes discouraged keys for {}: {}",
            raw_id,
            flagged.join(", ")
        );
    }

    for key in ANNOTATION_KEYS {
        if let Some(value) = body.remove(key) {
            patch.insert(key.to_string(), value);
        }
    }
    normalize_draft_images(&mut patch);
    Ok((stage, patch))
}

/// PUT /sessions/:id/progress
pub async fn put_progress(state: AppState, raw_id: String, body: Value) -> ApiReply {
    let id = try_reply!(parse_session_id(&raw_id));
    let (stage, patch) = try_reply!(progress_patch(&raw_id, body));
    let session = try_session!(state.manager.merge_progress_checked(id, stage, patch).await);
    json_reply(
        StatusCode::OK,
        &ProgressResponse {
            ok: true,
            session_id: session.id,
            updated_at: session.updated_at,
        },
    )
}

/// POST /sessions/:id/complete
pub async fn complete_session(state: AppState, raw_id: String, body: Value) -> ApiReply {
    let id = try_reply!(parse_session_id(&raw_id));
    if !body.is_object() {
        return bad_request("invalid_payload", "Completion payload must be an object");
    }
    if body.get("session_id").and_then(Value::as_str).is_none() {
        return bad_request("invalid_payload", "session_id is required");
    }
    let outcome = try_session!(state.manager.complete_checked(id, body).await);
    json_reply(
        StatusCode::OK,
        &CompleteResponse {
            ok: true,
            session_id: id,
            status: SessionStatus::Completed,
            completed_at: outcome.completed_at,
            already_completed: outcome.already_completed.then_some(true),
        },
    )
}

/// Rejects the request unless it carries the configured admin token.
pub fn check_admin(state: &AppState, token: Option<&str>) -> Result<(), ApiReply> {
    match state.admin_token.as_deref() {
        None => Ok(()),
        Some(expected) if token == Some(expected) => Ok(()),
        Some(_) => {
            warn!("Rejected admin request with missing or wrong token");
            Err(ApiError::new("unauthorized", "Unauthorized").reply(StatusCode::UNAUTHORIZED))
        }
    }
}

/// GET /admin/overview
pub async fn admin_overview(state: AppState) -> ApiReply {
    let overview = try_session!(state.storage.scenario_overview().await.map_err(SessionError::from));
    json_reply(StatusCode::OK, &json!({ "scenarios": overview }))
}

/// GET /admin/sessions?status=
pub async fn admin_sessions(state: AppState, query: HashMap<String, String>) -> ApiReply {
    let filter = try_reply!(from_status_param(query.get("status").map(String::as_str))
        .map_err(|e| bad_request("invalid_status", e)));
    let sessions = try_session!(state
        .storage
        .list_sessions(Some(filter))
        .await
        .map_err(SessionError::from));
    let summaries: Vec<SessionSummary> = sessions.iter().map(SessionSummary::from).collect();
    json_reply(StatusCode::OK, &json!({ "sessions": summaries }))
}

/// GET /admin/sessions/:id
pub async fn admin_session(state: AppState, raw_id: String) -> ApiReply {
    let id = try_reply!(parse_session_id(&raw_id));
    let assignment = try_session!(state.manager.get(id).await);
    let mut view = SessionView::from(&assignment);
    view.payload_draft = Some(assignment.session.draft.clone().unwrap_or(Value::Null));
    view.payload_final = Some(assignment.session.final_document.clone().unwrap_or(Value::Null));
    json_reply(StatusCode::OK, &view)
}

/// POST /admin/contexts/:id/enabled
pub async fn admin_set_context_enabled(state: AppState, scenario_id: String, body: Value) -> ApiReply {
    let Some(enabled) = body.get("enabled").and_then(Value::as_bool) else {
        return bad_request("invalid_payload", "enabled must be a boolean");
    };
    let updated = try_session!(state
        .storage
        .set_scenario_enabled(&scenario_id, enabled)
        .await
        .map_err(SessionError::from));
    match updated {
        Some(scenario) => {
            info!("Scenario {} enabled set to {}", scenario.id, scenario.enabled);
            json_reply(StatusCode::OK, &ScenarioView::from(&scenario))
        }
        None => ApiError::new("context_not_found", format!("Unknown context id: {}", scenario_id))
            .reply(StatusCode::NOT_FOUND),
    }
}

/// GET /admin/images/summary
pub async fn admin_images_summary(state: AppState) -> ApiReply {
    let summary = try_session!(state.storage.category_summary().await.map_err(SessionError::from));
    json_reply(StatusCode::OK, &json!({ "categories": summary }))
}

/// GET /admin/metrics
pub async fn admin_metrics(state: AppState) -> ApiReply {
    let metrics = try_session!(state.storage.metrics_summary().await.map_err(SessionError::from));
    json_reply(StatusCode::OK, &metrics)
}
