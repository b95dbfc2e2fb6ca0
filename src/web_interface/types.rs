use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;
use warp::http::StatusCode;

use crate::error_handling::types::{ErrorKind, SessionError};
use crate::session_management::session::{Session, SessionAssignment, SessionImage};
use crate::session_management::{SessionStatus, Stage, Statement};
use crate::storage::types::{ImageCategory, Scenario};

/// Status and JSON body produced by every handler.
pub type ApiReply = (StatusCode, Value);

/// API error payload
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub message: String,
    pub details: Value,
}

impl ApiError {
    pub fn new(error: &str, message: impl Into<String>) -> Self {
        Self {
            error: error.to_string(),
            message: message.into(),
            details: Value::Null,
        }
    }

    pub fn reply(self, status: StatusCode) -> ApiReply {
        (status, json!(self))
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidState
        | ErrorKind::AllocationFailure
        | ErrorKind::NoScenarioAvailable => StatusCode::CONFLICT,
        ErrorKind::ValidationMismatch => StatusCode::BAD_REQUEST,
        ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<&SessionError> for ApiError {
    fn from(err: &SessionError) -> Self {
        Self {
            error: err.code().to_string(),
            message: err.to_string(),
            details: err.details(),
        }
    }
}

pub fn error_reply(err: &SessionError) -> ApiReply {
    ApiError::from(err).reply(status_for(err.kind()))
}

pub fn bad_request(code: &str, message: impl Into<String>) -> ApiReply {
    ApiError::new(code, message).reply(StatusCode::BAD_REQUEST)
}

/// Serializes a response body, reporting a 500 if that fails.
pub fn json_reply<T: Serialize>(status: StatusCode, body: &T) -> ApiReply {
    match serde_json::to_value(body) {
        Ok(value) => (status, value),
        Err(e) => ApiError::new("serialization_failed", e.to_string())
            .reply(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

#[derive(Debug, Serialize)]
pub struct ScenarioView {
    pub id: String,
    pub title: String,
    pub description: String,
    pub name: String,
    #[serde(rename = "shortLabel")]
    pub short_label: Option<String>,
    #[serde(rename = "annotationLine")]
    pub annotation_line: String,
    pub enabled: bool,
}

impl From<&Scenario> for ScenarioView {
    fn from(scenario: &Scenario) -> Self {
        Self {
            id: scenario.id.clone(),
            title: scenario.title.clone(),
            description: scenario.description.clone(),
            name: scenario.title.clone(),
            short_label: scenario.short_label.clone(),
            annotation_line: scenario.description.clone(),
            enabled: scenario.enabled,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ImageView {
    pub image_id: String,
    pub category: ImageCategory,
    pub order_index: u32,
    pub statement: Statement,
}

impl From<&SessionImage> for ImageView {
    fn from(image: &SessionImage) -> Self {
        Self {
            image_id: image.image_id.clone(),
            category: image.category,
            order_index: image.order_index,
            statement: image.statement,
        }
    }
}

/// Session summary used in listings.
#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub context: Option<String>,
    pub stage: Option<Stage>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.id,
            status: session.status,
            context: session.scenario_id.clone(),
            stage: session.stage,
            started_at: session.started_at,
            updated_at: session.updated_at,
            completed_at: session.completed_at,
        }
    }
}

/// A session with its scenario and presentation sequence.
#[derive(Debug, Serialize)]
pub struct SessionView {
    #[serde(flatten)]
    pub summary: SessionSummary,
    pub scenario: Option<ScenarioView>,
    pub statement_order: Statement,
    pub target_image_count: u32,
    pub images: Vec<ImageView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_draft: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_final: Option<Value>,
}

impl From<&SessionAssignment> for SessionView {
    fn from(assignment: &SessionAssignment) -> Self {
        Self {
            summary: SessionSummary::from(&assignment.session),
            scenario: assignment.scenario.as_ref().map(ScenarioView::from),
            statement_order: assignment.session.statement_order,
            target_image_count: assignment.session.target_image_count,
            images: assignment.images.iter().map(ImageView::from).collect(),
            payload_draft: None,
            payload_final: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub ok: bool,
    pub session_id: Uuid,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct CompleteResponse {
    pub ok: bool,
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub completed_at: DateTime<Utc>,
    #[serde(rename = "alreadyCompleted", skip_serializing_if = "Option::is_none")]
    pub already_completed: Option<bool>,
}
