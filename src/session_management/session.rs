use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::session_management::{SessionStatus, Stage, Statement};
use crate::storage::types::{ImageCategory, Scenario};

/// A persisted study session.
///
/// `final_document` and `completed_at` are set together by finalize and never
/// change afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub id: Uuid,
    pub status: SessionStatus,
    pub scenario_id: Option<String>,
    pub stage: Option<Stage>,
    pub target_image_count: u32,
    /// The statement shown first; fixed at creation.
    pub statement_order: Statement,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub draft: Option<Value>,
    pub final_document: Option<Value>,
}

impl Session {
    pub fn is_completed(&self) -> bool {
        self.status == SessionStatus::Completed
    }
}

/// One image in a session's presentation sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionImage {
    pub image_id: String,
    pub category: ImageCategory,
    pub order_index: u32,
    pub statement: Statement,
    pub assigned_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A session together with its scenario and ordered images.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionAssignment {
    pub session: Session,
    pub scenario: Option<Scenario>,
    pub images: Vec<SessionImage>,
}

impl SessionAssignment {
    pub fn image_ids(&self) -> Vec<String> {
        self.images.iter().map(|i| i.image_id.clone()).collect()
    }
}

/// Result of a finalize call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalizeOutcome {
    pub completed_at: DateTime<Utc>,
    pub already_completed: bool,
}

/// Shallow merge: every top-level key of `patch` replaces the stored key,
/// keys absent from the patch are kept.
pub fn merge_draft(stored: &mut Map<String, Value>, patch: Map<String, Value>) {
    for (key, value) in patch {
        stored.insert(key, value);
    }
}

/// Interprets a stored draft column; anything that is not an object starts over empty.
pub fn draft_object(stored: Option<Value>) -> Map<String, Value> {
    match stored {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_merge_replaces_and_keeps() {
        let mut stored = obj(json!({ "images": [1], "demographics": { "gender": "f" } }));
        merge_draft(&mut stored, obj(json!({ "images": [1, 2] })));
        assert_eq!(
            Value::Object(stored),
            json!({ "images": [1, 2], "demographics": { "gender": "f" } })
        );
    }

    #[test]
    fn test_merge_is_shallow() {
        let mut stored = obj(json!({ "demographics": { "gender": "f", "age_group": "25-34" } }));
        merge_draft(&mut stored, obj(json!({ "demographics": { "gender": "m" } })));
        assert_eq!(stored["demographics"], json!({ "gender": "m" }));
    }

    #[test]
    fn test_merge_twice_same_as_once() {
        let patch = obj(json!({ "images": [{ "image_id": "a.jpg" }], "obfuscation_evaluation": null }));
        let mut once = obj(json!({ "x": 1 }));
        merge_draft(&mut once, patch.clone());
        let mut twice = once.clone();
        merge_draft(&mut twice, patch);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_draft_object_ignores_non_objects() {
        assert!(draft_object(None).is_empty());
        assert!(draft_object(Some(json!([1, 2]))).is_empty());
        assert_eq!(draft_object(Some(json!({ "a": 1 })))["a"], json!(1));
    }
}
