//! Cross-checks between submitted documents and a session's fixed values.

use std::collections::{BTreeSet, HashSet};

use serde_json::{Map, Value};

use crate::error_handling::types::SessionError;
use crate::session_management::session::Session;
use crate::session_management::Statement;

/// Validates a submitted list of image ids against the session's assignment.
///
/// Duplicates are reported first, then ids that were never assigned. With
/// `exact`, assigned ids absent from the submission are reported as well.
pub fn check_image_set(
    assigned: &[String],
    submitted: &[String],
    exact: bool,
) -> Result<(), SessionError> {
    let mut seen = HashSet::with_capacity(submitted.len());
    let duplicates: BTreeSet<&String> = submitted
        .iter()
        .filter(|id| !seen.insert(id.as_str()))
        .collect();
    if !duplicates.is_empty() {
        return Err(SessionError::DuplicateImageIds(
            duplicates.into_iter().cloned().collect(),
        ));
    }

    let assigned_set: HashSet<&str> = assigned.iter().map(String::as_str).collect();
    let unassigned: BTreeSet<&String> = submitted
        .iter()
        .filter(|id| !assigned_set.contains(id.as_str()))
        .collect();
    if !unassigned.is_empty() {
        return Err(SessionError::UnassignedImageIds(
            unassigned.into_iter().cloned().collect(),
        ));
    }

    if exact {
        let missing: BTreeSet<&String> = assigned
            .iter()
            .filter(|id| !seen.contains(id.as_str()))
            .collect();
        if !missing.is_empty() {
            return Err(SessionError::MissingAssignedImageIds(
                missing.into_iter().cloned().collect(),
            ));
        }
    }
    Ok(())
}

/// Collects `images[*].image_id` from a draft or final document.
///
/// Returns `None` when the document carries no `images` array.
pub fn image_ids_of(document: &Value) -> Option<Vec<String>> {
    document.as_object().and_then(image_ids_in)
}

/// Same as [`image_ids_of`] for a document already split into its fields.
pub fn image_ids_in(fields: &Map<String, Value>) -> Option<Vec<String>> {
    let images = fields.get("images")?.as_array()?;
    Some(
        images
            .iter()
            .filter_map(|img| img.get("image_id").and_then(Value::as_str))
            .map(str::to_string)
            .collect(),
    )
}

/// Checks the identity fields of a final document against the session.
pub fn check_final_identity(session: &Session, document: &Value) -> Result<(), SessionError> {
    let url_id = session.id.to_string();
    if let Some(body_id) = document.get("session_id").and_then(Value::as_str) {
        if body_id != url_id {
            return Err(SessionError::SessionIdMismatch {
                expected: url_id,
                submitted: body_id.to_string(),
            });
        }
    }
    if let Some(context) = document.get("context").and_then(Value::as_str) {
        if session.scenario_id.as_deref() != Some(context) {
            return Err(SessionError::ContextMismatch {
                expected: session.scenario_id.clone(),
                submitted: context.to_string(),
            });
        }
    }
    if let Some(order) = document.get("statement_order").and_then(Value::as_u64) {
        let expected = u8::from(session.statement_order);
        let matches = u8::try_from(order)
            .ok()
            .and_then(|o| Statement::try_from(o).ok())
            == Some(session.statement_order);
        if !matches {
            return Err(SessionError::StatementOrderMismatch {
                expected,
                submitted: order.min(u8::MAX as u64) as u8,
            });
        }
    }
    Ok(())
}
