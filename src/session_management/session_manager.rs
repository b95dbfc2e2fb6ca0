use log::{debug, info, warn};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error_handling::types::SessionError;
use crate::session_management::session::{
    FinalizeOutcome, Session, SessionAssignment, SessionImage,
};
use crate::session_management::{SessionStatus, Stage};
use crate::storage::types::{storage_now, ImageCategory, Scenario};
use crate::storage::DatabaseStorage;
use crate::study::submission::{
    check_final_identity, check_image_set, image_ids_in, image_ids_of,
};
use crate::study::{assign_order, pick_balanced_scenario, ImagePool};

/// Parameters of a session start.
#[derive(Debug, Clone, Default)]
pub struct StartRequest {
    /// Explicit scenario id; `None` lets the balanced selector choose.
    pub scenario: Option<String>,
    pub target_count: usize,
    /// Session the client already holds; returned as-is while in progress.
    pub resume_from: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct StartOutcome {
    pub assignment: SessionAssignment,
    pub resumed: bool,
}

/// The structure driving a study session through its lifecycle
///
/// Sessions move from `in_progress` to `completed` and nothing else. The manager
/// holds no per-session state of its own; every operation reads and writes
/// storage, so it can be cloned freely into request handlers.
///
/// # Fields Overview
///
/// - `storage`: persisted scenarios, images and sessions
/// - `pool`: the image allocator with its reservation ledger
/// - `categories`: the strata every session samples from, in reservation order
#[derive(Clone)]
pub struct SessionManager {
    storage: DatabaseStorage,
    pool: ImagePool,
    categories: Vec<ImageCategory>,
}

impl SessionManager {
    pub fn new(storage: DatabaseStorage) -> Self {
        Self::with_categories(storage, ImageCategory::ALL.to_vec())
    }

    pub fn with_categories(storage: DatabaseStorage, categories: Vec<ImageCategory>) -> Self {
        Self {
            pool: ImagePool::new(storage.clone()),
            storage,
            categories,
        }
    }

    pub fn image_pool(&self) -> &ImagePool {
        &self.pool
    }

    pub fn categories(&self) -> &[ImageCategory] {
        &self.categories
    }

    /// Starts a session, or hands back the caller's in-progress one.
    pub async fn start(&self, request: StartRequest) -> Result<StartOutcome, SessionError> {
        let per_category = self.per_category(request.target_count)?;
        let scenario = self.resolve_scenario(request.scenario.as_deref()).await?;

        if let Some(existing) = request.resume_from {
            if let Some(assignment) = self.resume(existing).await? {
                debug!("Resuming session {}", existing);
                return Ok(StartOutcome {
                    assignment,
                    resumed: true,
                });
            }
        }

        let plan: Vec<(ImageCategory, usize)> = self
            .categories
            .iter()
            .map(|&category| (category, per_category))
            .collect();
        let reservation = self.pool.reserve(&plan).await?;
        let tallies = self
            .storage
            .statement_tallies(reservation.image_ids())
            .await?;
        let (first, planned) =
            assign_order(reservation.by_category(), &tallies, &mut rand::thread_rng());

        let now = storage_now();
        let session = Session {
            id: Uuid::new_v4(),
            status: SessionStatus::InProgress,
            scenario_id: Some(scenario.id.clone()),
            stage: None,
            target_image_count: request.target_count as u32,
            statement_order: first,
            started_at: now,
            updated_at: now,
            completed_at: None,
            draft: None,
            final_document: None,
        };
        let images: Vec<SessionImage> = planned
            .into_iter()
            .map(|p| SessionImage {
                image_id: p.image.image_id,
                category: p.image.category,
                order_index: p.order_index,
                statement: p.statement,
                assigned_at: now,
                completed_at: None,
            })
            .collect();

        self.storage.create_session(&session, &images).await?;
        drop(reservation);

        info!(
            "Session {} started in scenario {} with {} images",
            session.id,
            scenario.id,
            images.len()
        );
        Ok(StartOutcome {
            assignment: SessionAssignment {
                session,
                scenario: Some(scenario),
                images,
            },
            resumed: false,
        })
    }

    /// The existing assignment of an in-progress session, if there is one.
    pub async fn resume(&self, id: Uuid) -> Result<Option<SessionAssignment>, SessionError> {
        match self.storage.get_session(id).await? {
            Some(session) if session.status == SessionStatus::InProgress => {
                Ok(Some(self.assemble(session).await?))
            }
            _ => Ok(None),
        }
    }

    /// Read-only view of a session with its scenario and ordered images.
    pub async fn get(&self, id: Uuid) -> Result<SessionAssignment, SessionError> {
        let session = self
            .storage
            .get_session(id)
            .await?
            .ok_or(SessionError::NotFound)?;
        self.assemble(session).await
    }

    /// Shallow-merges `patch` into the draft and moves the stage if given.
    pub async fn merge_progress(
        &self,
        id: Uuid,
        stage: Option<Stage>,
        patch: Map<String, Value>,
    ) -> Result<Session, SessionError> {
        let now = storage_now();
        if !self.storage.merge_session_draft(id, stage, patch, now).await? {
            return Err(self.not_in_progress(id).await?);
        }
        self.storage
            .get_session(id)
            .await?
            .ok_or(SessionError::NotFound)
    }

    /// Like [`merge_progress`](Self::merge_progress), but first checks that any
    /// `images` list in the patch only names images of this session.
    pub async fn merge_progress_checked(
        &self,
        id: Uuid,
        stage: Option<Stage>,
        patch: Map<String, Value>,
    ) -> Result<Session, SessionError> {
        if let Some(submitted) = image_ids_in(&patch) {
            let session = self
                .storage
                .get_session(id)
                .await?
                .ok_or(SessionError::NotFound)?;
            if session.is_completed() {
                return Err(SessionError::AlreadyCompleted);
            }
            self.check_image_set(id, &submitted, false).await?;
        }
        self.merge_progress(id, stage, patch).await
    }

    /// Completes a session with its final document.
    ///
    /// Completing an already completed session succeeds again with the
    /// original timestamp and `already_completed` set.
    pub async fn finalize(
        &self,
        id: Uuid,
        final_document: Value,
    ) -> Result<FinalizeOutcome, SessionError> {
        let session = self
            .storage
            .get_session(id)
            .await?
            .ok_or(SessionError::NotFound)?;
        if let Some(outcome) = Self::already_finalized(&session) {
            return Ok(outcome);
        }

        let now = storage_now();
        if self.storage.complete_session(id, &final_document, now).await? {
            info!("Session {} completed", id);
            return Ok(FinalizeOutcome {
                completed_at: now,
                already_completed: false,
            });
        }

        // Another finalize won the status flip.
        let session = self
            .storage
            .get_session(id)
            .await?
            .ok_or(SessionError::NotFound)?;
        Self::already_finalized(&session).ok_or(SessionError::AlreadyCompleted)
    }

    /// Cross-checks a final document against the session, then finalizes.
    pub async fn complete_checked(
        &self,
        id: Uuid,
        final_document: Value,
    ) -> Result<FinalizeOutcome, SessionError> {
        let session = self
            .storage
            .get_session(id)
            .await?
            .ok_or(SessionError::NotFound)?;
        check_final_identity(&session, &final_document)?;
        if let Some(outcome) = Self::already_finalized(&session) {
            return Ok(outcome);
        }
        let submitted = image_ids_of(&final_document).unwrap_or_default();
        self.check_image_set(id, &submitted, true).await?;
        self.finalize(id, final_document).await
    }

    /// Membership check of `submitted` against the session's assigned images.
    pub async fn check_image_set(
        &self,
        id: Uuid,
        submitted: &[String],
        exact: bool,
    ) -> Result<(), SessionError> {
        let assigned: Vec<String> = self
            .storage
            .get_session_images(id)
            .await?
            .into_iter()
            .map(|image| image.image_id)
            .collect();
        let result = check_image_set(&assigned, submitted, exact);
        if let Err(ref e) = result {
            warn!("Image set rejected for session {}: {}", id, e);
        }
        result
    }

    fn per_category(&self, target_count: usize) -> Result<usize, SessionError> {
        let categories = self.categories.len();
        if categories == 0 || target_count == 0 || target_count % categories != 0 {
            return Err(SessionError::InvalidTargetCount {
                requested: target_count,
                categories,
            });
        }
        Ok(target_count / categories)
    }

    async fn resolve_scenario(&self, requested: Option<&str>) -> Result<Scenario, SessionError> {
        if let Some(id) = requested {
            let scenario = self
                .storage
                .get_scenario(id)
                .await?
                .ok_or_else(|| SessionError::UnknownScenario(id.to_string()))?;
            if !scenario.enabled {
                warn!("Rejected start in disabled scenario {}", id);
                return Err(SessionError::ScenarioDisabled(id.to_string()));
            }
            return Ok(scenario);
        }
        let loads = self.storage.enabled_scenarios_with_completed_counts().await?;
        pick_balanced_scenario(&loads, &mut rand::thread_rng())
            .ok_or(SessionError::NoScenarioAvailable)
    }

    async fn assemble(&self, session: Session) -> Result<SessionAssignment, SessionError> {
        let scenario = match session.scenario_id.as_deref() {
            Some(id) => self.storage.get_scenario(id).await?,
            None => None,
        };
        let images = self.storage.get_session_images(session.id).await?;
        Ok(SessionAssignment {
            session,
            scenario,
            images,
        })
    }

    async fn not_in_progress(&self, id: Uuid) -> Result<SessionError, SessionError> {
        Ok(match self.storage.get_session(id).await? {
            Some(_) => SessionError::AlreadyCompleted,
            None => SessionError::NotFound,
        })
    }

    fn already_finalized(session: &Session) -> Option<FinalizeOutcome> {
        if !session.is_completed() {
            return None;
        }
        session.completed_at.map(|completed_at| FinalizeOutcome {
            completed_at,
            already_completed: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_management::Statement;
    use crate::storage::database_storage::tests::{scenario, temp_db};
    use serde_json::json;
    use std::collections::HashSet;
    use tokio_test::{assert_err, assert_ok};

    async fn seeded(per_category: usize) -> (tempfile::TempDir, DatabaseStorage) {
        let (dir, storage) = temp_db().await;
        storage
            .insert_scenario_if_absent(&scenario("smart_camera", true))
            .await
            .unwrap();
        for category in ImageCategory::ALL {
            for i in 0..per_category {
                storage
                    .insert_image_if_absent(&format!("{}_{}.jpg", category, i), category)
                    .await
                    .unwrap();
            }
        }
        (dir, storage)
    }

    fn request(n: usize) -> StartRequest {
        StartRequest {
            scenario: None,
            target_count: n,
            resume_from: None,
        }
    }

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[tokio::test]
    async fn test_start_assigns_two_per_category() {
        let (_dir, storage) = seeded(3).await;
        let manager = SessionManager::new(storage.clone());

        let outcome = manager.start(request(16)).await.unwrap();
        assert!(!outcome.resumed);
        let assignment = outcome.assignment;
        assert_eq!(assignment.images.len(), 16);
        assert_eq!(assignment.session.scenario_id.as_deref(), Some("smart_camera"));

        let mut indices: Vec<u32> = assignment.images.iter().map(|i| i.order_index).collect();
        indices.sort_unstable();
        assert_eq!(indices, (0..16).collect::<Vec<u32>>());

        let first = assignment.session.statement_order;
        let leading = assignment
            .images
            .iter()
            .filter(|i| i.statement == first)
            .count();
        assert_eq!(leading, 8);

        let distinct: HashSet<&String> = assignment.images.iter().map(|i| &i.image_id).collect();
        assert_eq!(distinct.len(), 16);
        for image in &assignment.images {
            let stored = storage.get_image(&image.image_id).await.unwrap().unwrap();
            assert_eq!(stored.assigned_count, 1);
            assert!(stored.last_assigned_at.is_some());
        }
        assert_eq!(manager.image_pool().ledger().claimed_count(), 0);
    }

    #[tokio::test]
    async fn test_eight_images_use_half_split() {
        let (_dir, storage) = seeded(1).await;
        let manager = SessionManager::new(storage);
        let assignment = manager.start(request(8)).await.unwrap().assignment;
        let first = assignment.session.statement_order;
        assert!(assignment.images[..4].iter().all(|i| i.statement == first));
        assert!(assignment.images[4..].iter().all(|i| i.statement == first.other()));
    }

    #[tokio::test]
    async fn test_shortfall_leaves_no_trace() {
        let (_dir, storage) = seeded(2).await;
        storage
            .set_image_enabled("Health_medical_1.jpg", false)
            .await
            .unwrap();
        let manager = SessionManager::new(storage.clone());

        match manager.start(request(16)).await {
            Err(e @ SessionError::InsufficientImages { .. }) => {
                assert_eq!(e.kind().as_str(), "allocation_failure");
                assert_eq!(
                    e.details(),
                    json!({ "category": "Health_medical", "needed": 2, "available": 1 })
                );
            }
            other => panic!("expected insufficient images, got {:?}", other.map(|o| o.resumed)),
        }
        for category in ImageCategory::ALL {
            for image in storage.list_images(category).await.unwrap() {
                assert_eq!(image.assigned_count, 0, "{} was touched", image.image_id);
            }
        }
        assert!(storage.list_sessions(None).await.unwrap().is_empty());
        assert_eq!(manager.image_pool().ledger().claimed_count(), 0);
    }

    #[tokio::test]
    async fn test_start_fails_fast_while_images_are_held() {
        let (_dir, storage) = seeded(1).await;
        let manager = SessionManager::new(storage);
        let held = manager
            .image_pool()
            .reserve(&[(ImageCategory::WorkFromHome, 1)])
            .await
            .unwrap();

        let err = manager.start(request(8)).await.unwrap_err();
        assert_eq!(err.code(), "insufficient_images");

        drop(held);
        assert_ok!(manager.start(request(8)).await);
    }

    #[tokio::test]
    async fn test_target_count_must_split_evenly() {
        let (_dir, storage) = seeded(2).await;
        let manager = SessionManager::new(storage);
        for n in [0, 12] {
            let err = manager.start(request(n)).await.unwrap_err();
            assert_eq!(err.code(), "invalid_target_count");
        }
    }

    #[tokio::test]
    async fn test_explicit_scenario_validation() {
        let (_dir, storage) = seeded(1).await;
        storage
            .insert_scenario_if_absent(&scenario("ar_assistant", false))
            .await
            .unwrap();
        let manager = SessionManager::new(storage);

        let mut req = request(8);
        req.scenario = Some("ar_assistant".into());
        assert_eq!(manager.start(req).await.unwrap_err().code(), "scenario_disabled");

        let mut req = request(8);
        req.scenario = Some("nope".into());
        assert_eq!(manager.start(req).await.unwrap_err().code(), "unknown_scenario");
    }

    #[tokio::test]
    async fn test_no_enabled_scenario() {
        let (_dir, storage) = temp_db().await;
        storage
            .insert_scenario_if_absent(&scenario("smart_camera", false))
            .await
            .unwrap();
        let manager = SessionManager::new(storage);
        let err = manager.start(request(8)).await.unwrap_err();
        assert_eq!(err.kind().as_str(), "no_scenario_available");
    }

    #[tokio::test]
    async fn test_resume_returns_existing_assignment() {
        let (_dir, storage) = seeded(2).await;
        let manager = SessionManager::new(storage.clone());
        let original = manager.start(request(8)).await.unwrap().assignment;

        let mut req = request(8);
        req.resume_from = Some(original.session.id);
        let resumed = manager.start(req).await.unwrap();
        assert!(resumed.resumed);
        assert_eq!(resumed.assignment.image_ids(), original.image_ids());
        assert_eq!(storage.list_sessions(None).await.unwrap().len(), 1);

        manager.finalize(original.session.id, json!({})).await.unwrap();
        let mut req = request(8);
        req.resume_from = Some(original.session.id);
        let fresh = manager.start(req).await.unwrap();
        assert!(!fresh.resumed);
        assert_ne!(fresh.assignment.session.id, original.session.id);
    }

    #[tokio::test]
    async fn test_merge_progress_twice_equals_once() {
        let (_dir, storage) = seeded(1).await;
        let manager = SessionManager::new(storage);
        let id = manager.start(request(8)).await.unwrap().assignment.session.id;

        manager
            .merge_progress(id, None, obj(json!({ "demographics": { "gender": "f" } })))
            .await
            .unwrap();
        let patch = obj(json!({ "obfuscation_evaluation": { "q1": 3 } }));
        let once = manager
            .merge_progress(id, Some(Stage::ObfuscationDone), patch.clone())
            .await
            .unwrap();
        let twice = manager
            .merge_progress(id, Some(Stage::ObfuscationDone), patch)
            .await
            .unwrap();
        assert_eq!(once.draft, twice.draft);
        assert_eq!(
            twice.draft,
            Some(json!({
                "demographics": { "gender": "f" },
                "obfuscation_evaluation": { "q1": 3 }
            }))
        );
        assert_eq!(twice.stage, Some(Stage::ObfuscationDone));
    }

    #[tokio::test]
    async fn test_merge_rejections() {
        let (_dir, storage) = seeded(1).await;
        let manager = SessionManager::new(storage);
        let missing = manager
            .merge_progress(Uuid::new_v4(), None, Map::new())
            .await
            .unwrap_err();
        assert_eq!(missing.code(), "session_not_found");

        let assignment = manager.start(request(8)).await.unwrap().assignment;
        let id = assignment.session.id;
        let stranger = obj(json!({ "images": [{ "image_id": "elsewhere.jpg" }] }));
        let err = manager.merge_progress_checked(id, None, stranger).await.unwrap_err();
        assert_eq!(err.code(), "unassigned_image_ids");

        let partial = obj(json!({ "images": [{ "image_id": assignment.images[0].image_id }] }));
        assert_ok!(manager.merge_progress_checked(id, None, partial).await);

        manager.finalize(id, json!({})).await.unwrap();
        let late = manager.merge_progress(id, None, Map::new()).await.unwrap_err();
        assert_eq!(late.code(), "already_completed");
    }

    #[tokio::test]
    async fn test_finalize_is_idempotent() {
        let (_dir, storage) = seeded(1).await;
        let manager = SessionManager::new(storage.clone());
        let assignment = manager.start(request(8)).await.unwrap().assignment;
        let id = assignment.session.id;

        let first = manager.finalize(id, json!({ "done": 1 })).await.unwrap();
        assert!(!first.already_completed);
        let second = manager.finalize(id, json!({ "done": 2 })).await.unwrap();
        assert!(second.already_completed);
        assert_eq!(second.completed_at, first.completed_at);

        let stored = storage.get_session(id).await.unwrap().unwrap();
        assert_eq!(stored.final_document, Some(json!({ "done": 1 })));
        assert_eq!(stored.completed_at, Some(first.completed_at));
        for image in storage.get_session_images(id).await.unwrap() {
            assert_eq!(image.completed_at, Some(first.completed_at));
            let counters = storage.get_image(&image.image_id).await.unwrap().unwrap();
            assert_eq!(counters.completed_count, 1);
        }

        assert_err!(manager.finalize(Uuid::new_v4(), json!({})).await);
    }

    #[tokio::test]
    async fn test_complete_checked_cross_checks() {
        let (_dir, storage) = seeded(1).await;
        let manager = SessionManager::new(storage);
        let assignment = manager.start(request(8)).await.unwrap().assignment;
        let id = assignment.session.id;
        let order = u8::from(assignment.session.statement_order);
        let images: Vec<Value> = assignment
            .images
            .iter()
            .map(|i| json!({ "image_id": i.image_id }))
            .collect();

        let wrong_order = if order == 1 { 2 } else { 1 };
        let doc = json!({ "session_id": id.to_string(), "statement_order": wrong_order, "images": images });
        assert_eq!(
            manager.complete_checked(id, doc).await.unwrap_err().code(),
            "statement_order_mismatch"
        );

        let doc = json!({ "session_id": id.to_string(), "images": images[..7].to_vec() });
        assert_eq!(
            manager.complete_checked(id, doc).await.unwrap_err().code(),
            "missing_assigned_image_ids"
        );

        let doc = json!({
            "session_id": id.to_string(),
            "context": "smart_camera",
            "statement_order": order,
            "images": images
        });
        let outcome = manager.complete_checked(id, doc.clone()).await.unwrap();
        assert!(!outcome.already_completed);
        let again = manager.complete_checked(id, doc).await.unwrap();
        assert!(again.already_completed);
        assert_eq!(
            manager.get(id).await.unwrap().session.statement_order,
            Statement::try_from(order).unwrap()
        );
    }
}
