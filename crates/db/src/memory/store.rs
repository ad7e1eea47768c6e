use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use xraygen_core::parameters::InputParameters;
use xraygen_core::error::CoreError;
use xraygen_core::session::{
    self, CancelOutcome, ClaimAction, ClaimOutcome, FinishOutcome, SessionStatus,
};
use xraygen_core::stuck;
use xraygen_core::types::{DbId, JobId, SessionId, Timestamp};

use crate::error::StoreError;
use crate::models::output_image::{NewOutputImage, OutputImage};
use crate::models::session::{CreateSession, Session, SessionFilter, StuckSession};
use crate::store::SessionStore;

#[derive(Default)]
struct State {
    sessions: HashMap<SessionId, Session>,
    parameters: HashMap<SessionId, InputParameters>,
    images: Vec<OutputImage>,
    next_image_id: DbId,
}

impl State {
    fn session_mut(&mut self, id: SessionId) -> Result<&mut Session, StoreError> {
        self.sessions
            .get_mut(&id)
            .ok_or(StoreError::SessionNotFound(id))
    }
}

/// Session store held entirely in process memory.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a session's start time. Lets tests age sessions without
    /// waiting.
    pub async fn set_started_at(&self, id: SessionId, started_at: Option<Timestamp>) {
        if let Some(session) = self.state.lock().await.sessions.get_mut(&id) {
            session.started_at = started_at;
        }
    }

    /// Force a status without guards, for test setup.
    pub async fn force_status(&self, id: SessionId, status: SessionStatus) {
        if let Some(session) = self.state.lock().await.sessions.get_mut(&id) {
            session.status = status;
        }
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, input: &CreateSession) -> Result<Session, StoreError> {
        let session = Session {
            id: uuid::Uuid::new_v4(),
            owner_id: input.owner_id,
            input_volume_key: input.input_volume_key.clone(),
            input_volume_format: input.input_volume_format,
            status: SessionStatus::NotStarted,
            job_id: None,
            archive_key: None,
            created_at: Utc::now(),
            started_at: None,
            claimed_at: None,
        };
        self.state
            .lock()
            .await
            .sessions
            .insert(session.id, session.clone());
        Ok(session)
    }

    async fn find_session(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        Ok(self.state.lock().await.sessions.get(&id).cloned())
    }

    async fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>, StoreError> {
        let state = self.state.lock().await;
        let mut sessions: Vec<Session> = state
            .sessions
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn count_sessions_for_owner(&self, owner_id: DbId) -> Result<i64, StoreError> {
        let state = self.state.lock().await;
        let count = state
            .sessions
            .values()
            .filter(|s| s.owner_id == owner_id && s.status != SessionStatus::Deleting)
            .count();
        Ok(count as i64)
    }

    async fn save_parameters(
        &self,
        id: SessionId,
        params: &InputParameters,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let status = state.session_mut(id)?.status;
        session::check_parameters_editable(status)?;
        state.parameters.insert(id, params.clone());
        Ok(())
    }

    async fn find_parameters(&self, id: SessionId) -> Result<Option<InputParameters>, StoreError> {
        Ok(self.state.lock().await.parameters.get(&id).cloned())
    }

    async fn queue_session(
        &self,
        id: SessionId,
        job_id: JobId,
        now: Timestamp,
    ) -> Result<Session, StoreError> {
        let mut state = self.state.lock().await;
        let has_parameters = state.parameters.contains_key(&id);
        let session = state.session_mut(id)?;
        session::check_initiate(session.status, has_parameters)?;
        session.status = SessionStatus::Queued;
        session.started_at = Some(now);
        session.claimed_at = None;
        session.job_id = Some(job_id);
        Ok(session.clone())
    }

    async fn claim_session(&self, id: SessionId) -> Result<ClaimOutcome, StoreError> {
        let mut state = self.state.lock().await;
        let Some(session) = state.sessions.get_mut(&id) else {
            return Ok(ClaimOutcome::Missing);
        };
        Ok(match session::claim_action(session.status, session.claimed_at.is_some()) {
            ClaimAction::MarkRunning => {
                session.status = SessionStatus::Running;
                session.claimed_at = Some(Utc::now());
                ClaimOutcome::Claimed
            }
            ClaimAction::RevertToNotStarted => {
                session.status = SessionStatus::NotStarted;
                ClaimOutcome::CancelledBeforeStart
            }
            ClaimAction::NoOp => ClaimOutcome::NotClaimable(session.status),
        })
    }

    async fn request_cancel(&self, id: SessionId) -> Result<CancelOutcome, StoreError> {
        let mut state = self.state.lock().await;
        let session = state.session_mut(id)?;
        if !session::can_request_cancel(session.status) {
            return Ok(CancelOutcome::NotCancellable(session.status));
        }
        session.status = SessionStatus::Cancelled;
        Ok(CancelOutcome::Requested)
    }

    async fn current_status(&self, id: SessionId) -> Result<Option<SessionStatus>, StoreError> {
        Ok(self.state.lock().await.sessions.get(&id).map(|s| s.status))
    }

    async fn revert_to_not_started(
        &self,
        id: SessionId,
        from: SessionStatus,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state.sessions.get_mut(&id) {
            Some(session) if session.status == from => {
                session.status = SessionStatus::NotStarted;
                session.claimed_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn finish_session(&self, id: SessionId) -> Result<FinishOutcome, StoreError> {
        let mut state = self.state.lock().await;
        let session = state.session_mut(id)?;
        let outcome = session::finish_outcome(session.status);
        if outcome == FinishOutcome::Processed {
            session.status = SessionStatus::Processed;
        }
        Ok(outcome)
    }

    async fn mark_deleting(&self, id: SessionId) -> Result<Session, StoreError> {
        let mut state = self.state.lock().await;
        let session = state.session_mut(id)?;
        session.status = SessionStatus::Deleting;
        Ok(session.clone())
    }

    async fn delete_session(&self, id: SessionId) -> Result<Option<Vec<OutputImage>>, StoreError> {
        let mut state = self.state.lock().await;
        if state.sessions.remove(&id).is_none() {
            return Ok(None);
        }
        state.parameters.remove(&id);
        let (mut removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.images)
            .into_iter()
            .partition(|image| image.session_id == id);
        state.images = kept;
        removed.sort_by_key(|image| image.sample_index);
        Ok(Some(removed))
    }

    async fn insert_output_image(&self, image: &NewOutputImage) -> Result<OutputImage, StoreError> {
        let mut state = self.state.lock().await;
        if !state.sessions.contains_key(&image.session_id) {
            return Err(StoreError::SessionNotFound(image.session_id));
        }
        let taken = state.images.iter().any(|existing| {
            existing.session_id == image.session_id && existing.sample_index == image.sample_index
        });
        if taken {
            return Err(CoreError::Conflict(format!(
                "Sample {} of session {} already stored",
                image.sample_index, image.session_id
            ))
            .into());
        }
        state.next_image_id += 1;
        let row = OutputImage {
            id: state.next_image_id,
            session_id: image.session_id,
            sample_index: image.sample_index,
            image_key: image.image_key.clone(),
            thumbnail_key: image.thumbnail_key.clone(),
            pose: image.pose,
            created_at: Utc::now(),
        };
        state.images.push(row.clone());
        Ok(row)
    }

    async fn list_output_images(&self, id: SessionId) -> Result<Vec<OutputImage>, StoreError> {
        let state = self.state.lock().await;
        let mut images: Vec<OutputImage> = state
            .images
            .iter()
            .filter(|image| image.session_id == id)
            .cloned()
            .collect();
        images.sort_by_key(|image| image.sample_index);
        Ok(images)
    }

    async fn delete_output_images(&self, id: SessionId) -> Result<Vec<OutputImage>, StoreError> {
        let mut state = self.state.lock().await;
        let (mut removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.images)
            .into_iter()
            .partition(|image| image.session_id == id);
        state.images = kept;
        removed.sort_by_key(|image| image.sample_index);
        Ok(removed)
    }

    async fn swap_archive(
        &self,
        id: SessionId,
        archive_key: Option<&str>,
    ) -> Result<Option<String>, StoreError> {
        let mut state = self.state.lock().await;
        let session = state.session_mut(id)?;
        Ok(std::mem::replace(
            &mut session.archive_key,
            archive_key.map(str::to_string),
        ))
    }

    async fn find_stuck_sessions(
        &self,
        now: Timestamp,
        budget: chrono::Duration,
    ) -> Result<Vec<StuckSession>, StoreError> {
        let state = self.state.lock().await;
        let mut stuck: Vec<StuckSession> = state
            .sessions
            .values()
            .filter_map(|session| {
                let num_samples = state
                    .parameters
                    .get(&session.id)
                    .map_or(0, |p| p.num_samples);
                if !stuck::is_stuck(session.status, session.started_at, num_samples, now, budget) {
                    return None;
                }
                Some(StuckSession {
                    session: session.clone(),
                    num_samples,
                    elapsed: session.started_at.map(|s| now - s).unwrap_or_default(),
                })
            })
            .collect();
        stuck.sort_by_key(|s| s.session.started_at);
        Ok(stuck)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Duration;
    use xraygen_core::sampler::Pose;
    use xraygen_core::volume::VolumeFormat;

    use super::*;

    fn create_input(owner_id: DbId) -> CreateSession {
        CreateSession {
            owner_id,
            input_volume_key: "volumes/ct.nrrd".into(),
            input_volume_format: VolumeFormat::Nrrd,
        }
    }

    async fn queued_session(store: &MemoryStore) -> Session {
        let session = store.create_session(&create_input(1)).await.unwrap();
        store
            .save_parameters(session.id, &InputParameters::new(1000.0, 3))
            .await
            .unwrap();
        store
            .queue_session(session.id, uuid::Uuid::now_v7(), Utc::now())
            .await
            .unwrap()
    }

    fn new_image(session_id: SessionId, index: i32) -> NewOutputImage {
        NewOutputImage {
            session_id,
            sample_index: index,
            image_key: format!("img/{index}"),
            thumbnail_key: format!("thumb/{index}"),
            pose: Pose {
                push_pull: 0.0,
                head_foot: 0.0,
                raise_lower: 0.0,
                alpha: 10.0,
                beta: 355.0,
            },
        }
    }

    #[tokio::test]
    async fn queue_requires_parameters() {
        let store = MemoryStore::new();
        let session = store.create_session(&create_input(1)).await.unwrap();

        let result = store
            .queue_session(session.id, uuid::Uuid::now_v7(), Utc::now())
            .await;
        assert_matches!(result, Err(StoreError::Rejected(CoreError::Validation(_))));

        let unchanged = store.find_session(session.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, SessionStatus::NotStarted);
        assert!(unchanged.started_at.is_none());
        assert!(unchanged.job_id.is_none());
    }

    #[tokio::test]
    async fn queue_sets_start_time_and_job_handle() {
        let store = MemoryStore::new();
        let session = queued_session(&store).await;
        assert_eq!(session.status, SessionStatus::Queued);
        assert!(session.started_at.is_some());
        assert!(session.job_id.is_some());

        let again = store
            .queue_session(session.id, uuid::Uuid::now_v7(), Utc::now())
            .await;
        assert_matches!(again, Err(StoreError::Rejected(CoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn concurrent_claims_have_one_winner() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let session = queued_session(&store).await;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.claim_session(session.id).await.unwrap() })
            })
            .collect();

        let mut claimed = 0;
        for handle in handles {
            match handle.await.unwrap() {
                ClaimOutcome::Claimed => claimed += 1,
                other => assert_eq!(other, ClaimOutcome::NotClaimable(SessionStatus::Running)),
            }
        }
        assert_eq!(claimed, 1);
    }

    #[tokio::test]
    async fn claim_after_queued_cancel_reverts() {
        let store = MemoryStore::new();
        let session = queued_session(&store).await;

        assert_eq!(
            store.request_cancel(session.id).await.unwrap(),
            CancelOutcome::Requested
        );
        assert_eq!(
            store.claim_session(session.id).await.unwrap(),
            ClaimOutcome::CancelledBeforeStart
        );
        assert_eq!(
            store.current_status(session.id).await.unwrap(),
            Some(SessionStatus::NotStarted)
        );
    }

    #[tokio::test]
    async fn redelivered_claim_leaves_cancelled_run_alone() {
        let store = MemoryStore::new();
        let session = queued_session(&store).await;
        store.claim_session(session.id).await.unwrap();
        store.request_cancel(session.id).await.unwrap();

        assert_eq!(
            store.claim_session(session.id).await.unwrap(),
            ClaimOutcome::NotClaimable(SessionStatus::Cancelled)
        );
        assert_eq!(
            store.current_status(session.id).await.unwrap(),
            Some(SessionStatus::Cancelled)
        );

        // Once the owning loop reverts, the next run claims afresh.
        assert!(store
            .revert_to_not_started(session.id, SessionStatus::Cancelled)
            .await
            .unwrap());
        let requeued = store
            .queue_session(session.id, uuid::Uuid::now_v7(), Utc::now())
            .await
            .unwrap();
        assert!(requeued.claimed_at.is_none());
        assert_eq!(
            store.claim_session(session.id).await.unwrap(),
            ClaimOutcome::Claimed
        );
    }

    #[tokio::test]
    async fn claim_missing_session() {
        let store = MemoryStore::new();
        assert_eq!(
            store.claim_session(uuid::Uuid::new_v4()).await.unwrap(),
            ClaimOutcome::Missing
        );
    }

    #[tokio::test]
    async fn parameters_locked_after_queue() {
        let store = MemoryStore::new();
        let session = queued_session(&store).await;
        let result = store
            .save_parameters(session.id, &InputParameters::new(900.0, 1))
            .await;
        assert_matches!(result, Err(StoreError::Rejected(CoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn finish_detects_late_cancel() {
        let store = MemoryStore::new();
        let session = queued_session(&store).await;
        store.claim_session(session.id).await.unwrap();
        store.request_cancel(session.id).await.unwrap();

        assert_eq!(
            store.finish_session(session.id).await.unwrap(),
            FinishOutcome::CancelRequested
        );
        assert_eq!(
            store.current_status(session.id).await.unwrap(),
            Some(SessionStatus::Cancelled)
        );
    }

    #[tokio::test]
    async fn revert_is_conditional() {
        let store = MemoryStore::new();
        let session = queued_session(&store).await;
        assert!(!store
            .revert_to_not_started(session.id, SessionStatus::Cancelled)
            .await
            .unwrap());
        assert!(store
            .revert_to_not_started(session.id, SessionStatus::Queued)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn output_images_listed_in_sample_order_and_purged() {
        let store = MemoryStore::new();
        let session = queued_session(&store).await;
        let other = queued_session(&store).await;

        for index in [2, 0, 1] {
            store
                .insert_output_image(&new_image(session.id, index))
                .await
                .unwrap();
        }
        store
            .insert_output_image(&new_image(other.id, 0))
            .await
            .unwrap();

        let listed = store.list_output_images(session.id).await.unwrap();
        let indices: Vec<i32> = listed.iter().map(|i| i.sample_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);

        let removed = store.delete_output_images(session.id).await.unwrap();
        assert_eq!(removed.len(), 3);
        assert!(store.list_output_images(session.id).await.unwrap().is_empty());
        assert_eq!(store.list_output_images(other.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_sample_index_is_rejected() {
        let store = MemoryStore::new();
        let session = queued_session(&store).await;
        store
            .insert_output_image(&new_image(session.id, 1))
            .await
            .unwrap();

        let again = store.insert_output_image(&new_image(session.id, 1)).await;
        assert_matches!(again, Err(StoreError::Rejected(CoreError::Conflict(_))));
        assert_eq!(store.list_output_images(session.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_missing_session_reports_none() {
        let store = MemoryStore::new();
        assert!(store
            .delete_session(uuid::Uuid::new_v4())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn swap_archive_returns_previous() {
        let store = MemoryStore::new();
        let session = store.create_session(&create_input(1)).await.unwrap();
        assert_eq!(store.swap_archive(session.id, Some("a/1.zip")).await.unwrap(), None);
        assert_eq!(
            store.swap_archive(session.id, Some("a/2.zip")).await.unwrap(),
            Some("a/1.zip".to_string())
        );
    }

    #[tokio::test]
    async fn delete_cascades_and_hides_from_quota() {
        let store = MemoryStore::new();
        let session = queued_session(&store).await;
        store
            .insert_output_image(&new_image(session.id, 0))
            .await
            .unwrap();
        assert_eq!(store.count_sessions_for_owner(1).await.unwrap(), 1);

        store.mark_deleting(session.id).await.unwrap();
        assert_eq!(store.count_sessions_for_owner(1).await.unwrap(), 0);
        assert!(store
            .list_sessions(&SessionFilter::default())
            .await
            .unwrap()
            .is_empty());

        let removed = store.delete_session(session.id).await.unwrap().unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].image_key, "img/0");
        assert!(store.find_session(session.id).await.unwrap().is_none());
        assert!(store.find_parameters(session.id).await.unwrap().is_none());
        assert!(store.list_output_images(session.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stuck_sessions_use_per_sample_budget() {
        let store = MemoryStore::new();
        let session = queued_session(&store).await;
        let now = Utc::now();
        let budget = Duration::seconds(300);

        // Three samples: fifteen minutes allowed.
        store
            .set_started_at(session.id, Some(now - Duration::minutes(10)))
            .await;
        assert!(store.find_stuck_sessions(now, budget).await.unwrap().is_empty());

        store
            .set_started_at(session.id, Some(now - Duration::minutes(16)))
            .await;
        let stuck = store.find_stuck_sessions(now, budget).await.unwrap();
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].num_samples, 3);
        assert_eq!(stuck[0].elapsed, Duration::minutes(16));

        store.force_status(session.id, SessionStatus::Processed).await;
        assert!(store.find_stuck_sessions(now, budget).await.unwrap().is_empty());
    }
}
