//! Periodic sweep for sessions whose job silently died.
//!
//! A session is stuck when it is queued, running or cancelling for longer
//! than the per-sample budget times its sample count. The sweep only
//! reports; it never changes session state.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use xraygen_core::session_events::STAFF_GROUP;
use xraygen_core::types::Timestamp;
use xraygen_db::models::session::StuckSession;
use xraygen_db::{SessionStore, StoreError};
use xraygen_events::{Notifier, SessionEvent};

/// Receiver of stuck-session alerts.
pub trait AlertSink: Send + Sync {
    fn alert(&self, stuck: &StuckSession);
}

/// Logs at `error` and notifies the staff group.
pub struct StaffAlertSink {
    notifier: Arc<dyn Notifier>,
}

impl StaffAlertSink {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

impl AlertSink for StaffAlertSink {
    fn alert(&self, stuck: &StuckSession) {
        let session = &stuck.session;
        let elapsed_secs = stuck.elapsed.num_seconds();
        tracing::error!(
            session_id = %session.id,
            status = %session.status,
            num_samples = stuck.num_samples,
            elapsed_secs,
            job_id = ?session.job_id,
            "Session appears stuck",
        );
        let description = format!(
            "{} for {elapsed_secs}s with {} samples",
            session.status.label(),
            stuck.num_samples
        );
        if let Err(e) = self.notifier.publish(
            STAFF_GROUP,
            SessionEvent::stuck(session.id, session.status, description),
        ) {
            tracing::warn!(session_id = %session.id, error = %e, "Failed to publish stuck alert");
        }
    }
}

pub struct StuckJobDetector {
    store: Arc<dyn SessionStore>,
    sink: Arc<dyn AlertSink>,
    sample_budget: chrono::Duration,
    interval: Duration,
}

impl StuckJobDetector {
    pub fn new(
        store: Arc<dyn SessionStore>,
        sink: Arc<dyn AlertSink>,
        sample_budget: chrono::Duration,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            sink,
            sample_budget,
            interval,
        }
    }

    /// One sweep at `now`. Every stuck session is alerted and returned.
    pub async fn sweep(&self, now: Timestamp) -> Result<Vec<StuckSession>, StoreError> {
        let stuck = self
            .store
            .find_stuck_sessions(now, self.sample_budget)
            .await?;
        for session in &stuck {
            self.sink.alert(session);
        }
        Ok(stuck)
    }

    /// Run sweeps every `interval` until `cancel` is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            budget_secs = self.sample_budget.num_seconds(),
            "Stuck job detector started",
        );
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Stuck job detector stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.sweep(Utc::now()).await {
                        Ok(stuck) if !stuck.is_empty() => {
                            tracing::warn!(count = stuck.len(), "Stuck sessions detected");
                        }
                        Ok(_) => tracing::debug!("Stuck job sweep: nothing stuck"),
                        Err(e) => tracing::error!(error = %e, "Stuck job sweep failed"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use xraygen_core::parameters::InputParameters;
    use xraygen_core::session::SessionStatus;
    use xraygen_core::session_events::MSG_TYPE_SESSION_STUCK;
    use xraygen_core::types::SessionId;
    use xraygen_core::volume::VolumeFormat;
    use xraygen_db::models::session::CreateSession;
    use xraygen_db::MemoryStore;
    use xraygen_events::EventBus;

    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        alerted: Mutex<Vec<SessionId>>,
    }

    impl AlertSink for RecordingSink {
        fn alert(&self, stuck: &StuckSession) {
            self.alerted.lock().unwrap().push(stuck.session.id);
        }
    }

    async fn running_session(store: &MemoryStore, num_samples: i32, age: chrono::Duration) -> SessionId {
        let session = store
            .create_session(&CreateSession {
                owner_id: 3,
                input_volume_key: "volumes/ct.nrrd".into(),
                input_volume_format: VolumeFormat::Nrrd,
            })
            .await
            .unwrap();
        store
            .save_parameters(session.id, &InputParameters::new(1000.0, num_samples))
            .await
            .unwrap();
        let now = Utc::now();
        store
            .queue_session(session.id, uuid::Uuid::now_v7(), now - age)
            .await
            .unwrap();
        store.claim_session(session.id).await.unwrap();
        session.id
    }

    fn detector(store: Arc<MemoryStore>, sink: Arc<dyn AlertSink>) -> StuckJobDetector {
        StuckJobDetector::new(
            store,
            sink,
            chrono::Duration::seconds(300),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn old_single_sample_session_is_flagged_but_fresh_large_one_is_not() {
        let store = Arc::new(MemoryStore::new());
        let old = running_session(&store, 1, chrono::Duration::hours(2)).await;
        let fresh = running_session(&store, 100, chrono::Duration::seconds(5)).await;

        let sink = Arc::new(RecordingSink::default());
        let stuck = detector(store.clone(), sink.clone())
            .sweep(Utc::now())
            .await
            .unwrap();

        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].session.id, old);
        assert_eq!(stuck[0].num_samples, 1);
        assert_eq!(*sink.alerted.lock().unwrap(), vec![old]);

        // Sweeping never changes state.
        assert_eq!(
            store.current_status(old).await.unwrap(),
            Some(SessionStatus::Running)
        );
        assert_eq!(
            store.current_status(fresh).await.unwrap(),
            Some(SessionStatus::Running)
        );
    }

    #[tokio::test]
    async fn finished_sessions_are_never_stuck() {
        let store = Arc::new(MemoryStore::new());
        let id = running_session(&store, 1, chrono::Duration::days(1)).await;
        store.finish_session(id).await.unwrap();

        let sink = Arc::new(RecordingSink::default());
        let stuck = detector(store, sink.clone()).sweep(Utc::now()).await.unwrap();
        assert!(stuck.is_empty());
        assert!(sink.alerted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn staff_sink_publishes_to_staff_group() {
        let store = Arc::new(MemoryStore::new());
        let id = running_session(&store, 2, chrono::Duration::hours(1)).await;

        let bus = Arc::new(EventBus::default());
        let mut staff = bus.subscribe_group(STAFF_GROUP);
        let sink = Arc::new(StaffAlertSink::new(bus.clone()));
        detector(store, sink).sweep(Utc::now()).await.unwrap();

        let events = staff.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, MSG_TYPE_SESSION_STUCK);
        assert_eq!(events[0].session_id, id);
        assert_eq!(events[0].status, SessionStatus::Running);
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let store = Arc::new(MemoryStore::new());
        let detector = detector(store, Arc::new(RecordingSink::default()));
        let cancel = CancellationToken::new();
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), detector.run(cancel))
            .await
            .expect("detector should stop promptly");
    }
}
