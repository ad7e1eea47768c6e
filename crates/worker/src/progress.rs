//! Throttled progress reporting for one session run.
//!
//! The reporter publishes to the owner's notification group. Updates are
//! rate-limited to one per `min_interval`; the first update of a run and
//! any update at or past completion always go out, and a suppressed update
//! is flushed by [`ProgressReporter::end`] before the end event so the last
//! known progress is never lost.

use std::sync::Arc;
use std::time::{Duration, Instant};

use xraygen_core::session::SessionStatus;
use xraygen_core::session_events::user_group;
use xraygen_core::types::{DbId, SessionId};
use xraygen_events::{Notifier, SessionEvent};

/// Default minimum spacing between progress updates.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(500);

pub struct ProgressReporter {
    notifier: Arc<dyn Notifier>,
    group: String,
    session_id: SessionId,
    min_interval: Duration,
    last_flush: Option<Instant>,
    pending: Option<(f64, String)>,
    last_fraction: f64,
}

impl ProgressReporter {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        owner_id: DbId,
        session_id: SessionId,
        min_interval: Duration,
    ) -> Self {
        Self {
            notifier,
            group: user_group(owner_id),
            session_id,
            min_interval,
            last_flush: None,
            pending: None,
            last_fraction: 0.0,
        }
    }

    /// Start a run. Resets the throttle so the next update is sent.
    pub fn begin(&mut self) {
        self.last_flush = None;
        self.pending = None;
        self.last_fraction = 0.0;
        self.publish(SessionEvent::started(self.session_id, SessionStatus::Running));
    }

    pub fn update(&mut self, fraction: f64, description: impl Into<String>) {
        let description = description.into();
        let due = match self.last_flush {
            None => true,
            Some(at) => at.elapsed() >= self.min_interval,
        };
        if due || fraction >= 1.0 {
            self.flush(fraction, description);
        } else {
            self.pending = Some((fraction, description));
        }
    }

    /// Finish the run with `status`, flushing any suppressed update first.
    pub fn end(&mut self, status: SessionStatus) {
        if let Some((fraction, description)) = self.pending.take() {
            self.flush(fraction, description);
        }
        self.publish(SessionEvent::ended(self.session_id, status, self.last_fraction));
    }

    fn flush(&mut self, fraction: f64, description: String) {
        self.pending = None;
        self.last_flush = Some(Instant::now());
        self.last_fraction = fraction;
        self.publish(SessionEvent::progress(
            self.session_id,
            SessionStatus::Running,
            fraction,
            description,
        ));
    }

    fn publish(&self, event: SessionEvent) {
        if let Err(e) = self.notifier.publish(&self.group, event) {
            tracing::warn!(
                session_id = %self.session_id,
                error = %e,
                "Progress publish failed",
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use xraygen_core::session_events::{
        MSG_TYPE_SESSION_ENDED, MSG_TYPE_SESSION_PROGRESS, MSG_TYPE_SESSION_STARTED,
    };
    use xraygen_events::NotifyError;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(String, SessionEvent)>>,
    }

    impl Notifier for Recorder {
        fn publish(&self, group: &str, event: SessionEvent) -> Result<(), NotifyError> {
            self.events.lock().unwrap().push((group.to_string(), event));
            Ok(())
        }
    }

    struct Broken;

    impl Notifier for Broken {
        fn publish(&self, _: &str, _: SessionEvent) -> Result<(), NotifyError> {
            Err(NotifyError::Unavailable("down".into()))
        }
    }

    fn reporter(recorder: &Arc<Recorder>, interval: Duration) -> ProgressReporter {
        ProgressReporter::new(recorder.clone(), 42, uuid::Uuid::new_v4(), interval)
    }

    fn types(recorder: &Recorder) -> Vec<(String, f64)> {
        recorder
            .events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, e)| (e.event_type.clone(), e.progress))
            .collect()
    }

    #[test]
    fn events_go_to_owner_group() {
        let recorder = Arc::new(Recorder::default());
        let mut progress = reporter(&recorder, Duration::ZERO);
        progress.begin();
        progress.update(0.5, "half");
        progress.end(SessionStatus::Processed);

        let events = recorder.events.lock().unwrap();
        assert!(events.iter().all(|(group, _)| group == "user-42"));
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].1.status, SessionStatus::Processed);
    }

    #[test]
    fn first_update_always_sent_then_throttled() {
        let recorder = Arc::new(Recorder::default());
        let mut progress = reporter(&recorder, Duration::from_secs(3600));
        progress.begin();
        progress.update(0.1, "a");
        progress.update(0.2, "b");
        progress.update(0.3, "c");

        assert_eq!(
            types(&recorder),
            vec![
                (MSG_TYPE_SESSION_STARTED.to_string(), 0.0),
                (MSG_TYPE_SESSION_PROGRESS.to_string(), 0.1),
            ]
        );
    }

    #[test]
    fn completion_bypasses_throttle() {
        let recorder = Arc::new(Recorder::default());
        let mut progress = reporter(&recorder, Duration::from_secs(3600));
        progress.begin();
        progress.update(0.1, "a");
        progress.update(1.0, "done");

        let sent = types(&recorder);
        assert_eq!(sent.last().unwrap(), &(MSG_TYPE_SESSION_PROGRESS.to_string(), 1.0));
    }

    #[test]
    fn end_flushes_suppressed_update_before_end_event() {
        let recorder = Arc::new(Recorder::default());
        let mut progress = reporter(&recorder, Duration::from_secs(3600));
        progress.begin();
        progress.update(0.1, "a");
        progress.update(0.6, "latest");
        progress.end(SessionStatus::NotStarted);

        let sent = types(&recorder);
        assert_eq!(
            &sent[2..],
            &[
                (MSG_TYPE_SESSION_PROGRESS.to_string(), 0.6),
                (MSG_TYPE_SESSION_ENDED.to_string(), 0.6),
            ]
        );
    }

    #[test]
    fn zero_interval_sends_everything() {
        let recorder = Arc::new(Recorder::default());
        let mut progress = reporter(&recorder, Duration::ZERO);
        progress.begin();
        for i in 0..5 {
            progress.update(i as f64 / 5.0, "step");
        }
        assert_eq!(types(&recorder).len(), 6);
    }

    #[test]
    fn publish_failures_are_swallowed() {
        let mut progress =
            ProgressReporter::new(Arc::new(Broken), 1, uuid::Uuid::new_v4(), Duration::ZERO);
        progress.begin();
        progress.update(0.5, "x");
        progress.end(SessionStatus::Processed);
    }
}
