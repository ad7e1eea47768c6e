use std::sync::Arc;

use xraygen_core::session_events::user_group;
use xraygen_core::storage::BlobStore;
use xraygen_core::types::DbId;
use xraygen_db::{JobQueue, SessionStore};
use xraygen_events::{Notifier, SessionEvent};

/// Shared handles every pipeline component works through.
///
/// Cheap to clone; all fields are `Arc`s.
#[derive(Clone)]
pub struct PipelineContext {
    pub store: Arc<dyn SessionStore>,
    pub queue: Arc<dyn JobQueue>,
    pub blobs: Arc<dyn BlobStore>,
    pub notifier: Arc<dyn Notifier>,
}

impl PipelineContext {
    pub fn new(
        store: Arc<dyn SessionStore>,
        queue: Arc<dyn JobQueue>,
        blobs: Arc<dyn BlobStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            queue,
            blobs,
            notifier,
        }
    }

    /// Publish to an owner's group. Failures are logged, never returned.
    pub fn notify_owner(&self, owner_id: DbId, event: SessionEvent) {
        self.notify_group(&user_group(owner_id), event);
    }

    pub fn notify_group(&self, group: &str, event: SessionEvent) {
        let event_type = event.event_type.clone();
        if let Err(e) = self.notifier.publish(group, event) {
            tracing::warn!(group, event_type = %event_type, error = %e, "Failed to publish event");
        }
    }
}
