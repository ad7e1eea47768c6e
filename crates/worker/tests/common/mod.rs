//! Shared in-memory harness for pipeline tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use xraygen_core::parameters::{AngularAxis, DeviceGeometry, InputParameters};
use xraygen_core::sampler::Pose;
use xraygen_core::session::{ClaimOutcome, SessionStatus};
use xraygen_core::storage::{BlobStore, MemoryBlobStore};
use xraygen_core::types::{Actor, SessionId};
use xraygen_db::models::job::{JobKind, NewJob};
use xraygen_db::models::session::Session;
use xraygen_db::{JobQueue, MemoryJobQueue, MemoryStore, SessionStore};
use xraygen_events::EventBus;
use xraygen_renderer::synthetic::SyntheticRendererFactory;
use xraygen_renderer::{
    PngCodec, ProjectionRenderer, RawProjection, RenderError, RendererFactory,
    SniffingVolumeLoader, Volume,
};
use xraygen_worker::archive::ArtifactArchiver;
use xraygen_worker::cascade::CascadeDeleter;
use xraygen_worker::dispatcher::JobDispatcher;
use xraygen_worker::runner::WorkerPool;
use xraygen_worker::service::SessionService;
use xraygen_worker::PipelineContext;

pub const OWNER: Actor = Actor {
    user_id: 7,
    is_staff: false,
};
pub const OTHER_USER: Actor = Actor {
    user_id: 8,
    is_staff: false,
};
pub const STAFF: Actor = Actor {
    user_id: 1,
    is_staff: true,
};

pub const WORKER: &str = "test-worker-0";

/// A minimal NRRD header; enough for format sniffing.
pub const NRRD_VOLUME: &[u8] = b"NRRD0004\ntype: short\ndimension: 3\nsizes: 4 4 4\n\n";

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub queue: Arc<MemoryJobQueue>,
    pub blobs: Arc<MemoryBlobStore>,
    pub bus: Arc<EventBus>,
    pub synthetic: SyntheticRendererFactory,
    pub ctx: PipelineContext,
    pub service: SessionService,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryJobQueue::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let bus = Arc::new(EventBus::default());
        let ctx = PipelineContext::new(store.clone(), queue.clone(), blobs.clone(), bus.clone());
        Self {
            service: SessionService::new(ctx.clone(), 5),
            store,
            queue,
            blobs,
            bus,
            synthetic: SyntheticRendererFactory::new(16, 16),
            ctx,
        }
    }

    pub fn dispatcher(&self) -> JobDispatcher {
        self.dispatcher_with(Arc::new(self.synthetic.clone()))
    }

    pub fn dispatcher_with(&self, renderers: Arc<dyn RendererFactory>) -> JobDispatcher {
        JobDispatcher::new(
            self.ctx.clone(),
            Arc::new(SniffingVolumeLoader),
            renderers,
            Arc::new(PngCodec::new(8)),
            Arc::new(Semaphore::new(1)),
        )
        .with_progress_interval(Duration::ZERO)
        .with_rng_seed(17)
    }

    pub fn pool(&self) -> WorkerPool {
        self.pool_with(self.dispatcher())
    }

    pub fn pool_with(&self, dispatcher: JobDispatcher) -> WorkerPool {
        WorkerPool::new(
            self.queue.clone(),
            dispatcher,
            ArtifactArchiver::new(self.ctx.clone()),
            CascadeDeleter::new(self.ctx.clone()),
            "test-worker",
        )
    }

    /// Upload a volume and create a session around it.
    pub async fn create_session(&self, actor: Actor) -> Session {
        let key = format!("volumes/{}/ct.nrrd", uuid::Uuid::new_v4());
        self.blobs.put(&key, NRRD_VOLUME.to_vec()).await.unwrap();
        self.service.create(actor, &key, None).await.unwrap()
    }

    /// A session with parameters saved, ready to submit.
    pub async fn ready_session(&self, actor: Actor, params: &InputParameters) -> Session {
        let session = self.create_session(actor).await;
        self.service
            .set_parameters(actor, session.id, params)
            .await
            .unwrap();
        session
    }

    pub async fn status(&self, id: SessionId) -> Option<xraygen_core::session::SessionStatus> {
        self.store.current_status(id).await.unwrap()
    }
}

/// Fixed-pose parameters: alpha 10, beta -5, everything else at zero.
pub fn fixed_pose_params(num_samples: i32) -> InputParameters {
    let mut params = InputParameters::new(1000.0, num_samples);
    params.alpha = AngularAxis::fixed(10.0);
    params.beta = AngularAxis::fixed(-5.0);
    params
}

// ---------------------------------------------------------------------------
// Scripted renderers
// ---------------------------------------------------------------------------

/// What a [`ScriptedFactory`] renderer does after `after` successful renders.
#[derive(Clone)]
pub enum Script {
    /// Request cancellation of the session, then keep rendering.
    Cancel {
        store: Arc<MemoryStore>,
        session_id: SessionId,
    },
    /// Request cancellation, then claim the session again as a second
    /// delivery of the same job would, recording what the claim returned.
    CancelAndClaim {
        store: Arc<MemoryStore>,
        session_id: SessionId,
        claim: Arc<Mutex<Option<ClaimOutcome>>>,
    },
    /// Put the session back to `not-started` behind the loop's back.
    Revert {
        store: Arc<MemoryStore>,
        session_id: SessionId,
    },
    /// Mark the session deleting and run its whole delete cascade before
    /// the current sample is stored.
    Delete {
        store: Arc<MemoryStore>,
        queue: Arc<MemoryJobQueue>,
        deleter: CascadeDeleter,
        session_id: SessionId,
    },
    /// Fail every further render.
    Fail,
}

impl Script {
    async fn fire(&self) {
        match self {
            Script::Cancel { store, session_id } => {
                store.request_cancel(*session_id).await.unwrap();
            }
            Script::CancelAndClaim {
                store,
                session_id,
                claim,
            } => {
                store.request_cancel(*session_id).await.unwrap();
                let outcome = store.claim_session(*session_id).await.unwrap();
                *claim.lock().unwrap() = Some(outcome);
            }
            Script::Revert { store, session_id } => {
                store.force_status(*session_id, SessionStatus::NotStarted).await;
            }
            Script::Delete {
                store,
                queue,
                deleter,
                session_id,
            } => {
                store.mark_deleting(*session_id).await.unwrap();
                let job = queue
                    .enqueue(NewJob::new(JobKind::Delete, *session_id))
                    .await
                    .unwrap();
                deleter.handle_delete(&job).await.unwrap();
            }
            Script::Fail => {}
        }
    }
}

/// Wraps the synthetic renderer and injects an event part-way through a run.
pub struct ScriptedFactory {
    pub inner: SyntheticRendererFactory,
    pub after: usize,
    pub script: Script,
}

#[async_trait]
impl RendererFactory for ScriptedFactory {
    async fn create(
        &self,
        volume: Arc<Volume>,
        geometry: DeviceGeometry,
    ) -> Result<Box<dyn ProjectionRenderer>, RenderError> {
        Ok(Box::new(ScriptedRenderer {
            inner: self.inner.create(volume, geometry).await?,
            rendered: Arc::new(AtomicUsize::new(0)),
            after: self.after,
            script: self.script.clone(),
        }))
    }
}

struct ScriptedRenderer {
    inner: Box<dyn ProjectionRenderer>,
    rendered: Arc<AtomicUsize>,
    after: usize,
    script: Script,
}

#[async_trait]
impl ProjectionRenderer for ScriptedRenderer {
    async fn render(&mut self, pose: &Pose) -> Result<RawProjection, RenderError> {
        let done = self.rendered.load(Ordering::SeqCst);
        if done >= self.after {
            if let Script::Fail = self.script {
                return Err(RenderError::InvalidProjection("scripted failure".into()));
            }
        }
        let raw = self.inner.render(pose).await?;
        let done = self.rendered.fetch_add(1, Ordering::SeqCst) + 1;
        if done == self.after {
            self.script.fire().await;
        }
        Ok(raw)
    }

    async fn release(&mut self) -> Result<(), RenderError> {
        self.inner.release().await
    }
}
