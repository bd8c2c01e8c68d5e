//! Session lifecycle: admission, lazy pipeline initialization, streaming,
//! and teardown.
//!
//! [`SessionManager`] is constructed once at startup and shared by request
//! handlers. It owns the admission gate, the broadcaster, and the session
//! table. Lock order is sessions table, then admission; neither lock is
//! held while building pipelines, opening sources, or processing frames.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use findr_common::config::{AppConfig, SamplingDefaults};
use findr_common::{FindrError, FindrResult};
use findr_frame_model::StreamEvent;
use findr_pipeline::{CapabilityRegistry, Pipeline, PipelineConfig, Scheduler};

use crate::admission::{SessionAdmission, SessionId};
use crate::broadcast::{Broadcaster, SubscriberId};
use crate::engine::{Engine, EngineReport, StopSignal};
use crate::sink::{EncodedFrame, JpegFrameEncoder};
use crate::source::SourceOpener;

/// Body of a session admission request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionRequest {
    /// Media locator resolved by the source opener.
    pub video_url: String,

    #[serde(default)]
    pub pipeline_configuration: PipelineConfig,
}

/// Outcome of a pipeline initialization request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InitStatus {
    Initialized,
    AlreadyInitialized,
    /// Another request is currently building this session's pipeline.
    InProgress,
}

/// Tunables for streams started by the manager.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub jpeg_quality: u8,
    /// Encoded frames buffered between the engine and the frame consumer.
    pub frame_buffer: usize,
    /// Events buffered per structured-data subscriber.
    pub subscriber_buffer: usize,
    pub sampling: SamplingDefaults,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl EngineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            jpeg_quality: config.server.jpeg_quality,
            frame_buffer: config.server.frame_buffer.max(1),
            subscriber_buffer: config.server.subscriber_buffer.max(1),
            sampling: config.sampling.clone(),
        }
    }
}

/// Status view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub video_url: String,
    pub tool_types: Vec<String>,
    pub pipeline_initialized: bool,
    pub streaming: bool,
    pub created_at: String,
}

/// A running stream.
pub struct StreamHandle {
    pub session: SessionId,
    /// Encoded frames in acquisition order. Dropping the receiver counts
    /// as a client disconnect.
    pub frames: mpsc::Receiver<EncodedFrame>,
    pub stop: StopSignal,
    pub task: JoinHandle<FindrResult<EngineReport>>,
}

struct SessionRecord {
    request: SessionRequest,
    pipeline: Option<Pipeline>,
    initializing: bool,
    /// Ended while its pipeline was loading; cleanup waits for the load.
    cancelled: bool,
    stream: Option<StopSignal>,
    created_at: String,
}

impl SessionRecord {
    fn snapshot(&self, id: SessionId) -> SessionSnapshot {
        SessionSnapshot {
            id,
            video_url: self.request.video_url.clone(),
            tool_types: self.request.pipeline_configuration.tool_types.clone(),
            pipeline_initialized: self.pipeline.is_some() || self.stream.is_some(),
            streaming: self.stream.is_some(),
            created_at: self.created_at.clone(),
        }
    }
}

pub struct SessionManager {
    admission: SessionAdmission,
    broadcaster: Arc<Broadcaster>,
    registry: Arc<CapabilityRegistry>,
    opener: Arc<dyn SourceOpener>,
    settings: EngineSettings,
    sessions: Mutex<HashMap<SessionId, SessionRecord>>,
}

impl SessionManager {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        opener: Arc<dyn SourceOpener>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            admission: SessionAdmission::new(),
            broadcaster: Arc::new(Broadcaster::new()),
            registry,
            opener,
            settings,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    pub fn admission(&self) -> &SessionAdmission {
        &self.admission
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    fn table(&self) -> MutexGuard<'_, HashMap<SessionId, SessionRecord>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate the request statically, then claim the admission slot.
    ///
    /// Configuration errors and contention are reported before anything is
    /// committed.
    pub fn admit(&self, request: SessionRequest) -> FindrResult<SessionId> {
        if request.video_url.trim().is_empty() {
            return Err(FindrError::configuration("video_url must not be empty"));
        }
        Pipeline::validate(&self.registry, &request.pipeline_configuration)?;
        request
            .pipeline_configuration
            .sampling_policy(&self.settings.sampling)?;

        let id = SessionId::new();
        let mut sessions = self.table();
        if !self.admission.try_acquire(id) {
            let active = self
                .admission
                .current()
                .map(|a| a.to_string())
                .unwrap_or_default();
            tracing::info!(active = %active, "Session admission rejected");
            return Err(FindrError::admission_rejected(active));
        }
        sessions.insert(
            id,
            SessionRecord {
                request,
                pipeline: None,
                initializing: false,
                cancelled: false,
                stream: None,
                created_at: chrono::Utc::now().to_rfc3339(),
            },
        );
        tracing::info!(session = %id, "Session admitted");
        Ok(id)
    }

    /// Build and load the session's pipeline. Blocking: model loading and
    /// warm-up happen here, outside every lock.
    pub fn initialize_pipeline(&self, id: SessionId) -> FindrResult<InitStatus> {
        let config = {
            let mut sessions = self.table();
            let record = sessions
                .get_mut(&id)
                .ok_or_else(|| FindrError::session_not_found(id.to_string()))?;
            if record.pipeline.is_some() || record.stream.is_some() {
                return Ok(InitStatus::AlreadyInitialized);
            }
            if record.initializing {
                return Ok(InitStatus::InProgress);
            }
            record.initializing = true;
            record.request.pipeline_configuration.clone()
        };

        tracing::info!(session = %id, capabilities = ?config.tool_types, "Initializing pipeline");
        let built = Pipeline::build(&self.registry, &config);

        {
            let mut sessions = self.table();
            let Some(record) = sessions.get_mut(&id) else {
                return Err(FindrError::session_not_found(id.to_string()));
            };
            record.initializing = false;
            if !record.cancelled {
                record.pipeline = Some(built?);
                return Ok(InitStatus::Initialized);
            }
        }

        // Ended while loading: release the models before the slot.
        if let Ok(mut pipeline) = built {
            pipeline.teardown();
        }
        {
            let mut sessions = self.table();
            sessions.remove(&id);
            self.admission.release(id);
        }
        self.broadcaster.close(id, StreamEvent::End { frames: 0 });
        tracing::info!(session = %id, "Session ended after cancelled initialization");
        Err(FindrError::session_not_found(id.to_string()))
    }

    /// Subscribe to a session's structured results.
    pub fn subscribe(
        &self,
        id: SessionId,
    ) -> FindrResult<(SubscriberId, mpsc::Receiver<StreamEvent>)> {
        // Registered under the table lock so `finish` cannot close the
        // session between the lookup and the subscription.
        let sessions = self.table();
        if !sessions.contains_key(&id) {
            return Err(FindrError::session_not_found(id.to_string()));
        }
        let (tx, rx) = mpsc::channel(self.settings.subscriber_buffer);
        let subscriber = self.broadcaster.subscribe(id, tx);
        drop(sessions);
        Ok((subscriber, rx))
    }

    pub fn unsubscribe(&self, id: SessionId, subscriber: SubscriberId) {
        self.broadcaster.unsubscribe(id, subscriber);
    }

    /// Open the session's source and start the engine on a blocking thread.
    ///
    /// When the run ends for any reason the pipeline is torn down, the
    /// session removed, admission released, and subscribers receive a
    /// terminal event. Must be called from within a tokio runtime.
    pub fn start_stream(self: &Arc<Self>, id: SessionId) -> FindrResult<StreamHandle> {
        let stop = StopSignal::new();
        let (mut pipeline, request) = {
            let mut sessions = self.table();
            let record = sessions
                .get_mut(&id)
                .ok_or_else(|| FindrError::session_not_found(id.to_string()))?;
            if record.stream.is_some() {
                return Err(FindrError::admission_rejected(id.to_string()));
            }
            let pipeline = record
                .pipeline
                .take()
                .ok_or_else(|| FindrError::PipelineNotInitialized { id: id.to_string() })?;
            record.stream = Some(stop.clone());
            (pipeline, record.request.clone())
        };

        let prepared = request
            .pipeline_configuration
            .sampling_policy(&self.settings.sampling)
            .and_then(|policy| Ok((policy, self.opener.open(&request.video_url)?)));
        let (policy, mut source) = match prepared {
            Ok(ready) => ready,
            Err(e) => {
                tracing::warn!(session = %id, error = %e, "Stream could not start");
                pipeline.teardown();
                self.finish(id, Err(&e));
                return Err(e);
            }
        };

        let engine = Engine::new(
            id,
            Scheduler::new(policy),
            JpegFrameEncoder::new(self.settings.jpeg_quality),
            self.broadcaster.clone(),
            stop.clone(),
        );
        let (mut tx, rx) = mpsc::channel(self.settings.frame_buffer);
        let manager = Arc::clone(self);
        let task = tokio::task::spawn_blocking(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                engine.run(&mut pipeline, source.as_mut(), &mut tx)
            }))
            .unwrap_or_else(|payload| Err(panicked("engine", payload.as_ref())));
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| pipeline.teardown())) {
                tracing::error!(session = %id, error = %panicked("teardown", payload.as_ref()), "Pipeline teardown failed");
            }
            manager.finish(id, result.as_ref());
            result
        });

        Ok(StreamHandle {
            session: id,
            frames: rx,
            stop,
            task,
        })
    }

    /// End a session. A streaming session is signalled to stop and cleans
    /// up when its engine returns; one that is still loading keeps its
    /// admission until the load completes; an idle one is torn down
    /// immediately.
    pub fn end(&self, id: SessionId) -> FindrResult<()> {
        let record = {
            let mut sessions = self.table();
            let record = sessions
                .get_mut(&id)
                .ok_or_else(|| FindrError::session_not_found(id.to_string()))?;
            if let Some(stop) = &record.stream {
                tracing::info!(session = %id, "Stopping active stream");
                stop.stop();
                return Ok(());
            }
            if record.initializing {
                tracing::info!(session = %id, "Ending session once its pipeline finishes loading");
                record.cancelled = true;
                return Ok(());
            }
            let record = sessions.remove(&id);
            self.admission.release(id);
            record
        };

        if let Some(mut pipeline) = record.and_then(|r| r.pipeline) {
            pipeline.teardown();
        }
        self.broadcaster.close(id, StreamEvent::End { frames: 0 });
        tracing::info!(session = %id, "Session ended");
        Ok(())
    }

    /// End whichever session is active. Returns its id, if there was one.
    pub fn reset(&self) -> Option<SessionId> {
        let id = self.admission.current()?;
        if let Err(FindrError::SessionNotFound { .. }) = self.end(id) {
            // Admission outlived its record; free the slot.
            self.admission.release(id);
        }
        tracing::info!(session = %id, "Session reset");
        Some(id)
    }

    /// Status of the active session.
    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        let id = self.admission.current()?;
        self.table().get(&id).map(|r| r.snapshot(id))
    }

    pub fn session(&self, id: SessionId) -> FindrResult<SessionSnapshot> {
        self.table()
            .get(&id)
            .map(|r| r.snapshot(id))
            .ok_or_else(|| FindrError::session_not_found(id.to_string()))
    }

    fn finish(&self, id: SessionId, outcome: Result<&EngineReport, &FindrError>) {
        {
            let mut sessions = self.table();
            sessions.remove(&id);
            self.admission.release(id);
        }

        let terminal = match outcome {
            Ok(report) => {
                tracing::info!(session = %id, frames = report.frames, stopped_by = ?report.stopped_by, "Session finished");
                StreamEvent::End {
                    frames: report.frames,
                }
            }
            Err(e) => {
                tracing::error!(session = %id, error = %e, "Session failed");
                StreamEvent::Error {
                    message: e.to_string(),
                }
            }
        };
        self.broadcaster.close(id, terminal);
    }
}

/// Error for a run that unwound instead of returning.
fn panicked(stage: &str, payload: &(dyn Any + Send)) -> FindrError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    FindrError::inference(stage, format!("panicked: {message}"))
}
