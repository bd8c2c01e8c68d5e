use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread;

use tokio::sync::mpsc;

use findr_common::{FindrError, FindrResult};
use findr_frame_model::{Frame, FrameContext, ResultMap, ResultValue, RunMode, StreamEvent, ValueKind};
use findr_pipeline::{
    Capability, CapabilityConfig, CapabilityManifest, CapabilityRegistry, OutputKey, Pipeline,
    PipelineConfig, SamplingConfig, SamplingMode, SamplingPolicy, Scheduler,
};
use findr_stream_engine::source::SyntheticSource;
use findr_stream_engine::{
    Broadcaster, DefaultSourceOpener, Engine, EngineSettings, InitStatus, JpegFrameEncoder,
    SessionId, SessionManager, SessionRequest, StopReason, StopSignal, VecSink,
};

static MARKER: CapabilityManifest = CapabilityManifest {
    name: "marker",
    description: "records how each frame was produced",
    produces: &[OutputKey {
        key: "caption",
        kind: ValueKind::Caption,
        description: "full or extrapolated marker",
    }],
    requires: &[],
    config_keys: &[],
};

#[derive(Default)]
struct ModelCalls {
    process: AtomicUsize,
    extrapolate: AtomicUsize,
    unload: AtomicUsize,
}

struct Marker {
    calls: Arc<ModelCalls>,
}

impl Capability for Marker {
    fn manifest(&self) -> &'static CapabilityManifest {
        &MARKER
    }

    fn load(&mut self, _config: &CapabilityConfig) -> FindrResult<()> {
        Ok(())
    }

    fn unload(&mut self) {
        self.calls.unload.fetch_add(1, Ordering::SeqCst);
    }

    fn process(
        &mut self,
        _frame: &Frame,
        _so_far: &ResultMap,
        ctx: &FrameContext,
    ) -> FindrResult<ResultMap> {
        self.calls.process.fetch_add(1, Ordering::SeqCst);
        let mut out = ResultMap::new();
        out.insert("caption", ResultValue::Caption(format!("full:{}", ctx.frame_index)));
        Ok(out)
    }

    fn extrapolate(&mut self, _frame: &Frame, ctx: &FrameContext) -> FindrResult<ResultMap> {
        self.calls.extrapolate.fetch_add(1, Ordering::SeqCst);
        let mut out = ResultMap::new();
        out.insert("caption", ResultValue::Caption(format!("extra:{}", ctx.frame_index)));
        Ok(out)
    }
}

fn registry(calls: &Arc<ModelCalls>) -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();
    let calls = calls.clone();
    registry.register(&MARKER, move || {
        Box::new(Marker {
            calls: calls.clone(),
        }) as Box<dyn Capability>
    });
    registry
}

fn frame_events(rx: &mut mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[test]
fn ten_frames_stride_five_runs_two_full_and_eight_extrapolated() {
    let calls = Arc::new(ModelCalls::default());
    let mut pipeline =
        Pipeline::build(&registry(&calls), &PipelineConfig::with_tools(["marker"])).unwrap();

    let session = SessionId::new();
    let broadcaster = Arc::new(Broadcaster::new());
    let (tx, mut rx) = mpsc::channel(32);
    broadcaster.subscribe(session, tx);

    let policy = SamplingPolicy::new(SamplingMode::FixedStride { stride: 5 }, 30).unwrap();
    let engine = Engine::new(
        session,
        Scheduler::new(policy),
        JpegFrameEncoder::new(70),
        broadcaster,
        StopSignal::new(),
    );
    let mut sink = VecSink::new();
    let report = engine
        .run(
            &mut pipeline,
            &mut SyntheticSource::new(10, 32, 24, 30.0),
            &mut sink,
        )
        .unwrap();

    assert_eq!(report.frames, 10);
    assert_eq!(report.full_runs, 2);
    assert_eq!(report.extrapolated, 8);
    assert_eq!(report.published, 10);
    assert_eq!(report.emitted, 10);
    assert_eq!(report.stopped_by, StopReason::EndOfStream);
    assert_eq!(calls.process.load(Ordering::SeqCst), 2);
    assert_eq!(calls.extrapolate.load(Ordering::SeqCst), 8);

    let emitted: Vec<u64> = sink.frames().iter().map(|f| f.frame_index).collect();
    assert_eq!(emitted, (0..10).collect::<Vec<_>>());

    let events = frame_events(&mut rx);
    assert_eq!(events.len(), 10);
    for (i, event) in events.iter().enumerate() {
        let StreamEvent::Frame(payload) = event else {
            panic!("expected frame event, got {event:?}");
        };
        assert_eq!(payload.frame_index, i as u64);
        let expected = if i % 5 == 0 {
            RunMode::Full
        } else {
            RunMode::Extrapolated
        };
        assert_eq!(payload.mode, expected);
    }

    pipeline.teardown();
    pipeline.teardown();
    assert_eq!(calls.unload.load(Ordering::SeqCst), 1);
}

fn manager(calls: &Arc<ModelCalls>, frame_buffer: usize) -> Arc<SessionManager> {
    let settings = EngineSettings {
        frame_buffer,
        ..EngineSettings::default()
    };
    Arc::new(SessionManager::new(
        Arc::new(registry(calls)),
        Arc::new(DefaultSourceOpener::default()),
        settings,
    ))
}

fn request(frames: u32, stride: u32) -> SessionRequest {
    SessionRequest {
        video_url: format!("synthetic://{frames}?width=16&height=16"),
        pipeline_configuration: PipelineConfig {
            sampling: Some(SamplingConfig::stride(stride)),
            ..PipelineConfig::with_tools(["marker"])
        },
    }
}

#[tokio::test]
async fn session_streams_then_releases_admission() {
    let calls = Arc::new(ModelCalls::default());
    let manager = manager(&calls, 4);

    let id = manager.admit(request(10, 5)).unwrap();
    assert_eq!(manager.initialize_pipeline(id).unwrap(), InitStatus::Initialized);
    assert_eq!(
        manager.initialize_pipeline(id).unwrap(),
        InitStatus::AlreadyInitialized
    );
    let (_sub, mut events) = manager.subscribe(id).unwrap();

    let mut handle = manager.start_stream(id).unwrap();
    let mut frames = 0;
    while let Some(frame) = handle.frames.recv().await {
        assert_eq!(frame.frame_index, frames);
        frames += 1;
    }
    let report = handle.task.await.unwrap().unwrap();

    assert_eq!(frames, 10);
    assert_eq!(report.full_runs, 2);
    assert!(!manager.admission().is_active());
    assert!(manager.snapshot().is_none());
    assert_eq!(calls.unload.load(Ordering::SeqCst), 1);

    let mut received = Vec::new();
    while let Some(event) = events.recv().await {
        received.push(event);
    }
    assert_eq!(received.len(), 11);
    assert_eq!(received.last(), Some(&StreamEvent::End { frames: 10 }));
}

#[tokio::test]
async fn reset_during_stream_stops_engine_and_frees_slot() {
    let calls = Arc::new(ModelCalls::default());
    let manager = manager(&calls, 1);

    let id = manager.admit(request(10_000, 3)).unwrap();
    manager.initialize_pipeline(id).unwrap();
    let mut handle = manager.start_stream(id).unwrap();

    assert!(handle.frames.recv().await.is_some());
    assert_eq!(manager.reset(), Some(id));

    // Keep draining so the engine is never parked on a full channel.
    while handle.frames.recv().await.is_some() {}
    let report = handle.task.await.unwrap().unwrap();

    assert_eq!(report.stopped_by, StopReason::Cancelled);
    assert!(report.frames < 10_000);
    assert!(!manager.admission().is_active());
    assert_eq!(calls.unload.load(Ordering::SeqCst), 1);

    // A new session can be admitted, and a late end for the old one is a no-op.
    let next = manager.admit(request(1, 1)).unwrap();
    assert!(matches!(
        manager.end(id).unwrap_err(),
        FindrError::SessionNotFound { .. }
    ));
    assert_eq!(manager.admission().current(), Some(next));
}

#[tokio::test]
async fn dropping_frame_consumer_counts_as_disconnect() {
    let calls = Arc::new(ModelCalls::default());
    let manager = manager(&calls, 1);

    let id = manager.admit(request(10_000, 2)).unwrap();
    manager.initialize_pipeline(id).unwrap();
    let mut handle = manager.start_stream(id).unwrap();
    assert!(handle.frames.recv().await.is_some());
    drop(handle.frames);

    let report = handle.task.await.unwrap().unwrap();
    assert_eq!(report.stopped_by, StopReason::Disconnected);
    assert!(!manager.admission().is_active());
}

#[tokio::test]
async fn unopenable_source_ends_session() {
    let calls = Arc::new(ModelCalls::default());
    let manager = manager(&calls, 4);

    let request = SessionRequest {
        video_url: "/no/such/video.mp4".to_string(),
        pipeline_configuration: PipelineConfig::with_tools(["marker"]),
    };
    let id = manager.admit(request).unwrap();
    manager.initialize_pipeline(id).unwrap();

    let err = manager.start_stream(id).err().unwrap();
    assert!(matches!(err, FindrError::Source { .. }));
    assert!(!manager.admission().is_active());
    assert_eq!(calls.unload.load(Ordering::SeqCst), 1);
}

static FAULTY: CapabilityManifest = CapabilityManifest {
    name: "faulty",
    description: "panics on its third frame",
    produces: &[OutputKey {
        key: "caption",
        kind: ValueKind::Caption,
        description: "frame marker",
    }],
    requires: &[],
    config_keys: &[],
};

struct Faulty {
    calls: Arc<ModelCalls>,
}

impl Capability for Faulty {
    fn manifest(&self) -> &'static CapabilityManifest {
        &FAULTY
    }

    fn load(&mut self, _config: &CapabilityConfig) -> FindrResult<()> {
        Ok(())
    }

    fn unload(&mut self) {
        self.calls.unload.fetch_add(1, Ordering::SeqCst);
    }

    fn process(
        &mut self,
        _frame: &Frame,
        _so_far: &ResultMap,
        ctx: &FrameContext,
    ) -> FindrResult<ResultMap> {
        self.calls.process.fetch_add(1, Ordering::SeqCst);
        if ctx.frame_index == 2 {
            panic!("model crashed on frame 2");
        }
        let mut out = ResultMap::new();
        out.insert("caption", ResultValue::Caption(format!("full:{}", ctx.frame_index)));
        Ok(out)
    }

    fn extrapolate(&mut self, _frame: &Frame, _ctx: &FrameContext) -> FindrResult<ResultMap> {
        Ok(ResultMap::new())
    }
}

#[tokio::test]
async fn panicking_capability_fails_session_and_frees_slot() {
    let calls = Arc::new(ModelCalls::default());
    let mut registry = registry(&calls);
    let faulty_calls = calls.clone();
    registry.register(&FAULTY, move || {
        Box::new(Faulty {
            calls: faulty_calls.clone(),
        }) as Box<dyn Capability>
    });
    let manager = Arc::new(SessionManager::new(
        Arc::new(registry),
        Arc::new(DefaultSourceOpener::default()),
        EngineSettings::default(),
    ));

    let request = SessionRequest {
        video_url: "synthetic://10?width=16&height=16".to_string(),
        pipeline_configuration: PipelineConfig {
            sampling: Some(SamplingConfig::stride(1)),
            ..PipelineConfig::with_tools(["faulty"])
        },
    };
    let id = manager.admit(request).unwrap();
    manager.initialize_pipeline(id).unwrap();
    let (_sub, mut events) = manager.subscribe(id).unwrap();

    let mut handle = manager.start_stream(id).unwrap();
    while handle.frames.recv().await.is_some() {}
    let err = handle.task.await.expect("task must not abort").unwrap_err();

    assert!(matches!(err, FindrError::Inference { .. }));
    assert!(err.to_string().contains("model crashed on frame 2"));
    assert_eq!(calls.process.load(Ordering::SeqCst), 3);
    assert_eq!(calls.unload.load(Ordering::SeqCst), 1);
    assert!(!manager.admission().is_active());
    assert!(manager.snapshot().is_none());

    let mut last = None;
    while let Some(event) = events.recv().await {
        last = Some(event);
    }
    assert!(matches!(last, Some(StreamEvent::Error { ref message }) if message.contains("panicked")));

    manager.admit(request_for("faulty")).unwrap();
}

fn request_for(tool: &str) -> SessionRequest {
    SessionRequest {
        video_url: "synthetic://3?width=16&height=16".to_string(),
        pipeline_configuration: PipelineConfig::with_tools([tool]),
    }
}

static GATED: CapabilityManifest = CapabilityManifest {
    name: "gated",
    description: "loads only when the test opens the gate",
    produces: &[OutputKey {
        key: "caption",
        kind: ValueKind::Caption,
        description: "frame marker",
    }],
    requires: &[],
    config_keys: &[],
};

struct Gate {
    entered: Mutex<std_mpsc::Sender<()>>,
    open: Mutex<std_mpsc::Receiver<()>>,
    live: AtomicUsize,
    max_live: AtomicUsize,
    unloads: AtomicUsize,
}

struct Gated {
    gate: Arc<Gate>,
    loaded: bool,
}

impl Capability for Gated {
    fn manifest(&self) -> &'static CapabilityManifest {
        &GATED
    }

    fn load(&mut self, _config: &CapabilityConfig) -> FindrResult<()> {
        let _ = self.gate.entered.lock().unwrap().send(());
        self.gate.open.lock().unwrap().recv().unwrap();
        let live = self.gate.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.gate.max_live.fetch_max(live, Ordering::SeqCst);
        self.loaded = true;
        Ok(())
    }

    fn unload(&mut self) {
        if std::mem::take(&mut self.loaded) {
            self.gate.live.fetch_sub(1, Ordering::SeqCst);
            self.gate.unloads.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn process(
        &mut self,
        _frame: &Frame,
        _so_far: &ResultMap,
        _ctx: &FrameContext,
    ) -> FindrResult<ResultMap> {
        Ok(ResultMap::new())
    }

    fn extrapolate(&mut self, _frame: &Frame, _ctx: &FrameContext) -> FindrResult<ResultMap> {
        Ok(ResultMap::new())
    }
}

#[test]
fn ending_during_load_holds_slot_until_models_release() {
    let (entered_tx, entered_rx) = std_mpsc::channel();
    let (open_tx, open_rx) = std_mpsc::channel();
    let gate = Arc::new(Gate {
        entered: Mutex::new(entered_tx),
        open: Mutex::new(open_rx),
        live: AtomicUsize::new(0),
        max_live: AtomicUsize::new(0),
        unloads: AtomicUsize::new(0),
    });
    let mut registry = CapabilityRegistry::new();
    let factory_gate = gate.clone();
    registry.register(&GATED, move || {
        Box::new(Gated {
            gate: factory_gate.clone(),
            loaded: false,
        }) as Box<dyn Capability>
    });
    let manager = Arc::new(SessionManager::new(
        Arc::new(registry),
        Arc::new(DefaultSourceOpener::default()),
        EngineSettings::default(),
    ));

    let first = manager.admit(request_for("gated")).unwrap();
    let (_sub, mut events) = manager.subscribe(first).unwrap();
    let loader = {
        let manager = manager.clone();
        thread::spawn(move || manager.initialize_pipeline(first))
    };
    entered_rx.recv().unwrap();

    manager.end(first).unwrap();
    assert_eq!(manager.admission().current(), Some(first));
    assert!(matches!(
        manager.admit(request_for("gated")).unwrap_err(),
        FindrError::AdmissionRejected { .. }
    ));

    open_tx.send(()).unwrap();
    let outcome = loader.join().unwrap();
    assert!(matches!(outcome, Err(FindrError::SessionNotFound { .. })));
    assert_eq!(gate.unloads.load(Ordering::SeqCst), 1);
    assert_eq!(gate.live.load(Ordering::SeqCst), 0);
    assert!(!manager.admission().is_active());
    assert_eq!(events.try_recv().ok(), Some(StreamEvent::End { frames: 0 }));

    let second = manager.admit(request_for("gated")).unwrap();
    open_tx.send(()).unwrap();
    assert_eq!(manager.initialize_pipeline(second).unwrap(), InitStatus::Initialized);
    assert_eq!(gate.max_live.load(Ordering::SeqCst), 1);
}
