//! The per-session frame loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use findr_common::clock::{FpsMeter, StreamClock};
use findr_common::FindrResult;
use findr_frame_model::{FramePayload, RunMode, StreamEvent};
use findr_pipeline::{Pipeline, SamplerState, Scheduler};

use crate::admission::SessionId;
use crate::broadcast::Broadcaster;
use crate::sink::{EncodedFrame, FrameSink, JpegFrameEncoder};
use crate::source::FrameSource;

/// Frames between heartbeat log lines.
const HEARTBEAT_FRAMES: u64 = 30;

/// Cooperative cancellation flag checked between frames.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why a run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndOfStream,
    /// The stop signal was raised.
    Cancelled,
    /// The frame consumer went away.
    Disconnected,
}

/// Counters for one completed run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineReport {
    /// Frames acquired from the source.
    pub frames: u64,
    pub full_runs: u64,
    pub extrapolated: u64,
    pub published: u64,
    pub emitted: u64,
    pub stopped_by: StopReason,
    pub fps: f32,
}

impl EngineReport {
    fn new() -> Self {
        Self {
            frames: 0,
            full_runs: 0,
            extrapolated: 0,
            published: 0,
            emitted: 0,
            stopped_by: StopReason::EndOfStream,
            fps: 0.0,
        }
    }
}

/// Drives source -> scheduler -> pipeline -> (broadcaster, sink) for one
/// session. Blocking; run it on a dedicated thread.
pub struct Engine {
    session: SessionId,
    scheduler: Scheduler,
    encoder: JpegFrameEncoder,
    broadcaster: Arc<Broadcaster>,
    stop: StopSignal,
}

impl Engine {
    pub fn new(
        session: SessionId,
        scheduler: Scheduler,
        encoder: JpegFrameEncoder,
        broadcaster: Arc<Broadcaster>,
        stop: StopSignal,
    ) -> Self {
        Self {
            session,
            scheduler,
            encoder,
            broadcaster,
            stop,
        }
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Process frames until end of stream, cancellation, or disconnect.
    ///
    /// Each frame's results are published before its image is emitted.
    /// A source, pipeline, or encoding error ends the run and is returned;
    /// no later frame is processed.
    pub fn run(
        &self,
        pipeline: &mut Pipeline,
        source: &mut dyn FrameSource,
        sink: &mut dyn FrameSink,
    ) -> FindrResult<EngineReport> {
        let span = tracing::info_span!("session", id = %self.session);
        let _enter = span.enter();

        let clock = StreamClock::start();
        let mut state = SamplerState::new();
        let mut fps = FpsMeter::new();
        let mut report = EngineReport::new();
        tracing::info!(
            started_at = clock.epoch_wall(),
            policy = ?self.scheduler.policy(),
            capabilities = ?pipeline.capability_names(),
            "Stream started"
        );

        loop {
            if self.stop.is_stopped() {
                report.stopped_by = StopReason::Cancelled;
                break;
            }

            let Some(frame) = source.next_frame()? else {
                report.stopped_by = StopReason::EndOfStream;
                break;
            };
            report.frames += 1;

            let (ctx, mode) = state.observe(&self.scheduler, &frame, source.position_secs());
            let data = match mode {
                RunMode::Full => {
                    report.full_runs += 1;
                    pipeline.run(&frame, &ctx)?
                }
                RunMode::Extrapolated => {
                    report.extrapolated += 1;
                    pipeline.extrapolate(&frame, &ctx)?
                }
            };
            tracing::debug!(
                frame = ctx.frame_index,
                mode = %mode,
                score = ctx.scene_change_score,
                keys = data.len(),
                "Frame processed"
            );

            let event = StreamEvent::Frame(FramePayload::new(&ctx, mode, data));
            self.broadcaster.publish(self.session, &event);
            report.published += 1;

            let bytes = self.encoder.encode(&frame)?;
            let encoded = EncodedFrame {
                frame_index: ctx.frame_index,
                bytes,
            };
            if sink.emit(encoded).is_err() {
                report.stopped_by = StopReason::Disconnected;
                break;
            }
            report.emitted += 1;

            report.fps = fps.tick();
            if report.frames % HEARTBEAT_FRAMES == 0 {
                tracing::info!(
                    frames = report.frames,
                    full_runs = report.full_runs,
                    extrapolated = report.extrapolated,
                    fps = report.fps,
                    elapsed_secs = clock.elapsed_secs(),
                    "Stream heartbeat"
                );
            }
        }

        tracing::info!(
            frames = report.frames,
            full_runs = report.full_runs,
            extrapolated = report.extrapolated,
            stopped_by = ?report.stopped_by,
            "Stream finished"
        );
        Ok(report)
    }
}
