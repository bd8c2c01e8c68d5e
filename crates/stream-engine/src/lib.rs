//! Findr Stream Engine
//!
//! Runs one analysis session at a time end to end:
//! - **Admission:** a single-slot gate so at most one session is active
//! - **Broadcaster:** best-effort fan-out of per-frame results to subscribers
//! - **Sources:** frame acquisition from image sequences or synthetic input
//! - **Engine:** source -> scheduler -> pipeline -> (broadcaster, frame sink)
//! - **SessionManager:** the context object the transport layer talks to
//!
//! The engine loop is blocking and runs on a dedicated thread; a stop
//! signal is checked between frames.

pub mod admission;
pub mod broadcast;
pub mod engine;
pub mod session;
pub mod sink;
pub mod source;

pub use admission::{SessionAdmission, SessionId};
pub use broadcast::{Broadcaster, SubscriberId};
pub use engine::{Engine, EngineReport, StopReason, StopSignal};
pub use session::{
    EngineSettings, InitStatus, SessionManager, SessionRequest, SessionSnapshot, StreamHandle,
};
pub use sink::{Disconnected, EncodedFrame, FrameSink, JpegFrameEncoder, VecSink};
pub use source::{DefaultSourceOpener, FrameSource, SourceOpener};
