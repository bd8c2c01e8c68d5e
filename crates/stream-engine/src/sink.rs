//! Frame encoding and the frame-stream sink.

use std::sync::{Arc, Mutex, PoisonError};

use image::codecs::jpeg::JpegEncoder;
use tokio::sync::mpsc;

use findr_common::FindrResult;
use findr_frame_model::Frame;

/// One encoded frame ready for transport.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedFrame {
    pub frame_index: u64,
    pub bytes: Vec<u8>,
}

/// The consumer of the frame stream has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnected;

/// Ordered consumer of encoded frames.
pub trait FrameSink: Send {
    /// Hand over one frame, blocking while the consumer is behind.
    fn emit(&mut self, frame: EncodedFrame) -> Result<(), Disconnected>;
}

/// Bounded channel to an async consumer. Must be driven from a blocking
/// thread, never from inside the async runtime.
impl FrameSink for mpsc::Sender<EncodedFrame> {
    fn emit(&mut self, frame: EncodedFrame) -> Result<(), Disconnected> {
        self.blocking_send(frame).map_err(|_| Disconnected)
    }
}

/// Collects frames in memory.
#[derive(Debug, Clone, Default)]
pub struct VecSink {
    frames: Arc<Mutex<Vec<EncodedFrame>>>,
    /// Report a disconnect once this many frames have been accepted.
    limit: Option<usize>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose consumer disconnects after `limit` frames.
    pub fn disconnecting_after(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn frames(&self) -> Vec<EncodedFrame> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl FrameSink for VecSink {
    fn emit(&mut self, frame: EncodedFrame) -> Result<(), Disconnected> {
        let mut frames = self.frames.lock().unwrap_or_else(PoisonError::into_inner);
        if self.limit.is_some_and(|limit| frames.len() >= limit) {
            return Err(Disconnected);
        }
        frames.push(frame);
        Ok(())
    }
}

/// Encodes clean frames as baseline JPEG.
#[derive(Debug, Clone, Copy)]
pub struct JpegFrameEncoder {
    quality: u8,
}

impl JpegFrameEncoder {
    /// `quality` is clamped to `1..=100`.
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn encode(&self, frame: &Frame) -> FindrResult<Vec<u8>> {
        let mut bytes = Vec::with_capacity(frame.as_raw().len() / 8);
        JpegEncoder::new_with_quality(&mut bytes, self.quality).encode_image(frame.image())?;
        Ok(bytes)
    }
}

impl Default for JpegFrameEncoder {
    fn default() -> Self {
        Self::new(70)
    }
}
