//! Findr Frame Model
//!
//! Defines the data contracts shared by every stage of a streaming session:
//! - **Frame:** a decoded RGB frame, cheap to clone
//! - **FrameContext:** per-frame index, timestamp, and scene-change score
//! - **Geometry:** boxes, detections, keypoints, poses, masks
//! - **ResultMap:** the keyed structured output accumulated for one frame
//! - **StreamEvent:** what live subscribers receive
//!
//! Box and keypoint coordinates are in source-frame pixels.

pub mod frame;
pub mod geometry;
pub mod result;

pub use frame::*;
pub use geometry::*;
pub use result::*;
