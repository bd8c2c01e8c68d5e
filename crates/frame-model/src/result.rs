//! Per-frame structured results.
//!
//! A [`ResultMap`] is folded together from each capability's partial output.
//! Inserts are checked against the keys the capability declared, so a
//! capability cannot silently write keys another stage does not expect.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::frame::{FrameContext, RunMode};
use crate::geometry::{Detection, Keypoint, Mask, Pose};

/// Semantic type of a result value, as declared in capability manifests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Detections,
    Masks,
    Keypoints,
    Poses,
    Caption,
    Json,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Detections => "detections",
            ValueKind::Masks => "masks",
            ValueKind::Keypoints => "keypoints",
            ValueKind::Poses => "poses",
            ValueKind::Caption => "caption",
            ValueKind::Json => "json",
        };
        f.write_str(name)
    }
}

/// A single capability-specific value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultValue {
    Detections(Vec<Detection>),
    Masks(Vec<Mask>),
    /// One keypoint list per detected instance.
    Keypoints(Vec<Vec<Keypoint>>),
    Poses(Vec<Pose>),
    Caption(String),
    Json(serde_json::Value),
}

impl ResultValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            ResultValue::Detections(_) => ValueKind::Detections,
            ResultValue::Masks(_) => ValueKind::Masks,
            ResultValue::Keypoints(_) => ValueKind::Keypoints,
            ResultValue::Poses(_) => ValueKind::Poses,
            ResultValue::Caption(_) => ValueKind::Caption,
            ResultValue::Json(_) => ValueKind::Json,
        }
    }
}

/// Errors raised by a checked merge into a [`ResultMap`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("key '{key}' is not declared")]
    UndeclaredKey { key: String },

    #[error("key '{key}' was already written for this frame")]
    DuplicateKey { key: String },

    #[error("key '{key}' declared as {expected} but got {actual}")]
    KindMismatch {
        key: String,
        expected: ValueKind,
        actual: ValueKind,
    },
}

impl SchemaError {
    /// The offending key.
    pub fn key(&self) -> &str {
        match self {
            SchemaError::UndeclaredKey { key }
            | SchemaError::DuplicateKey { key }
            | SchemaError::KindMismatch { key, .. } => key,
        }
    }
}

/// Something that declares an output key and its value kind.
pub trait KeyDeclaration {
    fn key(&self) -> &str;
    fn kind(&self) -> ValueKind;
}

impl KeyDeclaration for (&str, ValueKind) {
    fn key(&self) -> &str {
        self.0
    }

    fn kind(&self) -> ValueKind {
        self.1
    }
}

/// Structured output accumulated for one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultMap {
    entries: BTreeMap<String, ResultValue>,
}

impl ResultMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&ResultValue> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Unchecked insert, used by capabilities building their own partial map.
    pub fn insert(&mut self, key: impl Into<String>, value: ResultValue) -> Option<ResultValue> {
        self.entries.insert(key.into(), value)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResultValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Fold `partial` into this map, checking every key against `declared`.
    ///
    /// Either the whole partial map is merged or nothing is.
    pub fn merge_declared<D: KeyDeclaration>(
        &mut self,
        partial: ResultMap,
        declared: &[D],
    ) -> Result<(), SchemaError> {
        for (key, value) in &partial.entries {
            let decl = declared
                .iter()
                .find(|d| d.key() == key)
                .ok_or_else(|| SchemaError::UndeclaredKey { key: key.clone() })?;
            if decl.kind() != value.kind() {
                return Err(SchemaError::KindMismatch {
                    key: key.clone(),
                    expected: decl.kind(),
                    actual: value.kind(),
                });
            }
            if self.entries.contains_key(key) {
                return Err(SchemaError::DuplicateKey { key: key.clone() });
            }
        }
        self.entries.extend(partial.entries);
        Ok(())
    }
}

impl FromIterator<(String, ResultValue)> for ResultMap {
    fn from_iter<T: IntoIterator<Item = (String, ResultValue)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Serializable per-frame record delivered to live subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FramePayload {
    pub frame_index: u64,
    pub timestamp_secs: f64,
    pub scene_change_score: f32,
    pub mode: RunMode,
    pub data: ResultMap,
}

impl FramePayload {
    pub fn new(ctx: &FrameContext, mode: RunMode, data: ResultMap) -> Self {
        Self {
            frame_index: ctx.frame_index,
            timestamp_secs: ctx.timestamp_secs,
            scene_change_score: ctx.scene_change_score,
            mode,
            data,
        }
    }
}

/// Message sent to structured-data subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    Frame(FramePayload),
    /// The stream finished normally after `frames` processed frames.
    End { frames: u64 },
    /// The stream terminated abnormally.
    Error { message: String },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Frame(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BoundingBox;
    use proptest::prelude::*;

    fn caption(text: &str) -> ResultMap {
        let mut map = ResultMap::new();
        map.insert("caption", ResultValue::Caption(text.to_string()));
        map
    }

    #[test]
    fn test_merge_declared_accepts_declared_keys() {
        let mut map = ResultMap::new();
        map.merge_declared(caption("a dog"), &[("caption", ValueKind::Caption)])
            .unwrap();
        assert_eq!(
            map.get("caption"),
            Some(&ResultValue::Caption("a dog".to_string()))
        );
    }

    #[test]
    fn test_merge_rejects_undeclared_and_leaves_map_untouched() {
        let mut map = ResultMap::new();
        let mut partial = caption("x");
        partial.insert("boxes", ResultValue::Detections(Vec::new()));

        let err = map
            .merge_declared(partial, &[("caption", ValueKind::Caption)])
            .unwrap_err();
        assert_eq!(err.key(), "boxes");
        assert!(map.is_empty());
    }

    #[test]
    fn test_merge_rejects_kind_mismatch() {
        let mut map = ResultMap::new();
        let err = map
            .merge_declared(caption("x"), &[("caption", ValueKind::Poses)])
            .unwrap_err();
        assert!(matches!(err, SchemaError::KindMismatch { .. }));
    }

    #[test]
    fn test_merge_rejects_duplicate() {
        let decl = [("caption", ValueKind::Caption)];
        let mut map = ResultMap::new();
        map.merge_declared(caption("first"), &decl).unwrap();
        let err = map.merge_declared(caption("second"), &decl).unwrap_err();
        assert_eq!(
            err,
            SchemaError::DuplicateKey {
                key: "caption".to_string()
            }
        );
    }

    #[test]
    fn test_stream_event_json_shape() {
        let mut data = ResultMap::new();
        data.insert(
            "boxes",
            ResultValue::Detections(vec![Detection {
                track_id: Some(4),
                class_name: "car".to_string(),
                confidence: 0.8,
                bbox: BoundingBox::new(1.0, 2.0, 3.0, 4.0),
            }]),
        );
        let ctx = FrameContext::new(7, 0.1, 0.25);
        let event = StreamEvent::Frame(FramePayload::new(&ctx, RunMode::Full, data));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "frame");
        assert_eq!(json["frame_index"], 7);
        assert_eq!(json["mode"], "full");
        assert_eq!(json["data"]["boxes"][0]["track_id"], 4);

        let end = serde_json::to_value(StreamEvent::End { frames: 10 }).unwrap();
        assert_eq!(end["event"], "end");
        assert!(StreamEvent::End { frames: 10 }.is_terminal());
    }

    proptest! {
        #[test]
        fn prop_disjoint_merges_accumulate(keys in proptest::collection::btree_set("[a-z]{1,8}", 1..8)) {
            let decl: Vec<(&str, ValueKind)> =
                keys.iter().map(|k| (k.as_str(), ValueKind::Caption)).collect();
            let mut map = ResultMap::new();
            for key in &keys {
                let mut partial = ResultMap::new();
                partial.insert(key.clone(), ResultValue::Caption(key.clone()));
                map.merge_declared(partial, &decl).unwrap();
            }
            prop_assert_eq!(map.len(), keys.len());
        }
    }
}
