//! Detection records and the inbound wire codec.
//!
//! Sensors publish one JSON record per datagram. Two producers exist today:
//!
//! - **Static cameras** send `{"camera_id": 1, "confidence": 0.75, ...}`; the
//!   world position comes from the [`CameraPositionTable`](crate::CameraPositionTable).
//! - **Drones** send their own sightings with the position inline:
//!   `{"agent_id": 0, "type": "human", "confidence": 0.9, "position": {"x":1,"y":2,"z":3}}`.
//!
//! Some bridges prefix every datagram with a 4-byte little-endian `i32`
//! channel id (see [`Framing::IdPrefixed`]) so that channels sharing a host
//! cannot cross-talk.
//!
//! Decoding never panics: anything that does not form a complete, valid
//! record becomes a [`DecodeError`] and the datagram is dropped.

use nalgebra::Vector3;
use overwatch_env::Datagram;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;

/// A 3D world coordinate (simulator units).
pub type Position = Vector3<f64>;

// ============================================================================
// SOURCE / CLASS
// ============================================================================

/// The kind of producer a detection came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Fixed security camera; position resolved through the camera table
    CameraStatic,

    /// A drone reporting what its own onboard camera sees
    DroneSelf,
}

impl SourceKind {
    /// Returns the channel name used in logs and configuration.
    pub fn name(&self) -> &'static str {
        match self {
            SourceKind::CameraStatic => "camera_static",
            SourceKind::DroneSelf => "drone_self",
        }
    }

    /// True if events from this source carry their own position.
    pub fn carries_position(&self) -> bool {
        matches!(self, SourceKind::DroneSelf)
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What was detected. Only the human/non-human split drives arbitration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionClass {
    Human,
    Other,
}

impl DetectionClass {
    /// Maps a detector label to a class. `"human"` and `"person"` (the COCO
    /// label) are humans; every other label is `Other`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "human" | "person" => DetectionClass::Human,
            _ => DetectionClass::Other,
        }
    }

    pub fn is_human(&self) -> bool {
        matches!(self, DetectionClass::Human)
    }
}

// ============================================================================
// DETECTION EVENT
// ============================================================================

/// One validated sensor observation.
///
/// Fields are private: the only ways to obtain an event are
/// [`DetectionEvent::new`] and [`DetectionDecoder::decode`], both of which
/// enforce the confidence range and per-source position rules.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionEvent {
    source_kind: SourceKind,
    source_id: u32,
    detection_class: DetectionClass,
    confidence: f64,
    position: Option<Position>,
    timestamp: Duration,
}

impl DetectionEvent {
    /// Builds an event, validating it the same way the decoder does.
    ///
    /// Camera events never keep a position (they are resolved through the
    /// camera table); mobile events must carry a finite one.
    pub fn new(
        source_kind: SourceKind,
        source_id: u32,
        detection_class: DetectionClass,
        confidence: f64,
        position: Option<Position>,
        timestamp: Duration,
    ) -> Result<Self, DecodeError> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(DecodeError::ConfidenceOutOfRange(confidence));
        }

        let position = if source_kind.carries_position() {
            let pos = position.ok_or(DecodeError::MissingField("position"))?;
            if !pos.iter().all(|c| c.is_finite()) {
                return Err(DecodeError::InvalidPosition("non-finite coordinate".into()));
            }
            Some(pos)
        } else {
            None
        };

        Ok(Self {
            source_kind,
            source_id,
            detection_class,
            confidence,
            position,
            timestamp,
        })
    }

    /// Shorthand for a camera event (tests and simulation).
    pub fn camera(
        camera_id: u32,
        confidence: f64,
        timestamp: Duration,
    ) -> Result<Self, DecodeError> {
        Self::new(
            SourceKind::CameraStatic,
            camera_id,
            DetectionClass::Other,
            confidence,
            None,
            timestamp,
        )
    }

    /// Shorthand for a drone self-detection (tests and simulation).
    pub fn drone(
        agent_id: u32,
        class: DetectionClass,
        confidence: f64,
        position: Position,
        timestamp: Duration,
    ) -> Result<Self, DecodeError> {
        Self::new(
            SourceKind::DroneSelf,
            agent_id,
            class,
            confidence,
            Some(position),
            timestamp,
        )
    }

    pub fn source_kind(&self) -> SourceKind {
        self.source_kind
    }

    pub fn source_id(&self) -> u32 {
        self.source_id
    }

    pub fn detection_class(&self) -> DetectionClass {
        self.detection_class
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Inline position; always `None` for camera events.
    pub fn position(&self) -> Option<Position> {
        self.position
    }

    /// Monotonic receipt time on the context clock.
    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }
}

// ============================================================================
// WIRE FORMAT
// ============================================================================

/// `{x, y, z}` as it appears on the wire and in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WirePosition {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl From<WirePosition> for Position {
    fn from(p: WirePosition) -> Self {
        Position::new(p.x, p.y, p.z)
    }
}

impl From<Position> for WirePosition {
    fn from(p: Position) -> Self {
        Self {
            x: p.x,
            y: p.y,
            z: p.z,
        }
    }
}

/// Raw record before validation. Field aliases cover the names the camera
/// and drone bridges actually emit.
#[derive(Debug, Deserialize)]
struct WireDetection {
    #[serde(alias = "camera_id", alias = "agent_id")]
    source_id: u32,

    #[serde(default)]
    confidence: Option<f64>,

    #[serde(default, alias = "type")]
    detection_class: Option<String>,

    /// Kept untyped: camera bridges send a normalized 2D image position here
    /// that is not a world coordinate.
    #[serde(default)]
    position: Option<serde_json::Value>,
}

/// How a datagram's bytes are laid out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Framing {
    /// The whole datagram is a JSON record
    #[default]
    Json,

    /// A 4-byte little-endian `i32` channel id, then the JSON record
    IdPrefixed { expected_id: i32 },
}

impl Framing {
    pub const PREFIX_SIZE: usize = 4;

    /// Strips and checks the framing, returning the JSON body.
    pub fn strip<'a>(&self, data: &'a [u8]) -> Result<&'a [u8], DecodeError> {
        match *self {
            Framing::Json => Ok(data),
            Framing::IdPrefixed { expected_id } => {
                if data.len() < Self::PREFIX_SIZE {
                    return Err(DecodeError::TooShort {
                        len: data.len(),
                        needed: Self::PREFIX_SIZE,
                    });
                }
                let found = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
                if found != expected_id {
                    return Err(DecodeError::ChannelMismatch {
                        expected: expected_id,
                        found,
                    });
                }
                Ok(&data[Self::PREFIX_SIZE..])
            }
        }
    }
}

/// Reasons a datagram was rejected (the `MalformedInput` family).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DecodeError {
    #[error("datagram too short: {len} bytes, need at least {needed}")]
    TooShort { len: usize, needed: usize },

    #[error("channel id mismatch: expected {expected}, found {found}")]
    ChannelMismatch { expected: i32, found: i32 },

    #[error("source {0} is not accepted on this channel")]
    UnexpectedSource(u32),

    #[error("invalid JSON record: {0}")]
    Json(String),

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("confidence {0} outside [0, 1]")]
    ConfidenceOutOfRange(f64),

    #[error("invalid position: {0}")]
    InvalidPosition(String),
}

/// Turns datagrams from one channel into [`DetectionEvent`]s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionDecoder {
    /// Producer kind every record on this channel is attributed to
    pub kind: SourceKind,

    /// Datagram layout
    #[serde(default)]
    pub framing: Framing,

    /// If set, records declaring any other source id are rejected
    #[serde(default)]
    pub accepted_sources: Option<BTreeSet<u32>>,

    /// Confidence assumed when a record omits it (ground-robot bridges never
    /// send one). `None` makes the field mandatory.
    #[serde(default)]
    pub assumed_confidence: Option<f64>,
}

impl DetectionDecoder {
    /// Creates a strict JSON decoder for the given source kind.
    pub fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            framing: Framing::Json,
            accepted_sources: None,
            assumed_confidence: None,
        }
    }

    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    pub fn with_accepted_sources(mut self, ids: impl IntoIterator<Item = u32>) -> Self {
        self.accepted_sources = Some(ids.into_iter().collect());
        self
    }

    pub fn with_assumed_confidence(mut self, confidence: f64) -> Self {
        self.assumed_confidence = Some(confidence);
        self
    }

    /// Decodes one datagram, stamping it with the datagram's receipt time.
    pub fn decode(&self, datagram: &Datagram) -> Result<DetectionEvent, DecodeError> {
        self.decode_bytes(&datagram.payload, datagram.received_at)
    }

    /// Decodes raw bytes received at `timestamp`.
    pub fn decode_bytes(&self, data: &[u8], timestamp: Duration) -> Result<DetectionEvent, DecodeError> {
        let body = self.framing.strip(data)?;
        let wire: WireDetection =
            serde_json::from_slice(body).map_err(|e| DecodeError::Json(e.to_string()))?;

        if let Some(accepted) = &self.accepted_sources {
            if !accepted.contains(&wire.source_id) {
                return Err(DecodeError::UnexpectedSource(wire.source_id));
            }
        }

        let confidence = wire
            .confidence
            .or(self.assumed_confidence)
            .ok_or(DecodeError::MissingField("confidence"))?;

        let detection_class = match (&wire.detection_class, self.kind) {
            (Some(label), _) => DetectionClass::from_label(label),
            // Camera bridges do not label their detections.
            (None, SourceKind::CameraStatic) => DetectionClass::Other,
            (None, _) => return Err(DecodeError::MissingField("type")),
        };

        let position = if self.kind.carries_position() {
            let raw = wire.position.ok_or(DecodeError::MissingField("position"))?;
            let parsed: WirePosition = serde_json::from_value(raw)
                .map_err(|e| DecodeError::InvalidPosition(e.to_string()))?;
            Some(Position::from(parsed))
        } else {
            None
        };

        DetectionEvent::new(
            self.kind,
            wire.source_id,
            detection_class,
            confidence,
            position,
            timestamp,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: u64) -> Duration {
        Duration::from_secs(secs)
    }

    #[test]
    fn test_decode_camera_record() {
        let decoder = DetectionDecoder::new(SourceKind::CameraStatic);
        let data = br#"{"camera_id": 1, "track_id": 7, "confidence": 0.75,
                        "position": {"x": 0.4, "y": 0.6}}"#;

        let event = decoder.decode_bytes(data, at(3)).unwrap();

        assert_eq!(event.source_kind(), SourceKind::CameraStatic);
        assert_eq!(event.source_id(), 1);
        assert_eq!(event.detection_class(), DetectionClass::Other);
        assert!((event.confidence() - 0.75).abs() < 1e-9);
        assert_eq!(event.position(), None);
        assert_eq!(event.timestamp(), at(3));
    }

    #[test]
    fn test_decode_drone_record() {
        let decoder = DetectionDecoder::new(SourceKind::DroneSelf);
        let data = br#"{"type": "human", "agent_id": 2, "confidence": 0.9,
                        "position": {"x": 1.0, "y": 2.0, "z": 3.0}, "timestamp": 17.5}"#;

        let event = decoder.decode_bytes(data, at(0)).unwrap();

        assert_eq!(event.source_id(), 2);
        assert!(event.detection_class().is_human());
        assert_eq!(event.position(), Some(Position::new(1.0, 2.0, 3.0)));
    }

    #[test]
    fn test_drone_record_requires_position_and_type() {
        let decoder = DetectionDecoder::new(SourceKind::DroneSelf);

        let no_position = br#"{"agent_id": 0, "type": "human", "confidence": 0.9}"#;
        assert_eq!(
            decoder.decode_bytes(no_position, at(0)),
            Err(DecodeError::MissingField("position"))
        );

        let flat_position = br#"{"agent_id": 0, "type": "human", "confidence": 0.9,
                                 "position": {"x": 0.5, "y": 0.5}}"#;
        assert!(matches!(
            decoder.decode_bytes(flat_position, at(0)),
            Err(DecodeError::InvalidPosition(_))
        ));

        let no_type = br#"{"agent_id": 0, "confidence": 0.9,
                           "position": {"x": 1, "y": 2, "z": 3}}"#;
        assert_eq!(
            decoder.decode_bytes(no_type, at(0)),
            Err(DecodeError::MissingField("type"))
        );
    }

    #[test]
    fn test_rejects_garbage_and_bad_confidence() {
        let decoder = DetectionDecoder::new(SourceKind::CameraStatic);

        assert!(matches!(decoder.decode_bytes(b"not json", at(0)), Err(DecodeError::Json(_))));
        assert!(matches!(decoder.decode_bytes(b"", at(0)), Err(DecodeError::Json(_))));
        assert!(matches!(
            decoder.decode_bytes(br#"{"camera_id": -1, "confidence": 0.7}"#, at(0)),
            Err(DecodeError::Json(_))
        ));
        assert_eq!(
            decoder.decode_bytes(br#"{"camera_id": 1}"#, at(0)),
            Err(DecodeError::MissingField("confidence"))
        );
        assert_eq!(
            decoder.decode_bytes(br#"{"camera_id": 1, "confidence": 1.5}"#, at(0)),
            Err(DecodeError::ConfidenceOutOfRange(1.5))
        );
    }

    #[test]
    fn test_assumed_confidence_fills_missing_field() {
        let decoder = DetectionDecoder::new(SourceKind::CameraStatic).with_assumed_confidence(1.0);

        let event = decoder.decode_bytes(br#"{"camera_id": 3}"#, at(0)).unwrap();
        assert_eq!(event.confidence(), 1.0);
    }

    #[test]
    fn test_accepted_sources_filter() {
        let decoder = DetectionDecoder::new(SourceKind::CameraStatic).with_accepted_sources([0, 1, 2, 3]);

        assert!(decoder
            .decode_bytes(br#"{"camera_id": 2, "confidence": 0.7}"#, at(0))
            .is_ok());
        assert_eq!(
            decoder.decode_bytes(br#"{"camera_id": 9, "confidence": 0.7}"#, at(0)),
            Err(DecodeError::UnexpectedSource(9))
        );
    }

    #[test]
    fn test_id_prefixed_framing() {
        let decoder = DetectionDecoder::new(SourceKind::CameraStatic)
            .with_framing(Framing::IdPrefixed { expected_id: 2 });

        let mut data = 2i32.to_le_bytes().to_vec();
        data.extend_from_slice(br#"{"camera_id": 2, "confidence": 0.8}"#);
        assert_eq!(decoder.decode_bytes(&data, at(0)).unwrap().source_id(), 2);

        let mut crossed = 3i32.to_le_bytes().to_vec();
        crossed.extend_from_slice(br#"{"camera_id": 2, "confidence": 0.8}"#);
        assert_eq!(
            decoder.decode_bytes(&crossed, at(0)),
            Err(DecodeError::ChannelMismatch { expected: 2, found: 3 })
        );

        assert_eq!(
            decoder.decode_bytes(&[1, 0], at(0)),
            Err(DecodeError::TooShort { len: 2, needed: 4 })
        );
    }

    #[test]
    fn test_class_labels() {
        assert_eq!(DetectionClass::from_label("human"), DetectionClass::Human);
        assert_eq!(DetectionClass::from_label(" Person "), DetectionClass::Human);
        assert_eq!(DetectionClass::from_label("car"), DetectionClass::Other);
    }

    #[test]
    fn test_camera_event_drops_position() {
        let event = DetectionEvent::new(
            SourceKind::CameraStatic,
            0,
            DetectionClass::Other,
            0.7,
            Some(Position::new(1.0, 1.0, 1.0)),
            at(0),
        )
        .unwrap();
        assert_eq!(event.position(), None);
    }
}
