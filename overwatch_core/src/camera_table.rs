//! Static mapping from camera id to the world position it watches.

use crate::config::ConfigError;
use crate::detection::{Position, WirePosition};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Camera id -> fixed world coordinate. Built at startup, read-only after.
///
/// Serialized as `{"0": {"x": .., "y": .., "z": ..}, ...}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<u32, WirePosition>", into = "BTreeMap<u32, WirePosition>")]
pub struct CameraPositionTable {
    cameras: BTreeMap<u32, Position>,
}

impl CameraPositionTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Layout of the drone patrol scene (four security cameras).
    pub fn drone_site() -> Self {
        Self::new()
            .with_camera(0, Position::new(-2.833347, 2.0, 16.74295))
            .with_camera(1, Position::new(-37.0, 4.0, 51.0))
            .with_camera(2, Position::new(36.0, 2.0, -35.0))
            .with_camera(3, Position::new(28.24, 4.0, -104.0))
    }

    /// Layout of the ground robot scene.
    pub fn ground_site() -> Self {
        Self::new()
            .with_camera(0, Position::new(-2.833347, 8.0, 44.74295))
            .with_camera(1, Position::new(-61.0, 10.0, 67.0))
            .with_camera(2, Position::new(52.0, 4.0, -35.0))
            .with_camera(3, Position::new(28.24, 4.0, -104.0))
    }

    /// Adds (or replaces) a camera.
    pub fn with_camera(mut self, id: u32, position: Position) -> Self {
        self.cameras.insert(id, position);
        self
    }

    /// Looks up the watched position of a camera.
    pub fn get(&self, id: u32) -> Option<Position> {
        self.cameras.get(&id).copied()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.cameras.contains_key(&id)
    }

    /// Known camera ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.cameras.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    /// Parses a table from its JSON form.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Loads a table from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json_str(&raw)
    }
}

impl From<BTreeMap<u32, WirePosition>> for CameraPositionTable {
    fn from(raw: BTreeMap<u32, WirePosition>) -> Self {
        Self {
            cameras: raw.into_iter().map(|(id, p)| (id, p.into())).collect(),
        }
    }
}

impl From<CameraPositionTable> for BTreeMap<u32, WirePosition> {
    fn from(table: CameraPositionTable) -> Self {
        table
            .cameras
            .into_iter()
            .map(|(id, p)| (id, p.into()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_drone_site_layout() {
        let table = CameraPositionTable::drone_site();

        assert_eq!(table.len(), 4);
        assert_eq!(table.ids().collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert_relative_eq!(table.get(1).unwrap(), Position::new(-37.0, 4.0, 51.0));
        assert!(table.get(4).is_none());
    }

    #[test]
    fn test_json_roundtrip_uses_xyz_objects() {
        let json = r#"{"0": {"x": 1.0, "y": 2.0, "z": 3.0}, "7": {"x": -4, "y": 0, "z": 9.5}}"#;
        let table = CameraPositionTable::from_json_str(json).unwrap();

        assert!(table.contains(7));
        assert_relative_eq!(table.get(7).unwrap(), Position::new(-4.0, 0.0, 9.5));

        let back = serde_json::to_value(&table).unwrap();
        assert_eq!(back["0"]["y"], 2.0);
    }

    #[test]
    fn test_malformed_table_is_rejected() {
        let err = CameraPositionTable::from_json_str(r#"{"0": {"x": 1.0}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
