//! Domain events produced by the file watcher
//!
//! A raw notify event is translated into at most a few `DomainEvent`s, each
//! naming one tracked file relative to the watched directory.

use serde::Serialize;

/// Parsed content of a data file: ordered `(x, y)` pairs.
///
/// Serializes as a bare JSON array of two-element arrays.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FileData {
    points: Vec<[f64; 2]>,
}

impl FileData {
    pub fn new(points: Vec<[f64; 2]>) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[[f64; 2]] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Kind of change observed for a tracked file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

/// A typed, parsed filesystem change
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    /// A new tracked file appeared. Content is empty if it vanished before it
    /// could be read.
    Created { name: String, data: FileData },
    /// A tracked file was written
    Modified { name: String, data: FileData },
    /// A tracked file was deleted or renamed away
    Removed { name: String },
}

impl DomainEvent {
    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::Created { .. } => ChangeKind::Created,
            Self::Modified { .. } => ChangeKind::Modified,
            Self::Removed { .. } => ChangeKind::Removed,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Created { name, .. } | Self::Modified { name, .. } | Self::Removed { name } => {
                name
            }
        }
    }

    /// Whether the event changes the set of known file names
    pub fn changes_listing(&self) -> bool {
        matches!(self, Self::Created { .. } | Self::Removed { .. })
    }
}
