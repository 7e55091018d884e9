use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Coordinate {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn horizontal(self) -> (i32, i32) {
        (self.x, self.z)
    }

    pub fn with_y(self, y: i32) -> Self {
        Self { y, ..self }
    }

    /// Squared Euclidean distance over all three axes.
    pub fn distance_sq(self, other: Coordinate) -> i64 {
        let dx = self.x as i64 - other.x as i64;
        let dy = self.y as i64 - other.y as i64;
        let dz = self.z as i64 - other.z as i64;
        dx * dx + dy * dy + dz * dz
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct StructurePoint {
    pub pos: Coordinate,
    pub tag: Option<String>,
}

impl StructurePoint {
    pub fn new(pos: Coordinate, tag: Option<String>) -> Self {
        Self { pos, tag }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeStatus {
    Planned,
    Generating,
    Completed,
    Failed,
}

impl EdgeStatus {
    /// Stable ordinal shipped in map snapshots.
    pub fn ordinal(self) -> u8 {
        match self {
            EdgeStatus::Planned => 0,
            EdgeStatus::Generating => 1,
            EdgeStatus::Completed => 2,
            EdgeStatus::Failed => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, EdgeStatus::Completed | EdgeStatus::Failed)
    }

    // GENERATING -> PLANNED is only taken by load-time recovery.
    pub fn can_transition_to(self, next: EdgeStatus) -> bool {
        matches!(
            (self, next),
            (EdgeStatus::Planned, EdgeStatus::Generating)
                | (EdgeStatus::Generating, EdgeStatus::Completed)
                | (EdgeStatus::Generating, EdgeStatus::Failed)
                | (EdgeStatus::Generating, EdgeStatus::Planned)
        )
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
pub enum TransitionError {
    #[error("illegal edge transition {from:?} -> {to:?}")]
    Illegal { from: EdgeStatus, to: EdgeStatus },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConnectionEdge {
    pub from: Coordinate,
    pub to: Coordinate,
    pub status: EdgeStatus,
}

impl ConnectionEdge {
    pub fn planned(from: Coordinate, to: Coordinate) -> Self {
        Self { from, to, status: EdgeStatus::Planned }
    }

    /// Unordered pair match.
    pub fn connects(&self, a: Coordinate, b: Coordinate) -> bool {
        (self.from == a && self.to == b) || (self.from == b && self.to == a)
    }

    pub fn transition(&self, next: EdgeStatus) -> Result<ConnectionEdge, TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError::Illegal { from: self.status, to: next });
        }
        Ok(ConnectionEdge { status: next, ..*self })
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoadType {
    Artificial,
    Natural,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoadSegmentPlacement {
    /// Centre of the corridor at this step.
    pub pos: Coordinate,
    /// One material per cross-section cell.
    pub materials: Vec<String>,
    pub cross_section: Vec<Coordinate>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoadRecord {
    pub from: Coordinate,
    pub to: Coordinate,
    pub width: u32,
    pub palette: Vec<String>,
    pub road_type: RoadType,
    pub segments: Vec<RoadSegmentPlacement>,
}

impl RoadRecord {
    pub fn first(&self) -> Option<Coordinate> {
        self.segments.first().map(|s| s.pos)
    }

    pub fn last(&self) -> Option<Coordinate> {
        self.segments.last().map(|s| s.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_between_far_apart_points() {
        // The x span does not fit in i32.
        let a = Coordinate::new(1_500_000_000, 0, 7);
        let b = Coordinate::new(-1_500_000_000, 0, 7);
        assert_eq!(a.distance_sq(b), 9_000_000_000_000_000_000);
        assert_eq!(b.distance_sq(a), 9_000_000_000_000_000_000);
        assert_eq!(Coordinate::new(3, 4, -12).distance_sq(Coordinate::new(0, 0, 0)), 169);
    }

    #[test]
    fn legal_transitions_follow_lifecycle() {
        let a = Coordinate::new(0, 64, 0);
        let b = Coordinate::new(10, 64, 0);
        let e = ConnectionEdge::planned(a, b);
        let e = e.transition(EdgeStatus::Generating).unwrap();
        assert_eq!(e.status, EdgeStatus::Generating);
        let done = e.transition(EdgeStatus::Completed).unwrap();
        assert!(done.status.is_terminal());
        assert_eq!(
            done.transition(EdgeStatus::Planned),
            Err(TransitionError::Illegal { from: EdgeStatus::Completed, to: EdgeStatus::Planned })
        );
        assert!(e.transition(EdgeStatus::Planned).is_ok());
    }

    #[test]
    fn planned_cannot_skip_generating() {
        let e = ConnectionEdge::planned(Coordinate::new(0, 0, 0), Coordinate::new(1, 0, 0));
        assert!(e.transition(EdgeStatus::Completed).is_err());
        assert!(e.transition(EdgeStatus::Failed).is_err());
        assert!(e.transition(EdgeStatus::Planned).is_err());
    }

    #[test]
    fn connects_is_unordered() {
        let a = Coordinate::new(0, 64, 0);
        let b = Coordinate::new(5, 70, -3);
        let e = ConnectionEdge::planned(a, b);
        assert!(e.connects(a, b));
        assert!(e.connects(b, a));
        assert!(!e.connects(a, a));
    }

    #[test]
    fn status_serializes_screaming() {
        let s = serde_json::to_string(&EdgeStatus::Generating).unwrap();
        assert_eq!(s, "\"GENERATING\"");
        assert_eq!(EdgeStatus::Failed.ordinal(), 3);
    }
}
