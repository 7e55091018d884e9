use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use super::models::{Coordinate, RoadRecord};
use super::state_store::ConnectionStateStore;

/// Horizontal filter, inclusive on both ends.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BoundingBox {
    pub min_x: i32,
    pub max_x: i32,
    pub min_z: i32,
    pub max_z: i32,
}

impl BoundingBox {
    pub const EVERYTHING: BoundingBox =
        BoundingBox { min_x: i32::MIN, max_x: i32::MAX, min_z: i32::MIN, max_z: i32::MAX };

    pub fn contains(&self, c: Coordinate) -> bool {
        (self.min_x..=self.max_x).contains(&c.x) && (self.min_z..=self.max_z).contains(&c.z)
    }

    /// Parses `x_min:x_max,z_min:z_max`.
    pub fn parse(s: &str) -> Result<Self> {
        let bad = || anyhow!("invalid bbox '{}', expected x_min:x_max,z_min:z_max", s);
        let (xs, zs) = s.split_once(',').ok_or_else(bad)?;
        let (x0, x1) = xs.split_once(':').ok_or_else(bad)?;
        let (z0, z1) = zs.split_once(':').ok_or_else(bad)?;
        let num = |v: &str| v.trim().parse::<i32>().map_err(|_| bad());
        let (min_x, max_x, min_z, max_z) = (num(x0)?, num(x1)?, num(z0)?, num(z1)?);
        if min_x > max_x || min_z > max_z {
            return Err(bad());
        }
        Ok(Self { min_x, max_x, min_z, max_z })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotStructure {
    pub pos: Coordinate,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEdge {
    pub from: Coordinate,
    pub to: Coordinate,
    /// PLANNED=0, GENERATING=1, COMPLETED=2, FAILED=3.
    pub status: u8,
}

/// Read-only view of one world for map viewers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub structures: Vec<SnapshotStructure>,
    pub edges: Vec<SnapshotEdge>,
    pub roads: Vec<Vec<Coordinate>>,
}

impl Snapshot {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

pub fn build_snapshot(store: &ConnectionStateStore, bbox: &BoundingBox) -> Result<Snapshot> {
    let structures = store
        .structures()?
        .into_iter()
        .filter(|s| bbox.contains(s.pos))
        .map(|s| SnapshotStructure { pos: s.pos, name: s.tag.unwrap_or_default() })
        .collect();

    // An edge is kept when either endpoint is inside the box.
    let edges = store
        .edges()?
        .into_iter()
        .filter(|e| bbox.contains(e.from) || bbox.contains(e.to))
        .map(|e| SnapshotEdge { from: e.from, to: e.to, status: e.status.ordinal() })
        .collect();

    let roads = store
        .roads()?
        .iter()
        .filter(|r| r.segments.iter().any(|s| bbox.contains(s.pos)))
        .map(road_polyline)
        .collect();

    Ok(Snapshot { structures, edges, roads })
}

/// Centre line of a road reduced to its direction changes.
pub fn road_polyline(road: &RoadRecord) -> Vec<Coordinate> {
    let centre: Vec<Coordinate> = road.segments.iter().map(|s| s.pos).collect();
    reduce_to_breakpoints(&centre)
}

fn reduce_to_breakpoints(path: &[Coordinate]) -> Vec<Coordinate> {
    match path.len() {
        0 => Vec::new(),
        1 => path.to_vec(),
        _ => {
            let mut reduced: Vec<Coordinate> = Vec::with_capacity(path.len());
            reduced.push(path[0]);
            for window in path.windows(3) {
                let (prev, cur, next) = (window[0], window[1], window[2]);
                if movement_dir(prev, cur) != movement_dir(cur, next) && reduced.last().copied() != Some(cur) {
                    reduced.push(cur);
                }
            }
            if let Some(&last) = path.last() {
                if reduced.last().copied() != Some(last) {
                    reduced.push(last);
                }
            }
            reduced
        }
    }
}

fn movement_dir(from: Coordinate, to: Coordinate) -> Option<(i32, i32, i32)> {
    let d = ((to.x - from.x).signum(), (to.y - from.y).signum(), (to.z - from.z).signum());
    if d == (0, 0, 0) { None } else { Some(d) }
}
