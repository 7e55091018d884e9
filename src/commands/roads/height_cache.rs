use anyhow::Result;
use dashmap::DashMap;

use super::models::Coordinate;
use super::terrain::TerrainOracle;

/// Memoized terrain samples for one world session, shared by every
/// pathfinding job. Entries are never invalidated while the session lives;
/// terrain under a planned road is assumed stable.
///
/// Concurrent misses on the same column may both reach the oracle; the last
/// insert wins, which is harmless because the sampled value is the same.
#[derive(Debug, Default)]
pub struct HeightCache {
    heights: DashMap<(i32, i32), i32>,
    stability: DashMap<(i32, i32), f64>,
}

impl HeightCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn height_at(&self, oracle: &dyn TerrainOracle, x: i32, z: i32) -> Result<i32> {
        if let Some(h) = self.heights.get(&(x, z)) {
            return Ok(*h);
        }
        let h = oracle.height_at(x, z)?;
        self.heights.insert((x, z), h);
        Ok(h)
    }

    /// Stability of the surface cell at (x, z), clamped to be non-negative.
    pub fn stability_at(&self, oracle: &dyn TerrainOracle, x: i32, z: i32) -> Result<f64> {
        if let Some(s) = self.stability.get(&(x, z)) {
            return Ok(*s);
        }
        let y = self.height_at(oracle, x, z)?;
        let s = oracle.stability_around(Coordinate::new(x, y, z))?.max(0.0);
        self.stability.insert((x, z), s);
        Ok(s)
    }

    pub fn len(&self) -> usize {
        self.heights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heights.is_empty()
    }

    pub fn clear(&self) {
        self.heights.clear();
        self.stability.clear();
    }
}
