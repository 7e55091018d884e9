use anyhow::Result;
use std::collections::HashSet;

use super::cancel::CancelToken;
use super::models::{Coordinate, RoadSegmentPlacement};
use super::terrain::TerrainOracle;

#[derive(Clone, Debug, Default)]
pub struct RealizeStats {
    pub placed: usize,
    pub rejected: usize,
}

/// Writes planned placements into the world. Cross-sections overlap on
/// turns, so each cell is written at most once. The oracle is asked before
/// every write whether the cell may carry road surface.
pub fn realize_road(
    oracle: &dyn TerrainOracle,
    placements: &[RoadSegmentPlacement],
    cancel: &CancelToken,
    clear_height: u32,
) -> Result<RealizeStats> {
    let mut stats = RealizeStats::default();
    let mut seen: HashSet<Coordinate> = HashSet::new();

    for seg in placements {
        for (&cell, material) in seg.cross_section.iter().zip(seg.materials.iter()) {
            if !seen.insert(cell) {
                continue;
            }
            cancel.check()?;
            if !oracle.is_sturdy_support(cell)? {
                stats.rejected += 1;
                continue;
            }
            oracle.place(cell, material)?;
            if clear_height > 0 {
                oracle.clear_above(cell, clear_height)?;
            }
            stats.placed += 1;
        }
    }
    Ok(stats)
}
