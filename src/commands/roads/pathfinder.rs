// Terrain-aware A* over horizontal (x, z) cells.
//
// The y of every cell comes from the shared HeightCache instead of being a
// search dimension. Step cost is horizontal distance plus non-negative
// penalties for climbing and for unstable ground sampled across the corridor,
// so the octile heuristic stays admissible.
//
// Each search is bounded by `max_steps` node expansions. Hitting the bound,
// or draining the open set, yields an empty plan rather than an error; only
// oracle faults and cancellation are errors.

use anyhow::Result;
use log::debug;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use super::cancel::CancelToken;
use super::height_cache::HeightCache;
use super::models::{Coordinate, RoadSegmentPlacement};
use super::neighbor_policy::{corridor_offsets, lateral_offsets, octile, MovementPolicy, Offset};
use super::terrain::TerrainOracle;

pub const DEFAULT_MATERIAL: &str = "minecraft:gravel";

type Cell = (i32, i32);

#[derive(Copy, Clone, Debug)]
pub struct CostWeights {
    /// Added per block of height difference between adjacent cells.
    pub height: f64,
    /// Multiplies the summed corridor instability of the entered cell.
    pub stability: f64,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self { height: 2.0, stability: 1.0 }
    }
}

#[derive(Clone, Debug, Default)]
pub struct PathSettings {
    pub policy: MovementPolicy,
    pub weights: CostWeights,
    /// Steps on each side averaged into the road's vertical profile.
    pub averaging_radius: i32,
}

#[derive(Clone, Debug, Default)]
pub struct PathPlan {
    pub placements: Vec<RoadSegmentPlacement>,
    pub expanded: usize,
}

struct OpenEntry {
    cell: Cell,
    f: f64,
    g: f64,
}

impl PartialEq for OpenEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OpenEntry {}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on f; on ties prefer the deeper node, then the smaller cell.
        other
            .f
            .total_cmp(&self.f)
            .then_with(|| self.g.total_cmp(&other.g))
            .then_with(|| other.cell.cmp(&self.cell))
    }
}

pub struct Pathfinder<'a> {
    oracle: &'a dyn TerrainOracle,
    cache: &'a HeightCache,
    cancel: &'a CancelToken,
    settings: &'a PathSettings,
    palette: &'a [String],
}

impl<'a> Pathfinder<'a> {
    pub fn new(
        oracle: &'a dyn TerrainOracle,
        cache: &'a HeightCache,
        cancel: &'a CancelToken,
        settings: &'a PathSettings,
    ) -> Self {
        Self { oracle, cache, cancel, settings, palette: &[] }
    }

    pub fn with_palette(mut self, palette: &'a [String]) -> Self {
        self.palette = palette;
        self
    }

    /// Placements from `start` to `end` inclusive, or empty when `end` is
    /// not reached within `max_steps` expansions.
    pub fn find_path(
        &self,
        start: Coordinate,
        end: Coordinate,
        width: u32,
        max_steps: usize,
    ) -> Result<Vec<RoadSegmentPlacement>> {
        Ok(self.plan(start, end, width, max_steps)?.placements)
    }

    pub fn plan(&self, start: Coordinate, end: Coordinate, width: u32, max_steps: usize) -> Result<PathPlan> {
        let width = width.max(1);
        let start_cell = start.horizontal();
        let goal = end.horizontal();
        let offsets = self.settings.policy.neighbor_offsets();

        let mut open = BinaryHeap::new();
        let mut g_score: HashMap<Cell, f64> = HashMap::new();
        let mut came_from: HashMap<Cell, Cell> = HashMap::new();
        let mut closed: HashSet<Cell> = HashSet::new();
        let mut expanded = 0usize;

        g_score.insert(start_cell, 0.0);
        open.push(OpenEntry { cell: start_cell, f: octile(start_cell, goal), g: 0.0 });

        while let Some(OpenEntry { cell, g, .. }) = open.pop() {
            if closed.contains(&cell) {
                continue;
            }
            if expanded >= max_steps {
                debug!("pathfinder: budget of {} expansions exhausted {} -> {}", max_steps, start, end);
                return Ok(PathPlan { placements: Vec::new(), expanded });
            }
            self.cancel.check()?;
            expanded += 1;

            if cell == goal {
                let cells = reconstruct(&came_from, start_cell, goal);
                let placements = self.build_placements(&cells, width)?;
                return Ok(PathPlan { placements, expanded });
            }
            closed.insert(cell);

            let h_cur = self.cache.height_at(self.oracle, cell.0, cell.1)?;
            for &Offset(dx, dz) in offsets {
                let next = (cell.0 + dx, cell.1 + dz);
                if closed.contains(&next) {
                    continue;
                }
                let h_next = self.cache.height_at(self.oracle, next.0, next.1)?;
                let climb = (h_next - h_cur).abs();
                if climb > self.settings.policy.max_height_step {
                    continue;
                }
                let diagonal = dx != 0 && dz != 0;
                if diagonal && !self.settings.policy.allow_corner_cut && self.cuts_corner(cell, h_cur, dx, dz)? {
                    continue;
                }
                let step = if dx == 0 || dz == 0 { 1.0 } else { std::f64::consts::SQRT_2 };
                let instability = self.corridor_instability(next, Offset(dx, dz), width)?;
                let w = &self.settings.weights;
                let cost = step + w.height.max(0.0) * climb as f64 + w.stability.max(0.0) * instability;
                let tentative = g + cost;
                if tentative < g_score.get(&next).copied().unwrap_or(f64::INFINITY) {
                    g_score.insert(next, tentative);
                    came_from.insert(next, cell);
                    open.push(OpenEntry { cell: next, f: tentative + octile(next, goal), g: tentative });
                }
            }
        }

        debug!("pathfinder: open set drained after {} expansions {} -> {}", expanded, start, end);
        Ok(PathPlan { placements: Vec::new(), expanded })
    }

    // A diagonal step squeezes between (x+dx, z) and (x, z+dz); both must be
    // enterable from the current cell.
    fn cuts_corner(&self, cell: Cell, h_cur: i32, dx: i32, dz: i32) -> Result<bool> {
        let max = self.settings.policy.max_height_step;
        for (x, z) in [(cell.0 + dx, cell.1), (cell.0, cell.1 + dz)] {
            if (self.cache.height_at(self.oracle, x, z)? - h_cur).abs() > max {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn corridor_instability(&self, cell: Cell, dir: Offset, width: u32) -> Result<f64> {
        let mut total = 0.0;
        for Offset(ox, oz) in corridor_offsets(dir, width) {
            total += self.cache.stability_at(self.oracle, cell.0 + ox, cell.1 + oz)?;
        }
        Ok(total)
    }

    fn build_placements(&self, cells: &[Cell], width: u32) -> Result<Vec<RoadSegmentPlacement>> {
        let mut heights = Vec::with_capacity(cells.len());
        for &(x, z) in cells {
            heights.push(self.cache.height_at(self.oracle, x, z)?);
        }
        let profile = smooth_profile(&heights, self.settings.averaging_radius);

        let mut out = Vec::with_capacity(cells.len());
        for (i, &(x, z)) in cells.iter().enumerate() {
            // Footprint of the step into this cell; the first cell only has
            // an outgoing direction.
            let offsets = if i > 0 {
                corridor_offsets(Offset(x - cells[i - 1].0, z - cells[i - 1].1), width)
            } else if cells.len() > 1 {
                lateral_offsets(Offset(cells[1].0 - x, cells[1].1 - z), width)
            } else {
                lateral_offsets(Offset(1, 0), width)
            };
            let y = profile[i];
            let cross_section: Vec<Coordinate> = offsets
                .into_iter()
                .map(|Offset(ox, oz)| Coordinate::new(x + ox, y, z + oz))
                .collect();
            let materials = cross_section.iter().map(|&c| material_for(self.palette, c)).collect();
            out.push(RoadSegmentPlacement { pos: Coordinate::new(x, y, z), materials, cross_section });
        }
        Ok(out)
    }
}

fn reconstruct(came_from: &HashMap<Cell, Cell>, start: Cell, goal: Cell) -> Vec<Cell> {
    let mut path = vec![goal];
    let mut cur = goal;
    while cur != start {
        match came_from.get(&cur) {
            Some(&p) => {
                cur = p;
                path.push(cur);
            }
            None => break,
        }
    }
    path.reverse();
    path
}

/// Moving average of the centre heights over `radius` steps each side.
pub fn smooth_profile(heights: &[i32], radius: i32) -> Vec<i32> {
    if radius <= 0 || heights.len() < 3 {
        return heights.to_vec();
    }
    let r = radius as usize;
    (0..heights.len())
        .map(|i| {
            let lo = i.saturating_sub(r);
            let hi = (i + r).min(heights.len() - 1);
            let window = &heights[lo..=hi];
            let sum: i64 = window.iter().map(|&h| h as i64).sum();
            (sum as f64 / window.len() as f64).round() as i32
        })
        .collect()
}

fn material_for(palette: &[String], c: Coordinate) -> String {
    if palette.is_empty() {
        return DEFAULT_MATERIAL.to_string();
    }
    let mix = (c.x as i64).wrapping_mul(73_856_093) ^ (c.z as i64).wrapping_mul(19_349_663);
    palette[mix.rem_euclid(palette.len() as i64) as usize].clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::roads::cancel::Canceled;
    use crate::commands::roads::terrain::SyntheticTerrain;
    use std::collections::VecDeque;

    fn palette() -> Vec<String> {
        vec!["stone_bricks".to_string(), "cobblestone".to_string()]
    }

    #[test]
    fn flat_terrain_straight_road() -> Result<()> {
        let terrain = SyntheticTerrain::flat(64);
        let cache = HeightCache::new();
        let cancel = CancelToken::new();
        let settings = PathSettings::default();
        let pal = palette();
        let pf = Pathfinder::new(&terrain, &cache, &cancel, &settings).with_palette(&pal);

        let plan = pf.plan(Coordinate::new(0, 64, 0), Coordinate::new(100, 64, 0), 3, 5000)?;
        let segs = &plan.placements;
        assert_eq!(segs.len(), 101);
        assert!(plan.expanded <= 5000);
        assert_eq!(segs.first().unwrap().pos, Coordinate::new(0, 64, 0));
        assert_eq!(segs.last().unwrap().pos, Coordinate::new(100, 64, 0));
        for w in segs.windows(2) {
            assert!(w[1].pos.x > w[0].pos.x);
        }
        for s in segs {
            assert_eq!(s.cross_section.len(), 3);
            assert_eq!(s.materials.len(), 3);
            assert!(s.materials.iter().all(|m| pal.contains(m)));
            assert!(s.cross_section.iter().all(|c| c.x == s.pos.x && c.y == 64));
        }
        Ok(())
    }

    #[test]
    fn unreachable_goal_returns_empty_within_budget() -> Result<()> {
        let terrain = SyntheticTerrain::from_fn(|x, _| if (50..=52).contains(&x) { 200 } else { 64 });
        let cache = HeightCache::new();
        let cancel = CancelToken::new();
        let settings = PathSettings::default();
        let pf = Pathfinder::new(&terrain, &cache, &cancel, &settings);

        let plan = pf.plan(Coordinate::new(0, 64, 0), Coordinate::new(100, 64, 0), 3, 2000)?;
        assert!(plan.placements.is_empty());
        assert_eq!(plan.expanded, 2000);
        Ok(())
    }

    #[test]
    fn zero_budget_is_immediate_failure() -> Result<()> {
        let terrain = SyntheticTerrain::flat(64);
        let cache = HeightCache::new();
        let cancel = CancelToken::new();
        let settings = PathSettings::default();
        let pf = Pathfinder::new(&terrain, &cache, &cancel, &settings);
        let segs = pf.find_path(Coordinate::new(0, 64, 0), Coordinate::new(3, 64, 0), 1, 0)?;
        assert!(segs.is_empty());
        assert_eq!(terrain.height_queries(), 0);
        Ok(())
    }

    #[test]
    fn same_endpoint_is_single_segment() -> Result<()> {
        let terrain = SyntheticTerrain::flat(70);
        let cache = HeightCache::new();
        let cancel = CancelToken::new();
        let settings = PathSettings::default();
        let pf = Pathfinder::new(&terrain, &cache, &cancel, &settings);
        let p = Coordinate::new(4, 70, 4);
        let segs = pf.find_path(p, p, 2, 10)?;
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].pos, p);
        assert_eq!(segs[0].cross_section.len(), 2);
        Ok(())
    }

    #[test]
    fn canceled_search_reports_canceled() {
        let terrain = SyntheticTerrain::flat(64);
        let cache = HeightCache::new();
        let cancel = CancelToken::new();
        cancel.cancel();
        let settings = PathSettings::default();
        let pf = Pathfinder::new(&terrain, &cache, &cancel, &settings);
        let err = pf.find_path(Coordinate::new(0, 64, 0), Coordinate::new(10, 64, 0), 1, 100).unwrap_err();
        assert!(err.is::<Canceled>());
    }

    #[test]
    fn detours_around_water() -> Result<()> {
        let pond = (4..=6).flat_map(|x| (-2..=2).map(move |z| (x, z)));
        let terrain = SyntheticTerrain::flat(64).with_water(pond);
        let cache = HeightCache::new();
        let cancel = CancelToken::new();
        let settings = PathSettings::default();
        let pf = Pathfinder::new(&terrain, &cache, &cancel, &settings);
        let segs = pf.find_path(Coordinate::new(0, 64, 0), Coordinate::new(10, 64, 0), 1, 5000)?;
        assert!(!segs.is_empty());
        assert!(segs.iter().all(|s| !terrain.is_water(s.pos.x, s.pos.z)));
        assert_eq!(segs.last().unwrap().pos.horizontal(), (10, 0));
        Ok(())
    }

    #[test]
    fn climbs_are_smoothed_over_radius() {
        assert_eq!(smooth_profile(&[64, 64, 70, 64, 64], 1), vec![64, 66, 66, 66, 64]);
        assert_eq!(smooth_profile(&[64, 70, 64], 0), vec![64, 70, 64]);
    }

    #[test]
    fn cache_is_consulted_before_oracle() -> Result<()> {
        let terrain = SyntheticTerrain::flat(64);
        let cache = HeightCache::new();
        let cancel = CancelToken::new();
        let settings = PathSettings::default();
        let pf = Pathfinder::new(&terrain, &cache, &cancel, &settings);
        pf.find_path(Coordinate::new(0, 64, 0), Coordinate::new(20, 64, 0), 3, 5000)?;
        let after_first = terrain.height_queries();
        assert_eq!(after_first, cache.len());
        pf.find_path(Coordinate::new(0, 64, 0), Coordinate::new(20, 64, 0), 3, 5000)?;
        assert_eq!(terrain.height_queries(), after_first);
        Ok(())
    }

    #[test]
    fn diagonal_wall_cannot_be_squeezed_through() -> Result<()> {
        // Closed wall on the anti-diagonal x + z == 10.
        let terrain = SyntheticTerrain::from_fn(|x, z| if x + z == 10 { 200 } else { 64 });
        let cancel = CancelToken::new();
        let mut settings = PathSettings {
            weights: CostWeights { height: 2.0, stability: 0.0 },
            ..PathSettings::default()
        };
        let (start, goal) = (Coordinate::new(0, 64, 0), Coordinate::new(10, 64, 10));

        let cache = HeightCache::new();
        let pf = Pathfinder::new(&terrain, &cache, &cancel, &settings);
        let plan = pf.plan(start, goal, 1, 5000)?;
        assert!(plan.placements.is_empty());
        assert_eq!(plan.expanded, 5000);

        settings.policy.allow_corner_cut = true;
        let cache = HeightCache::new();
        let pf = Pathfinder::new(&terrain, &cache, &cancel, &settings);
        let segs = pf.find_path(start, goal, 1, 5000)?;
        assert!(!segs.is_empty());
        assert!(segs.iter().all(|s| s.pos.x + s.pos.z != 10));
        Ok(())
    }

    fn four_connected(cells: &HashSet<(i32, i32)>) -> bool {
        let Some(&first) = cells.iter().next() else { return true };
        let mut seen = HashSet::from([first]);
        let mut queue = VecDeque::from([first]);
        while let Some((x, z)) = queue.pop_front() {
            for n in [(x + 1, z), (x - 1, z), (x, z + 1), (x, z - 1)] {
                if cells.contains(&n) && seen.insert(n) {
                    queue.push_back(n);
                }
            }
        }
        seen.len() == cells.len()
    }

    #[test]
    fn diagonal_road_surface_has_no_gaps() -> Result<()> {
        let terrain = SyntheticTerrain::flat(64);
        let cancel = CancelToken::new();
        let settings = PathSettings::default();
        for width in [1, 2, 3] {
            let cache = HeightCache::new();
            let pf = Pathfinder::new(&terrain, &cache, &cancel, &settings);
            let segs = pf.find_path(Coordinate::new(0, 64, 0), Coordinate::new(10, 64, 10), width, 5000)?;
            let diagonal_steps = segs
                .windows(2)
                .filter(|w| w[0].pos.x != w[1].pos.x && w[0].pos.z != w[1].pos.z)
                .count();
            assert!(diagonal_steps > 0);

            for w in segs.windows(2) {
                let pair: HashSet<(i32, i32)> =
                    w.iter().flat_map(|s| s.cross_section.iter().map(|c| c.horizontal())).collect();
                assert!(four_connected(&pair), "width {} gap between {} and {}", width, w[0].pos, w[1].pos);
            }
            for s in &segs {
                assert_eq!(s.materials.len(), s.cross_section.len());
                assert!((width as usize..=width as usize + 1).contains(&s.cross_section.len()));
            }
        }
        Ok(())
    }
}
