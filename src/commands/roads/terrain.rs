use anyhow::Result;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::models::Coordinate;

/// World access used by the road engine. Any call may load terrain lazily
/// and block; callers run on worker threads.
pub trait TerrainOracle: Send + Sync {
    /// Y of the topmost solid block at (x, z).
    fn height_at(&self, x: i32, z: i32) -> Result<i32>;
    /// Capability check asked before a road cell is written.
    fn is_sturdy_support(&self, pos: Coordinate) -> Result<bool>;
    /// Non-negative unsuitability score; 0 is ideal ground.
    fn stability_around(&self, pos: Coordinate) -> Result<f64>;
    fn place(&self, pos: Coordinate, material: &str) -> Result<()>;
    fn clear_above(&self, pos: Coordinate, max_blocks: u32) -> Result<()>;
}

pub trait StructureLocator: Send + Sync {
    /// `target` is either a `#category` tag or an exact structure id.
    fn locate(&self, target: &str, near: Coordinate, radius: i32) -> Option<Coordinate>;
}

type HeightFn = Box<dyn Fn(i32, i32) -> i32 + Send + Sync>;

/// In-memory terrain with a height function, water cells and a record of
/// every block placed into it.
pub struct SyntheticTerrain {
    height: HeightFn,
    sea_level: Option<i32>,
    water: HashSet<(i32, i32)>,
    water_penalty: f64,
    blocks: Mutex<HashMap<Coordinate, String>>,
    height_queries: AtomicUsize,
}

impl SyntheticTerrain {
    pub fn from_fn<F>(height: F) -> Self
    where
        F: Fn(i32, i32) -> i32 + Send + Sync + 'static,
    {
        Self {
            height: Box::new(height),
            sea_level: None,
            water: HashSet::new(),
            water_penalty: 8.0,
            blocks: Mutex::new(HashMap::new()),
            height_queries: AtomicUsize::new(0),
        }
    }

    pub fn flat(y: i32) -> Self {
        Self::from_fn(move |_, _| y)
    }

    /// Gentle hills with lakes below y=61; phases derive from `seed`.
    pub fn rolling(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let px: f64 = rng.gen_range(0.0..std::f64::consts::TAU);
        let pz: f64 = rng.gen_range(0.0..std::f64::consts::TAU);
        Self::from_fn(move |x, z| {
            let h = 64.0 + 7.0 * (x as f64 / 23.0 + px).sin() + 5.0 * (z as f64 / 31.0 + pz).cos();
            h.round() as i32
        })
        .with_sea_level(61)
    }

    pub fn with_sea_level(mut self, y: i32) -> Self {
        self.sea_level = Some(y);
        self
    }

    pub fn with_water<I: IntoIterator<Item = (i32, i32)>>(mut self, cells: I) -> Self {
        self.water.extend(cells);
        self
    }

    pub fn with_water_penalty(mut self, penalty: f64) -> Self {
        self.water_penalty = penalty;
        self
    }

    pub fn is_water(&self, x: i32, z: i32) -> bool {
        if self.water.contains(&(x, z)) {
            return true;
        }
        match self.sea_level {
            Some(sea) => (self.height)(x, z) < sea,
            None => false,
        }
    }

    pub fn height_queries(&self) -> usize {
        self.height_queries.load(Ordering::Relaxed)
    }

    pub fn block_at(&self, pos: Coordinate) -> Option<String> {
        self.blocks.lock().get(&pos).cloned()
    }

    pub fn placed_count(&self) -> usize {
        self.blocks.lock().len()
    }
}

impl TerrainOracle for SyntheticTerrain {
    fn height_at(&self, x: i32, z: i32) -> Result<i32> {
        self.height_queries.fetch_add(1, Ordering::Relaxed);
        Ok((self.height)(x, z))
    }

    fn is_sturdy_support(&self, pos: Coordinate) -> Result<bool> {
        Ok(!self.is_water(pos.x, pos.z))
    }

    fn stability_around(&self, pos: Coordinate) -> Result<f64> {
        if self.is_water(pos.x, pos.z) {
            return Ok(self.water_penalty);
        }
        // Drop-offs around the cell beyond one block count as instability.
        let worst = [(1, 0), (-1, 0), (0, 1), (0, -1)]
            .iter()
            .map(|&(dx, dz)| ((self.height)(pos.x + dx, pos.z + dz) - pos.y).abs())
            .max()
            .unwrap_or(0);
        Ok(((worst - 1).max(0)) as f64 * 0.5)
    }

    fn place(&self, pos: Coordinate, material: &str) -> Result<()> {
        self.blocks.lock().insert(pos, material.to_string());
        Ok(())
    }

    fn clear_above(&self, pos: Coordinate, max_blocks: u32) -> Result<()> {
        let mut blocks = self.blocks.lock();
        for dy in 1..=max_blocks as i32 {
            blocks.remove(&pos.with_y(pos.y + dy));
        }
        Ok(())
    }
}

/// One structure per `spacing`-sized region at a seeded offset.
pub struct GridLocator {
    tag: String,
    seed: u64,
    spacing: i32,
    terrain: Arc<dyn TerrainOracle>,
}

impl GridLocator {
    pub fn new(tag: impl Into<String>, seed: u64, spacing: i32, terrain: Arc<dyn TerrainOracle>) -> Self {
        Self { tag: tag.into(), seed, spacing: spacing.max(1), terrain }
    }

    fn matches(&self, target: &str) -> bool {
        target == self.tag || target.strip_prefix('#') == Some(self.tag.as_str())
    }

    fn structure_in_region(&self, rx: i32, rz: i32) -> Option<Coordinate> {
        let mix = self.seed
            ^ (rx as i64 as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
            ^ (rz as i64 as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F);
        let mut rng = ChaCha8Rng::seed_from_u64(mix);
        let span = (self.spacing * 3 / 4).max(1);
        let x = rx * self.spacing + rng.gen_range(0..span);
        let z = rz * self.spacing + rng.gen_range(0..span);
        let y = self.terrain.height_at(x, z).ok()?;
        Some(Coordinate::new(x, y, z))
    }
}

impl StructureLocator for GridLocator {
    fn locate(&self, target: &str, near: Coordinate, radius: i32) -> Option<Coordinate> {
        if !self.matches(target) || radius < 0 {
            return None;
        }
        let r2 = (radius as i64) * (radius as i64);
        let mut best: Option<(i64, Coordinate)> = None;
        for rx in (near.x - radius).div_euclid(self.spacing)..=(near.x + radius).div_euclid(self.spacing) {
            for rz in (near.z - radius).div_euclid(self.spacing)..=(near.z + radius).div_euclid(self.spacing) {
                let Some(c) = self.structure_in_region(rx, rz) else { continue };
                let dx = (c.x - near.x) as i64;
                let dz = (c.z - near.z) as i64;
                let d = dx * dx + dz * dz;
                if d > r2 {
                    continue;
                }
                if best.map_or(true, |(bd, _)| d < bd) {
                    best = Some((d, c));
                }
            }
        }
        best.map(|(_, c)| c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_terrain_counts_height_queries() -> Result<()> {
        let t = SyntheticTerrain::flat(64);
        assert_eq!(t.height_at(3, 4)?, 64);
        assert_eq!(t.height_at(3, 4)?, 64);
        assert_eq!(t.height_queries(), 2);
        Ok(())
    }

    #[test]
    fn water_is_unstable_and_not_sturdy() -> Result<()> {
        let t = SyntheticTerrain::flat(64).with_water([(1, 1)]);
        let wet = Coordinate::new(1, 64, 1);
        let dry = Coordinate::new(2, 64, 1);
        assert!(!t.is_sturdy_support(wet)?);
        assert!(t.is_sturdy_support(dry)?);
        assert!(t.stability_around(wet)? > 0.0);
        assert_eq!(t.stability_around(dry)?, 0.0);
        Ok(())
    }

    #[test]
    fn clear_above_removes_stacked_blocks() -> Result<()> {
        let t = SyntheticTerrain::flat(64);
        let p = Coordinate::new(0, 64, 0);
        t.place(p, "gravel")?;
        t.place(p.with_y(65), "oak_log")?;
        t.place(p.with_y(70), "leaves")?;
        t.clear_above(p, 3)?;
        assert_eq!(t.block_at(p).as_deref(), Some("gravel"));
        assert_eq!(t.block_at(p.with_y(65)), None);
        assert_eq!(t.block_at(p.with_y(70)).as_deref(), Some("leaves"));
        Ok(())
    }

    #[test]
    fn grid_locator_is_deterministic_and_tag_aware() {
        let terrain: Arc<dyn TerrainOracle> = Arc::new(SyntheticTerrain::flat(64));
        let loc = GridLocator::new("village", 7, 128, terrain.clone());
        let near = Coordinate::new(0, 64, 0);
        let a = loc.locate("#village", near, 400);
        let b = GridLocator::new("village", 7, 128, terrain).locate("village", near, 400);
        assert!(a.is_some());
        assert_eq!(a, b);
        assert_eq!(loc.locate("#temple", near, 400), None);
        let found = a.unwrap();
        assert_eq!(found.y, 64);
        assert!((found.x as i64).pow(2) + (found.z as i64).pow(2) <= 400 * 400);
    }
}
