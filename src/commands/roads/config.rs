use anyhow::{bail, Result};
use std::{env, path::PathBuf};

use super::neighbor_policy::MovementPolicy;
use super::pathfinder::{CostWeights, PathSettings};

#[derive(Clone, Debug)]
pub struct Config {
    pub db: Option<PathBuf>,
    pub world: String,
    pub log_level: Option<String>,
    pub threads: Option<usize>,
    pub structure_target: String,
    pub search_radius: i32,
    pub initial_structure_count: usize,
    pub max_concurrent_jobs: usize,
    pub max_steps: usize,
    pub averaging_radius: i32,
    pub allow_artificial: bool,
    pub allow_natural: bool,
    pub artificial_palettes: Vec<Vec<String>>,
    pub natural_palettes: Vec<Vec<String>>,
    pub artificial_width: (u32, u32),
    pub natural_width: (u32, u32),
    /// Read by the decoration layer; the generator itself ignores it.
    pub place_decorations: bool,
    pub allow_diagonals: bool,
    /// Lets diagonal steps pass between two cells too steep to enter.
    pub allow_corner_cut: bool,
    pub max_height_step: i32,
    pub height_weight: f64,
    pub stability_weight: f64,
    pub clear_height: u32,
    pub seed: Option<u64>,
}

fn palette(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db: None,
            world: "overworld".to_string(),
            log_level: None,
            threads: None,
            structure_target: "#village".to_string(),
            search_radius: 384,
            initial_structure_count: 7,
            max_concurrent_jobs: 3,
            max_steps: 100_000,
            averaging_radius: 1,
            allow_artificial: true,
            allow_natural: true,
            artificial_palettes: vec![
                palette(&["minecraft:stone_bricks", "minecraft:mossy_stone_bricks", "minecraft:cracked_stone_bricks"]),
                palette(&["minecraft:polished_andesite", "minecraft:andesite", "minecraft:cobblestone"]),
            ],
            natural_palettes: vec![
                palette(&["minecraft:dirt_path", "minecraft:coarse_dirt"]),
                palette(&["minecraft:gravel", "minecraft:dirt_path"]),
            ],
            artificial_width: (3, 5),
            natural_width: (2, 3),
            place_decorations: true,
            allow_diagonals: true,
            allow_corner_cut: false,
            max_height_step: 3,
            height_weight: 2.0,
            stability_weight: 1.0,
            clear_height: 3,
            seed: None,
        }
    }
}

impl Config {
    /// Overlays `ROADS_*` environment variables onto `self`.
    pub fn apply_env(&mut self) {
        if let Ok(v) = env::var("ROADS_DB") { self.db = Some(PathBuf::from(v)); }
        if let Ok(v) = env::var("ROADS_WORLD") { self.world = v; }
        if let Ok(v) = env::var("ROADS_LOG_LEVEL") { self.log_level = Some(v); }
        if let Some(n) = env_parse("ROADS_THREADS") { self.threads = Some(n); }
        if let Ok(v) = env::var("ROADS_STRUCTURE") { self.structure_target = v; }
        if let Some(n) = env_parse("ROADS_SEARCH_RADIUS") { self.search_radius = n; }
        if let Some(n) = env_parse("ROADS_INITIAL_STRUCTURES") { self.initial_structure_count = n; }
        if let Some(n) = env_parse("ROADS_MAX_CONCURRENT") { self.max_concurrent_jobs = n; }
        if let Some(n) = env_parse("ROADS_MAX_STEPS") { self.max_steps = n; }
        if let Some(n) = env_parse("ROADS_AVERAGING_RADIUS") { self.averaging_radius = n; }
        if let Some(b) = env_bool("ROADS_ALLOW_ARTIFICIAL") { self.allow_artificial = b; }
        if let Some(b) = env_bool("ROADS_ALLOW_NATURAL") { self.allow_natural = b; }
        if let Some(p) = env::var("ROADS_ARTIFICIAL_PALETTES").ok().and_then(|s| parse_palettes(&s)) { self.artificial_palettes = p; }
        if let Some(p) = env::var("ROADS_NATURAL_PALETTES").ok().and_then(|s| parse_palettes(&s)) { self.natural_palettes = p; }
        if let Some(r) = env::var("ROADS_ARTIFICIAL_WIDTH").ok().and_then(|s| parse_width_range(&s)) { self.artificial_width = r; }
        if let Some(r) = env::var("ROADS_NATURAL_WIDTH").ok().and_then(|s| parse_width_range(&s)) { self.natural_width = r; }
        if let Some(b) = env_bool("ROADS_DECORATIONS") { self.place_decorations = b; }
        if let Some(b) = env_bool("ROADS_ALLOW_DIAGONALS") { self.allow_diagonals = b; }
        if let Some(b) = env_bool("ROADS_ALLOW_CORNER_CUT") { self.allow_corner_cut = b; }
        if let Some(n) = env_parse("ROADS_MAX_HEIGHT_STEP") { self.max_height_step = n; }
        if let Some(w) = env_parse("ROADS_HEIGHT_WEIGHT") { self.height_weight = w; }
        if let Some(w) = env_parse("ROADS_STABILITY_WEIGHT") { self.stability_weight = w; }
        if let Some(n) = env_parse("ROADS_CLEAR_HEIGHT") { self.clear_height = n; }
        if let Some(s) = env_parse("ROADS_SEED") { self.seed = Some(s); }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.allow_artificial && !self.allow_natural {
            bail!("config: both artificial and natural roads are disabled");
        }
        if self.max_concurrent_jobs == 0 {
            bail!("config: max_concurrent_jobs must be at least 1");
        }
        if self.threads == Some(0) {
            bail!("config: threads must be at least 1");
        }
        let checks = [
            (self.allow_artificial, "artificial", &self.artificial_palettes, self.artificial_width),
            (self.allow_natural, "natural", &self.natural_palettes, self.natural_width),
        ];
        for (enabled, name, palettes, (lo, hi)) in checks {
            if !enabled { continue; }
            if palettes.is_empty() || palettes.iter().any(|p| p.is_empty()) {
                bail!("config: {} palettes must be non-empty", name);
            }
            if lo == 0 || lo > hi {
                bail!("config: {} width range {}:{} is invalid", name, lo, hi);
            }
        }
        Ok(())
    }

    pub fn path_settings(&self) -> PathSettings {
        PathSettings {
            policy: MovementPolicy {
                allow_diagonals: self.allow_diagonals,
                allow_corner_cut: self.allow_corner_cut,
                max_height_step: self.max_height_step,
            },
            weights: CostWeights { height: self.height_weight, stability: self.stability_weight },
            averaging_radius: self.averaging_radius,
        }
    }

    pub fn pool_threads(&self) -> usize {
        self.threads.unwrap_or(self.max_concurrent_jobs).max(1)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    env::var(key).ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

// format: block,block;block,block
fn parse_palettes(input: &str) -> Option<Vec<Vec<String>>> {
    let v = input
        .split(';')
        .map(|group| {
            group
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .filter(|g| !g.is_empty())
        .collect::<Vec<_>>();
    if v.is_empty() { None } else { Some(v) }
}

// format: min:max
fn parse_width_range(input: &str) -> Option<(u32, u32)> {
    let (lo, hi) = input.split_once(':')?;
    let lo = lo.trim().parse::<u32>().ok()?;
    let hi = hi.trim().parse::<u32>().ok()?;
    Some((lo, hi))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_palettes_and_width_range() {
        assert_eq!(parse_palettes(""), None);
        assert_eq!(
            parse_palettes("a, b;c"),
            Some(vec![vec!["a".to_string(), "b".to_string()], vec!["c".to_string()]])
        );
        assert_eq!(parse_width_range("2:4"), Some((2, 4)));
        assert_eq!(parse_width_range("bad"), None);
    }

    #[test]
    fn test_defaults_validate() {
        assert!(Config::default().validate().is_ok());
        let bad = Config { natural_width: (3, 2), ..Config::default() };
        assert!(bad.validate().is_err());
        let none = Config { allow_artificial: false, allow_natural: false, ..Config::default() };
        assert!(none.validate().is_err());
        let zero = Config { max_concurrent_jobs: 0, ..Config::default() };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_apply_env_reads_values() {
        env::set_var("ROADS_WORLD", "nether");
        env::set_var("ROADS_MAX_CONCURRENT", "5");
        env::set_var("ROADS_ALLOW_NATURAL", "false");
        env::set_var("ROADS_ARTIFICIAL_WIDTH", "4:6");
        env::set_var("ROADS_SEED", "99");

        let mut cfg = Config::default();
        cfg.apply_env();
        assert_eq!(cfg.world, "nether");
        assert_eq!(cfg.max_concurrent_jobs, 5);
        assert!(!cfg.allow_natural);
        assert_eq!(cfg.artificial_width, (4, 6));
        assert_eq!(cfg.seed, Some(99));
        assert_eq!(cfg.pool_threads(), 5);

        // cleanup
        env::remove_var("ROADS_WORLD");
        env::remove_var("ROADS_MAX_CONCURRENT");
        env::remove_var("ROADS_ALLOW_NATURAL");
        env::remove_var("ROADS_ARTIFICIAL_WIDTH");
        env::remove_var("ROADS_SEED");
    }

    #[test]
    fn test_movement_policy_follows_config() {
        let p = Config::default().path_settings().policy;
        assert!(p.allow_diagonals);
        assert!(!p.allow_corner_cut);
        assert_eq!(p.max_height_step, 3);

        env::set_var("ROADS_ALLOW_DIAGONALS", "false");
        env::set_var("ROADS_ALLOW_CORNER_CUT", "true");
        let mut cfg = Config::default();
        cfg.apply_env();
        env::remove_var("ROADS_ALLOW_DIAGONALS");
        env::remove_var("ROADS_ALLOW_CORNER_CUT");

        let p = cfg.path_settings().policy;
        assert!(!p.allow_diagonals);
        assert!(p.allow_corner_cut);
    }
}
