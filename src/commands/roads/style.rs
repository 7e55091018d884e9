use anyhow::{bail, Result};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::config::Config;
use super::models::RoadType;

#[derive(Clone, Debug, PartialEq)]
pub struct RoadStyle {
    pub width: u32,
    pub palette: Vec<String>,
    pub road_type: RoadType,
}

#[derive(Clone, Debug)]
struct StyleOption {
    road_type: RoadType,
    palettes: Vec<Vec<String>>,
    min_width: u32,
    max_width: u32,
}

/// Random road type, palette and width for each generation job.
pub struct StylePicker {
    options: Vec<StyleOption>,
    rng: ChaCha8Rng,
}

impl StylePicker {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let mut options = Vec::new();
        if cfg.allow_artificial {
            options.push(StyleOption {
                road_type: RoadType::Artificial,
                palettes: cfg.artificial_palettes.clone(),
                min_width: cfg.artificial_width.0,
                max_width: cfg.artificial_width.1,
            });
        }
        if cfg.allow_natural {
            options.push(StyleOption {
                road_type: RoadType::Natural,
                palettes: cfg.natural_palettes.clone(),
                min_width: cfg.natural_width.0,
                max_width: cfg.natural_width.1,
            });
        }
        options.retain(|o| !o.palettes.is_empty() && o.min_width >= 1 && o.min_width <= o.max_width);
        if options.is_empty() {
            bail!("style: no usable road type (check allow_artificial/allow_natural, palettes and widths)");
        }
        let seed = cfg.seed.unwrap_or_else(rand::random);
        Ok(Self { options, rng: ChaCha8Rng::seed_from_u64(seed) })
    }

    pub fn pick(&mut self) -> RoadStyle {
        let idx = self.rng.gen_range(0..self.options.len());
        let opt = &self.options[idx];
        let palette = opt.palettes.choose(&mut self.rng).cloned().unwrap_or_default();
        let width = self.rng.gen_range(opt.min_width..=opt.max_width);
        RoadStyle { width, palette, road_type: opt.road_type }
    }
}
