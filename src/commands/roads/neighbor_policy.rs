#[derive(Copy, Clone, Debug)]
pub struct MovementPolicy {
    pub allow_diagonals: bool,
    /// Diagonal steps may pass between two cells that are too steep to enter.
    pub allow_corner_cut: bool,
    /// Neighbours whose surface differs by more than this are not adjacent.
    pub max_height_step: i32,
}

impl Default for MovementPolicy {
    fn default() -> Self {
        Self { allow_diagonals: true, allow_corner_cut: false, max_height_step: 3 }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Offset(pub i32, pub i32);

impl MovementPolicy {
    pub fn neighbor_offsets(&self) -> &'static [Offset] {
        const CARD: [Offset; 4] = [Offset(1,0), Offset(-1,0), Offset(0,1), Offset(0,-1)];
        const ALL: [Offset; 8] = [
            Offset(1,0), Offset(-1,0), Offset(0,1), Offset(0,-1),
            Offset(1,1), Offset(1,-1), Offset(-1,1), Offset(-1,-1),
        ];
        if self.allow_diagonals { &ALL } else { &CARD }
    }
}

/// Cells of a corridor cross-section, orthogonal to `dir`, centred on the
/// step. Diagonal travel spreads along z as if moving along x. Always
/// returns exactly `width` offsets (width 0 counts as 1).
pub fn lateral_offsets(dir: Offset, width: u32) -> Vec<Offset> {
    let Offset(dx, dz) = match dir {
        Offset(0, 0) => Offset(1, 0),
        Offset(dx, dz) if dx != 0 && dz != 0 => Offset(dx, 0),
        d => d,
    };
    let (px, pz) = (-dz.signum(), dx.signum());
    let w = width.max(1) as i32;
    let lo = -(w - 1) / 2;
    (0..w).map(|i| Offset(px * (lo + i), pz * (lo + i))).collect()
}

/// Footprint of the step that entered a cell travelling along `dir`.
/// Diagonal steps extend the cross-section by one cell back towards the
/// previous step so the two footprints share an edge.
pub fn corridor_offsets(dir: Offset, width: u32) -> Vec<Offset> {
    let mut cells = lateral_offsets(dir, width);
    let Offset(dx, dz) = dir;
    if dx != 0 && dz != 0 {
        let back: Vec<Offset> = cells
            .iter()
            .map(|&Offset(ox, oz)| Offset(ox, oz - dz.signum()))
            .filter(|o| !cells.contains(o))
            .collect();
        cells.extend(back);
    }
    cells
}

/// Horizontal octile distance; never exceeds the cheapest step sequence.
pub fn octile(a: (i32, i32), b: (i32, i32)) -> f64 {
    let dx = (a.0 - b.0).abs() as f64;
    let dz = (a.1 - b.1).abs() as f64;
    let (lo, hi) = if dx < dz { (dx, dz) } else { (dz, dx) };
    hi - lo + lo * std::f64::consts::SQRT_2
}
