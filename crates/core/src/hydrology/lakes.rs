use crate::{
    config::{HeightRange, LakeConfig},
    grid::Grid,
};
use log::trace;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use std::f64::consts::TAU;

/// Number of harmonics used to wobble a lake's outline
const SHORE_HARMONICS: usize = 3;

/// Lakes carved into the terrain
#[derive(Clone, Debug)]
pub struct LakeOutput {
    pub lake: Grid<bool>,
    pub count: usize,
}

/// Parameters shared by every lake candidate in a region
pub struct LakeSite<'a> {
    pub humidity: &'a Grid<f32>,
    pub height_range: HeightRange,
    pub sea_level: f32,
    pub cell_size: f64,
}

/// An irregular closed outline, as a radius that varies with angle
struct Outline {
    radius: f64,
    harmonics: [(f64, f64); SHORE_HARMONICS],
}

impl Outline {
    fn random(radius: f64, warp: f64, rng: &mut impl Rng) -> Self {
        let mut harmonics = [(0.0, 0.0); SHORE_HARMONICS];
        for (amplitude, phase) in harmonics.iter_mut() {
            *amplitude = rng.gen_range(0.0..=1.0) * warp
                / SHORE_HARMONICS as f64;
            *phase = rng.gen_range(0.0..TAU);
        }
        Self { radius, harmonics }
    }

    /// Radius of the outline in the direction of `angle`. With the warp
    /// amplitudes summing to at most `warp`, this stays within
    /// `radius * (1 +/- warp)`.
    fn radius_at(&self, angle: f64) -> f64 {
        let wobble: f64 = self
            .harmonics
            .iter()
            .enumerate()
            .map(|(i, (amplitude, phase))| {
                amplitude * ((i + 2) as f64 * angle + phase).sin()
            })
            .sum();
        self.radius * (1.0 + wobble)
    }

    /// The largest radius the outline can reach
    fn max_radius(&self) -> f64 {
        let total: f64 = self.harmonics.iter().map(|(a, _)| a).sum();
        self.radius * (1.0 + total)
    }

    fn contains(&self, dx: f64, dz: f64) -> bool {
        dx.hypot(dz) <= self.radius_at(dz.atan2(dx))
    }
}

/// Carve lakes into highland basins. Each attempt picks a random center and
/// radius, and is rejected if the center is too low, the area is too dry,
/// or it would overlap an existing lake. Accepted lakes are flattened to
/// `depth_m` below the mean height of their shoreline.
pub fn carve_lakes(
    height: &mut Grid<f32>,
    site: &LakeSite,
    config: &LakeConfig,
    seed: u32,
) -> anyhow::Result<LakeOutput> {
    height.ensure_same_shape(site.humidity, "humidity")?;
    let (width, depth) = (height.width(), height.height());
    let mut lake = Grid::new(width, depth, false);
    let mut count = 0;
    if !config.enabled || height.is_empty() {
        return Ok(LakeOutput { lake, count });
    }

    let mut rng = Pcg64::seed_from_u64(seed as u64);
    let min_radius = config.min_radius_m.min(config.max_radius_m);
    for attempt in 0..config.attempts {
        // Draw everything up front, so a rejection doesn't shift the random
        // stream for later attempts
        let cx = rng.gen_range(0..width);
        let cz = rng.gen_range(0..depth);
        let radius_m = rng.gen_range(min_radius..=config.max_radius_m);
        let outline = Outline::random(
            (radius_m / site.cell_size).max(1.0),
            config.shore_warp,
            &mut rng,
        );

        let center_height = height.get(cx, cz);
        if center_height < site.sea_level
            || site.height_range.normalize(center_height) < config.min_height
        {
            continue;
        }

        // Collect the cells inside the outline. The search window is clipped
        // to the grid, so a huge radius costs no more than the whole grid.
        let reach = outline
            .max_radius()
            .ceil()
            .min(width.max(depth) as f64) as usize;
        let mut cells = Vec::new();
        for z in cz.saturating_sub(reach)..=(cz + reach).min(depth - 1) {
            for x in cx.saturating_sub(reach)..=(cx + reach).min(width - 1) {
                let (dx, dz) = (x as f64 - cx as f64, z as f64 - cz as f64);
                if outline.contains(dx, dz) {
                    cells.push((x, z));
                }
            }
        }
        if cells.iter().any(|(x, z)| lake.get(*x, *z)) {
            continue;
        }
        let humidity = cells
            .iter()
            .map(|(x, z)| site.humidity.get(*x, *z) as f64)
            .sum::<f64>()
            / cells.len() as f64;
        if (humidity as f32) < config.humidity_threshold {
            continue;
        }

        // Shoreline: cells inside the lake with a neighbor outside it
        let inside = |x: usize, z: usize| {
            outline.contains(x as f64 - cx as f64, z as f64 - cz as f64)
        };
        let shoreline: Vec<f64> = cells
            .iter()
            .filter(|(x, z)| {
                height.neighbors8(*x, *z).any(|(_, nx, nz)| !inside(nx, nz))
            })
            .map(|(x, z)| height.get(*x, *z) as f64)
            .collect();
        if shoreline.is_empty() {
            continue;
        }
        let surface = shoreline.iter().sum::<f64>() / shoreline.len() as f64;
        let bed = surface as f32 - config.depth_m;
        for (x, z) in &cells {
            height.set(*x, *z, bed);
            lake.set(*x, *z, true);
        }
        count += 1;
        trace!(
            "Lake {} at ({}, {}), {} cells, attempt {}",
            count,
            cx,
            cz,
            cells.len(),
            attempt
        );
    }

    Ok(LakeOutput { lake, count })
}
