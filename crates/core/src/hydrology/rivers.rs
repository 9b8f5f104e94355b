use crate::{
    config::RiverConfig,
    grid::{CoordGrid, Grid},
    noise::{fbm, FbmParams},
    seed,
    util::cmp_partial,
};
use anyhow::ensure;
use fnv::FnvHashSet;
use log::debug;
use nalgebra::Vector2;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use rayon::prelude::*;

/// Everything produced by river carving
#[derive(Clone, Debug)]
pub struct RiverOutput {
    /// Number of droplets that passed through each cell
    pub visits: Grid<u32>,
    /// Cells that were carved into river
    pub river: Grid<bool>,
    /// Land cells touching a river
    pub shore: Grid<bool>,
}

impl RiverOutput {
    /// No rivers at all
    pub fn empty(width: usize, height: usize) -> Self {
        Self {
            visits: Grid::new(width, height, 0),
            river: Grid::new(width, height, false),
            shore: Grid::new(width, height, false),
        }
    }

    pub fn river_cells(&self) -> usize {
        self.river.data().iter().filter(|r| **r).count()
    }
}

/// Lateral push for droplets: the curl of a noise potential, which is
/// divergence-free so it bends paths without pooling them
struct CurlField {
    x: Grid<f32>,
    z: Grid<f32>,
}

impl CurlField {
    fn new(seed: u32, coords: &CoordGrid, frequency: f64) -> Self {
        let potential = fbm(seed, coords, FbmParams::new(frequency, 3));
        let (dx, dz) = potential.gradient(coords.cell_size);
        // curl of a scalar potential psi is (dpsi/dz, -dpsi/dx)
        Self {
            x: dz,
            z: dx.map(|v| -v),
        }
    }

    fn at(&self, x: usize, z: usize) -> Vector2<f64> {
        Vector2::new(self.x.get(x, z) as f64, self.z.get(x, z) as f64)
    }
}

/// Trace droplets downhill, then dig out every cell that enough of them
/// passed through.
///
/// Droplets start in random cells among the highest part of the grid and
/// step one cell at a time along a blend of steepest descent and a
/// curl-noise push. A droplet stops when it reaches the sea, runs off the
/// grid, stalls in a pit, or runs out of steps. Each droplet counts at most
/// once per cell.
pub fn carve_rivers(
    height: &mut Grid<f32>,
    coords: &CoordGrid,
    config: &RiverConfig,
    sea_level: f32,
    seed: u32,
) -> anyhow::Result<RiverOutput> {
    ensure!(
        height.width() == coords.width && height.height() == coords.height,
        "height grid doesn't match its coordinates"
    );
    let (width, depth) = (height.width(), height.height());
    if !config.enabled || config.num_droplets == 0 || height.is_empty() {
        return Ok(RiverOutput::empty(width, depth));
    }

    let terrain = &*height;
    let starts = pick_starts(terrain, config, sea_level, seed);
    let (grad_x, grad_z) = terrain.gradient(coords.cell_size);
    let curl = CurlField::new(
        seed::mix(seed, 1),
        coords,
        config.curl_frequency,
    );

    // Each trace only reads shared state, and the ordered collect keeps
    // the merge below deterministic
    let paths: Vec<Vec<usize>> = starts
        .par_iter()
        .map(|start| {
            let gradient = (&grad_x, &grad_z);
            trace(*start, terrain, gradient, &curl, config, sea_level)
        })
        .collect();

    let mut visits = Grid::new(width, depth, 0u32);
    for path in &paths {
        for index in path {
            visits.data_mut()[*index] += 1;
        }
    }

    let threshold = config.threshold_fraction * config.num_droplets as f64;
    let river = visits.map(|count| count > 0 && count as f64 > threshold);
    let mut shore = Grid::new(width, depth, false);
    shore.par_fill_with(|x, z| {
        !river.get(x, z)
            && terrain.get(x, z) >= sea_level
            && terrain.neighbors8(x, z).any(|(_, nx, nz)| river.get(nx, nz))
    });

    for (h, is_river) in height.data_mut().iter_mut().zip(river.data()) {
        if *is_river {
            *h -= config.excavation_depth_m;
        }
    }

    let output = RiverOutput {
        visits,
        river,
        shore,
    };
    debug!(
        "Traced {} droplets, {} river cells",
        paths.len(),
        output.river_cells()
    );
    Ok(output)
}

/// Pick droplet start cells, at random among the land cells at or above
/// the configured height quantile
fn pick_starts(
    height: &Grid<f32>,
    config: &RiverConfig,
    sea_level: f32,
    seed: u32,
) -> Vec<usize> {
    let mut sorted: Vec<f32> = height.data().to_vec();
    sorted.sort_by(cmp_partial);
    let cutoff_index = ((sorted.len() - 1) as f64 * config.start_quantile)
        .round() as usize;
    let cutoff = sorted[cutoff_index.min(sorted.len() - 1)];

    let candidates: Vec<usize> = height
        .data()
        .iter()
        .enumerate()
        .filter(|(_, h)| **h >= cutoff && **h >= sea_level)
        .map(|(i, _)| i)
        .collect();
    if candidates.is_empty() {
        return Vec::new();
    }

    let mut rng = Pcg64::seed_from_u64(seed as u64);
    (0..config.num_droplets)
        .map(|_| candidates[rng.gen_range(0..candidates.len())])
        .collect()
}

/// Nearest cell to a fractional position. Positions are kept within half a
/// cell of the grid, so this never lands out of bounds.
fn cell_of(position: Vector2<f64>) -> (usize, usize) {
    (position.x.round() as usize, position.y.round() as usize)
}

/// Follow one droplet, returning every cell it visited (each once, in
/// order of first visit)
fn trace(
    start: usize,
    height: &Grid<f32>,
    (grad_x, grad_z): (&Grid<f32>, &Grid<f32>),
    curl: &CurlField,
    config: &RiverConfig,
    sea_level: f32,
) -> Vec<usize> {
    let (sx, sz) = height.coords_of(start);
    let mut position = Vector2::new(sx as f64, sz as f64);
    let mut path: Vec<usize> = vec![start];
    let mut visited: FnvHashSet<usize> = path.iter().copied().collect();
    let max_x = height.width() as f64 - 0.5;
    let max_z = height.height() as f64 - 0.5;

    for _ in 0..config.max_steps {
        let (x, z) = cell_of(position);
        if height.get(x, z) < sea_level {
            break;
        }

        let descent = -Vector2::new(
            grad_x.get(x, z) as f64,
            grad_z.get(x, z) as f64,
        );
        if descent.norm() < 1e-6 {
            // Flat ground or a pit, nowhere to go
            break;
        }
        let mut direction = descent.normalize();
        let push = curl.at(x, z);
        if push.norm() > 1e-9 {
            direction += push.normalize() * config.curl_strength;
        }
        if direction.norm() < 1e-9 {
            break;
        }
        position += direction.normalize();
        if position.x < -0.5
            || position.y < -0.5
            || position.x >= max_x
            || position.y >= max_z
        {
            break;
        }

        let (nx, nz) = cell_of(position);
        let index = height.index_of(nx, nz);
        if visited.insert(index) {
            path.push(index);
        }
    }
    path
}
