use crate::{
    seed::{hash_cell, hash_to_unit},
    util::smoothstep,
};
use serde::{Deserialize, Serialize};

/// Distance function used to measure how far a sample is from each feature
/// point
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    Euclidean,
    Manhattan,
    Chebyshev,
}

impl DistanceMetric {
    fn distance(self, dx: f64, dz: f64) -> f64 {
        match self {
            Self::Euclidean => (dx * dx + dz * dz).sqrt(),
            Self::Manhattan => dx.abs() + dz.abs(),
            Self::Chebyshev => dx.abs().max(dz.abs()),
        }
    }

    /// How many cells out from the sample's own cell a feature point can be
    /// and still be one of the two nearest. Feature points stay inside their
    /// cells, so F2 is at most 1.8 cell units away (2.5 for Manhattan),
    /// while points three cells out are always at least 2 away.
    fn search_radius(self) -> i64 {
        match self {
            Self::Euclidean | Self::Chebyshev => 2,
            Self::Manhattan => 3,
        }
    }
}

/// How the nearest (F1) and second-nearest (F2) feature distances get turned
/// into an output value. Every style outputs `[0, 1]`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellStyle {
    /// Raw F1: 0 at each feature point, growing toward cell borders
    Cell,
    /// High along cell borders (where F1 ~= F2), fading over `width`
    Ridge,
    /// Cone-shaped peaks centered on each feature point
    Peak,
    /// Flat-topped cells that drop off at the borders over `width`
    Plateau,
    /// F2 - F1, a soft version of [CellStyle::Ridge] inverted
    Dual,
}

/// Cellular (Worley/Voronoi style) noise. One feature point is placed in
/// each lattice cell at a position hashed from the seed and the cell
/// coordinates, so there's no state and any window of the plane can be
/// evaluated independently.
#[derive(Clone, Debug)]
pub struct Cellular {
    seed: u32,
    /// Feature density, in cells per kilometer
    frequency: f64,
    metric: DistanceMetric,
    style: CellStyle,
    /// How far feature points can stray from cell centers. 0 gives a regular
    /// grid, 1 gives full randomness
    jitter: f64,
    /// Width of the smooth threshold band used by some styles, in cell units
    width: f64,
}

impl Cellular {
    pub fn new(
        seed: u32,
        frequency: f64,
        metric: DistanceMetric,
        style: CellStyle,
        jitter: f64,
        width: f64,
    ) -> Self {
        Self {
            seed,
            frequency,
            metric,
            style,
            jitter: jitter.clamp(0.0, 1.0),
            width,
        }
    }

    /// Distances to the nearest and second-nearest feature points, in cell
    /// units
    pub fn distances(&self, x_km: f64, z_km: f64) -> (f64, f64) {
        let px = x_km * self.frequency;
        let pz = z_km * self.frequency;
        let cell_x = px.floor() as i64;
        let cell_z = pz.floor() as i64;

        let mut f1 = f64::INFINITY;
        let mut f2 = f64::INFINITY;
        let reach = self.metric.search_radius();
        for dz in -reach..=reach {
            for dx in -reach..=reach {
                let (fx, fz) = self.feature_point(cell_x + dx, cell_z + dz);
                let d = self.metric.distance(px - fx, pz - fz);
                if d < f1 {
                    f2 = f1;
                    f1 = d;
                } else if d < f2 {
                    f2 = d;
                }
            }
        }
        (f1, f2)
    }

    /// Sample the styled output at a position given in kilometers
    pub fn sample(&self, x_km: f64, z_km: f64) -> f64 {
        let (f1, f2) = self.distances(x_km, z_km);
        let width = self.width.max(1e-6) as f32;
        let value = match self.style {
            CellStyle::Cell => f1.min(1.0),
            CellStyle::Ridge => {
                1.0 - smoothstep(0.0, width, (f2 - f1) as f32) as f64
            }
            CellStyle::Peak => 1.0 - smoothstep(0.0, 1.0, f1 as f32) as f64,
            CellStyle::Plateau => {
                smoothstep(0.0, width, (f2 - f1) as f32) as f64
            }
            CellStyle::Dual => (f2 - f1).min(1.0),
        };
        value.clamp(0.0, 1.0)
    }

    fn feature_point(&self, cell_x: i64, cell_z: i64) -> (f64, f64) {
        let hash = hash_cell(self.seed, cell_x, cell_z);
        // Two independent offsets from one 64-bit hash
        let ox = hash_to_unit(hash) - 0.5;
        let rehash = hash.rotate_left(29).wrapping_mul(0x2545_f491_4f6c_dd1d);
        let oz = hash_to_unit(rehash) - 0.5;
        (
            cell_x as f64 + 0.5 + ox * self.jitter,
            cell_z as f64 + 0.5 + oz * self.jitter,
        )
    }
}
