use crate::{
    config::FailurePolicy,
    elevation::BlendMode,
    grid::Grid,
    util::{lerp, smoothstep},
};
use anyhow::{ensure, Context};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// A small height texture that can be stamped onto the terrain. Procedural
/// shapes are evaluated analytically; raw decals are loaded from a square
/// little-endian 16-bit heightmap.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum DecalConfig {
    Cone,
    Dome,
    /// A raised rim around a sunken bowl
    Crater,
    /// An elongated ridge running along the decal's local x axis
    Ridge,
    Raw { path: PathBuf, size: usize },
}

impl Default for DecalConfig {
    fn default() -> Self {
        Self::Dome
    }
}

/// A decal that's ready to be sampled
#[derive(Clone, Debug)]
pub enum Decal {
    Cone,
    Dome,
    Crater,
    Ridge,
    Raster(Grid<f32>),
    /// Stand-in for a raw decal that couldn't be loaded. Samples as zero.
    Missing,
}

impl Decal {
    /// Prepare a decal for sampling. Loading a raw decal can fail; under
    /// [FailurePolicy::Degrade] that's logged and the decal is replaced with
    /// [Decal::Missing].
    pub fn load(
        config: &DecalConfig,
        policy: FailurePolicy,
    ) -> anyhow::Result<Self> {
        Ok(match config {
            DecalConfig::Cone => Self::Cone,
            DecalConfig::Dome => Self::Dome,
            DecalConfig::Crater => Self::Crater,
            DecalConfig::Ridge => Self::Ridge,
            DecalConfig::Raw { path, size } => match read_r16(path, *size) {
                Ok(grid) => Self::Raster(grid),
                Err(error) if policy == FailurePolicy::Degrade => {
                    warn!("{:#}; decal will be flat", error);
                    Self::Missing
                }
                Err(error) => return Err(error),
            },
        })
    }

    /// Sample at decal-local coordinates, where `(0, 0)` and `(1, 1)` are
    /// opposite corners. Anything outside that square is 0. Procedural
    /// shapes return values in `[-1, 1]` and are radially clipped to the
    /// inscribed circle.
    pub fn sample(&self, u: f64, v: f64) -> f32 {
        if !(0.0..=1.0).contains(&u) || !(0.0..=1.0).contains(&v) {
            return 0.0;
        }
        // Distance from the center, where the inscribed circle is r=1
        let du = (2.0 * u - 1.0) as f32;
        let dv = (2.0 * v - 1.0) as f32;
        let r = du.hypot(dv);
        match self {
            Self::Cone => (1.0 - r).max(0.0),
            Self::Dome => (1.0 - r * r).max(0.0).sqrt(),
            Self::Crater => {
                if r >= 1.0 {
                    return 0.0;
                }
                let rim = (-((r - 0.75) / 0.15).powi(2)).exp();
                let bowl = -0.6 * (1.0 - smoothstep(0.0, 0.7, r));
                rim + bowl
            }
            Self::Ridge => {
                let across = (1.0 - dv.abs()).max(0.0);
                let along = 1.0 - smoothstep(0.6, 1.0, du.abs());
                across * along
            }
            Self::Raster(grid) => sample_bilinear(grid, u, v),
            Self::Missing => 0.0,
        }
    }
}

/// Bilinear lookup, where `(0, 0)` is the center of the first texel and
/// `(1, 1)` is the center of the last
fn sample_bilinear(grid: &Grid<f32>, u: f64, v: f64) -> f32 {
    let fx = u * (grid.width() - 1) as f64;
    let fz = v * (grid.height() - 1) as f64;
    let x0 = fx.floor() as usize;
    let z0 = fz.floor() as usize;
    let x1 = (x0 + 1).min(grid.width() - 1);
    let z1 = (z0 + 1).min(grid.height() - 1);
    let tx = (fx - x0 as f64) as f32;
    let tz = (fz - z0 as f64) as f32;
    let top = lerp(grid.get(x0, z0), grid.get(x1, z0), tx);
    let bottom = lerp(grid.get(x0, z1), grid.get(x1, z1), tx);
    lerp(top, bottom, tz)
}

/// Read a square `.r16` file into a grid of values in `[0, 1]`
fn read_r16(path: &Path, size: usize) -> anyhow::Result<Grid<f32>> {
    let bytes = fs::read(path)
        .with_context(|| format!("error reading decal {}", path.display()))?;
    ensure!(size >= 2, "decal {} must be at least 2x2", path.display());
    ensure!(
        bytes.len() == size * size * 2,
        "decal {} is {} bytes, expected {} for a {}x{} r16",
        path.display(),
        bytes.len(),
        size * size * 2,
        size,
        size
    );
    let data = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]) as f32 / 65535.0)
        .collect();
    Grid::from_vec(size, size, data)
}

/// Stamp a decal onto a grid. The decal is centered at `center` (fractional
/// cell coordinates), spans `radius` cells from its center to each edge,
/// and is rotated by `rotation` radians. Cells outside the grid are
/// skipped.
pub fn stamp(
    height: &mut Grid<f32>,
    center: (f64, f64),
    radius: f64,
    rotation: f64,
    decal: &Decal,
    amplitude: f32,
    blend: BlendMode,
) {
    let radius = radius.max(0.5);
    let (cx, cz) = center;
    // The rotated square can reach out to r*sqrt(2)
    let reach = radius * std::f64::consts::SQRT_2;
    let max_x = height.width() as isize - 1;
    let max_z = height.height() as isize - 1;
    let x0 = ((cx - reach).floor() as isize).max(0);
    let x1 = ((cx + reach).ceil() as isize).min(max_x);
    let z0 = ((cz - reach).floor() as isize).max(0);
    let z1 = ((cz + reach).ceil() as isize).min(max_z);
    if x0 > x1 || z0 > z1 {
        return;
    }

    let (sin, cos) = rotation.sin_cos();
    for z in z0..=z1 {
        for x in x0..=x1 {
            let dx = x as f64 - cx;
            let dz = z as f64 - cz;
            // Rotate into decal space
            let local_x = dx * cos + dz * sin;
            let local_z = -dx * sin + dz * cos;
            let u = 0.5 + local_x / (2.0 * radius);
            let v = 0.5 + local_z / (2.0 * radius);
            let value = decal.sample(u, v);
            if value != 0.0 {
                let (x, z) = (x as usize, z as usize);
                let h = height.get(x, z);
                height.set(x, z, blend.apply(h, amplitude * value, 1.0));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::env;

    #[test]
    fn test_procedural_shapes() {
        assert_approx_eq!(Decal::Cone.sample(0.5, 0.5), 1.0);
        assert_approx_eq!(Decal::Dome.sample(0.5, 0.5), 1.0);
        assert_approx_eq!(Decal::Cone.sample(0.0, 0.0), 0.0);
        assert_approx_eq!(Decal::Dome.sample(1.0, 0.5), 0.0);
        // Crater is sunken in the middle and raised near the rim
        assert!(Decal::Crater.sample(0.5, 0.5) < 0.0);
        assert!(Decal::Crater.sample(0.875, 0.5) > 0.5);
        // Ridge is high along its spine, low off to the side
        assert!(Decal::Ridge.sample(0.7, 0.5) > 0.9);
        assert_approx_eq!(Decal::Ridge.sample(0.5, 0.0), 0.0);
        // Outside the unit square
        assert_eq!(Decal::Dome.sample(1.2, 0.5), 0.0);
    }

    #[test]
    fn test_raw_decal() {
        let path = env::temp_dir().join("terra_region_decal_test.r16");
        // 2x2: 0, 65535 / 65535, 0
        let bytes: Vec<u8> = [0u16, 65535, 65535, 0]
            .iter()
            .flat_map(|v| v.to_le_bytes().to_vec())
            .collect();
        fs::write(&path, bytes).unwrap();

        let config = DecalConfig::Raw {
            path: path.clone(),
            size: 2,
        };
        let decal = Decal::load(&config, FailurePolicy::Strict).unwrap();
        assert_approx_eq!(decal.sample(0.0, 0.0), 0.0);
        assert_approx_eq!(decal.sample(1.0, 0.0), 1.0);
        assert_approx_eq!(decal.sample(0.5, 0.5), 0.5);

        // Wrong declared size
        let config = DecalConfig::Raw { path, size: 3 };
        assert!(Decal::load(&config, FailurePolicy::Strict).is_err());
        assert!(matches!(
            Decal::load(&config, FailurePolicy::Degrade).unwrap(),
            Decal::Missing
        ));
    }

    #[test]
    fn test_stamp() {
        let dome = |grid: &mut Grid<f32>, rotation| {
            let (decal, blend) = (&Decal::Dome, BlendMode::Add);
            stamp(grid, (4.0, 4.0), 4.0, rotation, decal, 2.0, blend)
        };
        let mut grid = Grid::new(9, 9, 0.0f32);
        dome(&mut grid, 0.3);
        assert_approx_eq!(grid.get(4, 4), 2.0);
        assert_eq!(grid.get(0, 0), 0.0);
        // Radially symmetric, so rotation doesn't matter at the center
        let mut rotated = Grid::new(9, 9, 0.0f32);
        dome(&mut rotated, 1.3);
        assert_approx_eq!(rotated.get(4, 4), 2.0);

        // Way off the grid is a no-op
        let mut grid = Grid::new(4, 4, 1.0f32);
        let center = (-50.0, 3.0);
        stamp(&mut grid, center, 2.0, 0.0, &Decal::Cone, 5.0, BlendMode::Add);
        assert!(grid.data().iter().all(|h| *h == 1.0));
    }
}
