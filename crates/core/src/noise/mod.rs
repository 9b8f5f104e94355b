//! Stateless noise kernels. Every kernel here is a pure function of its
//! seed, its parameters and the *world* coordinates it's sampled at. Two
//! regions that sample overlapping coordinates get bit-identical values in
//! the overlap, which is what keeps region borders seamless.

mod cellular;
mod fractal;
mod warp;

pub use self::{
    cellular::{CellStyle, Cellular, DistanceMetric},
    fractal::{max_amplitude, Fractal, OctaveShape},
    warp::DomainWarp,
};

use crate::{
    config::{NoiseFnConfig, NoiseFnType},
    grid::{CoordGrid, Grid},
    seed,
};

/// World coordinates are in meters but noise frequencies are configured in
/// cycles per kilometer, so inputs get scaled down by this factor
pub const INPUT_SCALE: f64 = 1000.0;

/// Salt used to derive the warp seed from the kernel seed, so the warp field
/// is independent of the field being warped
const WARP_SALT: u32 = 0x7761_7270;

#[derive(Clone, Debug)]
enum BaseNoise {
    Fractal(Fractal),
    Cellular(Cellular),
}

/// A configured noise function, ready to be sampled. This wraps whichever
/// base noise the config asks for, plus the optional domain warp.
#[derive(Clone, Debug)]
pub struct NoiseKernel {
    base: BaseNoise,
    warp: Option<DomainWarp>,
}

impl NoiseKernel {
    pub fn new(seed: u32, config: &NoiseFnConfig) -> Self {
        let fractal = |shape| {
            BaseNoise::Fractal(Fractal::new(
                seed,
                config.frequency,
                config.octaves,
                config.lacunarity,
                config.gain,
                shape,
            ))
        };
        let base = match config.noise_type {
            NoiseFnType::Fbm => fractal(OctaveShape::Standard),
            NoiseFnType::Ridged => fractal(OctaveShape::Ridged),
            NoiseFnType::Billow => fractal(OctaveShape::Billow),
            NoiseFnType::Voronoi => BaseNoise::Cellular(Cellular::new(
                seed,
                config.frequency,
                config.voronoi.metric,
                config.voronoi.style,
                config.voronoi.jitter,
                config.voronoi.width,
            )),
        };
        let warp = config
            .warp
            .filter(|warp| warp.iterations > 0)
            .map(|warp| DomainWarp::new(seed::mix(seed, WARP_SALT), warp));
        Self { base, warp }
    }

    /// The range every output of [Self::sample] falls within
    pub fn output_range(&self) -> (f64, f64) {
        match &self.base {
            BaseNoise::Fractal(fractal) => fractal.output_range(),
            BaseNoise::Cellular(_) => (0.0, 1.0),
        }
    }

    /// Sample at a world position, in meters
    pub fn sample(&self, x: f64, z: f64) -> f64 {
        let (x, z) = match &self.warp {
            Some(warp) => warp.apply(x, z),
            None => (x, z),
        };
        let (x_km, z_km) = (x / INPUT_SCALE, z / INPUT_SCALE);
        match &self.base {
            BaseNoise::Fractal(fractal) => fractal.sample(x_km, z_km),
            BaseNoise::Cellular(cellular) => cellular.sample(x_km, z_km),
        }
    }

    /// Sample at a world position, mapped to `[0, 1]`
    pub fn sample_unit(&self, x: f64, z: f64) -> f64 {
        let (lo, hi) = self.output_range();
        ((self.sample(x, z) - lo) / (hi - lo)).clamp(0.0, 1.0)
    }

    /// Evaluate over a whole coordinate lattice. Rows are computed in
    /// parallel; every cell is independent so the result doesn't depend on
    /// scheduling.
    pub fn grid(&self, coords: &CoordGrid) -> Grid<f32> {
        let mut grid = Grid::new(coords.width, coords.height, 0.0);
        grid.par_fill_with(|col, row| {
            self.sample(coords.x(col), coords.z(row)) as f32
        });
        grid
    }

    /// Like [Self::grid], but every value is mapped to `[0, 1]`
    pub fn grid_unit(&self, coords: &CoordGrid) -> Grid<f32> {
        let mut grid = Grid::new(coords.width, coords.height, 0.0);
        grid.par_fill_with(|col, row| {
            self.sample_unit(coords.x(col), coords.z(row)) as f32
        });
        grid
    }
}

/// Parameters for a bare fBm field, for stages that need plain fractal
/// noise without building a full [NoiseFnConfig]
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FbmParams {
    /// Frequency of the first octave, in cycles per kilometer
    pub frequency: f64,
    pub octaves: usize,
    pub lacunarity: f64,
    pub gain: f64,
    /// Use ridged octaves, which gives output in `[0, 1]` instead of
    /// `[-1, 1]`
    pub ridge: bool,
}

impl FbmParams {
    pub fn new(frequency: f64, octaves: usize) -> Self {
        Self {
            frequency,
            octaves,
            lacunarity: 2.0,
            gain: 0.5,
            ridge: false,
        }
    }
}

/// Normalized fBm over a coordinate lattice
pub fn fbm(seed: u32, coords: &CoordGrid, params: FbmParams) -> Grid<f32> {
    let shape = if params.ridge {
        OctaveShape::Ridged
    } else {
        OctaveShape::Standard
    };
    let fractal = Fractal::new(
        seed,
        params.frequency,
        params.octaves,
        params.lacunarity,
        params.gain,
        shape,
    );
    let mut grid = Grid::new(coords.width, coords.height, 0.0);
    grid.par_fill_with(|col, row| {
        let x_km = coords.x(col) / INPUT_SCALE;
        let z_km = coords.z(row) / INPUT_SCALE;
        fractal.sample(x_km, z_km) as f32
    });
    grid
}
