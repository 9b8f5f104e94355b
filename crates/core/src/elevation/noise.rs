use crate::{
    config::NoiseFnConfig,
    elevation::{
        decal::{Decal, DecalConfig},
        ApplyStep, BlendMode, ElevationContext, MaskConfig, StepSeeds,
    },
    noise::NoiseKernel,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// How a [NoiseStep] combines with the existing height
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseMode {
    Add,
    Replace,
}

impl Default for NoiseMode {
    fn default() -> Self {
        Self::Add
    }
}

/// Sample a noise function over the whole grid. The contribution of each
/// cell is `offset_m + amplitude_m * noise`, where `noise` is the raw
/// kernel output (`[-1, 1]` for fBm).
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct NoiseStep {
    #[validate]
    pub noise: NoiseFnConfig,
    pub amplitude_m: f32,
    pub offset_m: f32,
    pub mode: NoiseMode,
}

impl Default for NoiseStep {
    fn default() -> Self {
        Self {
            noise: NoiseFnConfig::default(),
            amplitude_m: 100.0,
            offset_m: 0.0,
            mode: NoiseMode::Add,
        }
    }
}

impl ApplyStep for NoiseStep {
    fn apply(
        &self,
        context: &mut ElevationContext,
        seeds: StepSeeds,
    ) -> anyhow::Result<()> {
        let field = NoiseKernel::new(seeds.noise, &self.noise)
            .grid(&context.coords);
        let (amplitude, offset, mode) =
            (self.amplitude_m, self.offset_m, self.mode);
        context
            .height
            .data_mut()
            .par_iter_mut()
            .zip(field.data().par_iter())
            .for_each(|(h, n)| {
                let value = offset + amplitude * n;
                *h = match mode {
                    NoiseMode::Add => *h + value,
                    NoiseMode::Replace => value,
                };
            });
        Ok(())
    }
}

/// Noise that only applies within a band of the existing terrain, e.g.
/// ridges on the high ground. The noise is mapped to `[0, 1]` first, so with
/// [BlendMode::Add] this only ever raises terrain.
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MaskedNoiseStep {
    #[validate]
    pub mask: MaskConfig,
    #[validate]
    pub noise: NoiseFnConfig,
    pub amplitude_m: f32,
    pub blend: BlendMode,
}

impl Default for MaskedNoiseStep {
    fn default() -> Self {
        Self {
            mask: MaskConfig::default(),
            noise: NoiseFnConfig::default(),
            amplitude_m: 50.0,
            blend: BlendMode::Add,
        }
    }
}

impl ApplyStep for MaskedNoiseStep {
    fn apply(
        &self,
        context: &mut ElevationContext,
        seeds: StepSeeds,
    ) -> anyhow::Result<()> {
        let field = NoiseKernel::new(seeds.noise, &self.noise)
            .grid_unit(&context.coords);
        let range = context.height_range;
        let (mask, amplitude, blend) =
            (self.mask, self.amplitude_m, self.blend);
        context
            .height
            .data_mut()
            .par_iter_mut()
            .zip(field.data().par_iter())
            .for_each(|(h, n)| {
                let weight = mask.weight(range.normalize(*h));
                *h = blend.apply(*h, amplitude * n, weight);
            });
        Ok(())
    }
}

/// Tile a decal across the world, weighted by a height mask. The tiling is
/// anchored to world coordinates, so neighboring regions see the same
/// pattern.
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MaskedStampStep {
    #[validate]
    pub mask: MaskConfig,
    pub decal: DecalConfig,
    /// Side length of one decal tile, in meters
    #[validate(range(min = 0.0))]
    pub tile_size_m: f64,
    pub amplitude_m: f32,
    pub blend: BlendMode,
    /// Rotation of the whole tiling, in degrees
    pub rotation_deg: f64,
}

impl Default for MaskedStampStep {
    fn default() -> Self {
        Self {
            mask: MaskConfig::default(),
            decal: DecalConfig::default(),
            tile_size_m: 256.0,
            amplitude_m: 20.0,
            blend: BlendMode::Add,
            rotation_deg: 0.0,
        }
    }
}

impl ApplyStep for MaskedStampStep {
    fn apply(
        &self,
        context: &mut ElevationContext,
        _seeds: StepSeeds,
    ) -> anyhow::Result<()> {
        let decal = Decal::load(&self.decal, context.policy)?;
        let tile = self.tile_size_m.max(context.cell_size);
        let (sin, cos) = self.rotation_deg.to_radians().sin_cos();
        let coords = context.coords;
        let range = context.height_range;
        let (mask, amplitude, blend) =
            (self.mask, self.amplitude_m, self.blend);
        let width = coords.width.max(1);

        context
            .height
            .data_mut()
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, h)| {
                let (x, z) = (coords.x(i % width), coords.z(i / width));
                let rx = x * cos + z * sin;
                let rz = -x * sin + z * cos;
                let u = (rx / tile).rem_euclid(1.0);
                let v = (rz / tile).rem_euclid(1.0);
                let weight = mask.weight(range.normalize(*h));
                *h = blend.apply(*h, amplitude * decal.sample(u, v), weight);
            });
        Ok(())
    }
}
