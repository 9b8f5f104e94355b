use crate::{
    config::{NoiseFnConfig, NoiseFnType},
    elevation::{ApplyStep, ElevationContext, StepSeeds},
    grid::Grid,
    noise::NoiseKernel,
    util::{lerp, smoothstep},
};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Cut the terrain into ledges. Each band of `step_height_m` gets a flat
/// tread and a steep riser. Two masks keep this from looking mechanical: a
/// low-frequency break noise decides where terraces form at all, and a
/// curvature mask keeps them off sharp convex features like ridge lines.
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TerracingStep {
    /// Vertical distance between ledges, in meters
    #[validate(range(min = 0.1))]
    pub step_height_m: f32,
    /// How much of the terraced shape to blend in, in `[0, 1]`
    #[validate(range(min = 0.0, max = 1.0))]
    pub strength: f32,
    /// 0 gives gentle ramps between ledges, 1 gives vertical risers
    #[validate(range(min = 0.0, max = 1.0))]
    pub sharpness: f32,
    #[validate]
    pub break_noise: NoiseFnConfig,
    /// Terraces only form where the break noise (in `[0, 1]`) is above this
    #[validate(range(min = 0.0, max = 1.0))]
    pub break_threshold: f32,
    /// Convexity (negative Laplacian, in 1/m) at which terraces are fully
    /// suppressed
    pub curvature_limit: f32,
}

impl Default for TerracingStep {
    fn default() -> Self {
        Self {
            step_height_m: 24.0,
            strength: 0.5,
            sharpness: 0.6,
            break_noise: NoiseFnConfig {
                noise_type: NoiseFnType::Fbm,
                octaves: 3,
                frequency: 2.0,
                ..NoiseFnConfig::default()
            },
            break_threshold: 0.35,
            curvature_limit: 0.05,
        }
    }
}

/// Snap a height onto a ledge profile. Within each band the height stays on
/// the lower tread, then climbs to the next tread over the top
/// `1 - sharpness` of the band.
pub fn terrace(height: f32, step: f32, sharpness: f32) -> f32 {
    if step <= 0.0 {
        return height;
    }
    let base = (height / step).floor() * step;
    let t = (height - base) / step;
    base + step * smoothstep(sharpness.clamp(0.0, 1.0), 1.0, t)
}

/// Discrete Laplacian with clamped edges, in height units per square meter
fn laplacian(height: &Grid<f32>, cell_size: f64) -> Grid<f32> {
    let area = (cell_size * cell_size) as f32;
    let mut out = Grid::new(height.width(), height.height(), 0.0);
    out.par_fill_with(|x, z| {
        let (xi, zi) = (x as isize, z as isize);
        let sum = height.get_clamped(xi + 1, zi)
            + height.get_clamped(xi - 1, zi)
            + height.get_clamped(xi, zi + 1)
            + height.get_clamped(xi, zi - 1);
        (sum - 4.0 * height.get(x, z)) / area
    });
    out
}

impl ApplyStep for TerracingStep {
    fn apply(
        &self,
        context: &mut ElevationContext,
        seeds: StepSeeds,
    ) -> anyhow::Result<()> {
        let breaks = NoiseKernel::new(seeds.noise, &self.break_noise)
            .grid_unit(&context.coords);
        let curvature = laplacian(&context.height, context.cell_size);
        let source = context.height.clone();
        let th = self.break_threshold;

        context.height.par_fill_with(|x, z| {
            let h = source.get(x, z);
            let convexity = (-curvature.get(x, z)).max(0.0);
            let curvature_mask =
                1.0 - smoothstep(0.0, self.curvature_limit, convexity);
            let break_mask =
                smoothstep(th - 0.1, th + 0.1, breaks.get(x, z));
            let terraced = terrace(h, self.step_height_m, self.sharpness);
            let weight = self.strength * curvature_mask * break_mask;
            lerp(h, terraced, weight)
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{FailurePolicy, HeightRange},
        grid::CoordGrid,
    };
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_terrace_profile() {
        // Fully sharp: everything in a band sits on its tread
        assert_approx_eq!(terrace(37.0, 10.0, 1.0), 30.0);
        assert_approx_eq!(terrace(30.0, 10.0, 1.0), 30.0);
        // Soft: the midpoint of the riser is halfway up the band
        assert_approx_eq!(terrace(35.0, 10.0, 0.0), 35.0);
        assert_approx_eq!(terrace(32.0, 10.0, 0.6), 30.0);
        assert!(terrace(39.0, 10.0, 0.6) > 38.0);
        // Negative heights step down, not toward zero
        assert_approx_eq!(terrace(-3.0, 10.0, 1.0), -10.0);
        // Degenerate step height is a no-op
        assert_approx_eq!(terrace(12.3, 0.0, 0.5), 12.3);
    }

    #[test]
    fn test_laplacian() {
        // A bump in the middle of flat ground is strongly convex
        let mut grid = Grid::new(5, 5, 0.0f32);
        grid.set(2, 2, 4.0);
        let lap = laplacian(&grid, 2.0);
        assert_approx_eq!(lap.get(2, 2), -4.0);
        assert_approx_eq!(lap.get(2, 1), 1.0);
        assert_approx_eq!(lap.get(0, 0), 0.0);
    }

    #[test]
    fn test_terracing_step() {
        let coords = CoordGrid::new(0, 0, 16, 16, 4.0);
        let mut context = ElevationContext::new(
            coords,
            1,
            2,
            HeightRange::default(),
            FailurePolicy::Strict,
        );
        // A gentle ramp, so the curvature mask is wide open
        context.height.par_fill_with(|x, _| 100.0 + x as f32);
        let before = context.height.clone();

        // Break threshold of -1 means the break mask is always on
        let step = TerracingStep {
            strength: 1.0,
            sharpness: 1.0,
            step_height_m: 8.0,
            break_threshold: -1.0,
            ..TerracingStep::default()
        };
        let seeds = StepSeeds { noise: 5, local: 6 };
        step.apply(&mut context, seeds).unwrap();
        for x in 1..15 {
            let expected = (before.get(x, 3) / 8.0).floor() * 8.0;
            assert_approx_eq!(context.height.get(x, 3), expected);
        }

        // Strength 0 leaves everything alone
        let mut context = ElevationContext {
            height: before.clone(),
            ..context
        };
        let step = TerracingStep {
            strength: 0.0,
            ..TerracingStep::default()
        };
        step.apply(&mut context, seeds).unwrap();
        assert_eq!(context.height, before);
    }
}
