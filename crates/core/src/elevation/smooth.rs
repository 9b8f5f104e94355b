use crate::{
    elevation::{ApplyStep, ElevationContext, StepSeeds},
    grid::{Grid, NEIGHBORS_8},
    util::{lerp, smoothstep},
};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Low-pass filter the terrain, but only where it's fairly flat. Steep
/// ground (cliffs, terrace risers) keeps its detail.
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SelectiveSmoothingStep {
    /// Slopes up to this angle get smoothed at full strength
    #[validate(range(min = 0.0, max = 90.0))]
    pub max_slope_deg: f32,
    /// Smoothing fades out over this many degrees above `max_slope_deg`
    #[validate(range(min = 0.0))]
    pub fade_deg: f32,
    /// Box blur radius, in cells
    #[validate(range(max = 32))]
    pub radius: usize,
    #[validate(range(max = 64))]
    pub iterations: u32,
    #[validate(range(min = 0.0, max = 1.0))]
    pub strength: f32,
}

impl Default for SelectiveSmoothingStep {
    fn default() -> Self {
        Self {
            max_slope_deg: 15.0,
            fade_deg: 5.0,
            radius: 2,
            iterations: 1,
            strength: 0.7,
        }
    }
}

impl ApplyStep for SelectiveSmoothingStep {
    fn apply(
        &self,
        context: &mut ElevationContext,
        _seeds: StepSeeds,
    ) -> anyhow::Result<()> {
        // The mask comes from the original slope, so repeated passes can't
        // creep into steep ground
        let slope = context.height.slope_degrees(context.cell_size);
        let low = self.max_slope_deg;
        let weights = slope.par_map(|s| {
            self.strength * (1.0 - smoothstep(low, low + self.fade_deg, s))
        });

        for _ in 0..self.iterations {
            let blurred = context.height.box_blur(self.radius);
            let source = context.height.clone();
            context.height.par_fill_with(|x, z| {
                lerp(source.get(x, z), blurred.get(x, z), weights.get(x, z))
            });
        }
        Ok(())
    }
}

/// Simple thermal erosion: material slides downhill wherever the drop to a
/// neighbor exceeds the talus angle. Each pass moves material between pairs
/// of cells, so the total volume is conserved.
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ThermalErosionStep {
    #[validate(range(max = 1000))]
    pub iterations: u32,
    /// Steepest stable slope, in degrees
    #[validate(range(min = 0.0, max = 90.0))]
    pub talus_deg: f32,
    /// Fraction of the excess drop moved per pass, in `[0, 1]`
    #[validate(range(min = 0.0, max = 1.0))]
    pub rate: f32,
}

impl Default for ThermalErosionStep {
    fn default() -> Self {
        Self {
            iterations: 5,
            talus_deg: 35.0,
            rate: 0.25,
        }
    }
}

impl ThermalErosionStep {
    fn erode_once(&self, height: &Grid<f32>, cell_size: f64) -> Grid<f32> {
        let talus = self.talus_deg.to_radians().tan() * cell_size as f32;
        let rate = self.rate.clamp(0.0, 1.0) / 8.0;
        let mut out = Grid::new(height.width(), height.height(), 0.0);
        out.par_fill_with(|x, z| {
            let h = height.get(x, z);
            let mut delta = 0.0;
            for (dir, nx, nz) in height.neighbors8(x, z) {
                let (dx, dz) = NEIGHBORS_8[dir];
                let limit = if dx != 0 && dz != 0 {
                    talus * std::f32::consts::SQRT_2
                } else {
                    talus
                };
                // Gather both directions: what slides out of this cell and
                // what slides in from the neighbor
                let diff = h - height.get(nx, nz);
                if diff > limit {
                    delta -= rate * (diff - limit);
                } else if -diff > limit {
                    delta += rate * (-diff - limit);
                }
            }
            h + delta
        });
        out
    }
}

impl ApplyStep for ThermalErosionStep {
    fn apply(
        &self,
        context: &mut ElevationContext,
        _seeds: StepSeeds,
    ) -> anyhow::Result<()> {
        for _ in 0..self.iterations {
            context.height =
                self.erode_once(&context.height, context.cell_size);
        }
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

    fn context(size: usize) -> ElevationContext {
        let coords = CoordGrid::new(0, 0, size, size, 1.0);
        ElevationContext::new(
            coords,
            0,
            0,
            HeightRange::default(),
            FailurePolicy::Strict,
        )
    }

    const SEEDS: StepSeeds = StepSeeds { noise: 0, local: 0 };

    #[test]
    fn test_smoothing_skips_cliffs() {
        // Gentle bumps on the left half, a 50m wall on the right
        let mut context = context(16);
        context.height.par_fill_with(|x, z| {
            let bump = if (x + z) % 2 == 0 { 0.2 } else { 0.0 };
            if x >= 8 {
                50.0 + bump
            } else {
                bump
            }
        });
        let before = context.height.clone();
        SelectiveSmoothingStep::default()
            .apply(&mut context, SEEDS)
            .unwrap();

        // The wall itself is untouched
        assert_eq!(context.height.get(7, 5), before.get(7, 5));
        assert_eq!(context.height.get(8, 5), before.get(8, 5));
        // The flat part got smoother
        let roughness = |grid: &Grid<f32>| {
            (0..4)
                .map(|x| (grid.get(x, 4) - grid.get(x + 1, 4)).abs())
                .sum::<f32>()
        };
        assert!(roughness(&context.height) < roughness(&before) * 0.7);
    }

    #[test]
    fn test_thermal_erosion_conserves_mass() {
        let mut context = context(12);
        context.height.set(6, 6, 40.0);
        let total_before: f64 =
            context.height.data().iter().map(|h| *h as f64).sum();
        ThermalErosionStep::default()
            .apply(&mut context, SEEDS)
            .unwrap();
        let total_after: f64 =
            context.height.data().iter().map(|h| *h as f64).sum();
        assert_approx_eq!(total_before, total_after, 1e-3);
        // The spike slumped into its neighbors
        assert!(context.height.get(6, 6) < 40.0);
        assert!(context.height.get(5, 6) > 0.0);
    }

    #[test]
    fn test_thermal_erosion_stable_below_talus() {
        // A 10 degree ramp is well below the talus angle, so nothing moves
        let mut context = context(8);
        let rise = 10f32.to_radians().tan();
        context.height.par_fill_with(|x, _| x as f32 * rise);
        let before = context.height.clone();
        ThermalErosionStep::default()
            .apply(&mut context, SEEDS)
            .unwrap();
        assert_eq!(context.height, before);
    }
}
