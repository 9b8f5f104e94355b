use crate::{
    elevation::{
        decal::{stamp, Decal, DecalConfig},
        ApplyStep, BlendMode, ElevationContext, StepSeeds,
    },
    grid::Grid,
    util::cmp_partial,
};
use nalgebra::Vector2;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use serde::{Deserialize, Serialize};
use validator::Validate;
use std::f64::consts::{FRAC_PI_4, TAU};

/// Where each walker begins
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalkerStart {
    /// The highest cell in the grid
    Highest,
    /// The lowest cell in the grid
    Lowest,
    /// One of the four corners, picked at random
    Corner,
    /// Any cell, picked at random
    Random,
}

/// The path each walker takes from its start point
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalkerRoute {
    /// Wander, turning up to 45 degrees between steps
    RandomWalk,
    /// Circle around the start point
    Perimeter,
}

/// Release a few agents that wander over the terrain, stamping a decal at
/// every point they visit. Walkers draw from the region-local seed, so
/// their routes differ between regions and aren't continuous across region
/// borders.
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct WalkerStampedeStep {
    #[validate(range(max = 256))]
    pub walkers: u32,
    pub start: WalkerStart,
    pub route: WalkerRoute,
    /// Number of stamps per walker
    #[validate(range(max = 10_000))]
    pub steps: u32,
    /// Distance between stamps, in meters
    #[validate(range(min = 0.0))]
    pub step_length_m: f64,
    /// Only used for [WalkerRoute::Perimeter]
    #[validate(range(min = 0.0))]
    pub perimeter_radius_m: f64,
    /// Half-width of each stamp, in meters
    #[validate(range(min = 0.0, max = 10_000.0))]
    pub stamp_radius_m: f64,
    pub amplitude_m: f32,
    pub decal: DecalConfig,
    pub blend: BlendMode,
}

impl Default for WalkerStampedeStep {
    fn default() -> Self {
        Self {
            walkers: 3,
            start: WalkerStart::Random,
            route: WalkerRoute::RandomWalk,
            steps: 24,
            step_length_m: 12.0,
            perimeter_radius_m: 80.0,
            stamp_radius_m: 16.0,
            amplitude_m: 6.0,
            decal: DecalConfig::default(),
            blend: BlendMode::Add,
        }
    }
}

impl WalkerStampedeStep {
    /// Pick a start point, in cell coordinates
    fn start_point(
        &self,
        height: &Grid<f32>,
        rng: &mut impl Rng,
    ) -> Vector2<f64> {
        let max_x = height.width().saturating_sub(1);
        let max_z = height.height().saturating_sub(1);
        let extreme = |find_max: bool| {
            let iter = height.data().iter().enumerate();
            let index = if find_max {
                iter.max_by(|(_, a), (_, b)| cmp_partial(*a, *b))
            } else {
                iter.min_by(|(_, a), (_, b)| cmp_partial(*a, *b))
            }
            .map(|(i, _)| i)
            .unwrap_or(0);
            height.coords_of(index)
        };
        let (x, z) = match self.start {
            WalkerStart::Highest => extreme(true),
            WalkerStart::Lowest => extreme(false),
            WalkerStart::Corner => {
                let corner = rng.gen_range(0..4);
                (
                    if corner & 1 == 0 { 0 } else { max_x },
                    if corner & 2 == 0 { 0 } else { max_z },
                )
            }
            WalkerStart::Random => {
                (rng.gen_range(0..=max_x), rng.gen_range(0..=max_z))
            }
        };
        Vector2::new(x as f64, z as f64)
    }

    /// Build the list of stamp points for one walker, in cell coordinates.
    /// Points are kept inside the grid.
    fn route(
        &self,
        start: Vector2<f64>,
        bounds: Vector2<f64>,
        cell_size: f64,
        rng: &mut impl Rng,
    ) -> Vec<Vector2<f64>> {
        let clamp = |p: Vector2<f64>| {
            Vector2::new(p.x.clamp(0.0, bounds.x), p.y.clamp(0.0, bounds.y))
        };
        let step = self.step_length_m / cell_size;
        match self.route {
            WalkerRoute::RandomWalk => {
                let mut heading = rng.gen_range(0.0..TAU);
                let mut position = start;
                let mut points = Vec::with_capacity(self.steps as usize);
                for _ in 0..self.steps {
                    points.push(position);
                    heading += rng.gen_range(-FRAC_PI_4..FRAC_PI_4);
                    let direction = Vector2::new(heading.cos(), heading.sin());
                    position = clamp(position + direction * step);
                }
                points
            }
            WalkerRoute::Perimeter => {
                let radius = self.perimeter_radius_m / cell_size;
                let phase = rng.gen_range(0.0..TAU);
                let count = self.steps.max(1) as f64;
                (0..self.steps)
                    .map(|i| {
                        let angle = phase + TAU * i as f64 / count;
                        let offset = Vector2::new(angle.cos(), angle.sin());
                        clamp(start + offset * radius)
                    })
                    .collect()
            }
        }
    }
}

impl ApplyStep for WalkerStampedeStep {
    fn apply(
        &self,
        context: &mut ElevationContext,
        seeds: StepSeeds,
    ) -> anyhow::Result<()> {
        let decal = Decal::load(&self.decal, context.policy)?;
        if let Decal::Missing = decal {
            // Nothing to stamp
            return Ok(());
        }

        let mut rng = Pcg64::seed_from_u64(seeds.local as u64);
        let bounds = Vector2::new(
            context.height.width().saturating_sub(1) as f64,
            context.height.height().saturating_sub(1) as f64,
        );
        let radius = self.stamp_radius_m / context.cell_size;
        for _ in 0..self.walkers {
            let start = self.start_point(&context.height, &mut rng);
            let points =
                self.route(start, bounds, context.cell_size, &mut rng);
            for point in points {
                let rotation = rng.gen_range(0.0..TAU);
                stamp(
                    &mut context.height,
                    (point.x, point.y),
                    radius,
                    rotation,
                    &decal,
                    self.amplitude_m,
                    self.blend,
                );
            }
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

    fn context() -> ElevationContext {
        let coords = CoordGrid::new(0, 0, 48, 48, 2.0);
        ElevationContext::new(
            coords,
            1,
            2,
            HeightRange::default(),
            FailurePolicy::Degrade,
        )
    }

    fn run(step: &WalkerStampedeStep, local: u32) -> Grid<f32> {
        let mut context = context();
        step.apply(&mut context, StepSeeds { noise: 0, local })
            .unwrap();
        context.height
    }

    #[test]
    fn test_deterministic_per_seed() {
        let step = WalkerStampedeStep::default();
        let a = run(&step, 17);
        assert_eq!(a, run(&step, 17));
        assert_ne!(a, run(&step, 18));
        // Dome stamps with Add only ever raise the ground
        assert!(a.data().iter().all(|h| *h >= 0.0));
        assert!(a.data().iter().any(|h| *h > 0.0));
    }

    #[test]
    fn test_perimeter_route() {
        let step = WalkerStampedeStep {
            route: WalkerRoute::Perimeter,
            steps: 8,
            perimeter_radius_m: 20.0,
            ..WalkerStampedeStep::default()
        };
        let mut rng = Pcg64::seed_from_u64(3);
        let start = Vector2::new(24.0, 24.0);
        let bounds = Vector2::new(47.0, 47.0);
        let points = step.route(start, bounds, 2.0, &mut rng);
        assert_eq!(points.len(), 8);
        for point in points {
            // 20m at 2m per cell
            assert!(((point - start).norm() - 10.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_random_walk_stays_in_bounds() {
        let step = WalkerStampedeStep {
            steps: 200,
            step_length_m: 30.0,
            ..WalkerStampedeStep::default()
        };
        let mut rng = Pcg64::seed_from_u64(99);
        let bounds = Vector2::new(47.0, 47.0);
        let points =
            step.route(Vector2::new(0.0, 0.0), bounds, 2.0, &mut rng);
        assert!(points.iter().all(|p| (0.0..=47.0).contains(&p.x)
            && (0.0..=47.0).contains(&p.y)));
    }

    #[test]
    fn test_start_points() {
        let mut height = Grid::new(4, 3, 0.0f32);
        height.set(2, 1, 9.0);
        height.set(3, 2, -4.0);
        let mut rng = Pcg64::seed_from_u64(0);
        let start = |start| {
            WalkerStampedeStep {
                start,
                ..WalkerStampedeStep::default()
            }
        };
        assert_eq!(
            start(WalkerStart::Highest).start_point(&height, &mut rng),
            Vector2::new(2.0, 1.0)
        );
        assert_eq!(
            start(WalkerStart::Lowest).start_point(&height, &mut rng),
            Vector2::new(3.0, 2.0)
        );
        let corner = start(WalkerStart::Corner).start_point(&height, &mut rng);
        assert!(corner.x == 0.0 || corner.x == 3.0);
        assert!(corner.y == 0.0 || corner.y == 2.0);
    }
}
