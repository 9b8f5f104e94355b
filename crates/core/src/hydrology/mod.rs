//! Water: where it flows, where it collects, and where it carves rivers and
//! lakes into the terrain.

mod distance;
mod flow;
mod lakes;
mod rivers;

pub use self::{
    distance::chamfer_distance,
    flow::{
        downstream, flow_accumulation, flow_directions, sink_count,
        D8Direction,
    },
    lakes::{carve_lakes, LakeOutput, LakeSite},
    rivers::{carve_rivers, RiverOutput},
};

use crate::{
    config::RiverConfig,
    grid::{CoordGrid, Grid},
};

/// Everything the river stage produces. Flow routing is computed after
/// the rivers are carved, so it describes the final terrain.
#[derive(Clone, Debug)]
pub struct Hydrology {
    pub directions: Grid<Option<D8Direction>>,
    pub accumulation: Grid<u32>,
    pub rivers: RiverOutput,
}

impl Hydrology {
    /// Carve rivers, then route flow over the result
    pub fn run(
        height: &mut Grid<f32>,
        coords: &CoordGrid,
        config: &RiverConfig,
        sea_level: f32,
        seed: u32,
    ) -> anyhow::Result<Self> {
        let rivers = carve_rivers(height, coords, config, sea_level, seed)?;
        let directions = flow_directions(height);
        let accumulation = flow_accumulation(height, &directions)?;
        Ok(Self {
            directions,
            accumulation,
            rivers,
        })
    }

    /// Summary numbers, as `(name, value)`
    pub fn metrics(&self) -> Vec<(&'static str, f64)> {
        let max_flow = self.accumulation.data().iter().copied().max();
        vec![
            ("max_flow_accumulation", max_flow.unwrap_or(0) as f64),
            ("sink_count", sink_count(&self.directions) as f64),
            ("river_cells", self.rivers.river_cells() as f64),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics() {
        // Tilted plane: everything drains east, off the grid's edge column
        let coords = CoordGrid::new(0, 0, 8, 4, 1.0);
        let mut height = Grid::new(8, 4, 0.0f32);
        height.par_fill_with(|x, _| 100.0 - x as f32);
        let config = RiverConfig {
            enabled: false,
            ..RiverConfig::default()
        };
        let hydrology =
            Hydrology::run(&mut height, &coords, &config, 0.0, 1).unwrap();
        let metrics = hydrology.metrics();
        assert_eq!(metrics[0], ("max_flow_accumulation", 8.0));
        assert_eq!(metrics[1], ("sink_count", 4.0));
        assert_eq!(metrics[2], ("river_cells", 0.0));
    }
}
