use crate::grid::Grid;
use anyhow::ensure;
use fnv::FnvHashMap;
use serde::Serialize;

/// Statistics for one layer of a region's core (the region minus its halo)
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LayerSeamStats {
    pub layer: String,
    pub mean: f64,
    pub std: f64,
    /// Mean gradient magnitude, in layer units per meter
    pub mean_gradient: f64,
    /// RMS difference along the shared edge with the region to the west.
    /// `None` if that region hasn't been generated yet.
    pub west_rmse: Option<f64>,
    /// Same as [Self::west_rmse], for the region to the north
    pub north_rmse: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SeamReport {
    pub region: (i32, i32),
    pub layers: Vec<LayerSeamStats>,
}

impl SeamReport {
    pub fn layer(&self, name: &str) -> Option<&LayerSeamStats> {
        self.layers.iter().find(|stats| stats.layer == name)
    }

    /// Stats flattened to `(name, value)` pairs, e.g.
    /// `seam.height.west_rmse`
    pub fn metrics(&self) -> Vec<(String, f64)> {
        let mut metrics = Vec::new();
        for stats in &self.layers {
            let name = |stat: &str| format!("seam.{}.{}", stats.layer, stat);
            metrics.push((name("mean"), stats.mean));
            metrics.push((name("std"), stats.std));
            metrics.push((name("mean_gradient"), stats.mean_gradient));
            if let Some(rmse) = stats.west_rmse {
                metrics.push((name("west_rmse"), rmse));
            }
            if let Some(rmse) = stats.north_rmse {
                metrics.push((name("north_rmse"), rmse));
            }
        }
        metrics
    }
}

/// The outermost column and row of one layer of a region's core. These are
/// the cells that the regions to the east and south see in their halos.
#[derive(Clone, Debug)]
struct CoreEdges {
    layer: String,
    east: Vec<f32>,
    south: Vec<f32>,
}

/// Compares each region against the regions to its west and north.
///
/// Each region's halo covers the edge cells of its neighbors' cores. If
/// generation were perfectly seamless, the values a region computes for
/// those cells would match what the neighbor computed for its own core, so
/// the RMS difference between the two is a direct measure of the seam.
/// This never modifies any data.
#[derive(Clone, Debug, Default)]
pub struct SeamAnalyzer {
    /// Core edges of every region analyzed so far
    cache: FnvHashMap<(i32, i32), Vec<CoreEdges>>,
}

impl SeamAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Analyze one region. `layers` are `(name, grid)` pairs, where each
    /// grid is the region's full stitched buffer: `core` cells square, plus
    /// `halo` on every side. The region's own core edges are cached for
    /// its neighbors afterwards.
    pub fn analyze(
        &mut self,
        region: (i32, i32),
        halo: usize,
        core: usize,
        cell_size: f64,
        layers: &[(&str, &Grid<f32>)],
    ) -> anyhow::Result<SeamReport> {
        ensure!(halo > 0 && core > 0, "seam analysis needs a halo and a core");
        let (rx, rz) = region;
        let mut stats = Vec::with_capacity(layers.len());
        let mut edges = Vec::with_capacity(layers.len());

        for (name, grid) in layers {
            let size = core + 2 * halo;
            ensure!(
                grid.width() == size && grid.height() == size,
                "{} grid is {}x{}, expected {}x{}",
                name,
                grid.width(),
                grid.height(),
                size,
                size
            );
            let core_grid = grid.crop(halo, halo, core, core)?;
            let (mean, std) = mean_std(core_grid.data());
            // Gradient over the full buffer, so core edge cells get real
            // central differences from the halo
            let (grad_x, grad_z) = grid.gradient(cell_size);
            let magnitudes: Vec<f32> = (halo..halo + core)
                .flat_map(|z| (halo..halo + core).map(move |x| (x, z)))
                .map(|(x, z)| grad_x.get(x, z).hypot(grad_z.get(x, z)))
                .collect();
            let (mean_gradient, _) = mean_std(&magnitudes);

            // Our view of the neighbors' edge cells, from the halo
            let west_view: Vec<f32> =
                (0..core).map(|z| grid.get(halo - 1, halo + z)).collect();
            let north_view: Vec<f32> = grid.row(halo - 1)[halo..halo + core]
                .to_vec();
            let west_rmse = self
                .edges((rx - 1, rz), name)
                .and_then(|neighbor| rmse(&neighbor.east, &west_view));
            let north_rmse = self
                .edges((rx, rz - 1), name)
                .and_then(|neighbor| rmse(&neighbor.south, &north_view));

            stats.push(LayerSeamStats {
                layer: name.to_string(),
                mean,
                std,
                mean_gradient,
                west_rmse,
                north_rmse,
            });
            edges.push(CoreEdges {
                layer: name.to_string(),
                east: (0..core)
                    .map(|z| grid.get(halo + core - 1, halo + z))
                    .collect(),
                south: grid.row(halo + core - 1)[halo..halo + core].to_vec(),
            });
        }

        self.cache.insert(region, edges);
        Ok(SeamReport {
            region,
            layers: stats,
        })
    }

    fn edges(&self, region: (i32, i32), layer: &str) -> Option<&CoreEdges> {
        self.cache
            .get(&region)?
            .iter()
            .find(|edges| edges.layer == layer)
    }
}

/// Sequential, so the result doesn't depend on thread scheduling
fn mean_std(values: &[f32]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().map(|v| *v as f64).sum::<f64>() / n;
    let variance = values
        .iter()
        .map(|v| (*v as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    (mean, variance.sqrt())
}

/// `None` if the two edges don't line up
fn rmse(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let sum: f64 = a
        .iter()
        .zip(b)
        .map(|(a, b)| (*a as f64 - *b as f64).powi(2))
        .sum();
    Some((sum / a.len() as f64).sqrt())
}
