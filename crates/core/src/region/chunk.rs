use crate::{
    classify::{HexClass, NavKind, OverlayKind, SurfaceKind},
    config::{ObstacleConfig, Preset},
    grid::Grid,
    hex::{HexAggregate, HexGridSpec},
    region::RegionScratch,
    seed::StageSeeds,
};
use anyhow::Context;
use indexmap::IndexMap;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use rayon::prelude::*;

/// The final grids for one chunk
#[derive(Clone, Debug, PartialEq)]
pub struct ChunkLayers {
    /// Meters
    pub height: Grid<f32>,
    /// [SurfaceKind] ids
    pub surface: Grid<u8>,
    /// [NavKind] ids
    pub navigation: Grid<u8>,
    /// [OverlayKind] ids
    pub overlay: Grid<u8>,
}

impl ChunkLayers {
    /// Flat, featureless ground
    pub fn new(size: usize) -> Self {
        Self {
            height: Grid::square(size, 0.0),
            surface: Grid::square(size, SurfaceKind::Default.id()),
            navigation: Grid::square(size, NavKind::Passable.id()),
            overlay: Grid::square(size, OverlayKind::None.id()),
        }
    }

    fn surface_at(&self, index: usize) -> SurfaceKind {
        SurfaceKind::from_id(self.surface.data()[index])
            .unwrap_or(SurfaceKind::Default)
    }

    fn nav_at(&self, index: usize) -> NavKind {
        NavKind::from_id(self.navigation.data()[index])
            .unwrap_or(NavKind::Passable)
    }

    fn overlay_at(&self, index: usize) -> OverlayKind {
        OverlayKind::from_id(self.overlay.data()[index])
            .unwrap_or(OverlayKind::None)
    }
}

/// Everything generated for one chunk. Created empty, then filled in from
/// the region's stitched buffers. Nothing modifies it once it's exported.
#[derive(Clone, Debug)]
pub struct GenResult {
    /// World seed
    pub seed: u64,
    pub cx: i32,
    pub cz: i32,
    /// Side length, in cells
    pub size: usize,
    /// Meters
    pub cell_size: f64,
    pub grid_spec: HexGridSpec,
    pub layers: ChunkLayers,
    pub stage_seeds: StageSeeds,
    pub metrics: IndexMap<String, f64>,
    /// Which layers have been filled in
    pub capabilities: Vec<String>,
    /// Hex aggregation, in first-touched order. Empty unless the
    /// `hexes` capability is present.
    pub hexes: Vec<HexAggregate<HexClass>>,
}

impl GenResult {
    pub fn empty(preset: &Preset, world_seed: u64, cx: i32, cz: i32) -> Self {
        Self {
            seed: world_seed,
            cx,
            cz,
            size: preset.chunk_size,
            cell_size: preset.cell_size,
            grid_spec: preset.grid_spec(),
            layers: ChunkLayers::new(preset.chunk_size),
            stage_seeds: StageSeeds::for_chunk(world_seed, cx, cz),
            metrics: IndexMap::new(),
            capabilities: Vec::new(),
            hexes: Vec::new(),
        }
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// Copy this chunk's window out of the region buffers, whose top-left
    /// corner for this chunk is at `(x0, z0)`
    fn fill_from(
        &mut self,
        scratch: &RegionScratch,
        x0: usize,
        z0: usize,
    ) -> anyhow::Result<()> {
        let size = self.size;
        self.layers = ChunkLayers {
            height: scratch.height.crop(x0, z0, size, size)?,
            surface: scratch.surface.crop(x0, z0, size, size)?,
            navigation: scratch.navigation.crop(x0, z0, size, size)?,
            overlay: scratch.overlay.crop(x0, z0, size, size)?,
        };
        for layer in &["height", "surface", "navigation", "overlay"] {
            self.capabilities.push(layer.to_string());
        }
        self.metrics.insert("mean_height".into(), self.layers.height.mean());
        Ok(())
    }

    /// Scatter small obstacles over passable, featureless land. Uses the
    /// chunk's own seed, so the result doesn't depend on which region (or
    /// thread) the chunk was processed in.
    fn scatter_obstacles(&mut self, config: &ObstacleConfig) -> usize {
        let mut rng = Pcg64::seed_from_u64(self.stage_seeds.obstacles as u64);
        let mut count = 0;
        for i in 0..self.layers.navigation.len() {
            let eligible = self.layers.nav_at(i) == NavKind::Passable
                && self.layers.overlay_at(i) == OverlayKind::None;
            if !eligible {
                continue;
            }
            let density = match self.layers.surface_at(i) {
                SurfaceKind::Forest | SurfaceKind::Jungle => {
                    config.forest_density
                }
                _ => config.base_density,
            };
            // Always draw, so one cell's density can't shift the stream
            let roll: f64 = rng.gen();
            if roll < density {
                self.layers.navigation.data_mut()[i] = NavKind::Obstacle.id();
                count += 1;
            }
        }
        self.metrics.insert("obstacle_cells".into(), count as f64);
        count
    }

    /// Collapse the pixel layers into one record per hex
    fn aggregate_hexes(&mut self) {
        let lookup = self.grid_spec.build_lookup(self.cx, self.cz);
        let layers = &self.layers;
        self.hexes = lookup.aggregate(
            layers.height.data(),
            |i| {
                HexClass::of_pixel(
                    layers.surface_at(i),
                    layers.nav_at(i),
                    layers.overlay_at(i),
                )
            },
            HexClass::priority,
        );
        self.metrics.insert("hex_count".into(), lookup.hex_count() as f64);
        self.capabilities.push("hexes".into());
    }
}

/// Cut a region's stitched buffers into per-chunk results. The halo is
/// dropped. Chunks are returned in row-major order.
pub fn slice_chunks(
    preset: &Preset,
    world_seed: u64,
    (rx, rz): (i32, i32),
    scratch: &RegionScratch,
) -> anyhow::Result<Vec<GenResult>> {
    let n = preset.region_size;
    let chunk_size = preset.chunk_size;
    let chunk_coord =
        |region: i32, offset: usize| region * n as i32 + offset as i32;

    let mut chunks: Vec<GenResult> = (0..n * n)
        .into_par_iter()
        .map(|i| {
            let (cx, cz) = (chunk_coord(rx, i % n), chunk_coord(rz, i / n));
            GenResult::empty(preset, world_seed, cx, cz)
        })
        .collect();

    chunks.par_iter_mut().enumerate().try_for_each(
        |(i, chunk)| -> anyhow::Result<()> {
            // One chunk of halo before the first real chunk
            let x0 = (1 + i % n) * chunk_size;
            let z0 = (1 + i / n) * chunk_size;
            chunk.fill_from(scratch, x0, z0).with_context(|| {
                format!("error slicing chunk ({}, {})", chunk.cx, chunk.cz)
            })?;
            chunk.scatter_obstacles(&preset.obstacles);
            if preset.export.hexes {
                chunk.aggregate_hexes();
            }
            Ok(())
        },
    )?;
    Ok(chunks)
}
