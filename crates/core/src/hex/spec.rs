//! Pixel <-> hex mapping for a particular grid configuration.

use crate::hex::{FractionalHexPoint, HexPoint, HexPointIndexMap};
use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};

/// Which way the hexagons point. Pointy-top hexes have a vertex facing
/// north, flat-top hexes have an edge facing north.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HexOrientation {
    Pointy,
    Flat,
}

impl Default for HexOrientation {
    fn default() -> Self {
        Self::Pointy
    }
}

impl HexOrientation {
    /// Basis matrix that maps axial `(q, r)` to world `(x, z)`, in units of
    /// the hex edge length
    fn forward(self) -> Matrix2<f64> {
        let sqrt3 = 3f64.sqrt();
        match self {
            Self::Pointy => Matrix2::new(sqrt3, sqrt3 / 2.0, 0.0, 1.5),
            Self::Flat => Matrix2::new(1.5, 0.0, sqrt3 / 2.0, sqrt3),
        }
    }

    /// Inverse of [Self::forward]. Written out rather than inverted at
    /// runtime so the exact same constants are used every time.
    fn inverse(self) -> Matrix2<f64> {
        let sqrt3 = 3f64.sqrt();
        match self {
            Self::Pointy => {
                Matrix2::new(sqrt3 / 3.0, -1.0 / 3.0, 0.0, 2.0 / 3.0)
            }
            Self::Flat => {
                Matrix2::new(2.0 / 3.0, 0.0, -1.0 / 3.0, sqrt3 / 3.0)
            }
        }
    }

    /// Distance between adjacent hex centers along `(x, z)`, in units of
    /// the hex edge length
    fn spacing(self) -> (f64, f64) {
        let sqrt3 = 3f64.sqrt();
        match self {
            Self::Pointy => (sqrt3, 1.5),
            Self::Flat => (1.5, sqrt3),
        }
    }
}

/// Number of hex columns/rows needed to cover one chunk
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct HexDims {
    /// Hex edge length, measured in pixels
    pub hex_size_px: f64,
    pub cols: usize,
    pub rows: usize,
}

/// Defines how the pixel grid maps onto the hex grid. Every conversion is a
/// pure function of this spec and global pixel coordinates, so recomputing
/// a pixel's hex always gives the same answer.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HexGridSpec {
    /// Length of one hexagon edge (center to vertex), in meters
    #[serde(rename = "edge_m")]
    pub edge_length_m: f64,
    pub meters_per_pixel: f64,
    /// Side length of a chunk, in pixels
    pub chunk_px: usize,
    #[serde(default)]
    pub orientation: HexOrientation,
}

impl HexGridSpec {
    pub fn new(
        edge_length_m: f64,
        meters_per_pixel: f64,
        chunk_px: usize,
        orientation: HexOrientation,
    ) -> Self {
        Self {
            edge_length_m,
            meters_per_pixel,
            chunk_px,
            orientation,
        }
    }

    /// Derive how many hex columns and rows it takes to cover a chunk. The
    /// +1 accounts for partial hexes that straddle the chunk edges.
    pub fn dimensions(&self) -> HexDims {
        let hex_size_px = self.edge_length_m / self.meters_per_pixel;
        let (dx, dz) = self.orientation.spacing();
        let extent = self.chunk_px as f64;
        HexDims {
            hex_size_px,
            cols: (extent / (dx * hex_size_px)).ceil() as usize + 1,
            rows: (extent / (dz * hex_size_px)).ceil() as usize + 1,
        }
    }

    /// Project a world position (meters) into fractional axial space
    pub fn world_to_axial(&self, x: f64, z: f64) -> FractionalHexPoint {
        let axial = self.orientation.inverse() * Vector2::new(x, z)
            / self.edge_length_m;
        FractionalHexPoint::new(axial.x, axial.y)
    }

    /// Center of a hex cell, in world meters
    pub fn axial_to_world(&self, hex: HexPoint) -> (f64, f64) {
        let world = self.orientation.forward()
            * Vector2::new(hex.q as f64, hex.r as f64)
            * self.edge_length_m;
        (world.x, world.y)
    }

    /// Find the hex containing the center of a global pixel
    pub fn pixel_to_hex(&self, gx: i64, gz: i64) -> HexPoint {
        let x = (gx as f64 + 0.5) * self.meters_per_pixel;
        let z = (gz as f64 + 0.5) * self.meters_per_pixel;
        self.world_to_axial(x, z).round()
    }

    /// Build the pixel -> hex table for one chunk. This is done once per
    /// chunk, then reused for every aggregation over that chunk.
    pub fn build_lookup(&self, cx: i32, cz: i32) -> HexLookup {
        let size = self.chunk_px;
        let gx0 = cx as i64 * size as i64;
        let gz0 = cz as i64 * size as i64;

        let mut cells = Vec::with_capacity(size * size);
        let mut members: HexPointIndexMap<Vec<usize>> =
            HexPointIndexMap::default();
        for z in 0..size {
            for x in 0..size {
                let hex = self.pixel_to_hex(gx0 + x as i64, gz0 + z as i64);
                cells.push(hex);
                members
                    .entry(hex)
                    .or_insert_with(Vec::new)
                    .push(z * size + x);
            }
        }

        HexLookup {
            size,
            cells,
            members,
        }
    }
}

/// Precomputed pixel -> hex table for one chunk
#[derive(Clone, Debug)]
pub struct HexLookup {
    size: usize,
    /// The hex for each pixel, row-major
    cells: Vec<HexPoint>,
    /// Pixel indexes covered by each hex, in first-touched order
    members: HexPointIndexMap<Vec<usize>>,
}

/// One hex cell's summary of the pixels it covers
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HexAggregate<K> {
    pub point: HexPoint,
    /// The dominant class among the covered pixels
    pub class: K,
    /// Mean height of the covered pixels
    pub height: f32,
    pub pixels: usize,
}

impl HexLookup {
    /// Side length of the chunk this table covers
    pub fn size(&self) -> usize {
        self.size
    }

    /// The hex containing a pixel, by local chunk coordinates
    pub fn hex_at(&self, x: usize, z: usize) -> HexPoint {
        self.cells[z * self.size + x]
    }

    /// Number of distinct hexes touched by this chunk
    pub fn hex_count(&self) -> usize {
        self.members.len()
    }

    /// Collapse pixel-level data into one record per hex. `class_of` maps a
    /// pixel index to its class, and `priority` ranks classes. A hex takes
    /// the class with the highest priority among its pixels, so a single
    /// high-priority pixel is enough to mark the whole hex. Classes with equal
    /// priority are resolved by pixel count (then by first appearance).
    pub fn aggregate<K: Copy + PartialEq>(
        &self,
        heights: &[f32],
        class_of: impl Fn(usize) -> K,
        priority: impl Fn(K) -> u8,
    ) -> Vec<HexAggregate<K>> {
        self.members
            .iter()
            .map(|(&point, pixels)| {
                // Small linear tally, there are only a handful of classes
                let mut tally: Vec<(K, usize)> = Vec::new();
                let mut height_sum = 0.0f64;
                for &pixel in pixels {
                    height_sum += heights[pixel] as f64;
                    let class = class_of(pixel);
                    match tally.iter_mut().find(|(k, _)| *k == class) {
                        Some((_, count)) => *count += 1,
                        None => tally.push((class, 1)),
                    }
                }

                // tally is never empty, since every hex has >=1 pixel
                let (mut best, mut best_count) = tally[0];
                for &(class, count) in &tally[1..] {
                    let better = (priority(class), count)
                        > (priority(best), best_count);
                    if better {
                        best = class;
                        best_count = count;
                    }
                }

                HexAggregate {
                    point,
                    class: best,
                    height: (height_sum / pixels.len() as f64) as f32,
                    pixels: pixels.len(),
                }
            })
            .collect()
    }
}
