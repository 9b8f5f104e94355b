//! Dense 2D grids. Every layer the generator works with (height, climate,
//! categorical surface/navigation ids, ...) is a [Grid]. Grids are row-major,
//! indexed by `(x, z)` where `x` is the column and `z` is the row. This
//! matches world space, where `+x` is east and `+z` is south.

use anyhow::ensure;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};

/// Offsets to the 8 neighbors of a cell, in the order that D8 directions are
/// numbered: clockwise starting from east.
pub const NEIGHBORS_8: [(isize, isize); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

/// A dense, row-major 2D buffer
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Grid<T> {
    width: usize,
    height: usize,
    data: Vec<T>,
}

impl<T: Copy> Grid<T> {
    /// Create a new grid with every cell set to the given value
    pub fn new(width: usize, height: usize, value: T) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    /// Create a square grid with every cell set to the given value
    pub fn square(size: usize, value: T) -> Self {
        Self::new(size, size, value)
    }

    /// Wrap an existing buffer. Fails if the buffer length doesn't match the
    /// requested dimensions.
    pub fn from_vec(
        width: usize,
        height: usize,
        data: Vec<T>,
    ) -> anyhow::Result<Self> {
        ensure!(
            data.len() == width * height,
            "buffer of length {} cannot hold a {}x{} grid",
            data.len(),
            width,
            height
        );
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Total number of cells
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Flat index of a cell
    pub fn index_of(&self, x: usize, z: usize) -> usize {
        z * self.width + x
    }

    /// Inverse of [Self::index_of]
    pub fn coords_of(&self, index: usize) -> (usize, usize) {
        (index % self.width, index / self.width)
    }

    pub fn get(&self, x: usize, z: usize) -> T {
        self.data[z * self.width + x]
    }

    pub fn set(&mut self, x: usize, z: usize, value: T) {
        self.data[z * self.width + x] = value;
    }

    /// Get a cell with coordinates clamped into the grid, which effectively
    /// extends edge values outward
    pub fn get_clamped(&self, x: isize, z: isize) -> T {
        let x = x.clamp(0, self.width as isize - 1) as usize;
        let z = z.clamp(0, self.height as isize - 1) as usize;
        self.get(x, z)
    }

    /// Overwrite every cell
    pub fn fill(&mut self, value: T) {
        self.data.iter_mut().for_each(|cell| *cell = value);
    }

    /// Get a single row
    pub fn row(&self, z: usize) -> &[T] {
        &self.data[z * self.width..(z + 1) * self.width]
    }

    /// Iterate over all the valid 8-neighbors of a cell, as `(direction
    /// index, x, z)`. Direction indexes line up with [NEIGHBORS_8].
    pub fn neighbors8(
        &self,
        x: usize,
        z: usize,
    ) -> impl Iterator<Item = (usize, usize, usize)> + '_ {
        NEIGHBORS_8
            .iter()
            .enumerate()
            .filter_map(move |(dir, (dx, dz))| {
                let nx = x as isize + dx;
                let nz = z as isize + dz;
                if nx < 0
                    || nz < 0
                    || nx as usize >= self.width
                    || nz as usize >= self.height
                {
                    None
                } else {
                    Some((dir, nx as usize, nz as usize))
                }
            })
    }

    /// Copy a rectangular window out of this grid
    pub fn crop(
        &self,
        x0: usize,
        z0: usize,
        width: usize,
        height: usize,
    ) -> anyhow::Result<Self> {
        ensure!(
            x0 + width <= self.width && z0 + height <= self.height,
            "crop window {}x{} at ({}, {}) exceeds {}x{} grid",
            width,
            height,
            x0,
            z0,
            self.width,
            self.height
        );
        let mut data = Vec::with_capacity(width * height);
        for z in z0..z0 + height {
            let start = z * self.width + x0;
            data.extend_from_slice(&self.data[start..start + width]);
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Copy another grid into this one, with the source's top-left corner
    /// landing at `(x0, z0)`. Fails if the source doesn't fit.
    pub fn paste(
        &mut self,
        x0: usize,
        z0: usize,
        source: &Self,
    ) -> anyhow::Result<()> {
        ensure!(
            x0 + source.width <= self.width
                && z0 + source.height <= self.height,
            "cannot paste {}x{} grid at ({}, {}) into {}x{} grid",
            source.width,
            source.height,
            x0,
            z0,
            self.width,
            self.height
        );
        for z in 0..source.height {
            let start = (z0 + z) * self.width + x0;
            self.data[start..start + source.width]
                .copy_from_slice(source.row(z));
        }
        Ok(())
    }

    /// Build a new grid that's `pad` cells larger on every side, filling the
    /// border by mirroring the interior across each edge (without repeating
    /// the edge cell). Operators that look at a neighborhood can then run on
    /// the padded grid without ever seeing a hard edge.
    pub fn reflect_pad(&self, pad: usize) -> Self {
        fn reflect(i: isize, len: usize) -> usize {
            let len = len as isize;
            if len == 1 {
                return 0;
            }
            // Mirror with period 2*(len-1), which handles pads larger than
            // the grid itself
            let period = 2 * (len - 1);
            let mut i = i.rem_euclid(period);
            if i >= len {
                i = period - i;
            }
            i as usize
        }

        let width = self.width + 2 * pad;
        let height = self.height + 2 * pad;
        let mut data = Vec::with_capacity(width * height);
        for z in 0..height {
            let sz = reflect(z as isize - pad as isize, self.height);
            for x in 0..width {
                let sx = reflect(x as isize - pad as isize, self.width);
                data.push(self.get(sx, sz));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Convert every cell to a new value, producing a new grid
    pub fn map<U: Copy>(&self, f: impl Fn(T) -> U) -> Grid<U> {
        Grid {
            width: self.width,
            height: self.height,
            data: self.data.iter().map(|v| f(*v)).collect(),
        }
    }

    /// Check that another grid has the same dimensions as this one
    pub fn ensure_same_shape<U>(
        &self,
        other: &Grid<U>,
        label: &str,
    ) -> anyhow::Result<()> {
        ensure!(
            self.width == other.width && self.height == other.height,
            "{} shape mismatch: {}x{} vs {}x{}",
            label,
            self.width,
            self.height,
            other.width,
            other.height
        );
        Ok(())
    }
}

impl<T: Copy + Send + Sync> Grid<T> {
    /// Compute every cell in parallel, row by row. The callback receives
    /// `(x, z)` and returns the new cell value. Because each cell is written
    /// exactly once from read-only inputs, there are no cross-cell hazards.
    pub fn par_fill_with(&mut self, f: impl Fn(usize, usize) -> T + Sync) {
        let width = self.width;
        self.data
            .par_chunks_mut(width.max(1))
            .enumerate()
            .for_each(|(z, row)| {
                for (x, cell) in row.iter_mut().enumerate() {
                    *cell = f(x, z);
                }
            });
    }

    /// Parallel equivalent of [Self::map]
    pub fn par_map<U: Copy + Send + Sync>(
        &self,
        f: impl Fn(T) -> U + Sync,
    ) -> Grid<U> {
        Grid {
            width: self.width,
            height: self.height,
            data: self.data.par_iter().map(|v| f(*v)).collect(),
        }
    }
}

impl Grid<f32> {
    /// Check that every cell is finite
    pub fn all_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    /// Minimum and maximum value. Returns `None` for an empty grid.
    pub fn min_max(&self) -> Option<(f32, f32)> {
        let mut iter = self.data.iter().copied();
        let first = iter.next()?;
        Some(iter.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v))))
    }

    /// Mean value. Summed sequentially (in f64) so the result never depends
    /// on thread scheduling.
    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|v| *v as f64).sum::<f64>()
            / self.data.len() as f64
    }

    /// Central-difference gradient `(dh/dx, dh/dz)`, in height units per
    /// meter. Edge cells use clamped neighbors, which makes them one-sided.
    pub fn gradient(&self, cell_size: f64) -> (Grid<f32>, Grid<f32>) {
        let span = (2.0 * cell_size) as f32;
        let mut dx = Grid::new(self.width, self.height, 0.0);
        let mut dz = Grid::new(self.width, self.height, 0.0);
        dx.par_fill_with(|x, z| {
            let (x, z) = (x as isize, z as isize);
            (self.get_clamped(x + 1, z) - self.get_clamped(x - 1, z)) / span
        });
        dz.par_fill_with(|x, z| {
            let (x, z) = (x as isize, z as isize);
            (self.get_clamped(x, z + 1) - self.get_clamped(x, z - 1)) / span
        });
        (dx, dz)
    }

    /// Box blur with clamped edges. Each output cell is the mean of the
    /// `(2r + 1)^2` window around it.
    pub fn box_blur(&self, radius: usize) -> Grid<f32> {
        self.convolve_separable(&vec![1.0; 2 * radius + 1])
    }

    /// Gaussian blur with clamped edges. The kernel is truncated at 3 sigma.
    pub fn gaussian_blur(&self, sigma: f32) -> Grid<f32> {
        if sigma <= 0.0 {
            return self.clone();
        }
        let radius = (3.0 * sigma).ceil() as isize;
        let kernel: Vec<f32> = (-radius..=radius)
            .map(|i| (-((i * i) as f32) / (2.0 * sigma * sigma)).exp())
            .collect();
        self.convolve_separable(&kernel)
    }

    /// Apply a symmetric 1D kernel along rows, then along columns. The
    /// kernel is normalized so it sums to 1.
    fn convolve_separable(&self, kernel: &[f32]) -> Grid<f32> {
        let norm: f32 = kernel.iter().sum();
        let radius = (kernel.len() / 2) as isize;
        let weighted = |sample: &dyn Fn(isize) -> f32| {
            kernel
                .iter()
                .enumerate()
                .map(|(i, k)| k * sample(i as isize - radius))
                .sum::<f32>()
                / norm
        };

        let mut rows = Grid::new(self.width, self.height, 0.0);
        rows.par_fill_with(|x, z| {
            let (x, z) = (x as isize, z as isize);
            weighted(&|offset| self.get_clamped(x + offset, z))
        });
        let mut out = Grid::new(self.width, self.height, 0.0);
        out.par_fill_with(|x, z| {
            let (x, z) = (x as isize, z as isize);
            weighted(&|offset| rows.get_clamped(x, z + offset))
        });
        out
    }

    /// Slope angle of every cell, in degrees
    pub fn slope_degrees(&self, cell_size: f64) -> Grid<f32> {
        let (dx, dz) = self.gradient(cell_size);
        let mut slope = Grid::new(self.width, self.height, 0.0);
        slope.par_fill_with(|x, z| {
            let rise = dx.get(x, z).hypot(dz.get(x, z));
            rise.atan().to_degrees()
        });
        slope
    }
}

impl<T> Index<(usize, usize)> for Grid<T> {
    type Output = T;

    fn index(&self, (x, z): (usize, usize)) -> &Self::Output {
        &self.data[z * self.width + x]
    }
}

impl<T> IndexMut<(usize, usize)> for Grid<T> {
    fn index_mut(&mut self, (x, z): (usize, usize)) -> &mut Self::Output {
        &mut self.data[z * self.width + x]
    }
}

/// A lattice of world-space sample coordinates. Rather than storing explicit
/// coordinate arrays, the lattice is defined by the global index of its first
/// cell. World coordinates are always computed from the *global* cell index,
/// so the same world cell produces bit-identical coordinates no matter which
/// region (or halo) it's sampled from.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CoordGrid {
    /// Global cell index of column 0
    pub origin_x: i64,
    /// Global cell index of row 0
    pub origin_z: i64,
    pub width: usize,
    pub height: usize,
    /// Size of one cell, in meters
    pub cell_size: f64,
}

impl CoordGrid {
    pub fn new(
        origin_x: i64,
        origin_z: i64,
        width: usize,
        height: usize,
        cell_size: f64,
    ) -> Self {
        Self {
            origin_x,
            origin_z,
            width,
            height,
            cell_size,
        }
    }

    /// World x coordinate (meters) of a column
    pub fn x(&self, col: usize) -> f64 {
        (self.origin_x + col as i64) as f64 * self.cell_size
    }

    /// World z coordinate (meters) of a row
    pub fn z(&self, row: usize) -> f64 {
        (self.origin_z + row as i64) as f64 * self.cell_size
    }

    /// A sub-window of this lattice
    pub fn window(
        &self,
        col: usize,
        row: usize,
        width: usize,
        height: usize,
    ) -> Self {
        Self {
            origin_x: self.origin_x + col as i64,
            origin_z: self.origin_z + row as i64,
            width,
            height,
            cell_size: self.cell_size,
        }
    }

    /// Grow the lattice by `pad` cells on every side
    pub fn padded(&self, pad: usize) -> Self {
        Self {
            origin_x: self.origin_x - pad as i64,
            origin_z: self.origin_z - pad as i64,
            width: self.width + 2 * pad,
            height: self.height + 2 * pad,
            cell_size: self.cell_size,
        }
    }
}
