//! Basic hex coordinate types. See the parent module documentation for a
//! description of the coordinate system.

use derive_more::{Add, Display, Sub};
use fnv::FnvBuildHasher;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::{EnumIter, IntoEnumIterator};

/// An ordered map keyed by hex cell. Iteration order is insertion order,
/// which keeps any output built from it deterministic.
pub type HexPointIndexMap<T> = IndexMap<HexPoint, T, FnvBuildHasher>;

/// A whole hex cell, in axial coordinates. The third cube component `s` is
/// derived from `q + r + s = 0`, so we only need to store two.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Add,
    Sub,
    Display,
    Serialize,
    Deserialize,
)]
#[display(fmt = "({}, {}, {})", "self.q", "self.r", "self.s()")]
pub struct HexPoint {
    pub q: i32,
    pub r: i32,
}

impl HexPoint {
    pub const ORIGIN: Self = Self::new(0, 0);

    pub const fn new(q: i32, r: i32) -> Self {
        Self { q, r }
    }

    /// The derived third cube component
    pub const fn s(self) -> i32 {
        -self.q - self.r
    }

    /// Get the cell adjacent to this one in a particular direction
    pub fn adjacent(self, direction: HexDirection) -> Self {
        self + direction.to_vector()
    }

    /// Get an iterator of all the cells directly adjacent to this one. The
    /// iterator will always contain exactly 6 values.
    pub fn adjacents(self) -> impl Iterator<Item = HexPoint> {
        HexDirection::iter().map(move |dir| self.adjacent(dir))
    }

    /// Calculate the path distance between two cells, meaning the number of
    /// hops it takes to get from one to the other. 0 if the points are equal,
    /// 1 if the cells are adjacent, 2 if there is 1 cell between them, etc.
    pub fn distance_to(self, other: HexPoint) -> usize {
        // https://www.redblobgames.com/grids/hexagons/#distances
        let diff = self - other;
        ((diff.q.abs() + diff.r.abs() + diff.s().abs()) / 2) as usize
    }
}

/// A point in axial space that isn't necessarily a cell center, e.g. the
/// result of projecting a pixel into hex space.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FractionalHexPoint {
    pub q: f64,
    pub r: f64,
}

impl FractionalHexPoint {
    pub fn new(q: f64, r: f64) -> Self {
        Self { q, r }
    }

    pub fn s(self) -> f64 {
        -self.q - self.r
    }

    /// Snap to the hex cell containing this point, via cube rounding: round
    /// each of the three cube components independently, then recompute
    /// whichever one picked up the largest rounding error from the other
    /// two. That restores `q + r + s = 0` exactly.
    pub fn round(self) -> HexPoint {
        let (q, r, s) = cube_round(self.q, self.r, self.s());
        HexPoint::new(q as i32, r as i32)
    }
}

/// Cube rounding on three raw components. Exposed separately from
/// [FractionalHexPoint::round] so the invariant can be checked on arbitrary
/// cube inputs. The output always sums to exactly zero (as long as the input
/// sums to zero, up to float error).
pub fn cube_round(x: f64, y: f64, z: f64) -> (i64, i64, i64) {
    let mut rx = x.round();
    let mut ry = y.round();
    let mut rz = z.round();

    let dx = (rx - x).abs();
    let dy = (ry - y).abs();
    let dz = (rz - z).abs();

    if dx > dy && dx > dz {
        rx = -ry - rz;
    } else if dy > dz {
        ry = -rx - rz;
    } else {
        rz = -rx - ry;
    }

    (rx as i64, ry as i64, rz as i64)
}

/// The six directions to the cells adjacent to a hex. Listed clockwise,
/// starting from the `+q` neighbor.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    Display,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum HexDirection {
    East,
    SouthEast,
    SouthWest,
    West,
    NorthWest,
    NorthEast,
}

impl HexDirection {
    /// The axial offset that moves one cell in this direction
    pub fn to_vector(self) -> HexPoint {
        match self {
            Self::East => HexPoint::new(1, 0),
            Self::SouthEast => HexPoint::new(0, 1),
            Self::SouthWest => HexPoint::new(-1, 1),
            Self::West => HexPoint::new(-1, 0),
            Self::NorthWest => HexPoint::new(0, -1),
            Self::NorthEast => HexPoint::new(1, -1),
        }
    }

    /// The direction that points the opposite way from this one
    pub fn opposite(self) -> Self {
        match self {
            Self::East => Self::West,
            Self::SouthEast => Self::NorthWest,
            Self::SouthWest => Self::NorthEast,
            Self::West => Self::East,
            Self::NorthWest => Self::SouthEast,
            Self::NorthEast => Self::SouthWest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_pcg::Pcg64;

    #[test]
    fn test_distance_to() {
        assert_eq!(HexPoint::ORIGIN.distance_to(HexPoint::ORIGIN), 0);
        assert_eq!(HexPoint::ORIGIN.distance_to(HexPoint::new(1, 0)), 1);
        assert_eq!(HexPoint::ORIGIN.distance_to(HexPoint::new(-1, 1)), 1);
        assert_eq!(HexPoint::ORIGIN.distance_to(HexPoint::new(2, -1)), 2);
        assert_eq!(HexPoint::new(3, -3).distance_to(HexPoint::new(-3, 3)), 6);
    }

    #[test]
    fn test_adjacents() {
        let center = HexPoint::new(4, -2);
        for neighbor in center.adjacents() {
            assert_eq!(center.distance_to(neighbor), 1);
        }
        for dir in HexDirection::iter() {
            assert_eq!(
                center.adjacent(dir).adjacent(dir.opposite()),
                center,
                "{} and its opposite should cancel",
                dir
            );
        }
    }

    #[test]
    fn test_round_exact_centers() {
        assert_eq!(
            FractionalHexPoint::new(2.0, -1.0).round(),
            HexPoint::new(2, -1)
        );
        // Points well inside a cell snap to it
        assert_eq!(
            FractionalHexPoint::new(2.2, -0.9).round(),
            HexPoint::new(2, -1)
        );
    }

    /// Naive rounding of each component would give (0, 0, -1) here, which
    /// doesn't sum to zero. Cube rounding has to fix the worst component.
    #[test]
    fn test_round_fixes_largest_error() {
        let (x, y, z) = cube_round(0.45, 0.3, -0.75);
        assert_eq!(x + y + z, 0);
        assert_eq!((x, y, z), (1, 0, -1));
    }

    #[test]
    fn test_round_invariant_random() {
        let mut rng = Pcg64::seed_from_u64(7);
        for _ in 0..10_000 {
            let x: f64 = rng.gen_range(-500.0..500.0);
            let y: f64 = rng.gen_range(-500.0..500.0);
            let z = -x - y;
            let (rx, ry, rz) = cube_round(x, y, z);
            assert_eq!(rx + ry + rz, 0, "rounding ({}, {}, {})", x, y, z);
        }
    }
}
