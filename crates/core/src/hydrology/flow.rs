use crate::{
    grid::{Grid, NEIGHBORS_8},
    util::cmp_partial,
};
use serde::{Deserialize, Serialize};
use strum::{EnumIter, IntoEnumIterator};

/// One of the 8 directions water can leave a cell in. The discriminants
/// line up with [NEIGHBORS_8].
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, EnumIter, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum D8Direction {
    East = 0,
    SouthEast = 1,
    South = 2,
    SouthWest = 3,
    West = 4,
    NorthWest = 5,
    North = 6,
    NorthEast = 7,
}

impl D8Direction {
    /// Cell offset `(dx, dz)` to the neighbor in this direction
    pub fn offset(self) -> (isize, isize) {
        NEIGHBORS_8[self as usize]
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::iter().nth(index)
    }

    /// Is this a diagonal direction?
    pub fn is_diagonal(self) -> bool {
        let (dx, dz) = self.offset();
        dx != 0 && dz != 0
    }
}

/// D8 flow directions. Each cell drains toward its lowest neighbor, if that
/// neighbor is strictly lower than the cell itself. Cells with no lower
/// neighbor are sinks (`None`). On ties, the first neighbor in
/// [D8Direction] order wins.
pub fn flow_directions(height: &Grid<f32>) -> Grid<Option<D8Direction>> {
    let mut directions = Grid::new(height.width(), height.height(), None);
    directions.par_fill_with(|x, z| {
        let mut lowest = height.get(x, z);
        let mut best = None;
        for (dir, nx, nz) in height.neighbors8(x, z) {
            let h = height.get(nx, nz);
            if h < lowest {
                lowest = h;
                best = D8Direction::from_index(dir);
            }
        }
        best
    });
    directions
}

/// Cell that a direction points to. Flow directions never point off the
/// grid, since they're built from in-bounds neighbors.
pub fn downstream(
    grid_width: usize,
    x: usize,
    z: usize,
    direction: D8Direction,
) -> usize {
    let (dx, dz) = direction.offset();
    let nx = (x as isize + dx) as usize;
    let nz = (z as isize + dz) as usize;
    nz * grid_width + nx
}

/// Flow accumulation: the number of cells (including itself) that drain
/// through each cell. Cells are visited from highest to lowest, and every
/// cell starts with 1 and passes its total to its downstream neighbor.
/// Since water only ever flows strictly downhill, a cell is always
/// finished before anything downstream of it is visited.
pub fn flow_accumulation(
    height: &Grid<f32>,
    directions: &Grid<Option<D8Direction>>,
) -> anyhow::Result<Grid<u32>> {
    height.ensure_same_shape(directions, "flow directions")?;

    // Stable sort, so equal heights keep index order and the result never
    // depends on the sort implementation
    let mut order: Vec<usize> = (0..height.len()).collect();
    order.sort_by(|a, b| cmp_partial(&height.data()[*b], &height.data()[*a]));

    let mut accumulation = Grid::new(height.width(), height.height(), 1u32);
    for index in order {
        let (x, z) = height.coords_of(index);
        if let Some(direction) = directions.get(x, z) {
            let target = downstream(height.width(), x, z, direction);
            let flow = accumulation.data()[index];
            let cell = &mut accumulation.data_mut()[target];
            *cell = cell.saturating_add(flow);
        }
    }
    Ok(accumulation)
}

/// Number of sink cells
pub fn sink_count(directions: &Grid<Option<D8Direction>>) -> usize {
    directions.data().iter().filter(|d| d.is_none()).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Follow flow directions from a cell until hitting a sink. Panics if
    /// the path runs longer than the grid, which would mean a cycle.
    fn trace_to_sink(
        directions: &Grid<Option<D8Direction>>,
        mut x: usize,
        mut z: usize,
    ) -> (usize, usize) {
        for _ in 0..directions.len() {
            match directions.get(x, z) {
                None => return (x, z),
                Some(direction) => {
                    let next =
                        downstream(directions.width(), x, z, direction);
                    let (nx, nz) = directions.coords_of(next);
                    x = nx;
                    z = nz;
                }
            }
        }
        panic!("cycle in flow directions");
    }

    #[test]
    fn test_direction_ids() {
        for (i, direction) in D8Direction::iter().enumerate() {
            assert_eq!(direction as usize, i);
            assert_eq!(D8Direction::from_index(i), Some(direction));
        }
        assert_eq!(D8Direction::from_index(8), None);
        assert!(D8Direction::NorthEast.is_diagonal());
        assert!(!D8Direction::South.is_diagonal());
    }

    /// Flat 4x4 with one raised corner: the corner drains into a neighbor,
    /// everything else is flat so it's a sink
    #[test]
    fn test_raised_corner() {
        let mut height = Grid::new(4, 4, 0.0f32);
        height.set(0, 0, 10.0);
        let directions = flow_directions(&height);

        assert_eq!(directions.get(0, 0), Some(D8Direction::East));
        assert_eq!(sink_count(&directions), 15);
        for z in 0..4 {
            for x in 0..4 {
                trace_to_sink(&directions, x, z);
            }
        }

        let accumulation = flow_accumulation(&height, &directions).unwrap();
        assert_eq!(accumulation.get(0, 0), 1);
        assert_eq!(accumulation.get(1, 0), 2);
        assert_eq!(accumulation.data().iter().sum::<u32>(), 17);
    }

    #[test]
    fn test_accumulation_monotonic() {
        // A bumpy slope with a few pits in it
        let mut height = Grid::new(24, 24, 0.0f32);
        height.par_fill_with(|x, z| {
            let bumps = ((x * 7 + z * 13) % 5) as f32 * 0.3;
            (24 - x) as f32 + (z as f32 * 0.4).sin() * 3.0 + bumps
        });
        let directions = flow_directions(&height);
        let accumulation = flow_accumulation(&height, &directions).unwrap();

        for z in 0..24 {
            for x in 0..24 {
                let own = accumulation.get(x, z);
                assert!(own >= 1);
                if let Some(direction) = directions.get(x, z) {
                    let target = downstream(24, x, z, direction);
                    assert!(accumulation.data()[target] > own);
                    assert!(height.data()[target] < height.get(x, z));
                }
                trace_to_sink(&directions, x, z);
            }
        }
        // Every cell ends up in exactly one sink, so sink totals cover the
        // whole grid
        let sink_total: u32 = directions
            .data()
            .iter()
            .zip(accumulation.data())
            .filter(|(d, _)| d.is_none())
            .map(|(_, a)| *a)
            .sum();
        assert_eq!(sink_total, 24 * 24);
    }

    #[test]
    fn test_shape_mismatch() {
        let height = Grid::new(4, 4, 0.0f32);
        let directions = Grid::new(4, 3, None);
        assert!(flow_accumulation(&height, &directions).is_err());
    }
}
