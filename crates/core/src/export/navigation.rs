use crate::{classify::NavKind, grid::Grid};
use anyhow::ensure;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

/// Run-length encoded navigation grid. Each row is a list of
/// `[id, run_length]` pairs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NavigationRle {
    pub width: usize,
    pub height: usize,
    /// Name of every navigation id, keyed by the id as a string
    pub legend: IndexMap<String, String>,
    pub rows: Vec<Vec<[u32; 2]>>,
}

impl NavigationRle {
    pub fn encode(grid: &Grid<u8>) -> Self {
        let rows = (0..grid.height())
            .map(|z| {
                let mut runs: Vec<[u32; 2]> = Vec::new();
                for &id in grid.row(z) {
                    match runs.last_mut() {
                        Some([last, count]) if *last == id as u32 => {
                            *count += 1
                        }
                        _ => runs.push([id as u32, 1]),
                    }
                }
                runs
            })
            .collect();
        Self {
            width: grid.width(),
            height: grid.height(),
            legend: NavKind::iter()
                .map(|kind| (kind.id().to_string(), kind.to_string()))
                .collect(),
            rows,
        }
    }

    /// Expand back into a full grid
    pub fn decode(&self) -> anyhow::Result<Grid<u8>> {
        ensure!(
            self.rows.len() == self.height,
            "expected {} rows, got {}",
            self.height,
            self.rows.len()
        );
        let mut data = Vec::with_capacity(self.width * self.height);
        for (z, row) in self.rows.iter().enumerate() {
            let start = data.len();
            for [id, count] in row {
                ensure!(
                    *id <= u8::MAX as u32,
                    "invalid id {} in row {}",
                    id,
                    z
                );
                data.extend((0..*count).map(|_| *id as u8));
            }
            ensure!(
                data.len() - start == self.width,
                "row {} has {} cells, expected {}",
                z,
                data.len() - start,
                self.width
            );
        }
        Grid::from_vec(self.width, self.height, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode() {
        let grid =
            Grid::from_vec(4, 2, vec![0, 0, 2, 2, 1, 0, 0, 0]).unwrap();
        let rle = NavigationRle::encode(&grid);
        assert_eq!(rle.rows, vec![vec![[0, 2], [2, 2]], vec![[1, 1], [0, 3]]]);
        assert_eq!(rle.legend["2"], "water");
        assert_eq!(rle.legend.len(), 4);
        assert_eq!(rle.decode().unwrap(), grid);
    }

    #[test]
    fn test_decode_rejects_bad_rows() {
        let rle = NavigationRle {
            width: 3,
            height: 1,
            legend: IndexMap::new(),
            rows: vec![vec![[0, 2]]],
        };
        assert!(rle.decode().is_err());
    }
}
