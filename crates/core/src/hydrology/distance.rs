use crate::grid::Grid;
use std::f32::consts::SQRT_2;

/// Approximate distance (in meters) from every cell to the nearest cell
/// where `mask` is set, using a two-pass 3x3 chamfer with weights 1 and
/// sqrt(2). Errors against the true Euclidean distance are at most ~8%,
/// which is plenty for smooth proximity falloffs.
///
/// If the mask is empty, every cell is infinitely far away.
pub fn chamfer_distance(mask: &Grid<bool>, cell_size: f64) -> Grid<f32> {
    let width = mask.width();
    let height = mask.height();
    let mut dist = mask.map(|set| if set { 0.0 } else { f32::INFINITY });

    // Forward pass: top-left to bottom-right, looking at already-visited
    // neighbors (up and left)
    for z in 0..height {
        for x in 0..width {
            let mut best = dist.get(x, z);
            if x > 0 {
                best = best.min(dist.get(x - 1, z) + 1.0);
            }
            if z > 0 {
                best = best.min(dist.get(x, z - 1) + 1.0);
                if x > 0 {
                    best = best.min(dist.get(x - 1, z - 1) + SQRT_2);
                }
                if x + 1 < width {
                    best = best.min(dist.get(x + 1, z - 1) + SQRT_2);
                }
            }
            dist.set(x, z, best);
        }
    }

    // Backward pass: bottom-right to top-left
    for z in (0..height).rev() {
        for x in (0..width).rev() {
            let mut best = dist.get(x, z);
            if x + 1 < width {
                best = best.min(dist.get(x + 1, z) + 1.0);
            }
            if z + 1 < height {
                best = best.min(dist.get(x, z + 1) + 1.0);
                if x + 1 < width {
                    best = best.min(dist.get(x + 1, z + 1) + SQRT_2);
                }
                if x > 0 {
                    best = best.min(dist.get(x - 1, z + 1) + SQRT_2);
                }
            }
            dist.set(x, z, best);
        }
    }

    let cell_size = cell_size as f32;
    dist.data_mut().iter_mut().for_each(|d| *d *= cell_size);
    dist
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_single_seed() {
        let mut mask = Grid::new(7, 7, false);
        mask.set(3, 3, true);
        let dist = chamfer_distance(&mask, 2.0);
        assert_approx_eq!(dist.get(3, 3), 0.0);
        assert_approx_eq!(dist.get(5, 3), 4.0);
        assert_approx_eq!(dist.get(4, 4), 2.0 * SQRT_2);
        // Knight's move: one diagonal plus one straight
        assert_approx_eq!(dist.get(5, 4), 2.0 * (1.0 + SQRT_2));
        assert_approx_eq!(dist.get(0, 0), 3.0 * 2.0 * SQRT_2);
    }

    #[test]
    fn test_close_to_euclidean() {
        let mut mask = Grid::new(40, 40, false);
        mask.set(5, 30, true);
        mask.set(33, 8, true);
        let dist = chamfer_distance(&mask, 1.0);
        for z in 0..40 {
            for x in 0..40 {
                let euclid = |sx: f32, sz: f32| {
                    (x as f32 - sx).hypot(z as f32 - sz)
                };
                let exact = euclid(5.0, 30.0).min(euclid(33.0, 8.0));
                let approx = dist.get(x, z);
                assert!(approx >= exact - 1e-4);
                assert!(approx <= exact * 1.09 + 1e-4, "{} {}", approx, exact);
            }
        }
    }

    #[test]
    fn test_empty_mask() {
        let mask = Grid::new(3, 3, false);
        let dist = chamfer_distance(&mask, 1.0);
        assert!(dist.data().iter().all(|d| d.is_infinite()));
    }
}
