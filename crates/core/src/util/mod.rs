use std::cmp::Ordering;

/// A macro to measure the evaluation time of an expression. Wraps an
/// expression, logs the elapsed time at the given level (debug by default),
/// and evaluates to the value of the expression.
#[macro_export]
macro_rules! timed {
    ($label:expr, $ex:expr) => {
        timed!($label, log::Level::Debug, $ex)
    };
    ($label:expr, $log_level:expr, $ex:expr) => {{
        let now = std::time::Instant::now();
        let value = $ex;
        let elapsed = now.elapsed();
        log::log!($log_level, "{} took {} ms", $label, elapsed.as_millis());
        value
    }};
}

/// Compare two `PartialOrd` values, treating incomparable values (i.e. `NaN`)
/// as equal. Grids are checked for finiteness at the stage boundaries, so in
/// practice this only matters for garbage input.
pub fn cmp_partial<T: PartialOrd>(a: &T, b: &T) -> Ordering {
    a.partial_cmp(b).unwrap_or(Ordering::Equal)
}

/// Hermite interpolation between two edges. Returns 0 below `edge0`, 1 above
/// `edge1`, and a smooth S-curve in between. If the edges are equal, this
/// degrades to a hard step.
pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    if edge1 <= edge0 {
        return if x < edge0 { 0.0 } else { 1.0 };
    }
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Linear interpolation from `a` to `b`
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_smoothstep() {
        assert_approx_eq!(smoothstep(0.0, 1.0, -1.0), 0.0);
        assert_approx_eq!(smoothstep(0.0, 1.0, 0.0), 0.0);
        assert_approx_eq!(smoothstep(0.0, 1.0, 0.5), 0.5);
        assert_approx_eq!(smoothstep(0.0, 1.0, 1.0), 1.0);
        assert_approx_eq!(smoothstep(0.0, 1.0, 3.0), 1.0);

        // Zero-width band is a hard step
        assert_approx_eq!(smoothstep(0.5, 0.5, 0.4), 0.0);
        assert_approx_eq!(smoothstep(0.5, 0.5, 0.5), 1.0);
    }

    #[test]
    fn test_cmp_partial() {
        assert_eq!(cmp_partial(&1.0, &2.0), Ordering::Less);
        assert_eq!(cmp_partial(&2.0, &1.0), Ordering::Greater);
        assert_eq!(cmp_partial(&f32::NAN, &1.0), Ordering::Equal);
    }
}
