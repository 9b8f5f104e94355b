use crate::{
    config::WarpConfig,
    noise::{
        fractal::{Fractal, OctaveShape},
        INPUT_SCALE,
    },
    seed,
};

/// Iterative domain warp. Each iteration displaces the sample position by a
/// pair of independent fBm fields (one per axis), then the displacement
/// amplitude is multiplied by the attenuation factor for the next iteration.
#[derive(Clone, Debug)]
pub struct DomainWarp {
    config: WarpConfig,
    fields: Vec<(Fractal, Fractal)>,
}

impl DomainWarp {
    pub fn new(seed: u32, config: WarpConfig) -> Self {
        let field = |salt: u32| {
            Fractal::new(
                seed::mix(seed, salt),
                config.frequency,
                config.octaves,
                2.0,
                0.5,
                OctaveShape::Standard,
            )
        };
        let fields = (0..config.iterations as u32)
            .map(|i| (field(2 * i), field(2 * i + 1)))
            .collect();
        Self { config, fields }
    }

    /// Displace a world position (meters). The output is in meters too.
    pub fn apply(&self, x: f64, z: f64) -> (f64, f64) {
        let [anisotropy_x, anisotropy_z] = self.config.anisotropy;
        let mut x = x;
        let mut z = z;
        let mut amplitude = self.config.amplitude_m;
        for (field_x, field_z) in &self.fields {
            // Both offsets are computed from the same input position, so the
            // x displacement doesn't leak into the z lookup
            let dx = field_x.sample(x / INPUT_SCALE, z / INPUT_SCALE);
            let dz = field_z.sample(x / INPUT_SCALE, z / INPUT_SCALE);
            x += amplitude * anisotropy_x * dx;
            z += amplitude * anisotropy_z * dz;
            amplitude *= self.config.attenuation;
        }
        (x, z)
    }

    /// Largest distance (meters) a point can be moved along each axis
    pub fn max_displacement(&self) -> (f64, f64) {
        let [anisotropy_x, anisotropy_z] = self.config.anisotropy;
        let mut total = 0.0;
        let mut amplitude = self.config.amplitude_m.abs();
        for _ in &self.fields {
            total += amplitude;
            amplitude *= self.config.attenuation.abs();
        }
        (total * anisotropy_x.abs(), total * anisotropy_z.abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(iterations: u8, anisotropy: [f64; 2]) -> WarpConfig {
        WarpConfig {
            iterations,
            amplitude_m: 40.0,
            attenuation: 0.5,
            anisotropy,
            frequency: 2.0,
            octaves: 3,
        }
    }

    #[test]
    fn test_zero_iterations_is_identity() {
        let warp = DomainWarp::new(1, config(0, [1.0, 1.0]));
        assert_eq!(warp.apply(123.5, -77.25), (123.5, -77.25));
    }

    #[test]
    fn test_displacement_bounded() {
        let warp = DomainWarp::new(8, config(3, [1.0, 0.5]));
        let (max_x, max_z) = warp.max_displacement();
        // 40 + 20 + 10
        assert_eq!(max_x, 70.0);
        assert_eq!(max_z, 35.0);
        for i in 0..1000 {
            let x = i as f64 * 13.7;
            let z = i as f64 * -3.1;
            let (wx, wz) = warp.apply(x, z);
            assert!((wx - x).abs() <= max_x + 1e-9);
            assert!((wz - z).abs() <= max_z + 1e-9);
        }
    }

    /// Zero anisotropy on one axis pins that axis in place
    #[test]
    fn test_anisotropy() {
        let warp = DomainWarp::new(8, config(2, [1.0, 0.0]));
        for i in 0..100 {
            let (_, wz) = warp.apply(i as f64 * 9.0, 50.0);
            assert_eq!(wz, 50.0);
        }
    }
}
