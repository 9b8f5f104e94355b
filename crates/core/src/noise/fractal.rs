use crate::seed;
use noise::{NoiseFn, Perlin, Seedable};

/// How each octave's raw gradient noise is shaped before it's summed
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OctaveShape {
    /// Plain gradient noise, output in `[-1, 1]`
    Standard,
    /// `1 - |n|`, which turns zero crossings into sharp crests. Output in
    /// `[0, 1]`
    Ridged,
    /// `2|n| - 1`, which gives puffy rounded hills. Output in `[-1, 1]`
    Billow,
}

/// Fractal Brownian motion over Perlin noise. Each octave gets its own
/// permutation table (seeded from the kernel seed + octave index), runs at
/// `lacunarity` times the previous frequency, and is weighted `gain` times
/// the previous weight.
///
/// The sum is divided by the closed-form maximum amplitude of that geometric
/// series, so the output stays bounded no matter how many octaves are used.
#[derive(Clone, Debug)]
pub struct Fractal {
    octaves: Vec<Perlin>,
    /// Frequency of the first octave, in cycles per kilometer
    frequency: f64,
    lacunarity: f64,
    gain: f64,
    shape: OctaveShape,
    max_amplitude: f64,
}

impl Fractal {
    pub fn new(
        seed: u32,
        frequency: f64,
        octaves: usize,
        lacunarity: f64,
        gain: f64,
        shape: OctaveShape,
    ) -> Self {
        // At least one octave, otherwise there's nothing to normalize by
        let octaves = octaves.max(1);
        let perlins = (0..octaves)
            .map(|i| Perlin::default().set_seed(seed::mix(seed, i as u32)))
            .collect();
        Self {
            octaves: perlins,
            frequency,
            lacunarity,
            gain,
            shape,
            max_amplitude: max_amplitude(gain, octaves),
        }
    }

    /// Range that [Self::sample] outputs are guaranteed to fall in
    pub fn output_range(&self) -> (f64, f64) {
        match self.shape {
            OctaveShape::Ridged => (0.0, 1.0),
            OctaveShape::Standard | OctaveShape::Billow => (-1.0, 1.0),
        }
    }

    /// Sample at a position given in kilometers
    pub fn sample(&self, x_km: f64, z_km: f64) -> f64 {
        let mut sum = 0.0;
        let mut amplitude = 1.0;
        let mut frequency = self.frequency;
        for perlin in &self.octaves {
            // Perlin output is *approximately* [-1,1]. Clamp it so the
            // normalization below is an actual bound
            let raw = perlin
                .get([x_km * frequency, z_km * frequency])
                .clamp(-1.0, 1.0);
            let shaped = match self.shape {
                OctaveShape::Standard => raw,
                OctaveShape::Ridged => 1.0 - raw.abs(),
                OctaveShape::Billow => 2.0 * raw.abs() - 1.0,
            };
            sum += amplitude * shaped;
            amplitude *= self.gain;
            frequency *= self.lacunarity;
        }
        sum / self.max_amplitude
    }
}

/// Sum of the geometric series `1 + g + g^2 + ... + g^(n-1)`, which is the
/// largest absolute value `n` octaves of unit noise can add up to
pub fn max_amplitude(gain: f64, octaves: usize) -> f64 {
    if (1.0 - gain).abs() < 1e-9 {
        octaves as f64
    } else {
        (1.0 - gain.powi(octaves as i32)) / (1.0 - gain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::{Rng, SeedableRng};
    use rand_pcg::Pcg64;

    #[test]
    fn test_max_amplitude() {
        assert_approx_eq!(max_amplitude(0.5, 1), 1.0);
        assert_approx_eq!(max_amplitude(0.5, 3), 1.75);
        assert_approx_eq!(max_amplitude(1.0, 4), 4.0);
        assert_approx_eq!(max_amplitude(0.0, 6), 1.0);
    }

    /// Normalized output has to stay in bounds for any gain/octave combo,
    /// over lots of random coordinates
    #[test]
    fn test_amplitude_bound() {
        let mut rng = Pcg64::seed_from_u64(99);
        for &(gain, octaves) in
            &[(0.1, 1), (0.5, 4), (0.65, 8), (0.9, 12), (0.99, 3)]
        {
            for shape in [
                OctaveShape::Standard,
                OctaveShape::Ridged,
                OctaveShape::Billow,
            ] {
                let fractal =
                    Fractal::new(rng.gen(), 0.7, octaves, 2.1, gain, shape);
                let (lo, hi) = fractal.output_range();
                for _ in 0..10_000 {
                    let x = rng.gen_range(-5000.0..5000.0);
                    let z = rng.gen_range(-5000.0..5000.0);
                    let v = fractal.sample(x, z);
                    assert!(
                        lo <= v && v <= hi,
                        "{:?} gain={} octaves={} gave {}",
                        shape,
                        gain,
                        octaves,
                        v
                    );
                }
            }
        }
    }

    #[test]
    fn test_pure_function() {
        let a = Fractal::new(5, 1.3, 5, 2.0, 0.5, OctaveShape::Standard);
        let b = Fractal::new(5, 1.3, 5, 2.0, 0.5, OctaveShape::Standard);
        let c = Fractal::new(6, 1.3, 5, 2.0, 0.5, OctaveShape::Standard);
        let mut differs = false;
        for i in 0..100 {
            let x = i as f64 * 0.173;
            let z = i as f64 * -0.311;
            assert_eq!(a.sample(x, z).to_bits(), b.sample(x, z).to_bits());
            differs |= a.sample(x, z) != c.sample(x, z);
        }
        assert!(differs, "different seeds should give different noise");
    }
}
