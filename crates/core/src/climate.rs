//! Temperature and humidity. Both are computed over the same grid as the
//! terrain. Anything that looks at a neighborhood (blurs, gradients,
//! distances) runs on a reflect-padded copy of its inputs, so the edges of
//! the grid never show a hard cutoff.

use crate::{
    config::{HumidityConfig, TemperatureConfig},
    grid::{CoordGrid, Grid},
    hydrology::chamfer_distance,
    noise::{fbm, FbmParams, INPUT_SCALE},
    seed,
};
use anyhow::ensure;

/// Octaves used for the climate noise terms
const CLIMATE_OCTAVES: usize = 4;

/// Temperature and humidity grids for one region
#[derive(Clone, Debug, PartialEq)]
pub struct Climate {
    /// Degrees Celsius
    pub temperature: Grid<f32>,
    /// `[0, 1]`
    pub humidity: Grid<f32>,
}

/// Inputs to the humidity model
pub struct HumidityInputs<'a> {
    pub height: &'a Grid<f32>,
    pub coords: &'a CoordGrid,
    /// Cells that count as open water for the coastal term
    pub water: &'a Grid<bool>,
    pub river: &'a Grid<bool>,
    pub temperature: &'a Grid<f32>,
}

/// Temperature at every cell: a base value, cooling with latitude (toward
/// +z) and altitude, plus some large-scale noise
pub fn temperature(
    config: &TemperatureConfig,
    height: &Grid<f32>,
    coords: &CoordGrid,
    seed: u32,
) -> anyhow::Result<Grid<f32>> {
    ensure!(
        height.width() == coords.width && height.height() == coords.height,
        "height grid doesn't match its coordinates"
    );
    let params = FbmParams::new(config.noise_frequency, CLIMATE_OCTAVES);
    let noise = fbm(seed, coords, params);
    let (min_c, max_c) = (config.min_c.min(config.max_c), config.max_c);

    let mut temperature = Grid::new(coords.width, coords.height, 0.0);
    temperature.par_fill_with(|x, z| {
        let z_km = (coords.z(z) / INPUT_SCALE) as f32;
        let height_km = height.get(x, z).max(0.0) / 1000.0;
        let t = config.base_c
            - config.latitude_gradient_c_per_km * z_km
            + config.noise_amp_c * noise.get(x, z)
            - config.lapse_rate_c_per_km * height_km;
        t.clamp(min_c, max_c.max(min_c))
    });
    Ok(temperature)
}

/// Kernel radius (in cells) of the coastal smoothing, which also sets how
/// much reflect padding the humidity inputs get
fn padding(config: &HumidityConfig) -> usize {
    config.blur_radius.max(1)
}

/// Humidity at every cell. See [HumidityConfig] for the individual terms.
pub fn humidity(
    config: &HumidityConfig,
    inputs: &HumidityInputs,
    seed: u32,
) -> anyhow::Result<Grid<f32>> {
    let height = inputs.height;
    height.ensure_same_shape(inputs.water, "water mask")?;
    height.ensure_same_shape(inputs.river, "river mask")?;
    height.ensure_same_shape(inputs.temperature, "temperature")?;
    let (width, depth) = (height.width(), height.height());
    let pad = padding(config);
    let cell_size = inputs.coords.cell_size;
    let unpad = |grid: Grid<f32>| grid.crop(pad, pad, width, depth);

    // Coastal proximity, smoothed so coastlines don't print through as
    // sharp contours. The Gaussian is truncated at 3 sigma, which puts its
    // reach exactly at the padding.
    let water_distance =
        chamfer_distance(&inputs.water.reflect_pad(pad), cell_size);
    let coast_falloff = config.coast_falloff_m;
    let coast = water_distance
        .par_map(|d| (-d / coast_falloff).exp())
        .gaussian_blur(config.blur_radius as f32 / 3.0);
    let coast = unpad(coast)?;

    let river_distance =
        chamfer_distance(&inputs.river.reflect_pad(pad), cell_size);
    let river_falloff = config.river_falloff_m;
    let river =
        unpad(river_distance.par_map(|d| (-d / river_falloff).exp()))?;

    // Slope along the wind: positive means the wind is blowing uphill
    let (grad_x, grad_z) = height.reflect_pad(pad).gradient(cell_size);
    let (grad_x, grad_z) = (unpad(grad_x)?, unpad(grad_z)?);
    let (wind_z, wind_x) = config.wind_direction_deg.to_radians().sin_cos();

    let params = FbmParams::new(config.noise_frequency, CLIMATE_OCTAVES);
    let noise = fbm(seed::mix(seed, 1), inputs.coords, params);

    let mut humidity = Grid::new(width, depth, 0.0);
    humidity.par_fill_with(|x, z| {
        let along_wind =
            grad_x.get(x, z) * wind_x + grad_z.get(x, z) * wind_z;
        let lift = (along_wind / config.gradient_scale).clamp(-1.0, 1.0);
        let heat = inputs.temperature.get(x, z) - config.hot_threshold_c;
        let dryness = (heat / config.dryness_range_c).clamp(0.0, 1.0);

        let value = config.base
            + config.coast_weight * coast.get(x, z)
            + config.river_weight * river.get(x, z)
            + config.orographic_weight * lift.max(0.0)
            - config.shadow_weight * (-lift).max(0.0)
            + config.noise_weight * noise.get(x, z)
            - config.dryness_weight * dryness;
        value.clamp(0.0, 1.0)
    });
    Ok(humidity)
}

/// Compute both climate fields. The two noise terms use independent seeds
/// derived from `seed`.
pub fn climate(
    temperature_config: &TemperatureConfig,
    humidity_config: &HumidityConfig,
    inputs: &HumidityInputs,
    seed: u32,
) -> anyhow::Result<Climate> {
    let temperature = self::temperature(
        temperature_config,
        inputs.height,
        inputs.coords,
        seed::mix(seed, 0),
    )?;
    let humidity = self::humidity(
        humidity_config,
        &HumidityInputs {
            temperature: &temperature,
            ..*inputs
        },
        seed::mix(seed, 1),
    )?;
    Ok(Climate {
        temperature,
        humidity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn quiet_temperature() -> TemperatureConfig {
        TemperatureConfig {
            noise_amp_c: 0.0,
            ..TemperatureConfig::default()
        }
    }

    /// Humidity config with every term switched off
    fn quiet_humidity() -> HumidityConfig {
        HumidityConfig {
            base: 0.5,
            coast_weight: 0.0,
            river_weight: 0.0,
            orographic_weight: 0.0,
            shadow_weight: 0.0,
            noise_weight: 0.0,
            dryness_weight: 0.0,
            ..HumidityConfig::default()
        }
    }

    #[test]
    fn test_temperature_gradients() {
        // 2km of latitude, with a mountain in one corner
        let coords = CoordGrid::new(0, 0, 10, 10, 200.0);
        let mut height = Grid::new(10, 10, 0.0f32);
        height.set(0, 0, 2000.0);
        let config = quiet_temperature();
        let celsius = temperature(&config, &height, &coords, 1).unwrap();

        assert_approx_eq!(celsius.get(5, 0), 18.0);
        // 1.8km south, at 0.5C/km
        assert_approx_eq!(celsius.get(5, 9), 18.0 - 0.9, 1e-4);
        // 2km up, at 6.5C/km
        assert_approx_eq!(celsius.get(0, 0), 18.0 - 13.0, 1e-4);

        // Clamping
        let config = TemperatureConfig {
            base_c: 100.0,
            ..quiet_temperature()
        };
        let celsius = temperature(&config, &height, &coords, 1).unwrap();
        assert!(celsius.data().iter().all(|t| *t == 45.0));
    }

    #[test]
    fn test_humidity_terms() {
        let coords = CoordGrid::new(0, 0, 32, 8, 10.0);
        let height = Grid::new(32, 8, 100.0f32);
        let mut water = Grid::new(32, 8, false);
        for z in 0..8 {
            water.set(0, z, true);
        }
        let river = Grid::new(32, 8, false);
        let temperature = Grid::new(32, 8, 20.0f32);
        let inputs = HumidityInputs {
            height: &height,
            coords: &coords,
            water: &water,
            river: &river,
            temperature: &temperature,
        };

        let flat = humidity(&quiet_humidity(), &inputs, 3).unwrap();
        assert!(flat.data().iter().all(|h| (*h - 0.5).abs() < 1e-6));

        // Coast term: wetter near the water, drying out with distance
        let config = HumidityConfig {
            coast_weight: 0.4,
            ..quiet_humidity()
        };
        let coastal = humidity(&config, &inputs, 3).unwrap();
        assert!(coastal.get(1, 4) > coastal.get(10, 4));
        assert!(coastal.get(10, 4) > coastal.get(30, 4));
        assert!(coastal.data().iter().all(|h| (0.5..=0.9).contains(h)));

        // Dryness: 10C over the threshold at a 10C range is full dryness
        let hot = Grid::new(32, 8, 38.0f32);
        let config = HumidityConfig {
            dryness_weight: 0.3,
            hot_threshold_c: 28.0,
            dryness_range_c: 10.0,
            ..quiet_humidity()
        };
        let inputs = HumidityInputs {
            temperature: &hot,
            ..inputs
        };
        let dry = humidity(&config, &inputs, 3).unwrap();
        assert_approx_eq!(dry.get(5, 5), 0.2, 1e-6);
    }

    #[test]
    fn test_orographic() {
        // Ground rising toward +x, wind blowing toward +x: windward lift.
        // Flip the wind and it's a rain shadow instead.
        let coords = CoordGrid::new(0, 0, 16, 16, 1.0);
        let mut height = Grid::new(16, 16, 0.0f32);
        height.par_fill_with(|x, _| x as f32 * 0.25);
        let none = Grid::new(16, 16, false);
        let temperature = Grid::new(16, 16, 10.0f32);
        let inputs = HumidityInputs {
            height: &height,
            coords: &coords,
            water: &none,
            river: &none,
            temperature: &temperature,
        };
        let config = HumidityConfig {
            orographic_weight: 0.2,
            shadow_weight: 0.1,
            gradient_scale: 0.5,
            ..quiet_humidity()
        };
        let windward = humidity(&config, &inputs, 1).unwrap();
        assert_approx_eq!(windward.get(8, 8), 0.6, 1e-5);

        let config = HumidityConfig {
            wind_direction_deg: 180.0,
            ..config
        };
        let leeward = humidity(&config, &inputs, 1).unwrap();
        assert_approx_eq!(leeward.get(8, 8), 0.45, 1e-5);
    }

    #[test]
    fn test_climate_is_deterministic() {
        let coords = CoordGrid::new(-20, 40, 24, 24, 4.0);
        let mut height = Grid::new(24, 24, 0.0f32);
        height.par_fill_with(|x, z| (x * z) as f32);
        let water = height.map(|h| h < 20.0);
        let river = Grid::new(24, 24, false);
        let placeholder = Grid::new(24, 24, 0.0f32);
        let inputs = HumidityInputs {
            height: &height,
            coords: &coords,
            water: &water,
            river: &river,
            temperature: &placeholder,
        };
        let config = (TemperatureConfig::default(), HumidityConfig::default());
        let a = climate(&config.0, &config.1, &inputs, 8).unwrap();
        let b = climate(&config.0, &config.1, &inputs, 8).unwrap();
        assert_eq!(a, b);
        assert!(a.humidity.all_finite() && a.temperature.all_finite());
    }
}
