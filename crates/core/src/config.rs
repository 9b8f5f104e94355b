use crate::{
    classify::SurfaceKind,
    elevation::{self, StepDecl},
    hex::{HexGridSpec, HexOrientation},
    noise::{CellStyle, DistanceMetric},
    seed::Seed,
};
use indexmap::IndexMap;
use log::warn;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoEnumIterator};
use validator::{Validate, ValidationError};

/// Configuration that defines a world. Two worlds generated with the same
/// preset will always be identical. A preset is loaded once and never
/// modified while regions are being generated.
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Preset {
    /// Root seed for every randomized process. See [Seed] for the accepted
    /// input formats.
    pub seed: Seed,

    /// Side length of a chunk, in cells
    #[validate(range(min = 8, max = 4096))]
    pub chunk_size: usize,

    /// Side length of a single cell, in meters
    #[validate(range(min = 0.05, max = 1000.0))]
    pub cell_size: f64,

    /// Side length of a region, in chunks. Regions are the unit of
    /// generation: every region is generated in one pass, with one extra
    /// chunk of halo on each side.
    #[validate(range(min = 1, max = 64))]
    pub region_size: usize,

    /// What to do when a recoverable error occurs. See [FailurePolicy].
    pub failure_policy: FailurePolicy,

    #[validate]
    pub hex: HexConfig,

    /// The expected range of terrain heights, in meters. Height-based masks
    /// are normalized against this fixed range (rather than whatever the
    /// current region happens to contain), so they agree across regions.
    #[validate(custom = "validate_height_range")]
    pub height_range: HeightRange,

    #[validate]
    pub sea: SeaConfig,

    #[validate]
    pub elevation: ElevationConfig,

    #[validate]
    pub hydrology: HydrologyConfig,

    #[validate]
    pub climate: ClimateConfig,

    #[validate]
    pub classifier: ClassifierConfig,

    #[validate]
    pub obstacles: ObstacleConfig,

    #[validate]
    pub export: ExportConfig,
}

impl Preset {
    /// Check every field, and reset any invalid field (or block) back to its
    /// default value. Each reset is logged. This never fails: a bad preset
    /// still produces a world, just not the one that was asked for.
    pub fn sanitize(&mut self) {
        let errors = match self.validate() {
            Ok(()) => return,
            Err(errors) => errors,
        };

        let defaults = Self::default();
        // Sort so the log output is stable
        let mut fields: Vec<&str> = errors.errors().keys().copied().collect();
        fields.sort_unstable();
        for field in fields {
            warn!("Invalid preset field `{}`, resetting to default", field);
            match field {
                "chunk_size" => self.chunk_size = defaults.chunk_size,
                "cell_size" => self.cell_size = defaults.cell_size,
                "region_size" => self.region_size = defaults.region_size,
                "hex" => self.hex = defaults.hex,
                "height_range" => self.height_range = defaults.height_range,
                "elevation" => self.elevation.disable_invalid_steps(),
                "sea" => self.sea = defaults.sea,
                "hydrology" => self.hydrology = defaults.hydrology,
                "climate" => self.climate = defaults.climate,
                "classifier" => self.classifier = defaults.classifier,
                "obstacles" => self.obstacles = defaults.obstacles,
                "export" => self.export = defaults.export.clone(),
                other => warn!("No default available for `{}`", other),
            }
        }
    }

    /// The hex grid layout for chunks of this preset
    pub fn grid_spec(&self) -> HexGridSpec {
        HexGridSpec::new(
            self.hex.edge_length_m,
            self.cell_size,
            self.chunk_size,
            self.hex.orientation,
        )
    }

    /// Side length (in cells) of one region's stitched buffer, including one
    /// chunk of halo on each side
    pub fn extended_size(&self) -> usize {
        (self.region_size + 2) * self.chunk_size
    }
}

impl Default for Preset {
    fn default() -> Self {
        Self {
            seed: Seed::default(),
            chunk_size: 64,
            cell_size: 2.0,
            region_size: 4,
            failure_policy: FailurePolicy::default(),
            hex: HexConfig::default(),
            height_range: HeightRange::default(),
            sea: SeaConfig::default(),
            elevation: ElevationConfig::default(),
            hydrology: HydrologyConfig::default(),
            climate: ClimateConfig::default(),
            classifier: ClassifierConfig::default(),
            obstacles: ObstacleConfig::default(),
            export: ExportConfig::default(),
        }
    }
}

/// How recoverable errors are handled. Fatal errors (an empty elevation
/// pipeline, non-finite output, mismatched grid shapes) are always fatal
/// regardless of this setting.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailurePolicy {
    /// Log the problem and fall back: skip the failed step, sample a missing
    /// decal as zero, etc.
    Degrade,
    /// Treat every fallback as an error that fails the region
    Strict,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::Degrade
    }
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct HexConfig {
    /// Length of one hexagon edge, in meters
    #[validate(range(min = 0.1))]
    pub edge_length_m: f64,
    pub orientation: HexOrientation,
}

impl Default for HexConfig {
    fn default() -> Self {
        Self {
            edge_length_m: 8.0,
            orientation: HexOrientation::Pointy,
        }
    }
}

/// A closed range of heights, in meters
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeightRange {
    pub min: f32,
    pub max: f32,
}

impl HeightRange {
    pub fn span(&self) -> f32 {
        self.max - self.min
    }

    /// Map a height into `[0, 1]` relative to this range. Heights outside
    /// the range are clamped.
    pub fn normalize(&self, height: f32) -> f32 {
        ((height - self.min) / self.span()).clamp(0.0, 1.0)
    }
}

impl Default for HeightRange {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 1024.0,
        }
    }
}

fn validate_height_range(range: &HeightRange) -> Result<(), ValidationError> {
    if range.min.is_finite() && range.max.is_finite() && range.min < range.max
    {
        Ok(())
    } else {
        Err(ValidationError::new("height_range"))
    }
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SeaConfig {
    /// Everything below this height (meters) is sea
    pub level: f32,
    /// Land within this distance (meters) of the sea is painted as shore
    #[validate(range(min = 0.0))]
    pub shore_width_m: f64,
    /// Cells steeper than this (degrees) are impassable
    #[validate(range(min = 0.0, max = 90.0))]
    pub slope_obstacle_deg: f32,
}

impl Default for SeaConfig {
    fn default() -> Self {
        Self {
            level: 40.0,
            shore_width_m: 6.0,
            slope_obstacle_deg: 38.0,
        }
    }
}

/// The elevation pipeline, as an ordered list of declared steps
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ElevationConfig {
    #[validate(custom = "validate_steps")]
    pub steps: Vec<StepDecl>,
}

impl ElevationConfig {
    /// Turn off every enabled step with out-of-range parameters. The rest
    /// of the pipeline is kept as declared.
    pub fn disable_invalid_steps(&mut self) {
        for (index, decl) in self.steps.iter_mut().enumerate() {
            if decl.enabled && decl.step.validate().is_err() {
                warn!(
                    "Invalid parameters for elevation step `{}`, disabling it",
                    decl.label(index)
                );
                decl.enabled = false;
            }
        }
    }
}

/// Disabled steps never run, so only enabled ones are checked
fn validate_steps(steps: &[StepDecl]) -> Result<(), ValidationError> {
    let invalid = steps
        .iter()
        .position(|decl| decl.enabled && decl.step.validate().is_err());
    match invalid {
        Some(index) => {
            let mut error = ValidationError::new("invalid_step");
            error.add_param("index".into(), &index);
            Err(error)
        }
        None => Ok(()),
    }
}

impl Default for ElevationConfig {
    fn default() -> Self {
        Self {
            steps: elevation::default_steps(),
        }
    }
}

/// Configuration for a noise function. See [crate::noise::NoiseKernel].
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct NoiseFnConfig {
    pub noise_type: NoiseFnType,

    /// Number of octaves to add together. Each octave runs at `lacunarity`
    /// times the frequency of the last one. Ignored for Voronoi noise.
    #[validate(range(min = 1, max = 16))]
    pub octaves: usize,

    /// The frequency of the first (lowest) octave, in cycles per kilometer.
    /// For Voronoi noise, this is the number of cells per kilometer.
    #[validate(range(min = 0.0))]
    pub frequency: f64,

    /// Frequency multiplier between octaves. E.g. with 3 octaves, a base
    /// frequency of 1.0 and a lacunarity of 2.0, the octaves run at
    /// `[1.0, 2.0, 4.0]`.
    #[validate(range(min = 1.0, max = 8.0))]
    pub lacunarity: f64,

    /// Amplitude multiplier between octaves. The first amplitude is always
    /// 1.0, so with 3 octaves and a gain of 0.5 the amplitudes are
    /// `[1.0, 0.5, 0.25]`.
    #[validate(range(min = 0.0, max = 1.0))]
    pub gain: f64,

    /// Optional domain warp, applied to sample coordinates before the noise
    /// is evaluated
    #[validate(custom = "validate_warp")]
    pub warp: Option<WarpConfig>,

    /// Only used when `noise_type` is `voronoi`
    #[validate]
    pub voronoi: VoronoiConfig,
}

impl Default for NoiseFnConfig {
    fn default() -> Self {
        Self {
            noise_type: NoiseFnType::Fbm,
            octaves: 6,
            frequency: 0.5,
            lacunarity: 2.0,
            gain: 0.5,
            warp: None,
            voronoi: VoronoiConfig::default(),
        }
    }
}

/// The supported base noise types
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseFnType {
    Fbm,
    Ridged,
    Billow,
    Voronoi,
}

/// Alias so `validator`'s derive (which rejects array types) accepts the field
type Anisotropy = [f64; 2];

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct WarpConfig {
    /// Number of times the warp is applied
    #[validate(range(max = 8))]
    pub iterations: u8,
    /// Maximum displacement of the first iteration, in meters
    #[validate(range(min = 0.0))]
    pub amplitude_m: f64,
    /// Amplitude multiplier between iterations
    #[validate(range(min = 0.0, max = 1.0))]
    pub attenuation: f64,
    /// Per-axis displacement scale, `[x, z]`
    pub anisotropy: Anisotropy,
    /// Frequency of the warp field, in cycles per kilometer
    #[validate(range(min = 0.0))]
    pub frequency: f64,
    #[validate(range(min = 1, max = 16))]
    pub octaves: usize,
}

fn validate_warp(warp: &WarpConfig) -> Result<(), ValidationError> {
    warp.validate().map_err(|_| ValidationError::new("warp"))
}

impl Default for WarpConfig {
    fn default() -> Self {
        Self {
            iterations: 1,
            amplitude_m: 60.0,
            attenuation: 0.5,
            anisotropy: [1.0, 1.0],
            frequency: 1.0,
            octaves: 3,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct VoronoiConfig {
    pub metric: DistanceMetric,
    pub style: CellStyle,
    /// 0 places feature points on a regular lattice, 1 is fully random
    #[validate(range(min = 0.0, max = 1.0))]
    pub jitter: f64,
    /// Width of the soft threshold band, in cell units
    #[validate(range(min = 0.0))]
    pub width: f64,
}

impl Default for VoronoiConfig {
    fn default() -> Self {
        Self {
            metric: DistanceMetric::Euclidean,
            style: CellStyle::Cell,
            jitter: 1.0,
            width: 0.15,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct HydrologyConfig {
    #[validate]
    pub rivers: RiverConfig,
    #[validate]
    pub lakes: LakeConfig,
}

/// Droplet-based river carving
#[derive(Copy, Clone, Debug, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RiverConfig {
    pub enabled: bool,

    /// Number of droplets traced per region
    #[validate(range(max = 1_000_000))]
    pub num_droplets: usize,

    /// Droplets start in cells above this height quantile (0.7 means the
    /// highest 30% of the region)
    #[validate(range(min = 0.0, max = 1.0))]
    pub start_quantile: f64,

    /// Maximum number of cells a droplet can travel
    #[validate(range(min = 1))]
    pub max_steps: usize,

    /// Weight of the curl-noise lateral push, relative to steepest descent
    #[validate(range(min = 0.0, max = 1.0))]
    pub curl_strength: f64,

    /// Frequency of the curl field, in cycles per kilometer
    pub curl_frequency: f64,

    /// A cell becomes river when it's visited by more than this fraction of
    /// all droplets
    #[validate(range(min = 0.0, max = 1.0))]
    pub threshold_fraction: f64,

    /// How far river cells are dug down, in meters
    #[validate(range(min = 0.0))]
    pub excavation_depth_m: f32,
}

impl Default for RiverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            num_droplets: 600,
            start_quantile: 0.7,
            max_steps: 1024,
            curl_strength: 0.3,
            curl_frequency: 3.0,
            threshold_fraction: 0.02,
            excavation_depth_m: 2.5,
        }
    }
}

/// Highland lake carving
#[derive(Copy, Clone, Debug, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LakeConfig {
    pub enabled: bool,
    /// Number of candidate lake sites tried per region
    #[validate(range(max = 1000))]
    pub attempts: usize,
    #[validate(range(min = 0.0, max = 10_000.0))]
    pub min_radius_m: f64,
    #[validate(range(min = 0.0, max = 10_000.0))]
    pub max_radius_m: f64,
    /// Candidates are rejected unless the mean humidity around them is at
    /// least this
    #[validate(range(min = 0.0, max = 1.0))]
    pub humidity_threshold: f32,
    /// Lake surface sits this far (meters) below the mean shoreline height
    pub depth_m: f32,
    /// How much the lake outline is distorted by noise, as a fraction of the
    /// radius
    #[validate(range(min = 0.0, max = 1.0))]
    pub shore_warp: f64,
    /// Candidates below this normalized height are rejected, so only
    /// highland lakes are carved
    #[validate(range(min = 0.0, max = 1.0))]
    pub min_height: f32,
}

impl Default for LakeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            attempts: 8,
            min_radius_m: 16.0,
            max_radius_m: 48.0,
            humidity_threshold: 0.45,
            depth_m: 1.5,
            shore_warp: 0.3,
            min_height: 0.1,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ClimateConfig {
    #[validate]
    pub temperature: TemperatureConfig,
    #[validate]
    pub humidity: HumidityConfig,
}

/// Temperature is `base - latitude_gradient * z_km + noise_amp * fbm -
/// lapse_rate * height_km`, clamped to `[min_c, max_c]`
#[derive(Copy, Clone, Debug, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TemperatureConfig {
    pub base_c: f32,
    /// Degrees lost per kilometer travelled toward +z
    pub latitude_gradient_c_per_km: f32,
    pub noise_amp_c: f32,
    #[validate(range(min = 0.0))]
    pub noise_frequency: f64,
    /// Degrees lost per kilometer of elevation
    pub lapse_rate_c_per_km: f32,
    pub min_c: f32,
    pub max_c: f32,
}

impl Default for TemperatureConfig {
    fn default() -> Self {
        Self {
            base_c: 18.0,
            latitude_gradient_c_per_km: 0.5,
            noise_amp_c: 4.0,
            noise_frequency: 0.4,
            lapse_rate_c_per_km: 6.5,
            min_c: -30.0,
            max_c: 45.0,
        }
    }
}

/// Humidity is a base value plus a weighted sum of several terms, clamped to
/// `[0, 1]`
#[derive(Copy, Clone, Debug, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct HumidityConfig {
    #[validate(range(min = 0.0, max = 1.0))]
    pub base: f32,
    pub coast_weight: f32,
    /// Distance over which the coastal term fades out, in meters
    #[validate(range(min = 0.001))]
    pub coast_falloff_m: f32,
    /// Radius of the Gaussian smoothing applied to the coastal term, in
    /// cells. The working grid is reflect-padded by at least this much.
    #[validate(range(max = 256))]
    pub blur_radius: usize,
    pub river_weight: f32,
    #[validate(range(min = 0.001))]
    pub river_falloff_m: f32,
    /// Bonus for slopes facing into the wind
    pub orographic_weight: f32,
    /// Penalty for slopes facing away from the wind
    pub shadow_weight: f32,
    /// Direction the prevailing wind blows *toward*, in degrees clockwise
    /// from +x (east)
    pub wind_direction_deg: f32,
    /// Gradient (meters per meter) that maps to a full orographic term
    #[validate(range(min = 0.001))]
    pub gradient_scale: f32,
    pub noise_weight: f32,
    #[validate(range(min = 0.0))]
    pub noise_frequency: f64,
    pub dryness_weight: f32,
    /// Temperature where dryness kicks in
    pub hot_threshold_c: f32,
    /// Dryness reaches its full weight this many degrees above the
    /// threshold
    #[validate(range(min = 0.001))]
    pub dryness_range_c: f32,
}

impl Default for HumidityConfig {
    fn default() -> Self {
        Self {
            base: 0.35,
            coast_weight: 0.35,
            coast_falloff_m: 300.0,
            blur_radius: 4,
            river_weight: 0.2,
            river_falloff_m: 80.0,
            orographic_weight: 0.2,
            shadow_weight: 0.15,
            wind_direction_deg: 0.0,
            gradient_scale: 0.5,
            noise_weight: 0.15,
            noise_frequency: 0.8,
            dryness_weight: 0.3,
            hot_threshold_c: 28.0,
            dryness_range_c: 10.0,
        }
    }
}

/// Thresholds used to turn continuous fields into surface kinds. Heights
/// are in meters, temperatures in Celsius.
#[derive(Copy, Clone, Debug, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Land up to this height above sea level is beach
    #[validate(range(min = 0.0))]
    pub beach_height_m: f32,
    /// Everything above this height is snow, regardless of climate
    pub snow_line_m: f32,
    #[validate(range(min = 0.0, max = 90.0))]
    pub rock_slope_deg: f32,
    #[validate(range(min = 0.0, max = 90.0))]
    pub cliff_slope_deg: f32,
    pub snow_temp_c: f32,
    pub tundra_temp_c: f32,
    #[validate(range(min = 0.0, max = 1.0))]
    pub swamp_humidity: f32,
    /// Swamps only form up to this height above sea level
    pub swamp_max_height_m: f32,
    /// Temperature range used to normalize temperature for biome lookup
    pub biome_temp_min_c: f32,
    pub biome_temp_max_c: f32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            beach_height_m: 2.0,
            snow_line_m: 900.0,
            rock_slope_deg: 32.0,
            cliff_slope_deg: 48.0,
            snow_temp_c: -5.0,
            tundra_temp_c: 2.0,
            swamp_humidity: 0.8,
            swamp_max_height_m: 8.0,
            biome_temp_min_c: -5.0,
            biome_temp_max_c: 35.0,
        }
    }
}

/// Per-chunk scatter of small obstacles (boulders, trees)
#[derive(Copy, Clone, Debug, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ObstacleConfig {
    /// Chance that any passable land cell becomes an obstacle
    #[validate(range(min = 0.0, max = 1.0))]
    pub base_density: f64,
    /// Chance for forest and jungle cells, which replaces the base density
    #[validate(range(min = 0.0, max = 1.0))]
    pub forest_density: f64,
}

impl Default for ObstacleConfig {
    fn default() -> Self {
        Self {
            base_density: 0.002,
            forest_density: 0.04,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ExportConfig {
    pub world_id: String,
    /// Height that maps to the top of the 16-bit heightmap range
    #[validate(range(min = 0.001))]
    pub max_height: f64,
    /// URL pattern clients use to fetch chunk assets. `{cx}`, `{cz}` and
    /// `{file}` are substituted by the client.
    pub asset_url_pattern: String,
    /// Display color for each surface kind, keyed by name
    pub palette: IndexMap<String, String>,
    /// Write the per-chunk hex aggregation
    pub hexes: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            world_id: "world".into(),
            max_height: 1024.0,
            asset_url_pattern: "chunks/{cx}_{cz}/{file}".into(),
            palette: SurfaceKind::iter()
                .map(|kind| (kind.to_string(), kind.color().to_owned()))
                .collect(),
            hexes: true,
        }
    }
}
