//! Discrete categories derived from the continuous fields, plus the fixed
//! id tables used to store them compactly.

use crate::{config::ClassifierConfig, grid::Grid, util::cmp_partial};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// Material of the ground surface. The discriminant is the id written to
/// grids and exports. Ids have to fit in the 5-bit base/overlay fields of
/// the control map, so they must stay below 32.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumIter,
    EnumString,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum SurfaceKind {
    Default = 0,
    Sand = 1,
    Grass = 2,
    Forest = 3,
    Jungle = 4,
    Desert = 5,
    Tundra = 6,
    Snow = 7,
    Rock = 8,
    Cliff = 9,
    Swamp = 10,
    Shore = 11,
    Riverbed = 12,
    LakeBed = 13,
    SeaFloor = 14,
    Road = 15,
}

impl SurfaceKind {
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Look up a kind by id. Returns `None` for ids with no entry in the
    /// table.
    pub fn from_id(id: u8) -> Option<Self> {
        Self::iter().find(|kind| kind.id() == id)
    }

    /// Is this the bottom of a body of water?
    pub fn is_water(self) -> bool {
        matches!(self, Self::Riverbed | Self::LakeBed | Self::SeaFloor)
    }

    /// Rock and cliff faces are textured by the renderer's slope-based auto
    /// shader instead of the splat map
    pub fn auto_shaded(self) -> bool {
        matches!(self, Self::Rock | Self::Cliff)
    }

    /// Default display color, as `#rrggbb`
    pub fn color(self) -> &'static str {
        match self {
            Self::Default => "#808080",
            Self::Sand => "#e2d29b",
            Self::Grass => "#7cab4f",
            Self::Forest => "#3f7d3a",
            Self::Jungle => "#2b6b2f",
            Self::Desert => "#d9b36a",
            Self::Tundra => "#a8b39a",
            Self::Snow => "#f4f6f8",
            Self::Rock => "#7d766d",
            Self::Cliff => "#5c5650",
            Self::Swamp => "#4f5d3a",
            Self::Shore => "#c8bb8a",
            Self::Riverbed => "#4a7fb5",
            Self::LakeBed => "#3d6fa8",
            Self::SeaFloor => "#2c5687",
            Self::Road => "#9b8265",
        }
    }
}

/// How (and whether) a cell can be walked over
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumIter,
    EnumString,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum NavKind {
    Passable = 0,
    Obstacle = 1,
    Water = 2,
    Bridge = 3,
}

impl NavKind {
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::iter().find(|kind| kind.id() == id)
    }

    /// Can a ground unit move through this cell?
    pub fn navigable(self) -> bool {
        matches!(self, Self::Passable | Self::Bridge)
    }
}

/// Linear features painted on top of the base surface
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumIter,
    EnumString,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum OverlayKind {
    None = 0,
    River = 1,
    Shore = 2,
    Lake = 3,
    Road = 4,
}

impl OverlayKind {
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::iter().find(|kind| kind.id() == id)
    }
}

/// The class a hex cell gets when its pixels are aggregated. Variants are
/// listed from highest to lowest priority.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HexClass {
    Obstacle,
    Water,
    Road,
    Slope,
    Biome(SurfaceKind),
    Default,
}

impl HexClass {
    /// Classify one pixel for hex aggregation
    pub fn of_pixel(
        surface: SurfaceKind,
        nav: NavKind,
        overlay: OverlayKind,
    ) -> Self {
        if nav == NavKind::Obstacle {
            Self::Obstacle
        } else if nav == NavKind::Water
            || surface.is_water()
            || matches!(overlay, OverlayKind::River | OverlayKind::Lake)
        {
            Self::Water
        } else if overlay == OverlayKind::Road || surface == SurfaceKind::Road
        {
            Self::Road
        } else if surface.auto_shaded() {
            Self::Slope
        } else if surface == SurfaceKind::Default {
            Self::Default
        } else {
            Self::Biome(surface)
        }
    }

    /// Higher wins when a hex contains pixels of several classes
    pub fn priority(self) -> u8 {
        match self {
            Self::Obstacle => 5,
            Self::Water => 4,
            Self::Road => 3,
            Self::Slope => 2,
            Self::Biome(_) => 1,
            Self::Default => 0,
        }
    }
}

/// Temperature and humidity at a cell
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ClimateSample {
    pub temperature: f32,
    pub humidity: f32,
}

/// A benchmark point in (normalized temperature, humidity) space. Land
/// cells get the biome of the nearest point.
struct BiomePoint(SurfaceKind, f32, f32);

impl BiomePoint {
    fn distance_to(&self, temperature_norm: f32, humidity: f32) -> f32 {
        (self.1 - temperature_norm).abs() + (self.2 - humidity).abs()
    }
}

const BIOME_POINTS: &[BiomePoint] = &[
    BiomePoint(SurfaceKind::Desert, 0.85, 0.08),
    BiomePoint(SurfaceKind::Desert, 0.60, 0.04),
    BiomePoint(SurfaceKind::Grass, 0.55, 0.30),
    BiomePoint(SurfaceKind::Grass, 0.25, 0.25),
    BiomePoint(SurfaceKind::Forest, 0.45, 0.60),
    BiomePoint(SurfaceKind::Forest, 0.20, 0.70),
    BiomePoint(SurfaceKind::Jungle, 0.85, 0.85),
];

/// Everything the classifier looks at for one cell
#[derive(Copy, Clone, Debug)]
pub struct CellInputs {
    pub height: f32,
    pub slope_deg: f32,
    pub overlay: OverlayKind,
    /// Missing before the climate stage has run
    pub climate: Option<ClimateSample>,
}

/// Pure threshold map from a cell's fields to a surface kind. Overlays
/// win, then sea/beach, then slope, then the snow line, then climate.
pub fn classify_cell(
    config: &ClassifierConfig,
    sea_level: f32,
    cell: CellInputs,
) -> SurfaceKind {
    match cell.overlay {
        OverlayKind::River => return SurfaceKind::Riverbed,
        OverlayKind::Lake => return SurfaceKind::LakeBed,
        OverlayKind::Road => return SurfaceKind::Road,
        OverlayKind::Shore => return SurfaceKind::Shore,
        OverlayKind::None => {}
    }

    let above_sea = cell.height - sea_level;
    if above_sea < 0.0 {
        return SurfaceKind::SeaFloor;
    }
    if above_sea < config.beach_height_m {
        return SurfaceKind::Sand;
    }
    if cell.slope_deg >= config.cliff_slope_deg {
        return SurfaceKind::Cliff;
    }
    if cell.slope_deg >= config.rock_slope_deg {
        return SurfaceKind::Rock;
    }
    if cell.height >= config.snow_line_m {
        return SurfaceKind::Snow;
    }

    let climate = match cell.climate {
        Some(climate) => climate,
        None => return SurfaceKind::Grass,
    };
    if climate.temperature <= config.snow_temp_c {
        return SurfaceKind::Snow;
    }
    if climate.temperature <= config.tundra_temp_c {
        return SurfaceKind::Tundra;
    }
    if climate.humidity >= config.swamp_humidity
        && above_sea <= config.swamp_max_height_m
    {
        return SurfaceKind::Swamp;
    }

    let temperature_span =
        (config.biome_temp_max_c - config.biome_temp_min_c).max(1e-3);
    let temperature_norm = ((climate.temperature - config.biome_temp_min_c)
        / temperature_span)
        .clamp(0.0, 1.0);
    BIOME_POINTS
        .iter()
        .map(|p| (p.0, p.distance_to(temperature_norm, climate.humidity)))
        .min_by(|(_, a), (_, b)| cmp_partial(a, b))
        .map(|(kind, _)| kind)
        // BIOME_POINTS is never empty
        .unwrap_or(SurfaceKind::Grass)
}

/// Read-only views of the layers the classifier needs
pub struct ClassifyLayers<'a> {
    pub height: &'a Grid<f32>,
    pub slope: &'a Grid<f32>,
    pub overlay: &'a Grid<u8>,
    /// `(temperature, humidity)`, if climate has been computed
    pub climate: Option<(&'a Grid<f32>, &'a Grid<f32>)>,
}

/// Classify every cell of a stitched grid. Each cell only depends on its own
/// inputs, so the result never depends on chunk boundaries.
pub fn classify_grid(
    config: &ClassifierConfig,
    sea_level: f32,
    layers: &ClassifyLayers,
    surface: &mut Grid<u8>,
) -> anyhow::Result<()> {
    surface.ensure_same_shape(layers.height, "surface")?;
    layers.height.ensure_same_shape(layers.slope, "slope")?;
    layers.height.ensure_same_shape(layers.overlay, "overlay")?;
    if let Some((temperature, humidity)) = layers.climate {
        layers.height.ensure_same_shape(temperature, "temperature")?;
        layers.height.ensure_same_shape(humidity, "humidity")?;
    }

    surface.par_fill_with(|x, z| {
        let cell = CellInputs {
            height: layers.height.get(x, z),
            slope_deg: layers.slope.get(x, z),
            overlay: OverlayKind::from_id(layers.overlay.get(x, z))
                .unwrap_or(OverlayKind::None),
            climate: layers.climate.map(|(temperature, humidity)| {
                ClimateSample {
                    temperature: temperature.get(x, z),
                    humidity: humidity.get(x, z),
                }
            }),
        };
        classify_cell(config, sea_level, cell).id()
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_round_trip() {
        for kind in SurfaceKind::iter() {
            assert_eq!(SurfaceKind::from_id(kind.id()), Some(kind));
            assert!(kind.id() < 32, "{} doesn't fit in 5 bits", kind);
        }
        for kind in NavKind::iter() {
            assert_eq!(NavKind::from_id(kind.id()), Some(kind));
        }
        for kind in OverlayKind::iter() {
            assert_eq!(OverlayKind::from_id(kind.id()), Some(kind));
            assert!(kind.id() < 32);
        }
        assert_eq!(SurfaceKind::from_id(31), None);
        assert_eq!(NavKind::from_id(4), None);
    }

    #[test]
    fn test_names() {
        assert_eq!(SurfaceKind::SeaFloor.to_string(), "sea_floor");
        assert_eq!(
            "lake_bed".parse::<SurfaceKind>().unwrap(),
            SurfaceKind::LakeBed
        );
        assert_eq!(
            serde_json::to_string(&NavKind::Obstacle).unwrap(),
            "\"obstacle\""
        );
    }

    #[test]
    fn test_hex_priority() {
        use NavKind::{Obstacle, Passable, Water};
        let class = HexClass::of_pixel;
        let obstacle =
            class(SurfaceKind::Grass, Obstacle, OverlayKind::River);
        let water = class(SurfaceKind::Grass, Water, OverlayKind::None);
        let road = class(SurfaceKind::Road, Passable, OverlayKind::None);
        let rock = class(SurfaceKind::Rock, Passable, OverlayKind::None);
        let grass = class(SurfaceKind::Grass, Passable, OverlayKind::None);
        assert_eq!(obstacle, HexClass::Obstacle);
        assert_eq!(road, HexClass::Road);
        assert_eq!(rock, HexClass::Slope);
        assert_eq!(grass, HexClass::Biome(SurfaceKind::Grass));
        let order = [obstacle, water, road, rock, grass, HexClass::Default];
        for pair in order.windows(2) {
            assert!(pair[0].priority() > pair[1].priority());
        }
    }

    fn cell(height: f32, slope_deg: f32) -> CellInputs {
        CellInputs {
            height,
            slope_deg,
            overlay: OverlayKind::None,
            climate: None,
        }
    }

    #[test]
    fn test_classify_thresholds() {
        let config = ClassifierConfig::default();
        let classify = |c| classify_cell(&config, 40.0, c);
        assert_eq!(classify(cell(10.0, 0.0)), SurfaceKind::SeaFloor);
        assert_eq!(classify(cell(41.0, 0.0)), SurfaceKind::Sand);
        assert_eq!(classify(cell(100.0, 60.0)), SurfaceKind::Cliff);
        assert_eq!(classify(cell(100.0, 35.0)), SurfaceKind::Rock);
        assert_eq!(classify(cell(950.0, 5.0)), SurfaceKind::Snow);
        assert_eq!(classify(cell(100.0, 5.0)), SurfaceKind::Grass);

        // Overlays override everything, even below sea level
        let river = CellInputs {
            overlay: OverlayKind::River,
            ..cell(10.0, 0.0)
        };
        assert_eq!(classify(river), SurfaceKind::Riverbed);
    }

    #[test]
    fn test_classify_climate() {
        let config = ClassifierConfig::default();
        let classify = |temperature, humidity, height| {
            let inputs = CellInputs {
                climate: Some(ClimateSample {
                    temperature,
                    humidity,
                }),
                ..cell(height, 2.0)
            };
            classify_cell(&config, 40.0, inputs)
        };
        assert_eq!(classify(-10.0, 0.5, 300.0), SurfaceKind::Snow);
        assert_eq!(classify(0.0, 0.5, 300.0), SurfaceKind::Tundra);
        // Wet lowland
        assert_eq!(classify(20.0, 0.9, 45.0), SurfaceKind::Swamp);
        assert_eq!(classify(33.0, 0.05, 300.0), SurfaceKind::Desert);
        assert_eq!(classify(33.0, 0.9, 300.0), SurfaceKind::Jungle);
        assert_eq!(classify(12.0, 0.65, 300.0), SurfaceKind::Forest);
    }

    #[test]
    fn test_classify_grid_shape_mismatch() {
        let config = ClassifierConfig::default();
        let height = Grid::new(4, 4, 100.0);
        let slope = Grid::new(4, 4, 0.0);
        let overlay = Grid::new(4, 4, 0u8);
        let layers = ClassifyLayers {
            height: &height,
            slope: &slope,
            overlay: &overlay,
            climate: None,
        };
        let mut surface = Grid::new(4, 4, 0u8);
        classify_grid(&config, 40.0, &layers, &mut surface).unwrap();
        assert!(surface
            .data()
            .iter()
            .all(|id| *id == SurfaceKind::Grass.id()));

        let mut wrong = Grid::new(3, 4, 0u8);
        assert!(classify_grid(&config, 40.0, &layers, &mut wrong).is_err());
    }
}
