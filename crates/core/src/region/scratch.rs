use crate::{
    classify::{NavKind, OverlayKind, SurfaceKind},
    grid::Grid,
};

/// Working buffers for one region's stitched grid, including the halo.
/// The buffers are kept between regions so they don't have to be
/// reallocated each time, and are reset before each region so nothing
/// from the previous region can leak into the next one.
#[derive(Clone, Debug)]
pub struct RegionScratch {
    size: usize,
    /// Meters
    pub height: Grid<f32>,
    /// Heights as the elevation pipeline left them, before any water was
    /// carved in
    pub base_height: Grid<f32>,
    /// Degrees
    pub slope: Grid<f32>,
    /// [SurfaceKind] ids
    pub surface: Grid<u8>,
    /// [NavKind] ids
    pub navigation: Grid<u8>,
    /// [OverlayKind] ids
    pub overlay: Grid<u8>,
    /// Celsius. Only meaningful once the climate stage has run.
    pub temperature: Grid<f32>,
    /// `[0, 1]`. Only meaningful once the climate stage has run.
    pub humidity: Grid<f32>,
}

impl RegionScratch {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            height: Grid::square(size, 0.0),
            base_height: Grid::square(size, 0.0),
            slope: Grid::square(size, 0.0),
            surface: Grid::square(size, SurfaceKind::Default.id()),
            navigation: Grid::square(size, NavKind::Passable.id()),
            overlay: Grid::square(size, OverlayKind::None.id()),
            temperature: Grid::square(size, 0.0),
            humidity: Grid::square(size, 0.0),
        }
    }

    /// Side length of every buffer
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get ready for a new region. Buffers of the right size are reset in
    /// place, anything else is reallocated.
    pub fn prepare(&mut self, size: usize) {
        if size != self.size
            || self.height.width() != size
            || self.slope.width() != size
        {
            *self = Self::new(size);
            return;
        }
        self.height.fill(0.0);
        self.base_height.fill(0.0);
        self.slope.fill(0.0);
        self.surface.fill(SurfaceKind::Default.id());
        self.navigation.fill(NavKind::Passable.id());
        self.overlay.fill(OverlayKind::None.id());
        self.temperature.fill(0.0);
        self.humidity.fill(0.0);
    }
}
