use crate::classify::{NavKind, OverlayKind, SurfaceKind};

const BASE_SHIFT: u32 = 27;
const OVERLAY_SHIFT: u32 = 22;
const BLEND_SHIFT: u32 = 14;
const HOLE_BIT: u32 = 1 << 3;
const NAV_BIT: u32 = 1 << 2;
const AUTO_BIT: u32 = 1 << 1;
const ID_MASK: u32 = 0b1_1111;

/// One pixel of the control map. Packed into a `u32` as:
///
/// ```text
/// 31    27 26    22 21          14 13    4  3    2    1    0
/// [ base ] [overlay] [   blend   ] [ zero ] hole nav  auto zero
/// ```
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ControlPixel {
    /// Base surface id, 5 bits
    pub base: u8,
    /// Overlay id, 5 bits
    pub overlay: u8,
    /// How strongly the overlay is blended over the base
    pub blend: u8,
    pub hole: bool,
    pub navigable: bool,
    /// Texture this pixel with the renderer's slope-based auto shader
    pub auto_shader: bool,
}

impl ControlPixel {
    /// Build the control value for a classified cell
    pub fn from_kinds(
        surface: SurfaceKind,
        overlay: OverlayKind,
        nav: NavKind,
    ) -> Self {
        let blend = match overlay {
            OverlayKind::River | OverlayKind::Lake | OverlayKind::Road => 255,
            OverlayKind::Shore => 128,
            OverlayKind::None => 0,
        };
        Self {
            base: surface.id(),
            overlay: overlay.id(),
            blend,
            hole: false,
            navigable: nav.navigable(),
            auto_shader: surface.auto_shaded(),
        }
    }

    /// Ids wider than 5 bits are truncated
    pub fn pack(self) -> u32 {
        let mut value = (self.base as u32 & ID_MASK) << BASE_SHIFT
            | (self.overlay as u32 & ID_MASK) << OVERLAY_SHIFT
            | (self.blend as u32) << BLEND_SHIFT;
        if self.hole {
            value |= HOLE_BIT;
        }
        if self.navigable {
            value |= NAV_BIT;
        }
        if self.auto_shader {
            value |= AUTO_BIT;
        }
        value
    }

    pub fn unpack(value: u32) -> Self {
        Self {
            base: (value >> BASE_SHIFT & ID_MASK) as u8,
            overlay: (value >> OVERLAY_SHIFT & ID_MASK) as u8,
            blend: (value >> BLEND_SHIFT & 0xff) as u8,
            hole: value & HOLE_BIT != 0,
            navigable: value & NAV_BIT != 0,
            auto_shader: value & AUTO_BIT != 0,
        }
    }
}
