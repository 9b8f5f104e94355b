//! Hexagon grid geometry.
//!
//! ## Coordinate Systems
//!
//! The generator itself works on square pixel grids, but the world consumed
//! by the client is hex-addressable. This module maps between the two.
//!
//! ### Hex coordinates
//!
//! Hex cells are addressed with **axial** coordinates `(q, r)`, which are the
//! [cube coordinates of Amit Patel](https://www.redblobgames.com/grids/hexagons/#coordinates-cube)
//! with the third component dropped: for every cell, `q + r + s = 0`, so `s`
//! can always be derived. Cube coordinates make distance, rounding and
//! neighbor math simple; axial coordinates make storage compact.
//!
//! ### Pixel (world) coordinates
//!
//! Pixels are square cells of `meters_per_pixel` meters on a side. The global
//! pixel `(gx, gz)` has its center at world position
//! `((gx + 0.5) * mpp, (gz + 0.5) * mpp)` meters, with `+x` to the east and
//! `+z` to the south.
//!
//! ```text
//! +-------------------+
//! |        -z         |
//! |         ^         |
//! |         |         |
//! | -x <----o----> +x |
//! |         |         |
//! |         v         |
//! |        +z         |
//! +-------------------+
//! ```
//!
//! Converting a pixel to a hex projects its center through the inverse of
//! the hex basis (see [HexOrientation]) to get a *fractional* axial
//! coordinate, which is then snapped to a whole cell with cube rounding
//! ([FractionalHexPoint::round]). Because the conversion only depends on
//! global pixel coordinates, a pixel always lands in the same hex regardless
//! of which chunk it's sliced into.

mod spec;
mod unit;

pub use self::{spec::*, unit::*};
