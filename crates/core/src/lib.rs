//! Terra Region generates seamless, hex-addressable terrain for a streaming
//! open world. The world is generated one region (a square block of chunks)
//! at a time, over a buffer padded with one chunk of neighbor context on
//! every side, so independently generated regions line up exactly. Each
//! region is then sliced back into per-chunk grids and exported.
//!
//! ```
//! use terra_region::{LogDiagnostics, Preset, RegionProcessor, Seed};
//!
//! let preset = Preset {
//!     seed: Seed::Int(42),
//!     chunk_size: 16,
//!     region_size: 1,
//!     ..Preset::default()
//! };
//! let mut processor = RegionProcessor::new(preset);
//! let output = processor.process(0, 0, &mut LogDiagnostics).unwrap();
//! assert_eq!(output.chunks.len(), 1);
//! ```
//!
//! See [Preset] for details on how generation can be customized.

pub mod classify;
pub mod climate;
pub mod config;
pub mod diagnostics;
pub mod elevation;
pub mod error;
pub mod export;
pub mod grid;
pub mod hex;
pub mod hydrology;
pub mod noise;
pub mod region;
pub mod seed;
mod util;

pub use crate::{
    classify::{HexClass, NavKind, OverlayKind, SurfaceKind},
    config::{FailurePolicy, Preset},
    diagnostics::{
        CollectingDiagnostics, DiagnosticEvent, Diagnostics, LogDiagnostics,
    },
    error::FatalValidation,
    export::{ExportReport, Exporter},
    grid::{CoordGrid, Grid},
    hex::{HexGridSpec, HexOrientation},
    region::{
        generate_regions, GenResult, GenerationSummary, RegionOutput,
        RegionProcessor, RegionStage,
    },
    seed::{Seed, StageSeeds},
};
