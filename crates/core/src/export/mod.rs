//! Writes finished chunks to disk, in the formats the client reads.
//!
//! Layout under the export root:
//!
//! ```text
//! _world_meta.json
//! chunks/<cx>_<cz>.meta.json
//! chunks/<cx>_<cz>.bin.gz
//! chunks/<cx>_<cz>/heightmap.r16
//! chunks/<cx>_<cz>/control.r32
//! chunks/<cx>_<cz>/navigation.rle.json
//! chunks/<cx>_<cz>/hexes.json
//! regions/<rx>_<rz>/region_meta.json
//! ```
//!
//! Every file is written to a temporary path, then renamed into place, so a
//! reader never sees a partial file. A failed write is recorded and the
//! export moves on to the next file.

mod control;
mod navigation;

pub use self::{control::ControlPixel, navigation::NavigationRle};

use crate::{
    classify::{HexClass, NavKind, OverlayKind, SurfaceKind},
    config::{ExportConfig, Preset},
    diagnostics::{DiagnosticEvent, Diagnostics},
    grid::Grid,
    hex::{HexAggregate, HexGridSpec, HexOrientation},
    region::{ChunkLayers, GenResult},
};
use anyhow::{anyhow, Context};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use indexmap::IndexMap;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::{Read, Write},
    path::{Path, PathBuf},
};
use strum::IntoEnumIterator;

/// Bumped whenever the chunk metadata or bundle layout changes
pub const CHUNK_FORMAT_VERSION: u32 = 1;

pub const WORLD_META_FILE: &str = "_world_meta.json";
pub const REGION_META_FILE: &str = "region_meta.json";

/// Which files were written, and which weren't
#[derive(Clone, Debug, Default)]
pub struct ExportReport {
    pub written: Vec<PathBuf>,
    /// `(path, error message)`
    pub failed: Vec<(PathBuf, String)>,
}

impl ExportReport {
    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Metadata that sits next to each chunk's grids
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub version: u32,
    #[serde(rename = "type")]
    pub kind: String,
    pub seed: u64,
    pub cx: i32,
    pub cz: i32,
    pub size: usize,
    pub cell_size: f64,
    pub grid_spec: HexGridSpec,
    pub stage_seeds: IndexMap<String, u32>,
    pub capabilities: Vec<String>,
    pub metrics: IndexMap<String, f64>,
}

impl ChunkMeta {
    pub fn new(chunk: &GenResult) -> Self {
        Self {
            version: CHUNK_FORMAT_VERSION,
            kind: "chunk".into(),
            seed: chunk.seed,
            cx: chunk.cx,
            cz: chunk.cz,
            size: chunk.size,
            cell_size: chunk.cell_size,
            grid_spec: chunk.grid_spec,
            stage_seeds: chunk
                .stage_seeds
                .labeled()
                .iter()
                .map(|(label, seed)| (label.to_string(), *seed))
                .collect(),
            capabilities: chunk.capabilities.clone(),
            metrics: chunk.metrics.clone(),
        }
    }
}

/// The raw chunk grids, stored as gzip-compressed CBOR
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkBundle {
    pub size: usize,
    pub height: Vec<f32>,
    pub surface: Vec<u8>,
    pub navigation: Vec<u8>,
}

impl ChunkBundle {
    pub fn new(size: usize, layers: &ChunkLayers) -> Self {
        Self {
            size,
            height: layers.height.data().to_vec(),
            surface: layers.surface.data().to_vec(),
            navigation: layers.navigation.data().to_vec(),
        }
    }

    pub fn to_gzip_cbor(&self) -> anyhow::Result<Vec<u8>> {
        // The gzip header's mtime is left at zero, so identical bundles
        // compress to identical bytes
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        serde_cbor::to_writer(&mut encoder, self)
            .context("error serializing chunk bundle")?;
        Ok(encoder.finish()?)
    }

    pub fn from_gzip_cbor(read: impl Read) -> anyhow::Result<Self> {
        serde_cbor::from_reader(GzDecoder::new(read))
            .context("error deserializing chunk bundle")
    }
}

/// The hex aggregation of one chunk
#[derive(Clone, Debug, Serialize)]
struct HexesFile<'a> {
    orientation: HexOrientation,
    edge_m: f64,
    hexes: &'a [HexAggregate<HexClass>],
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaletteEntry {
    pub id: u8,
    pub color: String,
}

/// World-level metadata that clients read before fetching any chunk
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorldMeta {
    pub world_id: String,
    pub edge_m: f64,
    pub meters_per_pixel: f64,
    pub chunk_px: usize,
    pub orientation: HexOrientation,
    /// Height at heightmap value 0
    pub height_min: f64,
    /// Height at heightmap value 65535
    pub height_max: f64,
    pub asset_url_pattern: String,
    /// Surface kinds by name
    pub palette: IndexMap<String, PaletteEntry>,
}

impl WorldMeta {
    pub fn new(config: &ExportConfig, grid_spec: &HexGridSpec) -> Self {
        let palette = SurfaceKind::iter()
            .map(|kind| {
                let name = kind.to_string();
                let color = match config.palette.get(&name) {
                    Some(color) => color.clone(),
                    None => kind.color().to_owned(),
                };
                (name, PaletteEntry { id: kind.id(), color })
            })
            .collect();
        Self {
            world_id: config.world_id.clone(),
            edge_m: grid_spec.edge_length_m,
            meters_per_pixel: grid_spec.meters_per_pixel,
            chunk_px: grid_spec.chunk_px,
            orientation: grid_spec.orientation,
            height_min: 0.0,
            height_max: config.max_height,
            asset_url_pattern: config.asset_url_pattern.clone(),
            palette,
        }
    }
}

/// Encode heights as little-endian `u16`s, mapping `[0, max_height]` onto
/// the full range. Anything outside that range is clipped.
pub fn encode_heightmap(height: &Grid<f32>, max_height: f64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(height.len() * 2);
    for &h in height.data() {
        let t = (h as f64 / max_height).clamp(0.0, 1.0);
        let value = (t * u16::MAX as f64).round() as u16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Encode the control map as little-endian `u32`s. Fails if any layer
/// holds an id with no entry in its table.
pub fn encode_control(layers: &ChunkLayers) -> anyhow::Result<Vec<u8>> {
    let surface = layers.surface.data();
    let overlay = layers.overlay.data();
    let navigation = layers.navigation.data();
    let mut bytes = Vec::with_capacity(surface.len() * 4);
    for i in 0..surface.len() {
        let pixel = ControlPixel::from_kinds(
            SurfaceKind::from_id(surface[i])
                .ok_or_else(|| anyhow!("invalid surface id {}", surface[i]))?,
            OverlayKind::from_id(overlay[i])
                .ok_or_else(|| anyhow!("invalid overlay id {}", overlay[i]))?,
            NavKind::from_id(navigation[i]).ok_or_else(|| {
                anyhow!("invalid navigation id {}", navigation[i])
            })?,
        );
        bytes.extend_from_slice(&pixel.pack().to_le_bytes());
    }
    Ok(bytes)
}

/// Write a file by writing a sibling `.tmp` file, then renaming it over
/// the destination. Parent directories are created as needed.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("error creating {:?}", parent))?;
    }
    let mut tmp_path = path.as_os_str().to_owned();
    tmp_path.push(".tmp");
    let tmp_path = PathBuf::from(tmp_path);
    let result = File::create(&tmp_path)
        .with_context(|| format!("error creating {:?}", tmp_path))
        .and_then(|mut file| -> anyhow::Result<()> {
            file.write_all(bytes)?;
            file.sync_all()?;
            Ok(())
        })
        .and_then(|()| {
            fs::rename(&tmp_path, path)
                .with_context(|| format!("error renaming {:?}", tmp_path))
        });
    if result.is_err() {
        // Don't leave a partial file behind
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

/// Writes chunks, regions and world metadata under a root directory
#[derive(Clone, Debug)]
pub struct Exporter {
    root: PathBuf,
    config: ExportConfig,
    grid_spec: HexGridSpec,
}

impl Exporter {
    pub fn new(root: impl Into<PathBuf>, preset: &Preset) -> Self {
        Self {
            root: root.into(),
            config: preset.export.clone(),
            grid_spec: preset.grid_spec(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn chunks_dir(&self) -> PathBuf {
        self.root.join("chunks")
    }

    /// Directory holding a chunk's per-layer files
    pub fn chunk_dir(&self, cx: i32, cz: i32) -> PathBuf {
        self.chunks_dir().join(format!("{}_{}", cx, cz))
    }

    pub fn region_meta_path(&self, rx: i32, rz: i32) -> PathBuf {
        self.root
            .join("regions")
            .join(format!("{}_{}", rx, rz))
            .join(REGION_META_FILE)
    }

    /// Write one file, recording the outcome in the report. Encoding
    /// errors are treated the same as I/O errors.
    fn write_file(
        &self,
        path: PathBuf,
        bytes: anyhow::Result<Vec<u8>>,
        report: &mut ExportReport,
        diagnostics: &mut dyn Diagnostics,
    ) {
        match bytes.and_then(|bytes| write_atomic(&path, &bytes)) {
            Ok(()) => report.written.push(path),
            Err(error) => {
                let error = format!("{:#}", error);
                diagnostics.record(DiagnosticEvent::ExportFailed {
                    path: path.clone(),
                    error: error.clone(),
                });
                report.failed.push((path, error));
            }
        }
    }

    /// Write every file for a single chunk
    pub fn export_chunk(
        &self,
        chunk: &GenResult,
        report: &mut ExportReport,
        diagnostics: &mut dyn Diagnostics,
    ) {
        let dir = self.chunk_dir(chunk.cx, chunk.cz);
        let layers = &chunk.layers;

        self.write_file(
            dir.join("heightmap.r16"),
            Ok(encode_heightmap(&layers.height, self.config.max_height)),
            report,
            diagnostics,
        );
        self.write_file(
            dir.join("control.r32"),
            encode_control(layers),
            report,
            diagnostics,
        );
        let navigation = NavigationRle::encode(&layers.navigation);
        self.write_file(
            dir.join("navigation.rle.json"),
            serde_json::to_vec(&navigation).map_err(anyhow::Error::from),
            report,
            diagnostics,
        );
        if self.config.hexes {
            let hexes = HexesFile {
                orientation: self.grid_spec.orientation,
                edge_m: self.grid_spec.edge_length_m,
                hexes: &chunk.hexes,
            };
            self.write_file(
                dir.join("hexes.json"),
                serde_json::to_vec(&hexes).map_err(anyhow::Error::from),
                report,
                diagnostics,
            );
        }

        let name = format!("{}_{}", chunk.cx, chunk.cz);
        let meta = ChunkMeta::new(chunk);
        self.write_file(
            self.chunks_dir().join(format!("{}.meta.json", name)),
            serde_json::to_vec_pretty(&meta).map_err(anyhow::Error::from),
            report,
            diagnostics,
        );
        let bundle = ChunkBundle::new(chunk.size, layers);
        self.write_file(
            self.chunks_dir().join(format!("{}.bin.gz", name)),
            bundle.to_gzip_cbor(),
            report,
            diagnostics,
        );
    }

    /// Write every chunk of a region, plus the region's plan file
    pub fn export_region(
        &self,
        (rx, rz): (i32, i32),
        chunks: &[GenResult],
        diagnostics: &mut dyn Diagnostics,
    ) -> ExportReport {
        let mut report = ExportReport::default();
        for chunk in chunks {
            self.export_chunk(chunk, &mut report, diagnostics);
        }

        let path = self.region_meta_path(rx, rz);
        let keys: Vec<(i32, i32)> =
            chunks.iter().map(|chunk| (chunk.cx, chunk.cz)).collect();
        let bytes = self.region_meta(&path, &keys);
        self.write_file(path, bytes, &mut report, diagnostics);

        debug!(
            "Exported region ({}, {}): {} files written, {} failed",
            rx,
            rz,
            report.written.len(),
            report.failed.len()
        );
        report
    }

    /// Build the region plan file. Plans are written by tools downstream of
    /// the generator, so anything already in the file is kept as-is. Chunks
    /// without a plan get an empty one.
    fn region_meta(
        &self,
        path: &Path,
        chunks: &[(i32, i32)],
    ) -> anyhow::Result<Vec<u8>> {
        let mut plans: IndexMap<String, serde_json::Value> =
            if path.exists() {
                let file = File::open(path)
                    .with_context(|| format!("error opening {:?}", path))?;
                // Never overwrite a plan file that doesn't parse
                serde_json::from_reader(file)
                    .with_context(|| format!("error parsing {:?}", path))?
            } else {
                IndexMap::new()
            };
        for (cx, cz) in chunks {
            plans.entry(format!("{},{}", cx, cz)).or_insert_with(|| {
                serde_json::json!({"roads": [], "rivers": []})
            });
        }
        Ok(serde_json::to_vec_pretty(&plans)?)
    }

    /// Write `_world_meta.json`
    pub fn write_world_meta(&self) -> anyhow::Result<PathBuf> {
        let path = self.root.join(WORLD_META_FILE);
        let meta = WorldMeta::new(&self.config, &self.grid_spec);
        let bytes = serde_json::to_vec_pretty(&meta)?;
        write_atomic(&path, &bytes).map_err(|error| {
            warn!("Failed to write world metadata: {:#}", error);
            error
        })?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layers(size: usize) -> ChunkLayers {
        let mut layers = ChunkLayers::new(size);
        layers.height.par_fill_with(|x, _| x as f32 * 100.0);
        layers.surface.fill(SurfaceKind::Grass.id());
        layers.navigation.fill(NavKind::Passable.id());
        layers.overlay.set(0, 0, OverlayKind::River.id());
        layers
    }

    #[test]
    fn test_write_atomic_cleans_up() {
        let dir = std::env::temp_dir()
            .join(format!("terra-region-atomic-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);

        let path = dir.join("nested").join("file.json");
        write_atomic(&path, b"{}").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"{}");
        assert!(!dir.join("nested/file.json.tmp").exists());

        // A non-empty directory can't be renamed over
        let blocked = dir.join("blocked");
        fs::create_dir_all(blocked.join("inner")).unwrap();
        assert!(write_atomic(&blocked, b"{}").is_err());
        assert!(!dir.join("blocked.tmp").exists());
        assert!(blocked.join("inner").is_dir());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_encode_heightmap() {
        let height = Grid::from_vec(4, 1, vec![-5.0, 0.0, 512.0, 2000.0])
            .unwrap();
        let bytes = encode_heightmap(&height, 1024.0);
        let values: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        assert_eq!(values, vec![0, 0, 32768, 65535]);
    }

    #[test]
    fn test_encode_control() {
        let layers = layers(2);
        let bytes = encode_control(&layers).unwrap();
        assert_eq!(bytes.len(), 16);
        let first = ControlPixel::unpack(u32::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3],
        ]));
        assert_eq!(first.base, SurfaceKind::Grass.id());
        assert_eq!(first.overlay, OverlayKind::River.id());
        assert_eq!(first.blend, 255);
        assert!(first.navigable);

        let mut bad = layers;
        bad.surface.set(1, 1, 200);
        assert!(encode_control(&bad).is_err());
    }

    #[test]
    fn test_bundle_round_trip() {
        let bundle = ChunkBundle::new(4, &layers(4));
        let bytes = bundle.to_gzip_cbor().unwrap();
        // gzip magic
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
        assert_eq!(bytes, bundle.to_gzip_cbor().unwrap());
        let decoded = ChunkBundle::from_gzip_cbor(bytes.as_slice()).unwrap();
        assert_eq!(decoded, bundle);
    }

    #[test]
    fn test_world_meta_palette() {
        let mut preset = Preset::default();
        preset.export.palette.insert("grass".into(), "#00ff00".into());
        let meta = WorldMeta::new(&preset.export, &preset.grid_spec());
        assert_eq!(meta.palette["grass"].color, "#00ff00");
        assert_eq!(meta.palette["grass"].id, SurfaceKind::Grass.id());
        assert_eq!(meta.palette.len(), SurfaceKind::iter().count());
        assert_eq!(meta.chunk_px, preset.chunk_size);
    }
}
