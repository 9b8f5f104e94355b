//! Region orchestration. A region is a square block of chunks that's
//! generated in one pass over a stitched, halo-padded buffer, then sliced
//! back into per-chunk results.

mod chunk;
mod scratch;
mod seam;

pub use self::{
    chunk::{slice_chunks, ChunkLayers, GenResult},
    scratch::RegionScratch,
    seam::{LayerSeamStats, SeamAnalyzer, SeamReport},
};

use crate::{
    classify::{classify_grid, ClassifyLayers, NavKind, OverlayKind},
    climate::{self, HumidityInputs},
    config::{FailurePolicy, Preset},
    diagnostics::{DiagnosticEvent, Diagnostics},
    elevation::{ElevationContext, ElevationPipeline},
    error::FatalValidation,
    export::{ExportReport, Exporter},
    grid::{CoordGrid, Grid},
    hydrology::{carve_lakes, chamfer_distance, Hydrology, LakeSite},
    seed::{self, StageSeeds},
    timed,
};
use anyhow::{bail, Context};
use indexmap::IndexMap;
use log::{info, warn};
use serde::Serialize;
use std::{mem, time::Instant};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// The stages every region goes through, in order
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumIter,
    EnumString,
    Serialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RegionStage {
    Elevation,
    SurfaceClassify,
    /// Sea mask, shore band, and slope-based obstacles
    SeaLevel,
    /// Rivers, and flow routing over the carved terrain
    Hydrology,
    Climate,
    HighlandLakes,
    SeamAnalysis,
    SliceToChunks,
    Export,
}

/// Everything produced for one region
#[derive(Clone, Debug)]
pub struct RegionOutput {
    pub region: (i32, i32),
    /// Region-level seeds that drove the local processes
    pub seeds: StageSeeds,
    /// Stages that ran, in order
    pub completed: Vec<RegionStage>,
    /// Empty if the run stopped before [RegionStage::SliceToChunks]
    pub chunks: Vec<GenResult>,
    pub seam: Option<SeamReport>,
    pub metrics: IndexMap<String, f64>,
    /// `None` if there's no exporter, or the run stopped before export
    pub export: Option<ExportReport>,
}

/// In-flight state for one region. Grids live in [RegionScratch], this
/// holds everything else.
struct RegionRun {
    region: (i32, i32),
    seeds: StageSeeds,
    coords: CoordGrid,
    hydrology: Option<Hydrology>,
    chunks: Vec<GenResult>,
    seam: Option<SeamReport>,
    metrics: IndexMap<String, f64>,
    export: Option<ExportReport>,
    completed: Vec<RegionStage>,
}

impl RegionRun {
    fn metric(
        &mut self,
        diagnostics: &mut dyn Diagnostics,
        name: &str,
        value: f64,
    ) {
        self.metrics.insert(name.into(), value);
        diagnostics.record(DiagnosticEvent::Metric {
            name: format!(
                "region.{}_{}.{}",
                self.region.0, self.region.1, name
            ),
            value,
        });
    }

    fn has_completed(&self, stage: RegionStage) -> bool {
        self.completed.contains(&stage)
    }
}

/// Generates regions one at a time. Scratch buffers and the seam cache are
/// kept between regions, so a processor should be reused for every region
/// of a world rather than created per region.
///
/// Fields are public to allow disjoint borrowing. Please **do not mutate
/// the preset** between regions.
#[derive(Debug)]
pub struct RegionProcessor {
    pub preset: Preset,
    pub world_seed: u64,
    /// World-level seeds, for anything sampled by world coordinates
    pub world_seeds: StageSeeds,
    pipeline: ElevationPipeline,
    scratch: RegionScratch,
    seams: SeamAnalyzer,
    exporter: Option<Exporter>,
}

impl RegionProcessor {
    /// Create a processor for one world. Invalid preset fields are reset to
    /// their defaults (with a warning) first. See [Preset::sanitize].
    pub fn new(mut preset: Preset) -> Self {
        preset.sanitize();
        let world_seed = preset.seed.to_u64();
        Self {
            world_seeds: StageSeeds::for_world(world_seed),
            pipeline: ElevationPipeline::new(preset.elevation.steps.clone()),
            scratch: RegionScratch::new(preset.extended_size()),
            seams: SeamAnalyzer::new(),
            exporter: None,
            world_seed,
            preset,
        }
    }

    /// Write every generated region to disk via this exporter
    pub fn with_exporter(mut self, exporter: Exporter) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn preset(&self) -> &Preset {
        &self.preset
    }

    /// The stitched buffers of the most recent region
    pub fn scratch(&self) -> &RegionScratch {
        &self.scratch
    }

    /// Coordinates of a region's stitched buffer, halo included
    pub fn coords(&self, rx: i32, rz: i32) -> CoordGrid {
        let chunk_size = self.preset.chunk_size as i64;
        let region_size = self.preset.region_size as i64;
        let size = self.preset.extended_size();
        CoordGrid::new(
            (rx as i64 * region_size - 1) * chunk_size,
            (rz as i64 * region_size - 1) * chunk_size,
            size,
            size,
            self.preset.cell_size,
        )
    }

    pub fn region_seeds(&self, rx: i32, rz: i32) -> StageSeeds {
        StageSeeds::for_region(self.world_seed, rx, rz)
    }

    /// Run every stage for a region
    pub fn process(
        &mut self,
        rx: i32,
        rz: i32,
        diagnostics: &mut dyn Diagnostics,
    ) -> anyhow::Result<RegionOutput> {
        self.run_until(rx, rz, RegionStage::Export, diagnostics)
    }

    /// Run stages up to and including `until`. The stitched buffers are
    /// left in [Self::scratch] for inspection.
    pub fn run_until(
        &mut self,
        rx: i32,
        rz: i32,
        until: RegionStage,
        diagnostics: &mut dyn Diagnostics,
    ) -> anyhow::Result<RegionOutput> {
        let seeds = self.region_seeds(rx, rz);
        self.run_with_seeds(rx, rz, seeds, until, diagnostics)
    }

    /// Same as [Self::run_until], but with explicit region-level seeds
    pub fn run_with_seeds(
        &mut self,
        rx: i32,
        rz: i32,
        seeds: StageSeeds,
        until: RegionStage,
        diagnostics: &mut dyn Diagnostics,
    ) -> anyhow::Result<RegionOutput> {
        // Every buffer is rewritten from scratch, halo included
        self.scratch.prepare(self.preset.extended_size());
        let mut run = RegionRun {
            region: (rx, rz),
            seeds,
            coords: self.coords(rx, rz),
            hydrology: None,
            chunks: Vec::new(),
            seam: None,
            metrics: IndexMap::new(),
            export: None,
            completed: Vec::new(),
        };

        for stage in RegionStage::iter().take_while(|stage| *stage <= until) {
            let start = Instant::now();
            timed!(
                format!("Region ({}, {}) {}", rx, rz, stage),
                log::Level::Trace,
                self.apply_stage(stage, &mut run, diagnostics)
            )
            .with_context(|| {
                format!("error in stage {} of region ({}, {})", stage, rx, rz)
            })?;
            diagnostics.record(DiagnosticEvent::StageCompleted {
                region: (rx, rz),
                stage: stage.to_string(),
                elapsed_ms: start.elapsed().as_millis(),
            });
            run.completed.push(stage);
        }

        Ok(RegionOutput {
            region: run.region,
            seeds: run.seeds,
            completed: run.completed,
            chunks: run.chunks,
            seam: run.seam,
            metrics: run.metrics,
            export: run.export,
        })
    }

    fn apply_stage(
        &mut self,
        stage: RegionStage,
        run: &mut RegionRun,
        diagnostics: &mut dyn Diagnostics,
    ) -> anyhow::Result<()> {
        match stage {
            RegionStage::Elevation => self.elevation(run, diagnostics),
            RegionStage::SurfaceClassify => {
                self.update_slope();
                self.classify(run)
            }
            RegionStage::SeaLevel => self.sea_level(run, diagnostics),
            RegionStage::Hydrology => self.hydrology(run, diagnostics),
            RegionStage::Climate => self.climate(run, diagnostics),
            RegionStage::HighlandLakes => self.lakes(run, diagnostics),
            RegionStage::SeamAnalysis => self.seam_analysis(run, diagnostics),
            RegionStage::SliceToChunks => {
                run.chunks = slice_chunks(
                    &self.preset,
                    self.world_seed,
                    run.region,
                    &self.scratch,
                )?;
                Ok(())
            }
            RegionStage::Export => self.export(run, diagnostics),
        }
    }

    fn elevation(
        &mut self,
        run: &mut RegionRun,
        diagnostics: &mut dyn Diagnostics,
    ) -> anyhow::Result<()> {
        // The pipeline owns the height grid while it runs. Move the buffer
        // in and back out so it isn't reallocated.
        let height =
            mem::replace(&mut self.scratch.height, Grid::new(0, 0, 0.0));
        let mut context = ElevationContext {
            height,
            coords: run.coords,
            cell_size: self.preset.cell_size,
            seed: self.world_seeds.elevation,
            region_seed: run.seeds.elevation,
            height_range: self.preset.height_range,
            policy: self.preset.failure_policy,
        };
        let result = self.pipeline.run(&mut context, diagnostics);
        self.scratch.height = context.height;
        result?;

        self.scratch.base_height.clone_from(&self.scratch.height);
        run.metric(diagnostics, "mean_height", self.scratch.height.mean());
        Ok(())
    }

    fn update_slope(&mut self) {
        self.scratch.slope =
            self.scratch.height.slope_degrees(self.preset.cell_size);
    }

    /// Reclassify every cell. Climate is used once it's been computed.
    fn classify(&mut self, run: &RegionRun) -> anyhow::Result<()> {
        let scratch = &mut self.scratch;
        let layers = ClassifyLayers {
            height: &scratch.height,
            slope: &scratch.slope,
            overlay: &scratch.overlay,
            climate: if run.has_completed(RegionStage::Climate) {
                Some((&scratch.temperature, &scratch.humidity))
            } else {
                None
            },
        };
        classify_grid(
            &self.preset.classifier,
            self.preset.sea.level,
            &layers,
            &mut scratch.surface,
        )
    }

    fn sea_level(
        &mut self,
        run: &mut RegionRun,
        diagnostics: &mut dyn Diagnostics,
    ) -> anyhow::Result<()> {
        let sea = self.preset.sea;
        let scratch = &mut self.scratch;
        let sea_mask = scratch.height.map(|h| h < sea.level);
        let distance = chamfer_distance(&sea_mask, self.preset.cell_size);

        for i in 0..sea_mask.len() {
            let is_sea = sea_mask.data()[i];
            if !is_sea && f64::from(distance.data()[i]) <= sea.shore_width_m {
                scratch.overlay.data_mut()[i] = OverlayKind::Shore.id();
            }
            let nav = if is_sea {
                NavKind::Water
            } else if scratch.slope.data()[i] >= sea.slope_obstacle_deg {
                NavKind::Obstacle
            } else {
                NavKind::Passable
            };
            scratch.navigation.data_mut()[i] = nav.id();
        }

        let sea_cells = sea_mask.data().iter().filter(|sea| **sea).count();
        let fraction = sea_cells as f64 / sea_mask.len().max(1) as f64;
        run.metric(diagnostics, "sea_fraction", fraction);
        self.classify(run)
    }

    fn hydrology(
        &mut self,
        run: &mut RegionRun,
        diagnostics: &mut dyn Diagnostics,
    ) -> anyhow::Result<()> {
        let hydrology = Hydrology::run(
            &mut self.scratch.height,
            &run.coords,
            &self.preset.hydrology.rivers,
            self.preset.sea.level,
            run.seeds.hydrology,
        )?;

        let scratch = &mut self.scratch;
        let rivers = &hydrology.rivers;
        for i in 0..rivers.river.len() {
            if rivers.river.data()[i] {
                scratch.overlay.data_mut()[i] = OverlayKind::River.id();
                scratch.navigation.data_mut()[i] = NavKind::Water.id();
            } else if rivers.shore.data()[i]
                && scratch.overlay.data()[i] == OverlayKind::None.id()
            {
                scratch.overlay.data_mut()[i] = OverlayKind::Shore.id();
            }
        }

        for (name, value) in hydrology.metrics() {
            run.metric(diagnostics, name, value);
        }
        run.hydrology = Some(hydrology);
        self.update_slope();
        self.classify(run)
    }

    fn climate(
        &mut self,
        run: &mut RegionRun,
        diagnostics: &mut dyn Diagnostics,
    ) -> anyhow::Result<()> {
        let sea_level = self.preset.sea.level;
        let scratch = &mut self.scratch;
        let water = scratch.height.map(|h| h < sea_level);
        let no_rivers;
        let river = match &run.hydrology {
            Some(hydrology) => &hydrology.rivers.river,
            None => {
                no_rivers = water.map(|_| false);
                &no_rivers
            }
        };

        let climate = climate::climate(
            &self.preset.climate.temperature,
            &self.preset.climate.humidity,
            &HumidityInputs {
                height: &scratch.height,
                coords: &run.coords,
                water: &water,
                river,
                // Replaced with the freshly computed temperature
                temperature: &scratch.temperature,
            },
            self.world_seeds.climate,
        )?;
        scratch.temperature = climate.temperature;
        scratch.humidity = climate.humidity;

        let temperature = scratch.temperature.mean();
        let humidity = scratch.humidity.mean();
        run.metric(diagnostics, "mean_temperature", temperature);
        run.metric(diagnostics, "mean_humidity", humidity);
        // Marked early so the reclassification below can use it
        run.completed.push(RegionStage::Climate);
        let result = self.classify(run);
        run.completed.pop();
        result
    }

    fn lakes(
        &mut self,
        run: &mut RegionRun,
        diagnostics: &mut dyn Diagnostics,
    ) -> anyhow::Result<()> {
        let scratch = &mut self.scratch;
        let lakes = carve_lakes(
            &mut scratch.height,
            &LakeSite {
                humidity: &scratch.humidity,
                height_range: self.preset.height_range,
                sea_level: self.preset.sea.level,
                cell_size: self.preset.cell_size,
            },
            &self.preset.hydrology.lakes,
            seed::mix(run.seeds.hydrology, 2),
        )?;

        for (i, is_lake) in lakes.lake.data().iter().enumerate() {
            if *is_lake {
                scratch.overlay.data_mut()[i] = OverlayKind::Lake.id();
                scratch.navigation.data_mut()[i] = NavKind::Water.id();
            }
        }
        run.metric(diagnostics, "lake_count", lakes.count as f64);
        self.update_slope();
        self.classify(run)?;

        // Nothing after this point changes the continuous layers
        let scratch = &self.scratch;
        for (name, grid) in &[
            ("height", &scratch.height),
            ("temperature", &scratch.temperature),
            ("humidity", &scratch.humidity),
        ] {
            if !grid.all_finite() {
                return Err(FatalValidation::NonFinite(name.to_string()).into());
            }
        }
        Ok(())
    }

    fn seam_analysis(
        &mut self,
        run: &mut RegionRun,
        diagnostics: &mut dyn Diagnostics,
    ) -> anyhow::Result<()> {
        let chunk_size = self.preset.chunk_size;
        let scratch = &self.scratch;
        let report = self.seams.analyze(
            run.region,
            chunk_size,
            self.preset.region_size * chunk_size,
            self.preset.cell_size,
            &[
                ("height", &scratch.height),
                ("temperature", &scratch.temperature),
                ("humidity", &scratch.humidity),
            ],
        )?;
        for (name, value) in report.metrics() {
            run.metric(diagnostics, &name, value);
        }
        run.seam = Some(report);
        Ok(())
    }

    fn export(
        &mut self,
        run: &mut RegionRun,
        diagnostics: &mut dyn Diagnostics,
    ) -> anyhow::Result<()> {
        let exporter = match &self.exporter {
            Some(exporter) => exporter,
            None => return Ok(()),
        };
        let report =
            exporter.export_region(run.region, &run.chunks, diagnostics);
        let failed = report.failed.len();
        run.export = Some(report);
        if failed > 0 {
            if self.preset.failure_policy == FailurePolicy::Strict {
                bail!("{} export file(s) failed to write", failed);
            }
            warn!(
                "Region ({}, {}): {} export file(s) failed to write",
                run.region.0, run.region.1, failed
            );
        }
        Ok(())
    }
}

/// Results of generating a batch of regions
#[derive(Debug, Default)]
pub struct GenerationSummary {
    pub outputs: Vec<RegionOutput>,
    /// Regions that failed, with the error that stopped them. Use
    /// `error.downcast_ref::<FatalValidation>()` to find unusable output.
    pub failed: Vec<((i32, i32), anyhow::Error)>,
}

/// Generate a batch of regions in order. A failed region is reported and
/// skipped, it never stops the rest of the batch. Retrying is up to the
/// caller.
pub fn generate_regions(
    processor: &mut RegionProcessor,
    regions: impl IntoIterator<Item = (i32, i32)>,
    diagnostics: &mut dyn Diagnostics,
) -> GenerationSummary {
    let mut summary = GenerationSummary::default();
    for (rx, rz) in regions {
        match processor.process(rx, rz, diagnostics) {
            Ok(output) => {
                info!(
                    "Generated region ({}, {}) with {} chunks",
                    rx,
                    rz,
                    output.chunks.len()
                );
                summary.outputs.push(output);
            }
            Err(error) => {
                diagnostics.record(DiagnosticEvent::RegionFailed {
                    region: (rx, rz),
                    error: format!("{:#}", error),
                });
                summary.failed.push(((rx, rz), error));
            }
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{diagnostics::CollectingDiagnostics, seed::Seed};

    fn preset() -> Preset {
        let mut preset = Preset {
            seed: Seed::Int(1234),
            chunk_size: 16,
            cell_size: 4.0,
            region_size: 2,
            ..Preset::default()
        };
        preset.hydrology.rivers.num_droplets = 20;
        preset.hydrology.lakes.attempts = 10;
        preset
    }

    #[test]
    fn test_stage_order() {
        let stages: Vec<String> =
            RegionStage::iter().map(|stage| stage.to_string()).collect();
        assert_eq!(stages.first().unwrap(), "elevation");
        assert_eq!(stages.last().unwrap(), "export");
        assert!(RegionStage::Climate < RegionStage::HighlandLakes);
        assert_eq!(
            "slice_to_chunks".parse::<RegionStage>().unwrap(),
            RegionStage::SliceToChunks
        );
    }

    #[test]
    fn test_coords_include_halo() {
        let processor = RegionProcessor::new(preset());
        let coords = processor.coords(1, -1);
        assert_eq!(coords.origin_x, 16);
        assert_eq!(coords.origin_z, -48);
        assert_eq!(coords.width, 64);
    }

    #[test]
    fn test_invalid_preset_is_sanitized() {
        let preset = Preset {
            region_size: 0,
            cell_size: 0.0,
            ..preset()
        };
        let mut processor = RegionProcessor::new(preset);
        let defaults = Preset::default();
        assert_eq!(processor.preset().region_size, defaults.region_size);
        assert_eq!(processor.preset().cell_size, defaults.cell_size);
        assert_eq!(processor.preset().chunk_size, 16);

        let output = processor
            .process(0, 0, &mut CollectingDiagnostics::new())
            .unwrap();
        assert_eq!(
            output.chunks.len(),
            defaults.region_size * defaults.region_size
        );
    }

    #[test]
    fn test_process() {
        let mut processor = RegionProcessor::new(preset());
        let mut diagnostics = CollectingDiagnostics::new();
        let output = processor.process(0, 0, &mut diagnostics).unwrap();

        assert_eq!(output.completed.len(), RegionStage::iter().count());
        assert_eq!(output.chunks.len(), 4);
        assert!(output.export.is_none());
        assert!(output.metrics.contains_key("sea_fraction"));
        assert!(output.metrics.contains_key("lake_count"));
        let seam = output.seam.unwrap();
        assert_eq!(seam.layer("height").unwrap().west_rmse, None);
        assert_eq!(diagnostics.stages().len(), output.completed.len());
        for chunk in &output.chunks {
            assert!(chunk.layers.height.all_finite());
            assert_eq!(chunk.layers.height.width(), 16);
        }
    }

    #[test]
    fn test_run_until() {
        let mut processor = RegionProcessor::new(preset());
        let mut diagnostics = CollectingDiagnostics::new();
        let output = processor
            .run_until(0, 0, RegionStage::SeaLevel, &mut diagnostics)
            .unwrap();
        assert_eq!(
            output.completed,
            vec![
                RegionStage::Elevation,
                RegionStage::SurfaceClassify,
                RegionStage::SeaLevel
            ]
        );
        assert!(output.chunks.is_empty());
        assert!(output.seam.is_none());
        // Climate hasn't run, so its buffers are still blank
        assert!(processor.scratch().humidity.data().iter().all(|h| *h == 0.0));
    }

    #[test]
    fn test_failed_region_is_skipped() {
        let mut preset = preset();
        preset.elevation.steps = Vec::new();
        let mut processor = RegionProcessor::new(preset);
        let mut diagnostics = CollectingDiagnostics::new();
        let regions = vec![(0, 0), (1, 0)];
        let summary =
            generate_regions(&mut processor, regions, &mut diagnostics);
        assert!(summary.outputs.is_empty());
        assert_eq!(summary.failed.len(), 2);
        let (region, error) = &summary.failed[1];
        assert_eq!(*region, (1, 0));
        assert_eq!(
            error.downcast_ref::<FatalValidation>(),
            Some(&FatalValidation::EmptyPipeline)
        );
        assert!(diagnostics.events.iter().any(|event| matches!(
            event,
            DiagnosticEvent::RegionFailed { region: (0, 0), .. }
        )));
    }
}
