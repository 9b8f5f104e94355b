//! The elevation pipeline. A preset declares an ordered list of steps, and
//! each step transforms the shared height grid in place. Steps are
//! independent of each other: each one only sees the height grid left behind
//! by the steps before it.

mod decal;
mod noise;
mod smooth;
mod terrace;
mod walker;

pub use self::{
    decal::{stamp, Decal, DecalConfig},
    noise::{MaskedNoiseStep, MaskedStampStep, NoiseMode, NoiseStep},
    smooth::{SelectiveSmoothingStep, ThermalErosionStep},
    terrace::{terrace, TerracingStep},
    walker::{WalkerRoute, WalkerStampedeStep, WalkerStart},
};

use crate::{
    config::{
        FailurePolicy, HeightRange, NoiseFnConfig, NoiseFnType, WarpConfig,
    },
    diagnostics::{DiagnosticEvent, Diagnostics},
    error::FatalValidation,
    grid::{CoordGrid, Grid},
    seed, timed,
    util::{lerp, smoothstep},
};
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationErrors};

/// One entry in the declared step list
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepDecl {
    /// Optional name, used in logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(flatten)]
    pub step: ElevationStep,
}

fn default_enabled() -> bool {
    true
}

impl StepDecl {
    pub fn new(step: ElevationStep) -> Self {
        Self {
            id: None,
            enabled: true,
            step,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Name used to identify this step in logs, e.g. `2:terracing`
    pub fn label(&self, index: usize) -> String {
        match &self.id {
            Some(id) => format!("{}:{}", index, id),
            None => format!("{}:{}", index, self.step.name()),
        }
    }
}

/// Every supported step type. Unrecognized `type` values deserialize to
/// [ElevationStep::Unknown], which the pipeline skips.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElevationStep {
    Noise(NoiseStep),
    MaskedNoise(MaskedNoiseStep),
    MaskedStamp(MaskedStampStep),
    WalkerStampede(WalkerStampedeStep),
    Terracing(TerracingStep),
    SelectiveSmoothing(SelectiveSmoothingStep),
    ThermalErosion(ThermalErosionStep),
    #[serde(other)]
    Unknown,
}

impl ElevationStep {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Noise(_) => "noise",
            Self::MaskedNoise(_) => "masked_noise",
            Self::MaskedStamp(_) => "masked_stamp",
            Self::WalkerStampede(_) => "walker_stampede",
            Self::Terracing(_) => "terracing",
            Self::SelectiveSmoothing(_) => "selective_smoothing",
            Self::ThermalErosion(_) => "thermal_erosion",
            Self::Unknown => "unknown",
        }
    }

    fn apply(
        &self,
        context: &mut ElevationContext,
        seeds: StepSeeds,
    ) -> anyhow::Result<()> {
        match self {
            Self::Noise(step) => step.apply(context, seeds),
            Self::MaskedNoise(step) => step.apply(context, seeds),
            Self::MaskedStamp(step) => step.apply(context, seeds),
            Self::WalkerStampede(step) => step.apply(context, seeds),
            Self::Terracing(step) => step.apply(context, seeds),
            Self::SelectiveSmoothing(step) => step.apply(context, seeds),
            Self::ThermalErosion(step) => step.apply(context, seeds),
            // The pipeline filters these out before applying
            Self::Unknown => bail!("cannot apply unknown step"),
        }
    }
}

impl Validate for ElevationStep {
    fn validate(&self) -> Result<(), ValidationErrors> {
        match self {
            Self::Noise(step) => step.validate(),
            Self::MaskedNoise(step) => step.validate(),
            Self::MaskedStamp(step) => step.validate(),
            Self::WalkerStampede(step) => step.validate(),
            Self::Terracing(step) => step.validate(),
            Self::SelectiveSmoothing(step) => step.validate(),
            Self::ThermalErosion(step) => step.validate(),
            // Skipped at run time, there's nothing to check
            Self::Unknown => Ok(()),
        }
    }
}

/// A single transformation of the height grid. Implementations should
/// never resize the grid. Any error is caught by the pipeline, which
/// restores the grid to how it was before the step ran.
trait ApplyStep {
    fn apply(
        &self,
        context: &mut ElevationContext,
        seeds: StepSeeds,
    ) -> anyhow::Result<()>;
}

/// Seeds handed to each step. Both are derived from the step's position in
/// the list.
#[derive(Copy, Clone, Debug)]
pub struct StepSeeds {
    /// World-wide seed, for anything sampled by world coordinates (noise,
    /// tiled decals). Identical in every region.
    pub noise: u32,
    /// Region-local seed, for agent-style processes like walkers
    pub local: u32,
}

/// Everything a step can read or modify
#[derive(Clone, Debug)]
pub struct ElevationContext {
    /// The accumulating height grid, in meters
    pub height: Grid<f32>,
    /// World coordinates of every cell in [Self::height]
    pub coords: CoordGrid,
    /// Size of a cell, in meters
    pub cell_size: f64,
    /// World-level elevation seed
    pub seed: u32,
    /// Region-level elevation seed
    pub region_seed: u32,
    /// Fixed range used to normalize heights for masks
    pub height_range: HeightRange,
    pub policy: FailurePolicy,
}

impl ElevationContext {
    /// Start with a flat grid at height 0
    pub fn new(
        coords: CoordGrid,
        seed: u32,
        region_seed: u32,
        height_range: HeightRange,
        policy: FailurePolicy,
    ) -> Self {
        Self {
            height: Grid::new(coords.width, coords.height, 0.0),
            cell_size: coords.cell_size,
            coords,
            seed,
            region_seed,
            height_range,
            policy,
        }
    }

    fn step_seeds(&self, index: usize) -> StepSeeds {
        StepSeeds {
            noise: seed::mix(self.seed, index as u32),
            local: seed::mix(self.region_seed, index as u32),
        }
    }

    /// The shape every grid in this context is expected to have
    fn expected_shape(&self) -> (usize, usize) {
        (self.coords.width, self.coords.height)
    }

    fn check_shape(&self) -> Result<(), FatalValidation> {
        let actual = (self.height.width(), self.height.height());
        if actual == self.expected_shape() {
            Ok(())
        } else {
            Err(FatalValidation::ShapeMismatch {
                layer: "height".into(),
                expected: self.expected_shape(),
                actual,
            })
        }
    }
}

/// Runs a declared step list against an [ElevationContext]
#[derive(Clone, Debug)]
pub struct ElevationPipeline {
    steps: Vec<StepDecl>,
}

impl ElevationPipeline {
    pub fn new(steps: Vec<StepDecl>) -> Self {
        Self { steps }
    }

    /// Run every step in order.
    ///
    /// Disabled and unknown steps are skipped. A step that fails (returns an
    /// error, or leaves non-finite values behind) is rolled back, so the
    /// next step sees the grid exactly as it was before the failed step.
    /// Under [FailurePolicy::Strict], unknown and failed steps are errors
    /// instead.
    ///
    /// An empty step list, a step that resizes the grid, or a non-finite
    /// final grid are always errors, as [FatalValidation].
    pub fn run(
        &self,
        context: &mut ElevationContext,
        diagnostics: &mut dyn Diagnostics,
    ) -> anyhow::Result<()> {
        if self.steps.is_empty() {
            return Err(FatalValidation::EmptyPipeline.into());
        }
        context.check_shape()?;

        for (index, decl) in self.steps.iter().enumerate() {
            let label = decl.label(index);
            if !decl.enabled {
                diagnostics.record(DiagnosticEvent::StepSkipped {
                    step: label,
                    reason: "disabled".into(),
                });
                continue;
            }
            if let ElevationStep::Unknown = decl.step {
                if context.policy == FailurePolicy::Strict {
                    bail!("unknown elevation step type in step {}", label);
                }
                diagnostics.record(DiagnosticEvent::StepSkipped {
                    step: label,
                    reason: "unknown step type".into(),
                });
                continue;
            }

            let seeds = context.step_seeds(index);
            let backup = context.height.clone();
            let result = timed!(&label, decl.step.apply(context, seeds))
                .and_then(|()| {
                    // Steps can't change shape, that's a bug not a fluke
                    context.check_shape()?;
                    if context.height.all_finite() {
                        Ok(())
                    } else {
                        bail!("step produced non-finite heights")
                    }
                })
                .with_context(|| format!("error in elevation step {}", label));

            if let Err(error) = result {
                if error.downcast_ref::<FatalValidation>().is_some()
                    || context.policy == FailurePolicy::Strict
                {
                    return Err(error);
                }
                context.height = backup;
                diagnostics.record(DiagnosticEvent::StepFailed {
                    step: label,
                    error: format!("{:#}", error),
                });
            }
        }

        if context.height.all_finite() {
            Ok(())
        } else {
            Err(FatalValidation::NonFinite("height".into()).into())
        }
    }
}

/// A soft band over normalized height. Cells between `low` and `high` get
/// full weight, fading out over `fade` on either side.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MaskConfig {
    pub low: f32,
    pub high: f32,
    #[validate(range(min = 0.0, max = 1.0))]
    pub fade: f32,
    /// Flip the mask, so the band gets zero weight and everything else gets
    /// full weight
    pub invert: bool,
}

impl Default for MaskConfig {
    fn default() -> Self {
        Self {
            low: 0.0,
            high: 1.0,
            fade: 0.05,
            invert: false,
        }
    }
}

impl MaskConfig {
    /// Mask weight in `[0, 1]` for a height that's already been normalized
    pub fn weight(&self, height_norm: f32) -> f32 {
        let rise = smoothstep(self.low - self.fade, self.low, height_norm);
        let fall = smoothstep(self.high, self.high + self.fade, height_norm);
        let weight = rise * (1.0 - fall);
        if self.invert {
            1.0 - weight
        } else {
            weight
        }
    }
}

/// How a masked value is combined with the existing height
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    Add,
    Subtract,
    /// `value` is a dimensionless scale here: the height is multiplied by
    /// `1 + value` at full weight
    Multiply,
}

impl Default for BlendMode {
    fn default() -> Self {
        Self::Add
    }
}

impl BlendMode {
    pub fn apply(self, height: f32, value: f32, weight: f32) -> f32 {
        match self {
            Self::Add => height + weight * value,
            Self::Subtract => height - weight * value,
            Self::Multiply => height * lerp(1.0, 1.0 + value, weight),
        }
    }
}

/// The step list used when a preset doesn't declare one: a warped fBm base,
/// ridged mountains on the higher ground, then some terracing and cleanup.
pub fn default_steps() -> Vec<StepDecl> {
    vec![
        StepDecl::new(ElevationStep::Noise(NoiseStep {
            noise: NoiseFnConfig {
                frequency: 0.6,
                warp: Some(WarpConfig::default()),
                ..NoiseFnConfig::default()
            },
            amplitude_m: 180.0,
            offset_m: 140.0,
            mode: NoiseMode::Add,
        }))
        .with_id("base"),
        StepDecl::new(ElevationStep::MaskedNoise(MaskedNoiseStep {
            mask: MaskConfig {
                low: 0.2,
                high: 1.0,
                fade: 0.1,
                invert: false,
            },
            noise: NoiseFnConfig {
                noise_type: NoiseFnType::Ridged,
                octaves: 5,
                frequency: 1.2,
                ..NoiseFnConfig::default()
            },
            amplitude_m: 260.0,
            blend: BlendMode::Add,
        }))
        .with_id("mountains"),
        StepDecl::new(ElevationStep::Terracing(TerracingStep::default())),
        StepDecl::new(ElevationStep::SelectiveSmoothing(
            SelectiveSmoothingStep::default(),
        )),
        StepDecl::new(ElevationStep::ThermalErosion(
            ThermalErosionStep::default(),
        )),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingDiagnostics;
    use assert_approx_eq::assert_approx_eq;

    fn context(policy: FailurePolicy) -> ElevationContext {
        let coords = CoordGrid::new(-8, -8, 48, 48, 4.0);
        ElevationContext::new(coords, 11, 22, HeightRange::default(), policy)
    }

    fn flat_noise(offset_m: f32) -> ElevationStep {
        ElevationStep::Noise(NoiseStep {
            amplitude_m: 0.0,
            offset_m,
            ..NoiseStep::default()
        })
    }

    /// A walker with a raw decal file that doesn't exist
    fn missing_decal() -> ElevationStep {
        ElevationStep::WalkerStampede(WalkerStampedeStep {
            decal: DecalConfig::Raw {
                path: "/nonexistent/decal.r16".into(),
                size: 16,
            },
            ..WalkerStampedeStep::default()
        })
    }

    #[test]
    fn test_empty_pipeline_is_fatal() {
        let mut context = context(FailurePolicy::Degrade);
        let error = ElevationPipeline::new(vec![])
            .run(&mut context, &mut CollectingDiagnostics::new())
            .unwrap_err();
        assert_eq!(
            error.downcast_ref::<FatalValidation>(),
            Some(&FatalValidation::EmptyPipeline)
        );
    }

    #[test]
    fn test_deserialize_step_list() {
        let steps: Vec<StepDecl> = serde_json::from_str(
            r#"[
                {"type": "noise", "amplitude_m": 5.0},
                {"type": "terracing", "id": "ledges", "enabled": false},
                {"type": "hydraulic_magic", "power": 9000}
            ]"#,
        )
        .unwrap();
        assert!(matches!(steps[0].step, ElevationStep::Noise(_)));
        assert!(steps[0].enabled);
        assert_eq!(steps[1].label(1), "1:ledges");
        assert!(!steps[1].enabled);
        assert!(matches!(steps[2].step, ElevationStep::Unknown));
    }

    #[test]
    fn test_skips_disabled_and_unknown() {
        let mut disabled = StepDecl::new(flat_noise(500.0));
        disabled.enabled = false;
        let pipeline = ElevationPipeline::new(vec![
            StepDecl::new(flat_noise(10.0)),
            disabled,
            StepDecl::new(ElevationStep::Unknown),
        ]);
        let mut context = context(FailurePolicy::Degrade);
        let mut diagnostics = CollectingDiagnostics::new();
        pipeline.run(&mut context, &mut diagnostics).unwrap();

        assert!(context.height.data().iter().all(|h| *h == 10.0));
        assert_eq!(
            diagnostics.skipped_steps(),
            vec![("1:noise", "disabled"), ("2:unknown", "unknown step type")]
        );
    }

    #[test]
    fn test_failed_step_rolls_back() {
        let pipeline = ElevationPipeline::new(vec![
            StepDecl::new(flat_noise(10.0)),
            StepDecl::new(missing_decal()),
            StepDecl::new(flat_noise(1.0)),
        ]);

        // Strict: the missing decal fails the step, and the run
        let mut context = context(FailurePolicy::Strict);
        assert!(pipeline
            .run(&mut context, &mut CollectingDiagnostics::new())
            .is_err());

        // Degrade: the decal samples as zero, so the walker is a no-op
        let mut context = self::context(FailurePolicy::Degrade);
        let mut diagnostics = CollectingDiagnostics::new();
        pipeline.run(&mut context, &mut diagnostics).unwrap();
        assert!(context.height.data().iter().all(|h| *h == 11.0));
    }

    #[test]
    fn test_non_finite_step_rolls_back() {
        // Multiplying by NaN poisons the grid, so the step gets reverted
        let pipeline = ElevationPipeline::new(vec![
            StepDecl::new(flat_noise(10.0)),
            StepDecl::new(ElevationStep::Noise(NoiseStep {
                amplitude_m: f32::NAN,
                ..NoiseStep::default()
            })),
        ]);
        let mut context = context(FailurePolicy::Degrade);
        let mut diagnostics = CollectingDiagnostics::new();
        pipeline.run(&mut context, &mut diagnostics).unwrap();
        assert!(context.height.data().iter().all(|h| *h == 10.0));
        assert_eq!(diagnostics.failed_steps().len(), 1);
        assert_eq!(diagnostics.failed_steps()[0].0, "1:noise");
    }

    #[test]
    fn test_mask_weight() {
        let mask = MaskConfig {
            low: 0.4,
            high: 0.6,
            fade: 0.1,
            invert: false,
        };
        assert_approx_eq!(mask.weight(0.2), 0.0);
        assert_approx_eq!(mask.weight(0.5), 1.0);
        assert_approx_eq!(mask.weight(0.8), 0.0);
        assert_approx_eq!(mask.weight(0.35), 0.5);
        let inverted = MaskConfig {
            invert: true,
            ..mask
        };
        assert_approx_eq!(inverted.weight(0.5), 0.0);
        assert_approx_eq!(inverted.weight(0.9), 1.0);
    }

    #[test]
    fn test_blend_modes() {
        assert_approx_eq!(BlendMode::Add.apply(10.0, 4.0, 0.5), 12.0);
        assert_approx_eq!(BlendMode::Subtract.apply(10.0, 4.0, 1.0), 6.0);
        assert_approx_eq!(BlendMode::Multiply.apply(10.0, 0.5, 1.0), 15.0);
        assert_approx_eq!(BlendMode::Multiply.apply(10.0, 0.5, 0.0), 10.0);
    }

    /// The default pipeline is deterministic and stays in a sane range
    #[test]
    fn test_default_steps() {
        let pipeline = ElevationPipeline::new(default_steps());
        let mut a = context(FailurePolicy::Strict);
        let mut b = context(FailurePolicy::Strict);
        pipeline
            .run(&mut a, &mut CollectingDiagnostics::new())
            .unwrap();
        pipeline
            .run(&mut b, &mut CollectingDiagnostics::new())
            .unwrap();
        assert_eq!(a.height, b.height);
        let (lo, hi) = a.height.min_max().unwrap();
        assert!(lo > -200.0 && hi < 800.0, "{} {}", lo, hi);
    }
}
