use anyhow::{anyhow, bail, Context};
use config::{Config, File};
use log::{info, warn, LevelFilter};
use serde::Serialize;
use simple_logger::SimpleLogger;
use std::{
    fs,
    path::{Path, PathBuf},
    process,
    str::FromStr,
};
use structopt::StructOpt;
use strum::{Display, EnumString};
use terra_region::{
    export::write_atomic, generate_regions, timed, Exporter, FailurePolicy,
    GenerationSummary, LogDiagnostics, Preset, RegionProcessor, Seed,
};

/// CLI for generating regions of a world via Terra Region.
#[derive(Debug, StructOpt)]
#[structopt(name = "terra-region")]
struct Opt {
    /// Path to a preset file that defines the world to be generated.
    /// Supported formats: JSON, TOML. If omitted, the default preset is used
    #[structopt(short, long)]
    config: Option<PathBuf>,

    /// Override the preset's world seed. Integers are used as-is, anything
    /// else is hashed
    #[structopt(short, long)]
    seed: Option<String>,

    /// Override the preset's failure policy: degrade or strict
    #[structopt(long)]
    failure_policy: Option<FailurePolicy>,

    /// A region to generate, as `rx,rz`. Can be given multiple times
    #[structopt(short, long = "region", allow_hyphen_values = true)]
    regions: Vec<RegionCoord>,

    /// Generate every region in an inclusive rectangle, given as two
    /// corners: `--extent -1,-1 1,1`
    #[structopt(long, number_of_values = 2, allow_hyphen_values = true)]
    extent: Vec<RegionCoord>,

    /// Directory that all output is written to. The exact files that appear
    /// in the directory are defined by the output formats. See `--outputs`
    #[structopt(short, long, default_value = "out")]
    output: PathBuf,

    /// What to write. Supported formats:
    ///
    /// chunks - Per-chunk layer files, chunk and region metadata, and the
    ///   world metadata file
    ///
    /// preset - The full effective preset, in TOML format
    ///
    /// summary - Metrics and failures for every region, in JSON format
    #[structopt(short = "f", long)]
    outputs: Vec<OutputFormat>,

    /// The logging level to use during generation. See
    /// https://docs.rs/log/0.4.11/log/enum.LevelFilter.html for options
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,
}

/// Different output formats
#[derive(Copy, Clone, Debug, PartialEq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
enum OutputFormat {
    // If you change this, make sure to update the help text for
    // `--outputs`!
    Chunks,
    Preset,
    Summary,
}

/// A region coordinate, parsed from `rx,rz`
#[derive(Copy, Clone, Debug, PartialEq)]
struct RegionCoord(i32, i32);

impl FromStr for RegionCoord {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (x, z) = s
            .split_once(',')
            .ok_or_else(|| anyhow!("expected `rx,rz`, got {:?}", s))?;
        Ok(Self(
            x.trim().parse().context("invalid region x")?,
            z.trim().parse().context("invalid region z")?,
        ))
    }
}

/// Per-region results, in a form that can be written out as JSON
#[derive(Debug, Serialize)]
struct RunSummary {
    world_seed: u64,
    regions: Vec<RegionSummary>,
}

#[derive(Debug, Serialize)]
struct RegionSummary {
    region: (i32, i32),
    chunks: usize,
    metrics: Vec<(String, f64)>,
    error: Option<String>,
}

impl RunSummary {
    fn new(world_seed: u64, summary: &GenerationSummary) -> Self {
        let succeeded = summary.outputs.iter().map(|output| RegionSummary {
            region: output.region,
            chunks: output.chunks.len(),
            metrics: output
                .metrics
                .iter()
                .map(|(name, value)| (name.clone(), *value))
                .collect(),
            error: None,
        });
        let failed = summary.failed.iter().map(|(region, error)| {
            RegionSummary {
                region: *region,
                chunks: 0,
                metrics: Vec::new(),
                error: Some(format!("{:#}", error)),
            }
        });
        let mut regions: Vec<RegionSummary> = succeeded.chain(failed).collect();
        regions.sort_by_key(|region| region.region);
        Self {
            world_seed,
            regions,
        }
    }
}

fn load_preset(config_path: &Path) -> anyhow::Result<Preset> {
    let mut settings = Config::new();
    let config_path = config_path.to_str().ok_or_else(|| {
        anyhow!("invalid character in path {:?}", config_path)
    })?;
    settings
        .merge(File::with_name(config_path))
        .context("error reading config file")?;
    settings.try_into().context("error reading config")
}

/// Every region to generate, in generation order. Rows go north to south,
/// so each region's west and north neighbors are done before it.
fn region_list(opt: &Opt) -> anyhow::Result<Vec<(i32, i32)>> {
    let mut regions: Vec<(i32, i32)> =
        opt.regions.iter().map(|r| (r.0, r.1)).collect();
    match opt.extent.as_slice() {
        [] => {}
        [a, b] => {
            for z in a.1.min(b.1)..=a.1.max(b.1) {
                for x in a.0.min(b.0)..=a.0.max(b.0) {
                    regions.push((x, z));
                }
            }
        }
        _ => bail!("--extent takes exactly two corners"),
    }
    if regions.is_empty() {
        regions.push((0, 0));
    }
    regions.sort_by_key(|&(x, z)| (z, x));
    regions.dedup();
    Ok(regions)
}

/// Run the CLI with some options
fn run(opt: Opt) -> anyhow::Result<()> {
    SimpleLogger::new().with_level(opt.log_level).init()?;

    let mut preset = match &opt.config {
        Some(config_path) => load_preset(config_path)?,
        None => Preset::default(),
    };
    if let Some(seed) = &opt.seed {
        preset.seed = Seed::from(seed.as_str());
    }
    if let Some(policy) = opt.failure_policy {
        preset.failure_policy = policy;
    }
    preset.sanitize();
    let regions = region_list(&opt)?;

    let mut outputs = opt.outputs.clone();
    if outputs.is_empty() {
        outputs.push(OutputFormat::Chunks);
    }
    fs::create_dir_all(&opt.output).with_context(|| {
        format!("error creating output dir {:?}", opt.output)
    })?;

    if outputs.contains(&OutputFormat::Preset) {
        // Going through a TOML value puts plain values ahead of tables
        let value = toml::Value::try_from(&preset)
            .context("error serializing preset")?;
        let path = opt.output.join("preset.toml");
        write_atomic(&path, toml::to_string_pretty(&value)?.as_bytes())?;
        info!("Wrote effective preset to {:?}", path);
    }

    let world_seed = preset.seed.to_u64();
    let mut processor = RegionProcessor::new(preset.clone());
    if outputs.contains(&OutputFormat::Chunks) {
        let exporter = Exporter::new(&opt.output, &preset);
        exporter.write_world_meta()?;
        processor = processor.with_exporter(exporter);
    }

    info!(
        "Generating {} region(s) of world {} into {:?}",
        regions.len(),
        world_seed,
        opt.output
    );
    let summary = timed!(
        "Region generation",
        log::Level::Info,
        generate_regions(&mut processor, regions, &mut LogDiagnostics)
    );

    if outputs.contains(&OutputFormat::Summary) {
        let run_summary = RunSummary::new(world_seed, &summary);
        let path = opt.output.join("summary.json");
        write_atomic(&path, &serde_json::to_vec_pretty(&run_summary)?)?;
        info!("Wrote run summary to {:?}", path);
    }

    for (region, error) in &summary.failed {
        warn!("Region ({}, {}) failed: {:#}", region.0, region.1, error);
    }
    if !summary.failed.is_empty() {
        bail!(
            "{} of {} region(s) failed",
            summary.failed.len(),
            summary.failed.len() + summary.outputs.len()
        );
    }
    Ok(())
}

fn main() {
    let exit_code = match run(Opt::from_args()) {
        Ok(_) => 0,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            1
        }
    };
    process::exit(exit_code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_region() {
        assert_eq!(
            "-2, 3".parse::<RegionCoord>().unwrap(),
            RegionCoord(-2, 3)
        );
        assert!("4".parse::<RegionCoord>().is_err());
        assert!("a,b".parse::<RegionCoord>().is_err());
    }

    #[test]
    fn test_region_list() {
        let opt = Opt::from_iter(&[
            "terra-region",
            "--region",
            "5,5",
            "--extent",
            "1,1",
            "0,0",
        ]);
        assert_eq!(
            region_list(&opt).unwrap(),
            vec![(0, 0), (1, 0), (0, 1), (1, 1), (5, 5)]
        );

        let opt = Opt::from_iter(&["terra-region"]);
        assert_eq!(region_list(&opt).unwrap(), vec![(0, 0)]);
    }
}
