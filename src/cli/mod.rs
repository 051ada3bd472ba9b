//! Command-line interface for inspecting and rendering frames.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};

use crate::catalog::{FrameAddress, FrameDiscovery, ManifestCatalog, Orientation, StudyCatalog, StudyReference};
use crate::config::{Modality, ViewerConfig};
use crate::decoder::{FrameDecoder, FsFetcher};
use crate::engine::ViewerEngine;
use crate::findings::{FindingsProvider, StaticFindings};
use crate::mapper::{initial_window, map_to_display, WindowLevel};
use crate::overlay::{compose, rasterize, ImageToScreen, OverlayStyle};
use crate::session::Action;
use crate::DecodedFrame;

/// Medical Image Viewer
///
/// Decodes DICOM and raster frames, applies window/level and draws AI
/// findings, the same way the interactive viewport does.
#[derive(Parser, Debug)]
#[command(name = "medview")]
#[command(author = "Medical Imaging Team")]
#[command(version)]
#[command(about = "Window, render and export medical image frames")]
#[command(long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Viewer configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show information about one frame
    Info {
        /// Input frame (DICOM, PNG or JPEG)
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Window one frame and write it as PNG
    Render {
        /// Input frame (DICOM, PNG or JPEG)
        #[arg(short, long)]
        input: PathBuf,

        /// Output PNG path
        #[arg(short, long)]
        output: PathBuf,

        /// Window and invert selection
        #[command(flatten)]
        window: WindowArgs,

        /// Modality used to resolve presets
        #[arg(short, long, value_enum, default_value = "ct")]
        modality: ModalityArg,

        /// Findings JSON to draw over the frame
        #[arg(long, requires = "study")]
        findings: Option<PathBuf>,

        /// Study id to look up in the findings file
        #[arg(long)]
        study: Option<String>,

        /// Series id to look up in the findings file
        #[arg(long)]
        series: Option<String>,

        /// Output pixels per frame pixel
        #[arg(long, default_value = "1.0")]
        scale: f64,
    },

    /// Render every slice of a series from a study manifest or a directory
    Export {
        /// Study manifest (JSON)
        #[arg(short, long, required_unless_present = "dir", conflicts_with = "dir")]
        manifest: Option<PathBuf>,

        /// Directory holding the frames of one series, in natural file name order
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Modality of a directory series
        #[arg(long, value_enum, default_value = "ct")]
        modality: ModalityArg,

        /// Study id
        #[arg(long)]
        study: String,

        /// Series id (defaults to the first series)
        #[arg(long)]
        series: Option<String>,

        /// Output directory
        #[arg(short, long)]
        out_dir: PathBuf,

        /// Window and invert selection
        #[command(flatten)]
        window: WindowArgs,

        /// Findings JSON; findings are drawn when given
        #[arg(long)]
        findings: Option<PathBuf>,

        /// Output size in pixels (square)
        #[arg(long, default_value = "512")]
        size: u32,
    },
}

/// Window selection shared by rendering commands.
#[derive(clap::Args, Debug, Clone)]
pub struct WindowArgs {
    /// Window width
    #[arg(long, requires = "center", conflicts_with = "preset")]
    pub width: Option<f64>,

    /// Window center (level)
    #[arg(long, requires = "width")]
    pub center: Option<f64>,

    /// Modality preset id (e.g. brain, bone, lung, inverted)
    #[arg(short, long)]
    pub preset: Option<String>,

    /// Invert the display
    #[arg(long)]
    pub invert: bool,
}

/// Modality argument.
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum ModalityArg {
    /// Computed tomography
    Ct,
    /// Magnetic resonance
    Mri,
    /// Projection radiography
    Xray,
}

impl From<ModalityArg> for Modality {
    fn from(arg: ModalityArg) -> Self {
        match arg {
            ModalityArg::Ct => Modality::Ct,
            ModalityArg::Mri => Modality::Mri,
            ModalityArg::Xray => Modality::XRay,
        }
    }
}

/// Run the CLI application.
pub fn run(cli: Cli) -> anyhow::Result<()> {
    // Initialize logging
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else if !cli.quiet {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    let config = match &cli.config {
        Some(path) => ViewerConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => ViewerConfig::default(),
    };

    match cli.command {
        Commands::Info { input } => run_info(&input, cli.quiet),
        Commands::Render {
            input,
            output,
            window,
            modality,
            findings,
            study,
            series,
            scale,
        } => run_render(RenderJob {
            input,
            output,
            window,
            modality: modality.into(),
            findings,
            study,
            series,
            scale,
            config,
            quiet: cli.quiet,
        }),
        Commands::Export {
            manifest,
            dir,
            modality,
            study,
            series,
            out_dir,
            window,
            findings,
            size,
        } => run_export(ExportJob {
            source: match (manifest, dir) {
                (Some(path), _) => ExportSource::Manifest(path),
                (None, Some(dir)) => ExportSource::Directory {
                    dir,
                    modality: modality.into(),
                },
                (None, None) => bail!("either --manifest or --dir is required"),
            },
            study,
            series,
            out_dir,
            window,
            findings,
            size,
            config,
            quiet: cli.quiet,
        }),
    }
}

fn decode_file(input: &Path) -> anyhow::Result<(FrameDecoder, DecodedFrame)> {
    let decoder = FrameDecoder::new(Arc::new(FsFetcher::new()), 1);
    let frame = decoder
        .decode(&FrameAddress::from_path(input))
        .with_context(|| format!("decoding {}", input.display()))?;
    Ok((decoder, frame))
}

/// Run info command.
fn run_info(input: &Path, quiet: bool) -> anyhow::Result<()> {
    let (decoder, frame) = decode_file(input)?;
    if quiet {
        return Ok(());
    }

    let bytes = std::fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let codec = decoder
        .registry()
        .find(&bytes)
        .map(|c| c.info().name)
        .unwrap_or("unknown");

    println!("Frame Information");
    println!("=================");
    println!("File: {}", input.display());
    println!("Codec: {}", codec);
    println!();
    println!("Image Properties:");
    println!("  Dimensions: {}x{}", frame.width, frame.height);
    println!("  Samples: {} x {}", frame.samples_per_pixel, frame.samples.kind());
    println!("  Rescale: slope {} intercept {}", frame.rescale_slope, frame.rescale_intercept);
    if let Some((min, max)) = frame.real_range() {
        println!("  Value Range: {} .. {}", min, max);
    }
    if let Some((row, col)) = frame.pixel_spacing {
        println!("  Pixel Spacing: {} x {} mm", row, col);
    }
    if frame.monochrome1 {
        println!("  Photometric: MONOCHROME1");
    }
    match frame.default_window {
        Some(w) => println!("  Default Window: W{} / C{}", w.width, w.center),
        None => {
            let w = initial_window(&frame);
            println!("  Default Window: none (auto W{:.0} / C{:.0})", w.width, w.center);
        }
    }
    Ok(())
}

struct RenderJob {
    input: PathBuf,
    output: PathBuf,
    window: WindowArgs,
    modality: Modality,
    findings: Option<PathBuf>,
    study: Option<String>,
    series: Option<String>,
    scale: f64,
    config: ViewerConfig,
    quiet: bool,
}

/// Resolve explicit width/center or a preset to a window and inversion.
fn resolve_window(args: &WindowArgs, modality: Modality, frame: &DecodedFrame) -> anyhow::Result<(WindowLevel, bool)> {
    let mut invert = args.invert;
    let window = match (args.width, args.center, &args.preset) {
        (Some(width), Some(center), _) => WindowLevel::new(width, center)?,
        (_, _, Some(id)) => {
            if let Some(preset) = modality.window_preset(id) {
                preset.window()
            } else if let Some(view) = modality.view_presets().iter().find(|p| p.id.eq_ignore_ascii_case(id)) {
                invert |= view.invert;
                initial_window(frame)
            } else if modality.sequence_presets().iter().any(|p| p.id.eq_ignore_ascii_case(id)) {
                initial_window(frame)
            } else {
                bail!("no preset '{}' for modality {}", id, modality);
            }
        }
        _ => initial_window(frame),
    };
    Ok((window, invert))
}

/// Run render command.
fn run_render(job: RenderJob) -> anyhow::Result<()> {
    if !(job.scale.is_finite() && job.scale > 0.0) {
        bail!("--scale must be positive");
    }
    let (_, frame) = decode_file(&job.input)?;
    let (window, invert) = resolve_window(&job.window, job.modality, &frame)?;
    let surface = map_to_display(&frame, window, invert)?;

    let annotations = match (&job.findings, &job.study) {
        (Some(path), Some(study)) => StaticFindings::load(path)?.findings_for(study, job.series.as_deref())?,
        _ => Vec::new(),
    };

    let width = ((f64::from(frame.width) * job.scale).round() as u32).max(1);
    let height = ((f64::from(frame.height) * job.scale).round() as u32).max(1);
    let transform = ImageToScreen::uniform(job.scale);
    let style = OverlayStyle {
        point_radius_px: job.config.point_detection_radius_px,
        hit_tolerance_px: job.config.hit_tolerance_px,
        ..Default::default()
    };
    let scene = compose(&annotations, &[], &transform, &style);
    let image = rasterize(&surface, &scene, &transform, width, height);
    image
        .save(&job.output)
        .with_context(|| format!("writing {}", job.output.display()))?;

    if !job.quiet {
        println!(
            "Rendered {} -> {} ({}x{}, W{} / C{}{}, {} findings)",
            job.input.display(),
            job.output.display(),
            width,
            height,
            window.width,
            window.center,
            if invert { ", inverted" } else { "" },
            annotations.len()
        );
        for label in scene.labels() {
            log::debug!("label at ({:.0}, {:.0}): {}", label.anchor.x, label.anchor.y, label.text);
        }
    }
    Ok(())
}

enum ExportSource {
    Manifest(PathBuf),
    Directory { dir: PathBuf, modality: Modality },
}

impl ExportSource {
    /// Build the catalog to export from.
    fn catalog(&self, study_id: &str, series_id: Option<&str>) -> anyhow::Result<ManifestCatalog> {
        match self {
            ExportSource::Manifest(path) => Ok(ManifestCatalog::load(path)?),
            ExportSource::Directory { dir, modality } => {
                let name = dir
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "series".to_string());
                let series_id = series_id.unwrap_or(&name);
                let series = FrameDiscovery::new()
                    .discover_series(dir, series_id, &name, Orientation::None)
                    .with_context(|| format!("scanning {}", dir.display()))?;
                let study = StudyReference::new(study_id, *modality, vec![series])?;
                Ok(ManifestCatalog::from_studies(vec![study])?)
            }
        }
    }
}

struct ExportJob {
    source: ExportSource,
    study: String,
    series: Option<String>,
    out_dir: PathBuf,
    window: WindowArgs,
    findings: Option<PathBuf>,
    size: u32,
    config: ViewerConfig,
    quiet: bool,
}

/// Run export command.
fn run_export(job: ExportJob) -> anyhow::Result<()> {
    let catalog = job.source.catalog(&job.study, job.series.as_deref())?;
    let study = catalog.open_study(&job.study)?;
    let series = match &job.series {
        Some(id) => study
            .series_by_id(id)
            .with_context(|| format!("series {} not in study {}", id, job.study))?
            .clone(),
        None => study
            .first_series()
            .with_context(|| format!("study {} has no series", job.study))?
            .clone(),
    };
    let show_findings = job.findings.is_some();
    let findings = match &job.findings {
        Some(path) => StaticFindings::load(path)?,
        None => StaticFindings::empty(),
    };

    std::fs::create_dir_all(&job.out_dir).with_context(|| format!("creating {}", job.out_dir.display()))?;

    let mut engine = ViewerEngine::new(job.config.clone(), catalog, findings)?;
    engine.open_study(&job.study)?;
    engine.dispatch(Action::AssignSeries {
        viewport: 0,
        series_id: series.series_id().to_string(),
    })?;
    if show_findings {
        engine.dispatch(Action::ToggleOverlay)?;
    }
    match (job.window.width, job.window.center, &job.window.preset) {
        (Some(width), Some(center), _) => {
            engine.dispatch(Action::SetWindowLevel { width, center })?;
        }
        (_, _, Some(id)) => {
            engine.dispatch(Action::ApplyPreset(id.clone()))?;
        }
        _ => {}
    }
    if job.window.invert {
        engine.dispatch(Action::SetInvert(true))?;
    }
    engine.resize_viewport(0, job.size, job.size)?;

    let progress = if job.quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(series.frame_count() as u64)
    };
    progress.set_style(
        ProgressStyle::with_template("{spinner} [{bar:40}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );

    let mut failed = 0;
    for slice in 0..series.frame_count() {
        progress.set_message(format!("{} slice {}", series.label(), slice));
        engine.dispatch(Action::SetSlice(slice as i64))?;
        if !engine.wait_idle(Duration::from_secs(30)) {
            bail!("timed out decoding slice {}", slice);
        }

        match engine.render_viewport(0) {
            Ok(view) => {
                let path = job
                    .out_dir
                    .join(format!("{}_{:04}.png", series.series_id(), slice + 1));
                view.image
                    .save(&path)
                    .with_context(|| format!("writing {}", path.display()))?;
            }
            Err(e) => {
                failed += 1;
                log::warn!("Slice {} failed: {}", slice, e);
            }
        }
        progress.inc(1);
    }
    progress.finish_with_message("done");

    let stats = engine.cache_stats();
    if !job.quiet {
        println!(
            "Exported {} of {} slices of {} to {} (cache hit rate {:.0}%)",
            series.frame_count() - failed,
            series.frame_count(),
            series.label(),
            job.out_dir.display(),
            stats.hit_rate() * 100.0
        );
    }
    if failed > 0 {
        bail!("{} slices failed to render", failed);
    }
    Ok(())
}
