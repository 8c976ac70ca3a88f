use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::LevelFilter;
use serde::Serialize;
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};
use xlsx_slim::config::{MAX_IMAGE_EDGE, MIN_IMAGE_EDGE};
use xlsx_slim::{
    human_size, run_pipeline, Capabilities, LogVerbosity, RunReport, Settings, SettingsStore,
    SlimConfig, StageSelection,
};

use crate::sink::TermSink;

/// Same exit code clap uses for bad arguments.
const USAGE_ERROR: u8 = 2;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(
    name = "xlsx-slim",
    version,
    about = "Shrink XLSX/XLSM workbooks without changing what they compute."
)]
pub struct Args {
    /// Workbook to slim (.xlsx or .xlsm). It is never modified.
    input: PathBuf,

    /// Remove defined names that are hidden, broken or point at external workbooks.
    #[arg(long)]
    clean: bool,

    /// Recompress embedded images.
    #[arg(long)]
    images: bool,

    /// Recompress images, then prune parts Excel can rebuild.
    #[arg(long)]
    precision: bool,

    /// Downscale large images and convert opaque ones to JPEG.
    #[arg(long)]
    aggressive: bool,

    /// Let the precision stage drop calcChain, printer settings, thumbnails, custom properties
    /// and pivot cache records.
    #[arg(long)]
    xml_cleanup: bool,

    /// Also drop customXml parts. Add-ins may store data there.
    #[arg(long)]
    force_custom_xml: bool,

    /// Do not copy the input before the first modifying stage.
    #[arg(long, conflicts_with = "keep_backup")]
    no_backup: bool,

    /// Keep the backup after a successful run.
    #[arg(long)]
    keep_backup: bool,

    /// Longest image edge in aggressive mode.
    #[arg(
        long,
        value_name = "PIXELS",
        value_parser = clap::value_parser!(u32).range(i64::from(MIN_IMAGE_EDGE)..=i64::from(MAX_IMAGE_EDGE))
    )]
    max_image_edge: Option<u32>,

    /// JPEG quality in aggressive mode.
    #[arg(long, value_name = "1-100", value_parser = clap::value_parser!(u8).range(1..=100))]
    jpeg_quality: Option<u8>,

    /// Move the final workbook here instead of next to the input.
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Show per-part detail and debug logging.
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only print warnings, errors and the final report.
    #[arg(short, long)]
    quiet: bool,

    /// Settings file to use instead of the per-user one.
    #[arg(long, value_name = "PATH")]
    settings: Option<PathBuf>,

    /// Persist the effective options as the new defaults.
    #[arg(long)]
    save_settings: bool,

    /// Output format for the final report (stdout).
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

impl Args {
    /// Name cleanup plus image optimization unless a stage is picked explicitly.
    fn stages(&self) -> StageSelection {
        if !(self.clean || self.images || self.precision) {
            return StageSelection::default();
        }
        StageSelection {
            clean: self.clean,
            images: self.images,
            precision: self.precision,
        }
    }

    /// Overlay the command line onto the persisted settings.
    fn apply_to(&self, mut settings: Settings) -> Settings {
        settings.aggressive |= self.aggressive;
        settings.do_xml_cleanup |= self.xml_cleanup;
        settings.force_custom_xml_removal |= self.force_custom_xml;
        if self.no_backup {
            settings.no_backup = true;
            settings.keep_backup = false;
        }
        if self.keep_backup {
            settings.keep_backup = true;
            settings.no_backup = false;
        }
        if let Some(edge) = self.max_image_edge {
            settings.max_image_edge = edge;
        }
        if let Some(quality) = self.jpeg_quality {
            settings.jpeg_quality = u32::from(quality);
        }
        if let Some(dir) = &self.output_dir {
            settings.output_directory = Some(dir.clone());
        }
        if self.verbose {
            settings.log_verbosity = LogVerbosity::Verbose;
        }
        if self.quiet {
            settings.log_verbosity = LogVerbosity::Minimal;
        }
        settings.normalized()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonOutput<'a> {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<&'a RunReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub fn init_logging(args: &Args) {
    let level = if args.verbose {
        LevelFilter::Debug
    } else if args.quiet {
        LevelFilter::Warn
    } else {
        LevelFilter::Info
    };
    // Pipeline messages reach the terminal through the progress sink.
    let config = ConfigBuilder::new()
        .set_time_level(LevelFilter::Off)
        .set_target_level(LevelFilter::Off)
        .add_filter_ignore_str("xlsx_slim::pipeline")
        .build();
    if TermLogger::init(level, config, TerminalMode::Stderr, ColorChoice::Auto).is_err() {
        eprintln!("warning: a logger is already installed");
    }
}

pub fn run(args: Args) -> Result<ExitCode> {
    let store = match &args.settings {
        Some(path) => Some(SettingsStore::at(path)),
        None => match SettingsStore::default_location() {
            Ok(store) => Some(store),
            Err(err) => {
                log::warn!("{err}; using default settings");
                None
            }
        },
    };
    let persisted = store.as_ref().map(SettingsStore::load).unwrap_or_default();
    let settings = args.apply_to(persisted.clone());

    let mut stages = args.stages();
    if stages.images && !Capabilities::detect().images {
        if args.images {
            eprintln!("error: --images needs image codecs, which this build does not include");
            return Ok(ExitCode::from(USAGE_ERROR));
        }
        log::warn!("image codecs unavailable; skipping image optimization");
        stages.images = false;
    }

    let baseline = if args.save_settings {
        if let Some(store) = &store {
            store
                .save(&settings)
                .with_context(|| format!("save settings to {}", store.path().display()))?;
        }
        settings.clone()
    } else {
        persisted
    };

    let config = SlimConfig::from_settings(&settings, stages);
    let mut sink = TermSink::new(args.quiet, store, baseline);
    let result = run_pipeline(&args.input, &config, &mut sink);

    let mut stdout = io::stdout().lock();
    let written = match (&result, args.format) {
        (Ok(report), OutputFormat::Text) => write_text(&mut stdout, report),
        (Ok(report), OutputFormat::Json) => write_json(
            &mut stdout,
            &JsonOutput {
                ok: true,
                report: Some(report),
                error: None,
            },
        ),
        (Err(err), OutputFormat::Json) => write_json(
            &mut stdout,
            &JsonOutput {
                ok: false,
                report: None,
                error: Some(err.to_string()),
            },
        ),
        // The sink already printed the error.
        (Err(_), OutputFormat::Text) => Ok(()),
    };
    ignore_broken_pipe(written).context("write report")?;

    Ok(if result.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn write_text(out: &mut impl Write, report: &RunReport) -> io::Result<()> {
    writeln!(
        out,
        "{} -> {}",
        report.input.display(),
        report.final_path.display()
    )?;
    for stage in &report.stages {
        writeln!(
            out,
            "  {:<20} {:>9} -> {:>9}  {}",
            stage.stage.as_str(),
            human_size(stage.bytes_before),
            human_size(stage.bytes_after),
            stage.summary
        )?;
    }
    writeln!(
        out,
        "Saved {} ({:.1}%)",
        human_size(report.saved_bytes()),
        report.saved_percent()
    )?;

    let failures: Vec<_> = report.failures().collect();
    if !failures.is_empty() {
        writeln!(out, "{} operation(s) failed:", failures.len())?;
        for record in failures {
            writeln!(out, "  - {record}")?;
        }
    }
    out.flush()
}

fn write_json(out: &mut impl Write, value: &JsonOutput<'_>) -> io::Result<()> {
    serde_json::to_writer(&mut *out, value)?;
    out.write_all(b"\n")?;
    out.flush()
}

/// A closed stdout (`xlsx-slim ... | head`) is not a failure of the run.
fn ignore_broken_pipe(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        other => other,
    }
}
