//! Command-line front end for the `fieldsurvey` toolkit.
//!
//! Subcommands:
//! - `survey`  – sample a location window, resolve the address, and save the
//!   record plus optional photos
//! - `analyze` – aggregate saved `.geojson` records into a summary report
//!
//! # Environment Variables
//! See [`fieldsurvey::config::load_from_env`] for the configuration surface.
//! Logging is controlled by:
//! - `RUST_LOG` (optional) – full filter directive, takes precedence
//! - `SURVEY_LOG_LEVEL` (optional) – log verbosity (default: `info`)
//! - `SURVEY_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! Logs and prompts go to stderr; reports go to stdout.
use std::{env, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono::{Local, Offset};
use clap::{Args, Parser, Subcommand};
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use fieldsurvey::aggregate::{AggregateStats, Aggregator, FileSummary, InputFile};
use fieldsurvey::artifact::{select_sink, ArtifactWriter, PhotoWrite, PlatformCapabilities};
use fieldsurvey::geocode::{AddressResolver, KakaoResolver, NullResolver};
use fieldsurvey::projection::{project_batch, render_text_report, ColorCycle, MapLayers, RecordRow};
use fieldsurvey::prompt::LinePrompt;
use fieldsurvey::sampler::{
    FixSampler, GpsdProvider, ReplayProvider, SampleRequest, SamplerStatus, SelectionPolicy,
};
use fieldsurvey::{config, Config, PhotoAttachment, PhotoSlot, SurveyOutcome, SurveyPipeline};

// ---

#[derive(Debug, Parser)]
#[command(name = "fieldsurvey", version, about = "Field survey location sampling and analysis")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sample a location window and save one survey record.
    Survey(SurveyArgs),
    /// Aggregate saved survey records into a report.
    Analyze(AnalyzeArgs),
}

#[derive(Debug, Args)]
struct SurveyArgs {
    // ---
    /// Investigator name (required, used in file names).
    #[arg(long, short)]
    name: String,

    /// Place name for the record.
    #[arg(long, short, default_value = "")]
    place: String,

    /// Sampling window in seconds [default: SAMPLE_DURATION_SECS].
    #[arg(long, short)]
    duration: Option<u64>,

    /// Wide-angle photo to attach.
    #[arg(long)]
    wide: Option<PathBuf>,

    /// Close-up photo to attach.
    #[arg(long)]
    close: Option<PathBuf>,

    /// Replay fixes from a JSON-lines file instead of gpsd.
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Delay between replayed fixes, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    replay_interval_ms: u64,

    /// Fix selection policy: `min` or `trimmed-mean:K` [default: FIX_POLICY].
    #[arg(long)]
    policy: Option<SelectionPolicy>,

    /// Output directory [default: OUTPUT_DIR].
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Ask for a destination per file instead of writing to the output directory.
    #[arg(long)]
    share: bool,

    /// Skip the confirmation prompt after the window closes.
    #[arg(long, short)]
    yes: bool,

    /// Print the saved record summary as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct AnalyzeArgs {
    // ---
    /// Saved `.geojson` record files.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Print stats, rows, and map layers as JSON instead of the text report.
    #[arg(long)]
    json: bool,

    /// Also write the text report to this file.
    #[arg(long)]
    report_out: Option<PathBuf>,

    /// Bucket hours in UTC instead of the local offset.
    #[arg(long)]
    utc: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let cfg = config::load_from_env()?;
    cfg.log_config();

    match cli.command {
        Command::Survey(args) => run_survey(cfg, args).await,
        Command::Analyze(args) => run_analyze(args).await,
    }
}

// ---

async fn run_survey(cfg: Config, args: SurveyArgs) -> Result<()> {
    // ---
    let prompt = LinePrompt::stdio();
    let (status_tx, status_rx) = mpsc::unbounded_channel();

    let sampler = match &args.replay {
        Some(path) => FixSampler::new(ReplayProvider::new(
            path,
            Duration::from_millis(args.replay_interval_ms),
        )),
        None => FixSampler::new(GpsdProvider::new(cfg.gpsd_addr.clone())),
    };
    let mut sampler = sampler
        .with_policy(args.policy.unwrap_or(cfg.selection_policy))
        .with_status(status_tx);
    if !args.yes {
        sampler = sampler.with_gate(prompt.clone());
    }

    let resolver: Box<dyn AddressResolver> = match &cfg.geocoder_api_key {
        Some(key) => Box::new(KakaoResolver::new(
            cfg.geocoder_url.clone(),
            key.clone(),
            cfg.geocoder_timeout,
        )),
        None => Box::new(NullResolver),
    };

    let caps = PlatformCapabilities {
        reliable_download: !(args.share || cfg.share_handoff),
    };
    let output_dir = args.output_dir.clone().unwrap_or(cfg.output_dir.clone());
    let sink = select_sink(caps, output_dir, Arc::new(prompt));
    let writer = ArtifactWriter::new(sink, cfg.photo);

    let pipeline = SurveyPipeline::with_boxed_resolver(sampler, resolver, writer);
    let renderer = tokio::spawn(render_status(status_rx));

    let request = SampleRequest {
        investigator_name: args.name.clone(),
        place_name: args.place.clone(),
        duration: args
            .duration
            .map(Duration::from_secs)
            .unwrap_or(cfg.sample_duration),
    };
    let photos = load_photos(&args).await;
    let outcome = pipeline.run(request, photos).await;

    // Dropping the pipeline closes the status channel.
    drop(pipeline);
    let _ = renderer.await;

    match outcome? {
        SurveyOutcome::Cancelled { session_id } => {
            tracing::info!(session = %session_id, "survey cancelled, nothing saved");
            Ok(())
        }
        SurveyOutcome::Saved(saved) => {
            if args.json {
                let summary = SavedJson {
                    record: saved.record.investigator_name.as_str(),
                    fixes_collected: saved.fixes_collected,
                    record_path: saved.report.record.as_ref().ok().map(|p| p.display().to_string()),
                    wide_path: written_path(saved.report.photo(PhotoSlot::Wide)),
                    close_path: written_path(saved.report.photo(PhotoSlot::Close)),
                    failures: saved.report.failures().iter().map(|e| e.to_string()).collect(),
                    marker: &saved.marker,
                };
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "{} @ {:.6}, {:.6} (±{:.1} m) {}",
                    saved.record.investigator_name,
                    saved.record.latitude,
                    saved.record.longitude,
                    saved.record.accuracy_meters,
                    saved.record.road_address
                );
                if let Ok(path) = &saved.report.record {
                    println!("saved {}", path.display());
                }
                for slot in PhotoSlot::ALL {
                    if let Some(path) = written_path(saved.report.photo(slot)) {
                        println!("saved {path}");
                    }
                }
            }
            Ok(())
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SavedJson<'a> {
    // ---
    record: &'a str,
    fixes_collected: usize,
    record_path: Option<String>,
    wide_path: Option<String>,
    close_path: Option<String>,
    failures: Vec<String>,
    marker: &'a fieldsurvey::MarkerSpec,
}

fn written_path(outcome: &PhotoWrite) -> Option<String> {
    match outcome {
        PhotoWrite::Written(path) => Some(path.display().to_string()),
        _ => None,
    }
}

/// Read the attachment files. An unreadable file just leaves its slot empty.
async fn load_photos(args: &SurveyArgs) -> Vec<PhotoAttachment> {
    // ---
    let mut photos = Vec::new();
    for (slot, path) in [(PhotoSlot::Wide, &args.wide), (PhotoSlot::Close, &args.close)] {
        let Some(path) = path else { continue };
        match tokio::fs::read(path).await {
            Ok(bytes) => photos.push(PhotoAttachment::new(slot, bytes)),
            Err(e) => tracing::warn!(%slot, path = %path.display(), "cannot read photo: {}", e),
        }
    }
    photos
}

async fn render_status(mut rx: mpsc::UnboundedReceiver<SamplerStatus>) {
    // ---
    while let Some(status) = rx.recv().await {
        match status {
            SamplerStatus::Started { duration_secs, .. } => {
                eprintln!("Sampling location for {duration_secs}s...");
            }
            SamplerStatus::Countdown { remaining_secs } => eprint!("\r  {remaining_secs:>3}s remaining "),
            SamplerStatus::FixReceived { accuracy_meters, collected } => {
                eprint!("\r  fix #{collected} ±{accuracy_meters:.1} m        ");
            }
            SamplerStatus::ProviderError { message } => eprint!("\r  provider: {message}        "),
            SamplerStatus::CountdownCleared => eprint!("\r{:40}\r", ""),
            SamplerStatus::Selected { accuracy_meters } => {
                eprintln!("Selected fix ±{accuracy_meters:.1} m");
            }
            SamplerStatus::Cancelled => eprintln!("Cancelled."),
            SamplerStatus::NoFix => eprintln!("No location fix received."),
        }
    }
}

// ---

async fn run_analyze(args: AnalyzeArgs) -> Result<()> {
    // ---
    let offset = if args.utc {
        chrono::Utc.fix()
    } else {
        Local::now().offset().fix()
    };

    let mut inputs = Vec::with_capacity(args.files.len());
    let mut unreadable = Vec::new();
    for path in &args.files {
        match InputFile::read(path).await {
            Ok(file) => inputs.push(file),
            Err(e) => {
                tracing::warn!("{}", e);
                unreadable.push(e);
            }
        }
    }

    let mut report = Aggregator::new(offset).aggregate(&inputs);
    report.rejected.extend(unreadable);

    let text = render_text_report(&report, Local::now().with_timezone(&offset));
    if let Some(path) = &args.report_out {
        tokio::fs::write(path, &text)
            .await
            .with_context(|| format!("Failed to write report to '{}'", path.display()))?;
        tracing::info!(path = %path.display(), "report written");
    }

    if args.json {
        let output = AnalysisJson {
            stats: &report.stats,
            mean_accuracy: report.stats.mean_accuracy(),
            files: &report.files,
            rejected: report.rejected.iter().map(|e| e.to_string()).collect(),
            skipped_features: report.skipped_features,
            rows: &report.rows,
            map: project_batch(&report, &mut ColorCycle::new()),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print!("{text}");
    }

    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisJson<'a> {
    // ---
    stats: &'a AggregateStats,
    mean_accuracy: Option<f64>,
    files: &'a [FileSummary],
    rejected: Vec<String>,
    skipped_features: usize,
    rows: &'a [RecordRow],
    map: MapLayers,
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Output on stderr, so stdout carries only reports
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `SURVEY_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - `"close"`      : emit CLOSE events only
///   - unset or other values: no span events (default)
/// - Log level controlled by the `SURVEY_LOG_LEVEL` env var
///
/// Called once at startup before any logging macros are invoked.
fn init_tracing() {
    // ---
    let span_events = match env::var("SURVEY_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        Ok("close") => FmtSpan::CLOSE,
        _ => FmtSpan::NONE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stderr().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to SURVEY_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("SURVEY_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("{level},hyper_util=warn,reqwest=warn"))
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
