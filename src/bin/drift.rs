//! Drift CLI - Command-line interface for Synheart Drift
//!
//! Commands:
//! - run: Process streaming interval samples from stdin (streaming mode)
//! - transform: Process a file of interval samples into tick records (batch mode)
//! - doctor: Diagnose configuration health, including mode reachability

use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use synheart_drift::classifier::soft_membership;
use synheart_drift::encoder::DriftEncoder;
use synheart_drift::types::Mode;
use synheart_drift::{DriftConfig, DriftError, DriftSession, DRIFT_VERSION};

/// Drift - On-device autonomic state trajectory engine
#[derive(Parser)]
#[command(name = "drift")]
#[command(author = "Synheart AI Inc")]
#[command(version = DRIFT_VERSION)]
#[command(about = "Classify autonomic state trajectories from heartbeat-interval streams", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process streaming interval samples from stdin (streaming mode)
    Run {
        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Configuration file (JSON); defaults apply when omitted
        #[arg(long)]
        config: Option<PathBuf>,

        /// Tick cadence in milliseconds of sample time
        #[arg(long, default_value = "1000")]
        tick_ms: u64,

        /// Flush output after each record
        #[arg(long, default_value = "true")]
        flush: bool,
    },

    /// Process a file of interval samples into tick records (batch mode)
    Transform {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long)]
        output: PathBuf,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Configuration file (JSON); defaults apply when omitted
        #[arg(long)]
        config: Option<PathBuf>,

        /// Tick cadence in milliseconds of sample time
        #[arg(long, default_value = "1000")]
        tick_ms: u64,
    },

    /// Diagnose configuration health and mode reachability
    Doctor {
        /// Configuration file to check; defaults when omitted
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one envelope per line)
    Ndjson,
    /// JSON array of envelopes
    Json,
    /// Pretty-printed JSON array
    JsonPretty,
}

/// One interval sample on the input stream
#[derive(Debug, Deserialize)]
struct SampleLine {
    /// Beat-to-beat interval in milliseconds
    interval_ms: u32,
    /// Arrival timestamp (RFC 3339)
    ts: DateTime<Utc>,
    /// Optional heart-rate context passed through to the output
    #[serde(default)]
    hr: Option<f64>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), DriftCliError> {
    match cli.command {
        Commands::Run {
            output_format,
            config,
            tick_ms,
            flush,
        } => {
            if atty::is(atty::Stream::Stdin) {
                eprintln!("reading interval samples from stdin (one JSON object per line)...");
            }
            let config = load_config(config.as_deref())?;
            let stdin = io::stdin();
            let stdout = io::stdout();
            process_stream(
                stdin.lock(),
                &mut stdout.lock(),
                config,
                tick_ms,
                output_format,
                flush,
            )
        }
        Commands::Transform {
            input,
            output,
            output_format,
            config,
            tick_ms,
        } => {
            let config = load_config(config.as_deref())?;
            let reader: Box<dyn BufRead> = if input == Path::new("-") {
                Box::new(BufReader::new(io::stdin()))
            } else {
                Box::new(BufReader::new(fs::File::open(&input)?))
            };
            let mut writer: Box<dyn Write> = if output == Path::new("-") {
                Box::new(io::stdout())
            } else {
                Box::new(fs::File::create(&output)?)
            };
            process_stream(reader, &mut writer, config, tick_ms, output_format, false)
        }
        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),
    }
}

fn load_config(path: Option<&Path>) -> Result<DriftConfig, DriftCliError> {
    match path {
        Some(path) => {
            let json = fs::read_to_string(path)?;
            Ok(DriftConfig::from_json(&json)?)
        }
        None => Ok(DriftConfig::default()),
    }
}

/// Drive a session over an input stream: samples are buffered as they
/// arrive, and a pipeline tick fires each time sample time crosses the next
/// cadence boundary.
fn process_stream<R: BufRead, W: Write>(
    reader: R,
    writer: &mut W,
    config: DriftConfig,
    tick_ms: u64,
    format: OutputFormat,
    flush: bool,
) -> Result<(), DriftCliError> {
    let mut session = DriftSession::new(config)?;
    let encoder = DriftEncoder::new();
    let session_id = session.session_id().to_string();
    let cadence = Duration::milliseconds(tick_ms as i64);

    let mut envelopes = Vec::new();
    let mut next_tick: Option<DateTime<Utc>> = None;
    let mut last_tick: Option<DateTime<Utc>> = None;
    let mut last_sample: Option<DateTime<Utc>> = None;
    let mut hr_context: Option<f64> = None;

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let sample: SampleLine = match serde_json::from_str(&line) {
            Ok(sample) => sample,
            Err(e) => {
                eprintln!("skipping malformed sample: {}", e);
                continue;
            }
        };

        // Fire any ticks the stream has moved past
        let mut due = *next_tick.get_or_insert(sample.ts + cadence);
        while sample.ts >= due {
            let record = session.tick(due, hr_context)?;
            emit(writer, &mut envelopes, &encoder, &session_id, record, &format, flush)?;
            last_tick = Some(due);
            due += cadence;
        }
        next_tick = Some(due);

        if sample.hr.is_some() {
            hr_context = sample.hr;
        }
        if let Err(e) = session.push_interval(sample.interval_ms, sample.ts) {
            // The core refuses corrupted deliveries; report and move on.
            eprintln!("sample rejected: {}", e);
            continue;
        }
        last_sample = Some(sample.ts);
    }

    // One closing tick so trailing samples are represented
    if let Some(at) = last_sample {
        if last_tick.map_or(true, |t| at > t) {
            let record = session.tick(at, hr_context)?;
            emit(writer, &mut envelopes, &encoder, &session_id, record, &format, flush)?;
        }
    }

    match format {
        OutputFormat::Ndjson => {}
        OutputFormat::Json => {
            serde_json::to_writer(&mut *writer, &envelopes)
                .map_err(DriftError::from)?;
            writeln!(writer)?;
        }
        OutputFormat::JsonPretty => {
            serde_json::to_writer_pretty(&mut *writer, &envelopes)
                .map_err(DriftError::from)?;
            writeln!(writer)?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn emit<W: Write>(
    writer: &mut W,
    envelopes: &mut Vec<synheart_drift::DriftEnvelope>,
    encoder: &DriftEncoder,
    session_id: &str,
    record: synheart_drift::TickRecord,
    format: &OutputFormat,
    flush: bool,
) -> Result<(), DriftCliError> {
    match format {
        OutputFormat::Ndjson => {
            let json = encoder.encode_to_json(session_id, record)?;
            writeln!(writer, "{}", json)?;
            if flush {
                writer.flush()?;
            }
        }
        _ => envelopes.push(encoder.encode(session_id, record)),
    }
    Ok(())
}

fn cmd_doctor(config_path: Option<&Path>, json: bool) -> Result<(), DriftCliError> {
    let config = load_config(config_path)?;
    config.validate()?;
    let reachability = config.verify_mode_reachability();

    // Per-mode self-membership at its own centroid
    let self_memberships: Vec<(Mode, f64)> = Mode::ALL
        .iter()
        .zip(config.classifier.centroids.iter())
        .map(|(mode, centroid)| {
            let membership = soft_membership(&centroid.as_array(), &config.classifier);
            (*mode, membership.weight(*mode))
        })
        .collect();

    if json {
        let report = serde_json::json!({
            "version": DRIFT_VERSION,
            "config_version": config.version,
            "config_valid": true,
            "modes_reachable": reachability.is_ok(),
            "entry_threshold": config.classifier.entry_threshold,
            "exit_threshold": config.classifier.exit_threshold,
            "temperature": config.classifier.temperature,
            "self_membership": self_memberships
                .iter()
                .map(|(m, w)| (m.as_str().to_string(), *w))
                .collect::<std::collections::BTreeMap<_, _>>(),
        });
        println!("{}", serde_json::to_string_pretty(&report).map_err(DriftError::from)?);
    } else {
        println!("drift {}", DRIFT_VERSION);
        println!("config: {} (valid)", config.version);
        println!(
            "thresholds: entry {} / exit {} at temperature {}",
            config.classifier.entry_threshold,
            config.classifier.exit_threshold,
            config.classifier.temperature
        );
        println!("self-membership at each centroid:");
        for (mode, weight) in &self_memberships {
            let verdict = if *weight > config.classifier.entry_threshold {
                "ok"
            } else {
                "UNREACHABLE"
            };
            println!("  {:<12} {:.3}  {}", mode.as_str(), weight, verdict);
        }
    }

    // An unreachable mode is a calibration failure, not a warning.
    reachability?;
    Ok(())
}

/// CLI error wrapper
#[derive(Debug)]
enum DriftCliError {
    Io(io::Error),
    Compute(DriftError),
}

impl std::fmt::Display for DriftCliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriftCliError::Io(e) => write!(f, "I/O: {}", e),
            DriftCliError::Compute(e) => write!(f, "{}", e),
        }
    }
}

impl From<io::Error> for DriftCliError {
    fn from(e: io::Error) -> Self {
        DriftCliError::Io(e)
    }
}

impl From<DriftError> for DriftCliError {
    fn from(e: DriftError) -> Self {
        DriftCliError::Compute(e)
    }
}
