use std::{
    path::PathBuf,
    process::ExitCode,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use capturecast::{
    Config,
    capture::{
        AggregateResult, CaptureDependencies, Classification, OperationOutcome, Pipeline,
        RecordingSession, RecordingState, SinkRegistry, SourceProvider,
        affinity::AffinityExecutors, capture_once, encoders::FrameStreamEncoder,
        encoders::PpmEncoder, sources::PatternSourceProvider,
    },
    notification::{DesktopNotifier, Notice, Notifier, send_notification_async},
};
use clap::{ArgAction, Parser, Subcommand};
use log::{info, warn};
use signal_hook::consts::signal::{SIGINT, SIGTERM, SIGUSR1};
use signal_hook::iterator::Signals;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Parser, Debug)]
#[command(name = "capturecast")]
#[command(
    version,
    long_version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CAPTURECAST_GIT_HASH"), ")"),
    about = "Capture the screen once and deliver it to every configured output"
)]
struct Cli {
    /// Read configuration from PATH instead of ~/.config/capturecast/config.toml
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Do not show desktop notifications
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    no_notify: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Capture one frame and deliver it to every sink
    Capture {
        /// Comma-separated sink ids (defaults to capture.sinks from the config)
        #[arg(long, value_delimiter = ',', value_name = "IDS")]
        sinks: Option<Vec<String>>,

        /// Print the result as JSON
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Record until interrupted (SIGUSR1 toggles pause)
    Record {
        /// Comma-separated sink ids (defaults to capture.sinks from the config)
        #[arg(long, value_delimiter = ',', value_name = "IDS")]
        sinks: Option<Vec<String>>,

        /// Stop after SECS seconds
        #[arg(long, value_name = "SECS")]
        duration: Option<u64>,

        /// Print the result as JSON
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// List the available sinks
    Sinks,
}

fn main() -> Result<ExitCode> {
    env_logger::init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let registry = SinkRegistry::builtin(config.file_sink_config(), config.upload_command());
    let notify = config.notifications.enabled && !cli.no_notify;

    match cli.command {
        Commands::Capture { sinks, json } => {
            let sinks = sinks.unwrap_or_else(|| config.capture.sinks.clone());
            run_capture(&config, registry, &sinks, json, notify)
        }
        Commands::Record {
            sinks,
            duration,
            json,
        } => {
            let sinks = sinks.unwrap_or_else(|| config.capture.sinks.clone());
            let limit = duration.or(config.recording.max_duration_secs);
            run_record(&config, registry, sinks, limit, json, notify)
        }
        Commands::Sinks => {
            for descriptor in registry.descriptors() {
                println!("{:<10} {}", descriptor.id, descriptor.name);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_capture(
    config: &Config,
    registry: SinkRegistry,
    sinks: &[String],
    json: bool,
    notify: bool,
) -> Result<ExitCode> {
    let dependencies = CaptureDependencies {
        sources: Arc::new(PatternSourceProvider::new(
            config.capture.width,
            config.capture.height,
        )),
        encoder: Arc::new(PpmEncoder),
        registry,
        executors: AffinityExecutors::new(),
    };

    match capture_once(&dependencies, sinks) {
        Ok(result) => finish(&result, json, notify),
        Err(err) => {
            if notify {
                present(Notice::from_error(&err));
            }
            Err(err).context("Capture failed")
        }
    }
}

fn run_record(
    config: &Config,
    registry: SinkRegistry,
    sinks: Vec<String>,
    limit: Option<u64>,
    json: bool,
    notify: bool,
) -> Result<ExitCode> {
    let provider = PatternSourceProvider::new(config.capture.width, config.capture.height);
    let executors = AffinityExecutors::new();
    let mut session = RecordingSession::new(
        registry.resolve(&sinks),
        provider.open()?,
        Box::new(FrameStreamEncoder::new()),
    )?
    .with_pipeline(Pipeline::new(executors))
    .with_options(config.recording_options());

    let stop_flag = Arc::new(AtomicBool::new(false));
    let toggle_flag = Arc::new(AtomicBool::new(false));
    let mut signals = Signals::new([SIGUSR1, SIGTERM, SIGINT])
        .context("Failed to register signal handler")?;
    let signals_handle = signals.handle();
    {
        let stop_flag = stop_flag.clone();
        let toggle_flag = toggle_flag.clone();
        thread::spawn(move || {
            for sig in signals.forever() {
                match sig {
                    SIGUSR1 => toggle_flag.store(true, Ordering::Release),
                    SIGTERM | SIGINT => {
                        info!(
                            "Received {} - stopping recording",
                            if sig == SIGTERM { "SIGTERM" } else { "SIGINT" }
                        );
                        stop_flag.store(true, Ordering::Release);
                    }
                    _ => warn!("Received unexpected signal: {}", sig),
                }
            }
        });
    }

    session.start().context("Failed to start recording")?;
    let deadline = limit.map(|secs| Instant::now() + Duration::from_secs(secs));
    info!("Recording to {} - press Ctrl+C to stop", sinks.join(", "));

    loop {
        if stop_flag.load(Ordering::Acquire) {
            break;
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            info!("Recording time limit reached");
            break;
        }
        if session.worker_finished() {
            warn!("Frame loop ended early");
            break;
        }
        if toggle_flag.swap(false, Ordering::Acquire) {
            match session.state() {
                RecordingState::Recording => session.pause()?,
                RecordingState::Paused => session.resume()?,
                RecordingState::Idle => {}
            }
            info!("Recording {:?}", session.state());
        }
        thread::sleep(Duration::from_millis(50));
    }
    signals_handle.close();

    let frames = session.frames_encoded();
    match session.stop() {
        Ok(result) => {
            info!("Recorded {} frames", frames);
            finish(&result, json, notify)
        }
        Err(err) => {
            if notify {
                present(Notice::from_error(&err));
            }
            Err(err).context("Recording failed")
        }
    }
}

fn finish(result: &AggregateResult, json: bool, notify: bool) -> Result<ExitCode> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(result).context("Failed to serialize result")?
        );
    } else {
        for report in result.reports() {
            match &report.outcome {
                OperationOutcome::Success { title, content, .. } => {
                    println!("ok    {}: {} ({})", report.sink.name, title, content);
                }
                OperationOutcome::Failure { cause } => {
                    println!("error {}: {}", report.sink.name, cause);
                }
            }
        }
    }

    if notify {
        present(Notice::from_result(result));
    }

    Ok(match result.classification() {
        Classification::AllFailed => ExitCode::FAILURE,
        Classification::AllSucceeded | Classification::Partial => ExitCode::SUCCESS,
    })
}

/// Shows a notice, giving up after a short timeout.
fn present(notice: Notice) {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            warn!("Failed to start notification runtime: {}", e);
            return;
        }
    };

    let notifier: Arc<dyn Notifier> = Arc::new(DesktopNotifier);
    let task = send_notification_async(runtime.handle(), notifier, notice);
    if runtime
        .block_on(async { tokio::time::timeout(NOTIFY_TIMEOUT, task).await })
        .is_err()
    {
        warn!("Timed out sending notification");
    }
}
