use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use dcp_forge::backend::{CodecSettings, RemoteEncoder};
use dcp_forge::config::SessionConfig;
use dcp_forge::discovery::{DEFAULT_SERVER_PORT, ServerDescription};
use dcp_forge::observability::{EncodeMetricsSnapshot, log_snapshot};
use dcp_forge::server::EncodeServer;
use dcp_forge::session::{EncodeSession, SessionProgress};
use dcp_forge::time::DcpTime;
use dcp_forge::validation::validate_config;
use serde_json::to_writer_pretty;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, prelude::*};

fn main() -> Result<()> {
    let cli = Cli::parse();
    configure_tracing()?;

    match cli.command {
        Commands::Encode {
            config,
            no_resume,
            print_metrics,
            metrics_json,
            metrics_prometheus,
        } => encode_cmd(
            config,
            no_resume,
            print_metrics,
            metrics_json,
            metrics_prometheus,
        ),
        Commands::Validate { config } => validate_cmd(config),
        Commands::Serve { listen, threads } => serve_cmd(listen, threads),
        Commands::Probe {
            servers,
            timeout_ms,
        } => probe_cmd(servers, timeout_ms),
        Commands::Playlist { config, from, to } => playlist_cmd(config, from, to),
    }
}

fn configure_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .try_init()
        .map_err(|err| anyhow!(err.to_string()))?;
    Ok(())
}

fn encode_cmd(
    config_path: PathBuf,
    no_resume: bool,
    print_metrics: bool,
    metrics_json: Option<PathBuf>,
    metrics_prometheus: Option<PathBuf>,
) -> Result<()> {
    let mut config = SessionConfig::load(&config_path)?;
    if no_resume {
        config.output.resume = false;
    }
    let directory = config.output.directory.clone();

    let session = EncodeSession::from_config(config)?;
    let metrics_handle = session.metrics();
    let bar_width = 30usize;

    let progress_render = move |progress: &SessionProgress| {
        let fraction = progress.fraction();
        let filled =
            ((fraction * bar_width as f64).round() as isize).clamp(0, bar_width as isize) as usize;
        let empty = bar_width.saturating_sub(filled);
        let percent = (fraction * 100.0).round().clamp(0.0, 100.0) as i32;
        let rate = progress
            .encoding_rate
            .map(|fps| format!("{fps:.1} fps"))
            .unwrap_or_default();
        print!(
            "\r{:>6}/{:<6} [{}{}] {:>3}% {:<12}",
            progress.frames_written,
            progress.total_frames,
            "=".repeat(filled),
            " ".repeat(empty),
            percent,
            rate
        );
        let _ = io::stdout().flush();
    };

    let outcome = session.run_with_progress(progress_render);
    println!();

    if print_metrics || metrics_json.is_some() || metrics_prometheus.is_some() {
        write_metrics(
            &metrics_handle.snapshot(),
            print_metrics,
            metrics_json,
            metrics_prometheus,
        )?;
    }

    let report = outcome.context("Encoding failed")?;
    info!(
        package = %directory.display(),
        frames = report.frames,
        resumed_from = report.resumed_from,
        repeats = report.repeats,
        retries = report.retries,
        duration_ms = report.duration.as_secs_f64() * 1_000.0,
        "Package written"
    );
    println!("\x1b[32mPackage complete\x1b[0m");
    Ok(())
}

fn write_metrics(
    snapshot: &EncodeMetricsSnapshot,
    print_metrics: bool,
    metrics_json: Option<PathBuf>,
    metrics_prometheus: Option<PathBuf>,
) -> Result<()> {
    if print_metrics {
        log_snapshot(snapshot);
    }
    if let Some(path) = metrics_json {
        create_parent(&path)?;
        let file = File::create(&path)
            .with_context(|| format!("Failed to create metrics file: {}", path.display()))?;
        to_writer_pretty(file, snapshot)
            .with_context(|| format!("Failed to write metrics JSON: {}", path.display()))?;
        info!(metrics = %path.display(), "Metrics JSON written");
    }
    if let Some(path) = metrics_prometheus {
        create_parent(&path)?;
        fs::write(&path, snapshot.to_prometheus()).with_context(|| {
            format!("Failed to write Prometheus metrics: {}", path.display())
        })?;
        info!(metrics = %path.display(), "Prometheus metrics written");
    }
    Ok(())
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create metrics directory: {}", parent.display())
        })?;
    }
    Ok(())
}

fn validate_cmd(config_path: PathBuf) -> Result<()> {
    let config = SessionConfig::load(&config_path)?;
    let report = validate_config(&config);

    for warning in &report.warnings {
        warn!(file = %config_path.display(), "{warning}");
    }

    if report.is_ok() {
        info!(file = %config_path.display(), "Session config validation passed");
        Ok(())
    } else {
        for error_msg in &report.errors {
            error!(file = %config_path.display(), "{error_msg}");
        }
        Err(anyhow!(
            "Session config validation failed with {} error(s)",
            report.errors.len()
        ))
    }
}

fn serve_cmd(listen: String, threads: usize) -> Result<()> {
    let threads = match threads {
        0 => thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
        n => n,
    };
    let server = EncodeServer::bind(listen.as_str(), threads)
        .with_context(|| format!("Failed to listen on {listen}"))?;
    let handle = server.spawn()?;
    println!("Encode server listening on {}", handle.address());
    handle.wait();
    Ok(())
}

fn probe_cmd(servers: Vec<String>, timeout_ms: u64) -> Result<()> {
    let timeout = Duration::from_millis(timeout_ms);
    let mut unreachable = 0;
    for spec in &servers {
        let server = ServerDescription::parse(spec, DEFAULT_SERVER_PORT)?;
        let address = server.address();
        match RemoteEncoder::new(server, CodecSettings::default(), timeout).ping() {
            Ok(pong) => println!(
                "{address}: {} thread(s), version {}",
                pong.threads, pong.version
            ),
            Err(err) => {
                unreachable += 1;
                println!("{address}: unreachable ({err})");
            }
        }
    }
    if unreachable > 0 {
        bail!("{unreachable} of {} server(s) unreachable", servers.len());
    }
    Ok(())
}

fn playlist_cmd(config_path: PathBuf, from: Option<f64>, to: Option<f64>) -> Result<()> {
    let config = SessionConfig::load(&config_path)?;
    let playlist = config.build_playlist()?;
    let length = playlist.length();
    let (slowest, fastest) = playlist.speed_up_range();

    println!("Frame rate:  {} fps", playlist.dcp_rate());
    println!(
        "Length:      {} frame(s) ({})",
        playlist.length_frames(),
        length
    );
    println!("Identifier:  {}", playlist.video_identifier());
    println!("Speed-up:    {slowest:.3} - {fastest:.3}");
    println!();
    let from = from.map(DcpTime::from_seconds).unwrap_or_else(DcpTime::zero);
    let to = to.map(DcpTime::from_seconds).unwrap_or(length);
    println!("{}", playlist.content_summary(from, to));
    Ok(())
}

#[derive(Parser)]
#[command(
    name = "dcp-forge",
    version,
    about = "Distributed picture encoding and packaging for digital cinema"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a session config into a package.
    Encode {
        config: PathBuf,
        /// Start the package from scratch even if a resumable one exists.
        #[arg(long)]
        no_resume: bool,
        #[arg(long)]
        print_metrics: bool,
        #[arg(long = "metrics-json")]
        metrics_json: Option<PathBuf>,
        #[arg(long = "metrics-prometheus")]
        metrics_prometheus: Option<PathBuf>,
    },
    Validate {
        config: PathBuf,
    },
    /// Run an encode server for other machines to use.
    Serve {
        #[arg(long, default_value = "0.0.0.0:6192")]
        listen: String,
        /// 0 uses every available core.
        #[arg(long, default_value_t = 0)]
        threads: usize,
    },
    /// Ping encode servers.
    Probe {
        #[arg(required = true)]
        servers: Vec<String>,
        #[arg(long = "timeout-ms", default_value_t = 2_000)]
        timeout_ms: u64,
    },
    /// Print playlist timing.
    Playlist {
        config: PathBuf,
        /// Only list content playing after this many seconds.
        #[arg(long)]
        from: Option<f64>,
        /// Only list content playing before this many seconds.
        #[arg(long)]
        to: Option<f64>,
    },
}
