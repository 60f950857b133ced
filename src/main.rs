use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};

mod cli;

use cli::Cli;
use snowgrab::config::{self, Config};
use snowgrab::downloader::{self, RunSummary};

#[tokio::main]
async fn main() -> ExitCode {
    // Set default log level to INFO if not specified
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "snowgrab=info");
    }

    let cli = Cli::parse();

    let log_file = config::resolve_log_file(&cli.overrides(), |name| std::env::var(name).ok());
    let log_writer = match log_file.as_deref().map(file_writer).transpose() {
        Ok(writer) => writer,
        Err(e) => {
            init_logging(None);
            error!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(log_writer);

    match run(&cli).await {
        Ok(summary) => {
            report(&summary);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Load configuration and download everything; per-attachment failures are not errors
async fn run(cli: &Cli) -> Result<RunSummary> {
    let config = Config::from_env(&cli.overrides()).context("Invalid configuration")?;
    info!(
        "Downloading attachments from {} into {}",
        config.instance.base_url(),
        config.download_dir.display()
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing up in-flight downloads");
            trigger.cancel();
        }
    });

    let summary = downloader::download_attachments(&config, &cancel)
        .await
        .context("Download run aborted")?;
    Ok(summary)
}

fn report(summary: &RunSummary) {
    for failure in &summary.failed {
        warn!(
            "✗ {} ({}): {} - {}",
            failure.id, failure.file_name, failure.kind, failure.message
        );
    }
    info!(
        "Completed {} / {} attachments, {} failed{}",
        summary.completed,
        summary.total,
        summary.failed_count(),
        if summary.skipped > 0 {
            format!(", {} not started", summary.skipped)
        } else {
            String::new()
        }
    );
}

/// Open `path` for appending log lines, creating its directory if needed
fn file_writer(path: &Path) -> Result<RollingFileAppender> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snowgrab.log".to_string());

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Cannot create log directory {}", dir.display()))?;
    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(dir)
        .with_context(|| format!("Cannot open log file {}", path.display()))
}

/// Log to stderr and, when given, to a file as well
fn init_logging(file_writer: Option<RollingFileAppender>) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let file_layer = file_writer.map(|writer| {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_filter(EnvFilter::from_default_env())
    });

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(EnvFilter::from_default_env()),
        )
        .with(file_layer)
        .init();
}
