//! CLI entry point for the PATH GTFS Realtime publisher.
//!
//! `serve` resolves static identifiers, starts the trip-update feed (and
//! optionally the Port Authority alert feed) and serves them over HTTP.
//! `inspect` decodes a published feed from a file or URL and logs a summary.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use path_gtfs_rt::clock::{Clock, SystemClock};
use path_gtfs_rt::error::SourceError;
use path_gtfs_rt::feed::{new_alert_feed, new_trip_update_feed};
use path_gtfs_rt::fetch::{BasicClient, fetch_bytes};
use path_gtfs_rt::gtfs_rt::FeedMessage;
use path_gtfs_rt::parser::parse_feed;
use path_gtfs_rt::server::{AppState, create_router};
use path_gtfs_rt::source::{PathApiClient, PortAuthorityClient};
use path_gtfs_rt::static_data::StaticData;
use path_gtfs_rt::stats::{FeedMetrics, FeedStats};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "path_gtfs_rt")]
#[command(about = "Publishes PATH train realtime data as GTFS Realtime", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the feeds and serve them over HTTP
    Serve(ServeArgs),
    /// Decode a GTFS-RT feed from a file or URL and log a summary
    Inspect {
        /// Path to file or URL to fetch
        #[arg(value_name = "FILE_OR_URL")]
        source: String,
    },
}

#[derive(clap::Args)]
struct ServeArgs {
    /// Port to bind the HTTP server to
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// How often to update the trip-update feed, in seconds
    #[arg(long, env = "TRIP_UPDATE_PERIOD_SECS", default_value_t = 5)]
    trip_update_period_secs: u64,

    /// How often to update the alert feed, in seconds
    #[arg(long, env = "ALERT_UPDATE_PERIOD_SECS", default_value_t = 30)]
    alert_update_period_secs: u64,

    /// Maximum time to wait for the source API, in seconds
    #[arg(long, env = "TIMEOUT_SECS", default_value_t = 5)]
    timeout_secs: u64,

    /// Maximum time to wait for the Port Authority incident feed, in seconds
    #[arg(long, env = "ALERT_TIMEOUT_SECS", default_value_t = 30)]
    alert_timeout_secs: u64,

    /// Base URL of the PATH realtime source API
    #[arg(long, env = "SOURCE_API_URL", default_value = path_gtfs_rt::source::DEFAULT_BASE_URL)]
    source_api_url: String,

    /// Publish alerts from the Port Authority's Everbridge feed
    #[arg(long, env = "PUBLISH_PORT_AUTHORITY_ALERTS", default_value_t = false)]
    publish_port_authority_alerts: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/path_gtfs_rt.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("path_gtfs_rt.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => serve(args).await?,
        Commands::Inspect { source } => {
            let bytes = fetcher(&source).await?;
            let feed = parse_feed(&bytes)?;
            let stats = FeedStats::from_feed(&feed);
            info!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}

/// Loads feed data from a local file path or fetches it over HTTP.
#[tracing::instrument(fields(source = %url))]
async fn fetcher(url: &str) -> Result<Vec<u8>> {
    let bytes = if url.starts_with("http") {
        let client = BasicClient::new(Duration::from_secs(30))?;
        fetch_bytes(&client, url).await?
    } else {
        std::fs::read(url).with_context(|| format!("reading {url}"))?
    };
    Ok(bytes)
}

#[tracing::instrument(skip_all, fields(port = args.port))]
async fn serve(args: ServeArgs) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let timeout = Duration::from_secs(args.timeout_secs);

    info!(url = %args.source_api_url, "Source API: HTTP");
    let http = Arc::new(BasicClient::new(timeout)?);
    let source = Arc::new(PathApiClient::new(http, args.source_api_url.clone()));

    let static_data = Arc::new(
        StaticData::resolve(source.as_ref())
            .await
            .context("failed to resolve static data")?,
    );

    let trip_update_metrics = Arc::new(FeedMetrics::new("trip_updates"));
    let trip_update_feed = {
        let metrics = trip_update_metrics.clone();
        new_trip_update_feed(
            clock.clone(),
            Duration::from_secs(args.trip_update_period_secs),
            timeout,
            source,
            static_data.clone(),
            move |msg: &FeedMessage, errs: &[SourceError]| metrics.record(msg, errs),
        )
        .await
        .context("failed to initialize trip update feed")?
    };

    let alert_feed = if args.publish_port_authority_alerts {
        info!("Publishing Port Authority alerts");
        let alert_timeout = Duration::from_secs(args.alert_timeout_secs);
        let http = Arc::new(BasicClient::new(alert_timeout)?);
        let metrics = Arc::new(FeedMetrics::new("alerts"));
        let observer_metrics = metrics.clone();
        let feed = new_alert_feed(
            clock.clone(),
            Duration::from_secs(args.alert_update_period_secs),
            alert_timeout,
            Arc::new(PortAuthorityClient::new(http)),
            static_data.clone(),
            move |msg: &FeedMessage, errs: &[SourceError]| {
                observer_metrics.record(msg, errs)
            },
        )
        .await
        .context("failed to initialize alert feed")?;
        Some((feed, metrics))
    } else {
        None
    };

    let state = AppState::new(
        trip_update_feed.store(),
        trip_update_metrics,
        alert_feed
            .as_ref()
            .map(|(feed, metrics)| (feed.store(), metrics.clone())),
    );

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown requested");
            shutdown.cancel();
        });
    }

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.port))
        .await
        .with_context(|| format!("binding port {}", args.port))?;
    info!(addr = %listener.local_addr()?, "Serving feeds");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    trip_update_feed.shutdown().await;
    if let Some((feed, _)) = alert_feed {
        feed.shutdown().await;
    }
    Ok(())
}
