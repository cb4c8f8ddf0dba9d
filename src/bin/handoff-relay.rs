use anyhow::{Context, Result};
use clap::Parser;
use handoff::server::{forward_notifications, run_control, serve_downloads};
use handoff::streaming::delivery_path;
use handoff::{HandoffConfig, StreamHub};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

/// Relay handoff transfers: control frames on stdin, notifications on
/// stdout, downloads over HTTP.
#[derive(Parser, Debug)]
#[command(name = "handoff-relay", version, about)]
struct Args {
    /// TOML config file
    #[arg(short, long, env = "HANDOFF_CONFIG")]
    config: Option<PathBuf>,

    /// Address for the download endpoint (overrides config)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Path segment that marks a download request (overrides config)
    #[arg(long)]
    route_prefix: Option<String>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // stdout carries protocol frames
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let mut config = HandoffConfig::load_or_default(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(prefix) = args.route_prefix {
        config.route_prefix = prefix;
    }
    config.validate()?;

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    let addr = listener.local_addr()?;
    tracing::info!(
        "Serving downloads at http://{}{}",
        addr,
        delivery_path(&config.route_prefix, &"{id}".into())
    );

    let hub = StreamHub::new(config);
    let forward = tokio::spawn(forward_notifications(hub.subscribe(), tokio::io::stdout()));
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(serve_downloads(hub.clone(), listener, async {
        stop_rx.await.ok();
    }));

    let mut stdin = tokio::io::stdin();
    tokio::select! {
        res = run_control(&hub, &mut stdin) => {
            let stats = res?;
            tracing::info!(
                "Control channel closed after {} frames ({} registered, {} pushes)",
                stats.frames,
                stats.registered,
                stats.pushed
            );
        }
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted"),
    }

    // No producer remains to finish what is still open.
    let aborted = hub.handler().abort_all();
    if aborted > 0 {
        tracing::warn!("Aborted {} unfinished transfers", aborted);
    }

    stop_tx.send(()).ok();
    server.await.context("Download server panicked")??;

    // Forwarder drains queued notifications once the last hub handle is gone.
    drop(hub);
    let sent = forward.await.context("Notification forwarder panicked")??;
    tracing::debug!("Forwarded {} notifications", sent);
    Ok(())
}
