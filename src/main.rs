use std::path::PathBuf;

use anyhow::bail;
use clap::Parser;
use log::info;
use tokio::net::{TcpListener, UnixListener};

use stub_api_rust::config::AppConfig;
use stub_api_rust::{build_router, load_fixtures, load_spec};

/// Stateless mock server for the JSON REST API described by the loaded
/// OpenAPI document.
#[derive(Parser, Debug)]
#[command(name = "stub-api-rust", version, about)]
struct Cli {
    /// Port to listen for HTTP on; 0 lets the OS choose one
    #[arg(long)]
    http_port: Option<u16>,

    /// Port to listen for HTTPS on; 0 lets the OS choose one
    #[arg(long)]
    https_port: Option<u16>,

    /// Unix socket path to listen for HTTP on
    #[arg(long)]
    http_unix: Option<PathBuf>,

    /// Unix socket path to listen for HTTPS on
    #[arg(long)]
    https_unix: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from a .env file if it exists
    dotenvy::dotenv().ok();

    use env_logger::Builder;
    use log::LevelFilter;

    Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();

    if cli.https_port.is_some() || cli.https_unix.is_some() {
        bail!(
            "HTTPS listeners are not available in this build; put a TLS terminator in \
             front of the HTTP listener instead"
        );
    }

    let config = AppConfig::load()?;

    let spec = load_spec(&config)?;
    let fixtures = load_fixtures(&config)?;
    info!("loaded {} fixture resource(s)", fixtures.resources.len());

    let app = build_router(spec, fixtures, config.version())?;

    let mut listeners = Vec::new();

    // With no listener flags at all, serve HTTP on the configured port.
    let http_port = match (cli.http_port, &cli.http_unix) {
        (None, None) => Some(config.server.http_port),
        (port, _) => port,
    };

    if let Some(port) = http_port {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        info!("listening for HTTP on {}", listener.local_addr()?);

        let app = app.clone();
        listeners.push(tokio::spawn(async move {
            axum::serve(listener, app).await.map_err(anyhow::Error::from)
        }));
    }

    if let Some(path) = cli.http_unix {
        // Remove a stale socket from a previous run.
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path)?;
        info!("listening for HTTP on unix socket {}", path.display());

        let app = app.clone();
        listeners.push(tokio::spawn(async move {
            axum::serve(listener, app).await.map_err(anyhow::Error::from)
        }));
    }

    for listener in listeners {
        listener.await??;
    }

    Ok(())
}
