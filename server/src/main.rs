use anyhow::Result;
use clap::Parser;
use starfind_server::{build_app, ServerConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
struct Args {
    /// Directory holding the index, settings and watchdog worklist
    #[arg(long, env = "STARFIND_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,
    /// Host to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 5000)]
    port: u16,
    /// `term count` frequency dictionary for spelling suggestions
    #[arg(long)]
    dictionary: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();
    let (app, shutdown) = build_app(ServerConfig { data_dir: args.data_dir, dictionary: args.dictionary })?;

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown => tracing::info!("shutting down on request"),
                _ = tokio::signal::ctrl_c() => tracing::info!("shutting down on ctrl-c"),
            }
        })
        .await?;
    Ok(())
}
