use clap::Parser;
use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug, Clone)]
#[command(name = "chat-server")]
#[command(about = "Branching chat HTTP server")]
#[command(version)]
struct Cli {
    /// Server port
    #[arg(long, env = "PORT", default_value = "8080")]
    port: u16,

    /// Directory holding the SQLite database
    #[arg(long, env = "DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(long, env = "DEBUG", default_value = "false")]
    debug: bool,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let fallback = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .init();

    tracing::info!(port = cli.port, data_dir = %cli.data_dir.display(), "starting chat server");

    web_service::run(cli.data_dir, cli.port).await
}
