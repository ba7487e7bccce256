use anyhow::Result;
use clap::Parser;

use termcast::{init_tracing, run_web_server, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();
    init_tracing(cli.log_filter());

    run_web_server(&cli).await
}
