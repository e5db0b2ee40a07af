use clap::Parser;
use drone_nix_convert::cli::{self, Args};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    cli::run(args).await
}
