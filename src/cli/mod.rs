pub mod args;
pub mod commands;

pub use args::{ConvertArgs, ServeArgs};
use clap::{Parser, Subcommand};

const HELP_TEMPLATE: &str = "\
{name} {version}\n\
{about-with-newline}\n\
USAGE:\n    {usage}\n\
\nOPTIONS:\n{options}\n\
COMMANDS:\n{subcommands}\n";

#[derive(Parser)]
#[command(name = "drone-nix-convert")]
#[command(version = crate::VERSION)]
#[command(about = "Drone conversion extension that expands Nix jobsets into per-job pipelines")]
#[command(help_template = HELP_TEMPLATE)]
#[command(
    after_long_help = "Configuration is read from an optional TOML file and DRONE_* environment variables; environment variables win."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    #[command(
        about = "Run the conversion extension HTTP service",
        long_about = "Serve listens for signed conversion requests from the Drone server and answers with the expanded pipeline configuration.",
        after_help = "Example:\n    DRONE_SECRET=... DRONE_SERVER=https://drone.example.com DRONE_TOKEN=... drone-nix-convert serve --bind :3000"
    )]
    Serve(ServeArgs),
    #[command(
        about = "Convert a single configuration file",
        long_about = "Convert runs the evaluation build for one configuration against the configured Drone server and prints the resulting configuration to stdout.",
        after_help = "Example:\n    drone-nix-convert convert .drone.yml --namespace octocat --name hello-world --ref refs/heads/main"
    )]
    Convert(ConvertArgs),
}

pub async fn run(args: Args) -> crate::Result<()> {
    match args.command {
        Command::Serve(serve_args) => commands::serve(serve_args).await,
        Command::Convert(convert_args) => commands::convert(convert_args).await,
    }
}
