use anyhow::Result;
use clap::{Parser, Subcommand};

use roadgen::commands;

#[derive(Parser, Debug)]
#[command(name = "roadgen", version, about = "Road network generation between discovered structures")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Road generation, recovery and inspection for one world
    Roads {
        #[command(flatten)]
        common: commands::roads::CommonOpts,
        #[command(subcommand)]
        sub: commands::roads::RoadCommand,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Roads { common, sub } => commands::roads::cmd_roads(common, sub),
    }
}
