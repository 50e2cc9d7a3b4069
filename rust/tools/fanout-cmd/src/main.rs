use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod utils;

use commands::KindArg;

#[derive(Parser)]
#[command(name = "fanout-cmd")]
#[command(about = "Runs a program over a batch of inputs with bounded parallelism")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v for debug, -vv for trace); RUST_LOG overrides
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program once per input entry
    Run(commands::run::RunArgs),

    /// List the entries of a directory
    List {
        /// Directory to list
        dir: PathBuf,

        /// Name filter with `*` and `?` wildcards
        #[arg(long)]
        filter: Option<String>,

        /// Kind of entries to list
        #[arg(long, value_enum, default_value_t = KindArg::Files)]
        kind: KindArg,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    utils::init_logging(cli.verbose);

    match cli.command {
        Commands::Run(args) => commands::run::run(args),
        Commands::List { dir, filter, kind } => commands::list::run(dir, filter, kind),
    }
}
