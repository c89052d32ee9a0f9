mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use binforge_lib::consts::RECIPE_FILE;

use crate::output::{OutputFormat, print_error};

/// binforge - cross-compile a package for many platforms and publish the binaries
#[derive(Parser)]
#[command(name = "binforge")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging and stream build output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Output format for command results
  #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build a recipe for its platforms, optionally deploying the result
  Build(cmd::BuildArgs),

  /// Fetch and verify a recipe's sources into the cache
  Resolve {
    /// Path to the recipe
    #[arg(default_value = RECIPE_FILE)]
    recipe: PathBuf,
  },

  /// Show the version the next deploy of a recipe would receive
  Version {
    /// Path to the recipe
    #[arg(default_value = RECIPE_FILE)]
    recipe: PathBuf,

    /// Local checkout of the package registry
    #[arg(long)]
    registry_dir: PathBuf,
  },

  /// List the supported platform triplets
  Platforms,
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "info" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let result = match cli.command {
    Commands::Build(args) => cmd::cmd_build(args, cli.verbose, cli.output),
    Commands::Resolve { recipe } => cmd::cmd_resolve(&recipe, cli.output),
    Commands::Version { recipe, registry_dir } => cmd::cmd_version(&recipe, &registry_dir, cli.output),
    Commands::Platforms => cmd::cmd_platforms(cli.output),
  };

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      print_error(&format!("{:#}", e));
      ExitCode::FAILURE
    }
  }
}
