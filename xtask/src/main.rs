use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Tasks for the project", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the project
    Build,
    /// Run the daemon with extra arguments
    Run {
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },
    /// Run the test suite
    Test,
}

fn cargo(args: &[&str], what: &str) -> Result<()> {
    println!("{}...", what);
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("{} failed", what);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Build => cargo(&["build", "--workspace"], "Building project"),
        Commands::Run { args } => {
            let mut full = vec!["run", "-p", "ds4-daemon", "--"];
            full.extend(args.iter().map(String::as_str));
            cargo(&full, "Running daemon")
        }
        Commands::Test => cargo(&["test", "--workspace"], "Testing"),
    }
}
