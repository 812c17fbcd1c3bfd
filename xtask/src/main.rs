use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Tasks for the xbdump workspace", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the workspace
    Build,
    /// Run the xbdump CLI, passing the remaining arguments through
    Run {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Run the test suite
    Test,
}

fn cargo(args: &[&str], what: &str) -> Result<()> {
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("{} failed", what);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Build => {
            println!("Building workspace...");
            cargo(&["build", "--workspace"], "Build")?;
        }
        Commands::Run { args } => {
            println!("Running xbdump...");
            let mut cmd = vec!["run", "-p", "xbdump-cli", "--"];
            cmd.extend(args.iter().map(String::as_str));
            cargo(&cmd, "Run")?;
        }
        Commands::Test => {
            println!("Testing workspace...");
            cargo(&["test", "--workspace"], "Test")?;
        }
    }

    Ok(())
}
