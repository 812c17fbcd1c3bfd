use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use tracing::{debug, info};
use xbdump_core::{
    DumpError, DumpOutcome, DumpRequest, EXIT_CANCELED, Settings, SysfsBackend, TracingObserver,
    dispatch,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Accelerator card state dump tool", long_about = None)]
struct Cli {
    /// Path to a TOML settings file
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// When possible, force an operation (e.g. overwrite existing output files)
    #[arg(long, global = true)]
    force: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Dump out the contents of the specified option
    #[command(disable_help_flag = true)]
    Dump(DumpArgs),
}

#[derive(Args, Debug)]
struct DumpArgs {
    /// The Bus:Device.Function (e.g., 0000:d8:00.0) device of interest
    #[arg(short, long)]
    device: Option<String>,

    /// Dumps the system configuration, requires a .ini output file by -o option
    #[arg(short, long)]
    config: bool,

    /// Dumps the programmed system image, requires a .bin output file by -o option
    #[arg(short, long)]
    flash: bool,

    /// Direct the output to the given file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Help to use this sub-command
    #[arg(long)]
    help: bool,
}

impl DumpArgs {
    fn to_request(&self, force: bool) -> DumpRequest {
        DumpRequest {
            device: self.device.clone(),
            output: self.output.clone().unwrap_or_default(),
            flash: self.flash,
            config: self.config,
            force,
            help: self.help,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if cli.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("WARNING: logging is already initialized");
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ERROR: {:#}\n", e);
            if e.downcast_ref::<DumpError>().is_some_and(DumpError::wants_help) {
                print_dump_help();
            }
            ExitCode::from(EXIT_CANCELED as u8)
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let settings = match &cli.settings {
        Some(path) => Settings::load_from_file(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => Settings::default(),
    };
    debug!(?settings, "Settings");

    match &cli.command {
        Commands::Dump(args) => {
            debug!("SubCommand: dump");
            let request = args.to_request(cli.force || settings.force);
            let backend = SysfsBackend::from_settings(&settings);

            match dispatch(&backend, &request, &TracingObserver)? {
                DumpOutcome::HelpRequested => print_dump_help(),
                DumpOutcome::Config { path, keys } => {
                    info!(keys, "Config dump finished");
                    println!("config has been dumped to {}", path.display());
                }
                DumpOutcome::Flash { path, bytes } => {
                    println!(
                        "flash image ({} bytes) has been dumped to {}",
                        bytes,
                        path.display()
                    );
                }
            }
        }
    }
    Ok(())
}

fn print_dump_help() {
    let mut cmd = Cli::command();
    cmd.build();
    if let Some(dump) = cmd.find_subcommand_mut("dump") {
        let _ = dump.print_help();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_dump_args() {
        let cli = Cli::try_parse_from([
            "xbdump", "dump", "-d", "d8:00.0", "--config", "-o", "out.ini", "--force",
        ])
        .unwrap();
        let Commands::Dump(args) = &cli.command;
        let request = args.to_request(cli.force);

        assert_eq!(request.device.as_deref(), Some("d8:00.0"));
        assert_eq!(request.output, PathBuf::from("out.ini"));
        assert!(request.config && !request.flash && request.force && !request.help);
    }

    #[test]
    fn test_dump_help_is_a_flag() {
        let cli = Cli::try_parse_from(["xbdump", "dump", "--help"]).unwrap();
        let Commands::Dump(args) = &cli.command;
        assert!(args.to_request(false).help);
    }

    #[test]
    fn test_missing_output_becomes_empty_path() {
        let cli = Cli::try_parse_from(["xbdump", "dump", "--flash"]).unwrap();
        let Commands::Dump(args) = &cli.command;
        assert_eq!(args.to_request(false).output, PathBuf::new());
    }

    #[test]
    fn test_failed_run_leaves_existing_output() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("config.ini");
        std::fs::write(&out, "old").unwrap();
        let settings = tmp.path().join("xbdump.toml");
        Settings {
            sysfs_root: tmp.path().join("sys"),
            dev_root: tmp.path().join("dev"),
            ..Default::default()
        }
        .save_to_file(&settings)
        .unwrap();

        let argv: Vec<OsString> = vec![
            "xbdump".into(),
            "--settings".into(),
            settings.into_os_string(),
            "dump".into(),
            "--config".into(),
            "-o".into(),
            out.clone().into_os_string(),
        ];
        let cli = Cli::try_parse_from(argv).unwrap();

        // No devices in the fake tree, so this fails before the guard runs.
        let err = run(&cli).unwrap_err();
        assert!(err.downcast_ref::<DumpError>().is_some_and(DumpError::is_usage));
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "old");
    }

    #[test]
    fn test_config_dump_from_fake_sysfs() {
        let tmp = tempfile::tempdir().unwrap();
        let dev = tmp.path().join("sys/bus/pci/devices/0000:d8:00.0");
        std::fs::create_dir_all(&dev).unwrap();
        for (name, value) in [
            ("vendor", "0x10ee"),
            ("config_mailbox_channel_disable", "0x20"),
            ("config_mailbox_channel_switch", "0"),
            ("config_xclbin_change", "1"),
            ("cache_xclbin", "0"),
            ("xmc_scaling_enabled", "1"),
            ("xmc_scaling_power_override", "0"),
            ("xmc_scaling_temp_override", "85"),
        ] {
            std::fs::write(dev.join(name), format!("{}\n", value)).unwrap();
        }
        let settings = tmp.path().join("xbdump.toml");
        Settings {
            sysfs_root: tmp.path().join("sys"),
            dev_root: tmp.path().join("dev"),
            ..Default::default()
        }
        .save_to_file(&settings)
        .unwrap();
        let out = tmp.path().join("config.ini");

        let argv: Vec<OsString> = vec![
            "xbdump".into(),
            "--settings".into(),
            settings.into_os_string(),
            "dump".into(),
            "-c".into(),
            "-d".into(),
            "d8:00.0".into(),
            "-o".into(),
            out.clone().into_os_string(),
        ];
        run(&Cli::try_parse_from(argv).unwrap()).unwrap();

        let text = std::fs::read_to_string(&out).unwrap();
        assert!(text.starts_with("[Device]\n"));
        assert!(text.contains("mailbox_channel_disable = 32\n"));
        assert!(text.contains("scaling_temp_override = 85\n"));
        assert_eq!(text.lines().count(), 8);
    }
}
