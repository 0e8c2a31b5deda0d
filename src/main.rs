// Copyright (c) 2024-2025 Jesse Morgan
// Licensed under the MIT License. See LICENSE file for details.

use std::fs;
use std::io::{self, BufRead, IsTerminal};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;

use wslsetup::continuation::{AutostartHook, ContinuationCoordinator, DescriptorStore, RunOnceHook, StoredDescriptor};
use wslsetup::detect;
use wslsetup::environment::wslconfig;
use wslsetup::{
    init_logging, DataLayout, InstallError, InstallMode, InstallerConfig, MemorySize, Orchestrator, Reporter,
    RestartOutcome, RunOptions, RunOutcome, SessionParameters, SystemRunner,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit codes following sysexits.h conventions, plus the Windows
/// "restart required" code that installers report as success.
mod exit_codes {
    /// Success - installation completed
    pub const SUCCESS: i32 = 0;
    /// General error - unspecified error
    pub const ERROR: i32 = 1;
    /// Usage error - invalid command line arguments
    pub const USAGE: i32 = 64;
    /// Service unavailable - WSL or a host tool is not usable
    pub const SERVICE_UNAVAILABLE: i32 = 69;
    /// I/O error - local file or continuation storage failed
    pub const IO_ERR: i32 = 74;
    /// Configuration error - invalid config.json
    pub const CONFIG: i32 = 78;
    /// ERROR_SUCCESS_REBOOT_REQUIRED
    pub const REBOOT_REQUIRED: i32 = 3010;
}

use exit_codes::*;

/// wslsetup - GPU-aware WSL installer.
#[derive(Parser)]
#[command(name = "wslsetup")]
#[command(version = VERSION)]
#[command(about = "Installs edge-engine into a GPU-ready WSL environment.")]
#[command(long_about = "wslsetup - GPU-aware WSL installer\n\n\
    Install:             wslsetup install --email you@example.com --license-key KEY\n\
    Finish by hand:      wslsetup resume\n\
    Check status:        wslsetup status\n\
    Show GPU profile:    wslsetup detect\n\n\
    A Windows restart is required once; installation resumes automatically at the next sign-in.")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging to the installation log
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Install into a new or existing WSL environment
    ///
    /// Examples:
    ///   wslsetup install --email ops@example.com --license-key ABCD-1234
    ///   wslsetup install --email ops@example.com --license-key ABCD-1234 --memory 16GB --mode developer
    Install(InstallArgs),

    /// Finish a pending installation without restarting
    Resume,

    /// Show whether an installation is waiting for a restart
    #[command(alias = "s")]
    Status,

    /// Show detected display adapters and the hardware profile
    Detect,
}

#[derive(Args)]
struct InstallArgs {
    /// Memory available to WSL (e.g. 8GB, 16GB)
    #[arg(long, default_value = "8GB")]
    memory: MemorySize,

    /// Operator email registered with the package
    #[arg(long)]
    email: String,

    /// Product license key
    #[arg(long)]
    license_key: String,

    /// Allow anonymous usage reporting
    #[arg(long)]
    usage_reporting: bool,

    /// Installation mode: minimal, full or developer
    #[arg(long, default_value = "full")]
    mode: InstallMode,

    /// WSL distribution name (defaults to the configured name)
    #[arg(long)]
    distro: Option<String>,

    /// Never prompt; restart after the countdown
    #[arg(long)]
    non_interactive: bool,

    /// Arm the post-restart step but do not restart (exit code 3010)
    #[arg(long)]
    defer_restart: bool,
}

fn main() {
    let cli = Cli::parse();
    let layout = DataLayout::from_env();

    let logs = init_logging(&layout, cli.debug);
    if logs.is_empty() {
        eprintln!("{} No log file could be opened; continuing with console output only.", "[!]".yellow());
    }

    let wait_on_failure = matches!(&cli.command, Commands::Install(a) if !a.non_interactive);
    let code = match run(cli, &layout) {
        Ok(code) => code,
        Err(e) => {
            let code = report_failure(&e);
            for path in &logs {
                eprintln!("    Log: {}", path.display());
            }
            if wait_on_failure {
                wait_for_enter();
            }
            code
        }
    };
    tracing::info!(exit_code = code, "wslsetup exiting");
    std::process::exit(code);
}

fn run(cli: Cli, layout: &DataLayout) -> Result<i32> {
    let config = InstallerConfig::load(layout)?;
    match cli.command {
        Commands::Install(args) => install(args, cli.debug, &config, layout),
        Commands::Resume => resume(&config, layout),
        Commands::Status => status(&config, layout),
        Commands::Detect => detect_hardware(),
    }
}

fn options(interactive: bool, defer_restart: bool) -> Result<RunOptions> {
    let resume_program = std::env::current_exe().context("Failed to locate the wslsetup executable")?;
    Ok(RunOptions {
        interactive,
        defer_restart,
        resume_program,
        wslconfig_path: Some(wslconfig::default_path()),
    })
}

fn print_banner() {
    println!("{} {}", "wslsetup".cyan().bold(), VERSION.dimmed());
}

fn install(args: InstallArgs, debug: bool, config: &InstallerConfig, layout: &DataLayout) -> Result<i32> {
    let params = SessionParameters {
        memory: args.memory,
        email: args.email,
        license_key: args.license_key,
        usage_reporting: args.usage_reporting,
        mode: args.mode,
        environment_name: args.distro.unwrap_or_else(|| config.environment_name.clone()),
        debug,
    };
    tracing::info!(
        memory = %params.memory,
        mode = %params.mode,
        environment = %params.environment_name,
        license_key = %wslsetup::mask_sensitive(&params.license_key, 4),
        "install requested"
    );

    print_banner();
    let runner = SystemRunner;
    let hook = RunOnceHook::new(&runner);
    let reporter = Reporter::new();
    let orchestrator = Orchestrator::new(
        &runner,
        &hook,
        config,
        layout,
        &reporter,
        options(!args.non_interactive, args.defer_restart)?,
    );

    let outcome = orchestrator.run(&params)?;
    Ok(finish(outcome, layout))
}

fn resume(config: &InstallerConfig, layout: &DataLayout) -> Result<i32> {
    print_banner();
    let runner = SystemRunner;
    let hook = RunOnceHook::new(&runner);
    let reporter = Reporter::new();
    let orchestrator = Orchestrator::new(&runner, &hook, config, layout, &reporter, options(false, false)?);

    match orchestrator.resume()? {
        Some(outcome) => Ok(finish(outcome, layout)),
        None => {
            println!("{} Nothing to resume: no installation is waiting for a restart.", "[OK]".green());
            Ok(SUCCESS)
        }
    }
}

/// Print the final message for an outcome and pick the exit code.
fn finish(outcome: RunOutcome, layout: &DataLayout) -> i32 {
    match outcome {
        RunOutcome::Completed { service_ready } => {
            println!();
            println!("{} Installation complete.", "[OK]".green().bold());
            if !service_ready {
                println!(
                    "{} The service has not reported ready yet. It may still be starting; check `wslsetup status` in a minute.",
                    "[!]".yellow()
                );
            }
            SUCCESS
        }
        RunOutcome::RestartPending { restart, .. } => {
            let marker = DescriptorStore::new(layout.continuation_dir()).marker_path();
            match restart {
                RestartOutcome::Issued => println!("{} Restarting Windows...", "[OK]".green()),
                RestartOutcome::Deferred => println!(
                    "{} Restart deferred. Restart Windows to finish the installation.",
                    "[!]".yellow()
                ),
                RestartOutcome::Cancelled => {
                    println!(
                        "{} Installation will finish after your next restart and sign-in.",
                        "[!]".yellow()
                    );
                    println!("    To finish now without restarting: wslsetup resume");
                }
                RestartOutcome::Failed(reason) => {
                    eprintln!("{}", InstallError::Restart(reason).report().yellow());
                    if let Ok(text) = fs::read_to_string(&marker) {
                        println!();
                        println!("{}", text.trim_end());
                    }
                }
            }
            REBOOT_REQUIRED
        }
    }
}

fn status(config: &InstallerConfig, layout: &DataLayout) -> Result<i32> {
    let runner = SystemRunner;
    let hook = RunOnceHook::new(&runner);
    let coordinator = ContinuationCoordinator::new(DescriptorStore::new(layout.continuation_dir()), &hook);

    print_banner();
    println!();
    println!("  Data directory:  {}", layout.root().display());
    println!("  Environment:     {}", config.environment_name);
    match coordinator.pending()? {
        StoredDescriptor::Absent => println!("  Pending restart: {}", "no".green()),
        StoredDescriptor::Valid(descriptor) => {
            println!(
                "  Pending restart: {} (armed {})",
                "yes".yellow(),
                descriptor.created_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M")
            );
            println!("  Environment:     {}", descriptor.params.environment_name);
            println!("  Resume command:  {}", descriptor.resume_command.to_command_line());
        }
        StoredDescriptor::Corrupt(reason) => println!(
            "  Pending restart: {} ({}; it will be discarded on the next run)",
            "corrupt".red(),
            reason
        ),
    }
    let registered = hook.is_registered().unwrap_or(false);
    println!("  Logon hook:      {}", if registered { "registered" } else { "not registered" });
    for path in wslsetup::report::log_sinks(layout) {
        if path.exists() {
            println!("  Log:             {}", path.display());
        }
    }
    Ok(SUCCESS)
}

fn detect_hardware() -> Result<i32> {
    let runner = SystemRunner;
    let detection = detect::detect_profile(&runner);
    if detection.adapters.is_empty() {
        println!("{} No display adapters reported.", "[!]".yellow());
    }
    for adapter in &detection.adapters {
        println!("  Adapter: {}", adapter);
    }
    let procedure = detection.profile.setup_procedure();
    println!(
        "{} Profile: {} ({}), setup script {}",
        "[OK]".green(),
        detection.profile,
        detection.profile.class_id(),
        procedure.file_name
    );
    Ok(SUCCESS)
}

fn exit_code_for(err: &InstallError) -> i32 {
    match err {
        InstallError::InvalidParameter(_) => USAGE,
        InstallError::Config(_) => CONFIG,
        InstallError::Io { .. } | InstallError::Continuation(_) => IO_ERR,
        InstallError::Unreachable { .. } | InstallError::WslUnavailable { .. } | InstallError::Spawn { .. } => {
            SERVICE_UNAVAILABLE
        }
        _ => ERROR,
    }
}

fn report_failure(err: &anyhow::Error) -> i32 {
    tracing::error!(error = %format!("{:#}", err), "installation failed");
    match err.downcast_ref::<InstallError>() {
        Some(install_error) => {
            eprintln!();
            eprintln!("{}", install_error.report().red());
            exit_code_for(install_error)
        }
        None => {
            eprintln!("{} {:#}", "[✗]".red(), err);
            ERROR
        }
    }
}

/// Keep a double-clicked installer window open long enough to read the error.
fn wait_for_enter() {
    if !io::stdin().is_terminal() {
        return;
    }
    eprintln!();
    eprintln!("{}", "Press Enter to close...".dimmed());
    let mut line = String::new();
    let _ = io::stdin().lock().read_line(&mut line);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_resume_command_line() {
        let cli = Cli::try_parse_from([
            "wslsetup",
            "install",
            "--memory",
            "16GB",
            "--email",
            "a@b.com",
            "--license-key",
            "KEY",
            "--mode",
            "developer",
            "--distro",
            "edge",
            "--usage-reporting",
            "--debug",
        ])
        .unwrap();
        assert!(cli.debug);
        match cli.command {
            Commands::Install(args) => {
                assert_eq!(args.memory.gigabytes(), 16);
                assert_eq!(args.mode, InstallMode::Developer);
                assert_eq!(args.distro.as_deref(), Some("edge"));
                assert!(args.usage_reporting);
            }
            _ => panic!("expected install"),
        }
    }

    #[test]
    fn test_session_args_round_trip_through_cli() {
        let params = SessionParameters {
            memory: MemorySize::from_gb(12).unwrap(),
            email: "ops@example.com".to_string(),
            license_key: "KEY 1".to_string(),
            usage_reporting: false,
            mode: InstallMode::Minimal,
            environment_name: "edge".to_string(),
            debug: false,
        };
        let mut argv = vec!["wslsetup".to_string()];
        argv.extend(params.to_args());
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Commands::Install(args) => {
                assert_eq!(args.memory, params.memory);
                assert_eq!(args.license_key, "KEY 1");
                assert!(!args.usage_reporting);
            }
            _ => panic!("expected install"),
        }
    }

    #[test]
    fn test_leading_dash_values_survive_the_resume_command() {
        let original = Cli::try_parse_from([
            "wslsetup",
            "install",
            "--email=-ops@example.com",
            "--license-key=-K9X2",
        ])
        .unwrap();
        let Commands::Install(args) = original.command else {
            panic!("expected install");
        };
        let params = SessionParameters {
            memory: args.memory,
            email: args.email,
            license_key: args.license_key,
            usage_reporting: args.usage_reporting,
            mode: args.mode,
            environment_name: "edge".to_string(),
            debug: false,
        };
        params.validate().unwrap();

        let mut argv = vec!["wslsetup".to_string()];
        argv.extend(params.to_args());
        let resumed = Cli::try_parse_from(argv).unwrap();
        match resumed.command {
            Commands::Install(args) => {
                assert_eq!(args.email, "-ops@example.com");
                assert_eq!(args.license_key, "-K9X2");
            }
            _ => panic!("expected install"),
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code_for(&InstallError::Config("x".into())), CONFIG);
        assert_eq!(exit_code_for(&InstallError::InvalidParameter("x".into())), USAGE);
        assert_eq!(
            exit_code_for(&InstallError::PackageInstall {
                code: 100,
                log_tail: vec![]
            }),
            ERROR
        );
        assert_ne!(ERROR, REBOOT_REQUIRED);
    }
}
