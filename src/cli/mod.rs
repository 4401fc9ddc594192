use std::env;
use std::path::PathBuf;

use anyhow::Result;
use clap::error::ErrorKind;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::args::{Cli, Command, ConfigCommand, ManifestCommand, QuickActionCommand};
use crate::cli::commands::{
    backup, config_init, exit_for_error, exit_for_status, manifest, quick_action, restore, scan,
    Context,
};
use crate::config::default_config_path;
use crate::config::load::load_config;
use crate::config::model::RuntimeConfig;
use crate::error::VaultError;
use crate::types::RunMode;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const LICENSE_NAME: &str = "GNU GPL v3 or later";
const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

pub mod args;
pub mod commands;

pub fn run() -> Result<()> {
    let cli = parse_cli();

    let helper = matches!(
        cli.command,
        Some(Command::QuickAction {
            command: QuickActionCommand::Helper { .. }
        })
    );
    if !helper {
        print_banner();
    }
    if cli.help {
        print_help();
        return Ok(());
    }
    if cli.version {
        print_version();
        return Ok(());
    }

    let run_mode = RunMode {
        dry_run: cli.dry_run,
        verbose: cli.verbose,
    };

    let Some(command) = cli.command.clone() else {
        print_help();
        std::process::exit(2);
    };

    if let Command::Config {
        command: ConfigCommand::Init { destination, force },
    } = &command
    {
        init_tracing(None, cli.verbose);
        let path = cli.config.clone().unwrap_or_else(default_config_path);
        if let Err(err) = config_init::run_config_init(&path, destination.as_deref(), *force) {
            exit_for_error(&err);
        }
        return Ok(());
    }

    let cfg = match resolve_config(cli.config.as_ref()) {
        Ok(cfg) => cfg,
        Err(err) => exit_for_error(&err),
    };
    init_tracing(cfg.log_level.as_deref(), cli.verbose);
    let ctx = Context {
        config_path: cli.config.clone(),
        cfg,
        run_mode,
    };

    let status = match command {
        Command::Scan => scan::run_scan(&ctx).map(|_| None),
        Command::Backup(args) => backup::run_backup_command(&ctx, &args).map(Some),
        Command::Restore(args) => restore::run_restore_command(&ctx, &args).map(Some),
        Command::Manifest {
            command: ManifestCommand::Show { dir },
        } => manifest::run_manifest_show(&dir).map(|_| None),
        Command::QuickAction { command } => match command {
            QuickActionCommand::List => {
                quick_action::run_list(&ctx);
                Ok(None)
            }
            QuickActionCommand::Run {
                name,
                backup_location,
                elevated,
            } => quick_action::run_action(&ctx, &name, backup_location.as_deref(), elevated)
                .map(Some),
            QuickActionCommand::Helper {
                name,
                backup_location,
                result_file,
            } => quick_action::run_helper_command(&ctx, &name, &backup_location, &result_file),
        },
        Command::Config { .. } => Ok(None),
    };
    match status {
        Ok(Some(status)) => exit_for_status(status),
        Ok(None) => {}
        Err(err) => exit_for_error(&err),
    }

    Ok(())
}

/// A missing default config means built-in defaults; a missing explicit one
/// is an error.
fn resolve_config(explicit: Option<&PathBuf>) -> std::result::Result<RuntimeConfig, VaultError> {
    match explicit {
        Some(path) => load_config(path.to_string_lossy().as_ref()),
        None => {
            let path = default_config_path();
            if path.exists() {
                load_config(path.to_string_lossy().as_ref())
            } else {
                Ok(RuntimeConfig::default())
            }
        }
    }
}

fn parse_cli() -> Cli {
    let raw: Vec<String> = env::args().collect();
    let args = preprocess_args(raw);
    match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(err) => {
            if err.kind() == ErrorKind::DisplayHelp {
                print_banner();
                print_help();
                std::process::exit(0);
            }
            if err.kind() == ErrorKind::DisplayVersion {
                print_banner();
                print_version();
                std::process::exit(0);
            }
            if err.kind() == ErrorKind::UnknownArgument {
                if let Some(arg) = err.context().find_map(|c| {
                    if let clap::error::ContextKind::InvalidArg = c.0 {
                        Some(c.1.to_string())
                    } else {
                        None
                    }
                }) {
                    println!("unknown option {}", arg);
                    std::process::exit(2);
                }
            }
            println!("{}", err);
            std::process::exit(2);
        }
    }
}

/// Rewrites the helper-process flag form into the `quick-action helper`
/// subcommand.
fn preprocess_args(raw: Vec<String>) -> Vec<String> {
    let mut out = Vec::new();
    let mut iter = raw.into_iter();
    if let Some(bin) = iter.next() {
        out.push(bin);
    }
    for arg in iter {
        if arg == "--run-quick-action" {
            out.push("quick-action".to_string());
            out.push("helper".to_string());
            continue;
        }
        out.push(arg);
    }
    out
}

fn print_banner() {
    println!("ProfileVault {}", VERSION);
}

fn print_version() {
    println!("{}", DESCRIPTION);
    println!("License: {}", LICENSE_NAME);
}

fn print_help() {
    println!("Usage:");
    println!("  profilevault scan");
    println!("  profilevault backup [--destination <dir>] [--user <name>]... [--folder <kind>]... [--strategy <s>]");
    println!("  profilevault restore --backup <dir> [--map <src>[=<dest>[:<mode>]]]... [--conflict <policy>] [--strategy <s>] [--verify]");
    println!("  profilevault manifest show <dir>");
    println!("  profilevault quick-action list");
    println!("  profilevault quick-action run <name> [--backup-location <dir>] [--elevated]");
    println!("  profilevault config init [--destination <dir>] [--force]");
    println!("  profilevault --version");
    println!();
    println!("Options:");
    println!("  --config <path>        Config file path");
    println!("  --dry-run              Plan only; nothing is written");
    println!("  --verbose              Verbose logging and progress");
    println!("  --destination <dir>    Backup destination (backup)");
    println!("  --user <name>          Back up only the named user(s)");
    println!("  --folder <kind>        Back up only the named folder kind(s), e.g. Documents, AppData_Roaming");
    println!("  --strategy <s>         Permission strategy: StripAll, PreserveOriginal, AssignToDestination, Hybrid");
    println!("  --backup <dir>         Backup to restore from");
    println!("  --map <mapping>        Source user, destination user and merge mode (replace, merge, create-new)");
    println!("  --conflict <policy>    SkipDuplicate, RenameWithSuffix, KeepNewer, KeepLarger, AutoRename");
    println!("  --verify               Re-read restored files");
    println!("  --backup-location <d>  Quick-action output root");
    println!("  --elevated             Run the quick action in a helper process");
    println!("  --force                Overwrite an existing config (config init)");
}

fn init_tracing(level: Option<&str>, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level.unwrap_or("info")))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn helper_flag_becomes_subcommand() {
        let out = preprocess_args(argv(&[
            "profilevault",
            "--config",
            "/etc/pv.yaml",
            "--run-quick-action",
            "Sticky Notes Backup",
            "--backup-location",
            "/b",
            "--result-file",
            "/tmp/r.json",
        ]));
        let cli = Cli::try_parse_from(out).expect("parse");
        assert_eq!(cli.config, Some(PathBuf::from("/etc/pv.yaml")));
        match cli.command {
            Some(Command::QuickAction {
                command:
                    QuickActionCommand::Helper {
                        name,
                        backup_location,
                        result_file,
                    },
            }) => {
                assert_eq!(name, "Sticky Notes Backup");
                assert_eq!(backup_location, PathBuf::from("/b"));
                assert_eq!(result_file, PathBuf::from("/tmp/r.json"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn restore_arguments_parse() {
        let cli = Cli::try_parse_from(argv(&[
            "profilevault",
            "restore",
            "--backup",
            "/b",
            "--map",
            "alice=bob:replace",
            "--map",
            "carol",
            "--verify",
            "--dry-run",
        ]))
        .expect("parse");
        assert!(cli.dry_run);
        match cli.command {
            Some(Command::Restore(args)) => {
                assert_eq!(args.maps.len(), 2);
                assert!(args.verify);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("nope.yaml");
        assert!(resolve_config(Some(&missing)).is_err());
    }
}
