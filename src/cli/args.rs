use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "profilevault", disable_help_flag = true, disable_version_flag = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[arg(long, global = true)]
    pub dry_run: bool,
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, short = 'h')]
    pub help: bool,
    #[arg(long)]
    pub version: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    Scan,
    Backup(BackupArgs),
    Restore(RestoreArgs),
    Manifest {
        #[command(subcommand)]
        command: ManifestCommand,
    },
    #[command(name = "quick-action")]
    QuickAction {
        #[command(subcommand)]
        command: QuickActionCommand,
    },
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct BackupArgs {
    #[arg(long)]
    pub destination: Option<PathBuf>,
    #[arg(long = "user")]
    pub users: Vec<String>,
    #[arg(long = "folder")]
    pub folders: Vec<String>,
    #[arg(long)]
    pub strategy: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct RestoreArgs {
    #[arg(long)]
    pub backup: PathBuf,
    /// `<src>[=<dest>[:<mode>]]`
    #[arg(long = "map")]
    pub maps: Vec<String>,
    #[arg(long)]
    pub conflict: Option<String>,
    #[arg(long)]
    pub strategy: Option<String>,
    #[arg(long)]
    pub verify: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ManifestCommand {
    Show { dir: PathBuf },
}

#[derive(Subcommand, Debug, Clone)]
pub enum QuickActionCommand {
    List,
    Run {
        name: String,
        #[arg(long)]
        backup_location: Option<PathBuf>,
        #[arg(long)]
        elevated: bool,
    },
    #[command(hide = true)]
    Helper {
        name: String,
        #[arg(long)]
        backup_location: PathBuf,
        #[arg(long)]
        result_file: PathBuf,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommand {
    Init {
        #[arg(long)]
        destination: Option<PathBuf>,
        #[arg(long)]
        force: bool,
    },
}
