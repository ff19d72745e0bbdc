use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use unbox_core::RetentionPolicy;

use crate::tracing::LogLevel;

#[derive(Parser, Debug)]
#[command(name = "unbox")]
#[command(about = "Download, cache and extract resource bundles into verified local folders")]
#[command(long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(
        short = 'l',
        long,
        global = true,
        help = "Set logging level",
        default_value = "warn",
        value_enum
    )]
    pub level: LogLevel,

    #[arg(long, global = true, help = "Output logs and results in JSON format")]
    pub json: bool,
}

/// Options that feed the layered properties.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsArgs {
    #[arg(long, help = "Properties file (TOML)", value_name = "FILE")]
    pub properties: Option<PathBuf>,

    #[arg(long, help = "Cache directory; downloads live in <DIR>/downloads", value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    #[arg(long, help = "State directory; version folders live in <DIR>/versions", value_name = "DIR")]
    pub state_dir: Option<PathBuf>,

    #[arg(long, help = "Entry point file name expected in every bundle")]
    pub entry_point: Option<String>,

    #[arg(long, help = "Retention policy for downloads (forever, session, none)")]
    pub retention: Option<RetentionPolicy>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Resolve an identifier into a local entry point")]
    Resolve {
        #[arg(help = "URL or path to resolve; defaults to the configured source URL")]
        identifier: Option<String>,

        #[command(flatten)]
        settings: SettingsArgs,
    },
    #[command(about = "Print the content fingerprint of a file")]
    Fingerprint {
        #[arg(help = "File to fingerprint")]
        file: PathBuf,
    },
    #[command(about = "Print the effective settings")]
    Config {
        #[command(flatten)]
        settings: SettingsArgs,
    },
}

pub fn parse() -> Cli {
    Cli::parse()
}
