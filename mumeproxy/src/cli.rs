use std::path::PathBuf;

use clap::Parser;
use tracing::level_filters::LevelFilter;

use crate::config::{Interface, OutputFormat};

#[derive(Debug, Clone, Parser)]
#[command(author, about, version)]
pub struct Args {
    #[arg(
        long,
        value_name = "PATH",
        help = "Path to a TOML config file. Defaults to mumeproxy.toml in the config directory"
    )]
    pub config: Option<PathBuf>,

    #[arg(long, value_name = "HOST", help = "Local address to listen on")]
    pub local_host: Option<String>,

    #[arg(long, value_name = "PORT", help = "Local port to listen on")]
    pub local_port: Option<u16>,

    #[arg(long, value_name = "HOST", help = "Game server address to connect to")]
    pub remote_host: Option<String>,

    #[arg(long, value_name = "PORT", help = "Game server port to connect to")]
    pub remote_port: Option<u16>,

    #[arg(
        short,
        long,
        value_enum,
        value_name = "FORMAT",
        help = "Client output format"
    )]
    pub format: Option<OutputFormat>,

    #[arg(short, long, value_enum, value_name = "INTERFACE", help = "Interface mode")]
    pub interface: Option<Interface>,

    #[arg(
        long,
        value_name = "BYTES",
        help = "Bytes substituted for IAC-GA at the end of prompts. Defaults to IAC-GA itself"
    )]
    pub prompt_terminator: Option<String>,

    #[arg(long, help = "Suppress prompt reporting from the mapper")]
    pub gag_prompts: bool,

    #[arg(
        long,
        value_name = "TEMPLATE",
        help = "Template used by the mapper when reporting rooms"
    )]
    pub find_format: Option<String>,

    #[arg(long, help = "Connect to the game server without TLS")]
    pub no_ssl: bool,

    #[arg(
        short,
        long,
        value_name = "LEVEL",
        default_value = "INFO",
        help = "Log level filter."
    )]
    pub log_level: LevelFilter,
}
