use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "layercake",
    about = "Resolve keys against a stack of config files and environment bindings"
)]
pub struct Cli {
    /// Config file (json, toml, yaml, ini or properties). Repeat to stack; the
    /// first is on top.
    #[arg(long = "file", short = 'f')]
    pub files: Vec<PathBuf>,

    /// Bind a key to an environment variable, as KEY=VAR. Bindings sit above
    /// every file.
    #[arg(long = "env", short = 'e', value_name = "KEY=VAR")]
    pub env: Vec<String>,

    /// Engine options as TOML.
    #[arg(long)]
    pub options: Option<PathBuf>,

    /// Value printed when a key is absent (parsed as JSON when possible).
    #[arg(long)]
    pub default: Option<String>,

    /// Print a JSON object of key to value.
    #[arg(long)]
    pub json: bool,

    #[arg(long)]
    pub timeout_ms: Option<u64>,

    #[arg(long, env = "LAYERCAKE_LOG", default_value = "warn")]
    pub log_level: String,

    /// Dotted keys to resolve.
    #[arg(required = true)]
    pub keys: Vec<String>,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Splits `KEY=VAR`.
pub fn parse_env_binding(raw: &str) -> Option<(&str, &str)> {
    let (key, var) = raw.split_once('=')?;
    let (key, var) = (key.trim(), var.trim());
    if key.is_empty() || var.is_empty() {
        return None;
    }
    Some((key, var))
}
