pub mod config_cmd;
pub mod query;

use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "folio")]
#[command(version, about = "Cached CMS query gateway")]
pub struct Cli {
    /// Path to folio.toml
    #[arg(long, global = true, env = "FOLIO_CONFIG", default_value = "folio.toml")]
    pub config: PathBuf,

    /// HTTP listen address (overrides config file)
    #[arg(long, global = true, env = "FOLIO_HTTP_ADDR")]
    pub http_addr: Option<SocketAddr>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP server
    Serve,
    /// Run one query against the CMS and print the result
    Query(QueryArgs),
    /// Configuration commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    Validate,
    Show,
}

#[derive(Args, Debug)]
pub struct QueryArgs {
    /// Query text, e.g. "*[_type=='article'][0...10]"
    pub query: String,

    /// Query parameter as name=value; value is parsed as JSON, else taken as a string
    #[arg(long = "param", short = 'p', value_parser = parse_param)]
    pub params: Vec<(String, Value)>,

    /// Output format: pretty | json
    #[arg(long, default_value = "pretty")]
    pub format: String,
}

/// Parse `name=value`. `limit=5` gives a number, `slug=le-debat` a string,
/// `slug="5"` the string "5".
pub fn parse_param(s: &str) -> Result<(String, Value), String> {
    let (name, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got {:?}", s))?;

    let name = name.trim().trim_start_matches('$');
    if name.is_empty() {
        return Err(format!("missing parameter name in {:?}", s));
    }

    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((name.to_string(), value))
}
