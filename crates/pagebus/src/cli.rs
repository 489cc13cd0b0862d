//! Command-line interface handling for the pagebus host.
//!
//! Arguments override configuration file settings and supply extra events
//! to broadcast once the page is ready.

use clap::{Arg, ArgAction, ArgMatches, Command};
use serde_json::Value;
use std::path::PathBuf;

/// Command line arguments parsed from user input.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for the page data file
    pub data_file: Option<PathBuf>,
    /// Optional override for the page URL
    pub page_url: Option<String>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Events to broadcast after readiness, in command-line order
    pub events: Vec<(String, Value)>,
}

fn command() -> Command {
    Command::new("pagebus")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Page event bus with rule-gated plugins")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("pagebus.toml"),
        )
        .arg(
            Arg::new("data")
                .short('d')
                .long("data")
                .value_name("FILE")
                .help("JSON file with the global page data"),
        )
        .arg(
            Arg::new("url")
                .short('u')
                .long("url")
                .value_name("URL")
                .help("Page URL (its query string may toggle test mode)"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("event")
                .short('e')
                .long("event")
                .value_name("NAME[=JSON]")
                .help("Broadcast an event once ready; may be repeated")
                .action(ArgAction::Append)
                .value_parser(parse_event_arg),
        )
}

/// Parses `NAME` or `NAME=JSON`. A payload that is not valid JSON is sent
/// as a string; a bare name carries a null payload.
pub fn parse_event_arg(raw: &str) -> Result<(String, Value), String> {
    let (name, payload) = match raw.split_once('=') {
        Some((name, payload)) => (
            name.trim(),
            serde_json::from_str(payload).unwrap_or_else(|_| Value::String(payload.to_string())),
        ),
        None => (raw.trim(), Value::Null),
    };

    if name.is_empty() {
        return Err(format!("event '{raw}' has an empty name"));
    }
    Ok((name.to_string(), payload))
}

impl CliArgs {
    /// Parses the process arguments, exiting with usage on error.
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    /// Parses an explicit argument list.
    #[cfg(test)]
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Ok(Self::from_matches(&command().try_get_matches_from(args)?))
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("pagebus.toml")),
            data_file: matches.get_one::<String>("data").map(PathBuf::from),
            page_url: matches.get_one::<String>("url").cloned(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            events: matches
                .get_many::<(String, Value)>("event")
                .map(|events| events.cloned().collect())
                .unwrap_or_default(),
        }
    }
}
