use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::sink::stdout::OutputFormat;

#[derive(Parser, Debug, Serialize, Deserialize)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Set the path to the configuration file (e.g., "config.yaml").
    #[arg(short, long, value_name = "FILE", env = "FUCAREDE_CONFIG_PATH")]
    pub config: Option<PathBuf>,

    /// Capture interface; overrides the configuration file.
    #[arg(short, long, value_name = "IFACE", env = "FUCAREDE_INTERFACE")]
    pub interface: Option<String>,

    /// Display filter expression (e.g., 'protocol == "DNS" and port == 53').
    #[arg(short, long, value_name = "EXPR", env = "FUCAREDE_FILTER")]
    pub filter: Option<String>,

    /// Console output format: text, json, or json-compact.
    #[arg(short, long, value_name = "FORMAT", env = "FUCAREDE_OUTPUT")]
    pub output: Option<OutputFormat>,

    /// Set the application's log level (e.g., "debug", "warn").
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        env = "FUCAREDE_LOG_LEVEL",
        default_value = "info"
    )]
    #[serde(with = "level_serde")]
    pub log_level: Level,
}

mod level_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(level.as_str())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse::<Level>().map_err(serde::de::Error::custom)
    }
}
