use std::{path::PathBuf, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{cli, sink::stdout::OutputFormat, stats::scan::ScanConfig};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Interface to capture on.
    pub interface: String,

    /// Display filter source text; compiled once at startup.
    pub filter: Option<String>,

    /// Console output format: text, json, or json-compact.
    pub output: OutputFormat,

    /// Time between interval summaries.
    #[serde(with = "duration_serde")]
    pub summary_interval: Duration,

    /// Capacity of the record queue between ingestion and the sinks.
    pub queue_capacity: usize,

    /// Sliding window for port-scan detection.
    #[serde(with = "duration_serde")]
    pub scan_window: Duration,

    /// Distinct destination ports within the window before a source is
    /// flagged as a suspected scanner.
    pub scan_port_limit: usize,

    /// Where to write the per-source CSV report. No report when unset.
    pub report_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            interface: "lo".to_string(),
            filter: None,
            output: OutputFormat::Text,
            summary_interval: Duration::from_secs(5),
            queue_capacity: 1024,
            scan_window: Duration::from_secs(60),
            scan_port_limit: 10,
            report_path: None,
        }
    }
}

impl Config {
    /// Layered load: built-in defaults, then the YAML file (when given),
    /// then `FUCAREDE_*` environment variables, then CLI flags on top.
    pub fn new(cli: &cli::Cli) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));

        if let Some(config_path) = &cli.config {
            if !config_path.exists() {
                return Err(ConfigError::MissingFile(config_path.clone()));
            }
            figment = figment.merge(Yaml::file(config_path));
        }

        figment = figment.merge(Env::prefixed("FUCAREDE_"));

        let mut config: Config = figment.extract()?;
        if let Some(interface) = &cli.interface {
            config.interface = interface.clone();
        }
        if let Some(filter) = &cli.filter {
            config.filter = Some(filter.clone());
        }
        if let Some(output) = cli.output {
            config.output = output;
        }
        Ok(config)
    }

    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            window: self.scan_window,
            port_limit: self.scan_port_limit,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    MissingFile(PathBuf),
    #[error("configuration error: {0}")]
    Extraction(#[from] figment::Error),
}

mod duration_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
