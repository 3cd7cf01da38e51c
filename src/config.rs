use std::fs;
use std::path::Path;

use clap::Parser;
use serde::Deserialize;

#[derive(Deserialize, Debug, PartialEq)]
pub struct DetectorConfig {
    #[serde(default = "default_max_num_packets")]
    pub max_num_packets: Option<u64>,
    #[serde(default = "default_cutoffs")]
    pub cutoffs: Vec<usize>,
}

fn default_max_num_packets() -> Option<u64> {
    None
}

fn default_cutoffs() -> Vec<usize> {
    vec![0, 2]
}

impl Default for DetectorConfig {
    fn default() -> Self {
        DetectorConfig {
            max_num_packets: default_max_num_packets(),
            cutoffs: default_cutoffs(),
        }
    }
}

#[derive(Debug, Parser)]
#[command(author, version, about = "Detects TCP traffic policing in a packet capture", long_about = None)]
pub struct CliArgs {
    /// Path to the packet capture file to analyze.
    pub capture_path: String,

    /// Optional TOML config file overriding the built-in defaults.
    #[arg(short, long)]
    pub config: Option<String>,

    /// Stop after this many successfully-dispatched packets.
    #[arg(long)]
    pub max_packets: Option<u64>,

    /// Loss-window cutoff to evaluate; may be given multiple times.
    /// Defaults to `[0, 2]` when not given.
    #[arg(long = "cutoff")]
    pub cutoffs: Vec<usize>,

    /// Write output rows to this file instead of stdout.
    #[arg(short, long)]
    pub output: Option<String>,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Loads the detector configuration, applying CLI overrides over an
/// optional TOML file over the built-in defaults.
pub fn load_config(cli_args: &CliArgs) -> anyhow::Result<DetectorConfig> {
    let mut config = DetectorConfig::default();

    if let Some(path) = &cli_args.config {
        if Path::new(path).exists() {
            let contents = fs::read_to_string(path)?;
            config = toml::from_str(&contents)?;
        } else {
            log::warn!("config file {path} does not exist, using defaults");
        }
    }

    if let Some(max_packets) = cli_args.max_packets {
        config.max_num_packets = Some(max_packets);
    }

    if !cli_args.cutoffs.is_empty() {
        config.cutoffs = cli_args.cutoffs.clone();
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_cutoffs() {
        let config = DetectorConfig::default();
        assert_eq!(config.max_num_packets, None);
        assert_eq!(config.cutoffs, vec![0, 2]);
    }

    #[test]
    fn cli_cutoff_overrides_default() {
        let cli_args = CliArgs {
            capture_path: "trace.pcap".to_string(),
            config: None,
            max_packets: Some(1000),
            cutoffs: vec![1, 3, 5],
            output: None,
            verbose: 0,
        };
        let config = load_config(&cli_args).unwrap();
        assert_eq!(config.max_num_packets, Some(1000));
        assert_eq!(config.cutoffs, vec![1, 3, 5]);
    }

    #[test]
    fn missing_capture_path_is_rejected() {
        let result = CliArgs::try_parse_from(["policing_detect"]);
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::MissingRequiredArgument
        );
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let cli_args = CliArgs {
            capture_path: "trace.pcap".to_string(),
            config: Some("/nonexistent/config.toml".to_string()),
            max_packets: None,
            cutoffs: Vec::new(),
            output: None,
            verbose: 0,
        };
        let config = load_config(&cli_args).unwrap();
        assert_eq!(config, DetectorConfig::default());
    }
}
