//! Process configuration
//!
//! Sources, highest priority first:
//! 1. Command line overrides (`--host`, `--port`)
//! 2. Environment variables (`RADIO_SERVER__PORT=9000`, `RADIO_SFU__ICE_SERVERS=...`)
//! 3. Config file (`--config` / `RADIO_CONFIG_PATH`, then `./config.yaml`)
//! 4. Defaults

use clap::Parser;
use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use radio_sfu::SfuConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Parser, Debug, Default)]
#[command(name = "radio")]
#[command(about = "WebRTC audio/video relay", long_about = None)]
pub struct Args {
    /// Path to a YAML or TOML config file
    #[arg(long, env = "RADIO_CONFIG_PATH")]
    pub config: Option<String>,

    /// HTTP listen host (overrides the config file)
    #[arg(long)]
    pub host: Option<String>,

    /// HTTP listen port (overrides the config file)
    #[arg(long)]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub sfu: SfuConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub file_path: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file_path: None,
        }
    }
}

impl Config {
    /// Load from an optional file, then environment variables
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("RADIO")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("sfu.ice_servers")
                .with_list_parse_key("sfu.public_ips")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Resolve the config file path, load it and apply command line overrides
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        let path = args.config.clone().or_else(|| {
            let cwd = "config.yaml";
            Path::new(cwd).exists().then(|| cwd.to_string())
        });

        let mut config = Self::load(path.as_deref())?;
        if let Some(host) = &args.host {
            config.server.host.clone_from(host);
        }
        if let Some(port) = args.port {
            config.server.port = port;
        }
        Ok(config)
    }

    /// Check all sections, returning one message per problem
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.host.is_empty() {
            errors.push("server.host must not be empty".to_string());
        }
        if self.server.port == 0 {
            errors.push("server.port must be greater than 0".to_string());
        }
        if let Err(e) = crate::logging::parse_log_level(&self.logging.level) {
            errors.push(format!("logging.level: {e}"));
        }
        if let Err(sfu_errors) = self.sfu.validate() {
            errors.extend(sfu_errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.http_address(), "0.0.0.0:8080");
    }

    #[test]
    fn validate_collects_every_error() {
        let mut config = Config::default();
        config.server.port = 0;
        config.logging.level = "verbose".to_string();
        config.sfu.signal_queue_capacity = 0;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.contains("server.port")));
        assert!(errors.iter().any(|e| e.contains("logging.level")));
        assert!(errors.iter().any(|e| e.contains("signal_queue_capacity")));
    }

    #[test]
    fn loads_file_and_applies_overrides() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "server:\n  port: 9000\nlogging:\n  format: json\nsfu:\n  ice_servers:\n    - stun:stun.example.org:3478\n  max_participants_per_room: 50"
        )
        .unwrap();

        let args = Args {
            config: Some(file.path().to_string_lossy().into_owned()),
            host: Some("127.0.0.1".to_string()),
            port: None,
        };
        let config = Config::from_args(&args).unwrap();

        assert_eq!(config.http_address(), "127.0.0.1:9000");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.sfu.ice_servers, vec!["stun:stun.example.org:3478"]);
        assert_eq!(config.sfu.max_participants_per_room, 50);
        assert_eq!(config.sfu.ice_gathering_timeout_secs, 10);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::load(Some("/nonexistent/radio.yaml")).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.logging.level, "info");
    }
}
