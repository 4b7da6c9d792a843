use chrono::TimeDelta;
use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Parley presence and fanout server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "parley-server", version, about = "Parley presence and fanout server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "PARLEY_PORT", default_value = "1990")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "PARLEY_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./parley.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "PARLEY_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for the SQLite database
    #[arg(long, env = "PARLEY_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Presence tuning (loaded from [presence] section in TOML). Not
    /// serialized, so the CLI layer never masks the file and env layers.
    #[arg(skip)]
    #[serde(default, skip_serializing)]
    pub presence: PresenceConfig,
}

/// Heartbeat, sweep and outbound queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// A connection with no heartbeat for this long is swept (default: 60)
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,

    /// Seconds between liveness sweeps (default: 30)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Seconds a socket may stay open without sending `auth` (default: 10)
    #[serde(default = "default_auth_timeout")]
    pub auth_timeout_secs: u64,

    /// Frames buffered per connection before sends are dropped (default: 256)
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: 60,
            sweep_interval_secs: 30,
            auth_timeout_secs: 10,
            outbound_buffer: 256,
        }
    }
}

/// Upper bound for every `*_secs` presence setting.
const MAX_PRESENCE_SECS: u64 = 86_400;

impl PresenceConfig {
    pub fn heartbeat_timeout(&self) -> TimeDelta {
        i64::try_from(self.heartbeat_timeout_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn auth_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.auth_timeout_secs)
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        for (key, value) in [
            ("heartbeat_timeout_secs", self.heartbeat_timeout_secs),
            ("sweep_interval_secs", self.sweep_interval_secs),
            ("auth_timeout_secs", self.auth_timeout_secs),
        ] {
            if value == 0 || value > MAX_PRESENCE_SECS {
                return Err(format!(
                    "presence.{key} must be between 1 and {MAX_PRESENCE_SECS}, got {value}"
                ));
            }
        }
        if self.outbound_buffer == 0 {
            return Err("presence.outbound_buffer must be at least 1".to_string());
        }
        Ok(())
    }
}

fn default_heartbeat_timeout() -> u64 {
    60
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_auth_timeout() -> u64 {
    10
}

fn default_outbound_buffer() -> usize {
    256
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 1990,
            bind_address: "0.0.0.0".to_string(),
            config: "./parley.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            presence: PresenceConfig::default(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (PARLEY_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("PARLEY_").split("__"))
            .merge(Serialized::defaults(cli))
            .extract()?;

        config.presence.validate().map_err(figment::Error::from)?;
        Ok(config)
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Parley Presence Server Configuration
# Place this file at ./parley.toml or specify with --config <path>
# All settings can be overridden via environment variables (PARLEY_PORT,
# PARLEY_PRESENCE__HEARTBEAT_TIMEOUT_SECS, etc.) or CLI flags (--port, etc.)

# Server port (default: 1990)
# port = 1990

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database
# data_dir = "./data"

# ---- Presence ----
# [presence]

# Connections with no heartbeat for this many seconds are dropped (default: 60)
# heartbeat_timeout_secs = 60

# Seconds between liveness sweeps (default: 30)
# sweep_interval_secs = 30

# Seconds a new socket may wait before sending its auth message (default: 10)
# auth_timeout_secs = 10

# Outbound frames buffered per connection; further frames are dropped (default: 256)
# outbound_buffer = 256
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_presence_section_overrides_defaults() {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string(
                "port = 2000\n[presence]\nheartbeat_timeout_secs = 90\n",
            ))
            .extract()
            .unwrap();

        assert_eq!(config.port, 2000);
        assert_eq!(config.presence.heartbeat_timeout_secs, 90);
        assert_eq!(config.presence.sweep_interval_secs, 30);
    }

    #[test]
    fn out_of_range_presence_values_are_rejected() {
        assert!(PresenceConfig::default().validate().is_ok());

        let huge = PresenceConfig {
            heartbeat_timeout_secs: u64::MAX,
            ..PresenceConfig::default()
        };
        let err = huge.validate().unwrap_err();
        assert!(err.contains("heartbeat_timeout_secs"));

        let zero_sweep = PresenceConfig {
            sweep_interval_secs: 0,
            ..PresenceConfig::default()
        };
        assert!(zero_sweep.validate().is_err());

        let no_buffer = PresenceConfig {
            outbound_buffer: 0,
            ..PresenceConfig::default()
        };
        assert!(no_buffer.validate().is_err());
    }

    #[test]
    fn heartbeat_timeout_conversion_saturates() {
        let huge = PresenceConfig {
            heartbeat_timeout_secs: u64::MAX,
            ..PresenceConfig::default()
        };
        assert_eq!(huge.heartbeat_timeout(), TimeDelta::MAX);
        assert_eq!(
            PresenceConfig::default().heartbeat_timeout(),
            TimeDelta::seconds(60)
        );
    }

    #[test]
    fn template_mentions_every_presence_key() {
        let template = generate_config_template();
        for key in [
            "heartbeat_timeout_secs",
            "sweep_interval_secs",
            "auth_timeout_secs",
            "outbound_buffer",
        ] {
            assert!(template.contains(key), "missing {key}");
        }
    }
}
