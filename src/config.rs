//! Bridge configuration
//!
//! Loaded once at startup from a TOML document and treated as immutable for
//! the process lifetime. Any malformed or inconsistent configuration is a
//! fatal startup error; nothing network-facing runs before validation passes.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// Top-level bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    pub mqtt: MqttSection,
    #[serde(default)]
    pub hardware: HardwareSection,
    /// Ordered relay bindings; reconciliation processes them in this order
    pub relays: Vec<RelayBinding>,
}

/// MQTT broker section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker hostname or IP address
    pub broker_host: String,
    /// Broker TCP port
    pub broker_port: u16,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    /// Keep-alive interval in seconds (default: 60)
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

fn default_keep_alive_secs() -> u64 {
    60
}

/// Hardware control tool section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HardwareSection {
    /// Command used to query and switch relays
    #[serde(default = "default_tool")]
    pub tool: String,
    /// Upper bound on a single tool invocation, in seconds (default: 10)
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

fn default_tool() -> String {
    "usbrelay".to_string()
}

fn default_command_timeout_secs() -> u64 {
    10
}

impl Default for HardwareSection {
    fn default() -> Self {
        Self {
            tool: default_tool(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

/// One relay-to-topic binding
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelayBinding {
    /// Hardware relay id, e.g. `HURTM_1` (must match `[A-Z]{5}_[0-9]`)
    pub relay: String,
    /// MQTT topic carrying this relay's state and commands
    pub topic: String,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid relay id: {0}")]
    InvalidRelayId(String),
    #[error("Duplicate relay id: {0}")]
    DuplicateRelayId(String),
    #[error("Duplicate topic: {0}")]
    DuplicateTopic(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BridgeConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: BridgeConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate relay bindings: id format, id uniqueness, topic uniqueness.
    ///
    /// Topic collisions are rejected here rather than resolved by dispatcher
    /// overwrite order, which would silently drop a relay.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.relays.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "At least one [[relays]] binding is required".to_string(),
            ));
        }

        let id_pattern = relay_id_pattern();
        let mut seen_ids = HashSet::new();
        let mut seen_topics = HashSet::new();

        for binding in &self.relays {
            if !id_pattern.is_match(&binding.relay) {
                return Err(ConfigError::InvalidRelayId(format!(
                    "Relay id '{}' must match pattern [A-Z]{{5}}_[0-9]",
                    binding.relay
                )));
            }
            if !seen_ids.insert(binding.relay.as_str()) {
                return Err(ConfigError::DuplicateRelayId(binding.relay.clone()));
            }
            if binding.topic.is_empty() {
                return Err(ConfigError::InvalidConfig(format!(
                    "Relay '{}' has an empty topic",
                    binding.relay
                )));
            }
            if !seen_topics.insert(binding.topic.as_str()) {
                return Err(ConfigError::DuplicateTopic(binding.topic.clone()));
            }
        }

        Ok(())
    }

    /// Get MQTT username from the configured environment variable
    pub fn mqtt_username(&self) -> Option<String> {
        get_env_var_optional(self.mqtt.username_env.as_ref())
    }

    /// Get MQTT password from the configured environment variable
    pub fn mqtt_password(&self) -> Option<String> {
        get_env_var_optional(self.mqtt.password_env.as_ref())
    }

    /// Create a two-relay test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[mqtt]
broker_host = "localhost"
broker_port = 1883

[[relays]]
relay = "HURTM_1"
topic = "home/relay/1"

[[relays]]
relay = "HURTM_2"
topic = "home/relay/2"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

/// Relay ids follow the hardware tool's fixed `XXXXX_N` report format
pub fn relay_id_pattern() -> Regex {
    Regex::new(r"^[A-Z]{5}_[0-9]$").expect("relay id pattern is valid")
}

fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
    env_var_name.and_then(|name| std::env::var(name).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[mqtt]
broker_host = "broker.local"
broker_port = 8883
username_env = "MQTT_USERNAME"
password_env = "MQTT_PASSWORD"
keep_alive_secs = 30

[hardware]
tool = "/usr/local/bin/usbrelay"
command_timeout_secs = 5

[[relays]]
relay = "HURTM_1"
topic = "home/office/lamp"

[[relays]]
relay = "HURTM_2"
topic = "home/office/fan"
"#;

        let config: BridgeConfig = toml::from_str(toml_content).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.mqtt.broker_host, "broker.local");
        assert_eq!(config.mqtt.broker_port, 8883);
        assert_eq!(config.mqtt.keep_alive_secs, 30);
        assert_eq!(config.hardware.tool, "/usr/local/bin/usbrelay");
        assert_eq!(config.hardware.command_timeout_secs, 5);
        assert_eq!(config.relays.len(), 2);
        assert_eq!(config.relays[0].relay, "HURTM_1");
        assert_eq!(config.relays[0].topic, "home/office/lamp");
    }

    #[test]
    fn test_minimal_config_defaults() {
        let toml_content = r#"
[mqtt]
broker_host = "localhost"
broker_port = 1883

[[relays]]
relay = "QWERT_0"
topic = "t0"
"#;

        let config: BridgeConfig = toml::from_str(toml_content).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.mqtt.keep_alive_secs, 60);
        assert_eq!(config.hardware.tool, "usbrelay");
        assert_eq!(config.hardware.command_timeout_secs, 10);
        assert_eq!(config.mqtt.username_env, None);
    }

    #[test]
    fn test_invalid_relay_id() {
        for bad_id in ["hurtm_1", "HURT_1", "HURTMX_1", "HURTM_12", "HURTM1", ""] {
            let mut config = BridgeConfig::test_config();
            config.relays[0].relay = bad_id.to_string();
            assert!(
                matches!(config.validate(), Err(ConfigError::InvalidRelayId(_))),
                "id '{bad_id}' should be rejected"
            );
        }
    }

    #[test]
    fn test_duplicate_relay_id_rejected() {
        let mut config = BridgeConfig::test_config();
        config.relays[1].relay = config.relays[0].relay.clone();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateRelayId(_))
        ));
    }

    #[test]
    fn test_duplicate_topic_rejected() {
        let mut config = BridgeConfig::test_config();
        config.relays[1].topic = config.relays[0].topic.clone();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateTopic(_))
        ));
    }

    #[test]
    fn test_empty_relays_rejected() {
        let toml_content = r#"
relays = []

[mqtt]
broker_host = "localhost"
broker_port = 1883
"#;
        let config: BridgeConfig = toml::from_str(toml_content).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_relay_ordering_preserved() {
        let toml_content = r#"
[mqtt]
broker_host = "localhost"
broker_port = 1883

[[relays]]
relay = "ZZZZZ_9"
topic = "z"

[[relays]]
relay = "AAAAA_0"
topic = "a"
"#;
        let config: BridgeConfig = toml::from_str(toml_content).unwrap();
        let ids: Vec<&str> = config.relays.iter().map(|r| r.relay.as_str()).collect();
        assert_eq!(ids, vec!["ZZZZZ_9", "AAAAA_0"]);
    }
}
