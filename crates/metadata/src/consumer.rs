use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::MetadataError;

/// Default ADS/provider host
pub const DEFAULT_HOST: &str = "localhost";
/// Default RSSL socket port
pub const DEFAULT_PORT: u16 = 14002;
/// Default session run time in seconds
pub const DEFAULT_RUN_TIME_SECS: u64 = 300;
/// Default ping timeout requested from the provider
pub const DEFAULT_PING_TIMEOUT_SECS: u64 = 60;
/// Minimum ping timeout accepted by the transport handshake
pub const MIN_PING_TIMEOUT_SECS: u64 = 3;
/// Maximum ping timeout that still fits the handshake field
pub const MAX_PING_TIMEOUT_SECS: u64 = 255;
/// Handshake gives up when the peer stays silent this long
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_GUARANTEED_OUTPUT_BUFFERS: usize = 50;
pub const DEFAULT_NUM_INPUT_BUFFERS: usize = 10;
pub const MIN_OUTPUT_BUFFERS: usize = 2;
/// Services tracked per directory response
pub const DEFAULT_MAX_SERVICES: usize = 15;
pub const MAX_SERVICES_LIMIT: usize = 256;
pub const DEFAULT_SERVICE_NAME: &str = "DIRECT_FEED";
pub const DEFAULT_ITEM_NAME: &str = "TRI";
pub const DEFAULT_FIELD_DICTIONARY_FILE: &str = "RDMFieldDictionary";
pub const DEFAULT_ENUM_DICTIONARY_FILE: &str = "enumtype.def";
pub const DEFAULT_FIELD_DOWNLOAD_NAME: &str = "RWFFld";
pub const DEFAULT_ENUM_DOWNLOAD_NAME: &str = "RWFEnum";
pub const DEFAULT_APPLICATION_ID: &str = "256";
pub const DEFAULT_APPLICATION_NAME: &str = "ETA Consumer Training";

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_ping_timeout_secs() -> u64 {
    DEFAULT_PING_TIMEOUT_SECS
}

fn default_handshake_timeout_secs() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT_SECS
}

fn default_guaranteed_output_buffers() -> usize {
    DEFAULT_GUARANTEED_OUTPUT_BUFFERS
}

fn default_num_input_buffers() -> usize {
    DEFAULT_NUM_INPUT_BUFFERS
}

fn default_true() -> bool {
    true
}

fn default_run_time_secs() -> u64 {
    DEFAULT_RUN_TIME_SECS
}

fn default_max_services() -> usize {
    DEFAULT_MAX_SERVICES
}

fn default_service_name() -> String {
    DEFAULT_SERVICE_NAME.to_string()
}

fn default_item_name() -> String {
    DEFAULT_ITEM_NAME.to_string()
}

fn default_field_file() -> PathBuf {
    PathBuf::from(DEFAULT_FIELD_DICTIONARY_FILE)
}

fn default_enum_file() -> PathBuf {
    PathBuf::from(DEFAULT_ENUM_DICTIONARY_FILE)
}

fn default_field_download_name() -> String {
    DEFAULT_FIELD_DOWNLOAD_NAME.to_string()
}

fn default_enum_download_name() -> String {
    DEFAULT_ENUM_DOWNLOAD_NAME.to_string()
}

fn default_application_id() -> String {
    DEFAULT_APPLICATION_ID.to_string()
}

fn default_application_name() -> String {
    DEFAULT_APPLICATION_NAME.to_string()
}

/// Where and how to reach the provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Local interface address to bind before connecting; empty means any
    #[serde(default)]
    pub interface: String,
    #[serde(default = "default_ping_timeout_secs")]
    pub ping_timeout_secs: u64,
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    #[serde(default = "default_guaranteed_output_buffers")]
    pub guaranteed_output_buffers: usize,
    #[serde(default = "default_num_input_buffers")]
    pub num_input_buffers: usize,
    #[serde(default = "default_true")]
    pub tcp_nodelay: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            interface: String::new(),
            ping_timeout_secs: default_ping_timeout_secs(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            guaranteed_output_buffers: default_guaranteed_output_buffers(),
            num_input_buffers: default_num_input_buffers(),
            tcp_nodelay: true,
        }
    }
}

impl ConnectionConfig {
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// Interface to bind, if one was configured
    pub fn interface(&self) -> Option<&str> {
        let trimmed = self.interface.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }
}

/// Identity sent on the login stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginConfig {
    /// Login user name; falls back to the OS user when unset
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default = "default_application_id")]
    pub application_id: String,
    #[serde(default = "default_application_name")]
    pub application_name: String,
    /// DACS position, e.g. "10.0.0.1/host"
    #[serde(default)]
    pub position: Option<String>,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            user_name: None,
            application_id: default_application_id(),
            application_name: default_application_name(),
            position: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_max_services")]
    pub max_services: usize,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            max_services: default_max_services(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DictionaryConfig {
    #[serde(default = "default_field_file")]
    pub field_file: PathBuf,
    #[serde(default = "default_enum_file")]
    pub enum_file: PathBuf,
    #[serde(default = "default_field_download_name")]
    pub field_download_name: String,
    #[serde(default = "default_enum_download_name")]
    pub enum_download_name: String,
}

impl Default for DictionaryConfig {
    fn default() -> Self {
        Self {
            field_file: default_field_file(),
            enum_file: default_enum_file(),
            field_download_name: default_field_download_name(),
            enum_download_name: default_enum_download_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemConfig {
    #[serde(default = "default_item_name")]
    pub name: String,
}

impl Default for ItemConfig {
    fn default() -> Self {
        Self {
            name: default_item_name(),
        }
    }
}

/// Complete configuration of one consumer session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub login: LoginConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub dictionary: DictionaryConfig,
    #[serde(default)]
    pub item: ItemConfig,
    #[serde(default = "default_run_time_secs")]
    pub run_time_secs: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            login: LoginConfig::default(),
            directory: DirectoryConfig::default(),
            dictionary: DictionaryConfig::default(),
            item: ItemConfig::default(),
            run_time_secs: default_run_time_secs(),
        }
    }
}

impl ConsumerConfig {
    pub fn load(path: &Path) -> Result<Self, MetadataError> {
        let content = std::fs::read_to_string(path)?;
        let config: ConsumerConfig = serde_yaml::from_str(&content)?;
        config.check()?;
        Ok(config)
    }

    pub fn run_time(&self) -> Duration {
        Duration::from_secs(self.run_time_secs)
    }

    /// Reject values that cannot be clamped into something usable
    pub fn check(&self) -> Result<(), MetadataError> {
        if self.connection.host.trim().is_empty() {
            return Err(MetadataError::Validation("connection.host is empty".into()));
        }
        if self.connection.port == 0 {
            return Err(MetadataError::Validation("connection.port must be non-zero".into()));
        }
        if self.directory.service_name.is_empty() {
            return Err(MetadataError::Validation(
                "directory.service_name is empty".into(),
            ));
        }
        if self.item.name.is_empty() {
            return Err(MetadataError::Validation("item.name is empty".into()));
        }
        Ok(())
    }

    /// Validate the configuration, clamping numeric settings to their valid range.
    /// Returns a tuple of (validated_config, was_clamped).
    pub fn validated(mut self) -> (Self, bool) {
        let mut clamped = false;

        let ping = &mut self.connection.ping_timeout_secs;
        if *ping < MIN_PING_TIMEOUT_SECS {
            *ping = MIN_PING_TIMEOUT_SECS;
            clamped = true;
        } else if *ping > MAX_PING_TIMEOUT_SECS {
            *ping = MAX_PING_TIMEOUT_SECS;
            clamped = true;
        }

        if self.connection.handshake_timeout_secs == 0 {
            self.connection.handshake_timeout_secs = DEFAULT_HANDSHAKE_TIMEOUT_SECS;
            clamped = true;
        }

        if self.connection.guaranteed_output_buffers < MIN_OUTPUT_BUFFERS {
            self.connection.guaranteed_output_buffers = MIN_OUTPUT_BUFFERS;
            clamped = true;
        }

        let services = &mut self.directory.max_services;
        if *services == 0 {
            *services = 1;
            clamped = true;
        } else if *services > MAX_SERVICES_LIMIT {
            *services = MAX_SERVICES_LIMIT;
            clamped = true;
        }

        (self, clamped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_reference_consumer() {
        let config = ConsumerConfig::default();
        assert_eq!(config.connection.host, "localhost");
        assert_eq!(config.connection.port, 14002);
        assert!(config.connection.interface().is_none());
        assert_eq!(config.run_time_secs, 300);
        assert_eq!(config.directory.service_name, "DIRECT_FEED");
        assert_eq!(config.directory.max_services, 15);
        assert_eq!(config.item.name, "TRI");
        assert_eq!(config.dictionary.field_download_name, "RWFFld");
        assert_eq!(config.dictionary.enum_download_name, "RWFEnum");
        assert_eq!(
            config.dictionary.enum_file,
            PathBuf::from("enumtype.def")
        );
    }

    #[test]
    fn test_load_partial_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
connection:
  host: ads1.example.net
  port: 14003
  interface: 10.1.2.3
directory:
  service_name: ELEKTRON_DD
item:
  name: IBM.N
run_time_secs: 30
"#
        )
        .unwrap();

        let config = ConsumerConfig::load(file.path()).unwrap();
        assert_eq!(config.connection.host, "ads1.example.net");
        assert_eq!(config.connection.port, 14003);
        assert_eq!(config.connection.interface(), Some("10.1.2.3"));
        assert_eq!(config.connection.ping_timeout_secs, 60);
        assert_eq!(config.directory.service_name, "ELEKTRON_DD");
        assert_eq!(config.directory.max_services, 15);
        assert_eq!(config.item.name, "IBM.N");
        assert_eq!(config.run_time(), Duration::from_secs(30));
        assert_eq!(config.login.application_id, "256");
    }

    #[test]
    fn test_load_rejects_empty_service() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
directory:
  service_name: ""
"#
        )
        .unwrap();

        let err = ConsumerConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, MetadataError::Validation(_)));
    }

    #[test]
    fn test_load_invalid_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "connection: [unterminated").unwrap();
        let err = ConsumerConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, MetadataError::Yaml(_)));
    }

    #[test]
    fn test_validated_clamps() {
        let mut config = ConsumerConfig::default();
        config.connection.ping_timeout_secs = 0;
        config.directory.max_services = 10_000;
        let (config, clamped) = config.validated();
        assert!(clamped);
        assert_eq!(config.connection.ping_timeout_secs, MIN_PING_TIMEOUT_SECS);
        assert_eq!(config.directory.max_services, MAX_SERVICES_LIMIT);
    }

    #[test]
    fn test_validated_leaves_defaults_alone() {
        let (_, clamped) = ConsumerConfig::default().validated();
        assert!(!clamped);
    }
}
