use super::types::*;
use crate::error_handling::types::ConfigError;
use clap::Parser;
use log::{debug, error};
use serde::Deserialize;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 4000;
pub const DEFAULT_STORE_PATH: &str = "/tmp/received-data.json";
pub const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Command-line arguments.
///
/// Every field is optional so that anything left unset falls back to the configuration file,
/// then to the built-in defaults. Each flag can also be given through an `HTTP_RECEIVER_*`
/// environment variable.
///
/// # Command Line
/// ```text
/// http-receiver --config receiver.toml --port 4001 --storage-backend memory
/// ```
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "http-receiver")]
#[command(version)]
#[command(about = "Keeps the last pushed payload and serves it back on GET")]
pub struct CliArgs {
    /// Optional TOML configuration file loaded before the flags are applied
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// IP address to bind the listener to
    #[arg(long, env = "HTTP_RECEIVER_BIND_ADDRESS")]
    pub bind_address: Option<String>,

    /// TCP port to listen on
    #[arg(long, short = 'p', env = "HTTP_RECEIVER_PORT")]
    pub port: Option<u16>,

    /// Where the snapshot lives
    #[arg(long, value_enum, env = "HTTP_RECEIVER_STORAGE_BACKEND")]
    pub storage_backend: Option<StorageBackend>,

    /// File holding the snapshot when the file backend is selected
    #[arg(long, env = "HTTP_RECEIVER_STORE_PATH")]
    pub store_path: Option<PathBuf>,

    /// Largest request body accepted, in bytes
    #[arg(long, env = "HTTP_RECEIVER_MAX_BODY_BYTES")]
    pub max_body_bytes: Option<usize>,

    /// Time allowed to receive a full request, in seconds
    #[arg(long, env = "HTTP_RECEIVER_REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: Option<u64>,
}

/// Runtime configuration of the receiver.
///
/// Built from three layers, lowest priority first: built-in defaults, an optional TOML file,
/// then command-line flags / environment variables.
///
/// # Examples
///
/// ```
/// use http_receiver::configuration::config::Config;
///
/// let config = Config::from_toml_str("port = 4100").unwrap();
/// assert_eq!(config.port, 4100);
/// assert_eq!(config.bind_address, "0.0.0.0");
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// IP address the listener binds to
    pub bind_address: String,

    /// TCP port the listener binds to, `0` picks an ephemeral one
    pub port: u16,

    /// Selected snapshot backend
    pub storage_backend: StorageBackend,

    /// Location of the snapshot file for the file backend
    pub store_path: PathBuf,

    /// Upper bound on request bodies, applied to both framings
    pub max_body_bytes: usize,

    /// Deadline for collecting a request body, also the idle limit on any socket read or write
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: String::from("0.0.0.0"),
            port: DEFAULT_PORT,
            storage_backend: StorageBackend::default(),
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Loads and validates a TOML configuration file. Keys absent from the file keep their
    /// default value.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| {
            error!("Failed to read configuration file {}: {}", path.display(), e);
            ConfigError::IoError(e)
        })?;
        debug!("Loaded configuration file {}", path.display());
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Builds the configuration from parsed command-line arguments, loading `--config` first
    /// when given.
    pub fn from_args(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(bind_address) = &args.bind_address {
            config.bind_address = bind_address.clone();
        }
        if let Some(port) = args.port {
            config.port = port;
        }
        if let Some(backend) = args.storage_backend {
            config.storage_backend = backend;
        }
        if let Some(store_path) = &args.store_path {
            config.store_path = store_path.clone();
        }
        if let Some(max_body_bytes) = args.max_body_bytes {
            config.max_body_bytes = max_body_bytes;
        }
        if let Some(timeout) = args.request_timeout_secs {
            config.request_timeout_secs = timeout;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_address
            .parse::<IpAddr>()
            .map_err(|_| ConfigError::BadIPFormatting(self.bind_address.clone()))?;

        if self.max_body_bytes == 0 {
            return Err(ConfigError::NotInRange(
                "max_body_bytes must be greater than 0".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::NotInRange(
                "request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip = self
            .bind_address
            .parse::<IpAddr>()
            .map_err(|_| ConfigError::BadIPFormatting(self.bind_address.clone()))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn args_under_test(extra: &[&str]) -> Result<CliArgs, clap::Error> {
        let mut argv = vec!["http-receiver"];
        argv.extend_from_slice(extra);
        CliArgs::try_parse_from(argv)
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();

        assert_eq!(config.bind_address, "0.0.0.0");
        assert_eq!(config.port, 4000);
        assert_eq!(config.storage_backend, StorageBackend::File);
        assert_eq!(config.store_path, PathBuf::from("/tmp/received-data.json"));
        assert_eq!(config.socket_addr().unwrap(), "0.0.0.0:4000".parse().unwrap());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_fills_missing_keys_with_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "bind_address = \"127.0.0.1\"\nport = 4100\nstorage_backend = \"memory\""
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();

        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.port, 4100);
        assert_eq!(config.storage_backend, StorageBackend::Memory);
        assert_eq!(config.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
        assert_eq!(config.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
    }

    #[test]
    fn test_from_file_missing() {
        let result = Config::from_file(Path::new("/definitely/not/here.toml"));
        assert!(matches!(result, Err(ConfigError::IoError(_))));
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let result = Config::from_toml_str("prot = 4000");
        assert!(matches!(result, Err(ConfigError::TomlError(_))));
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            Config::from_toml_str("bind_address = \"not-an-ip\""),
            Err(ConfigError::BadIPFormatting(_))
        ));
        assert!(matches!(
            Config::from_toml_str("max_body_bytes = 0"),
            Err(ConfigError::NotInRange(_))
        ));
        assert!(matches!(
            Config::from_toml_str("request_timeout_secs = 0"),
            Err(ConfigError::NotInRange(_))
        ));
    }

    #[test]
    #[serial]
    fn test_cli_overrides_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "port = 4100\nstore_path = \"/var/tmp/a.json\"").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let args = args_under_test(&[
            "--config",
            &path,
            "--port",
            "4200",
            "--storage-backend",
            "memory",
            "--max-body-bytes",
            "1024",
        ])
        .unwrap_or_else(|e| panic!("{}", e));
        let config = Config::from_args(&args).unwrap();

        assert_eq!(config.port, 4200);
        assert_eq!(config.store_path, PathBuf::from("/var/tmp/a.json"));
        assert_eq!(config.storage_backend, StorageBackend::Memory);
        assert_eq!(config.max_body_bytes, 1024);
    }

    #[test]
    #[serial]
    fn test_env_overrides_defaults() {
        std::env::set_var("HTTP_RECEIVER_PORT", "4300");
        std::env::set_var("HTTP_RECEIVER_STORE_PATH", "/var/tmp/env.json");

        let args = args_under_test(&[]);

        std::env::remove_var("HTTP_RECEIVER_PORT");
        std::env::remove_var("HTTP_RECEIVER_STORE_PATH");

        let config = Config::from_args(&args.unwrap()).unwrap();
        assert_eq!(config.port, 4300);
        assert_eq!(config.store_path, PathBuf::from("/var/tmp/env.json"));
        assert_eq!(config.bind_address, "0.0.0.0");
    }

    #[test]
    #[serial]
    fn test_invalid_cli_value_is_rejected() {
        let args = args_under_test(&["--request-timeout-secs", "0"]).unwrap();
        assert!(matches!(
            Config::from_args(&args),
            Err(ConfigError::NotInRange(_))
        ));

        assert!(args_under_test(&["--storage-backend", "s3"]).is_err());
    }
}
