use std::fmt;
use warp::http::StatusCode;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    BadIPFormatting(String),
    NotInRange(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::BadIPFormatting(e) => write!(f, "IP formatting error: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

#[derive(Debug, PartialEq)]
pub enum StorageError {
    WriteFailed,
    ReadFailed,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::WriteFailed => write!(f, "Storage write failed"),
            StorageError::ReadFailed => write!(f, "Storage read failed"),
        }
    }
}

impl std::error::Error for StorageError {}

/// Failures while collecting a request body.
#[derive(Debug)]
pub enum HttpError {
    MalformedBody(String),
    BodyTooLarge(usize),
    Timeout,
}

impl HttpError {
    pub fn status(&self) -> StatusCode {
        match self {
            HttpError::MalformedBody(_) => StatusCode::BAD_REQUEST,
            HttpError::BodyTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            HttpError::Timeout => StatusCode::REQUEST_TIMEOUT,
        }
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpError::MalformedBody(e) => write!(f, "Malformed request body: {}", e),
            HttpError::BodyTooLarge(limit) => {
                write!(f, "Request body exceeds limit of {} bytes", limit)
            }
            HttpError::Timeout => write!(f, "Request timed out"),
        }
    }
}

impl std::error::Error for HttpError {}

#[derive(Debug)]
pub enum NetworkError {
    BindError(std::io::Error),
    SockError(std::io::Error),
    ShutdownFailed,
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::BindError(e) => write!(f, "Network bind error: {}", e),
            NetworkError::SockError(e) => write!(f, "Socket error: {}", e),
            NetworkError::ShutdownFailed => write!(f, "Listener shutdown failed"),
        }
    }
}

impl std::error::Error for NetworkError {}

#[derive(Debug)]
pub enum ControllerError {
    ConfigurationError(ConfigError),
    NetworkError(NetworkError),
    InitializationFailed(String),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            ControllerError::NetworkError(e) => write!(f, "Network error: {}", e),
            ControllerError::InitializationFailed(e) => write!(f, "Initialization failed: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<ConfigError> for ControllerError {
    fn from(err: ConfigError) -> Self {
        ControllerError::ConfigurationError(err)
    }
}

impl From<NetworkError> for ControllerError {
    fn from(err: NetworkError) -> Self {
        ControllerError::NetworkError(err)
    }
}
