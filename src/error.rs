//! Error types.
//!
//! Pool and tracker operations are infallible; these cover the edges where
//! something outside the control sequence can go wrong.

use std::io;

/// Native player construction errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerError {
    /// Platform refused to create a decoder (slot exhaustion, codec init)
    Construction(String),
}

impl std::fmt::Display for PlayerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerError::Construction(e) => write!(f, "Player construction failed: {}", e),
        }
    }
}

impl std::error::Error for PlayerError {}

/// Configuration loading / validation errors
#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Parse(serde_json::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Config read error: {}", e),
            ConfigError::Parse(e) => write!(f, "Config parse error: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Feed setup and control-sequence errors
#[derive(Debug)]
pub enum FeedError {
    Config(ConfigError),
    /// Control sequence thread is gone
    Disconnected,
    /// Could not start a background thread
    Spawn(io::Error),
}

impl std::fmt::Display for FeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedError::Config(e) => write!(f, "{}", e),
            FeedError::Disconnected => write!(f, "Feed control sequence disconnected"),
            FeedError::Spawn(e) => write!(f, "Failed to spawn thread: {}", e),
        }
    }
}

impl std::error::Error for FeedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FeedError::Config(e) => Some(e),
            FeedError::Spawn(e) => Some(e),
            FeedError::Disconnected => None,
        }
    }
}

impl From<ConfigError> for FeedError {
    fn from(e: ConfigError) -> Self {
        FeedError::Config(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_display_messages() {
        let e = PlayerError::Construction("no decoder".into());
        assert_eq!(e.to_string(), "Player construction failed: no decoder");

        let e = FeedError::from(ConfigError::Invalid("pool_capacity must be >= 1".into()));
        assert_eq!(e.to_string(), "Invalid config: pool_capacity must be >= 1");
        assert!(e.source().is_some());

        assert!(FeedError::Disconnected.source().is_none());
    }
}
