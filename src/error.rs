//! Error types for overlay-config.

/// Result type alias for overlay-config operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur when working with configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The local base layer could not be read or parsed.
    #[error("Failed to load base configuration: {0}")]
    Format(String),

    /// A configuration source failed to return its snapshot.
    #[error("Failed to read configuration from source '{source_name}': {reason}")]
    SourceRead {
        /// Name of the source that failed
        source_name: String,
        /// Underlying failure
        reason: String,
    },

    /// The source does not implement the requested operation.
    ///
    /// Returned by `set` on read-only sources and by `watch` on sources without
    /// live updates. Callers treat it as "skip", never as a failure.
    #[error("Operation not supported by configuration source")]
    Unsupported,

    /// Live-update registration or delivery failed.
    #[error("Configuration watch error: {0}")]
    Watch(String),

    /// A subscriber's constructor or refresh callback failed or panicked.
    #[error("Failed to update configuration for '{name}': {reason}")]
    SubscriberUpdate {
        /// Subscriber name
        name: String,
        /// Why the update was rejected
        reason: String,
    },

    /// Writing a single key to a backing store failed.
    #[error("Failed to save key '{key}': {reason}")]
    Write {
        /// Fully qualified key
        key: String,
        /// Underlying failure
        reason: String,
    },

    /// A value cannot be encoded for the backing store.
    #[error("Failed to encode configuration value: {0}")]
    Encode(String),

    /// Transport or protocol error from a backing-store client.
    #[error("Backing store client error: {0}")]
    Client(String),

    /// The single-instance store was initialised more than once.
    #[error("Configuration store is already initialized")]
    AlreadyInitialized,

    /// The single-instance store was used before initialisation.
    #[error("Configuration store is not initialized")]
    NotInitialized,

    /// Several independent operations failed.
    #[error("{}", format_multiple(.0))]
    Multiple(Vec<ConfigError>),

    /// IO error occurred.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ConfigError {
    /// Whether this is the "unsupported operation" sentinel.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, ConfigError::Unsupported)
    }

    /// Collapse a list of failures: `Ok` when empty, the error itself when
    /// there is exactly one, `Multiple` otherwise.
    pub fn from_failures(mut failures: Vec<ConfigError>) -> Result<()> {
        match failures.len() {
            0 => Ok(()),
            1 => Err(failures.remove(0)),
            _ => Err(ConfigError::Multiple(failures)),
        }
    }
}

fn format_multiple(errors: &[ConfigError]) -> String {
    let mut out = format!("{} errors occurred:", errors.len());
    for (i, err) in errors.iter().enumerate() {
        out.push_str(&format!("\n  {}. {}", i + 1, err));
    }
    out
}
