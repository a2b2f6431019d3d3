//! Error types for the mockd engine core

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A mock configuration violated a cross-field invariant
    #[error("validation error: {message}")]
    Validation {
        /// human-readable description of the violated invariant
        message: String,
    },

    /// Add was attempted with an ID already present in the store
    #[error("duplicate mock id: {id}")]
    DuplicateId {
        /// the colliding mock ID
        id: String,
    },

    /// An operation referenced a mock ID that does not exist
    #[error("mock not found: {id}")]
    NotFound {
        /// the missing mock ID
        id: String,
    },

    /// A port-binding protocol instance (gRPC, MQTT) failed to start
    #[error("failed to bind port for protocol instance: {message}")]
    PortBindFailure {
        /// underlying failure description
        message: String,
    },

    /// A port-binding mock's sub-record is missing required inputs (e.g. a
    /// gRPC mock with no `proto_dir`/`proto_files`). Distinct from
    /// [`Error::PortBindFailure`]: the mock stays enabled in the store with
    /// no running instance, kept dormant and logged rather than rejected.
    #[error("protocol instance kept dormant: {message}")]
    Dormant {
        /// human-readable description of the missing input
        message: String,
    },

    /// A response's `bodyFile` resolved outside of `baseDir`, or could not be read
    #[error("body file error: {message}")]
    BodyFile {
        /// human-readable description
        message: String,
    },

    /// IO failure (reading a fixture file, binding a listener, etc)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML (de)serialization failure
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Malformed regular expression supplied in a matcher
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    /// Catch-all for conditions that don't warrant their own variant
    #[error("{0}")]
    Generic(String),
}

impl Error {
    /// Build a [`Error::Validation`]
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Build a [`Error::Generic`]
    pub fn generic<S: Into<String>>(message: S) -> Self {
        Self::Generic(message.into())
    }

    /// Build a [`Error::Dormant`]
    pub fn dormant<S: Into<String>>(message: S) -> Self {
        Self::Dormant {
            message: message.into(),
        }
    }
}

impl From<String> for Error {
    fn from(message: String) -> Self {
        Self::Generic(message)
    }
}
