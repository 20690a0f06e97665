/*!
 * Error types shared by the icpflow crates.
 *
 * Instrument-reported errors (code, message, severity) are not represented
 * here: they arrive asynchronously and are kept in the session's error log.
 */
use thiserror::Error;

/// Error type for icpflow operations
#[derive(Error, Debug)]
pub enum Error {
    /// The vendor service refused the connection handshake or the disconnect
    #[error("Connection failure: {0}")]
    ConnectionFailure(String),

    /// The vendor service returned a failure for a command
    #[error("Command {command} rejected: {response}")]
    CommandRejected {
        /// Vendor command name
        command: String,
        /// Last raw response text reported by the vendor service
        response: String,
    },

    /// An operation exceeded its time bound
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The caller supplied missing or conflicting parameters
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// A wait was interrupted by a cancel, pause or safety stop
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Runtime error
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Other error
    #[error("Other error: {0}")]
    Other(String),
}

/// Result type for icpflow operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a new connection failure
    pub fn connection<S: AsRef<str>>(msg: S) -> Self {
        Error::ConnectionFailure(msg.as_ref().to_string())
    }

    /// Create a new command rejection
    pub fn rejected<C: AsRef<str>, R: Into<String>>(command: C, response: R) -> Self {
        Error::CommandRejected {
            command: command.as_ref().to_string(),
            response: response.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: AsRef<str>>(msg: S) -> Self {
        Error::Timeout(msg.as_ref().to_string())
    }

    /// Create a new invalid parameters error
    pub fn invalid_parameters<S: AsRef<str>>(msg: S) -> Self {
        Error::InvalidParameters(msg.as_ref().to_string())
    }

    /// Create a new cancellation error
    pub fn cancelled<S: AsRef<str>>(msg: S) -> Self {
        Error::Cancelled(msg.as_ref().to_string())
    }

    /// Create a new configuration error
    pub fn config<S: AsRef<str>>(msg: S) -> Self {
        Error::Config(msg.as_ref().to_string())
    }

    /// Create a new runtime error
    pub fn runtime<S: AsRef<str>>(msg: S) -> Self {
        Error::Runtime(msg.as_ref().to_string())
    }

    /// Create a new other error
    pub fn other<S: AsRef<str>>(msg: S) -> Self {
        Error::Other(msg.as_ref().to_string())
    }

    /// Raw vendor response carried by the error, if any
    pub fn response(&self) -> Option<&str> {
        match self {
            Error::CommandRejected { response, .. } => Some(response),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}
