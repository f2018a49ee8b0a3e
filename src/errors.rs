use std::fmt;
use thiserror::Error;

/// Errors raised by a browser driver implementation.
#[derive(Error, Debug, Clone)]
pub enum DriverError {
    #[error("Browser launch failed: {0}")]
    LaunchFailed(String),

    #[error("Browser not launched")]
    BrowserNotLaunched,

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Element is stale: {0}")]
    StaleElement(String),

    #[error("JavaScript execution failed: {0}")]
    JavaScriptFailed(String),

    #[error("Timeout error: {0}")]
    TimeoutError(String),

    #[error("Chrome error: {0}")]
    ChromeError(String),
}

impl DriverError {
    pub fn from_any_error<E: std::fmt::Display>(err: E) -> Self {
        DriverError::ChromeError(err.to_string())
    }
}

/// Structural defects in an action sequence, reported with the offending index.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StructuralError {
    #[error("whileEnd at index {index} has no matching whileBegin")]
    UnmatchedLoopEnd { index: usize },

    #[error("whileBegin at index {index} is never closed")]
    UnclosedLoopBegin { index: usize },

    #[error("break at index {index} is outside any loop")]
    BreakOutsideLoop { index: usize },
}

impl StructuralError {
    pub fn index(&self) -> usize {
        match self {
            StructuralError::UnmatchedLoopEnd { index }
            | StructuralError::UnclosedLoopBegin { index }
            | StructuralError::BreakOutsideLoop { index } => *index,
        }
    }
}

/// A run-level failure. `index` is `None` when the session itself could not
/// be opened before the first action.
#[derive(Debug, Clone)]
pub struct ActionFailure {
    pub index: Option<usize>,
    pub selector: Option<String>,
    pub description: String,
    pub reason: String,
}

impl fmt::Display for ActionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "action #{} ({})", index, self.description)?,
            None => write!(f, "session ({})", self.description)?,
        }
        if let Some(selector) = &self.selector {
            write!(f, " on '{}'", selector)?;
        }
        write!(f, " failed: {}", self.reason)
    }
}

impl std::error::Error for ActionFailure {}

/// Errors from the persisted download state store.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("Invalid state key: {0}")]
    InvalidKey(String),

    #[error("Corrupt state file {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum AutomationError {
    #[error("Invalid action sequence: {0}")]
    Structural(#[from] StructuralError),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Engine is already running")]
    AlreadyRunning,

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Download state error: {0}")]
    State(#[from] StateError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AutomationError>;
