//! Declarative browser automation: validated action sequences with loops and
//! conditions, a pausable interpreter, whole-run retries, and a resumable
//! gallery downloader.

#[cfg(feature = "chrome")]
pub mod browser;
pub mod condition;
pub mod core;
pub mod download;
pub mod engine;
pub mod errors;
pub mod scheduler;
pub mod sequence;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;

#[cfg(feature = "chrome")]
pub use browser::ChromeDriver;
pub use condition::ConditionEvaluator;
pub use crate::core::{BrowserDriver, RunnerConfig, SessionOptions};
pub use download::{GenerationDownloadManager, Identity, JsonStateStore, ScanReport};
pub use engine::{ControlHandle, ExecutionEngine, RunReport, RunStatus};
pub use errors::{ActionFailure, AutomationError, DriverError, Result, StructuralError};
pub use scheduler::{ConfigQueue, RetryController, RetryOutcome};
pub use types::*;
