pub mod browser;
pub mod config;

pub use browser::{BrowserDriver, DriverResult, SessionOptions};
pub use config::RunnerConfig;
