//! Retry policy around whole runs, and sequential processing of several
//! configurations.

use crate::core::BrowserDriver;
use crate::engine::{ExecutionEngine, RunReport, RunStatus};
use crate::errors::{AutomationError, Result};
use crate::sequence;
use crate::types::AutomationConfig;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Something that performs one complete run of a configuration.
#[async_trait]
pub trait Runner: Send + Sync {
    async fn run(&self, config: &AutomationConfig) -> Result<RunReport>;
}

#[async_trait]
impl<D: BrowserDriver> Runner for ExecutionEngine<D> {
    async fn run(&self, config: &AutomationConfig) -> Result<RunReport> {
        ExecutionEngine::run(self, config).await
    }
}

#[derive(Debug, Clone)]
pub enum RetryOutcome {
    Success(RunReport),
    /// Every attempt failed; `last` is the report of the final one.
    Exhausted { attempts: u32, last: RunReport },
    Stopped(RunReport),
}

impl RetryOutcome {
    pub fn report(&self) -> &RunReport {
        match self {
            RetryOutcome::Success(report) | RetryOutcome::Stopped(report) => report,
            RetryOutcome::Exhausted { last, .. } => last,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Success(_))
    }
}

/// Re-runs a failed configuration after a fixed wait, up to a total number
/// of attempts.
pub struct RetryController<'a, R: Runner + ?Sized> {
    runner: &'a R,
    sleeper: Arc<dyn Sleeper>,
}

impl<'a, R: Runner + ?Sized> RetryController<'a, R> {
    pub fn new(runner: &'a R) -> Self {
        Self {
            runner,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Uses the retry settings carried by the configuration itself.
    pub async fn run(&self, config: &AutomationConfig) -> Result<RetryOutcome> {
        self.run_with_retries(config, config.max_retries, config.failure_wait_seconds)
            .await
    }

    pub async fn run_with_retries(
        &self,
        config: &AutomationConfig,
        max_retries: u32,
        failure_wait_seconds: u64,
    ) -> Result<RetryOutcome> {
        sequence::validate(&config.actions)?;
        if max_retries == 0 {
            return Err(AutomationError::ConfigurationError(
                "maxRetries must be at least 1".to_string(),
            ));
        }

        let wait = Duration::from_secs(failure_wait_seconds);
        let mut attempt = 1;

        loop {
            info!(config = %config.name, attempt, max_retries, "starting attempt");
            let report = self.runner.run(config).await?;

            match report.status {
                RunStatus::Completed => return Ok(RetryOutcome::Success(report)),
                RunStatus::Stopped => {
                    info!(config = %config.name, attempt, "run stopped, not retrying");
                    return Ok(RetryOutcome::Stopped(report));
                }
                status => {
                    if let Some(failure) = &report.failure {
                        warn!(config = %config.name, attempt, error = %failure, "attempt failed");
                    } else {
                        warn!(config = %config.name, attempt, ?status, "attempt did not complete");
                    }
                }
            }

            if attempt >= max_retries {
                error!(config = %config.name, attempts = attempt, "retries exhausted");
                return Ok(RetryOutcome::Exhausted {
                    attempts: attempt,
                    last: report,
                });
            }

            info!(config = %config.name, seconds = failure_wait_seconds, "waiting before retry");
            self.sleeper.sleep(wait).await;
            attempt += 1;
        }
    }
}

/// Result of one configuration in a queue.
#[derive(Debug)]
pub struct QueueEntry {
    pub name: String,
    pub outcome: Result<RetryOutcome>,
}

/// Runs configurations one after another. An exhausted or invalid entry
/// moves on to the next one; a stopped run halts the queue.
pub struct ConfigQueue<'a, R: Runner + ?Sized> {
    controller: RetryController<'a, R>,
}

impl<'a, R: Runner + ?Sized> ConfigQueue<'a, R> {
    pub fn new(controller: RetryController<'a, R>) -> Self {
        Self { controller }
    }

    pub async fn run(&self, configs: &[AutomationConfig]) -> Vec<QueueEntry> {
        let mut results = Vec::with_capacity(configs.len());

        for config in configs {
            let outcome = self.controller.run(config).await;
            let halt = matches!(outcome, Ok(RetryOutcome::Stopped(_)));
            if let Err(e) = &outcome {
                error!(config = %config.name, error = %e, "configuration rejected");
            }
            results.push(QueueEntry {
                name: config.name.clone(),
                outcome,
            });
            if halt {
                info!(remaining = configs.len() - results.len(), "queue halted by stop");
                break;
            }
        }

        results
    }
}
