use super::control::{control_channel, ControlHandle, ControlReceiver, Signal};
use super::state::{ExecutionState, LoopFrame, RunReport, RunStatus};
use crate::condition::ConditionEvaluator;
use crate::core::{BrowserDriver, RunnerConfig, SessionOptions};
use crate::download::{DriverGallery, GenerationDownloadManager, JsonStateStore, StateStore};
use crate::errors::{ActionFailure, AutomationError, DriverError, Result};
use crate::sequence::LoopIndex;
use crate::types::{Action, AutomationConfig, Step};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

const ELEMENT_POLL_MS: u64 = 250;

/// Interprets automation configs against a browser driver.
///
/// One run at a time: the driver lock is taken for the whole run and a
/// second `run` while it is held is rejected.
pub struct ExecutionEngine<D: BrowserDriver> {
    driver: Mutex<D>,
    control: Mutex<ControlReceiver>,
    handle: ControlHandle,
    status: Arc<RwLock<RunStatus>>,
    settings: RunnerConfig,
    store: Arc<dyn StateStore>,
}

impl<D: BrowserDriver> ExecutionEngine<D> {
    pub fn new(driver: D, settings: RunnerConfig) -> Self {
        let (handle, receiver) = control_channel();
        let store = Arc::new(JsonStateStore::new(settings.state_dir.clone()));
        Self {
            driver: Mutex::new(driver),
            control: Mutex::new(receiver),
            handle,
            status: Arc::new(RwLock::new(RunStatus::Idle)),
            settings,
            store,
        }
    }

    pub fn with_state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = store;
        self
    }

    pub fn control_handle(&self) -> ControlHandle {
        self.handle.clone()
    }

    pub fn pause(&self) {
        self.handle.pause();
    }

    pub fn resume(&self) {
        self.handle.resume();
    }

    pub fn stop(&self) {
        self.handle.stop();
    }

    pub async fn status(&self) -> RunStatus {
        *self.status.read().await
    }

    async fn publish(&self, state: &mut ExecutionState, status: RunStatus) {
        state.status = status;
        *self.status.write().await = status;
    }

    /// Executes `config` once. Structural defects are returned as errors
    /// before any browser work; everything else ends up in the report.
    pub async fn run(&self, config: &AutomationConfig) -> Result<RunReport> {
        let mut driver = self
            .driver
            .try_lock()
            .map_err(|_| AutomationError::AlreadyRunning)?;
        let loops = LoopIndex::build(&config.actions)?;
        let mut control = self.control.lock().await;
        control.reset();

        let run_id = uuid::Uuid::new_v4().to_string();
        let mut report = RunReport::new(run_id.clone(), config.name.clone());
        let mut state = ExecutionState::new();
        self.publish(&mut state, RunStatus::Running).await;
        info!(run_id = %run_id, config = %config.name, actions = config.actions.len(), "run started");

        let options = SessionOptions {
            headless: config.headless,
            viewport: config.viewport,
            user_agent: self.settings.user_agent.clone(),
        };

        let opened = match driver.launch(&options).await {
            Ok(()) => driver.navigate(&config.url).await,
            Err(e) => Err(e),
        };

        if let Err(e) = opened {
            let failure = ActionFailure {
                index: None,
                selector: None,
                description: format!("open {}", config.url),
                reason: e.to_string(),
            };
            error!(run_id = %run_id, error = %failure, "could not open session");
            self.publish(&mut state, RunStatus::Failed).await;
            report = report.with_failure(failure);
        } else if let Err(failure) = self
            .execute(&*driver, config, &loops, &mut state, &mut control, &mut report)
            .await
        {
            error!(run_id = %run_id, error = %failure, "run failed");
            self.publish(&mut state, RunStatus::Failed).await;
            report = report.with_failure(failure);
        }

        if driver.is_running() {
            if let Err(e) = driver.close().await {
                warn!(run_id = %run_id, error = %e, "failed to close browser");
            }
        }

        let report = report.finish(&state);
        info!(
            run_id = %run_id,
            status = ?report.status,
            actions = report.actions_executed,
            duration_ms = report.duration_ms().unwrap_or_default(),
            "run finished"
        );
        Ok(report)
    }

    async fn execute(
        &self,
        driver: &D,
        config: &AutomationConfig,
        loops: &LoopIndex,
        state: &mut ExecutionState,
        control: &mut ControlReceiver,
        report: &mut RunReport,
    ) -> std::result::Result<(), ActionFailure> {
        loop {
            if !self.checkpoint(control, state).await {
                info!(at = state.program_counter, "run stopped");
                self.publish(state, RunStatus::Stopped).await;
                return Ok(());
            }

            let index = state.program_counter;
            let Some(action) = config.actions.get(index) else {
                debug_assert!(state.loop_stack.is_empty());
                self.publish(state, RunStatus::Completed).await;
                return Ok(());
            };

            state.task_counter += 1;
            debug!(index, action = %action.label(), "dispatching");

            match self
                .dispatch(driver, config, loops, index, action, state, report)
                .await
            {
                Ok(next) => state.program_counter = next,
                Err(e) => {
                    return Err(ActionFailure {
                        index: Some(index),
                        selector: action.target_selector().map(str::to_string),
                        description: action.label(),
                        reason: e.to_string(),
                    })
                }
            }
        }
    }

    /// Between two actions: apply queued commands, hold while paused.
    /// Returns `false` when the run must stop.
    async fn checkpoint(&self, control: &mut ControlReceiver, state: &mut ExecutionState) -> bool {
        let mut signal = control.poll();
        loop {
            match signal {
                Signal::Run => {
                    if state.status == RunStatus::Paused {
                        info!(at = state.program_counter, "run resumed");
                        self.publish(state, RunStatus::Running).await;
                    }
                    return true;
                }
                Signal::Stop => return false,
                Signal::Paused => {
                    if state.status != RunStatus::Paused {
                        info!(at = state.program_counter, "run paused");
                        self.publish(state, RunStatus::Paused).await;
                    }
                    signal = control.wait().await;
                }
            }
        }
    }

    /// Runs one action and returns the next program counter.
    #[allow(clippy::too_many_arguments)]
    async fn dispatch(
        &self,
        driver: &D,
        config: &AutomationConfig,
        loops: &LoopIndex,
        index: usize,
        action: &Action,
        state: &mut ExecutionState,
        report: &mut RunReport,
    ) -> Result<usize> {
        let evaluator = ConditionEvaluator::new(driver);

        match &action.step {
            Step::Click => {
                let element = self.resolve(driver, action).await?;
                driver.click(&element).await?;
            }

            Step::InputText { text } => {
                let element = self.resolve(driver, action).await?;
                driver.type_text(&element, text).await?;
            }

            Step::Wait { ms } => driver.wait_ms(*ms).await?,

            Step::CheckElement(condition) => {
                let result = evaluator.evaluate(condition).await?;
                info!(index, selector = %condition.selector, result, "check");
                state.last_check_result = Some(result);
            }

            Step::WhileBegin(spec) => {
                let end = loop_end(loops, index)?;
                let enter = spec.max_iterations != Some(0)
                    && evaluator.evaluate(&spec.condition).await?;
                if !enter {
                    debug!(index, end, "loop condition false, skipping body");
                    return Ok(end + 1);
                }
                state.loop_stack.push(LoopFrame {
                    begin_index: index,
                    condition: spec.condition.clone(),
                    max_iterations: spec.max_iterations,
                    iterations: 1,
                });
            }

            Step::WhileEnd => {
                let begin = loops
                    .begin_of(index)
                    .ok_or_else(|| out_of_sync(index))?;
                let frame = state
                    .loop_stack
                    .last_mut()
                    .filter(|f| f.begin_index == begin)
                    .ok_or_else(|| out_of_sync(index))?;

                if frame.bound_reached() {
                    warn!(index, iterations = frame.iterations, "loop iteration bound reached");
                } else if evaluator.evaluate(&frame.condition).await? {
                    frame.iterations += 1;
                    return Ok(begin + 1);
                }
                state.loop_stack.pop();
            }

            Step::Break { condition } => {
                if let Some(condition) = condition {
                    if !evaluator.evaluate(condition).await? {
                        return Ok(index + 1);
                    }
                }
                let frame = state.loop_stack.pop().ok_or_else(|| out_of_sync(index))?;
                let end = loop_end(loops, frame.begin_index)?;
                debug!(index, end, "break out of loop");
                return Ok(end + 1);
            }

            Step::Log { message } => {
                info!(config = %config.name, index, "{}", message);
            }

            Step::Navigate { url } => driver.navigate(url).await?,

            Step::DownloadGenerations(spec) => {
                let home_url = driver.current_url().await?;
                let gallery = DriverGallery::new(
                    driver,
                    spec.gallery.clone(),
                    home_url,
                    self.settings.page_settle_ms,
                );
                let manager = GenerationDownloadManager::new(self.store.clone(), spec.clone());
                let scan = manager.run(&gallery, config.start_from.as_ref()).await?;
                report.downloads.push(scan);
            }
        }

        Ok(index + 1)
    }

    /// Waits up to the action's timeout for its selector to resolve, trying
    /// the driver's enhanced lookup when the plain one finds nothing.
    async fn resolve(&self, driver: &D, action: &Action) -> Result<D::Element> {
        let selector = action.selector.as_deref().ok_or_else(|| {
            AutomationError::ConfigurationError(format!(
                "{} has no selector",
                action.action_type().as_str()
            ))
        })?;
        let timeout = Duration::from_millis(
            action
                .timeout_ms
                .unwrap_or(self.settings.default_timeout_ms),
        );
        let started = Instant::now();
        let mut waited = Duration::ZERO;

        loop {
            if let Some(element) = driver.find_element(selector).await? {
                return Ok(element);
            }
            if let Some(element) = driver.find_elements_deep(selector).await?.into_iter().next() {
                return Ok(element);
            }
            if waited >= timeout || started.elapsed() >= timeout {
                return Err(DriverError::ElementNotFound(selector.to_string()).into());
            }
            driver.wait_ms(ELEMENT_POLL_MS).await?;
            waited += Duration::from_millis(ELEMENT_POLL_MS);
        }
    }
}

fn loop_end(loops: &LoopIndex, begin: usize) -> Result<usize> {
    loops.end_of(begin).ok_or_else(|| out_of_sync(begin))
}

fn out_of_sync(index: usize) -> AutomationError {
    AutomationError::ConfigurationError(format!("loop stack out of sync at action {}", index))
}
