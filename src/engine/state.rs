use crate::download::ScanReport;
use crate::errors::ActionFailure;
use crate::types::Condition;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Idle,
    Running,
    Paused,
    Stopped,
    Failed,
    Completed,
}

/// One open loop: where it began and the condition to re-check at its end.
#[derive(Debug, Clone)]
pub struct LoopFrame {
    pub begin_index: usize,
    pub condition: Condition,
    pub max_iterations: Option<u32>,
    pub iterations: u32,
}

impl LoopFrame {
    pub fn bound_reached(&self) -> bool {
        self.max_iterations
            .is_some_and(|max| self.iterations >= max)
    }
}

/// Interpreter state of a single run. Never outlives the run.
#[derive(Debug)]
pub struct ExecutionState {
    pub program_counter: usize,
    pub loop_stack: Vec<LoopFrame>,
    pub task_counter: u64,
    pub last_check_result: Option<bool>,
    pub status: RunStatus,
}

impl ExecutionState {
    pub fn new() -> Self {
        Self {
            program_counter: 0,
            loop_stack: Vec::new(),
            task_counter: 0,
            last_check_result: None,
            status: RunStatus::Running,
        }
    }
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self::new()
    }
}

/// What a finished run hands back to its caller.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub config_name: String,
    pub status: RunStatus,
    pub actions_executed: u64,
    pub last_check_result: Option<bool>,
    pub failure: Option<ActionFailure>,
    pub downloads: Vec<ScanReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunReport {
    pub fn new(run_id: String, config_name: String) -> Self {
        Self {
            run_id,
            config_name,
            status: RunStatus::Running,
            actions_executed: 0,
            last_check_result: None,
            failure: None,
            downloads: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn finish(mut self, state: &ExecutionState) -> Self {
        self.status = state.status;
        self.actions_executed = state.task_counter;
        self.last_check_result = state.last_check_result;
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn with_failure(mut self, failure: ActionFailure) -> Self {
        self.failure = Some(failure);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}
