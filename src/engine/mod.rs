pub mod control;
pub mod executor;
pub mod state;

pub use control::{control_channel, ControlCommand, ControlHandle, ControlReceiver, Signal};
pub use executor::ExecutionEngine;
pub use state::{ExecutionState, LoopFrame, RunReport, RunStatus};
