use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Pause,
    Resume,
    Stop,
}

/// Sending side of the control channel, handed to hotkey listeners and the
/// like. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: UnboundedSender<ControlCommand>,
}

impl ControlHandle {
    /// Returns `false` once the engine side is gone.
    pub fn send(&self, command: ControlCommand) -> bool {
        self.tx.send(command).is_ok()
    }

    pub fn pause(&self) -> bool {
        self.send(ControlCommand::Pause)
    }

    pub fn resume(&self) -> bool {
        self.send(ControlCommand::Resume)
    }

    pub fn stop(&self) -> bool {
        self.send(ControlCommand::Stop)
    }
}

/// Where the engine stands after draining pending commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Run,
    Paused,
    Stop,
}

#[derive(Debug)]
pub struct ControlReceiver {
    rx: UnboundedReceiver<ControlCommand>,
    paused: bool,
    stopped: bool,
}

pub fn control_channel() -> (ControlHandle, ControlReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ControlHandle { tx },
        ControlReceiver {
            rx,
            paused: false,
            stopped: false,
        },
    )
}

impl ControlReceiver {
    /// Clears pause/stop flags left over from a previous run. Commands still
    /// queued are kept and apply at the next checkpoint.
    pub fn reset(&mut self) {
        self.paused = false;
        self.stopped = false;
    }

    fn apply(&mut self, command: ControlCommand) {
        debug!(?command, "control command received");
        match command {
            ControlCommand::Pause => self.paused = true,
            ControlCommand::Resume => self.paused = false,
            ControlCommand::Stop => self.stopped = true,
        }
    }

    fn signal(&self) -> Signal {
        if self.stopped {
            Signal::Stop
        } else if self.paused {
            Signal::Paused
        } else {
            Signal::Run
        }
    }

    /// Applies every queued command without waiting.
    pub fn poll(&mut self) -> Signal {
        loop {
            match self.rx.try_recv() {
                Ok(command) => self.apply(command),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        self.signal()
    }

    /// Waits for the next command. A closed channel while paused can never
    /// be resumed, so it reads as a stop.
    pub async fn wait(&mut self) -> Signal {
        match self.rx.recv().await {
            Some(command) => {
                self.apply(command);
                self.poll()
            }
            None => {
                self.stopped = true;
                Signal::Stop
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands_apply_in_order() {
        let (handle, mut rx) = control_channel();
        assert_eq!(rx.poll(), Signal::Run);

        handle.pause();
        assert_eq!(rx.poll(), Signal::Paused);

        handle.resume();
        assert_eq!(rx.poll(), Signal::Run);

        handle.pause();
        handle.stop();
        assert_eq!(rx.poll(), Signal::Stop);

        rx.reset();
        assert_eq!(rx.poll(), Signal::Run);
    }

    #[test]
    fn test_wait_on_closed_channel_stops() {
        let (handle, mut rx) = control_channel();
        handle.pause();
        assert_eq!(rx.poll(), Signal::Paused);
        drop(handle);
        assert_eq!(tokio_test::block_on(rx.wait()), Signal::Stop);
    }
}
