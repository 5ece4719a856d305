use crate::control::{Mode, MAX_CONTROL_VALUE};
use crate::error::{PipelineError, Result};
use crossbeam::channel::{self, select, Receiver, Sender};
use std::thread::{self, JoinHandle};

/// Pending `set` requests buffered before posters feel backpressure
pub const SET_BUFFER: usize = 32;

/// Owner of the authoritative control value
///
/// A dedicated thread holds the value; everyone else talks to it through a
/// [`StateHandle`]. Dropping the cell stops the owner.
pub struct StateCell {
    handle: StateHandle,
    shutdown: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

/// Cheap, clonable access to a [`StateCell`]
#[derive(Debug, Clone)]
pub struct StateHandle {
    set_tx: Sender<u8>,
    get_tx: Sender<Sender<u8>>,
}

impl StateCell {
    /// Start the owner thread; the value starts at 0 (inactive)
    pub fn spawn() -> Result<Self> {
        let (set_tx, set_rx) = channel::bounded(SET_BUFFER);
        let (get_tx, get_rx) = channel::bounded(0);
        let (shutdown_tx, shutdown_rx) = channel::bounded(0);

        let worker = thread::Builder::new()
            .name("state-cell".into())
            .spawn(move || owner_loop(set_rx, get_rx, shutdown_rx))
            .map_err(|e| PipelineError::ThreadError(format!("state cell: {e}")))?;

        Ok(Self {
            handle: StateHandle { set_tx, get_tx },
            shutdown: Some(shutdown_tx),
            worker: Some(worker),
        })
    }

    pub fn handle(&self) -> StateHandle {
        self.handle.clone()
    }
}

impl Drop for StateCell {
    fn drop(&mut self) {
        drop(self.shutdown.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl StateHandle {
    /// Post a new control value
    ///
    /// Blocks only while the mailbox is full; values are applied in order and
    /// never discarded. Posting after the cell has stopped is a no-op.
    pub fn set(&self, value: u8) {
        if self.set_tx.send(value).is_err() {
            tracing::debug!(value, "control value posted after state cell stopped");
        }
    }

    /// Current raw value (never 7 or 8); 0 once the cell has stopped
    pub fn get(&self) -> u8 {
        let (reply_tx, reply_rx) = channel::bounded(1);
        if self.get_tx.send(reply_tx).is_err() {
            return 0;
        }
        reply_rx.recv().unwrap_or(0)
    }

    /// Current value decoded
    pub fn mode(&self) -> Mode {
        Mode::from_value(self.get()).unwrap_or(Mode::Inactive)
    }
}

fn owner_loop(set_rx: Receiver<u8>, get_rx: Receiver<Sender<u8>>, shutdown_rx: Receiver<()>) {
    let mut current = 0u8;
    loop {
        select! {
            recv(set_rx) -> value => match value {
                Ok(value) => apply(&mut current, value),
                Err(_) => break,
            },
            recv(get_rx) -> reply => match reply {
                Ok(reply) => {
                    // Writes already posted are applied before answering.
                    for value in set_rx.try_iter() {
                        apply(&mut current, value);
                    }
                    let _ = reply.send(current);
                }
                Err(_) => break,
            },
            recv(shutdown_rx) -> _ => break,
        }
    }
    tracing::debug!(last = current, "state cell stopped");
}

fn apply(current: &mut u8, value: u8) {
    match Mode::from_value(value) {
        Some(Mode::Keep) => {}
        Some(mode) => {
            if *current != value {
                tracing::info!(from = *current, to = value, %mode, "control value changed");
            }
            *current = value;
        }
        None => tracing::warn!(
            value,
            max = MAX_CONTROL_VALUE,
            "ignoring out-of-range control value"
        ),
    }
}
