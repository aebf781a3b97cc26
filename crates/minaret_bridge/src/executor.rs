//! The host-side command executor.
//!
//! Network tasks never touch host state directly. Every backend-affecting
//! action is packaged as a [`HostTask`] and submitted through a
//! [`HostExecutor`]; the host drains the matching [`HostQueue`] on its own
//! thread, either once per tick with [`HostQueue::run_pending`] or on a
//! dedicated thread via [`HostExecutor::spawn`]. Tasks run strictly in
//! submission order and one at a time.

use crate::error::ServerError;
use crate::json::{Map, Value};
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// A unit of work executed on the host thread.
pub type HostTask = Box<dyn FnOnce(&mut dyn HostBackend) + Send + 'static>;

/// Failures reported by a [`HostBackend`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The command could not be parsed by the host.
    #[error("{0}")]
    Syntax(String),
    /// The host accepted the request but failed to carry it out.
    #[error("{}", .0.as_deref().unwrap_or("Backend operation failed"))]
    Failed(Option<String>),
    /// The backend panicked while handling the request.
    #[error("Backend panicked")]
    Panicked,
}

impl BackendError {
    /// The host-provided message, if any.
    pub fn message(&self) -> Option<&str> {
        match self {
            BackendError::Syntax(message) => Some(message),
            BackendError::Failed(message) => message.as_deref(),
            BackendError::Panicked => None,
        }
    }
}

/// An active status effect on a player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectInstance {
    /// Registered effect name, e.g. `minecraft:speed`.
    pub effect: String,
    /// Remaining ticks, `None` for an infinite effect.
    pub duration: Option<u32>,
    pub amplifier: i32,
}

impl EffectInstance {
    pub fn new(effect: impl Into<String>, duration: Option<u32>, amplifier: i32) -> Self {
        Self {
            effect: effect.into(),
            duration,
            amplifier,
        }
    }

    /// Renders `{effect, duration, amplifier}` with `duration = -1` for
    /// infinite effects.
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert("effect", self.effect.as_str());
        object.insert("duration", self.duration.map_or(-1, i64::from));
        object.insert("amplifier", self.amplifier);
        Value::Object(object)
    }
}

/// The domain side of the bridge, implemented by the embedding host.
///
/// All methods are invoked on the host thread only.
pub trait HostBackend {
    /// Shows a pre-formatted chat line to every player.
    fn broadcast_chat(&mut self, line: &str);

    /// Executes a command with suppressed output and elevated privilege.
    ///
    /// # Returns
    ///
    /// The host's numeric result. Values `<= 0` mean the command had no
    /// effect.
    fn execute_command(&mut self, command: &str) -> Result<i32, BackendError>;

    /// Lists the active effects of a player, `None` if no such player is
    /// online.
    fn active_effects(&self, player: &str) -> Result<Option<Vec<EffectInstance>>, BackendError>;
}

/// Runs a backend call, converting a panic into [`BackendError::Panicked`].
pub fn guarded<T>(call: impl FnOnce() -> Result<T, BackendError>) -> Result<T, BackendError> {
    panic::catch_unwind(AssertUnwindSafe(call)).unwrap_or(Err(BackendError::Panicked))
}

/// Cloneable handle used to submit work to the host thread.
#[derive(Clone, Debug)]
pub struct HostExecutor {
    sender: mpsc::UnboundedSender<HostTask>,
}

/// The receiving end of a [`HostExecutor`], owned by the host.
#[derive(Debug)]
pub struct HostQueue {
    receiver: mpsc::UnboundedReceiver<HostTask>,
}

impl HostExecutor {
    /// Creates a connected executor/queue pair.
    pub fn channel() -> (Self, HostQueue) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, HostQueue { receiver })
    }

    /// Runs `backend` on a dedicated OS thread named `minaret-host`.
    ///
    /// The thread exits, handing the backend back through the join handle,
    /// once every clone of the returned executor has been dropped.
    pub fn spawn<B>(backend: B) -> Result<(Self, JoinHandle<B>), ServerError>
    where
        B: HostBackend + Send + 'static,
    {
        let (executor, queue) = Self::channel();
        let handle = queue.spawn(backend)?;
        Ok((executor, handle))
    }

    /// Queues `task` for the host thread. Never blocks.
    ///
    /// # Errors
    ///
    /// [`ServerError::ExecutorClosed`] if the queue has been dropped.
    pub fn submit<F>(&self, task: F) -> Result<(), ServerError>
    where
        F: FnOnce(&mut dyn HostBackend) + Send + 'static,
    {
        self.sender
            .send(Box::new(task))
            .map_err(|_| ServerError::ExecutorClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl HostQueue {
    /// Runs every task queued so far and returns how many ran.
    pub fn run_pending(&mut self, backend: &mut dyn HostBackend) -> usize {
        let mut executed = 0;
        while let Ok(task) = self.receiver.try_recv() {
            run_task(task, backend);
            executed += 1;
        }
        executed
    }

    /// Runs this queue on a dedicated OS thread named `minaret-host`.
    ///
    /// Useful when the backend needs something that only exists once an
    /// executor has been handed out, such as a server's broadcaster.
    pub fn spawn<B>(self, backend: B) -> Result<JoinHandle<B>, ServerError>
    where
        B: HostBackend + Send + 'static,
    {
        thread::Builder::new()
            .name("minaret-host".to_string())
            .spawn(move || self.run(backend))
            .map_err(|e| ServerError::Internal(format!("Failed to spawn host thread: {e}")))
    }

    /// Blocks the calling thread, running tasks until every submitter is
    /// gone. Must not be called from inside an async runtime.
    pub fn run<B: HostBackend>(mut self, mut backend: B) -> B {
        debug!("🧵 Host executor started");
        while let Some(task) = self.receiver.blocking_recv() {
            run_task(task, &mut backend);
        }
        debug!("🧵 Host executor finished");
        backend
    }
}

fn run_task(task: HostTask, backend: &mut dyn HostBackend) {
    if panic::catch_unwind(AssertUnwindSafe(|| task(backend))).is_err() {
        error!("💥 Host task panicked; executor continues");
    }
}
