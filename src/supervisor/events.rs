//! Events delivered from the supervisor to the rendering side.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::console::ClassifiedLine;
use crate::supervisor::SupervisorState;

/// A message on the single-consumer delivery queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SupervisorEvent {
    /// Classified output, local echo, or a supervisor notice.
    Output(ClassifiedLine),
    /// The supervisor changed state.
    StateChanged {
        from: SupervisorState,
        to: SupervisorState,
    },
    /// The child exited. `expected` is true when a stop had been requested.
    Exited { code: Option<i32>, expected: bool },
}

impl SupervisorEvent {
    /// The classified line carried by this event, if any.
    #[must_use]
    pub fn as_line(&self) -> Option<&ClassifiedLine> {
        match self {
            Self::Output(line) => Some(line),
            _ => None,
        }
    }
}

/// Result of one shutdown attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownOutcome {
    pub graceful: bool,
    pub forced: bool,
}

impl ShutdownOutcome {
    /// The process exited on its own after `stop`, or was not running.
    pub const GRACEFUL: Self = Self {
        graceful: true,
        forced: false,
    };

    /// The process had to be killed.
    pub const FORCED: Self = Self {
        graceful: false,
        forced: true,
    };
}

/// Receiving end of the supervisor's event queue.
///
/// Drained by the rendering context on its own schedule.
#[derive(Debug)]
pub struct SupervisorEvents {
    rx: UnboundedReceiver<SupervisorEvent>,
}

impl SupervisorEvents {
    pub(crate) fn new(rx: UnboundedReceiver<SupervisorEvent>) -> Self {
        Self { rx }
    }

    /// Wait for the next event. Returns `None` once the supervisor is gone
    /// and the queue is empty.
    pub async fn recv(&mut self) -> Option<SupervisorEvent> {
        self.rx.recv().await
    }

    /// Take the next event if one is queued.
    pub fn try_recv(&mut self) -> Option<SupervisorEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Take every event currently queued, in delivery order.
    pub fn drain(&mut self) -> Vec<SupervisorEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Convert into a `Stream` of events.
    #[must_use]
    pub fn into_stream(self) -> UnboundedReceiverStream<SupervisorEvent> {
        UnboundedReceiverStream::new(self.rx)
    }
}
