//! Per-task execution context: cancellation and deadline.

use crate::{CancelToken, ToolCommand};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Why a task stopped before finishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Interrupted {
    /// The batch was cancelled.
    #[error("cancelled")]
    Cancelled,
    /// The task ran past its deadline.
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation and deadline shared by every step of one task.
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    cancel: CancelToken,
    deadline: Option<Instant>,
}

impl TaskContext {
    /// A context bound to a batch token and an optional deadline.
    pub fn new(cancel: CancelToken, deadline: Option<Instant>) -> Self {
        Self { cancel, deadline }
    }

    /// A context that is never cancelled and never expires.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// A context expiring `timeout` from now.
    pub fn with_timeout(cancel: CancelToken, timeout: Duration) -> Self {
        Self::new(cancel, Some(Instant::now() + timeout))
    }

    /// The batch cancellation token.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// The task deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fail if the task was cancelled or its deadline has passed.
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.cancel.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(Interrupted::DeadlineExceeded);
        }
        Ok(())
    }

    /// An external command bound to this context's deadline and token.
    pub fn tool(&self, program: impl Into<String>) -> ToolCommand {
        ToolCommand::new(program)
            .deadline(self.deadline)
            .cancel_token(&self.cancel)
    }
}
