use std::sync::Arc;
use std::sync::Mutex;

use tracing::{error, warn};

use crate::store::Store;
use crate::types::{MessageRecord, StepRecord, StepStatus};

/// In-memory accumulator for one turn's not-yet-persisted messages and
/// steps (§4.8 "no database write happens inside the delta loop").
#[derive(Default)]
pub struct TurnBuffer {
    messages: Mutex<Vec<MessageRecord>>,
    steps: Mutex<Vec<StepRecord>>,
}

impl TurnBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_message(&self, record: MessageRecord) {
        self.messages.lock().unwrap().push(record);
    }

    pub fn push_step(&self, step: StepRecord) {
        self.steps.lock().unwrap().push(step);
    }

    /// Mutate the most recently pushed step matching `step_id`, typically
    /// to transition it out of `running` before commit.
    pub fn update_step_status(&self, step_id: &str, status: StepStatus) {
        let mut steps = self.steps.lock().unwrap();
        if let Some(step) = steps.iter_mut().rev().find(|s| s.step_id == step_id) {
            step.status = status;
        }
    }

    fn take(&self) -> (Vec<MessageRecord>, Vec<StepRecord>) {
        (std::mem::take(&mut *self.messages.lock().unwrap()), std::mem::take(&mut *self.steps.lock().unwrap()))
    }
}

/// Exit reason driving which terminal status `running` steps are stamped
/// with (§4.8 write-2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Completed,
    Cancelled,
    Failed,
}

impl ExitReason {
    fn terminal_status(self) -> StepStatus {
        match self {
            ExitReason::Completed => StepStatus::Completed,
            ExitReason::Cancelled => StepStatus::Interrupted,
            ExitReason::Failed => StepStatus::Failed,
        }
    }
}

/// Runs write-2 exactly once, regardless of how the turn ends.
///
/// Rust has no `finally`; this is the idiomatic substitute — callers await
/// [`TurnWriteGuard::finish`] on every normal exit path. `finish` is async
/// (it needs the store), so a panic unwinding through the turn body before
/// `finish` runs can't be caught by an async `Drop` — `Drop::drop` is
/// synchronous. To still honor the "runs regardless of panic" guarantee,
/// `Drop` takes whatever was buffered and hands it to a detached `tokio::spawn`
/// task that performs the commit itself; any `running` steps are stamped
/// `failed` since a panic is not a clean exit. This only fires if `finish`
/// was never called — the normal path disarms it.
pub struct TurnWriteGuard {
    store: Arc<dyn Store>,
    chat_id: String,
    buffer: Arc<TurnBuffer>,
    done: bool,
}

impl TurnWriteGuard {
    pub fn new(store: Arc<dyn Store>, chat_id: impl Into<String>, buffer: Arc<TurnBuffer>) -> Self {
        Self { store, chat_id: chat_id.into(), buffer, done: false }
    }

    /// Stamp any still-`running` steps with `reason`'s terminal status and
    /// commit everything buffered so far (§4.8 write-2). Safe to call at
    /// most once; subsequent calls are no-ops.
    pub async fn finish(&mut self, reason: ExitReason) {
        if self.done {
            return;
        }
        self.done = true;

        let terminal = reason.terminal_status();
        let (messages, mut steps) = self.buffer.take();
        for step in &mut steps {
            if step.status == StepStatus::Running {
                step.status = terminal;
            }
        }

        if let Err(e) = self.store.commit_turn(&self.chat_id, messages, steps).await {
            error!(chat_id = %self.chat_id, error = %e, "write-2 failed");
        }
    }
}

impl Drop for TurnWriteGuard {
    fn drop(&mut self) {
        if self.done {
            return;
        }

        let (messages, mut steps) = self.buffer.take();
        if messages.is_empty() && steps.is_empty() {
            return;
        }
        for step in &mut steps {
            if step.status == StepStatus::Running {
                step.status = StepStatus::Failed;
            }
        }

        warn!(chat_id = %self.chat_id, "turn write guard dropped without finish(); flushing buffered writes via a detached commit");
        let store = self.store.clone();
        let chat_id = self.chat_id.clone();
        tokio::spawn(async move {
            if let Err(e) = store.commit_turn(&chat_id, messages, steps).await {
                error!(chat_id = %chat_id, error = %e, "write-2 failed during drop-time flush");
            }
        });
    }
}
