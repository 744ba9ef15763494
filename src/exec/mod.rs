//! The execution primitive.
//!
//! An [`Execution`] is the handle for one running unit of work. It
//! carries the cancellation signal, the completion signal, an error
//! slot, and clock access. Cancellation is cooperative: a task body
//! observes it through [`Execution::sleep`] (or explicitly) and
//! returns; nothing preempts the body.

use anyhow::Error;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// Current-time access, injectable for deterministic tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The wall clock.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. For tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// A runnable unit of work.
#[async_trait]
pub trait TaskBody: Send + Sync + 'static {
    async fn run(&self, execution: &Execution);
}

/// Handle for one running or scheduled task instance. Cloning yields
/// another handle to the same instance.
#[derive(Clone)]
pub struct Execution {
    inner: Arc<ExecutionInner>,
}

struct ExecutionInner {
    cancel: watch::Sender<bool>,
    done: watch::Sender<bool>,
    clock: Arc<dyn Clock>,
    error: Mutex<Option<Arc<Error>>>,
}

impl Execution {
    pub(crate) fn new(clock: Arc<dyn Clock>) -> Self {
        let (cancel, _) = watch::channel(false);
        let (done, _) = watch::channel(false);
        Self {
            inner: Arc::new(ExecutionInner {
                cancel,
                done,
                clock,
                error: Mutex::new(None),
            }),
        }
    }

    /// Requests that the task stop. Idempotent; the task keeps
    /// running until its body observes the signal and returns.
    pub fn cancel(&self) {
        self.inner.cancel.send_replace(true);
    }

    /// True once cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancel.borrow()
    }

    /// Resolves when cancellation is requested. Resolves immediately
    /// if it already was.
    pub async fn cancelled(&self) {
        let mut rx = self.inner.cancel.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Resolves once the task has fully stopped.
    pub async fn done(&self) {
        let mut rx = self.inner.done.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    /// True once the task has fully stopped.
    pub fn is_done(&self) -> bool {
        *self.inner.done.borrow()
    }

    /// The current time according to this execution's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// Sleeps for `duration`, returning early when cancellation is
    /// requested. Returns true if the full duration elapsed. Task
    /// bodies are expected to route their waiting through here so
    /// cancellation is observed at bounded intervals.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.cancelled() => false,
        }
    }

    /// Records an error from the task body. A later error replaces an
    /// earlier one.
    pub fn set_error(&self, err: Error) {
        *self.inner.error.lock().unwrap() = Some(Arc::new(err));
    }

    /// The most recently recorded error, if any.
    pub fn error(&self) -> Option<Arc<Error>> {
        self.inner.error.lock().unwrap().clone()
    }

    pub(crate) fn finish(&self) {
        self.inner.done.send_replace(true);
    }
}

/// Runs `body` on the runtime and returns its execution handle.
pub fn spawn_body(clock: Arc<dyn Clock>, body: Arc<dyn TaskBody>) -> Execution {
    let execution = Execution::new(clock);
    let handle = execution.clone();
    tokio::spawn(async move {
        body.run(&handle).await;
        handle.finish();
    });
    execution
}
