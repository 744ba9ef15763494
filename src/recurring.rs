//! Recurring programs and background running.

use crate::exec::{Clock, Execution, TaskBody, spawn_body};
use crate::lights::LightSet;
use crate::program::Program;
use crate::scheduler::LightScheduler;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::{Arc, Mutex};

/// When something should happen next.
pub trait Recurrence: Send + Sync {
    /// The first occurrence strictly after `now`.
    fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc>;
}

/// Recurs once a day at a fixed hour and minute.
#[derive(Debug, Clone, Copy)]
pub struct DailyAt {
    hour: u32,
    minute: u32,
}

impl DailyAt {
    pub fn new(hour: u32, minute: u32) -> Self {
        assert!(hour < 24 && minute < 60, "not a time of day");
        Self { hour, minute }
    }
}

impl Recurrence for DailyAt {
    fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let candidate = now
            .date_naive()
            .and_hms_opt(self.hour, self.minute, 0)
            .expect("validated in DailyAt::new")
            .and_utc();
        if candidate > now {
            candidate
        } else {
            candidate + TimeDelta::days(1)
        }
    }
}

/// The closest hour:minute strictly after `now`.
pub fn future_time(now: DateTime<Utc>, hour: u32, minute: u32) -> DateTime<Utc> {
    DailyAt::new(hour, minute).next_after(now)
}

/// Runs a single task in the background, at most one instance at a
/// time. Safe to share between threads.
pub struct BackgroundRunner {
    body: Arc<dyn TaskBody>,
    clock: Arc<dyn Clock>,
    current: Mutex<Option<Execution>>,
}

impl BackgroundRunner {
    pub fn new(body: Arc<dyn TaskBody>, clock: Arc<dyn Clock>) -> Self {
        Self {
            body,
            clock,
            current: Mutex::new(None),
        }
    }

    /// True while the task is running.
    pub fn is_enabled(&self) -> bool {
        self.current
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|execution| !execution.is_done())
    }

    /// Starts the task. No-op when it is already running.
    pub fn enable(&self) {
        let mut current = self.current.lock().unwrap();
        if current.as_ref().is_some_and(|execution| !execution.is_done()) {
            return;
        }
        *current = Some(spawn_body(self.clock.clone(), self.body.clone()));
    }

    /// Stops the task and waits for it to finish.
    pub async fn disable(&self) {
        let execution = self.current.lock().unwrap().clone();
        if let Some(execution) = execution {
            execution.cancel();
            execution.done().await;
        }
    }
}

/// A task body that fires a program on every occurrence of a
/// recurrence. High-priority programs go through the preempting start
/// path; the rest go through the non-disruptive one.
pub struct RecurringProgram {
    program: Arc<Program>,
    lights: LightSet,
    recurrence: Arc<dyn Recurrence>,
    scheduler: Arc<LightScheduler>,
    high_priority: bool,
}

impl RecurringProgram {
    pub fn new(
        program: Arc<Program>,
        lights: LightSet,
        recurrence: Arc<dyn Recurrence>,
        scheduler: Arc<LightScheduler>,
        high_priority: bool,
    ) -> Self {
        Self {
            program,
            lights,
            recurrence,
            scheduler,
            high_priority,
        }
    }
}

#[async_trait]
impl TaskBody for RecurringProgram {
    async fn run(&self, execution: &Execution) {
        loop {
            let next = self.recurrence.next_after(execution.now());
            let delay = (next - execution.now()).to_std().unwrap_or_default();
            if !execution.sleep(delay).await {
                return;
            }
            if self.high_priority {
                self.scheduler.begin(&self.program, &self.lights).await;
            } else {
                self.scheduler.maybe_start(&self.program, &self.lights).await;
            }
        }
    }
}

/// A recurring program with its identity and on/off switch.
pub struct ScheduledProgram {
    id: u32,
    description: String,
    lights: LightSet,
    high_priority: bool,
    runner: BackgroundRunner,
}

impl ScheduledProgram {
    pub fn new(
        id: u32,
        program: Arc<Program>,
        lights: LightSet,
        recurrence: Arc<dyn Recurrence>,
        high_priority: bool,
        scheduler: Arc<LightScheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let body = Arc::new(RecurringProgram::new(
            program.clone(),
            lights.clone(),
            recurrence,
            scheduler,
            high_priority,
        ));
        Self {
            id,
            description: program.description().to_string(),
            lights,
            high_priority,
            runner: BackgroundRunner::new(body, clock),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn lights(&self) -> &LightSet {
        &self.lights
    }

    pub fn high_priority(&self) -> bool {
        self.high_priority
    }

    pub fn is_enabled(&self) -> bool {
        self.runner.is_enabled()
    }

    pub fn enable(&self) {
        self.runner.enable();
    }

    pub async fn disable(&self) {
        self.runner.disable().await;
    }
}
