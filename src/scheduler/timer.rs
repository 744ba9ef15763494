//! One-shot scheduling of programs at a wall-clock time.

use crate::exec::{Clock, Execution, SystemClock, TaskBody};
use crate::lights::LightSet;
use crate::program::Program;
use crate::registry::Task;
use crate::scheduler::{LightScheduler, TaskPool};
use crate::store::{ActionDecoder, NullStore, ScheduleStore, StoredSchedule};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

/// Derives the id a schedule is registered and persisted under.
fn derive_schedule_id(program_id: u32, fire_time: DateTime<Utc>, lights: &LightSet) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}:{}", program_id, fire_time.timestamp(), lights).as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// A program bound to a light set, waiting for its fire time.
pub struct TimedProgram {
    program: Arc<Program>,
    lights: LightSet,
    fire_time: DateTime<Utc>,
    schedule_id: String,
    target: Arc<LightScheduler>,
    store: Arc<dyn ScheduleStore>,
    group: String,
}

impl TimedProgram {
    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    pub fn lights(&self) -> &LightSet {
        &self.lights
    }

    pub fn fire_time(&self) -> DateTime<Utc> {
        self.fire_time
    }

    pub fn schedule_id(&self) -> &str {
        &self.schedule_id
    }

    /// Time remaining until this program fires. Negative once the
    /// fire time has passed.
    pub fn time_left(&self, now: DateTime<Utc>) -> TimeDelta {
        self.fire_time - now
    }

    /// The time left as `m:ss` or `h:mm:ss`, padded by one second so
    /// a freshly scheduled task displays its full delay.
    pub fn time_left_str(&self, now: DateTime<Utc>) -> String {
        let mut left = self.time_left(now) + TimeDelta::seconds(1);
        if left < TimeDelta::zero() {
            left = TimeDelta::zero();
        }
        let total = left.num_seconds();
        let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
        if hours > 0 {
            format!("{}:{:02}:{:02}", hours, minutes, seconds)
        } else {
            format!("{}:{:02}", minutes, seconds)
        }
    }
}

impl fmt::Display for TimedProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{}, {}, {}}}",
            self.program.id(),
            self.lights,
            self.fire_time
        )
    }
}

#[async_trait]
impl TaskBody for TimedProgram {
    async fn run(&self, execution: &Execution) {
        let delay = (self.fire_time - execution.now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        // A fire time in the past fires right away.
        let fire = if delay > Duration::ZERO {
            execution.sleep(delay).await
        } else {
            !execution.is_cancelled()
        };
        if fire {
            self.target.begin(&self.program, &self.lights).await;
        }
        // Fired, cancelled or not, the persisted record is spent.
        if let Err(err) = self.store.remove_entry(&self.group, &self.schedule_id).await {
            error!("Failed to remove schedule {}: {}", self.schedule_id, err);
        }
    }
}

impl Task for TimedProgram {
    /// Two timed programs conflict when they would fire in the same
    /// second over overlapping lights. Different fire times never
    /// conflict, even over identical lights.
    fn conflicts_with(&self, other: &Self) -> bool {
        self.fire_time.timestamp() == other.fire_time.timestamp()
            && self.lights.overlaps(&other.lights)
    }

    fn task_id(&self) -> String {
        self.schedule_id.clone()
    }
}

/// Schedules programs to start at a wall-clock time, persisting the
/// pending schedules through a pluggable store.
pub struct TimedScheduler {
    pool: TaskPool<TimedProgram>,
    target: Arc<LightScheduler>,
    store: Arc<dyn ScheduleStore>,
    group: String,
}

impl TimedScheduler {
    /// A scheduler that forgets its schedules on shutdown.
    pub fn new(target: Arc<LightScheduler>) -> Self {
        Self {
            pool: TaskPool::new(Arc::new(SystemClock)),
            target,
            store: Arc::new(NullStore),
            group: String::new(),
        }
    }

    /// A scheduler backed by `store`, scoped to `group`. Previously
    /// persisted entries are re-armed as if they had just been
    /// scheduled; entries whose action no longer decodes are removed
    /// from the store as stale.
    pub async fn with_store(
        target: Arc<LightScheduler>,
        store: Arc<dyn ScheduleStore>,
        decoder: Arc<dyn ActionDecoder>,
        group: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let scheduler = Self {
            pool: TaskPool::new(clock),
            target,
            store,
            group: group.into(),
        };
        match scheduler.store.list_entries(&scheduler.group).await {
            Ok(entries) => {
                for entry in entries {
                    match decoder.decode(entry.program_id, &entry.action) {
                        Ok(action) => {
                            let program = Arc::new(Program::new(
                                entry.program_id,
                                entry.description.clone(),
                                action,
                            ));
                            // Already persisted; arm without re-adding.
                            scheduler
                                .arm(program, entry.lights, entry.fire_time, entry.schedule_id)
                                .await;
                        }
                        Err(err) => {
                            warn!("Removing stale schedule {}: {}", entry.schedule_id, err);
                            if let Err(err) = scheduler
                                .store
                                .remove_entry(&scheduler.group, &entry.schedule_id)
                                .await
                            {
                                error!(
                                    "Failed to remove stale schedule {}: {}",
                                    entry.schedule_id, err
                                );
                            }
                        }
                    }
                }
            }
            Err(err) => {
                error!(
                    "Failed to list schedules for group {:?}: {}",
                    scheduler.group, err
                );
            }
        }
        scheduler
    }

    /// Schedules `program` to start at `fire_time` on the lights it
    /// needs out of `lights`. Returns the schedule id, or `None` when
    /// the program has nothing to do. A schedule that conflicts with
    /// a pending one (same fire second, overlapping lights) replaces
    /// it.
    pub async fn schedule(
        &self,
        program: &Arc<Program>,
        lights: &LightSet,
        fire_time: DateTime<Utc>,
    ) -> Option<String> {
        let used = program.action().used_lights(lights);
        if used.is_none() {
            return None;
        }
        let schedule_id = derive_schedule_id(program.id(), fire_time, &used);
        let entry = StoredSchedule {
            group: self.group.clone(),
            schedule_id: schedule_id.clone(),
            program_id: program.id(),
            description: program.description().to_string(),
            lights: used.clone(),
            fire_time,
            action: program.action().encode(),
        };
        self.arm(program.clone(), used, fire_time, schedule_id.clone())
            .await;
        if let Err(err) = self.store.add_entry(&entry).await {
            error!("Failed to persist schedule {}: {}", schedule_id, err);
        }
        Some(schedule_id)
    }

    async fn arm(
        &self,
        program: Arc<Program>,
        lights: LightSet,
        fire_time: DateTime<Utc>,
        schedule_id: String,
    ) {
        self.pool
            .start(Arc::new(TimedProgram {
                program,
                lights,
                fire_time,
                schedule_id,
                target: self.target.clone(),
                store: self.store.clone(),
                group: self.group.clone(),
            }))
            .await;
    }

    /// The schedules still waiting to fire.
    pub fn scheduled(&self) -> Vec<Arc<TimedProgram>> {
        self.pool.tasks()
    }

    /// The execution controlling a pending schedule.
    pub fn find_by_schedule_id(&self, schedule_id: &str) -> Option<Execution> {
        self.pool.find(schedule_id)
    }

    /// Cancels a pending schedule and waits for its teardown, which
    /// includes removal of the persisted record. No-op for ids that
    /// are unknown or already finished.
    pub async fn cancel(&self, schedule_id: &str) {
        self.pool.stop(schedule_id).await;
    }
}
