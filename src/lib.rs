// Core modules
pub mod action;
pub mod config;
pub mod device;
pub mod exec;
pub mod lights;
pub mod program;
pub mod registry;
pub mod recurring;
pub mod store;

// Scheduling engine
pub mod scheduler;

// Re-export key types and functions
pub use action::{Action, StaticAction, blink};
pub use config::{OrchestratorConfig, resolve_config_path};
pub use device::{
    Color, ColorBrightness, LightColors, LightDevice, LightProperties, LightReader, LightWriter,
    restore, snapshot,
};
pub use exec::{Clock, Execution, ManualClock, SystemClock, TaskBody, spawn_body};
pub use lights::{LightMap, LightSet, LightSetError};
pub use program::Program;
pub use recurring::{
    BackgroundRunner, DailyAt, Recurrence, RecurringProgram, ScheduledProgram, future_time,
};
pub use registry::{ConflictRegistry, Task};
pub use scheduler::stack::ContextStack;
pub use scheduler::timer::{TimedProgram, TimedScheduler};
pub use scheduler::{BoundProgram, LightScheduler, TaskPool};
pub use store::{
    ActionDecoder, JsonFileStore, MemoryStore, NullStore, ScheduleStore, StaticActionDecoder,
    StoredSchedule,
};

use std::sync::Arc;

/// The standard deployment: a base scheduler for the regular
/// programming, an extra scheduler reachable through the context
/// stack, and a timed scheduler firing into base.
pub struct Conductor {
    stack: ContextStack,
    timer: TimedScheduler,
}

impl Conductor {
    pub fn base(&self) -> &Arc<LightScheduler> {
        self.stack.base()
    }

    pub fn extra(&self) -> &Arc<LightScheduler> {
        self.stack.extra()
    }

    pub fn stack(&self) -> &ContextStack {
        &self.stack
    }

    pub fn timer(&self) -> &TimedScheduler {
        &self.timer
    }

    /// Interrupts every running program and waits for them to stop.
    /// Pending timed schedules are left persisted for the next start.
    pub async fn shutdown(&self) {
        self.base().close().await;
        self.extra().close().await;
    }
}

/// Convenience function to wire up a fully configured [`Conductor`].
///
/// Builds base and extra schedulers over `device`, stacks them over
/// `all_lights`, and recovers previously persisted schedules from
/// `store` into a timed scheduler targeting base.
pub async fn create_conductor<D>(
    device: Arc<D>,
    store: Arc<dyn ScheduleStore>,
    decoder: Arc<dyn ActionDecoder>,
    all_lights: LightSet,
) -> Conductor
where
    D: LightDevice + 'static,
{
    let writer: Arc<dyn LightWriter> = device.clone();
    let base = Arc::new(LightScheduler::named("base", writer.clone()));
    let extra = Arc::new(LightScheduler::named("extra", writer));
    let stack = ContextStack::new(base.clone(), extra, device, all_lights);
    let timer =
        TimedScheduler::with_store(base, store, decoder, "base", Arc::new(SystemClock)).await;
    Conductor { stack, timer }
}
