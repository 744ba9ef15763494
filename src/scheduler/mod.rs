//! Conflict-aware scheduling of lighting programs.
//!
//! [`TaskPool`] is the generic engine: it registers running tasks,
//! preempts conflicting ones, and gates acceptance of new work.
//! [`LightScheduler`] binds the pool to a light device and adds the
//! immediate and non-disruptive start algorithms.

pub mod stack;
pub mod timer;


use crate::action::Action;
use crate::device::LightWriter;
use crate::exec::{Clock, Execution, SystemClock, TaskBody};
use crate::lights::{self, LightSet};
use crate::program::Program;
use crate::registry::{ConflictRegistry, Task};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Runs tasks of one kind, at most one per resource footprint.
///
/// Starting a task signals cancellation to every registered task that
/// conflicts with it, then registers and spawns the new one without
/// waiting for the old ones to unwind. The handoff window where both
/// briefly run is deliberate; the conflict predicate holds again as
/// soon as the cancelled bodies observe the signal.
pub struct TaskPool<T> {
    registry: Arc<ConflictRegistry<T>>,
    paused: watch::Sender<bool>,
    clock: Arc<dyn Clock>,
}

impl<T: Task> TaskPool<T> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            registry: Arc::new(ConflictRegistry::new()),
            paused,
            clock,
        }
    }

    /// Starts `task`, preempting whatever conflicts with it, and
    /// returns its execution. Blocks while the pool is paused.
    pub async fn start(&self, task: Arc<T>) -> Execution {
        self.wait_until_resumed().await;
        for conflict in self.registry.conflicts(Some(task.as_ref())) {
            conflict.cancel();
        }
        let execution = Execution::new(self.clock.clone());
        self.registry.insert(task.clone(), execution.clone());
        let registry = self.registry.clone();
        let handle = execution.clone();
        tokio::spawn(async move {
            task.run(&handle).await;
            registry.remove(&task);
            handle.finish();
        });
        execution
    }

    /// Cancels the task registered under `task_id` and waits until it
    /// has fully stopped. No-op when nothing is registered under that
    /// id, so stopping twice is harmless.
    pub async fn stop(&self, task_id: &str) {
        if let Some(execution) = self.registry.find_by_task_id(task_id) {
            execution.cancel();
            execution.done().await;
        }
    }

    /// Suspends acceptance of new work. Already-running tasks are not
    /// touched; `start` callers block until [`resume`](Self::resume).
    ///
    /// Pause and resume must be driven from a single logical owner.
    /// Calling them concurrently from different callers leaves the
    /// gate in whichever state was written last.
    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    /// Lifts a previous [`pause`](Self::pause).
    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    async fn wait_until_resumed(&self) {
        let mut gate = self.paused.subscribe();
        let _ = gate.wait_for(|paused| !paused).await;
    }

    /// The registered tasks, in start order.
    pub fn tasks(&self) -> Vec<Arc<T>> {
        self.registry.snapshot()
    }

    pub fn find(&self, task_id: &str) -> Option<Execution> {
        self.registry.find_by_task_id(task_id)
    }

    pub fn is_idle(&self) -> bool {
        self.registry.is_empty()
    }

    /// Cancels everything and waits for all of it to stop.
    pub async fn close(&self) {
        let executions = self.registry.conflicts(None);
        for execution in &executions {
            execution.cancel();
        }
        for execution in &executions {
            execution.done().await;
        }
    }
}

/// A program bound to the exact light set it runs on.
pub struct BoundProgram {
    program: Arc<Program>,
    lights: LightSet,
    device: Arc<dyn LightWriter>,
    scheduler: String,
}

impl BoundProgram {
    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    /// The lights this program occupies while it runs.
    pub fn lights(&self) -> &LightSet {
        &self.lights
    }
}

impl fmt::Display for BoundProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{}, {}, {}, {}}}",
            self.scheduler,
            self.program.id(),
            self.program.description(),
            self.lights
        )
    }
}

#[async_trait]
impl TaskBody for BoundProgram {
    async fn run(&self, execution: &Execution) {
        info!("START: {}", self);
        self.program
            .action()
            .execute(self.device.as_ref(), &self.lights, execution)
            .await;
        if let Some(err) = execution.error() {
            warn!("ERROR: {}: {}", self, err);
        } else if execution.is_cancelled() {
            info!("INTERRUPTED: {}", self);
        } else {
            info!("FINISH: {}", self);
        }
    }
}

impl Task for BoundProgram {
    fn conflicts_with(&self, other: &Self) -> bool {
        self.lights.overlaps(&other.lights)
    }

    /// Program id and light set together identify a running program.
    fn task_id(&self) -> String {
        format!("{}:{}", self.program.id(), self.lights)
    }
}

/// Executes lighting programs while ensuring that no more than one
/// program controls any given light.
pub struct LightScheduler {
    pool: TaskPool<BoundProgram>,
    device: Arc<dyn LightWriter>,
    name: String,
}

impl LightScheduler {
    pub fn new(device: Arc<dyn LightWriter>) -> Self {
        Self::with_clock("", device, Arc::new(SystemClock))
    }

    /// A named scheduler; the name shows up in the execution log.
    pub fn named(name: impl Into<String>, device: Arc<dyn LightWriter>) -> Self {
        Self::with_clock(name, device, Arc::new(SystemClock))
    }

    pub fn with_clock(
        name: impl Into<String>,
        device: Arc<dyn LightWriter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            pool: TaskPool::new(clock),
            device,
            name: name.into(),
        }
    }

    /// Starts `program` on the lights it needs out of `lights`,
    /// interrupting any running program that uses those lights.
    /// Returns `None` when the program has nothing to do.
    pub async fn start(&self, program: &Arc<Program>, lights: &LightSet) -> Option<Execution> {
        let used = program.action().used_lights(lights);
        if used.is_none() {
            return None;
        }
        Some(self.start_bound(program.clone(), used).await)
    }

    /// Like [`start`](Self::start) but never interrupts anything: the
    /// program either runs on a subset of `lights` that avoids every
    /// light currently in use, or not at all.
    ///
    /// The closure is applied twice. Reducing the candidate set can
    /// make the action claim lights outside it, so after re-applying
    /// the closure to the available lights the result must still fit
    /// inside them, or the program is refused.
    pub async fn maybe_start(
        &self,
        program: &Arc<Program>,
        lights: &LightSet,
    ) -> Option<Execution> {
        let running = self.pool.tasks();
        if running.is_empty() {
            return self.start(program, lights).await;
        }

        let needed = program.action().used_lights(lights);
        if needed.is_none() {
            return None;
        }

        // A program that needs every light can never avoid the ones
        // in use.
        if needed.is_all() {
            return None;
        }

        let mut in_use = lights::Builder::new();
        for task in &running {
            if task.lights().is_all() {
                return None;
            }
            in_use.add(task.lights());
        }

        let available = match needed.subtract(&in_use.build()) {
            Ok(available) => available,
            Err(err) => {
                warn!("Refusing program {}: {}", program, err);
                return None;
            }
        };
        if available.is_none() {
            return None;
        }

        let will_use = program.action().used_lights(&available);
        if will_use.is_none() {
            return None;
        }

        match will_use.subtract(&available) {
            Ok(spill) if spill.is_none() => {
                Some(self.start_bound(program.clone(), will_use).await)
            }
            Ok(_) => None,
            Err(err) => {
                warn!("Refusing program {}: {}", program, err);
                None
            }
        }
    }

    /// Start-and-forget, for timers and recurrences.
    pub async fn begin(&self, program: &Arc<Program>, lights: &LightSet) {
        let _ = self.start(program, lights).await;
    }

    async fn start_bound(&self, program: Arc<Program>, lights: LightSet) -> Execution {
        self.pool
            .start(Arc::new(BoundProgram {
                program,
                lights,
                device: self.device.clone(),
                scheduler: self.name.clone(),
            }))
            .await
    }

    /// The programs currently running.
    pub fn tasks(&self) -> Vec<Arc<BoundProgram>> {
        self.pool.tasks()
    }

    /// Stops the running program with the given task id and waits for
    /// it to finish. No-op when the id is not registered.
    pub async fn stop(&self, task_id: &str) {
        self.pool.stop(task_id).await;
    }

    /// See [`TaskPool::pause`] for the single-owner requirement.
    pub fn pause(&self) {
        self.pool.pause();
    }

    pub fn resume(&self) {
        self.pool.resume();
    }

    /// Interrupts every running program and waits for them to stop.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}


#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;
    use crate::device::testutil::FakeDevice;
    use std::time::Duration;

    fn scheduler() -> LightScheduler {
        LightScheduler::named("test", Arc::new(FakeDevice::new()))
    }

    fn running_ids(scheduler: &LightScheduler) -> Vec<u32> {
        scheduler
            .tasks()
            .iter()
            .map(|task| task.program().id())
            .collect()
    }

    fn running_lights(scheduler: &LightScheduler) -> Vec<String> {
        scheduler
            .tasks()
            .iter()
            .map(|task| task.lights().to_string())
            .collect()
    }

    #[tokio::test]
    async fn start_with_no_lights_does_nothing() {
        let scheduler = scheduler();
        let execution = scheduler
            .start(&program(5, Arc::new(NoLightsAction)), &LightSet::All)
            .await;
        assert!(execution.is_none());
        assert!(scheduler.tasks().is_empty());
    }

    #[tokio::test]
    async fn maybe_start_with_no_lights_does_nothing() {
        let scheduler = scheduler();
        let execution = scheduler
            .maybe_start(&program(5, Arc::new(NoLightsAction)), &LightSet::All)
            .await;
        assert!(execution.is_none());
        assert!(scheduler.tasks().is_empty());
    }

    #[tokio::test]
    async fn maybe_start_refuses_all_lights_when_busy() {
        let scheduler = scheduler();
        assert!(
            scheduler
                .maybe_start(&program(5, Arc::new(LongAction)), &LightSet::All)
                .await
                .is_some()
        );
        assert!(
            scheduler
                .maybe_start(&program(6, Arc::new(LongAction)), &LightSet::All)
                .await
                .is_none()
        );
        // The first program holds every light.
        assert!(
            scheduler
                .maybe_start(&program(7, Arc::new(LongAction)), &LightSet::new([1, 2]))
                .await
                .is_none()
        );
        assert_eq!(vec![5], running_ids(&scheduler));
    }

    #[tokio::test]
    async fn maybe_start_runs_on_reduced_subset() {
        let scheduler = scheduler();
        scheduler
            .maybe_start(&program(5, Arc::new(LongAction)), &LightSet::new([1, 2]))
            .await;
        scheduler
            .maybe_start(&program(6, Arc::new(LongAction)), &LightSet::new([2, 3]))
            .await;
        scheduler
            .maybe_start(&program(7, Arc::new(LongAction)), &LightSet::new([1, 3]))
            .await;
        scheduler
            .maybe_start(&program(8, Arc::new(LongAction)), &LightSet::All)
            .await;
        assert_eq!(vec![5, 6], running_ids(&scheduler));
        assert_eq!(vec!["1,2", "3"], running_lights(&scheduler));
    }

    #[tokio::test]
    async fn maybe_start_rejects_spill_outside_available_lights() {
        let scheduler = scheduler();
        scheduler
            .maybe_start(&program(5, Arc::new(LongAction)), &LightSet::new([1, 2]))
            .await;
        // Only light 3 is free, and the closure adds light 10, which
        // is also free: accepted on {3,10}.
        scheduler
            .maybe_start(
                &program(6, Arc::new(LongActionPlus10)),
                &LightSet::new([2, 3]),
            )
            .await;
        // Light 4 is free but the closure drags in light 10, now in
        // use: the program would spill outside its cleared lights.
        let rejected = scheduler
            .maybe_start(&program(7, Arc::new(LongActionPlus10)), &LightSet::new([4]))
            .await;
        assert!(rejected.is_none());
        assert_eq!(vec![5, 6], running_ids(&scheduler));
        assert_eq!(vec!["1,2", "3,10"], running_lights(&scheduler));
    }

    #[tokio::test]
    async fn maybe_start_refuses_closure_that_needs_everything() {
        let scheduler = scheduler();
        scheduler
            .maybe_start(&program(5, Arc::new(LongAction)), &LightSet::new([1, 2]))
            .await;
        assert!(
            scheduler
                .maybe_start(&program(6, Arc::new(LongActionAll)), &LightSet::new([3]))
                .await
                .is_none()
        );
        assert_eq!(vec![5], running_ids(&scheduler));
        assert_eq!(vec!["1,2"], running_lights(&scheduler));
    }

    #[tokio::test]
    async fn disjoint_programs_run_concurrently() {
        let scheduler = scheduler();
        let first = scheduler
            .start(&program(1, Arc::new(LongAction)), &LightSet::new([1, 2]))
            .await
            .unwrap();
        let second = scheduler
            .start(&program(2, Arc::new(LongAction)), &LightSet::new([3, 4]))
            .await
            .unwrap();
        assert!(!first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_eq!(vec![1, 2], running_ids(&scheduler));
    }

    #[tokio::test]
    async fn start_preempts_overlapping_program() {
        let scheduler = scheduler();
        let first = scheduler
            .start(&program(1, Arc::new(LongAction)), &LightSet::new([1, 2]))
            .await
            .unwrap();
        let second = scheduler
            .start(&program(2, Arc::new(LongAction)), &LightSet::new([2, 3]))
            .await
            .unwrap();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());

        // Preemption is fire-and-forget: the old program may still be
        // unwinding when start returns. Only after its done signal is
        // the registry guaranteed to have dropped it.
        first.done().await;
        assert_eq!(vec![2], running_ids(&scheduler));
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let scheduler = scheduler();
        scheduler
            .start(&program(1, Arc::new(LongAction)), &LightSet::new([1]))
            .await;
        assert_eq!(1, scheduler.tasks().len());
        scheduler.stop("1:1").await;
        assert!(scheduler.tasks().is_empty());
        scheduler.stop("1:1").await;
        scheduler.stop("no-such-task").await;
    }

    #[tokio::test]
    async fn pause_gates_new_work_only() {
        let scheduler = Arc::new(scheduler());
        let running = scheduler
            .start(&program(1, Arc::new(LongAction)), &LightSet::new([1]))
            .await
            .unwrap();
        scheduler.pause();
        assert!(!running.is_cancelled());

        let gated = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                scheduler
                    .start(&program(2, Arc::new(LongAction)), &LightSet::new([2]))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(vec![1], running_ids(&scheduler));

        scheduler.resume();
        gated.await.unwrap();
        assert_eq!(vec![1, 2], running_ids(&scheduler));
    }

    #[tokio::test]
    async fn maybe_start_never_overlaps_running_lights() {
        let scheduler = scheduler();
        let mut seed: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };

        for round in 0..100u32 {
            let count = (next() % 3 + 1) as usize;
            let requested =
                LightSet::new((0..count).map(|_| (next() % 12 + 1) as u32).collect::<Vec<_>>());
            let action: Arc<dyn Action> = if next() % 4 == 0 {
                Arc::new(LongActionPlus10)
            } else {
                Arc::new(LongAction)
            };
            scheduler
                .maybe_start(&program(100 + round, action), &requested)
                .await;

            let tasks = scheduler.tasks();
            for i in 0..tasks.len() {
                for j in 0..i {
                    assert!(
                        !tasks[i].lights().overlaps(tasks[j].lights()),
                        "{} overlaps {} after requesting {}",
                        tasks[i].lights(),
                        tasks[j].lights(),
                        requested
                    );
                }
            }
        }
    }

    #[tokio::test]
    async fn close_stops_everything() {
        let scheduler = scheduler();
        scheduler
            .start(&program(1, Arc::new(LongAction)), &LightSet::new([1]))
            .await;
        scheduler
            .start(&program(2, Arc::new(LongAction)), &LightSet::new([2]))
            .await;
        scheduler.close().await;
        assert!(scheduler.tasks().is_empty());
    }

    #[tokio::test]
    async fn task_id_combines_program_and_lights() {
        let scheduler = scheduler();
        scheduler
            .start(&program(17, Arc::new(LongAction)), &LightSet::new([1, 3]))
            .await;
        let tasks = scheduler.tasks();
        assert_eq!("17:1,3", tasks[0].task_id());
    }
}
