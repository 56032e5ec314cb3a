//! Cron scheduler over persistent tasks
//!
//! A tick thread (cadence well under the one-minute cron granularity)
//! asks the clock for "now", advances `next_run_at` for every due task
//! and dispatches it onto a bounded pool. Runs of the same task
//! serialize: while one is executing, the next request parks in a
//! single queue slot and a third is refused with `TaskBusy`. Manual
//! triggers go through exactly the same dispatch path.
//!
//! The clock is a seam so tests drive the schedule with a fake; cron
//! evaluation itself never reads wall time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use qualscan_core::task::{Execution, Task};
use qualscan_core::{QualscanError, Result};

use crate::cron_expr::CronExpr;
use crate::store::{ExecutionStore, TaskStore};

/// Time source seam
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for tests
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn starting_at(now: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self { now: Mutex::new(now) })
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Executes one task run, filling the execution's tallies
pub trait TaskRunner: Send + Sync {
    fn run(&self, task: &Task, execution: &mut Execution) -> Result<()>;
}

impl<F> TaskRunner for F
where
    F: Fn(&Task, &mut Execution) -> Result<()> + Send + Sync,
{
    fn run(&self, task: &Task, execution: &mut Execution) -> Result<()> {
        self(task, execution)
    }
}

/// What dispatch did with a run request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// A new execution started; its id is returned
    Started(String),
    /// A run is in flight; this request waits in the single queue slot
    Queued,
}

#[derive(Default)]
struct TaskRuntime {
    running: bool,
    queued: bool,
}

pub struct Scheduler {
    tasks: Arc<TaskStore>,
    executions: Arc<ExecutionStore>,
    runner: Arc<dyn TaskRunner>,
    clock: Arc<dyn Clock>,
    pool: rayon::ThreadPool,
    runtime: Mutex<HashMap<String, TaskRuntime>>,
    stop: AtomicBool,
    tick_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        tasks: Arc<TaskStore>,
        executions: Arc<ExecutionStore>,
        runner: Arc<dyn TaskRunner>,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>> {
        let workers = num_cpus::get().max(2);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("qs-sched-{}", i))
            .build()
            .map_err(|e| QualscanError::Internal(format!("scheduler pool: {}", e)))?;
        Ok(Arc::new(Self {
            tasks,
            executions,
            runner,
            clock,
            pool,
            runtime: Mutex::new(HashMap::new()),
            stop: AtomicBool::new(false),
            tick_thread: Mutex::new(None),
        }))
    }

    /// Spawn the background tick thread
    pub fn start(self: &Arc<Self>, tick: Duration) -> Result<()> {
        let mut slot = self.tick_thread.lock();
        if slot.is_some() {
            return Err(QualscanError::Conflict("scheduler already started".to_string()));
        }
        let scheduler = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("qs-sched-tick".to_string())
            .spawn(move || {
                while !scheduler.stop.load(Ordering::SeqCst) {
                    if let Err(e) = scheduler.tick_once() {
                        tracing::error!(error = %e, "scheduler tick failed");
                    }
                    // sleep in slices so shutdown is not held up by the
                    // tick cadence
                    let slept_from = std::time::Instant::now();
                    while slept_from.elapsed() < tick {
                        if scheduler.stop.load(Ordering::SeqCst) {
                            return;
                        }
                        std::thread::sleep(Duration::from_millis(50).min(tick));
                    }
                }
            })
            .map_err(|e| QualscanError::Internal(format!("tick thread: {}", e)))?;
        *slot = Some(handle);
        Ok(())
    }

    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.tick_thread.lock().take() {
            let _ = handle.join();
        }
    }

    // ------------------------------------------------------------------
    // Task CRUD
    // ------------------------------------------------------------------

    pub fn create_task(&self, mut task: Task) -> Result<Task> {
        let cron = CronExpr::parse(&task.cron)?;
        if task.task_id.is_empty() {
            task.task_id = Uuid::new_v4().to_string();
        }
        if self.tasks.get(&task.task_id).is_ok() {
            return Err(QualscanError::Conflict(format!(
                "task {} already exists",
                task.task_id
            )));
        }
        let now = self.clock.now();
        task.created_at = now;
        task.updated_at = now;
        task.next_run_at = task.enabled.then(|| cron.next_after(now)).flatten();
        self.tasks.save(&task)?;
        tracing::info!(task = %task.task_id, cron = %task.cron, "task created");
        Ok(task)
    }

    pub fn update_task(&self, mut task: Task) -> Result<Task> {
        let existing = self.tasks.get(&task.task_id)?;
        let cron = CronExpr::parse(&task.cron)?;
        let now = self.clock.now();
        task.created_at = existing.created_at;
        task.updated_at = now;
        // reschedule only when the expression or enablement changed
        task.next_run_at = if task.enabled {
            if task.cron != existing.cron || !existing.enabled {
                cron.next_after(now)
            } else {
                existing.next_run_at
            }
        } else {
            None
        };
        self.tasks.save(&task)?;
        Ok(task)
    }

    pub fn get_task(&self, task_id: &str) -> Result<Task> {
        self.tasks.get(task_id)
    }

    pub fn list_tasks(&self) -> Vec<Task> {
        self.tasks.list()
    }

    /// Remove the definition; history stays
    pub fn delete_task(&self, task_id: &str) -> Result<Task> {
        self.tasks.delete(task_id)
    }

    pub fn set_enabled(&self, task_id: &str, enabled: bool) -> Result<Task> {
        let mut task = self.tasks.get(task_id)?;
        task.enabled = enabled;
        self.update_task(task)
    }

    pub fn list_executions(&self, task_id: Option<&str>, limit: usize) -> Result<Vec<Execution>> {
        self.executions.list(task_id, limit)
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Manual trigger; identical to a scheduled dispatch
    pub fn run_now(self: &Arc<Self>, task_id: &str) -> Result<Dispatch> {
        let task = self.tasks.get(task_id)?;
        self.dispatch(&task, true)
    }

    /// Evaluate due tasks once; returns how many were dispatched
    pub fn tick_once(self: &Arc<Self>) -> Result<usize> {
        let now = self.clock.now();
        let mut dispatched = 0usize;
        for mut task in self.tasks.list() {
            if !task.enabled {
                continue;
            }
            let due = task.next_run_at.map(|t| t <= now).unwrap_or(false);
            if !due {
                continue;
            }
            let cron = match CronExpr::parse(&task.cron) {
                Ok(cron) => cron,
                Err(e) => {
                    tracing::error!(task = %task.task_id, error = %e, "stored cron unparsable");
                    continue;
                }
            };
            // a task overdue at startup fires once, then advances from now
            task.next_run_at = cron.next_after(now);
            self.tasks.save(&task)?;
            match self.dispatch(&task, false) {
                Ok(_) => dispatched += 1,
                Err(QualscanError::TaskBusy(_)) => {
                    tracing::warn!(task = %task.task_id, "skipping tick, task busy");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(dispatched)
    }

    /// Serialize runs per task: running -> queue slot -> TaskBusy
    fn dispatch(self: &Arc<Self>, task: &Task, manual: bool) -> Result<Dispatch> {
        {
            let mut runtime = self.runtime.lock();
            let slot = runtime.entry(task.task_id.clone()).or_default();
            if slot.running {
                if slot.queued {
                    return Err(QualscanError::TaskBusy(task.task_id.clone()));
                }
                slot.queued = true;
                tracing::debug!(task = %task.task_id, manual, "run queued behind active execution");
                return Ok(Dispatch::Queued);
            }
            slot.running = true;
        }

        let execution = Execution::begin(
            Uuid::new_v4().to_string(),
            task.task_id.clone(),
            task.name.clone(),
            self.clock.now(),
        );
        if let Err(e) = self.executions.create(&execution) {
            self.runtime.lock().entry(task.task_id.clone()).or_default().running = false;
            return Err(e);
        }
        let execution_id = execution.execution_id.clone();

        let scheduler = Arc::clone(self);
        let task_id = task.task_id.clone();
        self.pool.spawn(move || scheduler.execute_loop(task_id, Some(execution)));
        Ok(Dispatch::Started(execution_id))
    }

    /// Run the started execution, then drain the queue slot
    fn execute_loop(self: Arc<Self>, task_id: String, mut first: Option<Execution>) {
        loop {
            let execution = match first.take() {
                Some(execution) => Some(execution),
                None => {
                    // queued follow-up run; the task may be gone by now
                    match self.tasks.get(&task_id) {
                        Ok(task) => {
                            let execution = Execution::begin(
                                Uuid::new_v4().to_string(),
                                task.task_id.clone(),
                                task.name.clone(),
                                self.clock.now(),
                            );
                            match self.executions.create(&execution) {
                                Ok(()) => Some(execution),
                                Err(e) => {
                                    tracing::error!(task = %task_id, error = %e, "queued run not recorded");
                                    None
                                }
                            }
                        }
                        Err(_) => None,
                    }
                }
            };

            if let Some(mut execution) = execution {
                let outcome = self
                    .tasks
                    .get(&task_id)
                    .and_then(|task| self.runner.run(&task, &mut execution));
                if let Err(e) = outcome {
                    execution.error_message = Some(e.to_string());
                    tracing::warn!(task = %task_id, error = %e, "task run failed");
                }
                execution.conclude(self.clock.now());
                if let Err(e) = self.executions.finalize(&execution) {
                    tracing::error!(task = %task_id, error = %e, "execution not finalized");
                }
                let keep_days = self.tasks.get(&task_id).ok().and_then(|t| t.output.keep_days);
                if let Err(e) = self.executions.prune(&task_id, keep_days) {
                    tracing::error!(task = %task_id, error = %e, "history not pruned");
                }
            }

            let run_again = {
                let mut runtime = self.runtime.lock();
                let slot = runtime.entry(task_id.clone()).or_default();
                if slot.queued {
                    slot.queued = false;
                    true
                } else {
                    slot.running = false;
                    false
                }
            };
            if !run_again {
                break;
            }
        }
    }
}
