// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Cooperative state-machine executor.
//!
//! The executor owns an explicit registry of named task instances. One tick
//! advances every due instance once; an instance suspends only by returning
//! a delay or a handler transition from its `step`. A given instance is
//! never invoked twice concurrently, while distinct instances run their
//! steps concurrently within a tick so one slow chain cannot stall the
//! others.
//!
//! Invocation timing compares task deadlines against a [`Clock`], which
//! keeps retry-timing tests deterministic. The only guarantee is that a
//! handler is not invoked *before* its requested delay; there is no latency
//! upper bound.

use crate::metrics::ClientMetrics;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Time source for scheduling decisions.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for deterministic tests.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<std::sync::Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(std::sync::Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }
}

/// Per-instance capability object passed to every handler invocation.
pub struct TaskContext {
    id: String,
    cancel: CancellationToken,
}

impl TaskContext {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// True once the instance has been removed from the registry. A handler
    /// returning mid-flight results should check this before committing.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// What a handler invocation asks the executor to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Stay on the current handler; re-invoke no earlier than now + delay.
    Sleep(Duration),
    /// The task switched itself to the named handler; memory is preserved
    /// and the instance is due immediately (invoked on the next tick).
    Transition(&'static str),
    /// Terminal: remove the instance from the registry.
    Done,
}

/// A resumable state machine: immutable params, exclusively owned mutable
/// memory, and a current handler the next `step` dispatches on.
#[async_trait]
pub trait Task: Send {
    /// Instance name for logging and metrics.
    fn name(&self) -> &str;

    /// Name of the handler the next step will run.
    fn handler(&self) -> &'static str;

    /// Advance the machine by one handler invocation. Must not block: any
    /// chain interaction is awaited inside, and suspension happens only
    /// through the returned outcome. Fetch errors belong in the task's
    /// memory, not in a panic or a propagated error.
    async fn step(&mut self, ctx: &TaskContext) -> StepOutcome;
}

struct TaskEntry {
    task: Box<dyn Task>,
    ctx: TaskContext,
    next_due: Instant,
}

enum Command {
    Spawn { id: String, task: Box<dyn Task> },
    Cancel { id: String },
}

/// Cloneable handle for enqueueing and cancelling task instances from
/// outside the run loop (including from other running tasks).
#[derive(Clone)]
pub struct ExecutorHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl ExecutorHandle {
    /// Returns false if the executor has shut down.
    pub fn spawn(&self, id: impl Into<String>, task: Box<dyn Task>) -> bool {
        self.tx
            .send(Command::Spawn {
                id: id.into(),
                task,
            })
            .is_ok()
    }

    pub fn cancel(&self, id: impl Into<String>) -> bool {
        self.tx.send(Command::Cancel { id: id.into() }).is_ok()
    }
}

pub struct Executor<C: Clock = SystemClock> {
    clock: C,
    tasks: HashMap<String, TaskEntry>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    metrics: Option<Arc<ClientMetrics>>,
}

impl Executor<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for Executor<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> Executor<C> {
    pub fn with_clock(clock: C) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        Self {
            clock,
            tasks: HashMap::new(),
            cmd_tx,
            cmd_rx,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<ClientMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn handle(&self) -> ExecutorHandle {
        ExecutorHandle {
            tx: self.cmd_tx.clone(),
        }
    }

    /// Register an instance; it is due immediately. Replaces any existing
    /// instance under the same id.
    pub fn insert(&mut self, id: impl Into<String>, task: Box<dyn Task>) {
        let id = id.into();
        if self.tasks.contains_key(&id) {
            warn!("[executor] replacing existing task instance '{id}'");
        }
        info!(
            "[executor] registered '{id}' ({} / {})",
            task.name(),
            task.handler()
        );
        let entry = TaskEntry {
            task,
            ctx: TaskContext::new(id.clone()),
            next_due: self.clock.now(),
        };
        self.tasks.insert(id, entry);
        self.update_task_gauge();
    }

    /// Remove an instance. Safe at any point between invocations; a step
    /// already in flight finishes but its instance is gone afterwards.
    pub fn cancel(&mut self, id: &str) -> bool {
        match self.tasks.remove(id) {
            Some(entry) => {
                entry.ctx.cancel.cancel();
                info!("[executor] cancelled '{id}'");
                self.update_task_gauge();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Current handler of an instance, for inspection.
    pub fn handler_of(&self, id: &str) -> Option<&'static str> {
        self.tasks.get(id).map(|entry| entry.task.handler())
    }

    /// Earliest deadline across all registered instances.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.tasks.values().map(|entry| entry.next_due).min()
    }

    /// Advance every due instance by one handler invocation. Steps of
    /// distinct instances run concurrently; each instance runs at most once.
    /// Returns the number of instances advanced.
    pub async fn tick(&mut self) -> usize {
        self.drain_commands();
        let now = self.clock.now();

        let due: Vec<String> = self
            .tasks
            .iter()
            .filter(|(_, entry)| entry.next_due <= now)
            .map(|(id, _)| id.clone())
            .collect();

        let mut running = Vec::with_capacity(due.len());
        for id in due {
            // Entries are taken out of the registry while their step runs so
            // a concurrent handle-cancel cannot tear a handler down mid-body.
            if let Some(mut entry) = self.tasks.remove(&id) {
                running.push(async move {
                    let outcome = entry.task.step(&entry.ctx).await;
                    (id, entry, outcome)
                });
            }
        }

        let finished = join_all(running).await;
        let advanced = finished.len();

        for (id, mut entry, outcome) in finished {
            if let Some(metrics) = &self.metrics {
                metrics
                    .task_steps
                    .with_label_values(&[entry.task.name()])
                    .inc();
            }
            match outcome {
                StepOutcome::Sleep(delay) => {
                    entry.next_due = now + delay;
                    self.tasks.insert(id, entry);
                }
                StepOutcome::Transition(next) => {
                    debug!("[executor] '{id}' -> {next}");
                    entry.next_due = now;
                    self.tasks.insert(id, entry);
                }
                StepOutcome::Done => {
                    info!("[executor] '{id}' finished");
                    entry.ctx.cancel.cancel();
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.executor_ticks.inc();
        }
        self.update_task_gauge();
        advanced
    }

    /// Drive ticks until cancelled. Sleeps until the next deadline, waking
    /// early for spawn/cancel commands arriving through the handle.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("[executor] running with {} task(s)", self.tasks.len());
        loop {
            let now = self.clock.now();
            let sleep_for = match self.next_deadline() {
                Some(deadline) => deadline.saturating_duration_since(now),
                // Idle: nothing registered, wait for a command.
                None => Duration::from_secs(3600),
            };

            let command = tokio::select! {
                _ = cancel.cancelled() => break,
                command = self.cmd_rx.recv() => command,
                _ = tokio::time::sleep(sleep_for) => None,
            };
            if let Some(command) = command {
                self.apply_command(command);
                continue;
            }

            self.tick().await;
        }
        info!("[executor] stopped");
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.cmd_rx.try_recv() {
            self.apply_command(command);
        }
    }

    fn apply_command(&mut self, command: Command) {
        match command {
            Command::Spawn { id, task } => self.insert(id, task),
            Command::Cancel { id } => {
                self.cancel(&id);
            }
        }
    }

    fn update_task_gauge(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.running_tasks.set(self.tasks.len() as i64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts invocations and follows a scripted handler path.
    struct ScriptedTask {
        name: String,
        handler: &'static str,
        steps: Arc<AtomicUsize>,
        script: Vec<StepOutcome>,
    }

    impl ScriptedTask {
        fn new(name: &str, script: Vec<StepOutcome>) -> (Self, Arc<AtomicUsize>) {
            let steps = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    name: name.to_string(),
                    handler: "start",
                    steps: steps.clone(),
                    script,
                },
                steps,
            )
        }
    }

    #[async_trait]
    impl Task for ScriptedTask {
        fn name(&self) -> &str {
            &self.name
        }

        fn handler(&self) -> &'static str {
            self.handler
        }

        async fn step(&mut self, _ctx: &TaskContext) -> StepOutcome {
            let index = self.steps.fetch_add(1, Ordering::SeqCst);
            let outcome = self
                .script
                .get(index)
                .cloned()
                .unwrap_or(StepOutcome::Done);
            if let StepOutcome::Transition(next) = outcome {
                self.handler = next;
            }
            outcome
        }
    }

    fn repeat_sleep(interval: Duration, times: usize) -> Vec<StepOutcome> {
        vec![StepOutcome::Sleep(interval); times]
    }

    #[tokio::test]
    async fn test_task_not_invoked_before_delay() {
        let clock = ManualClock::new();
        let mut executor = Executor::with_clock(clock.clone());
        let (task, steps) =
            ScriptedTask::new("poller", repeat_sleep(Duration::from_secs(30), 10));
        executor.insert("poller", Box::new(task));

        executor.tick().await;
        assert_eq!(steps.load(Ordering::SeqCst), 1);

        // Not due yet: no invocation no matter how many ticks run.
        executor.tick().await;
        executor.tick().await;
        assert_eq!(steps.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(29));
        executor.tick().await;
        assert_eq!(steps.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(1));
        executor.tick().await;
        assert_eq!(steps.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_transition_runs_on_next_tick_and_switches_handler() {
        let clock = ManualClock::new();
        let mut executor = Executor::with_clock(clock.clone());
        let (task, steps) = ScriptedTask::new(
            "workflow",
            vec![
                StepOutcome::Transition("confirm"),
                StepOutcome::Sleep(Duration::from_secs(5)),
            ],
        );
        executor.insert("workflow", Box::new(task));

        executor.tick().await;
        assert_eq!(steps.load(Ordering::SeqCst), 1);
        assert_eq!(executor.handler_of("workflow"), Some("confirm"));

        // Due immediately after a transition, without advancing the clock.
        executor.tick().await;
        assert_eq!(steps.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_done_removes_instance() {
        let clock = ManualClock::new();
        let mut executor = Executor::with_clock(clock.clone());
        let (task, steps) = ScriptedTask::new("oneshot", vec![StepOutcome::Done]);
        executor.insert("oneshot", Box::new(task));
        assert!(executor.contains("oneshot"));

        executor.tick().await;
        assert!(!executor.contains("oneshot"));
        assert!(executor.is_empty());

        clock.advance(Duration::from_secs(60));
        executor.tick().await;
        assert_eq!(steps.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_independent_instances_advance_in_one_tick() {
        let clock = ManualClock::new();
        let mut executor = Executor::with_clock(clock.clone());
        let (a, steps_a) = ScriptedTask::new("a", repeat_sleep(Duration::from_secs(10), 5));
        let (b, steps_b) = ScriptedTask::new("b", repeat_sleep(Duration::from_secs(20), 5));
        executor.insert("a", Box::new(a));
        executor.insert("b", Box::new(b));

        assert_eq!(executor.tick().await, 2);
        assert_eq!(steps_a.load(Ordering::SeqCst), 1);
        assert_eq!(steps_b.load(Ordering::SeqCst), 1);

        // Ten seconds later only the faster instance is due again.
        clock.advance(Duration::from_secs(10));
        assert_eq!(executor.tick().await, 1);
        assert_eq!(steps_a.load(Ordering::SeqCst), 2);
        assert_eq!(steps_b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_between_invocations() {
        let clock = ManualClock::new();
        let mut executor = Executor::with_clock(clock.clone());
        let (task, steps) =
            ScriptedTask::new("poller", repeat_sleep(Duration::from_secs(1), 10));
        executor.insert("poller", Box::new(task));

        executor.tick().await;
        assert!(executor.cancel("poller"));
        assert!(!executor.cancel("poller"));

        clock.advance(Duration::from_secs(5));
        executor.tick().await;
        assert_eq!(steps.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handle_spawns_and_cancels() {
        let clock = ManualClock::new();
        let mut executor = Executor::with_clock(clock.clone());
        let handle = executor.handle();

        let (task, steps) =
            ScriptedTask::new("late", repeat_sleep(Duration::from_secs(1), 10));
        assert!(handle.spawn("late", Box::new(task)));

        // Commands are drained at the start of a tick.
        executor.tick().await;
        assert_eq!(steps.load(Ordering::SeqCst), 1);
        assert!(executor.contains("late"));

        assert!(handle.cancel("late"));
        executor.tick().await;
        assert!(!executor.contains("late"));
    }

    #[tokio::test]
    async fn test_next_deadline_tracks_earliest_task() {
        let clock = ManualClock::new();
        let mut executor = Executor::with_clock(clock.clone());
        assert!(executor.next_deadline().is_none());

        let (a, _) = ScriptedTask::new("a", repeat_sleep(Duration::from_secs(30), 5));
        let (b, _) = ScriptedTask::new("b", repeat_sleep(Duration::from_secs(5), 5));
        executor.insert("a", Box::new(a));
        executor.insert("b", Box::new(b));
        executor.tick().await;

        let deadline = executor.next_deadline().unwrap();
        assert_eq!(deadline, clock.now() + Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_run_loop_stops_on_cancellation() {
        let executor = Executor::new();
        let cancel = CancellationToken::new();
        let join = tokio::spawn(executor.run(cancel.clone()));
        cancel.cancel();
        join.await.unwrap();
    }
}
