use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::config::MAX_LIST_TASKS;
use crate::error::{KickoffError, Result};

use super::task::{unix_now, Task, TaskCreateInfo, TaskId, TaskState, TaskStats};

/// In-memory store of all live tasks.
///
/// The database owns every task record. Methods hand out `&Task` views that
/// are valid only until the next database call; anything longer-lived must
/// keep the `TaskId` and look the task up again, since the zombie reaper may
/// remove it in between.
#[derive(Debug, Default)]
pub struct TaskDatabase {
    tasks: HashMap<TaskId, Task>,
    /// Pending task IDs in creation order. A task is listed here iff its
    /// `run_status` is absent; the order makes the dequeue tie-break
    /// deterministic (first created wins).
    pending: Vec<TaskId>,
    stats: TaskStats,
}

impl TaskDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn stats(&self) -> TaskStats {
        self.stats
    }

    /// All live tasks in any of the given states, oldest first. Refuses once
    /// the database holds more than `MAX_LIST_TASKS` live tasks; the result
    /// is never silently truncated.
    pub fn tasks_by_states(&self, states: &HashSet<TaskState>) -> Result<Vec<&Task>> {
        if self.tasks.len() > MAX_LIST_TASKS {
            return Err(KickoffError::TooManyTasks);
        }
        let mut tasks: Vec<&Task> = self
            .tasks
            .values()
            .filter(|task| states.contains(&task.state()))
            .collect();
        tasks.sort_by_key(|task| (task.status().create_time, task.id()));
        Ok(tasks)
    }

    fn unused_task_id(&self) -> TaskId {
        let mut id = TaskId(rand::random::<u64>());
        let mut attempts = 0;
        while self.tasks.contains_key(&id) {
            id = TaskId(rand::random::<u64>());
            attempts += 1;
            if attempts > 1000 {
                panic!("failed to find an unused task ID after 1000 attempts");
            } else if attempts > 10 {
                warn!(attempts, "task ID allocation is taking unusually long to find an unused slot");
            }
        }
        id
    }

    pub fn create_task(&mut self, info: TaskCreateInfo) -> &Task {
        let id = self.unused_task_id();
        self.pending.push(id);
        self.stats.num_pending += 1;
        self.tasks.entry(id).or_insert_with(|| Task::new(id, info))
    }

    /// Pick the best pending task for a worker holding `have_resources` and
    /// atomically transition it to running.
    ///
    /// A task is eligible iff all of its required resources are present.
    /// Among eligible tasks the one with the highest share of matched
    /// optional resources wins (no optionals scores 0); ties break toward
    /// the earliest-created task, and a perfect score ends the scan early.
    pub fn take_task_to_run(&mut self, have_resources: &HashSet<String>) -> Option<&Task> {
        let mut best: Option<(usize, TaskId)> = None;
        let mut best_score = -1.0f32;

        for (position, id) in self.pending.iter().enumerate() {
            let schedule = self.tasks[id].schedule();
            if !schedule
                .required_resources
                .iter()
                .all(|resource| have_resources.contains(resource))
            {
                continue;
            }

            let score = if schedule.optional_resources.is_empty() {
                0.0
            } else {
                let matched = schedule
                    .optional_resources
                    .iter()
                    .filter(|resource| have_resources.contains(*resource))
                    .count();
                matched as f32 / schedule.optional_resources.len() as f32
            };

            if score > best_score {
                best_score = score;
                best = Some((position, *id));
                if best_score >= 0.999 {
                    break;
                }
            }
        }

        let (position, id) = best?;
        self.pending.remove(position);
        self.stats.num_pending -= 1;
        self.stats.num_running += 1;

        let task = self
            .tasks
            .get_mut(&id)
            .expect("pending task missing from the task map");
        task.mark_started(unix_now());
        Some(&*task)
    }

    /// Refresh a dispatched task's heartbeat timestamp and report whether it
    /// has been marked for cancellation. `None` when the task is gone.
    pub fn heartbeat_task(&mut self, id: TaskId) -> Option<bool> {
        let task = self.tasks.get_mut(&id)?;
        task.heartbeat(unix_now());
        Some(
            task.status()
                .run_status
                .map(|run_status| run_status.was_canceled)
                .unwrap_or(false),
        )
    }

    /// Remove a task from the database, whatever state it is in. False when
    /// the task does not exist.
    pub fn mark_task_finished(&mut self, id: TaskId) -> bool {
        let Some(task) = self.tasks.remove(&id) else {
            return false;
        };
        match task.state() {
            TaskState::Pending => {
                self.pending.retain(|pending_id| *pending_id != id);
                self.stats.num_pending -= 1;
            }
            TaskState::Running => self.stats.num_running -= 1,
            TaskState::Canceling => self.stats.num_canceling -= 1,
        }
        self.stats.num_finished += 1;
        true
    }

    /// Request cancellation. A running task becomes canceling (the worker
    /// observes the flag on its next heartbeat); a pending task is removed
    /// outright and counted as finished. False when the task does not exist.
    /// Canceling an already-canceling task is a no-op.
    pub fn mark_task_should_cancel(&mut self, id: TaskId) -> bool {
        let state = match self.tasks.get(&id) {
            None => return false,
            Some(task) => task.state(),
        };
        match state {
            TaskState::Pending => {
                self.mark_task_finished(id);
            }
            TaskState::Running => {
                if let Some(task) = self.tasks.get_mut(&id) {
                    task.mark_should_cancel();
                }
                self.stats.num_running -= 1;
                self.stats.num_canceling += 1;
            }
            TaskState::Canceling => {}
        }
        true
    }

    /// Reap every dispatched task whose heartbeat is at least
    /// `heartbeat_timeout_secs` old. Returns the number of tasks removed.
    pub fn cleanup_zombie_tasks(&mut self, heartbeat_timeout_secs: i64) -> usize {
        let now = unix_now();
        let zombies: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|task| match task.status().run_status {
                Some(run_status) => now - run_status.heartbeat_time >= heartbeat_timeout_secs,
                None => false,
            })
            .map(|task| task.id())
            .collect();
        for id in &zombies {
            self.mark_task_finished(*id);
        }
        zombies.len()
    }
}
