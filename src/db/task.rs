use std::fmt;

use chrono::Utc;

/// Wall-clock seconds. All task timestamps come from this one source.
pub(crate) fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// Opaque 64-bit task identifier, rendered as 16 hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl TaskId {
    pub fn from_hex(hex: &str) -> Option<TaskId> {
        if hex.is_empty() || hex.len() > 16 {
            return None;
        }
        u64::from_str_radix(hex, 16).ok().map(TaskId)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Derived classification of a live task. Never stored; computed from the
/// presence of `TaskRunStatus` and its cancel flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TaskState {
    Pending = 0,
    Running = 1,
    Canceling = 2,
}

impl TaskState {
    pub fn from_byte(byte: u8) -> Option<TaskState> {
        match byte {
            0 => Some(TaskState::Pending),
            1 => Some(TaskState::Running),
            2 => Some(TaskState::Canceling),
            _ => None,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Pending => write!(f, "pending"),
            TaskState::Running => write!(f, "running"),
            TaskState::Canceling => write!(f, "canceling"),
        }
    }
}

/// Present iff the task has been dispatched to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskRunStatus {
    /// Marked for cancellation. Never reverts to false.
    pub was_canceled: bool,
    pub start_time: i64,
    pub heartbeat_time: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskStatus {
    pub create_time: i64,
    pub run_status: Option<TaskRunStatus>,
}

impl TaskStatus {
    pub fn state(&self) -> TaskState {
        match self.run_status {
            None => TaskState::Pending,
            Some(run_status) if run_status.was_canceled => TaskState::Canceling,
            Some(_) => TaskState::Running,
        }
    }
}

/// When and where a task may run. Matching is set membership on opaque tag
/// strings: required tags gate eligibility, optional tags only rank workers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskSchedule {
    pub required_resources: Vec<String>,
    pub optional_resources: Vec<String>,
}

impl fmt::Display for TaskSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RequiredResources = {{{}}} OptionalResources = {{{}}}",
            self.required_resources.join(", "),
            self.optional_resources.join(", ")
        )
    }
}

/// Everything needed to create a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskCreateInfo {
    pub command: String,
    pub schedule: TaskSchedule,
}

/// Counter snapshot. `num_finished` only ever grows; the other three track
/// the live tasks in each derived state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStats {
    pub num_pending: u64,
    pub num_running: u64,
    pub num_canceling: u64,
    pub num_finished: u64,
}

/// One queued unit of work: a command line plus scheduling constraints and
/// lifecycle status. Owned exclusively by the database; borrowed views are
/// valid only for the duration of a single database call.
#[derive(Debug, Clone)]
pub struct Task {
    id: TaskId,
    command: String,
    schedule: TaskSchedule,
    status: TaskStatus,
}

impl Task {
    pub(crate) fn new(id: TaskId, info: TaskCreateInfo) -> Self {
        Self {
            id,
            command: info.command,
            schedule: info.schedule,
            status: TaskStatus {
                create_time: unix_now(),
                run_status: None,
            },
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn schedule(&self) -> &TaskSchedule {
        &self.schedule
    }

    pub fn status(&self) -> &TaskStatus {
        &self.status
    }

    pub fn state(&self) -> TaskState {
        self.status.state()
    }

    pub(crate) fn mark_started(&mut self, now: i64) {
        if self.status.run_status.is_none() {
            self.status.run_status = Some(TaskRunStatus {
                was_canceled: false,
                start_time: now,
                heartbeat_time: now,
            });
        }
    }

    pub(crate) fn mark_should_cancel(&mut self) {
        if let Some(run_status) = &mut self.status.run_status {
            run_status.was_canceled = true;
        }
    }

    pub(crate) fn heartbeat(&mut self, now: i64) {
        if let Some(run_status) = &mut self.status.run_status {
            run_status.heartbeat_time = now;
        }
    }
}
