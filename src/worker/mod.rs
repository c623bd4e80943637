//! The worker loop.
//!
//! A worker repeatedly asks the server for a task matching its resource
//! tags. While a task's command runs, the worker heartbeats on an interval;
//! each heartbeat reply also says whether the task was marked for
//! cancellation, in which case the subprocess is killed. Whatever the exit
//! reason, the task is then reported finished and the worker goes back to
//! polling.
//!
//! Graceful shutdown: once the cancellation token fires, the current task
//! (if any) runs to completion but no new work is accepted.

pub mod executor;

pub use executor::TaskProcess;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::client::TaskClient;
use crate::config::WorkerConfig;
use crate::db::TaskId;
use crate::error::Result;
use crate::protocol::TaskRunInfo;

pub struct TaskWorker {
    client: TaskClient,
    have_resources: Vec<String>,
    config: WorkerConfig,
    shutdown: CancellationToken,
}

impl TaskWorker {
    pub fn new(
        client: TaskClient,
        have_resources: Vec<String>,
        config: WorkerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            client,
            have_resources,
            config,
            shutdown,
        }
    }

    pub async fn run(&self) {
        info!(resources = ?self.have_resources, "starting worker");

        // Idle polling backs off slowly while no work is available and
        // resets as soon as a task ran.
        let mut poll_interval = self.config.min_poll_interval;
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let ran_task = match self.try_run_one_task().await {
                Ok(ran_task) => ran_task,
                Err(err) => {
                    warn!(error = %err, "failed to request work");
                    false
                }
            };
            if ran_task {
                poll_interval = self.config.min_poll_interval;
                continue;
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(poll_interval) => {}
            }
            poll_interval =
                (poll_interval + poll_interval / 4).min(self.config.max_poll_interval);
        }

        info!("worker stopped");
    }

    /// Ask for a task and, if one was dispatched, run it to completion.
    /// Returns whether a task ran.
    async fn try_run_one_task(&self) -> Result<bool> {
        let Some(run_info) = self.client.take_task_to_run(&self.have_resources).await? else {
            return Ok(false);
        };

        info!(task_id = %run_info.id, command = %run_info.command, "starting task");
        let mut process = match TaskProcess::spawn(&run_info.command) {
            Ok(process) => process,
            Err(err) => {
                error!(task_id = %run_info.id, error = %err, "failed to spawn task command");
                self.finish_task(run_info.id).await;
                return Ok(true);
            }
        };

        self.supervise(&run_info, &mut process).await;
        self.finish_task(run_info.id).await;
        Ok(true)
    }

    /// Race the subprocess against the heartbeat interval until it exits or
    /// the server reports a cancellation.
    async fn supervise(&self, run_info: &TaskRunInfo, process: &mut TaskProcess) {
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await; // the first tick is immediate

        let exit_status = loop {
            tokio::select! {
                exit_status = process.wait() => break exit_status,
                _ = heartbeat.tick() => match self.client.heartbeat(run_info.id).await {
                    Ok(Some(true)) => {
                        info!(task_id = %run_info.id, "task was canceled; killing process");
                        break process.terminate().await;
                    }
                    Ok(Some(false)) => {}
                    // The server no longer tracks the task (most likely
                    // reaped as a zombie); let the command finish anyway.
                    Ok(None) => warn!(task_id = %run_info.id, "server no longer tracks this task"),
                    Err(err) => warn!(task_id = %run_info.id, error = %err, "heartbeat failed"),
                },
            }
        };

        match exit_status {
            Ok(exit_status) => {
                info!(task_id = %run_info.id, exit_code = ?exit_status.code(), "task exited")
            }
            Err(err) => warn!(task_id = %run_info.id, error = %err, "failed to wait for task"),
        }
    }

    async fn finish_task(&self, id: TaskId) {
        match self.client.mark_task_finished(id).await {
            Ok(true) => {}
            Ok(false) => warn!(task_id = %id, "could not mark task as finished; it was already gone"),
            Err(err) => warn!(task_id = %id, error = %err, "failed to mark task as finished"),
        }
    }
}
