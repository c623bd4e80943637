//! Thin synchronous-feeling wrapper over the wire protocol: one TCP
//! connection per request, encode, round-trip, decode.

use std::io;

use tokio::net::TcpStream;

use crate::blob::{BlobError, BlobReader};
use crate::config::ServerAddress;
use crate::db::{TaskCreateInfo, TaskId, TaskSchedule, TaskState, TaskStats, TaskStatus};
use crate::error::{KickoffError, Result};
use crate::protocol::{
    ensure_done, read_frame, read_option, read_seq, write_frame, ReplyStatus, Request,
    TaskBriefInfo, TaskRunInfo, WireDecode,
};

pub struct TaskClient {
    addr: ServerAddress,
}

impl TaskClient {
    pub fn new(addr: ServerAddress) -> Self {
        Self { addr }
    }

    async fn round_trip(&self, request: &Request) -> Result<(ReplyStatus, Vec<u8>)> {
        let addr = self.addr.to_string();
        let mut stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| KickoffError::Connect { addr, source })?;

        write_frame(&mut stream, &request.encode()).await?;
        let Some(reply) = read_frame(&mut stream).await? else {
            return Err(KickoffError::Transport(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before the reply arrived",
            )));
        };

        let Some((&status_byte, body)) = reply.split_first() else {
            return Err(KickoffError::Malformed(BlobError::UnexpectedEnd));
        };
        let status = ReplyStatus::from_byte(status_byte)
            .ok_or(KickoffError::UnknownReplyStatus(status_byte))?;
        Ok((status, body.to_vec()))
    }

    /// Map the non-ok statuses every opcode shares. Callers that give
    /// `Failed` a meaning handle it before calling this.
    fn expect_ok(status: ReplyStatus) -> Result<()> {
        match status {
            ReplyStatus::Ok => Ok(()),
            ReplyStatus::Failed => Err(KickoffError::RequestFailed),
            ReplyStatus::BadRequest => Err(KickoffError::RequestRejected),
        }
    }

    pub async fn create_task(&self, info: &TaskCreateInfo) -> Result<TaskId> {
        let (status, body) = self.round_trip(&Request::CreateTask(info.clone())).await?;
        Self::expect_ok(status)?;
        let mut reader = BlobReader::new(&body);
        let id = TaskId::decode(&mut reader)?;
        ensure_done(&reader)?;
        Ok(id)
    }

    pub async fn get_task_status(&self, id: TaskId) -> Result<Option<TaskStatus>> {
        let (status, body) = self.round_trip(&Request::GetTaskStatus(id)).await?;
        Self::expect_ok(status)?;
        let mut reader = BlobReader::new(&body);
        let task_status = read_option(&mut reader)?;
        ensure_done(&reader)?;
        Ok(task_status)
    }

    pub async fn get_task_schedule(&self, id: TaskId) -> Result<Option<TaskSchedule>> {
        let (status, body) = self.round_trip(&Request::GetTaskSchedule(id)).await?;
        Self::expect_ok(status)?;
        let mut reader = BlobReader::new(&body);
        let schedule = read_option(&mut reader)?;
        ensure_done(&reader)?;
        Ok(schedule)
    }

    /// True when the task was found and marked; false when it no longer
    /// exists.
    pub async fn mark_task_should_cancel(&self, id: TaskId) -> Result<bool> {
        let (status, body) = self.round_trip(&Request::MarkShouldCancel(id)).await?;
        Self::expect_ok(status)?;
        let mut reader = BlobReader::new(&body);
        let marked = reader.read_bool().map_err(KickoffError::Malformed)?;
        ensure_done(&reader)?;
        Ok(marked)
    }

    /// `None` means the server refused because the live task count exceeds
    /// the list threshold.
    pub async fn get_tasks_by_states(
        &self,
        states: &[TaskState],
    ) -> Result<Option<Vec<TaskBriefInfo>>> {
        let (status, body) = self
            .round_trip(&Request::GetTasksByStates(states.to_vec()))
            .await?;
        Self::expect_ok(status)?;
        let mut reader = BlobReader::new(&body);
        let tasks = if reader.read_bool().map_err(KickoffError::Malformed)? {
            Some(read_seq(&mut reader)?)
        } else {
            None
        };
        ensure_done(&reader)?;
        Ok(tasks)
    }

    pub async fn get_stats(&self) -> Result<TaskStats> {
        let (status, body) = self.round_trip(&Request::GetStats).await?;
        Self::expect_ok(status)?;
        let mut reader = BlobReader::new(&body);
        let stats = TaskStats::decode(&mut reader)?;
        ensure_done(&reader)?;
        Ok(stats)
    }

    pub async fn take_task_to_run(&self, have_resources: &[String]) -> Result<Option<TaskRunInfo>> {
        let request = Request::TakeTaskToRun {
            have_resources: have_resources.to_vec(),
        };
        let (status, body) = self.round_trip(&request).await?;
        Self::expect_ok(status)?;
        let mut reader = BlobReader::new(&body);
        let run_info = read_option(&mut reader)?;
        ensure_done(&reader)?;
        Ok(run_info)
    }

    /// Refresh the task's heartbeat; the reply says whether it was marked
    /// for cancellation. `None` when the server no longer tracks the task.
    pub async fn heartbeat(&self, id: TaskId) -> Result<Option<bool>> {
        let (status, body) = self.round_trip(&Request::Heartbeat(id)).await?;
        if status == ReplyStatus::Failed {
            return Ok(None);
        }
        Self::expect_ok(status)?;
        let mut reader = BlobReader::new(&body);
        let was_canceled = reader.read_bool().map_err(KickoffError::Malformed)?;
        ensure_done(&reader)?;
        Ok(Some(was_canceled))
    }

    /// True when the task was found and removed; false when it was already
    /// gone (e.g. reaped as a zombie).
    pub async fn mark_task_finished(&self, id: TaskId) -> Result<bool> {
        let (status, _body) = self.round_trip(&Request::MarkFinished(id)).await?;
        if status == ReplyStatus::Failed {
            return Ok(false);
        }
        Self::expect_ok(status)?;
        Ok(true)
    }
}
