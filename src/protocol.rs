//! Wire protocol between clients, workers, and the task server.
//!
//! Every message travels in a frame: a `u32` little-endian payload length
//! followed by the payload. A request payload is a one-byte opcode and an
//! opcode-specific body; a reply payload is a one-byte status and a body.
//! Bodies use the blob codec of [`crate::blob`].

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::blob::{BlobError, BlobReader, BlobWriter};
use crate::db::{
    TaskCreateInfo, TaskId, TaskRunStatus, TaskSchedule, TaskState, TaskStats, TaskStatus,
};
use crate::error::{KickoffError, Result};

/// Frames larger than this are rejected and the connection closed.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

mod opcode {
    pub const CREATE_TASK: u8 = 0;
    pub const GET_TASK_STATUS: u8 = 1;
    pub const GET_TASK_SCHEDULE: u8 = 2;
    pub const MARK_SHOULD_CANCEL: u8 = 3;
    pub const GET_TASKS_BY_STATES: u8 = 4;
    pub const GET_STATS: u8 = 5;
    pub const TAKE_TASK_TO_RUN: u8 = 6;
    pub const HEARTBEAT: u8 = 7;
    pub const MARK_FINISHED: u8 = 8;
}

/// First byte of every reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReplyStatus {
    Ok = 0,
    /// Per-opcode failure: absent task on Heartbeat/MarkFinished, refused
    /// CreateTask.
    Failed = 1,
    /// The request could not be decoded; no state was changed.
    BadRequest = 2,
}

impl ReplyStatus {
    pub fn from_byte(byte: u8) -> Option<ReplyStatus> {
        match byte {
            0 => Some(ReplyStatus::Ok),
            1 => Some(ReplyStatus::Failed),
            2 => Some(ReplyStatus::BadRequest),
            _ => None,
        }
    }
}

/// `{id, status}` entry in a `GetTasksByStates` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskBriefInfo {
    pub id: TaskId,
    pub status: TaskStatus,
}

/// What a worker needs to execute a dispatched task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRunInfo {
    pub id: TaskId,
    pub command: String,
}

/// A decoded request, one variant per opcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    CreateTask(TaskCreateInfo),
    GetTaskStatus(TaskId),
    GetTaskSchedule(TaskId),
    MarkShouldCancel(TaskId),
    GetTasksByStates(Vec<TaskState>),
    GetStats,
    TakeTaskToRun { have_resources: Vec<String> },
    Heartbeat(TaskId),
    MarkFinished(TaskId),
}

impl Request {
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = BlobWriter::new();
        match self {
            Request::CreateTask(info) => {
                writer.put_u8(opcode::CREATE_TASK);
                info.encode(&mut writer);
            }
            Request::GetTaskStatus(id) => {
                writer.put_u8(opcode::GET_TASK_STATUS);
                id.encode(&mut writer);
            }
            Request::GetTaskSchedule(id) => {
                writer.put_u8(opcode::GET_TASK_SCHEDULE);
                id.encode(&mut writer);
            }
            Request::MarkShouldCancel(id) => {
                writer.put_u8(opcode::MARK_SHOULD_CANCEL);
                id.encode(&mut writer);
            }
            Request::GetTasksByStates(states) => {
                writer.put_u8(opcode::GET_TASKS_BY_STATES);
                writer.put_u64(states.len() as u64);
                for state in states {
                    state.encode(&mut writer);
                }
            }
            Request::GetStats => {
                writer.put_u8(opcode::GET_STATS);
            }
            Request::TakeTaskToRun { have_resources } => {
                writer.put_u8(opcode::TAKE_TASK_TO_RUN);
                writer.put_str_seq(have_resources);
            }
            Request::Heartbeat(id) => {
                writer.put_u8(opcode::HEARTBEAT);
                id.encode(&mut writer);
            }
            Request::MarkFinished(id) => {
                writer.put_u8(opcode::MARK_FINISHED);
                id.encode(&mut writer);
            }
        }
        writer.into_bytes()
    }

    pub fn decode(payload: &[u8]) -> Result<Request> {
        let mut reader = BlobReader::new(payload);
        let op = reader.read_u8()?;
        let request = match op {
            opcode::CREATE_TASK => Request::CreateTask(TaskCreateInfo::decode(&mut reader)?),
            opcode::GET_TASK_STATUS => Request::GetTaskStatus(TaskId::decode(&mut reader)?),
            opcode::GET_TASK_SCHEDULE => Request::GetTaskSchedule(TaskId::decode(&mut reader)?),
            opcode::MARK_SHOULD_CANCEL => Request::MarkShouldCancel(TaskId::decode(&mut reader)?),
            opcode::GET_TASKS_BY_STATES => {
                let count = reader.read_u64()?;
                let mut states = Vec::new();
                for _ in 0..count {
                    states.push(TaskState::decode(&mut reader)?);
                }
                Request::GetTasksByStates(states)
            }
            opcode::GET_STATS => Request::GetStats,
            opcode::TAKE_TASK_TO_RUN => Request::TakeTaskToRun {
                have_resources: reader.read_str_seq()?,
            },
            opcode::HEARTBEAT => Request::Heartbeat(TaskId::decode(&mut reader)?),
            opcode::MARK_FINISHED => Request::MarkFinished(TaskId::decode(&mut reader)?),
            other => return Err(KickoffError::UnknownOpcode(other)),
        };
        ensure_done(&reader)?;
        Ok(request)
    }
}

/// Fail when a payload carries bytes beyond its declared content.
pub fn ensure_done(reader: &BlobReader<'_>) -> Result<()> {
    if reader.has_more() {
        return Err(KickoffError::Malformed(BlobError::TrailingData));
    }
    Ok(())
}

/// Encoding for a value carried in request or reply bodies. Field order is
/// the wire contract.
pub trait WireEncode {
    fn encode(&self, writer: &mut BlobWriter);
}

pub trait WireDecode: Sized {
    fn decode(reader: &mut BlobReader<'_>) -> Result<Self>;
}

impl WireEncode for TaskId {
    fn encode(&self, writer: &mut BlobWriter) {
        writer.put_u64(self.0);
    }
}

impl WireDecode for TaskId {
    fn decode(reader: &mut BlobReader<'_>) -> Result<Self> {
        Ok(TaskId(reader.read_u64()?))
    }
}

impl WireEncode for TaskState {
    fn encode(&self, writer: &mut BlobWriter) {
        writer.put_u8(*self as u8);
    }
}

impl WireDecode for TaskState {
    fn decode(reader: &mut BlobReader<'_>) -> Result<Self> {
        let byte = reader.read_u8()?;
        TaskState::from_byte(byte).ok_or(KickoffError::UnknownStateByte(byte))
    }
}

impl WireEncode for TaskSchedule {
    fn encode(&self, writer: &mut BlobWriter) {
        writer.put_str_seq(&self.required_resources);
        writer.put_str_seq(&self.optional_resources);
    }
}

impl WireDecode for TaskSchedule {
    fn decode(reader: &mut BlobReader<'_>) -> Result<Self> {
        Ok(TaskSchedule {
            required_resources: reader.read_str_seq()?,
            optional_resources: reader.read_str_seq()?,
        })
    }
}

impl WireEncode for TaskCreateInfo {
    fn encode(&self, writer: &mut BlobWriter) {
        writer.put_str(&self.command);
        self.schedule.encode(writer);
    }
}

impl WireDecode for TaskCreateInfo {
    fn decode(reader: &mut BlobReader<'_>) -> Result<Self> {
        Ok(TaskCreateInfo {
            command: reader.read_string()?,
            schedule: TaskSchedule::decode(reader)?,
        })
    }
}

impl WireEncode for TaskRunStatus {
    fn encode(&self, writer: &mut BlobWriter) {
        writer.put_bool(self.was_canceled);
        writer.put_i64(self.start_time);
        writer.put_i64(self.heartbeat_time);
    }
}

impl WireDecode for TaskRunStatus {
    fn decode(reader: &mut BlobReader<'_>) -> Result<Self> {
        Ok(TaskRunStatus {
            was_canceled: reader.read_bool()?,
            start_time: reader.read_i64()?,
            heartbeat_time: reader.read_i64()?,
        })
    }
}

impl WireEncode for TaskStatus {
    fn encode(&self, writer: &mut BlobWriter) {
        writer.put_i64(self.create_time);
        put_option(writer, &self.run_status);
    }
}

impl WireDecode for TaskStatus {
    fn decode(reader: &mut BlobReader<'_>) -> Result<Self> {
        Ok(TaskStatus {
            create_time: reader.read_i64()?,
            run_status: read_option(reader)?,
        })
    }
}

impl WireEncode for TaskStats {
    fn encode(&self, writer: &mut BlobWriter) {
        writer.put_u64(self.num_pending);
        writer.put_u64(self.num_running);
        writer.put_u64(self.num_canceling);
        writer.put_u64(self.num_finished);
    }
}

impl WireDecode for TaskStats {
    fn decode(reader: &mut BlobReader<'_>) -> Result<Self> {
        Ok(TaskStats {
            num_pending: reader.read_u64()?,
            num_running: reader.read_u64()?,
            num_canceling: reader.read_u64()?,
            num_finished: reader.read_u64()?,
        })
    }
}

impl WireEncode for TaskBriefInfo {
    fn encode(&self, writer: &mut BlobWriter) {
        self.id.encode(writer);
        self.status.encode(writer);
    }
}

impl WireDecode for TaskBriefInfo {
    fn decode(reader: &mut BlobReader<'_>) -> Result<Self> {
        Ok(TaskBriefInfo {
            id: TaskId::decode(reader)?,
            status: TaskStatus::decode(reader)?,
        })
    }
}

impl WireEncode for TaskRunInfo {
    fn encode(&self, writer: &mut BlobWriter) {
        self.id.encode(writer);
        writer.put_str(&self.command);
    }
}

impl WireDecode for TaskRunInfo {
    fn decode(reader: &mut BlobReader<'_>) -> Result<Self> {
        Ok(TaskRunInfo {
            id: TaskId::decode(reader)?,
            command: reader.read_string()?,
        })
    }
}

pub fn put_option<T: WireEncode>(writer: &mut BlobWriter, value: &Option<T>) {
    match value {
        Some(inner) => {
            writer.put_bool(true);
            inner.encode(writer);
        }
        None => writer.put_bool(false),
    }
}

pub fn read_option<T: WireDecode>(reader: &mut BlobReader<'_>) -> Result<Option<T>> {
    if reader.read_bool()? {
        Ok(Some(T::decode(reader)?))
    } else {
        Ok(None)
    }
}

pub fn put_seq<T: WireEncode>(writer: &mut BlobWriter, values: &[T]) {
    writer.put_u64(values.len() as u64);
    for value in values {
        value.encode(writer);
    }
}

pub fn read_seq<T: WireDecode>(reader: &mut BlobReader<'_>) -> Result<Vec<T>> {
    let count = reader.read_u64()?;
    let mut values = Vec::new();
    for _ in 0..count {
        values.push(T::decode(reader)?);
    }
    Ok(values)
}

/// Write one length-prefixed frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_FRAME_BYTES {
        return Err(KickoffError::FrameTooLarge(payload.len()));
    }
    writer.write_all(&(payload.len() as u32).to_le_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame. `None` on EOF at a frame boundary.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(KickoffError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}
