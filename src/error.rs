use std::io;

use thiserror::Error;

use crate::blob::BlobError;

#[derive(Error, Debug)]
pub enum KickoffError {
    #[error("failed to connect to task server at {addr}: {source}")]
    Connect { addr: String, source: io::Error },

    #[error("failed to start server on port {port}: {source}")]
    Bind { port: u16, source: io::Error },

    #[error("server may not be responding: {0}")]
    Transport(#[from] io::Error),

    #[error("malformed message: {0}")]
    Malformed(#[from] BlobError),

    #[error("message of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),

    #[error("unknown request opcode {0:#04x}")]
    UnknownOpcode(u8),

    #[error("unknown task state byte {0:#04x}")]
    UnknownStateByte(u8),

    #[error("unknown reply status byte {0:#04x}")]
    UnknownReplyStatus(u8),

    #[error("server rejected the request as malformed")]
    RequestRejected,

    #[error("request failed on the server")]
    RequestFailed,

    #[error("task list is not available because the total number of tasks is too large")]
    TooManyTasks,

    #[error("task may not exist (e.g. it was already canceled, finished, or never started)")]
    TaskNotFound,

    #[error("failed to parse hexadecimal task ID: {0:?}")]
    InvalidTaskId(String),

    #[error("failed to parse server address (too many colons): {0:?}")]
    InvalidAddress(String),

    #[error("invalid port number: {0:?}")]
    InvalidPort(String),
}

pub type Result<T> = std::result::Result<T, KickoffError>;
