// SPDX-License-Identifier: GPL-3.0
// error.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use thiserror::Error;

/// Status code used by callers to mean success.
pub const SUCCEEDED: i32 = 0;

/// Status code used for a generic storage failure, indistinguishable from a real
/// drive fault.
pub const FAILED: i32 = -1;

/// Errors produced anywhere inside the disc emulation engine.
#[derive(Error, Debug)]
pub enum EngineError {

    /// Malformed mount parameters or request fields.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A mount was requested while another one is active.
    #[error("an image is already mounted")]
    Busy,

    /// An operation needed a mounted image but none is active.
    #[error("no image is mounted")]
    NotMounted,

    /// An operation is not valid for the current engine state.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// The backing file could not be opened, seeked or read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file returned fewer bytes than requested.
    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: u64, actual: u64 },

    /// The proxy channel could not be connected, or a transfer could not be set up.
    #[error("proxy protocol error: {0}")]
    Protocol(String),

    /// The remote executor reported a failure status.
    #[error("remote executor returned status {0}")]
    RemoteStatus(i64),

    /// Generic storage failure, as reported to callers.
    #[error("storage operation failed")]
    Failed,

    /// The dispatcher thread is no longer running.
    #[error("command dispatcher has stopped")]
    DispatcherGone,
}

impl EngineError {

    /// Returns the signed status code for this error, in the same space the
    /// storage stack uses (negative values are failures).
    pub fn code(&self) -> i32 {
        match self {
            EngineError::InvalidArgument(_) => -22,
            EngineError::Busy => -16,
            EngineError::NotMounted => -3,
            EngineError::InvalidState(_) => -1,
            EngineError::Io(_) | EngineError::ShortRead { .. } => -5,
            EngineError::Protocol(_) => -71,
            EngineError::RemoteStatus(status) => *status as i32,
            EngineError::Failed => FAILED,
            EngineError::DispatcherGone => -32,
        }
    }

    /// Collapses any error into the generic storage failure callers see, so the
    /// shape of the error never reveals that the disc is emulated.
    pub fn into_storage_fault(self) -> EngineError {
        log::debug!("Reporting storage fault for: {}", self);
        EngineError::Failed
    }
}
