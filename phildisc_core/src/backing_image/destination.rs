// SPDX-License-Identifier: GPL-3.0
// destination.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use crate::{
    collaborators::{Caller, ProcessId},
    error::EngineError,
};

/// Largest run of zeros written to caller memory at once.
const ZERO_CHUNK_SIZE: usize = 64 * 1024;

/// Where the bytes of a read end up. Engine-owned memory is written directly and
/// handed back after the round trip; caller memory is reached through the caller's
/// copy routines.
pub enum Destination {
    Local(Vec<u8>),
    Remote {
        caller: Caller,
        address: u64,
        length: usize,
    },
}

impl Destination {

    /// Creates a zero-filled engine-owned destination.
    pub fn local(length: usize) -> Self {
        Destination::Local(vec![0; length])
    }

    /// Creates a destination in the given caller's address space.
    pub fn remote(caller: Caller, address: u64, length: usize) -> Self {
        Destination::Remote {
            caller,
            address,
            length,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Destination::Local(bytes) => bytes.len(),
            Destination::Remote { length, .. } => *length,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the owning process of a remote destination.
    pub fn caller(&self) -> Option<ProcessId> {
        match self {
            Destination::Local(_) => None,
            Destination::Remote { caller, .. } => Some(caller.id()),
        }
    }

    /// Returns the address of a remote destination within its caller.
    pub fn remote_address(&self) -> Option<u64> {
        match self {
            Destination::Local(_) => None,
            Destination::Remote { address, .. } => Some(*address),
        }
    }

    /// Writes `data` at byte `at` of the destination.
    pub fn store(&mut self, at: usize, data: &[u8]) -> Result<(), EngineError> {

        self.check_range(at, data.len())?;

        match self {
            Destination::Local(bytes) => {
                bytes[at..at + data.len()].copy_from_slice(data);
                Ok(())
            },
            Destination::Remote { caller, address, .. } => {
                caller.copy_out(*address + at as u64, data)?;
                Ok(())
            },
        }
    }

    /// Zeroes the whole destination.
    pub fn fill_zero(&mut self) -> Result<(), EngineError> {

        match self {
            Destination::Local(bytes) => {
                bytes.fill(0);
                Ok(())
            },
            Destination::Remote { caller, address, length } => {
                let zeros = vec![0; (*length).min(ZERO_CHUNK_SIZE)];
                let mut done = 0;

                while done < *length {
                    let size = (*length - done).min(zeros.len());
                    caller.copy_out(*address + done as u64, &zeros[..size])?;
                    done += size;
                }

                Ok(())
            },
        }
    }

    /// Reads back bytes from `at` into `out`.
    pub fn load(&self, at: usize, out: &mut [u8]) -> Result<(), EngineError> {

        self.check_range(at, out.len())?;

        match self {
            Destination::Local(bytes) => {
                out.copy_from_slice(&bytes[at..at + out.len()]);
                Ok(())
            },
            Destination::Remote { caller, address, .. } => {
                caller.copy_in(*address + at as u64, out)?;
                Ok(())
            },
        }
    }

    /// Consumes an engine-owned destination, returning its bytes.
    pub fn into_local(self) -> Option<Vec<u8>> {
        match self {
            Destination::Local(bytes) => Some(bytes),
            Destination::Remote { .. } => None,
        }
    }

    fn check_range(&self, at: usize, length: usize) -> Result<(), EngineError> {
        match at.checked_add(length) {
            Some(end) if end <= self.len() => Ok(()),
            _ => Err(EngineError::InvalidArgument(format!(
                "{} bytes at {} overrun a destination of {} bytes", length, at, self.len()
            ))),
        }
    }
}
