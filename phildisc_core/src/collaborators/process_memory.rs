// SPDX-License-Identifier: GPL-3.0
// process_memory.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use std::io;

use parking_lot::Mutex;

use super::{CallerProcess, ProcessId};

/// This struct models the address space of a caller as one flat block of memory
/// starting at a base address. It is what the loopback proxy executor and the
/// basic binary use to stand in for a real process.
pub struct ProcessMemory {

    // Identity of the process owning this memory.
    id: ProcessId,

    // Address of the first byte of memory.
    base: u64,

    // The memory itself.
    memory: Mutex<Vec<u8>>,
}

impl ProcessMemory {

    /// Creates a new zero-filled address space of the given size.
    pub fn new(id: ProcessId, base: u64, size: usize) -> Self {
        ProcessMemory {
            id,
            base,
            memory: Mutex::new(vec![0; size]),
        }
    }

    /// Returns a copy of `length` bytes starting at `address`.
    pub fn snapshot(&self, address: u64, length: usize) -> io::Result<Vec<u8>> {
        let mut bytes = vec![0; length];
        self.copy_in(address, &mut bytes)?;
        Ok(bytes)
    }

    /// Translates an address range into an index range within our memory block.
    fn range(&self, address: u64, length: usize, limit: usize) -> io::Result<std::ops::Range<usize>> {

        let start = address
            .checked_sub(self.base)
            .ok_or_else(|| fault(address))? as usize;
        let end = start.checked_add(length).ok_or_else(|| fault(address))?;

        if end > limit {
            return Err(fault(address));
        }

        Ok(start..end)
    }
}

impl CallerProcess for ProcessMemory {

    fn id(&self) -> ProcessId {
        self.id
    }

    fn copy_out(&self, address: u64, data: &[u8]) -> io::Result<()> {
        let mut memory = self.memory.lock();
        let range = self.range(address, data.len(), memory.len())?;
        memory[range].copy_from_slice(data);
        Ok(())
    }

    fn copy_in(&self, address: u64, data: &mut [u8]) -> io::Result<()> {
        let memory = self.memory.lock();
        let range = self.range(address, data.len(), memory.len())?;
        data.copy_from_slice(&memory[range]);
        Ok(())
    }
}

/// Builds the error reported for an access outside the address space.
fn fault(address: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("address {:#x} is outside the caller address space", address)
    )
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_copies_land_at_the_translated_offset() {

        let process = ProcessMemory::new(ProcessId(7), 0x1000, 16);
        process.copy_out(0x1004, &[0xAA, 0xBB]).unwrap();

        assert_eq!(process.snapshot(0x1003, 4).unwrap(), vec![0, 0xAA, 0xBB, 0]);
        assert_eq!(process.id(), ProcessId(7));
    }

    #[test]
    fn test_out_of_bounds_copies_fault() {

        let process = ProcessMemory::new(ProcessId(1), 0x1000, 16);

        assert!(process.copy_out(0x0FFF, &[0]).is_err());
        assert!(process.copy_out(0x100F, &[0, 0]).is_err());
    }
}
