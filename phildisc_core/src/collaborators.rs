// SPDX-License-Identifier: GPL-3.0
// collaborators.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use std::{
    io::{self, Read, Seek},
    sync::Arc,
};

use crate::{
    disc_identity::DiscType,
    error::EngineError,
};

/// This module contains the default file system collaborator, which simply
/// uses the host's files.
pub mod host_file_system;

/// This module contains a flat, in-memory caller address space.
pub mod process_memory;

/// This module contains a 'real drive' whose disc is an ordinary image file.
pub mod file_backed_drive;

/// This module contains an event sink that reports storage events to the log.
pub mod logging_event_sink;

/// Identifies a process (caller context) in the system.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProcessId(pub u32);

/// Any seekable, readable, sendable stream can act as an open image file.
pub trait ImageFile: Read + Seek + Send {}

impl<T: Read + Seek + Send> ImageFile for T {}

/// This trait provides an implementation-opaque way of performing synchronous
/// file I/O by path, which is all the engine knows of the storage underneath it.
pub trait FileSystem: Send + Sync {

    /// Implementations must open the file at the given path for reading.
    fn open(&self, path: &str) -> io::Result<Box<dyn ImageFile>>;

    /// Implementations must return the size in bytes of the file at the given path.
    fn stat(&self, path: &str) -> io::Result<u64>;
}

/// This trait provides an implementation-opaque way of copying bytes into and out
/// of the address space of a specific caller.
pub trait CallerProcess: Send + Sync {

    /// Implementations must return the identity of the process.
    fn id(&self) -> ProcessId;

    /// Implementations must copy the supplied bytes into the process at the given address.
    fn copy_out(&self, address: u64, data: &[u8]) -> io::Result<()>;

    /// Implementations must fill the supplied buffer from the process at the given address.
    fn copy_in(&self, address: u64, data: &mut [u8]) -> io::Result<()>;
}

/// Shared handle to a caller process.
pub type Caller = Arc<dyn CallerProcess>;

/// This trait provides an implementation-opaque way of talking to the real optical
/// drive underneath the emulation.
pub trait PhysicalDrive: Send {

    /// Implementations must return the type of disc currently in the drive, or `None`
    /// if there is no disc or the drive can't tell.
    fn device_type(&mut self) -> Option<DiscType>;

    /// Implementations must read `count` 2048-byte sectors starting at `start_sector`
    /// into the supplied buffer.
    fn read_sectors(
        &mut self,
        start_sector: u64,
        count: u32,
        buffer: &mut [u8]
    ) -> Result<(), EngineError>;
}

/// This trait provides an implementation-opaque way of delivering storage events
/// (media inserted, removed and so on) towards the driver stack.
pub trait StorageEventSink: Send {

    /// Implementations must deliver the event, returning the delivery status.
    fn send(&mut self, event: u64, param: u64, device: u64) -> Result<i32, EngineError>;
}

/// This trait provides an implementation-opaque way of invoking the real disc
/// authentication routine.
pub trait DiscAuthority {

    /// Implementations must run the real authentication function and return its status.
    fn authenticate(&mut self, function: u64, param: u64) -> i32;
}

/// A drive that never has a disc in it, for total emulation.
pub struct NoDrive;

impl PhysicalDrive for NoDrive {

    fn device_type(&mut self) -> Option<DiscType> {
        None
    }

    fn read_sectors(
        &mut self,
        _start_sector: u64,
        _count: u32,
        _buffer: &mut [u8]
    ) -> Result<(), EngineError> {
        Err(EngineError::Failed)
    }
}

/// Everything the engine needs from the outside world, bundled together so the
/// context can carry it across to the dispatcher thread.
pub struct Collaborators {

    // File access by path.
    pub files: Arc<dyn FileSystem>,

    // The real drive.
    pub drive: Box<dyn PhysicalDrive>,

    // Where storage events go.
    pub events: Box<dyn StorageEventSink>,
}
