// SPDX-License-Identifier: GPL-3.0
// test_support.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

// In-memory stand-ins for the outside world, shared by the unit tests.

use std::{
    collections::HashMap,
    io::{self, Read, Seek, SeekFrom},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use phildisc_utility::BigEndianSlice;

use crate::{
    backing_image::raw_cd::user_data_offset,
    collaborators::{
        Collaborators, DiscAuthority, FileSystem, ImageFile, PhysicalDrive, StorageEventSink
    },
    disc_identity::{detection::{ROOT_EXTENT_OFFSET, SENTINEL}, DiscType},
    error::{EngineError, SUCCEEDED},
};

/// A file system whose files are byte vectors, counting reads.
pub struct MemoryFileSystem {
    files: Mutex<HashMap<String, Arc<Vec<u8>>>>,
    reads: Arc<AtomicUsize>,
}

impl MemoryFileSystem {

    pub fn new() -> Self {
        MemoryFileSystem {
            files: Mutex::new(HashMap::new()),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_file(self, path: &str, bytes: Vec<u8>) -> Self {
        self.files.lock().insert(path.to_string(), Arc::new(bytes));
        self
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl FileSystem for MemoryFileSystem {

    fn open(&self, path: &str) -> io::Result<Box<dyn ImageFile>> {
        let data = self.files.lock().get(path).cloned().ok_or(io::ErrorKind::NotFound)?;
        Ok(Box::new(MemoryFile {
            data,
            position: 0,
            reads: self.reads.clone(),
        }))
    }

    fn stat(&self, path: &str) -> io::Result<u64> {
        self.files
            .lock()
            .get(path)
            .map(|data| data.len() as u64)
            .ok_or_else(|| io::ErrorKind::NotFound.into())
    }
}

/// An open in-memory file.
struct MemoryFile {
    data: Arc<Vec<u8>>,
    position: u64,
    reads: Arc<AtomicUsize>,
}

impl Read for MemoryFile {

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let start = (self.position as usize).min(self.data.len());
        let length = buf.len().min(self.data.len() - start);
        buf[..length].copy_from_slice(&self.data[start..start + length]);
        self.position += length as u64;
        Ok(length)
    }
}

impl Seek for MemoryFile {

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let position = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => self.data.len() as i64 + offset,
            SeekFrom::Current(offset) => self.position as i64 + offset,
        };
        if position < 0 {
            return Err(io::ErrorKind::InvalidInput.into());
        }
        self.position = position as u64;
        Ok(self.position)
    }
}

/// A drive holding a scripted set of 2048-byte sectors. Sectors it doesn't know
/// are left untouched, as some real drives do.
pub struct ScriptedDrive {
    disc: Option<DiscType>,
    sectors: HashMap<u32, Vec<u8>>,
    failing: bool,
    reads: Arc<AtomicUsize>,
}

impl ScriptedDrive {

    pub fn new(disc: Option<DiscType>) -> Self {
        ScriptedDrive {
            disc,
            sectors: HashMap::new(),
            failing: false,
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_sector(mut self, lba: u32, bytes: Vec<u8>) -> Self {
        let mut sector = vec![0; 2048];
        sector[..bytes.len()].copy_from_slice(&bytes);
        self.sectors.insert(lba, sector);
        self
    }

    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn read_counter(&self) -> Arc<AtomicUsize> {
        self.reads.clone()
    }
}

impl PhysicalDrive for ScriptedDrive {

    fn device_type(&mut self) -> Option<DiscType> {
        self.disc
    }

    fn read_sectors(&mut self, start_sector: u64, count: u32, buffer: &mut [u8]) -> Result<(), EngineError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(EngineError::Failed);
        }

        for index in 0..count as usize {
            if let Some(sector) = self.sectors.get(&(start_sector as u32 + index as u32)) {
                buffer[index * 2048..(index + 1) * 2048].copy_from_slice(sector);
            }
        }

        Ok(())
    }
}

/// Storage events delivered so far, as (event, param, device).
pub type EventLog = Arc<Mutex<Vec<(u64, u64, u64)>>>;

/// An event sink that remembers everything sent to it.
pub struct RecordingEventSink {
    events: EventLog,
}

impl RecordingEventSink {

    pub fn new() -> Self {
        RecordingEventSink {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn log(&self) -> EventLog {
        self.events.clone()
    }
}

impl StorageEventSink for RecordingEventSink {

    fn send(&mut self, event: u64, param: u64, device: u64) -> Result<i32, EngineError> {
        self.events.lock().push((event, param, device));
        Ok(SUCCEEDED)
    }
}

/// A disc authority that counts calls and returns a fixed status.
pub struct CountingAuthority {
    pub calls: Vec<(u64, u64)>,
    pub status: i32,
}

impl CountingAuthority {

    pub fn new(status: i32) -> Self {
        CountingAuthority {
            calls: Vec::new(),
            status,
        }
    }
}

impl DiscAuthority for CountingAuthority {

    fn authenticate(&mut self, function: u64, param: u64) -> i32 {
        self.calls.push((function, param));
        self.status
    }
}

/// Bundles the given collaborators.
pub fn collaborators(
    files: Arc<MemoryFileSystem>,
    drive: ScriptedDrive,
    events: RecordingEventSink
) -> Collaborators {
    Collaborators {
        files,
        drive: Box::new(drive),
        events: Box::new(events),
    }
}

/// Builds an ISO 9660 primary volume descriptor, optionally with the PlayStation
/// system identifier.
pub fn volume_descriptor(root_extent: u32, playstation: bool) -> Vec<u8> {
    let mut sector = vec![0; 2048];
    sector[0] = 1;
    sector[1..6].copy_from_slice(b"CD001");
    if playstation {
        sector[8..20].copy_from_slice(b"PLAYSTATION ");
    }
    sector.put_be_u32(ROOT_EXTENT_OFFSET, root_extent);
    sector.put_be_u32(0xAA, 0x800);
    sector
}

/// Builds a directory sector holding the given (name, extent) records.
pub fn directory(entries: &[(&str, u32)]) -> Vec<u8> {
    let mut sector = vec![0; 2048];
    let mut at = 0;

    for (name, extent) in entries {
        let length = (0x21 + name.len() + 1) & !1;
        sector[at] = length as u8;
        sector.put_be_u32(at + 6, *extent);
        sector[at + 0x20] = name.len() as u8;
        sector[at + 0x21..at + 0x21 + name.len()].copy_from_slice(name.as_bytes());
        at += length;
    }

    sector
}

/// Builds a sector that starts with the given text.
pub fn text_sector(text: &str) -> Vec<u8> {
    let mut sector = vec![0; 2048];
    sector[..text.len()].copy_from_slice(text.as_bytes());
    sector
}

/// Builds a raw image of `count` sectors whose payloads are filled with the low
/// byte of their LBA, with a volume descriptor payload at sector 16.
pub fn raw_image(sector_size: u32, count: u32) -> Vec<u8> {
    let size = sector_size as usize;
    let offset = user_data_offset(sector_size);
    let mut image = vec![0; size * count as usize];

    for lba in 0..count as usize {
        let sector = &mut image[lba * size..(lba + 1) * size];
        if size > 2048 {
            sector[..offset].fill(0xEE);
        }
        if lba == 16 {
            sector[offset..offset + 2048].copy_from_slice(&volume_descriptor(18, true));
        } else {
            sector[offset..offset + 2048].fill(lba as u8);
        }
    }

    image
}

/// Builds a cooked image whose bytes count upwards.
pub fn counting_bytes(length: usize) -> Vec<u8> {
    (0..length).map(|index| (index % 251) as u8).collect()
}

/// A sector the drive never wrote.
pub fn untouched_sector() -> Vec<u8> {
    vec![SENTINEL; 2048]
}
