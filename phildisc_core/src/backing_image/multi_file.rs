// SPDX-License-Identifier: GPL-3.0
// multi_file.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use std::{
    io::{Seek, SeekFrom},
    sync::Arc,
};

use log::{debug, warn};
use phildisc_utility::min;

use super::{base_offset_for, read_fully, Destination, READ_BUF_SIZE, SECTOR_CACHE_SIZE};
use crate::{
    collaborators::{FileSystem, ImageFile},
    error::EngineError,
};

/// Most files a single image may be split into.
pub const MAX_PARTS: usize = 32;

/// Path length limits, in bytes.
pub const MIN_PATH_LENGTH: usize = 4;
pub const MAX_PATH: usize = 1024;

/// Every part must hold at least this much beyond its container header.
const MIN_PART_SIZE: u64 = 4 * 1024;

/// One file of the image and how many bytes of disc data it carries.
struct ImagePart {
    path: String,
    size: u64,
}

/// This struct reads a cooked image that may be split over several files, which
/// together form one linear address space.
pub struct MultiFileImage {

    // Where the files come from.
    files: Arc<dyn FileSystem>,

    // The parts, in disc order.
    parts: Vec<ImagePart>,
    total_size: u64,

    // Bytes of container header at the start of every part.
    base_offset: u64,

    // The open part and its index.
    active: Option<(usize, Box<dyn ImageFile>)>,

    // Last whole-sector read, keyed by disc offset.
    cached_sector: Option<(u64, Vec<u8>)>,
    cache_enabled: bool,
}

impl MultiFileImage {

    /// Checks and measures every part. Nothing is kept if any part is unusable.
    pub fn open(files: Arc<dyn FileSystem>, paths: &[String]) -> Result<Self, EngineError> {

        if paths.is_empty() || paths.len() > MAX_PARTS {
            return Err(EngineError::InvalidArgument(format!(
                "{} image files given, expected 1 to {}", paths.len(), MAX_PARTS
            )));
        }

        // Any container part puts the whole image behind a header.
        let mut base_offset = 0;
        for path in paths {
            check_path(path)?;
            base_offset = base_offset.max(base_offset_for(path));
        }

        let mut parts = Vec::with_capacity(paths.len());
        let mut total_size = 0;

        for path in paths {
            let size = files.stat(path)?;
            debug!("{}, file size: {:#x}", path, size);

            if size < MIN_PART_SIZE + base_offset {
                return Err(EngineError::InvalidArgument(format!("{} is too small to be an image", path)));
            }

            parts.push(ImagePart {
                path: path.clone(),
                size: size - base_offset,
            });
            total_size += size - base_offset;
        }

        Ok(MultiFileImage {
            files,
            parts,
            total_size,
            base_offset,
            active: None,
            cached_sector: None,
            cache_enabled: false,
        })
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    pub fn first_path(&self) -> Option<&str> {
        self.parts.first().map(|part| part.path.as_str())
    }

    /// Enables the single-sector cache, which only pays off for full disc images.
    pub fn set_sector_cache(&mut self, enabled: bool) {
        self.cache_enabled = enabled;
        self.cached_sector = None;
    }

    /// Reads `destination.len()` bytes starting at the given disc offset. Anything
    /// past the end of the image reads as zero.
    pub fn read(&mut self, offset: u64, destination: &mut Destination) -> Result<(), EngineError> {

        let length = destination.len();
        debug!("Read {:#x} {:#x}", offset, length);

        let cacheable = self.cache_enabled && length == SECTOR_CACHE_SIZE;
        if cacheable {
            if let Some((cached_offset, sector)) = &self.cached_sector {
                if *cached_offset == offset {
                    return destination.store(0, sector);
                }
            }
        }
        self.cached_sector = None;

        // Caller memory is filled through a bounded bounce buffer.
        let mut bounce = match destination {
            Destination::Local(_) => Vec::new(),
            Destination::Remote { .. } => vec![0; min(length, READ_BUF_SIZE)],
        };

        let mut done = 0;
        let mut position = offset;
        let mut need_seek = true;

        while done < length {
            let read = if let Destination::Local(bytes) = destination {
                self.read_span(position, &mut bytes[done..], &mut need_seek)?
            } else {
                let wanted = min(length - done, bounce.len());
                let read = self.read_span(position, &mut bounce[..wanted], &mut need_seek)?;
                destination.store(done, &bounce[..read])?;
                read
            };

            done += read;
            // Saturates at the end of the address space, which reads as zero.
            position = position.saturating_add(read as u64);
        }

        if cacheable {
            let mut sector = vec![0; SECTOR_CACHE_SIZE];
            destination.load(0, &mut sector)?;
            self.cached_sector = Some((offset, sector));
        }

        Ok(())
    }

    /// Fills as much of `buffer` as the part containing `position` allows,
    /// returning the byte count.
    fn read_span(
        &mut self,
        position: u64,
        buffer: &mut [u8],
        need_seek: &mut bool
    ) -> Result<usize, EngineError> {

        let Some((index, file_offset, size)) = self.next_read(position, buffer.len() as u64) else {
            // Some video discs ask for data past the end they report.
            warn!("Offset or size out of range {:#x} {:#x}", position, buffer.len());
            buffer.fill(0);
            return Ok(buffer.len());
        };

        let reopen = !matches!(&self.active, Some((active, _)) if *active == index);
        if reopen {
            debug!("Changed to part file {}", index);
            self.active = None;
            let file = self.files.open(&self.parts[index].path)?;
            self.active = Some((index, file));
            *need_seek = true;
        }

        let Some((_, file)) = self.active.as_mut() else {
            return Err(EngineError::InvalidState("no active image file"));
        };

        if *need_seek {
            file.seek(SeekFrom::Start(self.base_offset + file_offset))?;
            *need_seek = false;
        }

        let size = size as usize;
        let read = read_fully(&mut **file, &mut buffer[..size])?;
        if read != size {
            return Err(EngineError::ShortRead {
                expected: size as u64,
                actual: read as u64,
            });
        }

        Ok(size)
    }

    /// Maps a disc offset to (part index, offset within the part, bytes available
    /// there up to `length`).
    fn next_read(&self, position: u64, length: u64) -> Option<(usize, u64, u64)> {

        let mut base = 0;

        for (index, part) in self.parts.iter().enumerate() {
            let last = base + part.size;
            if position >= base && position < last {
                return Some((index, position - base, min(length, last - position)));
            }
            base = last;
        }

        None
    }
}

/// Checks an image path is of a length we accept.
pub fn check_path(path: &str) -> Result<(), EngineError> {
    if path.len() < MIN_PATH_LENGTH || path.len() >= MAX_PATH {
        return Err(EngineError::InvalidArgument(format!("bad image path length {}", path.len())));
    }
    Ok(())
}
