// SPDX-License-Identifier: GPL-3.0
// raw_cd.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use std::{
    io::{Seek, SeekFrom},
    sync::Arc,
};

use log::{debug, info};
use phildisc_utility::min;

use super::{base_offset_for, multi_file::check_path, read_fully, Destination, READ_BUF_SIZE_SECTORS};
use crate::{
    collaborators::{FileSystem, ImageFile},
    error::EngineError,
    scsi::{DiscLayout, TrackTable, COOKED_SECTOR_SIZE},
};

/// Sector sizes we know how to read, in the order they are probed.
pub const SUPPORTED_SECTOR_SIZES: [u32; 7] = [2352, 2048, 2336, 2448, 2328, 2340, 2368];

/// Sector size assumed when the caller's hint is unusable.
pub const DEFAULT_SECTOR_SIZE: u32 = 2352;

/// Sectors held by the raw read window.
pub const WINDOW_SECTORS: u64 = 64;

/// Smallest file we accept as a raw image, enough to reach the volume descriptor.
const MIN_IMAGE_SIZE: u64 = 0x9930;

/// Where the signature probe reads within the volume descriptor's raw sector.
const PROBE_OFFSET: u64 = 0x18;
const PROBE_LENGTH: usize = 20;

/// Returns the hinted sector size if we support it, and the default otherwise.
pub fn validate_sector_size(hint: u32) -> u32 {
    if SUPPORTED_SECTOR_SIZES.contains(&hint) {
        hint
    } else {
        DEFAULT_SECTOR_SIZE
    }
}

/// Returns the offset of the 2048 bytes of user data within a raw sector of the
/// given size.
pub fn user_data_offset(sector_size: u32) -> usize {
    match sector_size {
        2048 => 0,
        2328 | 2336 => 8,
        2340 => 12,
        _ => 24,
    }
}

/// This struct is the raw image file itself, read in whole sectors. It only seeks
/// when a read doesn't carry on from where the last one stopped.
struct SectorFile {

    // Where the file comes from.
    files: Arc<dyn FileSystem>,
    path: String,

    // The file, once opened.
    file: Option<Box<dyn ImageFile>>,

    // Byte position of the file, if known.
    cursor: Option<u64>,

    // Geometry.
    base_offset: u64,
    sector_size: u32,
    num_sectors: u64,
}

impl SectorFile {

    /// Reads `count` raw sectors from `start` into `out`, zero-filling any past the
    /// end of the image.
    fn read_sectors(&mut self, start: u64, count: u64, out: &mut [u8]) -> Result<(), EngineError> {

        let sector_size = self.sector_size as usize;
        let available = min(count, self.num_sectors.saturating_sub(start));
        let length = available as usize * sector_size;

        if available > 0 {
            let position = self.base_offset + start * self.sector_size as u64;

            if self.file.is_none() {
                self.file = Some(self.files.open(&self.path)?);
                self.cursor = None;
            }
            let Some(file) = self.file.as_mut() else {
                return Err(EngineError::InvalidState("raw image is not open"));
            };

            if self.cursor != Some(position) {
                self.cursor = None;
                file.seek(SeekFrom::Start(position))?;
            }

            let read = read_fully(&mut **file, &mut out[..length])?;
            if read != length {
                self.cursor = None;
                return Err(EngineError::ShortRead {
                    expected: length as u64,
                    actual: read as u64,
                });
            }
            self.cursor = Some(position + read as u64);
        }

        out[length..count as usize * sector_size].fill(0);
        Ok(())
    }
}

/// This struct reads a single-file raw CD image with an explicit track table.
pub struct RawCdImage {

    // The image file.
    source: SectorFile,

    // Track table supplied at mount time.
    tracks: TrackTable,

    // The raw read window and the sector it starts at.
    window: Vec<u8>,
    window_start: Option<u64>,
}

impl RawCdImage {

    /// Checks the image and works out its sector size, probing for it when the hint
    /// is the default raw size.
    pub fn open(
        files: Arc<dyn FileSystem>,
        path: &str,
        tracks: TrackTable,
        sector_size_hint: u32
    ) -> Result<Self, EngineError> {

        check_path(path)?;

        let size = files.stat(path)?;
        if size < MIN_IMAGE_SIZE {
            return Err(EngineError::InvalidArgument(format!("{} is too small to be a CD image", path)));
        }

        let base_offset = base_offset_for(path);
        let mut sector_size = validate_sector_size(sector_size_hint);
        if sector_size == DEFAULT_SECTOR_SIZE {
            sector_size = probe_sector_size(files.as_ref(), path, base_offset).unwrap_or(DEFAULT_SECTOR_SIZE);
        }

        let num_sectors = size.saturating_sub(base_offset) / sector_size as u64;
        info!(
            "Raw image {} has {} sectors of {} bytes, {} tracks",
            path, num_sectors, sector_size, tracks.len()
        );

        Ok(RawCdImage {
            source: SectorFile {
                files,
                path: path.to_string(),
                file: None,
                cursor: None,
                base_offset,
                sector_size,
                num_sectors,
            },
            tracks,
            window: vec![0; WINDOW_SECTORS as usize * sector_size as usize],
            window_start: None,
        })
    }

    pub fn path(&self) -> &str {
        &self.source.path
    }

    pub fn sector_size(&self) -> u32 {
        self.source.sector_size
    }

    pub fn num_sectors(&self) -> u64 {
        self.source.num_sectors
    }

    pub fn layout(&self) -> DiscLayout {
        DiscLayout::raw(&self.tracks, self.source.num_sectors as u32, self.source.sector_size)
    }

    /// Reads cooked data: `destination.len()` bytes from the given offset into the
    /// sequence of 2048-byte user data payloads.
    pub fn read_2048(&mut self, offset: u64, destination: &mut Destination) -> Result<(), EngineError> {

        let length = destination.len() as u64;
        if length == 0 {
            return Ok(());
        }

        let cooked = COOKED_SECTOR_SIZE as u64;
        let sector_size = self.source.sector_size as usize;
        let payload = user_data_offset(self.source.sector_size);
        let first = offset / cooked;
        let end = match offset.checked_add(length) {
            Some(end) if first < self.source.num_sectors => end,
            _ => {
                debug!("Cooked read {:#x} {:#x} is past the end of the image", offset, length);
                return destination.fill_zero();
            },
        };
        let last = end.div_ceil(cooked);

        let mut raw = vec![0; min(last - first, READ_BUF_SIZE_SECTORS) as usize * sector_size];
        let mut sector = first;

        while sector < last {
            let batch = min(last - sector, READ_BUF_SIZE_SECTORS);
            self.source.read_sectors(sector, batch, &mut raw)?;

            for index in 0..batch {
                let data = &raw[index as usize * sector_size + payload..][..COOKED_SECTOR_SIZE as usize];

                // Clip the payload to the requested byte range.
                let sector_start = (sector + index) * cooked;
                let from = offset.max(sector_start);
                let to = end.min(sector_start + cooked);
                destination.store(
                    (from - offset) as usize,
                    &data[(from - sector_start) as usize..(to - sector_start) as usize]
                )?;
            }

            sector += batch;
        }

        Ok(())
    }

    /// Reads `count` whole raw sectors from `start` into the destination, through the
    /// read window when the request fits in it.
    pub fn read_raw(&mut self, start: u64, count: u64, destination: &mut Destination) -> Result<(), EngineError> {

        if count == 0 {
            return Ok(());
        }

        if count > WINDOW_SECTORS {
            return self.stream(start, count, destination);
        }

        let sector_size = self.source.sector_size as usize;
        let end = start + count;

        if let Some(window_start) = self.window_start {
            let window_end = window_start + WINDOW_SECTORS;

            // Entirely resident.
            if start >= window_start && end <= window_end {
                let from = (start - window_start) as usize * sector_size;
                return destination.store(0, &self.window[from..from + count as usize * sector_size]);
            }

            // Runs off the end of the window: copy the resident head, then slide the
            // window forward to start where it used to end.
            if start >= window_start && start < window_end {
                let resident = window_end - start;
                let from = (start - window_start) as usize * sector_size;
                destination.store(0, &self.window[from..])?;

                self.fill_window(window_end)?;
                let remaining = (count - resident) as usize * sector_size;
                return destination.store(resident as usize * sector_size, &self.window[..remaining]);
            }

            // Starts before the window: fetch only the missing head and keep the
            // resident sectors by shifting them up.
            if start < window_start && end > window_start {
                let missing = window_start - start;
                debug!("Extending raw window back by {} sectors to {}", missing, start);

                let kept = (WINDOW_SECTORS - missing) as usize * sector_size;
                let head = missing as usize * sector_size;
                self.window.copy_within(..kept, head);
                self.window_start = None;
                self.source.read_sectors(start, missing, &mut self.window[..head])?;
                self.window_start = Some(start);

                return destination.store(0, &self.window[..count as usize * sector_size]);
            }
        }

        self.fill_window(start)?;
        destination.store(0, &self.window[..count as usize * sector_size])
    }

    /// Loads a full window starting at the given sector.
    fn fill_window(&mut self, start: u64) -> Result<(), EngineError> {
        self.window_start = None;
        self.source.read_sectors(start, WINDOW_SECTORS, &mut self.window)?;
        self.window_start = Some(start);
        Ok(())
    }

    /// Streams a large request straight through in batches, leaving the window alone.
    fn stream(&mut self, start: u64, count: u64, destination: &mut Destination) -> Result<(), EngineError> {

        let sector_size = self.source.sector_size as usize;
        let mut batch_buffer = vec![0; min(count, READ_BUF_SIZE_SECTORS) as usize * sector_size];
        let mut done = 0;

        while done < count {
            let batch = min(count - done, READ_BUF_SIZE_SECTORS);
            let bytes = batch as usize * sector_size;

            self.source.read_sectors(start + done, batch, &mut batch_buffer[..bytes])?;
            destination.store(done as usize * sector_size, &batch_buffer[..bytes])?;
            done += batch;
        }

        Ok(())
    }
}

/// Looks for the ISO or PlayStation signature in the volume descriptor sector at
/// each supported size, returning the first size that matches.
fn probe_sector_size(files: &dyn FileSystem, path: &str, base_offset: u64) -> Option<u32> {

    let mut file = files.open(path).ok()?;

    for size in SUPPORTED_SECTOR_SIZES {
        let mut probe = [0_u8; PROBE_LENGTH];
        let position = base_offset + (size as u64) * 16 + PROBE_OFFSET;

        if file.seek(SeekFrom::Start(position)).is_err() {
            continue;
        }
        if !matches!(read_fully(&mut *file, &mut probe), Ok(PROBE_LENGTH)) {
            continue;
        }

        if &probe[8..20] == b"PLAYSTATION " || (probe[0] == 1 && &probe[1..6] == b"CD001") {
            debug!("Detected sector size {}", size);
            return Some(size);
        }
    }

    None
}
