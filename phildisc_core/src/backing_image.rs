// SPDX-License-Identifier: GPL-3.0
// backing_image.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use std::io;

use crate::{
    collaborators::ImageFile,
    scsi::{DiscLayout, COOKED_SECTOR_SIZE},
};

/// This module contains the destination of a read, either engine memory or the
/// address space of the caller.
pub mod destination;

/// This module contains the reader for images split over several cooked files.
pub mod multi_file;

/// This module contains the reader for single-file raw CD images.
pub mod raw_cd;

/// This module contains the reader for images served by a remote executor.
pub mod proxy_image;

pub use destination::Destination;
pub use multi_file::MultiFileImage;
pub use proxy_image::ProxyImage;
pub use raw_cd::RawCdImage;

/// Size of the intermediate buffer used for transfers into another process.
pub const READ_BUF_SIZE: usize = 256 * 1024;

/// Largest batch of raw sectors read in one go.
pub const READ_BUF_SIZE_SECTORS: u64 = 128;

/// Size of the sector cache kept by the cooked readers.
pub const SECTOR_CACHE_SIZE: usize = 2048;

/// Images with this suffix carry a 64 KiB container header before the disc data.
const CONTAINER_SUFFIX: &str = ".PNG";
const CONTAINER_BASE_OFFSET: u64 = 64 * 1024;

/// The bytes standing in for the disc, in whichever of the supported forms they
/// take.
pub enum BackingImage {
    MultiFile(MultiFileImage),
    RawCd(RawCdImage),
    Proxy(ProxyImage),
}

impl BackingImage {

    /// Returns the number of sectors reported as the device size. Device size queries
    /// always count in 2048-byte sectors unless a raw track layout is present.
    pub fn device_sector_count(&self) -> u64 {
        match self {
            BackingImage::MultiFile(image) => image.total_size() / COOKED_SECTOR_SIZE as u64,
            BackingImage::RawCd(image) => image.num_sectors(),
            BackingImage::Proxy(image) => image.sector_count(),
        }
    }

    /// Returns the number of sectors of the given size the image holds, for device
    /// info queries.
    pub fn sector_count_for(&self, sector_size: u32) -> u64 {
        match self {
            BackingImage::MultiFile(image) => image.total_size() / sector_size.max(1) as u64,
            _ => self.device_sector_count(),
        }
    }

    /// Returns the path of the first image file, if the image lives in files.
    pub fn first_path(&self) -> Option<&str> {
        match self {
            BackingImage::MultiFile(image) => image.first_path(),
            BackingImage::RawCd(image) => Some(image.path()),
            BackingImage::Proxy(_) => None,
        }
    }

    /// Returns the raw track layout, if the image has one.
    pub fn raw_layout(&self) -> Option<DiscLayout> {
        match self {
            BackingImage::MultiFile(_) => None,
            BackingImage::RawCd(image) => Some(image.layout()),
            BackingImage::Proxy(image) => image.layout(),
        }
    }

    /// Turns the single-sector cache on or off, for readers that have one.
    pub fn set_sector_cache(&mut self, enabled: bool) {
        match self {
            BackingImage::MultiFile(image) => image.set_sector_cache(enabled),
            BackingImage::RawCd(_) => (),
            BackingImage::Proxy(image) => image.set_sector_cache(enabled),
        }
    }
}

/// Returns the container base offset implied by the given image path.
pub fn base_offset_for(path: &str) -> u64 {
    if path.ends_with(CONTAINER_SUFFIX) {
        CONTAINER_BASE_OFFSET
    } else {
        0
    }
}

/// Reads until the buffer is full or the file ends, returning the byte count.
pub fn read_fully(file: &mut dyn ImageFile, buffer: &mut [u8]) -> io::Result<usize> {

    let mut filled = 0;

    while filled < buffer.len() {
        match file.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }

    Ok(filled)
}

#[cfg(test)]
mod tests;
