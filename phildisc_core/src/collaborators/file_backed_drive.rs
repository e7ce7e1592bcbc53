// SPDX-License-Identifier: GPL-3.0
// file_backed_drive.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use std::io::{Read, Seek, SeekFrom};

use log::debug;

use super::{ImageFile, PhysicalDrive};
use crate::{
    disc_identity::DiscType,
    error::EngineError,
};

/// Size of the sectors the drive hands out.
const SECTOR_SIZE: u64 = 2048;

/// This struct models a real drive whose disc is a cooked 2048-byte image file,
/// which is handy for exercising disc type detection without hardware.
pub struct FileBackedDrive {

    // The disc itself.
    disc: Box<dyn ImageFile>,

    // What the drive reports the disc to be.
    disc_type: DiscType,
}

impl FileBackedDrive {

    /// Creates a drive holding the supplied disc, reporting the given type.
    pub fn new(disc: Box<dyn ImageFile>, disc_type: DiscType) -> Self {
        FileBackedDrive {
            disc,
            disc_type,
        }
    }
}

impl PhysicalDrive for FileBackedDrive {

    fn device_type(&mut self) -> Option<DiscType> {
        Some(self.disc_type)
    }

    fn read_sectors(
        &mut self,
        start_sector: u64,
        count: u32,
        buffer: &mut [u8]
    ) -> Result<(), EngineError> {

        let length = (count as u64 * SECTOR_SIZE) as usize;

        if buffer.len() < length {
            return Err(EngineError::InvalidArgument(format!(
                "buffer of {} bytes can't hold {} sectors", buffer.len(), count
            )));
        }

        debug!("Drive read of {} sectors at {:#x}", count, start_sector);
        let Some(position) = start_sector.checked_mul(SECTOR_SIZE) else {
            buffer[..length].fill(0);
            return Ok(());
        };
        self.disc.seek(SeekFrom::Start(position))?;

        // Anything past the end of the disc reads back as zero, just like an
        // unrecorded area would.
        let mut filled = 0;
        while filled < length {
            let read = self.disc.read(&mut buffer[filled..length])?;
            if read == 0 {
                break;
            }
            filled += read;
        }
        buffer[filled..length].fill(0);

        Ok(())
    }
}
