// SPDX-License-Identifier: GPL-3.0
// detection.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use log::debug;
use phildisc_utility::BigEndianSlice;

use crate::collaborators::PhysicalDrive;

/// Size of the sectors the probes read.
pub const PROBE_SECTOR_SIZE: usize = 2048;

/// Byte the probe buffer is pre-filled with. Some drives report success without
/// transferring anything, so a sector made only of this byte counts as a failed read.
pub const SENTINEL: u8 = 0x5B;

/// Sector holding the ISO 9660 primary volume descriptor.
pub const VOLUME_DESCRIPTOR_SECTOR: u32 = 0x10;

/// Offset of the root directory extent within the primary volume descriptor.
pub const ROOT_EXTENT_OFFSET: usize = 0x9C + 6;

/// What a PlayStation format probe found.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayStationFormat {
    Neither,
    Psx,
    Ps2,
}

/// This struct runs probes against the real drive, keeping track of whether the
/// disc could be read at all.
pub struct Prober<'a> {

    // The real drive.
    drive: &'a mut dyn PhysicalDrive,

    // Attempts for primary probes, follow-up reads get one fewer.
    retries: u32,

    // Set when a primary probe failed.
    could_not_read: bool,
}

impl<'a> Prober<'a> {

    /// Creates a new prober over the given drive.
    pub fn new(drive: &'a mut dyn PhysicalDrive, retries: u32) -> Self {
        Prober {
            drive,
            retries: retries.max(1),
            could_not_read: false,
        }
    }

    /// Returns true if a primary probe failed to read the disc.
    pub fn could_not_read(&self) -> bool {
        self.could_not_read
    }

    /// Reads one sector from the real drive, retrying the given number of times.
    pub fn read_sector(&mut self, lba: u32, attempts: u32) -> Option<Vec<u8>> {

        for _ in 0..attempts {
            let mut sector = vec![SENTINEL; PROBE_SECTOR_SIZE];

            match self.drive.read_sectors(lba as u64, 1, &mut sector) {
                Ok(()) if sector.iter().any(|byte| *byte != SENTINEL) => return Some(sector),
                Ok(()) => debug!("Sector {:#x} came back untouched", lba),
                Err(err) => debug!("Sector {:#x} read failed: {}", lba, err),
            }
        }

        None
    }

    /// Reads the volume descriptor, flagging the disc as unreadable on failure.
    fn read_volume_descriptor(&mut self) -> Option<Vec<u8>> {
        let sector = self.read_sector(VOLUME_DESCRIPTOR_SECTOR, self.retries);
        if sector.is_none() {
            self.could_not_read = true;
        }
        sector
    }

    /// Checks for the PlayStation signature, and for PS2 discs if asked to.
    pub fn playstation_format(&mut self, check_ps2: bool) -> PlayStationFormat {

        let Some(descriptor) = self.read_volume_descriptor() else {
            return PlayStationFormat::Neither;
        };

        if &descriptor[1..6] != b"CD001" || &descriptor[8..20] != b"PLAYSTATION " {
            return PlayStationFormat::Neither;
        }

        if !check_ps2 {
            return PlayStationFormat::Psx;
        }

        // A PS2 disc boots through BOOT2 in SYSTEM.CNF.
        let follow_up = self.retries.saturating_sub(1).max(1);
        let root = descriptor.be_u32_at(ROOT_EXTENT_OFFSET);
        let is_ps2 = self.read_sector(root, follow_up)
            .and_then(|directory| find_file_extent(&directory, "SYSTEM.CNF;1"))
            .and_then(|extent| self.read_sector(extent, follow_up))
            .is_some_and(|config| config.starts_with(b"BOOT2"));

        if is_ps2 {
            PlayStationFormat::Ps2
        } else {
            PlayStationFormat::Psx
        }
    }

    /// Checks for the markers a burned PS3 disc carries.
    pub fn ps3_marker(&mut self) -> bool {

        let Some(descriptor) = self.read_volume_descriptor() else {
            return false;
        };

        if &descriptor[1..6] == b"CD001" && &descriptor[0x28..0x31] == b"PS3VOLUME" {
            return true;
        }

        if self.read_sector(0x01, self.retries).is_some_and(|sector| sector.starts_with(b"PlayStation3")) {
            return true;
        }

        // Generic burning tools leave just the PS3_GAME folder record.
        self.read_sector(0x14, self.retries).is_some_and(|sector| {
            (0x12..0x40).any(|at| &sector[at..at + 8] == b"PS3_GAME")
        })
    }
}

/// Walks an ISO 9660 directory sector looking for the named entry, comparing names
/// without regard to case, and returns its extent.
pub fn find_file_extent(directory: &[u8], name: &str) -> Option<u32> {

    let name = name.as_bytes();
    let mut at = 0;

    while at < directory.len() {
        let record_length = directory[at] as usize;
        if record_length < 0x21 || at + record_length >= directory.len() {
            break;
        }

        let name_start = at + 0x21;
        let name_length = directory.get(at + 0x20).copied().unwrap_or(0) as usize;
        if name_length == name.len()
            && name_start + name_length <= directory.len()
            && directory[name_start..name_start + name_length].eq_ignore_ascii_case(name) {
            return Some(directory.be_u32_at(at + 6));
        }

        at += record_length;
    }

    debug!("{} not found", String::from_utf8_lossy(name));
    None
}
