// SPDX-License-Identifier: GPL-3.0
// proxy_image.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;
use phildisc_utility::min;

use super::{Destination, SECTOR_CACHE_SIZE};
use crate::{
    error::EngineError,
    proxy::{ProxyChannel, ProxyCommand, ProxyMessage},
    scsi::{DiscLayout, TrackTable, COOKED_SECTOR_SIZE},
};

/// This struct reads an image held by a cooperating executor process, which does
/// the file I/O on our behalf.
pub struct ProxyImage {

    // Connection to the executor.
    channel: ProxyChannel,

    // Size of the image in bytes, and the most the executor moves per request.
    size: u64,
    chunk_size: usize,

    // Track layout of CD images.
    tracks: Option<TrackTable>,
    sector_size: u32,

    // Last whole-sector read, keyed by disc offset.
    cached_sector: Option<(u64, Vec<u8>)>,
    cache_enabled: bool,
}

impl ProxyImage {

    /// Creates a new image over an already connected channel.
    pub fn new(
        channel: ProxyChannel,
        size: u64,
        chunk_size: usize,
        tracks: Option<TrackTable>,
        sector_size: u32
    ) -> Self {
        ProxyImage {
            channel,
            size,
            chunk_size,
            tracks,
            sector_size,
            cached_sector: None,
            cache_enabled: false,
        }
    }

    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }

    /// Returns the sector count, in raw sectors when the image has tracks.
    pub fn sector_count(&self) -> u64 {
        match self.tracks {
            Some(_) => self.size / self.sector_size.max(1) as u64,
            None => self.size / COOKED_SECTOR_SIZE as u64,
        }
    }

    pub fn layout(&self) -> Option<DiscLayout> {
        self.tracks
            .as_ref()
            .map(|tracks| DiscLayout::raw(tracks, self.sector_count() as u32, self.sector_size))
    }

    pub fn set_sector_cache(&mut self, enabled: bool) {
        self.cache_enabled = enabled;
        self.cached_sector = None;
    }

    /// Has the executor read `destination.len()` bytes from the given offset.
    pub fn read(
        &mut self,
        command: ProxyCommand,
        offset: u64,
        destination: &mut Destination
    ) -> Result<(), EngineError> {

        let length = destination.len();
        if length == 0 {
            return Ok(());
        }

        // The executor can write straight into its own memory.
        if destination.caller() == Some(self.channel.executor()) {
            let address = destination.remote_address().and_then(|address| u32::try_from(address).ok());
            if let (Some(address), Ok(length)) = (address, u32::try_from(length)) {
                debug!("Direct proxy read {:#x} {:#x}", offset, length);
                return self.request(ProxyMessage::new(command, offset, address, length));
            }
        }

        let cacheable = self.cache_enabled && command == ProxyCommand::ReadIso && length == SECTOR_CACHE_SIZE;
        if cacheable {
            if let Some((cached_offset, sector)) = &self.cached_sector {
                if *cached_offset == offset {
                    return destination.store(0, sector);
                }
            }
        }
        self.cached_sector = None;

        let chunk = min(length, self.chunk_size.max(1));
        let page = Arc::new(Mutex::new(vec![0; chunk]));
        let address = self.channel.export_page(page.clone())?;

        let result = self.transfer(command, offset, destination, &page, address);
        self.channel.unexport_page(address);
        result?;

        if cacheable {
            let mut sector = vec![0; SECTOR_CACHE_SIZE];
            destination.load(0, &mut sector)?;
            self.cached_sector = Some((offset, sector));
        }

        Ok(())
    }

    /// Moves the data through the lent page one chunk at a time.
    fn transfer(
        &mut self,
        command: ProxyCommand,
        offset: u64,
        destination: &mut Destination,
        page: &Arc<Mutex<Vec<u8>>>,
        address: u32
    ) -> Result<(), EngineError> {

        let length = destination.len();
        let chunk = page.lock().len();
        let mut done = 0;

        while done < length {
            let size = min(length - done, chunk);
            self.request(ProxyMessage::new(command, offset.saturating_add(done as u64), address, size as u32))?;
            destination.store(done, &page.lock()[..size])?;
            done += size;
        }

        Ok(())
    }

    fn request(&mut self, message: ProxyMessage) -> Result<(), EngineError> {
        match self.channel.request(message)? {
            0 => Ok(()),
            status => {
                warn!("Proxy executor returned {} for {:?}", status, message);
                Err(EngineError::RemoteStatus(status))
            },
        }
    }
}
