// SPDX-License-Identifier: GPL-3.0
// mount.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use std::io::{Seek, SeekFrom};

use log::{debug, info};
use phildisc_utility::BigEndianSlice;

use super::{Engine, EngineContext, EmulationKind, Mount};
use crate::{
    backing_image::{
        base_offset_for, multi_file::check_path, raw_cd::validate_sector_size, read_fully,
        BackingImage, MultiFileImage, ProxyImage, RawCdImage,
    },
    collaborators::ProcessId,
    error::EngineError,
    proxy::{ProxyChannel, ProxyEndpoint},
    scsi::{TrackDescriptor, TrackTable, COOKED_SECTOR_SIZE, MAX_TRACKS},
};

/// Where the ISO 9660 primary volume descriptor sits in a cooked image.
const ISO_DESCRIPTOR_OFFSET: u64 = 0x8000;

/// How much of the descriptor the PS2 probe reads.
const ISO_DESCRIPTOR_PROBE: usize = 0xB0;

/// Offset of the root directory's data length in the descriptor. A root directory
/// of exactly one sector marks a CD.
const ROOT_DIRECTORY_SIZE_OFFSET: usize = 0xAA;
const CD_ROOT_DIRECTORY_SIZE: u32 = 0x800;

impl EngineContext {

    fn ensure_unmounted(&self) -> Result<(), EngineError> {
        if self.mount.is_some() {
            return Err(EngineError::Busy);
        }
        Ok(())
    }

    /// Makes the image the active mount.
    fn install(&mut self, kind: EmulationKind, mut image: BackingImage) {

        let identity = self.identity.identity();
        let total_emulation = !self.identity.disc_being_mounted() && identity.real.is_none();
        image.set_sector_cache(kind == EmulationKind::Ps3);

        info!(
            "Mounted {:?} image{}",
            kind,
            if total_emulation { " (total emulation)" } else { "" }
        );

        self.mount = Some(Mount {
            kind,
            total_emulation,
            image,
        });
    }

    fn open_raw_image(
        &self,
        path: &str,
        tracks: Vec<TrackDescriptor>,
        sector_size: u32
    ) -> Result<BackingImage, EngineError> {
        let tracks = TrackTable::new(tracks)?;
        let image = RawCdImage::open(self.collaborators.files.clone(), path, tracks, sector_size)?;
        Ok(BackingImage::RawCd(image))
    }

    /// Reads the start of the volume descriptor of a cooked image.
    fn read_descriptor(&self, path: &str) -> Result<Vec<u8>, EngineError> {

        let mut file = self.collaborators.files.open(path)?;
        file.seek(SeekFrom::Start(base_offset_for(path) + ISO_DESCRIPTOR_OFFSET))?;

        let mut descriptor = vec![0; ISO_DESCRIPTOR_PROBE];
        if read_fully(&mut *file, &mut descriptor)? != ISO_DESCRIPTOR_PROBE {
            return Err(EngineError::InvalidArgument(format!("{} is too short for a PS2 image", path)));
        }

        Ok(descriptor)
    }
}

impl Engine {

    /// Mounts a cooked image, possibly split over several files, as a PS3, DVD,
    /// BD or PS2 DVD disc.
    pub fn mount_linear_image(&self, kind: EmulationKind, paths: &[String]) -> Result<(), EngineError> {

        if !matches!(kind, EmulationKind::Ps3 | EmulationKind::Dvd | EmulationKind::Bd | EmulationKind::Ps2Dvd) {
            return Err(EngineError::InvalidArgument(format!("{:?} is not a linear image kind", kind)));
        }

        let mut slot = self.lock();
        let context = slot.context()?;
        context.ensure_unmounted()?;

        let image = MultiFileImage::open(context.collaborators.files.clone(), paths)?;
        context.install(kind, BackingImage::MultiFile(image));
        Ok(())
    }

    /// Mounts a single-file raw CD image as a PSX or PS2 CD.
    pub fn mount_raw_image(
        &self,
        kind: EmulationKind,
        path: &str,
        tracks: Vec<TrackDescriptor>,
        sector_size: u32
    ) -> Result<(), EngineError> {

        if !matches!(kind, EmulationKind::Psx | EmulationKind::Ps2Cd) {
            return Err(EngineError::InvalidArgument(format!("{:?} is not a raw image kind", kind)));
        }

        let mut slot = self.lock();
        let context = slot.context()?;
        context.ensure_unmounted()?;

        let image = context.open_raw_image(path, tracks, sector_size)?;
        context.install(kind, image);
        Ok(())
    }

    /// Mounts a PS2 image, working out from its contents whether it is a raw CD, a
    /// cooked CD or a DVD.
    pub fn mount_ps2_image(
        &self,
        paths: &[String],
        tracks: Vec<TrackDescriptor>,
        sector_size: u32
    ) -> Result<(), EngineError> {

        let [path] = paths else {
            return Err(EngineError::InvalidArgument(format!("{} PS2 image files given, expected 1", paths.len())));
        };

        let mut slot = self.lock();
        let context = slot.context()?;
        context.ensure_unmounted()?;

        // Several tracks can only be a raw CD.
        let cooked_kind = if tracks.len() > 1 {
            None
        } else {
            check_path(path)?;
            let descriptor = context.read_descriptor(path)?;

            if descriptor[0] == 1 && &descriptor[1..6] == b"CD001" {
                if descriptor.be_u32_at(ROOT_DIRECTORY_SIZE_OFFSET) == CD_ROOT_DIRECTORY_SIZE {
                    Some(EmulationKind::Ps2Cd)
                } else {
                    Some(EmulationKind::Ps2Dvd)
                }
            } else {
                None
            }
        };

        match cooked_kind {
            Some(kind) => {
                debug!("{} is a cooked {:?} image", path, kind);
                let image = MultiFileImage::open(context.collaborators.files.clone(), paths)?;
                context.install(kind, BackingImage::MultiFile(image));
            },
            None => {
                debug!("{} is a raw CD image", path);
                let image = context.open_raw_image(path, tracks, sector_size)?;
                context.install(EmulationKind::Ps2Cd, image);
            },
        }

        Ok(())
    }

    /// Mounts an image served by the shell process through a proxy endpoint. Only
    /// the shell may do this. PSX images need their track table.
    #[allow(clippy::too_many_arguments)]
    pub fn mount_proxy(
        &self,
        caller: ProcessId,
        endpoint: Box<dyn ProxyEndpoint>,
        kind: EmulationKind,
        size: u64,
        chunk_size: usize,
        tracks: Option<Vec<TrackDescriptor>>,
        sector_size: u32
    ) -> Result<(), EngineError> {

        if matches!(kind, EmulationKind::Off | EmulationKind::Ps2Cd | EmulationKind::Ps2Dvd) {
            return Err(EngineError::InvalidArgument(format!("{:?} cannot be served by proxy", kind)));
        }

        if chunk_size == 0 {
            return Err(EngineError::InvalidArgument("proxy chunk size must not be zero".to_string()));
        }

        let tracks = if kind == EmulationKind::Psx {
            match tracks {
                Some(tracks) if !tracks.is_empty() && tracks.len() <= MAX_TRACKS => Some(TrackTable::new(tracks)?),
                _ => return Err(EngineError::InvalidArgument("PSX proxy images need 1 to 99 tracks".to_string())),
            }
        } else {
            None
        };

        let mut slot = self.lock();
        let context = slot.context()?;

        if caller != context.config.shell_process {
            return Err(EngineError::InvalidArgument(format!("{:?} may not mount a proxy image", caller)));
        }
        context.ensure_unmounted()?;

        let sector_size = match tracks {
            Some(_) => validate_sector_size(sector_size),
            None => COOKED_SECTOR_SIZE,
        };

        let channel = ProxyChannel::connect(endpoint)?;
        let image = ProxyImage::new(channel, size, chunk_size, tracks, sector_size);
        context.install(kind, BackingImage::Proxy(image));
        Ok(())
    }

    /// Drops the active mount, closing its files or proxy connection.
    pub fn unmount(&self) -> Result<(), EngineError> {

        let mut slot = self.lock();
        let context = slot.context()?;

        let Some(mount) = context.mount.take() else {
            return Err(EngineError::NotMounted);
        };

        context.identity.clear_emulated_ps3_recording();
        info!("Unmounted {:?} image", mount.kind);
        Ok(())
    }
}
