// SPDX-License-Identifier: GPL-3.0
// device_commands.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use log::debug;
use phildisc_utility::min;

use super::{Completion, Engine, EmulationKind, Hook, Slot};
use crate::{
    backing_image::Destination,
    disc_identity::{DiscType, BDVD_DEVICE_ID},
    dispatcher::Command,
    error::{FAILED, SUCCEEDED},
    scsi::{
        process_cd_command, process_generic_command, subchannel_q, DiscLayout, ReadCdRequest,
        ScsiAction, ScsiOutcome, SCSI_CMD_GET_CONFIGURATION,
    },
};

/// Device commands we look at.
pub const STORAGE_COMMAND_NATIVE: u32 = 0x01;
pub const STORAGE_COMMAND_GET_DEVICE_SIZE: u32 = 0x10;
pub const STORAGE_COMMAND_GET_DEVICE_TYPE: u32 = 0x11;

/// Sector size always reported by device size queries.
const REPORTED_SECTOR_SIZE: u64 = 2048;

/// Disc types whose region check is skipped.
const REGION_FREE_TYPES: [DiscType; 3] = [DiscType::PSX_CD, DiscType::PS2_CD, DiscType::PS2_DVD];

impl Engine {

    /// Handles a device command sent to the optical drive. `indata` holds the CDB
    /// for native commands.
    pub fn send_device_command(
        &self,
        device: u64,
        command: u32,
        indata: &[u8],
        outdata: &mut [u8]
    ) -> Hook<i32> {

        if device != BDVD_DEVICE_ID {
            return Hook::PassThrough;
        }

        let mut slot = self.lock();
        match Self::process_command(&mut slot, command, indata, outdata) {
            ScsiOutcome::Handled => Hook::Handled(SUCCEEDED),
            ScsiOutcome::Failed => Hook::Handled(FAILED),
            ScsiOutcome::NotHandled => Hook::PassThrough,
        }
    }

    /// Handles an asynchronous device command. Whatever we answer is reported through
    /// the completion, and the call itself always succeeds.
    pub fn async_send_device_command(
        &self,
        device: u64,
        command: u32,
        indata: &[u8],
        outdata: &mut [u8],
        param: u64,
        notify: &mut dyn FnMut(Completion)
    ) -> Hook<i32> {

        if device != BDVD_DEVICE_ID {
            return Hook::PassThrough;
        }

        let mut slot = self.lock();
        let status = match Self::process_command(&mut slot, command, indata, outdata) {
            ScsiOutcome::Handled => SUCCEEDED,
            ScsiOutcome::Failed => FAILED,
            ScsiOutcome::NotHandled => return Hook::PassThrough,
        };

        notify(Completion { param, status });
        Hook::Handled(SUCCEEDED)
    }

    fn process_command(slot: &mut Slot, command: u32, indata: &[u8], outdata: &mut [u8]) -> ScsiOutcome {

        let Ok(context) = slot.context() else {
            return ScsiOutcome::NotHandled;
        };

        match command {
            STORAGE_COMMAND_GET_DEVICE_SIZE => {
                let Some(mount) = context.mount.as_ref() else {
                    return ScsiOutcome::NotHandled;
                };

                let size = (mount.image.device_sector_count() << 32) | REPORTED_SECTOR_SIZE;
                debug!("Faking device size to {:#018x}", size);
                copy_reply(&size.to_be_bytes(), outdata);
                ScsiOutcome::Handled
            },
            STORAGE_COMMAND_GET_DEVICE_TYPE => {
                let fake = context.identity().fake;
                if fake.is_none() {
                    return ScsiOutcome::NotHandled;
                }

                copy_reply(&fake.0.to_be_bytes(), outdata);
                ScsiOutcome::Handled
            },
            STORAGE_COMMAND_NATIVE => Self::process_native(slot, indata, outdata),
            _ => ScsiOutcome::NotHandled,
        }
    }

    /// Answers a SCSI command from the image, or leaves it to the drive.
    fn process_native(slot: &mut Slot, cdb: &[u8], outdata: &mut [u8]) -> ScsiOutcome {

        let Some(&opcode) = cdb.first() else {
            return ScsiOutcome::NotHandled;
        };

        let Ok(context) = slot.context() else {
            return ScsiOutcome::NotHandled;
        };

        if opcode == SCSI_CMD_GET_CONFIGURATION && REGION_FREE_TYPES.contains(&context.identity().effective) {
            debug!("Region bypass");
            outdata.fill(0);
            return ScsiOutcome::Handled;
        }

        let Some(mount) = context.mount.as_ref() else {
            return ScsiOutcome::NotHandled;
        };

        let total_emulation = mount.total_emulation;
        let layout = match mount.image.raw_layout() {
            Some(layout) => layout,
            None if mount.kind == EmulationKind::Ps2Cd => {
                DiscLayout::cooked(mount.image.device_sector_count() as u32)
            },
            None if total_emulation => return process_generic_command(cdb, outdata),
            None => return ScsiOutcome::NotHandled,
        };

        match process_cd_command(&layout, cdb, outdata, total_emulation) {
            ScsiAction::Done(outcome) => outcome,
            ScsiAction::ReadCd(request) => Self::read_cd(slot, &layout, request, outdata),
        }
    }

    /// Carries out a READ CD, fetching sector data through the dispatcher. With
    /// sub-channel Q each sector is followed by its Q record.
    fn read_cd(slot: &mut Slot, layout: &DiscLayout, request: ReadCdRequest, outdata: &mut [u8]) -> ScsiOutcome {

        outdata.fill(0);

        let sector_size = layout.sector_size() as usize;
        let per_sector = ReadCdRequest { count: 1, ..request }.output_size(layout.sector_size());
        if per_sector == 0 {
            return ScsiOutcome::Handled;
        }

        // Nothing past the end of the buffer is worth reading.
        let count = min(request.count as usize, outdata.len().div_ceil(per_sector)) as u32;
        let mut response = Vec::with_capacity(count as usize * per_sector);

        if !request.subchannel_q {
            match Self::read_raw_sectors(slot, request.lba, count, sector_size) {
                Some(sectors) => response = sectors,
                None => return ScsiOutcome::Failed,
            }
        } else {
            for index in 0..count {
                let lba = request.lba.saturating_add(index);

                if request.user_data {
                    let Some(sector) = Self::read_raw_sectors(slot, lba, 1, sector_size) else {
                        return ScsiOutcome::Failed;
                    };
                    response.extend_from_slice(&sector);
                }

                let Some(record) = subchannel_q(layout, lba, request.user_data) else {
                    debug!("No track holds sector {}", lba);
                    return ScsiOutcome::Failed;
                };
                response.extend_from_slice(&record);
            }
        }

        let length = min(response.len(), outdata.len());
        outdata[..length].copy_from_slice(&response[..length]);
        ScsiOutcome::Handled
    }

    fn read_raw_sectors(slot: &mut Slot, lba: u32, count: u32, sector_size: usize) -> Option<Vec<u8>> {

        let destination = Destination::local(count as usize * sector_size);
        let command = Command::ReadCdRaw {
            start_sector: lba as u64,
            count,
            destination,
        };

        match slot.read(command) {
            Ok(destination) => destination.into_local(),
            Err(err) => {
                debug!("READ CD of {} sectors at {} failed: {}", count, lba, err);
                None
            },
        }
    }
}

/// Zeroes `outdata` and copies as much of `reply` as fits.
fn copy_reply(reply: &[u8], outdata: &mut [u8]) {
    outdata.fill(0);
    let length = min(reply.len(), outdata.len());
    outdata[..length].copy_from_slice(&reply[..length]);
}
