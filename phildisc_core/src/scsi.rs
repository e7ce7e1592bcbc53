// SPDX-License-Identifier: GPL-3.0
// scsi.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use log::debug;
use phildisc_utility::{lba_to_msf_bcd, min, subq_crc, BigEndianSlice, RED_BOOK_LBA_OFFSET};

use crate::error::EngineError;

/// SCSI operation codes we answer.
pub const SCSI_CMD_READ_TOC_PMA_ATIP: u8 = 0x43;
pub const SCSI_CMD_GET_CONFIGURATION: u8 = 0x46;
pub const SCSI_CMD_GET_EVENT_STATUS_NOTIFICATION: u8 = 0x4A;
pub const SCSI_CMD_READ_DISC_INFORMATION: u8 = 0x51;
pub const SCSI_CMD_READ_TRACK_INFORMATION: u8 = 0x52;
pub const SCSI_CMD_READ_CD: u8 = 0xBE;

/// Sizes of the wire structures.
pub const TRACK_DESCRIPTOR_SIZE: usize = 8;
pub const SUBCHANNEL_Q_SIZE: usize = 12;
const TOC_HEADER_SIZE: usize = 4;
const TOC_SHORTHAND_SIZE: usize = TOC_HEADER_SIZE + TRACK_DESCRIPTOR_SIZE;
const TRACK_INFORMATION_SIZE: usize = 36;
const DISC_INFORMATION_SIZE: usize = 34;
const MEDIA_EVENT_SIZE: usize = 8;

/// Minimum CDB lengths for the commands that have fields we read.
const TEN_BYTE_CDB: usize = 10;
const TWELVE_BYTE_CDB: usize = 12;

/// Largest track table a disc can have.
pub const MAX_TRACKS: usize = 99;

const LEAD_OUT_TRACK: u8 = 0xAA;
const LEAD_OUT_ADR_CONTROL: u8 = 0x10;
const DATA_TRACK_ADR_CONTROL: u8 = 0x14;
const FORMAT_TOC: u8 = 0;
const ADDRESS_TYPE_TRACK: u8 = 1;
const MEDIA_CLASS_REQUEST: u8 = 0x10;

/// Sector size of a cooked image.
pub const COOKED_SECTOR_SIZE: u32 = 2048;

/// One entry of a track table, in the shape of the SCSI track descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrackDescriptor {
    pub adr_control: u8,
    pub track_number: u8,
    pub start: u32,
}

impl TrackDescriptor {

    /// Creates a new track descriptor.
    pub fn new(adr_control: u8, track_number: u8, start: u32) -> Self {
        TrackDescriptor {
            adr_control,
            track_number,
            start,
        }
    }

    /// Encodes the descriptor in its 8-byte wire form.
    pub fn to_bytes(&self) -> [u8; TRACK_DESCRIPTOR_SIZE] {
        let mut bytes = [0; TRACK_DESCRIPTOR_SIZE];
        bytes[1] = self.adr_control;
        bytes[2] = self.track_number;
        bytes.put_be_u32(4, self.start);
        bytes
    }

    /// Decodes a descriptor from its 8-byte wire form.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        TrackDescriptor {
            adr_control: bytes[1],
            track_number: bytes[2],
            start: bytes.be_u32_at(4),
        }
    }
}

/// A validated, non-empty track table with strictly increasing start addresses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackTable {
    tracks: Vec<TrackDescriptor>,
}

impl TrackTable {

    /// Validates and wraps the supplied tracks.
    pub fn new(tracks: Vec<TrackDescriptor>) -> Result<Self, EngineError> {

        if tracks.is_empty() || tracks.len() > MAX_TRACKS {
            return Err(EngineError::InvalidArgument(format!(
                "track count {} is outside 1..={}", tracks.len(), MAX_TRACKS
            )));
        }

        if tracks.windows(2).any(|pair| pair[1].start <= pair[0].start) {
            return Err(EngineError::InvalidArgument(
                "track start addresses must be strictly increasing".to_string()
            ));
        }

        Ok(TrackTable {
            tracks,
        })
    }

    pub fn tracks(&self) -> &[TrackDescriptor] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

/// Everything the synthesiser needs to know about the disc.
#[derive(Clone, Debug)]
pub struct DiscLayout {

    // Track table, a single synthetic data track for cooked images.
    tracks: Vec<TrackDescriptor>,

    // Sector count of the whole disc, which is also the lead-out address.
    total_sectors: u32,

    // Bytes per sector of the image.
    sector_size: u32,

    // Cooked images have no raw sectors to serve.
    cooked_2048: bool,
}

impl DiscLayout {

    /// Builds the layout of a raw image with a real track table.
    pub fn raw(table: &TrackTable, total_sectors: u32, sector_size: u32) -> Self {
        DiscLayout {
            tracks: table.tracks().to_vec(),
            total_sectors,
            sector_size,
            cooked_2048: false,
        }
    }

    /// Builds the layout of a cooked image, which is one data track.
    pub fn cooked(total_sectors: u32) -> Self {
        DiscLayout {
            tracks: vec![TrackDescriptor::new(DATA_TRACK_ADR_CONTROL, 1, 0)],
            total_sectors,
            sector_size: COOKED_SECTOR_SIZE,
            cooked_2048: true,
        }
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn total_sectors(&self) -> u32 {
        self.total_sectors
    }

    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }

    /// Finds the track containing the given sector.
    pub fn track_for_lba(&self, lba: u32) -> Option<&TrackDescriptor> {
        self.tracks.iter().enumerate().find_map(|(index, track)| {
            let end = self.tracks.get(index + 1).map_or(self.total_sectors, |next| next.start);
            (lba >= track.start && lba < end).then_some(track)
        })
    }

    /// Returns the size in sectors of the given zero-based track.
    fn track_size(&self, index: usize) -> u32 {
        let end = self.tracks.get(index + 1).map_or(self.total_sectors, |next| next.start);
        end.saturating_sub(self.tracks[index].start)
    }
}

/// How a command was dealt with. `NotHandled` means the real drive should get it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScsiOutcome {
    Handled,
    NotHandled,
    Failed,
}

/// A validated READ CD request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadCdRequest {
    pub lba: u32,
    pub count: u32,
    pub user_data: bool,
    pub subchannel_q: bool,
}

impl ReadCdRequest {

    /// Returns the size of the full response before truncation.
    pub fn output_size(&self, sector_size: u32) -> usize {
        let data = if self.user_data { self.count as usize * sector_size as usize } else { 0 };
        let subchannel = if self.subchannel_q { self.count as usize * SUBCHANNEL_Q_SIZE } else { 0 };
        data + subchannel
    }
}

/// What the caller must do next with a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScsiAction {
    Done(ScsiOutcome),
    ReadCd(ReadCdRequest),
}

/// Answers a command against a CD layout. READ CD needs sector data, so it comes
/// back as a request for the caller to carry out.
pub fn process_cd_command(
    layout: &DiscLayout,
    cdb: &[u8],
    out: &mut [u8],
    total_emulation: bool
) -> ScsiAction {

    let Some(opcode) = cdb.first() else {
        return ScsiAction::Done(ScsiOutcome::NotHandled);
    };

    match *opcode {
        SCSI_CMD_READ_TOC_PMA_ATIP => ScsiAction::Done(read_toc(layout, cdb, out)),
        SCSI_CMD_READ_TRACK_INFORMATION => ScsiAction::Done(read_track_information(layout, cdb, out)),
        SCSI_CMD_READ_DISC_INFORMATION => ScsiAction::Done(read_disc_information(layout, cdb, out)),
        SCSI_CMD_READ_CD => parse_read_cd(layout, cdb),
        _ if total_emulation => ScsiAction::Done(process_generic_command(cdb, out)),
        _ => ScsiAction::Done(ScsiOutcome::NotHandled),
    }
}

/// Answers READ TOC/PMA/ATIP in LBA form.
pub fn read_toc(layout: &DiscLayout, cdb: &[u8], out: &mut [u8]) -> ScsiOutcome {

    if cdb.len() < TEN_BYTE_CDB {
        return ScsiOutcome::Failed;
    }

    let format = cdb[2] & 0xF;
    let msf = cdb[1] & 2 != 0;
    if format != FORMAT_TOC || msf {
        debug!("TOC request with format {} (msf {}) left to the drive", format, msf);
        return ScsiOutcome::NotHandled;
    }

    let track_count = layout.track_count();
    let full_length = (TOC_HEADER_SIZE - 2 + TRACK_DESCRIPTOR_SIZE * (track_count + 1)) as u16;
    let requested = cdb[6] as usize;

    // The CD audio player asks for a single descriptor at a time.
    if out.len() == TOC_SHORTHAND_SIZE {
        let index = requested.saturating_sub(1);
        let Some(track) = layout.tracks.get(index) else {
            debug!("Track out of range {}", requested);
            return ScsiOutcome::Failed;
        };

        out.fill(0);
        out.put_be_u16(0, full_length - (index * TRACK_DESCRIPTOR_SIZE) as u16);
        out[2] = 1;
        out[3] = track_count as u8;
        out[TOC_HEADER_SIZE..].copy_from_slice(&track.to_bytes());
        return ScsiOutcome::Handled;
    }

    let allocation = cdb.be_u16_at(7) as usize;
    let mut response = vec![0; TOC_HEADER_SIZE];
    response.put_be_u16(0, full_length);
    response[2] = 1;
    response[3] = track_count as u8;

    if allocation > TOC_HEADER_SIZE {
        for track in &layout.tracks {
            response.extend_from_slice(&track.to_bytes());
        }
        let lead_out = TrackDescriptor::new(LEAD_OUT_ADR_CONTROL, LEAD_OUT_TRACK, layout.total_sectors);
        response.extend_from_slice(&lead_out.to_bytes());
    }

    copy_truncated(&response, out, allocation);
    ScsiOutcome::Handled
}

/// Answers READ TRACK INFORMATION addressed by track number.
pub fn read_track_information(layout: &DiscLayout, cdb: &[u8], out: &mut [u8]) -> ScsiOutcome {

    if cdb.len() < TEN_BYTE_CDB || layout.cooked_2048 {
        return ScsiOutcome::Failed;
    }

    if cdb[1] != ADDRESS_TYPE_TRACK {
        debug!("Track information address type {:#x} not implemented", cdb[1]);
        return ScsiOutcome::Failed;
    }

    let track = cdb.be_u32_at(2) as usize;
    if track == 0 || track > layout.track_count() {
        debug!("Invalid track {}", track);
        return ScsiOutcome::Failed;
    }

    let mut response = [0_u8; TRACK_INFORMATION_SIZE];
    response.put_be_u16(0, (TRACK_INFORMATION_SIZE - 2) as u16);
    response[2] = track as u8;
    response[3] = 1;
    response[6] = if track == 1 { 2 } else { 0xF };
    response.put_be_u32(8, layout.tracks[track - 1].start);
    response.put_be_u32(24, layout.track_size(track - 1));

    copy_truncated(&response, out, cdb.be_u16_at(7) as usize);
    ScsiOutcome::Handled
}

/// Answers READ DISC INFORMATION with a complete single-session disc.
pub fn read_disc_information(layout: &DiscLayout, cdb: &[u8], out: &mut [u8]) -> ScsiOutcome {

    if cdb.len() < TEN_BYTE_CDB {
        return ScsiOutcome::Failed;
    }

    let mut response = disc_information_block(layout.track_count() as u8);
    response[8] = 0x20;

    copy_truncated(&response, out, cdb.be_u16_at(7) as usize);
    ScsiOutcome::Handled
}

/// Validates a READ CD request.
pub fn parse_read_cd(layout: &DiscLayout, cdb: &[u8]) -> ScsiAction {

    if cdb.len() < TWELVE_BYTE_CDB {
        return ScsiAction::Done(ScsiOutcome::Failed);
    }

    let user_data = match cdb[9] {
        0 => false,
        0xF8 | 0x10 => true,
        other => {
            debug!("Unexpected value for misc: {:#04x}", other);
            return ScsiAction::Done(ScsiOutcome::Failed);
        }
    };

    let subchannel_q = match cdb[10] {
        0 => false,
        2 => true,
        other => {
            debug!("Unexpected value for subchannel: {:#04x}", other);
            return ScsiAction::Done(ScsiOutcome::Failed);
        }
    };

    let expected_sector_type = (cdb[1] >> 2) & 7;
    if expected_sector_type != 0 {
        debug!("Unexpected value for expected sector type: {}", expected_sector_type);
        return ScsiAction::Done(ScsiOutcome::Failed);
    }

    if layout.cooked_2048 {
        debug!("READ CD on a cooked image left to the drive");
        return ScsiAction::Done(ScsiOutcome::NotHandled);
    }

    ScsiAction::ReadCd(ReadCdRequest {
        lba: cdb.be_u32_at(2),
        count: cdb.be_u24_at(6),
        user_data,
        subchannel_q,
    })
}

/// Builds the sub-channel Q record for a sector, or `None` if no track holds it.
/// Relative time is only filled in alongside user data.
pub fn subchannel_q(layout: &DiscLayout, lba: u32, user_data: bool) -> Option<[u8; SUBCHANNEL_Q_SIZE]> {

    let track = layout.track_for_lba(lba)?;
    let mut record = [0_u8; SUBCHANNEL_Q_SIZE];

    record[0] = track.adr_control.rotate_left(4);
    record[1] = track.track_number;
    record[2] = 1;

    if user_data {
        let (minutes, seconds, frames) = lba_to_msf_bcd(lba);
        record[3] = minutes;
        record[4] = seconds;
        record[5] = frames;
    }

    let (minutes, seconds, frames) = lba_to_msf_bcd(lba + RED_BOOK_LBA_OFFSET);
    record[7] = minutes;
    record[8] = seconds;
    record[9] = frames;

    let crc = subq_crc(&record[..10]);
    record.put_be_u16(10, crc);

    Some(record)
}

/// Answers commands with no image model behind them while there is no real disc
/// at all. Unknown commands come back zeroed.
pub fn process_generic_command(cdb: &[u8], out: &mut [u8]) -> ScsiOutcome {

    out.fill(0);

    match cdb.first() {
        Some(&SCSI_CMD_GET_EVENT_STATUS_NOTIFICATION) => {
            if cdb.get(4) == Some(&MEDIA_CLASS_REQUEST) {
                let mut response = [0_u8; MEDIA_EVENT_SIZE];
                response.put_be_u16(0, (MEDIA_EVENT_SIZE - 4) as u16);
                response[2] = 4;
                response[3] = 0xF;
                response[5] = 2;
                copy_truncated(&response, out, MEDIA_EVENT_SIZE);
            } else {
                debug!("Event status class {:?}", cdb.get(4));
            }
        },
        Some(&SCSI_CMD_READ_DISC_INFORMATION) => {
            let allocation = if cdb.len() >= TEN_BYTE_CDB { cdb.be_u16_at(7) as usize } else { out.len() };
            copy_truncated(&disc_information_block(1), out, allocation);
        },
        _ => (),
    }

    ScsiOutcome::Handled
}

/// Builds the disc information block shared by the synthesised and generic replies.
fn disc_information_block(last_track: u8) -> [u8; DISC_INFORMATION_SIZE] {

    let mut block = [0_u8; DISC_INFORMATION_SIZE];
    block.put_be_u16(0, (DISC_INFORMATION_SIZE - 2) as u16);
    block[2] = 0x0E;
    block[3] = 1;
    block[4] = 1;
    block[5] = 1;
    block[6] = last_track;
    block[7] = 0x20;
    block.put_be_u32(16, 0xFFFF_FFFF);
    block.put_be_u32(20, 0xFFFF_FFFF);
    block
}

/// Zeroes `out` and copies as much of `response` as both it and the allocation
/// length allow.
fn copy_truncated(response: &[u8], out: &mut [u8], allocation: usize) {
    out.fill(0);
    let length = min(min(out.len(), allocation), response.len());
    out[..length].copy_from_slice(&response[..length]);
}
