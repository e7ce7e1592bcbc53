// SPDX-License-Identifier: GPL-3.0
// lib.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

// This crate contains useful utility functions that can be used throughout the codebase,
// mostly to do with CD addressing and the byte-level layout of SCSI structures.

/// Exists to allow us to define custom trait operations on byte slices.
type ByteSlice = [u8];

/// Number of frames (sectors) per second of CD time.
pub const FRAMES_PER_SECOND: u32 = 75;

/// Number of seconds per minute of CD time.
pub const SECONDS_PER_MINUTE: u32 = 60;

/// Red-Book offset between LBA 0 and absolute time 00:02:00.
pub const RED_BOOK_LBA_OFFSET: u32 = 150;

/// Generator polynomial for the sub-channel Q CRC (CRC-16/CCITT).
const CRC_POLYNOMIAL: u16 = 0x1021;

/// CRC-16/CCITT lookup table, generated at compile time.
pub const CRC16_CCITT_TABLE: [u16; 256] = build_crc_table();

/// This trait exists to allow us to read and write big-endian values at arbitrary
/// offsets within a byte slice, which is how every SCSI structure is laid out.
pub trait BigEndianSlice {

    /// This function should return the big-endian `u16` found at the given offset.
    fn be_u16_at(&self, at: usize) -> u16;

    /// This function should return the big-endian 24-bit value found at the given
    /// offset, widened to `u32`.
    fn be_u24_at(&self, at: usize) -> u32;

    /// This function should return the big-endian `u32` found at the given offset.
    fn be_u32_at(&self, at: usize) -> u32;

    /// This function should store a `u16` at the given offset in big-endian order.
    fn put_be_u16(&mut self, at: usize, value: u16);

    /// This function should store a `u32` at the given offset in big-endian order.
    fn put_be_u32(&mut self, at: usize, value: u32);
}

impl BigEndianSlice for ByteSlice {

    #[inline(always)]
    fn be_u16_at(&self, at: usize) -> u16 {
        u16::from_be_bytes([self[at], self[at + 1]])
    }

    #[inline(always)]
    fn be_u24_at(&self, at: usize) -> u32 {
        ((self[at] as u32) << 16) | ((self[at + 1] as u32) << 8) | (self[at + 2] as u32)
    }

    #[inline(always)]
    fn be_u32_at(&self, at: usize) -> u32 {
        u32::from_be_bytes([self[at], self[at + 1], self[at + 2], self[at + 3]])
    }

    #[inline(always)]
    fn put_be_u16(&mut self, at: usize, value: u16) {
        self[at..at + 2].copy_from_slice(&value.to_be_bytes());
    }

    #[inline(always)]
    fn put_be_u32(&mut self, at: usize, value: u32) {
        self[at..at + 4].copy_from_slice(&value.to_be_bytes());
    }
}

/// Encodes a binary value in the range 0-99 as packed BCD.
#[inline(always)]
pub fn to_bcd(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

/// Converts a sector address to minutes, seconds and frames. No Red-Book offset
/// is applied here, callers add it when they need absolute time.
pub fn lba_to_msf(lba: u32) -> (u8, u8, u8) {

    let frames_per_minute = FRAMES_PER_SECOND * SECONDS_PER_MINUTE;
    let minutes = lba / frames_per_minute;
    let seconds = (lba % frames_per_minute) / FRAMES_PER_SECOND;
    let frames = lba % FRAMES_PER_SECOND;

    (minutes as u8, seconds as u8, frames as u8)
}

/// Converts a sector address to BCD-encoded minutes, seconds and frames.
pub fn lba_to_msf_bcd(lba: u32) -> (u8, u8, u8) {
    let (minutes, seconds, frames) = lba_to_msf(lba);
    (to_bcd(minutes), to_bcd(seconds), to_bcd(frames))
}

/// Builds the CRC-16/CCITT lookup table one entry at a time.
const fn build_crc_table() -> [u16; 256] {

    let mut table = [0_u16; 256];
    let mut index = 0;

    while index < 256 {
        let mut crc = (index as u16) << 8;
        let mut bit = 0;

        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ CRC_POLYNOMIAL
            } else {
                crc << 1
            };
            bit += 1;
        }

        table[index] = crc;
        index += 1;
    }

    table
}

/// Calculates the sub-channel Q CRC over the supplied bytes: CRC-16/CCITT with an
/// initial value of 0, complemented on output.
pub fn subq_crc(data: &[u8]) -> u16 {

    let mut crc = 0_u16;

    for byte in data {
        crc = CRC16_CCITT_TABLE[((crc >> 8) as u8 ^ *byte) as usize] ^ (crc << 8);
    }

    !crc
}

/// Re-exported stdlib `min` function, to keep all our utility functions together
/// here in the same way they are for the C macro versions.
pub use std::cmp::min;
