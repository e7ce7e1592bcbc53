// SPDX-License-Identifier: GPL-3.0
// video_mode.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use log::debug;
use phildisc_utility::{BigEndianSlice, min};

use super::detection::{find_file_extent, ROOT_EXTENT_OFFSET, VOLUME_DESCRIPTOR_SECTOR};

/// Video mode values, as detected and as forced into the shell.
pub const VIDEO_MODE_NTSC: i32 = 0;
pub const VIDEO_MODE_PAL: i32 = 1;
pub const VIDEO_MODE_UNDETERMINED: i32 = -1;

/// Longest boot executable name we'll pick out of SYSTEM.CNF.
const MAX_EXECUTABLE_NAME: usize = 117;

/// Where the region string lives in the first sector of a PSX executable.
const EXECUTABLE_REGION_OFFSET: usize = 0x71;

/// State of the shell's video mode with respect to the PSX disc.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VideoModeState {

    // Nothing to do.
    Idle,

    // A previously applied mode must be undone.
    Stale,

    // A mode was detected but not yet applied.
    Detected(i32),

    // The detected mode has been applied.
    Applied,
}

/// What the shell should do to its video mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VideoModePatch {
    Force(i32),
    Restore,
}

impl VideoModeState {

    /// Moves the state machine on by one device size query from the shell. `detected`
    /// carries the outcome of detection when it was run for this query.
    pub fn advance(self, is_psx: bool, detected: Option<i32>) -> (Self, Option<VideoModePatch>) {

        let mut state = self;

        if is_psx {
            if state != VideoModeState::Applied {
                if let Some(mode) = detected.filter(|mode| *mode >= 0) {
                    state = VideoModeState::Detected(mode);
                }
            }
        } else if matches!(state, VideoModeState::Detected(_) | VideoModeState::Applied) {
            state = VideoModeState::Stale;
        }

        match state {
            VideoModeState::Detected(mode) => (VideoModeState::Applied, Some(VideoModePatch::Force(mode))),
            VideoModeState::Stale => (VideoModeState::Idle, Some(VideoModePatch::Restore)),
            other => (other, None),
        }
    }
}

/// Works out whether the PSX disc readable through `read_sector` is PAL or NTSC, by
/// its title id or failing that by the region string in its boot executable.
pub fn detect(read_sector: &mut dyn FnMut(u32) -> Option<Vec<u8>>) -> i32 {

    let mode = detect_inner(read_sector).unwrap_or(VIDEO_MODE_UNDETERMINED);
    match mode {
        VIDEO_MODE_NTSC => debug!("NTSC"),
        VIDEO_MODE_PAL => debug!("PAL"),
        _ => debug!("Video mode undetermined"),
    }

    mode
}

fn detect_inner(read_sector: &mut dyn FnMut(u32) -> Option<Vec<u8>>) -> Option<i32> {

    let descriptor = read_sector(VOLUME_DESCRIPTOR_SECTOR)?;
    let root = read_sector(descriptor.be_u32_at(ROOT_EXTENT_OFFSET))?;
    let config = read_sector(find_file_extent(&root, "SYSTEM.CNF;1")?)?;

    let executable = boot_executable(&config)?;
    debug!("PSX EXE: {}", String::from_utf8_lossy(&executable));

    if let Some(mode) = region_from_title_id(&executable) {
        return Some(mode);
    }

    let mut name = String::from_utf8_lossy(&executable).into_owned();
    name.push_str(";1");
    let header = read_sector(find_file_extent(&root, &name)?)?;

    if header.get(EXECUTABLE_REGION_OFFSET..).is_some_and(|region| region.starts_with(b"Europe")) {
        Some(VIDEO_MODE_PAL)
    } else {
        Some(VIDEO_MODE_NTSC)
    }
}

/// Pulls the boot executable's file name out of a SYSTEM.CNF sector.
fn boot_executable(config: &[u8]) -> Option<Vec<u8>> {

    let text = &config[..config.iter().position(|byte| *byte == 0).unwrap_or(config.len())];
    let start = find(text, b"cdrom").or_else(|| find(text, b"CDROM"))? + 5;

    let mut rest = text[start..].iter().skip_while(|byte| !byte.is_ascii_alphabetic()).peekable();
    rest.peek()?;

    // Only the last path component counts.
    let mut name = Vec::new();
    for byte in rest.take_while(|byte| **byte >= b' ' && **byte != b';') {
        if name.len() >= MAX_EXECUTABLE_NAME {
            break;
        }
        if *byte == b'\\' || *byte == b'/' {
            name.clear();
        } else {
            name.push(*byte);
        }
    }

    Some(name)
}

/// Title ids look like SLES_123.45, with an E in third place marking a European disc.
fn region_from_title_id(name: &[u8]) -> Option<i32> {

    let prefix = &name[..min(name.len(), 5)];
    if prefix.len() < 5 || prefix[4] != b'_' {
        return None;
    }

    let known = matches!(prefix[0], b'S' | b'P') && matches!(prefix[1], b'L' | b'C' | b'A' | b'B' | b'I');
    if !known {
        return None;
    }

    if prefix[2] == b'E' {
        Some(VIDEO_MODE_PAL)
    } else {
        Some(VIDEO_MODE_NTSC)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}
