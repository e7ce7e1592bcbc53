// SPDX-License-Identifier: GPL-3.0
// disc_identity.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use log::{debug, info};

use crate::{
    collaborators::{PhysicalDrive, StorageEventSink},
    engine::EmulationKind,
    error::EngineError,
};

use detection::{PlayStationFormat, Prober};
use video_mode::{VideoModePatch, VideoModeState};

/// This module contains the probes run against the real drive to work out what
/// kind of PlayStation disc (if any) it holds.
pub mod detection;

/// This module contains PSX video mode detection and the state machine that decides
/// when the shell needs its video mode forced or restored.
pub mod video_mode;

/// Device id of the optical drive, as it appears on storage events.
pub const BDVD_DEVICE_ID: u64 = 0x0101_0000_0000_0006;

/// Storage event numbers we care about.
pub const EVENT_INSERT: u64 = 3;
pub const EVENT_REMOVE: u64 = 4;
pub const EVENT_MOUNTING: u64 = 7;
pub const EVENT_SETTLE: u64 = 8;

/// Auth function and parameter values inspected by the auth bypass.
const AUTH_FUNCTION_PROFILE: u64 = 0x5004;
const AUTH_FUNCTION_DISC: u64 = 0x5007;
const AUTH_PARAM_PSX: u64 = 1;
const AUTH_PARAM_PROFILE_RETRY: u64 = 0x29;
const AUTH_PARAM_ALWAYS_OK: u64 = 0x43;

/// A disc type, as reported by the drive. Zero means no disc.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DiscType(pub u32);

impl DiscType {
    pub const NONE: DiscType = DiscType(0);
    pub const CD: DiscType = DiscType(0x08);
    pub const DVD: DiscType = DiscType(0x10);
    pub const BD_ROM: DiscType = DiscType(0x40);
    pub const BD_R_SRM: DiscType = DiscType(0x41);
    pub const BD_R_RRM: DiscType = DiscType(0x42);
    pub const BD_RE: DiscType = DiscType(0x43);
    pub const PSX_CD: DiscType = DiscType(0xFF50);
    pub const PS2_CD: DiscType = DiscType(0xFF60);
    pub const PS3_DVD: DiscType = DiscType(0xFF61);
    pub const PS2_DVD: DiscType = DiscType(0xFF62);
    pub const PS3_BD: DiscType = DiscType(0xFF71);

    /// Returns true if there is no disc.
    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Returns true for the recordable and rewritable BD subtypes.
    pub fn is_writable_bd(self) -> bool {
        (Self::BD_R_SRM.0..=Self::BD_RE.0).contains(&self.0)
    }
}

/// What the drive holds, and what callers are told it holds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DiscIdentity {

    // What the drive reports.
    pub real: DiscType,

    // What callers see.
    pub effective: DiscType,

    // Non-zero only while we are synthesising a type.
    pub fake: DiscType,

    // A burned PS3 disc was recognised, so real auth can't be trusted.
    pub emulated_ps3_recording: bool,
}

/// Whether a disc auth invocation is the original call or the single nested
/// call the bypass makes on its own behalf.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthReentry {
    Top,
    Nested,
}

/// What the auth bypass decided to do with a disc auth request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthDecision {
    Bypass,
    PassThrough,
    RetryThenReinsert,
    RetryIgnoringResult,
}

/// This struct tracks the identity of the disc in the drive along with the flags
/// that decide how it is faked.
pub struct IdentityTracker {

    // Current identity.
    identity: DiscIdentity,

    // Set when the last primary probe couldn't read the disc.
    could_not_read_disc: bool,

    // Set while the driver stack is mounting a disc.
    disc_being_mounted: bool,

    // PSX video mode state.
    video_mode: VideoModeState,

    // How many times primary probes retry.
    probe_retries: u32,
}

impl IdentityTracker {

    /// Creates a new tracker with an empty drive.
    pub fn new(probe_retries: u32) -> Self {
        IdentityTracker {
            identity: DiscIdentity::default(),
            could_not_read_disc: false,
            disc_being_mounted: false,
            video_mode: VideoModeState::Idle,
            probe_retries,
        }
    }

    pub fn identity(&self) -> DiscIdentity {
        self.identity
    }

    pub fn could_not_read_disc(&self) -> bool {
        self.could_not_read_disc
    }

    pub fn disc_being_mounted(&self) -> bool {
        self.disc_being_mounted
    }

    pub fn video_mode(&self) -> VideoModeState {
        self.video_mode
    }

    /// Handles a disc being inserted, working out what it should be presented as.
    pub fn insert(&mut self, real: DiscType, kind: EmulationKind, drive: &mut dyn PhysicalDrive) {

        self.could_not_read_disc = false;
        let mut identity = DiscIdentity {
            real,
            effective: real,
            fake: DiscType::NONE,
            emulated_ps3_recording: false,
        };
        debug!("Real disc type = {:#x}", real.0);

        if let Some(target) = kind.target_type() {

            // BD emulation must present a writable BD, as players may refuse a
            // BD-ROM here, so any writable subtype already counts as matching.
            let matches = if kind == EmulationKind::Bd {
                real.is_writable_bd()
            } else {
                real == target
            };

            if !matches {
                identity.fake = target;
                identity.effective = target;
            }
        } else {
            let mut prober = Prober::new(drive, self.probe_retries);

            if real == DiscType::CD {
                match prober.playstation_format(true) {
                    PlayStationFormat::Psx => identity.fake = DiscType::PSX_CD,
                    PlayStationFormat::Ps2 => identity.fake = DiscType::PS2_CD,
                    PlayStationFormat::Neither => (),
                }
            } else if real == DiscType::DVD
                && prober.playstation_format(false) != PlayStationFormat::Neither {
                identity.fake = DiscType::PS2_DVD;
            }

            if !real.is_none()
                && real != DiscType::PS3_BD
                && identity.fake.is_none()
                && prober.ps3_marker() {
                identity.fake = DiscType::PS3_BD;
                identity.emulated_ps3_recording = true;
            }

            if !identity.fake.is_none() {
                identity.effective = identity.fake;
            }
            self.could_not_read_disc = prober.could_not_read();
        }

        debug!(
            "Effective disc type = {:#x}, fake disc type = {:#x}",
            identity.effective.0, identity.fake.0
        );
        self.identity = identity;
    }

    /// Handles the disc leaving the drive.
    pub fn remove(&mut self) {

        if self.identity.effective == DiscType::PSX_CD {
            self.video_mode = VideoModeState::Stale;
        }

        self.identity = DiscIdentity::default();
    }

    /// Inspects a storage event on its way to the driver stack, updating the
    /// identity and rewriting insert events to carry the effective type, then
    /// forwards it to the sink.
    pub fn device_event(
        &mut self,
        event: u64,
        param: u64,
        device: u64,
        kind: EmulationKind,
        drive: &mut dyn PhysicalDrive,
        sink: &mut dyn StorageEventSink
    ) -> Result<i32, EngineError> {

        let mut param = param;

        if device == BDVD_DEVICE_ID {
            self.disc_being_mounted = event == EVENT_MOUNTING;

            if event == EVENT_INSERT {
                info!("Disc inserted");
                self.insert(DiscType((param >> 32) as u32), kind, drive);
                param = (self.identity.effective.0 as u64) << 32;
            } else if event == EVENT_REMOVE {
                info!("Disc removed");
                self.remove();
            }
        }

        sink.send(event, param, device)
    }

    /// Makes the driver stack see the disc leave and come back as the given type.
    pub fn fake_reinsert(
        &mut self,
        disc_type: DiscType,
        kind: EmulationKind,
        drive: &mut dyn PhysicalDrive,
        sink: &mut dyn StorageEventSink
    ) -> Result<(), EngineError> {

        let param = (disc_type.0 as u64) << 32;

        for event in [EVENT_REMOVE, EVENT_SETTLE, EVENT_MOUNTING, EVENT_INSERT] {
            self.device_event(event, param, BDVD_DEVICE_ID, kind, drive, sink)?;
        }

        Ok(())
    }

    /// Clears the could-not-read flag, once the auth retry has consumed it.
    pub fn clear_could_not_read_disc(&mut self) {
        self.could_not_read_disc = false;
    }

    /// Forgets a recognised PS3 recording, when the mount it applied to goes away.
    pub fn clear_emulated_ps3_recording(&mut self) {
        self.identity.emulated_ps3_recording = false;
    }

    /// Advances the video mode state machine, see `VideoModeState::advance`.
    pub fn advance_video_mode(&mut self, detected: Option<i32>) -> Option<VideoModePatch> {
        let is_psx = self.identity.effective == DiscType::PSX_CD;
        let (state, patch) = self.video_mode.advance(is_psx, detected);
        self.video_mode = state;
        patch
    }

    /// Returns true if the next video mode sync should run detection first.
    pub fn video_mode_needs_detection(&self) -> bool {
        self.identity.effective == DiscType::PSX_CD && self.video_mode != VideoModeState::Applied
    }

    /// Decides what to do with a disc auth request.
    pub fn auth_decision(
        &self,
        function: u64,
        param: u64,
        from_shell: bool,
        kind: EmulationKind,
        reentry: AuthReentry
    ) -> AuthDecision {

        match function {
            AUTH_FUNCTION_PROFILE => {
                let param = param as u32 as u64;

                if param == AUTH_PARAM_PSX
                    && from_shell
                    && self.identity.effective == DiscType::PSX_CD {
                    return AuthDecision::Bypass;
                }

                if param == AUTH_PARAM_PROFILE_RETRY
                    && from_shell
                    && self.could_not_read_disc {
                    return AuthDecision::RetryThenReinsert;
                }

                AuthDecision::PassThrough
            },
            AUTH_FUNCTION_DISC => {
                if param == AUTH_PARAM_ALWAYS_OK {
                    return AuthDecision::Bypass;
                }

                let ps3_emulated = kind == EmulationKind::Ps3
                    || (kind == EmulationKind::Off && self.identity.emulated_ps3_recording);

                if ps3_emulated
                    && self.identity.real != DiscType::PS3_BD
                    && reentry == AuthReentry::Top {
                    return AuthDecision::RetryIgnoringResult;
                }

                AuthDecision::PassThrough
            },
            _ => AuthDecision::PassThrough,
        }
    }
}
