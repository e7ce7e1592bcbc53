// SPDX-License-Identifier: GPL-3.0
// engine.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use log::{debug, info, warn};
use parking_lot::{Mutex, MutexGuard};

use crate::{
    backing_image::{BackingImage, Destination},
    collaborators::{Collaborators, DiscAuthority, ProcessId},
    disc_identity::{
        detection::{Prober, PROBE_SECTOR_SIZE, SENTINEL},
        video_mode::{self, VideoModePatch},
        AuthDecision, AuthReentry, DiscIdentity, DiscType, IdentityTracker, BDVD_DEVICE_ID,
    },
    dispatcher::{Command, Dispatcher, Envelope},
    error::{EngineError, FAILED, SUCCEEDED},
    proxy::ProxyCommand,
    scsi::COOKED_SECTOR_SIZE,
};

/// This module contains the mount and unmount operations.
pub mod mount;

/// This module contains handling of device commands, including the SCSI
/// pass-through command.
pub mod device_commands;

/// Default number of attempts for reads of the real disc.
pub const DEFAULT_PROBE_RETRIES: u32 = 3;

/// What the mounted image pretends to be.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmulationKind {
    Off,
    Ps3,
    Ps2Dvd,
    Ps2Cd,
    Psx,
    Bd,
    Dvd,
}

impl EmulationKind {

    /// Returns the numeric code of the kind.
    pub fn code(self) -> u32 {
        match self {
            EmulationKind::Off => 0,
            EmulationKind::Ps3 => 1,
            EmulationKind::Ps2Dvd => 2,
            EmulationKind::Ps2Cd => 3,
            EmulationKind::Psx => 4,
            EmulationKind::Bd => 5,
            EmulationKind::Dvd => 6,
        }
    }

    /// Looks a kind up by its numeric code.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(EmulationKind::Off),
            1 => Some(EmulationKind::Ps3),
            2 => Some(EmulationKind::Ps2Dvd),
            3 => Some(EmulationKind::Ps2Cd),
            4 => Some(EmulationKind::Psx),
            5 => Some(EmulationKind::Bd),
            6 => Some(EmulationKind::Dvd),
            _ => None,
        }
    }

    /// Returns the disc type this kind presents, if any.
    pub fn target_type(self) -> Option<DiscType> {
        match self {
            EmulationKind::Off => None,
            EmulationKind::Ps3 => Some(DiscType::PS3_BD),
            EmulationKind::Dvd => Some(DiscType::DVD),
            EmulationKind::Bd => Some(DiscType::BD_R_SRM),
            EmulationKind::Psx => Some(DiscType::PSX_CD),
            EmulationKind::Ps2Cd => Some(DiscType::PS2_CD),
            EmulationKind::Ps2Dvd => Some(DiscType::PS2_DVD),
        }
    }
}

/// Engine settings.
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {

    // The system shell, which is also the proxy executor.
    pub shell_process: ProcessId,

    // Attempts for primary reads of the real disc.
    pub probe_retries: u32,
}

impl EngineConfig {

    /// Creates a new configuration with the default retry count.
    pub fn new(shell_process: ProcessId) -> Self {
        EngineConfig {
            shell_process,
            probe_retries: DEFAULT_PROBE_RETRIES,
        }
    }
}

/// The active mount.
pub struct Mount {
    pub kind: EmulationKind,

    // No real disc, and none arriving, when the mount was made.
    pub total_emulation: bool,

    pub image: BackingImage,
}

/// A summary of what is mounted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmulationState {
    pub kind: EmulationKind,
    pub first_path: Option<String>,
}

/// The answer of an entry point: either it dealt with the call, or the real
/// implementation should run.
#[derive(Debug, PartialEq, Eq)]
pub enum Hook<T> {
    Handled(T),
    PassThrough,
}

/// Device geometry, as returned by a device info query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub sector_count: u64,
    pub sector_size: u32,
}

/// Delivered to the caller of an asynchronous read once it completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Completion {
    pub param: u64,
    pub status: i32,
}

/// Everything the engine knows, moved between callers and the dispatcher as one
/// owned value.
pub struct EngineContext {

    // Settings.
    config: EngineConfig,

    // The outside world.
    collaborators: Collaborators,

    // What is in the drive.
    identity: IdentityTracker,

    // What is mounted.
    mount: Option<Mount>,
}

impl EngineContext {

    /// Creates a new context with nothing mounted.
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Self {
        EngineContext {
            config,
            collaborators,
            identity: IdentityTracker::new(config.probe_retries),
            mount: None,
        }
    }

    /// Returns the active emulation kind.
    pub fn kind(&self) -> EmulationKind {
        self.mount.as_ref().map_or(EmulationKind::Off, |mount| mount.kind)
    }

    pub fn identity(&self) -> DiscIdentity {
        self.identity.identity()
    }

    /// Carries out one dispatcher command.
    pub fn execute(&mut self, command: Command) -> (Result<i64, EngineError>, Option<Destination>) {

        match command {
            Command::ReadLinear { offset, mut destination } => {
                let result = self.read_linear(offset, &mut destination).map(|_| 0);
                (result, Some(destination))
            },
            Command::ReadPhysicalDisc { start, count, mut destination } => {
                let result = self.read_physical(start, count, &mut destination).map(|_| 0);
                (result, Some(destination))
            },
            Command::ReadCdRaw { start_sector, count, mut destination } => {
                let result = self.read_cd_raw(start_sector, count, &mut destination).map(|_| 0);
                (result, Some(destination))
            },
            Command::FakeStorageEvent { event, param, device } => {
                (self.device_event(event, param, device).map(i64::from), None)
            },
            Command::GetVideoMode => (Ok(self.detect_video_mode() as i64), None),
        }
    }

    /// Reads from the linear address space of the mounted image. CD images give
    /// their 2048-byte payloads.
    pub fn read_linear(&mut self, offset: u64, destination: &mut Destination) -> Result<(), EngineError> {

        let Some(mount) = self.mount.as_mut() else {
            return Err(EngineError::NotMounted);
        };

        match &mut mount.image {
            BackingImage::MultiFile(image) => image.read(offset, destination),
            BackingImage::RawCd(image) => image.read_2048(offset, destination),
            BackingImage::Proxy(image) => image.read(ProxyCommand::ReadIso, offset, destination),
        }
    }

    /// Reads whole raw sectors from the mounted CD image.
    pub fn read_cd_raw(
        &mut self,
        start_sector: u64,
        count: u32,
        destination: &mut Destination
    ) -> Result<(), EngineError> {

        let Some(mount) = self.mount.as_mut() else {
            return Err(EngineError::NotMounted);
        };

        match &mut mount.image {
            BackingImage::MultiFile(_) => Err(EngineError::InvalidState("cooked images have no raw sectors")),
            BackingImage::RawCd(image) => image.read_raw(start_sector, count as u64, destination),
            BackingImage::Proxy(image) => {
                let offset = start_sector.saturating_mul(image.sector_size() as u64);
                image.read(ProxyCommand::ReadCdRaw, offset, destination)
            },
        }
    }

    /// Reads 2048-byte sectors from the real disc. The buffer starts out filled
    /// with the sentinel so untouched sectors can be spotted.
    pub fn read_physical(&mut self, start: u64, count: u32, destination: &mut Destination) -> Result<(), EngineError> {

        let mut sectors = vec![SENTINEL; count as usize * PROBE_SECTOR_SIZE];
        self.collaborators.drive.read_sectors(start, count, &mut sectors)?;
        destination.store(0, &sectors)
    }

    /// Runs a storage event through the identity state machine and on to the sink.
    pub fn device_event(&mut self, event: u64, param: u64, device: u64) -> Result<i32, EngineError> {
        let kind = self.kind();
        self.identity.device_event(
            event,
            param,
            device,
            kind,
            self.collaborators.drive.as_mut(),
            self.collaborators.events.as_mut()
        )
    }

    /// Makes the driver stack see the disc come back as the given type.
    pub fn fake_reinsert(&mut self, disc_type: DiscType) -> Result<(), EngineError> {
        let kind = self.kind();
        self.identity.fake_reinsert(
            disc_type,
            kind,
            self.collaborators.drive.as_mut(),
            self.collaborators.events.as_mut()
        )
    }

    /// Returns the type callers currently see: the fake if there is one, otherwise
    /// whatever the drive says.
    pub fn current_disc_type(&mut self) -> DiscType {
        let fake = self.identity.identity().fake;
        if !fake.is_none() {
            return fake;
        }
        self.collaborators.drive.device_type().unwrap_or(DiscType::NONE)
    }

    /// Works out the video mode of the PSX disc, real or emulated.
    pub fn detect_video_mode(&mut self) -> i32 {
        video_mode::detect(&mut |lba| self.read_identity_sector(lba))
    }

    /// Reads one 2048-byte sector of whatever disc callers see.
    fn read_identity_sector(&mut self, lba: u32) -> Option<Vec<u8>> {

        if self.mount.is_none() {
            let retries = self.config.probe_retries;
            return Prober::new(self.collaborators.drive.as_mut(), retries).read_sector(lba, retries);
        }

        let mut destination = Destination::local(PROBE_SECTOR_SIZE);
        match self.read_linear(lba as u64 * COOKED_SECTOR_SIZE as u64, &mut destination) {
            Ok(()) => destination.into_local(),
            Err(err) => {
                warn!("Cannot read sector {:#x} of the image: {}", lba, err);
                None
            },
        }
    }
}

/// What the engine mutex protects.
struct Slot {

    // Absent only while on loan to the dispatcher, or if the dispatcher died
    // holding it.
    context: Option<Box<EngineContext>>,

    dispatcher: Dispatcher,
}

impl Slot {

    fn context(&mut self) -> Result<&mut EngineContext, EngineError> {
        self.context.as_deref_mut().ok_or(EngineError::DispatcherGone)
    }

    /// Sends a command to the dispatcher along with the context, and takes the
    /// context back.
    fn round_trip(&mut self, command: Command) -> Result<(i64, Option<Destination>), EngineError> {

        let context = self.context.take().ok_or(EngineError::DispatcherGone)?;

        match self.dispatcher.submit(Envelope { command, context }) {
            Ok(reply) => {
                self.context = Some(reply.context);
                reply.result.map(|value| (value, reply.returned))
            },
            Err(failure) => {
                self.context = failure.context;
                Err(failure.error)
            },
        }
    }

    /// Reads through the dispatcher, handing back the destination.
    fn read(&mut self, command: Command) -> Result<Destination, EngineError> {
        let (_, returned) = self.round_trip(command)?;
        returned.ok_or(EngineError::InvalidState("read returned no destination"))
    }

    fn is_mounted(&self) -> bool {
        self.context.as_ref().is_some_and(|context| context.mount.is_some())
    }
}

/// This struct is the disc emulation engine. All of its state sits behind one
/// mutex, and blocking work happens on its dispatcher thread.
pub struct Engine {
    inner: Mutex<Slot>,
}

impl Engine {

    /// Creates a new engine with nothing mounted, starting its dispatcher.
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Result<Self, EngineError> {

        let dispatcher = Dispatcher::spawn()?;
        info!("Disc engine ready, shell process {:?}", config.shell_process);

        Ok(Engine {
            inner: Mutex::new(Slot {
                context: Some(Box::new(EngineContext::new(config, collaborators))),
                dispatcher,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.inner.lock()
    }

    /// Returns what callers are told is in the drive.
    pub fn query_identity(&self) -> Result<DiscIdentity, EngineError> {
        Ok(self.lock().context()?.identity())
    }

    /// Returns what is mounted.
    pub fn query_emulation_state(&self) -> Result<EmulationState, EngineError> {
        let mut slot = self.lock();
        let context = slot.context()?;
        Ok(EmulationState {
            kind: context.kind(),
            first_path: context
                .mount
                .as_ref()
                .and_then(|mount| mount.image.first_path())
                .map(str::to_string),
        })
    }

    /// Sends a storage event through the identity state machine, as if the driver
    /// stack had raised it.
    pub fn inject_storage_event(&self, event: u64, param: u64, device: u64) -> Result<i32, EngineError> {
        let (status, _) = self.lock().round_trip(Command::FakeStorageEvent { event, param, device })?;
        Ok(status as i32)
    }

    /// Reads sectors of the real disc, bypassing any emulation.
    pub fn read_physical_disc(&self, start: u64, count: u32) -> Result<Vec<u8>, EngineError> {
        let destination = Destination::local(count as usize * PROBE_SECTOR_SIZE);
        let returned = self.lock().read(Command::ReadPhysicalDisc { start, count, destination })?;
        returned.into_local().ok_or(EngineError::InvalidState("physical read returned remote memory"))
    }

    /// Reads 2048-byte sectors of whatever disc callers see.
    pub fn read_disc(&self, start: u64, count: u32, destination: Destination) -> Result<Destination, EngineError> {

        if destination.len() != count as usize * COOKED_SECTOR_SIZE as usize {
            return Err(EngineError::InvalidArgument(format!(
                "{} sectors do not fit a destination of {} bytes", count, destination.len()
            )));
        }

        let mut slot = self.lock();
        let command = if slot.is_mounted() {
            Command::ReadLinear {
                offset: start.saturating_mul(COOKED_SECTOR_SIZE as u64),
                destination,
            }
        } else {
            Command::ReadPhysicalDisc {
                start,
                count,
                destination,
            }
        };

        slot.read(command)
    }

    /// Serves a read of the BD/DVD device's linear address space.
    pub fn read_bdvd(&self, offset: u64, destination: Destination) -> Hook<Result<Destination, EngineError>> {

        let mut slot = self.lock();
        if !slot.is_mounted() {
            return Hook::PassThrough;
        }

        Hook::Handled(
            slot.read(Command::ReadLinear { offset, destination })
                .map_err(EngineError::into_storage_fault)
        )
    }

    /// Serves a sector read of the optical device, returning the sector count read.
    pub fn storage_read(
        &self,
        device: u64,
        start_sector: u64,
        count: u32,
        destination: Destination
    ) -> Hook<Result<(u32, Destination), EngineError>> {

        let mut slot = self.lock();
        if device != BDVD_DEVICE_ID || !slot.is_mounted() {
            return Hook::PassThrough;
        }

        Hook::Handled(
            Self::sector_read(&mut slot, start_sector, count, destination)
                .map(|destination| (count, destination))
                .map_err(EngineError::into_storage_fault)
        )
    }

    /// Serves an asynchronous sector read. The read happens straight away and the
    /// completion is delivered before returning.
    pub fn storage_async_read(
        &self,
        device: u64,
        start_sector: u64,
        count: u32,
        destination: Destination,
        param: u64,
        notify: &mut dyn FnMut(Completion)
    ) -> Hook<i32> {

        let mut slot = self.lock();
        if device != BDVD_DEVICE_ID || !slot.is_mounted() {
            return Hook::PassThrough;
        }

        let status = match Self::sector_read(&mut slot, start_sector, count, destination) {
            Ok(_) => SUCCEEDED,
            Err(err) => {
                debug!("Asynchronous read failed: {}", err);
                FAILED
            },
        };

        notify(Completion { param, status });
        Hook::Handled(SUCCEEDED)
    }

    fn sector_read(
        slot: &mut Slot,
        start_sector: u64,
        count: u32,
        destination: Destination
    ) -> Result<Destination, EngineError> {

        if destination.len() < count as usize * COOKED_SECTOR_SIZE as usize {
            return Err(EngineError::InvalidArgument(format!(
                "{} sectors do not fit a destination of {} bytes", count, destination.len()
            )));
        }

        slot.read(Command::ReadLinear {
            offset: start_sector.saturating_mul(COOKED_SECTOR_SIZE as u64),
            destination,
        })
    }

    /// Corrects the geometry a device info query returned for the optical device
    /// while an image is presented in its place.
    pub fn storage_device_info(&self, device: u64, info: &mut DeviceInfo) {

        if device != BDVD_DEVICE_ID {
            return;
        }

        let mut slot = self.lock();
        let Ok(context) = slot.context() else {
            return;
        };

        if context.identity().effective.is_none() {
            return;
        }

        if let Some(mount) = context.mount.as_ref() {
            info.sector_count = match &mount.image {
                BackingImage::MultiFile(_) => mount.image.sector_count_for(info.sector_size),
                _ => mount.image.device_sector_count(),
            };
            debug!("Device info adjusted to {} sectors", info.sector_count);
        }
    }

    /// Handles a storage event from the driver stack.
    pub fn device_event(&self, event: u64, param: u64, device: u64) -> Result<i32, EngineError> {
        self.lock().context()?.device_event(event, param, device)
    }

    /// Handles the backing storage becoming available, by making the driver stack
    /// take a fresh look at the disc in the drive.
    pub fn storage_ready(&self) -> Result<(), EngineError> {

        let mut slot = self.lock();
        let context = slot.context()?;
        let disc_type = context.collaborators.drive.device_type().unwrap_or(DiscType::NONE);

        if disc_type == DiscType::CD || disc_type == DiscType::DVD {
            context.fake_reinsert(disc_type)?;
        } else if !disc_type.is_none() {
            let kind = context.kind();
            context.identity.insert(disc_type, kind, context.collaborators.drive.as_mut());
        }

        Ok(())
    }

    /// Works out whether the shell needs to change its video mode for the PSX disc,
    /// called as the shell queries the device size.
    pub fn sync_video_mode(&self, caller: ProcessId) -> Result<Option<VideoModePatch>, EngineError> {

        let mut slot = self.lock();
        if caller != slot.context()?.config.shell_process {
            return Ok(None);
        }

        let detected = if slot.context()?.identity.video_mode_needs_detection() {
            let (mode, _) = slot.round_trip(Command::GetVideoMode)?;
            Some(mode as i32)
        } else {
            None
        };

        let patch = slot.context()?.identity.advance_video_mode(detected);
        if let Some(patch) = patch {
            info!("Video mode patch: {:?}", patch);
        }
        Ok(patch)
    }

    /// Handles a disc authentication request. The lock is held from the decision
    /// through any nested attempt and the reinsert that follows it, so the
    /// authority must not call back into the engine.
    pub fn disc_auth(
        &self,
        caller: ProcessId,
        function: u64,
        param: u64,
        authority: &mut dyn DiscAuthority
    ) -> Hook<i32> {
        let mut slot = self.lock();
        Self::disc_auth_at(&mut slot, caller, function, param, authority, AuthReentry::Top)
    }

    fn disc_auth_at(
        slot: &mut Slot,
        caller: ProcessId,
        function: u64,
        param: u64,
        authority: &mut dyn DiscAuthority,
        reentry: AuthReentry
    ) -> Hook<i32> {

        let Ok(context) = slot.context() else {
            return Hook::PassThrough;
        };

        let from_shell = caller == context.config.shell_process;
        let decision = context.identity.auth_decision(function, param, from_shell, context.kind(), reentry);
        if decision == AuthDecision::RetryThenReinsert {
            context.identity.clear_could_not_read_disc();
        }

        debug!("Disc auth {:#x} {:#x}: {:?}", function, param, decision);

        match decision {
            AuthDecision::Bypass => Hook::Handled(SUCCEEDED),
            AuthDecision::PassThrough => Hook::PassThrough,
            AuthDecision::RetryThenReinsert => {
                let status = Self::nested_auth(slot, caller, function, param, authority);
                if status == SUCCEEDED {
                    if let Ok(context) = slot.context() {
                        let disc_type = context.current_disc_type();
                        if let Err(err) = context.fake_reinsert(disc_type) {
                            warn!("Reinsert after auth retry failed: {}", err);
                        }
                    }
                }
                Hook::Handled(status)
            },
            AuthDecision::RetryIgnoringResult => {
                Self::nested_auth(slot, caller, function, param, authority);
                Hook::Handled(SUCCEEDED)
            },
        }
    }

    /// Runs the auth path once more, ending up at the real routine unless the
    /// bypass answers it.
    fn nested_auth(
        slot: &mut Slot,
        caller: ProcessId,
        function: u64,
        param: u64,
        authority: &mut dyn DiscAuthority
    ) -> i32 {
        match Self::disc_auth_at(slot, caller, function, param, authority, AuthReentry::Nested) {
            Hook::Handled(status) => status,
            Hook::PassThrough => authority.authenticate(function, param),
        }
    }
}
