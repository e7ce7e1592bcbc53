// SPDX-License-Identifier: GPL-3.0
// main.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use std::{fs, process::ExitCode, sync::Arc};

// This file is the core of the basic client - it exists merely as a CLI-based
// program to mount an image on the engine, present it to a simulated driver
// stack and then dump its TOC or some of its sectors.

use clap::{Parser, ValueEnum};
use log::{error, info, LevelFilter};
use phildisc_core::{
    backing_image::Destination,
    collaborators::{
        file_backed_drive::FileBackedDrive, host_file_system::HostFileSystem,
        logging_event_sink::LoggingEventSink, process_memory::ProcessMemory, Collaborators,
        FileSystem, NoDrive, PhysicalDrive, ProcessId,
    },
    disc_identity::{DiscType, BDVD_DEVICE_ID, EVENT_INSERT},
    engine::{
        device_commands::STORAGE_COMMAND_NATIVE, EmulationKind, Engine, EngineConfig, Hook,
    },
    error::{EngineError, SUCCEEDED},
    proxy::loopback::LoopbackEndpoint,
    scsi::{TrackDescriptor, SCSI_CMD_READ_TOC_PMA_ATIP, TRACK_DESCRIPTOR_SIZE},
};

/// The process we run as, which also plays the shell.
const SHELL_PROCESS: ProcessId = ProcessId(1);

/// Where the shell's memory starts, for proxy transfers.
const SHELL_MEMORY_BASE: u64 = 0x1000_0000;

/// Real discs bigger than this are reported as DVDs.
const CD_CAPACITY: u64 = 900 * 1024 * 1024;

const DATA_TRACK_ADR_CONTROL: u8 = 0x14;
const TOC_ALLOCATION: u16 = 4 + 100 * TRACK_DESCRIPTOR_SIZE as u16;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ImageKind {
    /// PS3 game image
    Ps3,
    /// Video DVD image
    Dvd,
    /// Video BD image
    Bd,
    /// PS2 image, CD or DVD as its contents say
    Ps2,
    /// PSX raw CD image
    Psx,
}

#[derive(Parser)]
#[command(
    version,
    about = "A basic barebones UI for the PhilDisc emulation engine",
    long_about = None
)]
struct PhilDiscArgs {
    #[arg(
        long = "image",
        required = true,
        help = "An image file, repeat for multi-part images",
        id = "Image file"
    )]
    images: Vec<String>,

    #[arg(long = "kind", value_enum, help = "What the image should be presented as")]
    kind: ImageKind,

    #[arg(long = "raw", help = "Treat a PS2 image as a raw CD without probing it")]
    raw: bool,

    #[arg(
        long = "track",
        value_parser = parse_track,
        help = "A track as START[:ADR_CONTROL], in order, ADR_CONTROL in hex",
        id = "Track"
    )]
    tracks: Vec<(u32, u8)>,

    #[arg(long = "sector-size", default_value_t = 2352, help = "Raw sector size hint")]
    sector_size: u32,

    #[arg(long = "proxy", help = "Serve the image through the loopback proxy executor")]
    proxy: bool,

    #[arg(long = "chunk-size", default_value_t = 0x10000, help = "Proxy transfer chunk size")]
    chunk_size: usize,

    #[arg(long = "real-disc", help = "A cooked image standing in for the disc in the real drive")]
    real_disc: Option<String>,

    #[arg(long = "toc", help = "Print the TOC the engine synthesises")]
    toc: bool,

    #[arg(
        long = "read",
        value_parser = parse_read,
        help = "Read COUNT 2048-byte sectors from LBA, given as LBA:COUNT",
        id = "Sectors"
    )]
    read: Option<(u64, u32)>,

    #[arg(long = "out", help = "Where sectors read with --read are written")]
    out: Option<String>,

    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help = "More logging, repeat for more")]
    verbose: u8,
}

fn parse_track(value: &str) -> Result<(u32, u8), String> {
    let (start, adr_control) = match value.split_once(':') {
        Some((start, adr_control)) => (
            start,
            u8::from_str_radix(adr_control.trim_start_matches("0x"), 16)
                .map_err(|err| format!("bad ADR/control '{}': {}", adr_control, err))?
        ),
        None => (value, DATA_TRACK_ADR_CONTROL),
    };

    let start = start.parse().map_err(|err| format!("bad track start '{}': {}", start, err))?;
    Ok((start, adr_control))
}

fn parse_read(value: &str) -> Result<(u64, u32), String> {
    let (lba, count) = value.split_once(':').ok_or("expected LBA:COUNT")?;
    let lba = lba.parse().map_err(|err| format!("bad LBA '{}': {}", lba, err))?;
    let count = count.parse().map_err(|err| format!("bad count '{}': {}", count, err))?;
    Ok((lba, count))
}

fn main() -> ExitCode {
    let args = PhilDiscArgs::parse();

    let level = match args.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    colog::basic_builder().filter_level(level).init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        },
    }
}

fn run(args: &PhilDiscArgs) -> Result<(), EngineError> {

    let files = Arc::new(HostFileSystem::new());

    let (drive, real) = match &args.real_disc {
        Some(path) => {
            let real = if files.stat(path)? > CD_CAPACITY { DiscType::DVD } else { DiscType::CD };
            let drive: Box<dyn PhysicalDrive> = Box::new(FileBackedDrive::new(files.open(path)?, real));
            (drive, real)
        },
        None => {
            let drive: Box<dyn PhysicalDrive> = Box::new(NoDrive);
            (drive, DiscType::NONE)
        },
    };

    let engine = Engine::new(
        EngineConfig::new(SHELL_PROCESS),
        Collaborators {
            files: files.clone(),
            drive,
            events: Box::new(LoggingEventSink::new()),
        }
    )?;

    mount(&engine, files, args)?;

    // Let the driver stack see the disc arrive.
    engine.inject_storage_event(EVENT_INSERT, (real.0 as u64) << 32, BDVD_DEVICE_ID)?;
    let identity = engine.query_identity()?;
    info!(
        "Drive reports {:#x}, presented as {:#x}",
        identity.real.0, identity.effective.0
    );

    if args.toc {
        print_toc(&engine)?;
    }

    if let Some((lba, count)) = args.read {
        let destination = Destination::local(count as usize * 2048);
        let sectors = engine
            .read_disc(lba, count, destination)?
            .into_local()
            .ok_or(EngineError::InvalidState("read returned remote memory"))?;

        match &args.out {
            Some(path) => {
                fs::write(path, &sectors)?;
                info!("Wrote {} sectors to {}", count, path);
            },
            None => info!("Read {} sectors, first bytes {:02x?}", count, &sectors[..sectors.len().min(16)]),
        }
    }

    engine.unmount()
}

fn mount(engine: &Engine, files: Arc<HostFileSystem>, args: &PhilDiscArgs) -> Result<(), EngineError> {

    let tracks: Vec<TrackDescriptor> = args.tracks
        .iter()
        .enumerate()
        .map(|(index, (start, adr_control))| TrackDescriptor::new(*adr_control, index as u8 + 1, *start))
        .collect();
    let first = &args.images[0];

    if args.proxy {
        let kind = match args.kind {
            ImageKind::Ps3 => EmulationKind::Ps3,
            ImageKind::Dvd => EmulationKind::Dvd,
            ImageKind::Bd => EmulationKind::Bd,
            ImageKind::Psx => EmulationKind::Psx,
            ImageKind::Ps2 => {
                return Err(EngineError::InvalidArgument("PS2 images can't be served by proxy".to_string()));
            },
        };

        let size = files.stat(first)?;
        let shell = Arc::new(ProcessMemory::new(SHELL_PROCESS, SHELL_MEMORY_BASE, args.chunk_size));
        let endpoint = LoopbackEndpoint::new(files, first, shell);
        let tracks = (!tracks.is_empty()).then_some(tracks);

        return engine.mount_proxy(
            SHELL_PROCESS,
            Box::new(endpoint),
            kind,
            size,
            args.chunk_size,
            tracks,
            args.sector_size
        );
    }

    match args.kind {
        ImageKind::Ps3 => engine.mount_linear_image(EmulationKind::Ps3, &args.images),
        ImageKind::Dvd => engine.mount_linear_image(EmulationKind::Dvd, &args.images),
        ImageKind::Bd => engine.mount_linear_image(EmulationKind::Bd, &args.images),
        ImageKind::Psx => engine.mount_raw_image(EmulationKind::Psx, first, tracks, args.sector_size),
        ImageKind::Ps2 if args.raw => engine.mount_raw_image(EmulationKind::Ps2Cd, first, tracks, args.sector_size),
        ImageKind::Ps2 => engine.mount_ps2_image(&args.images, tracks, args.sector_size),
    }
}

fn print_toc(engine: &Engine) -> Result<(), EngineError> {

    let mut cdb = [0_u8; 10];
    cdb[0] = SCSI_CMD_READ_TOC_PMA_ATIP;
    cdb[7..9].copy_from_slice(&TOC_ALLOCATION.to_be_bytes());
    let mut toc = vec![0_u8; TOC_ALLOCATION as usize];

    match engine.send_device_command(BDVD_DEVICE_ID, STORAGE_COMMAND_NATIVE, &cdb, &mut toc) {
        Hook::Handled(SUCCEEDED) => (),
        Hook::Handled(status) => {
            return Err(EngineError::InvalidArgument(format!("TOC request failed with {:#x}", status)));
        },
        Hook::PassThrough => {
            return Err(EngineError::InvalidArgument("this image has no TOC".to_string()));
        },
    }

    let length = u16::from_be_bytes([toc[0], toc[1]]) as usize + 2;
    for descriptor in toc[4..length.min(toc.len())].chunks_exact(TRACK_DESCRIPTOR_SIZE) {
        let track = TrackDescriptor::from_bytes(descriptor);
        println!(
            "Track {:#04x}: ADR/control {:#04x}, start {}",
            track.track_number, track.adr_control, track.start
        );
    }

    Ok(())
}
