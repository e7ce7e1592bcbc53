// SPDX-License-Identifier: GPL-3.0
// tests.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use std::sync::Arc;

use super::*;
use crate::{
    collaborators::{process_memory::ProcessMemory, Caller, ProcessId},
    error::EngineError,
    proxy::{loopback::LoopbackEndpoint, ProxyChannel, ProxyCommand},
    scsi::{TrackDescriptor, TrackTable},
    test_support::{counting_bytes, raw_image, MemoryFileSystem},
};

// Tests for the backing image readers.

fn two_part_image() -> (Arc<MemoryFileSystem>, Vec<String>, Vec<u8>) {
    let first = counting_bytes(8192);
    let second: Vec<u8> = counting_bytes(6000).iter().map(|byte| byte ^ 0xFF).collect();
    let mut whole = first.clone();
    whole.extend_from_slice(&second);

    let files = MemoryFileSystem::new()
        .with_file("/dev_hdd0/a.iso", first)
        .with_file("/dev_hdd0/b.iso", second);
    let paths = vec!["/dev_hdd0/a.iso".to_string(), "/dev_hdd0/b.iso".to_string()];

    (Arc::new(files), paths, whole)
}

fn single_track() -> TrackTable {
    TrackTable::new(vec![TrackDescriptor::new(0x14, 1, 0)]).unwrap()
}

fn read_local(image: &mut MultiFileImage, offset: u64, length: usize) -> Vec<u8> {
    let mut destination = Destination::local(length);
    image.read(offset, &mut destination).unwrap();
    destination.into_local().unwrap()
}

fn read_raw_local(image: &mut RawCdImage, start: u64, count: u64) -> Vec<u8> {
    let mut destination = Destination::local(count as usize * image.sector_size() as usize);
    image.read_raw(start, count, &mut destination).unwrap();
    destination.into_local().unwrap()
}

/// Returns the payload byte `raw_image` put in the given sector.
fn payload_of(sector: &[u8]) -> u8 {
    sector[24]
}

#[test]
fn test_multi_file_full_read_matches_concatenation() {

    // Given two parts read whole, and in odd sized pieces.
    let (files, paths, whole) = two_part_image();
    let mut image = MultiFileImage::open(files, &paths).unwrap();

    assert_eq!(image.total_size(), 14192);
    assert_eq!(read_local(&mut image, 0, whole.len()), whole);

    let mut pieces = Vec::new();
    let mut offset = 0;
    while offset < whole.len() {
        let length = 1000.min(whole.len() - offset);
        pieces.extend(read_local(&mut image, offset as u64, length));
        offset += length;
    }
    assert_eq!(pieces, whole);
}

#[test]
fn test_multi_file_remote_read_goes_through_caller() {

    let (files, paths, whole) = two_part_image();
    let mut image = MultiFileImage::open(files, &paths).unwrap();
    let process = Arc::new(ProcessMemory::new(ProcessId(9), 0x1_0000, 0x8000));

    let mut destination = Destination::remote(process.clone() as Caller, 0x1_0100, 5000);
    image.read(6000, &mut destination).unwrap();

    assert_eq!(process.snapshot(0x1_0100, 5000).unwrap(), whole[6000..11000].to_vec());
}

#[test]
fn test_multi_file_container_header_is_skipped() {

    let mut file = vec![0xAB; 64 * 1024];
    file.extend(counting_bytes(8192));
    let files = Arc::new(MemoryFileSystem::new().with_file("/dev_hdd0/game.PNG", file));

    let mut image = MultiFileImage::open(files, &["/dev_hdd0/game.PNG".to_string()]).unwrap();

    assert_eq!(image.base_offset(), 64 * 1024);
    assert_eq!(image.total_size(), 8192);
    assert_eq!(read_local(&mut image, 100, 16), counting_bytes(116)[100..].to_vec());
}

#[test]
fn test_multi_file_read_past_end_is_zero_filled() {

    let (files, paths, whole) = two_part_image();
    let mut image = MultiFileImage::open(files, &paths).unwrap();

    let data = read_local(&mut image, 13192, 4096);

    assert_eq!(data[..1000], whole[13192..]);
    assert!(data[1000..].iter().all(|byte| *byte == 0));
    assert!(read_local(&mut image, 1 << 40, 2048).iter().all(|byte| *byte == 0));
}

#[test]
fn test_multi_file_sector_cache_hit_and_invalidation() {

    let (files, paths, whole) = two_part_image();
    let mut image = MultiFileImage::open(files.clone(), &paths).unwrap();
    image.set_sector_cache(true);

    assert_eq!(read_local(&mut image, 4096, 2048), whole[4096..6144].to_vec());
    let reads = files.reads();

    // Given the same sector again, nothing is read from the file.
    assert_eq!(read_local(&mut image, 4096, 2048), whole[4096..6144].to_vec());
    assert_eq!(files.reads(), reads);

    // Given a read of another size, the cache goes.
    read_local(&mut image, 0, 100);
    let reads = files.reads();
    assert_eq!(read_local(&mut image, 4096, 2048), whole[4096..6144].to_vec());
    assert!(files.reads() > reads);

    // Given a whole sector somewhere else, that replaces the cached one.
    let reads = files.reads();
    assert_eq!(read_local(&mut image, 8192, 2048), whole[8192..10240].to_vec());
    assert!(files.reads() > reads);
    let reads = files.reads();
    assert_eq!(read_local(&mut image, 4096, 2048), whole[4096..6144].to_vec());
    assert!(files.reads() > reads);
}

#[test]
fn test_multi_file_cache_is_off_by_default() {

    let (files, paths, _) = two_part_image();
    let mut image = MultiFileImage::open(files.clone(), &paths).unwrap();

    read_local(&mut image, 0, 2048);
    let reads = files.reads();
    read_local(&mut image, 0, 2048);

    assert!(files.reads() > reads);
}

#[test]
fn test_multi_file_open_rejects_bad_parts() {

    let (files, paths, _) = two_part_image();
    let small = Arc::new(MemoryFileSystem::new().with_file("/dev_hdd0/tiny.iso", vec![0; 4095]));

    let missing = vec![paths[0].clone(), "/dev_hdd0/missing.iso".to_string()];
    assert!(matches!(MultiFileImage::open(files.clone(), &missing), Err(EngineError::Io(_))));
    assert!(matches!(
        MultiFileImage::open(small, &["/dev_hdd0/tiny.iso".to_string()]),
        Err(EngineError::InvalidArgument(_))
    ));
    assert!(matches!(MultiFileImage::open(files.clone(), &[]), Err(EngineError::InvalidArgument(_))));
    assert!(matches!(
        MultiFileImage::open(files.clone(), &vec![paths[0].clone(); 33]),
        Err(EngineError::InvalidArgument(_))
    ));
    assert!(matches!(
        MultiFileImage::open(files, &["a.i".to_string()]),
        Err(EngineError::InvalidArgument(_))
    ));
}

#[test]
fn test_raw_cd_probes_sector_size() {

    let files = Arc::new(MemoryFileSystem::new().with_file("/dev_hdd0/psx.bin", raw_image(2448, 20)));

    let image = RawCdImage::open(files, "/dev_hdd0/psx.bin", single_track(), 2352).unwrap();

    assert_eq!(image.sector_size(), 2448);
    assert_eq!(image.num_sectors(), 20);
}

#[test]
fn test_raw_cd_sector_size_hint() {

    let files = Arc::new(
        MemoryFileSystem::new()
            .with_file("/dev_hdd0/cooked.bin", raw_image(2048, 30))
            .with_file("/dev_hdd0/raw.bin", raw_image(2352, 20))
    );

    // Given a valid hint other than the default, no probing happens.
    let cooked = RawCdImage::open(files.clone(), "/dev_hdd0/cooked.bin", single_track(), 2048).unwrap();
    assert_eq!(cooked.sector_size(), 2048);

    // Given a nonsense hint, the default is probed.
    let raw = RawCdImage::open(files, "/dev_hdd0/raw.bin", single_track(), 1234).unwrap();
    assert_eq!(raw.sector_size(), 2352);
}

#[test]
fn test_raw_cd_rejects_small_images() {

    let files = Arc::new(MemoryFileSystem::new().with_file("/dev_hdd0/small.bin", vec![0; 0x9000]));

    let result = RawCdImage::open(files, "/dev_hdd0/small.bin", single_track(), 2352);

    assert!(matches!(result, Err(EngineError::InvalidArgument(_))));
}

#[test]
fn test_raw_cd_read_2048_extracts_unaligned_payload() {

    let files = Arc::new(MemoryFileSystem::new().with_file("/dev_hdd0/game.bin", raw_image(2352, 20)));
    let mut image = RawCdImage::open(files, "/dev_hdd0/game.bin", single_track(), 2352).unwrap();

    let mut destination = Destination::local(3000);
    image.read_2048(3 * 2048 + 100, &mut destination).unwrap();
    let data = destination.into_local().unwrap();

    assert!(data[..1948].iter().all(|byte| *byte == 3));
    assert!(data[1948..].iter().all(|byte| *byte == 4));
}

#[test]
fn test_raw_cd_read_2048_past_end_is_zero_filled() {

    let files = Arc::new(MemoryFileSystem::new().with_file("/dev_hdd0/game.bin", raw_image(2352, 20)));
    let mut image = RawCdImage::open(files, "/dev_hdd0/game.bin", single_track(), 2352).unwrap();

    let mut destination = Destination::local(4096);
    image.read_2048(19 * 2048, &mut destination).unwrap();
    let data = destination.into_local().unwrap();

    assert!(data[..2048].iter().all(|byte| *byte == 19));
    assert!(data[2048..].iter().all(|byte| *byte == 0));
}

#[test]
fn test_raw_cd_window_forward_overlap() {

    let files = Arc::new(MemoryFileSystem::new().with_file("/dev_hdd0/game.bin", raw_image(2352, 200)));
    let mut image = RawCdImage::open(files.clone(), "/dev_hdd0/game.bin", single_track(), 2352).unwrap();
    let reads = files.reads();

    // Given increasing, overlapping requests, only two window fills happen.
    let mut requests = 0;
    for start in [0, 5, 60, 70] {
        let data = read_raw_local(&mut image, start, 10);
        for (index, sector) in data.chunks(2352).enumerate() {
            let lba = start + index as u64;
            if lba != 16 {
                assert_eq!(payload_of(sector), lba as u8);
            }
        }
        requests += 1;
    }

    assert_eq!(files.reads() - reads, 2);
    assert!(files.reads() - reads < requests);
}

#[test]
fn test_raw_cd_window_backward_overlap() {

    let files = Arc::new(MemoryFileSystem::new().with_file("/dev_hdd0/game.bin", raw_image(2352, 200)));
    let mut image = RawCdImage::open(files.clone(), "/dev_hdd0/game.bin", single_track(), 2352).unwrap();

    read_raw_local(&mut image, 100, 10);
    let reads = files.reads();

    // Given a request ending inside the window, only the missing head is read.
    let data = read_raw_local(&mut image, 95, 10);
    let lbas: Vec<u8> = data.chunks(2352).map(payload_of).collect();
    assert_eq!(lbas, (95..105).collect::<Vec<u8>>());
    assert_eq!(files.reads() - reads, 1);

    // Given the window now starts at 95, a full window request is resident.
    let data = read_raw_local(&mut image, 95, 64);
    assert_eq!(payload_of(&data[63 * 2352..]), 158);
    assert_eq!(files.reads() - reads, 1);
}

#[test]
fn test_raw_cd_large_reads_stream_in_batches() {

    let files = Arc::new(MemoryFileSystem::new().with_file("/dev_hdd0/game.bin", raw_image(2352, 200)));
    let mut image = RawCdImage::open(files.clone(), "/dev_hdd0/game.bin", single_track(), 2352).unwrap();
    let reads = files.reads();

    let data = read_raw_local(&mut image, 20, 130);

    assert_eq!(files.reads() - reads, 2);
    assert_eq!(payload_of(&data[..2352]), 20);
    assert_eq!(payload_of(&data[129 * 2352..]), 149);
}

#[test]
fn test_raw_cd_read_raw_past_end_is_zero_filled() {

    let files = Arc::new(MemoryFileSystem::new().with_file("/dev_hdd0/game.bin", raw_image(2352, 20)));
    let mut image = RawCdImage::open(files, "/dev_hdd0/game.bin", single_track(), 2352).unwrap();

    let data = read_raw_local(&mut image, 18, 4);

    assert_eq!(payload_of(&data[..2352]), 18);
    assert!(data[2 * 2352..].iter().all(|byte| *byte == 0));
}

fn proxy_image(files: Arc<MemoryFileSystem>, executor: Arc<ProcessMemory>, chunk: usize) -> ProxyImage {
    let endpoint = LoopbackEndpoint::new(files, "/dev_hdd0/remote.iso", executor);
    let channel = ProxyChannel::connect(Box::new(endpoint)).unwrap();
    ProxyImage::new(channel, 16384, chunk, None, 2048)
}

#[test]
fn test_proxy_read_is_chunked_through_a_lent_page() {

    let bytes = counting_bytes(16384);
    let files = Arc::new(MemoryFileSystem::new().with_file("/dev_hdd0/remote.iso", bytes.clone()));
    let executor = Arc::new(ProcessMemory::new(ProcessId(1), 0x1000, 0x4000));
    let mut image = proxy_image(files, executor, 1000);

    let mut destination = Destination::local(5000);
    image.read(ProxyCommand::ReadIso, 300, &mut destination).unwrap();

    assert_eq!(destination.into_local().unwrap(), bytes[300..5300].to_vec());
    assert_eq!(image.sector_count(), 8);
}

#[test]
fn test_proxy_read_into_executor_memory_is_direct() {

    let bytes = counting_bytes(16384);
    let files = Arc::new(MemoryFileSystem::new().with_file("/dev_hdd0/remote.iso", bytes.clone()));
    let executor = Arc::new(ProcessMemory::new(ProcessId(1), 0x1000, 0x4000));
    let mut image = proxy_image(files, executor.clone(), 512);

    let mut destination = Destination::remote(executor.clone() as Caller, 0x1010, 4000);
    image.read(ProxyCommand::ReadIso, 2048, &mut destination).unwrap();

    assert_eq!(executor.snapshot(0x1010, 4000).unwrap(), bytes[2048..6048].to_vec());
}

#[test]
fn test_proxy_read_to_other_process_uses_bounce_page() {

    let bytes = counting_bytes(16384);
    let files = Arc::new(MemoryFileSystem::new().with_file("/dev_hdd0/remote.iso", bytes.clone()));
    let executor = Arc::new(ProcessMemory::new(ProcessId(1), 0x1000, 0x4000));
    let other = Arc::new(ProcessMemory::new(ProcessId(2), 0x1000, 0x4000));
    let mut image = proxy_image(files, executor.clone(), 700);

    let mut destination = Destination::remote(other.clone() as Caller, 0x1000, 3000);
    image.read(ProxyCommand::ReadIso, 0, &mut destination).unwrap();

    assert_eq!(other.snapshot(0x1000, 3000).unwrap(), bytes[..3000].to_vec());
    assert!(executor.snapshot(0x1000, 3000).unwrap().iter().all(|byte| *byte == 0));
}

#[test]
fn test_proxy_sector_cache_hit_and_invalidation() {

    let bytes = counting_bytes(16384);
    let files = Arc::new(MemoryFileSystem::new().with_file("/dev_hdd0/remote.iso", bytes.clone()));
    let executor = Arc::new(ProcessMemory::new(ProcessId(1), 0x1000, 0x4000));
    let mut image = proxy_image(files.clone(), executor, 4096);
    image.set_sector_cache(true);

    let read = |image: &mut ProxyImage, offset: u64, length: usize| {
        let mut destination = Destination::local(length);
        image.read(ProxyCommand::ReadIso, offset, &mut destination).unwrap();
        destination.into_local().unwrap()
    };

    assert_eq!(read(&mut image, 2048, 2048), bytes[2048..4096].to_vec());
    let requests = files.reads();

    // Given the same sector again, the executor isn't asked.
    assert_eq!(read(&mut image, 2048, 2048), bytes[2048..4096].to_vec());
    assert_eq!(files.reads(), requests);

    // Given a read at another offset, the cached sector goes.
    assert_eq!(read(&mut image, 6144, 2048), bytes[6144..8192].to_vec());
    assert!(files.reads() > requests);
    let requests = files.reads();
    assert_eq!(read(&mut image, 2048, 2048), bytes[2048..4096].to_vec());
    assert!(files.reads() > requests);

    // Given a read of another size, the cache goes too.
    assert_eq!(read(&mut image, 2048, 100), bytes[2048..2148].to_vec());
    let requests = files.reads();
    assert_eq!(read(&mut image, 2048, 2048), bytes[2048..4096].to_vec());
    assert!(files.reads() > requests);
}

#[test]
fn test_proxy_cache_only_holds_iso_reads() {

    let bytes = counting_bytes(16384);
    let files = Arc::new(MemoryFileSystem::new().with_file("/dev_hdd0/remote.iso", bytes.clone()));
    let executor = Arc::new(ProcessMemory::new(ProcessId(1), 0x1000, 0x4000));
    let mut image = proxy_image(files.clone(), executor, 4096);

    // Given the cache is off, repeated sectors go to the executor each time.
    let mut destination = Destination::local(2048);
    image.read(ProxyCommand::ReadIso, 0, &mut destination).unwrap();
    let requests = files.reads();
    image.read(ProxyCommand::ReadIso, 0, &mut destination).unwrap();
    assert!(files.reads() > requests);

    // Given the cache is on, raw reads of a sector's size are never cached.
    image.set_sector_cache(true);
    image.read(ProxyCommand::ReadCdRaw, 0, &mut destination).unwrap();
    let requests = files.reads();
    image.read(ProxyCommand::ReadCdRaw, 0, &mut destination).unwrap();
    assert!(files.reads() > requests);
}

#[test]
fn test_proxy_remote_failure_is_reported() {

    let files = Arc::new(MemoryFileSystem::new());
    let executor = Arc::new(ProcessMemory::new(ProcessId(1), 0x1000, 0x4000));
    let mut image = proxy_image(files, executor, 1000);

    let mut destination = Destination::local(2048);
    let result = image.read(ProxyCommand::ReadIso, 0, &mut destination);

    assert!(matches!(result, Err(EngineError::RemoteStatus(-5))));
}

#[test]
fn test_proxy_layout_counts_raw_sectors() {

    let files = Arc::new(MemoryFileSystem::new().with_file("/dev_hdd0/remote.iso", raw_image(2352, 20)));
    let executor = Arc::new(ProcessMemory::new(ProcessId(1), 0x1000, 0x4000));
    let endpoint = LoopbackEndpoint::new(files, "/dev_hdd0/remote.iso", executor);
    let channel = ProxyChannel::connect(Box::new(endpoint)).unwrap();
    let mut image = ProxyImage::new(channel, 20 * 2352, 4096, Some(single_track()), 2352);

    let layout = image.layout().unwrap();
    assert_eq!(layout.total_sectors(), 20);
    assert_eq!(layout.sector_size(), 2352);

    let mut destination = Destination::local(2352);
    image.read(ProxyCommand::ReadCdRaw, 5 * 2352, &mut destination).unwrap();
    assert_eq!(payload_of(&destination.into_local().unwrap()), 5);
}

#[test]
fn test_backing_image_reports_device_sizes() {

    let (files, paths, _) = two_part_image();
    let linear = BackingImage::MultiFile(MultiFileImage::open(files, &paths).unwrap());

    assert_eq!(linear.device_sector_count(), 6);
    assert_eq!(linear.sector_count_for(512), 27);
    assert_eq!(linear.first_path(), Some("/dev_hdd0/a.iso"));
    assert!(linear.raw_layout().is_none());
}
