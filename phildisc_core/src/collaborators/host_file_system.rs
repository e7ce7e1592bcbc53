// SPDX-License-Identifier: GPL-3.0
// host_file_system.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use std::{
    fs::{self, File},
    io::{self, BufReader},
};

use super::{FileSystem, ImageFile};

/// This struct gives the engine access to files on the host, through buffered
/// readers so that the many small sequential reads the readers do stay cheap.
pub struct HostFileSystem;

impl HostFileSystem {

    /// Creates a new host file system object.
    pub fn new() -> Self {
        HostFileSystem
    }
}

impl FileSystem for HostFileSystem {

    fn open(&self, path: &str) -> io::Result<Box<dyn ImageFile>> {
        let file = File::open(path)?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn stat(&self, path: &str) -> io::Result<u64> {
        Ok(fs::metadata(path)?.len())
    }
}
