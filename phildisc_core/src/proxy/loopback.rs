// SPDX-License-Identifier: GPL-3.0
// loopback.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use std::{
    collections::HashMap,
    io::{Seek, SeekFrom},
    sync::{
        mpsc::{self, Receiver, SyncSender},
        Arc,
    },
    thread::{self, JoinHandle},
};

use log::{debug, warn};
use parking_lot::Mutex;

use super::{ProxyEndpoint, ProxyMessage, SharedPage};
use crate::{
    backing_image::read_fully,
    collaborators::{
        process_memory::ProcessMemory, CallerProcess, FileSystem, ImageFile, ProcessId
    },
    error::EngineError,
};

/// Where exported pages appear in the executor's view. Kept well clear of any
/// realistic process memory base.
const EXPORT_BASE: u32 = 0xC000_0000;
const EXPORT_STRIDE: u32 = 0x0010_0000;

/// Status the executor reports for a failed read.
const STATUS_IO_ERROR: i64 = -5;

/// Pages currently lent to the executor, by address.
type PageTable = Arc<Mutex<HashMap<u32, SharedPage>>>;

/// This struct is an executor living on a thread of this process, serving reads
/// of one image file into either its own memory or pages lent to it.
pub struct LoopbackEndpoint {

    // The image being served.
    files: Arc<dyn FileSystem>,
    path: String,

    // The memory of the executor process.
    process: Arc<ProcessMemory>,

    // Lent pages and the address the next one gets.
    pages: PageTable,
    next_page: u32,

    // Result queue waiting to be picked up by the client.
    pending_results: Option<Receiver<i64>>,

    // The executor thread.
    worker: Option<JoinHandle<()>>,
}

impl LoopbackEndpoint {

    /// Creates a new executor for the given image, running as the process that
    /// owns the supplied memory.
    pub fn new(files: Arc<dyn FileSystem>, path: &str, process: Arc<ProcessMemory>) -> Self {
        LoopbackEndpoint {
            files,
            path: path.to_string(),
            process,
            pages: Arc::new(Mutex::new(HashMap::new())),
            next_page: EXPORT_BASE,
            pending_results: None,
            worker: None,
        }
    }
}

impl ProxyEndpoint for LoopbackEndpoint {

    fn executor(&self) -> ProcessId {
        self.process.id()
    }

    fn connect_command(&mut self) -> Result<SyncSender<ProxyMessage>, EngineError> {

        if self.worker.is_some() {
            return Err(EngineError::InvalidState("loopback executor already connected"));
        }

        let (command_sender, command_receiver) = mpsc::sync_channel(1);
        let (result_sender, result_receiver) = mpsc::sync_channel(1);

        let executor = Executor {
            files: self.files.clone(),
            path: self.path.clone(),
            file: None,
            process: self.process.clone(),
            pages: self.pages.clone(),
        };

        let worker = thread::Builder::new()
            .name("proxy-executor".to_string())
            .spawn(move || executor.run(command_receiver, result_sender))?;

        self.worker = Some(worker);
        self.pending_results = Some(result_receiver);
        Ok(command_sender)
    }

    fn connect_result(&mut self) -> Result<Receiver<i64>, EngineError> {
        self.pending_results
            .take()
            .ok_or(EngineError::InvalidState("loopback command queue not connected"))
    }

    fn disconnect_command(&mut self) {
        self.pending_results = None;
        debug!("Loopback executor for {} disconnected", self.path);
    }

    fn export_page(&mut self, page: SharedPage) -> Result<u32, EngineError> {
        let address = self.next_page;
        self.next_page = self.next_page.wrapping_add(EXPORT_STRIDE).max(EXPORT_BASE);
        self.pages.lock().insert(address, page);
        Ok(address)
    }

    fn unexport_page(&mut self, address: u32) {
        if self.pages.lock().remove(&address).is_none() {
            warn!("Unexporting unknown page {:#x}", address);
        }
    }
}

impl Drop for LoopbackEndpoint {

    fn drop(&mut self) {

        // The worker ends once every command sender is gone.
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Loopback executor thread panicked");
            }
        }
    }
}

/// The executor side, owned by the worker thread.
struct Executor {
    files: Arc<dyn FileSystem>,
    path: String,
    file: Option<Box<dyn ImageFile>>,
    process: Arc<ProcessMemory>,
    pages: PageTable,
}

impl Executor {

    fn run(mut self, commands: Receiver<ProxyMessage>, results: SyncSender<i64>) {

        while let Ok(message) = commands.recv() {
            let status = match self.serve(&message) {
                Ok(()) => 0,
                Err(err) => {
                    warn!("Loopback read of {:?} failed: {}", message, err);
                    STATUS_IO_ERROR
                },
            };

            if results.send(status).is_err() {
                break;
            }
        }

        debug!("Loopback executor for {} stopping", self.path);
    }

    /// Reads the requested bytes, zero-filling past the end of the file.
    fn serve(&mut self, message: &ProxyMessage) -> Result<(), EngineError> {

        if self.file.is_none() {
            self.file = Some(self.files.open(&self.path)?);
        }
        let Some(file) = self.file.as_mut() else {
            return Err(EngineError::InvalidState("loopback image is not open"));
        };

        let mut bytes = vec![0; message.length() as usize];
        file.seek(SeekFrom::Start(message.offset))?;
        read_fully(&mut **file, &mut bytes)?;

        let address = message.address();
        if let Some(page) = self.pages.lock().get(&address) {
            let mut page = page.lock();
            if page.len() < bytes.len() {
                return Err(EngineError::InvalidArgument(format!(
                    "{} bytes do not fit in page {:#x}", bytes.len(), address
                )));
            }
            page[..bytes.len()].copy_from_slice(&bytes);
            return Ok(());
        }

        self.process.copy_out(address as u64, &bytes)?;
        Ok(())
    }
}
