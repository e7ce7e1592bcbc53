// SPDX-License-Identifier: GPL-3.0
// proxy.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use std::sync::{
    mpsc::{Receiver, SyncSender},
    Arc,
};

use log::{debug, error};
use parking_lot::Mutex;

use crate::{
    collaborators::ProcessId,
    error::EngineError,
};

/// This module contains an in-process executor serving an image file, used by
/// the basic binary and the tests.
pub mod loopback;

/// Commands understood by the remote executor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProxyCommand {
    ReadIso = 0,
    ReadCdRaw = 2,
}

/// One request to the remote executor. The descriptor packs the address of the
/// buffer in the executor's view in the upper 32 bits and its length in the lower.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProxyMessage {
    pub command: ProxyCommand,
    pub offset: u64,
    pub descriptor: u64,
}

impl ProxyMessage {

    /// Creates a new message for the given buffer.
    pub fn new(command: ProxyCommand, offset: u64, address: u32, length: u32) -> Self {
        ProxyMessage {
            command,
            offset,
            descriptor: ((address as u64) << 32) | length as u64,
        }
    }

    pub fn address(&self) -> u32 {
        (self.descriptor >> 32) as u32
    }

    pub fn length(&self) -> u32 {
        self.descriptor as u32
    }
}

/// A page of engine memory that can be lent to the executor.
pub type SharedPage = Arc<Mutex<Vec<u8>>>;

/// This trait provides an implementation-opaque way of reaching a remote
/// executor: its command and result queues, and its view of lent memory.
pub trait ProxyEndpoint: Send {

    /// Implementations must return the process the executor runs as.
    fn executor(&self) -> ProcessId;

    /// Implementations must connect to the executor's command queue.
    fn connect_command(&mut self) -> Result<SyncSender<ProxyMessage>, EngineError>;

    /// Implementations must connect to the executor's result queue. Only valid
    /// once the command queue is connected.
    fn connect_result(&mut self) -> Result<Receiver<i64>, EngineError>;

    /// Implementations must tear down the command side of the connection.
    fn disconnect_command(&mut self);

    /// Implementations must make the page writable by the executor, returning the
    /// address it is visible at.
    fn export_page(&mut self, page: SharedPage) -> Result<u32, EngineError>;

    /// Implementations must revoke a page previously exported.
    fn unexport_page(&mut self, address: u32);
}

/// This struct is a connected request/response pair with the executor.
pub struct ProxyChannel {

    // Field order matters: the queues go before the endpoint is dropped.
    commands: SyncSender<ProxyMessage>,
    results: Receiver<i64>,
    endpoint: Box<dyn ProxyEndpoint>,
}

impl ProxyChannel {

    /// Connects both queues, rolling back the command side if the result side
    /// can't be reached.
    pub fn connect(mut endpoint: Box<dyn ProxyEndpoint>) -> Result<Self, EngineError> {

        let commands = endpoint.connect_command().map_err(|err| {
            error!("Cannot connect to proxy command queue: {}", err);
            EngineError::Protocol(format!("command queue: {}", err))
        })?;

        let results = match endpoint.connect_result() {
            Ok(results) => results,
            Err(err) => {
                error!("Cannot connect to proxy result queue: {}", err);
                drop(commands);
                endpoint.disconnect_command();
                return Err(EngineError::Protocol(format!("result queue: {}", err)));
            },
        };

        debug!("Connected to proxy executor {:?}", endpoint.executor());
        Ok(ProxyChannel {
            commands,
            results,
            endpoint,
        })
    }

    pub fn executor(&self) -> ProcessId {
        self.endpoint.executor()
    }

    /// Sends one message and waits for its status.
    pub fn request(&mut self, message: ProxyMessage) -> Result<i64, EngineError> {

        self.commands
            .send(message)
            .map_err(|_| EngineError::Protocol("proxy command queue closed".to_string()))?;

        self.results
            .recv()
            .map_err(|_| EngineError::Protocol("proxy result queue closed".to_string()))
    }

    pub fn export_page(&mut self, page: SharedPage) -> Result<u32, EngineError> {
        self.endpoint.export_page(page)
    }

    pub fn unexport_page(&mut self, address: u32) {
        self.endpoint.unexport_page(address)
    }
}

impl Drop for ProxyChannel {

    fn drop(&mut self) {
        debug!("Disconnecting from proxy executor {:?}", self.endpoint.executor());
        self.endpoint.disconnect_command();
    }
}
