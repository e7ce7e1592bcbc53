// SPDX-License-Identifier: GPL-3.0
// dispatcher.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use std::{
    sync::mpsc::{self, Receiver, SyncSender},
    thread::{self, JoinHandle},
};

use log::{debug, error, info};

use crate::{
    backing_image::Destination,
    engine::EngineContext,
    error::EngineError,
};

/// Name of the worker thread.
const DISPATCH_THREAD_NAME: &str = "disc-dispatch";

/// Work the dispatcher carries out on behalf of an entry point.
pub enum Command {

    // Read from the emulated disc's linear address space.
    ReadLinear {
        offset: u64,
        destination: Destination,
    },

    // Read 2048-byte sectors from the real disc.
    ReadPhysicalDisc {
        start: u64,
        count: u32,
        destination: Destination,
    },

    // Read whole raw sectors from the emulated CD.
    ReadCdRaw {
        start_sector: u64,
        count: u32,
        destination: Destination,
    },

    // Run a storage event through the identity state machine.
    FakeStorageEvent {
        event: u64,
        param: u64,
        device: u64,
    },

    // Work out the video mode of the PSX disc.
    GetVideoMode,
}

/// A command together with the context it runs against.
pub struct Envelope {
    pub command: Command,
    pub context: Box<EngineContext>,
}

/// The outcome of a command. The context always comes back, along with the
/// destination of a read.
pub struct Reply {
    pub context: Box<EngineContext>,
    pub result: Result<i64, EngineError>,
    pub returned: Option<Destination>,
}

/// A round trip that never completed. The context is recovered if the command
/// never reached the worker.
pub struct DispatchFailure {
    pub context: Option<Box<EngineContext>>,
    pub error: EngineError,
}

/// This struct owns the worker thread that performs all blocking engine work, one
/// command at a time.
pub struct Dispatcher {

    // Mailboxes.
    commands: Option<SyncSender<Envelope>>,
    replies: Receiver<Reply>,

    // The worker itself.
    worker: Option<JoinHandle<()>>,
}

impl Dispatcher {

    /// Creates the mailboxes and starts the worker.
    pub fn spawn() -> Result<Self, EngineError> {

        let (command_sender, command_receiver) = mpsc::sync_channel(1);
        let (reply_sender, reply_receiver) = mpsc::sync_channel(1);

        let worker = thread::Builder::new()
            .name(DISPATCH_THREAD_NAME.to_string())
            .spawn(move || run(command_receiver, reply_sender))?;

        info!("Command dispatcher started");
        Ok(Dispatcher {
            commands: Some(command_sender),
            replies: reply_receiver,
            worker: Some(worker),
        })
    }

    /// Hands a command to the worker and waits for its reply.
    pub fn submit(&mut self, envelope: Envelope) -> Result<Reply, DispatchFailure> {

        let Some(commands) = self.commands.as_ref() else {
            return Err(DispatchFailure {
                context: Some(envelope.context),
                error: EngineError::DispatcherGone,
            });
        };

        if let Err(mpsc::SendError(envelope)) = commands.send(envelope) {
            error!("Command mailbox closed");
            return Err(DispatchFailure {
                context: Some(envelope.context),
                error: EngineError::DispatcherGone,
            });
        }

        self.replies.recv().map_err(|_| {
            error!("Result mailbox closed");
            DispatchFailure {
                context: None,
                error: EngineError::DispatcherGone,
            }
        })
    }
}

impl Drop for Dispatcher {

    fn drop(&mut self) {

        // Closing the command mailbox ends the worker's loop.
        self.commands = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Command dispatcher panicked");
            }
        }
    }
}

/// The worker loop: take a command, run it, send back the result.
fn run(commands: Receiver<Envelope>, replies: SyncSender<Reply>) {

    while let Ok(Envelope { command, mut context }) = commands.recv() {
        let (result, returned) = context.execute(command);

        if let Err(err) = &result {
            debug!("Command failed: {}", err);
        }

        if replies.send(Reply { context, result, returned }).is_err() {
            error!("Result mailbox closed");
            return;
        }
    }

    info!("Command mailbox closed, dispatcher stopping");
}
