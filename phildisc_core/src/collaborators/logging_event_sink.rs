// SPDX-License-Identifier: GPL-3.0
// logging_event_sink.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use log::info;

use super::StorageEventSink;
use crate::error::{EngineError, SUCCEEDED};

/// This struct stands in for the driver stack's event port, simply logging every
/// event it is given and counting them.
pub struct LoggingEventSink {

    // Number of events delivered so far.
    delivered: u64,
}

impl LoggingEventSink {

    /// Creates a new sink with nothing delivered yet.
    pub fn new() -> Self {
        LoggingEventSink {
            delivered: 0,
        }
    }
}

impl StorageEventSink for LoggingEventSink {

    fn send(&mut self, event: u64, param: u64, device: u64) -> Result<i32, EngineError> {
        self.delivered += 1;
        info!(
            "Storage event {} = {:#x} (param {:#018x}) for device {:#018x}",
            self.delivered, event, param, device
        );
        Ok(SUCCEEDED)
    }
}
