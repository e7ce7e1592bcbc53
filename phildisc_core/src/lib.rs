// SPDX-License-Identifier: GPL-3.0
// lib.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

// Crate-wide lines to disable specific lints:

// Constructors take no arguments in several places where a Default
// implementation would add nothing.
#![allow(clippy::new_without_default)]

// We use upper-case acronyms for disc type constants, in order to match the
// names the drive firmware uses.
#![allow(clippy::upper_case_acronyms)]

/// This module contains the engine's error type and the status codes callers see.
pub mod error;

/// This module contains the traits through which the engine reaches the outside
/// world, along with simple implementations of them.
pub mod collaborators;

/// This module contains disc type tracking and the decisions made from it.
pub mod disc_identity;

/// This module contains the readers for the supported image formats.
pub mod backing_image;

/// This module contains the client side of the proxy image protocol.
pub mod proxy;

/// This module contains the CD command synthesiser.
pub mod scsi;

/// This module contains the worker thread that carries out blocking engine work.
pub mod dispatcher;

/// This module contains the engine itself.
pub mod engine;

#[cfg(test)]
mod test_support;
