// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Command/status codec: builders for the fixed-shape command descriptors
//! the engine issues, and classification of raw completions into the
//! [`DriveStatus`] taxonomy that every recovery protocol branches on.

#![forbid(unsafe_code)]

pub mod build;
mod classify;

pub use classify::classify;
pub use classify::sanitize_progress;
pub use classify::FlashPortErrors;
pub use classify::PortErrorTable;
pub use classify::SataPaddlecardPortErrors;
pub use classify::StandardPortErrors;

use std::time::Duration;

/// Timeout for pure status probes (TEST UNIT READY).
pub const TIMEOUT_STATUS: Duration = Duration::from_secs(10);

/// Timeout for ordinary control commands (inquiry, mode pages, capacity,
/// diagnostics, log pages).
pub const TIMEOUT_CONTROL: Duration = Duration::from_secs(30);

/// Timeout for firmware write-buffer chunks. Long enough to cover the
/// drive-internal commit after the final chunk lands.
pub const TIMEOUT_FIRMWARE: Duration = Duration::from_secs(300);

/// Timeout for format/sanitize initiation. The bulk of the work is polled
/// asynchronously, but the immediate phase of these commands can itself be
/// slow on large media.
pub const TIMEOUT_FORMAT: Duration = Duration::from_secs(7200);
