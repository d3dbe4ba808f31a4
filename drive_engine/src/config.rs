// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Engine tuning parameters.
//!
//! The retry bounds here are empirically tuned hardware-timing constants,
//! not protocol requirements, so every one of them is a named, overridable
//! field rather than an inline literal.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Consecutive TEST UNIT READY attempts before the object fails with
    /// "drive not spinning". Sized to the worst-case vendor spin-up
    /// latency.
    pub tur_retry_limit: u32,

    /// Delay between TEST UNIT READY probes while the drive reports it is
    /// becoming ready.
    pub tur_poll_interval: Duration,

    /// Retries for the discovery commands (INQUIRY, VPD pages).
    pub specialize_retry_limit: u32,

    /// Delay before re-issuing a command the drive asked to have
    /// rescheduled. Reschedules do not consume the retry counters.
    pub reschedule_delay: Duration,

    /// MODE SELECT attempts per condition invocation.
    pub mode_select_retry_limit: u32,

    /// READ CAPACITY attempts.
    pub capacity_retry_limit: u32,

    /// Spin-down attempts during active hibernate entry.
    pub spin_down_retry_limit: u32,

    /// Self-test attempts during a health check.
    pub diag_retry_limit: u32,

    /// WRITE BUFFER attempts during firmware download.
    pub download_retry_limit: u32,

    /// Grace window between a successful firmware write and the mandatory
    /// power cycle, covering drive-internal post-write housekeeping.
    pub download_power_cycle_grace: Duration,

    /// Grace window between a successful spin-up and releasing the
    /// spin-up credit back to the discovery layer.
    pub credit_release_grace: Duration,

    /// Delay before re-attempting a spin-up when the arbiter denies
    /// credit outright.
    pub credit_retry_delay: Duration,

    /// Interval between sanitize progress polls.
    pub sanitize_poll_interval: Duration,

    /// Interval between periodic diagnostic log captures.
    pub collect_interval: Duration,

    /// Remap attempts during a disk-collect write before escalating to
    /// the proactive-spare attribute.
    pub collect_remap_limit: u32,

    /// Write attempts per disk-collect cycle.
    pub collect_write_retry_limit: u32,

    /// Firmware image chunk size for WRITE BUFFER.
    pub download_chunk_size: usize,

    /// Reserved on-drive LBA where disk-collect log chunks land.
    pub collect_reserved_lba: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tur_retry_limit: 44,
            tur_poll_interval: Duration::from_secs(1),
            specialize_retry_limit: 3,
            reschedule_delay: Duration::from_secs(1),
            mode_select_retry_limit: 2,
            capacity_retry_limit: 3,
            spin_down_retry_limit: 3,
            diag_retry_limit: 3,
            download_retry_limit: 3,
            download_power_cycle_grace: Duration::from_secs(60),
            credit_release_grace: Duration::from_secs(10),
            credit_retry_delay: Duration::from_secs(2),
            sanitize_poll_interval: Duration::from_secs(30),
            collect_interval: Duration::from_secs(3600),
            collect_remap_limit: 3,
            collect_write_retry_limit: 3,
            download_chunk_size: 64 * 1024,
            collect_reserved_lba: 0,
        }
    }
}
