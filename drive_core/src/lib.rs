// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Core traits and types shared across the drive control stack: the path
//! state model, the classified drive-status taxonomy, command/control
//! request values, and the traits for the adapter port and the other
//! external collaborators.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use bitfield_struct::bitfield;
use drive_defs::ScsiStatus;
use drive_defs::SenseData;
use drive_defs::CDB_SIZE;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// State of the logical point-to-point connection between a drive object
/// and its adapter port.
///
/// Legal transitions: `Invalid` → (attach) → `Disabled` → (open) →
/// `Enabled`, plus `Broken`/`Gone` on edge loss from any attached state.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PathState {
    Invalid,
    Disabled,
    Enabled,
    Broken,
    Gone,
}

/// Advisory attributes carried on the edge. These are in-memory metadata
/// only; setting one never touches hardware.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PathAttrs {
    pub closed: bool,
    pub spinup_permitted: bool,
    pub spinup_pending: bool,
    pub health_check_request: bool,
    pub health_check_ack: bool,
    pub health_check_deny: bool,
    pub download_in_progress: bool,
    pub power_cycle_pending: bool,
    pub power_save_on: bool,
    pub end_of_life: bool,
    pub proactive_spare: bool,
    #[bits(21)]
    pub reserved: u32,
}

/// Maintenance work outstanding against the drive. Conditions consult and
/// clear these bits; external requests set them.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct MaintenanceFlags {
    pub mode_pages: bool,
    pub capacity: bool,
    pub diagnostics: bool,
    pub queue_timer: bool,
    pub perf_counters: bool,
    #[bits(27)]
    pub reserved: u32,
}

/// The classified result of a completed drive command. Every recovery
/// protocol branches on this taxonomy, never on raw sense bytes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DriveStatus {
    Ok,
    NotSpinning,
    BecomingReady,
    DeviceNotPresent,
    HardError,
    NeedRetry,
    NeedReschedule,
    NeedRemap,
    SetProactiveSpare,
    SanitizeInProgress,
    SanitizeNeedsRestart,
    Invalid,
}

/// Port-level completion status, reported by the adapter for every request
/// whether or not the drive produced a SCSI status.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PortStatus {
    Success,
    Timeout,
    Busy,
    Canceled,
    NoDevice,
    IoError,
}

/// A drive command: a CDB plus data-phase buffers and a per-command
/// timeout. The payload buffer is owned by the request and returned with
/// the result, so release is automatic on every completion path.
#[derive(Debug)]
pub struct CommandRequest {
    pub cdb: [u8; CDB_SIZE],
    pub cdb_len: u8,
    /// Data-out payload, if the command carries one.
    pub data_out: Option<Vec<u8>>,
    /// Expected data-in transfer size in bytes.
    pub data_in_len: usize,
    pub timeout: Duration,
}

/// Completion of a [`CommandRequest`].
#[derive(Debug)]
pub struct CommandResult {
    pub port_status: PortStatus,
    pub scsi_status: ScsiStatus,
    pub sense: Option<SenseData>,
    /// Bytes actually transferred in the data phase.
    pub tx: usize,
    /// Data-in payload. Empty unless the command requested one and the
    /// port completed it.
    pub data_in: Vec<u8>,
}

impl CommandResult {
    /// A port-level failure with no drive response attached.
    pub fn port_failure(port_status: PortStatus) -> Self {
        Self {
            port_status,
            scsi_status: ScsiStatus::GOOD,
            sense: None,
            tx: 0,
            data_in: Vec::new(),
        }
    }
}

/// A management-plane request toward the adapter.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    /// Reset the device behind this edge.
    ResetDevice,
    /// Power-cycle the device slot.
    PowerCycle,
}

/// Identifies the device behind an adapter port, with a generation that
/// increments when the slot is re-populated.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DeviceAddress {
    pub port_id: u64,
    pub generation: u32,
}

/// Errors surfaced by the transport layer itself (the request could not be
/// delivered or completed). Never retried at this layer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("edge is not enabled (state {0:?})")]
    NotEnabled(PathState),
    #[error("edge already attached")]
    AlreadyAttached,
    #[error("device address mismatch (expected generation {expected}, port reports {actual})")]
    AddressMismatch { expected: u32, actual: u32 },
    #[error("adapter port rejected control request")]
    ControlRejected,
    #[error("request canceled before issue")]
    Canceled,
}

/// The downstream collaborator: an adapter port that accepts control and
/// functional requests and completes each exactly once.
#[async_trait]
pub trait AdapterPort: Send + Sync {
    /// Current address of the device behind this port.
    fn address(&self) -> DeviceAddress;

    /// Issues a drive command and returns its completion.
    async fn command(&self, request: CommandRequest) -> CommandResult;

    /// Issues a management request and returns when the adapter has
    /// completed it.
    async fn control(&self, request: ControlRequest) -> Result<(), TransportError>;
}

/// Outcome of a spin-up credit request.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SpinupGrant {
    /// Credit granted; spin-up may be issued now.
    Enabled,
    /// Credit reserved; the arbiter will wake the object when available.
    Pending,
    /// No credit; retry on a later crank.
    Denied,
}

/// Bounded spin-up arbitration provided by the discovery layer.
pub trait SpinupArbiter: Send + Sync {
    fn request_credit(&self, object_id: u64) -> SpinupGrant;
    fn release_credit(&self, object_id: u64);
}

/// The upstream provisioning layer, as seen from the engine. The quiesce
/// handshake itself rides on edge path attributes; this trait only carries
/// the notification and the liveness facts the engine consults.
pub trait UpstreamLayer: Send + Sync {
    /// Whether the layer considers itself logically online. Health check
    /// skips the quiesce phase when this is false.
    fn is_online(&self) -> bool;

    /// Number of attached upstream clients. Firmware download schedules a
    /// power cycle only when this is zero.
    fn client_count(&self) -> usize;

    /// Notifies the layer that a quiesce request attribute has been set.
    fn notify_quiesce(&self);
}

/// Component kinds addressable through the external attribute store.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ComponentType {
    Drive,
    Fan,
    PowerSupply,
    Enclosure,
}

#[derive(Debug, Error)]
pub enum AttributeError {
    #[error("attribute ({0:?}, {1}, {2}) not present")]
    NotPresent(ComponentType, u32, u32),
    #[error("attribute store unavailable")]
    Unavailable,
}

/// Opaque key-value access to enclosure component state (EDAL). The engine
/// never interprets the returned bytes.
pub trait AttributeStore: Send + Sync {
    fn get(&self, component: ComponentType, index: u32, attr: u32)
        -> Result<Vec<u8>, AttributeError>;
    fn set(
        &self,
        component: ComponentType,
        index: u32,
        attr: u32,
        value: &[u8],
    ) -> Result<(), AttributeError>;
}

/// Why a drive object transitioned to the terminal Fail state. Recorded
/// once and kept for field diagnosis.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeathReason {
    DriveNotSpinning,
    SpinDownFailed,
    ModeSelectFailed,
    CapacityFailed,
    HealthCheckFailed,
    DownloadFailed,
    SanitizeFailed,
    FormatFailed,
    HardError,
    EdgeGone,
    Destroyed,
}

impl fmt::Display for DeathReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeathReason::DriveNotSpinning => "drive not spinning",
            DeathReason::SpinDownFailed => "spin down failed",
            DeathReason::ModeSelectFailed => "mode select failed",
            DeathReason::CapacityFailed => "read capacity failed",
            DeathReason::HealthCheckFailed => "health check failed",
            DeathReason::DownloadFailed => "firmware download failed",
            DeathReason::SanitizeFailed => "sanitize failed",
            DeathReason::FormatFailed => "format failed",
            DeathReason::HardError => "hard error",
            DeathReason::EdgeGone => "edge gone",
            DeathReason::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

/// Drive class, driving vendor-table and port-error-classification
/// specialization. A runtime reclassification event may change this after
/// construction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DriveClassId {
    Sas,
    Flash,
    SataPaddlecard,
}

/// Sanitize variants exposed on the command surface.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SanitizePattern {
    EraseOnly,
    CryptoErase,
    Overwrite,
    OverwriteAndErase,
}

/// Externally visible sanitize state.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SanitizeState {
    Ok,
    InProgress,
    NeedsRestart,
}

/// Shared handle to an adapter port.
pub type PortHandle = Arc<dyn AdapterPort>;
