// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Client request and response shapes for the drive command surface.

use drive_core::DeathReason;
use drive_core::DriveStatus;
use drive_core::SanitizePattern;
use drive_core::SanitizeState;
use thiserror::Error;
use tokio::sync::oneshot;

/// The kind of a queued client request. Requests are matched and removed
/// from the pending queue by kind.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RequestKind {
    GetModePage,
    SetModePage,
    GetVpdPage,
    GetLogPage,
    SanitizeStart,
    HealthCheck,
    FirmwareDownload,
    ReadLong,
    WriteLong,
    FormatBlockSize,
    SetQueueTimer,
    EnablePerfCounters,
    DisablePerfCounters,
    ReadPerfCounters,
    Passthrough,
}

/// Payload of a queued client request, already validated against its fixed
/// shape by the command surface.
#[derive(Debug)]
pub enum RequestPayload {
    None,
    Page(u8),
    Buffer(Vec<u8>),
    Sanitize(SanitizePattern),
    Lba { logical_block: u32, length: u16 },
    LbaData { logical_block: u32, data: Vec<u8> },
    BlockSize(u32),
    TimerMillis(u32),
    Passthrough {
        cdb: Vec<u8>,
        data_out: Option<Vec<u8>>,
        data_in_len: usize,
    },
}

/// Successful response to a client request.
#[derive(Debug)]
pub enum Response {
    Empty,
    Data(Vec<u8>),
    SanitizeStatus { state: SanitizeState, percent: u8 },
}

/// Failure response to a client request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    /// Buffer size or parameter did not match the expected fixed shape.
    /// Generic failure; no partial processing.
    #[error("invalid request parameter")]
    InvalidParameter,
    /// The request was withdrawn before it was issued to the drive.
    #[error("request canceled")]
    Canceled,
    /// The upstream layer refused to make way for the operation.
    #[error("request denied by upstream layer")]
    Denied,
    /// The drive completed the operation with a non-OK classified status.
    #[error("drive status {0:?}")]
    Drive(DriveStatus),
    /// The request could not be delivered over the edge.
    #[error("transport failure")]
    Transport,
    /// The object is in the terminal Fail state.
    #[error("object failed: {0}")]
    ObjectFailed(DeathReason),
    /// Another exclusive operation is in progress.
    #[error("operation already in progress")]
    InProgress,
    /// The operation requires collection that has not been enabled.
    #[error("collection not enabled")]
    NotEnabled,
}

pub type RequestResult = Result<Response, RequestError>;

/// A queued client request. The responder must be consumed exactly once;
/// dropping it delivers a cancellation to the caller.
#[derive(Debug)]
pub struct ClientRequest {
    pub kind: RequestKind,
    pub payload: RequestPayload,
    pub responder: oneshot::Sender<RequestResult>,
}

impl ClientRequest {
    pub fn respond(self, result: RequestResult) {
        // The caller may have given up waiting; that is not an error.
        let _ = self.responder.send(result);
    }
}
