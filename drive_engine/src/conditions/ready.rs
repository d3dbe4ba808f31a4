// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Serving queued client requests, one drive command at a time.
//!
//! Long-running protocols (health check, sanitize, firmware download)
//! have their own conditions; this one serves the inline request kinds
//! in arrival order. During an active sanitize nothing is served, since
//! the drive fails all media access until the operation completes.

use super::poll;
use super::set_proactive_spare;
use super::Poll;
use crate::dispatch::Completion;
use crate::engine::Condition;
use crate::engine::ConditionId;
use crate::engine::Crank;
use crate::engine::CrankOutcome;
use crate::request::ClientRequest;
use crate::request::RequestError;
use crate::request::RequestKind;
use crate::request::RequestPayload;
use crate::request::Response;
use drive_codec::build;
use drive_core::CommandRequest;
use drive_core::DeathReason;
use drive_core::DriveStatus;
use drive_core::SanitizeState;

fn is_inline(kind: RequestKind) -> bool {
    !matches!(
        kind,
        RequestKind::HealthCheck | RequestKind::SanitizeStart | RequestKind::FirmwareDownload
    )
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum ServePhase {
    /// Single command; the completion answers the client.
    Single,
    /// FORMAT: block descriptor mode select sent, FORMAT UNIT next.
    FormatSelect,
    /// FORMAT UNIT in flight.
    FormatUnit,
}

struct Active {
    client: ClientRequest,
    phase: ServePhase,
    /// Block size being formatted, recorded into shared state on success.
    block_size: u32,
}

pub(crate) struct ServeRequestsCond {
    active: Option<Active>,
}

impl ServeRequestsCond {
    pub(crate) fn new() -> Self {
        Self { active: None }
    }

    /// Builds the drive command for one client request. `Err` carries the
    /// request back for an immediate parameter rejection.
    fn build_command(request: &mut ClientRequest) -> Result<(CommandRequest, ServePhase), ()> {
        let payload = std::mem::replace(&mut request.payload, RequestPayload::None);
        let command = match (request.kind, payload) {
            (RequestKind::GetModePage, RequestPayload::Page(page)) => {
                build::mode_sense10(page, 512)
            }
            (RequestKind::SetModePage, RequestPayload::Buffer(list)) if !list.is_empty() => {
                build::mode_select10(list)
            }
            (RequestKind::GetVpdPage, RequestPayload::Page(page)) => {
                build::vpd_inquiry(page, 0xFF)
            }
            (RequestKind::GetLogPage, RequestPayload::Page(page)) => build::log_sense(page, 1024),
            (
                RequestKind::ReadLong,
                RequestPayload::Lba {
                    logical_block,
                    length,
                },
            ) if length > 0 => build::read_long(logical_block, length),
            (
                RequestKind::WriteLong,
                RequestPayload::LbaData {
                    logical_block,
                    data,
                },
            ) if !data.is_empty() => build::write_long(logical_block, data),
            (RequestKind::FormatBlockSize, RequestPayload::BlockSize(size)) if size > 0 => {
                return Ok((build::mode_select_block_size(size), ServePhase::FormatSelect));
            }
            (RequestKind::SetQueueTimer, RequestPayload::TimerMillis(millis)) => {
                build::queue_timer(millis)
            }
            (RequestKind::ReadPerfCounters, RequestPayload::None) => {
                build::log_sense(drive_defs::LOG_PAGE_READ_ERROR_COUNTERS, 1024)
            }
            (
                RequestKind::Passthrough,
                RequestPayload::Passthrough {
                    cdb,
                    data_out,
                    data_in_len,
                },
            ) => match build::passthrough(&cdb, data_out, data_in_len) {
                Some(command) => command,
                None => return Err(()),
            },
            _ => return Err(()),
        };
        Ok((command, ServePhase::Single))
    }

    fn complete(
        &mut self,
        cx: &mut Crank<'_>,
        mut active: Active,
        result: drive_core::CommandResult,
    ) -> Option<CrankOutcome> {
        let status = cx.classify(&result);
        if status == DriveStatus::SetProactiveSpare {
            set_proactive_spare(cx);
        }
        match status {
            DriveStatus::Ok | DriveStatus::SetProactiveSpare => match active.phase {
                ServePhase::Single => {
                    let response = match active.client.kind {
                        RequestKind::SetModePage
                        | RequestKind::WriteLong
                        | RequestKind::SetQueueTimer => Response::Empty,
                        RequestKind::ReadPerfCounters => {
                            cx.shared().perf_counters = Some(result.data_in.clone());
                            Response::Data(result.data_in)
                        }
                        _ => Response::Data(result.data_in),
                    };
                    active.client.respond(Ok(response));
                    None
                }
                ServePhase::FormatSelect => {
                    active.phase = ServePhase::FormatUnit;
                    cx.issue(ConditionId::ServeRequests, build::format_unit());
                    self.active = Some(active);
                    Some(CrankOutcome::Pending)
                }
                ServePhase::FormatUnit => {
                    cx.shared().block_size = active.block_size;
                    active.client.respond(Ok(Response::Empty));
                    None
                }
            },
            DriveStatus::DeviceNotPresent => {
                active
                    .client
                    .respond(Err(RequestError::ObjectFailed(DeathReason::EdgeGone)));
                Some(CrankOutcome::Fail(DeathReason::EdgeGone))
            }
            status => {
                let format = active.phase != ServePhase::Single;
                active.client.respond(Err(RequestError::Drive(status)));
                if format {
                    // A half-formatted drive is not recoverable here.
                    Some(CrankOutcome::Fail(DeathReason::FormatFailed))
                } else {
                    None
                }
            }
        }
    }
}

impl Condition for ServeRequestsCond {
    fn step(&mut self, cx: &mut Crank<'_>) -> CrankOutcome {
        loop {
            if let Some(active) = self.active.take() {
                match poll(cx, ConditionId::ServeRequests) {
                    Poll::Wait => {
                        self.active = Some(active);
                        return CrankOutcome::Pending;
                    }
                    Poll::Issue => {
                        // Completion lost (edge torn down mid-request).
                        active.client.respond(Err(RequestError::Transport));
                    }
                    Poll::Complete(Completion::Control { .. }) => {
                        self.active = Some(active);
                        continue;
                    }
                    Poll::Complete(Completion::Command { result, .. }) => match result {
                        Ok(result) => {
                            if let Some(outcome) = self.complete(cx, active, result) {
                                return outcome;
                            }
                        }
                        Err(err) => {
                            tracing::warn!(%err, "client request transport failure");
                            active.client.respond(Err(RequestError::Transport));
                        }
                    },
                }
                continue;
            }

            if cx.shared().sanitize == SanitizeState::InProgress {
                return CrankOutcome::Done;
            }
            let Some(mut request) = cx.pending().pop_next_matching(is_inline) else {
                return CrankOutcome::Done;
            };
            // Counter collection toggles never touch the drive; reads
            // are refused until collection is switched on.
            match request.kind {
                RequestKind::EnablePerfCounters => {
                    let mut shared = cx.shared();
                    shared.perf_enabled = true;
                    shared.perf_counters = None;
                    drop(shared);
                    request.respond(Ok(Response::Empty));
                    continue;
                }
                RequestKind::DisablePerfCounters => {
                    let mut shared = cx.shared();
                    shared.perf_enabled = false;
                    shared.perf_counters = None;
                    drop(shared);
                    request.respond(Ok(Response::Empty));
                    continue;
                }
                RequestKind::ReadPerfCounters if !cx.shared().perf_enabled => {
                    request.respond(Err(RequestError::NotEnabled));
                    continue;
                }
                _ => {}
            }
            let block_size = match request.payload {
                RequestPayload::BlockSize(size) => size,
                _ => 0,
            };
            match Self::build_command(&mut request) {
                Ok((command, phase)) => {
                    cx.issue(ConditionId::ServeRequests, command);
                    self.active = Some(Active {
                        client: request,
                        phase,
                        block_size,
                    });
                    return CrankOutcome::Pending;
                }
                Err(()) => request.respond(Err(RequestError::InvalidParameter)),
            }
        }
    }

    fn reset(&mut self) {
        // Keep any in-flight client; its completion is still coming.
    }
}
