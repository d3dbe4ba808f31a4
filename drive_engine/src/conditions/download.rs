// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Firmware download: chunked WRITE BUFFER transfer, then a deferred
//! power cycle once the upstream layer has no attached clients.

use super::poll;
use super::Poll;
use crate::dispatch::Completion;
use crate::engine::Condition;
use crate::engine::ConditionId;
use crate::engine::Crank;
use crate::engine::CrankOutcome;
use crate::engine::EngineState;
use crate::request::ClientRequest;
use crate::request::RequestError;
use crate::request::RequestKind;
use crate::request::RequestPayload;
use crate::request::Response;
use drive_codec::build;
use drive_core::ControlRequest;
use drive_core::DeathReason;
use drive_core::DriveStatus;

struct DownloadJob {
    client: Option<ClientRequest>,
    image: Vec<u8>,
    offset: usize,
    /// Length of the chunk currently in flight.
    inflight_len: usize,
    retries: u32,
}

pub(crate) struct DownloadWriteCond {
    job: Option<DownloadJob>,
}

impl DownloadWriteCond {
    pub(crate) fn new() -> Self {
        Self { job: None }
    }

    fn fail_job(&mut self, cx: &mut Crank<'_>, error: RequestError) {
        cx.core.edge.update_attrs(|a| a.with_download_in_progress(false));
        if let Some(mut job) = self.job.take() {
            if let Some(client) = job.client.take() {
                client.respond(Err(error));
            }
        }
    }
}

impl Condition for DownloadWriteCond {
    fn step(&mut self, cx: &mut Crank<'_>) -> CrankOutcome {
        if std::mem::take(&mut cx.shared().download_abort) && self.job.is_some() {
            tracing::info!(object = cx.core.object_id, "canceling active firmware transfer");
            self.fail_job(cx, RequestError::Canceled);
        }
        loop {
            if self.job.is_none() {
                // A chunk completion can land after its job was canceled;
                // discard it rather than letting it park forever.
                while cx.take_completion(ConditionId::DownloadWrite).is_some() {}
                let Some(mut request) = cx.pending().take(RequestKind::FirmwareDownload) else {
                    return CrankOutcome::Done;
                };
                let payload = std::mem::replace(&mut request.payload, RequestPayload::None);
                let image = match payload {
                    RequestPayload::Buffer(image) if !image.is_empty() => image,
                    _ => {
                        request.respond(Err(RequestError::InvalidParameter));
                        continue;
                    }
                };
                tracing::info!(
                    object = cx.core.object_id,
                    image_len = image.len(),
                    "starting firmware download"
                );
                cx.core.edge.update_attrs(|a| a.with_download_in_progress(true));
                self.job = Some(DownloadJob {
                    client: Some(request),
                    image,
                    offset: 0,
                    inflight_len: 0,
                    retries: 0,
                });
            }
            let Some(job) = self.job.as_mut() else {
                return CrankOutcome::Done;
            };

            match poll(cx, ConditionId::DownloadWrite) {
                Poll::Wait => return CrankOutcome::Pending,
                Poll::Issue => {
                    if job.offset >= job.image.len() {
                        // Transfer complete; the drive commits on the last
                        // chunk. Schedule the power cycle that activates
                        // the new image.
                        cx.core.edge.update_attrs(|a| {
                            a.with_download_in_progress(false)
                                .with_power_cycle_pending(true)
                        });
                        let grace = cx.config().download_power_cycle_grace;
                        cx.arm_timer(ConditionId::DownloadPowerCycle, grace);
                        if let Some(mut job) = self.job.take() {
                            if let Some(client) = job.client.take() {
                                client.respond(Ok(Response::Empty));
                            }
                        }
                        return CrankOutcome::Done;
                    }
                    let end = (job.offset + cx.config().download_chunk_size).min(job.image.len());
                    let chunk = job.image[job.offset..end].to_vec();
                    job.inflight_len = chunk.len();
                    cx.issue(
                        ConditionId::DownloadWrite,
                        build::write_buffer(0, job.offset as u32, chunk),
                    );
                    return CrankOutcome::Pending;
                }
                Poll::Complete(Completion::Control { .. }) => continue,
                Poll::Complete(Completion::Command { result, .. }) => {
                    let result = match result {
                        Ok(result) => result,
                        Err(err) => {
                            tracing::error!(%err, "firmware write transport failure");
                            self.fail_job(cx, RequestError::Transport);
                            return CrankOutcome::Fail(DeathReason::EdgeGone);
                        }
                    };
                    match cx.classify(&result) {
                        DriveStatus::Ok => {
                            job.offset += job.inflight_len;
                            job.retries = 0;
                        }
                        DriveStatus::NeedRetry
                        | DriveStatus::NeedReschedule
                        | DriveStatus::BecomingReady => {
                            job.retries += 1;
                            if job.retries > cx.config().download_retry_limit {
                                self.fail_job(
                                    cx,
                                    RequestError::Drive(DriveStatus::NeedRetry),
                                );
                                return CrankOutcome::Fail(DeathReason::DownloadFailed);
                            }
                        }
                        DriveStatus::DeviceNotPresent => {
                            self.fail_job(
                                cx,
                                RequestError::ObjectFailed(DeathReason::EdgeGone),
                            );
                            return CrankOutcome::Fail(DeathReason::EdgeGone);
                        }
                        status => {
                            tracing::error!(?status, "firmware write rejected");
                            self.fail_job(cx, RequestError::Drive(status));
                            return CrankOutcome::Fail(DeathReason::DownloadFailed);
                        }
                    }
                }
            }
        }
    }

    fn reset(&mut self) {
        // An interrupted transfer cannot resume; the client retries.
        if let Some(mut job) = self.job.take() {
            if let Some(client) = job.client.take() {
                client.respond(Err(RequestError::Canceled));
            }
        }
    }
}

pub(crate) struct DownloadPowerCycleCond {
    cycling: bool,
}

impl DownloadPowerCycleCond {
    pub(crate) fn new() -> Self {
        Self { cycling: false }
    }
}

impl Condition for DownloadPowerCycleCond {
    fn step(&mut self, cx: &mut Crank<'_>) -> CrankOutcome {
        if self.cycling {
            return match poll(cx, ConditionId::DownloadPowerCycle) {
                Poll::Issue => {
                    cx.issue_control(ConditionId::DownloadPowerCycle, ControlRequest::PowerCycle);
                    CrankOutcome::Pending
                }
                Poll::Wait => CrankOutcome::Pending,
                Poll::Complete(Completion::Control { result }) => {
                    self.cycling = false;
                    match result {
                        Ok(()) => {
                            cx.core
                                .edge
                                .update_attrs(|a| a.with_power_cycle_pending(false));
                            // The drive re-initializes on the new image.
                            CrankOutcome::Goto(EngineState::Activate)
                        }
                        Err(err) => {
                            tracing::error!(%err, "post-download power cycle failed");
                            CrankOutcome::Fail(DeathReason::DownloadFailed)
                        }
                    }
                }
                Poll::Complete(Completion::Command { .. }) => CrankOutcome::Pending,
            };
        }

        if !cx.core.edge.attrs().power_cycle_pending() {
            return CrankOutcome::Done;
        }
        if cx.core.upstream.client_count() > 0 {
            // Clients still attached; check again after another grace
            // window.
            let grace = cx.config().download_power_cycle_grace;
            cx.arm_timer(ConditionId::DownloadPowerCycle, grace);
            return CrankOutcome::Done;
        }
        self.cycling = true;
        cx.issue_control(ConditionId::DownloadPowerCycle, ControlRequest::PowerCycle);
        CrankOutcome::Pending
    }

    fn reset(&mut self) {
        self.cycling = false;
    }
}
