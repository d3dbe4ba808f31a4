// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Sanitize: kick off the immediate-mode operation, then poll progress
//! with TEST UNIT READY until the drive reports ready again.
//!
//! While a sanitize runs the drive fails all media access, so mode page
//! and capacity maintenance are suppressed and client requests are held
//! in the queue. Completion re-enters activation to reprogram what the
//! sanitize wiped.

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
use drive_codec::sanitize_progress;
use drive_core::DeathReason;
use drive_core::DriveStatus;
use drive_core::SanitizeState;

pub(crate) struct SanitizeStartCond {
    client: Option<ClientRequest>,
}

impl SanitizeStartCond {
    pub(crate) fn new() -> Self {
        Self { client: None }
    }
}

impl Condition for SanitizeStartCond {
    fn step(&mut self, cx: &mut Crank<'_>) -> CrankOutcome {
        loop {
            match poll(cx, ConditionId::SanitizeStart) {
                Poll::Issue => {
                    let Some(mut request) = cx.pending().take(RequestKind::SanitizeStart) else {
                        return CrankOutcome::Done;
                    };
                    let payload = std::mem::replace(&mut request.payload, RequestPayload::None);
                    let pattern = match payload {
                        RequestPayload::Sanitize(pattern) => pattern,
                        _ => {
                            request.respond(Err(RequestError::InvalidParameter));
                            continue;
                        }
                    };
                    if cx.shared().sanitize == SanitizeState::InProgress {
                        request.respond(Err(RequestError::InProgress));
                        continue;
                    }
                    tracing::info!(object = cx.core.object_id, ?pattern, "starting sanitize");
                    self.client = Some(request);
                    cx.issue(ConditionId::SanitizeStart, build::sanitize(pattern));
                    return CrankOutcome::Pending;
                }
                Poll::Wait => return CrankOutcome::Pending,
                Poll::Complete(Completion::Control { .. }) => continue,
                Poll::Complete(Completion::Command { result, .. }) => {
                    let client = self.client.take();
                    let result = match result {
                        Ok(result) => result,
                        Err(err) => {
                            tracing::error!(%err, "sanitize transport failure");
                            if let Some(client) = client {
                                client.respond(Err(RequestError::Transport));
                            }
                            return CrankOutcome::Fail(DeathReason::EdgeGone);
                        }
                    };
                    match cx.classify(&result) {
                        DriveStatus::Ok | DriveStatus::SanitizeInProgress => {
                            {
                                let mut shared = cx.shared();
                                shared.sanitize = SanitizeState::InProgress;
                                shared.sanitize_percent = 0;
                            }
                            if let Some(client) = client {
                                client.respond(Ok(Response::SanitizeStatus {
                                    state: SanitizeState::InProgress,
                                    percent: 0,
                                }));
                            }
                            // Media access is gone until this finishes.
                            cx.cancel_timer(ConditionId::DiskCollect);
                            let interval = cx.config().sanitize_poll_interval;
                            cx.arm_timer(ConditionId::SanitizePoll, interval);
                        }
                        DriveStatus::SanitizeNeedsRestart => {
                            cx.shared().sanitize = SanitizeState::NeedsRestart;
                            if let Some(client) = client {
                                client.respond(Err(RequestError::Drive(
                                    DriveStatus::SanitizeNeedsRestart,
                                )));
                            }
                        }
                        DriveStatus::DeviceNotPresent => {
                            if let Some(client) = client {
                                client.respond(Err(RequestError::ObjectFailed(
                                    DeathReason::EdgeGone,
                                )));
                            }
                            return CrankOutcome::Fail(DeathReason::EdgeGone);
                        }
                        status => {
                            tracing::error!(?status, "sanitize rejected");
                            if let Some(client) = client {
                                client.respond(Err(RequestError::Drive(status)));
                            }
                        }
                    }
                }
            }
        }
    }

    fn reset(&mut self) {
        if let Some(client) = self.client.take() {
            client.respond(Err(RequestError::Canceled));
        }
    }
}

pub(crate) struct SanitizePollCond;

impl Condition for SanitizePollCond {
    fn step(&mut self, cx: &mut Crank<'_>) -> CrankOutcome {
        match poll(cx, ConditionId::SanitizePoll) {
            Poll::Issue => {
                if cx.shared().sanitize != SanitizeState::InProgress {
                    return CrankOutcome::Done;
                }
                cx.issue(ConditionId::SanitizePoll, build::test_unit_ready());
                CrankOutcome::Pending
            }
            Poll::Wait => CrankOutcome::Pending,
            Poll::Complete(Completion::Control { .. }) => CrankOutcome::Done,
            Poll::Complete(Completion::Command { result, .. }) => {
                let result = match result {
                    Ok(result) => result,
                    Err(err) => {
                        tracing::error!(%err, "sanitize poll transport failure");
                        return CrankOutcome::Fail(DeathReason::EdgeGone);
                    }
                };
                match cx.classify(&result) {
                    DriveStatus::SanitizeInProgress => {
                        if let Some(percent) = result.sense.as_ref().and_then(sanitize_progress) {
                            let mut shared = cx.shared();
                            // Drives sweep heads independently and may
                            // report momentary dips.
                            shared.sanitize_percent = shared.sanitize_percent.max(percent);
                        }
                        let interval = cx.config().sanitize_poll_interval;
                        cx.arm_timer(ConditionId::SanitizePoll, interval);
                        CrankOutcome::Done
                    }
                    DriveStatus::Ok => {
                        {
                            let mut shared = cx.shared();
                            shared.sanitize = SanitizeState::Ok;
                            shared.sanitize_percent = 100;
                        }
                        tracing::info!(object = cx.core.object_id, "sanitize complete");
                        // Reprogram mode pages and re-read capacity.
                        CrankOutcome::Goto(EngineState::Activate)
                    }
                    DriveStatus::SanitizeNeedsRestart => {
                        cx.shared().sanitize = SanitizeState::NeedsRestart;
                        tracing::warn!(object = cx.core.object_id, "sanitize must be restarted");
                        CrankOutcome::Done
                    }
                    DriveStatus::NeedRetry
                    | DriveStatus::NeedReschedule
                    | DriveStatus::BecomingReady => {
                        let interval = cx.config().sanitize_poll_interval;
                        cx.arm_timer(ConditionId::SanitizePoll, interval);
                        CrankOutcome::Done
                    }
                    DriveStatus::DeviceNotPresent => CrankOutcome::Fail(DeathReason::EdgeGone),
                    status => {
                        tracing::error!(?status, "sanitize failed");
                        CrankOutcome::Fail(DeathReason::SanitizeFailed)
                    }
                }
            }
        }
    }
}
