// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The health check protocol: quiesce the upstream layer, run the drive
//! self-test, reset, and clean up.
//!
//! The quiesce handshake rides on edge path attributes: this side sets
//! the request bit and notifies the upstream layer, which answers with
//! the ack or deny bit and pokes the object. Cleanup always runs, is
//! idempotent, and is the only phase that answers the client.

use super::poll;
use super::set_end_of_life;
use super::set_proactive_spare;
use super::Poll;
use crate::dispatch::Completion;
use crate::engine::Condition;
use crate::engine::ConditionId;
use crate::engine::Crank;
use crate::engine::CrankOutcome;
use crate::object::HealthJob;
use crate::request::RequestError;
use crate::request::RequestKind;
use crate::request::Response;
use drive_codec::build;
use drive_core::ControlRequest;
use drive_core::DeathReason;
use drive_core::DriveStatus;

pub(crate) struct QuiesceCond {
    waiting: bool,
}

impl QuiesceCond {
    pub(crate) fn new() -> Self {
        Self { waiting: false }
    }
}

impl Condition for QuiesceCond {
    fn step(&mut self, cx: &mut Crank<'_>) -> CrankOutcome {
        if !self.waiting {
            let Some(client) = cx.pending().take(RequestKind::HealthCheck) else {
                return CrankOutcome::Done;
            };
            if cx.shared().health.is_some() {
                client.respond(Err(RequestError::InProgress));
                return CrankOutcome::Done;
            }
            cx.shared().health = Some(HealthJob {
                client: Some(client),
                failed: false,
                denied: false,
            });
            if !cx.core.upstream.is_online() {
                // Nothing to quiesce; go straight to the self-test.
                cx.arm(ConditionId::HealthDiag);
                return CrankOutcome::Done;
            }
            cx.core
                .edge
                .update_attrs(|a| a.with_health_check_request(true));
            cx.core.upstream.notify_quiesce();
            self.waiting = true;
            return CrankOutcome::Pending;
        }

        let attrs = cx.core.edge.attrs();
        if attrs.health_check_deny() {
            self.waiting = false;
            if let Some(job) = cx.shared().health.as_mut() {
                job.denied = true;
            }
            cx.arm(ConditionId::HealthCleanup);
            return CrankOutcome::Done;
        }
        if attrs.health_check_ack() {
            self.waiting = false;
            cx.arm(ConditionId::HealthDiag);
            return CrankOutcome::Done;
        }
        CrankOutcome::Pending
    }

    fn reset(&mut self) {
        self.waiting = false;
    }
}

pub(crate) struct DiagCond {
    attempts: u32,
    resetting: bool,
}

impl DiagCond {
    pub(crate) fn new() -> Self {
        Self {
            attempts: 0,
            resetting: false,
        }
    }

    fn abandon(&mut self, cx: &mut Crank<'_>) -> CrankOutcome {
        if let Some(job) = cx.shared().health.as_mut() {
            job.failed = true;
        }
        self.attempts = 0;
        self.resetting = false;
        cx.arm(ConditionId::HealthCleanup);
        CrankOutcome::Done
    }
}

impl Condition for DiagCond {
    fn step(&mut self, cx: &mut Crank<'_>) -> CrankOutcome {
        loop {
            if self.resetting {
                match poll(cx, ConditionId::HealthDiag) {
                    Poll::Issue => {
                        cx.issue_control(ConditionId::HealthDiag, ControlRequest::ResetDevice);
                        return CrankOutcome::Pending;
                    }
                    Poll::Wait => return CrankOutcome::Pending,
                    Poll::Complete(Completion::Control { result }) => {
                        self.resetting = false;
                        if let Err(err) = result {
                            tracing::warn!(%err, "post-self-test reset failed");
                            return self.abandon(cx);
                        }
                        cx.arm(ConditionId::HealthCleanup);
                        return CrankOutcome::Done;
                    }
                    Poll::Complete(Completion::Command { .. }) => continue,
                }
            }
            match poll(cx, ConditionId::HealthDiag) {
                Poll::Issue => {
                    if cx.shared().health.is_none() {
                        // Spurious arm; nothing to test.
                        return CrankOutcome::Done;
                    }
                    cx.issue(ConditionId::HealthDiag, build::send_diagnostic_self_test());
                    return CrankOutcome::Pending;
                }
                Poll::Wait => return CrankOutcome::Pending,
                Poll::Complete(Completion::Control { .. }) => continue,
                Poll::Complete(Completion::Command { result, .. }) => {
                    let result = match result {
                        Ok(result) => result,
                        Err(err) => {
                            tracing::warn!(%err, "self-test transport failure");
                            return self.abandon(cx);
                        }
                    };
                    match cx.classify(&result) {
                        DriveStatus::Ok => {
                            // Clear any self-test side effects before the
                            // upstream layer resumes. The retry count is
                            // per job, not cumulative across checks.
                            self.attempts = 0;
                            self.resetting = true;
                            cx.issue_control(
                                ConditionId::HealthDiag,
                                ControlRequest::ResetDevice,
                            );
                            return CrankOutcome::Pending;
                        }
                        DriveStatus::SetProactiveSpare => {
                            set_proactive_spare(cx);
                            set_end_of_life(cx);
                            self.attempts = 0;
                            self.resetting = true;
                            cx.issue_control(
                                ConditionId::HealthDiag,
                                ControlRequest::ResetDevice,
                            );
                            return CrankOutcome::Pending;
                        }
                        DriveStatus::NeedRetry | DriveStatus::NeedReschedule => {
                            self.attempts += 1;
                            if self.attempts > cx.config().diag_retry_limit {
                                return self.abandon(cx);
                            }
                        }
                        DriveStatus::DeviceNotPresent => {
                            return CrankOutcome::Fail(DeathReason::EdgeGone)
                        }
                        status => {
                            tracing::warn!(?status, "self-test failed");
                            return self.abandon(cx);
                        }
                    }
                }
            }
        }
    }

    fn reset(&mut self) {
        self.attempts = 0;
        self.resetting = false;
    }
}

/// Terminal phase: clears the handshake attributes, answers the client,
/// and resumes the upstream layer. Tolerates re-entry with no job.
pub(crate) struct CleanupCond;

impl Condition for CleanupCond {
    fn step(&mut self, cx: &mut Crank<'_>) -> CrankOutcome {
        cx.core.edge.update_attrs(|a| {
            a.with_health_check_request(false)
                .with_health_check_ack(false)
                .with_health_check_deny(false)
        });
        let Some(mut job) = cx.shared().health.take() else {
            return CrankOutcome::Done;
        };
        cx.core.upstream.notify_quiesce();
        if let Some(client) = job.client.take() {
            if job.denied {
                client.respond(Err(RequestError::Denied));
            } else if job.failed {
                client.respond(Err(RequestError::Drive(DriveStatus::HardError)));
            } else {
                client.respond(Ok(Response::Empty));
            }
        }
        if job.failed && !job.denied {
            return CrankOutcome::Fail(DeathReason::HealthCheckFailed);
        }
        CrankOutcome::Done
    }
}
