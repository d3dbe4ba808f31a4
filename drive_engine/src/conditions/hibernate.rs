// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Active hibernate entry: spin the drive down and mark the edge.

use super::poll;
use super::Poll;
use crate::dispatch::Completion;
use crate::engine::Condition;
use crate::engine::ConditionId;
use crate::engine::Crank;
use crate::engine::CrankOutcome;
use drive_codec::build;
use drive_core::DeathReason;
use drive_core::DriveStatus;

pub(crate) struct SpinDownCond {
    attempts: u32,
}

impl SpinDownCond {
    pub(crate) fn new() -> Self {
        Self { attempts: 0 }
    }
}

impl Condition for SpinDownCond {
    fn step(&mut self, cx: &mut Crank<'_>) -> CrankOutcome {
        loop {
            match poll(cx, ConditionId::SpinDown) {
                Poll::Issue => {
                    cx.issue(ConditionId::SpinDown, build::stop_unit());
                    return CrankOutcome::Pending;
                }
                Poll::Wait => return CrankOutcome::Pending,
                Poll::Complete(Completion::Control { .. }) => continue,
                Poll::Complete(Completion::Command { result, .. }) => {
                    let result = match result {
                        Ok(result) => result,
                        Err(err) => {
                            tracing::error!(%err, "spin-down transport failure");
                            return CrankOutcome::Fail(DeathReason::EdgeGone);
                        }
                    };
                    match cx.classify(&result) {
                        DriveStatus::Ok => {
                            cx.core.edge.update_attrs(|a| a.with_power_save_on(true));
                            tracing::info!(object = cx.core.object_id, "drive spun down");
                            return CrankOutcome::Done;
                        }
                        DriveStatus::NeedRetry
                        | DriveStatus::NeedReschedule
                        | DriveStatus::BecomingReady => {
                            self.attempts += 1;
                            if self.attempts > cx.config().spin_down_retry_limit {
                                return CrankOutcome::Fail(DeathReason::SpinDownFailed);
                            }
                        }
                        DriveStatus::DeviceNotPresent => {
                            return CrankOutcome::Fail(DeathReason::EdgeGone)
                        }
                        status => {
                            tracing::error!(?status, "spin-down failed");
                            return CrankOutcome::Fail(DeathReason::SpinDownFailed);
                        }
                    }
                }
            }
        }
    }

    fn reset(&mut self) {
        self.attempts = 0;
    }
}
