// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Periodic disk collect: captures the drive's internal exception log and
//! persists it to a reserved on-drive LBA, remapping that LBA if it has
//! gone bad. Runs on rotational drives only.

use super::poll;
use super::set_proactive_spare;
use super::Poll;
use crate::dispatch::Completion;
use crate::engine::Condition;
use crate::engine::ConditionId;
use crate::engine::Crank;
use crate::engine::CrankOutcome;
use drive_codec::build;
use drive_core::DeathReason;
use drive_core::DriveStatus;
use drive_core::SanitizeState;

#[derive(Copy, Clone, PartialEq, Eq)]
enum CollectPhase {
    Read,
    Write,
    Remap,
}

pub(crate) struct DiskCollectCond {
    phase: CollectPhase,
    data: Vec<u8>,
    write_retries: u32,
    remap_count: u32,
}

impl DiskCollectCond {
    pub(crate) fn new() -> Self {
        Self {
            phase: CollectPhase::Read,
            data: Vec::new(),
            write_retries: 0,
            remap_count: 0,
        }
    }

    /// Ends this cycle and schedules the next one.
    fn finish_cycle(&mut self, cx: &mut Crank<'_>) -> CrankOutcome {
        cx.shared().collect_in_progress = false;
        self.phase = CollectPhase::Read;
        self.data = Vec::new();
        self.write_retries = 0;
        self.remap_count = 0;
        let interval = cx.config().collect_interval;
        cx.arm_timer(ConditionId::DiskCollect, interval);
        CrankOutcome::Done
    }
}

impl Condition for DiskCollectCond {
    fn step(&mut self, cx: &mut Crank<'_>) -> CrankOutcome {
        loop {
            match self.phase {
                CollectPhase::Read => match poll(cx, ConditionId::DiskCollect) {
                    Poll::Issue => {
                        let busy = {
                            let shared = cx.shared();
                            shared.sanitize == SanitizeState::InProgress
                                || shared.collect_in_progress
                        };
                        if busy {
                            return self.finish_cycle(cx);
                        }
                        cx.shared().collect_in_progress = true;
                        cx.issue(
                            ConditionId::DiskCollect,
                            build::log_sense(drive_defs::LOG_PAGE_INFORMATIONAL_EXCEPTIONS, 512),
                        );
                        return CrankOutcome::Pending;
                    }
                    Poll::Wait => return CrankOutcome::Pending,
                    Poll::Complete(Completion::Control { .. }) => continue,
                    Poll::Complete(Completion::Command { result, .. }) => {
                        let result = match result {
                            Ok(result) => result,
                            Err(err) => {
                                tracing::warn!(%err, "disk collect transport failure");
                                cx.shared().collect_in_progress = false;
                                return CrankOutcome::Fail(DeathReason::EdgeGone);
                            }
                        };
                        match cx.classify(&result) {
                            DriveStatus::Ok => {
                                let block_size = cx.shared().block_size as usize;
                                if block_size == 0 {
                                    return self.finish_cycle(cx);
                                }
                                // WRITE LONG transfers exactly one block.
                                let mut data = result.data_in;
                                data.resize(block_size, 0);
                                self.data = data;
                                self.phase = CollectPhase::Write;
                            }
                            DriveStatus::DeviceNotPresent => {
                                cx.shared().collect_in_progress = false;
                                return CrankOutcome::Fail(DeathReason::EdgeGone);
                            }
                            status => {
                                tracing::debug!(?status, "log capture skipped");
                                return self.finish_cycle(cx);
                            }
                        }
                    }
                },
                CollectPhase::Write => match poll(cx, ConditionId::DiskCollect) {
                    Poll::Issue => {
                        let lba = cx.config().collect_reserved_lba;
                        cx.issue(
                            ConditionId::DiskCollect,
                            build::write_long(lba, self.data.clone()),
                        );
                        return CrankOutcome::Pending;
                    }
                    Poll::Wait => return CrankOutcome::Pending,
                    Poll::Complete(Completion::Control { .. }) => continue,
                    Poll::Complete(Completion::Command { result, .. }) => {
                        let result = match result {
                            Ok(result) => result,
                            Err(err) => {
                                tracing::warn!(%err, "disk collect transport failure");
                                cx.shared().collect_in_progress = false;
                                return CrankOutcome::Fail(DeathReason::EdgeGone);
                            }
                        };
                        match cx.classify(&result) {
                            DriveStatus::Ok => return self.finish_cycle(cx),
                            DriveStatus::NeedRemap => {
                                self.phase = CollectPhase::Remap;
                            }
                            DriveStatus::NeedRetry | DriveStatus::NeedReschedule => {
                                self.write_retries += 1;
                                if self.write_retries > cx.config().collect_write_retry_limit {
                                    return self.finish_cycle(cx);
                                }
                            }
                            DriveStatus::DeviceNotPresent => {
                                cx.shared().collect_in_progress = false;
                                return CrankOutcome::Fail(DeathReason::EdgeGone);
                            }
                            status => {
                                tracing::debug!(?status, "log persist skipped");
                                return self.finish_cycle(cx);
                            }
                        }
                    }
                },
                CollectPhase::Remap => match poll(cx, ConditionId::DiskCollect) {
                    Poll::Issue => {
                        self.remap_count += 1;
                        if self.remap_count > cx.config().collect_remap_limit {
                            // The reserved area keeps going bad; flag the
                            // drive for replacement rather than failing it.
                            tracing::warn!(
                                object = cx.core.object_id,
                                remaps = self.remap_count - 1,
                                "remap limit exhausted"
                            );
                            set_proactive_spare(cx);
                            return self.finish_cycle(cx);
                        }
                        let lba = cx.config().collect_reserved_lba;
                        cx.issue(ConditionId::DiskCollect, build::reassign_blocks(lba));
                        return CrankOutcome::Pending;
                    }
                    Poll::Wait => return CrankOutcome::Pending,
                    Poll::Complete(Completion::Control { .. }) => continue,
                    Poll::Complete(Completion::Command { result, .. }) => {
                        let result = match result {
                            Ok(result) => result,
                            Err(err) => {
                                tracing::warn!(%err, "disk collect transport failure");
                                cx.shared().collect_in_progress = false;
                                return CrankOutcome::Fail(DeathReason::EdgeGone);
                            }
                        };
                        match cx.classify(&result) {
                            // Retry the write against the remapped block.
                            DriveStatus::Ok => self.phase = CollectPhase::Write,
                            DriveStatus::DeviceNotPresent => {
                                cx.shared().collect_in_progress = false;
                                return CrankOutcome::Fail(DeathReason::EdgeGone);
                            }
                            status => {
                                tracing::warn!(?status, "reassign blocks failed");
                                set_proactive_spare(cx);
                                return self.finish_cycle(cx);
                            }
                        }
                    }
                },
            }
        }
    }

    fn reset(&mut self) {
        self.phase = CollectPhase::Read;
        self.data = Vec::new();
        self.write_retries = 0;
        self.remap_count = 0;
    }
}
