// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Activation: spin-up with credit arbitration, mode page programming,
//! and capacity discovery.

use super::poll;
use super::set_proactive_spare;
use super::Poll;
use crate::dispatch::Completion;
use crate::engine::Condition;
use crate::engine::ConditionId;
use crate::engine::Crank;
use crate::engine::CrankOutcome;
use drive_codec::build;
use drive_codec::sanitize_progress;
use drive_core::DeathReason;
use drive_core::DriveStatus;
use drive_core::SanitizeState;
use drive_core::SpinupGrant;
use drive_defs as defs;
use drive_defs::ModeCachingPage;
use drive_defs::ModeParameterHeader10;
use drive_defs::ReadCapacity16Data;
use drive_defs::ReadCapacityData;
use zerocopy::FromBytes;
use zerocopy::IntoBytes;

#[derive(Copy, Clone, PartialEq, Eq)]
enum SpinUpPhase {
    /// Probe readiness with TEST UNIT READY.
    Probe,
    /// Waiting for a spin-up credit from the arbiter.
    AwaitCredit,
    /// START UNIT issued; confirming with another probe afterwards.
    Starting,
}

pub(crate) struct SpinUpCond {
    phase: SpinUpPhase,
    attempts: u32,
}

impl SpinUpCond {
    pub(crate) fn new() -> Self {
        Self {
            phase: SpinUpPhase::Probe,
            attempts: 0,
        }
    }

    /// The drive is spinning; clear the handshake attributes and schedule
    /// the credit return after the grace window.
    fn finish(&mut self, cx: &mut Crank<'_>) -> CrankOutcome {
        cx.core
            .edge
            .update_attrs(|a| a.with_spinup_pending(false).with_spinup_permitted(false));
        let credit_held = cx.shared().credit_held;
        if credit_held {
            let grace = cx.config().credit_release_grace;
            cx.arm_timer(ConditionId::CreditRelease, grace);
        }
        self.phase = SpinUpPhase::Probe;
        CrankOutcome::Done
    }

    fn bump_attempts(&mut self, cx: &Crank<'_>) -> Option<CrankOutcome> {
        self.attempts += 1;
        if self.attempts > cx.config().tur_retry_limit {
            tracing::error!(attempts = self.attempts, "drive never became ready");
            Some(CrankOutcome::Fail(DeathReason::DriveNotSpinning))
        } else {
            None
        }
    }
}

impl Condition for SpinUpCond {
    fn step(&mut self, cx: &mut Crank<'_>) -> CrankOutcome {
        loop {
            match self.phase {
                SpinUpPhase::Probe | SpinUpPhase::Starting => {
                    match poll(cx, ConditionId::SpinUp) {
                        Poll::Issue => {
                            let request = match self.phase {
                                SpinUpPhase::Starting => build::start_unit(),
                                _ => build::test_unit_ready(),
                            };
                            cx.issue(ConditionId::SpinUp, request);
                            return CrankOutcome::Pending;
                        }
                        Poll::Wait => return CrankOutcome::Pending,
                        Poll::Complete(Completion::Control { .. }) => continue,
                        Poll::Complete(Completion::Command { result, .. }) => {
                            let result = match result {
                                Ok(result) => result,
                                Err(err) => {
                                    tracing::error!(%err, "spin-up transport failure");
                                    return CrankOutcome::Fail(DeathReason::EdgeGone);
                                }
                            };
                            let starting = self.phase == SpinUpPhase::Starting;
                            match cx.classify(&result) {
                                DriveStatus::Ok => {
                                    if starting {
                                        // Confirm readiness after START UNIT.
                                        self.phase = SpinUpPhase::Probe;
                                        continue;
                                    }
                                    return self.finish(cx);
                                }
                                DriveStatus::SetProactiveSpare => {
                                    set_proactive_spare(cx);
                                    if starting {
                                        self.phase = SpinUpPhase::Probe;
                                        continue;
                                    }
                                    return self.finish(cx);
                                }
                                DriveStatus::NotSpinning => {
                                    // Every not-ready probe outcome counts
                                    // against the same limit, including the
                                    // ones that lead to another START UNIT.
                                    if let Some(outcome) = self.bump_attempts(cx) {
                                        return outcome;
                                    }
                                    self.phase = SpinUpPhase::AwaitCredit;
                                    continue;
                                }
                                DriveStatus::BecomingReady | DriveStatus::NeedReschedule => {
                                    if let Some(outcome) = self.bump_attempts(cx) {
                                        return outcome;
                                    }
                                    self.phase = SpinUpPhase::Probe;
                                    let interval = cx.config().tur_poll_interval;
                                    cx.arm_timer(ConditionId::SpinUp, interval);
                                    // Activation stays held on this rotary
                                    // entry until the drive is spinning.
                                    return CrankOutcome::Pending;
                                }
                                DriveStatus::NeedRetry => {
                                    if let Some(outcome) = self.bump_attempts(cx) {
                                        return outcome;
                                    }
                                    // Re-issue immediately.
                                }
                                DriveStatus::SanitizeInProgress => {
                                    let mut shared = cx.shared();
                                    shared.sanitize = SanitizeState::InProgress;
                                    if let Some(percent) =
                                        result.sense.as_ref().and_then(sanitize_progress)
                                    {
                                        shared.sanitize_percent =
                                            shared.sanitize_percent.max(percent);
                                    }
                                    drop(shared);
                                    let interval = cx.config().sanitize_poll_interval;
                                    cx.arm_timer(ConditionId::SanitizePoll, interval);
                                    return self.finish(cx);
                                }
                                DriveStatus::SanitizeNeedsRestart => {
                                    cx.shared().sanitize = SanitizeState::NeedsRestart;
                                    return self.finish(cx);
                                }
                                DriveStatus::DeviceNotPresent => {
                                    return CrankOutcome::Fail(DeathReason::EdgeGone)
                                }
                                status => {
                                    tracing::error!(?status, "spin-up failed");
                                    return CrankOutcome::Fail(DeathReason::DriveNotSpinning);
                                }
                            }
                        }
                    }
                }
                SpinUpPhase::AwaitCredit => {
                    match cx.core.arbiter.request_credit(cx.core.object_id) {
                        SpinupGrant::Enabled => {
                            cx.core.shared.lock().credit_held = true;
                            cx.core.edge.update_attrs(|a| {
                                a.with_spinup_permitted(true).with_spinup_pending(false)
                            });
                            self.phase = SpinUpPhase::Starting;
                            continue;
                        }
                        SpinupGrant::Pending => {
                            // The arbiter wakes us via spinup_granted().
                            cx.core.edge.update_attrs(|a| a.with_spinup_pending(true));
                            return CrankOutcome::Pending;
                        }
                        SpinupGrant::Denied => {
                            cx.core.edge.update_attrs(|a| a.with_spinup_pending(true));
                            let delay = cx.config().credit_retry_delay;
                            cx.arm_timer(ConditionId::SpinUp, delay);
                            return CrankOutcome::Pending;
                        }
                    }
                }
            }
        }
    }

    fn reset(&mut self) {
        self.phase = SpinUpPhase::Probe;
        self.attempts = 0;
    }
}

/// Returns the spin-up credit once the post-spin-up grace window expires.
pub(crate) struct CreditReleaseCond;

impl Condition for CreditReleaseCond {
    fn step(&mut self, cx: &mut Crank<'_>) -> CrankOutcome {
        cx.core.release_credit();
        cx.core.edge.update_attrs(|a| a.with_spinup_permitted(false));
        CrankOutcome::Done
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum ModePhase {
    Read,
    Write,
    Verify,
}

/// Programs the caching mode page: the write cache is disabled so that
/// acknowledged writes survive power loss.
pub(crate) struct ModePagesCond {
    phase: ModePhase,
    retries: u32,
}

impl ModePagesCond {
    pub(crate) fn new() -> Self {
        Self {
            phase: ModePhase::Read,
            retries: 0,
        }
    }

    fn bump_retries(&mut self, cx: &Crank<'_>) -> Option<CrankOutcome> {
        self.retries += 1;
        if self.retries > cx.config().mode_select_retry_limit {
            Some(CrankOutcome::Fail(DeathReason::ModeSelectFailed))
        } else {
            None
        }
    }
}

/// Extracts the caching page from MODE SENSE (10) data, skipping the
/// header and any block descriptors.
fn caching_page(data: &[u8]) -> Option<ModeCachingPage> {
    let (header, _) = ModeParameterHeader10::read_from_prefix(data).ok()?;
    let offset =
        size_of::<ModeParameterHeader10>() + header.block_descriptor_length.get() as usize;
    let (page, _) = ModeCachingPage::read_from_prefix(data.get(offset..)?).ok()?;
    if page.page_code & 0x3F != defs::MODE_PAGE_CACHING {
        return None;
    }
    Some(page)
}

fn caching_select_list(mut page: ModeCachingPage) -> Vec<u8> {
    page.flags &= !defs::MODE_CACHING_WRITE_CACHE_ENABLE;
    // The savable bit is reserved in MODE SELECT data.
    page.page_code &= 0x3F;
    let header = ModeParameterHeader10 {
        mode_data_length: 0.into(),
        medium_type: 0,
        device_specific_parameter: 0,
        reserved: [0; 2],
        block_descriptor_length: 0.into(),
    };
    let mut list = header.as_bytes().to_vec();
    list.extend_from_slice(page.as_bytes());
    list
}

impl Condition for ModePagesCond {
    fn step(&mut self, cx: &mut Crank<'_>) -> CrankOutcome {
        // Mode pages are reprogrammed after sanitize completes; until then
        // the drive rejects them.
        if cx.shared().sanitize == SanitizeState::InProgress {
            return CrankOutcome::Done;
        }
        loop {
            match poll(cx, ConditionId::ModePages) {
                Poll::Issue => {
                    // A lost write completion re-reads rather than stalls.
                    if self.phase == ModePhase::Write {
                        self.phase = ModePhase::Read;
                    }
                    cx.issue(
                        ConditionId::ModePages,
                        build::mode_sense10(defs::MODE_PAGE_CACHING, 512),
                    );
                    return CrankOutcome::Pending;
                }
                Poll::Wait => return CrankOutcome::Pending,
                Poll::Complete(Completion::Control { .. }) => continue,
                Poll::Complete(Completion::Command { result, .. }) => {
                    let result = match result {
                        Ok(result) => result,
                        Err(err) => {
                            tracing::error!(%err, "mode page transport failure");
                            return CrankOutcome::Fail(DeathReason::EdgeGone);
                        }
                    };
                    match cx.classify(&result) {
                        DriveStatus::Ok => match self.phase {
                            ModePhase::Read => {
                                let Some(page) = caching_page(&result.data_in) else {
                                    tracing::warn!("caching page missing from mode data");
                                    return CrankOutcome::Done;
                                };
                                if page.flags & defs::MODE_CACHING_WRITE_CACHE_ENABLE == 0 {
                                    return CrankOutcome::Done;
                                }
                                self.phase = ModePhase::Write;
                                cx.issue(
                                    ConditionId::ModePages,
                                    build::mode_select10(caching_select_list(page)),
                                );
                                return CrankOutcome::Pending;
                            }
                            ModePhase::Write => {
                                self.phase = ModePhase::Verify;
                            }
                            ModePhase::Verify => {
                                match caching_page(&result.data_in) {
                                    Some(page)
                                        if page.flags
                                            & defs::MODE_CACHING_WRITE_CACHE_ENABLE
                                            != 0 =>
                                    {
                                        // Drive reverted the change; try again.
                                        if let Some(outcome) = self.bump_retries(cx) {
                                            return outcome;
                                        }
                                        self.phase = ModePhase::Write;
                                        cx.issue(
                                            ConditionId::ModePages,
                                            build::mode_select10(caching_select_list(page)),
                                        );
                                        return CrankOutcome::Pending;
                                    }
                                    _ => return CrankOutcome::Done,
                                }
                            }
                        },
                        DriveStatus::NeedReschedule => {
                            // Rescheduling does not consume a retry; the
                            // drive is busy, not failing.
                            if self.phase == ModePhase::Write {
                                self.phase = ModePhase::Read;
                            }
                            let delay = cx.config().reschedule_delay;
                            cx.arm_timer(ConditionId::ModePages, delay);
                            return CrankOutcome::Pending;
                        }
                        DriveStatus::NeedRetry | DriveStatus::BecomingReady => {
                            if let Some(outcome) = self.bump_retries(cx) {
                                return outcome;
                            }
                            if self.phase == ModePhase::Write {
                                self.phase = ModePhase::Read;
                            }
                        }
                        DriveStatus::DeviceNotPresent => {
                            return CrankOutcome::Fail(DeathReason::EdgeGone)
                        }
                        status => {
                            tracing::error!(?status, "mode select failed");
                            return CrankOutcome::Fail(DeathReason::ModeSelectFailed);
                        }
                    }
                }
            }
        }
    }

    fn reset(&mut self) {
        self.phase = ModePhase::Read;
        self.retries = 0;
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum CapacityPhase {
    Capacity10,
    Capacity16,
}

pub(crate) struct CapacityCond {
    phase: CapacityPhase,
    retries: u32,
}

impl CapacityCond {
    pub(crate) fn new() -> Self {
        Self {
            phase: CapacityPhase::Capacity10,
            retries: 0,
        }
    }
}

impl Condition for CapacityCond {
    fn step(&mut self, cx: &mut Crank<'_>) -> CrankOutcome {
        if cx.shared().sanitize == SanitizeState::InProgress {
            return CrankOutcome::Done;
        }
        loop {
            match poll(cx, ConditionId::Capacity) {
                Poll::Issue => {
                    let request = match self.phase {
                        CapacityPhase::Capacity10 => build::read_capacity10(),
                        CapacityPhase::Capacity16 => build::read_capacity16(),
                    };
                    cx.issue(ConditionId::Capacity, request);
                    return CrankOutcome::Pending;
                }
                Poll::Wait => return CrankOutcome::Pending,
                Poll::Complete(Completion::Control { .. }) => continue,
                Poll::Complete(Completion::Command { result, .. }) => {
                    let result = match result {
                        Ok(result) => result,
                        Err(err) => {
                            tracing::error!(%err, "read capacity transport failure");
                            return CrankOutcome::Fail(DeathReason::EdgeGone);
                        }
                    };
                    match cx.classify(&result) {
                        DriveStatus::Ok => match self.phase {
                            CapacityPhase::Capacity10 => {
                                let Ok((data, _)) =
                                    ReadCapacityData::read_from_prefix(&result.data_in)
                                else {
                                    return CrankOutcome::Fail(DeathReason::CapacityFailed);
                                };
                                if data.logical_block_address.get() == u32::MAX {
                                    // Past the 32-bit LBA boundary.
                                    self.phase = CapacityPhase::Capacity16;
                                    continue;
                                }
                                let mut shared = cx.shared();
                                shared.capacity_blocks =
                                    data.logical_block_address.get() as u64 + 1;
                                shared.block_size = data.bytes_per_block.get();
                                return CrankOutcome::Done;
                            }
                            CapacityPhase::Capacity16 => {
                                let Ok((data, _)) =
                                    ReadCapacity16Data::read_from_prefix(&result.data_in)
                                else {
                                    return CrankOutcome::Fail(DeathReason::CapacityFailed);
                                };
                                let mut shared = cx.shared();
                                shared.capacity_blocks =
                                    data.ex.logical_block_address.get() + 1;
                                shared.block_size = data.ex.bytes_per_block.get();
                                return CrankOutcome::Done;
                            }
                        },
                        DriveStatus::NeedReschedule => {
                            let delay = cx.config().reschedule_delay;
                            cx.arm_timer(ConditionId::Capacity, delay);
                            return CrankOutcome::Pending;
                        }
                        DriveStatus::NeedRetry | DriveStatus::BecomingReady => {
                            self.retries += 1;
                            if self.retries > cx.config().capacity_retry_limit {
                                return CrankOutcome::Fail(DeathReason::CapacityFailed);
                            }
                        }
                        DriveStatus::DeviceNotPresent => {
                            return CrankOutcome::Fail(DeathReason::EdgeGone)
                        }
                        status => {
                            tracing::error!(?status, "read capacity failed");
                            return CrankOutcome::Fail(DeathReason::CapacityFailed);
                        }
                    }
                }
            }
        }
    }

    fn reset(&mut self) {
        self.phase = CapacityPhase::Capacity10;
        self.retries = 0;
    }
}

/// Holds the object in activation while a peer drive on the shared bus is
/// downloading firmware. Armed by the peer-hold event; releases when the
/// flag clears.
pub(crate) struct PeerHoldCond;

impl Condition for PeerHoldCond {
    fn step(&mut self, cx: &mut Crank<'_>) -> CrankOutcome {
        if cx.shared().peer_hold {
            CrankOutcome::Pending
        } else {
            CrankOutcome::Done
        }
    }
}
