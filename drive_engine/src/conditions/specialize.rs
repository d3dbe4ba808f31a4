// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Discovery: INQUIRY, VPD page capture, and drive classification.

use super::poll;
use super::Poll;
use crate::dispatch::Completion;
use crate::engine::Condition;
use crate::engine::ConditionId;
use crate::engine::Crank;
use crate::engine::CrankOutcome;
use drive_codec::build;
use drive_core::DeathReason;
use drive_core::DriveClassId;
use drive_core::DriveStatus;
use drive_defs as defs;
use drive_defs::InquiryData;
use zerocopy::FromBytes;

pub(crate) struct InquiryCond {
    retries: u32,
}

impl InquiryCond {
    pub(crate) fn new() -> Self {
        Self { retries: 0 }
    }
}

impl Condition for InquiryCond {
    fn step(&mut self, cx: &mut Crank<'_>) -> CrankOutcome {
        loop {
            match poll(cx, ConditionId::Inquiry) {
                Poll::Issue => {
                    cx.issue(ConditionId::Inquiry, build::inquiry());
                    return CrankOutcome::Pending;
                }
                Poll::Wait => return CrankOutcome::Pending,
                Poll::Complete(Completion::Control { .. }) => continue,
                Poll::Complete(Completion::Command { result, .. }) => {
                    let result = match result {
                        Ok(result) => result,
                        Err(err) => {
                            tracing::error!(%err, "inquiry transport failure");
                            return CrankOutcome::Fail(DeathReason::EdgeGone);
                        }
                    };
                    match cx.classify(&result) {
                        DriveStatus::Ok => {
                            let Ok((data, _)) = InquiryData::read_from_prefix(&result.data_in)
                            else {
                                tracing::error!(len = result.tx, "short inquiry data");
                                return CrankOutcome::Fail(DeathReason::HardError);
                            };
                            cx.shared().inquiry = Some(data);
                            return CrankOutcome::Done;
                        }
                        DriveStatus::NeedRetry
                        | DriveStatus::NeedReschedule
                        | DriveStatus::BecomingReady => {
                            self.retries += 1;
                            if self.retries > cx.config().specialize_retry_limit {
                                return CrankOutcome::Fail(DeathReason::HardError);
                            }
                        }
                        DriveStatus::DeviceNotPresent => {
                            return CrankOutcome::Fail(DeathReason::EdgeGone)
                        }
                        status => {
                            tracing::error!(?status, "inquiry failed");
                            return CrankOutcome::Fail(DeathReason::HardError);
                        }
                    }
                }
            }
        }
    }

    fn reset(&mut self) {
        self.retries = 0;
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum VpdPhase {
    Supported,
    Page(usize),
}

/// Pages captured after the supported-pages list, in issue order.
const CAPTURED_PAGES: [u8; 3] = [
    defs::VPD_SERIAL_NUMBER,
    defs::VPD_DEVICE_IDENTIFIERS,
    defs::VPD_BLOCK_DEVICE_CHARACTERISTICS,
];

pub(crate) struct VpdPagesCond {
    phase: VpdPhase,
    supported: Vec<u8>,
    retries: u32,
}

impl VpdPagesCond {
    pub(crate) fn new() -> Self {
        Self {
            phase: VpdPhase::Supported,
            supported: Vec::new(),
            retries: 0,
        }
    }

    /// Advances past pages the drive does not implement.
    fn next_page(&mut self, mut index: usize) -> Option<u8> {
        while let Some(&page) = CAPTURED_PAGES.get(index) {
            if self.supported.contains(&page) {
                self.phase = VpdPhase::Page(index);
                return Some(page);
            }
            index += 1;
        }
        None
    }

    fn record(&self, cx: &mut Crank<'_>, page: u8, data: &[u8]) {
        // Four-byte VPD header, then page_length bytes of payload.
        let payload = data
            .get(4..)
            .and_then(|rest| rest.get(..data.get(3).map_or(0, |&l| l as usize).min(rest.len())))
            .unwrap_or(&[]);
        let mut shared = cx.shared();
        match page {
            defs::VPD_SERIAL_NUMBER => shared.serial_number = Some(payload.to_vec()),
            defs::VPD_DEVICE_IDENTIFIERS => shared.device_identifiers = Some(payload.to_vec()),
            defs::VPD_BLOCK_DEVICE_CHARACTERISTICS => {
                if let (Some(&hi), Some(&lo)) = (data.get(4), data.get(5)) {
                    shared.rotation_rate = Some(u16::from_be_bytes([hi, lo]));
                }
            }
            _ => {}
        }
    }
}

impl Condition for VpdPagesCond {
    fn step(&mut self, cx: &mut Crank<'_>) -> CrankOutcome {
        loop {
            match poll(cx, ConditionId::VpdPages) {
                Poll::Issue => {
                    let page = match self.phase {
                        VpdPhase::Supported => defs::VPD_SUPPORTED_PAGES,
                        VpdPhase::Page(index) => match CAPTURED_PAGES.get(index) {
                            Some(&page) => page,
                            None => return CrankOutcome::Done,
                        },
                    };
                    cx.issue(ConditionId::VpdPages, build::vpd_inquiry(page, 0xFF));
                    return CrankOutcome::Pending;
                }
                Poll::Wait => return CrankOutcome::Pending,
                Poll::Complete(Completion::Control { .. }) => continue,
                Poll::Complete(Completion::Command { result, .. }) => {
                    let result = match result {
                        Ok(result) => result,
                        Err(err) => {
                            tracing::error!(%err, "vpd inquiry transport failure");
                            return CrankOutcome::Fail(DeathReason::EdgeGone);
                        }
                    };
                    match cx.classify(&result) {
                        DriveStatus::Ok => match self.phase {
                            VpdPhase::Supported => {
                                let count =
                                    result.data_in.get(3).map_or(0, |&l| l as usize);
                                self.supported = result
                                    .data_in
                                    .get(4..)
                                    .map_or(&[] as &[u8], |rest| {
                                        &rest[..count.min(rest.len())]
                                    })
                                    .to_vec();
                                if self.next_page(0).is_none() {
                                    return CrankOutcome::Done;
                                }
                            }
                            VpdPhase::Page(index) => {
                                if let Some(&page) = CAPTURED_PAGES.get(index) {
                                    self.record(cx, page, &result.data_in);
                                }
                                if self.next_page(index + 1).is_none() {
                                    return CrankOutcome::Done;
                                }
                            }
                        },
                        // An unimplemented page is not an error; move on.
                        DriveStatus::Invalid => match self.phase {
                            VpdPhase::Supported => return CrankOutcome::Done,
                            VpdPhase::Page(index) => {
                                if self.next_page(index + 1).is_none() {
                                    return CrankOutcome::Done;
                                }
                            }
                        },
                        DriveStatus::NeedRetry
                        | DriveStatus::NeedReschedule
                        | DriveStatus::BecomingReady => {
                            self.retries += 1;
                            if self.retries > cx.config().specialize_retry_limit {
                                return CrankOutcome::Fail(DeathReason::HardError);
                            }
                        }
                        DriveStatus::DeviceNotPresent => {
                            return CrankOutcome::Fail(DeathReason::EdgeGone)
                        }
                        status => {
                            tracing::error!(?status, "vpd capture failed");
                            return CrankOutcome::Fail(DeathReason::HardError);
                        }
                    }
                }
            }
        }
    }

    fn reset(&mut self) {
        self.phase = VpdPhase::Supported;
        self.supported.clear();
        self.retries = 0;
    }
}

/// Derives the drive class from the discovery snapshot. No hardware
/// traffic; a class change flags the run loop to rebuild the rotaries.
pub(crate) struct ClassifyCond;

impl Condition for ClassifyCond {
    fn step(&mut self, cx: &mut Crank<'_>) -> CrankOutcome {
        let mut shared = cx.shared();
        let class = if shared.rotation_rate == Some(defs::MEDIUM_NON_ROTATING) {
            DriveClassId::Flash
        } else if shared
            .inquiry
            .is_some_and(|inq| inq.vendor_id.starts_with(b"ATA"))
        {
            DriveClassId::SataPaddlecard
        } else {
            DriveClassId::Sas
        };
        if class != shared.class {
            shared.class = class;
            shared.class_changed = true;
        }
        CrankOutcome::Done
    }
}
