// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Classification of raw command completions into [`DriveStatus`].

use drive_core::CommandResult;
use drive_core::DriveStatus;
use drive_core::PortStatus;
use drive_defs as defs;
use drive_defs::AdditionalSenseCode;
use drive_defs::ScsiStatus;
use drive_defs::SenseData;
use drive_defs::SenseKey;

/// Class-specific mapping of port-level completion status. The standard
/// table suits SAS rotational drives; flash and SATA-paddlecard variants
/// override the timing-sensitive entries.
pub trait PortErrorTable: Send + Sync {
    fn classify_port(&self, status: PortStatus) -> DriveStatus;
}

/// Default port-error mapping for SAS drives.
pub struct StandardPortErrors;

impl PortErrorTable for StandardPortErrors {
    fn classify_port(&self, status: PortStatus) -> DriveStatus {
        match status {
            PortStatus::Success => DriveStatus::Ok,
            PortStatus::Timeout => DriveStatus::NeedRetry,
            PortStatus::Busy => DriveStatus::NeedRetry,
            PortStatus::Canceled => DriveStatus::Invalid,
            PortStatus::NoDevice => DriveStatus::DeviceNotPresent,
            PortStatus::IoError => DriveStatus::HardError,
        }
    }
}

/// Flash drives have no spin-up latency, so a port timeout is a real
/// fault, not a transient.
pub struct FlashPortErrors;

impl PortErrorTable for FlashPortErrors {
    fn classify_port(&self, status: PortStatus) -> DriveStatus {
        match status {
            PortStatus::Timeout => DriveStatus::HardError,
            other => StandardPortErrors.classify_port(other),
        }
    }
}

/// SATA drives behind a paddlecard report busy during internal background
/// activity; re-crank rather than burning a retry.
pub struct SataPaddlecardPortErrors;

impl PortErrorTable for SataPaddlecardPortErrors {
    fn classify_port(&self, status: PortStatus) -> DriveStatus {
        match status {
            PortStatus::Busy => DriveStatus::NeedReschedule,
            other => StandardPortErrors.classify_port(other),
        }
    }
}

/// Classifies a completed command.
///
/// An under-run (fewer bytes transferred than requested, with an otherwise
/// clean completion) is not an error: allocation lengths are upper bounds.
pub fn classify(table: &dyn PortErrorTable, result: &CommandResult) -> DriveStatus {
    if result.port_status != PortStatus::Success {
        return table.classify_port(result.port_status);
    }

    match result.scsi_status {
        ScsiStatus::GOOD | ScsiStatus::CONDITION_MET => DriveStatus::Ok,
        ScsiStatus::BUSY | ScsiStatus::TASK_ABORTED => DriveStatus::NeedRetry,
        ScsiStatus::QUEUE_FULL | ScsiStatus::RESERVATION_CONFLICT => DriveStatus::NeedReschedule,
        ScsiStatus::CHECK_CONDITION => match &result.sense {
            Some(sense) => classify_sense(sense),
            None => {
                tracing::warn!("check condition with no sense data");
                DriveStatus::Invalid
            }
        },
        status => {
            tracing::warn!(status = status.0, "unexpected scsi status");
            DriveStatus::Invalid
        }
    }
}

fn classify_sense(sense: &SenseData) -> DriveStatus {
    let key = sense.header.sense_key;
    let asc = sense.additional_sense_code;
    let ascq = sense.additional_sense_code_qualifier;

    match key {
        SenseKey::NO_SENSE => DriveStatus::Ok,
        SenseKey::RECOVERED_ERROR => {
            if asc == AdditionalSenseCode::FAILURE_PREDICTION_THRESHOLD_EXCEEDED {
                DriveStatus::SetProactiveSpare
            } else {
                DriveStatus::Ok
            }
        }
        SenseKey::NOT_READY => classify_not_ready(asc, ascq),
        SenseKey::MEDIUM_ERROR => {
            if asc == AdditionalSenseCode::MEDIUM_FORMAT_CORRUPTED
                && ascq == defs::SCSI_SENSEQ_SANITIZE_COMMAND_FAILED
            {
                DriveStatus::SanitizeNeedsRestart
            } else {
                DriveStatus::NeedRemap
            }
        }
        SenseKey::HARDWARE_ERROR => {
            if asc == AdditionalSenseCode::FAILURE_PREDICTION_THRESHOLD_EXCEEDED {
                DriveStatus::SetProactiveSpare
            } else {
                DriveStatus::HardError
            }
        }
        SenseKey::UNIT_ATTENTION => {
            // Reset notifications and parameter changes are transient; the
            // command that observed them is simply reissued.
            DriveStatus::NeedRetry
        }
        SenseKey::ABORTED_COMMAND => DriveStatus::NeedRetry,
        SenseKey::ILLEGAL_REQUEST => DriveStatus::Invalid,
        SenseKey::DATA_PROTECT => DriveStatus::HardError,
        key => {
            tracing::warn!(
                sense_key = key.0,
                asc = asc.0,
                ascq,
                "unexpected sense key"
            );
            DriveStatus::Invalid
        }
    }
}

fn classify_not_ready(asc: AdditionalSenseCode, ascq: u8) -> DriveStatus {
    match asc {
        AdditionalSenseCode::LUN_NOT_READY => match ascq {
            defs::SCSI_SENSEQ_INIT_COMMAND_REQUIRED => DriveStatus::NotSpinning,
            defs::SCSI_SENSEQ_BECOMING_READY | defs::SCSI_SENSEQ_CAUSE_NOT_REPORTABLE => {
                DriveStatus::BecomingReady
            }
            defs::SCSI_SENSEQ_FORMAT_IN_PROGRESS | defs::SCSI_SENSEQ_SANITIZE_IN_PROGRESS => {
                DriveStatus::SanitizeInProgress
            }
            defs::SCSI_SENSEQ_SELF_TEST_IN_PROGRESS => DriveStatus::NeedReschedule,
            defs::SCSI_SENSEQ_MANUAL_INTERVENTION_REQUIRED => DriveStatus::HardError,
            _ => DriveStatus::NeedRetry,
        },
        AdditionalSenseCode::NO_MEDIA_IN_DEVICE => DriveStatus::DeviceNotPresent,
        _ => DriveStatus::NeedRetry,
    }
}

/// Extracts the percent-complete value from a sanitize/format progress
/// sense indication. The drive reports progress as a numerator of 65536 in
/// the sense-key-specific bytes.
pub fn sanitize_progress(sense: &SenseData) -> Option<u8> {
    if sense.header.sense_key != SenseKey::NOT_READY
        || sense.additional_sense_code != AdditionalSenseCode::LUN_NOT_READY
    {
        return None;
    }
    match sense.additional_sense_code_qualifier {
        defs::SCSI_SENSEQ_FORMAT_IN_PROGRESS | defs::SCSI_SENSEQ_SANITIZE_IN_PROGRESS => {}
        _ => return None,
    }
    let sks = sense.sense_key_specific;
    if sks[0] & defs::SENSE_KEY_SPECIFIC_VALID == 0 {
        return None;
    }
    let numerator = u16::from_be_bytes([sks[1], sks[2]]) as u32;
    Some((numerator * 100 / 65536) as u8)
}
