// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Drive-class specialization: port-error tables and rotary composition.
//!
//! All classes share the discovery and hibernate rotaries. SAS rotational
//! drives additionally run the periodic log-collection protocol; flash and
//! SATA-paddlecard drives differ only in how port-level errors classify.

use crate::engine::ConditionId;
use crate::engine::Rotaries;
use crate::engine::RotaryEntry;
use drive_codec::FlashPortErrors;
use drive_codec::PortErrorTable;
use drive_codec::SataPaddlecardPortErrors;
use drive_codec::StandardPortErrors;
use drive_core::DriveClassId;

pub fn port_errors(class: DriveClassId) -> &'static dyn PortErrorTable {
    match class {
        DriveClassId::Sas => &StandardPortErrors,
        DriveClassId::Flash => &FlashPortErrors,
        DriveClassId::SataPaddlecard => &SataPaddlecardPortErrors,
    }
}

/// Whether this class runs the periodic disk-collect protocol.
pub fn collects_logs(class: DriveClassId) -> bool {
    matches!(class, DriveClassId::Sas)
}

/// Builds the per-state rotaries for `class`.
pub fn rotaries(class: DriveClassId) -> Rotaries {
    let specialize = vec![
        RotaryEntry::preset(ConditionId::Inquiry),
        RotaryEntry::preset(ConditionId::VpdPages),
        RotaryEntry::preset(ConditionId::Classify),
    ];

    let activate = vec![
        RotaryEntry::preset(ConditionId::SpinUp),
        RotaryEntry::preset(ConditionId::ModePages),
        RotaryEntry::preset(ConditionId::Capacity),
        RotaryEntry::armed_on_demand(ConditionId::CreditRelease),
        RotaryEntry::armed_on_demand(ConditionId::PeerHold),
    ];

    let mut ready = vec![
        RotaryEntry::preset(ConditionId::ServeRequests),
        RotaryEntry::armed_on_demand(ConditionId::CreditRelease),
        RotaryEntry::armed_on_demand(ConditionId::HealthQuiesce),
        RotaryEntry::armed_on_demand(ConditionId::HealthDiag),
        RotaryEntry::armed_on_demand(ConditionId::HealthCleanup),
        RotaryEntry::armed_on_demand(ConditionId::DownloadWrite),
        RotaryEntry::armed_on_demand(ConditionId::DownloadPowerCycle),
        RotaryEntry::armed_on_demand(ConditionId::SanitizeStart),
        RotaryEntry::armed_on_demand(ConditionId::SanitizePoll),
    ];
    if collects_logs(class) {
        ready.push(RotaryEntry::armed_on_demand(ConditionId::DiskCollect));
    }

    let hibernate = vec![RotaryEntry::preset(ConditionId::SpinDown)];

    Rotaries {
        specialize,
        activate,
        ready,
        hibernate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_sas_collects_logs() {
        assert!(rotaries(DriveClassId::Sas)
            .ready
            .iter()
            .any(|e| e.id == ConditionId::DiskCollect));
        for class in [DriveClassId::Flash, DriveClassId::SataPaddlecard] {
            assert!(!rotaries(class)
                .ready
                .iter()
                .any(|e| e.id == ConditionId::DiskCollect));
        }
    }

    #[test]
    fn discovery_rotary_is_fully_preset() {
        assert!(rotaries(DriveClassId::Sas).specialize.iter().all(|e| e.preset));
    }
}
