// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The condition implementations, grouped by the protocol they belong to.

mod activate;
mod collect;
mod download;
mod healthcheck;
mod hibernate;
mod ready;
mod sanitize;
mod specialize;

use crate::dispatch::Completion;
use crate::engine::Condition;
use crate::engine::ConditionId;
use crate::engine::Crank;
use drive_core::ComponentType;

/// EDAL attribute ids for the drive component.
pub(crate) const EDAL_ATTR_PROACTIVE_SPARE: u32 = 1;
pub(crate) const EDAL_ATTR_END_OF_LIFE: u32 = 2;

/// Where a condition stands with respect to its tagged dispatch.
pub(crate) enum Poll {
    /// Nothing in flight and nothing parked; issue now.
    Issue,
    /// A request is in flight; yield until the completion wakes us.
    Wait,
    Complete(Completion),
}

pub(crate) fn poll(cx: &Crank<'_>, tag: ConditionId) -> Poll {
    if let Some(completion) = cx.take_completion(tag) {
        Poll::Complete(completion)
    } else if cx.is_inflight(tag) {
        Poll::Wait
    } else {
        Poll::Issue
    }
}

/// Marks the drive as a proactive spare candidate: edge attribute plus the
/// enclosure attribute store, if one is wired up.
pub(crate) fn set_proactive_spare(cx: &Crank<'_>) {
    cx.core.edge.update_attrs(|a| a.with_proactive_spare(true));
    if let Some(store) = &cx.core.attributes {
        if let Err(err) = store.set(
            ComponentType::Drive,
            cx.core.object_id as u32,
            EDAL_ATTR_PROACTIVE_SPARE,
            &[1],
        ) {
            tracing::warn!(%err, "failed to record proactive spare attribute");
        }
    }
}

pub(crate) fn set_end_of_life(cx: &Crank<'_>) {
    cx.core.edge.update_attrs(|a| a.with_end_of_life(true));
    if let Some(store) = &cx.core.attributes {
        if let Err(err) = store.set(
            ComponentType::Drive,
            cx.core.object_id as u32,
            EDAL_ATTR_END_OF_LIFE,
            &[1],
        ) {
            tracing::warn!(%err, "failed to record end-of-life attribute");
        }
    }
}

/// Builds one instance of every condition, keyed for rotary lookup.
pub(crate) fn build_all() -> Vec<(ConditionId, Box<dyn Condition>)> {
    vec![
        (
            ConditionId::Inquiry,
            Box::new(specialize::InquiryCond::new()) as Box<dyn Condition>,
        ),
        (ConditionId::VpdPages, Box::new(specialize::VpdPagesCond::new())),
        (ConditionId::Classify, Box::new(specialize::ClassifyCond)),
        (ConditionId::SpinUp, Box::new(activate::SpinUpCond::new())),
        (ConditionId::CreditRelease, Box::new(activate::CreditReleaseCond)),
        (ConditionId::ModePages, Box::new(activate::ModePagesCond::new())),
        (ConditionId::Capacity, Box::new(activate::CapacityCond::new())),
        (ConditionId::PeerHold, Box::new(activate::PeerHoldCond)),
        (ConditionId::ServeRequests, Box::new(ready::ServeRequestsCond::new())),
        (ConditionId::HealthQuiesce, Box::new(healthcheck::QuiesceCond::new())),
        (ConditionId::HealthDiag, Box::new(healthcheck::DiagCond::new())),
        (ConditionId::HealthCleanup, Box::new(healthcheck::CleanupCond)),
        (ConditionId::DownloadWrite, Box::new(download::DownloadWriteCond::new())),
        (
            ConditionId::DownloadPowerCycle,
            Box::new(download::DownloadPowerCycleCond::new()),
        ),
        (ConditionId::SanitizeStart, Box::new(sanitize::SanitizeStartCond::new())),
        (ConditionId::SanitizePoll, Box::new(sanitize::SanitizePollCond)),
        (ConditionId::DiskCollect, Box::new(collect::DiskCollectCond::new())),
        (ConditionId::SpinDown, Box::new(hibernate::SpinDownCond::new())),
    ]
}
