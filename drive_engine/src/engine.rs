// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The cooperative state machine driving one drive object.
//!
//! Each engine state has a rotary: an ordered list of conditions. A crank
//! walks the current rotary in order, stepping every armed condition. A
//! step returning `Done` disarms the condition; `Pending` ends the crank
//! until the next wake; `Goto`/`Fail` switch state and restart the walk.
//! The armed set is global, so a condition may be armed while another
//! state is current and will run once its rotary becomes active.
//!
//! Conditions never block and never await. All hardware traffic goes
//! through the dispatcher, and a condition observing an in-flight request
//! simply returns `Pending`; the completion wakes the object and the crank
//! re-steps it.

use crate::config::EngineConfig;
use crate::dispatch::Completion;
use crate::dispatch::Dispatcher;
use crate::object::Core;
use crate::object::Shared;
use crate::queue::PendingRequests;
use crate::request::RequestError;
use drive_core::DeathReason;
use drive_core::DriveStatus;
use parking_lot::MutexGuard;
use std::time::Duration;
use tokio::time::Instant;

/// Engine states, in activation-ladder order.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EngineState {
    /// Discovering identity: INQUIRY, VPD pages, classification.
    Specialize,
    /// Bringing the drive to operational: spin-up, mode pages, capacity.
    Activate,
    /// Serving requests and running maintenance protocols.
    Ready,
    /// Spun down for power save.
    Hibernate,
    /// Terminal failure; the death reason is recorded in shared state.
    Fail,
    /// Tearing down: draining in-flight work, then detaching the edge.
    Destroy,
}

/// Identifies one condition across the engine: the dispatcher tags
/// in-flight requests with it, timers fire into it, and rotaries order
/// execution by it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ConditionId {
    Inquiry,
    VpdPages,
    Classify,
    SpinUp,
    CreditRelease,
    ModePages,
    Capacity,
    PeerHold,
    ServeRequests,
    HealthQuiesce,
    HealthDiag,
    HealthCleanup,
    DownloadWrite,
    DownloadPowerCycle,
    SanitizeStart,
    SanitizePoll,
    DiskCollect,
    SpinDown,
}

/// Result of stepping a condition.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CrankOutcome {
    /// Work complete; disarm.
    Done,
    /// Waiting on an external wake (completion, timer, attribute change).
    /// Ends the crank; the condition stays armed.
    Pending,
    /// Switch engine state and restart the crank.
    Goto(EngineState),
    /// Terminal failure.
    Fail(DeathReason),
}

/// One entry in a rotary. Preset entries are armed automatically when
/// their state is entered.
#[derive(Debug, Copy, Clone)]
pub struct RotaryEntry {
    pub id: ConditionId,
    pub preset: bool,
}

impl RotaryEntry {
    pub const fn preset(id: ConditionId) -> Self {
        Self { id, preset: true }
    }

    pub const fn armed_on_demand(id: ConditionId) -> Self {
        Self { id, preset: false }
    }
}

/// The per-state rotaries for one drive class.
pub struct Rotaries {
    pub specialize: Vec<RotaryEntry>,
    pub activate: Vec<RotaryEntry>,
    pub ready: Vec<RotaryEntry>,
    pub hibernate: Vec<RotaryEntry>,
}

impl Rotaries {
    fn for_state(&self, state: EngineState) -> &[RotaryEntry] {
        match state {
            EngineState::Specialize => &self.specialize,
            EngineState::Activate => &self.activate,
            EngineState::Ready => &self.ready,
            EngineState::Hibernate => &self.hibernate,
            EngineState::Fail | EngineState::Destroy => &[],
        }
    }
}

/// One condition. Implementations keep their own phase/counter state and
/// must tolerate being re-stepped with nothing to do.
pub trait Condition: Send {
    fn step(&mut self, cx: &mut Crank<'_>) -> CrankOutcome;

    /// Called when the condition is re-armed by a state entry, so stale
    /// phase state from an earlier run does not leak into the new one.
    fn reset(&mut self) {}
}

/// Deadline-driven re-arming. At most one deadline per condition.
#[derive(Default)]
pub struct Timers {
    entries: Vec<(ConditionId, Instant)>,
}

impl Timers {
    pub fn arm(&mut self, id: ConditionId, deadline: Instant) {
        self.cancel(id);
        self.entries.push((id, deadline));
    }

    pub fn cancel(&mut self, id: ConditionId) {
        self.entries.retain(|(e, _)| *e != id);
    }

    pub fn is_armed(&self, id: ConditionId) -> bool {
        self.entries.iter().any(|(e, _)| *e == id)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().map(|(_, d)| *d).min()
    }

    /// Removes and returns every timer whose deadline has passed.
    pub fn take_due(&mut self, now: Instant) -> Vec<ConditionId> {
        let (due, rest) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|(_, d)| *d <= now);
        self.entries = rest;
        due.into_iter().map(|(id, _)| id).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Test and tracing seam: observes state entries and condition steps.
pub trait CrankObserver: Send {
    fn on_enter_state(&self, _state: EngineState) {}
    fn on_step(&self, _state: EngineState, _id: ConditionId, _outcome: &CrankOutcome) {}
}

/// Default observer; tracing only.
pub struct NullObserver;

impl CrankObserver for NullObserver {}

/// Context handed to a condition for one step. Wraps the object core and
/// collects arm requests, which are merged into the armed set immediately
/// after the step returns.
pub struct Crank<'a> {
    pub state: EngineState,
    pub core: &'a mut Core,
    arm_requests: Vec<ConditionId>,
}

impl<'a> Crank<'a> {
    fn new(state: EngineState, core: &'a mut Core) -> Self {
        Self {
            state,
            core,
            arm_requests: Vec::new(),
        }
    }

    /// Requests that `id` be armed once this step returns.
    pub fn arm(&mut self, id: ConditionId) {
        if !self.arm_requests.contains(&id) {
            self.arm_requests.push(id);
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.core.config
    }

    pub fn shared(&self) -> MutexGuard<'_, Shared> {
        self.core.shared.lock()
    }

    pub fn pending(&self) -> &PendingRequests {
        &self.core.pending
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.core.dispatcher
    }

    pub fn issue(&self, tag: ConditionId, request: drive_core::CommandRequest) {
        self.core.dispatcher.issue(tag, request, None);
    }

    pub fn issue_for_client(
        &self,
        tag: ConditionId,
        request: drive_core::CommandRequest,
        client: crate::request::ClientRequest,
    ) {
        self.core.dispatcher.issue(tag, request, Some(client));
    }

    pub fn issue_control(&self, tag: ConditionId, request: drive_core::ControlRequest) {
        self.core.dispatcher.issue_control(tag, request);
    }

    pub fn take_completion(&self, tag: ConditionId) -> Option<Completion> {
        self.core.dispatcher.take_completion(tag)
    }

    pub fn is_inflight(&self, tag: ConditionId) -> bool {
        self.core.dispatcher.is_inflight(tag)
    }

    /// Classifies a completion using the port-error table for the drive's
    /// current class.
    pub fn classify(&self, result: &drive_core::CommandResult) -> DriveStatus {
        let class = self.core.shared.lock().class;
        drive_codec::classify(crate::class::port_errors(class), result)
    }

    pub fn arm_timer(&mut self, id: ConditionId, delay: Duration) {
        self.core.timers.arm(id, Instant::now() + delay);
    }

    pub fn cancel_timer(&mut self, id: ConditionId) {
        self.core.timers.cancel(id);
    }
}

/// The crank executor for one drive object.
pub struct Engine {
    state: EngineState,
    armed: Vec<ConditionId>,
    conditions: Vec<(ConditionId, Box<dyn Condition>)>,
    rotaries: Rotaries,
    observer: Box<dyn CrankObserver>,
}

impl Engine {
    pub fn new(rotaries: Rotaries, observer: Box<dyn CrankObserver>) -> Self {
        let mut engine = Self {
            state: EngineState::Specialize,
            armed: Vec::new(),
            conditions: crate::conditions::build_all(),
            rotaries,
            observer,
        };
        engine.arm_presets(EngineState::Specialize);
        engine
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn arm(&mut self, id: ConditionId) {
        if !self.armed.contains(&id) {
            self.armed.push(id);
        }
    }

    pub fn is_armed(&self, id: ConditionId) -> bool {
        self.armed.contains(&id)
    }

    /// Swaps in the rotaries for a new drive class. The armed set and
    /// condition state carry over.
    pub fn set_rotaries(&mut self, rotaries: Rotaries) {
        self.rotaries = rotaries;
    }

    fn arm_presets(&mut self, state: EngineState) {
        let presets: Vec<_> = self
            .rotaries
            .for_state(state)
            .iter()
            .filter(|e| e.preset)
            .map(|e| e.id)
            .collect();
        for id in presets {
            if let Some((_, cond)) = self.conditions.iter_mut().find(|(i, _)| *i == id) {
                cond.reset();
            }
            self.arm(id);
        }
    }

    /// Enters `next`, arming its preset conditions. Terminal states clear
    /// the armed set and timers.
    pub fn enter_state(&mut self, next: EngineState, core: &mut Core) {
        tracing::info!(object = core.object_id, from = ?self.state, to = ?next, "state change");
        self.state = next;
        core.shared.lock().state = next;
        self.observer.on_enter_state(next);
        match next {
            EngineState::Fail => {
                self.armed.clear();
                core.timers.clear();
            }
            EngineState::Destroy => {
                self.armed.clear();
                core.timers.clear();
                core.pending.cancel_all(|| RequestError::Canceled);
            }
            EngineState::Ready => {
                self.arm_presets(next);
                // Periodic log collection applies to rotational drives only.
                if crate::class::collects_logs(core.shared.lock().class)
                    && !core.timers.is_armed(ConditionId::DiskCollect)
                {
                    core.timers.arm(
                        ConditionId::DiskCollect,
                        Instant::now() + core.config.collect_interval,
                    );
                }
            }
            _ => self.arm_presets(next),
        }
    }

    /// Records a terminal failure: the death reason is latched, queued
    /// requests are failed, and any spin-up credit is returned.
    pub fn fail(&mut self, reason: DeathReason, core: &mut Core) {
        tracing::error!(object = core.object_id, %reason, "drive object failed");
        {
            let mut shared = core.shared.lock();
            if shared.death_reason.is_none() {
                shared.death_reason = Some(reason);
            }
        }
        core.pending
            .cancel_all(|| RequestError::ObjectFailed(reason));
        core.release_credit();
        self.enter_state(EngineState::Fail, core);
    }

    /// Runs the crank to quiescence: steps armed conditions in rotary
    /// order until one yields, the rotary drains, or a terminal state is
    /// reached. Drained Specialize/Activate rotaries auto-advance along
    /// the activation ladder.
    pub fn crank(&mut self, core: &mut Core) {
        loop {
            let rotary: Vec<RotaryEntry> = self.rotaries.for_state(self.state).to_vec();
            let mut stepped = false;
            let mut restarted = false;
            for entry in &rotary {
                if !self.armed.contains(&entry.id) {
                    continue;
                }
                stepped = true;
                let outcome = {
                    let Some((_, cond)) =
                        self.conditions.iter_mut().find(|(i, _)| *i == entry.id)
                    else {
                        self.armed.retain(|&i| i != entry.id);
                        continue;
                    };
                    let mut cx = Crank::new(self.state, core);
                    let outcome = cond.step(&mut cx);
                    let requests = cx.arm_requests;
                    for id in requests {
                        self.arm(id);
                    }
                    outcome
                };
                self.observer.on_step(self.state, entry.id, &outcome);
                match outcome {
                    CrankOutcome::Done => {
                        self.armed.retain(|&i| i != entry.id);
                    }
                    CrankOutcome::Pending => return,
                    CrankOutcome::Goto(next) => {
                        self.enter_state(next, core);
                        restarted = true;
                        break;
                    }
                    CrankOutcome::Fail(reason) => {
                        self.fail(reason, core);
                        restarted = true;
                        break;
                    }
                }
            }
            if restarted {
                continue;
            }
            let armed_here = rotary.iter().any(|e| self.armed.contains(&e.id));
            if armed_here {
                if stepped {
                    // A step armed an earlier rotary entry; walk again.
                    continue;
                }
                return;
            }
            match self.state {
                EngineState::Specialize => self.enter_state(EngineState::Activate, core),
                EngineState::Activate => self.enter_state(EngineState::Ready, core),
                _ => return,
            }
        }
    }
}
