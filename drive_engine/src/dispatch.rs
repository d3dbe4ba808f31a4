// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The command dispatcher: issues hardware-bound requests on spawned tasks
//! and parks their completions for the crank to consume.
//!
//! Every in-flight request occupies a slot in the transaction table and is
//! tagged with the condition that issued it. In-flight requests are never
//! canceled; cancellation applies only to requests still sitting in the
//! pending queue. The per-command timeout is enforced here, and an elapsed
//! timeout completes the command as a port-level timeout so classification
//! stays uniform.

use crate::engine::ConditionId;
use crate::request::ClientRequest;
use drive_core::CommandRequest;
use drive_core::CommandResult;
use drive_core::ControlRequest;
use drive_core::PortStatus;
use drive_core::TransportError;
use drive_edge::TransportEdge;
use parking_lot::Mutex;
use slab::Slab;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;

/// A completed dispatch, held until the owning condition picks it up.
pub enum Completion {
    Command {
        result: Result<CommandResult, TransportError>,
        /// The client request that rode this command, if any. The condition
        /// that issued the command responds to it after classification.
        client: Option<ClientRequest>,
    },
    Control {
        result: Result<(), TransportError>,
    },
}

struct DispatchInner {
    inflight: Slab<ConditionId>,
    completions: HashMap<ConditionId, VecDeque<Completion>>,
}

pub struct Dispatcher {
    edge: Arc<TransportEdge>,
    notify: Arc<Notify>,
    inner: Arc<Mutex<DispatchInner>>,
}

impl Dispatcher {
    pub fn new(edge: Arc<TransportEdge>, notify: Arc<Notify>) -> Self {
        Self {
            edge,
            notify,
            inner: Arc::new(Mutex::new(DispatchInner {
                inflight: Slab::new(),
                completions: HashMap::new(),
            })),
        }
    }

    /// Issues a functional request tagged with `tag`. The completion is
    /// retrievable via [`take_completion`](Self::take_completion) once the
    /// dispatcher wakes the object.
    pub fn issue(&self, tag: ConditionId, request: CommandRequest, client: Option<ClientRequest>) {
        let token = self.inner.lock().inflight.insert(tag);
        let edge = self.edge.clone();
        let inner = self.inner.clone();
        let notify = self.notify.clone();
        let timeout = request.timeout;
        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, edge.send_functional(request)).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(?tag, ?timeout, "command timed out");
                    Ok(CommandResult::port_failure(PortStatus::Timeout))
                }
            };
            let mut inner = inner.lock();
            inner.inflight.remove(token);
            inner
                .completions
                .entry(tag)
                .or_default()
                .push_back(Completion::Command { result, client });
            drop(inner);
            notify.notify_one();
        });
    }

    /// Issues a management-plane request tagged with `tag`.
    pub fn issue_control(&self, tag: ConditionId, request: ControlRequest) {
        let token = self.inner.lock().inflight.insert(tag);
        let edge = self.edge.clone();
        let inner = self.inner.clone();
        let notify = self.notify.clone();
        tokio::spawn(async move {
            let result = edge.send_control(request).await;
            let mut inner = inner.lock();
            inner.inflight.remove(token);
            inner
                .completions
                .entry(tag)
                .or_default()
                .push_back(Completion::Control { result });
            drop(inner);
            notify.notify_one();
        });
    }

    /// Removes the oldest parked completion for `tag`.
    pub fn take_completion(&self, tag: ConditionId) -> Option<Completion> {
        let mut inner = self.inner.lock();
        let queue = inner.completions.get_mut(&tag)?;
        let completion = queue.pop_front();
        if queue.is_empty() {
            inner.completions.remove(&tag);
        }
        completion
    }

    /// Whether a request issued by `tag` is still in flight.
    pub fn is_inflight(&self, tag: ConditionId) -> bool {
        self.inner.lock().inflight.iter().any(|(_, t)| *t == tag)
    }

    pub fn inflight_count(&self) -> usize {
        self.inner.lock().inflight.len()
    }

    /// Tags that have parked completions waiting to be consumed. The run
    /// loop re-arms these conditions after every wake.
    pub fn tags_with_completions(&self) -> Vec<ConditionId> {
        self.inner.lock().completions.keys().copied().collect()
    }
}
