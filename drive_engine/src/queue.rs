// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Pending client requests, keyed by request kind.
//!
//! Requests that have not yet been issued to the drive live here. Each
//! entry carries a global arrival sequence so that serving in arrival
//! order does not depend on map iteration order. In-flight requests are
//! never stored here and are never canceled; only queued entries are.

use crate::request::ClientRequest;
use crate::request::RequestError;
use crate::request::RequestKind;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::VecDeque;

#[derive(Default)]
struct QueueInner {
    by_kind: HashMap<RequestKind, VecDeque<(u64, ClientRequest)>>,
    next_seq: u64,
}

/// Thread-safe store of queued client requests.
#[derive(Default)]
pub struct PendingRequests {
    inner: Mutex<QueueInner>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a request behind any earlier requests of any kind.
    pub fn push(&self, request: ClientRequest) {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner
            .by_kind
            .entry(request.kind)
            .or_default()
            .push_back((seq, request));
    }

    /// Removes and returns the oldest queued request of any kind.
    pub fn pop_next(&self) -> Option<ClientRequest> {
        self.pop_next_matching(|_| true)
    }

    /// Removes and returns the oldest queued request whose kind passes
    /// `filter`, preserving arrival order among the eligible kinds.
    pub fn pop_next_matching(&self, filter: impl Fn(RequestKind) -> bool) -> Option<ClientRequest> {
        let mut inner = self.inner.lock();
        let kind = inner
            .by_kind
            .iter()
            .filter(|(kind, _)| filter(**kind))
            .filter_map(|(kind, queue)| queue.front().map(|(seq, _)| (*seq, *kind)))
            .min_by_key(|(seq, _)| *seq)
            .map(|(_, kind)| kind)?;
        inner.take_front(kind)
    }

    /// Removes and returns the oldest queued request of the given kind.
    pub fn take(&self, kind: RequestKind) -> Option<ClientRequest> {
        self.inner.lock().take_front(kind)
    }

    /// Removes and fails every queued request of the given kind. Returns
    /// the number of requests canceled.
    pub fn cancel_kind(&self, kind: RequestKind) -> usize {
        let drained = match self.inner.lock().by_kind.remove(&kind) {
            Some(queue) => queue,
            None => return 0,
        };
        let n = drained.len();
        for (_, request) in drained {
            request.respond(Err(RequestError::Canceled));
        }
        n
    }

    /// Removes and fails every queued request with the given error.
    pub fn cancel_all(&self, err: impl Fn() -> RequestError) {
        let by_kind = std::mem::take(&mut self.inner.lock().by_kind);
        for (_, queue) in by_kind {
            for (_, request) in queue {
                request.respond(Err(err()));
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().by_kind.values().all(|q| q.is_empty())
    }

    pub fn contains(&self, kind: RequestKind) -> bool {
        self.inner
            .lock()
            .by_kind
            .get(&kind)
            .is_some_and(|q| !q.is_empty())
    }
}

impl QueueInner {
    fn take_front(&mut self, kind: RequestKind) -> Option<ClientRequest> {
        let queue = self.by_kind.get_mut(&kind)?;
        let (_, request) = queue.pop_front()?;
        if queue.is_empty() {
            self.by_kind.remove(&kind);
        }
        Some(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestPayload;
    use tokio::sync::oneshot;

    fn request(kind: RequestKind) -> (ClientRequest, oneshot::Receiver<crate::request::RequestResult>) {
        let (tx, rx) = oneshot::channel();
        (
            ClientRequest {
                kind,
                payload: RequestPayload::None,
                responder: tx,
            },
            rx,
        )
    }

    #[test]
    fn pop_next_follows_arrival_order_across_kinds() {
        let pending = PendingRequests::new();
        let (a, _ra) = request(RequestKind::GetModePage);
        let (b, _rb) = request(RequestKind::GetLogPage);
        let (c, _rc) = request(RequestKind::GetModePage);
        pending.push(a);
        pending.push(b);
        pending.push(c);

        assert_eq!(pending.pop_next().unwrap().kind, RequestKind::GetModePage);
        assert_eq!(pending.pop_next().unwrap().kind, RequestKind::GetLogPage);
        assert_eq!(pending.pop_next().unwrap().kind, RequestKind::GetModePage);
        assert!(pending.pop_next().is_none());
    }

    #[test]
    fn take_matches_kind_only() {
        let pending = PendingRequests::new();
        let (a, _ra) = request(RequestKind::GetModePage);
        let (b, _rb) = request(RequestKind::HealthCheck);
        pending.push(a);
        pending.push(b);

        assert!(pending.take(RequestKind::SanitizeStart).is_none());
        assert_eq!(
            pending.take(RequestKind::HealthCheck).unwrap().kind,
            RequestKind::HealthCheck
        );
        assert!(pending.contains(RequestKind::GetModePage));
        assert!(!pending.contains(RequestKind::HealthCheck));
    }

    #[test]
    fn cancel_kind_fails_only_that_kind() {
        let pending = PendingRequests::new();
        let (a, mut ra) = request(RequestKind::FirmwareDownload);
        let (b, mut rb) = request(RequestKind::GetLogPage);
        pending.push(a);
        pending.push(b);

        assert_eq!(pending.cancel_kind(RequestKind::FirmwareDownload), 1);
        assert!(matches!(
            ra.try_recv().unwrap(),
            Err(RequestError::Canceled)
        ));
        assert!(rb.try_recv().is_err());
        assert!(pending.contains(RequestKind::GetLogPage));
    }

    #[test]
    fn cancel_all_drains_everything() {
        let pending = PendingRequests::new();
        let (a, mut ra) = request(RequestKind::ReadLong);
        let (b, mut rb) = request(RequestKind::WriteLong);
        pending.push(a);
        pending.push(b);

        pending.cancel_all(|| RequestError::ObjectFailed(drive_core::DeathReason::Destroyed));
        assert!(pending.is_empty());
        assert!(matches!(
            ra.try_recv().unwrap(),
            Err(RequestError::ObjectFailed(_))
        ));
        assert!(matches!(
            rb.try_recv().unwrap(),
            Err(RequestError::ObjectFailed(_))
        ));
    }
}
