// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The drive object: one background task per physical drive, owning the
//! engine, the dispatcher, and the pending request queue.
//!
//! External callers hold a [`DriveHandle`]. Data-path requests are pushed
//! into the pending queue and served by the engine in arrival order;
//! management events (power save, reclassification, destruction) ride an
//! event channel into the run loop. Snapshot accessors read shared state
//! directly and never touch hardware.

use crate::class;
use crate::config::EngineConfig;
use crate::dispatch::Dispatcher;
use crate::engine::ConditionId;
use crate::engine::CrankObserver;
use crate::engine::Engine;
use crate::engine::EngineState;
use crate::engine::NullObserver;
use crate::engine::Timers;
use crate::queue::PendingRequests;
use crate::request::ClientRequest;
use crate::request::RequestError;
use crate::request::RequestKind;
use crate::request::RequestPayload;
use crate::request::RequestResult;
use crate::request::Response;
use drive_core::AttributeStore;
use drive_core::DeathReason;
use drive_core::DriveClassId;
use drive_core::SanitizePattern;
use drive_core::SanitizeState;
use drive_core::SpinupArbiter;
use drive_core::UpstreamLayer;
use drive_defs::InquiryData;
use drive_edge::TransportEdge;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::Notify;
use tokio::time::Instant;

/// A health check in progress. Created when the quiesce phase accepts the
/// client request; the cleanup phase responds and clears it.
pub struct HealthJob {
    pub client: Option<ClientRequest>,
    pub failed: bool,
    /// The upstream layer refused to quiesce; the check was abandoned
    /// without touching the drive.
    pub denied: bool,
}

/// State shared between the run loop, the conditions, and the handle.
pub struct Shared {
    pub state: EngineState,
    pub class: DriveClassId,
    /// Set by the classifier when discovery changes the class; the run
    /// loop rebuilds the rotaries and clears it.
    pub class_changed: bool,
    pub inquiry: Option<InquiryData>,
    pub serial_number: Option<Vec<u8>>,
    pub device_identifiers: Option<Vec<u8>>,
    pub rotation_rate: Option<u16>,
    pub block_size: u32,
    pub capacity_blocks: u64,
    pub sanitize: SanitizeState,
    /// Highest observed sanitize progress. Never decreases within a run;
    /// drives round-robin progress across heads and may report dips.
    pub sanitize_percent: u8,
    pub death_reason: Option<DeathReason>,
    /// Performance counter collection is off until a client enables it.
    pub perf_enabled: bool,
    pub perf_counters: Option<Vec<u8>>,
    pub health: Option<HealthJob>,
    pub peer_hold: bool,
    /// Set by an abort event; the download condition consumes it and
    /// cancels the transfer even mid-chunk.
    pub download_abort: bool,
    pub credit_held: bool,
    pub collect_in_progress: bool,
}

impl Shared {
    fn new(class: DriveClassId) -> Self {
        Self {
            state: EngineState::Specialize,
            class,
            class_changed: false,
            inquiry: None,
            serial_number: None,
            device_identifiers: None,
            rotation_rate: None,
            block_size: 0,
            capacity_blocks: 0,
            sanitize: SanitizeState::Ok,
            sanitize_percent: 0,
            death_reason: None,
            perf_enabled: false,
            perf_counters: None,
            health: None,
            peer_hold: false,
            download_abort: false,
            credit_held: false,
            collect_in_progress: false,
        }
    }
}

/// Everything a condition step may touch. Owned by the run loop task;
/// handed to the engine by mutable reference on every crank.
pub struct Core {
    pub object_id: u64,
    pub config: EngineConfig,
    pub edge: Arc<TransportEdge>,
    pub dispatcher: Dispatcher,
    pub pending: Arc<PendingRequests>,
    pub shared: Arc<Mutex<Shared>>,
    pub arbiter: Arc<dyn SpinupArbiter>,
    pub upstream: Arc<dyn UpstreamLayer>,
    pub attributes: Option<Arc<dyn AttributeStore>>,
    pub timers: Timers,
    pub notify: Arc<Notify>,
}

impl Core {
    /// Returns the spin-up credit if one is held. Idempotent.
    pub fn release_credit(&mut self) {
        let held = {
            let mut shared = self.shared.lock();
            std::mem::replace(&mut shared.credit_held, false)
        };
        if held {
            self.arbiter.release_credit(self.object_id);
        }
    }
}

/// Management events delivered to the run loop.
enum Event {
    RequestArrived(RequestKind),
    AttrsChanged,
    SpinupGranted,
    PowerSave(bool),
    Reclassify(DriveClassId),
    PeerDownloadHold(bool),
    AbortDownload,
    EdgeLost,
    Destroy,
}

/// Constructs and spawns drive objects.
pub struct DriveBuilder {
    config: EngineConfig,
    observer: Box<dyn CrankObserver>,
    attributes: Option<Arc<dyn AttributeStore>>,
    initial_class: DriveClassId,
}

impl Default for DriveBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DriveBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            observer: Box::new(NullObserver),
            attributes: None,
            initial_class: DriveClassId::Sas,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn observer(mut self, observer: Box<dyn CrankObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn attribute_store(mut self, store: Arc<dyn AttributeStore>) -> Self {
        self.attributes = Some(store);
        self
    }

    pub fn initial_class(mut self, class: DriveClassId) -> Self {
        self.initial_class = class;
        self
    }

    /// Spawns the drive object task. The edge must already be attached
    /// and opened; discovery starts immediately.
    pub fn spawn(
        self,
        object_id: u64,
        edge: Arc<TransportEdge>,
        arbiter: Arc<dyn SpinupArbiter>,
        upstream: Arc<dyn UpstreamLayer>,
    ) -> (DriveHandle, tokio::task::JoinHandle<()>) {
        let notify = Arc::new(Notify::new());
        let shared = Arc::new(Mutex::new(Shared::new(self.initial_class)));
        let pending = Arc::new(PendingRequests::new());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let core = Core {
            object_id,
            config: self.config,
            edge: edge.clone(),
            dispatcher: Dispatcher::new(edge.clone(), notify.clone()),
            pending: pending.clone(),
            shared: shared.clone(),
            arbiter,
            upstream,
            attributes: self.attributes,
            timers: Timers::default(),
            notify: notify.clone(),
        };
        let worker = DriveWorker {
            engine: Engine::new(class::rotaries(self.initial_class), self.observer),
            core,
            events: events_rx,
        };
        let task = tokio::spawn(worker.run());
        let handle = DriveHandle {
            pending,
            shared,
            events: events_tx,
            notify,
            edge,
        };
        (handle, task)
    }
}

struct DriveWorker {
    core: Core,
    engine: Engine,
    events: mpsc::UnboundedReceiver<Event>,
}

impl DriveWorker {
    async fn run(mut self) {
        loop {
            let reclass = {
                let mut shared = self.core.shared.lock();
                if shared.class_changed {
                    shared.class_changed = false;
                    Some(shared.class)
                } else {
                    None
                }
            };
            if let Some(new_class) = reclass {
                tracing::info!(object = self.core.object_id, ?new_class, "drive reclassified");
                self.engine.set_rotaries(class::rotaries(new_class));
            }

            self.engine.crank(&mut self.core);

            if self.engine.state() == EngineState::Destroy {
                // Let in-flight requests complete; they are never canceled.
                while self.core.dispatcher.inflight_count() > 0 {
                    self.core.notify.notified().await;
                }
                self.core.pending.cancel_all(|| RequestError::Canceled);
                self.core.release_credit();
                self.core.edge.detach();
                let mut shared = self.core.shared.lock();
                if shared.death_reason.is_none() {
                    shared.death_reason = Some(DeathReason::Destroyed);
                }
                tracing::info!(object = self.core.object_id, "drive object destroyed");
                return;
            }

            let deadline = self.core.timers.next_deadline();
            tokio::select! {
                _ = self.core.notify.notified() => {}
                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        self.engine.enter_state(EngineState::Destroy, &mut self.core);
                        continue;
                    }
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() => {}
            }

            for id in self.core.timers.take_due(Instant::now()) {
                self.engine.arm(id);
            }
            for tag in self.core.dispatcher.tags_with_completions() {
                self.engine.arm(tag);
            }
            while let Ok(event) = self.events.try_recv() {
                self.handle_event(event);
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::RequestArrived(kind) => {
                if self.engine.state() == EngineState::Fail {
                    let reason = self
                        .core
                        .shared
                        .lock()
                        .death_reason
                        .unwrap_or(DeathReason::HardError);
                    self.core
                        .pending
                        .cancel_all(|| RequestError::ObjectFailed(reason));
                    return;
                }
                let id = match kind {
                    RequestKind::HealthCheck => ConditionId::HealthQuiesce,
                    RequestKind::SanitizeStart => ConditionId::SanitizeStart,
                    RequestKind::FirmwareDownload => ConditionId::DownloadWrite,
                    _ => ConditionId::ServeRequests,
                };
                self.engine.arm(id);
            }
            Event::AttrsChanged => {
                // The crank at the top of the loop re-steps any condition
                // waiting on an attribute handshake.
            }
            Event::SpinupGranted => self.engine.arm(ConditionId::SpinUp),
            Event::PowerSave(true) => {
                if self.engine.state() == EngineState::Ready {
                    self.engine.enter_state(EngineState::Hibernate, &mut self.core);
                }
            }
            Event::PowerSave(false) => {
                if self.engine.state() == EngineState::Hibernate {
                    self.core.edge.update_attrs(|a| a.with_power_save_on(false));
                    self.engine.enter_state(EngineState::Activate, &mut self.core);
                }
            }
            Event::Reclassify(new_class) => {
                self.core.shared.lock().class = new_class;
                tracing::info!(object = self.core.object_id, ?new_class, "drive reclassified");
                self.engine.set_rotaries(class::rotaries(new_class));
            }
            Event::PeerDownloadHold(hold) => {
                self.core.shared.lock().peer_hold = hold;
                self.engine.arm(ConditionId::PeerHold);
            }
            Event::AbortDownload => {
                let canceled = self.core.pending.cancel_kind(RequestKind::FirmwareDownload);
                self.core.shared.lock().download_abort = true;
                // Re-step the condition so an in-flight transfer is
                // canceled too, not just queued requests.
                self.engine.arm(ConditionId::DownloadWrite);
                tracing::info!(
                    object = self.core.object_id,
                    canceled,
                    "firmware download aborted"
                );
            }
            Event::EdgeLost => self.engine.fail(DeathReason::EdgeGone, &mut self.core),
            Event::Destroy => self.engine.enter_state(EngineState::Destroy, &mut self.core),
        }
    }
}

/// Client handle to a running drive object. Cloneable; all methods are
/// safe to call from any task.
#[derive(Clone)]
pub struct DriveHandle {
    pending: Arc<PendingRequests>,
    shared: Arc<Mutex<Shared>>,
    events: mpsc::UnboundedSender<Event>,
    notify: Arc<Notify>,
    edge: Arc<TransportEdge>,
}

impl DriveHandle {
    /// Submits a request and waits for its completion.
    pub async fn request(&self, kind: RequestKind, payload: RequestPayload) -> RequestResult {
        if let Some(reason) = self.shared.lock().death_reason {
            return Err(RequestError::ObjectFailed(reason));
        }
        let (tx, rx) = oneshot::channel();
        self.pending.push(ClientRequest {
            kind,
            payload,
            responder: tx,
        });
        if self.events.send(Event::RequestArrived(kind)).is_err() {
            return Err(RequestError::Canceled);
        }
        self.notify.notify_one();
        rx.await.unwrap_or(Err(RequestError::Canceled))
    }

    pub async fn mode_page(&self, page_code: u8) -> Result<Vec<u8>, RequestError> {
        expect_data(
            self.request(RequestKind::GetModePage, RequestPayload::Page(page_code))
                .await,
        )
    }

    pub async fn set_mode_page(&self, parameter_list: Vec<u8>) -> Result<(), RequestError> {
        self.request(RequestKind::SetModePage, RequestPayload::Buffer(parameter_list))
            .await
            .map(|_| ())
    }

    pub async fn vpd_page(&self, page_code: u8) -> Result<Vec<u8>, RequestError> {
        expect_data(
            self.request(RequestKind::GetVpdPage, RequestPayload::Page(page_code))
                .await,
        )
    }

    pub async fn log_page(&self, page_code: u8) -> Result<Vec<u8>, RequestError> {
        expect_data(
            self.request(RequestKind::GetLogPage, RequestPayload::Page(page_code))
                .await,
        )
    }

    /// Starts a sanitize operation. Returns once the drive has accepted
    /// the command; progress is polled in the background and visible via
    /// [`sanitize_status`](Self::sanitize_status).
    pub async fn sanitize(&self, pattern: SanitizePattern) -> Result<(), RequestError> {
        self.request(RequestKind::SanitizeStart, RequestPayload::Sanitize(pattern))
            .await
            .map(|_| ())
    }

    /// Current sanitize state and highest observed percent complete.
    pub fn sanitize_status(&self) -> (SanitizeState, u8) {
        let shared = self.shared.lock();
        (shared.sanitize, shared.sanitize_percent)
    }

    pub async fn health_check(&self) -> Result<(), RequestError> {
        self.request(RequestKind::HealthCheck, RequestPayload::None)
            .await
            .map(|_| ())
    }

    pub async fn download_firmware(&self, image: Vec<u8>) -> Result<(), RequestError> {
        self.request(RequestKind::FirmwareDownload, RequestPayload::Buffer(image))
            .await
            .map(|_| ())
    }

    /// Cancels a firmware download, whether still queued or already
    /// transferring chunks. The aborted client sees `Canceled`.
    pub fn abort_download(&self) {
        let _ = self.events.send(Event::AbortDownload);
        self.notify.notify_one();
    }

    pub async fn read_long(&self, logical_block: u32, length: u16) -> Result<Vec<u8>, RequestError> {
        expect_data(
            self.request(
                RequestKind::ReadLong,
                RequestPayload::Lba {
                    logical_block,
                    length,
                },
            )
            .await,
        )
    }

    pub async fn write_long(&self, logical_block: u32, data: Vec<u8>) -> Result<(), RequestError> {
        self.request(
            RequestKind::WriteLong,
            RequestPayload::LbaData {
                logical_block,
                data,
            },
        )
        .await
        .map(|_| ())
    }

    /// Reformats the drive to a new block size.
    pub async fn format_block_size(&self, block_size: u32) -> Result<(), RequestError> {
        self.request(
            RequestKind::FormatBlockSize,
            RequestPayload::BlockSize(block_size),
        )
        .await
        .map(|_| ())
    }

    pub async fn set_queue_timer(&self, millis: u32) -> Result<(), RequestError> {
        self.request(RequestKind::SetQueueTimer, RequestPayload::TimerMillis(millis))
            .await
            .map(|_| ())
    }

    /// Starts performance counter collection. Reads fail until this is
    /// called.
    pub async fn enable_perf_counters(&self) -> Result<(), RequestError> {
        self.request(RequestKind::EnablePerfCounters, RequestPayload::None)
            .await
            .map(|_| ())
    }

    /// Stops collection and discards the cached counter snapshot.
    pub async fn disable_perf_counters(&self) -> Result<(), RequestError> {
        self.request(RequestKind::DisablePerfCounters, RequestPayload::None)
            .await
            .map(|_| ())
    }

    pub async fn perf_counters(&self) -> Result<Vec<u8>, RequestError> {
        expect_data(
            self.request(RequestKind::ReadPerfCounters, RequestPayload::None)
                .await,
        )
    }

    /// Issues an opaque caller-supplied CDB.
    pub async fn passthrough(
        &self,
        cdb: Vec<u8>,
        data_out: Option<Vec<u8>>,
        data_in_len: usize,
    ) -> Result<Vec<u8>, RequestError> {
        expect_data(
            self.request(
                RequestKind::Passthrough,
                RequestPayload::Passthrough {
                    cdb,
                    data_out,
                    data_in_len,
                },
            )
            .await,
        )
    }

    /// Moves the drive into or out of power save.
    pub fn power_save(&self, on: bool) {
        let _ = self.events.send(Event::PowerSave(on));
        self.notify.notify_one();
    }

    pub fn reclassify(&self, class: DriveClassId) {
        let _ = self.events.send(Event::Reclassify(class));
        self.notify.notify_one();
    }

    /// Holds the object in activation while a peer drive on the shared
    /// bus downloads firmware.
    pub fn peer_download_hold(&self, hold: bool) {
        let _ = self.events.send(Event::PeerDownloadHold(hold));
        self.notify.notify_one();
    }

    /// Wakes the object after the spin-up arbiter grants a reserved
    /// credit.
    pub fn spinup_granted(&self) {
        let _ = self.events.send(Event::SpinupGranted);
        self.notify.notify_one();
    }

    /// Wakes the object after an external party changed edge attributes
    /// (the quiesce handshake rides on these).
    pub fn attrs_changed(&self) {
        let _ = self.events.send(Event::AttrsChanged);
        self.notify.notify_one();
    }

    /// Reports loss of the path behind the edge.
    pub fn edge_lost(&self) {
        let _ = self.events.send(Event::EdgeLost);
        self.notify.notify_one();
    }

    /// Begins teardown. In-flight hardware requests complete first;
    /// queued requests are canceled.
    pub fn destroy(&self) {
        let _ = self.events.send(Event::Destroy);
        self.notify.notify_one();
    }

    pub fn state(&self) -> EngineState {
        self.shared.lock().state
    }

    pub fn death_reason(&self) -> Option<DeathReason> {
        self.shared.lock().death_reason
    }

    pub fn drive_class(&self) -> DriveClassId {
        self.shared.lock().class
    }

    /// Capacity in blocks and the block size, once activation has read
    /// them.
    pub fn capacity(&self) -> (u64, u32) {
        let shared = self.shared.lock();
        (shared.capacity_blocks, shared.block_size)
    }

    pub fn serial_number(&self) -> Option<Vec<u8>> {
        self.shared.lock().serial_number.clone()
    }

    pub fn edge(&self) -> &Arc<TransportEdge> {
        &self.edge
    }
}

fn expect_data(result: RequestResult) -> Result<Vec<u8>, RequestError> {
    match result? {
        Response::Data(data) => Ok(data),
        Response::Empty => Ok(Vec::new()),
        Response::SanitizeStatus { .. } => Err(RequestError::InvalidParameter),
    }
}
