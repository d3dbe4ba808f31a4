// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Fakes for driving the engine without hardware: a scriptable adapter
//! port, a scriptable spin-up arbiter, and a controllable upstream layer.

use crate::object::DriveBuilder;
use crate::object::DriveHandle;
use async_trait::async_trait;
use drive_core::AdapterPort;
use drive_core::CommandRequest;
use drive_core::CommandResult;
use drive_core::ControlRequest;
use drive_core::DeviceAddress;
use drive_core::PortStatus;
use drive_core::SpinupArbiter;
use drive_core::SpinupGrant;
use drive_core::TransportError;
use drive_core::UpstreamLayer;
use drive_defs as defs;
use drive_defs::AdditionalSenseCode;
use drive_defs::ScsiStatus;
use drive_defs::SenseData;
use drive_defs::SenseKey;
use drive_edge::TransportEdge;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use zerocopy::FromZeros;
use zerocopy::IntoBytes;

pub fn good() -> CommandResult {
    CommandResult {
        port_status: PortStatus::Success,
        scsi_status: ScsiStatus::GOOD,
        sense: None,
        tx: 0,
        data_in: Vec::new(),
    }
}

pub fn good_data(data: Vec<u8>) -> CommandResult {
    CommandResult {
        port_status: PortStatus::Success,
        scsi_status: ScsiStatus::GOOD,
        sense: None,
        tx: data.len(),
        data_in: data,
    }
}

pub fn check(sense: SenseData) -> CommandResult {
    CommandResult {
        port_status: PortStatus::Success,
        scsi_status: ScsiStatus::CHECK_CONDITION,
        sense: Some(sense),
        tx: 0,
        data_in: Vec::new(),
    }
}

pub fn not_ready(ascq: u8) -> CommandResult {
    check(SenseData::new(
        SenseKey::NOT_READY,
        AdditionalSenseCode::LUN_NOT_READY,
        ascq,
    ))
}

/// NOT READY / sanitize in progress, reporting `numerator`/65536 done.
pub fn sanitize_in_progress(numerator: u16) -> CommandResult {
    check(
        SenseData::new(
            SenseKey::NOT_READY,
            AdditionalSenseCode::LUN_NOT_READY,
            defs::SCSI_SENSEQ_SANITIZE_IN_PROGRESS,
        )
        .with_progress(numerator),
    )
}

pub fn medium_error() -> CommandResult {
    check(SenseData::new(
        SenseKey::MEDIUM_ERROR,
        AdditionalSenseCode::UNRECOVERED_ERROR,
        0,
    ))
}

type ResultFactory = Box<dyn Fn() -> CommandResult + Send>;

#[derive(Default)]
struct PortState {
    scripted: HashMap<u8, VecDeque<(Option<Duration>, CommandResult)>>,
    sticky: HashMap<u8, ResultFactory>,
    cdbs: Vec<Vec<u8>>,
    controls: Vec<ControlRequest>,
}

/// Adapter port fake. Responses are scripted per opcode (FIFO), with a
/// sticky per-opcode fallback, and a built-in plausible default below
/// that.
pub struct FakePort {
    state: Mutex<PortState>,
}

impl FakePort {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PortState::default()),
        })
    }

    /// Queues one response for the next command with this opcode.
    pub fn script(&self, opcode: u8, result: CommandResult) {
        self.state
            .lock()
            .scripted
            .entry(opcode)
            .or_default()
            .push_back((None, result));
    }

    /// Queues one response that completes only after `delay` of virtual
    /// time, holding the command in flight until then.
    pub fn script_delayed(&self, opcode: u8, delay: Duration, result: CommandResult) {
        self.state
            .lock()
            .scripted
            .entry(opcode)
            .or_default()
            .push_back((Some(delay), result));
    }

    /// Responds with `factory()` for every command with this opcode once
    /// the scripted queue is empty.
    pub fn script_sticky(
        &self,
        opcode: u8,
        factory: impl Fn() -> CommandResult + Send + 'static,
    ) {
        self.state.lock().sticky.insert(opcode, Box::new(factory));
    }

    /// Opcodes of every command issued so far, in order.
    pub fn issued_opcodes(&self) -> Vec<u8> {
        self.state
            .lock()
            .cdbs
            .iter()
            .map(|cdb| cdb.first().copied().unwrap_or(0))
            .collect()
    }

    pub fn issued_cdbs(&self) -> Vec<Vec<u8>> {
        self.state.lock().cdbs.clone()
    }

    pub fn control_requests(&self) -> Vec<ControlRequest> {
        self.state.lock().controls.clone()
    }

    fn default_response(opcode: u8, cdb: &[u8], data_in_len: usize) -> CommandResult {
        match opcode {
            0x12 => {
                // INQUIRY; EVPD selects a VPD page.
                if cdb.get(1).is_some_and(|f| f & 0x01 != 0) {
                    let page = cdb.get(2).copied().unwrap_or(0);
                    let payload: Vec<u8> = match page {
                        defs::VPD_SUPPORTED_PAGES => vec![
                            defs::VPD_SERIAL_NUMBER,
                            defs::VPD_DEVICE_IDENTIFIERS,
                            defs::VPD_BLOCK_DEVICE_CHARACTERISTICS,
                        ],
                        defs::VPD_SERIAL_NUMBER => b"FAKE0001".to_vec(),
                        defs::VPD_DEVICE_IDENTIFIERS => vec![0x01, 0x03, 0x00, 0x08],
                        // 7200 rpm rotational media.
                        defs::VPD_BLOCK_DEVICE_CHARACTERISTICS => {
                            let mut v = vec![0x1C, 0x20];
                            v.resize(60, 0);
                            v
                        }
                        _ => Vec::new(),
                    };
                    let mut data = vec![0, page, 0, payload.len() as u8];
                    data.extend_from_slice(&payload);
                    good_data(data)
                } else {
                    let mut inquiry = defs::InquiryData::new_zeroed();
                    inquiry.vendor_id = *b"FAKEDRIV";
                    inquiry.product_id = *b"UNIT TEST DRIVE ";
                    good_data(inquiry.as_bytes().to_vec())
                }
            }
            0x5A => {
                // MODE SENSE (10): caching page, write cache off.
                let header = defs::ModeParameterHeader10::new_zeroed();
                let mut page = defs::ModeCachingPage::new_zeroed();
                page.page_code = defs::MODE_PAGE_CACHING;
                page.page_length = 0x12;
                let mut data = header.as_bytes().to_vec();
                data.extend_from_slice(page.as_bytes());
                good_data(data)
            }
            0x25 => {
                let data = defs::ReadCapacityData {
                    logical_block_address: 0xFFFF.into(),
                    bytes_per_block: 512.into(),
                };
                good_data(data.as_bytes().to_vec())
            }
            0x4D => good_data(vec![0; data_in_len.min(64)]),
            _ => good(),
        }
    }
}

#[async_trait]
impl AdapterPort for FakePort {
    fn address(&self) -> DeviceAddress {
        DeviceAddress {
            port_id: 1,
            generation: 1,
        }
    }

    async fn command(&self, request: CommandRequest) -> CommandResult {
        let cdb = request.cdb[..request.cdb_len as usize].to_vec();
        let opcode = cdb.first().copied().unwrap_or(0);
        let scripted = {
            let mut state = self.state.lock();
            state.cdbs.push(cdb.clone());
            if let Some((delay, result)) =
                state.scripted.get_mut(&opcode).and_then(|q| q.pop_front())
            {
                Some((delay, result))
            } else if let Some(factory) = state.sticky.get(&opcode) {
                Some((None, factory()))
            } else {
                None
            }
        };
        if let Some((delay, result)) = scripted {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            return result;
        }
        Self::default_response(opcode, &cdb, request.data_in_len)
    }

    async fn control(&self, request: ControlRequest) -> Result<(), TransportError> {
        self.state.lock().controls.push(request);
        Ok(())
    }
}

/// Spin-up arbiter fake: grants are scripted (FIFO), defaulting to
/// enabled. Counts credit releases.
pub struct FakeArbiter {
    grants: Mutex<VecDeque<SpinupGrant>>,
    requests: AtomicUsize,
    releases: AtomicUsize,
}

impl FakeArbiter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            grants: Mutex::new(VecDeque::new()),
            requests: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        })
    }

    pub fn script_grant(&self, grant: SpinupGrant) {
        self.grants.lock().push_back(grant);
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::Relaxed)
    }
}

impl SpinupArbiter for FakeArbiter {
    fn request_credit(&self, _object_id: u64) -> SpinupGrant {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.grants
            .lock()
            .pop_front()
            .unwrap_or(SpinupGrant::Enabled)
    }

    fn release_credit(&self, _object_id: u64) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct FakeUpstream {
    online: AtomicBool,
    clients: AtomicUsize,
    quiesce_notifications: AtomicUsize,
}

impl FakeUpstream {
    pub fn new(online: bool, clients: usize) -> Arc<Self> {
        Arc::new(Self {
            online: AtomicBool::new(online),
            clients: AtomicUsize::new(clients),
            quiesce_notifications: AtomicUsize::new(0),
        })
    }

    pub fn set_clients(&self, clients: usize) {
        self.clients.store(clients, Ordering::Relaxed);
    }

    pub fn quiesce_notifications(&self) -> usize {
        self.quiesce_notifications.load(Ordering::Relaxed)
    }
}

impl UpstreamLayer for FakeUpstream {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    fn client_count(&self) -> usize {
        self.clients.load(Ordering::Relaxed)
    }

    fn notify_quiesce(&self) {
        self.quiesce_notifications.fetch_add(1, Ordering::Relaxed);
    }
}

/// Test tuning: the production retry counts with short waits, so paused
/// clock tests stay fast.
pub fn test_config() -> crate::EngineConfig {
    crate::EngineConfig {
        tur_poll_interval: Duration::from_millis(100),
        reschedule_delay: Duration::from_millis(100),
        download_power_cycle_grace: Duration::from_secs(1),
        credit_release_grace: Duration::from_secs(1),
        credit_retry_delay: Duration::from_millis(100),
        sanitize_poll_interval: Duration::from_secs(1),
        collect_interval: Duration::from_secs(60),
        ..Default::default()
    }
}

pub struct TestDrive {
    pub handle: DriveHandle,
    pub port: Arc<FakePort>,
    pub arbiter: Arc<FakeArbiter>,
    pub upstream: Arc<FakeUpstream>,
    pub task: tokio::task::JoinHandle<()>,
}

/// Builds a drive object over the fakes with the edge already attached
/// and opened.
pub fn spawn_drive(configure: impl FnOnce(&FakePort, &FakeArbiter)) -> TestDrive {
    let port = FakePort::new();
    let arbiter = FakeArbiter::new();
    let upstream = FakeUpstream::new(true, 0);
    configure(&port, &arbiter);
    let edge = Arc::new(TransportEdge::new(1));
    edge.attach(100, port.clone()).unwrap();
    edge.open().unwrap();
    let (handle, task) = DriveBuilder::new().config(test_config()).spawn(
        1,
        edge,
        arbiter.clone(),
        upstream.clone(),
    );
    TestDrive {
        handle,
        port,
        arbiter,
        upstream,
        task,
    }
}

/// Polls until the drive reports `state`, failing the test on timeout.
pub async fn wait_for_state(handle: &DriveHandle, state: crate::EngineState) {
    tokio::time::timeout(Duration::from_secs(600), async {
        while handle.state() != state {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "timed out waiting for {:?}, stuck in {:?} (death: {:?})",
            state,
            handle.state(),
            handle.death_reason()
        )
    });
}

pub async fn wait_until(mut predicate: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(600), async {
        while !predicate() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for test predicate");
}
