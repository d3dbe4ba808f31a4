// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The transport edge: one logical point-to-point connection between a
//! drive object and its adapter port.
//!
//! The edge owns path state and path attributes, and routes functional
//! (command-bearing) and control requests to the attached port. State and
//! attribute accessors are synchronous because they only touch in-memory
//! metadata; this is the one place in the stack where a blocking lock is
//! allowed on the crank path. Hardware-bound requests are always async.

#![forbid(unsafe_code)]

use drive_core::CommandRequest;
use drive_core::CommandResult;
use drive_core::ControlRequest;
use drive_core::DeviceAddress;
use drive_core::PathAttrs;
use drive_core::PathState;
use drive_core::PortHandle;
use drive_core::TransportError;
use parking_lot::Mutex;

/// A transport edge. Cheap to share; all mutable state is behind one lock.
pub struct TransportEdge {
    client_id: u64,
    inner: Mutex<EdgeInner>,
}

struct EdgeInner {
    state: PathState,
    attrs: PathAttrs,
    server_id: u64,
    /// Cached fast-path reference to the adapter port, populated on attach
    /// and dropped on detach. Cloned out of the lock before any await.
    port: Option<PortHandle>,
    /// Device address captured at attach time; open() re-validates the
    /// generation against what the port currently reports.
    address: Option<DeviceAddress>,
}

impl TransportEdge {
    /// Creates an unattached edge for `client_id` (the drive object id).
    pub fn new(client_id: u64) -> Self {
        Self {
            client_id,
            inner: Mutex::new(EdgeInner {
                state: PathState::Invalid,
                attrs: PathAttrs::new().with_closed(true),
                server_id: 0,
                port: None,
                address: None,
            }),
        }
    }

    pub fn client_id(&self) -> u64 {
        self.client_id
    }

    pub fn server_id(&self) -> u64 {
        self.inner.lock().server_id
    }

    /// Attaches the edge to an adapter port. Permitted only while the path
    /// state is `Invalid`; moves to `Disabled`.
    pub fn attach(&self, server_id: u64, port: PortHandle) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        if inner.state != PathState::Invalid {
            return Err(TransportError::AlreadyAttached);
        }
        inner.address = Some(port.address());
        inner.server_id = server_id;
        inner.port = Some(port);
        inner.state = PathState::Disabled;
        tracing::debug!(client = self.client_id, server = server_id, "edge attached");
        Ok(())
    }

    /// Detaches the edge. A no-op if the edge is already `Invalid`;
    /// otherwise synchronously unwinds to `Invalid` and drops the cached
    /// port reference.
    pub fn detach(&self) {
        let mut inner = self.inner.lock();
        if inner.state == PathState::Invalid {
            return;
        }
        tracing::debug!(client = self.client_id, "edge detached");
        inner.state = PathState::Invalid;
        inner.attrs = PathAttrs::new().with_closed(true);
        inner.server_id = 0;
        inner.port = None;
        inner.address = None;
    }

    /// Opens the edge for functional traffic: validates that the port still
    /// reports the generation captured at attach, clears the Closed
    /// attribute, and moves `Disabled` → `Enabled`.
    pub fn open(&self) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        if inner.state != PathState::Disabled {
            return Err(TransportError::NotEnabled(inner.state));
        }
        let expected = inner
            .address
            .ok_or(TransportError::NotEnabled(PathState::Invalid))?;
        let actual = inner
            .port
            .as_ref()
            .ok_or(TransportError::NotEnabled(PathState::Invalid))?
            .address();
        if actual.generation != expected.generation || actual.port_id != expected.port_id {
            return Err(TransportError::AddressMismatch {
                expected: expected.generation,
                actual: actual.generation,
            });
        }
        inner.attrs.set_closed(false);
        inner.state = PathState::Enabled;
        tracing::debug!(client = self.client_id, "edge opened");
        Ok(())
    }

    /// Marks the edge broken or gone after a path loss event.
    pub fn set_path_state(&self, state: PathState) {
        debug_assert!(matches!(state, PathState::Broken | PathState::Gone));
        self.inner.lock().state = state;
    }

    pub fn path_state(&self) -> PathState {
        self.inner.lock().state
    }

    pub fn attrs(&self) -> PathAttrs {
        self.inner.lock().attrs
    }

    /// Read-modify-write of the path attributes under the edge lock.
    pub fn update_attrs(&self, f: impl FnOnce(PathAttrs) -> PathAttrs) -> PathAttrs {
        let mut inner = self.inner.lock();
        inner.attrs = f(inner.attrs);
        inner.attrs
    }

    /// Device address captured at attach, if attached.
    pub fn address(&self) -> Option<DeviceAddress> {
        self.inner.lock().address
    }

    fn enabled_port(&self) -> Result<PortHandle, TransportError> {
        let inner = self.inner.lock();
        if inner.state != PathState::Enabled {
            return Err(TransportError::NotEnabled(inner.state));
        }
        // Port is always present while Enabled.
        Ok(inner.port.clone().expect("enabled edge has a port"))
    }

    /// Routes a functional (command-bearing) request to the port.
    pub async fn send_functional(
        &self,
        request: CommandRequest,
    ) -> Result<CommandResult, TransportError> {
        let port = self.enabled_port()?;
        Ok(port.command(request).await)
    }

    /// Routes a management-plane request to the port. Unlike functional
    /// requests, control requests are also allowed while `Disabled`, since
    /// reset/power-cycle are exactly the operations that recover a path.
    pub async fn send_control(&self, request: ControlRequest) -> Result<(), TransportError> {
        let port = {
            let inner = self.inner.lock();
            match inner.state {
                PathState::Enabled | PathState::Disabled => {
                    inner.port.clone().expect("attached edge has a port")
                }
                state => return Err(TransportError::NotEnabled(state)),
            }
        };
        port.control(request).await
    }
}
