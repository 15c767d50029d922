//! Caller-facing driver facade
//!
//! [`ScanDriver`] ties the registry, resolver, session manager, executor and
//! orchestrator together behind the operations the application uses:
//! `prepare`, `scan`, `close`, and raw transfer primitives for manual flows.
//!
//! Whole operations are raced against an optional deadline. A transport
//! failure or an expired deadline invalidates the device's session and
//! closes the device; the caller prepares again.

use crate::executor::{DEFAULT_TRANSFER_TIMEOUT, TransferExecutor};
use crate::orchestrator::{DEFAULT_SCAN_CHUNK_SIZE, ScanOrchestrator};
use crate::registry::{DeviceRegistry, SharedDevice};
use crate::resolver::ProfileResolver;
use crate::session::{Session, SessionManager, close_quietly};
use common::{Error, Result};
use protocol::{ControlSetup, ScanResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tunables for a [`ScanDriver`]
#[derive(Debug, Clone, Copy)]
pub struct DriverOptions {
    /// Deadline for each individual transfer
    pub transfer_timeout: Duration,
    /// Size of the single bulk-in read performed by `scan`
    pub scan_chunk_size: usize,
    /// Deadline for a whole `prepare` or `scan`, if any
    pub operation_timeout: Option<Duration>,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
            scan_chunk_size: DEFAULT_SCAN_CHUNK_SIZE,
            operation_timeout: Some(Duration::from_secs(60)),
        }
    }
}

pub struct ScanDriver {
    registry: Arc<DeviceRegistry>,
    resolver: Arc<ProfileResolver>,
    sessions: SessionManager,
    executor: TransferExecutor,
    orchestrator: ScanOrchestrator,
    options: DriverOptions,
}

impl ScanDriver {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        resolver: Arc<ProfileResolver>,
        options: DriverOptions,
    ) -> Self {
        let executor = TransferExecutor::new(options.transfer_timeout);
        Self {
            sessions: SessionManager::new(resolver.clone(), executor),
            orchestrator: ScanOrchestrator::new(resolver.clone(), executor, options.scan_chunk_size),
            registry,
            resolver,
            executor,
            options,
        }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn resolver(&self) -> &Arc<ProfileResolver> {
        &self.resolver
    }

    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    /// Prepare a registered device for scanning
    pub async fn prepare(&self, device_id: &str) -> Result<Arc<Session>> {
        let device = self.device(device_id)?;
        info!("Preparing device {}", device_id);

        let result = with_deadline(
            device_id,
            self.options.operation_timeout,
            self.sessions.prepare(device_id, device.as_ref()),
        )
        .await;

        if let Err(Error::TimedOut(_)) = &result {
            warn!("Preparation of {} timed out", device_id);
            if self.sessions.is_idle(device_id) {
                close_quietly(device_id, device.as_ref()).await;
            }
        }
        result
    }

    /// Scan with the configured operation deadline
    pub async fn scan(&self, device_id: &str) -> Result<Option<ScanResult>> {
        self.scan_with_deadline(device_id, self.options.operation_timeout)
            .await
    }

    /// Scan, abandoning the attempt once `deadline` elapses
    ///
    /// Returns `Ok(None)` when the device produced no data.
    pub async fn scan_with_deadline(
        &self,
        device_id: &str,
        deadline: Option<Duration>,
    ) -> Result<Option<ScanResult>> {
        let (device, session) = self.prepared(device_id)?;
        let result = with_deadline(
            device_id,
            deadline,
            self.orchestrator.run(device.as_ref(), &session),
        )
        .await;
        self.check(&device, &session, result).await
    }

    /// Drop the device's session and close it
    ///
    /// Safe to call on devices that were never prepared.
    pub async fn close(&self, device_id: &str) {
        let had_session = self.sessions.remove(device_id).is_some();
        if let Some(device) = self.registry.lookup(device_id) {
            close_quietly(device_id, device.as_ref()).await;
        }
        if had_session {
            info!("Closed device {}", device_id);
        }
    }

    /// Write raw bytes to the session's bulk-out endpoint
    pub async fn bulk_out(&self, device_id: &str, data: &[u8]) -> Result<usize> {
        let (device, session) = self.prepared(device_id)?;
        let result = self.executor.bulk_out(device.as_ref(), &session, data).await;
        self.check(&device, &session, result).await
    }

    /// Read raw bytes from the session's bulk-in endpoint
    pub async fn bulk_in(&self, device_id: &str, max_length: usize) -> Result<Vec<u8>> {
        let (device, session) = self.prepared(device_id)?;
        let result = self
            .executor
            .bulk_in(device.as_ref(), &session, max_length)
            .await;
        self.check(&device, &session, result).await
    }

    /// Issue one host-to-device control transfer against a prepared device
    pub async fn control_out(&self, device_id: &str, setup: &ControlSetup) -> Result<usize> {
        let (device, session) = self.prepared(device_id)?;
        let result = self
            .executor
            .control_out(device.as_ref(), &session, setup)
            .await;
        self.check(&device, &session, result).await
    }

    pub fn session(&self, device_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(device_id)
    }

    /// Whether a preparation of the device is in flight
    pub fn is_preparing(&self, device_id: &str) -> bool {
        self.sessions.is_preparing(device_id)
    }

    /// Forget a device that is no longer connected
    ///
    /// Drops its session or in-flight preparation and its registration
    /// without touching the transport; the handle is already gone.
    pub fn forget(&self, device_id: &str) {
        self.sessions.remove(device_id);
        if self.registry.unregister(device_id).is_some() {
            info!("Device {} disconnected", device_id);
        }
    }

    /// Close every session and clear the registry
    pub async fn teardown(&self) {
        for device_id in self.sessions.drain() {
            if let Some(device) = self.registry.lookup(&device_id) {
                close_quietly(&device_id, device.as_ref()).await;
            }
        }
        let removed = self.registry.teardown();
        info!("Driver torn down, {} device(s) released", removed.len());
    }

    fn device(&self, device_id: &str) -> Result<SharedDevice> {
        self.registry
            .lookup(device_id)
            .ok_or_else(|| Error::DeviceNotRegistered(device_id.to_string()))
    }

    fn prepared(&self, device_id: &str) -> Result<(SharedDevice, Arc<Session>)> {
        let device = self.device(device_id)?;
        let session = self
            .sessions
            .get(device_id)
            .ok_or_else(|| Error::NotPrepared(device_id.to_string()))?;
        Ok((device, session))
    }

    /// Invalidate the session when a failure leaves the claim in doubt
    ///
    /// Only the session the failed call ran against is dropped; a session
    /// from a later `prepare` is left alone.
    async fn check<T>(
        &self,
        device: &SharedDevice,
        session: &Arc<Session>,
        result: Result<T>,
    ) -> Result<T> {
        if let Err(e) = &result
            && e.invalidates_session()
        {
            let device_id = session.device_id.as_str();
            if self.sessions.invalidate(device_id, session) {
                warn!("Invalidating session for {}: {}", device_id, e);
                close_quietly(device_id, device.as_ref()).await;
            } else {
                debug!("Session for {} already replaced, keeping it: {}", device_id, e);
            }
        }
        result
    }
}

async fn with_deadline<T>(
    device_id: &str,
    deadline: Option<Duration>,
    operation: impl Future<Output = Result<T>>,
) -> Result<T> {
    match deadline {
        Some(limit) => tokio::time::timeout(limit, operation).await.unwrap_or_else(|_| {
            debug!("Deadline of {:?} elapsed for {}", limit, device_id);
            Err(Error::TimedOut(device_id.to_string()))
        }),
        None => operation.await,
    }
}
