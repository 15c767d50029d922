//! Session management
//!
//! Turns a registered device into a [`Session`] ready for transfers by
//! walking the preparation state machine:
//!
//! ```text
//! Unopened -> Opened -> Configured -> InterfaceClaimed -> ControlInitialized
//! ```
//!
//! Any failing transition aborts preparation and closes the device. Nothing
//! from a failed attempt is reused; the caller prepares again from scratch.
//!
//! At most one preparation runs per device. A second concurrent `prepare`
//! for the same device fails fast with [`Error::AlreadyPreparing`].
//! Different devices never contend beyond a short map lookup.

use crate::executor::TransferExecutor;
use crate::resolver::{ProfileResolver, Resolution};
use common::usb_types::find_bulk;
use common::{ConfigurationInfo, Error, Result, UsbDevice};
use parking_lot::Mutex;
use protocol::{Direction, DriverProfile, Endpoint, UsbError};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, trace, warn};

/// Configuration value selected when the device reports none
pub const DEFAULT_CONFIGURATION: u8 = 1;

/// Preparation progress for one device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareState {
    Unopened,
    Opened,
    Configured,
    InterfaceClaimed,
    ControlInitialized,
}

/// Where a session's endpoint set came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointSource {
    /// Declared by a resolved driver profile
    Profile,
    /// Read from the claimed interface's descriptors
    Heuristic,
}

/// Negotiated state for one prepared device
///
/// Immutable once prepared. Valid only while the underlying device handle
/// stays open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub device_id: String,
    pub configuration_value: u8,
    pub interface_number: u8,
    pub alternate_setting: Option<u8>,
    pub endpoints: Vec<Endpoint>,
    pub claimed: bool,
    pub source: EndpointSource,
}

impl Session {
    pub fn bulk_in(&self) -> Option<&Endpoint> {
        find_bulk(&self.endpoints, Direction::In)
    }

    pub fn bulk_out(&self) -> Option<&Endpoint> {
        find_bulk(&self.endpoints, Direction::Out)
    }
}

enum Slot {
    /// Preparation in flight, tagged with its attempt number
    Preparing(u64),
    Ready(Arc<Session>),
}

/// Tracks one session per device and runs preparation
pub struct SessionManager {
    resolver: Arc<ProfileResolver>,
    executor: TransferExecutor,
    slots: Mutex<HashMap<String, Slot>>,
    next_attempt: AtomicU64,
}

/// Clears an in-flight slot if preparation is abandoned before completing
struct PrepareGuard<'a> {
    slots: &'a Mutex<HashMap<String, Slot>>,
    device_id: &'a str,
    attempt: u64,
}

impl Drop for PrepareGuard<'_> {
    fn drop(&mut self) {
        let mut slots = self.slots.lock();
        if matches!(slots.get(self.device_id), Some(Slot::Preparing(a)) if *a == self.attempt) {
            slots.remove(self.device_id);
        }
    }
}

impl SessionManager {
    pub fn new(resolver: Arc<ProfileResolver>, executor: TransferExecutor) -> Self {
        Self {
            resolver,
            executor,
            slots: Mutex::new(HashMap::new()),
            next_attempt: AtomicU64::new(1),
        }
    }

    /// Prepare `device` and store the resulting session under `device_id`
    ///
    /// Preparing an already prepared device runs a full preparation again and
    /// replaces the stored session.
    pub async fn prepare(&self, device_id: &str, device: &dyn UsbDevice) -> Result<Arc<Session>> {
        let attempt = self.begin(device_id)?;
        let _guard = PrepareGuard {
            slots: &self.slots,
            device_id,
            attempt,
        };

        let mut state = PrepareState::Unopened;
        let session = match self.run(device_id, device, &mut state).await {
            Ok(session) => Arc::new(session),
            Err(e) => {
                warn!(
                    "Preparation of {} failed in state {:?}: {}",
                    device_id, state, e
                );
                if !self.superseded(device_id, attempt) {
                    close_quietly(device_id, device).await;
                }
                return Err(e);
            }
        };

        if !self.complete(device_id, attempt, session.clone()) {
            debug!("Device {} was closed during preparation", device_id);
            // A newer attempt may own the handle by now
            if !self.superseded(device_id, attempt) {
                close_quietly(device_id, device).await;
            }
            return Err(Error::NotPrepared(device_id.to_string()));
        }

        info!(
            "Prepared device {}: configuration {}, interface {}, {} endpoint(s) ({:?})",
            device_id,
            session.configuration_value,
            session.interface_number,
            session.endpoints.len(),
            session.source
        );
        Ok(session)
    }

    /// Prepared session for a device, if any
    pub fn get(&self, device_id: &str) -> Option<Arc<Session>> {
        match self.slots.lock().get(device_id) {
            Some(Slot::Ready(session)) => Some(session.clone()),
            _ => None,
        }
    }

    /// Forget the device's session, cancelling the bookkeeping of any
    /// in-flight preparation
    pub fn remove(&self, device_id: &str) -> Option<Arc<Session>> {
        match self.slots.lock().remove(device_id) {
            Some(Slot::Ready(session)) => Some(session),
            _ => None,
        }
    }

    /// Forget the device's session only if it is still `session`
    ///
    /// Returns false when the session was already closed or replaced by a
    /// newer preparation, which then keeps the device.
    pub fn invalidate(&self, device_id: &str, session: &Arc<Session>) -> bool {
        let mut slots = self.slots.lock();
        let current = matches!(
            slots.get(device_id),
            Some(Slot::Ready(ready)) if Arc::ptr_eq(ready, session)
        );
        if current {
            slots.remove(device_id);
        }
        current
    }

    /// Whether no session or preparation is tracked for the device
    pub fn is_idle(&self, device_id: &str) -> bool {
        !self.slots.lock().contains_key(device_id)
    }

    pub fn is_preparing(&self, device_id: &str) -> bool {
        matches!(self.slots.lock().get(device_id), Some(Slot::Preparing(_)))
    }

    /// Forget every session, returning the affected device ids
    pub fn drain(&self) -> Vec<String> {
        self.slots.lock().drain().map(|(id, _)| id).collect()
    }

    fn begin(&self, device_id: &str) -> Result<u64> {
        let mut slots = self.slots.lock();
        if let Some(Slot::Preparing(_)) = slots.get(device_id) {
            return Err(Error::AlreadyPreparing(device_id.to_string()));
        }
        let attempt = self.next_attempt.fetch_add(1, Ordering::Relaxed);
        slots.insert(device_id.to_string(), Slot::Preparing(attempt));
        Ok(attempt)
    }

    /// Whether another attempt or its session now owns the device's slot
    fn superseded(&self, device_id: &str, attempt: u64) -> bool {
        match self.slots.lock().get(device_id) {
            Some(Slot::Preparing(a)) => *a != attempt,
            Some(Slot::Ready(_)) => true,
            None => false,
        }
    }

    /// Publish the session unless the attempt was cancelled by `remove`
    fn complete(&self, device_id: &str, attempt: u64, session: Arc<Session>) -> bool {
        let mut slots = self.slots.lock();
        let current = matches!(slots.get(device_id), Some(Slot::Preparing(a)) if *a == attempt);
        if current {
            slots.insert(device_id.to_string(), Slot::Ready(session));
        }
        current
    }

    async fn run(
        &self,
        device_id: &str,
        device: &dyn UsbDevice,
        state: &mut PrepareState,
    ) -> Result<Session> {
        device
            .open()
            .await
            .map_err(|source| Error::DeviceOpenFailed {
                device_id: device_id.to_string(),
                source,
            })?;
        advance(device_id, state, PrepareState::Opened);

        let configuration = self.ensure_configured(device_id, device).await?;
        advance(device_id, state, PrepareState::Configured);

        let info = device.info();
        let resolution = self.resolver.resolve(info.vendor_id, info.product_id).await;
        if let Resolution::Unavailable(reason) = &resolution {
            debug!(
                "Using descriptor heuristics for {}: {}",
                device_id, reason
            );
        }

        let session = match resolution.into_profile() {
            Some(profile) => {
                let session = self
                    .claim_from_profile(device_id, device, &configuration, &profile)
                    .await?;
                advance(device_id, state, PrepareState::InterfaceClaimed);
                self.run_control_sequence(device_id, device, &profile).await?;
                session
            }
            None => {
                let session = claim_heuristic(device_id, device, &configuration).await?;
                advance(device_id, state, PrepareState::InterfaceClaimed);
                session
            }
        };
        advance(device_id, state, PrepareState::ControlInitialized);

        Ok(session)
    }

    async fn ensure_configured(
        &self,
        device_id: &str,
        device: &dyn UsbDevice,
    ) -> Result<ConfigurationInfo> {
        let failed = |source: UsbError| Error::ConfigurationFailed {
            device_id: device_id.to_string(),
            value: DEFAULT_CONFIGURATION,
            source,
        };

        if let Some(configuration) = device.configuration().await.map_err(failed)? {
            return Ok(configuration);
        }

        debug!(
            "Device {} is unconfigured, selecting configuration {}",
            device_id, DEFAULT_CONFIGURATION
        );
        device
            .select_configuration(DEFAULT_CONFIGURATION)
            .await
            .map_err(failed)?;

        device
            .configuration()
            .await
            .map_err(failed)?
            .ok_or_else(|| failed(UsbError::NotFound))
    }

    async fn claim_from_profile(
        &self,
        device_id: &str,
        device: &dyn UsbDevice,
        configuration: &ConfigurationInfo,
        profile: &DriverProfile,
    ) -> Result<Session> {
        let interface = profile.interface_number;
        let claim_failed = |source: UsbError| Error::InterfaceClaimFailed {
            device_id: device_id.to_string(),
            interface,
            source,
        };

        if let Some(alternate) = profile.alternate_setting {
            device
                .select_alternate_interface(interface, alternate)
                .await
                .map_err(claim_failed)?;
        }
        device.claim_interface(interface).await.map_err(claim_failed)?;

        Ok(Session {
            device_id: device_id.to_string(),
            configuration_value: configuration.value,
            interface_number: interface,
            alternate_setting: profile.alternate_setting,
            endpoints: profile.endpoints.clone(),
            claimed: true,
            source: EndpointSource::Profile,
        })
    }

    async fn run_control_sequence(
        &self,
        device_id: &str,
        device: &dyn UsbDevice,
        profile: &DriverProfile,
    ) -> Result<()> {
        for (step, setup) in profile.control_sequence.iter().enumerate() {
            trace!("Control init step {} on {}", step, device_id);
            self.executor
                .issue_control(device, setup)
                .await
                .map_err(|source| Error::ControlInitFailed {
                    device_id: device_id.to_string(),
                    step,
                    source,
                })?;
        }
        Ok(())
    }
}

async fn claim_heuristic(
    device_id: &str,
    device: &dyn UsbDevice,
    configuration: &ConfigurationInfo,
) -> Result<Session> {
    let interface = configuration
        .heuristic_interface()
        .ok_or_else(|| Error::InterfaceClaimFailed {
            device_id: device_id.to_string(),
            interface: 0,
            source: UsbError::NotFound,
        })?;

    device
        .claim_interface(interface.number)
        .await
        .map_err(|source| Error::InterfaceClaimFailed {
            device_id: device_id.to_string(),
            interface: interface.number,
            source,
        })?;

    let endpoints = interface
        .alternates
        .first()
        .map(|alt| alt.endpoints.clone())
        .unwrap_or_default();

    Ok(Session {
        device_id: device_id.to_string(),
        configuration_value: configuration.value,
        interface_number: interface.number,
        alternate_setting: None,
        endpoints,
        claimed: true,
        source: EndpointSource::Heuristic,
    })
}

fn advance(device_id: &str, state: &mut PrepareState, next: PrepareState) {
    debug!("Device {}: {:?} -> {:?}", device_id, state, next);
    *state = next;
}

pub(crate) async fn close_quietly(device_id: &str, device: &dyn UsbDevice) {
    if let Err(e) = device.close().await {
        debug!("Closing device {} failed: {}", device_id, e);
    }
}
