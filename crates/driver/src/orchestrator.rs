//! Scan orchestration
//!
//! Runs the profile's scan-start handshake against a prepared session, then
//! collects the image with a single bulk-in read and classifies it.
//!
//! The read is bounded by one chunk. Images larger than the chunk are cut
//! short; such results are flagged with `possibly_truncated`.

use crate::executor::TransferExecutor;
use crate::resolver::ProfileResolver;
use crate::session::{EndpointSource, Session};
use common::{Error, Result, UsbDevice};
use protocol::{ScanResult, ScanStep};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default bulk-in read size for one scan (64 KiB)
pub const DEFAULT_SCAN_CHUNK_SIZE: usize = 64 * 1024;

pub struct ScanOrchestrator {
    resolver: Arc<ProfileResolver>,
    executor: TransferExecutor,
    chunk_size: usize,
}

impl ScanOrchestrator {
    pub fn new(resolver: Arc<ProfileResolver>, executor: TransferExecutor, chunk_size: usize) -> Self {
        Self {
            resolver,
            executor,
            chunk_size,
        }
    }

    /// Trigger a scan and collect its bytes
    ///
    /// Returns `Ok(None)` when the device produced no data.
    pub async fn run(
        &self,
        device: &dyn UsbDevice,
        session: &Session,
    ) -> Result<Option<ScanResult>> {
        let info = device.info();
        let profile = self
            .resolver
            .resolve(info.vendor_id, info.product_id)
            .await
            .into_profile();

        match (&profile, session.source) {
            (Some(profile), EndpointSource::Profile) => {
                self.run_steps(device, session, &profile.scan_start_sequence)
                    .await?;
            }
            (Some(_), EndpointSource::Heuristic) => {
                warn!(
                    "Profile for {} appeared after preparation; prepare again to use its scan sequence",
                    session.device_id
                );
            }
            (None, _) => debug!("No scan-start sequence for {}", session.device_id),
        }

        let bytes = match self.executor.bulk_in(device, session, self.chunk_size).await {
            Ok(bytes) => bytes,
            Err(Error::EmptyTransfer(_)) => {
                info!("Scan on {} produced no data", session.device_id);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let result = ScanResult::from_chunk(bytes, self.chunk_size);
        if result.possibly_truncated {
            warn!(
                "Scan on {} filled the {} byte read buffer; image may be truncated",
                session.device_id, self.chunk_size
            );
        }

        info!(
            "Scan on {} complete: {} bytes, {}",
            session.device_id,
            result.bytes.len(),
            result.media_type
        );
        Ok(Some(result))
    }

    async fn run_steps(
        &self,
        device: &dyn UsbDevice,
        session: &Session,
        steps: &[ScanStep],
    ) -> Result<()> {
        for (index, step) in steps.iter().enumerate() {
            debug!("Scan-start step {} on {}", index, session.device_id);
            if let Some(setup) = &step.control {
                self.executor.control_out(device, session, setup).await?;
            }
            if let Some(data) = &step.out {
                self.executor.bulk_out(device, session, data).await?;
            }
        }
        Ok(())
    }
}
