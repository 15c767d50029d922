//! Driver profile parsing and validation
//!
//! Profiles arrive as JSON from a remote store or a local directory. The
//! schema is strict: enumerated fields only accept their known spellings and
//! every structural field must be present. After deserialization the profile
//! is checked for consistency before anything downstream may use it.

use crate::error::{ProfileError, Result};
use crate::types::DriverProfile;
use std::collections::HashSet;

/// Highest endpoint number a USB device can declare
const MAX_ENDPOINT_NUMBER: u8 = 15;

impl DriverProfile {
    /// Parse and validate a profile document
    pub fn from_json(body: &[u8]) -> Result<Self> {
        let profile: DriverProfile = serde_json::from_slice(body)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Parse a profile and check it describes the expected vendor/product pair
    pub fn from_json_for(body: &[u8], vendor_id: u16, product_id: u16) -> Result<Self> {
        let profile = Self::from_json(body)?;
        if profile.vendor_id != vendor_id || profile.product_id != product_id {
            return Err(ProfileError::DeviceMismatch {
                expected_vendor: vendor_id,
                expected_product: product_id,
                found_vendor: profile.vendor_id,
                found_product: profile.product_id,
            });
        }
        Ok(profile)
    }

    /// Check structural consistency
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for endpoint in &self.endpoints {
            if endpoint.endpoint_number == 0 || endpoint.endpoint_number > MAX_ENDPOINT_NUMBER {
                return Err(ProfileError::InvalidEndpoint(endpoint.endpoint_number));
            }
            if !seen.insert((endpoint.endpoint_number, endpoint.direction)) {
                return Err(ProfileError::DuplicateEndpoint(endpoint.endpoint_number));
            }
        }

        for (i, step) in self.scan_start_sequence.iter().enumerate() {
            if step.control.is_none() && step.out.is_none() {
                return Err(ProfileError::EmptyScanStep(i));
            }
        }

        Ok(())
    }

    /// Cache key for this profile
    pub fn key(&self) -> (u16, u16) {
        (self.vendor_id, self.product_id)
    }
}
