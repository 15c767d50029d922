//! Protocol error types

use thiserror::Error;

/// Reasons a driver profile document is rejected
#[derive(Debug, Error)]
pub enum ProfileError {
    /// Body is not valid JSON or does not match the profile schema
    #[error("Malformed profile: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Profile describes a different device than the one requested
    #[error(
        "Profile is for {found_vendor:04x}:{found_product:04x}, expected {expected_vendor:04x}:{expected_product:04x}"
    )]
    DeviceMismatch {
        expected_vendor: u16,
        expected_product: u16,
        found_vendor: u16,
        found_product: u16,
    },

    /// Endpoint number outside 1-15
    #[error("Invalid endpoint number: {0}")]
    InvalidEndpoint(u8),

    /// Same endpoint number and direction declared twice
    #[error("Duplicate endpoint: {0}")]
    DuplicateEndpoint(u8),

    /// Scan-start step with neither a control nor a bulk-out sub-step
    #[error("Scan step {0} is empty")]
    EmptyScanStep(usize),
}

/// Type alias for profile results
pub type Result<T> = std::result::Result<T, ProfileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProfileError::DeviceMismatch {
            expected_vendor: 0x04a9,
            expected_product: 0x1234,
            found_vendor: 0x04b8,
            found_product: 0x0001,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("04b8:0001"));
        assert!(msg.contains("04a9:1234"));
    }

    #[test]
    fn test_empty_step_error() {
        let msg = format!("{}", ProfileError::EmptyScanStep(3));
        assert!(msg.contains("3"));
    }
}
