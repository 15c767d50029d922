//! Integration tests for the profile schema and format sniffer
//!
//! Run with: `cargo test -p protocol --test protocol_tests`

use proptest::prelude::*;
use protocol::{
    ControlSetup, DriverProfile, MediaType, ScanResult, ScanStep, decode_data_url,
    encode_data_url, sniff,
};

mod profile_schema {
    use super::*;

    #[test]
    fn test_profile_json_roundtrip_preserves_order() {
        let profile = DriverProfile {
            vendor_id: 0x04a9,
            product_id: 0x1234,
            interface_number: 0,
            alternate_setting: Some(1),
            endpoints: vec![],
            control_sequence: vec![
                ControlSetup::vendor(0x0c, 1, 0),
                ControlSetup::vendor(0x0d, 2, 0).with_data(vec![9, 9]),
            ],
            scan_start_sequence: vec![
                ScanStep::control(ControlSetup::vendor(0x01, 0, 0)),
                ScanStep::bulk_out(vec![0x1b, 0x45]),
            ],
        };

        let json = serde_json::to_vec(&profile).expect("Failed to serialize");
        let parsed = DriverProfile::from_json(&json).expect("Failed to parse");

        assert_eq!(parsed, profile);
        assert_eq!(parsed.control_sequence[0].request, 0x0c);
        assert_eq!(parsed.control_sequence[1].request, 0x0d);
    }

    #[test]
    fn test_profile_accepts_extra_fields() {
        let body = br#"{ "vendorId": 1, "productId": 2, "interfaceNumber": 0,
            "endpoints": [], "name": "Scanner 9000" }"#;
        assert!(DriverProfile::from_json(body).is_ok());
    }

    #[test]
    fn test_profile_rejects_wrong_types() {
        let body = br#"{ "vendorId": "canon", "productId": 2, "interfaceNumber": 0, "endpoints": [] }"#;
        assert!(DriverProfile::from_json(body).is_err());

        let body = br#"{ "vendorId": 1, "productId": 2, "interfaceNumber": 300, "endpoints": [] }"#;
        assert!(DriverProfile::from_json(body).is_err());
    }
}

mod format_sniffing {
    use super::*;

    #[test]
    fn test_classification_table() {
        assert_eq!(sniff(&[0xFF, 0xD8, 0x00]), MediaType::Jpeg);
        assert_eq!(sniff(&[0x89, 0x50, 0x4E, 0x47, 0x00]), MediaType::Png);
        assert_eq!(sniff(&[]), MediaType::OctetStream);
        assert_eq!(sniff(&[0x00, 0x01]), MediaType::OctetStream);
    }

    #[test]
    fn test_scan_result_data_url_decodes() {
        let result = ScanResult::from_chunk(vec![0x89, 0x50, 0x4E, 0x47, 1, 2, 3], 65536);
        let (media_type, bytes) = decode_data_url(&result.data_url()).unwrap();

        assert_eq!(media_type, MediaType::Png);
        assert_eq!(bytes, result.bytes);
    }
}

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(256))]

    #[test]
    fn prop_data_url_roundtrip(bytes in proptest::collection::vec(any::<u8>(), 0..4096)) {
        let media_type = sniff(&bytes);
        let url = encode_data_url(media_type, &bytes);
        let (decoded_type, decoded) = decode_data_url(&url).unwrap();

        prop_assert_eq!(decoded_type, media_type);
        prop_assert_eq!(decoded, bytes);
    }

    #[test]
    fn prop_sniff_is_deterministic(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
        prop_assert_eq!(sniff(&bytes), sniff(&bytes));
    }
}
