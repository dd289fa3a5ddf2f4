#![no_main]

use libfuzzer_sys::fuzz_target;
use purse_core::ServiceInfo;

fuzz_target!(|data: &[u8]| {
    if let Ok((info, consumed)) = ServiceInfo::from_bytes(data) {
        assert!(consumed <= data.len());

        // Round-trip; any compatibility byte other than the marker reads as false
        let bytes = info.to_bytes().unwrap();
        assert_eq!(bytes.len(), consumed);
        assert_eq!(&bytes[..consumed - 1], &data[..consumed - 1]);
        let (again, len) = ServiceInfo::from_bytes(&bytes).unwrap();
        assert_eq!(again, info);
        assert_eq!(len, bytes.len());
    }
});
