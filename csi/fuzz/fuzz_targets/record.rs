#![no_main]

use csi::{frame::RecordReader, CsiRecord};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(record) = CsiRecord::from_slice(data) {
        assert_eq!(record.payload().len(), record.header().payload_len as usize);
        let _ = record.processed_bytes();
    }
    for record in RecordReader::new(data) {
        if record.is_err() {
            break;
        }
    }
});
