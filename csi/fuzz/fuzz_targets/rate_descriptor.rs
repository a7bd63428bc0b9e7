#![no_main]

use csi::RateDescriptor;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|word: u32| {
    if let Ok(rate) = RateDescriptor::decode(word) {
        // decoding drops reserved bits, so only the decoded form must be stable
        assert_eq!(RateDescriptor::decode(rate.encode()), Ok(rate));
    }
});
