#![no_main]

use libfuzzer_sys::fuzz_target;
use pmgraph::storage::redo::decode_records;

fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }
    let expected = u32::from_le_bytes(data[..4].try_into().unwrap()) % 64;
    let _ = decode_records(&data[4..], expected);
});
