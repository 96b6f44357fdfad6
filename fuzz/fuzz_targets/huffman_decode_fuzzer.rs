//! Fuzz target for the Huffman decoder.
//!
//! Malformed streams must error, never panic, and the output bound must
//! hold for any input.

#![no_main]

use fieldsync_proto::huffman;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|input: (&[u8], u16)| {
    let (data, char_count) = input;
    let char_count = usize::from(char_count);
    if let Ok(decoded) = huffman::decode(data, char_count) {
        assert!(decoded.len() <= char_count);
    }
});
