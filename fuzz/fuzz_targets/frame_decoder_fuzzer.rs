//! Fuzz target for the streaming frame decoder.
//!
//! Arbitrary bytes, fed one at a time, must never panic the decoder and
//! every frame it emits must re-encode to a byte string the decoder
//! accepts again (emitted frames are internally consistent).

#![no_main]

use fieldsync_proto::{FrameDecoder, encode_frame};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut decoder = FrameDecoder::new();
    for &byte in data {
        if let Some(frame) = decoder.push(byte) {
            let wire = encode_frame(&frame).expect("decoded frame must re-encode");
            let mut second = FrameDecoder::new();
            let mut frames = Vec::new();
            second.push_all(&wire, &mut frames);
            assert_eq!(frames, vec![frame]);
        }
    }
});
