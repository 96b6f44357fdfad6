//! Fuzz target for the typed payload parsers.
//!
//! Every parser must reject short or garbage payloads with an error rather
//! than panicking or over-reading.

#![no_main]

use bytes::Bytes;
use fieldsync_proto::payloads::{
    ApiVersionReply, BlackboxConfigReply, DataflashReadReply, DataflashReadRequest,
    DataflashSummaryReply, FcVariantReply, UidReply,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = ApiVersionReply::parse(data);
    let _ = FcVariantReply::parse(data);
    let _ = UidReply::parse(data);
    let _ = DataflashSummaryReply::parse(data);
    let _ = DataflashReadRequest::parse(data);
    let _ = BlackboxConfigReply::parse(data);
    let bytes = Bytes::copy_from_slice(data);
    let _ = DataflashReadReply::parse(&bytes, false);
    let _ = DataflashReadReply::parse(&bytes, true);
});
