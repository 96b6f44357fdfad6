//! Prefix-code decompression for compressed dataflash reads.
//!
//! The firmware compresses flash chunks with a fixed Huffman table of 257
//! symbols: the 256 byte values plus an end-of-stream sentinel. Only the
//! code *lengths* (2..=12 bits) are tabulated; both ends assign the actual
//! codes canonically, ordered by length then symbol, so the table here stays
//! in exact agreement with the encoder in the firmware.
//!
//! Decoding reads bits MSB-first and avoids any per-bit scan over the table:
//! a flat lookup indexed by `(code_len - 1) * 4096 + code` resolves every
//! accumulated bit pattern in one load, with `u16::MAX` marking empty slots.
//!
//! The matching [`encode`] is used by the simulated flight controller and
//! the round-trip tests.

use std::sync::LazyLock;

use crate::errors::{ProtocolError, Result};

/// 256 byte values plus the end-of-stream sentinel.
pub const SYMBOL_COUNT: usize = 257;

/// Symbol index of the end-of-stream sentinel.
pub const EOF_SYMBOL: u16 = 256;

/// Longest code in the table.
const MAX_CODE_LEN: usize = 12;

/// Code length per symbol, mirroring the firmware's compression table.
const fn code_lengths() -> [u8; SYMBOL_COUNT] {
    let mut lengths = [12u8; SYMBOL_COUNT];
    // Erased flash (0xFF) and zero dominate real logs; runs of small values
    // follow. Lengths keep the Kraft sum under one so the canonical
    // assignment below always succeeds.
    lengths[0x00] = 2;
    lengths[0x01] = 4;
    lengths[0xFF] = 4;
    let mut sym = 0x02;
    while sym <= 0x05 {
        lengths[sym] = 5;
        sym += 1;
    }
    while sym <= 0x0B {
        lengths[sym] = 6;
        sym += 1;
    }
    while sym <= 0x13 {
        lengths[sym] = 7;
        sym += 1;
    }
    while sym <= 0x23 {
        lengths[sym] = 8;
        sym += 1;
    }
    while sym <= 0x37 {
        lengths[sym] = 9;
        sym += 1;
    }
    while sym <= 0x5F {
        lengths[sym] = 10;
        sym += 1;
    }
    while sym <= 0x9B {
        lengths[sym] = 11;
        sym += 1;
    }
    lengths
}

static CODE_LENGTHS: [u8; SYMBOL_COUNT] = code_lengths();

/// Canonical code per symbol, right-aligned.
static CODES: LazyLock<[u16; SYMBOL_COUNT]> = LazyLock::new(|| {
    let mut codes = [0u16; SYMBOL_COUNT];
    let mut next_code: u32 = 0;
    let mut prev_len: u8 = 0;
    for len in 1..=MAX_CODE_LEN as u8 {
        for sym in 0..SYMBOL_COUNT {
            if CODE_LENGTHS[sym] == len {
                next_code <<= len - prev_len;
                prev_len = len;
                codes[sym] = next_code as u16;
                next_code += 1;
            }
        }
    }
    codes
});

/// Flat decode table: `(code_len - 1) * 4096 + code -> symbol`.
static DECODE_TABLE: LazyLock<Box<[u16]>> = LazyLock::new(|| {
    let mut table = vec![u16::MAX; MAX_CODE_LEN * (1 << MAX_CODE_LEN)];
    for sym in 0..SYMBOL_COUNT {
        let len = CODE_LENGTHS[sym] as usize;
        let code = CODES[sym] as usize;
        table[(len - 1) * (1 << MAX_CODE_LEN) + code] = sym as u16;
    }
    table.into_boxed_slice()
});

/// Decompress a Huffman stream.
///
/// Stops at the end-of-stream sentinel, after `char_count` output bytes, or
/// when the input runs out, whichever comes first. Output length is always
/// `<= char_count`.
///
/// # Errors
///
/// [`ProtocolError::UnknownHuffmanCode`] when twelve accumulated bits match
/// no table entry, which only malformed input can produce.
pub fn decode(input: &[u8], char_count: usize) -> Result<Vec<u8>> {
    let table = &**DECODE_TABLE;
    let mut out = Vec::with_capacity(char_count.min(input.len() * 4));
    let mut acc: u16 = 0;
    let mut nbits: usize = 0;

    if char_count == 0 {
        return Ok(out);
    }

    for &byte in input {
        for bit in (0..8).rev() {
            acc = (acc << 1) | u16::from((byte >> bit) & 1);
            nbits += 1;
            let sym = table[(nbits - 1) * (1 << MAX_CODE_LEN) + acc as usize];
            if sym != u16::MAX {
                if sym == EOF_SYMBOL {
                    return Ok(out);
                }
                out.push(sym as u8);
                if out.len() == char_count {
                    return Ok(out);
                }
                acc = 0;
                nbits = 0;
            } else if nbits == MAX_CODE_LEN {
                return Err(ProtocolError::UnknownHuffmanCode { bits: acc });
            }
        }
    }
    Ok(out)
}

/// Compress bytes with the shared table, terminating with the sentinel.
///
/// The final partial byte is padded with zero bits; the decoder never reads
/// past the sentinel, so the padding is inert.
#[must_use]
pub fn encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut bitbuf: u32 = 0;
    let mut nbits: usize = 0;

    let mut push_symbol = |sym: usize, out: &mut Vec<u8>| {
        let len = CODE_LENGTHS[sym] as usize;
        bitbuf = (bitbuf << len) | u32::from(CODES[sym]);
        nbits += len;
        while nbits >= 8 {
            out.push((bitbuf >> (nbits - 8)) as u8);
            nbits -= 8;
        }
    };

    for &byte in data {
        push_symbol(byte as usize, &mut out);
    }
    push_symbol(EOF_SYMBOL as usize, &mut out);

    if nbits > 0 {
        out.push((bitbuf << (8 - nbits)) as u8);
    }
    out
}
