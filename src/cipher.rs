// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The keyed PRNG and XOR stream cipher that protects every outer envelope.
//!
//! This is a homegrown, weak cipher (32-bit password, linear congruential
//! PRNG). It exists solely for wire compatibility with the controller and
//! must never be repurposed as a confidentiality primitive.

use crate::models::frame::HEADER_LEN;

/// Keyed PRNG used both to derive the stream-cipher mask and the header
/// checksum. Pure function of `(seed, password)`; a zero `password` is
/// treated as `1` to avoid a degenerate (all-zero) key stream.
///
/// All arithmetic is unsigned 32-bit with wraparound.
pub fn randomize(seed: u32, password: u32) -> u32 {
    let password = if password == 0 { 1 } else { password };

    let mut mult = seed.wrapping_mul(password);
    let mut key = password;
    for _ in 0..4 {
        key = key.wrapping_shl(1).wrapping_add(13);
        mult = mult.wrapping_add(key).wrapping_mul(seed);
    }
    password.wrapping_add(mult).wrapping_add(key)
}

/// Apply the stream cipher to the envelope's payload (bytes `HEADER_LEN..`
/// of `msg`), in place. Self-inverse: calling this twice with the same
/// `(msg header, password)` restores the original bytes.
///
/// `msg` must contain the full 15-byte header followed by the inner frame;
/// `msg[14]` (the `inner_length` field) determines how many payload bytes
/// are transformed (`inner_length + 6`).
pub fn apply_stream(msg: &mut [u8], password: u32) {
    let payload_len = usize::from(msg[14]) + 6;
    let key = crate::codec::get_u32(&msg[6..10]);
    let tx = crate::codec::get_u32(&msg[0..4]);

    let mask_a = randomize(key, !tx).to_le_bytes();
    let mask_b = randomize(key, tx).to_le_bytes();

    for i in 0..payload_len {
        let mask = if i < 8 { mask_a[i % 4] } else { mask_b[i % 4] };
        msg[HEADER_LEN + i] ^= mask;
    }
}

/// Compute the header checksum written into envelope bytes `10..14`.
///
/// Distinct from the stream-cipher mask at `header[6..10]`: this is
/// `randomize(password, transaction_id + session_key + fcs + 256)`, written
/// into the header *after* the payload has already been stream-ciphered.
pub fn header_checksum(password: u32, transaction_id: u32, session_key: u32, fcs: u8) -> u32 {
    let cs_input = transaction_id
        .wrapping_add(session_key)
        .wrapping_add(u32::from(fcs))
        .wrapping_add(256);
    randomize(password, cs_input)
}
