// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Outer envelope and inner application frames.
//!
//! An outer envelope is a fixed 15-byte header followed by an inner frame.
//! Inner frames come in two on-wire shapes (`0x10` short-ack, `0x68`
//! data); [`FrameRequest`] builds the three request shapes the core emits,
//! and [`parse_response`] recognizes both response shapes uniformly.

use bytes::Bytes;
use enum_dispatch::enum_dispatch;
use zerocopy::{
    byteorder::little_endian::{U16, U32},
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
};

use crate::{
    codec::{self, fcs},
    error::{Error, Result},
    models::variable::VarType,
};

/// Size in bytes of the outer envelope.
pub const HEADER_LEN: usize = 15;

/// Outer envelope `type` field value signaling a server-initiated
/// key-synchronization response.
pub const TYPE_KEY_SYNC: u16 = 0x1111;

/// Fixed terminator byte closing every `0x68` inner frame.
const DATA_FRAME_TERMINATOR: u8 = 0x16;

/// Zerocopy wire view of the 15-byte outer envelope header, little-endian.
#[derive(Debug, Default, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct EnvelopeHeader {
    pub transaction_id: U32,
    pub frame_type: U16,
    pub session_key: U32,
    pub header_checksum: U32,
    pub inner_length: u8,
}

impl EnvelopeHeader {
    pub fn read_from(bytes: &[u8; HEADER_LEN]) -> Self {
        Self::read_from_bytes(bytes.as_slice()).expect("exact-size header buffer")
    }

    pub fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        self.write_to(out.as_mut_slice()).expect("exact-size header buffer");
        out
    }
}

/// Builds the 15-byte outer header for an outgoing request. The
/// `header_checksum` field is left zero here: it is filled in afterward by
/// [`crate::cipher::header_checksum`], once the inner frame's FCS is known
/// and the payload has been stream-ciphered.
pub fn build_envelope_header(transaction_id: u32, session_key: u32, inner_len: u8) -> EnvelopeHeader {
    EnvelopeHeader {
        transaction_id: U32::new(transaction_id),
        frame_type: U16::new(0),
        session_key: U32::new(session_key),
        header_checksum: U32::new(0),
        inner_length: inner_len,
    }
}

/// Trait for the inner-frame shapes the core *builds* and sends.
#[enum_dispatch]
pub trait ToInnerFrame {
    /// Encode this request as a complete inner frame (header, payload, FCS,
    /// terminator for the data shape).
    fn to_inner_frame(&self) -> Vec<u8>;
}

/// Read one scalar register by `(var_type, wid)`.
#[derive(Debug, Clone)]
pub struct ReadScalar {
    pub station: u8,
    pub client: u8,
    pub wid: u16,
    pub var_type: VarType,
}

impl ToInnerFrame for ReadScalar {
    fn to_inner_frame(&self) -> Vec<u8> {
        let mut f = vec![
            0x68,
            0x07,
            0x07,
            0x68,
            self.station & 0x1F,
            self.client & 0x1F,
            0x4D, // FCB: read command
            0x01, // function: read register
            self.var_type.code(),
        ];
        f.extend_from_slice(&self.wid.to_le_bytes());
        let checksum = fcs(&f[4..]);
        f.push(checksum);
        f.push(DATA_FRAME_TERMINATOR);
        f
    }
}

/// Write one scalar register by `(var_type, wid, value)`.
#[derive(Debug, Clone)]
pub struct WriteScalar {
    pub station: u8,
    pub client: u8,
    pub wid: u16,
    pub var_type: VarType,
    /// Little-endian encoded value, already sized per `var_type`
    /// (2 bytes for Int16, 4 for Int32/Float32).
    pub value_bytes: Vec<u8>,
}

impl ToInnerFrame for WriteScalar {
    fn to_inner_frame(&self) -> Vec<u8> {
        let data_len: u8 = if self.var_type == VarType::Int16 { 0x09 } else { 0x0B };
        let mut f = vec![0x68, data_len, data_len, 0x68, self.station & 0x1F, self.client & 0x1F, 0x45, 0x02, self.var_type.code()];
        f.extend_from_slice(&self.wid.to_le_bytes());
        f.extend_from_slice(&self.value_bytes);
        let checksum = fcs(&f[4..4 + data_len as usize]);
        f.push(checksum);
        f.push(DATA_FRAME_TERMINATOR);
        f
    }
}

/// Read `count` bytes of controller memory at `address`, used by enumeration to scavenge the descriptor
/// region.
#[derive(Debug, Clone)]
pub struct ReadMemory {
    pub station: u8,
    pub client: u8,
    pub address: u32,
    pub count: u16,
}

impl ToInnerFrame for ReadMemory {
    fn to_inner_frame(&self) -> Vec<u8> {
        let mut f = vec![0x68, 0x0A, 0x0A, 0x68, self.station & 0x1F, self.client & 0x1F, 0x4D, 0x03];
        f.extend_from_slice(&self.address.to_le_bytes());
        f.extend_from_slice(&self.count.to_le_bytes());
        let checksum = fcs(&f[4..4 + 0x0A]);
        f.push(checksum);
        f.push(DATA_FRAME_TERMINATOR);
        f
    }
}

#[enum_dispatch(ToInnerFrame)]
#[derive(Debug, Clone)]
pub enum FrameRequest {
    ReadScalar,
    WriteScalar,
    ReadMemory,
}

/// The decoded shape-independent view of a response inner frame.
#[derive(Debug, Clone)]
pub struct ParsedFrame {
    pub dest: u8,
    pub src: u8,
    pub status: u8,
    pub value: Bytes,
}

impl ParsedFrame {
    /// A successful status is `0x00` (read and some writes) or `0x08`
    /// (alternate write-accepted form); all other values are protocol-level
    /// rejection.
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self.status, 0x00 | 0x08)
    }
}

/// Parse an inner frame out of a decrypted response buffer.
pub fn parse_response(data: &[u8]) -> Result<ParsedFrame> {
    if data.is_empty() {
        return Err(Error::MalformedFrame("empty inner frame".into()));
    }

    match data[0] {
        0x10 => {
            if data.len() < 4 {
                return Err(Error::MalformedFrame("ack frame too short".into()));
            }
            Ok(ParsedFrame {
                dest: data[1],
                src: data[2],
                status: data[3] & 0x0F,
                value: Bytes::new(),
            })
        },
        0x68 => {
            if data.len() < 8 {
                return Err(Error::MalformedFrame("data frame too short".into()));
            }
            let data_len = usize::from(data[1]);
            if data.len() < 8 || data_len < 4 {
                return Err(Error::MalformedFrame("data frame length field invalid".into()));
            }
            let value_end = 8 + data_len - 4;
            if data.len() < value_end {
                return Err(Error::MalformedFrame("data frame value truncated".into()));
            }
            Ok(ParsedFrame {
                dest: data[4],
                src: data[5],
                status: data[6] & 0x0F,
                value: Bytes::copy_from_slice(&data[8..value_end]),
            })
        },
        other => Err(Error::MalformedFrame(format!("unknown frame type: 0x{other:02X}"))),
    }
}

/// Decode the three scalar-encoding little-endian helpers, re-exported here
/// for callers that only hold a [`ParsedFrame`].
pub fn decode_value(var_type: VarType, value: &Bytes) -> Result<f64> {
    codec::decode_scalar(var_type, value)
}
