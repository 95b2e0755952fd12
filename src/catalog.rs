// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The controller's variable directory: discovering it by scavenging the
//! descriptor memory region, and reading/writing the scalars it names.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::{
    client::session::Session,
    codec::decode_scalar,
    error::{Error, Result},
    models::{
        frame::{ReadMemory, ReadScalar, WriteScalar},
        variable::{is_readonly_name, VarType, Variable},
    },
};

/// Base address of the controller's descriptor memory region. Enumeration probes one unit offset past the
/// last at a time, independent of the `wid` a probe eventually turns up.
const DESCRIPTOR_BASE_ADDRESS: u32 = 0xFFFD_0000;
/// Bytes requested per probe.
const DESCRIPTOR_PROBE_LEN: u16 = 26;
/// Minimum payload length a probe response must carry to be considered.
const DESCRIPTOR_MIN_PAYLOAD: usize = 22;
/// Width of the NUL-padded name field within a descriptor payload.
const DESCRIPTOR_NAME_LEN: usize = 12;

/// The enumerated set of variables a controller exposes, keyed by `wid` for
/// O(1) lookup during reads/writes.
#[derive(Debug)]
pub struct VariableCatalog {
    session: Arc<Session>,
    by_wid: DashMap<u16, Variable>,
}

impl VariableCatalog {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session, by_wid: DashMap::new() }
    }

    /// Walks the descriptor memory region one unit offset at a time,
    /// probing `0xFFFD0000 + i` for `i` in `0..max_variables` and accepting
    /// only descriptors whose `wid` falls in `wid_range`. Terminates on whichever of `max_variables` (the probe
    /// count, not the found count) or `max_consecutive_failures` is hit
    /// first; a probe that fails to parse counts toward the failure budget
    /// but does not abort enumeration.
    pub async fn enumerate(
        &self,
        wid_range: std::ops::RangeInclusive<u16>,
        max_variables: u32,
        max_consecutive_failures: u32,
        probe_pace: std::time::Duration,
    ) -> Result<usize> {
        let mut consecutive_failures = 0u32;

        for i in 0..max_variables {
            if consecutive_failures >= max_consecutive_failures {
                break;
            }

            let address = DESCRIPTOR_BASE_ADDRESS + i;
            let req = ReadMemory { station: self.session.station(), client: self.session.client(), address, count: DESCRIPTOR_PROBE_LEN }
                .into();

            match self.session.send_receive(&req).await {
                Ok(resp) if resp.is_success() => match parse_descriptor(&resp.value, wid_range.clone()) {
                    Some(variable) => {
                        consecutive_failures = 0;
                        debug!(wid = variable.wid, name = %variable.name, var_type = %variable.var_type, "enumerated variable");
                        self.by_wid.insert(variable.wid, variable);
                    },
                    None => {
                        consecutive_failures += 1;
                    },
                },
                // Every per-probe anomaly -- a rejected status, a malformed
                // frame, a timeout, even a transport error -- counts toward
                // the failure bound rather than aborting the scan.
                Ok(_) | Err(_) => consecutive_failures += 1,
            }

            sleep(probe_pace).await;
        }

        if consecutive_failures >= max_consecutive_failures {
            warn!(consecutive_failures, "enumeration stopped after consecutive unreadable descriptors");
        }

        Ok(self.by_wid.len())
    }

    pub fn get(&self, wid: u16) -> Option<Variable> {
        self.by_wid.get(&wid).map(|e| e.clone())
    }

    pub fn by_name(&self, name: &str) -> Option<Variable> {
        self.by_wid.iter().find(|e| e.name == name).map(|e| e.clone())
    }

    /// Overrides the name-prefix heuristic's `writable` guess for one
    /// already-enumerated variable. Returns `false` if `wid` is unknown.
    pub fn set_writable(&self, wid: u16, writable: bool) -> bool {
        match self.by_wid.get_mut(&wid) {
            Some(mut entry) => {
                entry.writable = writable;
                true
            },
            None => false,
        }
    }

    /// All enumerated variables, ordered by `wid`.
    pub fn variables(&self) -> Vec<Variable> {
        let mut vs: Vec<Variable> = self.by_wid.iter().map(|e| e.clone()).collect();
        vs.sort_by_key(|v| v.wid);
        vs
    }

    pub fn len(&self) -> usize {
        self.by_wid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_wid.is_empty()
    }

    /// Reads and decodes one scalar variable by `wid`.
    pub async fn read_scalar(&self, wid: u16) -> Result<f64> {
        let variable = self.get(wid).ok_or(Error::UnsupportedType)?;
        if !variable.is_scalar() {
            return Err(Error::UnsupportedType);
        }

        let req = ReadScalar { station: self.session.station(), client: self.session.client(), wid, var_type: variable.var_type }.into();
        let resp = self.session.send_receive(&req).await?;
        if !resp.is_success() {
            return Err(Error::ProtocolReject(resp.status));
        }
        decode_scalar(variable.var_type, &resp.value)
    }

    /// Writes one scalar variable by `wid`. Rejected locally without a round
    /// trip if [`Variable::writable`] is `false`.
    pub async fn write_scalar(&self, wid: u16, value: f64) -> Result<()> {
        let variable = self.get(wid).ok_or(Error::UnsupportedType)?;
        if !variable.is_scalar() {
            return Err(Error::UnsupportedType);
        }
        if !variable.writable {
            return Err(Error::ReadOnlyVariable);
        }

        let value_bytes = encode_scalar(variable.var_type, value);
        let req =
            WriteScalar { station: self.session.station(), client: self.session.client(), wid, var_type: variable.var_type, value_bytes }
                .into();
        let resp = self.session.send_receive(&req).await?;
        if !resp.is_success() {
            return Err(Error::ProtocolReject(resp.status));
        }
        Ok(())
    }
}

fn encode_scalar(var_type: VarType, value: f64) -> Vec<u8> {
    match var_type {
        VarType::Int16 => (value as i16).to_le_bytes().to_vec(),
        VarType::Int32 => (value as i32).to_le_bytes().to_vec(),
        _ => (value as f32).to_le_bytes().to_vec(),
    }
}

/// Parses one descriptor payload: type code at offset 2, `wid` at offset
/// `8..10`, a 12-byte NUL-padded Latin-1 name at offset `12..24`. Accepted only if `wid` falls in `wid_range` and the
/// decoded name starts with an ASCII letter.
fn parse_descriptor(data: &[u8], wid_range: std::ops::RangeInclusive<u16>) -> Option<Variable> {
    if data.len() < DESCRIPTOR_MIN_PAYLOAD {
        return None;
    }

    let wid = crate::codec::get_u16(&data[8..10]);
    if !wid_range.contains(&wid) {
        return None;
    }

    let raw_name = &data[12..12 + DESCRIPTOR_NAME_LEN];
    let name_end = raw_name.iter().position(|&b| b == 0).unwrap_or(DESCRIPTOR_NAME_LEN);
    // Latin-1 decodes byte-for-byte into the matching Unicode scalar value.
    let name: String = raw_name[..name_end].iter().map(|&b| b as char).collect();
    if !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return None;
    }

    let var_type = VarType::from_code(data[2]);
    let writable = !is_readonly_name(&name);
    Some(Variable::new(name, wid, var_type, writable))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Lays out a descriptor payload the way a controller response would:
    /// type code at offset 2, `wid` at offset `8..10`, name at `12..24`.
    fn descriptor_bytes(name: &str, var_type: VarType, wid: u16) -> Vec<u8> {
        let mut buf = vec![0u8; DESCRIPTOR_MIN_PAYLOAD];
        buf[2] = var_type.code();
        buf[8..10].copy_from_slice(&wid.to_le_bytes());
        buf[12..12 + name.len()].copy_from_slice(name.as_bytes());
        buf
    }

    #[test]
    fn parses_well_formed_descriptor() {
        let bytes = descriptor_bytes("PozadTeplota", VarType::Float32, 4100);
        let v = parse_descriptor(&bytes, 4000..=6000).expect("parses");
        assert_eq!(v.name, "PozadTeplota");
        assert_eq!(v.wid, 4100);
        assert_eq!(v.var_type, VarType::Float32);
        assert!(v.writable);
    }

    #[test]
    fn readonly_prefix_sets_writable_false() {
        let bytes = descriptor_bytes("TEVEN1", VarType::Int16, 4200);
        let v = parse_descriptor(&bytes, 4000..=6000).expect("parses");
        assert!(!v.writable);
    }

    #[test]
    fn rejects_wid_outside_range() {
        let bytes = descriptor_bytes("Something", VarType::Int16, 4200);
        assert!(parse_descriptor(&bytes, 4201..=6000).is_none());
    }

    #[test]
    fn rejects_name_not_starting_with_a_letter() {
        let bytes = descriptor_bytes("_hidden", VarType::Int16, 4200);
        assert!(parse_descriptor(&bytes, 4000..=6000).is_none());
    }

    #[test]
    fn rejects_empty_name() {
        let bytes = descriptor_bytes("", VarType::Int16, 4200);
        assert!(parse_descriptor(&bytes, 4000..=6000).is_none());
    }

    #[test]
    fn rejects_short_payload() {
        let bytes = descriptor_bytes("Something", VarType::Int16, 4200);
        assert!(parse_descriptor(&bytes[..DESCRIPTOR_MIN_PAYLOAD - 1], 4000..=6000).is_none());
    }

    #[test]
    fn encodes_scalars_by_type() {
        assert_eq!(encode_scalar(VarType::Int16, 230.0), 230i16.to_le_bytes().to_vec());
        assert_eq!(encode_scalar(VarType::Float32, 21.5), 21.5f32.to_le_bytes().to_vec());
    }
}
