// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The controller's variable directory: type tags and the `Variable`
//! descriptor produced by [`crate::catalog::VariableCatalog::enumerate`].

use core::fmt;

/// Variable types carried in a descriptor's `type_code` byte.
///
/// Only [`VarType::Int16`], [`VarType::Int32`], and [`VarType::Float32`] are
/// scalar; the core refuses to read or write any other variant.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum VarType {
    #[default]
    Int16 = 0,
    Int32 = 1,
    Float32 = 2,
    Array = 3,
    TimeArray = 4,
    Structure = 5,
}

impl VarType {
    /// Maps an on-wire type code to a `VarType`, falling back to
    /// [`VarType::Structure`] for unknown codes.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => VarType::Int16,
            1 => VarType::Int32,
            2 => VarType::Float32,
            3 => VarType::Array,
            4 => VarType::TimeArray,
            _ => VarType::Structure,
        }
    }

    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Whether the core's read/write operations support this type.
    #[inline]
    pub fn is_scalar(self) -> bool {
        matches!(self, VarType::Int16 | VarType::Int32 | VarType::Float32)
    }

    /// Wire width in bytes of a scalar value of this type.
    #[inline]
    pub fn wire_width(self) -> usize {
        match self {
            VarType::Int16 => 2,
            _ => 4,
        }
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VarType::Int16 => "Int16",
            VarType::Int32 => "Int32",
            VarType::Float32 => "Float32",
            VarType::Array => "Array",
            VarType::TimeArray => "TimeArray",
            VarType::Structure => "Structure",
        })
    }
}

/// A named entity exposed by the controller.
///
/// `wid` is unique within one catalog and `var_type` is immutable once the
/// `Variable` has been produced by enumeration.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub wid: u16,
    pub var_type: VarType,
    /// Advisory only: derived from the name-prefix heuristic at enumeration
    /// time, and overridable by the caller afterward (operator selection).
    pub writable: bool,
}

impl Variable {
    pub fn new(name: impl Into<String>, wid: u16, var_type: VarType, writable: bool) -> Self {
        Self {
            name: name.into(),
            wid,
            var_type,
            writable,
        }
    }

    #[inline]
    pub fn is_scalar(&self) -> bool {
        self.var_type.is_scalar()
    }
}

/// Name-prefix heuristic for the advisory `writable` flag, ported from the
/// home-automation integration's `_is_readonly_name`. Variables whose name
/// starts with one of these prefixes are measured/status values, not
/// setpoints, and default to read-only.
const READONLY_PREFIXES: &[&str] = &[
    "TE", "TEPROST", "TEVEN", "TTUV", "Trek", "pokoj", "Por", "ALARM", "Stav", "status", "CO2_",
    "koupl", "Teoko",
];

pub fn is_readonly_name(name: &str) -> bool {
    READONLY_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_type_code_falls_back_to_structure() {
        assert_eq!(VarType::from_code(200), VarType::Structure);
    }

    #[test]
    fn only_scalar_types_are_readable() {
        assert!(VarType::Int16.is_scalar());
        assert!(VarType::Int32.is_scalar());
        assert!(VarType::Float32.is_scalar());
        assert!(!VarType::Array.is_scalar());
        assert!(!VarType::TimeArray.is_scalar());
        assert!(!VarType::Structure.is_scalar());
    }

    #[test]
    fn readonly_prefixes_match_original_heuristic() {
        assert!(is_readonly_name("TEVEN1"));
        assert!(is_readonly_name("ALARM_FAULT"));
        assert!(!is_readonly_name("PozadTeplota"));
    }
}
