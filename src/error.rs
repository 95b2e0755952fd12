// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use thiserror::Error;

/// Errors surfaced by the protocol core to callers.
///
/// KeySync responses and per-probe enumeration anomalies are recovered
/// internally and never reach this type; see the module docs on
/// [`crate::client::session::Session`] and [`crate::catalog::VariableCatalog`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("operation invoked before the transport is open")]
    NotConnected,

    #[error("no correlated datagram within the deadline")]
    Timeout,

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("controller rejected the request (status 0x{0:02X})")]
    ProtocolReject(u8),

    #[error("read or write of a non-scalar variable")]
    UnsupportedType,

    #[error("write rejected: variable is marked read-only")]
    ReadOnlyVariable,

    #[error("transport error: {0}")]
    TransportError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
