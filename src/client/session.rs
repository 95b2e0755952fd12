// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The single-in-flight request/response exchange with one controller.
//!
//! The wire protocol carries no correlation ID beyond the envelope's
//! `transaction_id`/`session_key` pair, and the controller processes one
//! request at a time. Every exchange therefore goes through
//! [`Session::send_receive`], which holds an internal `Mutex` for the whole
//! duration of one request/response (or KeySync retry) round trip.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{sync::Mutex, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    cfg::config::Config,
    cipher,
    client::{common::io_with_timeout, transport::Transport},
    codec::fcs,
    error::{Error, Result},
    models::frame::{build_envelope_header, parse_response, EnvelopeHeader, FrameRequest, ParsedFrame, ToInnerFrame, HEADER_LEN, TYPE_KEY_SYNC},
};

#[derive(Debug)]
struct SessionState {
    transaction_id: u32,
    session_key: u32,
}

/// One logical connection to a controller.
///
/// Holds the UDP [`Transport`] plus the mutable `(transaction_id,
/// session_key)` pair the wire protocol threads through every exchange.
/// `station`/`client`/`password` come from configuration and never change
/// for the lifetime of a `Session`.
#[derive(Debug)]
pub struct Session {
    transport: Transport,
    state: Mutex<SessionState>,
    station: u8,
    client: u8,
    password: u32,
    request_timeout: Duration,
    cancel: CancellationToken,
}

impl Session {
    /// Opens the UDP transport to `cfg.endpoint` and returns a freshly
    /// initialized session (`transaction_id = 0`, `session_key = 0`; the
    /// first exchange's KeySync response, if any, establishes the real
    /// session key).
    pub async fn connect(cfg: &Config, cancel: CancellationToken) -> Result<Self> {
        let addr: SocketAddr = format!("{}:{}", cfg.endpoint.host, cfg.endpoint.port)
            .parse()
            .map_err(|e| Error::MalformedFrame(format!("invalid endpoint: {e}")))?;
        let transport = Transport::connect(addr, cancel.clone()).await.map_err(|_| Error::NotConnected)?;

        Ok(Self {
            transport,
            state: Mutex::new(SessionState { transaction_id: 0, session_key: 0 }),
            station: cfg.identity.station_addr,
            client: cfg.identity.client_addr,
            password: cfg.security.password,
            request_timeout: cfg.timers.request_timeout,
            cancel,
        })
    }

    #[inline]
    pub fn station(&self) -> u8 {
        self.station
    }

    #[inline]
    pub fn client(&self) -> u8 {
        self.client
    }

    /// Reachability probe: reads WID 4000 as Int16 and reports whether the
    /// exchange completed. A timeout is reported as `Ok(false)` rather than
    /// propagated, since "not reachable right now" is the expected answer
    /// for this check, not a failure of the check itself; any other error
    /// (malformed frame, transport error) still propagates.
    pub async fn probe(&self) -> Result<bool> {
        let req: FrameRequest = crate::models::frame::ReadScalar {
            station: self.station,
            client: self.client,
            wid: 4000,
            var_type: crate::models::variable::VarType::Int16,
        }
        .into();

        match self.send_receive(&req).await {
            Ok(resp) => {
                debug!(reachable = resp.is_success(), "probe completed");
                Ok(resp.is_success())
            },
            Err(Error::Timeout) => {
                debug!("probe timed out");
                Ok(false)
            },
            Err(e) => Err(e),
        }
    }

    /// Runs one logical request to completion: build, encrypt, send, await
    /// the response, absorb as many KeySync round-trips as fit within the
    /// outer `request_timeout` deadline, then decrypt and parse.
    ///
    /// The deadline is computed once, before the first attempt; each
    /// KeySync retry shares what is left of it rather than restarting a
    /// fresh `request_timeout`, so a controller that keeps rotating keys
    /// cannot stall the caller past the configured budget.
    pub async fn send_receive(&self, request: &FrameRequest) -> Result<ParsedFrame> {
        let mut guard = self.state.lock().await;
        self.transport.drain_stale().await;

        let deadline = Instant::now() + self.request_timeout;
        let mut attempt = 0u32;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(attempt, "exhausted request deadline absorbing KeySync responses");
                return Err(Error::Timeout);
            }

            guard.transaction_id = guard.transaction_id.wrapping_add(1);
            let datagram = self.encode_envelope(request.to_inner_frame(), guard.transaction_id, guard.session_key);

            io_with_timeout("dbnet send", self.transport.send(&datagram), remaining, &self.cancel)
                .await
                .map_err(|_| Error::TransportError(std::io::Error::new(std::io::ErrorKind::TimedOut, "send failed")))?;

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout);
            }
            let response =
                io_with_timeout("dbnet recv", self.transport.recv(), remaining, &self.cancel).await.map_err(|_| Error::Timeout)?;

            let (frame_type, resp_session_key, inner) = self.decode_envelope(&response)?;
            // The controller echoes (and, on KeySync, rotates) the session key
            // through the envelope header on every response, never through the inner frame.
            guard.session_key = resp_session_key;

            if frame_type == TYPE_KEY_SYNC {
                debug!(attempt, new_key = resp_session_key, "absorbing KeySync response, retrying request");
                attempt += 1;
                continue;
            }

            return parse_response(&inner);
        }
    }

    /// Builds and stream-ciphers a complete outgoing envelope.
    fn encode_envelope(&self, inner_frame: Vec<u8>, transaction_id: u32, session_key: u32) -> Vec<u8> {
        // header[14] is the inner frame length *minus 6*: the four `0x68`-shape framing bytes plus fcs+terminator.
        let inner_len = (inner_frame.len() - 6) as u8;
        let header = build_envelope_header(transaction_id, session_key, inner_len);

        let mut datagram = Vec::with_capacity(HEADER_LEN + inner_frame.len());
        datagram.extend_from_slice(&header.to_bytes());
        datagram.extend_from_slice(&inner_frame);

        cipher::apply_stream(&mut datagram, self.password);

        let frame_fcs = fcs(&inner_frame);
        let checksum = cipher::header_checksum(self.password, transaction_id, session_key, frame_fcs);
        datagram[10..14].copy_from_slice(&checksum.to_le_bytes());

        datagram
    }

    /// Decrypts an incoming datagram and returns `(frame_type, session_key,
    /// inner_frame)`.
    fn decode_envelope(&self, datagram: &[u8]) -> Result<(u16, u32, Vec<u8>)> {
        if datagram.len() < HEADER_LEN {
            return Err(Error::MalformedFrame("envelope shorter than header".into()));
        }
        let mut buf = datagram.to_vec();
        cipher::apply_stream(&mut buf, self.password);

        let mut hdr_bytes = [0u8; HEADER_LEN];
        hdr_bytes.copy_from_slice(&buf[..HEADER_LEN]);
        let header = EnvelopeHeader::read_from(&hdr_bytes);

        let inner = buf[HEADER_LEN..].to_vec();
        Ok((header.frame_type.get(), header.session_key.get(), inner))
    }
}

/// Shared ownership wrapper so a [`Session`] can be handed to multiple
/// callers (e.g. a catalog enumerator and interactive reads) without
/// duplicating the transport.
pub type SharedSession = Arc<Session>;
