// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The UDP datagram transport underneath a [`crate::client::session::Session`].
//!
//! Unlike a stream transport there is no framing to do: one `send_to` is one
//! request datagram, one `recv_from` is one response datagram. The read loop
//! exists only to decouple "a datagram arrived" from "someone is waiting for
//! it", and to drop datagrams that arrive after their waiter has already
//! timed out.

use std::{
    io::{Error, ErrorKind, Result},
    net::SocketAddr,
    sync::Arc,
};

use bytes::{Bytes, BytesMut};
use tokio::{net::UdpSocket, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Maximum datagram size the controller is ever expected to send; well above
/// any inner frame this protocol produces.
const MAX_DATAGRAM: usize = 1500;

/// Owns the bound UDP socket and fans incoming datagrams out to whoever is
/// currently waiting, via a single-slot channel (only one exchange is ever
/// in flight at a time, see `Session`).
#[derive(Debug)]
pub struct Transport {
    socket: Arc<UdpSocket>,
    inbound: tokio::sync::Mutex<mpsc::Receiver<Bytes>>,
    cancel: CancellationToken,
}

impl Transport {
    /// Binds a local UDP socket and connects it to `peer`, then spawns the
    /// read loop. `connect` on a UDP socket just filters `recv` to datagrams
    /// from that peer; it does not perform a handshake.
    pub async fn connect(peer: SocketAddr, cancel: CancellationToken) -> Result<Self> {
        let local: SocketAddr =
            if peer.is_ipv6() { "[::]:0".parse().expect("valid literal") } else { "0.0.0.0:0".parse().expect("valid literal") };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer).await?;
        let socket = Arc::new(socket);

        let (tx, rx) = mpsc::channel(1);
        let read_socket = Arc::clone(&socket);
        let read_cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = read_loop(read_socket, tx, read_cancel).await {
                warn!("dbnet read loop exited: {e}");
            }
        });

        Ok(Self { socket, inbound: tokio::sync::Mutex::new(rx), cancel })
    }

    pub async fn send(&self, datagram: &[u8]) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::new(ErrorKind::Other, "transport cancelled"));
        }
        self.socket.send(datagram).await?;
        Ok(())
    }

    /// Waits for the next datagram from the read loop. Any datagram already
    /// sitting in the channel from a previous, already-timed-out exchange is
    /// stale and must be drained by the caller before sending a new request
    /// (`Session::send_receive` does this).
    pub async fn recv(&self) -> Result<Bytes> {
        let mut rx = self.inbound.lock().await;
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::new(ErrorKind::Other, "transport cancelled")),
            msg = rx.recv() => msg.ok_or_else(|| Error::new(ErrorKind::Other, "transport read loop ended")),
        }
    }

    /// Drops any datagram left over from a previous, already-abandoned
    /// exchange without blocking.
    pub async fn drain_stale(&self) {
        let mut rx = self.inbound.lock().await;
        while rx.try_recv().is_ok() {
            debug!("dropped stale datagram");
        }
    }
}

async fn read_loop(socket: Arc<UdpSocket>, tx: mpsc::Sender<Bytes>, cancel: CancellationToken) -> Result<()> {
    let mut buf = BytesMut::zeroed(MAX_DATAGRAM);
    loop {
        if cancel.is_cancelled() {
            return Err(Error::new(ErrorKind::Other, "cancelled"));
        }
        let n = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::new(ErrorKind::Other, "cancelled")),
            res = socket.recv(&mut buf) => res?,
        };
        let datagram = Bytes::copy_from_slice(&buf[..n]);
        // A full channel means the previous response is still unconsumed;
        // overwrite it rather than block the read loop on a dead waiter.
        let _ = tx.try_send(datagram);
    }
}
