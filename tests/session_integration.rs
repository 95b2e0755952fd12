// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Exercises a [`Session`] end-to-end against a scripted in-process UDP peer
//! standing in for the controller.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use dbnet_client_rs::{
    catalog::VariableCatalog,
    cfg::config::{Config, EndpointConfig, EnumerationConfig, IdentityConfig, RuntimeConfig, SecurityConfig, TimersConfig},
    cipher,
    client::session::Session,
    codec::fcs,
    models::{
        frame::{FrameRequest, ReadScalar, HEADER_LEN, TYPE_KEY_SYNC},
        variable::VarType,
    },
};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

fn test_config(port: u16) -> Config {
    Config {
        endpoint: EndpointConfig { host: "127.0.0.1".into(), port },
        identity: IdentityConfig { station_addr: 4, client_addr: 31 },
        security: SecurityConfig { password: 0xABCD },
        timers: TimersConfig { request_timeout: Duration::from_millis(500), probe_pace: Duration::from_millis(1) },
        enumeration: EnumerationConfig { max_variables: 10, max_consecutive_failures: 3, wid_min: 4000, wid_max: 4010 },
        runtime: RuntimeConfig { scan_interval: Duration::from_secs(30) },
    }
}

/// Decrypts one received datagram with the shared test password and returns
/// `(transaction_id, session_key, inner_frame)`.
fn decrypt(datagram: &[u8], password: u32) -> Result<(u32, u32, Vec<u8>)> {
    let mut buf = datagram.to_vec();
    cipher::apply_stream(&mut buf, password);
    let transaction_id = u32::from_le_bytes(buf[0..4].try_into().context("transaction_id field")?);
    let session_key = u32::from_le_bytes(buf[6..10].try_into().context("session_key field")?);
    Ok((transaction_id, session_key, buf[HEADER_LEN..].to_vec()))
}

/// Encrypts a fully-formed response envelope (header already laid out in
/// `header`) the way the controller would before sending it back.
fn encrypt_response(mut header: Vec<u8>, inner: &[u8], password: u32, transaction_id: u32, session_key: u32) -> Vec<u8> {
    header.extend_from_slice(inner);
    cipher::apply_stream(&mut header, password);
    let frame_fcs = fcs(inner);
    let checksum = cipher::header_checksum(password, transaction_id, session_key, frame_fcs);
    header[10..14].copy_from_slice(&checksum.to_le_bytes());
    header
}

/// Lays out the 15-byte outer header. `inner_len` is the wire
/// `inner_length` field itself (the actual inner-frame byte count minus 6
/// for `0x68`-shape frames), not the raw byte count.
fn envelope_header(transaction_id: u32, frame_type: u16, session_key: u32, inner_len: u8) -> Vec<u8> {
    let mut h = vec![0u8; HEADER_LEN];
    h[0..4].copy_from_slice(&transaction_id.to_le_bytes());
    h[4..6].copy_from_slice(&frame_type.to_le_bytes());
    h[6..10].copy_from_slice(&session_key.to_le_bytes());
    // h[10..14] header_checksum filled in by encrypt_response
    h[14] = inner_len;
    h
}

/// A scalar read-ack response frame: `[0x68, len, len, 0x68, dest, src, status, 0, value..., fcs, 0x16]`.
fn ack_data_frame(dest: u8, src: u8, status: u8, value: &[u8]) -> Vec<u8> {
    let data_len = 4 + value.len() as u8;
    let mut f = vec![0x68, data_len, data_len, 0x68, dest, src, status, 0x00];
    f.extend_from_slice(value);
    f.push(fcs(&f[4..4 + data_len as usize]));
    f.push(0x16);
    f
}

#[tokio::test]
async fn read_scalar_round_trips_over_udp() -> Result<()> {
    let peer = UdpSocket::bind("127.0.0.1:0").await?;
    let port = peer.local_addr()?.port();
    let password = 0xABCDu32;

    let peer_task = tokio::spawn(async move {
        let mut buf = [0u8; 1500];
        let (n, from) = peer.recv_from(&mut buf).await?;
        let (transaction_id, session_key, _inner) = decrypt(&buf[..n], password)?;

        let inner = ack_data_frame(31, 4, 0x00, &230i16.to_le_bytes());
        let header = envelope_header(transaction_id, 0, session_key, (inner.len() - 6) as u8);
        let reply = encrypt_response(header, &inner, password, transaction_id, session_key);
        peer.send_to(&reply, from).await?;
        Ok::<_, anyhow::Error>(())
    });

    let cfg = test_config(port);
    let cancel = CancellationToken::new();
    let session = Arc::new(Session::connect(&cfg, cancel.clone()).await.context("session connects")?);

    let req: FrameRequest = ReadScalar { station: 4, client: 31, wid: 4000, var_type: VarType::Int16 }.into();
    let resp = session.send_receive(&req).await.context("exchange succeeds")?;
    assert!(resp.is_success());
    assert_eq!(&resp.value[..2], &230i16.to_le_bytes());

    peer_task.await??;
    cancel.cancel();
    Ok(())
}

#[tokio::test]
async fn key_sync_response_is_absorbed_and_request_retried() -> Result<()> {
    let peer = UdpSocket::bind("127.0.0.1:0").await?;
    let port = peer.local_addr()?.port();
    let password = 0x1234u32;

    let peer_task = tokio::spawn(async move {
        let mut buf = [0u8; 1500];

        // First request arrives with session_key=0: reject it with a KeySync
        // carrying the real key in the envelope's session_key field rather than in the inner frame, which carries no
        // application payload for this message type.
        let (n, from) = peer.recv_from(&mut buf).await?;
        let (transaction_id, _session_key, _inner) = decrypt(&buf[..n], password)?;
        let new_key = 0xDEAD_BEEFu32;
        let key_sync_inner = vec![0u8; 6];
        let header = envelope_header(transaction_id, TYPE_KEY_SYNC, new_key, (key_sync_inner.len() - 6) as u8);
        let reply = encrypt_response(header, &key_sync_inner, password, transaction_id, new_key);
        peer.send_to(&reply, from).await?;

        // Second attempt must carry the new session key.
        let (n, from) = peer.recv_from(&mut buf).await?;
        let (transaction_id, session_key, _inner) = decrypt(&buf[..n], password)?;
        anyhow::ensure!(session_key == new_key, "retry did not carry the synced key");

        let inner = ack_data_frame(31, 4, 0x00, &21.5f32.to_le_bytes());
        let header = envelope_header(transaction_id, 0, session_key, (inner.len() - 6) as u8);
        let reply = encrypt_response(header, &inner, password, transaction_id, session_key);
        peer.send_to(&reply, from).await?;
        Ok::<_, anyhow::Error>(())
    });

    let mut cfg = test_config(port);
    cfg.security.password = password;
    let cancel = CancellationToken::new();
    let session = Arc::new(Session::connect(&cfg, cancel.clone()).await.context("session connects")?);

    let req: FrameRequest = ReadScalar { station: 4, client: 31, wid: 4100, var_type: VarType::Float32 }.into();
    let resp = session.send_receive(&req).await.context("exchange succeeds after key sync")?;
    assert!(resp.is_success());
    assert_eq!(&resp.value[..4], &21.5f32.to_le_bytes());

    peer_task.await??;
    cancel.cancel();
    Ok(())
}

/// A descriptor-read-ack response frame carrying one descriptor payload:
/// type code at offset 2 of the payload, `wid` at `8..10`, NUL-padded name at
/// `12..24`, padded out to the full probe length.
fn descriptor_ack_frame(dest: u8, src: u8, name: &str, var_type: VarType, wid: u16) -> Vec<u8> {
    let mut payload = vec![0u8; 22];
    payload[2] = var_type.code();
    payload[8..10].copy_from_slice(&wid.to_le_bytes());
    payload[12..12 + name.len()].copy_from_slice(name.as_bytes());
    ack_data_frame(dest, src, 0x00, &payload)
}

#[tokio::test]
async fn enumeration_finds_variables_then_stops_and_sorts_by_wid() -> Result<()> {
    let peer = UdpSocket::bind("127.0.0.1:0").await?;
    let port = peer.local_addr()?.port();
    let password = 0u32;

    let peer_task = tokio::spawn(async move {
        let mut buf = [0u8; 1500];
        let mut wid = 4009u16;

        loop {
            let (n, from) = match peer.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(_) => break,
            };
            let (transaction_id, session_key, _inner) = decrypt(&buf[..n], password)?;

            // Ten descriptors, highest wid first so a naive insertion order
            // would come back unsorted; then garbage payloads forever.
            let inner = if wid >= 4000 {
                let name = format!("T{wid}");
                let frame = descriptor_ack_frame(31, 4, &name, VarType::Float32, wid);
                wid = wid.wrapping_sub(1);
                frame
            } else {
                ack_data_frame(31, 4, 0x00, &[0u8; 2])
            };

            let header = envelope_header(transaction_id, 0, session_key, (inner.len() - 6) as u8);
            let reply = encrypt_response(header, &inner, password, transaction_id, session_key);
            peer.send_to(&reply, from).await?;
        }
        Ok::<_, anyhow::Error>(())
    });

    let mut cfg = test_config(port);
    cfg.security.password = password;
    cfg.enumeration.max_consecutive_failures = 11;
    cfg.enumeration.max_variables = 21;

    let cancel = CancellationToken::new();
    let session = Arc::new(Session::connect(&cfg, cancel.clone()).await.context("session connects")?);
    let catalog = VariableCatalog::new(Arc::clone(&session));

    let found = catalog
        .enumerate(cfg.enumeration.wid_range(), cfg.enumeration.max_variables, cfg.enumeration.max_consecutive_failures, Duration::from_millis(1))
        .await
        .context("enumerate terminates after the failure run")?;
    assert_eq!(found, 10);

    let vars = catalog.variables();
    assert_eq!(vars.len(), 10);
    let wids: Vec<u16> = vars.iter().map(|v| v.wid).collect();
    let mut sorted = wids.clone();
    sorted.sort();
    assert_eq!(wids, sorted, "variables() must come back ordered by wid");
    assert_eq!(wids.first(), Some(&4000));
    assert_eq!(wids.last(), Some(&4009));

    cancel.cancel();
    peer_task.abort();
    Ok(())
}

#[tokio::test]
async fn enumeration_stops_after_consecutive_failures() -> Result<()> {
    let peer = UdpSocket::bind("127.0.0.1:0").await?;
    let port = peer.local_addr()?.port();
    let password = 0u32;

    let peer_task = tokio::spawn(async move {
        let mut buf = [0u8; 1500];
        // Every probe times out (the client never gets a reply): just drain
        // the socket until the test ends.
        loop {
            match peer.recv_from(&mut buf).await {
                Ok(_) => continue,
                Err(_) => break,
            }
        }
    });

    let mut cfg = test_config(port);
    cfg.security.password = password;
    cfg.timers.request_timeout = Duration::from_millis(50);
    cfg.enumeration.max_consecutive_failures = 3;
    cfg.enumeration.max_variables = 1000;

    let cancel = CancellationToken::new();
    let session = Arc::new(Session::connect(&cfg, cancel.clone()).await.context("session connects")?);
    let catalog = VariableCatalog::new(Arc::clone(&session));

    let found = catalog
        .enumerate(cfg.enumeration.wid_range(), cfg.enumeration.max_variables, cfg.enumeration.max_consecutive_failures, Duration::from_millis(1))
        .await
        .context("enumerate terminates instead of looping forever")?;
    assert_eq!(found, 0);

    cancel.cancel();
    peer_task.abort();
    Ok(())
}
