//! Receive and send tasks spawned per client (spec §4.4). The render
//! task is intentionally not implemented: this crate takes the
//! single-shared-`ASCII_FRAME` design (spec §9 open question (a)), so
//! per-client render would be vestigial.

use crate::client::info::ClientInfo;
use crate::crypto::aead;
use crate::errors::{wire_code, AcipError};
use crate::packet_queue::{PayloadHandle, QueuedPacket};
use crate::protocol::dispatch_table;
use crate::protocol::header::HEADER_SIZE;
use crate::protocol::packet::{self, PacketType};
use crate::protocol::PacketHeader;
use crate::ring_buffer::VideoFrameEntry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

const STEADY_STATE_RECV_TIMEOUT: Duration = Duration::from_secs(10);
const SEND_QUEUE_POLL: Duration = Duration::from_millis(20);

/// Send an `ERROR` packet best-effort, ignoring failures (the
/// connection is already on its way down). Goes through `writer`
/// directly, never `reader`, so this never blocks on a `recv` in
/// progress on the other task.
fn send_error(client: &ClientInfo, code: u32, message: &str) {
    let payload = packet::encode_error(code, message);
    let header = PacketHeader::new(PacketType::Error as u16, payload.len() as u32, crate::protocol::crc::crc32(&payload), client.id);
    let _ = client.writer.lock().send(&header, &payload);
}

/// Probe an idle connection with a `PING`; the client is expected to
/// answer with `PONG`, handled in `handle_packet` below. Sent directly
/// through `writer` rather than the outbound queue, since this is a
/// liveness check, not user data.
fn send_ping(client: &ClientInfo) -> Result<(), AcipError> {
    let header = PacketHeader::new(PacketType::Ping as u16, 0, 0, client.id);
    client.writer.lock().send(&header, &[])
}

/// Decrypt an inbound `ENCRYPTED` wrapper into its inner header+payload,
/// validating the nonce counter and re-checking CRC32 (spec §4.1, §4.5).
fn decrypt_inbound(client: &ClientInfo, outer_header: &PacketHeader, wrapper: &[u8]) -> Result<(PacketHeader, Vec<u8>), AcipError> {
    if wrapper.len() < 24 {
        return Err(AcipError::Protocol("ENCRYPTED payload shorter than nonce".into()));
    }
    let nonce: [u8; 24] = wrapper[0..24].try_into().unwrap();
    let ciphertext = &wrapper[24..];
    let aad = aead::header_aad(outer_header);
    let plaintext = aead::open(&client.crypto.c2s_key, &nonce, ciphertext, &aad)?;

    let counter = aead::counter_from_nonce(&nonce);
    client
        .crypto
        .recv_counter
        .lock()
        .accept_received(counter)?;

    if plaintext.len() < HEADER_SIZE {
        return Err(AcipError::Protocol("decrypted inner packet too short".into()));
    }
    let inner_header = PacketHeader::decode(&plaintext[..HEADER_SIZE])?;
    let inner_payload = plaintext[HEADER_SIZE..].to_vec();
    if crate::protocol::crc::crc32(&inner_payload) != inner_header.crc32 {
        return Err(AcipError::Protocol("inner CRC mismatch after decrypt".into()));
    }
    Ok((inner_header, inner_payload))
}

/// Dispatch one fully-validated inbound packet (spec §4.4 receive task body).
fn handle_packet(client: &ClientInfo, ptype: PacketType, payload: &[u8]) {
    match ptype {
        PacketType::ClientJoin => {
            if let Ok((name, caps)) = packet::parse_client_join(payload) {
                *client.display_name.lock() = name;
                client.capabilities.store(caps, Ordering::Relaxed);
            }
        }
        PacketType::StreamStart => {
            if let Ok(kinds) = packet::parse_stream_kinds(payload) {
                if kinds & packet::STREAM_VIDEO != 0 {
                    client.sending_video.store(true, Ordering::Relaxed);
                }
                if kinds & packet::STREAM_AUDIO != 0 {
                    client.sending_audio.store(true, Ordering::Relaxed);
                }
            }
        }
        PacketType::StreamStop => {
            if let Ok(kinds) = packet::parse_stream_kinds(payload) {
                if kinds & packet::STREAM_VIDEO != 0 {
                    client.sending_video.store(false, Ordering::Relaxed);
                }
                if kinds & packet::STREAM_AUDIO != 0 {
                    client.sending_audio.store(false, Ordering::Relaxed);
                }
            }
        }
        PacketType::ImageFrame => match packet::ImageFrame::parse(payload) {
            Ok(frame) => {
                let entry = VideoFrameEntry {
                    source_client_id: client.id,
                    sequence: client.counters.frames_received.load(Ordering::Relaxed),
                    capture_ts_ns: 0,
                    width: frame.width,
                    height: frame.height,
                    data: frame.rgb.to_vec(),
                };
                client.inbound_video_producer.lock().push(entry);
                client.counters.frames_received.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                // dimensions/size-mismatch: dropped silently per §4.7 failure modes,
                // the compositor treats a missing source as a black cell.
            }
        },
        PacketType::AudioBatch => {
            let samples: Vec<f32> = payload
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
                .collect();
            client.inbound_audio_producer.lock().write(&samples);
        }
        PacketType::SizeUpdate => {
            if let Ok((w, h)) = packet::parse_size_update(payload) {
                client.width_cells.store(w, Ordering::Relaxed);
                client.height_cells.store(h, Ordering::Relaxed);
            }
        }
        PacketType::Ping => {
            client.outbound_video.enqueue(QueuedPacket {
                header: PacketHeader::new(PacketType::Pong as u16, 0, 0, client.id),
                payload: PayloadHandle::Owned(Vec::new()),
            });
        }
        PacketType::Pong => {
            // liveness recorded implicitly: any successful recv resets the timeout clock.
        }
        _ => {} // unknown/unexpected type: ignore and continue per spec §4.4
    }
}

/// Receive task body: loop until transport error, EOF, or shutdown.
pub fn run_receive_task(client: Arc<ClientInfo>) {
    loop {
        if client.shutting_down.load(Ordering::Acquire) {
            break;
        }
        let recv_result = client.reader.lock().recv(STEADY_STATE_RECV_TIMEOUT);
        let frame = match recv_result {
            Ok(frame) => frame,
            Err(AcipError::Timeout(_)) => {
                if send_ping(&client).is_err() {
                    client.active.store(false, Ordering::Release);
                    break;
                }
                continue;
            }
            Err(_) => {
                client.active.store(false, Ordering::Release);
                break;
            }
        };

        let ptype = match PacketType::from_u16(frame.header.ptype) {
            Some(t) => t,
            None => continue,
        };

        if dispatch_table::validate(ptype, frame.payload.len() as u32, true).is_err() {
            send_error(&client, wire_code::PROTOCOL, "protocol violation");
            client.active.store(false, Ordering::Release);
            break;
        }

        if ptype == PacketType::Encrypted {
            match decrypt_inbound(&client, &frame.header, &frame.payload) {
                Ok((inner_header, inner_payload)) => {
                    if let Some(inner_type) = PacketType::from_u16(inner_header.ptype) {
                        handle_packet(&client, inner_type, &inner_payload);
                    }
                }
                Err(_) => {
                    send_error(&client, wire_code::CRYPTO, "decrypt failed");
                    client.active.store(false, Ordering::Release);
                    break;
                }
            }
        } else {
            if crate::protocol::crc::crc32(&frame.payload) != frame.header.crc32 {
                send_error(&client, wire_code::PROTOCOL, "crc mismatch");
                client.active.store(false, Ordering::Release);
                break;
            }
            handle_packet(&client, ptype, &frame.payload);
        }
    }
    // Slot teardown happens in the reaper loop, not here (spec §4.4: avoids
    // use-after-free races against the broadcast fan-out).
}

/// Send task body: audio drained preferentially over video (spec §4.3 ordering).
pub fn run_send_task(client: Arc<ClientInfo>) {
    client.send_thread_running.store(true, Ordering::Release);
    loop {
        if let Some(queued) = client.outbound_audio.dequeue() {
            if write_queued(&client, queued).is_err() {
                break;
            }
            continue;
        }
        if let Some(queued) = client.outbound_video.dequeue() {
            if write_queued(&client, queued).is_err() {
                break;
            }
            continue;
        }
        if client.shutting_down.load(Ordering::Acquire)
            && client.outbound_audio.is_empty()
            && client.outbound_video.is_empty()
        {
            break;
        }
        std::thread::sleep(SEND_QUEUE_POLL);
    }
    client.send_thread_running.store(false, Ordering::Release);
}

/// Apply the transport-aware encryption policy (spec §4.1) before
/// writing: plaintext if the transport already encrypts the stream
/// (TLS), otherwise wrap in an `ENCRYPTED` packet under the session's
/// per-direction AEAD key and nonce counter.
fn write_queued(client: &ClientInfo, queued: QueuedPacket) -> Result<(), ()> {
    let inner_payload = queued.payload.as_slice();
    let transport_encrypts = client.writer.lock().provides_encryption();

    let send_result = if transport_encrypts {
        client.writer.lock().send(&queued.header, inner_payload)
    } else {
        match seal_outbound(client, &queued.header, inner_payload) {
            Ok((outer_header, wrapper)) => client.writer.lock().send(&outer_header, &wrapper),
            Err(_) => Err(AcipError::Crypto(crate::errors::CryptoError::CounterExhausted)),
        }
    };

    if send_result.is_err() {
        client.active.store(false, Ordering::Release);
        return Err(());
    }
    client.counters.frames_sent.fetch_add(1, Ordering::Relaxed);
    Ok(())
}

/// Build the `ENCRYPTED` wrapper for one outbound packet: nonce, AEAD
/// seal of `inner_header || inner_payload`, then the outer header whose
/// CRC32 covers the wrapper bytes.
fn seal_outbound(client: &ClientInfo, inner_header: &PacketHeader, inner_payload: &[u8]) -> Result<(PacketHeader, Vec<u8>), AcipError> {
    let mut plaintext = Vec::with_capacity(HEADER_SIZE + inner_payload.len());
    plaintext.extend_from_slice(&inner_header.encode());
    plaintext.extend_from_slice(inner_payload);

    // AEAD ciphertext length is deterministic (plaintext len + 16-byte
    // tag), so the wrapper's payload_length is known before sealing and
    // the AAD can include it without any encrypt-then-patch circularity.
    const TAG_SIZE: usize = 16;
    let wrapper_len = (24 + plaintext.len() + TAG_SIZE) as u32;
    let provisional_outer = PacketHeader::new(PacketType::Encrypted as u16, wrapper_len, 0, client.id);
    let (nonce, _counter) = client
        .crypto
        .send_counter
        .lock()
        .next_send_nonce()
        .map_err(AcipError::Crypto)?;
    let aad = aead::header_aad(&provisional_outer);
    let ciphertext = aead::seal(&client.crypto.s2c_key, &nonce, &plaintext, &aad);

    let mut wrapper = Vec::with_capacity(24 + ciphertext.len());
    wrapper.extend_from_slice(&nonce);
    wrapper.extend_from_slice(&ciphertext);

    let outer_header = PacketHeader::new(
        PacketType::Encrypted as u16,
        wrapper.len() as u32,
        crate::protocol::crc::crc32(&wrapper),
        client.id,
    );
    Ok((outer_header, wrapper))
}
