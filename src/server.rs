//! Accept/reaper loop and top-level wiring (spec §4.8 state machine,
//! §6.2): a non-blocking listener polled in a loop, one thread spawned
//! per accepted connection to run the identity handshake before the
//! client is admitted, and a periodic sweep that reaps dead entries.
//! The broadcast and mixer threads are server-wide singletons, not
//! per-client.

use crate::broadcast::{run_broadcast_loop, run_mixer_loop};
use crate::client::info::CryptoSession;
use crate::client::tasks::{run_receive_task, run_send_task};
use crate::client::{ClientInfo, ClientManager};
use crate::config::Config;
use crate::crypto::auth::AuthPolicy;
use crate::crypto::handshake::ServerHandshake;
use crate::errors::{wire_code, AcipError};
use crate::protocol::dispatch_table;
use crate::protocol::packet::{self, PacketType};
use crate::protocol::PacketHeader;
use crate::stats::Stats;
use crate::transport::tcp::TcpTransport;
use crate::transport::websocket::WebSocketTransport;
use crate::transport::{RecvFrame, Transport};
use crate::video::ascii::Palette;
use crate::video::CompositorConfig;
use ed25519_dalek::SigningKey;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
const ACCEPT_POLL: Duration = Duration::from_millis(50);
const REAPER_SWEEP: Duration = Duration::from_millis(500);

pub struct Server {
    pub config: Config,
    pub manager: Arc<ClientManager>,
    pub stats: Arc<Stats>,
    identity: Arc<SigningKey>,
    auth_policy: Arc<AuthPolicy>,
    shutdown: Arc<AtomicBool>,
}

impl Server {
    /// Load the server's identity key and auth policy (spec §6.2 exit
    /// code `4` on failure), build the bounded client table.
    pub fn new(config: Config) -> Result<Self, AcipError> {
        let identity = load_or_generate_identity(&config)?;
        let auth_policy = build_auth_policy(&config)?;
        Ok(Self {
            manager: Arc::new(ClientManager::new(config.max_clients)),
            stats: Arc::new(Stats::default()),
            identity: Arc::new(identity),
            auth_policy: Arc::new(auth_policy),
            shutdown: Arc::new(AtomicBool::new(false)),
            config,
        })
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Bind the TCP and WebSocket listeners (spec §6.2 exit code `3` on
    /// bind failure) and run until `shutdown` is set. Spawns the
    /// broadcast, mixer, and reaper threads; blocks the calling thread
    /// in the TCP accept loop.
    pub fn run(&self) -> Result<(), AcipError> {
        let tcp_listener = TcpListener::bind(("0.0.0.0", self.config.tcp_port)).map_err(AcipError::Io)?;
        tcp_listener.set_nonblocking(true).map_err(AcipError::Io)?;
        let ws_listener = TcpListener::bind(("0.0.0.0", self.config.ws_port)).map_err(AcipError::Io)?;
        ws_listener.set_nonblocking(true).map_err(AcipError::Io)?;
        info!(target: "server", tcp_port = self.config.tcp_port, ws_port = self.config.ws_port, "listening");

        let palette = Palette::new(self.config.palette.chars().collect());
        let (wr, wg, wb) = self.config.luminance_weights;
        let compositor_config = CompositorConfig {
            resize_mode: self.config.grid_resize_mode.into(),
            color_mode: self.config.color_mode.into(),
            compression_ratio_threshold: self.config.compression_ratio_threshold,
            luminance_weights: crate::video::ascii::LuminanceWeights { r: wr, g: wg, b: wb },
            ..Default::default()
        };

        {
            let manager = self.manager.clone();
            let stats = self.stats.clone();
            let shutdown = self.shutdown.clone();
            let target_fps = self.config.target_fps;
            std::thread::spawn(move || run_broadcast_loop(manager, stats, compositor_config, palette, target_fps, shutdown));
        }
        {
            let manager = self.manager.clone();
            let shutdown = self.shutdown.clone();
            std::thread::spawn(move || run_mixer_loop(manager, shutdown));
        }
        {
            let manager = self.manager.clone();
            let stats = self.stats.clone();
            let shutdown = self.shutdown.clone();
            std::thread::spawn(move || run_reaper_loop(manager, stats, shutdown));
        }
        {
            let manager = self.manager.clone();
            let stats = self.stats.clone();
            let identity = self.identity.clone();
            let auth_policy = self.auth_policy.clone();
            let shutdown = self.shutdown.clone();
            std::thread::spawn(move || run_ws_accept_loop(ws_listener, manager, stats, identity, auth_policy, shutdown));
        }

        run_tcp_accept_loop(tcp_listener, self.manager.clone(), self.stats.clone(), self.identity.clone(), self.auth_policy.clone(), self.shutdown.clone());
        Ok(())
    }
}

fn load_or_generate_identity(config: &Config) -> Result<SigningKey, AcipError> {
    match &config.identity_key {
        Some(path) => {
            let bytes = std::fs::read(path).map_err(AcipError::Io)?;
            let seed: [u8; 32] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| AcipError::Fatal("identity key file must hold a 32-byte seed".into()))?;
            Ok(SigningKey::from_bytes(&seed))
        }
        None => {
            warn!(target: "server", "no identity_key configured, generating an ephemeral server identity");
            Ok(SigningKey::generate(&mut rand::rngs::OsRng))
        }
    }
}

fn build_auth_policy(config: &Config) -> Result<AuthPolicy, AcipError> {
    if let Some(whitelist_path) = &config.client_whitelist {
        let keys = crate::crypto::keys::load_key_set(whitelist_path).map_err(AcipError::Io)?;
        return Ok(AuthPolicy::Whitelist(keys));
    }
    if let Some(password) = &config.password {
        return Ok(AuthPolicy::Password { expected_hash: crate::crypto::auth::hash_password(password) });
    }
    Ok(AuthPolicy::AllowAny)
}

fn run_tcp_accept_loop(
    listener: TcpListener,
    manager: Arc<ClientManager>,
    stats: Arc<Stats>,
    identity: Arc<SigningKey>,
    auth_policy: Arc<AuthPolicy>,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, addr)) => {
                let manager = manager.clone();
                let stats = stats.clone();
                let identity = identity.clone();
                let auth_policy = auth_policy.clone();
                std::thread::spawn(move || admit_tcp(stream, addr, manager, stats, identity, auth_policy));
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => std::thread::sleep(ACCEPT_POLL),
            Err(e) => {
                warn!(target: "server", error = %e, "tcp accept error");
                std::thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

fn run_ws_accept_loop(
    listener: TcpListener,
    manager: Arc<ClientManager>,
    stats: Arc<Stats>,
    identity: Arc<SigningKey>,
    auth_policy: Arc<AuthPolicy>,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, addr)) => {
                let manager = manager.clone();
                let stats = stats.clone();
                let identity = identity.clone();
                let auth_policy = auth_policy.clone();
                std::thread::spawn(move || admit_websocket(stream, addr, manager, stats, identity, auth_policy));
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => std::thread::sleep(ACCEPT_POLL),
            Err(e) => {
                warn!(target: "server", error = %e, "websocket accept error");
                std::thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

fn admit_tcp(stream: TcpStream, addr: std::net::SocketAddr, manager: Arc<ClientManager>, stats: Arc<Stats>, identity: Arc<SigningKey>, auth_policy: Arc<AuthPolicy>) {
    let transport = match TcpTransport::new(stream, false) {
        Ok(t) => Box::new(t) as Box<dyn Transport>,
        Err(e) => {
            warn!(target: "server", %addr, error = %e, "tcp transport setup failed");
            return;
        }
    };
    admit(transport, addr.to_string(), manager, stats, identity, auth_policy);
}

fn admit_websocket(stream: TcpStream, addr: std::net::SocketAddr, manager: Arc<ClientManager>, stats: Arc<Stats>, identity: Arc<SigningKey>, auth_policy: Arc<AuthPolicy>) {
    stream.set_nonblocking(false).ok();
    let socket = match tungstenite::accept(stream) {
        Ok(s) => s,
        Err(e) => {
            warn!(target: "server", %addr, error = %e, "websocket upgrade failed");
            return;
        }
    };
    let transport = match WebSocketTransport::new(socket, false) {
        Ok(t) => Box::new(t) as Box<dyn Transport>,
        Err(e) => {
            warn!(target: "server", %addr, error = %e, "websocket transport setup failed");
            return;
        }
    };
    admit(transport, addr.to_string(), manager, stats, identity, auth_policy);
}

/// Run the handshake over a freshly-accepted transport, then admit the
/// client into the table and spawn its receive/send tasks (spec §4.5,
/// §4.8 `Accepted -> HandshakeInProgress -> Joined`).
fn admit(mut transport: Box<dyn Transport>, addr: String, manager: Arc<ClientManager>, stats: Arc<Stats>, identity: Arc<SigningKey>, auth_policy: Arc<AuthPolicy>) {
    let handshake = ServerHandshake::new((*identity).clone());

    let hello_frame = match recv_handshake_packet(transport.as_mut(), PacketType::HandshakeHello) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(target: "server", %addr, error = %e, "handshake HELLO failed");
            stats.record_handshake_failure();
            return;
        }
    };

    let (response_bytes, session_keys, client_identity) = match handshake.respond(&hello_frame.payload, &auth_policy) {
        Ok(v) => v,
        Err(e) => {
            warn!(target: "server", %addr, error = %e, "handshake HELLO rejected");
            stats.record_handshake_failure();
            return;
        }
    };

    let response_header = PacketHeader::new(PacketType::HandshakeResponse as u16, response_bytes.len() as u32, crate::protocol::crc::crc32(&response_bytes), 0);
    if transport.send(&response_header, &response_bytes).is_err() {
        stats.record_handshake_failure();
        return;
    }

    let finish_frame = match recv_handshake_packet(transport.as_mut(), PacketType::HandshakeFinish) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(target: "server", %addr, error = %e, "handshake FINISH failed");
            stats.record_handshake_failure();
            return;
        }
    };
    if handshake.verify_finish(&finish_frame.payload, &client_identity).is_err() {
        warn!(target: "server", %addr, "handshake FINISH signature rejected");
        stats.record_handshake_failure();
        return;
    }

    if manager.is_full() {
        warn!(target: "server", %addr, "server full, rejecting client after handshake");
        send_error_unauthenticated(transport.as_mut(), wire_code::SERVER_FULL, "server full");
        return;
    }

    let (reader, writer) = match transport.split() {
        Ok(halves) => halves,
        Err(e) => {
            warn!(target: "server", %addr, error = %e, "failed to split transport into reader/writer halves");
            return;
        }
    };

    let id = manager.allocate_id();
    let crypto = CryptoSession::new(session_keys.c2s, session_keys.s2c);
    let client_info = ClientInfo::new(id, reader, writer, crypto);
    let client = match manager.insert(client_info) {
        Ok(client) => client,
        Err(_) => {
            warn!(target: "server", %addr, "server filled between check and insert");
            return;
        }
    };
    stats.record_client_accepted();
    info!(target: "server", %addr, client_id = id, "client joined");

    let recv_client = client.clone();
    std::thread::spawn(move || run_receive_task(recv_client));
    let send_client = client.clone();
    std::thread::spawn(move || run_send_task(send_client));
}

fn recv_handshake_packet(transport: &mut dyn Transport, expected: PacketType) -> Result<RecvFrame, AcipError> {
    let frame = transport.recv(HANDSHAKE_TIMEOUT)?;
    let ptype = PacketType::from_u16(frame.header.ptype)
        .ok_or_else(|| AcipError::Protocol("unknown packet type during handshake".into()))?;
    if ptype != expected {
        return Err(AcipError::Protocol(format!("expected {expected:?} during handshake, got {ptype:?}")));
    }
    dispatch_table::validate(ptype, frame.payload.len() as u32, false).map_err(AcipError::Protocol)?;
    Ok(frame)
}

fn send_error_unauthenticated(transport: &mut dyn Transport, code: u32, message: &str) {
    let payload = packet::encode_error(code, message);
    let header = PacketHeader::new(PacketType::Error as u16, payload.len() as u32, crate::protocol::crc::crc32(&payload), 0);
    let _ = transport.send(&header, &payload);
}

/// Reaper loop (spec §4.8 `Closing -> Dead`): a client is dead once its
/// `active` flag is false and both of its tasks have stopped running.
fn run_reaper_loop(manager: Arc<ClientManager>, stats: Arc<Stats>, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::Acquire) {
        let reaped = manager.reap_dead(|client| {
            if client.active.load(Ordering::Acquire) {
                return false;
            }
            client.begin_shutdown();
            !client.send_thread_running.load(Ordering::Acquire)
        });
        for id in reaped {
            stats.record_client_reaped();
            info!(target: "server", client_id = id, "client reaped");
        }
        std::thread::sleep(REAPER_SWEEP);
    }
}
