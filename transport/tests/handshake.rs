//! End-to-end exercises of `TransportProtocol::connect` against a hand-rolled fake
//! server, communicating over an in-memory duplex pipe instead of a real socket.
//!
//! The fake server below runs exactly one curve25519-sha256 key exchange by hand --
//! using the same exchange-hash construction and six-key derivation the client-side
//! code in `kex/curve25519.rs` and `kex/mod.rs` implements -- since those are the
//! functions under test and can't be borrowed by the harness that exercises them.

use std::io::{self, Read, Write};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use digest::Digest;
use rand::RngCore;
use signature::{SignatureEncoding, Signer};
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey};

use ssh_transport::algorithm::{AlgoSet, Cipher, CompressionAlgorithm, Mac};
use ssh_transport::buffer::PacketBuffer;
use ssh_transport::codec::{self, DirectionState};
use ssh_transport::message::{id, KexInit, NewKeys, ServiceAccept, ServiceRequest};
use ssh_transport::{
    AcceptAll, ClientConfig, CryptoContext, Decode, DisconnectReason, Encode, Error, HostKeyVerifier,
    KexPreferences, LifecycleState, Pinned, Result, TransportProtocol,
};

struct PipeReader(mpsc::Receiver<Vec<u8>>, Vec<u8>);
struct PipeWriter(mpsc::SyncSender<Vec<u8>>);

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.1.is_empty() {
            match self.0.recv() {
                Ok(chunk) => self.1 = chunk,
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.1.len());
        buf[..n].copy_from_slice(&self.1[..n]);
        self.1.drain(..n);
        Ok(n)
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A full-duplex in-memory socket pair: `(client half, server half)`.
fn duplex() -> ((PipeReader, PipeWriter), (PipeReader, PipeWriter)) {
    let (c2s_tx, c2s_rx) = mpsc::sync_channel(64);
    let (s2c_tx, s2c_rx) = mpsc::sync_channel(64);
    (
        (PipeReader(s2c_rx, Vec::new()), PipeWriter(c2s_tx)),
        (PipeReader(c2s_rx, Vec::new()), PipeWriter(s2c_tx)),
    )
}

fn read_line(reader: &mut impl Read) -> io::Result<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        reader.read_exact(&mut byte)?;
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
    }
    Ok(String::from_utf8_lossy(&line).trim_end_matches('\r').to_string())
}

fn sha256(data: &[u8]) -> Vec<u8> {
    let mut h = sha2::Sha256::new();
    h.update(data);
    h.finalize().to_vec()
}

fn concat(parts: &[&[u8]]) -> Vec<u8> {
    let mut v = Vec::new();
    for p in parts {
        v.extend_from_slice(p);
    }
    v
}

/// Replicates `kex::derive_one` (`HASH(K || H || letter || session_id)`, extended),
/// which is private to the crate and so unreachable from here.
fn derive_one(k_encoded: &[u8], h: &[u8], letter: u8, session_id: &[u8], size: usize) -> Vec<u8> {
    if size == 0 {
        return Vec::new();
    }
    let mut material = sha256(&concat(&[k_encoded, h, &[letter], session_id]));
    while material.len() < size {
        let next = sha256(&concat(&[k_encoded, h, &material]));
        material.extend_from_slice(&next);
    }
    material.truncate(size);
    material
}

struct Derived {
    iv: Vec<u8>,
    key: Vec<u8>,
    mac: Vec<u8>,
}

fn derive_direction(k_encoded: &[u8], h: &[u8], letters: (u8, u8, u8), algo: &AlgoSet) -> Derived {
    let (iv_l, key_l, mac_l) = letters;
    Derived {
        iv: derive_one(k_encoded, h, iv_l, h, algo.cipher.iv_size()),
        key: derive_one(k_encoded, h, key_l, h, algo.cipher.key_size()),
        mac: derive_one(k_encoded, h, mac_l, h, algo.mac.key_size()),
    }
}

/// A `KEXINIT` whose name-lists mirror `KexPreferences::default()` exactly, so that
/// negotiation (first client entry present on the server wins, per slot) lands
/// deterministically on curve25519-sha256 / ssh-ed25519 / aes128-ctr / hmac-sha2-256 /
/// none against the client's own default preferences.
fn default_kexinit(rng: &mut impl RngCore) -> KexInit {
    let mut cookie = [0u8; 16];
    rng.fill_bytes(&mut cookie);
    let prefs = KexPreferences::default();

    KexInit {
        cookie,
        kex_algorithms: prefs.kex,
        server_host_key_algorithms: prefs.host_key,
        encryption_algorithms_client_to_server: prefs.ciphers.clone(),
        encryption_algorithms_server_to_client: prefs.ciphers,
        mac_algorithms_client_to_server: prefs.macs.clone(),
        mac_algorithms_server_to_client: prefs.macs,
        compression_algorithms_client_to_server: prefs.compressions.clone(),
        compression_algorithms_server_to_client: prefs.compressions,
        languages_client_to_server: Vec::new(),
        languages_server_to_client: Vec::new(),
        first_kex_packet_follows: false,
    }
}

struct ServerSession {
    tx: DirectionState,
    rx: DirectionState,
    session_id: Vec<u8>,
}

/// The server side of one curve25519-sha256 key exchange, by hand: version exchange,
/// `KEXINIT`, the ECDH follow-up signed by a fresh ephemeral host key, and `NEWKEYS`.
fn run_server_kex(
    reader: &mut PipeReader,
    writer: &mut PipeWriter,
    banner_prefix: Option<&str>,
    server_software: &str,
) -> std::result::Result<ServerSession, String> {
    if let Some(comment) = banner_prefix {
        writer
            .write_all(format!("{comment}\r\n").as_bytes())
            .map_err(|e| e.to_string())?;
    }
    let server_id = format!("SSH-2.0-{server_software}");
    writer
        .write_all(format!("{server_id}\r\n").as_bytes())
        .map_err(|e| e.to_string())?;
    writer.flush().map_err(|e| e.to_string())?;
    let client_id = read_line(reader).map_err(|e| e.to_string())?;

    let mut rng = rand::thread_rng();
    let mut tx = DirectionState::new_outbound();
    let mut rx = DirectionState::new_inbound();

    let server_kexinit = default_kexinit(&mut rng);
    let i_s = server_kexinit.encode().readable().to_vec();
    codec::send(writer, &mut tx, false, &mut rng, &server_kexinit).map_err(|e| e.to_string())?;

    let client_kexinit_raw = codec::Decoder::decode(reader, &mut rx, false).map_err(|e| e.to_string())?;
    let i_c = client_kexinit_raw.payload.clone();

    let ecdh_init = codec::Decoder::decode(reader, &mut rx, false).map_err(|e| e.to_string())?;
    let mut buf = ecdh_init.buffer();
    let _msg_id = buf.get_u8().map_err(|e| e.to_string())?;
    let q_c_raw = buf.get_bytes().map_err(|e| e.to_string())?;
    let q_c_bytes: [u8; 32] = q_c_raw
        .as_slice()
        .try_into()
        .map_err(|_| "client curve25519 public value has the wrong length".to_string())?;
    let q_c = X25519PublicKey::from(q_c_bytes);

    let e_s = EphemeralSecret::random_from_rng(&mut rng);
    let q_s = X25519PublicKey::from(&e_s);
    let shared = e_s.diffie_hellman(&q_c);

    let mut k_buf = PacketBuffer::new();
    k_buf.put_biguint(&num_bigint::BigUint::from_bytes_be(shared.as_bytes()));
    let k_encoded = k_buf.into_vec();

    let host_key = ssh_key::PrivateKey::random(&mut rand::thread_rng(), ssh_key::Algorithm::Ed25519)
        .map_err(|e| e.to_string())?;
    let host_key_blob = host_key.public_key().to_bytes().map_err(|e| e.to_string())?;

    let mut hash_input = PacketBuffer::new();
    hash_input
        .put_str(&client_id)
        .put_str(&server_id)
        .put_bytes(&i_c)
        .put_bytes(&i_s)
        .put_bytes(&host_key_blob)
        .put_bytes(q_c.as_bytes())
        .put_bytes(q_s.as_bytes());
    hash_input.extend_writable(&k_encoded);
    let exchange_hash = sha256(hash_input.as_full_slice());

    let signature: ssh_key::Signature = Signer::sign(&host_key, &exchange_hash);
    let signature_blob = signature.to_vec();

    let mut reply = PacketBuffer::with_headroom(5);
    reply
        .put_u8(id::KEX_FOLLOWUP_31)
        .put_bytes(&host_key_blob)
        .put_bytes(q_s.as_bytes())
        .put_bytes(&signature_blob);
    let sealed = codec::Encoder::encode(reply.readable(), &mut tx, false, &mut rng).map_err(|e| e.to_string())?;
    codec::write_sealed(writer, &sealed).map_err(|e| e.to_string())?;

    let negotiated = AlgoSet {
        cipher: Cipher::Aes128Ctr,
        mac: Mac::HmacSha256,
        compression: CompressionAlgorithm::None,
    };
    let server_to_client = derive_direction(&k_encoded, &exchange_hash, (b'B', b'D', b'F'), &negotiated);
    let client_to_server = derive_direction(&k_encoded, &exchange_hash, (b'A', b'C', b'E'), &negotiated);

    codec::send(writer, &mut tx, false, &mut rng, &NewKeys).map_err(|e| e.to_string())?;
    tx.install(
        negotiated.clone(),
        server_to_client.key,
        server_to_client.iv,
        server_to_client.mac,
        false,
    );

    let _: NewKeys = codec::recv(reader, &mut rx, false).map_err(|e| e.to_string())?;
    rx.install(negotiated, client_to_server.key, client_to_server.iv, client_to_server.mac, false);

    Ok(ServerSession {
        tx,
        rx,
        session_id: exchange_hash,
    })
}

type ServerResult = std::result::Result<ServerSession, String>;

/// Spins up a fake server on a background thread that runs the key exchange and then
/// handles exactly one `SERVICE_REQUEST`/`ACCEPT` round, and drives
/// `TransportProtocol::connect` against it on the calling thread.
fn connect_pair(
    banner_prefix: Option<&'static str>,
    server_software: &'static str,
    verifier: Box<dyn HostKeyVerifier>,
) -> (Result<Arc<TransportProtocol>>, thread::JoinHandle<ServerResult>) {
    let ((client_reader, client_writer), (mut server_reader, mut server_writer)) = duplex();

    let server = thread::spawn(move || -> ServerResult {
        let mut session = run_server_kex(&mut server_reader, &mut server_writer, banner_prefix, server_software)?;

        let raw = codec::Decoder::decode(&mut server_reader, &mut session.rx, false).map_err(|e| e.to_string())?;
        let request = ServiceRequest::decode(raw.buffer()).map_err(|e| e.to_string())?;

        let mut rng = rand::thread_rng();
        codec::send(
            &mut server_writer,
            &mut session.tx,
            false,
            &mut rng,
            &ServiceAccept {
                service_name: request.service_name,
            },
        )
        .map_err(|e| e.to_string())?;

        Ok(session)
    });

    let mut crypto = CryptoContext::default();
    crypto.add_host_key_verifier(verifier);
    let config = Arc::new(ClientConfig::builder().software_version("test-client_1.0").build());

    let transport = TransportProtocol::connect(
        Box::new(client_reader),
        Box::new(client_writer),
        "example.invalid".to_string(),
        config,
        crypto,
    );

    (transport, server)
}

#[test]
fn full_handshake_then_service_request_round_trip() {
    let (transport, server) = connect_pair(None, "OpenSSH_9.3-fake", Box::new(AcceptAll));
    let transport = transport.expect("handshake should complete");

    transport
        .request_service("ssh-connection", Some(Duration::from_secs(5)))
        .expect("service request should be accepted");

    assert_eq!(transport.state(), LifecycleState::Running);
    assert_eq!(transport.client_id(), "SSH-2.0-test-client_1.0");
    assert_eq!(transport.server_id(), "SSH-2.0-OpenSSH_9.3-fake");

    let session = server
        .join()
        .expect("server thread panicked")
        .expect("server kex/service handling failed");
    assert_eq!(transport.session_id().unwrap(), session.session_id);

    transport.disconnect(DisconnectReason::ByApplication, "test complete").unwrap();
    transport.join();
}

#[test]
fn version_exchange_skips_a_leading_banner_line() {
    let (transport, server) = connect_pair(
        Some("This line is not part of the SSH protocol"),
        "OpenSSH_9.3-fake",
        Box::new(AcceptAll),
    );
    let transport = transport.expect("handshake should complete despite a leading banner line");

    transport
        .request_service("ssh-connection", Some(Duration::from_secs(5)))
        .expect("service request should be accepted");
    assert_eq!(transport.server_id(), "SSH-2.0-OpenSSH_9.3-fake");

    server
        .join()
        .expect("server thread panicked")
        .expect("server kex/service handling failed");
    transport.disconnect(DisconnectReason::ByApplication, "test complete").unwrap();
    transport.join();
}

#[test]
fn host_key_rejected_by_every_verifier_fails_connect() {
    let (transport, _server) = connect_pair(None, "OpenSSH_9.3-fake", Box::new(Pinned(vec![])));
    let err = transport.expect_err("a host key matching no pinned entry must be rejected");
    assert!(matches!(err, Error::HostKeyNotVerifiable));
}

#[test]
fn mac_tamper_after_kex_fails_the_pending_request_and_kills_the_transport() {
    let ((client_reader, client_writer), (mut server_reader, mut server_writer)) = duplex();

    let server = thread::spawn(move || -> std::result::Result<(), String> {
        let mut session = run_server_kex(&mut server_reader, &mut server_writer, None, "OpenSSH_9.3-fake")?;

        let raw = codec::Decoder::decode(&mut server_reader, &mut session.rx, false).map_err(|e| e.to_string())?;
        let request = ServiceRequest::decode(raw.buffer()).map_err(|e| e.to_string())?;

        let mut rng = rand::thread_rng();
        let mut sealed = codec::Encoder::encode(
            ServiceAccept {
                service_name: request.service_name,
            }
            .encode()
            .readable(),
            &mut session.tx,
            false,
            &mut rng,
        )
        .map_err(|e| e.to_string())?;
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        codec::write_sealed(&mut server_writer, &sealed).map_err(|e| e.to_string())?;

        Ok(())
    });

    let mut crypto = CryptoContext::default();
    crypto.add_host_key_verifier(Box::new(AcceptAll));
    let config = Arc::new(ClientConfig::builder().software_version("test-client_1.0").build());

    let transport = TransportProtocol::connect(
        Box::new(client_reader),
        Box::new(client_writer),
        "example.invalid".to_string(),
        config,
        crypto,
    )
    .expect("initial handshake should complete");

    let err = transport
        .request_service("ssh-connection", Some(Duration::from_secs(5)))
        .expect_err("a corrupted MAC on the reply should fail the pending request");
    assert!(matches!(err, Error::MacMismatch));
    assert_eq!(transport.state(), LifecycleState::Dead);

    server.join().expect("server thread panicked").unwrap();
}
