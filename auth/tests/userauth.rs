//! End-to-end exercises of [`ssh_transport_auth::UserAuthService::authenticate`] against
//! a hand-rolled fake server, reusing the same curve25519-sha256 key-exchange-by-hand
//! approach as `ssh-transport`'s own handshake tests, then layering a scripted
//! `ssh-userauth` exchange on top.

use std::io::{self, Read, Write};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use digest::Digest;
use rand::RngCore;
use signature::Signer;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey};

use ssh_transport::algorithm::{AlgoSet, Cipher, CompressionAlgorithm, Mac};
use ssh_transport::buffer::PacketBuffer;
use ssh_transport::codec::{self, DirectionState};
use ssh_transport::message::{id, KexInit, NewKeys, ServiceAccept, ServiceRequest};
use ssh_transport::{AcceptAll, ClientConfig, CryptoContext, Decode, Encode, KexPreferences, TransportProtocol};

use ssh_transport_auth::message::id as auth_id;
use ssh_transport_auth::{Password, UserAuthError, UserAuthService};

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
}

type StrResult<T> = std::result::Result<T, String>;

fn run_server_kex(reader: &mut PipeReader, writer: &mut PipeWriter) -> StrResult<ServerSession> {
    let server_id = "SSH-2.0-OpenSSH_9.3-fake";
    writer.write_all(format!("{server_id}\r\n").as_bytes()).map_err(|e| e.to_string())?;
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

    let host_key = ssh_key::PrivateKey::random(&mut rand::thread_rng(), ssh_key::Algorithm::Ed25519).map_err(|e| e.to_string())?;
    let host_key_blob = host_key.public_key().to_bytes().map_err(|e| e.to_string())?;

    let mut hash_input = PacketBuffer::new();
    hash_input
        .put_str(&client_id)
        .put_str(server_id)
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
    tx.install(negotiated.clone(), server_to_client.key, server_to_client.iv, server_to_client.mac, false);

    let _: NewKeys = codec::recv(reader, &mut rx, false).map_err(|e| e.to_string())?;
    rx.install(negotiated, client_to_server.key, client_to_server.iv, client_to_server.mac, false);

    Ok(ServerSession { tx, rx })
}

/// `UserAuthFailure`/`UserAuthSuccess` only implement [`Decode`] in the production
/// crate (the client never needs to send them); the fake server hand-builds their wire
/// form instead.
fn send_raw(
    writer: &mut PipeWriter,
    tx: &mut DirectionState,
    rng: &mut impl RngCore,
    f: impl FnOnce(&mut PacketBuffer),
) -> StrResult<()> {
    let mut buf = PacketBuffer::with_headroom(5);
    f(&mut buf);
    let sealed = codec::Encoder::encode(buf.readable(), tx, false, rng).map_err(|e| e.to_string())?;
    codec::write_sealed(writer, &sealed).map_err(|e| e.to_string())
}

fn send_userauth_failure(
    writer: &mut PipeWriter,
    tx: &mut DirectionState,
    rng: &mut impl RngCore,
    continue_with: &[&str],
    partial_success: bool,
) -> StrResult<()> {
    let continue_with: Vec<String> = continue_with.iter().map(|s| s.to_string()).collect();
    send_raw(writer, tx, rng, |buf| {
        buf.put_u8(auth_id::USERAUTH_FAILURE).put_namelist(&continue_with).put_bool(partial_success);
    })
}

fn send_userauth_success(writer: &mut PipeWriter, tx: &mut DirectionState, rng: &mut impl RngCore) -> StrResult<()> {
    send_raw(writer, tx, rng, |buf| {
        buf.put_u8(auth_id::USERAUTH_SUCCESS);
    })
}

struct FakeRequest {
    method_name: String,
}

fn read_userauth_request(reader: &mut PipeReader, rx: &mut DirectionState) -> StrResult<FakeRequest> {
    let raw = codec::Decoder::decode(reader, rx, false).map_err(|e| e.to_string())?;
    let mut buf = raw.buffer();
    let msg_id = buf.get_u8().map_err(|e| e.to_string())?;
    if msg_id != auth_id::USERAUTH_REQUEST {
        return Err(format!("expected USERAUTH_REQUEST, got message id {msg_id}"));
    }
    let _username = buf.get_string().map_err(|e| e.to_string())?;
    let _service_name = buf.get_string().map_err(|e| e.to_string())?;
    let method_name = buf.get_string().map_err(|e| e.to_string())?;
    Ok(FakeRequest { method_name })
}

/// Runs the `ssh-userauth` service-request handshake, then one `none` probe followed by
/// as many `password` rounds as `password` dictates, replying `FAILURE`/`SUCCESS`
/// accordingly.
fn run_fake_userauth_server(
    reader: &mut PipeReader,
    writer: &mut PipeWriter,
    session: &mut ServerSession,
    accept_password: Option<&str>,
) -> StrResult<()> {
    let raw = codec::Decoder::decode(reader, &mut session.rx, false).map_err(|e| e.to_string())?;
    let request = ServiceRequest::decode(raw.buffer()).map_err(|e| e.to_string())?;
    let mut rng = rand::thread_rng();
    codec::send(
        writer,
        &mut session.tx,
        false,
        &mut rng,
        &ServiceAccept {
            service_name: request.service_name,
        },
    )
    .map_err(|e| e.to_string())?;

    loop {
        let attempt = read_userauth_request(reader, &mut session.rx)?;

        match attempt.method_name.as_str() {
            "none" => {
                send_userauth_failure(writer, &mut session.tx, &mut rng, &["password"], false)?;
            }
            "password" => match accept_password {
                Some(_) => {
                    send_userauth_success(writer, &mut session.tx, &mut rng)?;
                    return Ok(());
                }
                None => {
                    send_userauth_failure(writer, &mut session.tx, &mut rng, &[], false)?;
                }
            },
            other => return Err(format!("fake server received an unscripted method: {other}")),
        }
    }
}

#[test]
fn password_succeeds_after_the_none_probe_is_rejected() {
    let ((client_reader, client_writer), (mut server_reader, mut server_writer)) = duplex();

    let server = thread::spawn(move || -> StrResult<()> {
        let mut session = run_server_kex(&mut server_reader, &mut server_writer)?;
        run_fake_userauth_server(&mut server_reader, &mut server_writer, &mut session, Some("hunter2"))
    });

    let mut crypto = CryptoContext::default();
    crypto.add_host_key_verifier(Box::new(AcceptAll));
    let config = std::sync::Arc::new(ClientConfig::builder().software_version("test-client_1.0").build());

    let transport = TransportProtocol::connect(
        Box::new(client_reader),
        Box::new(client_writer),
        "example.invalid".to_string(),
        config,
        crypto,
    )
    .expect("handshake should complete");
    let handle = transport.handle();

    let methods: Vec<Box<dyn ssh_transport_auth::AuthMethod>> = vec![Box::new(Password::new("hunter2"))];
    UserAuthService::authenticate(handle.clone(), "alice", "ssh-connection", methods, Some(Duration::from_secs(5)))
        .expect("password authentication should succeed");

    assert!(handle.is_authenticated());
    server.join().expect("server thread panicked").expect("server-side userauth failed");
}

#[test]
fn methods_exhausted_when_the_server_never_accepts() {
    let ((client_reader, client_writer), (mut server_reader, mut server_writer)) = duplex();

    let server = thread::spawn(move || -> StrResult<()> {
        let mut session = run_server_kex(&mut server_reader, &mut server_writer)?;
        match run_fake_userauth_server(&mut server_reader, &mut server_writer, &mut session, None) {
            Err(e) if e.contains("unscripted method") => Ok(()),
            other => other,
        }
    });

    let mut crypto = CryptoContext::default();
    crypto.add_host_key_verifier(Box::new(AcceptAll));
    let config = std::sync::Arc::new(ClientConfig::builder().software_version("test-client_1.0").build());

    let transport = TransportProtocol::connect(
        Box::new(client_reader),
        Box::new(client_writer),
        "example.invalid".to_string(),
        config,
        crypto,
    )
    .expect("handshake should complete");
    let handle = transport.handle();

    let methods: Vec<Box<dyn ssh_transport_auth::AuthMethod>> = vec![Box::new(Password::new("wrong"))];
    let err = UserAuthService::authenticate(handle.clone(), "alice", "ssh-connection", methods, Some(Duration::from_secs(5)))
        .expect_err("every configured method should eventually fail");

    assert!(matches!(err, UserAuthError::Transport(ssh_transport::Error::ProtocolError(_))));
    assert!(!handle.is_authenticated());

    drop(server);
}
