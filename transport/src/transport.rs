//! `TransportProtocol` (§4.3): owns the socket, the read/write pump threads, the codec
//! direction states and the key-exchanger, and dispatches inbound packets by message id
//! to the key-exchanger or to whichever [`Service`] is currently active.
//!
//! The thread-per-pump model of §5 is implemented literally: a *read pump* thread owns
//! the socket's read half and the inbound [`DirectionState`] exclusively (nothing else
//! ever touches either), decoding and dispatching one packet at a time; a *write pump*
//! thread owns the write half and drains a capacity-1 handoff channel of already-sealed
//! packets in the order they were encoded. The outbound [`DirectionState`] lives behind
//! `tx`, the one lock every writer (application threads, and the pump itself when it
//! re-keys) takes for the whole of one encode -- holding it across `NEWKEYS` installation
//! during a re-key is what makes concurrent application writes block until the new
//! algorithms are live, exactly as prescribed by §5's `writeLock`.
//!
//! One simplification from the letter of §4.3: the initial key exchange runs to
//! completion on the calling thread of [`TransportProtocol::connect`], writing straight
//! to the socket, *before* either pump thread is spawned -- there is no write pump yet to
//! hand sealed bytes to, and no inbound traffic to race against before the first
//! `NEWKEYS`. Re-keys initiated once `Running` are driven entirely by the read pump,
//! which from then on is the only thread ever allowed to read the socket, and which
//! seals its own `KEXINIT`/`NEWKEYS` bytes through the same handoff queue ordinary writes
//! use, since only the write pump still owns the socket's write half at that point.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::codec::{self, Decoder, DirectionState};
use crate::config::ClientConfig;
use crate::crypto_provider::{effective_preferences, CryptoContext, CryptoProvider};
use crate::error::{DisconnectReason, Error, Result};
use crate::host_key::HostKeyVerifier;
use crate::kex::{self, KexOutput};
use crate::message::{
    id, Decode, Disconnect, Encode, KexInit, NewKeys, RawMessage, ServiceAccept, ServiceRequest, Unimplemented,
};
use crate::service::{DispatchOutcome, Service, ServiceDispatcher};
use crate::sync::{Completion, FatalRegistry, Notifiable};

const MAX_IDENTIFICATION_SCAN: usize = 16 * 1024;

/// Lifecycle states of a transport (§3 "Transport state").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Init,
    KexNeeded,
    KexOngoing,
    ServiceRequested,
    Running,
    Dead,
}

/// Either half of a byte stream, type-erased so `TransportProtocol` itself need not be
/// generic over the concrete transport (`TcpStream`, an in-memory duplex pipe in tests).
pub type BoxedReader = Box<dyn Read + Send>;
pub type BoxedWriter = Box<dyn Write + Send>;

/// A cloneable, possibly-detached reference to a transport, handed to the services and
/// channels built on top of it (§3 "Ownership": "Channels hold ... a shared reference to
/// TransportProtocol for writes").
#[derive(Clone)]
pub struct TransportHandle {
    inner: Option<Arc<TransportProtocol>>,
}

impl TransportHandle {
    /// A handle with nothing behind it; every operation fails with [`Error::Stopped`].
    /// Exists for unit tests of components that need *a* handle but never exercise it.
    pub fn detached() -> Self {
        Self { inner: None }
    }

    pub(crate) fn new(transport: Arc<TransportProtocol>) -> Self {
        Self { inner: Some(transport) }
    }

    fn transport(&self) -> Result<&Arc<TransportProtocol>> {
        self.inner.as_ref().ok_or(Error::Stopped)
    }

    pub fn write<E: Encode>(&self, message: &E) -> Result<u32> {
        self.transport()?.write(message)
    }

    pub fn write_raw(&self, payload: &[u8]) -> Result<u32> {
        self.transport()?.write_raw(payload)
    }

    pub fn disconnect(&self, reason: DisconnectReason, description: &str) -> Result<()> {
        self.transport()?.disconnect(reason, description)
    }

    pub fn set_active_service(&self, service: Arc<dyn Service>) -> Result<()> {
        self.transport()?.dispatcher.set_active(service);
        Ok(())
    }

    /// Register something that must hear about a fatal transport error (§5
    /// "Cancellation"). A no-op on a detached handle -- nothing will ever fire, but
    /// nothing panics either.
    pub fn register_fatal(&self, notifiable: Box<dyn Notifiable>) {
        if let Some(transport) = &self.inner {
            transport.fatal.register(notifiable);
        }
    }

    pub fn session_id(&self) -> Result<Vec<u8>> {
        self.transport()?.session_id()
    }

    pub fn config(&self) -> Result<Arc<ClientConfig>> {
        Ok(Arc::clone(&self.transport()?.config))
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.as_ref().map(|t| t.authenticated()).unwrap_or(false)
    }

    pub fn mark_authenticated(&self) -> Result<()> {
        self.transport()?.set_authenticated();
        Ok(())
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.as_ref().map(|t| t.state()).unwrap_or(LifecycleState::Dead)
    }

    /// Run the `SSH_MSG_SERVICE_REQUEST`/`ACCEPT` handshake (§4.3), blocking until the
    /// peer accepts, fails, or `timeout` elapses. The seam `ssh-transport-auth` and
    /// `ssh-transport-connect` use to switch the active service over to themselves.
    pub fn request_service(&self, name: &str, timeout: Option<Duration>) -> Result<()> {
        self.transport()?.request_service(name, timeout)
    }
}

/// Writes sealed packets to the outbound handoff queue rather than a socket directly --
/// the only thing a re-key driven by the read pump is ever allowed to do with bytes
/// meant for the wire, since the write pump is the socket's sole writer once it exists.
struct OutboundWriter<'a> {
    sender: &'a SyncSender<Vec<u8>>,
}

impl Write for OutboundWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sender
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "write pump is gone"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Pairs the read pump's own reader with the outbound handoff queue, so a re-key it
/// drives can be handed one `impl Read + Write` without ever touching the socket's
/// write half itself.
struct KexIo<'a, R: Read> {
    reader: &'a mut R,
    outbound: OutboundWriter<'a>,
}

impl<R: Read> Read for KexIo<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl<R: Read> Write for KexIo<'_, R> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outbound.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.outbound.flush()
    }
}

/// Pairs the raw reader and writer halves directly, for the one key exchange that runs
/// before any pump thread exists to hand bytes to.
struct DirectIo<'a> {
    reader: &'a mut BoxedReader,
    writer: &'a mut BoxedWriter,
}

impl Read for DirectIo<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Write for DirectIo<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// The transport protocol layer: version exchange, the binary packet protocol, key
/// exchange (initial and re-key) and dispatch to an active [`Service`] (§4.3).
pub struct TransportProtocol {
    config: Arc<ClientConfig>,
    provider: Arc<dyn CryptoProvider>,
    host_key_verifiers: Mutex<Vec<Box<dyn HostKeyVerifier>>>,
    remote_host: String,

    client_id: String,
    server_id: String,

    state: Mutex<LifecycleState>,
    session_id: Mutex<Option<Vec<u8>>>,
    authenticated: AtomicBool,
    /// Set by [`Self::set_authenticated`], cleared by the read pump once it has started
    /// the inbound delayed-compression stream; the outbound side is activated inline
    /// since `tx` is reachable from any thread, but `rx` is only ever touched by the
    /// read pump (§5).
    compression_activation_pending: AtomicBool,

    tx: Mutex<DirectionState>,
    outbound: Mutex<Option<SyncSender<Vec<u8>>>>,

    dispatcher: ServiceDispatcher,
    fatal: FatalRegistry,

    kex_done: Mutex<Completion<()>>,
    service_accept: Mutex<Option<(String, Completion<String>)>>,
    rekey_requested: AtomicBool,
    bytes_since_kex: AtomicU64,
    last_kex: Mutex<Instant>,

    read_pump: Mutex<Option<JoinHandle<()>>>,
    write_pump: Mutex<Option<JoinHandle<()>>>,
}

impl TransportProtocol {
    /// Connect over an already-established `TcpStream`: read/write halves are split via
    /// [`TcpStream::try_clone`], matching `connect(socket)` of §4.3.
    pub fn connect_tcp(
        stream: TcpStream,
        remote_host: String,
        config: Arc<ClientConfig>,
        crypto: CryptoContext,
    ) -> Result<Arc<Self>> {
        let reader = stream.try_clone()?;
        Self::connect(Box::new(reader), Box::new(stream), remote_host, config, crypto)
    }

    /// Connect over an arbitrary split byte stream (`connect(socket)` of §4.3). Used
    /// directly by tests, which pair this with an in-memory duplex pipe.
    pub fn connect(
        reader: BoxedReader,
        writer: BoxedWriter,
        remote_host: String,
        config: Arc<ClientConfig>,
        crypto: CryptoContext,
    ) -> Result<Arc<Self>> {
        let mut reader = reader;
        let mut writer = writer;

        let client_id = format!("SSH-2.0-{}", config.software_version);
        writer.write_all(format!("{client_id}\r\n").as_bytes())?;
        writer.flush()?;
        let server_id = read_identification_line(&mut reader)?;

        tracing::debug!(%client_id, %server_id, "version exchange complete");

        let transport = Arc::new(Self {
            config,
            provider: crypto.provider,
            host_key_verifiers: Mutex::new(crypto.host_key_verifiers),
            remote_host,
            client_id,
            server_id,
            state: Mutex::new(LifecycleState::KexNeeded),
            session_id: Mutex::new(None),
            authenticated: AtomicBool::new(false),
            compression_activation_pending: AtomicBool::new(false),
            tx: Mutex::new(DirectionState::new_outbound()),
            outbound: Mutex::new(None),
            dispatcher: ServiceDispatcher::new(),
            fatal: FatalRegistry::new(),
            kex_done: Mutex::new(Completion::new()),
            service_accept: Mutex::new(None),
            rekey_requested: AtomicBool::new(false),
            bytes_since_kex: AtomicU64::new(0),
            last_kex: Mutex::new(Instant::now()),
            read_pump: Mutex::new(None),
            write_pump: Mutex::new(None),
        });

        let (sender, receiver) = sync_channel::<Vec<u8>>(1);
        *transport.outbound.lock().expect("outbound mutex poisoned") = Some(sender);

        let mut rx = DirectionState::new_inbound();
        *transport.state.lock().expect("state mutex poisoned") = LifecycleState::KexOngoing;
        {
            let mut direct = DirectIo {
                reader: &mut reader,
                writer: &mut writer,
            };
            transport.run_kex(&mut direct, &mut rx, None)?;
        }
        *transport.state.lock().expect("state mutex poisoned") = LifecycleState::Running;

        let write_pump = spawn_write_pump(Arc::clone(&transport), writer, receiver);
        *transport.write_pump.lock().expect("write pump mutex poisoned") = Some(write_pump);

        let read_pump = spawn_read_pump(Arc::clone(&transport), reader, rx);
        *transport.read_pump.lock().expect("read pump mutex poisoned") = Some(read_pump);

        Ok(transport)
    }

    pub fn handle(self: &Arc<Self>) -> TransportHandle {
        TransportHandle::new(Arc::clone(self))
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock().expect("state mutex poisoned")
    }

    pub fn authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    /// Marks the transport authenticated and starts any delayed (`zlib@openssh.com`)
    /// compression stream that was waiting on it (§4.4 "enables delayed compression").
    pub fn set_authenticated(&self) {
        self.authenticated.store(true, Ordering::SeqCst);
        self.tx
            .lock()
            .expect("tx mutex poisoned")
            .activate_delayed_compression();
        self.compression_activation_pending.store(true, Ordering::SeqCst);
    }

    pub fn session_id(&self) -> Result<Vec<u8>> {
        self.session_id
            .lock()
            .expect("session id mutex poisoned")
            .clone()
            .ok_or_else(|| Error::ProtocolError("session id requested before first key exchange".into()))
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn add_host_key_verifier(&self, verifier: Box<dyn HostKeyVerifier>) {
        self.host_key_verifiers
            .lock()
            .expect("host key verifiers mutex poisoned")
            .push(verifier);
    }

    /// Encode, seal and enqueue one typed message for the write pump, serialized against
    /// concurrent encodes and against an in-progress re-key by `tx`'s lock (§5).
    pub fn write<E: Encode>(&self, message: &E) -> Result<u32> {
        self.write_raw(message.encode().readable())
    }

    pub fn write_raw(&self, payload: &[u8]) -> Result<u32> {
        if self.state() == LifecycleState::Dead {
            return Err(Error::Stopped);
        }

        let mut tx = self.tx.lock().expect("tx mutex poisoned");
        let mut rng = rand::thread_rng();
        let seq = tx.seq;
        let sealed = match codec::Encoder::encode(payload, &mut tx, self.authenticated(), &mut rng) {
            Ok(sealed) => sealed,
            Err(e) => {
                drop(tx);
                self.fail(e.clone());
                return Err(e);
            }
        };
        let len = sealed.len() as u64;
        self.send_sealed(sealed)?;
        drop(tx);

        if self.bytes_since_kex.fetch_add(len, Ordering::SeqCst) + len >= self.config.rekey.bytes
            || self.last_kex.lock().expect("last kex mutex poisoned").elapsed() >= self.config.rekey.interval
        {
            self.rekey_requested.store(true, Ordering::SeqCst);
        }

        Ok(seq)
    }

    fn send_sealed(&self, sealed: Vec<u8>) -> Result<()> {
        let guard = self.outbound.lock().expect("outbound mutex poisoned");
        match guard.as_ref() {
            Some(sender) => sender.send(sealed).map_err(|_| Error::Stopped),
            None => Err(Error::Stopped),
        }
    }

    /// Request a service switch (`SSH_MSG_SERVICE_REQUEST`/`ACCEPT`, §4.3) and block
    /// until the peer accepts, fails, or `timeout` elapses.
    pub fn request_service(self: &Arc<Self>, name: &str, timeout: Option<Duration>) -> Result<()> {
        let completion = Completion::new();
        *self.service_accept.lock().expect("service accept mutex poisoned") =
            Some((name.to_string(), completion.clone()));
        *self.state.lock().expect("state mutex poisoned") = LifecycleState::ServiceRequested;

        self.write(&ServiceRequest {
            service_name: name.to_string(),
        })?;

        let accepted = completion.wait(timeout.or(self.config.timeouts.request));
        if self.state() == LifecycleState::ServiceRequested {
            *self.state.lock().expect("state mutex poisoned") = LifecycleState::Running;
        }
        accepted.map(|_| ())
    }

    pub fn disconnect(&self, reason: DisconnectReason, description: &str) -> Result<()> {
        if self.state() == LifecycleState::Dead {
            return Ok(());
        }
        let _ = self.write(&Disconnect::new(reason, description));
        self.fail(Error::Stopped);
        Ok(())
    }

    /// Block until both pumps have exited (`join()` of §4.3).
    pub fn join(&self) {
        if let Some(handle) = self.read_pump.lock().expect("read pump mutex poisoned").take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.write_pump.lock().expect("write pump mutex poisoned").take() {
            let _ = handle.join();
        }
    }

    /// The fatal-error path (§5 "Cancellation", §7): mark the transport `Dead`, fan the
    /// error out to every registered awaitable, drop the outbound sender so the write
    /// pump unwinds, and best-effort tell the peer why.
    fn fail(&self, error: Error) {
        let mut state = self.state.lock().expect("state mutex poisoned");
        if *state == LifecycleState::Dead {
            return;
        }
        tracing::error!(%error, "transport failing fatally");
        *state = LifecycleState::Dead;
        drop(state);

        self.fatal.notify_error(error.clone());
        self.kex_done.lock().expect("kex done mutex poisoned").fail(error.clone());
        if let Some((_, completion)) = self
            .service_accept
            .lock()
            .expect("service accept mutex poisoned")
            .take()
        {
            completion.fail(error.clone());
        }

        if !matches!(error, Error::Io(_) | Error::Stopped) {
            let mut tx = self.tx.lock().expect("tx mutex poisoned");
            let mut rng = rand::thread_rng();
            let disconnect = Disconnect::new(error.disconnect_reason(), error.to_string());
            if let Ok(sealed) =
                codec::Encoder::encode(disconnect.encode().readable(), &mut tx, self.authenticated(), &mut rng)
            {
                let _ = self.send_sealed(sealed);
            }
        }

        self.outbound.lock().expect("outbound mutex poisoned").take();
    }

    /// Run exactly one key exchange (initial, or a re-key) over `stream` to completion:
    /// negotiate, derive keys, switch algorithms asymmetrically around `NEWKEYS`, and --
    /// on the first call only -- fix the session id (§4.2). Agnostic to whether `stream`
    /// writes straight to the socket or through the outbound handoff queue.
    fn run_kex(
        &self,
        stream: &mut (impl Read + Write),
        rx: &mut DirectionState,
        peer_kexinit: Option<KexInit>,
    ) -> Result<()> {
        let mut tx = self.tx.lock().expect("tx mutex poisoned");
        let preferences = effective_preferences(&self.config.kex_preferences, self.provider.as_ref());
        let verifiers = self.host_key_verifiers.lock().expect("host key verifiers mutex poisoned");
        let mut rng = rand::thread_rng();

        tracing::debug!(rekey = self.session_id.lock().unwrap().is_some(), "starting key exchange");

        let outcome: Result<KexOutput> = kex::run_client(
            stream,
            &mut tx,
            rx,
            &preferences,
            &verifiers,
            &self.remote_host,
            &self.client_id,
            &self.server_id,
            &mut rng,
            self.authenticated(),
            peer_kexinit,
        );
        drop(verifiers);
        let outcome = outcome?;

        codec::send(stream, &mut tx, self.authenticated(), &mut rng, &NewKeys)?;
        tx.install(
            outcome.negotiated.client_to_server.clone(),
            outcome.client_to_server.key.clone(),
            outcome.client_to_server.iv.clone(),
            outcome.client_to_server.mac.clone(),
            self.authenticated(),
        );
        drop(tx);

        let _: NewKeys = codec::recv(stream, rx, self.authenticated())?;
        rx.install(
            outcome.negotiated.server_to_client.clone(),
            outcome.server_to_client.key.clone(),
            outcome.server_to_client.iv.clone(),
            outcome.server_to_client.mac.clone(),
            self.authenticated(),
        );

        let mut session_id = self.session_id.lock().expect("session id mutex poisoned");
        if session_id.is_none() {
            *session_id = Some(outcome.exchange_hash.clone());
        }
        drop(session_id);

        self.bytes_since_kex.store(0, Ordering::SeqCst);
        *self.last_kex.lock().expect("last kex mutex poisoned") = Instant::now();

        let mut kex_done = self.kex_done.lock().expect("kex done mutex poisoned");
        kex_done.complete(());
        *kex_done = Completion::new();
        drop(kex_done);

        tracing::debug!("key exchange complete");
        Ok(())
    }

    /// Run a re-key the read pump is driving: `reader` is the read pump's own reader,
    /// and the outgoing `KEXINIT`/`NEWKEYS` bytes are handed to the write pump through
    /// the same queue ordinary writes use (§5 "writeLock").
    fn run_rekey(&self, reader: &mut impl Read, rx: &mut DirectionState, peer_kexinit: Option<KexInit>) -> Result<()> {
        let outbound = self.outbound.lock().expect("outbound mutex poisoned");
        let sender = outbound.as_ref().ok_or(Error::Stopped)?.clone();
        drop(outbound);

        let mut io = KexIo {
            reader,
            outbound: OutboundWriter { sender: &sender },
        };
        self.run_kex(&mut io, rx, peer_kexinit)
    }

    /// Route one inbound packet per the dispatch rule of §4.3.
    fn dispatch(&self, raw: RawMessage, reader: &mut impl Read, rx: &mut DirectionState) -> Result<()> {
        match raw.msg_id() {
            Some(id::DISCONNECT) => {
                let disconnect = Disconnect::decode(raw.buffer())?;
                tracing::debug!(
                    reason = disconnect.reason,
                    description = %disconnect.description,
                    "peer disconnected"
                );
                Err(Error::Stopped)
            }
            Some(id::IGNORE) | Some(id::DEBUG) => Ok(()),
            Some(id::UNIMPLEMENTED) => {
                let unimplemented = Unimplemented::decode(raw.buffer())?;
                self.dispatcher.notify_unimplemented(unimplemented.seq);
                Ok(())
            }
            Some(id::KEXINIT) => {
                let peer_kexinit = KexInit::decode(raw.buffer())?;
                *self.state.lock().expect("state mutex poisoned") = LifecycleState::KexOngoing;
                self.run_rekey(reader, rx, Some(peer_kexinit))?;
                *self.state.lock().expect("state mutex poisoned") = LifecycleState::Running;
                Ok(())
            }
            Some(id::SERVICE_ACCEPT) => {
                let accept = ServiceAccept::decode(raw.buffer())?;
                if let Some((expected, completion)) =
                    self.service_accept.lock().expect("service accept mutex poisoned").take()
                {
                    if expected == accept.service_name {
                        completion.complete(accept.service_name);
                    } else {
                        completion.fail(Error::UnexpectedMessage(format!(
                            "service accept for {}, expected {expected}",
                            accept.service_name
                        )));
                    }
                }
                Ok(())
            }
            _ => match self.dispatcher.dispatch(raw.clone())? {
                DispatchOutcome::Handled => Ok(()),
                DispatchOutcome::NoActiveService => {
                    self.write(&Unimplemented { seq: raw.seq })?;
                    Ok(())
                }
            },
        }
    }
}

fn read_identification_line(reader: &mut impl Read) -> Result<String> {
    let mut seen = 0usize;
    let mut line = Vec::new();
    let mut byte = [0u8; 1];

    loop {
        reader.read_exact(&mut byte)?;
        seen += 1;
        if seen > MAX_IDENTIFICATION_SCAN {
            return Err(Error::ProtocolError(
                "no SSH-2.0 identification line within 16 KiB".into(),
            ));
        }

        if byte[0] == b'\n' {
            let text = String::from_utf8_lossy(&line).trim_end_matches('\r').to_string();
            line.clear();
            if text.starts_with("SSH-2.0-") || text.starts_with("SSH-1.99-") {
                return Ok(text);
            }
            if text.starts_with("SSH-") {
                return Err(Error::ProtocolError(format!(
                    "unsupported protocol version line: {text}"
                )));
            }
            // a comment line preceding the identification string; keep scanning.
            continue;
        }

        line.push(byte[0]);
    }
}

fn spawn_write_pump(
    transport: Arc<TransportProtocol>,
    mut writer: BoxedWriter,
    receiver: Receiver<Vec<u8>>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("ssh-transport-write-pump".into())
        .spawn(move || {
            for sealed in receiver.iter() {
                if let Err(e) = codec::write_sealed(&mut writer, &sealed) {
                    tracing::warn!(error = %e, "write pump socket error");
                    transport.fail(Error::Io(e.to_string()));
                    break;
                }
            }
        })
        .expect("failed to spawn write pump thread")
}

fn spawn_read_pump(
    transport: Arc<TransportProtocol>,
    mut reader: BoxedReader,
    mut rx: DirectionState,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("ssh-transport-read-pump".into())
        .spawn(move || loop {
            if transport.state() == LifecycleState::Dead {
                break;
            }

            if transport.rekey_requested.swap(false, Ordering::SeqCst) {
                *transport.state.lock().expect("state mutex poisoned") = LifecycleState::KexOngoing;
                if let Err(e) = transport.run_rekey(&mut reader, &mut rx, None) {
                    transport.fail(e);
                    break;
                }
                *transport.state.lock().expect("state mutex poisoned") = LifecycleState::Running;
            }

            if transport.compression_activation_pending.swap(false, Ordering::SeqCst) {
                rx.activate_delayed_compression();
            }

            let raw = match Decoder::decode(&mut reader, &mut rx, transport.authenticated()) {
                Ok(raw) => raw,
                Err(e) => {
                    transport.fail(e);
                    break;
                }
            };

            if let Err(e) = transport.dispatch(raw, &mut reader, &mut rx) {
                transport.fail(e);
                break;
            }
        })
        .expect("failed to spawn read pump thread")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read as _, Write as _};
    use std::sync::mpsc;

    /// An in-memory half-duplex byte pipe good enough to stand in for a socket in tests
    /// that don't need real network I/O (§8 "Test tooling").
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

    fn pipe() -> (PipeReader, PipeWriter) {
        let (tx, rx) = mpsc::sync_channel(64);
        (PipeReader(rx, Vec::new()), PipeWriter(tx))
    }

    #[test]
    fn read_identification_line_skips_leading_comments() {
        let banner = b"Welcome to our server\r\nSSH-2.0-OpenSSH_8.9\r\n".to_vec();
        let mut cursor = std::io::Cursor::new(banner);
        let id = read_identification_line(&mut cursor).unwrap();
        assert_eq!(id, "SSH-2.0-OpenSSH_8.9");
    }

    #[test]
    fn read_identification_line_rejects_unsupported_versions() {
        let mut cursor = std::io::Cursor::new(b"SSH-1.5-ancient\r\n".to_vec());
        assert!(read_identification_line(&mut cursor).is_err());
    }

    #[test]
    fn detached_handle_fails_every_operation() {
        let handle = TransportHandle::detached();
        assert!(matches!(handle.write_raw(&[1, 2, 3]), Err(Error::Stopped)));
        assert_eq!(handle.state(), LifecycleState::Dead);
    }

    #[test]
    fn outbound_writer_forwards_bytes_to_the_channel() {
        let (sender, receiver) = sync_channel(1);
        {
            let mut writer = OutboundWriter { sender: &sender };
            writer.write_all(b"hello").unwrap();
        }
        assert_eq!(receiver.recv().unwrap(), b"hello");
    }

    // Exercises the pipe harness itself -- the full handshake is covered in
    // `tests/handshake.rs` against a hand-rolled fake server.
    #[test]
    fn pipe_roundtrips_bytes() {
        let (mut reader, mut writer) = pipe();
        writer.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
    }
}
