//! A single multiplexed channel (RFC 4254 §5): data streams, channel-local requests,
//! and the EOF/close handshake.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::Duration;

use dashmap::DashMap;
use ssh_transport::sync::Completion;
use ssh_transport::TransportHandle;

use crate::error::ConnectionError;
use crate::message::{
    ChannelClose, ChannelData, ChannelEof, ChannelExtendedData, ChannelRequest, ChannelWindowAdjust,
    EXTENDED_DATA_STDERR,
};
use crate::window::{LocalWindow, RemoteWindow, MAXIMUM_PACKET_SIZE};

pub(crate) type RequestOutcome = Result<(), ConnectionError>;

struct Incoming {
    normal: VecDeque<u8>,
    extended: HashMap<u32, VecDeque<u8>>,
    eof: bool,
    closed: bool,
}

impl Incoming {
    fn new() -> Self {
        Self {
            normal: VecDeque::new(),
            extended: HashMap::new(),
            eof: false,
            closed: false,
        }
    }
}

pub(crate) struct ChannelCore {
    local_id: u32,
    remote_id: u32,
    local_window: LocalWindow,
    remote_window: Arc<RemoteWindow>,
    remote_max_packet: u32,
    transport: TransportHandle,
    incoming: Mutex<Incoming>,
    incoming_cv: Condvar,
    requests: Mutex<VecDeque<Completion<RequestOutcome>>>,
    eof_sent: AtomicBool,
    close_sent: AtomicBool,
    close_received: AtomicBool,
    table: Weak<DashMap<u32, Arc<ChannelCore>>>,
}

impl ChannelCore {
    pub(crate) fn new(
        local_id: u32,
        remote_id: u32,
        remote_window_size: u32,
        remote_max_packet: u32,
        transport: TransportHandle,
        table: Weak<DashMap<u32, Arc<ChannelCore>>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            local_id,
            remote_id,
            local_window: LocalWindow::new(),
            remote_window: Arc::new(RemoteWindow::new(remote_window_size)),
            remote_max_packet,
            transport,
            incoming: Mutex::new(Incoming::new()),
            incoming_cv: Condvar::new(),
            requests: Mutex::new(VecDeque::new()),
            eof_sent: AtomicBool::new(false),
            close_sent: AtomicBool::new(false),
            close_received: AtomicBool::new(false),
            table,
        })
    }

    pub(crate) fn local_id(&self) -> u32 {
        self.local_id
    }

    /// Delivers `CHANNEL_DATA`/`CHANNEL_EXTENDED_DATA` payload to the right queue and
    /// wakes any blocked reader. Fails if the peer has sent more data than the local
    /// window it was ever granted allows; the caller turns that into a fatal protocol
    /// error rather than trusting a hostile or buggy peer's byte count.
    pub(crate) fn deliver_data(&self, data_type: Option<u32>, payload: Vec<u8>) -> Result<(), ()> {
        if let Some(amount) = self.local_window.consume(payload.len() as u32)? {
            let _ = self.transport.write(&ChannelWindowAdjust {
                recipient_channel: self.remote_id,
                bytes_to_add: amount,
            });
        }

        let mut incoming = self.incoming.lock().unwrap();
        match data_type {
            None => incoming.normal.extend(payload),
            Some(ty) => incoming.extended.entry(ty).or_default().extend(payload),
        }
        self.incoming_cv.notify_all();
        Ok(())
    }

    pub(crate) fn deliver_eof(&self) {
        let mut incoming = self.incoming.lock().unwrap();
        incoming.eof = true;
        self.incoming_cv.notify_all();
    }

    pub(crate) fn deliver_window_adjust(&self, bytes_to_add: u32) {
        self.remote_window.replenish(bytes_to_add);
    }

    /// `CHANNEL_CLOSE` arrived from the peer. Replies in kind if we haven't already sent
    /// our own, then removes the channel once both directions have closed.
    pub(crate) fn deliver_close(self: &Arc<Self>) {
        self.close_received.store(true, Ordering::SeqCst);
        {
            let mut incoming = self.incoming.lock().unwrap();
            incoming.closed = true;
            self.incoming_cv.notify_all();
        }
        self.remote_window.close();

        for waiter in self.requests.lock().unwrap().drain(..) {
            waiter.complete(Err(ConnectionError::ChannelClosed));
        }

        if !self.close_sent.swap(true, Ordering::SeqCst) {
            let _ = self.transport.write(&ChannelClose {
                recipient_channel: self.remote_id,
            });
        }
        self.maybe_remove_from_table();
    }

    /// Pushes the oldest pending request completion and resolves it.
    pub(crate) fn deliver_request_reply(&self, outcome: RequestOutcome) {
        if let Some(waiter) = self.requests.lock().unwrap().pop_front() {
            waiter.complete(outcome);
        }
    }

    fn maybe_remove_from_table(self: &Arc<Self>) {
        if self.close_sent.load(Ordering::SeqCst) && self.close_received.load(Ordering::SeqCst) {
            if let Some(table) = self.table.upgrade() {
                table.remove(&self.local_id);
            }
        }
    }
}

/// A live RFC 4254 channel: request/reply, data streams, and the close handshake.
///
/// Cloning shares the same underlying channel; the channel is only removed from its
/// connection's table once both sides have sent `CHANNEL_CLOSE`.
#[derive(Clone)]
pub struct Channel {
    core: Arc<ChannelCore>,
}

impl Channel {
    pub(crate) fn new(core: Arc<ChannelCore>) -> Self {
        Self { core }
    }

    pub fn id(&self) -> u32 {
        self.core.local_id()
    }

    /// Sends a channel request, blocking for the peer's `CHANNEL_SUCCESS`/`FAILURE` when
    /// `want_reply` is set.
    pub fn request(&self, request_type: impl Into<String>, want_reply: bool, data: Vec<u8>) -> Result<(), ConnectionError> {
        self.request_with_timeout(request_type, want_reply, data, None)
    }

    pub fn request_with_timeout(
        &self,
        request_type: impl Into<String>,
        want_reply: bool,
        data: Vec<u8>,
        timeout: Option<Duration>,
    ) -> Result<(), ConnectionError> {
        let completion = Completion::new();
        if want_reply {
            self.core.requests.lock().unwrap().push_back(completion.clone());
        }

        self.core.transport.write(&ChannelRequest {
            recipient_channel: self.core.remote_id,
            request_type: request_type.into(),
            want_reply,
            data,
        })?;

        if !want_reply {
            return Ok(());
        }

        completion.wait(timeout)?
    }

    /// Sends `CHANNEL_EOF`. A no-op if already sent.
    pub fn send_eof(&self) -> Result<(), ConnectionError> {
        if !self.core.eof_sent.swap(true, Ordering::SeqCst) {
            self.core.transport.write(&ChannelEof {
                recipient_channel: self.core.remote_id,
            })?;
        }
        Ok(())
    }

    /// Sends `CHANNEL_CLOSE` if we haven't already. Does not wait for the peer's own
    /// close; drop the last `Channel` handle or let this return once both sides have
    /// exchanged `CLOSE` to observe full teardown.
    pub fn close(&self) -> Result<(), ConnectionError> {
        if !self.core.close_sent.swap(true, Ordering::SeqCst) {
            self.core.transport.write(&ChannelClose {
                recipient_channel: self.core.remote_id,
            })?;
        }
        self.core.maybe_remove_from_table();
        Ok(())
    }

    pub fn reader(&self) -> ChannelReader {
        ChannelReader {
            core: Arc::clone(&self.core),
            stream: None,
        }
    }

    /// A reader over `SSH_EXTENDED_DATA_STDERR`.
    pub fn stderr_reader(&self) -> ChannelReader {
        ChannelReader {
            core: Arc::clone(&self.core),
            stream: Some(EXTENDED_DATA_STDERR),
        }
    }

    pub fn writer(&self) -> ChannelWriter {
        ChannelWriter {
            core: Arc::clone(&self.core),
            stream: None,
        }
    }

    pub fn stderr_writer(&self) -> ChannelWriter {
        ChannelWriter {
            core: Arc::clone(&self.core),
            stream: Some(EXTENDED_DATA_STDERR),
        }
    }
}

/// Reads a channel's normal or extended data stream, blocking until data, EOF, or close
/// is observed.
pub struct ChannelReader {
    core: Arc<ChannelCore>,
    stream: Option<u32>,
}

impl io::Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut incoming = self.core.incoming.lock().unwrap();
        loop {
            let available = match self.stream {
                None => !incoming.normal.is_empty(),
                Some(ty) => incoming.extended.get(&ty).is_some_and(|q| !q.is_empty()),
            };
            if available || incoming.eof || incoming.closed {
                break;
            }
            incoming = self.core.incoming_cv.wait(incoming).unwrap();
        }

        let queue = match self.stream {
            None => &mut incoming.normal,
            Some(ty) => incoming.extended.entry(ty).or_default(),
        };

        let n = queue.len().min(buf.len());
        for (slot, byte) in buf.iter_mut().zip(queue.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

/// Writes a channel's normal or extended data stream, chunking to the peer's maximum
/// packet size and blocking on remote window availability.
pub struct ChannelWriter {
    core: Arc<ChannelCore>,
    stream: Option<u32>,
}

impl io::Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let chunk_limit = self.core.remote_max_packet.min(MAXIMUM_PACKET_SIZE);
        let want = (buf.len() as u32).min(chunk_limit);
        let granted = self.core.remote_window.reserve(want);
        if granted == 0 {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "channel closed"));
        }

        let payload = buf[..granted as usize].to_vec();
        let result = match self.stream {
            None => self.core.transport.write(&ChannelData {
                recipient_channel: self.core.remote_id,
                data: payload,
            }),
            Some(ty) => self.core.transport.write(&ChannelExtendedData {
                recipient_channel: self.core.remote_id,
                data_type: ty,
                data: payload,
            }),
        };

        result
            .map(|_| granted as usize)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
