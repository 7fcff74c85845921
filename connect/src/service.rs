//! `ConnectionService` (§4.5/§4.6): the `ssh-connection` [`Service`], owning the channel
//! table and the global-request reply queue, and the entry point for opening channels.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use ssh_transport::error::OpenFailureReason;
use ssh_transport::message::{Decode, RawMessage};
use ssh_transport::sync::Completion;
use ssh_transport::{Error as TransportError, Result as TransportResult, Service, TransportHandle};

use crate::channel::{Channel, ChannelCore};
use crate::error::ConnectionError;
use crate::message::{
    id, ChannelClose, ChannelData, ChannelEof, ChannelExtendedData, ChannelFailure, ChannelOpen,
    ChannelOpenConfirmation, ChannelOpenFailure, ChannelRequest, ChannelSuccess, ChannelWindowAdjust, GlobalRequest,
    RequestFailure, RequestSuccess,
};
use crate::opener::OpenerRegistry;
use crate::window::{INITIAL_WINDOW_SIZE, MAXIMUM_PACKET_SIZE};

/// What a successful `CHANNEL_OPEN_CONFIRMATION` told us about the peer's side of a
/// channel we requested.
#[derive(Debug, Clone, Copy)]
struct OpenedInfo {
    remote_id: u32,
    initial_window_size: u32,
    maximum_packet_size: u32,
}

type OpenOutcome = Result<OpenedInfo, ConnectionError>;
type RequestOutcome = Result<Vec<u8>, ConnectionError>;

struct Inner {
    channels: Arc<DashMap<u32, Arc<ChannelCore>>>,
    pending_opens: Mutex<HashMap<u32, Completion<OpenOutcome>>>,
    global_requests: Mutex<VecDeque<Completion<RequestOutcome>>>,
    openers: OpenerRegistry,
}

/// The `ssh-connection` service: opens channels (as `session`/direct-tcpip or any other
/// type), issues global requests, and routes inbound channel traffic to the `Channel`
/// that owns it.
pub struct ConnectionService {
    transport: TransportHandle,
    inner: Inner,
}

impl ConnectionService {
    pub fn new(transport: TransportHandle) -> Arc<Self> {
        Arc::new(Self {
            transport,
            inner: Inner {
                channels: Arc::new(DashMap::new()),
                pending_opens: Mutex::new(HashMap::new()),
                global_requests: Mutex::new(VecDeque::new()),
                openers: OpenerRegistry::new(),
            },
        })
    }

    /// Installs this service as the transport's active `ssh-connection` handler and
    /// registers it for fatal-error fan-out. Must be called once after the
    /// `ssh-connection` service has been granted via `SSH_MSG_SERVICE_REQUEST`.
    pub fn install(self: &Arc<Self>) {
        self.transport.set_active_service(Arc::clone(self) as Arc<dyn Service>).ok();
    }

    pub fn openers(&self) -> &OpenerRegistry {
        &self.inner.openers
    }

    fn next_free_id(&self) -> u32 {
        let pending = self.inner.pending_opens.lock().unwrap();
        let mut candidate = 0u32;
        loop {
            if !pending.contains_key(&candidate) && !self.inner.channels.contains_key(&candidate) {
                return candidate;
            }
            candidate += 1;
        }
    }

    /// Opens a channel of `channel_type`, blocking until the peer confirms or rejects
    /// it.
    pub fn open_channel(
        &self,
        channel_type: impl Into<String>,
        type_specific: Vec<u8>,
        timeout: Option<Duration>,
    ) -> Result<Channel, ConnectionError> {
        let local_id = self.next_free_id();
        let completion = Completion::new();
        self.inner.pending_opens.lock().unwrap().insert(local_id, completion.clone());

        let result = self.transport.write(&ChannelOpen {
            channel_type: channel_type.into(),
            sender_channel: local_id,
            initial_window_size: INITIAL_WINDOW_SIZE,
            maximum_packet_size: MAXIMUM_PACKET_SIZE,
            type_specific,
        });

        if let Err(err) = result {
            self.inner.pending_opens.lock().unwrap().remove(&local_id);
            return Err(err.into());
        }

        let outcome = completion.wait(timeout).map_err(ConnectionError::from)?;
        self.inner.pending_opens.lock().unwrap().remove(&local_id);

        let info = outcome?;
        let core = ChannelCore::new(
            local_id,
            info.remote_id,
            info.initial_window_size,
            info.maximum_packet_size,
            self.transport.clone(),
            Arc::downgrade(&self.inner.channels),
        );
        self.inner.channels.insert(local_id, Arc::clone(&core));
        Ok(Channel::new(core))
    }

    /// Sends a global request (e.g. `tcpip-forward`), blocking for the reply when
    /// `want_reply` is set. Returns the reply's type-specific data, if any.
    pub fn global_request(
        &self,
        request_name: impl Into<String>,
        want_reply: bool,
        data: Vec<u8>,
        timeout: Option<Duration>,
    ) -> Result<Option<Vec<u8>>, ConnectionError> {
        let completion = Completion::new();
        if want_reply {
            self.inner.global_requests.lock().unwrap().push_back(completion.clone());
        }

        self.transport.write(&GlobalRequest {
            request_name: request_name.into(),
            want_reply,
            data,
        })?;

        if !want_reply {
            return Ok(None);
        }

        Ok(Some(completion.wait(timeout)??))
    }

    fn accept_channel_open(&self, open: ChannelOpen) -> TransportResult<()> {
        if !self.inner.openers.is_registered(&open.channel_type) {
            self.transport.write(&ChannelOpenFailure {
                recipient_channel: open.sender_channel,
                reason_code: OpenFailureReason::UnknownChannelType as u32,
                description: format!("no opener registered for channel type `{}`", open.channel_type),
            })?;
            return Ok(());
        }

        let local_id = self.next_free_id();
        let core = ChannelCore::new(
            local_id,
            open.sender_channel,
            open.initial_window_size,
            open.maximum_packet_size,
            self.transport.clone(),
            Arc::downgrade(&self.inner.channels),
        );
        self.inner.channels.insert(local_id, Arc::clone(&core));

        self.transport.write(&ChannelOpenConfirmation {
            recipient_channel: open.sender_channel,
            sender_channel: local_id,
            initial_window_size: INITIAL_WINDOW_SIZE,
            maximum_packet_size: MAXIMUM_PACKET_SIZE,
            type_specific: Vec::new(),
        })?;

        self.inner.openers.dispatch(&open.channel_type, Channel::new(core));
        Ok(())
    }

    fn channel(&self, local_id: u32) -> TransportResult<Arc<ChannelCore>> {
        self.inner
            .channels
            .get(&local_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| TransportError::ProtocolError(format!("message for unknown channel {local_id}")))
    }
}

impl Service for ConnectionService {
    fn name(&self) -> &str {
        "ssh-connection"
    }

    fn handle(&self, message: RawMessage) -> TransportResult<()> {
        match message.msg_id() {
            Some(id::GLOBAL_REQUEST) => {
                let request = GlobalRequest::decode(message.buffer())?;
                tracing::debug!(request = %request.request_name, "peer sent a global request we do not serve");
                if request.want_reply {
                    self.transport.write(&RequestFailure)?;
                }
                Ok(())
            }

            Some(id::REQUEST_SUCCESS) => {
                let reply = RequestSuccess::decode(message.buffer())?;
                if let Some(waiter) = self.inner.global_requests.lock().unwrap().pop_front() {
                    waiter.complete(Ok(reply.data));
                }
                Ok(())
            }

            Some(id::REQUEST_FAILURE) => {
                if let Some(waiter) = self.inner.global_requests.lock().unwrap().pop_front() {
                    waiter.complete(Err(ConnectionError::RequestFailed));
                }
                Ok(())
            }

            Some(id::CHANNEL_OPEN) => {
                let open = ChannelOpen::decode(message.buffer())?;
                self.accept_channel_open(open)
            }

            Some(id::CHANNEL_OPEN_CONFIRMATION) => {
                let confirmation = ChannelOpenConfirmation::decode(message.buffer())?;
                if let Some(waiter) = self.inner.pending_opens.lock().unwrap().get(&confirmation.recipient_channel) {
                    waiter.complete(Ok(OpenedInfo {
                        remote_id: confirmation.sender_channel,
                        initial_window_size: confirmation.initial_window_size,
                        maximum_packet_size: confirmation.maximum_packet_size,
                    }));
                }
                Ok(())
            }

            Some(id::CHANNEL_OPEN_FAILURE) => {
                let failure = ChannelOpenFailure::decode(message.buffer())?;
                if let Some(waiter) = self.inner.pending_opens.lock().unwrap().get(&failure.recipient_channel) {
                    waiter.complete(Err(ConnectionError::OpenRejected {
                        code: failure.reason_code,
                        message: failure.description,
                    }));
                }
                Ok(())
            }

            Some(id::CHANNEL_WINDOW_ADJUST) => {
                let adjust = ChannelWindowAdjust::decode(message.buffer())?;
                self.channel(adjust.recipient_channel)?.deliver_window_adjust(adjust.bytes_to_add);
                Ok(())
            }

            Some(id::CHANNEL_DATA) => {
                let data = ChannelData::decode(message.buffer())?;
                if data.data.len() as u32 > MAXIMUM_PACKET_SIZE {
                    return Err(TransportError::ProtocolError(format!(
                        "channel {} sent a data packet larger than the advertised maximum",
                        data.recipient_channel
                    )));
                }
                let channel_id = data.recipient_channel;
                self.channel(channel_id)?.deliver_data(None, data.data).map_err(|()| {
                    TransportError::ProtocolError(format!("channel {channel_id} exceeded its local window"))
                })?;
                Ok(())
            }

            Some(id::CHANNEL_EXTENDED_DATA) => {
                let data = ChannelExtendedData::decode(message.buffer())?;
                if data.data.len() as u32 > MAXIMUM_PACKET_SIZE {
                    return Err(TransportError::ProtocolError(format!(
                        "channel {} sent an extended data packet larger than the advertised maximum",
                        data.recipient_channel
                    )));
                }
                let channel_id = data.recipient_channel;
                self.channel(channel_id)?
                    .deliver_data(Some(data.data_type), data.data)
                    .map_err(|()| TransportError::ProtocolError(format!("channel {channel_id} exceeded its local window")))?;
                Ok(())
            }

            Some(id::CHANNEL_EOF) => {
                let eof = ChannelEof::decode(message.buffer())?;
                self.channel(eof.recipient_channel)?.deliver_eof();
                Ok(())
            }

            Some(id::CHANNEL_CLOSE) => {
                let close = ChannelClose::decode(message.buffer())?;
                self.channel(close.recipient_channel)?.deliver_close();
                Ok(())
            }

            Some(id::CHANNEL_REQUEST) => {
                let request = ChannelRequest::decode(message.buffer())?;
                tracing::debug!(
                    channel = request.recipient_channel,
                    request_type = %request.request_type,
                    "peer sent a channel request we do not serve"
                );
                if request.want_reply {
                    self.transport.write(&ChannelFailure {
                        recipient_channel: request.recipient_channel,
                    })?;
                }
                Ok(())
            }

            Some(id::CHANNEL_SUCCESS) => {
                let success = ChannelSuccess::decode(message.buffer())?;
                self.channel(success.recipient_channel)?.deliver_request_reply(Ok(()));
                Ok(())
            }

            Some(id::CHANNEL_FAILURE) => {
                let failure = ChannelFailure::decode(message.buffer())?;
                self.channel(failure.recipient_channel)?
                    .deliver_request_reply(Err(ConnectionError::RequestFailed));
                Ok(())
            }

            _ => Err(TransportError::UnexpectedMessage(format!(
                "unexpected message id {:?} for the ssh-connection service",
                message.msg_id()
            ))),
        }
    }

    fn notify_unimplemented(&self, sequence: u32) {
        tracing::warn!(sequence, "peer does not implement a connection-layer packet we sent");
    }

    fn transport(&self) -> &TransportHandle {
        &self.transport
    }
}
