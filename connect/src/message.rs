//! Wire messages for the `ssh-connection` service, RFC 4254.

use ssh_transport::buffer::PacketBuffer;
use ssh_transport::{Decode, Encode, Result};

pub mod id {
    pub const GLOBAL_REQUEST: u8 = 80;
    pub const REQUEST_SUCCESS: u8 = 81;
    pub const REQUEST_FAILURE: u8 = 82;

    pub const CHANNEL_OPEN: u8 = 90;
    pub const CHANNEL_OPEN_CONFIRMATION: u8 = 91;
    pub const CHANNEL_OPEN_FAILURE: u8 = 92;
    pub const CHANNEL_WINDOW_ADJUST: u8 = 93;
    pub const CHANNEL_DATA: u8 = 94;
    pub const CHANNEL_EXTENDED_DATA: u8 = 95;
    pub const CHANNEL_EOF: u8 = 96;
    pub const CHANNEL_CLOSE: u8 = 97;
    pub const CHANNEL_REQUEST: u8 = 98;
    pub const CHANNEL_SUCCESS: u8 = 99;
    pub const CHANNEL_FAILURE: u8 = 100;
}

#[derive(Debug, Clone)]
pub struct GlobalRequest {
    pub request_name: String,
    pub want_reply: bool,
    pub data: Vec<u8>,
}

impl Encode for GlobalRequest {
    const ID: u8 = id::GLOBAL_REQUEST;

    fn encode_body(&self, buf: &mut PacketBuffer) {
        buf.put_str(&self.request_name).put_bool(self.want_reply);
        buf.extend_writable(&self.data);
    }
}

impl Decode for GlobalRequest {
    const ID: u8 = id::GLOBAL_REQUEST;

    fn decode_body(buf: &mut PacketBuffer) -> Result<Self> {
        Ok(Self {
            request_name: buf.get_string()?,
            want_reply: buf.get_bool()?,
            data: buf.get_rest(),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct RequestSuccess {
    /// Set only for `tcpip-forward` requests with a dynamically allocated port.
    pub data: Vec<u8>,
}

impl Encode for RequestSuccess {
    const ID: u8 = id::REQUEST_SUCCESS;

    fn encode_body(&self, buf: &mut PacketBuffer) {
        buf.extend_writable(&self.data);
    }
}

impl Decode for RequestSuccess {
    const ID: u8 = id::REQUEST_SUCCESS;

    fn decode_body(buf: &mut PacketBuffer) -> Result<Self> {
        Ok(Self { data: buf.get_rest() })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RequestFailure;

impl Encode for RequestFailure {
    const ID: u8 = id::REQUEST_FAILURE;

    fn encode_body(&self, _buf: &mut PacketBuffer) {}
}

impl Decode for RequestFailure {
    const ID: u8 = id::REQUEST_FAILURE;

    fn decode_body(_buf: &mut PacketBuffer) -> Result<Self> {
        Ok(Self)
    }
}

#[derive(Debug, Clone)]
pub struct ChannelOpen {
    pub channel_type: String,
    pub sender_channel: u32,
    pub initial_window_size: u32,
    pub maximum_packet_size: u32,
    pub type_specific: Vec<u8>,
}

impl Encode for ChannelOpen {
    const ID: u8 = id::CHANNEL_OPEN;

    fn encode_body(&self, buf: &mut PacketBuffer) {
        buf.put_str(&self.channel_type)
            .put_u32(self.sender_channel)
            .put_u32(self.initial_window_size)
            .put_u32(self.maximum_packet_size);
        buf.extend_writable(&self.type_specific);
    }
}

impl Decode for ChannelOpen {
    const ID: u8 = id::CHANNEL_OPEN;

    fn decode_body(buf: &mut PacketBuffer) -> Result<Self> {
        Ok(Self {
            channel_type: buf.get_string()?,
            sender_channel: buf.get_u32()?,
            initial_window_size: buf.get_u32()?,
            maximum_packet_size: buf.get_u32()?,
            type_specific: buf.get_rest(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ChannelOpenConfirmation {
    pub recipient_channel: u32,
    pub sender_channel: u32,
    pub initial_window_size: u32,
    pub maximum_packet_size: u32,
    pub type_specific: Vec<u8>,
}

impl Encode for ChannelOpenConfirmation {
    const ID: u8 = id::CHANNEL_OPEN_CONFIRMATION;

    fn encode_body(&self, buf: &mut PacketBuffer) {
        buf.put_u32(self.recipient_channel)
            .put_u32(self.sender_channel)
            .put_u32(self.initial_window_size)
            .put_u32(self.maximum_packet_size);
        buf.extend_writable(&self.type_specific);
    }
}

impl Decode for ChannelOpenConfirmation {
    const ID: u8 = id::CHANNEL_OPEN_CONFIRMATION;

    fn decode_body(buf: &mut PacketBuffer) -> Result<Self> {
        Ok(Self {
            recipient_channel: buf.get_u32()?,
            sender_channel: buf.get_u32()?,
            initial_window_size: buf.get_u32()?,
            maximum_packet_size: buf.get_u32()?,
            type_specific: buf.get_rest(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ChannelOpenFailure {
    pub recipient_channel: u32,
    pub reason_code: u32,
    pub description: String,
}

impl Encode for ChannelOpenFailure {
    const ID: u8 = id::CHANNEL_OPEN_FAILURE;

    fn encode_body(&self, buf: &mut PacketBuffer) {
        buf.put_u32(self.recipient_channel)
            .put_u32(self.reason_code)
            .put_str(&self.description)
            .put_str("");
    }
}

impl Decode for ChannelOpenFailure {
    const ID: u8 = id::CHANNEL_OPEN_FAILURE;

    fn decode_body(buf: &mut PacketBuffer) -> Result<Self> {
        Ok(Self {
            recipient_channel: buf.get_u32()?,
            reason_code: buf.get_u32()?,
            description: buf.get_string().unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChannelWindowAdjust {
    pub recipient_channel: u32,
    pub bytes_to_add: u32,
}

impl Encode for ChannelWindowAdjust {
    const ID: u8 = id::CHANNEL_WINDOW_ADJUST;

    fn encode_body(&self, buf: &mut PacketBuffer) {
        buf.put_u32(self.recipient_channel).put_u32(self.bytes_to_add);
    }
}

impl Decode for ChannelWindowAdjust {
    const ID: u8 = id::CHANNEL_WINDOW_ADJUST;

    fn decode_body(buf: &mut PacketBuffer) -> Result<Self> {
        Ok(Self {
            recipient_channel: buf.get_u32()?,
            bytes_to_add: buf.get_u32()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ChannelData {
    pub recipient_channel: u32,
    pub data: Vec<u8>,
}

impl Encode for ChannelData {
    const ID: u8 = id::CHANNEL_DATA;

    fn encode_body(&self, buf: &mut PacketBuffer) {
        buf.put_u32(self.recipient_channel).put_bytes(&self.data);
    }
}

impl Decode for ChannelData {
    const ID: u8 = id::CHANNEL_DATA;

    fn decode_body(buf: &mut PacketBuffer) -> Result<Self> {
        Ok(Self {
            recipient_channel: buf.get_u32()?,
            data: buf.get_bytes()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ChannelExtendedData {
    pub recipient_channel: u32,
    pub data_type: u32,
    pub data: Vec<u8>,
}

impl Encode for ChannelExtendedData {
    const ID: u8 = id::CHANNEL_EXTENDED_DATA;

    fn encode_body(&self, buf: &mut PacketBuffer) {
        buf.put_u32(self.recipient_channel).put_u32(self.data_type).put_bytes(&self.data);
    }
}

impl Decode for ChannelExtendedData {
    const ID: u8 = id::CHANNEL_EXTENDED_DATA;

    fn decode_body(buf: &mut PacketBuffer) -> Result<Self> {
        Ok(Self {
            recipient_channel: buf.get_u32()?,
            data_type: buf.get_u32()?,
            data: buf.get_bytes()?,
        })
    }
}

/// `SSH_EXTENDED_DATA_STDERR`, RFC 4254 §5.2 -- the only standardized extended data type.
pub const EXTENDED_DATA_STDERR: u32 = 1;

#[derive(Debug, Clone, Copy)]
pub struct ChannelEof {
    pub recipient_channel: u32,
}

impl Encode for ChannelEof {
    const ID: u8 = id::CHANNEL_EOF;

    fn encode_body(&self, buf: &mut PacketBuffer) {
        buf.put_u32(self.recipient_channel);
    }
}

impl Decode for ChannelEof {
    const ID: u8 = id::CHANNEL_EOF;

    fn decode_body(buf: &mut PacketBuffer) -> Result<Self> {
        Ok(Self {
            recipient_channel: buf.get_u32()?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChannelClose {
    pub recipient_channel: u32,
}

impl Encode for ChannelClose {
    const ID: u8 = id::CHANNEL_CLOSE;

    fn encode_body(&self, buf: &mut PacketBuffer) {
        buf.put_u32(self.recipient_channel);
    }
}

impl Decode for ChannelClose {
    const ID: u8 = id::CHANNEL_CLOSE;

    fn decode_body(buf: &mut PacketBuffer) -> Result<Self> {
        Ok(Self {
            recipient_channel: buf.get_u32()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ChannelRequest {
    pub recipient_channel: u32,
    pub request_type: String,
    pub want_reply: bool,
    pub data: Vec<u8>,
}

impl Encode for ChannelRequest {
    const ID: u8 = id::CHANNEL_REQUEST;

    fn encode_body(&self, buf: &mut PacketBuffer) {
        buf.put_u32(self.recipient_channel).put_str(&self.request_type).put_bool(self.want_reply);
        buf.extend_writable(&self.data);
    }
}

impl Decode for ChannelRequest {
    const ID: u8 = id::CHANNEL_REQUEST;

    fn decode_body(buf: &mut PacketBuffer) -> Result<Self> {
        Ok(Self {
            recipient_channel: buf.get_u32()?,
            request_type: buf.get_string()?,
            want_reply: buf.get_bool()?,
            data: buf.get_rest(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChannelSuccess {
    pub recipient_channel: u32,
}

impl Encode for ChannelSuccess {
    const ID: u8 = id::CHANNEL_SUCCESS;

    fn encode_body(&self, buf: &mut PacketBuffer) {
        buf.put_u32(self.recipient_channel);
    }
}

impl Decode for ChannelSuccess {
    const ID: u8 = id::CHANNEL_SUCCESS;

    fn decode_body(buf: &mut PacketBuffer) -> Result<Self> {
        Ok(Self {
            recipient_channel: buf.get_u32()?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChannelFailure {
    pub recipient_channel: u32,
}

impl Encode for ChannelFailure {
    const ID: u8 = id::CHANNEL_FAILURE;

    fn encode_body(&self, buf: &mut PacketBuffer) {
        buf.put_u32(self.recipient_channel);
    }
}

impl Decode for ChannelFailure {
    const ID: u8 = id::CHANNEL_FAILURE;

    fn decode_body(buf: &mut PacketBuffer) -> Result<Self> {
        Ok(Self {
            recipient_channel: buf.get_u32()?,
        })
    }
}
