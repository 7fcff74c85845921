//! Wire messages for the transport (`SSH-TRANS`) layer, RFC 4253 §12.
//!
//! Service-specific messages (`ssh-userauth`, `ssh-connection`) are defined by the
//! crates that own those services; this module only carries what the transport itself
//! must be able to recognize by message id (§4.3: disconnect / ignore / debug /
//! unimplemented / kex), plus the generic envelope every `Service` consumes.

use crate::buffer::PacketBuffer;
use crate::error::{DisconnectReason, Error, Result};

pub mod id {
    pub const DISCONNECT: u8 = 1;
    pub const IGNORE: u8 = 2;
    pub const UNIMPLEMENTED: u8 = 3;
    pub const DEBUG: u8 = 4;
    pub const SERVICE_REQUEST: u8 = 5;
    pub const SERVICE_ACCEPT: u8 = 6;

    pub const KEXINIT: u8 = 20;
    pub const NEWKEYS: u8 = 21;

    /// Overloaded per the negotiated kex method, RFC 4250 §4.1.
    pub const KEX_FOLLOWUP_30: u8 = 30;
    pub const KEX_FOLLOWUP_31: u8 = 31;
}

/// A raw, not-yet-typed packet payload together with the sequence number it was
/// received at (or will be sent at) -- what a [`crate::service::Service`] is handed.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub payload: Vec<u8>,
    pub seq: u32,
}

impl RawMessage {
    pub fn msg_id(&self) -> Option<u8> {
        self.payload.first().copied()
    }

    pub fn buffer(&self) -> PacketBuffer {
        PacketBuffer::from_payload(self.payload.clone())
    }
}

pub trait Encode {
    const ID: u8;

    fn encode_body(&self, buf: &mut PacketBuffer);

    fn encode(&self) -> PacketBuffer {
        let mut buf = PacketBuffer::with_headroom(5);
        buf.put_u8(Self::ID);
        self.encode_body(&mut buf);
        buf
    }
}

pub trait Decode: Sized {
    const ID: u8;

    fn decode_body(buf: &mut PacketBuffer) -> Result<Self>;

    fn decode(mut buf: PacketBuffer) -> Result<Self> {
        let id = buf.get_u8()?;
        if id != Self::ID {
            return Err(Error::UnexpectedMessage(format!(
                "expected message id {}, got {id}",
                Self::ID
            )));
        }
        Self::decode_body(&mut buf)
    }
}

#[derive(Debug, Clone)]
pub struct Disconnect {
    pub reason: u32,
    pub description: String,
    pub language: String,
}

impl Disconnect {
    pub fn new(reason: DisconnectReason, description: impl Into<String>) -> Self {
        Self {
            reason: reason.code(),
            description: description.into(),
            language: String::new(),
        }
    }
}

impl Encode for Disconnect {
    const ID: u8 = id::DISCONNECT;

    fn encode_body(&self, buf: &mut PacketBuffer) {
        buf.put_u32(self.reason)
            .put_str(&self.description)
            .put_str(&self.language);
    }
}

impl Decode for Disconnect {
    const ID: u8 = id::DISCONNECT;

    fn decode_body(buf: &mut PacketBuffer) -> Result<Self> {
        Ok(Self {
            reason: buf.get_u32()?,
            description: buf.get_string()?,
            language: buf.get_string().unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct Ignore {
    pub data: Vec<u8>,
}

impl Encode for Ignore {
    const ID: u8 = id::IGNORE;

    fn encode_body(&self, buf: &mut PacketBuffer) {
        buf.put_bytes(&self.data);
    }
}

impl Decode for Ignore {
    const ID: u8 = id::IGNORE;

    fn decode_body(buf: &mut PacketBuffer) -> Result<Self> {
        Ok(Self {
            data: buf.get_bytes()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct DebugMessage {
    pub always_display: bool,
    pub message: String,
    pub language: String,
}

impl Decode for DebugMessage {
    const ID: u8 = id::DEBUG;

    fn decode_body(buf: &mut PacketBuffer) -> Result<Self> {
        Ok(Self {
            always_display: buf.get_bool()?,
            message: buf.get_string()?,
            language: buf.get_string().unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Unimplemented {
    pub seq: u32,
}

impl Encode for Unimplemented {
    const ID: u8 = id::UNIMPLEMENTED;

    fn encode_body(&self, buf: &mut PacketBuffer) {
        buf.put_u32(self.seq);
    }
}

impl Decode for Unimplemented {
    const ID: u8 = id::UNIMPLEMENTED;

    fn decode_body(buf: &mut PacketBuffer) -> Result<Self> {
        Ok(Self { seq: buf.get_u32()? })
    }
}

#[derive(Debug, Clone)]
pub struct ServiceRequest {
    pub service_name: String,
}

impl Encode for ServiceRequest {
    const ID: u8 = id::SERVICE_REQUEST;

    fn encode_body(&self, buf: &mut PacketBuffer) {
        buf.put_str(&self.service_name);
    }
}

impl Decode for ServiceRequest {
    const ID: u8 = id::SERVICE_REQUEST;

    fn decode_body(buf: &mut PacketBuffer) -> Result<Self> {
        Ok(Self {
            service_name: buf.get_string()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ServiceAccept {
    pub service_name: String,
}

impl Encode for ServiceAccept {
    const ID: u8 = id::SERVICE_ACCEPT;

    fn encode_body(&self, buf: &mut PacketBuffer) {
        buf.put_str(&self.service_name);
    }
}

impl Decode for ServiceAccept {
    const ID: u8 = id::SERVICE_ACCEPT;

    fn decode_body(buf: &mut PacketBuffer) -> Result<Self> {
        Ok(Self {
            service_name: buf.get_string()?,
        })
    }
}

/// The ten ordered name-lists advertised in a `SSH_MSG_KEXINIT` (RFC 4253 §7.1).
#[derive(Debug, Clone, Default)]
pub struct KexInit {
    pub cookie: [u8; 16],
    pub kex_algorithms: Vec<String>,
    pub server_host_key_algorithms: Vec<String>,
    pub encryption_algorithms_client_to_server: Vec<String>,
    pub encryption_algorithms_server_to_client: Vec<String>,
    pub mac_algorithms_client_to_server: Vec<String>,
    pub mac_algorithms_server_to_client: Vec<String>,
    pub compression_algorithms_client_to_server: Vec<String>,
    pub compression_algorithms_server_to_client: Vec<String>,
    pub languages_client_to_server: Vec<String>,
    pub languages_server_to_client: Vec<String>,
    pub first_kex_packet_follows: bool,
}

impl Encode for KexInit {
    const ID: u8 = id::KEXINIT;

    fn encode_body(&self, buf: &mut PacketBuffer) {
        buf.extend_writable(&self.cookie);
        buf.put_namelist(&self.kex_algorithms)
            .put_namelist(&self.server_host_key_algorithms)
            .put_namelist(&self.encryption_algorithms_client_to_server)
            .put_namelist(&self.encryption_algorithms_server_to_client)
            .put_namelist(&self.mac_algorithms_client_to_server)
            .put_namelist(&self.mac_algorithms_server_to_client)
            .put_namelist(&self.compression_algorithms_client_to_server)
            .put_namelist(&self.compression_algorithms_server_to_client)
            .put_namelist(&self.languages_client_to_server)
            .put_namelist(&self.languages_server_to_client)
            .put_bool(self.first_kex_packet_follows)
            .put_u32(0); // reserved
    }
}

impl Decode for KexInit {
    const ID: u8 = id::KEXINIT;

    fn decode_body(buf: &mut PacketBuffer) -> Result<Self> {
        let mut cookie = [0u8; 16];
        for b in cookie.iter_mut() {
            *b = buf.get_u8()?;
        }

        let me = Self {
            cookie,
            kex_algorithms: buf.get_namelist()?,
            server_host_key_algorithms: buf.get_namelist()?,
            encryption_algorithms_client_to_server: buf.get_namelist()?,
            encryption_algorithms_server_to_client: buf.get_namelist()?,
            mac_algorithms_client_to_server: buf.get_namelist()?,
            mac_algorithms_server_to_client: buf.get_namelist()?,
            compression_algorithms_client_to_server: buf.get_namelist()?,
            compression_algorithms_server_to_client: buf.get_namelist()?,
            languages_client_to_server: buf.get_namelist()?,
            languages_server_to_client: buf.get_namelist()?,
            first_kex_packet_follows: buf.get_bool()?,
        };
        let _reserved = buf.get_u32()?;

        Ok(me)
    }
}

/// `SSH_MSG_KEXDH_INIT`, overloaded at id 30 for the classic finite-field DH methods.
#[derive(Debug, Clone)]
pub struct KexDhInit {
    pub e: num_bigint::BigUint,
}

impl Encode for KexDhInit {
    const ID: u8 = id::KEX_FOLLOWUP_30;

    fn encode_body(&self, buf: &mut PacketBuffer) {
        buf.put_biguint(&self.e);
    }
}

impl Decode for KexDhInit {
    const ID: u8 = id::KEX_FOLLOWUP_30;

    fn decode_body(buf: &mut PacketBuffer) -> Result<Self> {
        Ok(Self {
            e: buf.get_biguint()?,
        })
    }
}

/// `SSH_MSG_KEXDH_REPLY`, overloaded at id 31.
#[derive(Debug, Clone)]
pub struct KexDhReply {
    pub host_key: Vec<u8>,
    pub f: num_bigint::BigUint,
    pub signature: Vec<u8>,
}

impl Encode for KexDhReply {
    const ID: u8 = id::KEX_FOLLOWUP_31;

    fn encode_body(&self, buf: &mut PacketBuffer) {
        buf.put_bytes(&self.host_key)
            .put_biguint(&self.f)
            .put_bytes(&self.signature);
    }
}

impl Decode for KexDhReply {
    const ID: u8 = id::KEX_FOLLOWUP_31;

    fn decode_body(buf: &mut PacketBuffer) -> Result<Self> {
        Ok(Self {
            host_key: buf.get_bytes()?,
            f: buf.get_biguint()?,
            signature: buf.get_bytes()?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NewKeys;

impl Encode for NewKeys {
    const ID: u8 = id::NEWKEYS;

    fn encode_body(&self, _buf: &mut PacketBuffer) {}
}

impl Decode for NewKeys {
    const ID: u8 = id::NEWKEYS;

    fn decode_body(_buf: &mut PacketBuffer) -> Result<Self> {
        Ok(Self)
    }
}
