//! Wire messages for the `ssh-userauth` service, RFC 4252.
//!
//! Message id 60 is overloaded per the method currently in flight (`PK_OK`,
//! `PASSWD_CHANGEREQ`, `INFO_REQUEST`) exactly as RFC 4250 §4.2 prescribes; callers
//! decode it as whichever of the three their active method expects.

use ssh_transport::buffer::PacketBuffer;
use ssh_transport::{Decode, Encode, Result};

pub mod id {
    pub const USERAUTH_REQUEST: u8 = 50;
    pub const USERAUTH_FAILURE: u8 = 51;
    pub const USERAUTH_SUCCESS: u8 = 52;
    pub const USERAUTH_BANNER: u8 = 53;

    /// Overloaded: `PK_OK` (publickey), `PASSWD_CHANGEREQ` (password), `INFO_REQUEST`
    /// (keyboard-interactive).
    pub const USERAUTH_METHOD_SPECIFIC: u8 = 60;
    pub const USERAUTH_INFO_RESPONSE: u8 = 61;
}

/// `SSH_MSG_USERAUTH_REQUEST`. `method_body` is the already-encoded, method-specific
/// tail of the packet (everything after `method name`), built by the active
/// [`crate::method::AuthMethod`].
#[derive(Debug, Clone)]
pub struct UserAuthRequest {
    pub username: String,
    pub service_name: String,
    pub method_name: String,
    pub method_body: Vec<u8>,
}

impl Encode for UserAuthRequest {
    const ID: u8 = id::USERAUTH_REQUEST;

    fn encode_body(&self, buf: &mut PacketBuffer) {
        buf.put_str(&self.username)
            .put_str(&self.service_name)
            .put_str(&self.method_name);
        buf.extend_writable(&self.method_body);
    }
}

#[derive(Debug, Clone)]
pub struct UserAuthFailure {
    pub continue_with: Vec<String>,
    pub partial_success: bool,
}

impl Decode for UserAuthFailure {
    const ID: u8 = id::USERAUTH_FAILURE;

    fn decode_body(buf: &mut PacketBuffer) -> Result<Self> {
        Ok(Self {
            continue_with: buf.get_namelist()?,
            partial_success: buf.get_bool()?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UserAuthSuccess;

impl Decode for UserAuthSuccess {
    const ID: u8 = id::USERAUTH_SUCCESS;

    fn decode_body(_buf: &mut PacketBuffer) -> Result<Self> {
        Ok(Self)
    }
}

#[derive(Debug, Clone)]
pub struct UserAuthBanner {
    pub message: String,
    pub language: String,
}

impl Decode for UserAuthBanner {
    const ID: u8 = id::USERAUTH_BANNER;

    fn decode_body(buf: &mut PacketBuffer) -> Result<Self> {
        Ok(Self {
            message: buf.get_string()?,
            language: buf.get_string().unwrap_or_default(),
        })
    }
}

/// Reply to a `publickey` probe (`has_signature = false`).
#[derive(Debug, Clone)]
pub struct PkOk {
    pub algorithm: String,
    pub blob: Vec<u8>,
}

impl Decode for PkOk {
    const ID: u8 = id::USERAUTH_METHOD_SPECIFIC;

    fn decode_body(buf: &mut PacketBuffer) -> Result<Self> {
        Ok(Self {
            algorithm: buf.get_string()?,
            blob: buf.get_bytes()?,
        })
    }
}

/// Reply to a `password` request whose password has expired.
#[derive(Debug, Clone)]
pub struct PasswdChangereq {
    pub prompt: String,
    pub language: String,
}

impl Decode for PasswdChangereq {
    const ID: u8 = id::USERAUTH_METHOD_SPECIFIC;

    fn decode_body(buf: &mut PacketBuffer) -> Result<Self> {
        Ok(Self {
            prompt: buf.get_string()?,
            language: buf.get_string().unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Prompt {
    pub text: String,
    pub echo: bool,
}

/// `keyboard-interactive`'s `INFO_REQUEST`.
#[derive(Debug, Clone)]
pub struct InfoRequest {
    pub name: String,
    pub instruction: String,
    pub language: String,
    pub prompts: Vec<Prompt>,
}

impl Decode for InfoRequest {
    const ID: u8 = id::USERAUTH_METHOD_SPECIFIC;

    fn decode_body(buf: &mut PacketBuffer) -> Result<Self> {
        let name = buf.get_string()?;
        let instruction = buf.get_string()?;
        let language = buf.get_string().unwrap_or_default();
        let count = buf.get_u32()?;
        let mut prompts = Vec::with_capacity(count as usize);
        for _ in 0..count {
            prompts.push(Prompt {
                text: buf.get_string()?,
                echo: buf.get_bool()?,
            });
        }
        Ok(Self {
            name,
            instruction,
            language,
            prompts,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct InfoResponse {
    pub responses: Vec<String>,
}

impl Encode for InfoResponse {
    const ID: u8 = id::USERAUTH_INFO_RESPONSE;

    fn encode_body(&self, buf: &mut PacketBuffer) {
        buf.put_u32(self.responses.len() as u32);
        for response in &self.responses {
            buf.put_str(response);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_request_roundtrips_through_a_hand_built_buffer() {
        let mut buf = PacketBuffer::with_headroom(5);
        buf.put_u8(id::USERAUTH_METHOD_SPECIFIC)
            .put_str("")
            .put_str("")
            .put_str("")
            .put_u32(2)
            .put_str("Password: ")
            .put_bool(false)
            .put_str("Token: ")
            .put_bool(true);

        let decoded = InfoRequest::decode(PacketBuffer::from_payload(buf.readable().to_vec())).unwrap();
        assert_eq!(decoded.prompts.len(), 2);
        assert!(!decoded.prompts[0].echo);
        assert!(decoded.prompts[1].echo);
    }
}
