//! The `publickey` method (§4.4): a two-phase probe-then-sign exchange. The first
//! request carries no signature, purely asking the server whether it likes the
//! algorithm/key pair (`has_signature = false`); only once it replies `PK_OK` is the
//! actual signature computed and sent.

use signature::Signer;
use ssh_key::{PrivateKey, Signature};
use ssh_transport::buffer::PacketBuffer;
use ssh_transport::message::{Decode, RawMessage};

use crate::message::{id, PkOk};
use crate::method::{body, AuthContext, AuthMethod, MethodReply};
use crate::{Result, UserAuthError};

pub struct Publickey {
    key: PrivateKey,
    signature: Option<Vec<u8>>,
}

impl Publickey {
    pub fn new(key: impl Into<PrivateKey>) -> Self {
        Self {
            key: key.into(),
            signature: None,
        }
    }

    /// The RFC 4252 §7 data signed over: `session_id || USERAUTH_REQUEST fields with
    /// has_signature = true`.
    fn signed_data(&self, ctx: &AuthContext, algorithm: &str, blob: &[u8]) -> Vec<u8> {
        let mut buf = PacketBuffer::with_headroom(5);
        buf.put_bytes(ctx.session_id)
            .put_u8(crate::message::id::USERAUTH_REQUEST)
            .put_str(ctx.username)
            .put_str(ctx.service_name)
            .put_str("publickey")
            .put_bool(true)
            .put_str(algorithm)
            .put_bytes(blob);
        buf.readable().to_vec()
    }
}

impl AuthMethod for Publickey {
    fn name(&self) -> &'static str {
        "publickey"
    }

    fn request_body(&mut self, ctx: &AuthContext) -> Vec<u8> {
        let algorithm = self.key.algorithm().as_str().to_string();
        let blob = self.key.public_key().to_bytes().unwrap_or_default();

        match self.signature.take() {
            Some(signature) => body(|buf| {
                buf.put_bool(true).put_str(&algorithm).put_bytes(&blob).put_bytes(&signature);
            }),
            None => body(|buf| {
                buf.put_bool(false).put_str(&algorithm).put_bytes(&blob);
            }),
        }
    }

    fn handle_reply(&mut self, raw: &RawMessage, ctx: &AuthContext) -> Result<MethodReply> {
        if raw.msg_id() != Some(id::USERAUTH_METHOD_SPECIFIC) {
            return Ok(MethodReply::GiveUp);
        }
        let Ok(pk_ok) = PkOk::decode(raw.buffer()) else {
            return Ok(MethodReply::GiveUp);
        };

        if pk_ok.algorithm != self.key.algorithm().as_str() {
            return Ok(MethodReply::GiveUp);
        }

        let data = self.signed_data(ctx, &pk_ok.algorithm, &pk_ok.blob);
        let signature: Signature = self
            .key
            .try_sign(&data)
            .map_err(|e| UserAuthError::MethodFailed(format!("publickey signing failed: {e}")))?;
        let encoded = signature
            .to_bytes()
            .map_err(|e| UserAuthError::MethodFailed(format!("signature encoding failed: {e}")))?;

        self.signature = Some(encoded);
        Ok(MethodReply::Resend)
    }
}
