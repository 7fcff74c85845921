//! `AuthMethod`: the capability surface §9 "Design Notes" prescribes in place of the
//! source material's per-method inheritance hierarchy. Each method owns its own
//! request/reply state machine; [`crate::service::UserAuthService`] only drives the
//! overall method loop (§4.4) and never inspects a method's internals.

use ssh_transport::buffer::PacketBuffer;
use ssh_transport::message::RawMessage;
use ssh_transport::TransportHandle;

use crate::error::Result;

pub mod keyboard_interactive;
pub mod none;
pub mod password;
pub mod publickey;

pub use keyboard_interactive::KeyboardInteractive;
pub use none::None_;
pub use password::Password;
pub use publickey::Publickey;

/// Everything a method needs to build a request or interpret a reply, without being
/// handed the whole service.
pub struct AuthContext<'a> {
    pub username: &'a str,
    pub service_name: &'a str,
    pub session_id: &'a [u8],
    pub transport: &'a TransportHandle,
}

/// What happened after a method-specific reply (message id 60, overloaded per method)
/// was handed to the active method.
pub enum MethodReply {
    /// The method already sent whatever it needed to (e.g. `INFO_RESPONSE`); keep
    /// waiting for `SUCCESS`/`FAILURE`/another method-specific reply.
    Pending,
    /// The method mutated its internal state and has a new `USERAUTH_REQUEST` body
    /// ready; the service should call [`AuthMethod::request_body`] again and resend.
    Resend,
    /// This method cannot continue (bad signature, no new-password callback, ...);
    /// the service should move on to the next configured method.
    GiveUp,
}

/// One `ssh-userauth` method (§4.4). Implementations are stateful across the several
/// request/reply round-trips some methods (`publickey`, `keyboard-interactive`) need.
pub trait AuthMethod: Send {
    /// The wire name sent in `USERAUTH_REQUEST`'s `method name` field.
    fn name(&self) -> &'static str;

    /// Build the method-specific tail of the next `USERAUTH_REQUEST` to send: everything
    /// after the `method name` field, already encoded.
    fn request_body(&mut self, ctx: &AuthContext) -> Vec<u8>;

    /// Handle a method-specific reply (message id 60). Methods that never expect one
    /// (`none`, a first-try `password`) can use the default, which gives up.
    fn handle_reply(&mut self, _raw: &RawMessage, _ctx: &AuthContext) -> Result<MethodReply> {
        Ok(MethodReply::GiveUp)
    }
}

pub(crate) fn body(f: impl FnOnce(&mut PacketBuffer)) -> Vec<u8> {
    let mut buf = PacketBuffer::new();
    f(&mut buf);
    buf.readable().to_vec()
}
