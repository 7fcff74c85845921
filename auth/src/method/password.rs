//! The `password` method (§4.4): a single request, optionally retried once with a new
//! password if the server replies `PASSWD_CHANGEREQ`.

use secrecy::{ExposeSecret, SecretString};
use ssh_transport::message::{Decode, RawMessage};

use crate::message::PasswdChangereq;
use crate::method::{body, AuthContext, AuthMethod, MethodReply};
use crate::Result;

/// Produces a new password given the server's change-request prompt. Returning `None`
/// declines the change, giving up on this method.
pub type NewPasswordCallback = Box<dyn FnMut(&str) -> Option<String> + Send>;

pub struct Password {
    current: SecretString,
    new_password: Option<NewPasswordCallback>,
    pending_change: Option<SecretString>,
}

impl Password {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            current: SecretString::new(password.into()),
            new_password: None,
            pending_change: None,
        }
    }

    /// Install a callback invoked when the server reports the password has expired
    /// (`SSH_MSG_USERAUTH_PASSWD_CHANGEREQ`). Without one, an expired password is a
    /// terminal failure for this method.
    pub fn on_change_required(mut self, callback: NewPasswordCallback) -> Self {
        self.new_password = Some(callback);
        self
    }
}

impl AuthMethod for Password {
    fn name(&self) -> &'static str {
        "password"
    }

    fn request_body(&mut self, _ctx: &AuthContext) -> Vec<u8> {
        match self.pending_change.take() {
            Some(new) => {
                let old = self.current.expose_secret().to_string();
                let new_plain = new.expose_secret().to_string();
                self.current = new;
                body(|buf| {
                    buf.put_bool(true).put_str(&old).put_str(&new_plain);
                })
            }
            None => {
                let current = self.current.expose_secret().to_string();
                body(|buf| {
                    buf.put_bool(false).put_str(&current);
                })
            }
        }
    }

    fn handle_reply(&mut self, raw: &RawMessage, _ctx: &AuthContext) -> Result<MethodReply> {
        let Ok(changereq) = PasswdChangereq::decode(raw.buffer()) else {
            return Ok(MethodReply::GiveUp);
        };

        match self.new_password.as_mut().and_then(|cb| cb(&changereq.prompt)) {
            Some(new) => {
                self.pending_change = Some(SecretString::new(new));
                Ok(MethodReply::Resend)
            }
            None => Ok(MethodReply::GiveUp),
        }
    }
}
