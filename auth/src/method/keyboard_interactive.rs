//! The `keyboard-interactive` method (§4.4): the server drives an arbitrary number of
//! `INFO_REQUEST`/`INFO_RESPONSE` round-trips before finally replying
//! `SUCCESS`/`FAILURE` at the transport-visible level.

use ssh_transport::message::{Decode, RawMessage};

use crate::message::{id, InfoRequest, InfoResponse, Prompt};
use crate::method::{body, AuthContext, AuthMethod, MethodReply};
use crate::Result;

/// Answers one round of prompts. Given the prompt texts (echo hints included), returns
/// one response string per prompt, in order.
pub type PromptCallback = Box<dyn FnMut(&str, &str, &[Prompt]) -> Vec<String> + Send>;

pub struct KeyboardInteractive {
    prompt: PromptCallback,
}

impl KeyboardInteractive {
    pub fn new(prompt: PromptCallback) -> Self {
        Self { prompt }
    }
}

impl AuthMethod for KeyboardInteractive {
    fn name(&self) -> &'static str {
        "keyboard-interactive"
    }

    fn request_body(&mut self, _ctx: &AuthContext) -> Vec<u8> {
        // language tag, then an empty submethods name-list: let the server pick.
        body(|buf| {
            buf.put_str("").put_str("");
        })
    }

    fn handle_reply(&mut self, raw: &RawMessage, ctx: &AuthContext) -> Result<MethodReply> {
        if raw.msg_id() != Some(id::USERAUTH_METHOD_SPECIFIC) {
            return Ok(MethodReply::GiveUp);
        }
        let Ok(info_request) = InfoRequest::decode(raw.buffer()) else {
            return Ok(MethodReply::GiveUp);
        };

        let responses = (self.prompt)(&info_request.name, &info_request.instruction, &info_request.prompts);
        ctx.transport.write(&InfoResponse { responses })?;

        Ok(MethodReply::Pending)
    }
}

impl std::fmt::Debug for KeyboardInteractive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyboardInteractive").finish_non_exhaustive()
    }
}
