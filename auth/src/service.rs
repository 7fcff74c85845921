//! `UserAuthService` (§4.4): drives the `ssh-userauth` method loop as a
//! [`ssh_transport::Service`] installed on the transport, and blocks the calling
//! thread (via a [`Completion`]) until the loop resolves.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ssh_transport::message::{Decode, RawMessage};
use ssh_transport::sync::Completion;
use ssh_transport::{Error as TransportError, Result as TransportResult, Service, TransportHandle};

use crate::message::{id, UserAuthFailure};
use crate::method::{AuthContext, AuthMethod, MethodReply};
use crate::message::UserAuthRequest;
use crate::{Result, UserAuthError};

struct Inner {
    remaining: VecDeque<Box<dyn AuthMethod>>,
    active: Option<Box<dyn AuthMethod>>,
}

/// The `ssh-userauth` [`Service`] (§4.4, §4.5 "Design Notes": the richer `Service`
/// shape, with `notify_unimplemented` and `transport`).
pub struct UserAuthService {
    transport: TransportHandle,
    username: String,
    /// The service the client wants to use once authenticated, e.g. `ssh-connection`
    /// -- *not* `ssh-userauth` itself, which has already been granted by the time this
    /// runs.
    target_service: String,
    session_id: Vec<u8>,
    inner: Mutex<Inner>,
    done: Completion<()>,
}

impl UserAuthService {
    /// Run the method loop to completion: request `ssh-userauth`, probe with `none` to
    /// learn what the server accepts, then try each of `methods` in turn -- after the
    /// first failure, filtered to the server's `continue_with` list -- until one
    /// succeeds or the list is exhausted. Blocks the caller for the whole loop.
    pub fn authenticate(
        transport: TransportHandle,
        username: impl Into<String>,
        target_service: impl Into<String>,
        methods: Vec<Box<dyn AuthMethod>>,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let username = username.into();
        let target_service = target_service.into();
        let timeout = timeout.or_else(|| transport.config().ok().and_then(|c| c.timeouts.auth));
        let session_id = transport.session_id()?;

        let service = Arc::new(Self {
            transport: transport.clone(),
            username,
            target_service,
            session_id,
            inner: Mutex::new(Inner {
                remaining: methods.into_iter().collect(),
                active: None,
            }),
            done: Completion::new(),
        });

        transport.register_fatal(Box::new(service.done.clone()));
        transport.request_service("ssh-userauth", timeout)?;
        transport.set_active_service(Arc::clone(&service) as Arc<dyn Service>)?;

        service.send_probe()?;

        service.done.wait(timeout).map_err(UserAuthError::from)
    }

    fn ctx(&self) -> AuthContext<'_> {
        AuthContext {
            username: &self.username,
            service_name: &self.target_service,
            session_id: &self.session_id,
            transport: &self.transport,
        }
    }

    fn send_request(&self, method: &mut dyn AuthMethod) -> TransportResult<()> {
        let body = method.request_body(&self.ctx());
        self.transport.write(&UserAuthRequest {
            username: self.username.clone(),
            service_name: self.target_service.clone(),
            method_name: method.name().to_string(),
            method_body: body,
        })?;
        Ok(())
    }

    fn send_probe(&self) -> TransportResult<()> {
        use crate::method::None_;

        let mut probe: Box<dyn AuthMethod> = Box::new(None_);
        self.send_request(probe.as_mut())?;
        self.inner.lock().expect("userauth mutex poisoned").active = Some(probe);
        Ok(())
    }

    /// Pick the next remaining method whose name the server's `continue_with` still
    /// allows, and send it. `Ok(false)` if none remain.
    fn try_next(&self, continue_with: &[String]) -> TransportResult<bool> {
        let mut inner = self.inner.lock().expect("userauth mutex poisoned");
        let position = inner
            .remaining
            .iter()
            .position(|m| continue_with.iter().any(|name| name == m.name()));

        let Some(position) = position else {
            return Ok(false);
        };
        let mut method = inner.remaining.remove(position).expect("position is in bounds");
        drop(inner);

        self.send_request(method.as_mut())?;
        self.inner.lock().expect("userauth mutex poisoned").active = Some(method);
        Ok(true)
    }

    /// Like [`Self::try_next`], but without a `continue_with` filter -- used when a
    /// method gives up client-side before the server has told us what else it accepts
    /// (e.g. a `password` change request with no callback installed).
    fn try_next_any(&self) -> TransportResult<bool> {
        let mut inner = self.inner.lock().expect("userauth mutex poisoned");
        let Some(mut method) = inner.remaining.pop_front() else {
            return Ok(false);
        };
        drop(inner);

        self.send_request(method.as_mut())?;
        self.inner.lock().expect("userauth mutex poisoned").active = Some(method);
        Ok(true)
    }

    fn fail_exhausted(&self) {
        tracing::debug!("authentication methods exhausted");
        self.done.fail(TransportError::ProtocolError(
            UserAuthError::Exhausted.to_string(),
        ));
    }
}

impl Service for UserAuthService {
    fn name(&self) -> &str {
        "ssh-userauth"
    }

    fn handle(&self, message: RawMessage) -> TransportResult<()> {
        match message.msg_id() {
            Some(id::USERAUTH_BANNER) => {
                if let Ok(banner) = crate::message::UserAuthBanner::decode(message.buffer()) {
                    tracing::debug!(banner = %banner.message, "received userauth banner");
                }
                Ok(())
            }

            Some(id::USERAUTH_SUCCESS) => {
                tracing::debug!(username = %self.username, "authentication succeeded");
                // Also starts any `zlib@openssh.com` stream that was waiting on
                // authentication (§4.4), via `TransportProtocol::set_authenticated`.
                self.transport.mark_authenticated()?;
                self.done.complete(());
                Ok(())
            }

            Some(id::USERAUTH_FAILURE) => {
                let failure = UserAuthFailure::decode(message.buffer())?;
                tracing::debug!(
                    continue_with = ?failure.continue_with,
                    partial = failure.partial_success,
                    "authentication attempt rejected"
                );

                if self.try_next(&failure.continue_with)? {
                    Ok(())
                } else {
                    self.fail_exhausted();
                    Ok(())
                }
            }

            Some(id::USERAUTH_METHOD_SPECIFIC) => {
                let method = {
                    let mut inner = self.inner.lock().expect("userauth mutex poisoned");
                    inner.active.take()
                };
                let Some(mut method) = method else {
                    return Err(TransportError::UnexpectedMessage(
                        "method-specific userauth reply with no attempt in flight".into(),
                    ));
                };

                let outcome = method
                    .handle_reply(&message, &self.ctx())
                    .map_err(|e| TransportError::ProtocolError(e.to_string()))?;

                match outcome {
                    MethodReply::Pending => {
                        self.inner.lock().expect("userauth mutex poisoned").active = Some(method);
                        Ok(())
                    }
                    MethodReply::Resend => {
                        self.send_request(method.as_mut())?;
                        self.inner.lock().expect("userauth mutex poisoned").active = Some(method);
                        Ok(())
                    }
                    MethodReply::GiveUp => {
                        if self.try_next_any()? {
                            Ok(())
                        } else {
                            self.fail_exhausted();
                            Ok(())
                        }
                    }
                }
            }

            _ => Err(TransportError::UnexpectedMessage(format!(
                "unexpected message id {:?} for the ssh-userauth service",
                message.msg_id()
            ))),
        }
    }

    fn notify_unimplemented(&self, sequence: u32) {
        tracing::warn!(sequence, "peer does not implement a userauth packet we sent");
    }

    fn transport(&self) -> &TransportHandle {
        &self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authenticate_fails_fast_without_a_connected_transport() {
        let transport = TransportHandle::detached();
        let err = UserAuthService::authenticate(transport, "alice", "ssh-connection", Vec::new(), None).unwrap_err();
        assert!(matches!(err, UserAuthError::Transport(TransportError::Stopped)));
    }
}
