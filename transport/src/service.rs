//! `Service` and `ServiceDispatcher` (§4.3, §4.5 "Design Notes"): the seam between the
//! transport and whatever SSH sub-protocol (`ssh-userauth`, `ssh-connection`) is
//! currently multiplexed over it.
//!
//! Two shapes of this interface existed in the code this crate grew out of, mid
//! refactor; this keeps the richer one, with `notify_unimplemented` and `transport`, as
//! the one real services (in the `ssh-transport-auth`/`ssh-transport-connect` crates)
//! implement against.

use std::sync::Arc;

use crate::error::Result;
use crate::message::RawMessage;
use crate::transport::TransportHandle;

/// An SSH sub-protocol multiplexed over one transport once it's been granted via a
/// `SSH_MSG_SERVICE_REQUEST`/`ACCEPT` handshake.
pub trait Service: Send + Sync {
    /// The name advertised in `SSH_MSG_SERVICE_REQUEST` (e.g. `ssh-userauth`).
    fn name(&self) -> &str;

    /// A non-KEX, non-transport-level packet addressed to this service.
    fn handle(&self, message: RawMessage) -> Result<()>;

    /// The peer replied `SSH_MSG_UNIMPLEMENTED` to a packet this service sent.
    fn notify_unimplemented(&self, sequence: u32);

    /// The handle back to the owning transport, for services that need to write.
    fn transport(&self) -> &TransportHandle;
}

/// Routes inbound packets to whichever [`Service`] is currently active, and runs the
/// `SSH_MSG_SERVICE_REQUEST`/`SERVICE_ACCEPT` handshake that switches it (§4.3, §4.5).
#[derive(Default)]
pub struct ServiceDispatcher {
    active: std::sync::Mutex<Option<Arc<dyn Service>>>,
}

impl ServiceDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_active(&self, service: Arc<dyn Service>) {
        tracing::debug!(service = service.name(), "switching active service");
        *self.active.lock().expect("service dispatcher mutex poisoned") = Some(service);
    }

    pub fn active(&self) -> Option<Arc<dyn Service>> {
        self.active.lock().expect("service dispatcher mutex poisoned").clone()
    }

    /// Route one packet per §4.3's dispatch rule: deliver to the active service, or
    /// tell the caller to reply `UNIMPLEMENTED` if there isn't one.
    pub fn dispatch(&self, message: RawMessage) -> Result<DispatchOutcome> {
        match self.active() {
            Some(service) => {
                service.handle(message)?;
                Ok(DispatchOutcome::Handled)
            }
            None => Ok(DispatchOutcome::NoActiveService),
        }
    }

    pub fn notify_unimplemented(&self, sequence: u32) {
        if let Some(service) = self.active() {
            service.notify_unimplemented(sequence);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled,
    NoActiveService,
}
