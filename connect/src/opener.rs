//! Acceptance of peer-initiated channels (`forwarded-tcpip`, `x11`, and other
//! `CHANNEL_OPEN` types this side did not request), RFC 4254 §7/§11.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::channel::Channel;

/// Handles a `CHANNEL_OPEN` for one channel type that the peer may open unsolicited.
///
/// Registered callbacks run on the read-pump thread's behalf (via a spawned thread, see
/// [`OpenerRegistry::dispatch`]) after the channel has already been confirmed, so they
/// should hand the channel off quickly rather than block the caller who registered them.
pub trait ForwardedChannelOpener: Send + Sync {
    /// Called once per accepted channel of this opener's type.
    fn accept(&self, channel: Channel);
}

impl<F> ForwardedChannelOpener for F
where
    F: Fn(Channel) + Send + Sync,
{
    fn accept(&self, channel: Channel) {
        (self)(channel)
    }
}

/// Registry of [`ForwardedChannelOpener`]s keyed by the `channel type` string from
/// `CHANNEL_OPEN` (§4.6: unregistered types are rejected with `UnknownChannelType`).
#[derive(Default, Clone)]
pub struct OpenerRegistry {
    openers: Arc<Mutex<HashMap<String, Arc<dyn ForwardedChannelOpener>>>>,
}

impl OpenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, channel_type: impl Into<String>, opener: impl ForwardedChannelOpener + 'static) {
        self.openers
            .lock()
            .unwrap()
            .insert(channel_type.into(), Arc::new(opener));
    }

    pub fn unregister(&self, channel_type: &str) {
        self.openers.lock().unwrap().remove(channel_type);
    }

    pub fn is_registered(&self, channel_type: &str) -> bool {
        self.openers.lock().unwrap().contains_key(channel_type)
    }

    /// Hands the confirmed channel to its type's opener on a dedicated thread.
    pub fn dispatch(&self, channel_type: &str, channel: Channel) {
        if let Some(opener) = self.openers.lock().unwrap().get(channel_type).cloned() {
            std::thread::Builder::new()
                .name(format!("ssh-connect-opener-{channel_type}"))
                .spawn(move || opener.accept(channel))
                .expect("failed to spawn channel-opener thread");
        }
    }
}
