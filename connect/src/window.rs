//! Flow-control windows (RFC 4254 §5.2), adapted to block the calling thread instead of
//! parking an async waker.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Condvar, Mutex};

/// The packet size every channel this crate opens or confirms advertises, and the
/// largest `CHANNEL_DATA`/`CHANNEL_EXTENDED_DATA` payload it will ever send.
pub const MAXIMUM_PACKET_SIZE: u32 = 32768;

/// The local receive window every channel starts with.
pub const INITIAL_WINDOW_SIZE: u32 = 64 * MAXIMUM_PACKET_SIZE;

/// Once the local window has been consumed below this, the next `consume` call tops it
/// back up to [`INITIAL_WINDOW_SIZE`] with a `CHANNEL_WINDOW_ADJUST`.
const ADJUST_THRESHOLD: u32 = INITIAL_WINDOW_SIZE - MAXIMUM_PACKET_SIZE * 5;

/// Tracks how much more data the peer may send us before we must adjust the window.
pub struct LocalWindow {
    remaining: AtomicU32,
}

impl LocalWindow {
    pub fn new() -> Self {
        Self {
            remaining: AtomicU32::new(INITIAL_WINDOW_SIZE),
        }
    }

    /// Accounts for `size` bytes of inbound data, returning the number of bytes to
    /// advertise in a `CHANNEL_WINDOW_ADJUST` if the window has dropped below the
    /// replenishment threshold. `Err(())` means the peer sent more data than the window
    /// it was ever granted allows; the caller turns that into a fatal protocol error
    /// instead of panicking on a hostile or buggy peer.
    pub fn consume(&self, size: u32) -> Result<Option<u32>, ()> {
        let previous = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| remaining.checked_sub(size))
            .map_err(|_| ())?;

        let after = previous - size;
        if after < ADJUST_THRESHOLD {
            let top_up = INITIAL_WINDOW_SIZE - after;
            self.remaining.fetch_add(top_up, Ordering::SeqCst);
            Ok(Some(top_up))
        } else {
            Ok(None)
        }
    }
}

impl Default for LocalWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks how much more data we may send the peer, blocking writers until room opens up
/// or the channel is torn down.
pub struct RemoteWindow {
    remaining: Mutex<u32>,
    room: Condvar,
    closed: Mutex<bool>,
}

impl RemoteWindow {
    pub fn new(initial: u32) -> Self {
        Self {
            remaining: Mutex::new(initial),
            room: Condvar::new(),
            closed: Mutex::new(false),
        }
    }

    /// Blocks until at least one byte of window is available, then reserves and returns
    /// up to `want` bytes worth (never more than currently available). Returns `0` if
    /// the channel has been torn down while waiting.
    pub fn reserve(&self, want: u32) -> u32 {
        let mut remaining = self.remaining.lock().unwrap();
        while *remaining == 0 && !*self.closed.lock().unwrap() {
            remaining = self.room.wait(remaining).unwrap();
        }
        if *self.closed.lock().unwrap() {
            return 0;
        }
        let grant = want.min(*remaining);
        *remaining -= grant;
        grant
    }

    pub fn replenish(&self, bytes_to_add: u32) {
        let mut remaining = self.remaining.lock().unwrap();
        *remaining = remaining.saturating_add(bytes_to_add);
        self.room.notify_all();
    }

    /// Wakes every thread blocked in [`Self::reserve`] so they observe the channel is
    /// gone rather than blocking forever.
    pub fn close(&self) {
        *self.closed.lock().unwrap() = true;
        self.room.notify_all();
    }
}
