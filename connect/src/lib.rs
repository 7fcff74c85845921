//! `ssh-transport-connect`: the `ssh-connection` channel multiplexer (RFC 4254), built
//! as a [`ssh_transport::Service`] on top of a [`ssh_transport::TransportProtocol`].
//!
//! [`ConnectionService`] owns the channel table and drives the `CHANNEL_OPEN`/request/
//! data/close traffic; [`channel::Channel`] is the per-channel handle applications use
//! to read, write, and issue requests. Peer-initiated channels (`forwarded-tcpip`, `x11`
//! and the like) are accepted through an [`opener::OpenerRegistry`] registered ahead of
//! time.

pub mod channel;
pub mod error;
pub mod message;
pub mod opener;
pub mod service;
pub mod window;

pub use channel::{Channel, ChannelReader, ChannelWriter};
pub use error::{ConnectionError, Result};
pub use opener::{ForwardedChannelOpener, OpenerRegistry};
pub use service::ConnectionService;
