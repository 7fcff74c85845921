//! `ssh-transport-auth`: the `ssh-userauth` client-side method loop (RFC 4252), built as
//! a [`ssh_transport::Service`] on top of a [`ssh_transport::TransportProtocol`].
//!
//! Authentication methods (`none`, `password`, `publickey`, `keyboard-interactive`) are
//! each a small, stateful [`method::AuthMethod`]; [`service::UserAuthService`] drives the
//! overall request/reply loop and resolves once the peer replies `SUCCESS` or every
//! configured method has been exhausted.

pub mod error;
pub mod message;
pub mod method;
pub mod service;

pub use error::{Result, UserAuthError};
pub use method::{AuthContext, AuthMethod, KeyboardInteractive, MethodReply, None_, Password, Publickey};
pub use service::UserAuthService;
