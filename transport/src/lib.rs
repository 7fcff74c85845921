//! `ssh-transport`: an SSH-2 transport-layer client (RFC 4253) -- version exchange,
//! binary packet protocol framing, key exchange and re-keying, and service dispatch.
//!
//! This crate stops at the boundary of RFC 4253: authentication (`ssh-userauth`) and
//! connection multiplexing (`ssh-connection`, channels) are separate crates built as
//! [`service::Service`] implementations on top of a [`transport::TransportProtocol`].

pub mod algorithm;
pub mod buffer;
pub mod codec;
pub mod config;
pub mod crypto_provider;
pub mod error;
pub mod host_key;
pub mod kex;
pub mod message;
pub mod service;
pub mod sync;
pub mod transport;

pub use config::{ClientConfig, ClientConfigBuilder, RekeyThresholds, Timeouts};
pub use crypto_provider::{CryptoContext, CryptoProvider, DefaultCryptoProvider};
pub use error::{DisconnectReason, Error, Result};
pub use host_key::{AcceptAll, HostKeyVerifier, Pinned};
pub use kex::KexPreferences;
pub use message::{Decode, Encode, RawMessage};
pub use service::{DispatchOutcome, Service, ServiceDispatcher};
pub use transport::{BoxedReader, BoxedWriter, LifecycleState, TransportHandle, TransportProtocol};
