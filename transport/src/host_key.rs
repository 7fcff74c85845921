//! The host-key acceptance callback (§4.2 step 4, §6): verification of the cryptographic
//! signature is mandatory and handled by [`crate::kex`] itself; this is the *policy*
//! layer above it, analogous to `known_hosts` in other clients. Persistence of accepted
//! keys is explicitly out of scope -- applications own that storage.

use ssh_key::PublicKey;

/// Accepts or rejects a server host key, after its signature over the exchange hash has
/// already been checked.
///
/// Registered verifiers are tried in registration order; the first one to return `true`
/// wins. Called on every key exchange, including re-keys.
pub trait HostKeyVerifier: Send + Sync {
    fn verify(&self, remote_host: &str, key: &PublicKey) -> bool;
}

/// Accepts whatever key the server presents. Useful for tests and first-connect flows;
/// never the right default for a production client.
pub struct AcceptAll;

impl HostKeyVerifier for AcceptAll {
    fn verify(&self, _remote_host: &str, _key: &PublicKey) -> bool {
        true
    }
}

/// Accepts only keys matching one of a fixed set, compared by their SSH wire encoding.
pub struct Pinned(pub Vec<Vec<u8>>);

impl HostKeyVerifier for Pinned {
    fn verify(&self, _remote_host: &str, key: &PublicKey) -> bool {
        let Ok(encoded) = key.to_bytes() else {
            return false;
        };
        self.0.iter().any(|pinned| pinned == &encoded)
    }
}
