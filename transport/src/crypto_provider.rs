//! `CryptoProvider` (§4.7): the out-of-scope collaborator interface for every
//! cryptographic primitive the transport needs, plus the default implementation this
//! crate ships built on the algorithms in [`crate::algorithm`] and [`crate::kex`].
//!
//! Swapping the provider never touches [`crate::codec`] or [`crate::kex`]'s state
//! machines -- both only ever see algorithm names and the `Cipher`/`Mac`/
//! `CompressionAlgorithm` values a provider resolves them to.

use rand::RngCore;

use crate::algorithm::{Cipher, CompressionAlgorithm, Mac};
use crate::host_key::HostKeyVerifier;
use crate::kex::{KexMethod, KexPreferences};

/// Factories for every algorithm family a transport negotiates, keyed by wire name.
///
/// `TransportProtocol` advertises the intersection of the caller's configured
/// preference lists and whatever a provider can actually instantiate -- a provider is
/// free to support a subset of the names in [`crate::kex::KexPreferences::default`].
pub trait CryptoProvider: Send + Sync {
    fn ciphers(&self) -> Vec<String>;
    fn cipher(&self, name: &str) -> Option<Cipher>;

    fn macs(&self) -> Vec<String>;
    fn mac(&self, name: &str) -> Option<Mac>;

    fn compressions(&self) -> Vec<String>;
    fn compression(&self, name: &str) -> Option<CompressionAlgorithm>;

    fn kexes(&self) -> Vec<String>;
    fn kex(&self, name: &str) -> Option<KexMethod>;

    fn host_key_algorithms(&self) -> Vec<String>;

    /// Verify a signature over `data`, made under the named host-key algorithm.
    fn verify_signature(&self, algorithm: &str, key_blob: &[u8], data: &[u8], signature_blob: &[u8]) -> bool;

    fn fill_random(&self, buf: &mut [u8]);
}

/// The provider this crate ships: the cipher/mac/compression/kex sets in
/// [`crate::algorithm`] and [`crate::kex`], `ssh-key` for signature verification, and
/// the system CSPRNG via the `rand` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCryptoProvider;

impl CryptoProvider for DefaultCryptoProvider {
    fn ciphers(&self) -> Vec<String> {
        vec![
            "aes256-ctr", "aes192-ctr", "aes128-ctr", "aes256-cbc", "aes192-cbc", "aes128-cbc",
            "3des-cbc", "blowfish-cbc",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    fn cipher(&self, name: &str) -> Option<Cipher> {
        name.parse().ok()
    }

    fn macs(&self) -> Vec<String> {
        vec!["hmac-sha2-256", "hmac-sha1", "hmac-sha1-96", "hmac-md5", "hmac-md5-96"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn mac(&self, name: &str) -> Option<Mac> {
        name.parse().ok()
    }

    fn compressions(&self) -> Vec<String> {
        vec!["none", "zlib@openssh.com", "zlib"].into_iter().map(String::from).collect()
    }

    fn compression(&self, name: &str) -> Option<CompressionAlgorithm> {
        name.parse().ok()
    }

    fn kexes(&self) -> Vec<String> {
        vec![
            "curve25519-sha256",
            "curve25519-sha256@libssh.org",
            "diffie-hellman-group14-sha1",
            "diffie-hellman-group1-sha1",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    fn kex(&self, name: &str) -> Option<KexMethod> {
        name.parse().ok()
    }

    fn host_key_algorithms(&self) -> Vec<String> {
        vec!["ssh-ed25519", "rsa-sha2-512", "rsa-sha2-256", "ssh-rsa", "ssh-dss"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn verify_signature(&self, _algorithm: &str, key_blob: &[u8], data: &[u8], signature_blob: &[u8]) -> bool {
        use signature::Verifier;

        let Ok(key) = ssh_key::PublicKey::from_bytes(key_blob) else {
            return false;
        };
        let Ok(signature) = ssh_key::Signature::try_from(signature_blob) else {
            return false;
        };

        Verifier::verify(&key, data, &signature).is_ok()
    }

    fn fill_random(&self, buf: &mut [u8]) {
        rand::thread_rng().fill_bytes(buf);
    }
}

/// Narrow a statically configured preference list down to what `provider` can actually
/// instantiate (§4.7): a provider built without, say, `3des-cbc` support silently drops
/// it from the proposal instead of the negotiation failing when a peer picks it.
pub fn effective_preferences(base: &KexPreferences, provider: &dyn CryptoProvider) -> KexPreferences {
    fn filter(preferred: &[String], supported: Vec<String>) -> Vec<String> {
        preferred.iter().filter(|name| supported.contains(name)).cloned().collect()
    }

    KexPreferences {
        kex: filter(&base.kex, provider.kexes()),
        host_key: filter(&base.host_key, provider.host_key_algorithms()),
        ciphers: filter(&base.ciphers, provider.ciphers()),
        macs: filter(&base.macs, provider.macs()),
        compressions: filter(&base.compressions, provider.compressions()),
    }
}

/// Bundles a [`CryptoProvider`] with the host-key verifiers a client registers,
/// mirroring how `TransportProtocol` actually consumes both (§4.3 `addHostKeyVerifier`).
pub struct CryptoContext {
    pub provider: std::sync::Arc<dyn CryptoProvider>,
    pub host_key_verifiers: Vec<Box<dyn HostKeyVerifier>>,
}

impl CryptoContext {
    pub fn new(provider: std::sync::Arc<dyn CryptoProvider>) -> Self {
        Self {
            provider,
            host_key_verifiers: Vec::new(),
        }
    }

    pub fn add_host_key_verifier(&mut self, verifier: Box<dyn HostKeyVerifier>) {
        self.host_key_verifiers.push(verifier);
    }
}

impl Default for CryptoContext {
    fn default() -> Self {
        Self::new(std::sync::Arc::new(DefaultCryptoProvider))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_provider_resolves_every_name_it_advertises() {
        let provider = DefaultCryptoProvider;

        for name in provider.ciphers() {
            assert!(provider.cipher(&name).is_some(), "cipher {name}");
        }
        for name in provider.macs() {
            assert!(provider.mac(&name).is_some(), "mac {name}");
        }
        for name in provider.compressions() {
            assert!(provider.compression(&name).is_some(), "compression {name}");
        }
        for name in provider.kexes() {
            assert!(provider.kex(&name).is_some(), "kex {name}");
        }
    }

    #[test]
    fn effective_preferences_drops_names_the_provider_cannot_instantiate() {
        let base = KexPreferences {
            kex: vec!["curve25519-sha256".into(), "made-up-kex".into()],
            host_key: vec!["ssh-ed25519".into()],
            ciphers: vec!["aes128-ctr".into(), "idea-cbc".into()],
            macs: vec!["hmac-sha1".into()],
            compressions: vec!["none".into()],
        };

        let effective = effective_preferences(&base, &DefaultCryptoProvider);

        assert_eq!(effective.kex, vec!["curve25519-sha256".to_string()]);
        assert_eq!(effective.ciphers, vec!["aes128-ctr".to_string()]);
    }

    #[test]
    fn fill_random_actually_writes_bytes() {
        let provider = DefaultCryptoProvider;
        let mut buf = [0u8; 32];
        provider.fill_random(&mut buf);
        assert!(buf.iter().any(|b| *b != 0));
    }
}
