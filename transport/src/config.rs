//! `ClientConfig` (§3 "Client configuration"): the typed, in-process configuration
//! surface for a transport. No file format is parsed here -- that's an application
//! concern layered on top, the same separation the teacher keeps between its session
//! builder and whatever calls it.

use std::sync::Arc;
use std::time::Duration;

use crate::crypto_provider::{CryptoProvider, DefaultCryptoProvider};
use crate::kex::KexPreferences;

const DEFAULT_SOFTWARE_VERSION: &str = concat!("ssh-transport_", env!("CARGO_PKG_VERSION"));
const DEFAULT_REKEY_BYTES: u64 = 1024 * 1024 * 1024;
const DEFAULT_REKEY_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Per-operation timeouts (§3, §6 "Suspension points"). `None` means "block forever."
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub kex: Option<Duration>,
    pub auth: Option<Duration>,
    pub channel_open: Option<Duration>,
    pub request: Option<Duration>,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            kex: Some(Duration::from_secs(30)),
            auth: Some(Duration::from_secs(120)),
            channel_open: Some(Duration::from_secs(30)),
            request: Some(Duration::from_secs(30)),
        }
    }
}

/// The thresholds that trigger an unsolicited re-key (§4.2 "Re-keying").
#[derive(Debug, Clone, Copy)]
pub struct RekeyThresholds {
    pub bytes: u64,
    pub interval: Duration,
}

impl Default for RekeyThresholds {
    fn default() -> Self {
        Self {
            bytes: DEFAULT_REKEY_BYTES,
            interval: DEFAULT_REKEY_INTERVAL,
        }
    }
}

/// Immutable, `Arc`-shared configuration for one transport and the services built on
/// top of it. Built once via [`ClientConfigBuilder`] and never mutated afterwards.
#[derive(Clone)]
pub struct ClientConfig {
    pub software_version: String,
    pub kex_preferences: KexPreferences,
    pub timeouts: Timeouts,
    pub rekey: RekeyThresholds,
    pub crypto_provider: Arc<dyn CryptoProvider>,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("software_version", &self.software_version)
            .field("kex_preferences", &self.kex_preferences)
            .field("timeouts", &self.timeouts)
            .field("rekey", &self.rekey)
            .finish_non_exhaustive()
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }
}

/// Builder for [`ClientConfig`]. Every setter takes `self` by value so calls chain.
pub struct ClientConfigBuilder {
    software_version: String,
    kex_preferences: KexPreferences,
    timeouts: Timeouts,
    rekey: RekeyThresholds,
    crypto_provider: Arc<dyn CryptoProvider>,
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self {
            software_version: DEFAULT_SOFTWARE_VERSION.to_string(),
            kex_preferences: KexPreferences::default(),
            timeouts: Timeouts::default(),
            rekey: RekeyThresholds::default(),
            crypto_provider: Arc::new(DefaultCryptoProvider),
        }
    }
}

impl ClientConfigBuilder {
    pub fn software_version(mut self, version: impl Into<String>) -> Self {
        self.software_version = version.into();
        self
    }

    pub fn kex_preferences(mut self, preferences: KexPreferences) -> Self {
        self.kex_preferences = preferences;
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn rekey(mut self, rekey: RekeyThresholds) -> Self {
        self.rekey = rekey;
        self
    }

    pub fn crypto_provider(mut self, provider: Arc<dyn CryptoProvider>) -> Self {
        self.crypto_provider = provider;
        self
    }

    pub fn build(self) -> ClientConfig {
        ClientConfig {
            software_version: self.software_version,
            kex_preferences: self.kex_preferences,
            timeouts: self.timeouts,
            rekey: self.rekey,
            crypto_provider: self.crypto_provider,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_build_has_sane_defaults() {
        let config = ClientConfig::builder().build();
        assert!(config.software_version.starts_with("ssh-transport_"));
        assert_eq!(config.rekey.bytes, DEFAULT_REKEY_BYTES);
    }

    #[test]
    fn builder_overrides_are_reflected_in_the_built_config() {
        let config = ClientConfig::builder()
            .software_version("my-app_1.0")
            .rekey(RekeyThresholds {
                bytes: 1024,
                interval: Duration::from_secs(5),
            })
            .build();

        assert_eq!(config.software_version, "my-app_1.0");
        assert_eq!(config.rekey.bytes, 1024);
    }
}
