//! Message authentication algorithms (RFC 4253 §6.4), minimum set required by §6.

use digest::{KeyInit, Mac as _};
use hmac::Hmac as HmacImpl;
use md5::Md5;
use sha1::Sha1;
use sha2::Sha256;
use strum::{AsRefStr, EnumString};

use crate::error::{Error, Result};

#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Mac {
    HmacSha1,

    #[strum(serialize = "hmac-sha1-96")]
    HmacSha1_96,

    HmacMd5,

    #[strum(serialize = "hmac-md5-96")]
    HmacMd5_96,

    // Not in the RFC 4253 minimum set, but common enough that a provider built
    // without it would be unusual; included so the negotiation proposal has depth.
    #[strum(serialize = "hmac-sha2-256")]
    HmacSha256,

    #[default]
    None,
}

impl Mac {
    pub fn key_size(&self) -> usize {
        self.full_size()
    }

    /// The full digest size, used to derive the integrity key regardless of truncation.
    fn full_size(&self) -> usize {
        match self {
            Self::HmacSha1 | Self::HmacSha1_96 => 20,
            Self::HmacMd5 | Self::HmacMd5_96 => 16,
            Self::HmacSha256 => 32,
            Self::None => 0,
        }
    }

    /// The on-wire MAC tag length, which may be a truncation of the full digest.
    pub fn size(&self) -> usize {
        match self {
            Self::HmacSha1_96 => 12,
            Self::HmacMd5_96 => 12,
            _ => self.full_size(),
        }
    }

    pub fn sign(&self, key: &[u8], seq: u32, cleartext_packet: &[u8]) -> Vec<u8> {
        fn sign<D: digest::Mac + KeyInit>(key: &[u8], seq: u32, packet: &[u8], tag_len: usize) -> Vec<u8> {
            let mut mac = <D as KeyInit>::new_from_slice(key).expect("key derivation failed");
            mac.update(&seq.to_be_bytes());
            mac.update(packet);
            let mut tag = mac.finalize().into_bytes().to_vec();
            tag.truncate(tag_len);
            tag
        }

        match self {
            Self::HmacSha1 | Self::HmacSha1_96 => {
                sign::<HmacImpl<Sha1>>(key, seq, cleartext_packet, self.size())
            }
            Self::HmacMd5 | Self::HmacMd5_96 => {
                sign::<HmacImpl<Md5>>(key, seq, cleartext_packet, self.size())
            }
            Self::HmacSha256 => sign::<HmacImpl<Sha256>>(key, seq, cleartext_packet, self.size()),
            Self::None => Vec::new(),
        }
    }

    pub fn verify(&self, key: &[u8], seq: u32, cleartext_packet: &[u8], tag: &[u8]) -> Result<()> {
        if self.is_none() {
            return Ok(());
        }

        let expected = self.sign(key, seq, cleartext_packet);
        // Constant-time-ish comparison: both operands are attacker-observable lengths
        // already (fixed by algorithm), only the content needs constant-time compare.
        let mut diff = 0u8;
        if expected.len() != tag.len() {
            return Err(Error::MacMismatch);
        }
        for (a, b) in expected.iter().zip(tag) {
            diff |= a ^ b;
        }

        if diff == 0 {
            Ok(())
        } else {
            Err(Error::MacMismatch)
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}
