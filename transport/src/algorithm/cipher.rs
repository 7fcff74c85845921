//! Symmetric encryption algorithms usable for the two transport directions.
//!
//! This, together with [`super::mac::Mac`] and [`super::compress::Compression`], is the
//! part of the out-of-scope `CryptoProvider` (§4.7) that ships as this crate's default
//! implementation: swapping it out never touches [`crate::codec`] or [`crate::kex`].

use cipher::{inout::InOutBufReserved, BlockDecryptMut, BlockEncryptMut, KeyIvInit, StreamCipher};
use strum::{AsRefStr, EnumString};

use crate::error::{Error, Result};

/// Opaque, lazily-initialized continuation state for a stream/block cipher: the state
/// carries forward between packets (CBC chaining, CTR counter), so it must not be
/// re-derived from the key/IV on every call.
pub type CipherState = Box<dyn std::any::Any + Send + Sync>;

/// SSH encryption algorithms (RFC 4253 §6.3), minimum set required by §6.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Cipher {
    Aes256Cbc,
    Aes192Cbc,
    Aes128Cbc,

    Aes256Ctr,
    Aes192Ctr,
    Aes128Ctr,

    #[strum(serialize = "3des-cbc")]
    TDesCbc,

    BlowfishCbc,

    #[default]
    None,
}

impl Cipher {
    pub fn block_size(&self) -> usize {
        match self {
            Self::None => 8,
            Self::TDesCbc | Self::BlowfishCbc => 8,
            Self::Aes128Cbc | Self::Aes192Cbc | Self::Aes256Cbc => 16,
            Self::Aes128Ctr | Self::Aes192Ctr | Self::Aes256Ctr => 16,
        }
    }

    pub fn key_size(&self) -> usize {
        match self {
            Self::None => 0,
            Self::BlowfishCbc => 16,
            Self::TDesCbc => 24,
            Self::Aes128Cbc | Self::Aes128Ctr => 16,
            Self::Aes192Cbc | Self::Aes192Ctr => 24,
            Self::Aes256Cbc | Self::Aes256Ctr => 32,
        }
    }

    pub fn iv_size(&self) -> usize {
        // Block ciphers here all use a block-sized IV; stream mode is none.
        match self {
            Self::None => 0,
            _ => self.block_size(),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    fn state<'s, T: KeyIvInit + Send + Sync + 'static>(
        state: &'s mut Option<CipherState>,
        key: &[u8],
        iv: &[u8],
    ) -> &'s mut T {
        state
            .get_or_insert_with(|| {
                Box::new(T::new_from_slices(key, iv).expect("key/iv of the wrong size"))
            })
            .downcast_mut()
            .expect("cipher state type changed across calls")
    }

    fn ctr<C: StreamCipher>(cipher: &mut C, buffer: &mut [u8]) -> Result<()> {
        cipher
            .try_apply_keystream(buffer)
            .map_err(|_| Error::ProtocolError("cipher keystream exhausted".into()))
    }

    fn cbc_encrypt<C: BlockEncryptMut>(cipher: &mut C, buffer: &mut [u8]) -> Result<()> {
        let data = InOutBufReserved::from_mut_slice(buffer, buffer.len())
            .map_err(|_| Error::ProtocolError("cipher buffer misaligned".into()))?;
        let mut blocks = data
            .into_padded_blocks::<cipher::block_padding::NoPadding, C::BlockSize>()
            .map_err(|_| Error::ProtocolError("payload not block-aligned".into()))?;

        cipher.encrypt_blocks_inout_mut(blocks.get_blocks());
        if let Some(block) = blocks.get_tail_block() {
            cipher.encrypt_block_inout_mut(block);
        }

        Ok(())
    }

    fn cbc_decrypt<C: BlockDecryptMut>(cipher: &mut C, buffer: &mut [u8]) -> Result<()> {
        let data = InOutBufReserved::from_mut_slice(buffer, buffer.len())
            .map_err(|_| Error::ProtocolError("cipher buffer misaligned".into()))?;
        let mut blocks = data
            .into_padded_blocks::<cipher::block_padding::NoPadding, C::BlockSize>()
            .map_err(|_| Error::ProtocolError("payload not block-aligned".into()))?;

        cipher.decrypt_blocks_inout_mut(blocks.get_blocks());
        if let Some(block) = blocks.get_tail_block() {
            cipher.decrypt_block_inout_mut(block);
        }

        Ok(())
    }

    pub fn encrypt(
        &self,
        state: &mut Option<CipherState>,
        key: &[u8],
        iv: &[u8],
        buffer: &mut [u8],
    ) -> Result<()> {
        match self {
            Self::Aes256Ctr => {
                Self::ctr(Self::state::<ctr::Ctr128BE<aes::Aes256>>(state, key, iv), buffer)
            }
            Self::Aes192Ctr => {
                Self::ctr(Self::state::<ctr::Ctr128BE<aes::Aes192>>(state, key, iv), buffer)
            }
            Self::Aes128Ctr => {
                Self::ctr(Self::state::<ctr::Ctr128BE<aes::Aes128>>(state, key, iv), buffer)
            }
            Self::Aes256Cbc => Self::cbc_encrypt(
                Self::state::<cbc::Encryptor<aes::Aes256>>(state, key, iv),
                buffer,
            ),
            Self::Aes192Cbc => Self::cbc_encrypt(
                Self::state::<cbc::Encryptor<aes::Aes192>>(state, key, iv),
                buffer,
            ),
            Self::Aes128Cbc => Self::cbc_encrypt(
                Self::state::<cbc::Encryptor<aes::Aes128>>(state, key, iv),
                buffer,
            ),
            Self::TDesCbc => Self::cbc_encrypt(
                Self::state::<cbc::Encryptor<des::TdesEde3>>(state, key, iv),
                buffer,
            ),
            Self::BlowfishCbc => Self::cbc_encrypt(
                Self::state::<cbc::Encryptor<blowfish::Blowfish>>(state, key, iv),
                buffer,
            ),
            Self::None => Ok(()),
        }
    }

    pub fn decrypt(
        &self,
        state: &mut Option<CipherState>,
        key: &[u8],
        iv: &[u8],
        buffer: &mut [u8],
    ) -> Result<()> {
        match self {
            // CTR mode decryption is the keystream applied identically.
            Self::Aes256Ctr | Self::Aes192Ctr | Self::Aes128Ctr => {
                self.encrypt(state, key, iv, buffer)
            }
            Self::Aes256Cbc => Self::cbc_decrypt(
                Self::state::<cbc::Decryptor<aes::Aes256>>(state, key, iv),
                buffer,
            ),
            Self::Aes192Cbc => Self::cbc_decrypt(
                Self::state::<cbc::Decryptor<aes::Aes192>>(state, key, iv),
                buffer,
            ),
            Self::Aes128Cbc => Self::cbc_decrypt(
                Self::state::<cbc::Decryptor<aes::Aes128>>(state, key, iv),
                buffer,
            ),
            Self::TDesCbc => Self::cbc_decrypt(
                Self::state::<cbc::Decryptor<des::TdesEde3>>(state, key, iv),
                buffer,
            ),
            Self::BlowfishCbc => Self::cbc_decrypt(
                Self::state::<cbc::Decryptor<blowfish::Blowfish>>(state, key, iv),
                buffer,
            ),
            Self::None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Cipher::Aes128Cbc)]
    #[case(Cipher::Aes192Cbc)]
    #[case(Cipher::Aes256Cbc)]
    #[case(Cipher::Aes128Ctr)]
    #[case(Cipher::TDesCbc)]
    #[case(Cipher::BlowfishCbc)]
    fn encrypt_then_decrypt_round_trips(#[case] cipher: Cipher) {
        let key = vec![0x42; cipher.key_size()];
        let iv = vec![0x24; cipher.iv_size()];

        let mut plaintext = b"sixteen byte msg".to_vec();
        plaintext.resize(cipher.block_size() * 4, 0);
        let original = plaintext.clone();

        let mut enc_state = None;
        cipher
            .encrypt(&mut enc_state, &key, &iv, &mut plaintext)
            .unwrap();
        assert_ne!(plaintext, original);

        let mut dec_state = None;
        cipher.decrypt(&mut dec_state, &key, &iv, &mut plaintext).unwrap();
        assert_eq!(plaintext, original);
    }

    #[test]
    fn none_cipher_is_identity() {
        let mut buf = b"unchanged".to_vec();
        let original = buf.clone();

        let mut state = None;
        Cipher::None.encrypt(&mut state, &[], &[], &mut buf).unwrap();
        assert_eq!(buf, original);
    }

    #[test]
    fn parses_kebab_case_names() {
        assert_eq!("aes128-cbc".parse(), Ok(Cipher::Aes128Cbc));
        assert_eq!("3des-cbc".parse(), Ok(Cipher::TDesCbc));
        assert_eq!("none".parse(), Ok(Cipher::None));
    }
}
