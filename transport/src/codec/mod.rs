//! The binary packet protocol codec (§4.1): framing, padding, encryption, MAC and
//! (de)compression of one packet at a time.
//!
//! The spec describes the decoder as a `NeedHeader`/`NeedBody` state machine reacting to
//! partial input, which is the right shape for a non-blocking/event-driven reader. §5
//! mandates a thread-per-pump model instead (the *read pump* blocks on the socket), so
//! the two phases below are expressed as two blocking reads rather than a poll loop --
//! behaviorally the same contract, fit to the concurrency model actually in force here.

use std::io::{Read, Write};

use rand::RngCore;

use crate::algorithm::{cipher::CipherState, compress::CompressionState, AlgoSet};
use crate::error::{Error, Result};
use crate::message::RawMessage;

const MIN_PACKET_SIZE: usize = 16;
const MIN_PADDING: usize = 4;
const MIN_ALIGN: usize = 8;
const MAX_PACKET_LENGTH: u32 = 256 * 1024;

/// Per-direction keys, sequence number and continuation state. One lives on the inbound
/// side, one on the outbound side, of [`crate::transport::TransportProtocol`].
pub struct DirectionState {
    pub algo: AlgoSet,
    pub key: Vec<u8>,
    pub iv: Vec<u8>,
    pub mac_key: Vec<u8>,
    pub seq: u32,
    /// Whether this side of the codec compresses (`true`, the outbound/tx direction) or
    /// decompresses (`false`, the inbound/rx direction); decides which half of the zlib
    /// stream [`Self::new_compression_state`] constructs.
    outbound: bool,
    cipher_state: Option<CipherState>,
    compression_state: CompressionState,
}

impl DirectionState {
    fn new(outbound: bool) -> Self {
        Self {
            algo: AlgoSet::default(),
            key: Vec::new(),
            iv: Vec::new(),
            mac_key: Vec::new(),
            seq: 0,
            outbound,
            cipher_state: None,
            compression_state: CompressionState::None,
        }
    }

    pub fn new_outbound() -> Self {
        Self::new(true)
    }

    pub fn new_inbound() -> Self {
        Self::new(false)
    }

    /// Install a freshly negotiated algorithm set and derived keys, replacing all
    /// cipher continuation state (called once from each side after NEWKEYS).
    ///
    /// `authenticated` is this side's current authentication state at install time: a
    /// non-delayed `zlib` starts compressing immediately, a delayed
    /// `zlib@openssh.com` only once `authenticated` is already `true` (e.g. a re-key
    /// after auth) -- otherwise it stays `None` until
    /// [`Self::activate_delayed_compression`] is called.
    pub fn install(&mut self, algo: AlgoSet, key: Vec<u8>, iv: Vec<u8>, mac_key: Vec<u8>, authenticated: bool) {
        self.algo = algo;
        self.key = key;
        self.iv = iv;
        self.mac_key = mac_key;
        self.cipher_state = None;
        // seq is intentionally NOT reset: sequence numbers never reset across rekeys.

        self.compression_state = if self.algo.compression.active(authenticated) {
            self.new_compression_state()
        } else {
            CompressionState::None
        };
    }

    fn new_compression_state(&self) -> CompressionState {
        if self.outbound {
            CompressionState::new_compress()
        } else {
            CompressionState::new_decompress()
        }
    }

    /// Starts the zlib stream for a delayed (`zlib@openssh.com`) algorithm that was
    /// negotiated before authentication completed. A no-op for `none`/non-delayed
    /// algorithms and once already active. Called on `USERAUTH_SUCCESS` (§4.4) for the
    /// outbound side, and by the read pump for the inbound side once it observes the
    /// transport has become authenticated (§4.1 step 1).
    pub fn activate_delayed_compression(&mut self) {
        if self.algo.compression.is_delayed() && matches!(self.compression_state, CompressionState::None) {
            self.compression_state = self.new_compression_state();
        }
    }

    fn block_size(&self) -> usize {
        self.algo.cipher.block_size().max(MIN_ALIGN)
    }
}

fn padding_length(payload_len: usize, block: usize) -> u8 {
    let size = 4 + 1 + payload_len; // packet_length field + padding_length field + payload
    let mut pad = block - (size % block);
    if pad < MIN_PADDING {
        pad += block;
    }
    if size + pad < MIN_PACKET_SIZE {
        pad += block;
    }
    pad as u8
}

pub struct Encoder;

impl Encoder {
    /// Encode and seal one packet, per the encode contract of §4.1.
    ///
    /// `authenticated` gates delayed compression. Returns the ciphertext ready to be
    /// written to the socket.
    pub fn encode(
        payload: &[u8],
        state: &mut DirectionState,
        authenticated: bool,
        rng: &mut impl RngCore,
    ) -> Result<Vec<u8>> {
        let payload = if state.algo.compression.active(authenticated) {
            state.compression_state.compress(payload)?
        } else {
            payload.to_vec()
        };

        let block = state.block_size();
        let pad_len = padding_length(payload.len(), block);

        let mut packet = Vec::with_capacity(5 + payload.len() + pad_len as usize);
        let packet_length = (1 + payload.len() + pad_len as usize) as u32;
        packet.extend_from_slice(&packet_length.to_be_bytes());
        packet.push(pad_len);
        packet.extend_from_slice(&payload);

        let mut padding = vec![0u8; pad_len as usize];
        rng.fill_bytes(&mut padding);
        packet.extend_from_slice(&padding);

        let seq = state.seq;
        state.seq = state.seq.wrapping_add(1);

        let mac = if !state.algo.mac.is_none() {
            Some(state.algo.mac.sign(&state.mac_key, seq, &packet))
        } else {
            None
        };

        if !state.algo.cipher.is_none() {
            state
                .algo
                .cipher
                .clone()
                .encrypt(&mut state.cipher_state, &state.key, &state.iv, &mut packet)?;
        }

        if let Some(mac) = mac {
            packet.extend_from_slice(&mac);
        }

        Ok(packet)
    }
}

pub struct Decoder;

impl Decoder {
    /// Decode exactly one packet from `reader`, per the decode contract of §4.1.
    ///
    /// Any failure here is fatal to the whole transport (§4.1, §7).
    pub fn decode(
        reader: &mut impl Read,
        state: &mut DirectionState,
        authenticated: bool,
    ) -> Result<RawMessage> {
        let block = state.block_size();

        let mut header = vec![0u8; block];
        reader.read_exact(&mut header)?;

        if !state.algo.cipher.is_none() {
            state
                .algo
                .cipher
                .clone()
                .decrypt(&mut state.cipher_state, &state.key, &state.iv, &mut header)?;
        }

        let packet_length = u32::from_be_bytes(header[0..4].try_into().unwrap());
        if !(5..=MAX_PACKET_LENGTH).contains(&packet_length) {
            return Err(Error::ProtocolError(format!(
                "implausible packet_length {packet_length}"
            )));
        }
        if (packet_length as usize + 4) % block != 0 {
            return Err(Error::ProtocolError(
                "packet_length not aligned to cipher block size".into(),
            ));
        }

        let mut rest = vec![0u8; packet_length as usize + 4 - block];
        reader.read_exact(&mut rest)?;

        let mac_len = state.algo.mac.size();
        let mut mac = vec![0u8; mac_len];
        if mac_len > 0 {
            reader.read_exact(&mut mac)?;
        }

        if !state.algo.cipher.is_none() {
            state
                .algo
                .cipher
                .clone()
                .decrypt(&mut state.cipher_state, &state.key, &state.iv, &mut rest)?;
        }

        let mut cleartext_packet = header.clone();
        cleartext_packet.extend_from_slice(&rest);

        if !state.algo.mac.is_none() {
            state
                .algo
                .mac
                .verify(&state.mac_key, state.seq, &cleartext_packet, &mac)?;
        }

        let pad_len = cleartext_packet[4] as usize;
        let payload_end = cleartext_packet.len() - pad_len;
        let payload = cleartext_packet[5..payload_end].to_vec();

        let payload = if state.algo.compression.active(authenticated) {
            state.compression_state.decompress(&payload)?
        } else {
            payload
        };

        let seq = state.seq;
        state.seq = state.seq.wrapping_add(1);

        Ok(RawMessage { payload, seq })
    }
}

/// Write an already-sealed packet (as produced by [`Encoder::encode`]) to `writer`.
pub fn write_sealed(writer: &mut impl Write, sealed: &[u8]) -> Result<()> {
    writer.write_all(sealed)?;
    writer.flush()?;
    Ok(())
}

/// Encode, seal and send one typed message. Convenience wrapper around
/// [`Encoder::encode`]/[`write_sealed`] for call sites (kex, service handshakes) that
/// deal in typed messages rather than raw payloads.
pub fn send<E: crate::message::Encode>(
    writer: &mut impl Write,
    state: &mut DirectionState,
    authenticated: bool,
    rng: &mut impl RngCore,
    message: &E,
) -> Result<u32> {
    let seq = state.seq;
    let sealed = Encoder::encode(message.encode().readable(), state, authenticated, rng)?;
    write_sealed(writer, &sealed)?;
    Ok(seq)
}

/// Receive and decode one typed message, rejecting anything with a different id.
pub fn recv<D: crate::message::Decode>(
    reader: &mut impl Read,
    state: &mut DirectionState,
    authenticated: bool,
) -> Result<D> {
    let raw = Decoder::decode(reader, state, authenticated)?;
    D::decode(raw.buffer())
}
