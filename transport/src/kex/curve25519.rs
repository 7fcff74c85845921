//! `curve25519-sha256` key exchange (RFC 8731), the teacher's sole kex method and still
//! the preferred one here: fast, constant-time, no group-membership pitfalls.

use std::io::{Read, Write};

use rand::RngCore;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey};

use crate::buffer::PacketBuffer;
use crate::codec::{self, DirectionState};
use crate::error::{Error, Result};
use crate::message::{KexDhInit, KexDhReply};

use super::KexHash;

/// `SSH_MSG_KEX_ECDH_INIT`/`REPLY` reuse the DH followup message ids (30/31); the field
/// layout differs (`Q_C`/`Q_S` raw points rather than `e`/`f` mpints), so this module
/// encodes/decodes them directly through [`PacketBuffer`] rather than through
/// [`crate::message::KexDhInit`]'s `mpint` accessor.
pub struct EcdhOutput {
    pub exchange_hash: Vec<u8>,
    pub host_key_blob: Vec<u8>,
    pub signature_blob: Vec<u8>,
    pub k_encoded: Vec<u8>,
}

pub fn run_client(
    stream: &mut (impl Read + Write),
    tx: &mut DirectionState,
    rx: &mut DirectionState,
    v_c: &str,
    v_s: &str,
    i_c: &[u8],
    i_s: &[u8],
    rng: &mut impl RngCore,
    authenticated: bool,
) -> Result<EcdhOutput> {
    let e_c = EphemeralSecret::random_from_rng(&mut *rng);
    let q_c = X25519PublicKey::from(&e_c);

    let mut init = PacketBuffer::with_headroom(5);
    init.put_u8(crate::message::id::KEX_FOLLOWUP_30)
        .put_bytes(q_c.as_bytes());
    let sealed = codec::Encoder::encode(init.readable(), tx, authenticated, rng)?;
    codec::write_sealed(stream, &sealed)?;

    let raw = codec::Decoder::decode(stream, rx, authenticated)?;
    let mut reply = raw.buffer();
    let id = reply.get_u8()?;
    if id != crate::message::id::KEX_FOLLOWUP_31 {
        return Err(Error::UnexpectedMessage(format!(
            "expected kex ecdh reply, got message id {id}"
        )));
    }
    let host_key_blob = reply.get_bytes()?;
    let q_s_raw = reply.get_bytes()?;
    let signature_blob = reply.get_bytes()?;

    let q_s_bytes: [u8; 32] = q_s_raw
        .as_slice()
        .try_into()
        .map_err(|_| Error::KexFailed("peer curve25519 public value has the wrong length".into()))?;
    let q_s = X25519PublicKey::from(q_s_bytes);

    let shared = e_c.diffie_hellman(&q_s);

    let mut k_buf = PacketBuffer::new();
    k_buf.put_biguint(&num_bigint::BigUint::from_bytes_be(shared.as_bytes()));
    let k_encoded = k_buf.into_vec();

    let mut hash_input = PacketBuffer::new();
    hash_input
        .put_str(v_c)
        .put_str(v_s)
        .put_bytes(i_c)
        .put_bytes(i_s)
        .put_bytes(&host_key_blob)
        .put_bytes(q_c.as_bytes())
        .put_bytes(&q_s_raw);
    hash_input.extend_writable(&k_encoded);

    let exchange_hash = KexHash::Sha256.digest(&[hash_input.as_full_slice()]);

    Ok(EcdhOutput {
        exchange_hash,
        host_key_blob,
        signature_blob,
        k_encoded,
    })
}
