//! Key exchange (§4.2): negotiate algorithms, run the chosen method to derive a shared
//! secret and exchange hash, verify the server's host key, and derive the six
//! direction-specific byte strings the codec installs.
//!
//! `KEXINIT -> FOLLOWUP -> NEWKEYS -> KEXINIT` loops for the life of the transport, once
//! per initial exchange and once per re-key; this module runs exactly one iteration of
//! that loop per call and leaves sequencing the loop to `TransportProtocol`.

pub mod dh;
mod curve25519;

use std::io::{Read, Write};

use digest::Digest;
use rand::RngCore;
use sha1::Sha1;
use sha2::Sha256;
use signature::Verifier;
use ssh_key::{PublicKey, Signature};
use strum::{AsRefStr, EnumString};

use crate::algorithm::{negotiate, Negotiated};
use crate::buffer::PacketBuffer;
use crate::codec::{self, DirectionState};
use crate::error::{Error, Result};
use crate::host_key::HostKeyVerifier;
use crate::message::{Encode, KexInit};

use dh::Group;

/// SSH key-exchange methods this crate can run (§4.2, §6). `Curve25519Sha256` is the
/// teacher implementation's only method; the two classic finite-field methods below it
/// were a standing TODO there and are implemented here.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum KexMethod {
    Curve25519Sha256,

    #[strum(serialize = "curve25519-sha256@libssh.org")]
    Curve25519Sha256Libssh,

    #[strum(serialize = "diffie-hellman-group14-sha1")]
    DiffieHellmanGroup14Sha1,

    #[strum(serialize = "diffie-hellman-group1-sha1")]
    DiffieHellmanGroup1Sha1,
}

/// Dispatches to the digest algorithm a kex method defines `HASH` as (RFC 4253 §7.2).
/// A runtime enum rather than a generic parameter, since the method is only known after
/// negotiation -- `TransportProtocol` can't pick a monomorphization ahead of time.
#[derive(Debug, Clone, Copy)]
pub(crate) enum KexHash {
    Sha1,
    Sha256,
}

impl KexHash {
    pub(crate) fn digest(&self, parts: &[&[u8]]) -> Vec<u8> {
        match self {
            Self::Sha1 => {
                let mut h = Sha1::new();
                for p in parts {
                    h.update(p);
                }
                h.finalize().to_vec()
            }
            Self::Sha256 => {
                let mut h = Sha256::new();
                for p in parts {
                    h.update(p);
                }
                h.finalize().to_vec()
            }
        }
    }
}

/// Per-direction key material derived from one key exchange (§4.2 step 7).
#[derive(Debug, Clone)]
pub struct DerivedKeys {
    pub iv: Vec<u8>,
    pub key: Vec<u8>,
    pub mac: Vec<u8>,
}

/// The outcome of one completed key exchange.
pub struct KexOutput {
    pub negotiated: Negotiated,
    /// The exchange hash `H` from this run. Callers use it as the session id on the
    /// first exchange only; re-keys compute a fresh one but keep the original id.
    pub exchange_hash: Vec<u8>,
    pub client_to_server: DerivedKeys,
    pub server_to_client: DerivedKeys,
}

fn random_kexinit(rng: &mut impl RngCore, preferences: &KexPreferences) -> KexInit {
    let mut cookie = [0u8; 16];
    rng.fill_bytes(&mut cookie);

    KexInit {
        cookie,
        kex_algorithms: preferences.kex.clone(),
        server_host_key_algorithms: preferences.host_key.clone(),
        encryption_algorithms_client_to_server: preferences.ciphers.clone(),
        encryption_algorithms_server_to_client: preferences.ciphers.clone(),
        mac_algorithms_client_to_server: preferences.macs.clone(),
        mac_algorithms_server_to_client: preferences.macs.clone(),
        compression_algorithms_client_to_server: preferences.compressions.clone(),
        compression_algorithms_server_to_client: preferences.compressions.clone(),
        languages_client_to_server: Vec::new(),
        languages_server_to_client: Vec::new(),
        first_kex_packet_follows: false,
    }
}

/// The algorithm name-lists a client advertises, one entry per `KexInit` namelist slot
/// that isn't always identical in both directions. Built from [`crate::config::ClientConfig`].
#[derive(Debug, Clone)]
pub struct KexPreferences {
    pub kex: Vec<String>,
    pub host_key: Vec<String>,
    pub ciphers: Vec<String>,
    pub macs: Vec<String>,
    pub compressions: Vec<String>,
}

impl Default for KexPreferences {
    fn default() -> Self {
        fn names(v: &[&str]) -> Vec<String> {
            v.iter().map(|s| s.to_string()).collect()
        }

        Self {
            kex: names(&[
                "curve25519-sha256",
                "curve25519-sha256@libssh.org",
                "diffie-hellman-group14-sha1",
                "diffie-hellman-group1-sha1",
            ]),
            host_key: names(&["ssh-ed25519", "rsa-sha2-512", "rsa-sha2-256", "ssh-rsa", "ssh-dss"]),
            ciphers: names(&["aes128-ctr", "aes192-ctr", "aes256-ctr", "aes128-cbc"]),
            macs: names(&["hmac-sha2-256", "hmac-sha1", "hmac-sha1-96"]),
            compressions: names(&["none", "zlib@openssh.com", "zlib"]),
        }
    }
}

/// Runs the client side of a single key exchange over `stream`, from sending our
/// `KEXINIT` through installing nothing (installation of the derived keys into `tx`/`rx`
/// is the caller's job, timed to NEWKEYS per §4.2 step 6).
///
/// `peer_kexinit` carries the peer's `KEXINIT` when the caller already consumed it off
/// the wire before deciding to run a key exchange (a rekey the peer initiated, seen by
/// the dispatch loop before it knew to hand control here); `None` when this side is the
/// one initiating, in which case the peer's `KEXINIT` is read as the first step below.
#[allow(clippy::too_many_arguments)]
pub fn run_client(
    stream: &mut (impl Read + Write),
    tx: &mut DirectionState,
    rx: &mut DirectionState,
    preferences: &KexPreferences,
    verifiers: &[Box<dyn HostKeyVerifier>],
    remote_host: &str,
    v_c: &str,
    v_s: &str,
    rng: &mut impl RngCore,
    authenticated: bool,
    peer_kexinit: Option<KexInit>,
) -> Result<KexOutput> {
    let local_kexinit = random_kexinit(rng, preferences);
    codec::send(stream, tx, authenticated, rng, &local_kexinit)?;
    let remote_kexinit: KexInit = match peer_kexinit {
        Some(kexinit) => kexinit,
        None => codec::recv(stream, rx, authenticated)?,
    };

    let negotiated = negotiate(&local_kexinit, &remote_kexinit)?;

    let i_c = local_kexinit.encode().readable().to_vec();
    let i_s = remote_kexinit.encode().readable().to_vec();

    let method: KexMethod = negotiated.kex_algorithm.parse().map_err(|_| {
        Error::KexFailed(format!(
            "negotiated kex method {} has no implementation",
            negotiated.kex_algorithm
        ))
    })?;

    let (exchange_hash, host_key_blob, signature_blob, k_encoded, kex_hash) = match method {
        KexMethod::Curve25519Sha256 | KexMethod::Curve25519Sha256Libssh => {
            let out = curve25519::run_client(stream, tx, rx, v_c, v_s, &i_c, &i_s, rng, authenticated)?;
            (out.exchange_hash, out.host_key_blob, out.signature_blob, out.k_encoded, KexHash::Sha256)
        }
        KexMethod::DiffieHellmanGroup14Sha1 => {
            run_dh_client(stream, tx, rx, v_c, v_s, &i_c, &i_s, &dh::GROUP14, rng, authenticated)?
        }
        KexMethod::DiffieHellmanGroup1Sha1 => {
            run_dh_client(stream, tx, rx, v_c, v_s, &i_c, &i_s, &dh::GROUP1, rng, authenticated)?
        }
    };

    let host_key = PublicKey::from_bytes(&host_key_blob)
        .map_err(|e| Error::KexFailed(format!("unparseable host key: {e}")))?;
    let signature = Signature::try_from(signature_blob.as_slice())
        .map_err(|e| Error::KexFailed(format!("unparseable host key signature: {e}")))?;

    Verifier::verify(&host_key, &exchange_hash, &signature)
        .map_err(|_| Error::KexFailed("host key signature verification failed".into()))?;

    if !verifiers.iter().any(|v| v.verify(remote_host, &host_key)) {
        return Err(Error::HostKeyNotVerifiable);
    }

    let client_to_server = derive_direction(
        kex_hash,
        &k_encoded,
        &exchange_hash,
        (b'A', b'C', b'E'),
        &exchange_hash,
        &negotiated.client_to_server,
    );
    let server_to_client = derive_direction(
        kex_hash,
        &k_encoded,
        &exchange_hash,
        (b'B', b'D', b'F'),
        &exchange_hash,
        &negotiated.server_to_client,
    );

    Ok(KexOutput {
        negotiated,
        exchange_hash,
        client_to_server,
        server_to_client,
    })
}

#[allow(clippy::too_many_arguments)]
fn run_dh_client(
    stream: &mut (impl Read + Write),
    tx: &mut DirectionState,
    rx: &mut DirectionState,
    v_c: &str,
    v_s: &str,
    i_c: &[u8],
    i_s: &[u8],
    group: &Group,
    rng: &mut impl RngCore,
    authenticated: bool,
) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>, Vec<u8>, KexHash)> {
    let (x, e) = group.generate_keypair(rng);

    let mut init = PacketBuffer::with_headroom(5);
    init.put_u8(crate::message::id::KEX_FOLLOWUP_30).put_biguint(&e);
    let sealed = codec::Encoder::encode(init.readable(), tx, authenticated, rng)?;
    codec::write_sealed(stream, &sealed)?;

    let raw = codec::Decoder::decode(stream, rx, authenticated)?;
    let mut reply = raw.buffer();
    let id = reply.get_u8()?;
    if id != crate::message::id::KEX_FOLLOWUP_31 {
        return Err(Error::UnexpectedMessage(format!(
            "expected kex dh reply, got message id {id}"
        )));
    }
    let host_key_blob = reply.get_bytes()?;
    let f = reply.get_biguint()?;
    let signature_blob = reply.get_bytes()?;

    if !group.is_valid_public(&f) {
        return Err(Error::KexFailed("peer's DH public value is out of range".into()));
    }

    let k = group.compute_shared(&f, &x);

    let mut k_buf = PacketBuffer::new();
    k_buf.put_biguint(&k);
    let k_encoded = k_buf.into_vec();

    let mut hash_input = PacketBuffer::new();
    hash_input
        .put_str(v_c)
        .put_str(v_s)
        .put_bytes(i_c)
        .put_bytes(i_s)
        .put_bytes(&host_key_blob)
        .put_biguint(&e)
        .put_biguint(&f);
    hash_input.extend_writable(&k_encoded);

    let exchange_hash = KexHash::Sha1.digest(&[hash_input.as_full_slice()]);

    Ok((exchange_hash, host_key_blob, signature_blob, k_encoded, KexHash::Sha1))
}

fn derive_direction(
    kex_hash: KexHash,
    k_encoded: &[u8],
    h: &[u8],
    letters: (u8, u8, u8),
    session_id: &[u8],
    algo: &crate::algorithm::AlgoSet,
) -> DerivedKeys {
    let (iv_letter, key_letter, mac_letter) = letters;
    DerivedKeys {
        iv: derive_one(kex_hash, k_encoded, h, iv_letter, session_id, algo.cipher.iv_size()),
        key: derive_one(kex_hash, k_encoded, h, key_letter, session_id, algo.cipher.key_size()),
        mac: derive_one(kex_hash, k_encoded, h, mac_letter, session_id, algo.mac.key_size()),
    }
}

/// `HASH(K || H || X || session_id)`, extended by `HASH(K || H || prior)` until it
/// reaches `size` bytes (§4.2 step 7, RFC 4253 §7.2).
fn derive_one(
    kex_hash: KexHash,
    k_encoded: &[u8],
    h: &[u8],
    letter: u8,
    session_id: &[u8],
    size: usize,
) -> Vec<u8> {
    if size == 0 {
        return Vec::new();
    }

    let mut material = kex_hash.digest(&[k_encoded, h, &[letter], session_id]);
    while material.len() < size {
        let next = kex_hash.digest(&[k_encoded, h, &material]);
        material.extend_from_slice(&next);
    }
    material.truncate(size);
    material
}
