//! The classic finite-field Diffie-Hellman groups (RFC 4253 §8.1, RFC 3526 group 14):
//! the one key-exchange method the prior art this crate descends from left as a
//! standing TODO. `num-bigint` supplies the modular exponentiation.

use num_bigint::BigUint;
use rand::RngCore;

/// RFC 2409 §6.2 "Second Oakley Group", 1024-bit MODP.
const GROUP1_PRIME_HEX: &str = "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD\
129024E088A67CC74020BBEA63B139B22514A08798E3404\
DDEF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245\
E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE65381\
FFFFFFFFFFFFFFFF";

/// RFC 3526 §3 "2048-bit MODP Group" (group 14).
const GROUP14_PRIME_HEX: &str = "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD\
129024E088A67CC74020BBEA63B139B22514A08798E3404\
DDEF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245\
E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D\
C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F\
83655D23DCA3AD961C62F356208552BB9ED529077096966D\
670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B\
E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9\
DE2BCBF6955817183995497CEA956AE515D2261898FA0510\
15728E5A8AACAA68FFFFFFFFFFFFFFFF";

/// A named MODP group used by the classic `diffie-hellman-group*-sha1` methods.
#[derive(Debug, Clone, Copy)]
pub struct Group {
    pub prime_hex: &'static str,
    pub generator: u32,
}

pub const GROUP1: Group = Group {
    prime_hex: GROUP1_PRIME_HEX,
    generator: 2,
};

pub const GROUP14: Group = Group {
    prime_hex: GROUP14_PRIME_HEX,
    generator: 2,
};

impl Group {
    pub fn prime(&self) -> BigUint {
        BigUint::parse_bytes(self.prime_hex.as_bytes(), 16)
            .expect("hardcoded MODP prime is valid hex")
    }

    pub fn generator(&self) -> BigUint {
        BigUint::from(self.generator)
    }

    /// Draw a private exponent `x` and compute the public value `g^x mod p`.
    ///
    /// Per RFC 4253 §8, `x` should be at least twice the hash output length in bits;
    /// drawing a full-width exponent (same bit length as `p`) is always sufficient and
    /// is what this does, at the cost of a slightly more expensive `modpow`.
    pub fn generate_keypair(&self, rng: &mut impl RngCore) -> (BigUint, BigUint) {
        let p = self.prime();
        let bytes = (p.bits() as usize).div_ceil(8);

        let mut raw = vec![0u8; bytes];
        rng.fill_bytes(&mut raw);
        let x = BigUint::from_bytes_be(&raw) % &p;

        let public = self.generator().modpow(&x, &p);
        (x, public)
    }

    pub fn compute_shared(&self, their_public: &BigUint, our_private: &BigUint) -> BigUint {
        their_public.modpow(our_private, &self.prime())
    }

    /// Validate the peer's public value is in `[2, p-2]` (RFC 4253 §8, implicit group
    /// membership check against the trivial small-subgroup attacks).
    pub fn is_valid_public(&self, value: &BigUint) -> bool {
        let p = self.prime();
        *value >= BigUint::from(2u32) && *value <= p - BigUint::from(2u32)
    }
}
